use anyhow::{bail, Context, Result};
use burn_wgpu::{Wgpu, WgpuDevice};
use burn::tensor::{backend::Backend, Tensor};
use tracing::info;

use calibration_lib::config::{self, ConfigError, Settings};
use calibration_lib::logger;
use calibration_lib::ml::{ClassifierModel, ImageClassifier, InferenceEngine, WeightStore};
use calibration_lib::model::{print_metadata_info, save_checkpoint, ModelMetadata};

const DESCRIPTION: &str = "Calibration experiments on dermatology image classifiers.";

fn main() {
    let settings = match config::load_configurations(DESCRIPTION) {
        Ok(settings) => settings,
        // --help / --version もここを通る
        Err(ConfigError::Cli(e)) => e.exit(),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let _guard = match logger::init_logging(&settings) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&settings) {
        tracing::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(settings: &Settings) -> Result<()> {
    config::print_arguments(settings);

    let device = if settings.use_gpu {
        WgpuDevice::DiscreteGpu(0)
    } else {
        WgpuDevice::Cpu
    };
    <Wgpu as Backend>::seed(&device, settings.seed);
    info!("Device: {:?}", device);

    match settings.task.as_str() {
        "train" => train::<Wgpu>(settings, &device),
        "test" => test::<Wgpu>(settings, &device),
        other => bail!("Unknown task {:?}, expected \"train\" or \"test\"", other),
    }
}

/// 分類器を構築してチェックポイントを書き出す
fn train<B: Backend>(settings: &Settings, device: &B::Device) -> Result<()> {
    let model = ClassifierModel::<B>::new(
        settings.encoder,
        settings.binary,
        settings.pretrained,
        device,
        &WeightStore::from_env(),
    )
    .with_context(|| format!("Failed to build the {} classifier", settings.encoder))?;
    info!(
        "{} classifier: {} outputs, {} parameters",
        settings.encoder,
        model.num_outputs(),
        model.num_params()
    );

    check_output_shape(&model, settings.image_size, device)?;

    let metadata = ModelMetadata::from_settings(settings, model.num_outputs(), model.num_params());
    let weights = model.to_bytes()?;
    let path = save_checkpoint(&settings.checkpoint_path(), &metadata, &weights)?;
    info!("Checkpoint saved: {}", path.display());
    Ok(())
}

/// チェックポイントを読み込んで同じ形状チェックを行う
fn test<B: Backend>(settings: &Settings, device: &B::Device) -> Result<()> {
    let engine = InferenceEngine::<B>::load(settings.checkpoint_path(), device)?;
    print_metadata_info(engine.metadata());
    check_output_shape(engine.model(), engine.metadata().image_size, device)
}

/// ゼロ画像1枚を流してロジットの形状を確かめる
fn check_output_shape<B: Backend, M: ImageClassifier<B>>(
    model: &M,
    image_size: usize,
    device: &B::Device,
) -> Result<()> {
    let images = Tensor::<B, 4>::zeros([1, 3, image_size, image_size], device);
    let dims = model.forward(images).dims();
    if dims != [1, model.num_outputs()] {
        bail!(
            "Unexpected logits shape {:?}, expected [1, {}]",
            dims,
            model.num_outputs()
        );
    }
    info!("Logits shape: {:?}", dims);
    Ok(())
}
