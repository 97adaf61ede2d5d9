//! チェックポイントの永続化
//!
//! Tar.gz形式で分類器の重みとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（バックボーン、出力数、実験設定など）
//! - model.bin       - 分類器の重み（バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// `.tar.gz` で終わっていなければ拡張子を付ける
pub fn checkpoint_path(path: &Path) -> PathBuf {
    if path.extension().and_then(|s| s.to_str()) == Some("gz") {
        path.to_path_buf()
    } else {
        path.with_extension("tar.gz")
    }
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, data)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// メタデータと重みをチェックポイントとして保存
///
/// # 戻り値
/// - 実際に書き込んだパス
pub fn save_checkpoint(path: &Path, metadata: &ModelMetadata, weights: &[u8]) -> Result<PathBuf> {
    let tar_gz_path = checkpoint_path(path);

    if let Some(parent) = tar_gz_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
    }

    let file = File::create(&tar_gz_path)
        .with_context(|| format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));

    append_entry(&mut builder, METADATA_ENTRY, metadata.to_json_string()?.as_bytes())?;
    append_entry(&mut builder, MODEL_ENTRY, weights)?;

    builder
        .into_inner()
        .context("Failed to finalize tar.gz archive")?
        .finish()
        .context("Failed to finish gzip stream")?;

    Ok(tar_gz_path)
}

/// 指定したエントリだけを読み出す（すべて揃った時点で打ち切る）
fn read_entries(path: &Path, wanted: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
    let file = File::open(path).with_context(|| format!("Failed to open tar.gz file: {:?}", path))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    let mut found: Vec<Option<Vec<u8>>> = vec![None; wanted.len()];

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();

        if let Some(index) = wanted.iter().position(|w| *w == name) {
            let mut buffer = Vec::new();
            entry.read_to_end(&mut buffer)?;
            found[index] = Some(buffer);
        }
        if found.iter().all(Option::is_some) {
            break;
        }
    }

    Ok(found)
}

fn parse_metadata(bytes: Vec<u8>) -> Result<ModelMetadata> {
    let json = String::from_utf8(bytes).context("metadata.json is not valid UTF-8")?;
    ModelMetadata::from_json_string(&json)
}

/// チェックポイントからメタデータだけを読み込む
pub fn load_checkpoint_metadata(path: &Path) -> Result<ModelMetadata> {
    let mut entries = read_entries(path, &[METADATA_ENTRY])?;
    let bytes = entries
        .remove(0)
        .ok_or_else(|| anyhow::anyhow!("metadata.json not found in tar.gz archive"))?;
    parse_metadata(bytes)
}

/// メタデータと重みを共に読み込む
pub fn load_checkpoint(path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let mut entries = read_entries(path, &[METADATA_ENTRY, MODEL_ENTRY])?.into_iter();

    match (entries.next().flatten(), entries.next().flatten()) {
        (Some(metadata), Some(weights)) => Ok((parse_metadata(metadata)?, weights)),
        (None, _) => Err(anyhow::anyhow!("metadata.json not found in tar.gz archive")),
        (_, None) => Err(anyhow::anyhow!("model.bin not found in tar.gz archive")),
    }
}

/// メタデータをログに出力
pub fn print_metadata_info(metadata: &ModelMetadata) {
    tracing::info!("=== チェックポイント ===");
    tracing::info!("バックボーン: {}", metadata.encoder);
    tracing::info!(
        "出力: {} ({})",
        metadata.num_outputs,
        if metadata.binary { "二値" } else { "多クラス" }
    );
    tracing::info!("入力サイズ: {}x{}", metadata.image_size, metadata.image_size);
    tracing::info!("パラメータ数: {}", metadata.num_params);
    tracing::info!("実験: {} / データセット: {}", metadata.experiment, metadata.dataset);
    tracing::info!("シード: {}", metadata.seed);
    tracing::info!("保存日時: {}", metadata.saved_at);
}
