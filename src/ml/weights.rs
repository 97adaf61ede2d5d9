//! 事前学習済みバックボーン重みの置き場所

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::backend::Backend,
};

use crate::ml::error::ModelError;

/// 重みディレクトリを指定する環境変数
pub const WEIGHTS_DIR_ENV: &str = "CALIBRATION_WEIGHTS_DIR";

/// 環境変数がない場合の重みディレクトリ
pub const DEFAULT_WEIGHTS_DIR: &str = "weights";

const WEIGHTS_EXTENSION: &str = "mpk";

type WeightsRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// バックボーン名 → `{root}/{name}.mpk` の重みファイル
///
/// ファイルの取得（ダウンロードや変換）はこのクレートの外で行います。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightStore {
    root: PathBuf,
}

impl WeightStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// `CALIBRATION_WEIGHTS_DIR` または `weights/`
    pub fn from_env() -> Self {
        let root = std::env::var_os(WEIGHTS_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WEIGHTS_DIR));
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 重みファイルのパス（拡張子付き）
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, WEIGHTS_EXTENSION))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    /// 保存済みの重みをモジュールに読み込む
    pub fn load<B: Backend, M: Module<B>>(
        &self,
        module: M,
        name: &str,
        device: &B::Device,
    ) -> Result<M, ModelError> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Err(ModelError::MissingWeights {
                name: name.to_string(),
                path,
            });
        }

        // 拡張子はレコーダー側で付与される
        module
            .load_file(self.root.join(name), &WeightsRecorder::new(), device)
            .map_err(|e| ModelError::Record {
                name: name.to_string(),
                message: format!("{:?}", e),
            })
    }

    /// モジュールの重みを保存する
    pub fn save<B: Backend, M: Module<B>>(&self, module: M, name: &str) -> Result<PathBuf, ModelError> {
        std::fs::create_dir_all(&self.root)?;
        module
            .save_file(self.root.join(name), &WeightsRecorder::new())
            .map_err(|e| ModelError::Record {
                name: name.to_string(),
                message: format!("{:?}", e),
            })?;
        Ok(self.path_for(name))
    }
}

impl Default for WeightStore {
    fn default() -> Self {
        Self::from_env()
    }
}
