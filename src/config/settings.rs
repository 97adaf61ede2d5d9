//! 実験設定

use std::path::PathBuf;

use crate::ml::EncoderKind;

/// 文字列を真偽値に変換
///
/// 大文字小文字を区別せず "true" / "false" のみ受け付けます。
pub fn str_to_bool(value: &str) -> Result<bool, String> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(format!("expected \"true\" or \"false\", got {:?}", value))
    }
}

/// 設定ファイルとコマンドライン引数をマージした実験設定
///
/// 生成後は変更しません。
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// 読み込んだ設定ファイル
    pub config_file: PathBuf,
    /// 実験名
    pub experiment: String,
    /// 実行するタスク（"train" / "test"）
    pub task: String,
    /// 乱数シード
    pub seed: u64,
    /// ターミナルにログを出すか
    pub verbose: bool,
    /// ログファイルの保存先
    pub log_dir: PathBuf,
    /// データセット名
    pub dataset: String,
    /// GPUを使うか
    pub use_gpu: bool,
    /// 警告を表示するか
    pub warning: bool,
    /// 分類器のバックボーン
    pub encoder: EncoderKind,
    /// 事前学習済み重みを使うか
    pub pretrained: bool,
    /// 二値分類か
    pub binary: bool,
    /// モデル入力サイズ
    pub image_size: usize,
}

impl Settings {
    /// (項目名, 表示値) の一覧（登録順）
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("config_file", self.config_file.display().to_string()),
            ("experiment", self.experiment.clone()),
            ("task", self.task.clone()),
            ("seed", self.seed.to_string()),
            ("verbose", self.verbose.to_string()),
            ("log_dir", self.log_dir.display().to_string()),
            ("dataset", self.dataset.clone()),
            ("use_gpu", self.use_gpu.to_string()),
            ("warning", self.warning.to_string()),
            ("encoder", self.encoder.to_string()),
            ("pretrained", self.pretrained.to_string()),
            ("binary", self.binary.to_string()),
            ("image_size", self.image_size.to_string()),
        ]
    }

    /// 実験のチェックポイント `{log_dir}/{experiment}.tar.gz`
    pub fn checkpoint_path(&self) -> PathBuf {
        self.log_dir.join(format!("{}.tar.gz", self.experiment))
    }

    /// ログファイル名 `{experiment}.log`
    pub fn log_file_name(&self) -> String {
        format!("{}.log", self.experiment)
    }
}

/// 1項目1行の表示
pub fn format_arguments(settings: &Settings) -> Vec<String> {
    settings
        .entries()
        .into_iter()
        .map(|(name, value)| format!("{: <24}: {}", name, value))
        .collect()
}

/// すべての設定をログに出力し、最後に空行を入れる
pub fn print_arguments(settings: &Settings) {
    for line in format_arguments(settings) {
        tracing::info!("{}", line);
    }
    tracing::info!("");
}
