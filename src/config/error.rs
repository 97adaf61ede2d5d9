use std::path::PathBuf;
use thiserror::Error;

/// 設定読み込みのエラー（起動時に致命的）
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 設定ファイルが存在しない・読めない・INIとして不正
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("config file has no [{section}] section")]
    MissingSection { section: String },

    #[error("config file has no '{key}' key in [{section}]")]
    MissingKey { section: String, key: String },

    /// 値を宣言された型に変換できない
    #[error("invalid value {value:?} for --{option}: {reason}")]
    InvalidValue {
        option: String,
        value: String,
        reason: String,
    },

    /// コマンドライン解析の失敗（`--help` 表示も含む）
    #[error(transparent)]
    Cli(#[from] clap::Error),
}
