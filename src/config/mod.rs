//! 実験設定（INIファイル + コマンドライン引数）

pub mod error;
pub mod layers;
pub mod loader;
pub mod options;
pub mod settings;

pub use error::ConfigError;
pub use layers::{LayeredSettings, Resolved, SettingLayer};
pub use loader::{
    build_command, config_path_from_args, load_configurations, load_configurations_from,
    DEFAULT_CONFIG_FILE,
};
pub use options::{OptionSpec, ValueKind, OPTIONS};
pub use settings::{format_arguments, print_arguments, str_to_bool, Settings};
