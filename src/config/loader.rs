//! 設定ファイルとコマンドライン引数の読み込み
//!
//! 1. 最初の引数が `--config_file` ならその次を設定ファイルのパスとし、
//!    そうでなければ `config.ini` を使う
//! 2. INIファイルを読み、各項目をファイルレイヤーに入れる
//! 3. コマンドラインで明示された値だけをコマンドラインレイヤーに入れる
//! 4. 既定値 < ファイル < コマンドライン の順で解決する

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command};
use ini::{Ini, ParseOption};

use crate::config::error::ConfigError;
use crate::config::layers::{LayeredSettings, SettingLayer};
use crate::config::options::{self, OptionSpec, OPTIONS};
use crate::config::settings::{str_to_bool, Settings};
use crate::ml::EncoderKind;

/// 既定の設定ファイル
pub const DEFAULT_CONFIG_FILE: &str = "config.ini";

/// 設定ファイルを指定するフラグ
pub const CONFIG_FILE_FLAG: &str = "config_file";

/// プロセスの引数から設定を読み込む
///
/// `description` は `--help` で表示される説明です。
pub fn load_configurations(description: &str) -> Result<Settings, ConfigError> {
    load_configurations_from(description, std::env::args())
}

/// 与えた引数（先頭はプログラム名）から設定を読み込む
pub fn load_configurations_from<I, T>(description: &str, args: I) -> Result<Settings, ConfigError>
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    let matches = build_command(description).try_get_matches_from(args.iter())?;

    let config_file = config_path_from_args(&args);
    let file = ConfigFile::load(&config_file)?;

    let layers = LayeredSettings::new()
        .with_layer(defaults_layer())
        .with_layer(file.layer.clone())
        .with_layer(command_line_layer(&matches));

    let resolver = Resolver {
        layers: &layers,
        sections: &file.sections,
    };
    resolver.settings(config_file)
}

/// 設定ファイルのパスを決める
///
/// `--config_file` は最初の引数として与えた場合のみ有効です。
pub fn config_path_from_args<S: AsRef<str>>(args: &[S]) -> PathBuf {
    let flag = format!("--{}", CONFIG_FILE_FLAG);
    match (args.get(1), args.get(2)) {
        (Some(first), Some(path)) if first.as_ref() == flag => PathBuf::from(path.as_ref()),
        _ => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

/// すべての項目をフラグとして登録したコマンド
pub fn build_command(description: &str) -> Command {
    let command = Command::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .about(description.to_string())
        .arg(
            Arg::new(CONFIG_FILE_FLAG)
                .long(CONFIG_FILE_FLAG)
                .value_name("PATH")
                .default_value(DEFAULT_CONFIG_FILE)
                .help("String - File path to the config file."),
        );

    OPTIONS.iter().fold(command, |command, spec| {
        command.arg(
            Arg::new(spec.name)
                .long(spec.name)
                .value_name(spec.kind.value_name())
                .help(spec.help)
                .action(ArgAction::Set),
        )
    })
}

fn defaults_layer() -> SettingLayer {
    OPTIONS
        .iter()
        .filter_map(|spec| spec.default.map(|value| (spec.name, value)))
        .fold(SettingLayer::new("defaults"), |layer, (name, value)| {
            layer.with_value(name, value)
        })
}

/// コマンドラインで明示された値だけを集める
fn command_line_layer(matches: &ArgMatches) -> SettingLayer {
    let mut layer = SettingLayer::new("command line");
    for spec in OPTIONS {
        if matches.value_source(spec.name) != Some(ValueSource::CommandLine) {
            continue;
        }
        if let Some(value) = matches.get_one::<String>(spec.name) {
            layer.insert(spec.name, value.clone());
        }
    }
    layer
}

/// 読み込んだ設定ファイル
#[derive(Debug, Clone)]
struct ConfigFile {
    layer: SettingLayer,
    sections: HashSet<String>,
}

impl ConfigFile {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        // 値はそのまま読む（`C:\logs` や `"name"` を書き換えない）
        let option = ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            ..ParseOption::default()
        };
        let ini = Ini::load_from_file_opt(path, option).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_ini(&ini))
    }

    fn from_ini(ini: &Ini) -> Self {
        let sections = ini.sections().flatten().map(str::to_string).collect();

        let mut layer = SettingLayer::new("file");
        for spec in OPTIONS {
            if let Some(raw) = lookup_key(ini, spec.section, spec.key) {
                let value = if spec.lowercase_file_value {
                    raw.to_lowercase()
                } else {
                    raw.to_string()
                };
                layer.insert(spec.name, value);
            }
        }

        Self { layer, sections }
    }
}

/// キーは大文字小文字を区別せずに探す（重複時は後の行が優先）
fn lookup_key<'a>(ini: &'a Ini, section: &str, key: &str) -> Option<&'a str> {
    ini.section(Some(section))?
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case(key))
        .last()
        .map(|(_, value)| value)
}

/// レイヤーから型付きの値を取り出す
struct Resolver<'a> {
    layers: &'a LayeredSettings,
    sections: &'a HashSet<String>,
}

impl Resolver<'_> {
    fn raw(&self, spec: &OptionSpec) -> Result<&str, ConfigError> {
        if let Some(value) = self.layers.get(spec.name) {
            return Ok(value);
        }
        if self.sections.contains(spec.section) {
            Err(ConfigError::MissingKey {
                section: spec.section.to_string(),
                key: spec.key.to_string(),
            })
        } else {
            Err(ConfigError::MissingSection {
                section: spec.section.to_string(),
            })
        }
    }

    fn invalid(spec: &OptionSpec, value: &str, reason: impl ToString) -> ConfigError {
        ConfigError::InvalidValue {
            option: spec.name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    fn text(&self, spec: &OptionSpec) -> Result<String, ConfigError> {
        self.raw(spec).map(str::to_string)
    }

    fn path(&self, spec: &OptionSpec) -> Result<PathBuf, ConfigError> {
        self.raw(spec).map(PathBuf::from)
    }

    fn parse<T>(&self, spec: &OptionSpec) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: ToString,
    {
        let value = self.raw(spec)?;
        value.trim().parse().map_err(|e| Self::invalid(spec, value, e))
    }

    fn positive(&self, spec: &OptionSpec) -> Result<usize, ConfigError> {
        match self.parse(spec)? {
            0 => Err(Self::invalid(spec, self.raw(spec)?, "must be at least 1")),
            value => Ok(value),
        }
    }

    fn boolean(&self, spec: &OptionSpec) -> Result<bool, ConfigError> {
        let value = self.raw(spec)?;
        str_to_bool(value).map_err(|e| Self::invalid(spec, value, e))
    }

    fn settings(&self, config_file: PathBuf) -> Result<Settings, ConfigError> {
        Ok(Settings {
            config_file,
            experiment: self.text(&options::EXPERIMENT)?,
            task: self.text(&options::TASK)?,
            seed: self.parse(&options::SEED)?,
            verbose: self.boolean(&options::VERBOSE)?,
            log_dir: self.path(&options::LOG_DIR)?,
            dataset: self.text(&options::DATASET)?,
            use_gpu: self.boolean(&options::USE_GPU)?,
            warning: self.boolean(&options::WARNING)?,
            encoder: self.parse::<EncoderKind>(&options::ENCODER)?,
            pretrained: self.boolean(&options::PRETRAINED)?,
            binary: self.boolean(&options::BINARY)?,
            image_size: self.positive(&options::IMAGE_SIZE)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CONFIG: &str = "\
[standard]
experiment = baseline
task = train
seed = 1111

[logging]
verbose = True
log_dir = logs/

[dataset]
dataset = ISIC

[performance]
use_gpu = false

[debug]
warning = FALSE
";

    fn write_config(contents: &str) -> (TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        fs::write(&path, contents).unwrap();
        let path = path.to_string_lossy().into_owned();
        (dir, path)
    }

    fn load(config: &str, extra: &[&str]) -> Result<Settings, ConfigError> {
        let (_dir, path) = write_config(config);
        let mut args = vec!["calibration", "--config_file", path.as_str()];
        args.extend_from_slice(extra);
        load_configurations_from("test", args)
    }

    #[test]
    fn test_file_values() {
        let settings = load(CONFIG, &[]).unwrap();
        assert_eq!(settings.experiment, "baseline");
        assert_eq!(settings.task, "train");
        assert_eq!(settings.seed, 1111);
        assert!(settings.verbose);
        assert_eq!(settings.log_dir, PathBuf::from("logs/"));
        assert!(!settings.use_gpu);
        assert!(!settings.warning);
        assert!(settings.config_file.ends_with("config.ini"));
    }

    #[test]
    fn test_dataset_from_file_is_lowercased() {
        assert_eq!(load(CONFIG, &[]).unwrap().dataset, "isic");
        // コマンドラインの値はそのまま
        assert_eq!(load(CONFIG, &["--dataset", "SD260"]).unwrap().dataset, "SD260");
    }

    #[test]
    fn test_command_line_overrides_file() {
        let settings = load(
            CONFIG,
            &[
                "--experiment",
                "override",
                "--task",
                "test",
                "--seed",
                "7",
                "--verbose",
                "false",
                "--log_dir",
                "/tmp/other",
                "--use_gpu",
                "TRUE",
                "--warning",
                "true",
            ],
        )
        .unwrap();
        assert_eq!(settings.experiment, "override");
        assert_eq!(settings.task, "test");
        assert_eq!(settings.seed, 7);
        assert!(!settings.verbose);
        assert_eq!(settings.log_dir, PathBuf::from("/tmp/other"));
        assert!(settings.use_gpu);
        assert!(settings.warning);
    }

    #[test]
    fn test_equals_syntax_overrides_file() {
        let settings = load(CONFIG, &["--seed=99"]).unwrap();
        assert_eq!(settings.seed, 99);
    }

    #[test]
    fn test_model_defaults_and_overrides() {
        let settings = load(CONFIG, &[]).unwrap();
        assert_eq!(settings.encoder, EncoderKind::EfficientNet(0));
        assert!(settings.pretrained);
        assert!(!settings.binary);
        assert_eq!(settings.image_size, 224);

        let config = format!("{}\n[model]\nencoder = resnet50\nbinary = true\n", CONFIG);
        let settings = load(&config, &["--pretrained", "false", "--image_size", "64"]).unwrap();
        assert_eq!(settings.encoder, EncoderKind::ResNet(50));
        assert!(settings.binary);
        assert!(!settings.pretrained);
        assert_eq!(settings.image_size, 64);
    }

    #[test]
    fn test_missing_seed_is_lookup_error() {
        let config = CONFIG.replace("seed = 1111\n", "");
        let err = load(&config, &[]).unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingKey { ref section, ref key } if section == "standard" && key == "seed"),
            "{err:?}"
        );
    }

    #[test]
    fn test_missing_seed_supplied_on_command_line() {
        let config = CONFIG.replace("seed = 1111\n", "");
        assert_eq!(load(&config, &["--seed", "5"]).unwrap().seed, 5);
    }

    #[test]
    fn test_missing_section() {
        let config = CONFIG.replace("[debug]\nwarning = FALSE\n", "");
        let err = load(&config, &[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection { ref section } if section == "debug"));
    }

    #[test]
    fn test_invalid_values() {
        let err = load(CONFIG, &["--seed", "abc"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref option, .. } if option == "seed"));

        let err = load(CONFIG, &["--use_gpu", "yes"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref option, ref value, .. } if option == "use_gpu" && value == "yes"));

        let config = CONFIG.replace("verbose = True", "verbose = maybe");
        let err = load(&config, &[]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref option, .. } if option == "verbose"));

        let err = load(CONFIG, &["--encoder", "vgg16"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref option, .. } if option == "encoder"));
    }

    #[test]
    fn test_file_values_are_read_literally() {
        let config = CONFIG
            .replace("log_dir = logs/", "log_dir = C:\\new_logs\\tmp")
            .replace("experiment = baseline", "experiment = \"base\"");
        let settings = load(&config, &[]).unwrap();
        assert_eq!(settings.log_dir, PathBuf::from("C:\\new_logs\\tmp"));
        assert_eq!(settings.experiment, "\"base\"");
    }

    #[test]
    fn test_file_keys_ignore_case() {
        let config = CONFIG
            .replace("seed = 1111", "Seed = 3")
            .replace("use_gpu = false", "USE_GPU = true");
        let settings = load(&config, &[]).unwrap();
        assert_eq!(settings.seed, 3);
        assert!(settings.use_gpu);
    }

    #[test]
    fn test_zero_image_size_is_rejected() {
        let err = load(CONFIG, &["--image_size", "0"]).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref option, ref value, .. } if option == "image_size" && value == "0"),
            "{err:?}"
        );

        let config = format!("{}\n[model]\nimage_size = 0\n", CONFIG);
        let err = load(&config, &[]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref option, .. } if option == "image_size"));
    }

    #[test]
    fn test_unknown_flag() {
        let err = load(CONFIG, &["--epochs", "3"]).unwrap_err();
        assert!(matches!(err, ConfigError::Cli(_)));
    }

    #[test]
    fn test_missing_config_file() {
        let args = [
            "calibration",
            "--config_file",
            "/nonexistent/calibration/config.ini",
        ];
        let err = load_configurations_from("test", args).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_config_path_from_args() {
        assert_eq!(
            config_path_from_args(&["prog", "--config_file", "other.ini"]),
            PathBuf::from("other.ini")
        );
        assert_eq!(config_path_from_args(&["prog"]), PathBuf::from(DEFAULT_CONFIG_FILE));
        // 先頭以外の --config_file は無視される
        assert_eq!(
            config_path_from_args(&["prog", "--seed", "1", "--config_file", "other.ini"]),
            PathBuf::from(DEFAULT_CONFIG_FILE)
        );
        assert_eq!(
            config_path_from_args(&["prog", "--config_file"]),
            PathBuf::from(DEFAULT_CONFIG_FILE)
        );
    }

    #[test]
    fn test_help_lists_every_option() {
        let help = build_command("Calibration experiments").render_help().to_string();
        assert!(help.contains("Calibration experiments"));
        assert!(help.contains("--config_file"));
        for spec in OPTIONS {
            assert!(help.contains(&format!("--{}", spec.name)), "{}", spec.name);
        }
    }
}
