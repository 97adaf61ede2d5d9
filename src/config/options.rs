//! 認識する設定項目の一覧
//!
//! 各項目はコマンドラインフラグ名・INIのセクション/キー・値の型を持ちます。
//! 既定値のある項目は設定ファイルになくても解決できます。

/// 値の型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Integer,
    Boolean,
    Path,
    Encoder,
}

impl ValueKind {
    /// `--help` に表示する値名
    pub fn value_name(self) -> &'static str {
        match self {
            ValueKind::Text => "STRING",
            ValueKind::Integer => "INTEGER",
            ValueKind::Boolean => "BOOLEAN",
            ValueKind::Path => "PATH",
            ValueKind::Encoder => "ENCODER",
        }
    }
}

/// 設定項目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    /// コマンドラインフラグ名（`--name`）
    pub name: &'static str,
    /// INIのセクション
    pub section: &'static str,
    /// INIのキー
    pub key: &'static str,
    pub kind: ValueKind,
    pub help: &'static str,
    /// 組み込みの既定値（必須項目は `None`）
    pub default: Option<&'static str>,
    /// 設定ファイル側の値を小文字にする
    pub lowercase_file_value: bool,
}

impl OptionSpec {
    const fn required(
        name: &'static str,
        section: &'static str,
        kind: ValueKind,
        help: &'static str,
    ) -> Self {
        Self {
            name,
            section,
            key: name,
            kind,
            help,
            default: None,
            lowercase_file_value: false,
        }
    }

    const fn optional(
        name: &'static str,
        section: &'static str,
        kind: ValueKind,
        help: &'static str,
        default: &'static str,
    ) -> Self {
        Self {
            default: Some(default),
            ..Self::required(name, section, kind, help)
        }
    }

    const fn lowercased(self) -> Self {
        Self {
            lowercase_file_value: true,
            ..self
        }
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }

    pub fn find(name: &str) -> Option<&'static OptionSpec> {
        OPTIONS.iter().find(|spec| spec.name == name)
    }
}

// Standard
pub const EXPERIMENT: OptionSpec = OptionSpec::required(
    "experiment",
    "standard",
    ValueKind::Text,
    "String - The name of the current experiment.",
);
pub const TASK: OptionSpec = OptionSpec::required(
    "task",
    "standard",
    ValueKind::Text,
    "String - The task to be run, either \"train\" or \"test\".",
);
pub const SEED: OptionSpec = OptionSpec::required(
    "seed",
    "standard",
    ValueKind::Integer,
    "Integer - Seed used to generate random numbers.",
);

// Logging
pub const VERBOSE: OptionSpec = OptionSpec::required(
    "verbose",
    "logging",
    ValueKind::Boolean,
    "Boolean - Should outputs be printed on the terminal.",
);
pub const LOG_DIR: OptionSpec = OptionSpec::required(
    "log_dir",
    "logging",
    ValueKind::Path,
    "String - Directory path for where log files are stored.",
);

// Dataset
pub const DATASET: OptionSpec = OptionSpec::required(
    "dataset",
    "dataset",
    ValueKind::Text,
    "String - Dataset to be used.",
)
.lowercased();

// Performance
pub const USE_GPU: OptionSpec = OptionSpec::required(
    "use_gpu",
    "performance",
    ValueKind::Boolean,
    "Boolean - Should training and testing use GPU acceleration.",
);

// Debug
pub const WARNING: OptionSpec = OptionSpec::required(
    "warning",
    "debug",
    ValueKind::Boolean,
    "Boolean - Should warnings be shown during the running of the application.",
);

// Model
pub const ENCODER: OptionSpec = OptionSpec::optional(
    "encoder",
    "model",
    ValueKind::Encoder,
    "String - Backbone of the classifier, \"efficientnet-b{0..8}\" or \"resnet{18,34,50,101,152}\".",
    "efficientnet-b0",
);
pub const PRETRAINED: OptionSpec = OptionSpec::optional(
    "pretrained",
    "model",
    ValueKind::Boolean,
    "Boolean - Should the backbone start from pretrained weights.",
    "true",
);
pub const BINARY: OptionSpec = OptionSpec::optional(
    "binary",
    "model",
    ValueKind::Boolean,
    "Boolean - Binary (1 logit) instead of multiclass (7 logits) classification.",
    "false",
);
pub const IMAGE_SIZE: OptionSpec = OptionSpec::optional(
    "image_size",
    "model",
    ValueKind::Integer,
    "Integer - Height and width of the model input images.",
    "224",
);

/// 登録順（`print_arguments` の表示順でもある）
pub const OPTIONS: &[OptionSpec] = &[
    EXPERIMENT, TASK, SEED, VERBOSE, LOG_DIR, DATASET, USE_GPU, WARNING, ENCODER, PRETRAINED,
    BINARY, IMAGE_SIZE,
];
