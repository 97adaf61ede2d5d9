//! ログ初期化
//!
//! ログは常に `{log_dir}/{experiment}.log` に書き出し、`verbose` のときだけ
//! 標準出力にも表示します。

use std::fs;
use std::panic;

use anyhow::{Context, Result};
use tracing::{error, info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::filter_fn, fmt, prelude::*, EnvFilter};

use crate::config::Settings;

/// `RUST_LOG` がないときのフィルタ
pub const DEFAULT_FILTER: &str = "info,wgpu_core=warn,wgpu_hal=warn,naga=warn";

/// WARN は `warning` が有効なときだけ残す
fn keep_level(level: &Level, warning: bool) -> bool {
    warning || *level != Level::WARN
}

/// ロガーを初期化する
///
/// 戻り値のガードを保持している間だけファイルへの書き込みが行われます。
pub fn init_logging(settings: &Settings) -> Result<WorkerGuard> {
    fs::create_dir_all(&settings.log_dir).with_context(|| {
        format!(
            "Failed to create log directory: {}",
            settings.log_dir.display()
        )
    })?;

    let file_appender = tracing_appender::rolling::never(&settings.log_dir, settings.log_file_name());
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let warning = settings.warning;
    let stdout_layer = settings
        .verbose
        .then(|| fmt::layer().with_writer(std::io::stdout));

    tracing_subscriber::registry()
        .with(filter)
        .with(filter_fn(move |metadata| keep_level(metadata.level(), warning)))
        .with(stdout_layer)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()
        .context("Failed to install the global subscriber")?;

    setup_panic_hook();

    info!(
        "Logging initialized. Logs are stored in: {}",
        settings.log_dir.join(settings.log_file_name()).display()
    );
    Ok(guard)
}

fn setup_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "no message"
        };

        error!("PANIC at {}: {}", location, message);
        eprintln!("PANIC at {}: {}", location, message);
    }));
}
