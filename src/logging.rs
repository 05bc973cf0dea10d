use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use std::path::Path;
use std::str::FromStr;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Initialize logging system based on configuration.
///
/// Console output always goes to stderr. When a log file is configured a
/// second layer writes to it through a non-blocking appender; the returned
/// guard must be held for as long as logs should be flushed.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if let Some(log_file) = &config.file {
        let (writer, file_guard) = file_writer(log_file, config.rotation)?;
        guard = Some(file_guard);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339());
        layers.push(if config.json {
            file_layer
                .json()
                .with_filter(build_filter(&config.level))
                .boxed()
        } else {
            file_layer.with_filter(build_filter(&config.level)).boxed()
        });
    }

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_timer(ChronoUtc::rfc_3339());
    // JSON on the console only when there is no file to carry it
    layers.push(if config.json && config.file.is_none() {
        console_layer
            .json()
            .with_filter(build_filter(&config.level))
            .boxed()
    } else {
        console_layer.with_filter(build_filter(&config.level)).boxed()
    });

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

/// RUST_LOG wins over the configured level; bad input falls back to `info`.
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::from_str(level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

fn file_writer(log_file: &str, rotation: bool) -> Result<(NonBlocking, WorkerGuard)> {
    let path = Path::new(log_file);
    if rotation {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("sni-proxy.log");
        Ok(tracing_appender::non_blocking(
            tracing_appender::rolling::daily(dir, name),
        ))
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", log_file))?;
        Ok(tracing_appender::non_blocking(file))
    }
}
