use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

use crate::error::{Error, Result};
use crate::notify::{NoticeLayer, NoticeQueue};

pub const FILTER_ENV: &str = "IMDL_LOG";
pub const FORMAT_ENV: &str = "IMDL_LOG_FORMAT";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

#[derive(Debug, Clone)]
pub enum LogSink {
    Stderr,
    File(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

fn default_filter() -> &'static str {
    if cfg!(debug_assertions) { "debug" } else { "info" }
}

pub fn init(sink: LogSink, notices: Option<Arc<NoticeQueue>>) -> Result<()> {
    let filter = EnvFilter::try_from_env(FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_filter()));
    let format = match std::env::var(FORMAT_ENV).ok().as_deref() {
        Some("json") => LogFormat::Json,
        _ => LogFormat::Text,
    };

    let notice_layer = notices
        .map(|q| NoticeLayer::new(q).with_target_prefix(env!("CARGO_CRATE_NAME")));

    tracing_subscriber::registry()
        .with(fmt_layer(&sink, format)?)
        .with(notice_layer)
        .with(filter)
        .try_init()
        .map_err(|e| Error::msg(format!("failed to install log subscriber: {e}")))
}

fn fmt_layer(sink: &LogSink, format: LogFormat) -> Result<BoxedLayer> {
    let layer = fmt::layer().with_target(false);
    Ok(match sink {
        LogSink::Stderr => match format {
            LogFormat::Text => layer.with_writer(std::io::stderr).boxed(),
            LogFormat::Json => layer.json().with_writer(std::io::stderr).boxed(),
        },
        LogSink::File(path) => {
            if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir).map_err(|e| {
                    Error::Io(format!("failed to create log dir {}: {e}", dir.display()))
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| Error::Io(format!("failed to open log {}: {e}", path.display())))?;
            let layer = layer.with_ansi(false).with_writer(Mutex::new(file));
            match format {
                LogFormat::Text => layer.boxed(),
                LogFormat::Json => layer.json().boxed(),
            }
        }
    })
}
