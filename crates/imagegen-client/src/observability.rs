use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const ENV_ENABLED: &str = "IMAGEGEN_OBSERVABILITY_ENABLED";
const ENV_LOG_LEVEL: &str = "IMAGEGEN_LOG_LEVEL";
const ENV_JSON_LOG_PATH: &str = "IMAGEGEN_JSON_LOG_PATH";
const DEFAULT_LOG_FILE: &str = "imagegen.logs.jsonl";

/// Where log records go.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LogSink {
    /// Compact human-readable lines on stderr; stdout is kept for command output.
    Stderr,
    /// JSON lines appended to `dir/file_name`.
    JsonFile { dir: PathBuf, file_name: String },
}

/// Logging settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogSettings {
    enabled: bool,
    /// Explicit filter directive; `None` defers to `RUST_LOG`, then `info`.
    filter: Option<String>,
    sink: LogSink,
}

impl LogSettings {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup(ENV_ENABLED)
            .and_then(|value| parse_bool_env(&value))
            .unwrap_or(true);
        let filter = lookup(ENV_LOG_LEVEL)
            .map(|level| level.trim().to_string())
            .filter(|level| !level.is_empty());
        let sink = lookup(ENV_JSON_LOG_PATH)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map_or(LogSink::Stderr, |raw| json_sink(Path::new(&raw)));
        Self {
            enabled,
            filter,
            sink,
        }
    }

    fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        if let Some(level) = &self.filter
            && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
        {
            return filter;
        }
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    }
}

fn json_sink(path: &Path) -> LogSink {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    LogSink::JsonFile { dir, file_name }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Install the global `tracing` subscriber once per process.
///
/// Environment variables:
/// - `IMAGEGEN_OBSERVABILITY_ENABLED`: enable/disable flag (default enabled).
/// - `IMAGEGEN_LOG_LEVEL`: filter directive (`info`, `imagegen_client=debug`, ...).
/// - `RUST_LOG`: used when `IMAGEGEN_LOG_LEVEL` is unset or invalid.
/// - `IMAGEGEN_JSON_LOG_PATH`: write JSONL to this file instead of stderr.
///
/// Streams log under the `stream.*` events with a `stream_id` field, REST
/// calls under `images.*`.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let settings = LogSettings::from_lookup(|key| std::env::var(key).ok());
        if !settings.enabled {
            return;
        }
        let registry = tracing_subscriber::registry().with(settings.env_filter());
        let _ = match settings.sink {
            LogSink::Stderr => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_target(false)
                        .with_writer(std::io::stderr),
                )
                .try_init(),
            LogSink::JsonFile { dir, file_name } => {
                let _ = std::fs::create_dir_all(&dir);
                registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_current_span(true)
                            .with_span_list(true)
                            .with_target(false)
                            .with_writer(tracing_appender::rolling::never(dir, file_name)),
                    )
                    .try_init()
            }
        };
    });
}
