//! Tracing setup for the chat server.
//!
//! Every streamed reply runs inside a `chat_session` span. Its close event
//! carries the session id and how long the reply took, so one line per session
//! is enough to follow traffic at `info`.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, Layer, Registry};

static INIT: OnceCell<()> = OnceCell::new();

type OutputLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Where log events are written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogOutput {
    /// Compact human-readable lines on stdout.
    Console,
    /// One JSON object per event, appended to `dir/file_name`.
    JsonFile { dir: PathBuf, file_name: String },
}

impl LogOutput {
    fn json_file(path: &Path) -> Self {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("chatline-server.jsonl")
            .to_string();
        LogOutput::JsonFile { dir, file_name }
    }
}

/// Logging settings resolved from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    /// `EnvFilter` directives.
    pub filter: String,
    pub output: LogOutput,
}

impl LogSettings {
    pub fn from_env(default_level: &str) -> Self {
        Self::from_lookup(default_level, |key| std::env::var(key).ok())
    }

    /// Reads `CHATLINE_OBSERVABILITY_ENABLED`, `CHATLINE_LOG_LEVEL`,
    /// `RUST_LOG` and `CHATLINE_JSON_LOG_PATH`. The first filter that parses
    /// wins, falling back to `default_level`.
    pub fn from_lookup<F>(default_level: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let enabled = !matches!(
            get("CHATLINE_OBSERVABILITY_ENABLED")
                .map(|value| value.to_ascii_lowercase())
                .as_deref(),
            Some("0" | "false" | "no" | "off" | "disabled")
        );
        let filter = ["CHATLINE_LOG_LEVEL", "RUST_LOG"]
            .into_iter()
            .filter_map(|key| get(key))
            .find(|directives| EnvFilter::try_new(directives).is_ok())
            .unwrap_or_else(|| default_level.to_string());
        let output = match get("CHATLINE_JSON_LOG_PATH") {
            Some(path) => LogOutput::json_file(Path::new(&path)),
            None => LogOutput::Console,
        };

        Self {
            enabled,
            filter,
            output,
        }
    }

    fn layer(&self) -> OutputLayer {
        match &self.output {
            LogOutput::Console => tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_span_events(FmtSpan::CLOSE)
                .boxed(),
            LogOutput::JsonFile { dir, file_name } => {
                let _ = std::fs::create_dir_all(dir);
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_writer(tracing_appender::rolling::never(dir, file_name))
                    .boxed()
            }
        }
    }
}

/// Installs the process-wide subscriber from the environment. Later calls are
/// no-ops.
pub fn init_observability(default_level: &str) {
    init_with(LogSettings::from_env(default_level));
}

pub fn init_with(settings: LogSettings) {
    INIT.get_or_init(|| {
        if !settings.enabled {
            return;
        }
        let _ = tracing_subscriber::registry()
            .with(settings.layer())
            .with(EnvFilter::new(&settings.filter))
            .try_init();
    });
}
