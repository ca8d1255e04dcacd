//! Tracing setup and runtime log-level reloading.
//!
//! The filter sits behind a [`reload`] layer. [`LogReloadHandle`] swaps it at
//! runtime, and [`watch_log_config`] does so whenever a YAML logging config
//! file changes:
//!
//! ```yaml
//! level: debug
//! directives:
//!   - reqwest=info
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, reload};
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_LEVEL: &str = "info";
const DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to read log config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse log config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid log filter: {0}")]
    Filter(String),
    #[error("failed to reload log filter: {0}")]
    Reload(#[from] reload::Error),
    #[error("failed to watch log config: {0}")]
    Watch(#[from] notify::Error),
}

/// Filter for the given base level. Dependencies stay at `warn` unless the
/// base level is quieter.
fn base_filter(level: &str) -> String {
    format!("warn,curator={level}")
}

/// Logging config file contents.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogFileConfig {
    pub level: String,
    /// Extra `EnvFilter` directives, e.g. `reqwest=debug`.
    #[serde(default)]
    pub directives: Vec<String>,
}

impl LogFileConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, LoggingError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self, LoggingError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| LoggingError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn filter_string(&self) -> Result<String, LoggingError> {
        let level = self.level.trim().to_ascii_lowercase();
        LevelFilter::from_str(&level)
            .map_err(|_| LoggingError::Filter(format!("unknown level {:?}", self.level)))?;

        let mut filter = base_filter(&level);
        for directive in &self.directives {
            filter.push(',');
            filter.push_str(directive.trim());
        }
        Ok(filter)
    }

    pub fn to_filter(&self) -> Result<EnvFilter, LoggingError> {
        let filter = self.filter_string()?;
        EnvFilter::try_new(&filter).map_err(|e| LoggingError::Filter(e.to_string()))
    }
}

/// Replaces the active log filter.
#[derive(Clone)]
pub struct LogReloadHandle {
    inner: reload::Handle<EnvFilter, Registry>,
}

impl LogReloadHandle {
    pub fn new(inner: reload::Handle<EnvFilter, Registry>) -> Self {
        Self { inner }
    }

    pub fn apply(&self, config: &LogFileConfig) -> Result<(), LoggingError> {
        let filter = config.to_filter()?;
        self.inner.reload(filter)?;
        Ok(())
    }

    /// Active filter rendered as directives.
    pub fn current(&self) -> Option<String> {
        self.inner.with_current(|filter| filter.to_string()).ok()
    }
}

/// Initial filter: `RUST_LOG` wins, then `CURATOR_LOG` as a bare level,
/// then `info`.
fn initial_filter() -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    let level = match std::env::var("CURATOR_LOG").as_deref() {
        Ok("debug") => "debug",
        Ok("trace") => "trace",
        Ok("warn") | Ok("warning") => "warn",
        Ok("error") => "error",
        _ => DEFAULT_LEVEL,
    };
    EnvFilter::new(base_filter(level))
}

/// Install the global subscriber on stderr. `LOG_FORMAT=json` selects JSON
/// output. If a subscriber is already installed the returned handle is inert.
pub fn init_tracing() -> LogReloadHandle {
    let (filter, handle) = reload::Layer::new(initial_filter());
    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }

    LogReloadHandle::new(handle)
}

fn reload_from(path: &Path, handle: &LogReloadHandle) {
    match LogFileConfig::load(path).and_then(|config| handle.apply(&config)) {
        Ok(()) => tracing::info!(
            path = %path.display(),
            filter = %handle.current().unwrap_or_default(),
            "Log config applied"
        ),
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "Ignoring log config, keeping previous filter"
        ),
    }
}

/// Apply `path` now, then re-apply it whenever it changes until `cancel`
/// fires. Changes are debounced; a malformed file is logged and skipped.
///
/// The parent directory is watched so editors that replace the file on save
/// are picked up.
pub fn watch_log_config(
    path: impl Into<PathBuf>,
    handle: LogReloadHandle,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, LoggingError> {
    let path = path.into();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path.file_name().map(|name| name.to_os_string());

    let (event_tx, mut event_rx) = mpsc::channel::<Event>(100);
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                // A full channel means a reload is due anyway.
                let _ = event_tx.try_send(event);
            }
        },
        notify::Config::default(),
    )?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::debug!(path = %path.display(), "Watching log config");

    reload_from(&path, &handle);

    Ok(tokio::spawn(async move {
        // Dropping the watcher stops event delivery.
        let _watcher = watcher;
        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Log config watcher stopped");
                    break;
                }
                event = event_rx.recv() => {
                    let Some(event) = event else { break };
                    let relevant = matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_)
                    ) && event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == file_name.as_deref());
                    if relevant {
                        deadline = Some(tokio::time::Instant::now() + DEBOUNCE);
                    }
                }
                _ = async {
                    match deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                }, if deadline.is_some() => {
                    deadline = None;
                    reload_from(&path, &handle);
                }
            }
        }
    }))
}
