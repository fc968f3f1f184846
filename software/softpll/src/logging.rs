//! Terminal and per-session file logging.
//!
//! The terminal shows lock and mode changes at `info`. The session file
//! additionally keeps the sequencer's state transitions, which are logged
//! at `debug` and are the first thing to look at after a delock.

use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
    time::SystemTime,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

type FileLayer = fmt::Layer<
    Registry,
    fmt::format::DefaultFields,
    fmt::format::Format<fmt::format::Full, fmt::time::ChronoUtc>,
    NonBlocking,
>;

/// Process-wide subscriber state, set by the first [`init_logging`].
static LOGGING_GUARDS: OnceLock<LoggingGuards> = OnceLock::new();

/// Where and how much to log
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Session files go to `<dir>/logs/`
    pub dir: PathBuf,
    /// Terminal filter directives. `RUST_LOG` takes precedence.
    pub terminal_filter: String,
    /// Session file filter directives
    pub file_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            terminal_filter: "info".to_owned(),
            file_filter: "info,softpll::controller=debug".to_owned(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), String> {
        for (name, directives) in [
            ("terminal_filter", &self.terminal_filter),
            ("file_filter", &self.file_filter),
        ] {
            EnvFilter::try_new(directives)
                .map_err(|e| format!("logging.{name} {directives:?} is invalid: {e}"))?;
        }
        Ok(())
    }

    fn terminal_env_filter(&self) -> Result<EnvFilter, String> {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.terminal_filter))
            .map_err(|e| format!("Failed to set up terminal log filter: {e}"))
    }

    fn file_env_filter(&self) -> Result<EnvFilter, String> {
        EnvFilter::try_new(&self.file_filter)
            .map_err(|e| format!("Failed to set up file log filter: {e}"))
    }
}

/// Writer thread handles. Buffered lines are flushed when a guard drops,
/// so these are held for the rest of the process.
pub struct LoggingGuards {
    _stdout: Mutex<WorkerGuard>,
    file: Mutex<WorkerGuard>,

    /// Swaps the session file without touching the filters
    file_reload: reload::Handle<FileLayer, Registry>,
}

impl LoggingGuards {
    fn new(
        stdout: WorkerGuard,
        file: WorkerGuard,
        file_reload: reload::Handle<FileLayer, Registry>,
    ) -> Self {
        Self {
            _stdout: Mutex::new(stdout),
            file: Mutex::new(file),
            file_reload,
        }
    }

    /// Start writing to `logfile`. The previous file's guard is dropped
    /// only after the layer has been swapped, so no line is lost.
    fn switch_session_file(&self, logfile: File) -> Result<(), String> {
        let (file_writer, file_guard) = tracing_appender::non_blocking(logfile);
        let file_layer = session_file_layer(file_writer);

        let mut guard = self
            .file
            .lock()
            .map_err(|_| "Session log guard lock poisoned".to_string())?;

        self.file_reload
            .modify(|layer| *layer = file_layer)
            .map_err(|e| format!("Failed to switch session log file: {e}"))?;

        *guard = file_guard;
        Ok(())
    }
}

/// Plain-text layer for the session file. Thread names are kept since the
/// event handler usually runs on its own runner thread.
fn session_file_layer(file_writer: NonBlocking) -> FileLayer {
    fmt::layer::<Registry>()
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_writer(file_writer)
        .with_thread_names(true)
        .with_ansi(false)
}

fn open_session_file(log_dir: &Path, session: &str) -> Result<(PathBuf, File), String> {
    fs::create_dir_all(log_dir).map_err(|e| format!("Failed to create log directory: {e}"))?;
    let log_path = log_dir.join(format!("{session}.log"));
    let logfile = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to open session log {}: {e}", log_path.display()))?;
    Ok((log_path, logfile))
}

/// Session name from the current UTC time, usable as a file name on any platform
pub fn default_session_name() -> String {
    DateTime::<Utc>::from(SystemTime::now())
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        .replace(':', "")
}

/// Log to the terminal and to `<cfg.dir>/logs/<session>.log`.
///
/// Only the first call installs the subscriber and its filters. Later calls
/// move file output to the new session's file.
pub fn init_logging(
    cfg: &LoggingConfig,
    session: &str,
) -> Result<(PathBuf, &'static LoggingGuards), String> {
    let (log_path, logfile) = open_session_file(&cfg.dir.join("logs"), session)?;

    if let Some(guards) = LOGGING_GUARDS.get() {
        guards.switch_session_file(logfile)?;
        return Ok((log_path, guards));
    }

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let (file_writer, file_guard) = tracing_appender::non_blocking(logfile);

    let (file_layer, file_reload) =
        reload::Layer::<FileLayer, Registry>::new(session_file_layer(file_writer));

    // Each output filters on its own, so the file can be more verbose
    let stdout_layer = fmt::layer()
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_writer(stdout_writer)
        .with_target(false)
        .with_filter(cfg.terminal_env_filter()?);

    tracing_subscriber::registry()
        .with(file_layer.with_filter(cfg.file_env_filter()?))
        .with(stdout_layer)
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {e}"))?;

    let guards =
        LOGGING_GUARDS.get_or_init(|| LoggingGuards::new(stdout_guard, file_guard, file_reload));

    Ok((log_path, guards))
}
