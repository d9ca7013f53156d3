//! Terminal and file logging for control sessions.
//!
//! Each session logs to the terminal and to `<op_dir>/logs/<op_name>.log`.
//! The subscriber is installed once per process; starting another session
//! swaps the file target in place.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

type SessionFileLayer = fmt::Layer<
    Registry,
    fmt::format::DefaultFields,
    fmt::format::Format<fmt::format::Full, fmt::time::ChronoUtc>,
    NonBlocking,
>;

static SESSION_LOG: OnceLock<SessionLog> = OnceLock::new();

/// Where and how verbosely a session logs
#[derive(Clone, Debug)]
pub struct LogSettings {
    pub op_dir: PathBuf,
    pub op_name: String,

    /// Filter directive used when `RUST_LOG` is unset
    pub default_directive: String,
}

impl LogSettings {
    pub fn new(op_dir: &Path, op_name: &str) -> Self {
        Self {
            op_dir: op_dir.to_owned(),
            op_name: op_name.to_owned(),
            default_directive: "info".to_owned(),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.op_dir.join("logs").join(format!("{}.log", self.op_name))
    }

    fn open_log_file(&self) -> Result<(PathBuf, File), String> {
        let path = self.log_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create log directory {dir:?}: {e}"))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| format!("Failed to open log file {path:?}: {e}"))?;
        Ok((path, file))
    }
}

/// Writer threads of the installed subscriber.
/// Pending lines are flushed when a guard is dropped.
pub struct SessionLog {
    _terminal: Mutex<WorkerGuard>,
    file: Mutex<(PathBuf, WorkerGuard)>,
    file_reload: reload::Handle<SessionFileLayer, Registry>,
}

impl SessionLog {
    /// Path of the file currently receiving log lines
    pub fn current_path(&self) -> Result<PathBuf, String> {
        let file = self
            .file
            .lock()
            .map_err(|_| "Session log lock poisoned".to_string())?;
        Ok(file.0.clone())
    }

    fn switch_file(&self, path: PathBuf, logfile: File) -> Result<(), String> {
        let (writer, guard) = tracing_appender::non_blocking(logfile);
        let layer = file_layer(writer);

        let mut file = self
            .file
            .lock()
            .map_err(|_| "Session log lock poisoned".to_string())?;
        self.file_reload
            .reload(layer)
            .map_err(|e| format!("Failed to switch session log file: {e}"))?;

        // Dropping the old guard flushes the previous file
        *file = (path, guard);
        Ok(())
    }
}

fn file_layer(writer: NonBlocking) -> SessionFileLayer {
    fmt::layer::<Registry>()
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_writer(writer)
        .with_ansi(false)
}

/// Session name from the current UTC time, with the colons that
/// are invalid in Windows file names removed.
pub fn default_op_name() -> String {
    DateTime::<Utc>::from(SystemTime::now())
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        .replace(':', "")
}

/// Start logging a session, installing the global subscriber on first use.
pub fn start_session(settings: &LogSettings) -> Result<&'static SessionLog, String> {
    let (path, logfile) = settings.open_log_file()?;

    if let Some(log) = SESSION_LOG.get() {
        log.switch_file(path, logfile)?;
        return Ok(log);
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.default_directive))
        .map_err(|e| format!("Invalid log filter `{}`: {e}", settings.default_directive))?;

    let (terminal_writer, terminal_guard) = tracing_appender::non_blocking(std::io::stdout());
    let terminal = fmt::layer()
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_writer(terminal_writer)
        .with_target(false);

    let (file_writer, file_guard) = tracing_appender::non_blocking(logfile);
    let (file, file_reload) =
        reload::Layer::<SessionFileLayer, Registry>::new(file_layer(file_writer));

    tracing_subscriber::registry()
        .with(file)
        .with(filter)
        .with(terminal)
        .try_init()
        .map_err(|e| format!("Failed to install log subscriber: {e}"))?;

    Ok(SESSION_LOG.get_or_init(|| SessionLog {
        _terminal: Mutex::new(terminal_guard),
        file: Mutex::new((path, file_guard)),
        file_reload,
    }))
}

/// Shorthand for [`start_session`] with the default filter
pub fn init_logging(op_dir: &Path, op_name: &str) -> Result<&'static SessionLog, String> {
    start_session(&LogSettings::new(op_dir, op_name))
}
