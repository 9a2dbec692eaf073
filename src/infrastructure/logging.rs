//! Logging system configuration and initialization
//!
//! Sets up:
//! - Console output
//! - A full log file and a separate warnings-and-errors file
//! - Optional JSON formatting for the file logs
//! - Level control from the configuration file, overridable with `RUST_LOG`
//!
//! The file writers are non-blocking; their worker guards are returned in a
//! [`LoggingGuard`] that the caller keeps alive for the life of the process.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::{self, time::FormatTime};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

pub use crate::infrastructure::config::LoggingConfig;

pub const LOG_FILE: &str = "harvester.log";
pub const ERROR_LOG_FILE: &str = "harvester-errors.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the background log writers running; flushes them on drop
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _guards: Vec<WorkerGuard>,
    log_dir: Option<PathBuf>,
}

impl LoggingGuard {
    /// Directory holding the log files, if file output is enabled
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

/// Local wall-clock timestamps with millisecond precision
struct LocalTimeFormatter;

impl FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Builds the filter: `RUST_LOG` wins, otherwise the configured level with
/// dependency noise suppressed unless the level is trace
pub fn build_env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(level).with_context(|| format!("Invalid log level: {level}"))?;
    if !level.to_lowercase().contains("trace") {
        for directive in [
            "sqlx::query=warn",
            "sqlx::sqlite=warn",
            "reqwest=info",
            "hyper=warn",
            "hyper_util=warn",
            "h2=warn",
            "html5ever=warn",
            "selectors=warn",
        ] {
            filter = filter.add_directive(directive.parse()?);
        }
        filter = filter.add_directive(format!("catalog_harvester={level}").parse()?);
    }
    Ok(filter)
}

/// Installs the global subscriber
pub fn init_logging(config: &LoggingConfig, log_dir: &Path) -> Result<LoggingGuard> {
    if !config.console_output && !config.file_output {
        return Err(anyhow!("No logging output configured"));
    }

    let env_filter = build_env_filter(&config.level)?;
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guards = Vec::new();

    if config.console_output {
        layers.push(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_timer(LocalTimeFormatter)
                .with_target(false)
                .boxed(),
        );
    }

    if config.file_output {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

        let (file_writer, file_guard) = non_blocking(rolling::never(log_dir, LOG_FILE));
        let (error_writer, error_guard) = non_blocking(rolling::never(log_dir, ERROR_LOG_FILE));
        guards.push(file_guard);
        guards.push(error_guard);

        if config.json_format {
            layers.push(
                fmt::layer()
                    .json()
                    .with_writer(file_writer)
                    .with_timer(LocalTimeFormatter)
                    .with_target(true)
                    .with_current_span(true)
                    .with_ansi(false)
                    .boxed(),
            );
        } else {
            layers.push(
                fmt::layer()
                    .with_writer(file_writer)
                    .with_timer(LocalTimeFormatter)
                    .with_target(false)
                    .with_ansi(false)
                    .boxed(),
            );
        }

        layers.push(
            fmt::layer()
                .with_writer(error_writer)
                .with_timer(LocalTimeFormatter)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_filter(LevelFilter::WARN)
                .boxed(),
        );
    }

    Registry::default()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))?;

    info!(
        level = %config.level,
        json = config.json_format,
        console = config.console_output,
        file = config.file_output,
        "Logging system initialized"
    );
    if config.file_output {
        info!("Log directory: {}", log_dir.display());
    }

    Ok(LoggingGuard {
        _guards: guards,
        log_dir: config.file_output.then(|| log_dir.to_path_buf()),
    })
}
