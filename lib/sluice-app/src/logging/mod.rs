//! Logging.

use std::path::Path;

use sluice_error::{generic_error, GenericError};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, Layer as _};

mod config;
pub use self::config::{LogLevel, LoggingConfiguration};

mod layer;
use self::layer::build_formatting_layer;

/// Keeps the background log writers alive.
///
/// Must be held until the application is about to exit, so that buffered log lines are flushed.
#[derive(Default)]
pub struct LoggingGuard {
    worker_guards: Vec<WorkerGuard>,
}

impl LoggingGuard {
    fn add_worker_guard(&mut self, guard: WorkerGuard) {
        self.worker_guards.push(guard);
    }
}

/// Logs a message to standard error and exits the process with a non-zero exit code.
pub fn fatal_and_exit(message: String) -> ! {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the logging subsystem for `tracing`.
///
/// One output layer is built per configured destination (console, file), and the level filter from `config` is applied
/// once on top of all of them. `app_name` appears in every line of the text format, normalized to uppercase without
/// spaces or dashes.
///
/// # Errors
///
/// If the log file cannot be opened, or the logging subsystem was already initialized, an error will be returned.
pub fn initialize_logging(app_name: &str, config: &LoggingConfiguration) -> Result<LoggingGuard, GenericError> {
    let mut configured_layers = Vec::new();
    let mut logging_guard = LoggingGuard::default();

    if config.log_to_console {
        let (nb_stdout, guard) = tracing_appender::non_blocking(std::io::stdout());
        logging_guard.add_worker_guard(guard);

        configured_layers.push(build_formatting_layer(app_name, config, nb_stdout));
    }

    if !config.log_file.is_empty() {
        let log_file = Path::new(&config.log_file);
        let file_name = log_file
            .file_name()
            .ok_or_else(|| generic_error!("Log file path '{}' has no file name.", config.log_file))?;
        let directory = log_file.parent().unwrap_or_else(|| Path::new("."));

        let appender = tracing_appender::rolling::never(directory, file_name);
        let (nb_appender, guard) = tracing_appender::non_blocking(appender);
        logging_guard.add_worker_guard(guard);

        configured_layers.push(build_formatting_layer(app_name, config, nb_appender));
    }

    // A `Vec` of layers acts as a fanout, so events are filtered once rather than per output.
    tracing_subscriber::registry()
        .with(configured_layers.with_filter(config.log_level.as_env_filter()))
        .try_init()?;

    Ok(logging_guard)
}
