//! Event forwarder.
//!
//! Reads newline-delimited JSON events from a file or standard input, and forwards those with a selected event type to
//! a downstream consumer over a local stream socket.

#![deny(warnings)]
#![deny(missing_docs)]
use std::path::Path;

use clap::Parser as _;
use sluice_app::prelude::*;
use sluice_config::{ConfigurationLoader, GenericConfiguration};
use sluice_error::{ErrorContext as _, GenericError};
use sluice_forward::{transport::Dialer, ForwardConfiguration, ForwardHandler, LoggingStatsSink};
use tokio::{
    fs::File,
    io::{AsyncBufRead, AsyncBufReadExt as _, AsyncRead, BufReader},
    select,
};
use tracing::{debug, error, info, warn};

mod config;
use self::config::Cli;

mod input;
use self::input::LineEvent;

const APP_NAME: &str = "sluice-forwarder";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let configuration = load_configuration(&cli.config)
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to load configuration: {}", e)));
    let logging_config = LoggingConfiguration::from_configuration(&configuration)
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to load logging configuration: {:?}", e)));
    let guard = initialize_logging(APP_NAME, &logging_config)
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to initialize logging: {}", e)));

    match run(cli, configuration).await {
        Ok(()) => info!("Sluice forwarder stopped."),
        Err(e) => {
            error!("{:?}", e);
            drop(guard);
            std::process::exit(1);
        }
    }
}

fn load_configuration(path: &Path) -> Result<GenericConfiguration, GenericError> {
    let loader = ConfigurationLoader::default();
    let loader = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => loader.try_from_json(path),
        _ => loader.try_from_yaml(path),
    };

    let configuration = loader
        .from_environment("SLUICE")
        .error_context("Failed to load configuration from environment variables.")?
        .into_generic();

    Ok(configuration)
}

async fn run(cli: Cli, configuration: GenericConfiguration) -> Result<(), GenericError> {
    info!(process_id = std::process::id(), "Sluice forwarder starting...");

    let forward_config = ForwardConfiguration::from_configuration(&configuration)?;
    let handler = ForwardHandler::from_configuration(forward_config)?;
    handler.register_stats_sink(LoggingStatsSink);

    let input: Box<dyn AsyncRead + Send + Unpin> = match &cli.input {
        Some(path) => Box::new(
            File::open(path)
                .await
                .with_error_context(|| format!("Failed to open input file '{}'.", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    handler.start();

    let result = select! {
        result = forward_lines(&handler, BufReader::new(input)) => result,
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => {
                info!("Received interrupt. Shutting down.");
                Ok(())
            }
            Err(e) => Err(GenericError::from(e).context("Failed to listen for interrupt signal.")),
        },
        error = handler.wait_for_fatal_error() => Err(error.into()),
    };

    handler.stop().await;
    result
}

async fn forward_lines<D, R>(handler: &ForwardHandler<D>, reader: R) -> Result<(), GenericError>
where
    D: Dialer,
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_number = 0u64;
    let mut skipped = 0u64;

    while let Some(line) = lines.next_line().await.error_context("Failed to read input.")? {
        line_number += 1;

        match LineEvent::parse(&line) {
            Ok(Some(event)) => handler.consume(event).await,
            Ok(None) => {}
            Err(e) => {
                skipped += 1;
                warn!(error = %e, line_number, "Skipping malformed input line.");
            }
        }
    }

    debug!(lines = line_number, skipped, "Reached end of input.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use sluice_forward::EventTypeFilter as _;

    use super::*;

    fn config_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_json_configuration_by_extension() {
        let file = config_file(
            ".json",
            r#"{"forward_output_socket":"/tmp/out.sock","forward_event_types":["alert","dns"]}"#,
        );

        let configuration = load_configuration(file.path()).unwrap();
        let forward_config = ForwardConfiguration::from_configuration(&configuration).unwrap();
        assert_eq!(forward_config.build_filter().allowed_types(), vec!["alert", "dns"]);
    }

    #[test]
    fn loads_yaml_configuration_otherwise() {
        let file = config_file(".yaml", "forward_output_socket: /tmp/out.sock\nforward_event_types: [flow]\n");

        let configuration = load_configuration(file.path()).unwrap();
        let forward_config = ForwardConfiguration::from_configuration(&configuration).unwrap();
        assert_eq!(forward_config.build_filter().allowed_types(), vec!["flow"]);
    }
}
