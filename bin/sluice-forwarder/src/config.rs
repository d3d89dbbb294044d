use std::path::PathBuf;

use clap::Parser;

/// Forwards newline-delimited JSON events to a downstream consumer over a stream socket.
#[derive(Parser)]
#[command(about)]
pub struct Cli {
    /// Path to the configuration file.
    ///
    /// Missing files are ignored, leaving configuration to environment variables prefixed with `SLUICE_`.
    #[arg(short = 'c', long = "config", default_value = "/etc/sluice/sluice.yaml")]
    pub config: PathBuf,

    /// Path to read events from.
    ///
    /// Defaults to standard input.
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,
}
