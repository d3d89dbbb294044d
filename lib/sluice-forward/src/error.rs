use std::io;

use snafu::Snafu;

/// Forwarder errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum ForwardError {
    /// Every dial attempt allowed by the retry budget failed.
    ///
    /// The forwarder cannot make progress after this and has halted.
    #[snafu(display(
        "Permanent error connecting to output socket '{}' after {} attempts: {}",
        address,
        attempts,
        source
    ))]
    ConnectRetriesExhausted {
        /// Address that was being dialed.
        address: String,

        /// Number of dial attempts made.
        attempts: usize,

        /// Error from the final dial attempt.
        source: io::Error,
    },

    /// Configuration was invalid.
    #[snafu(display("Invalid forwarder configuration: {}", reason))]
    InvalidConfiguration {
        /// Why the configuration was rejected.
        reason: String,
    },
}

impl ForwardError {
    /// Returns `true` if the error means the forwarder has permanently stopped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectRetriesExhausted { .. })
    }
}
