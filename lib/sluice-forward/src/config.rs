use std::time::Duration;

use serde::Deserialize;
use sluice_config::GenericConfiguration;
use sluice_error::{ErrorContext as _, GenericError};

use crate::{
    error::{ForwardError, InvalidConfiguration},
    filter::AllowList,
    transport::{ForwardAddress, SocketDialer},
};

const fn default_reconnect_retries() -> usize {
    0
}

const fn default_reconnect_backoff_secs() -> u64 {
    10
}

const fn default_stats_interval_secs() -> u64 {
    10
}

const fn default_queue_capacity() -> usize {
    10_000
}

/// Forwarder configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ForwardConfiguration {
    /// Address of the downstream consumer.
    ///
    /// Accepts `unix:///path`, `tcp://host:port`, or a bare path to a Unix stream socket.
    #[serde(rename = "forward_output_socket")]
    output_socket: ForwardAddress,

    /// Maximum number of dial attempts before the forwarder gives up.
    ///
    /// A value of zero retries forever.
    ///
    /// Defaults to 0.
    #[serde(rename = "forward_reconnect_retries", default = "default_reconnect_retries")]
    reconnect_retries: usize,

    /// Time to wait between failed dial attempts, in seconds.
    ///
    /// Defaults to 10 seconds.
    #[serde(
        rename = "forward_reconnect_backoff_secs",
        default = "default_reconnect_backoff_secs"
    )]
    reconnect_backoff_secs: u64,

    /// Interval over which forwarding throughput is measured and reported, in seconds.
    ///
    /// Defaults to 10 seconds.
    #[serde(rename = "forward_stats_interval_secs", default = "default_stats_interval_secs")]
    stats_interval_secs: u64,

    /// Number of records that can be queued for forwarding before ingestion waits.
    ///
    /// Defaults to 10,000.
    #[serde(rename = "forward_queue_capacity", default = "default_queue_capacity")]
    queue_capacity: usize,

    /// Whether to forward every event type, ignoring `forward_event_types`.
    ///
    /// Defaults to `false`.
    #[serde(default)]
    forward_all: bool,

    /// Event types to forward.
    ///
    /// Defaults to empty.
    #[serde(rename = "forward_event_types", default)]
    event_types: Vec<String>,
}

impl ForwardConfiguration {
    /// Creates a new `ForwardConfiguration` for the given downstream address, with default settings.
    pub fn new(output_socket: ForwardAddress) -> Self {
        Self {
            output_socket,
            reconnect_retries: default_reconnect_retries(),
            reconnect_backoff_secs: default_reconnect_backoff_secs(),
            stats_interval_secs: default_stats_interval_secs(),
            queue_capacity: default_queue_capacity(),
            forward_all: false,
            event_types: Vec::new(),
        }
    }

    /// Creates a new `ForwardConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized, or holds invalid values, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        let forward_config: Self = config
            .as_typed()
            .error_context("Failed to load forwarder configuration.")?;
        forward_config.validate()?;
        Ok(forward_config)
    }

    /// Checks that every setting is usable.
    ///
    /// # Errors
    ///
    /// If the queue capacity, backoff interval, or stats interval is zero, an error is returned.
    pub fn validate(&self) -> Result<(), ForwardError> {
        if self.queue_capacity == 0 {
            return Err(InvalidConfiguration {
                reason: "forward_queue_capacity must be at least 1",
            }
            .build());
        }

        if self.reconnect_backoff_secs == 0 {
            return Err(InvalidConfiguration {
                reason: "forward_reconnect_backoff_secs must be at least 1",
            }
            .build());
        }

        if self.stats_interval_secs == 0 {
            return Err(InvalidConfiguration {
                reason: "forward_stats_interval_secs must be at least 1",
            }
            .build());
        }

        Ok(())
    }

    /// Sets the maximum number of dial attempts. Zero retries forever.
    pub fn with_reconnect_retries(mut self, retries: usize) -> Self {
        self.reconnect_retries = retries;
        self
    }

    /// Sets the time to wait between failed dial attempts, in seconds.
    pub fn with_reconnect_backoff_secs(mut self, secs: u64) -> Self {
        self.reconnect_backoff_secs = secs;
        self
    }

    /// Sets the throughput reporting interval, in seconds.
    pub fn with_stats_interval_secs(mut self, secs: u64) -> Self {
        self.stats_interval_secs = secs;
        self
    }

    /// Sets the forward queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets whether every event type is forwarded.
    pub fn with_forward_all(mut self, forward_all: bool) -> Self {
        self.forward_all = forward_all;
        self
    }

    /// Sets the event types to forward.
    pub fn with_event_types<I, S>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = event_types.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the address of the downstream consumer.
    pub fn output_socket(&self) -> &ForwardAddress {
        &self.output_socket
    }

    /// Returns the retry budget.
    pub fn reconnect_retries(&self) -> usize {
        self.reconnect_retries
    }

    /// Returns the backoff interval between failed dial attempts.
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    /// Returns the throughput reporting interval.
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Returns the forward queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Builds the allow-list described by this configuration.
    pub fn build_filter(&self) -> AllowList {
        AllowList::new(self.event_types.iter().cloned()).with_forward_all(self.forward_all)
    }

    /// Builds a dialer for the configured downstream address.
    pub fn build_dialer(&self) -> SocketDialer {
        SocketDialer::new(self.output_socket.clone())
    }
}
