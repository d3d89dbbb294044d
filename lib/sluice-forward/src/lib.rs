//! Forwarding of filtered event records to a downstream consumer over a local stream socket.
//!
//! [`ForwardHandler`] is the entrypoint: records handed to it are filtered by event type, queued, and written to the
//! downstream consumer as newline-delimited payloads. The connection is re-established in the background whenever a
//! write fails, and forwarding throughput is reported to an optional [`StatsSink`].
#![deny(warnings)]
#![deny(missing_docs)]

mod config;
pub use self::config::ForwardConfiguration;

mod error;
pub use self::error::ForwardError;

mod filter;
pub use self::filter::{AllowList, EventTypeFilter};

mod forward;

mod handler;
pub use self::handler::ForwardHandler;

mod reconnect;

mod record;
pub use self::record::{Entry, Record};

mod state;
pub use self::state::ConnectionState;

mod stats;
pub use self::stats::{ForwarderStats, LoggingStatsSink, MetricsStatsSink, StatsSink};

mod task;

pub mod transport;

#[cfg(test)]
mod test_util;
