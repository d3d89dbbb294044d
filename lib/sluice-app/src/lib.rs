//! Application bootstrapping primitives.
//!
//! Everything a binary needs to set up before it starts doing work: currently, logging.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod logging;

/// Common imports.
pub mod prelude {
    pub use super::logging::{fatal_and_exit, initialize_logging, LoggingConfiguration, LoggingGuard};
}
