//! Error primitives shared across the workspace.
//!
//! Libraries define their own typed errors with `snafu`. Anything that only needs to be reported, such as startup
//! failures in the binary, is carried as a [`GenericError`].
#![deny(warnings)]
#![deny(missing_docs)]

use std::fmt::Display;

/// A type-erased error with an optional chain of context.
pub type GenericError = anyhow::Error;

/// Constructs a [`GenericError`].
///
/// Accepts a string literal, a format string followed by its arguments, or any value implementing `Debug` and
/// `Display`. An existing `std::error::Error` value keeps its source chain.
#[macro_export]
macro_rules! generic_error {
    ($msg:literal $(,)?) => { $crate::__private_anyhow!($msg) };
    ($err:expr $(,)?) => { $crate::__private_anyhow!($err) };
    ($fmt:expr, $($arg:tt)*) => { $crate::__private_anyhow!($fmt, $($arg)*) };
}

#[doc(hidden)]
pub use anyhow::anyhow as __private_anyhow;

mod sealed {
    pub trait Sealed {}

    impl<T, E> Sealed for Result<T, E> {}
}

/// Attaches context to the error side of a `Result`.
///
/// This mirrors `anyhow::Context`, under a different name so that it can be imported alongside `snafu::ResultExt`
/// without the method names colliding.
pub trait ErrorContext<T, E>: sealed::Sealed {
    /// Wraps the error with `context`.
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static;

    /// Wraps the error with the context returned by `f`, which is only called if there is an error.
    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T, E> for Result<T, E>
where
    Result<T, E>: anyhow::Context<T, E>,
{
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
    {
        anyhow::Context::context(self, context)
    }

    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        anyhow::Context::with_context(self, f)
    }
}
