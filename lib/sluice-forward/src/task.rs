use std::future::Future;

use tokio::task::JoinHandle;
use tracing::{debug_span, Instrument as _};

/// Spawns a new named asynchronous task, returning a [`JoinHandle`] for it.
///
/// The task runs within a span carrying the given name, nested under the current span, so that everything it logs can
/// be attributed to it.
pub(crate) fn spawn_traced_named<S, F, T>(name: S, f: F) -> JoinHandle<T>
where
    S: Into<String>,
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let name = name.into();
    tokio::task::spawn(f.instrument(debug_span!("task", task_name = %name)))
}
