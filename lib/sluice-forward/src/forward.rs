use std::{io, sync::Arc};

use bytes::Bytes;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt as _},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::state::{ReconnectTrigger, Shared};

/// Drains the forward queue, writing each payload to the current connection.
///
/// Payloads dequeued while a reconnect is in progress, or while there is no connection, are dropped. A failed write
/// drops the payload along with the connection and requests a reconnect, and the loop moves on to the next payload
/// without waiting for the reconnect to finish.
///
/// Runs until `stop` is cancelled or the queue is closed and empty.
pub(crate) async fn run_forward_loop<C>(
    shared: Arc<Shared<C>>, trigger: ReconnectTrigger<C>, mut queue: mpsc::Receiver<Bytes>, stop: CancellationToken,
) where
    C: AsyncWrite + Send + Unpin,
{
    debug!("Forward loop started.");

    loop {
        let payload = tokio::select! {
            biased;

            _ = stop.cancelled() => break,
            payload = queue.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };

        if shared.is_reconnecting() {
            trace!(len = payload.len(), "Reconnect in progress. Dropping record.");
            continue;
        }

        let mut handle = shared.lock_handle().await;
        let Some(connection) = handle.connection.as_mut() else {
            trace!(len = payload.len(), "No connection to output socket. Dropping record.");
            continue;
        };

        let result = tokio::select! {
            biased;

            _ = stop.cancelled() => break,
            result = write_record(connection, &payload) => result,
        };

        if let Err(e) = result {
            handle.connection = None;
            drop(handle);

            warn!(error = %e, "Failed to write to output socket. Dropping connection and reconnecting.");
            trigger.request();
        }
    }

    debug!("Forward loop stopped.");
}

/// Writes a payload followed by the newline delimiter, as two separate writes.
async fn write_record<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(payload).await?;
    writer.write_all(b"\n").await
}
