use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::ForwardConfiguration,
    error::ForwardError,
    filter::EventTypeFilter,
    forward::run_forward_loop,
    reconnect::ConnectionManager,
    record::Record,
    state::{ConnectionState, ReconnectTrigger, Shared},
    stats::{run_throughput_counter, StatsSink},
    task::spawn_traced_named,
    transport::{Dialer, SocketDialer},
};

const HANDLER_NAME: &str = "Forwarding handler";

struct Running {
    reconnect_stop: CancellationToken,
    stop: CancellationToken,
    connection_manager: JoinHandle<()>,
    forward_loop: JoinHandle<()>,
    throughput_counter: JoinHandle<()>,
}

/// Forwards filtered records to a downstream consumer over a stream socket.
///
/// Records accepted by [`consume`][Self::consume] are queued, and written out by a background task as the record
/// payload followed by a newline. Two more background tasks keep the connection to the downstream consumer alive and
/// report forwarding throughput.
///
/// Delivery is best-effort: records are dropped while the connection is being re-established, and a record whose write
/// fails is dropped along with the connection.
///
/// # Lifecycle
///
/// Nothing is forwarded until [`start`][Self::start] is called, and [`stop`][Self::stop] tears everything down again.
/// Both are idempotent, and a stopped handler can be started again.
///
/// If the connection cannot be re-established within the configured retry budget, the handler halts and reports a
/// fatal error through [`wait_for_fatal_error`][Self::wait_for_fatal_error].
pub struct ForwardHandler<D: Dialer> {
    config: ForwardConfiguration,
    filter: Arc<dyn EventTypeFilter>,
    dialer: Arc<D>,
    shared: Arc<Shared<D::Connection>>,
    queue: ArcSwapOption<mpsc::Sender<Bytes>>,
    running: Mutex<Option<Running>>,
    failures_tx: mpsc::UnboundedSender<ForwardError>,
    failures_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ForwardError>>,
}

impl ForwardHandler<SocketDialer> {
    /// Creates a new `ForwardHandler` that dials the configured output socket and filters by the configured event
    /// types.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, an error is returned.
    pub fn from_configuration(config: ForwardConfiguration) -> Result<Self, ForwardError> {
        let filter = Arc::new(config.build_filter());
        let dialer = config.build_dialer();
        Self::new(config, filter, dialer)
    }
}

impl<D: Dialer> ForwardHandler<D> {
    /// Creates a new `ForwardHandler`.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, an error is returned.
    pub fn new(
        config: ForwardConfiguration, filter: Arc<dyn EventTypeFilter>, dialer: D,
    ) -> Result<Self, ForwardError> {
        config.validate()?;

        let (failures_tx, failures_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            filter,
            dialer: Arc::new(dialer),
            shared: Arc::new(Shared::new()),
            queue: ArcSwapOption::empty(),
            running: Mutex::new(None),
            failures_tx,
            failures_rx: tokio::sync::Mutex::new(failures_rx),
        })
    }

    /// Returns the name of the handler.
    pub fn name(&self) -> &'static str {
        HANDLER_NAME
    }

    /// Returns the event types this handler forwards.
    ///
    /// When every event type is forwarded, this is the single wildcard `*`.
    pub fn event_types(&self) -> Vec<String> {
        if self.filter.forward_all() {
            vec!["*".to_string()]
        } else {
            self.filter.allowed_types()
        }
    }

    /// Registers the sink that receives throughput statistics.
    ///
    /// Replaces any previously registered sink.
    pub fn register_stats_sink<S>(&self, sink: S)
    where
        S: StatsSink + 'static,
    {
        self.shared.set_stats_sink(Arc::new(sink));
    }

    /// Returns the current state of the connection to the downstream consumer.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection_state()
    }

    /// Subscribes to changes in the state of the connection to the downstream consumer.
    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.subscribe()
    }

    /// Returns the number of records accepted for forwarding in the current statistics interval.
    pub async fn forwarded_count(&self) -> u64 {
        self.shared.lock_handle().await.forwarded
    }

    /// Waits for the handler to fail permanently, returning the error that caused it.
    ///
    /// Only one caller should wait at a time: each error is delivered once.
    pub async fn wait_for_fatal_error(&self) -> ForwardError {
        let mut failures = self.failures_rx.lock().await;
        match failures.recv().await {
            Some(error) => error,
            // `self` holds a sender, so the channel only closes once the handler is gone.
            None => std::future::pending().await,
        }
    }

    /// Consumes a record.
    ///
    /// If the record's event type is selected for forwarding, a copy of its payload is queued. When the queue is full,
    /// this waits until there is room. Records consumed while the handler is not running are dropped.
    pub async fn consume<R: Record>(&self, record: R) {
        if !self.filter.should_forward(record.event_type()) {
            return;
        }

        if self.enqueue(Bytes::copy_from_slice(record.payload())).await {
            self.shared.lock_handle().await.forwarded += 1;
        }
    }

    /// Consumes a record from outside of an asynchronous context.
    ///
    /// Behaves like [`consume`][Self::consume], blocking the current thread instead of waiting asynchronously.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn blocking_consume<R: Record>(&self, record: R) {
        if !self.filter.should_forward(record.event_type()) {
            return;
        }

        let Some(queue) = self.queue.load_full() else {
            debug!("Forwarding handler not running. Dropping record.");
            return;
        };

        if queue.blocking_send(Bytes::copy_from_slice(record.payload())).is_ok() {
            self.shared.blocking_lock_handle().forwarded += 1;
        }
    }

    async fn enqueue(&self, payload: Bytes) -> bool {
        let Some(queue) = self.queue.load_full() else {
            debug!("Forwarding handler not running. Dropping record.");
            return false;
        };

        // Sending only fails once the forward loop has exited, which happens after a fatal error.
        queue.send(payload).await.is_ok()
    }

    /// Starts the handler.
    ///
    /// Spawns the background tasks and requests the initial connection. Does nothing if the handler is already running.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            debug!("Forwarding handler already running.");
            return;
        }

        self.shared.set_connection_state(ConnectionState::Idle);

        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity());
        let (requests_tx, requests_rx) = mpsc::channel(1);
        let reconnect_stop = CancellationToken::new();
        let stop = CancellationToken::new();
        let trigger = ReconnectTrigger::new(Arc::clone(&self.shared), requests_tx);

        let manager = ConnectionManager::new(
            Arc::clone(&self.dialer),
            Arc::clone(&self.shared),
            self.config.reconnect_retries(),
            self.config.reconnect_backoff(),
            self.failures_tx.clone(),
            stop.clone(),
        );
        let connection_manager =
            spawn_traced_named("forward-connection-manager", manager.run(requests_rx, reconnect_stop.clone()));
        let forward_loop = spawn_traced_named(
            "forward-loop",
            run_forward_loop(Arc::clone(&self.shared), trigger.clone(), queue_rx, stop.clone()),
        );
        let throughput_counter = spawn_traced_named(
            "forward-throughput-counter",
            run_throughput_counter(Arc::clone(&self.shared), self.config.stats_interval(), stop.clone()),
        );

        self.queue.store(Some(Arc::new(queue_tx)));
        trigger.request();

        *running = Some(Running {
            reconnect_stop,
            stop,
            connection_manager,
            forward_loop,
            throughput_counter,
        });

        info!(
            socket_address = %self.dialer.address(),
            event_types = ?self.event_types(),
            "Forwarding handler started."
        );
    }

    /// Stops the handler.
    ///
    /// Stops reconnecting, closes the connection, stops the forward loop and throughput counter, and closes the queue.
    /// Completes once every background task has exited. Does nothing if the handler is not running.
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(running) = running else {
            debug!("Forwarding handler not running.");
            return;
        };

        running.reconnect_stop.cancel();
        running.stop.cancel();
        await_task("connection manager", running.connection_manager).await;

        self.shared.lock_handle().await.connection = None;
        self.shared.set_connection_state(ConnectionState::Stopped);
        self.queue.store(None);

        await_task("forward loop", running.forward_loop).await;
        await_task("throughput counter", running.throughput_counter).await;

        info!("Forwarding handler stopped.");
    }
}

impl<D: Dialer> Drop for ForwardHandler<D> {
    fn drop(&mut self) {
        let running = self.running.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = running.take() {
            running.reconnect_stop.cancel();
            running.stop.cancel();
        }
    }
}

async fn await_task(task_name: &str, handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        warn!(task_name, error = %e, "Forwarding handler task did not exit cleanly.");
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex as StdMutex, time::Duration};

    use super::*;
    use crate::{
        filter::AllowList,
        record::Entry,
        stats::ForwarderStats,
        test_util::{stays_pending, wait_until, MockConnection, ScriptedDialer},
        transport::ForwardAddress,
    };

    fn config() -> ForwardConfiguration {
        ForwardConfiguration::new(ForwardAddress::try_from("/tmp/sluice-test.sock").unwrap())
    }

    fn handler(config: ForwardConfiguration, filter: AllowList, dialer: ScriptedDialer) -> ForwardHandler<ScriptedDialer> {
        ForwardHandler::new(config, Arc::new(filter), dialer).unwrap()
    }

    async fn wait_for_state(handler: &ForwardHandler<ScriptedDialer>, expected: ConnectionState) {
        handler
            .subscribe_connection_state()
            .wait_for(|state| *state == expected)
            .await
            .unwrap();
    }

    struct BorrowedRecord<'a> {
        event_type: &'a str,
        payload: &'a [u8],
    }

    impl Record for BorrowedRecord<'_> {
        fn event_type(&self) -> &str {
            self.event_type
        }

        fn payload(&self) -> &[u8] {
            self.payload
        }
    }

    #[derive(Clone, Default)]
    struct CapturingSink(Arc<StdMutex<Vec<ForwarderStats>>>);

    impl StatsSink for CapturingSink {
        fn submit(&self, stats: ForwarderStats) {
            self.0.lock().unwrap().push(stats);
        }
    }

    #[test]
    fn self_description() {
        let h = handler(config(), AllowList::new(["dns", "alert"]), ScriptedDialer::always_succeeding());
        assert_eq!(h.name(), "Forwarding handler");
        assert_eq!(h.event_types(), vec!["alert", "dns"]);

        let h = handler(config(), AllowList::all(), ScriptedDialer::always_succeeding());
        assert_eq!(h.event_types(), vec!["*"]);
    }

    #[test]
    fn unusable_configuration_is_rejected() {
        let unusable = [
            config().with_queue_capacity(0),
            config().with_stats_interval_secs(0),
            config().with_reconnect_backoff_secs(0),
        ];

        for config in unusable {
            let result = ForwardHandler::new(config, Arc::new(AllowList::all()), ScriptedDialer::always_succeeding());
            assert!(matches!(result, Err(ForwardError::InvalidConfiguration { .. })));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_only_allowed_event_types() {
        let h = handler(config(), AllowList::new(["alert"]), ScriptedDialer::always_succeeding());
        let connection = h.dialer.connection();

        h.start();
        wait_for_state(&h, ConnectionState::Connected).await;

        h.consume(Entry::new("alert", "A")).await;
        assert_eq!(h.forwarded_count().await, 1);

        h.consume(Entry::new("dns", "B")).await;
        assert_eq!(h.forwarded_count().await, 1);

        assert!(wait_until(Duration::from_secs(1), || connection.written() == b"A\n").await);
        h.stop().await;
        assert_eq!(connection.written(), b"A\n");
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_failed_dials() {
        let config = config().with_reconnect_retries(5).with_reconnect_backoff_secs(10);
        let h = handler(config, AllowList::all(), ScriptedDialer::failing_then_succeeding(2));
        let mut states = h.subscribe_connection_state();
        assert_eq!(*states.borrow_and_update(), ConnectionState::Idle);

        h.start();
        states
            .wait_for(|state| *state == ConnectionState::Reconnecting)
            .await
            .unwrap();
        wait_for_state(&h, ConnectionState::Connected).await;

        assert_eq!(h.dialer.dial_count(), 3);
        assert!(stays_pending(Duration::from_secs(60), h.wait_for_fatal_error()).await);
        assert_eq!(h.connection_state(), ConnectionState::Connected);

        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_halt_the_handler() {
        let config = config().with_reconnect_retries(3);
        let h = handler(config, AllowList::all(), ScriptedDialer::always_failing());
        let connection = h.dialer.connection();

        h.start();
        let error = h.wait_for_fatal_error().await;

        assert!(matches!(error, ForwardError::ConnectRetriesExhausted { attempts: 3, .. }));
        assert_eq!(h.connection_state(), ConnectionState::PermanentlyFailed { attempts: 3 });
        assert_eq!(h.dialer.dial_count(), 3);

        // The forward loop has exited, so nothing is queued or written.
        let queue_closed = || h.queue.load_full().is_none_or(|queue| queue.is_closed());
        assert!(wait_until(Duration::from_secs(1), queue_closed).await);
        h.consume(Entry::new("alert", "A")).await;
        assert_eq!(h.forwarded_count().await, 0);
        assert_eq!(connection.write_count(), 0);

        h.stop().await;
        assert_eq!(h.connection_state(), ConnectionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_are_idempotent() {
        let h = handler(config(), AllowList::all(), ScriptedDialer::always_succeeding());

        h.stop().await;

        h.start();
        h.start();
        wait_for_state(&h, ConnectionState::Connected).await;
        assert_eq!(h.dialer.dial_count(), 1);

        h.stop().await;
        h.stop().await;
        assert_eq!(h.connection_state(), ConnectionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn restarts_after_stop() {
        let h = handler(config(), AllowList::all(), ScriptedDialer::always_succeeding());
        let connection = h.dialer.connection();

        h.start();
        wait_for_state(&h, ConnectionState::Connected).await;
        h.stop().await;

        h.consume(Entry::new("alert", "dropped")).await;

        h.start();
        wait_for_state(&h, ConnectionState::Connected).await;
        assert_eq!(h.dialer.dial_count(), 2);

        h.consume(Entry::new("alert", "A")).await;
        assert!(wait_until(Duration::from_secs(1), || connection.written() == b"A\n").await);

        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_backoff_completes_promptly() {
        let h = handler(config(), AllowList::all(), ScriptedDialer::always_failing());

        h.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.dialer.dial_count(), 1);

        let start = tokio::time::Instant::now();
        h.stop().await;

        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(h.dialer.dial_count(), 1);
        assert_eq!(h.connection_state(), ConnectionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_dial_completes() {
        let h = handler(config(), AllowList::all(), ScriptedDialer::hanging());

        h.start();
        wait_for_state(&h, ConnectionState::Reconnecting).await;

        // Records consumed before the first connection are dropped, not queued forever.
        h.consume(Entry::new("alert", "A")).await;

        h.stop().await;
        assert_eq!(h.connection_state(), ConnectionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn consume_does_not_alias_caller_memory() {
        let h = handler(config(), AllowList::all(), ScriptedDialer::always_succeeding());
        let connection = h.dialer.connection();

        h.start();
        wait_for_state(&h, ConnectionState::Connected).await;

        let mut buffer = b"original".to_vec();
        h.consume(BorrowedRecord {
            event_type: "alert",
            payload: &buffer,
        })
        .await;
        buffer.copy_from_slice(b"mutated!");

        assert!(wait_until(Duration::from_secs(1), || !connection.written().is_empty()).await);
        assert_eq!(connection.written(), b"original\n");

        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_applies_backpressure() {
        let config = config().with_queue_capacity(2);
        let h = handler(config, AllowList::all(), ScriptedDialer::always_succeeding());
        let connection = h.dialer.connection();

        h.start();
        wait_for_state(&h, ConnectionState::Connected).await;

        // The forward loop dequeues the first payload and then waits on the handle lock, leaving the queue to fill up.
        let guard = h.shared.lock_handle().await;
        for payload in ["1", "2", "3"] {
            assert!(h.enqueue(Bytes::from_static(payload.as_bytes())).await);
        }
        assert!(stays_pending(Duration::from_secs(5), h.enqueue(Bytes::from_static(b"4"))).await);
        drop(guard);

        assert!(h.enqueue(Bytes::from_static(b"4")).await);
        assert!(wait_until(Duration::from_secs(1), || connection.written() == b"1\n2\n3\n4\n").await);

        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reports_throughput_to_registered_sink() {
        let config = config().with_stats_interval_secs(10);
        let h = handler(config, AllowList::all(), ScriptedDialer::always_succeeding());
        let sink = CapturingSink::default();
        h.register_stats_sink(sink.clone());

        h.start();
        wait_for_state(&h, ConnectionState::Connected).await;

        for _ in 0..5 {
            h.consume(Entry::new("alert", "A")).await;
        }

        assert!(wait_until(Duration::from_secs(11), || !sink.0.lock().unwrap().is_empty()).await);
        assert_eq!(
            sink.0.lock().unwrap()[0],
            ForwarderStats {
                forwarded_events_per_sec: 0.5
            }
        );
        assert_eq!(h.forwarded_count().await, 0);

        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_triggers_reconnect() {
        let dialer = ScriptedDialer::always_succeeding().with_connection(MockConnection::failing_on_write(1));
        let h = handler(config(), AllowList::all(), dialer);
        let connection = h.dialer.connection();

        h.start();
        wait_for_state(&h, ConnectionState::Connected).await;

        h.consume(Entry::new("alert", "lost")).await;
        assert!(wait_until(Duration::from_secs(1), || h.dialer.dial_count() == 2).await);
        wait_for_state(&h, ConnectionState::Connected).await;

        h.consume(Entry::new("alert", "A")).await;
        assert!(wait_until(Duration::from_secs(1), || connection.written() == b"A\n").await);

        h.stop().await;
    }

    #[test]
    fn blocking_consume_from_plain_thread() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();

        let h = Arc::new(handler(config(), AllowList::new(["alert"]), ScriptedDialer::always_succeeding()));
        let connection = h.dialer.connection();

        runtime.block_on(async {
            h.start();
            wait_for_state(&h, ConnectionState::Connected).await;
        });

        let consumer = Arc::clone(&h);
        std::thread::spawn(move || {
            consumer.blocking_consume(Entry::new("alert", "A"));
            consumer.blocking_consume(Entry::new("dns", "B"));
        })
        .join()
        .unwrap();

        runtime.block_on(async {
            assert_eq!(h.forwarded_count().await, 1);
            assert!(wait_until(Duration::from_secs(5), || connection.written() == b"A\n").await);
            h.stop().await;
        });
    }
}
