//! Throughput statistics.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::state::Shared;

/// Forwarding throughput over one reporting interval.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ForwarderStats {
    /// Records forwarded per second.
    pub forwarded_events_per_sec: f64,
}

impl ForwarderStats {
    /// Computes the rate for `count` records forwarded over `interval`.
    pub fn from_interval(count: u64, interval: Duration) -> Self {
        Self {
            forwarded_events_per_sec: count as f64 / interval.as_secs_f64(),
        }
    }
}

/// Receives throughput statistics.
pub trait StatsSink: Send + Sync {
    /// Submits the statistics for the interval that just ended.
    fn submit(&self, stats: ForwarderStats);
}

/// Logs throughput statistics.
#[derive(Clone, Debug, Default)]
pub struct LoggingStatsSink;

impl StatsSink for LoggingStatsSink {
    fn submit(&self, stats: ForwarderStats) {
        info!(
            forwarded_events_per_sec = stats.forwarded_events_per_sec,
            "Forwarding handler throughput."
        );
    }
}

/// Reports throughput statistics as a gauge through the `metrics` facade.
#[derive(Clone, Debug, Default)]
pub struct MetricsStatsSink;

impl StatsSink for MetricsStatsSink {
    fn submit(&self, stats: ForwarderStats) {
        metrics::gauge!("forwarded_events_per_sec").set(stats.forwarded_events_per_sec);
    }
}

/// Periodically converts the forwarded count into a rate, submits it, and resets the count.
///
/// The count is reset at every tick whether or not a sink is registered.
pub(crate) async fn run_throughput_counter<C>(shared: Arc<Shared<C>>, period: Duration, stop: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(interval_secs = period.as_secs_f64(), "Throughput counter started.");

    loop {
        tokio::select! {
            biased;

            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let count = {
                    let mut handle = shared.lock_handle().await;
                    std::mem::take(&mut handle.forwarded)
                };

                if let Some(sink) = shared.stats_sink() {
                    sink.submit(ForwarderStats::from_interval(count, period));
                }
            }
        }
    }

    debug!("Throughput counter stopped.");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    use super::*;

    #[derive(Default)]
    struct CapturingSink(Mutex<Vec<ForwarderStats>>);

    impl CapturingSink {
        fn submitted(&self) -> Vec<ForwarderStats> {
            self.0.lock().unwrap().clone()
        }
    }

    impl StatsSink for CapturingSink {
        fn submit(&self, stats: ForwarderStats) {
            self.0.lock().unwrap().push(stats);
        }
    }

    #[test]
    fn rate_is_count_over_interval() {
        let stats = ForwarderStats::from_interval(50, Duration::from_secs(10));
        assert_eq!(stats.forwarded_events_per_sec, 5.0);

        let stats = ForwarderStats::from_interval(3, Duration::from_secs(2));
        assert_eq!(stats.forwarded_events_per_sec, 1.5);
    }

    #[test]
    fn stats_serialize_with_rate_field() {
        let json = serde_json::to_value(ForwarderStats::from_interval(20, Duration::from_secs(10))).unwrap();
        assert_eq!(json, serde_json::json!({ "forwarded_events_per_sec": 2.0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn counter_submits_rate_and_resets() {
        let shared = Arc::new(Shared::<()>::new());
        let sink = Arc::new(CapturingSink::default());
        shared.set_stats_sink(sink.clone());

        let stop = CancellationToken::new();
        let task = tokio::spawn(run_throughput_counter(
            Arc::clone(&shared),
            Duration::from_secs(10),
            stop.clone(),
        ));

        shared.lock_handle().await.forwarded = 30;
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(sink.submitted(), vec![ForwarderStats { forwarded_events_per_sec: 3.0 }]);
        assert_eq!(shared.lock_handle().await.forwarded, 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sink.submitted().len(), 2);
        assert_eq!(sink.submitted()[1].forwarded_events_per_sec, 0.0);

        stop.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn counter_resets_without_sink() {
        let shared = Arc::new(Shared::<()>::new());
        let stop = CancellationToken::new();
        let task = tokio::spawn(run_throughput_counter(
            Arc::clone(&shared),
            Duration::from_secs(10),
            stop.clone(),
        ));

        shared.lock_handle().await.forwarded = 7;
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(shared.lock_handle().await.forwarded, 0);

        stop.cancel();
        task.await.unwrap();
    }

    #[test]
    fn metrics_sink_sets_gauge() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            MetricsStatsSink.submit(ForwarderStats::from_interval(25, Duration::from_secs(10)));
        });

        let gauge = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find(|(key, _, _, _)| key.key().name() == "forwarded_events_per_sec")
            .map(|(_, _, _, value)| value);
        assert_eq!(gauge, Some(DebugValue::Gauge(2.5.into())));
    }
}
