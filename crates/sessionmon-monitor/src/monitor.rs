//! Per-server poll loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use sessionmon_core::Metric;
use sessionmon_sinks::StatsSink;
use sessionmon_stats::{StatsSource, StatsTarget};

/// Polls one HAProxy instance and forwards its metrics to a list of sinks.
pub struct ServerMonitor {
    target: StatsTarget,
    update_interval: Duration,
    /// Forwarding order matters: sinks are fed sequentially.
    sinks: Vec<Arc<dyn StatsSink>>,
    source: Arc<dyn StatsSource>,
    stop_tx: watch::Sender<bool>,
    span: Span,
}

impl ServerMonitor {
    pub fn new(
        target: StatsTarget,
        update_interval: Duration,
        sinks: Vec<Arc<dyn StatsSink>>,
        source: Arc<dyn StatsSource>,
    ) -> Self {
        let span = info_span!("monitor", server = %target.server_id);
        debug!(
            parent: &span,
            endpoint = %target.endpoint,
            sinks = sinks.len(),
            "configured HAProxy server"
        );
        let (stop_tx, _) = watch::channel(false);

        Self {
            target,
            update_interval,
            sinks,
            source,
            stop_tx,
            span,
        }
    }

    pub fn id(&self) -> &str {
        &self.target.server_id
    }

    pub fn endpoint(&self) -> &str {
        &self.target.endpoint
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Ask the poll loop to exit. Idempotent.
    ///
    /// An in-flight fetch is left to complete; a pending sleep is cut short.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Run fetch → distribute → sleep cycles until [`stop`](Self::stop).
    pub async fn poll_for_stats(&self) {
        self.run().instrument(self.span.clone()).await
    }

    async fn run(&self) {
        let mut stop_rx = self.stop_tx.subscribe();
        info!(
            interval_secs = self.update_interval.as_secs_f64(),
            "monitor started"
        );

        while !*stop_rx.borrow_and_update() {
            self.poll_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.update_interval) => {}
                _ = stop_rx.changed() => {}
            }
        }

        info!("monitor stopped");
    }

    /// One poll cycle without the sleep. Returns the number of metrics the
    /// sinks reported as stored.
    ///
    /// Fetch failures are logged and count as an empty cycle.
    pub async fn poll_once(&self) -> usize {
        let metrics = match self.source.fetch(&self.target).await {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(endpoint = %self.target.endpoint, error = %e, "stats fetch failed");
                return 0;
            }
        };

        if metrics.is_empty() {
            debug!("no metrics this cycle");
            return 0;
        }
        self.track_stats(&metrics).await
    }

    /// Hand `metrics` to every sink in order and sum their stored counts.
    pub async fn track_stats(&self, metrics: &[Metric]) -> usize {
        let mut stored = 0;
        for sink in &self.sinks {
            let n = sink.store_stats(metrics).await;
            if n < metrics.len() {
                warn!(
                    sink = %sink.id(),
                    stored = n,
                    offered = metrics.len(),
                    "sink stored fewer metrics than offered"
                );
            }
            stored += n;
        }
        debug!(offered = metrics.len(), stored, "metrics distributed");
        stored
    }
}
