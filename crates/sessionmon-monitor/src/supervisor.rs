//! Supervisor — builds sinks and monitors from configuration and runs them.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, error, info, warn};

use sessionmon_core::Config;
use sessionmon_sinks::{StatsSink, build_sink};
use sessionmon_stats::{StatsClient, StatsSource, StatsTarget};

use crate::monitor::ServerMonitor;

/// Owns every sink and monitor of the process.
pub struct Supervisor {
    sinks: BTreeMap<String, Arc<dyn StatsSink>>,
    monitors: Vec<Arc<ServerMonitor>>,
}

impl Supervisor {
    /// Build sinks and monitors, fetching over HTTP(S).
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = StatsClient::new().context("failed to initialize HTTP client")?;
        Self::with_source(config, Arc::new(client)).await
    }

    /// Build sinks and monitors around an arbitrary stats source.
    pub async fn with_source(
        config: &Config,
        source: Arc<dyn StatsSource>,
    ) -> anyhow::Result<Self> {
        let mut sinks = BTreeMap::new();
        for (id, sink_config) in &config.sinks {
            debug!(sink = %id, kind = %sink_config.kind(), "creating sink");
            let sink = build_sink(id, sink_config)
                .await
                .with_context(|| format!("failed to create sink \"{id}\""))?;
            if let Some(sink) = sink {
                sinks.insert(id.clone(), sink);
            }
        }

        let mut monitors = Vec::with_capacity(config.servers.len());
        for server in config.servers.values() {
            let attached: Vec<Arc<dyn StatsSink>> = server
                .sinks
                .iter()
                .filter_map(|id| sinks.get(id).cloned())
                .collect();
            if attached.is_empty() {
                warn!(server = %server.id, "no active sinks, metrics will be fetched and dropped");
            }

            debug!(server = %server.id, endpoint = %server.endpoint, "creating monitor");
            monitors.push(Arc::new(ServerMonitor::new(
                StatsTarget::from(server),
                server.update_interval,
                attached,
                Arc::clone(&source),
            )));
        }

        Ok(Self { sinks, monitors })
    }

    pub fn monitors(&self) -> &[Arc<ServerMonitor>] {
        &self.monitors
    }

    /// Active sinks by id. Inactive sink types are absent.
    pub fn sinks(&self) -> &BTreeMap<String, Arc<dyn StatsSink>> {
        &self.sinks
    }

    /// Run every monitor concurrently until `shutdown` resolves, then stop
    /// them, wait for their loops to exit and close the sinks.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(count = self.monitors.len(), "starting up monitor(s)");

        let handles: Vec<_> = self
            .monitors
            .iter()
            .map(|monitor| {
                let monitor = Arc::clone(monitor);
                tokio::spawn(async move { monitor.poll_for_stats().await })
            })
            .collect();

        shutdown.await;
        info!("shutdown requested, stopping monitors");

        for monitor in &self.monitors {
            monitor.stop();
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "monitor task failed");
            }
        }

        for (id, sink) in &self.sinks {
            debug!(sink = %id, "closing sink");
            sink.close().await;
        }

        info!("all monitors stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(dir: &std::path::Path) -> Config {
        format!(
            r#"
[sinks.local]
type = "logfile"
path = "{}"

[sinks.prtg]
type = "prtg"
base-url = "https://prtg.local"
gid = "1"
key = "k"

[servers.edge-1]
endpoint = "http://127.0.0.1:1/stats;csv"
update-interval = 0.01
fetch-timeout = 0.5
sinks = ["local", "prtg"]

[servers.edge-2]
endpoint = "http://127.0.0.1:1/stats;csv"
sinks = ["prtg"]
"#,
            dir.join("sessions.tsv").display()
        )
        .parse()
        .unwrap()
    }

    #[tokio::test]
    async fn builds_shared_sinks_and_one_monitor_per_server() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::from_config(&config(dir.path())).await.unwrap();

        assert_eq!(supervisor.sinks().len(), 1);
        assert!(supervisor.sinks().contains_key("local"));

        let ids: Vec<&str> = supervisor.monitors().iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec!["edge-1", "edge-2"]);
        assert_eq!(supervisor.monitors()[0].update_interval(), Duration::from_millis(10));
        assert_eq!(supervisor.monitors()[1].endpoint(), "http://127.0.0.1:1/stats;csv");
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_even_when_endpoints_are_down() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::from_config(&config(dir.path())).await.unwrap();
        let monitors: Vec<_> = supervisor.monitors().to_vec();

        tokio::time::timeout(
            Duration::from_secs(5),
            supervisor.run(tokio::time::sleep(Duration::from_millis(50))),
        )
        .await
        .expect("supervisor did not shut down");

        assert!(monitors.iter().all(|m| m.is_stopped()));
    }
}
