//! sessionmon-sinks — destinations for HAProxy session metrics.
//!
//! Every sink implements [`StatsSink`]. Sinks are shared between monitors
//! (`Arc<dyn StatsSink>`) and serialize access to their own transport.
//!
//! ```text
//! build_sink(id, SinkConfig)
//!   ├── Gelf    → GelfSink    (one UDP datagram per metric, reconnect on failure)
//!   ├── Logfile → LogfileSink (one tab-separated line per metric)
//!   └── Prtg    → none, logged and skipped
//! ```

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use sessionmon_core::{Metric, SinkConfig, SinkKind};

pub mod gelf;
pub mod logfile;

pub use gelf::{DatagramConnector, DatagramTransport, GelfMessage, GelfSink, UdpConnector};
pub use logfile::LogfileSink;

/// Boxed future returned by sink and transport methods.
pub type SinkFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors raised while building a sink. Delivery failures are never errors;
/// they are logged and reflected in the stored count.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("failed to open log file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A destination that records or forwards metrics.
pub trait StatsSink: Send + Sync {
    /// Configured sink id.
    fn id(&self) -> &str;

    fn kind(&self) -> SinkKind;

    /// Deliver a batch and return how many metrics were stored.
    ///
    /// Per-metric failures are logged and skipped; the remaining metrics are
    /// still attempted.
    fn store_stats<'a>(&'a self, metrics: &'a [Metric]) -> SinkFuture<'a, usize>;

    /// Release the transport and cancel any background work.
    fn close(&self) -> SinkFuture<'_, ()>;
}

/// Build the sink described by `config`.
///
/// Returns `Ok(None)` for sink types that are accepted in configuration but
/// have no implementation.
pub async fn build_sink(
    id: &str,
    config: &SinkConfig,
) -> Result<Option<Arc<dyn StatsSink>>, SinkError> {
    let sink: Arc<dyn StatsSink> = match config {
        SinkConfig::Gelf {
            host,
            port,
            facility,
            reconnect,
        } => Arc::new(
            GelfSink::connect(id, host, *port, facility, *reconnect, Arc::new(UdpConnector))
                .await?,
        ),
        SinkConfig::Logfile { path } => Arc::new(LogfileSink::open(id, path)?),
        SinkConfig::Prtg { .. } => {
            warn!(sink = %id, kind = %config.kind(), "sink type currently not supported, skipping");
            return Ok(None);
        }
    };
    Ok(Some(sink))
}
