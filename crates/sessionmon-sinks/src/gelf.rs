//! GELF sink — one JSON datagram per metric to a Graylog UDP input.
//!
//! UDP is best-effort: a datagram that fails to send is logged and dropped.
//! A send error closes the transport and, when enabled, spawns a single
//! background reconnect to the same address. Metrics offered while the sink
//! is disconnected are dropped.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use sessionmon_core::{Metric, SinkKind};

use crate::{SinkError, SinkFuture, StatsSink};

const GELF_VERSION: &str = "1.1";

/// Syslog severity "informational".
const GELF_LEVEL_INFO: u8 = 6;

/// A connected datagram endpoint.
pub trait DatagramTransport: Send + Sync {
    /// Send one datagram. Returns bytes sent.
    fn send<'a>(&'a self, payload: &'a [u8]) -> SinkFuture<'a, io::Result<usize>>;

    /// Release the underlying socket.
    fn close(&self);
}

/// Creates datagram transports; injected for testability.
pub trait DatagramConnector: Send + Sync {
    fn connect<'a>(
        &'a self,
        host: &'a str,
        port: u16,
    ) -> SinkFuture<'a, io::Result<Arc<dyn DatagramTransport>>>;
}

/// Connects real `tokio` UDP sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpConnector;

impl DatagramConnector for UdpConnector {
    fn connect<'a>(
        &'a self,
        host: &'a str,
        port: u16,
    ) -> SinkFuture<'a, io::Result<Arc<dyn DatagramTransport>>> {
        Box::pin(async move {
            let remote = tokio::net::lookup_host((host, port))
                .await?
                .next()
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, format!("no address found for {host}"))
                })?;
            let local = if remote.is_ipv4() {
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
            } else {
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
            };

            let socket = UdpSocket::bind(local).await?;
            socket.connect(remote).await?;
            debug!(%remote, "udp socket connected");

            Ok(Arc::new(UdpTransport {
                socket: std::sync::Mutex::new(Some(Arc::new(socket))),
            }) as Arc<dyn DatagramTransport>)
        })
    }
}

struct UdpTransport {
    socket: std::sync::Mutex<Option<Arc<UdpSocket>>>,
}

impl UdpTransport {
    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl DatagramTransport for UdpTransport {
    fn send<'a>(&'a self, payload: &'a [u8]) -> SinkFuture<'a, io::Result<usize>> {
        Box::pin(async move {
            match self.socket() {
                Some(socket) => socket.send(payload).await,
                None => Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed")),
            }
        })
    }

    fn close(&self) {
        self.socket
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}

/// GELF 1.1 payload for one metric.
#[derive(Debug, Serialize)]
pub struct GelfMessage<'a> {
    pub version: &'static str,
    pub host: &'a str,
    pub short_message: String,
    pub timestamp: f64,
    pub level: u8,
    #[serde(rename = "_facility")]
    pub facility: &'a str,
    #[serde(rename = "_sessions")]
    pub sessions: u64,
    #[serde(rename = "_backend")]
    pub backend: &'a str,
    #[serde(rename = "_queued_sessions")]
    pub queued_sessions: u64,
    #[serde(rename = "_active_backends")]
    pub active_backends: u64,
    #[serde(rename = "_http_4xx")]
    pub http_4xx: u64,
    #[serde(rename = "_http_5xx")]
    pub http_5xx: u64,
}

impl<'a> GelfMessage<'a> {
    pub fn new(metric: &'a Metric, facility: &'a str) -> Self {
        let now = chrono::Utc::now();
        Self {
            version: GELF_VERSION,
            host: &metric.server_id,
            short_message: format!(
                "{} concurrent requests measured for backend \"{}\"",
                metric.sessions, metric.backend_name
            ),
            timestamp: now.timestamp_micros() as f64 / 1_000_000.0,
            level: GELF_LEVEL_INFO,
            facility,
            sessions: metric.sessions,
            backend: &metric.backend_name,
            queued_sessions: metric.queued_sessions,
            active_backends: metric.active_backends,
            http_4xx: metric.http_4xx,
            http_5xx: metric.http_5xx,
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Connection state shared with the reconnect task.
#[derive(Default)]
struct Link {
    transport: Option<Arc<dyn DatagramTransport>>,
    reconnect: Option<JoinHandle<()>>,
    closed: bool,
}

impl Link {
    fn reconnect_pending(&self) -> bool {
        self.reconnect.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Sends metrics to Graylog as GELF over UDP.
pub struct GelfSink {
    id: String,
    host: String,
    port: u16,
    facility: String,
    reconnect_on_failure: bool,
    connector: Arc<dyn DatagramConnector>,
    link: Arc<Mutex<Link>>,
    span: Span,
}

impl GelfSink {
    /// Connect to `host:port` through `connector`.
    pub async fn connect(
        id: &str,
        host: &str,
        port: u16,
        facility: &str,
        reconnect_on_failure: bool,
        connector: Arc<dyn DatagramConnector>,
    ) -> Result<Self, SinkError> {
        let span = info_span!("sink", id = %id, kind = "gelf");
        info!(parent: &span, %host, port, "connecting to Graylog server");

        let transport = connector
            .connect(host, port)
            .await
            .map_err(|source| SinkError::Connect {
                host: host.to_string(),
                port,
                source,
            })?;

        Ok(Self {
            id: id.to_string(),
            host: host.to_string(),
            port,
            facility: facility.to_string(),
            reconnect_on_failure,
            connector,
            link: Arc::new(Mutex::new(Link {
                transport: Some(transport),
                ..Link::default()
            })),
            span,
        })
    }

    /// Whether a transport is currently available.
    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.transport.is_some()
    }

    async fn store(&self, metrics: &[Metric]) -> usize {
        debug!(count = metrics.len(), "sending metrics to Graylog");
        let mut sent = 0;
        let mut retried = false;

        for metric in metrics {
            let transport = {
                let mut link = self.link.lock().await;
                if link.closed {
                    warn!("sink is closed, dropping metric");
                    continue;
                }
                if !retried && link.transport.is_none() && !link.reconnect_pending() {
                    // The last reconnect failed; try again, once per batch.
                    retried = true;
                    self.schedule_reconnect(&mut link);
                }
                link.transport.clone()
            };
            let Some(transport) = transport else {
                warn!(backend = %metric.backend_name, "not connected to Graylog, dropping metric");
                continue;
            };

            let payload = match GelfMessage::new(metric, &self.facility).to_bytes() {
                Ok(payload) => payload,
                Err(e) => {
                    error!(error = %e, "failed to encode GELF payload");
                    continue;
                }
            };

            match transport.send(&payload).await {
                Ok(_) => sent += 1,
                Err(e) => {
                    error!(error = %e, "error while communicating with Graylog server");
                    self.close_and_reconnect(&transport).await;
                }
            }
        }

        sent
    }

    /// Tear down `failed` and schedule one reconnect. A no-op if `failed` was
    /// already replaced, so a single failure is handled once.
    async fn close_and_reconnect(&self, failed: &Arc<dyn DatagramTransport>) {
        let mut link = self.link.lock().await;
        let is_current = link
            .transport
            .as_ref()
            .is_some_and(|t| std::ptr::addr_eq(Arc::as_ptr(t), Arc::as_ptr(failed)));
        if !is_current {
            return;
        }

        if let Some(current) = link.transport.take() {
            current.close();
        }
        if self.reconnect_on_failure && !link.closed && !link.reconnect_pending() {
            self.schedule_reconnect(&mut link);
        }
    }

    fn schedule_reconnect(&self, link: &mut Link) {
        if !self.reconnect_on_failure || link.closed {
            return;
        }

        let connector = Arc::clone(&self.connector);
        let shared = Arc::clone(&self.link);
        let host = self.host.clone();
        let port = self.port;

        let task = async move {
            warn!(%host, port, "reconnecting to Graylog server");
            match connector.connect(&host, port).await {
                Ok(transport) => {
                    let mut link = shared.lock().await;
                    if link.closed {
                        transport.close();
                    } else {
                        link.transport = Some(transport);
                        info!(%host, port, "reconnected to Graylog server");
                    }
                }
                Err(e) => error!(%host, port, error = %e, "reconnect to Graylog server failed"),
            }
        };

        link.reconnect = Some(tokio::spawn(task.instrument(self.span.clone())));
    }

    async fn shutdown(&self) {
        let mut link = self.link.lock().await;
        link.closed = true;
        if let Some(task) = link.reconnect.take() {
            task.abort();
        }
        if let Some(transport) = link.transport.take() {
            transport.close();
        }
        debug!("GELF sink closed");
    }
}

impl StatsSink for GelfSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Gelf
    }

    fn store_stats<'a>(&'a self, metrics: &'a [Metric]) -> SinkFuture<'a, usize> {
        Box::pin(self.store(metrics).instrument(self.span.clone()))
    }

    fn close(&self) -> SinkFuture<'_, ()> {
        Box::pin(self.shutdown().instrument(self.span.clone()))
    }
}
