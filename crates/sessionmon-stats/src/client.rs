//! HTTP(S) client for HAProxy stats endpoints.
//!
//! Each fetch opens a fresh connection, sends one `GET` and reads the whole
//! body. The full exchange is bounded by the target's deadline so that a
//! hanging proxy only delays its own monitor.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::{Request, StatusCode, Uri};
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, error};

use sessionmon_core::{Credentials, Metric, ServerConfig};

use crate::parser::parse_stats_csv;

const USER_AGENT: &str = concat!("sessionmon/", env!("CARGO_PKG_VERSION"));

/// Errors that prevent a stats report from being retrieved at all.
///
/// A non-200 response is not one of them: it is logged and treated as an
/// empty report.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("connection to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("tls error for {host}: {reason}")]
    Tls { host: String, reason: String },

    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    #[error("failed to build request: {0}")]
    Request(#[from] http::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// Where and how to fetch one server's report.
#[derive(Debug, Clone)]
pub struct StatsTarget {
    pub server_id: String,
    pub endpoint: String,
    pub credentials: Option<Credentials>,
    pub timeout: Duration,
}

impl From<&ServerConfig> for StatsTarget {
    fn from(config: &ServerConfig) -> Self {
        Self {
            server_id: config.id.clone(),
            endpoint: config.endpoint.clone(),
            credentials: config.credentials.clone(),
            timeout: config.fetch_timeout,
        }
    }
}

/// Boxed future returned by [`StatsSource::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<Metric>, FetchError>> + Send + 'a>>;

/// Anything that can produce a server's metrics; injected for testability.
pub trait StatsSource: Send + Sync {
    fn fetch<'a>(&'a self, target: &'a StatsTarget) -> FetchFuture<'a>;
}

/// Fetches and parses HAProxy CSV reports. Cheap to clone.
#[derive(Clone)]
pub struct StatsClient {
    tls: Arc<rustls::ClientConfig>,
}

impl StatsClient {
    /// Create a client that verifies TLS endpoints against the Mozilla root store.
    pub fn new() -> Result<Self, FetchError> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .map_err(|e| FetchError::Tls {
            host: String::new(),
            reason: format!("protocol version error: {e}"),
        })?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Self::with_tls_config(Arc::new(config)))
    }

    /// Create a client with a pre-built `rustls` configuration.
    pub fn with_tls_config(tls: Arc<rustls::ClientConfig>) -> Self {
        Self { tls }
    }

    /// Fetch the report for `target` and return its backend metrics.
    pub async fn fetch(&self, target: &StatsTarget) -> Result<Vec<Metric>, FetchError> {
        debug!(server = %target.server_id, endpoint = %target.endpoint, "fetching stats");

        let (status, body) = tokio::time::timeout(target.timeout, self.get(target))
            .await
            .map_err(|_| FetchError::Timeout(target.timeout))??;

        if status != StatusCode::OK {
            error!(
                server = %target.server_id,
                endpoint = %target.endpoint,
                %status,
                %body,
                "failed to fetch stats"
            );
            return Ok(Vec::new());
        }

        let metrics = parse_stats_csv(&target.server_id, &target.endpoint, &body);
        debug!(server = %target.server_id, count = metrics.len(), "parsed stats");
        Ok(metrics)
    }

    async fn get(&self, target: &StatsTarget) -> Result<(StatusCode, String), FetchError> {
        let invalid = |reason: &str| FetchError::InvalidEndpoint {
            endpoint: target.endpoint.clone(),
            reason: reason.to_string(),
        };

        let uri: Uri = target
            .endpoint
            .parse()
            .map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;
        let tls = match uri.scheme_str() {
            Some("http") => false,
            Some("https") => true,
            _ => return Err(invalid("scheme must be http or https")),
        };
        let host = uri
            .host()
            .ok_or_else(|| invalid("missing host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });

        let request = build_request(&uri, target.credentials.as_ref())?;

        let stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|source| FetchError::Connect {
                host: host.clone(),
                port,
                source,
            })?;
        let _ = stream.set_nodelay(true);

        if tls {
            let server_name = rustls::pki_types::ServerName::try_from(host.as_str())
                .map_err(|e| FetchError::Tls {
                    host: host.clone(),
                    reason: format!("invalid server name: {e}"),
                })?
                .to_owned();
            let stream = tokio_rustls::TlsConnector::from(Arc::clone(&self.tls))
                .connect(server_name, stream)
                .await
                .map_err(|e| FetchError::Tls {
                    host: host.clone(),
                    reason: e.to_string(),
                })?;
            send(TokioIo::new(stream), request).await
        } else {
            send(TokioIo::new(stream), request).await
        }
    }
}

impl StatsSource for StatsClient {
    fn fetch<'a>(&'a self, target: &'a StatsTarget) -> FetchFuture<'a> {
        Box::pin(StatsClient::fetch(self, target))
    }
}

fn build_request(
    uri: &Uri,
    credentials: Option<&Credentials>,
) -> Result<Request<Empty<Bytes>>, FetchError> {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let authority = uri.authority().map(|a| a.as_str()).unwrap_or_default();

    let mut builder = Request::builder()
        .method("GET")
        .uri(path)
        .header(http::header::HOST, authority)
        .header(http::header::USER_AGENT, USER_AGENT);

    if let Some(creds) = credentials {
        let token = STANDARD.encode(format!("{}:{}", creds.username, creds.password));
        builder = builder.header(http::header::AUTHORIZATION, format!("Basic {token}"));
    }

    Ok(builder.body(Empty::<Bytes>::new())?)
}

async fn send<I>(io: I, request: Request<Empty<Bytes>>) -> Result<(StatusCode, String), FetchError>
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "stats connection closed with error");
        }
    });

    let response = sender.send_request(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();
    Ok((status, String::from_utf8_lossy(&body).into_owned()))
}
