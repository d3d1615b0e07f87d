//! Shared types used across the session monitor crates.

use std::fmt;

/// One backend's sampled session count at one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric {
    /// Configured id of the monitored HAProxy instance.
    pub server_id: String,
    /// The stats URL that produced this sample.
    pub endpoint: String,
    /// Backend pool name (`# pxname`).
    pub backend_name: String,
    /// Current session rate (`rate`).
    pub sessions: u64,
    /// Queued requests (`qcur`), zero when not reported.
    pub queued_sessions: u64,
    /// Active servers in the pool (`act`), zero when not reported.
    pub active_backends: u64,
    /// HTTP 4xx responses (`hrsp_4xx`), zero when not reported.
    pub http_4xx: u64,
    /// HTTP 5xx responses (`hrsp_5xx`), zero when not reported.
    pub http_5xx: u64,
}

impl Metric {
    /// Create a metric with the extended counters zeroed.
    pub fn new(
        server_id: impl Into<String>,
        endpoint: impl Into<String>,
        backend_name: impl Into<String>,
        sessions: u64,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            endpoint: endpoint.into(),
            backend_name: backend_name.into(),
            sessions,
            queued_sessions: 0,
            active_backends: 0,
            http_4xx: 0,
            http_5xx: 0,
        }
    }
}

/// HTTP Basic credentials for a stats endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_metric_zeroes_extended_fields() {
        let m = Metric::new("lb1", "http://lb1/stats;csv", "pool-a", 42);
        assert_eq!(m.sessions, 42);
        assert_eq!(m.queued_sessions, 0);
        assert_eq!(m.active_backends, 0);
        assert_eq!(m.http_4xx, 0);
        assert_eq!(m.http_5xx, 0);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("admin", "hunter2");
        let out = format!("{creds:?}");
        assert!(out.contains("admin"));
        assert!(!out.contains("hunter2"));
    }
}
