//! Session monitor configuration parser.
//!
//! The file is parsed into loosely typed tables first so that validation can
//! report every problem in one pass instead of stopping at the first one.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::types::Credentials;

/// Poll interval used when a server does not set `update-interval`.
pub const DEFAULT_UPDATE_INTERVAL_SECS: f64 = 10.0;

/// Fetch deadline used when a server does not set `fetch-timeout`.
pub const DEFAULT_FETCH_TIMEOUT_SECS: f64 = 10.0;

/// Errors raised while loading configuration. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("configuration syntax error: {0}")]
    Syntax(#[from] toml::de::Error),

    #[error("invalid configuration:\n{}", format_problems(.0))]
    Invalid(Vec<String>),
}

fn format_problems(problems: &[String]) -> String {
    problems
        .iter()
        .map(|p| format!("  - {p}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Application log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" | "critical" => Ok(LogLevel::Error),
            other => Err(format!("invalid logging level: {other}")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: None,
            console: true,
        }
    }
}

/// The closed set of sink types accepted in `[sinks.*]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    Gelf,
    Logfile,
    Prtg,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Gelf => "gelf",
            SinkKind::Logfile => "logfile",
            SinkKind::Prtg => "prtg",
        }
    }
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gelf" => Ok(SinkKind::Gelf),
            "logfile" => Ok(SinkKind::Logfile),
            "prtg" => Ok(SinkKind::Prtg),
            other => Err(format!("unrecognised sink type: {other}")),
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated sink definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkConfig {
    /// GELF messages over UDP to a Graylog input.
    Gelf {
        host: String,
        port: u16,
        facility: String,
        reconnect: bool,
    },
    /// Tab-separated lines appended to a local file.
    Logfile { path: PathBuf },
    /// PRTG push sensor. Accepted, but no sink is built for it.
    Prtg {
        base_url: String,
        gid: String,
        key: String,
    },
}

impl SinkConfig {
    pub fn kind(&self) -> SinkKind {
        match self {
            SinkConfig::Gelf { .. } => SinkKind::Gelf,
            SinkConfig::Logfile { .. } => SinkKind::Logfile,
            SinkConfig::Prtg { .. } => SinkKind::Prtg,
        }
    }
}

/// A validated `[servers.*]` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub id: String,
    pub endpoint: String,
    pub credentials: Option<Credentials>,
    pub update_interval: Duration,
    pub fetch_timeout: Duration,
    /// Sink ids, in forwarding order.
    pub sinks: Vec<String>,
}

/// Fully validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub logging: LoggingConfig,
    pub sinks: BTreeMap<String, SinkConfig>,
    pub servers: BTreeMap<String, ServerConfig>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        content.parse()
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: RawConfig = toml::from_str(s)?;
        raw.validate()
    }
}

// ── Raw (unvalidated) representation ─────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    logging: Option<RawLogging>,
    #[serde(default)]
    sinks: BTreeMap<String, toml::Value>,
    #[serde(default)]
    servers: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLogging {
    level: Option<String>,
    file: Option<PathBuf>,
    console: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawGelf {
    host: String,
    port: i64,
    facility: String,
    reconnect: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawLogfile {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawPrtg {
    base_url: String,
    gid: String,
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawServer {
    endpoint: String,
    username: Option<String>,
    password: Option<String>,
    update_interval: Option<f64>,
    fetch_timeout: Option<f64>,
    sinks: Vec<String>,
}

impl RawConfig {
    fn validate(self) -> Result<Config, ConfigError> {
        let mut problems = Vec::new();

        let logging = validate_logging(self.logging.unwrap_or_default(), &mut problems);

        if self.sinks.is_empty() {
            problems.push("at least one sink must be configured in [sinks]".to_string());
        }
        if self.servers.is_empty() {
            problems.push("at least one HAProxy server must be configured in [servers]".to_string());
        }

        let mut sinks = BTreeMap::new();
        for (id, value) in self.sinks {
            if let Some(sink) = validate_sink(&id, value, &mut problems) {
                sinks.insert(id, sink);
            }
        }

        let mut servers = BTreeMap::new();
        for (id, value) in self.servers {
            if let Some(server) = validate_server(&id, value, &sinks, &mut problems) {
                servers.insert(id, server);
            }
        }

        if problems.is_empty() {
            Ok(Config {
                logging,
                sinks,
                servers,
            })
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

fn validate_logging(raw: RawLogging, problems: &mut Vec<String>) -> LoggingConfig {
    let level = match raw.level.as_deref().map(str::parse::<LogLevel>) {
        None => LogLevel::default(),
        Some(Ok(level)) => level,
        Some(Err(e)) => {
            problems.push(e);
            LogLevel::default()
        }
    };

    LoggingConfig {
        level,
        file: raw.file,
        console: raw.console.unwrap_or(true),
    }
}

fn validate_sink(id: &str, value: toml::Value, problems: &mut Vec<String>) -> Option<SinkConfig> {
    let Some(kind) = value.get("type") else {
        problems.push(format!("sink \"{id}\" has no \"type\" field"));
        return None;
    };
    let Some(kind) = kind.as_str() else {
        problems.push(format!("sink \"{id}\" has a non-string \"type\" field"));
        return None;
    };
    let kind = match kind.parse::<SinkKind>() {
        Ok(kind) => kind,
        Err(e) => {
            problems.push(format!("sink \"{id}\": {e}"));
            return None;
        }
    };

    let parsed = match kind {
        SinkKind::Gelf => value.try_into::<RawGelf>().map(|raw| {
            let port = match u16::try_from(raw.port) {
                Ok(port) if port > 0 => port,
                _ => {
                    problems.push(format!("invalid port {} for sink \"{id}\"", raw.port));
                    0
                }
            };
            SinkConfig::Gelf {
                host: raw.host,
                port,
                facility: raw.facility,
                reconnect: raw.reconnect.unwrap_or(true),
            }
        }),
        SinkKind::Logfile => value
            .try_into::<RawLogfile>()
            .map(|raw| SinkConfig::Logfile { path: raw.path }),
        SinkKind::Prtg => value.try_into::<RawPrtg>().map(|raw| SinkConfig::Prtg {
            base_url: raw.base_url,
            gid: raw.gid,
            key: raw.key,
        }),
    };

    match parsed {
        Ok(sink) => Some(sink),
        Err(e) => {
            problems.push(format!("invalid {kind} sink \"{id}\": {}", e.message()));
            None
        }
    }
}

fn validate_server(
    id: &str,
    value: toml::Value,
    sinks: &BTreeMap<String, SinkConfig>,
    problems: &mut Vec<String>,
) -> Option<ServerConfig> {
    let raw = match value.try_into::<RawServer>() {
        Ok(raw) => raw,
        Err(e) => {
            problems.push(format!("invalid server \"{id}\": {}", e.message()));
            return None;
        }
    };
    let before = problems.len();

    let endpoint = raw.endpoint.trim().to_string();
    if endpoint.is_empty() {
        problems.push(format!("server \"{id}\" has an empty endpoint"));
    } else if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
        problems.push(format!(
            "server \"{id}\" endpoint must be an http:// or https:// URL: {endpoint}"
        ));
    }

    let credentials = match (raw.username, raw.password) {
        (Some(username), Some(password)) => Some(Credentials { username, password }),
        (None, None) => None,
        (Some(_), None) => {
            problems.push(format!("missing password for server \"{id}\""));
            None
        }
        (None, Some(_)) => {
            problems.push(format!("missing username for server \"{id}\""));
            None
        }
    };

    let update_interval = raw.update_interval.unwrap_or(DEFAULT_UPDATE_INTERVAL_SECS);
    let update_interval = match Duration::try_from_secs_f64(update_interval) {
        Ok(interval) => interval,
        Err(_) => {
            problems.push(format!(
                "field \"update-interval\" for server \"{id}\" must be a non-negative number of seconds, got {update_interval}"
            ));
            Duration::ZERO
        }
    };

    let fetch_timeout = raw.fetch_timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS);
    let fetch_timeout = match Duration::try_from_secs_f64(fetch_timeout) {
        Ok(timeout) if !timeout.is_zero() => timeout,
        _ => {
            problems.push(format!(
                "field \"fetch-timeout\" for server \"{id}\" must be a positive number of seconds, got {fetch_timeout}"
            ));
            Duration::ZERO
        }
    };

    if raw.sinks.is_empty() {
        problems.push(format!("one or more sinks are required for server \"{id}\""));
    }
    for sink in &raw.sinks {
        if !sinks.contains_key(sink) {
            problems.push(format!("server \"{id}\" refers to unrecognised sink \"{sink}\""));
        }
    }

    if problems.len() > before {
        return None;
    }

    Some(ServerConfig {
        id: id.to_string(),
        endpoint,
        credentials,
        update_interval,
        fetch_timeout,
        sinks: raw.sinks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[logging]
level = "DEBUG"
file = "/tmp/sessionmon.log"
console = false

[sinks.graylog]
type = "gelf"
host = "graylog.local"
port = 12201
facility = "haproxy-session-mon"

[sinks.local]
type = "logfile"
path = "/tmp/sessions.tsv"

[sinks.prtg]
type = "prtg"
base-url = "https://prtg.local:5051"
gid = "1234"
key = "secret"

[servers.edge-1]
endpoint = "http://lb1:8083/haproxy?stats;csv"
username = "admin"
password = "admin"
update-interval = 2.5
sinks = ["graylog", "local"]

[servers.edge-2]
endpoint = "https://lb2/haproxy?stats;csv"
sinks = ["local"]
"#;

    fn problems(s: &str) -> Vec<String> {
        match s.parse::<Config>() {
            Err(ConfigError::Invalid(problems)) => problems,
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn parse_full_config() {
        let config: Config = FULL.parse().unwrap();

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.file, Some(PathBuf::from("/tmp/sessionmon.log")));
        assert!(!config.logging.console);

        assert_eq!(
            config.sinks["graylog"],
            SinkConfig::Gelf {
                host: "graylog.local".to_string(),
                port: 12201,
                facility: "haproxy-session-mon".to_string(),
                reconnect: true,
            }
        );
        assert_eq!(config.sinks["prtg"].kind(), SinkKind::Prtg);

        let edge1 = &config.servers["edge-1"];
        assert_eq!(edge1.id, "edge-1");
        assert_eq!(edge1.update_interval, Duration::from_millis(2500));
        assert_eq!(edge1.fetch_timeout, Duration::from_secs(10));
        assert_eq!(edge1.credentials, Some(Credentials::new("admin", "admin")));
        assert_eq!(edge1.sinks, vec!["graylog", "local"]);

        let edge2 = &config.servers["edge-2"];
        assert_eq!(edge2.update_interval, Duration::from_secs(10));
        assert!(edge2.credentials.is_none());
    }

    #[test]
    fn logging_defaults_when_section_missing() {
        let config: Config = r#"
[sinks.local]
type = "logfile"
path = "/tmp/x.tsv"

[servers.a]
endpoint = "http://a/stats;csv"
update-interval = 5
sinks = ["local"]
"#
        .parse()
        .unwrap();
        assert_eq!(config.logging, LoggingConfig::default());
        assert_eq!(config.servers["a"].update_interval, Duration::from_secs(5));
    }

    #[test]
    fn missing_sections_are_rejected() {
        let problems = problems("");
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn undefined_sink_reference_is_rejected() {
        let problems = problems(
            r#"
[sinks.local]
type = "logfile"
path = "/tmp/x.tsv"

[servers.a]
endpoint = "http://a/stats;csv"
sinks = ["local", "graylog"]
"#,
        );
        assert_eq!(problems, vec!["server \"a\" refers to unrecognised sink \"graylog\""]);
    }

    #[test]
    fn unknown_sink_type_is_rejected() {
        let problems = problems(
            r#"
[sinks.statsd]
type = "statsd"

[servers.a]
endpoint = "http://a/stats;csv"
sinks = ["statsd"]
"#,
        );
        assert!(problems[0].contains("unrecognised sink type: statsd"));
        // The dangling reference is reported too.
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn missing_sink_fields_are_rejected() {
        let problems = problems(
            r#"
[sinks.graylog]
type = "gelf"
host = "graylog.local"

[servers.a]
endpoint = "http://a/stats;csv"
sinks = ["graylog"]
"#,
        );
        assert!(problems[0].starts_with("invalid gelf sink \"graylog\""));
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let problems = problems(
            r#"
[sinks.graylog]
type = "gelf"
host = "graylog.local"
port = 70000
facility = "x"

[servers.a]
endpoint = "http://a/stats;csv"
sinks = ["graylog"]
"#,
        );
        assert_eq!(problems, vec!["invalid port 70000 for sink \"graylog\""]);
    }

    #[test]
    fn all_server_problems_are_reported_together() {
        let problems = problems(
            r#"
[logging]
level = "loud"

[sinks.local]
type = "logfile"
path = "/tmp/x.tsv"

[servers.a]
endpoint = "ftp://a/stats"
username = "admin"
update-interval = -1.0
fetch-timeout = 0.0
sinks = []
"#,
        );
        assert_eq!(problems.len(), 6, "{problems:#?}");
        assert!(problems.contains(&"invalid logging level: loud".to_string()));
        assert!(problems.contains(&"missing password for server \"a\"".to_string()));
    }

    #[test]
    fn huge_or_infinite_intervals_are_rejected() {
        let problems = problems(
            r#"
[sinks.local]
type = "logfile"
path = "/tmp/x.tsv"

[servers.a]
endpoint = "http://a/stats;csv"
update-interval = 1e20
fetch-timeout = inf
sinks = ["local"]
"#,
        );
        assert_eq!(problems.len(), 2, "{problems:#?}");
        assert!(problems[0].starts_with("field \"update-interval\" for server \"a\""));
        assert!(problems[1].starts_with("field \"fetch-timeout\" for server \"a\""));
    }

    #[test]
    fn syntax_errors_are_reported() {
        let err = "[servers".parse::<Config>().unwrap_err();
        assert!(matches!(err, ConfigError::Syntax(_)));
    }

    #[test]
    fn from_file_reads_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessionmon.toml");
        std::fs::write(&path, FULL).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.servers.len(), 2);

        let missing = Config::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }

    #[test]
    fn log_level_aliases() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("critical".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert!("verbose".parse::<LogLevel>().is_err());
    }
}
