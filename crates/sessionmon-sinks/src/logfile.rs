//! Log-file sink — appends tab-separated lines to a local file.

use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use sessionmon_core::{Metric, SinkKind};

use crate::{SinkError, SinkFuture, StatsSink};

const HEADER: &str = "server_id\tendpoint\tbackend\tsessions";

/// Writes one line per metric, prefixed with a timestamp.
pub struct LogfileSink {
    id: String,
    path: PathBuf,
    file: Mutex<Option<File>>,
    span: Span,
}

impl LogfileSink {
    /// Open `path` for appending and write the header line.
    pub fn open(id: &str, path: &Path) -> Result<Self, SinkError> {
        let span = info_span!("sink", id = %id, kind = "logfile");
        let open_err = |source| SinkError::Open {
            path: path.to_path_buf(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(open_err)?;
        file.write_all(format_line(HEADER).as_bytes())
            .map_err(open_err)?;

        info!(parent: &span, path = %path.display(), "log file sink started");
        Ok(Self {
            id: id.to_string(),
            path: path.to_path_buf(),
            file: Mutex::new(Some(file)),
            span,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn store(&self, metrics: &[Metric]) -> usize {
        let mut guard = self.file.lock().await;
        let Some(file) = guard.as_mut() else {
            warn!(count = metrics.len(), "sink is closed, dropping metrics");
            return 0;
        };

        let mut stored = 0;
        for metric in metrics {
            let line = format_line(&format!(
                "{}\t{}\t{}\t{}",
                escape(&metric.server_id),
                escape(&metric.endpoint),
                escape(&metric.backend_name),
                metric.sessions
            ));
            match file.write_all(line.as_bytes()) {
                Ok(()) => stored += 1,
                Err(e) => error!(error = %e, backend = %metric.backend_name, "failed to write metric"),
            }
        }
        if let Err(e) = file.flush() {
            error!(error = %e, "failed to flush log file");
        }

        debug!(stored, "metrics written");
        stored
    }

    async fn shutdown(&self) {
        if let Some(mut file) = self.file.lock().await.take() {
            if let Err(e) = file.flush() {
                error!(error = %e, "failed to flush log file on close");
            }
            debug!("log file sink closed");
        }
    }
}

/// Keep a field on one line and in one column.
fn escape(field: &str) -> Cow<'_, str> {
    if !field.contains(['\t', '\n', '\r']) {
        return Cow::Borrowed(field);
    }
    Cow::Owned(
        field
            .replace('\t', "\\t")
            .replace('\n', "\\n")
            .replace('\r', "\\r"),
    )
}

fn format_line(message: &str) -> String {
    let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
    format!("{now}\t{message}\n")
}

impl StatsSink for LogfileSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Logfile
    }

    fn store_stats<'a>(&'a self, metrics: &'a [Metric]) -> SinkFuture<'a, usize> {
        Box::pin(self.store(metrics).instrument(self.span.clone()))
    }

    fn close(&self) -> SinkFuture<'_, ()> {
        Box::pin(self.shutdown().instrument(self.span.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(n: u64) -> Vec<Metric> {
        (0..n)
            .map(|i| Metric::new("lb1", "http://lb1/stats;csv", format!("pool-{i}"), i * 10))
            .collect()
    }

    #[tokio::test]
    async fn header_then_one_line_per_metric() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.tsv");
        let sink = LogfileSink::open("local", &path).unwrap();
        assert_eq!(sink.path(), path.as_path());

        assert_eq!(sink.store_stats(&metrics(3)).await, 3);
        sink.close().await;

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].ends_with("\tserver_id\tendpoint\tbackend\tsessions"));
        assert!(lines[2].ends_with("\tlb1\thttp://lb1/stats;csv\tpool-1\t10"));
        assert_eq!(lines[3].split('\t').count(), 5);
    }

    #[tokio::test]
    async fn control_characters_in_names_stay_on_one_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.tsv");
        let sink = LogfileSink::open("local", &path).unwrap();

        let odd = Metric::new("lb\t1", "http://lb1/stats;csv", "pool\nwith\r\nbreaks", 7);
        assert_eq!(sink.store_stats(&[odd, metrics(1).remove(0)]).await, 2);
        sink.close().await;

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].split('\t').count(), 5);
        assert!(lines[1].ends_with("\tlb\\t1\thttp://lb1/stats;csv\tpool\\nwith\\r\\nbreaks\t7"));
    }

    #[tokio::test]
    async fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.tsv");

        let first = LogfileSink::open("local", &path).unwrap();
        first.store_stats(&metrics(2)).await;
        first.close().await;

        let second = LogfileSink::open("local", &path).unwrap();
        second.store_stats(&metrics(1)).await;
        second.close().await;

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2 + 1 + 1 + 2);
    }

    #[tokio::test]
    async fn store_after_close_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.tsv");
        let sink = LogfileSink::open("local", &path).unwrap();
        sink.close().await;

        assert_eq!(sink.store_stats(&metrics(2)).await, 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn full_device_fails_to_open() {
        let result = LogfileSink::open("local", Path::new("/dev/full"));
        assert!(matches!(result, Err(SinkError::Open { .. })));
    }
}
