//! HAProxy stats CSV parsing.

use csv::{ReaderBuilder, StringRecord, Trim};
use sessionmon_core::Metric;

const COL_PXNAME: &str = "# pxname";
const COL_SVNAME: &str = "svname";
const COL_RATE: &str = "rate";
const COL_QCUR: &str = "qcur";
const COL_ACT: &str = "act";
const COL_HRSP_4XX: &str = "hrsp_4xx";
const COL_HRSP_5XX: &str = "hrsp_5xx";

/// The `svname` of a proxy's aggregate row.
const BACKEND_ROW: &str = "BACKEND";

/// Column positions resolved from the header row.
#[derive(Debug)]
struct Columns {
    pxname: usize,
    svname: usize,
    rate: usize,
    qcur: Option<usize>,
    act: Option<usize>,
    hrsp_4xx: Option<usize>,
    hrsp_5xx: Option<usize>,
}

impl Columns {
    /// Returns `None` unless all of the required columns are present.
    fn locate(headers: &StringRecord) -> Option<Self> {
        let find = |name: &str| headers.iter().position(|h| h == name);
        Some(Self {
            pxname: find(COL_PXNAME)?,
            svname: find(COL_SVNAME)?,
            rate: find(COL_RATE)?,
            qcur: find(COL_QCUR),
            act: find(COL_ACT),
            hrsp_4xx: find(COL_HRSP_4XX),
            hrsp_5xx: find(COL_HRSP_5XX),
        })
    }

    fn to_metric(&self, row: &StringRecord, server_id: &str, endpoint: &str) -> Option<Metric> {
        if row.get(self.svname)? != BACKEND_ROW {
            return None;
        }
        let backend_name = row.get(self.pxname)?;
        let sessions = row.get(self.rate)?.parse::<u64>().ok()?;

        let optional = |col: Option<usize>| {
            col.and_then(|i| row.get(i))
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
        };

        Some(Metric {
            server_id: server_id.to_string(),
            endpoint: endpoint.to_string(),
            backend_name: backend_name.to_string(),
            sessions,
            queued_sessions: optional(self.qcur),
            active_backends: optional(self.act),
            http_4xx: optional(self.hrsp_4xx),
            http_5xx: optional(self.hrsp_5xx),
        })
    }
}

/// Turn a stats CSV report into one [`Metric`] per backend pool.
///
/// A row becomes a metric iff the header carries `# pxname`, `svname` and
/// `rate`, the row's `svname` is `BACKEND` and its `rate` is an integer.
/// Everything else (frontends, individual servers, short or malformed
/// records) is skipped. `server_id` and `endpoint` come from the caller.
pub fn parse_stats_csv(server_id: &str, endpoint: &str, body: &str) -> Vec<Metric> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(body.as_bytes());

    let Ok(headers) = reader.headers().cloned() else {
        return Vec::new();
    };
    let Some(columns) = Columns::locate(&headers) else {
        return Vec::new();
    };

    reader
        .records()
        .filter_map(Result::ok)
        .filter_map(|row| columns.to_metric(&row, server_id, endpoint))
        .collect()
}
