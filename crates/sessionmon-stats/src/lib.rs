//! sessionmon-stats — pulls session statistics out of HAProxy.
//!
//! ```text
//! StatsClient::fetch(StatsTarget)
//!   ├── GET <endpoint> (http or https, optional Basic auth, deadline)
//!   ├── non-200 → logged, empty batch
//!   └── 200 → parse_stats_csv() → Vec<Metric>
//! ```
//!
//! Only the aggregate `BACKEND` row of each proxy is turned into a metric;
//! rows that do not fit are dropped without failing the poll.

pub mod client;
pub mod parser;

pub use client::{FetchError, FetchFuture, StatsClient, StatsSource, StatsTarget};
pub use parser::parse_stats_csv;
