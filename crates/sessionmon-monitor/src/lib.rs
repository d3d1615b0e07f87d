//! sessionmon-monitor — the polling-and-forwarding pipeline.
//!
//! # Architecture
//!
//! ```text
//! Supervisor
//!   ├── sinks: id → Arc<dyn StatsSink>   (built once, shared)
//!   └── one task per ServerMonitor
//!         loop {
//!             StatsSource::fetch() → Vec<Metric>
//!             track_stats()        → store_stats() on each sink, in order
//!             sleep(update_interval) or stop()
//!         }
//! ```
//!
//! Monitors share nothing but sinks. Shutdown is cooperative: an
//! in-flight fetch finishes, then the loop observes the stop flag.

pub mod monitor;
pub mod supervisor;

pub use monitor::ServerMonitor;
pub use supervisor::Supervisor;
