/// Monitoring engine
///
/// - `checker`/`probe`: one reachability check per service kind
/// - `stats`: best-effort CPU/RAM/disk sampling over SSH or SNMP
/// - `drift`/`healer`: content drift and rate-limited remediation
/// - `pipeline`: the per-service check cycle and a full tick
/// - `scheduler`: the background worker driving ticks
pub mod checker;
pub mod drift;
pub mod healer;
pub mod pipeline;
pub mod probe;
pub mod scheduler;
pub mod stats;
pub mod types;


pub use healer::{AutoHealer, HealOutcome};
pub use pipeline::{ServiceMonitor, TickSummary};
pub use probe::ProtocolProbe;
pub use scheduler::MonitoringScheduler;
pub use stats::ResourceStatsCollector;
pub use types::{CheckKind, CheckReport, ProbeOutcome, ResourceStats, ServiceStatus};
