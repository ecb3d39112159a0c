use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Strategy used to decide whether a service is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Tcp,
    Http,
    Icmp,
    Script,
    Snmp,
}

impl CheckKind {
    pub const ALL: [CheckKind; 5] =
        [CheckKind::Tcp, CheckKind::Http, CheckKind::Icmp, CheckKind::Script, CheckKind::Snmp];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Tcp => "tcp",
            CheckKind::Http => "http",
            CheckKind::Icmp => "icmp",
            CheckKind::Script => "script",
            CheckKind::Snmp => "snmp",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CheckKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("unknown check kind: {s}"))
    }
}

/// Binary service state. A service that was never checked counts as down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    Up,
    Down,
}

impl ServiceStatus {
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable { ServiceStatus::Up } else { ServiceStatus::Down }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Up => write!(f, "UP"),
            ServiceStatus::Down => write!(f, "DOWN"),
        }
    }
}

/// Result of exactly one protocol probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub reachable: bool,
    pub elapsed_ms: u64,
    /// Banner, response body, script output or a diagnostic on failure.
    pub content: String,
    /// SNMP sysDescr, only set by snmp checks.
    pub sys_descr: Option<String>,
}

impl ProbeOutcome {
    pub fn success(content: impl Into<String>) -> Self {
        Self { reachable: true, elapsed_ms: 0, content: content.into(), sys_descr: None }
    }

    pub fn failure(diagnostic: impl Into<String>) -> Self {
        Self { reachable: false, elapsed_ms: 0, content: diagnostic.into(), sys_descr: None }
    }

    /// Reachability decided by the checker itself (HTTP status, exit code).
    pub fn with_reachable(reachable: bool, content: impl Into<String>) -> Self {
        Self { reachable, elapsed_ms: 0, content: content.into(), sys_descr: None }
    }

    pub fn with_sys_descr(mut self, sys_descr: impl Into<String>) -> Self {
        self.sys_descr = Some(sys_descr.into());
        self
    }

    pub fn with_elapsed(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }
}

/// CPU/RAM/disk usage in percent. `None` means unknown, never zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceStats {
    pub cpu: Option<f64>,
    pub ram: Option<f64>,
    pub disk: Option<f64>,
}

impl ResourceStats {
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.ram.is_none() && self.disk.is_none()
    }
}

/// What one pass of the per-service pipeline produced.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub service_id: i64,
    pub outcome: ProbeOutcome,
    pub stats: ResourceStats,
    pub drift_detected: bool,
    pub status: ServiceStatus,
    pub status_changed: bool,
    pub healed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_kind_round_trips_through_str() {
        for kind in CheckKind::ALL {
            assert_eq!(kind.as_str().parse::<CheckKind>().unwrap(), kind);
        }
        assert_eq!("HTTP".parse::<CheckKind>().unwrap(), CheckKind::Http);
        assert!("ftp".parse::<CheckKind>().is_err());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ServiceStatus::from_reachable(true).to_string(), "UP");
        assert_eq!(ServiceStatus::from_reachable(false).to_string(), "DOWN");
    }

    #[test]
    fn test_empty_stats_are_unknown_not_zero() {
        let stats = ResourceStats::default();
        assert!(stats.is_empty());
        assert_eq!(stats.cpu, None);

        let partial = ResourceStats { disk: Some(0.0), ..Default::default() };
        assert!(!partial.is_empty());
    }
}
