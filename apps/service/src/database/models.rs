use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::discovery::DiscoveredHost;
use crate::monitoring::types::{CheckKind, ResourceStats};

pub const DEFAULT_CHECK_INTERVAL: u64 = 60;
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_SNMP_PORT: u16 = 161;
pub const DEFAULT_SNMP_COMMUNITY: &str = "public";

/// Service model - one monitored endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// Row id, ignored on insert
    pub id: i64,
    pub name: String,
    pub ip: String,
    pub hostname: Option<String>,
    pub port: Option<u16>,

    pub mac_address: Option<String>,
    pub vendor: Option<String>,

    pub ssh_username: Option<String>,
    /// Encrypted with the secret store, never plaintext
    pub ssh_password: Option<String>,
    pub ssh_port: u16,

    pub check_type: CheckKind,
    pub check_target: Option<String>,
    pub script_content: Option<String>,
    pub expected_response: Option<String>,
    pub check_interval: u64,

    pub snmp_community: String,
    pub snmp_port: u16,
    pub sys_descr: Option<String>,

    pub is_active: bool,
    pub maintenance: bool,
    pub enabled: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub response_time_ms: Option<i64>,
    pub drift_detected: bool,

    pub cpu_usage: Option<f64>,
    pub ram_usage: Option<f64>,
    pub disk_usage: Option<f64>,

    pub auto_restart: bool,
    pub restart_command: Option<String>,
    pub last_healed: Option<DateTime<Utc>>,
}

impl Service {
    /// Create a new, never-checked service
    pub fn new(name: impl Into<String>, ip: impl Into<String>, check_type: CheckKind) -> Self {
        Self {
            id: 0,
            name: name.into(),
            ip: ip.into(),
            hostname: None,
            port: None,
            mac_address: None,
            vendor: None,
            ssh_username: None,
            ssh_password: None,
            ssh_port: DEFAULT_SSH_PORT,
            check_type,
            check_target: None,
            script_content: None,
            expected_response: None,
            check_interval: DEFAULT_CHECK_INTERVAL,
            snmp_community: DEFAULT_SNMP_COMMUNITY.to_string(),
            snmp_port: DEFAULT_SNMP_PORT,
            sys_descr: None,
            is_active: false,
            maintenance: false,
            enabled: true,
            last_checked: None,
            response_time_ms: None,
            drift_detected: false,
            cpu_usage: None,
            ram_usage: None,
            disk_usage: None,
            auto_restart: false,
            restart_command: None,
            last_healed: None,
        }
    }

    /// Promote a discovery hit into a service record.
    ///
    /// The check is a TCP connect on the first open capability port; hosts
    /// with none fall back to an ICMP check.
    pub fn from_discovered(host: &DiscoveredHost) -> Self {
        let name = if host.hostname.is_empty() { host.ip.to_string() } else { host.hostname.clone() };
        let port = host.first_open_port();
        let check_type = if port.is_some() { CheckKind::Tcp } else { CheckKind::Icmp };

        let mut service = Service::new(name, host.ip.to_string(), check_type);
        service.hostname = Some(host.hostname.clone()).filter(|h| !h.is_empty());
        service.port = port;
        service.mac_address = host.mac_address.clone();
        service.vendor = host.vendor.clone();
        service.sys_descr = host.snmp_descr.clone();
        service
    }

    pub fn has_ssh_credentials(&self) -> bool {
        let filled = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());
        filled(&self.ssh_username) && filled(&self.ssh_password)
    }

    /// Whether `check_interval` has elapsed since the last check.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_checked {
            None => true,
            Some(last) => (now - last).num_seconds() >= self.check_interval as i64,
        }
    }

    pub fn telemetry(&self) -> ResourceStats {
        ResourceStats { cpu: self.cpu_usage, ram: self.ram_usage, disk: self.disk_usage }
    }
}

/// Immutable history row, one per completed check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHistory {
    pub id: Option<i64>,
    pub service_id: i64,
    pub is_active: bool,
    pub latency_ms: i64,
    pub cpu_usage: Option<f64>,
    pub ram_usage: Option<f64>,
    pub disk_usage: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Everything one check cycle writes, applied in a single transaction
#[derive(Debug, Clone, PartialEq)]
pub struct CheckRecord {
    pub service_id: i64,
    pub is_active: bool,
    pub response_time_ms: i64,
    pub checked_at: DateTime<Utc>,
    pub drift_detected: bool,
    pub sys_descr: Option<String>,
    pub telemetry: ResourceStats,
}

impl CheckRecord {
    pub fn history(&self) -> ServiceHistory {
        ServiceHistory {
            id: None,
            service_id: self.service_id,
            is_active: self.is_active,
            latency_ms: self.response_time_ms,
            cpu_usage: self.telemetry.cpu,
            ram_usage: self.telemetry.ram,
            disk_usage: self.telemetry.disk,
            timestamp: self.checked_at,
        }
    }
}

/// Outbound webhook subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: Option<i64>,
    pub name: String,
    pub url: String,
    pub secret: Option<String>,
    /// Event names, `all` matches everything
    pub events: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Webhook {
    pub fn new(name: impl Into<String>, url: impl Into<String>, events: Vec<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            url: url.into(),
            secret: None,
            events,
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.active && self.events.iter().any(|e| e == event_type || e == "all")
    }
}

/// One received trap. `service_id` links it to the monitored service with
/// the same address, when there is one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnmpTrap {
    pub id: Option<i64>,
    pub service_id: Option<i64>,
    pub source_ip: String,
    pub oid: String,
    pub value: String,
    /// `oid = value` pairs joined with `; `
    pub varbinds: String,
    pub timestamp: DateTime<Utc>,
}

/// Convert DateTime to Unix milliseconds
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert Unix milliseconds to DateTime
pub fn i64_to_timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
