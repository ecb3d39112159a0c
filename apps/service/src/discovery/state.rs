use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PORT_SSH: u16 = 22;
pub const PORT_RDP: u16 = 3389;
pub const PORT_VNC: u16 = 5900;
pub const PORT_HTTP: u16 = 80;
pub const PORT_HTTPS: u16 = 443;

/// Which step of the liveness chain answered first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessMethod {
    Arp,
    Icmp,
    Tcp,
}

impl fmt::Display for LivenessMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LivenessMethod::Arp => "arp",
            LivenessMethod::Icmp => "icmp",
            LivenessMethod::Tcp => "tcp",
        };
        f.write_str(name)
    }
}

/// A live host found by a scan. Only ever held in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredHost {
    pub ip: IpAddr,
    /// Reverse DNS name, or the address itself when resolution failed
    pub hostname: String,
    pub mac_address: Option<String>,
    pub vendor: Option<String>,
    pub has_ssh: bool,
    pub has_rdp: bool,
    pub has_vnc: bool,
    pub has_http: bool,
    pub has_https: bool,
    pub has_snmp: bool,
    pub snmp_descr: Option<String>,
    pub detected_by: LivenessMethod,
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveredHost {
    pub fn new(ip: IpAddr, detected_by: LivenessMethod) -> Self {
        Self {
            ip,
            hostname: String::new(),
            mac_address: None,
            vendor: None,
            has_ssh: false,
            has_rdp: false,
            has_vnc: false,
            has_http: false,
            has_https: false,
            has_snmp: false,
            snmp_descr: None,
            detected_by,
            discovered_at: Utc::now(),
        }
    }

    /// First open capability port, in ssh, rdp, vnc, http, https order.
    pub fn first_open_port(&self) -> Option<u16> {
        [
            (self.has_ssh, PORT_SSH),
            (self.has_rdp, PORT_RDP),
            (self.has_vnc, PORT_VNC),
            (self.has_http, PORT_HTTP),
            (self.has_https, PORT_HTTPS),
        ]
        .into_iter()
        .find_map(|(open, port)| open.then_some(port))
    }
}

/// Process-wide scan state. `is_scanning` is the only mutual exclusion
/// between scans.
#[derive(Debug, Clone, Default)]
pub struct ScanState {
    pub is_scanning: bool,
    pub progress: usize,
    pub total: usize,
    pub results: Vec<DiscoveredHost>,
    pub last_scan_time: Option<DateTime<Utc>>,
}

impl ScanState {
    pub fn status(&self) -> ScanStatus {
        ScanStatus {
            is_scanning: self.is_scanning,
            progress: self.progress,
            total: self.total,
            result_count: self.results.len(),
            last_scan_time: self.last_scan_time,
        }
    }
}

/// Summary returned by the status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStatus {
    pub is_scanning: bool,
    pub progress: usize,
    pub total: usize,
    pub result_count: usize,
    pub last_scan_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_first_open_port_order() {
        let mut host = DiscoveredHost::new(IpAddr::V4(Ipv4Addr::LOCALHOST), LivenessMethod::Tcp);
        assert_eq!(host.first_open_port(), None);

        host.has_https = true;
        assert_eq!(host.first_open_port(), Some(443));
        host.has_vnc = true;
        assert_eq!(host.first_open_port(), Some(5900));
        host.has_ssh = true;
        assert_eq!(host.first_open_port(), Some(22));
    }

    #[test]
    fn test_liveness_method_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&LivenessMethod::Icmp).unwrap(), "\"icmp\"");
        assert_eq!(LivenessMethod::Arp.to_string(), "arp");
    }
}
