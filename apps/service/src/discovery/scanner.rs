use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::liveness::{COMMON_PORTS, any_port_open, arp_lookup, ping_host, port_open, reverse_dns};
use super::state::{
    DiscoveredHost, LivenessMethod, PORT_HTTP, PORT_HTTPS, PORT_RDP, PORT_SSH, PORT_VNC, ScanState,
    ScanStatus,
};
use super::targets::{expand_targets, local_subnet};
use super::vendor::VendorLookup;
use crate::config::DiscoveryConfig;
use crate::database::Database;
use crate::database::models::{DEFAULT_SNMP_COMMUNITY, DEFAULT_SNMP_PORT};
use crate::snmp::{OID_SYS_DESCR, SnmpClient, SnmpTarget};

/// Settings key holding the default scan ranges as a JSON array.
pub const SCAN_SUBNETS_SETTING: &str = "scan_subnets";

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("a scan is already in progress")]
    AlreadyRunning,
    #[error("no async runtime available to run the scan")]
    NoRuntime,
    #[error("failed to load default scan ranges: {0}")]
    Settings(String),
}

/// Detection for a single address. `None` means the host is not alive.
#[async_trait]
pub trait HostProbe: Send + Sync {
    async fn detect(&self, ip: IpAddr) -> Option<DiscoveredHost>;
}

/// ARP, then ICMP, then a common-port sweep; on success the host is
/// characterised with reverse DNS, vendor, capability ports and SNMP.
pub struct NetworkHostProbe {
    vendors: Arc<dyn VendorLookup>,
    snmp: Option<Arc<dyn SnmpClient>>,
    ping_timeout: Duration,
    ping_attempts: u32,
    port_timeout: Duration,
    dns_timeout: Duration,
    snmp_timeout: Duration,
}

impl NetworkHostProbe {
    pub fn new(
        config: &DiscoveryConfig,
        vendors: Arc<dyn VendorLookup>,
        snmp: Option<Arc<dyn SnmpClient>>,
    ) -> Self {
        Self {
            vendors,
            snmp,
            ping_timeout: Duration::from_millis(config.ping_timeout_ms),
            ping_attempts: config.ping_attempts,
            port_timeout: Duration::from_millis(config.port_timeout_ms),
            dns_timeout: Duration::from_millis(config.dns_timeout_ms),
            snmp_timeout: Duration::from_millis(config.snmp_timeout_ms),
        }
    }

    async fn liveness(&self, ip: IpAddr, mac: Option<&str>) -> Option<LivenessMethod> {
        if mac.is_some() {
            return Some(LivenessMethod::Arp);
        }
        if ping_host(ip, self.ping_attempts, self.ping_timeout).await {
            return Some(LivenessMethod::Icmp);
        }
        if any_port_open(ip, &COMMON_PORTS, self.port_timeout).await {
            return Some(LivenessMethod::Tcp);
        }
        None
    }

    async fn snmp_descr(&self, ip: IpAddr) -> Option<String> {
        let client = self.snmp.clone()?;
        let target = SnmpTarget {
            host: ip.to_string(),
            port: DEFAULT_SNMP_PORT,
            community: DEFAULT_SNMP_COMMUNITY.to_string(),
        };
        let timeout = self.snmp_timeout;

        let values = tokio::task::spawn_blocking(move || client.get(&target, &[OID_SYS_DESCR], timeout))
            .await
            .ok()?
            .ok()?;
        values.first().map(|value| value.to_string())
    }
}

#[async_trait]
impl HostProbe for NetworkHostProbe {
    async fn detect(&self, ip: IpAddr) -> Option<DiscoveredHost> {
        let mut mac = arp_lookup(ip).await;
        let detected_by = self.liveness(ip, mac.as_deref()).await?;

        let mut host = DiscoveredHost::new(ip, detected_by);
        host.hostname = reverse_dns(ip, self.dns_timeout).await.unwrap_or_else(|| ip.to_string());

        // A ping or connect usually populates the ARP cache
        if mac.is_none() {
            mac = arp_lookup(ip).await;
        }
        host.vendor = mac.as_deref().and_then(|mac| self.vendors.lookup_vendor(mac));
        host.mac_address = mac;

        let wait = self.port_timeout;
        (host.has_ssh, host.has_rdp, host.has_vnc, host.has_http, host.has_https) = tokio::join!(
            port_open(ip, PORT_SSH, wait),
            port_open(ip, PORT_RDP, wait),
            port_open(ip, PORT_VNC, wait),
            port_open(ip, PORT_HTTP, wait),
            port_open(ip, PORT_HTTPS, wait),
        );

        host.snmp_descr = self.snmp_descr(ip).await;
        host.has_snmp = host.snmp_descr.is_some();
        Some(host)
    }
}

/// Clears `is_scanning` and stamps the scan on every exit path.
struct ScanGuard {
    state: Arc<Mutex<ScanState>>,
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.is_scanning = false;
        state.progress = state.total;
        state.last_scan_time = Some(Utc::now());
        tracing::info!(found = state.results.len(), scanned = state.total, "scan complete");
    }
}

#[derive(Debug, Clone, Copy)]
struct ScanSettings {
    max_concurrent: usize,
    batch_size: usize,
    max_targets: usize,
}

/// Network discovery scanner. Cloning shares the same scan state.
#[derive(Clone)]
pub struct DiscoveryScanner {
    state: Arc<Mutex<ScanState>>,
    probe: Arc<dyn HostProbe>,
    db: Option<Arc<dyn Database>>,
    settings: ScanSettings,
}

impl DiscoveryScanner {
    pub fn new(probe: Arc<dyn HostProbe>, config: &DiscoveryConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScanState::default())),
            probe,
            db: None,
            settings: ScanSettings {
                max_concurrent: config.max_concurrent.max(1),
                batch_size: config.batch_size.max(1),
                max_targets: config.max_targets,
            },
        }
    }

    /// Read default ranges from the `scan_subnets` setting.
    pub fn with_database(mut self, db: Arc<dyn Database>) -> Self {
        self.db = Some(db);
        self
    }

    pub fn status(&self) -> ScanStatus {
        self.state.lock().status()
    }

    /// Hosts found by the current or most recent scan.
    pub fn results(&self) -> Vec<DiscoveredHost> {
        self.state.lock().results.clone()
    }

    fn begin(&self) -> Result<ScanGuard, ScanError> {
        let mut state = self.state.lock();
        if state.is_scanning {
            tracing::warn!("scan already in progress, rejecting request");
            return Err(ScanError::AlreadyRunning);
        }
        *state = ScanState { is_scanning: true, ..ScanState::default() };
        Ok(ScanGuard { state: self.state.clone() })
    }

    /// Start a scan in the background and return immediately.
    pub fn start_scan(&self, cidrs: Vec<String>) -> Result<(), ScanError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| ScanError::NoRuntime)?;
        let guard = self.begin()?;
        let scanner = self.clone();

        handle.spawn(async move {
            if let Err(e) = scanner.run(guard, cidrs).await {
                tracing::error!(error = %e, "scan aborted");
            }
        });
        Ok(())
    }

    /// Run a scan to completion and return what it found.
    pub async fn scan_network(&self, cidrs: Vec<String>) -> Result<Vec<DiscoveredHost>, ScanError> {
        let guard = self.begin()?;
        self.run(guard, cidrs).await
    }

    async fn default_ranges(&self) -> Result<Vec<String>, ScanError> {
        if let Some(db) = &self.db {
            let stored = db
                .get_setting(SCAN_SUBNETS_SETTING)
                .await
                .map_err(|e| ScanError::Settings(format!("{e:#}")))?;

            if let Some(raw) = stored {
                match serde_json::from_str::<Vec<String>>(&raw) {
                    Ok(ranges) if !ranges.is_empty() => {
                        tracing::info!(?ranges, "scanning configured subnets");
                        return Ok(ranges);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "ignoring malformed scan_subnets setting"),
                }
            }
        }
        Ok(vec![local_subnet()])
    }

    async fn run(&self, guard: ScanGuard, cidrs: Vec<String>) -> Result<Vec<DiscoveredHost>, ScanError> {
        let cidrs = if cidrs.is_empty() { self.default_ranges().await? } else { cidrs };
        let targets = expand_targets(&cidrs, self.settings.max_targets);
        let total = targets.len();
        self.state.lock().total = total;
        tracing::info!(total, ranges = ?cidrs, "starting network scan");

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent));
        let mut tasks = JoinSet::new();
        for ip in targets {
            let probe = self.probe.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                probe.detect(ip).await
            });
        }

        let batch_size = self.settings.batch_size;
        let mut completed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            completed += 1;
            let mut state = self.state.lock();
            state.progress = completed;

            match joined {
                Ok(Some(host)) => {
                    tracing::info!(ip = %host.ip, hostname = %host.hostname, detected_by = %host.detected_by, "found device");
                    state.results.push(host);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "host probe task failed"),
            }

            if completed % batch_size == 0 || completed == total {
                tracing::debug!(
                    batch = completed.div_ceil(batch_size),
                    batches = total.div_ceil(batch_size),
                    progress = completed,
                    total,
                    found = state.results.len(),
                    "scan progress"
                );
            }
        }

        let results = {
            let mut state = self.state.lock();
            state.results.sort_by_key(|host| host.ip);
            state.results.clone()
        };
        drop(guard);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::create_test_database;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    /// Marks a fixed set of addresses alive and records every probe.
    #[derive(Default)]
    struct FakeProbe {
        alive: StdMutex<HashSet<IpAddr>>,
        probed: StdMutex<Vec<IpAddr>>,
        gate: Option<Arc<Notify>>,
    }

    impl FakeProbe {
        fn alive(addrs: &[&str]) -> Self {
            let probe = Self::default();
            probe.set_alive(addrs);
            probe
        }

        fn set_alive(&self, addrs: &[&str]) {
            *self.alive.lock().unwrap() = addrs.iter().map(|a| a.parse().unwrap()).collect();
        }
    }

    #[async_trait]
    impl HostProbe for FakeProbe {
        async fn detect(&self, ip: IpAddr) -> Option<DiscoveredHost> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.probed.lock().unwrap().push(ip);
            self.alive.lock().unwrap().contains(&ip).then(|| DiscoveredHost::new(ip, LivenessMethod::Icmp))
        }
    }

    fn ranges(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    async fn wait_idle(scanner: &DiscoveryScanner) {
        for _ in 0..200 {
            if !scanner.status().is_scanning {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("scan did not finish");
    }

    #[tokio::test]
    async fn test_slash_30_scans_two_hosts() {
        let probe = Arc::new(FakeProbe::alive(&["192.168.1.1", "192.168.1.2"]));
        let scanner = DiscoveryScanner::new(probe.clone(), &DiscoveryConfig::default());

        let found = scanner.scan_network(ranges(&["192.168.1.0/30"])).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(probe.probed.lock().unwrap().len(), 2);

        let status = scanner.status();
        assert!(!status.is_scanning);
        assert_eq!(status.total, 2);
        assert_eq!(status.progress, 2);
        assert_eq!(status.result_count, 2);
        assert!(status.last_scan_time.is_some());
    }

    #[tokio::test]
    async fn test_dead_hosts_leave_no_record() {
        let probe = Arc::new(FakeProbe::alive(&["10.9.0.3"]));
        let scanner = DiscoveryScanner::new(probe, &DiscoveryConfig::default());

        let found = scanner.scan_network(ranges(&["10.9.0.0/29"])).await.unwrap();
        assert_eq!(found.iter().map(|h| h.ip.to_string()).collect::<Vec<_>>(), vec!["10.9.0.3"]);
        assert_eq!(scanner.status().progress, 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_scan_is_rejected_while_in_flight() {
        let gate = Arc::new(Notify::new());
        let probe = Arc::new(FakeProbe { gate: Some(gate.clone()), ..FakeProbe::alive(&["192.168.5.1"]) });
        let scanner = DiscoveryScanner::new(probe, &DiscoveryConfig::default());

        scanner.start_scan(ranges(&["192.168.5.0/30"])).unwrap();
        assert!(scanner.status().is_scanning);

        let before = scanner.status();
        assert!(matches!(
            scanner.start_scan(ranges(&["10.0.0.0/24"])),
            Err(ScanError::AlreadyRunning)
        ));
        assert!(matches!(
            scanner.scan_network(ranges(&["10.0.0.0/24"])).await,
            Err(ScanError::AlreadyRunning)
        ));
        let after = scanner.status();
        assert!(after.is_scanning);
        assert_eq!(before.result_count, after.result_count);

        for _ in 0..100 {
            gate.notify_waiters();
            if !scanner.status().is_scanning {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        wait_idle(&scanner).await;

        let status = scanner.status();
        assert_eq!(status.total, 2);
        assert_eq!(status.result_count, 1);
    }

    #[tokio::test]
    async fn test_rescan_replaces_results() {
        let probe = Arc::new(FakeProbe::alive(&["10.0.0.1", "10.0.0.2", "10.0.0.5"]));
        let scanner = DiscoveryScanner::new(probe.clone(), &DiscoveryConfig::default());

        assert_eq!(scanner.scan_network(ranges(&["10.0.0.0/29"])).await.unwrap().len(), 3);

        probe.set_alive(&["10.0.0.2"]);
        let second = scanner.scan_network(ranges(&["10.0.0.0/29"])).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(scanner.results().len(), 1);
        assert_eq!(scanner.status().result_count, 1);
    }

    #[tokio::test]
    async fn test_default_ranges_come_from_settings() {
        let (db, _dir) = create_test_database().await.unwrap();
        db.set_setting(SCAN_SUBNETS_SETTING, r#"["172.20.0.0/30"]"#).await.unwrap();

        let probe = Arc::new(FakeProbe::alive(&["172.20.0.1"]));
        let scanner = DiscoveryScanner::new(probe.clone(), &DiscoveryConfig::default()).with_database(db);

        let found = scanner.scan_network(Vec::new()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(scanner.status().total, 2);
    }

    #[tokio::test]
    async fn test_unparsable_ranges_do_not_stop_the_scan() {
        let probe = Arc::new(FakeProbe::alive(&["10.3.0.1"]));
        let scanner = DiscoveryScanner::new(probe, &DiscoveryConfig::default());

        let found = scanner.scan_network(ranges(&["nonsense", "10.3.0.0/30"])).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(!scanner.status().is_scanning);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        struct CountingProbe {
            in_flight: std::sync::atomic::AtomicUsize,
            peak: std::sync::atomic::AtomicUsize,
        }

        #[async_trait]
        impl HostProbe for CountingProbe {
            async fn detect(&self, _ip: IpAddr) -> Option<DiscoveredHost> {
                use std::sync::atomic::Ordering;
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                None
            }
        }

        let probe = Arc::new(CountingProbe { in_flight: 0.into(), peak: 0.into() });
        let config = DiscoveryConfig { max_concurrent: 4, batch_size: 10, ..DiscoveryConfig::default() };
        let scanner = DiscoveryScanner::new(probe.clone(), &config);

        scanner.scan_network(ranges(&["10.4.0.0/27"])).await.unwrap();
        assert!(probe.peak.load(std::sync::atomic::Ordering::SeqCst) <= 4);
        assert_eq!(scanner.status().progress, 30);
    }
}
