/// Orchestrator - wires the engines to their collaborators
///
/// Builds the database pool, secret store, remote executor, SNMP client and
/// notifier from a `Config`, then hands out the monitoring pipeline, the
/// scheduler and the discovery scanner built on top of them.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::config::Config;
use crate::crypto::{CipherSecretStore, SecretStore};
use crate::database::{Database, DatabaseImpl, Service};
use crate::discovery::{DiscoveredHost, DiscoveryScanner, NetworkHostProbe, OuiTable};
use crate::monitoring::{
    AutoHealer, MonitoringScheduler, ProtocolProbe, ResourceStatsCollector, ServiceMonitor,
};
use crate::notify::{NotificationSink, WebhookNotifier};
use crate::pool::create_pool;
use crate::remote::{RemoteExecutor, SshExecutor};
use crate::snmp;
use crate::traps::TrapReceiver;

pub struct Orchestrator {
    config: Arc<Config>,
    database: Arc<dyn Database>,
    monitor: Arc<ServiceMonitor>,
    scanner: DiscoveryScanner,
}

impl Orchestrator {
    pub async fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        info!(path = %config.database.path, "Opening database...");
        let pool = create_pool(&config.database.path, config.database.max_connections)
            .await
            .with_context(|| format!("failed to open database {}", config.database.path))?;
        let database: Arc<dyn Database> = Arc::new(DatabaseImpl::new_from_pool(pool));

        let secrets: Arc<dyn SecretStore> = Arc::new(CipherSecretStore::new(&config.master_key()));
        let remote: Arc<dyn RemoteExecutor> = Arc::new(SshExecutor::new());
        let snmp_client = snmp::default_client();
        if snmp_client.is_none() {
            info!("SNMP support not compiled in, snmp checks will report unreachable");
        }

        let notifier: Arc<dyn NotificationSink> = Arc::new(WebhookNotifier::new(
            database.clone(),
            Duration::from_millis(config.notifications.webhook_timeout_ms),
        )?);

        let monitor = Arc::new(ServiceMonitor::new(
            database.clone(),
            ProtocolProbe::new(&config.monitor, snmp_client.clone())?,
            ResourceStatsCollector::new(remote.clone(), snmp_client.clone(), secrets.clone(), &config.monitor),
            AutoHealer::new(remote, secrets, &config.monitor),
            notifier,
        ));

        let vendors = Arc::new(OuiTable::load(config.discovery.vendor_file.as_deref()));
        let probe = Arc::new(NetworkHostProbe::new(&config.discovery, vendors, snmp_client));
        let scanner = DiscoveryScanner::new(probe, &config.discovery).with_database(database.clone());

        Ok(Self { config, database, monitor, scanner })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> Arc<dyn Database> {
        self.database.clone()
    }

    pub fn monitor(&self) -> Arc<ServiceMonitor> {
        self.monitor.clone()
    }

    pub fn scanner(&self) -> &DiscoveryScanner {
        &self.scanner
    }

    pub fn scheduler(&self) -> MonitoringScheduler {
        MonitoringScheduler::new(self.monitor.clone(), self.config.monitor.tick())
    }

    /// Trap receiver on the configured address.
    pub async fn trap_receiver(&self) -> Result<TrapReceiver> {
        TrapReceiver::bind(&self.config.traps.bind, self.database.clone()).await
    }

    /// Run the scheduler, and the trap receiver when enabled, until Ctrl-C.
    /// The scheduler finishes its current tick before this returns.
    pub async fn run_monitor(&self) -> Result<()> {
        let mut scheduler = self.scheduler();
        scheduler.start()?;

        let (traps_shutdown, traps_rx) = tokio::sync::watch::channel(false);
        let traps = if self.config.traps.enabled {
            match self.trap_receiver().await {
                Ok(receiver) => Some(tokio::spawn(receiver.run(traps_rx))),
                Err(e) => {
                    error!(error = %format!("{e:#}"), "Trap receiver disabled");
                    None
                }
            }
        } else {
            None
        };

        tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
        info!("Shutdown requested, waiting for the current tick...");

        let _ = traps_shutdown.send(true);
        if let Some(traps) = traps {
            traps.await.context("trap receiver task failed")?;
        }

        tokio::task::spawn_blocking(move || scheduler.stop())
            .await
            .context("scheduler shutdown task failed")?;
        Ok(())
    }

    /// Insert discovered hosts whose address is not monitored yet. Returns
    /// the new service ids.
    pub async fn promote(&self, hosts: &[DiscoveredHost]) -> Result<Vec<i64>> {
        let mut known: HashSet<String> =
            self.database.list_services().await?.into_iter().map(|service| service.ip).collect();

        let mut inserted = Vec::new();
        for host in hosts {
            let service = Service::from_discovered(host);
            if !known.insert(service.ip.clone()) {
                continue;
            }
            let id = self
                .database
                .insert_service(&service)
                .await
                .with_context(|| format!("failed to promote {}", service.ip))?;
            info!(id, ip = %service.ip, kind = %service.check_type, "promoted discovered host");
            inserted.push(id);
        }
        Ok(inserted)
    }
}
