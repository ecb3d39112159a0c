use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};

use super::pipeline::ServiceMonitor;

/// Monitoring scheduler - drives `ServiceMonitor::run_tick` on a fixed
/// period from a dedicated worker thread with its own runtime.
///
/// `stop` lets the tick in progress finish before the worker exits.
pub struct MonitoringScheduler {
    monitor: Arc<ServiceMonitor>,
    tick: Duration,
    shutdown: Option<watch::Sender<bool>>,
    worker: Option<JoinHandle<()>>,
}

impl MonitoringScheduler {
    pub fn new(monitor: Arc<ServiceMonitor>, tick: Duration) -> Self {
        Self { monitor, tick, shutdown: None, worker: None }
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|worker| !worker.is_finished())
    }

    /// Spawn the worker. Calling this while already running is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            tracing::warn!("Monitoring scheduler already running");
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .thread_name("lanwatch-monitor")
            .build()
            .context("failed to build monitor runtime")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor = self.monitor.clone();
        let tick = self.tick;

        let worker = std::thread::Builder::new()
            .name("lanwatch-monitor".into())
            .spawn(move || runtime.block_on(run_loop(monitor, tick, shutdown_rx)))
            .context("failed to spawn monitor thread")?;

        self.shutdown = Some(shutdown_tx);
        self.worker = Some(worker);
        tracing::info!(tick_seconds = tick.as_secs_f64(), "Monitoring scheduler started");
        Ok(())
    }

    /// Signal shutdown and wait for the worker to finish its current tick.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Monitoring worker panicked");
            }
            tracing::info!("Monitoring scheduler stopped");
        }
    }
}

impl Drop for MonitoringScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop(monitor: Arc<ServiceMonitor>, tick: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match monitor.run_tick(Utc::now()).await {
            Ok(summary) if summary.checked + summary.failed > 0 => {
                tracing::debug!(
                    checked = summary.checked,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    "Monitor tick complete"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %format!("{e:#}"), "Monitor tick aborted"),
        }

        if *shutdown.borrow() {
            break;
        }
    }
}
