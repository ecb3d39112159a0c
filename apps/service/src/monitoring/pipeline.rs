use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;

use super::drift::detect_drift;
use super::healer::{AutoHealer, HealOutcome};
use super::probe::ProtocolProbe;
use super::stats::ResourceStatsCollector;
use super::types::{CheckReport, ServiceStatus};
use crate::database::{CheckRecord, Database, Service};
use crate::notify::{NotificationSink, STATUS_CHANGE_EVENT, StatusChangeEvent};

/// Counts for one scheduler tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub checked: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Runs the per-service check pipeline: probe, stats, drift, persist,
/// notify, heal.
pub struct ServiceMonitor {
    db: Arc<dyn Database>,
    probe: ProtocolProbe,
    stats: ResourceStatsCollector,
    healer: AutoHealer,
    notifier: Arc<dyn NotificationSink>,
}

impl ServiceMonitor {
    pub fn new(
        db: Arc<dyn Database>,
        probe: ProtocolProbe,
        stats: ResourceStatsCollector,
        healer: AutoHealer,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self { db, probe, stats, healer, notifier }
    }

    /// One full check of `service` as loaded at the start of the cycle,
    /// stamped with the time its probe and stats finished.
    ///
    /// Only a persistence failure is returned as an error; every probe or
    /// collaborator failure ends up in the report.
    pub async fn check_service(&self, service: &Service) -> Result<CheckReport> {
        let outcome = self.probe.probe(service).await;
        let sys_descr = outcome.sys_descr.clone().or_else(|| service.sys_descr.clone());

        let stats = self.stats.collect(service).await;
        let checked_at = Utc::now();
        let drift_detected =
            detect_drift(outcome.reachable, &outcome.content, service.expected_response.as_deref());

        // Unknown stats keep the previous snapshot
        let telemetry = if stats.is_empty() { service.telemetry() } else { stats };

        let record = CheckRecord {
            service_id: service.id,
            is_active: outcome.reachable,
            response_time_ms: outcome.elapsed_ms as i64,
            checked_at,
            drift_detected,
            sys_descr,
            telemetry,
        };
        self.db
            .record_check(&record)
            .await
            .with_context(|| format!("failed to record check for service {}", service.id))?;

        let status = ServiceStatus::from_reachable(outcome.reachable);
        let status_changed = service.is_active != outcome.reachable;

        tracing::debug!(
            service_id = service.id,
            ip = %service.ip,
            kind = %service.check_type,
            %status,
            elapsed_ms = outcome.elapsed_ms,
            drift_detected,
            "service checked"
        );

        let mut healed = false;
        if status_changed {
            tracing::info!(service_id = service.id, name = %service.name, %status, "service status changed");
            self.notifier
                .notify(STATUS_CHANGE_EVENT, StatusChangeEvent::new(service, status, checked_at).to_payload());

            if status == ServiceStatus::Down {
                healed = self.heal(service, checked_at).await;
            }
        }

        Ok(CheckReport {
            service_id: service.id,
            outcome,
            stats,
            drift_detected,
            status,
            status_changed,
            healed,
        })
    }

    async fn heal(&self, service: &Service, now: DateTime<Utc>) -> bool {
        match self.healer.heal(service, now).await {
            HealOutcome::Executed { .. } => {
                if let Err(e) = self.db.mark_healed(service.id, now).await {
                    tracing::error!(service_id = service.id, error = %e, "failed to stamp last_healed");
                }
                true
            }
            _ => false,
        }
    }

    /// Check one service by id, regardless of interval or enabled flag.
    pub async fn check_by_id(&self, id: i64) -> Result<Option<CheckReport>> {
        let Some(service) = self.db.get_service(id).await? else {
            return Ok(None);
        };
        self.check_service(&service).await.map(Some)
    }

    /// One scheduler pass over every service that is enabled and due at
    /// `now`, one at a time.
    ///
    /// Failing to load services aborts the tick; a failure for one service is
    /// logged and the pass moves on.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let services = self.db.list_services().await.context("failed to load services")?;
        let mut summary = TickSummary::default();

        for service in services {
            if !service.enabled || !service.is_due(now) {
                summary.skipped += 1;
                continue;
            }

            match AssertUnwindSafe(self.check_service(&service)).catch_unwind().await {
                Ok(Ok(_)) => summary.checked += 1,
                Ok(Err(e)) => {
                    summary.failed += 1;
                    tracing::error!(service_id = service.id, ip = %service.ip, error = %format!("{e:#}"), "service check failed");
                }
                Err(_) => {
                    summary.failed += 1;
                    tracing::error!(service_id = service.id, ip = %service.ip, "service check panicked");
                }
            }
        }

        Ok(summary)
    }
}
