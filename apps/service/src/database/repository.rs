use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};

use super::models::{
    CheckRecord, Service, ServiceHistory, SnmpTrap, Webhook, i64_to_timestamp, timestamp_to_i64,
};
use crate::pool::{LibsqlManager, LibsqlPool};
use crate::validation::{validate_service, validate_webhook};

/// Database trait for abstracting database operations
#[async_trait]
pub trait Database: Send + Sync {
    /// Get all services, enabled or not, ordered by id
    async fn list_services(&self) -> Result<Vec<Service>>;

    /// Get a service by id
    async fn get_service(&self, id: i64) -> Result<Option<Service>>;

    /// Validate and insert a service, returning its new id
    async fn insert_service(&self, service: &Service) -> Result<i64>;

    /// Apply one check cycle: update the service row and append a history row
    /// in the same transaction
    async fn record_check(&self, record: &CheckRecord) -> Result<()>;

    /// Stamp a successful remediation
    async fn mark_healed(&self, service_id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Most recent history rows, newest first
    async fn recent_history(&self, service_id: i64, limit: usize) -> Result<Vec<ServiceHistory>>;

    async fn active_webhooks(&self) -> Result<Vec<Webhook>>;

    async fn insert_webhook(&self, webhook: &Webhook) -> Result<i64>;

    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;

    /// Append a trap, linking it to the service monitored at its source
    /// address. Returns the new id.
    async fn record_trap(&self, trap: &SnmpTrap) -> Result<i64>;

    /// Most recent traps, newest first
    async fn recent_traps(&self, limit: usize) -> Result<Vec<SnmpTrap>>;
}

const SERVICE_COLUMNS: &str = "id, name, ip, hostname, port, mac_address, vendor, \
    ssh_username, ssh_password, ssh_port, check_type, check_target, script_content, \
    expected_response, check_interval, snmp_community, snmp_port, sys_descr, is_active, \
    maintenance, enabled, last_checked, response_time_ms, drift_detected, cpu_usage, \
    ram_usage, disk_usage, auto_restart, restart_command, last_healed";

fn bool_to_i64(value: bool) -> i64 {
    if value { 1 } else { 0 }
}

fn row_to_service(row: &Row) -> Result<Service> {
    let check_type: String = row.get(10)?;

    Ok(Service {
        id: row.get(0)?,
        name: row.get(1)?,
        ip: row.get(2)?,
        hostname: row.get(3)?,
        port: row.get::<Option<i64>>(4)?.map(|p| p as u16),
        mac_address: row.get(5)?,
        vendor: row.get(6)?,
        ssh_username: row.get(7)?,
        ssh_password: row.get(8)?,
        ssh_port: row.get::<i64>(9)? as u16,
        check_type: check_type.parse()?,
        check_target: row.get(11)?,
        script_content: row.get(12)?,
        expected_response: row.get(13)?,
        check_interval: row.get::<i64>(14)?.max(0) as u64,
        snmp_community: row.get(15)?,
        snmp_port: row.get::<i64>(16)? as u16,
        sys_descr: row.get(17)?,
        is_active: row.get::<i64>(18)? != 0,
        maintenance: row.get::<i64>(19)? != 0,
        enabled: row.get::<i64>(20)? != 0,
        last_checked: row.get::<Option<i64>>(21)?.map(i64_to_timestamp),
        response_time_ms: row.get(22)?,
        drift_detected: row.get::<i64>(23)? != 0,
        cpu_usage: row.get(24)?,
        ram_usage: row.get(25)?,
        disk_usage: row.get(26)?,
        auto_restart: row.get::<i64>(27)? != 0,
        restart_command: row.get(28)?,
        last_healed: row.get::<Option<i64>>(29)?.map(i64_to_timestamp),
    })
}

fn row_to_webhook(row: &Row) -> Result<Webhook> {
    let events: String = row.get(4)?;

    Ok(Webhook {
        id: Some(row.get(0)?),
        name: row.get(1)?,
        url: row.get(2)?,
        secret: row.get(3)?,
        events: serde_json::from_str(&events).context("webhook events column is not a JSON list")?,
        active: row.get::<i64>(5)? != 0,
        created_at: i64_to_timestamp(row.get(6)?),
    })
}

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    /// Create a new database instance from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn list_services(&self) -> Result<Vec<Service>> {
        let conn = self.get_conn().await?;
        let mut stmt =
            conn.prepare(&format!("SELECT {SERVICE_COLUMNS} FROM services ORDER BY id")).await?;

        let mut rows = stmt.query(()).await?;
        let mut services = Vec::new();

        while let Some(row) = rows.next().await? {
            services.push(row_to_service(&row)?);
        }

        Ok(services)
    }

    async fn get_service(&self, id: i64) -> Result<Option<Service>> {
        let conn = self.get_conn().await?;
        let mut stmt =
            conn.prepare(&format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?")).await?;

        let mut rows = stmt.query(params![id]).await?;

        if let Some(row) = rows.next().await? { Ok(Some(row_to_service(&row)?)) } else { Ok(None) }
    }

    async fn insert_service(&self, service: &Service) -> Result<i64> {
        validate_service(service).to_result()?;

        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO services (name, ip, hostname, port, mac_address, vendor, ssh_username, \
             ssh_password, ssh_port, check_type, check_target, script_content, expected_response, \
             check_interval, snmp_community, snmp_port, sys_descr, is_active, maintenance, enabled, \
             last_checked, response_time_ms, drift_detected, cpu_usage, ram_usage, disk_usage, \
             auto_restart, restart_command, last_healed) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                service.name.clone(),
                service.ip.clone(),
                service.hostname.clone(),
                service.port.map(i64::from),
                service.mac_address.clone(),
                service.vendor.clone(),
                service.ssh_username.clone(),
                service.ssh_password.clone(),
                i64::from(service.ssh_port),
                service.check_type.as_str(),
                service.check_target.clone(),
                service.script_content.clone(),
                service.expected_response.clone(),
                service.check_interval as i64,
                service.snmp_community.clone(),
                i64::from(service.snmp_port),
                service.sys_descr.clone(),
                bool_to_i64(service.is_active),
                bool_to_i64(service.maintenance),
                bool_to_i64(service.enabled),
                service.last_checked.map(timestamp_to_i64),
                service.response_time_ms,
                bool_to_i64(service.drift_detected),
                service.cpu_usage,
                service.ram_usage,
                service.disk_usage,
                bool_to_i64(service.auto_restart),
                service.restart_command.clone(),
                service.last_healed.map(timestamp_to_i64)
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn record_check(&self, record: &CheckRecord) -> Result<()> {
        let conn = self.get_conn().await?;
        let checked_at = timestamp_to_i64(record.checked_at);
        let history = record.history();

        // Dropping the transaction without commit rolls both writes back
        let tx = conn.transaction().await?;

        let updated = tx
            .execute(
                "UPDATE services SET is_active = ?, last_checked = ?, response_time_ms = ?, \
                 drift_detected = ?, sys_descr = ?, cpu_usage = ?, ram_usage = ?, disk_usage = ? \
                 WHERE id = ?",
                params![
                    bool_to_i64(record.is_active),
                    checked_at,
                    record.response_time_ms,
                    bool_to_i64(record.drift_detected),
                    record.sys_descr.clone(),
                    record.telemetry.cpu,
                    record.telemetry.ram,
                    record.telemetry.disk,
                    record.service_id
                ],
            )
            .await?;

        if updated == 0 {
            anyhow::bail!("service {} no longer exists", record.service_id);
        }

        tx.execute(
            "INSERT INTO service_history (service_id, is_active, latency_ms, cpu_usage, ram_usage, \
             disk_usage, timestamp) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                history.service_id,
                bool_to_i64(history.is_active),
                history.latency_ms,
                history.cpu_usage,
                history.ram_usage,
                history.disk_usage,
                checked_at
            ],
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn mark_healed(&self, service_id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE services SET last_healed = ? WHERE id = ?",
            params![timestamp_to_i64(at), service_id],
        )
        .await?;
        Ok(())
    }

    async fn recent_history(&self, service_id: i64, limit: usize) -> Result<Vec<ServiceHistory>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT id, service_id, is_active, latency_ms, cpu_usage, ram_usage, disk_usage, timestamp \
                 FROM service_history WHERE service_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
            )
            .await?;

        let mut rows = stmt.query(params![service_id, limit as i64]).await?;
        let mut history = Vec::new();

        while let Some(row) = rows.next().await? {
            history.push(ServiceHistory {
                id: Some(row.get(0)?),
                service_id: row.get(1)?,
                is_active: row.get::<i64>(2)? != 0,
                latency_ms: row.get(3)?,
                cpu_usage: row.get(4)?,
                ram_usage: row.get(5)?,
                disk_usage: row.get(6)?,
                timestamp: i64_to_timestamp(row.get(7)?),
            });
        }

        Ok(history)
    }

    async fn active_webhooks(&self) -> Result<Vec<Webhook>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, url, secret, events, active, created_at FROM webhooks WHERE active = 1",
            )
            .await?;

        let mut rows = stmt.query(()).await?;
        let mut webhooks = Vec::new();

        while let Some(row) = rows.next().await? {
            match row_to_webhook(&row) {
                Ok(webhook) => webhooks.push(webhook),
                Err(e) => tracing::warn!("Skipping malformed webhook row: {e:#}"),
            }
        }

        Ok(webhooks)
    }

    async fn insert_webhook(&self, webhook: &Webhook) -> Result<i64> {
        validate_webhook(webhook).to_result()?;

        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO webhooks (name, url, secret, events, active, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                webhook.name.clone(),
                webhook.url.clone(),
                webhook.secret.clone(),
                serde_json::to_string(&webhook.events)?,
                bool_to_i64(webhook.active),
                timestamp_to_i64(webhook.created_at)
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.get_conn().await?;
        let mut rows =
            conn.query("SELECT value FROM settings WHERE key = ?", params![key]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().timestamp_millis()],
        )
        .await?;
        Ok(())
    }

    async fn record_trap(&self, trap: &SnmpTrap) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO snmp_traps (service_id, source_ip, oid, value, varbinds, timestamp) \
             VALUES (COALESCE(?, (SELECT id FROM services WHERE ip = ? ORDER BY id LIMIT 1)), ?, ?, ?, ?, ?)",
            params![
                trap.service_id,
                trap.source_ip.clone(),
                trap.source_ip.clone(),
                trap.oid.clone(),
                trap.value.clone(),
                trap.varbinds.clone(),
                timestamp_to_i64(trap.timestamp)
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn recent_traps(&self, limit: usize) -> Result<Vec<SnmpTrap>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT id, service_id, source_ip, oid, value, varbinds, timestamp \
                 FROM snmp_traps ORDER BY timestamp DESC, id DESC LIMIT ?",
            )
            .await?;

        let mut rows = stmt.query(params![limit as i64]).await?;
        let mut traps = Vec::new();

        while let Some(row) = rows.next().await? {
            traps.push(SnmpTrap {
                id: Some(row.get(0)?),
                service_id: row.get(1)?,
                source_ip: row.get(2)?,
                oid: row.get(3)?,
                value: row.get(4)?,
                varbinds: row.get(5)?,
                timestamp: i64_to_timestamp(row.get(6)?),
            });
        }

        Ok(traps)
    }
}
