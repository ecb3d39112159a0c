use anyhow::Result;
use chrono::Utc;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 4;

/// Run database migrations
///
/// Each step is recorded in `schema_migrations`, so running this against an
/// up-to-date database is a no-op.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::debug!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Services and check history").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Webhook subscriptions").await?;
    }

    if current_version < 3 {
        run_migration_v3(conn).await?;
        record_migration(conn, 3, "Key/value settings").await?;
    }

    if current_version < 4 {
        run_migration_v4(conn).await?;
        record_migration(conn, 4, "Received SNMP traps").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

/// Get current schema version from database
async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, Utc::now().timestamp_millis(), description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: services and their append-only history
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS services (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            ip TEXT NOT NULL,
            hostname TEXT,
            port INTEGER,
            mac_address TEXT,
            vendor TEXT,
            ssh_username TEXT,
            ssh_password TEXT,
            ssh_port INTEGER NOT NULL DEFAULT 22,
            check_type TEXT NOT NULL DEFAULT 'tcp',
            check_target TEXT,
            script_content TEXT,
            expected_response TEXT,
            check_interval INTEGER NOT NULL DEFAULT 60,
            snmp_community TEXT NOT NULL DEFAULT 'public',
            snmp_port INTEGER NOT NULL DEFAULT 161,
            sys_descr TEXT,
            is_active INTEGER NOT NULL DEFAULT 0,
            maintenance INTEGER NOT NULL DEFAULT 0,
            enabled INTEGER NOT NULL DEFAULT 1,
            last_checked INTEGER,
            response_time_ms INTEGER,
            drift_detected INTEGER NOT NULL DEFAULT 0,
            cpu_usage REAL,
            ram_usage REAL,
            disk_usage REAL,
            auto_restart INTEGER NOT NULL DEFAULT 0,
            restart_command TEXT,
            last_healed INTEGER
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS service_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            service_id INTEGER NOT NULL,
            is_active INTEGER NOT NULL,
            latency_ms INTEGER NOT NULL,
            cpu_usage REAL,
            ram_usage REAL,
            disk_usage REAL,
            timestamp INTEGER NOT NULL,
            FOREIGN KEY (service_id) REFERENCES services(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_services_enabled ON services(enabled)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_services_ip ON services(ip)", ()).await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_service_history_service_timestamp ON service_history(service_id, timestamp DESC)",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v2: outbound webhooks
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS webhooks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            secret TEXT,
            events TEXT NOT NULL DEFAULT '[\"all\"]',
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_webhooks_active ON webhooks(active)", ()).await?;
    Ok(())
}

/// Migration v3: settings, seeded with an empty subnet list
async fn run_migration_v3(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "INSERT OR IGNORE INTO settings (key, value, updated_at) VALUES (?, ?, ?)",
        libsql::params!["scan_subnets", "[]", Utc::now().timestamp_millis()],
    )
    .await?;

    Ok(())
}

/// Migration v4: SNMP trap log
async fn run_migration_v4(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS snmp_traps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            service_id INTEGER REFERENCES services(id) ON DELETE SET NULL,
            source_ip TEXT NOT NULL,
            oid TEXT NOT NULL,
            value TEXT NOT NULL,
            varbinds TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_snmp_traps_source_ip ON snmp_traps(source_ip)", ())
        .await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_snmp_traps_timestamp ON snmp_traps(timestamp DESC)", ())
        .await?;
    Ok(())
}
