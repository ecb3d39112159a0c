/// Database abstraction layer
///
/// Services, their check history, webhook subscriptions, settings and the
/// trap log live in a single LibSQL file behind the `Database` trait.
pub mod migrations;
pub mod models;
pub mod repository;

pub use models::{CheckRecord, Service, ServiceHistory, SnmpTrap, Webhook};
pub use repository::{Database, DatabaseImpl};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use anyhow::Result;
    use tempfile::{TempDir, tempdir};

    use super::{Database, DatabaseImpl};
    use crate::pool::create_pool;

    /// Fresh migrated database in a temp dir. Keep the `TempDir` alive for
    /// as long as the database is used.
    pub async fn create_test_database() -> Result<(Arc<dyn Database>, TempDir)> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test.db");

        let pool = create_pool(&db_path.to_string_lossy(), 4).await?;
        Ok((Arc::new(DatabaseImpl::new_from_pool(pool)), temp_dir))
    }
}
