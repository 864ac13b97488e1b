pub mod memory;
pub mod sea_store;
pub mod transaction;

use crate::config::{AppConfig, StoreBackend};
use crate::errors::ServiceError;
use crate::migrator::Migrator;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub use memory::{InMemoryStore, StoreState};
pub use sea_store::SeaOrmUnitOfWork;
pub use transaction::{with_transaction, Transaction, TxHandle, UnitOfWork};

pub type DbPool = DatabaseConnection;

/// Opens a pool sized and timed by the `db_*` settings.
pub async fn connect(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let mut opt = ConnectOptions::new(cfg.database_url.clone());
    opt.max_connections(cfg.db_max_connections)
        .min_connections(cfg.db_min_connections)
        .connect_timeout(Duration::from_secs(cfg.db_connect_timeout_secs))
        .acquire_timeout(Duration::from_secs(cfg.db_acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(cfg.db_idle_timeout_secs))
        .sqlx_logging(false);

    debug!(
        max = cfg.db_max_connections,
        min = cfg.db_min_connections,
        "Opening database pool"
    );
    let pool = Database::connect(opt).await?;
    info!("Database pool ready");
    Ok(pool)
}

/// Applies every pending migration.
pub async fn run_migrations(db: &DbPool) -> Result<(), ServiceError> {
    Migrator::up(db, None).await?;
    info!("Schema up to date");
    Ok(())
}

/// Builds the unit of work selected by `store_backend`.
///
/// The in-memory backend starts empty; the database backend connects and,
/// when `auto_migrate` is set, migrates before returning.
pub async fn unit_of_work_from_config(
    cfg: &AppConfig,
) -> Result<Arc<dyn UnitOfWork>, ServiceError> {
    match cfg.store_backend {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StoreBackend::Database => {
            let pool = connect(cfg).await?;
            if cfg.auto_migrate {
                run_migrations(&pool).await?;
            }
            Ok(Arc::new(SeaOrmUnitOfWork::new(Arc::new(pool))))
        }
    }
}
