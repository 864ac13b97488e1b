use anyhow::{Context, Result};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use fleet_backoffice::{config, db, migrator::Migrator};

/// Applies pending migrations, or rolls back the last one with `down`.
#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config().context("failed to load application config")?;
    config::init_tracing(&config.log_level, config.log_json);

    let pool = db::connect(&config)
        .await
        .context("failed to connect to database")?;

    match std::env::args().nth(1).as_deref() {
        Some("down") => {
            info!("Rolling back the last migration");
            Migrator::down(&pool, Some(1))
                .await
                .context("migration rollback failed")?;
        }
        Some("status") => {
            Migrator::status(&pool)
                .await
                .context("failed to read migration status")?;
        }
        _ => {
            db::run_migrations(&pool)
                .await
                .context("migration failed")?;
        }
    }

    info!("Migration command finished");
    Ok(())
}
