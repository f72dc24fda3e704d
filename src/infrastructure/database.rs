use crate::entities::attachments;
use anyhow::Context;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema, Statement};
use std::env;
use std::time::Duration;
use tracing::info;

pub async fn setup_database() -> anyhow::Result<DatabaseConnection> {
    let db_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    info!("📂 Database: {}", db_url);

    let mut opt = ConnectOptions::new(&db_url);
    opt.max_connections(20)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let db = Database::connect(opt)
        .await
        .with_context(|| format!("Failed to connect to {}", db_url))?;

    info!("✅ Database connected successfully");

    run_migrations(&db).await?;

    Ok(db)
}

/// Create the `attachments` table and its unique lookup index when missing.
pub async fn run_migrations(db: &DatabaseConnection) -> anyhow::Result<()> {
    info!("🔄 Running SeaORM auto-migrations...");
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let table = schema
        .create_table_from_entity(attachments::Entity)
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&table))
        .await
        .context("Failed to create the attachments table")?;

    db.execute(Statement::from_string(
        builder,
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_attachments_record_attribute ON attachments(record_type, record_id, attribute);"
            .to_string(),
    ))
    .await
    .context("Failed to create the attachments index")?;

    Ok(())
}
