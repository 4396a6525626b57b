/// SQLite pool and schema bootstrap
///
/// One database file, `{data_dir}/convoflow.db`, created on first start.

use crate::conversation::SqliteConversationStore;
use crate::flow::FlowStorage;
use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;

pub const DATABASE_FILE: &str = "convoflow.db";

/// Open (creating if missing) the database under `data_dir`
pub async fn connect(data_dir: impl AsRef<Path>) -> Result<SqlitePool> {
    let data_dir = data_dir.as_ref();
    std::fs::create_dir_all(data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory '{}': {}", data_dir.display(), e))?;
    let db_path = data_dir.join(DATABASE_FILE);

    tracing::info!("🗄️ Opening database: {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Storage handles with their tables created
pub async fn init_stores(pool: &SqlitePool) -> Result<(FlowStorage, SqliteConversationStore)> {
    let flows = FlowStorage::new(pool.clone());
    flows.init_schema().await?;
    let conversations = SqliteConversationStore::new(pool.clone());
    conversations.init_schema().await?;

    tracing::info!("✅ Database schema ready");
    Ok((flows, conversations))
}
