/// SQLite persistence for flow documents
///
/// Flows are stored as JSON with a few indexed columns for lookups. The only
/// way in is [`FlowStorage::save_flow`], which takes an already compiled flow,
/// so a document that fails integrity checks can never be persisted.

use crate::flow::{graph::CompiledFlow, types::Flow};
use anyhow::Result;
use serde::Serialize;
use sqlx::{sqlite::SqlitePool, Row};

#[derive(Debug, Clone)]
pub struct FlowStorage {
    pool: SqlitePool,
}

/// Row summary for listing endpoints
#[derive(Debug, Clone, Serialize)]
pub struct FlowMetadata {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub active: bool,
    /// Absent for registries without persistence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl FlowStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the flows table. Safe to call repeatedly.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flows (
                id TEXT PRIMARY KEY,
                company_id TEXT NOT NULL,
                name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_flows_company ON flows(company_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert or replace a flow
    pub async fn save_flow(&self, compiled: &CompiledFlow) -> Result<()> {
        let flow = &compiled.flow;
        let definition = serde_json::to_string(flow)?;

        sqlx::query(
            r#"
            INSERT INTO flows (id, company_id, name, active, definition, updated_at)
            VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                company_id = excluded.company_id,
                name = excluded.name,
                active = excluded.active,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&flow.id)
        .bind(&flow.company_id)
        .bind(&flow.name)
        .bind(flow.active)
        .bind(&definition)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// List flows, optionally restricted to one company
    pub async fn list_flows(&self, company_id: Option<&str>) -> Result<Vec<FlowMetadata>> {
        let rows = match company_id {
            Some(company) => {
                sqlx::query(
                    "SELECT id, company_id, name, active, created_at, updated_at FROM flows \
                     WHERE company_id = ? ORDER BY updated_at DESC, id",
                )
                .bind(company)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, company_id, name, active, created_at, updated_at FROM flows \
                     ORDER BY updated_at DESC, id",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|row| FlowMetadata {
                id: row.get("id"),
                company_id: row.get("company_id"),
                name: row.get("name"),
                active: row.get("active"),
                created_at: Some(row.get("created_at")),
                updated_at: Some(row.get("updated_at")),
            })
            .collect())
    }

    /// Every stored document, for registry initialization
    pub async fn load_all_flows(&self) -> Result<Vec<Flow>> {
        let rows = sqlx::query("SELECT id, definition FROM flows ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut flows = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let definition: String = row.get("definition");
            match serde_json::from_str::<Flow>(&definition) {
                Ok(flow) => flows.push(flow),
                Err(e) => tracing::error!("❌ Stored flow '{}' is not a valid document: {}", id, e),
            }
        }
        Ok(flows)
    }

    pub async fn delete_flow(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM flows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
