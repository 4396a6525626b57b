/// Conversation state repositories
///
/// The engine talks to [`ConversationStore`]; SQLite backs the server and an
/// in-memory map backs tests and embedded use.

use crate::conversation::state::ConversationState;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use sqlx::{sqlite::SqlitePool, Row};
use std::fmt::Debug;

#[async_trait]
pub trait ConversationStore: Send + Sync + Debug {
    async fn load(&self, company_id: &str, phone: &str) -> Result<Option<ConversationState>>;

    async fn save(&self, state: &ConversationState) -> Result<()>;

    /// True when a state existed
    async fn clear(&self, company_id: &str, phone: &str) -> Result<bool>;

    /// Drop conversations not updated since `before`; returns how many
    async fn purge_idle(&self, before: DateTime<Utc>) -> Result<u64>;
}

fn timestamp(at: DateTime<Utc>) -> String {
    // Fixed width so TEXT comparison orders chronologically
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Clone)]
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                company_id TEXT NOT NULL,
                phone TEXT NOT NULL,
                state JSON NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (company_id, phone)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_conversations_updated ON conversations(updated_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn load(&self, company_id: &str, phone: &str) -> Result<Option<ConversationState>> {
        let row = sqlx::query("SELECT state FROM conversations WHERE company_id = ? AND phone = ?")
            .bind(company_id)
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let state: String = row.get("state");
                Ok(Some(serde_json::from_str(&state)?))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, state: &ConversationState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        sqlx::query(
            r#"
            INSERT INTO conversations (company_id, phone, state, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(company_id, phone) DO UPDATE SET
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.company_id)
        .bind(&state.phone)
        .bind(&json)
        .bind(timestamp(state.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear(&self, company_id: &str, phone: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM conversations WHERE company_id = ? AND phone = ?")
            .bind(company_id)
            .bind(phone)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_idle(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM conversations WHERE updated_at < ?")
            .bind(timestamp(before))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    states: DashMap<(String, String), ConversationState>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, company_id: &str, phone: &str) -> Result<Option<ConversationState>> {
        Ok(self
            .states
            .get(&(company_id.to_string(), phone.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn save(&self, state: &ConversationState) -> Result<()> {
        self.states
            .insert((state.company_id.clone(), state.phone.clone()), state.clone());
        Ok(())
    }

    async fn clear(&self, company_id: &str, phone: &str) -> Result<bool> {
        Ok(self
            .states
            .remove(&(company_id.to_string(), phone.to_string()))
            .is_some())
    }

    async fn purge_idle(&self, before: DateTime<Utc>) -> Result<u64> {
        let stale = self.states.len();
        self.states.retain(|_, state| state.updated_at >= before);
        Ok((stale - self.states.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn in_memory_round_trip_and_purge() {
        let store = InMemoryConversationStore::new();
        let mut old = ConversationState::new("empresa-1", "111");
        old.updated_at = Utc::now() - Duration::minutes(45);
        let fresh = ConversationState::new("empresa-1", "222");
        store.save(&old).await.unwrap();
        store.save(&fresh).await.unwrap();

        assert_eq!(store.load("empresa-1", "111").await.unwrap(), Some(old));
        let purged = store.purge_idle(Utc::now() - Duration::minutes(30)).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.load("empresa-1", "111").await.unwrap().is_none());
        assert!(store.clear("empresa-1", "222").await.unwrap());
        assert!(store.is_empty());
    }
}
