/// Persisted per-counterparty execution state

use crate::collaborators::{ChatRole, ChatTurn};
use crate::runtime::variables::VariableStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where the next inbound message picks up
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Position {
    /// Never walked, or explicitly reset
    #[default]
    Start,
    /// Suspended after an outbound message that waits for a reply
    AwaitingInput { flow_id: String, node_id: String },
    /// Reached a terminal node
    Finished { flow_id: String, node_id: String },
    /// Halted on a node with no eligible outgoing edge
    Stuck { flow_id: String, node_id: String },
}

impl Position {
    pub fn awaiting(&self) -> Option<(&str, &str)> {
        match self {
            Position::AwaitingInput { flow_id, node_id } => Some((flow_id, node_id)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub direction: Direction,
    pub text: String,
    pub at: DateTime<Utc>,
    /// Node that produced an outbound message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl HistoryRecord {
    pub fn inbound(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            direction: Direction::Inbound,
            text: text.into(),
            at,
            node_id: None,
        }
    }

    pub fn outbound(text: impl Into<String>, node_id: Option<String>) -> Self {
        Self {
            direction: Direction::Outbound,
            text: text.into(),
            at: Utc::now(),
            node_id,
        }
    }
}

/// Keyed by (company, phone)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub company_id: String,
    pub phone: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub variables: VariableStore,
    #[serde(default)]
    pub history: Vec<HistoryRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(company_id: impl Into<String>, phone: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            company_id: company_id.into(),
            phone: phone.into(),
            position: Position::Start,
            variables: VariableStore::new(),
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append and drop the oldest records beyond `limit`
    pub fn push_history(&mut self, record: HistoryRecord, limit: usize) {
        self.history.push(record);
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }

    /// History as LLM chat turns, oldest first
    pub fn chat_turns(&self) -> Vec<ChatTurn> {
        self.history
            .iter()
            .map(|r| ChatTurn {
                role: match r.direction {
                    Direction::Inbound => ChatRole::User,
                    Direction::Outbound => ChatRole::Assistant,
                },
                content: r.text.clone(),
            })
            .collect()
    }

    pub fn is_first_message(&self) -> bool {
        self.history.is_empty()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
