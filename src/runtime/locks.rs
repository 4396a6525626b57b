/// Per-counterparty walk serialization
///
/// Walks for the same (company, phone) pair run one at a time; different
/// counterparties never contend. A walk that cannot get the lock within the
/// configured wait fails with `ConcurrencyConflict`.

use crate::error::EngineError;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub type ConversationKey = (String, String);

#[derive(Debug, Default)]
pub struct ConversationLocks {
    locks: DashMap<ConversationKey, Arc<Mutex<()>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `wait` for exclusive access to one conversation
    pub async fn acquire(
        &self,
        company_id: &str,
        phone: &str,
        wait: Duration,
    ) -> Result<OwnedMutexGuard<()>, EngineError> {
        let lock = self
            .locks
            .entry((company_id.to_string(), phone.to_string()))
            .or_default()
            .clone();

        tokio::time::timeout(wait, lock.lock_owned())
            .await
            .map_err(|_| EngineError::ConcurrencyConflict {
                company_id: company_id.to_string(),
                phone: phone.to_string(),
            })
    }

    /// Drop entries nobody holds or waits on
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
