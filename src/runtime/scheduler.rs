/// Background sweeper for idle conversations
///
/// A tokio-cron-scheduler job purges conversations that have not been
/// updated within the session TTL and prunes unused counterparty locks.

use crate::runtime::engine::ExecutionEngine;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};

/// Every minute, at second zero
pub const DEFAULT_SWEEP_SCHEDULE: &str = "0 * * * * *";

pub struct ConversationSweeper {
    scheduler: Arc<RwLock<JobScheduler>>,
    engine: Arc<ExecutionEngine>,
    schedule: String,
}

impl ConversationSweeper {
    pub async fn new(engine: Arc<ExecutionEngine>) -> Result<Self> {
        Self::with_schedule(engine, DEFAULT_SWEEP_SCHEDULE).await
    }

    pub async fn with_schedule(engine: Arc<ExecutionEngine>, schedule: impl Into<String>) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            engine,
            schedule: schedule.into(),
        })
    }

    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting conversation sweeper ({})", self.schedule);

        let engine = Arc::clone(&self.engine);
        let job = Job::new_async(self.schedule.as_str(), move |_uuid, _l| {
            let engine = Arc::clone(&engine);

            Box::pin(async move {
                match engine.purge_idle().await {
                    Ok(0) => tracing::debug!("🧹 Sweep found no idle conversations"),
                    Ok(purged) => tracing::info!("🧹 Swept {} idle conversations", purged),
                    Err(e) => tracing::error!("❌ Conversation sweep failed: {}", e),
                }
            })
        })?;

        {
            let scheduler = self.scheduler.write().await;
            scheduler.add(job).await?;
            scheduler.start().await?;
        }

        tracing::info!("✅ Conversation sweeper started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping conversation sweeper");
        let mut scheduler = self.scheduler.write().await;
        scheduler.shutdown().await?;
        Ok(())
    }
}
