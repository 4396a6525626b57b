/// Bounded timeout and retry around collaborator calls

use crate::config::CollaboratorConfig;
use crate::error::CollaboratorError;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct CallPolicy {
    pub timeout: Duration,
    /// Extra attempts after the first one
    pub retries: u32,
    /// Multiplied by the attempt number between attempts
    pub backoff: Duration,
}

impl CallPolicy {
    pub fn from_config(config: &CollaboratorConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            retries: config.read_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Same timeout, single attempt
    pub fn once(&self) -> Self {
        Self {
            retries: 0,
            ..self.clone()
        }
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            retries: 2,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Run `op` under the policy and return the last error once attempts run out.
///
/// `NotConfigured` is returned immediately, retrying cannot fix it.
pub async fn guarded<T, F, Fut>(service: &str, policy: &CallPolicy, mut op: F) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let attempts = policy.retries + 1;
    let mut last_error = CollaboratorError::failed(service, "no attempt was made");

    for attempt in 1..=attempts {
        let error = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e @ CollaboratorError::NotConfigured(_))) => return Err(e),
            Ok(Err(e)) => e,
            Err(_) => CollaboratorError::Timeout {
                service: service.to_string(),
                timeout_secs: policy.timeout.as_secs(),
            },
        };

        tracing::warn!("⚠️ {} call failed (attempt {}/{}): {}", service, attempt, attempts, error);
        last_error = error;

        if attempt < attempts {
            tokio::time::sleep(policy.backoff * attempt).await;
        }
    }

    Err(last_error)
}
