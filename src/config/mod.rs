/// Configuration for the convoflow engine
///
/// Server, database, walk limits and collaborator endpoints. Everything is read
/// from environment variables with fallbacks for container deployment.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub collaborators: CollaboratorConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding `convoflow.db` (default: "data")
    pub data_dir: String,
}

/// Graph walk limits and conversation lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Node executions allowed per walk segment before it is aborted
    pub max_steps: usize,
    /// History records kept per conversation
    pub history_limit: usize,
    /// Idle conversations older than this are purged by the sweeper
    pub session_ttl_minutes: i64,
    /// How long a second message for the same counterparty waits for the first walk
    pub lock_wait_secs: u64,
    /// Reply sent whenever a walk aborts or gets stuck
    pub fallback_message: String,
}

/// External collaborators: timeouts, retries and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    pub timeout_secs: u64,
    /// Extra attempts for idempotent reads (commerce search, LLM, HTTP GET)
    pub read_retries: u32,
    pub retry_backoff_ms: u64,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub default_model: String,
    pub whatsapp_token: Option<String>,
    pub whatsapp_phone_number_id: Option<String>,
    pub whatsapp_api_base: String,
}

pub const DEFAULT_FALLBACK_MESSAGE: &str =
    "Lo siento, algo salió mal procesando tu mensaje. Por favor intentá de nuevo en unos minutos.";

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn env_parse<T: FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("CONVOFLOW_HOST", "0.0.0.0"),
                port: env_parse("CONVOFLOW_PORT", 3004),
            },
            database: DatabaseConfig {
                data_dir: env_or("CONVOFLOW_DATA_DIR", "data"),
            },
            engine: EngineConfig::default(),
            collaborators: CollaboratorConfig {
                timeout_secs: env_parse("CONVOFLOW_COLLABORATOR_TIMEOUT_SECS", 20),
                read_retries: env_parse("CONVOFLOW_READ_RETRIES", 2),
                retry_backoff_ms: env_parse("CONVOFLOW_RETRY_BACKOFF_MS", 250),
                openai_api_key: env_opt("OPENAI_API_KEY"),
                openai_base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
                default_model: env_or("CONVOFLOW_DEFAULT_MODEL", "gpt-4o-mini"),
                whatsapp_token: env_opt("WHATSAPP_TOKEN"),
                whatsapp_phone_number_id: env_opt("WHATSAPP_PHONE_NUMBER_ID"),
                whatsapp_api_base: env_or("WHATSAPP_API_BASE", "https://graph.facebook.com/v18.0"),
            },
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: env_parse("CONVOFLOW_MAX_STEPS", 20),
            history_limit: env_parse("CONVOFLOW_HISTORY_LIMIT", 20),
            session_ttl_minutes: env_parse("CONVOFLOW_SESSION_TTL_MINUTES", 30),
            lock_wait_secs: env_parse("CONVOFLOW_LOCK_WAIT_SECS", 30),
            fallback_message: env_or("CONVOFLOW_FALLBACK_MESSAGE", DEFAULT_FALLBACK_MESSAGE),
        }
    }
}
