//! Configuration for polish-optimizer
//!
//! Loaded from `polish-optimizer.toml` (see [`polish_common::config`]) with
//! every field defaulted, so an absent file yields a runnable service once
//! providers and card keys are supplied. Timeouts are deployment-tunable and
//! never hardcoded at call sites.

use polish_common::config::LoggingConfig;
use polish_common::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Module name used for the default config file path
pub const MODULE_NAME: &str = "polish-optimizer";

/// Environment variable with extra comma-separated card keys
pub const CARD_KEYS_ENV: &str = "POLISH_CARD_KEYS";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub root_folder: Option<PathBuf>,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub segmentation: SegmentationConfig,
    pub stream: StreamConfig,
    pub health: HealthConfig,
    pub auth: AuthConfig,
    pub providers: Vec<ProviderConfig>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Applies to every endpoint except the progress stream
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5780,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Run without persistence (sessions live only in memory)
    pub in_memory: bool,
    /// File name inside the root folder
    pub file_name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            in_memory: false,
            file_name: "polish.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker pool size W
    pub worker_pool_size: usize,
    /// Maximum number of queued + running sessions
    pub max_active_sessions: usize,
    pub max_document_chars: usize,
    pub max_segments_per_session: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            max_active_sessions: 16,
            max_document_chars: 200_000,
            max_segments_per_session: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Segment size when the request does not choose one
    pub default_max_chars: usize,
    /// Smallest segment size a request may choose
    pub min_max_chars: usize,
    /// Largest segment size a request may choose
    pub max_max_chars: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            default_max_chars: 1200,
            min_max_chars: 200,
            max_max_chars: 8000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Per-session event buffer; slower subscribers are resynchronized
    pub channel_capacity: usize,
    pub heartbeat_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            heartbeat_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
    /// Probes slower than this report `degraded`
    pub degraded_latency_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 60,
            probe_timeout_secs: 10,
            degraded_latency_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Plain card keys or their SHA-256 hex digests
    pub card_keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// OpenAI-compatible API base, e.g. `https://api.example.com/v1`
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_provider_timeout_secs() -> u64 {
    60
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl OptimizerConfig {
    /// Load from an explicit path, or the default location, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: OptimizerConfig = polish_common::config::load_toml_config(path, MODULE_NAME)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.worker_pool_size == 0 {
            return Err(Error::Config("scheduler.worker_pool_size must be > 0".into()));
        }
        if self.scheduler.max_active_sessions == 0 {
            return Err(Error::Config("scheduler.max_active_sessions must be > 0".into()));
        }
        if self.stream.channel_capacity == 0 {
            return Err(Error::Config("stream.channel_capacity must be > 0".into()));
        }
        let seg = &self.segmentation;
        if seg.min_max_chars == 0
            || seg.min_max_chars > seg.max_max_chars
            || !(seg.min_max_chars..=seg.max_max_chars).contains(&seg.default_max_chars)
        {
            return Err(Error::Config(format!(
                "segmentation sizes inconsistent: default {} not within [{}, {}]",
                seg.default_max_chars, seg.min_max_chars, seg.max_max_chars
            )));
        }
        for provider in &self.providers {
            if provider.name.trim().is_empty() || provider.base_url.trim().is_empty() {
                return Err(Error::Config("provider name and base_url are required".into()));
            }
            if provider.timeout_secs == 0 {
                return Err(Error::Config(format!(
                    "provider {} timeout_secs must be > 0",
                    provider.name
                )));
            }
        }
        Ok(())
    }

    /// Card keys from TOML and the `POLISH_CARD_KEYS` environment variable
    ///
    /// Both sources are merged; having both configured is logged since it is
    /// usually a leftover.
    pub fn resolve_card_keys(&self) -> Vec<String> {
        let mut keys = self.auth.card_keys.clone();

        let env_keys: Vec<String> = std::env::var(CARD_KEYS_ENV)
            .ok()
            .map(|value| {
                value
                    .split(',')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        if !keys.is_empty() && !env_keys.is_empty() {
            warn!(
                "Card keys found in both TOML and {}; accepting keys from both",
                CARD_KEYS_ENV
            );
        }
        keys.extend(env_keys);

        if keys.is_empty() {
            warn!("No card keys configured - every optimization request will be rejected");
        } else {
            info!(count = keys.len(), "Card keys loaded");
        }
        keys
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.stream.heartbeat_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.health.probe_interval_secs)
    }
}
