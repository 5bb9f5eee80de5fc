use std::time::Duration;

use serde::Deserialize;

use crate::model::ActivityType;

/// Top-level configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    pub rest: RestConfig,
    pub stream: StreamConfig,
    pub upstream: UpstreamConfig,
    pub storage: StorageConfig,
    pub telemetry: TelemetryConfig,
}

/// Polling side: one budget per activity type plus the shared call policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    pub posts: BudgetConfig,
    pub mentions: BudgetConfig,
    /// Upper bound on a single upstream fetch.
    pub call_timeout_ms: u64,
    /// Consecutive transient failures after which an entry is logged at
    /// `error` and counted as a persistent failure. The entry stays queued.
    pub surface_after_attempts: u32,
    pub backoff: BackoffConfig,
}

/// Upstream quota for one activity type: `quota` calls per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub window_secs: u64,
    pub quota: u32,
}

/// Exponential backoff bounds: `min(max, base * 2^attempt)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
}

/// Streaming side: connection cap and reconnect policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub max_connections: usize,
    /// Consecutive failed connection attempts before a stream is left
    /// `Disconnected`.
    pub max_reconnect_attempts: u32,
    pub handshake_timeout_ms: u64,
    /// Silence on an open stream longer than this counts as a drop.
    pub idle_timeout_ms: u64,
    pub backoff: BackoffConfig,
}

/// Where the HTTP gateway reaches the upstream API.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
}

/// RocksDB location. `CADENCE_DATA_DIR` takes precedence when set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty in debug builds, JSON in release builds.
    #[default]
    Auto,
    Pretty,
    Json,
}

impl RestConfig {
    pub fn budget(&self, activity: ActivityType) -> BudgetConfig {
        match activity {
            ActivityType::Posts => self.posts,
            ActivityType::Mentions => self.mentions,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl BudgetConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl StreamConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            posts: BudgetConfig::default(),
            mentions: BudgetConfig::default(),
            call_timeout_ms: 10_000,
            surface_after_attempts: 5,
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            window_secs: 900,
            quota: 15,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            max_ms: 900_000,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_connections: 1_000,
            max_reconnect_attempts: 8,
            handshake_timeout_ms: 10_000,
            idle_timeout_ms: 90_000,
            backoff: BackoffConfig {
                base_ms: 1_000,
                max_ms: 300_000,
            },
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8088".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
        }
    }
}
