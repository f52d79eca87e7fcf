//! Configuration.
//!
//! 優先順位（後勝ち）:
//! 1. `HeraldConfig::default()`
//! 2. `herald.toml`（存在すれば）
//! 3. `HERALD_` 環境変数（`__` でネスト、例: `HERALD_WORKER__BATCH_SIZE=20`）

use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::delivery::{BreakerSettings, GraphSettings};
use crate::domain::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};

pub const DEFAULT_CONFIG_FILE: &str = "herald.toml";
pub const ENV_PREFIX: &str = "HERALD_";

#[derive(Debug, thiserror::Error)]
#[error("configuration error: {0}")]
pub struct ConfigError(#[from] Box<figment::Error>);

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError(Box::new(err))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    pub worker: WorkerConfig,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub messaging: MessagingConfig,
    pub vault: VaultConfig,
    pub sequence: SequenceConfig,
    pub cleanup: CleanupConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub concurrency: usize,
    pub handler_timeout_ms: u64,
    /// `processing` records older than this are reaped.
    pub lease_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            batch_size: 10,
            concurrency: 1,
            handler_timeout_ms: 30_000,
            lease_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub multiplier: u32,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 30_000,
            multiplier: 4,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
        }
    }
}

impl BreakerConfig {
    pub fn settings(&self) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub base_url: String,
    pub api_version: String,
    pub request_timeout_ms: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        let graph = GraphSettings::default();
        Self {
            base_url: graph.base_url,
            api_version: graph.api_version,
            request_timeout_ms: 15_000,
        }
    }
}

impl MessagingConfig {
    pub fn settings(&self) -> GraphSettings {
        GraphSettings {
            base_url: self.base_url.clone(),
            api_version: self.api_version.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

/// Hex-encoded 32-byte keys.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub current_key: Option<String>,
    pub previous_key: Option<String>,
    pub legacy_key: Option<String>,
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("current_key", &self.current_key.as_ref().map(|_| "***"))
            .field("previous_key", &self.previous_key.as_ref().map(|_| "***"))
            .field("legacy_key", &self.legacy_key.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    pub unsubscribe_base_url: String,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            unsubscribe_base_url: "http://localhost:3000/unsubscribe".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub interval_ms: u64,
    pub retention_days: u32,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3_600_000,
            retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl HeraldConfig {
    /// Defaults, then `herald.toml` in the working directory, then `HERALD_*`.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(path))
    }

    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(HeraldConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        Ok(figment.extract()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_match_documented_values() {
        let config = HeraldConfig::default();
        assert_eq!(config.worker.poll_interval_ms, 10_000);
        assert_eq!(config.worker.batch_size, 10);
        assert_eq!(config.worker.concurrency, 1);
        assert_eq!(config.worker.handler_timeout_ms, 30_000);
        assert_eq!(config.worker.lease_ms, 120_000);
        assert_eq!(config.retry.policy(), RetryPolicy::default());
        assert_eq!(config.breaker.settings(), BreakerSettings::default());
        assert_eq!(config.cleanup.interval_ms, 3_600_000);
    }

    #[test]
    fn missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = HeraldConfig::load().expect("load");
            assert_eq!(config, HeraldConfig::default());
            Ok(())
        });
    }

    #[test]
    fn toml_overrides_defaults_and_env_overrides_toml() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "herald.toml",
                r#"
                [worker]
                batch_size = 25
                concurrency = 4

                [retry]
                max_attempts = 8

                [telemetry]
                json = true
                "#,
            )?;
            jail.set_env("HERALD_WORKER__BATCH_SIZE", "50");
            jail.set_env("HERALD_BREAKER__FAILURE_THRESHOLD", "3");

            let config = HeraldConfig::load().expect("load");
            assert_eq!(config.worker.batch_size, 50);
            assert_eq!(config.worker.concurrency, 4);
            assert_eq!(config.worker.poll_interval_ms, 10_000);
            assert_eq!(config.retry.max_attempts, 8);
            assert_eq!(config.breaker.failure_threshold, 3);
            assert!(config.telemetry.json);
            Ok(())
        });
    }

    #[test]
    fn vault_keys_from_env_are_redacted_in_debug() {
        Jail::expect_with(|jail| {
            jail.set_env("HERALD_VAULT__CURRENT_KEY", "ab".repeat(32));
            let config = HeraldConfig::load().expect("load");
            assert_eq!(config.vault.current_key, Some("ab".repeat(32)));
            assert!(!format!("{config:?}").contains("abab"));
            Ok(())
        });
    }

    #[test]
    fn bad_value_is_an_error() {
        Jail::expect_with(|jail| {
            jail.set_env("HERALD_WORKER__BATCH_SIZE", "many");
            assert!(HeraldConfig::load().is_err());
            Ok(())
        });
    }
}
