// Runtime configuration, loaded from YAML with a local-override fallback,
// mirroring the teacher's `Config::load(path)` / `CONFIG_PATH_LOCAL` idiom.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const CONFIG_PATH: &str = "cfg/ferroshard.yaml";
pub const CONFIG_PATH_LOCAL: &str = "cfg/ferroshard.local.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Dev
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Number of independently-locked shards in the store.
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
    /// Max `|key|+|value|` bytes held per shard before LRU eviction.
    #[serde(default = "default_shard_max_bytes")]
    pub shard_max_bytes: usize,
}

fn default_shard_count() -> usize {
    4
}

fn default_shard_max_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            shard_max_bytes: default_shard_max_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_low_watermark")]
    pub low_watermark: usize,
    #[serde(default = "default_high_watermark")]
    pub high_watermark: usize,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(with = "humantime_serde", default = "default_idle_time")]
    pub idle_time: Duration,
}

fn default_low_watermark() -> usize {
    2
}

fn default_high_watermark() -> usize {
    num_cpus::get().max(2)
}

fn default_max_queue_size() -> usize {
    1024
}

fn default_idle_time() -> Duration {
    Duration::from_millis(500)
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            low_watermark: default_low_watermark(),
            high_watermark: default_high_watermark(),
            max_queue_size: default_max_queue_size(),
            idle_time: default_idle_time(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:11311".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsConfig {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logs: Option<LogsConfig>,
}

impl Config {
    /// Loads and validates configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let cfg: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {:?}", path))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Tries the local override path first, then the default path.
    pub fn load_with_fallback(custom: Option<PathBuf>) -> Result<Config> {
        if let Some(path) = custom {
            return Config::load(&path)
                .with_context(|| format!("failed to load custom config from {:?}", path));
        }
        match Config::load(CONFIG_PATH_LOCAL) {
            Ok(cfg) => Ok(cfg),
            Err(_) => Config::load(CONFIG_PATH)
                .with_context(|| format!("failed to load config from {}", CONFIG_PATH)),
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.storage.shard_count > 0, "storage.shard_count must be positive");
        anyhow::ensure!(
            self.executor.low_watermark >= 1,
            "executor.low_watermark must be at least 1"
        );
        anyhow::ensure!(
            self.executor.low_watermark <= self.executor.high_watermark,
            "executor.low_watermark must not exceed executor.high_watermark"
        );
        anyhow::ensure!(
            self.executor.max_queue_size >= 1,
            "executor.max_queue_size must be at least 1"
        );
        Ok(())
    }

    pub fn is_prod(&self) -> bool {
        self.environment == Environment::Prod
    }

    pub fn log_level(&self) -> &str {
        self.logs
            .as_ref()
            .and_then(|l| l.level.as_deref())
            .unwrap_or("info")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.environment, Environment::Dev);
        assert!(!cfg.is_prod());
    }

    #[test]
    fn rejects_inverted_watermarks() {
        let mut cfg = Config::default();
        cfg.executor.low_watermark = 8;
        cfg.executor.high_watermark = 2;
        assert!(cfg.validate().is_err());
    }
}
