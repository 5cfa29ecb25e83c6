use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables shared by every collection opened through a [`crate::Collections`] factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Prefix for backing map names.
    pub name_prefix: String,
    /// Wait used by operations that take no explicit timeout (`add`, `clear`, `drain_to`).
    pub default_timeout_ms: u64,
    /// Per-lock wait for iterators and `peek`.
    pub lock_timeout_ms: u64,
    /// Per-attempt timeout used by `put` and `take`.
    pub retry_attempt_ms: u64,
    /// Upper bound of the jittered pause between `put`/`take` attempts.
    pub retry_backoff_ms: u64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            name_prefix: String::from("partcoll"),
            default_timeout_ms: 600_000,
            lock_timeout_ms: 30_000,
            retry_attempt_ms: 100,
            retry_backoff_ms: 10,
        }
    }
}

impl CollectionConfig {
    /// Loads a config from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: CollectionConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: CollectionConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Wait used when the caller gives none.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Wait for a single iterator or peek lock.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Budget of one put/take attempt.
    pub fn retry_attempt(&self) -> Duration {
        Duration::from_millis(self.retry_attempt_ms)
    }

    /// Upper bound of the pause between attempts.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Backing map of the set called `name`.
    pub fn set_map_name(&self, name: &str) -> String {
        format!("{}:set:{}", self.name_prefix, name)
    }

    /// Backing map of the node chain of the queue called `name`.
    pub fn queue_nodes_map_name(&self, name: &str) -> String {
        format!("{}:queue:{}:nodes", self.name_prefix, name)
    }

    /// Backing map of the HEAD/TAIL slots of the queue called `name`.
    pub fn queue_meta_map_name(&self, name: &str) -> String {
        format!("{}:queue:{}:meta", self.name_prefix, name)
    }
}
