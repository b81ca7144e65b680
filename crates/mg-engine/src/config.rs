//! Engine configuration, loaded from JSON.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use mg_resource::ResourceCacheConfig;
use serde::{Deserialize, Serialize};

/// Settings for an [`Engine`](crate::Engine).
///
/// Every field has a default, so a config file only needs the keys it wants
/// to change:
///
/// ```
/// use mg_engine::EngineConfig;
///
/// let config = EngineConfig::from_json_str(r#"{ "worker_threads": 2 }"#).unwrap();
/// assert_eq!(config.worker_threads, 2);
/// assert_eq!(config.entity_capacity, 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Entities to reserve room for up front.
    pub entity_capacity: usize,
    pub worker_threads: usize,
    /// Size of the resource cache's shared heap.
    pub resource_heap_bytes: usize,
    /// How long eviction waits for a busy resource.
    pub resource_lock_timeout_ms: u64,
    /// Directories scanned for resource files.
    pub asset_directories: Vec<PathBuf>,
    /// Used when `RUST_LOG` is not set.
    pub log_filter: String,
    /// Evict every unreferenced resource after each refresh.
    pub unload_all_unused_on_refresh: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entity_capacity: 1024,
            worker_threads: thread::available_parallelism().map_or(1, |n| n.get()),
            resource_heap_bytes: 16 * 1024 * 1024,
            resource_lock_timeout_ms: 100,
            asset_directories: Vec::new(),
            log_filter: "info".to_string(),
            unload_all_unused_on_refresh: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context("invalid engine config")?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("in {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_threads == 0 {
            anyhow::bail!("worker_threads must be at least 1");
        }
        if self.resource_heap_bytes == 0 {
            anyhow::bail!("resource_heap_bytes must be positive");
        }
        Ok(())
    }

    pub fn resource_cache_config(&self) -> ResourceCacheConfig {
        ResourceCacheConfig {
            heap_bytes: self.resource_heap_bytes,
            lock_timeout: Duration::from_millis(self.resource_lock_timeout_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.worker_threads >= 1);
        assert_eq!(config.resource_heap_bytes, 16 * 1024 * 1024);
        assert_eq!(config.log_filter, "info");
        assert!(!config.unload_all_unused_on_refresh);
    }

    #[test]
    fn fields_override_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{
                "entity_capacity": 10,
                "asset_directories": ["assets", "mods/assets"],
                "resource_lock_timeout_ms": 5
            }"#,
        )
        .unwrap();
        assert_eq!(config.entity_capacity, 10);
        assert_eq!(config.asset_directories.len(), 2);
        assert_eq!(
            config.resource_cache_config().lock_timeout,
            Duration::from_millis(5)
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = EngineConfig::from_json_str(r#"{ "worker_threads": 0 }"#).unwrap_err();
        assert!(err.to_string().contains("worker_threads"));

        let err = EngineConfig::from_json_str("{ not json").unwrap_err();
        assert!(err.to_string().contains("invalid engine config"));
    }

    #[test]
    fn load_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");

        let err = EngineConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("engine.json"));

        fs::write(&path, r#"{ "log_filter": "debug" }"#).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap().log_filter, "debug");
    }
}
