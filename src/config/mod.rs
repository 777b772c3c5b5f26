//! # Configuration
//!
//! `chestlocator.toml` drives the registry location, the world scan and logging.
//! Every section is optional; missing values fall back to [`Config::default`].
//!
//! ```toml
//! [registry]
//! db_path = "data/registry"
//! max_upsert_retries = 8
//! flush_every_write = true
//!
//! [scan]
//! region_dir = "world/region"
//! workers = 4
//! skip_loot_only = true
//!
//! [logging]
//! level = "info"
//! file = "chestlocator.log"
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Block-entity ids treated as storage containers. Any id ending in
/// `_shulker_box` is also accepted, covering the dyed variants.
pub const DEFAULT_STORAGE_IDS: &[&str] = &[
    "minecraft:chest",
    "minecraft:trapped_chest",
    "minecraft:barrel",
    "minecraft:shulker_box",
    "minecraft:dispenser",
    "minecraft:dropper",
    "minecraft:hopper",
    "minecraft:furnace",
    "minecraft:blast_furnace",
    "minecraft:smoker",
    "minecraft:chiseled_bookshelf",
    "minecraft:decorated_pot",
    "minecraft:brewing_stand",
    "minecraft:lectern",
    "minecraft:crafter",
    "minecraft:shelf",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Directory holding the sled database.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// How many times an upsert that lost a coordinate race retries as an update.
    #[serde(default = "default_max_upsert_retries")]
    pub max_upsert_retries: u32,
    /// Flush sled after each committed write. Turn off for faster bulk imports;
    /// the import command always flushes once per region file.
    #[serde(default = "default_flush_every_write")]
    pub flush_every_write: bool,
}

fn default_db_path() -> String {
    "data/registry".to_string()
}

fn default_max_upsert_retries() -> u32 {
    8
}

fn default_flush_every_write() -> bool {
    true
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_upsert_retries: default_max_upsert_retries(),
            flush_every_write: default_flush_every_write(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Directory containing `r.<x>.<z>.mca` files.
    #[serde(default = "default_region_dir")]
    pub region_dir: String,
    /// Stored on each record as `world_name` when set.
    #[serde(default)]
    pub world_name: Option<String>,
    #[serde(default = "default_storage_ids")]
    pub storage_ids: Vec<String>,
    /// Region files imported concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Skip containers that only carry an ungenerated loot table.
    #[serde(default = "default_skip_loot_only")]
    pub skip_loot_only: bool,
}

fn default_region_dir() -> String {
    "world/region".to_string()
}

fn default_storage_ids() -> Vec<String> {
    DEFAULT_STORAGE_IDS.iter().map(|s| s.to_string()).collect()
}

fn default_workers() -> usize {
    4
}

fn default_skip_loot_only() -> bool {
    true
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            region_dir: default_region_dir(),
            world_name: None,
            storage_ids: default_storage_ids(),
            workers: default_workers(),
            skip_loot_only: default_skip_loot_only(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Parsed `level`, or `Info` when the value is not a recognised level name.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.registry.db_path.trim().is_empty() {
            return Err(anyhow!("registry.db_path must not be empty"));
        }
        if self.scan.workers == 0 {
            return Err(anyhow!("scan.workers must be at least 1"));
        }
        if self.scan.storage_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(anyhow!("scan.storage_ids must not contain empty ids"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.registry.db_path, "data/registry");
        assert_eq!(config.registry.max_upsert_retries, 8);
        assert!(config.scan.storage_ids.iter().any(|id| id == "minecraft:barrel"));
        assert_eq!(config.scan.workers, 4);
        assert_eq!(config.logging.level_filter(), log::LevelFilter::Info);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [scan]
            region_dir = "/srv/world/region"
            workers = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.scan.region_dir, "/srv/world/region");
        assert_eq!(config.scan.workers, 2);
        assert!(config.scan.skip_loot_only);
        assert_eq!(config.registry.max_upsert_retries, 8);
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.scan.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        let logging = LoggingConfig {
            level: "chatty".to_string(),
            file: None,
        };
        assert_eq!(logging.level_filter(), log::LevelFilter::Info);
        let logging = LoggingConfig {
            level: "debug".to_string(),
            file: None,
        };
        assert_eq!(logging.level_filter(), log::LevelFilter::Debug);
    }

    #[tokio::test]
    async fn test_create_default_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chestlocator.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.registry.db_path, Config::default().registry.db_path);
        assert_eq!(loaded.scan.storage_ids.len(), DEFAULT_STORAGE_IDS.len());
    }
}
