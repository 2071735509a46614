use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::WorkerError;
use crate::Result;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub network: NetworkConfig,
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
    pub migration: MigrationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 被代理的应用源站
    pub upstream: String,
    /// 安装阶段预缓存的资源清单 (相对 upstream)
    pub precache: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 静态资源缓存的代号，部署新版本时递增
    pub version: String,
    pub max_space: u64,
    pub cleanup_interval_secs: u64,
    pub static_resources: PolicyConfig,
    pub images: PolicyConfig,
    pub data: PolicyConfig,
    pub offline: PolicyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    pub max_entries: Option<usize>,
    pub max_age_secs: Option<u64>,
    #[serde(default = "default_accepted_statuses")]
    pub accepted_statuses: Vec<u16>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub threshold_secs: u64,
    pub interval_secs: u64,
    pub initial_delay_secs: u64,
    /// 为 None 时每次 tick 超过阈值都提醒
    pub reminder_cooldown_secs: Option<u64>,
    /// 通知点击后打开的应用地址
    pub app_url: String,
    pub notifications_granted: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub flag_key: String,
    pub legacy_script_suffix: String,
    pub legacy_cache_prefixes: Vec<String>,
}

fn default_accepted_statuses() -> Vec<u16> {
    vec![0, 200]
}

const DAY_SECS: u64 = 24 * 60 * 60;

impl Config {
    pub fn load() -> Result<Self> {
        // 首先尝试从环境变量加载
        if let Ok(config_path) = std::env::var("CONFIG_PATH") {
            return Self::from_file(&config_path);
        }

        // 否则使用默认配置
        Ok(Self::default())
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| WorkerError::Config(e.to_string()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            network: NetworkConfig::default(),
            scheduler: SchedulerConfig::default(),
            store: StoreConfig::default(),
            migration: MigrationConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            upstream: "http://127.0.0.1:5173".to_string(),
            precache: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/offline.html".to_string(),
                "/manifest.json".to_string(),
            ],
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            max_space: 50 * 1024 * 1024, // 50MB
            cleanup_interval_secs: 3600,
            static_resources: PolicyConfig::bounded(100, 30 * DAY_SECS),
            images: PolicyConfig::bounded(60, 30 * DAY_SECS),
            data: PolicyConfig::bounded(50, DAY_SECS),
            offline: PolicyConfig::unbounded(),
        }
    }
}

impl PolicyConfig {
    pub fn bounded(max_entries: usize, max_age_secs: u64) -> Self {
        Self {
            max_entries: Some(max_entries),
            max_age_secs: Some(max_age_secs),
            accepted_statuses: default_accepted_statuses(),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            max_entries: None,
            max_age_secs: None,
            accepted_statuses: default_accepted_statuses(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { timeout_secs: 3 }
    }
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threshold_secs: DAY_SECS,
            interval_secs: 30 * 60,
            initial_delay_secs: 5,
            reminder_cooldown_secs: None,
            app_url: "http://127.0.0.1:8080/".to_string(),
            notifications_granted: true,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: "./worker-data".into(),
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            flag_key: "xpense-sw-migrated".to_string(),
            legacy_script_suffix: "/sw.js".to_string(),
            legacy_cache_prefixes: vec!["xpense-cache-".to_string(), "workbox-precache".to_string()],
        }
    }
}
