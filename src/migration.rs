//! 旧版 worker 的一次性清理。
//!
//! 旧版本以 `/sw.js` 注册了手写的 worker，并使用另一套缓存名。升级后首次加载时
//! 注销旧注册、删除旧缓存，然后在页面本地存储里写入完成标记，之后不再执行。

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn, debug};

use crate::cache::CacheManager;
use crate::config::MigrationConfig;
use crate::error::WorkerError;
use crate::Result;

/// 页面本地存储 (对应 `localStorage`)
#[async_trait]
pub trait PageStorage: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    async fn set_item(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryPageStorage {
    items: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl PageStorage for MemoryPageStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// 以 JSON 文件保存的本地存储
#[derive(Debug)]
pub struct FilePageStorage {
    path: PathBuf,
    lock: RwLock<()>,
}

impl FilePageStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: RwLock::new(()),
        }
    }

    async fn load(&self) -> Result<HashMap<String, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(content) => Ok(serde_json::from_slice(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl PageStorage for FilePageStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.read().await;
        Ok(self.load().await?.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.write().await;
        let mut items = self.load().await?;
        items.insert(key.to_string(), value.to_string());
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_vec_pretty(&items)?).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub scope: String,
    pub script_url: String,
}

/// worker 注册表 (对应 `navigator.serviceWorker.getRegistrations`)
#[async_trait]
pub trait RegistrationHost: Send + Sync {
    async fn registrations(&self) -> Result<Vec<Registration>>;

    async fn unregister(&self, scope: &str) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct StaticRegistrations {
    registrations: RwLock<Vec<Registration>>,
}

impl StaticRegistrations {
    pub fn new(registrations: Vec<Registration>) -> Self {
        Self {
            registrations: RwLock::new(registrations),
        }
    }
}

#[async_trait]
impl RegistrationHost for StaticRegistrations {
    async fn registrations(&self) -> Result<Vec<Registration>> {
        Ok(self.registrations.read().await.clone())
    }

    async fn unregister(&self, scope: &str) -> Result<bool> {
        let mut registrations = self.registrations.write().await;
        let before = registrations.len();
        registrations.retain(|r| r.scope != scope);
        Ok(registrations.len() != before)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    AlreadyDone,
    Completed {
        unregistered: Vec<String>,
        deleted_caches: Vec<String>,
    },
    Failed(String),
}

pub struct LegacyMigration {
    storage: Arc<dyn PageStorage>,
    registrations: Arc<dyn RegistrationHost>,
    caches: CacheManager,
    config: MigrationConfig,
}

impl LegacyMigration {
    pub fn new(
        storage: Arc<dyn PageStorage>,
        registrations: Arc<dyn RegistrationHost>,
        caches: CacheManager,
        config: MigrationConfig,
    ) -> Self {
        Self {
            storage,
            registrations,
            caches,
            config,
        }
    }

    /// 执行清理；任何失败都只记日志，不影响启动
    pub async fn run(&self) -> MigrationOutcome {
        match self.try_run().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Legacy migration failed, will retry on next load: {}", e);
                MigrationOutcome::Failed(e.to_string())
            }
        }
    }

    async fn try_run(&self) -> Result<MigrationOutcome> {
        if self.storage.get_item(&self.config.flag_key).await?.as_deref() == Some("true") {
            debug!("Legacy migration already done");
            return Ok(MigrationOutcome::AlreadyDone);
        }

        let mut unregistered = Vec::new();
        for registration in self.registrations.registrations().await? {
            if registration.script_url.ends_with(&self.config.legacy_script_suffix) {
                if self.registrations.unregister(&registration.scope).await? {
                    info!("Unregistered legacy worker {}", registration.script_url);
                    unregistered.push(registration.script_url);
                }
            }
        }

        let mut deleted_caches = Vec::new();
        let mut names = self.caches.cache_names().await;
        names.sort();
        for name in names {
            if self.is_legacy_cache(&name) && self.caches.delete_cache(&name).await {
                deleted_caches.push(name);
            }
        }

        self.storage
            .set_item(&self.config.flag_key, "true")
            .await
            .map_err(|e| WorkerError::StorageUnavailable(format!("cannot persist migration flag: {}", e)))?;

        info!(
            "Legacy migration completed: {} registrations, {} caches removed",
            unregistered.len(),
            deleted_caches.len()
        );
        Ok(MigrationOutcome::Completed {
            unregistered,
            deleted_caches,
        })
    }

    fn is_legacy_cache(&self, name: &str) -> bool {
        self.config
            .legacy_cache_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;

    struct FailingStorage;

    #[async_trait]
    impl PageStorage for FailingStorage {
        async fn get_item(&self, _key: &str) -> Result<Option<String>> {
            Err(WorkerError::StorageUnavailable("localStorage disabled".into()))
        }

        async fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
            Err(WorkerError::StorageUnavailable("localStorage disabled".into()))
        }
    }

    fn registrations() -> Arc<StaticRegistrations> {
        Arc::new(StaticRegistrations::new(vec![
            Registration { scope: "https://xpense.app/".into(), script_url: "https://xpense.app/sw.js".into() },
            Registration { scope: "https://xpense.app/app/".into(), script_url: "https://xpense.app/app/service-worker.js".into() },
        ]))
    }

    async fn caches() -> CacheManager {
        let caches = CacheManager::new(1 << 20, HashMap::new(), Arc::new(ManualClock::new(0)));
        for name in ["xpense-cache-v3", "static-resources-v1", "image-cache"] {
            caches.open_cache(name).await;
        }
        caches
    }

    #[tokio::test]
    async fn test_runs_once() {
        let storage = Arc::new(MemoryPageStorage::default());
        let regs = registrations();
        let migration = LegacyMigration::new(storage.clone(), regs.clone(), caches().await, MigrationConfig::default());

        let outcome = migration.run().await;
        assert_eq!(
            outcome,
            MigrationOutcome::Completed {
                unregistered: vec!["https://xpense.app/sw.js".into()],
                deleted_caches: vec!["xpense-cache-v3".into()],
            }
        );
        assert_eq!(regs.registrations().await.unwrap().len(), 1);
        assert_eq!(storage.get_item("xpense-sw-migrated").await.unwrap().as_deref(), Some("true"));

        assert_eq!(migration.run().await, MigrationOutcome::AlreadyDone);
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let regs = registrations();
        let migration = LegacyMigration::new(Arc::new(FailingStorage), regs.clone(), caches().await, MigrationConfig::default());

        assert!(matches!(migration.run().await, MigrationOutcome::Failed(_)));
        assert_eq!(regs.registrations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_file_page_storage_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local-storage.json");

        FilePageStorage::new(&path).set_item("k", "v").await.unwrap();
        let reopened = FilePageStorage::new(&path);
        assert_eq!(reopened.get_item("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(reopened.get_item("missing").await.unwrap(), None);
    }
}
