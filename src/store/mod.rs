//! worker 上下文可用的小型文档存储 (对应浏览器里的 IndexedDB)。
//!
//! 数据库文件为 `<data_dir>/<name>.json`，内容是按 object store 分组的记录。
//! 首次打开时按需创建缺失的 object store，除此之外没有版本迁移。

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, debug};

use crate::error::WorkerError;
use crate::Result;

mod timestamps;

pub use timestamps::{TimestampKey, TimestampSnapshot, TimestampStore};

pub const DB_NAME: &str = "XpenseDB";
pub const DB_VERSION: u32 = 1;
pub const SETTINGS_STORE: &str = "settings";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: JsonValue,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Database {
    version: u32,
    stores: BTreeMap<String, BTreeMap<String, Record>>,
}

#[derive(Debug)]
pub struct DocumentStore {
    path: PathBuf,
    object_stores: Vec<String>,
    db: Mutex<Option<Database>>,
}

impl DocumentStore {
    pub fn new<P: AsRef<Path>>(data_dir: P, name: &str, object_stores: &[&str]) -> Self {
        Self {
            path: data_dir.as_ref().join(format!("{}.json", name)),
            object_stores: object_stores.iter().map(|s| s.to_string()).collect(),
            db: Mutex::new(None),
        }
    }

    /// `XpenseDB` v1，只有一个 `settings` store
    pub fn xpense<P: AsRef<Path>>(data_dir: P) -> Self {
        Self::new(data_dir, DB_NAME, &[SETTINGS_STORE])
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> Result<Database> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkerError::StorageUnavailable(format!("{}: {}", parent.display(), e)))?;
        }

        let mut db = match tokio::fs::read(&self.path).await {
            Ok(content) => serde_json::from_slice::<Database>(&content)
                .map_err(|e| WorkerError::StorageUnavailable(format!("corrupt database {}: {}", self.path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Database::default(),
            Err(e) => return Err(WorkerError::StorageUnavailable(e.to_string())),
        };

        // upgrade: 只创建缺失的 object store
        for store in &self.object_stores {
            if !db.stores.contains_key(store) {
                info!("Creating object store {} in {}", store, self.path.display());
                db.stores.insert(store.clone(), BTreeMap::new());
            }
        }
        db.version = db.version.max(DB_VERSION);
        Ok(db)
    }

    async fn persist(&self, db: &Database) -> Result<()> {
        let content = serde_json::to_vec_pretty(db)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| WorkerError::StorageUnavailable(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| WorkerError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    pub async fn get(&self, store: &str, key: &str) -> Result<Option<Record>> {
        let mut guard = self.db.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        let db = guard.as_ref().ok_or_else(|| WorkerError::StorageUnavailable("database not open".into()))?;
        let records = db
            .stores
            .get(store)
            .ok_or_else(|| WorkerError::StorageUnavailable(format!("no object store {}", store)))?;
        Ok(records.get(key).cloned())
    }

    pub async fn put(&self, store: &str, record: Record) -> Result<()> {
        let mut guard = self.db.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        let db = guard.as_mut().ok_or_else(|| WorkerError::StorageUnavailable("database not open".into()))?;
        let records = db
            .stores
            .get_mut(store)
            .ok_or_else(|| WorkerError::StorageUnavailable(format!("no object store {}", store)))?;

        debug!("Writing {}/{}", store, record.key);
        records.insert(record.key.clone(), record);
        self.persist(db).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::xpense(dir.path());
        assert_eq!(store.get(SETTINGS_STORE, "lastActivityTime").await.unwrap(), None);

        store
            .put(SETTINGS_STORE, Record { key: "lastActivityTime".into(), value: json!(42) })
            .await
            .unwrap();

        let reopened = DocumentStore::xpense(dir.path());
        let record = reopened.get(SETTINGS_STORE, "lastActivityTime").await.unwrap().unwrap();
        assert_eq!(record.value, json!(42));
    }

    #[tokio::test]
    async fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::xpense(dir.path());
        store
            .put(SETTINGS_STORE, Record { key: "k".into(), value: json!(1) })
            .await
            .unwrap();

        let raw: JsonValue = serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], json!(1));
        assert_eq!(raw["stores"]["settings"]["k"], json!({ "key": "k", "value": 1 }));
    }

    #[tokio::test]
    async fn test_unknown_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::xpense(dir.path());
        assert!(store.get("missing", "k").await.is_err());
    }

    #[tokio::test]
    async fn test_unavailable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let store = DocumentStore::xpense(blocker.join("nested"));
        let err = store.get(SETTINGS_STORE, "k").await.unwrap_err();
        assert!(matches!(err, WorkerError::StorageUnavailable(_)));
    }
}
