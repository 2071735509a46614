//! 命名缓存的磁盘布局
//!
//! ```text
//! <root>/<目录名>/index.json    缓存名与按插入顺序排列的条目元数据
//! <root>/<目录名>/<uuid>.body   响应 body
//! ```

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::entry::CacheEntry;
use crate::error::WorkerError;
use crate::http::{Response, ResponseType};
use crate::Result;

const INDEX_FILE: &str = "index.json";
const INDEX_TMP: &str = "index.json.tmp";

#[derive(Debug, Serialize, Deserialize)]
struct CacheIndex {
    name: String,
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    key: String,
    file: String,
    status: u16,
    response_type: ResponseType,
    headers: HashMap<String, String>,
    cached_at_ms: i64,
}

/// 从磁盘读回的一个命名缓存，条目按插入顺序排列
pub(crate) type StoredCache = (String, Vec<(String, CacheEntry)>);

#[derive(Debug)]
pub(crate) struct CacheDisk {
    root: PathBuf,
}

impl CacheDisk {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn new_body_file() -> String {
        format!("{}.body", uuid::Uuid::new_v4())
    }

    fn dir_for(&self, name: &str) -> PathBuf {
        self.root.join(dir_name(name))
    }

    /// 读取全部缓存；根目录不存在时视为空
    pub async fn load(&self) -> Result<Vec<StoredCache>> {
        let mut dirs = match tokio::fs::read_dir(&self.root).await {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(WorkerError::StorageUnavailable(format!(
                    "{}: {}",
                    self.root.display(),
                    e
                )))
            }
        };

        let mut caches = Vec::new();
        while let Some(dir) = dirs.next_entry().await? {
            if !dir.file_type().await?.is_dir() {
                continue;
            }
            let path = dir.path();
            match load_cache(&path).await {
                Ok(Some(cache)) => caches.push(cache),
                Ok(None) => debug!("No cache index in {}", path.display()),
                Err(e) => warn!("Skipping unreadable cache at {}: {}", path.display(), e),
            }
        }
        caches.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(caches)
    }

    /// 原子地重写缓存索引 (先写临时文件再改名)
    pub async fn write_index<'a, I>(&self, name: &str, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a String, &'a CacheEntry)>,
    {
        let dir = self.dir_for(name);
        tokio::fs::create_dir_all(&dir).await?;

        let index = CacheIndex {
            name: name.to_string(),
            entries: entries
                .into_iter()
                .filter_map(|(key, entry)| {
                    // 没有落盘 body 的条目只留在内存里
                    let file = entry.file.clone()?;
                    Some(IndexEntry {
                        key: key.clone(),
                        file,
                        status: entry.response.status,
                        response_type: entry.response.response_type,
                        headers: entry.response.headers.clone(),
                        cached_at_ms: entry.cached_at_ms,
                    })
                })
                .collect(),
        };

        let tmp = dir.join(INDEX_TMP);
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&index)?).await?;
        tokio::fs::rename(&tmp, dir.join(INDEX_FILE)).await?;
        Ok(())
    }

    pub async fn write_body(&self, name: &str, file: &str, body: &[u8]) -> Result<()> {
        let dir = self.dir_for(name);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(file), body).await?;
        Ok(())
    }

    pub async fn remove_body(&self, name: &str, file: &str) {
        let path = self.dir_for(name).join(file);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove cached body {}: {}", path.display(), e);
            }
        }
    }

    pub async fn remove_cache(&self, name: &str) -> Result<()> {
        match tokio::fs::remove_dir_all(self.dir_for(name)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

async fn load_cache(dir: &Path) -> Result<Option<StoredCache>> {
    let content = match tokio::fs::read(dir.join(INDEX_FILE)).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let index: CacheIndex = serde_json::from_slice(&content)?;

    let mut entries = Vec::with_capacity(index.entries.len());
    for item in index.entries {
        match tokio::fs::read(dir.join(&item.file)).await {
            Ok(body) => {
                let mut response = Response::new(item.status, body);
                response.response_type = item.response_type;
                response.headers = item.headers;
                let entry = CacheEntry::new(response, item.cached_at_ms).with_file(item.file);
                entries.push((item.key, entry));
            }
            Err(e) => warn!("Missing body for {} in {}: {}", item.key, index.name, e),
        }
    }
    debug!("Loaded {} entries for cache {}", entries.len(), index.name);
    Ok(Some((index.name, entries)))
}

/// 缓存名转目录名：字母数字、`-`、`_` 原样保留，其余字节写成 `%XX`
fn dir_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_name_escapes_path_characters() {
        assert_eq!(dir_name("static-resources-v1"), "static-resources-v1");
        assert_eq!(dir_name("data_cache"), "data_cache");
        assert_eq!(dir_name("../x"), "%2E%2E%2Fx");
        assert_eq!(dir_name("a%b"), "a%25b");
    }

    #[tokio::test]
    async fn test_load_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let disk = CacheDisk::new(dir.path().join("absent"));
        assert!(disk.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_index_round_trip_skips_missing_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let disk = CacheDisk::new(dir.path());

        let mut response = Response::new(200, "body{}").with_header("content-type", "text/css");
        response.response_type = ResponseType::Opaque;
        let kept = CacheEntry::new(response, 42).with_file("kept.body".to_string());
        let lost = CacheEntry::new(Response::new(200, "x"), 43).with_file("lost.body".to_string());
        let memory_only = CacheEntry::new(Response::new(200, "y"), 44);

        disk.write_body("image cache", "kept.body", b"body{}").await.unwrap();
        let (a, b, c) = ("a".to_string(), "b".to_string(), "c".to_string());
        disk.write_index("image cache", vec![(&a, &kept), (&b, &lost), (&c, &memory_only)])
            .await
            .unwrap();

        let caches = disk.load().await.unwrap();
        assert_eq!(caches.len(), 1);
        let (name, entries) = &caches[0];
        assert_eq!(name, "image cache");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "a");
        let entry = &entries[0].1;
        assert_eq!(&entry.response.body[..], b"body{}");
        assert_eq!(entry.response.response_type, ResponseType::Opaque);
        assert_eq!(entry.response.headers.get("content-type").map(String::as_str), Some("text/css"));
        assert_eq!(entry.cached_at_ms, 42);
        assert!(!dir.path().join("image%20cache").join(INDEX_TMP).exists());
    }
}
