use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use serde::Serialize;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{info, warn, debug};

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::error::WorkerError;
use crate::http::Response;
use crate::Result;

mod cleaner;
mod disk;
mod entry;
mod names;
mod policy;

pub use cleaner::CacheCleaner;
pub use names::{CacheNames, DATA_CACHE, IMAGE_CACHE, OFFLINE_FALLBACK, STATIC_RESOURCES};
pub use policy::CachePolicy;
use disk::CacheDisk;
use entry::CacheEntry;

/// 所有命名缓存的持有者，对应 worker 里的 `caches`
///
/// 设置了存储目录时，每次修改都会同步写到磁盘，首次访问时从磁盘载入。
#[derive(Debug, Clone)]
pub struct CacheManager {
    state: Arc<RwLock<CacheState>>,
    policies: Arc<HashMap<String, CachePolicy>>,
    disk: Option<Arc<CacheDisk>>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug)]
struct CacheState {
    caches: HashMap<String, NamedCache>,
    max_space: u64,
    last_cleanup_ms: Option<i64>,
    loaded: bool,
}

#[derive(Debug)]
struct NamedCache {
    policy: CachePolicy,
    entries: HashMap<String, CacheEntry>,
    // 插入顺序，队首最旧
    order: VecDeque<String>,
    used_space: u64,
}

/// `put` 的结果，缓存写入失败从不向调用方抛错
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    Rejected { status: u16 },
    Dropped,
}

/// 某个命名缓存的句柄
#[derive(Debug, Clone)]
pub struct CacheHandle {
    name: String,
    manager: CacheManager,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub caches: Vec<NamedCacheStats>,
    pub used_space: u64,
    pub max_space: u64,
    pub usage_percent: f64,
    pub last_cleanup_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamedCacheStats {
    pub name: String,
    pub entries: usize,
    pub used_space: u64,
}

impl NamedCache {
    fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
            order: VecDeque::new(),
            used_space: 0,
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        self.used_space -= entry.size;
        Some(entry)
    }

    /// 写入条目，返回被覆盖的旧条目
    fn insert(&mut self, key: String, entry: CacheEntry) -> Option<CacheEntry> {
        // 覆盖写视为一次新的插入
        let replaced = self.remove(&key);
        self.used_space += entry.size;
        self.order.push_back(key.clone());
        self.entries.insert(key, entry);
        replaced
    }

    fn pop_oldest(&mut self) -> Option<(String, CacheEntry)> {
        let key = self.order.pop_front()?;
        let entry = self.entries.remove(&key)?;
        self.used_space -= entry.size;
        Some((key, entry))
    }

    fn evict_over_capacity(&mut self) -> Vec<CacheEntry> {
        let max_entries = match self.policy.max_entries {
            Some(max) => max,
            None => return Vec::new(),
        };
        let mut evicted = Vec::new();
        while self.entries.len() > max_entries {
            match self.pop_oldest() {
                Some((_, entry)) => evicted.push(entry),
                None => break,
            }
        }
        evicted
    }

    fn evict_expired(&mut self, now_ms: i64) -> Vec<CacheEntry> {
        let expired: Vec<String> = self
            .order
            .iter()
            .filter(|key| {
                self.entries
                    .get(*key)
                    .map(|e| self.policy.is_expired(e.cached_at_ms, now_ms))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        expired.iter().filter_map(|key| self.remove(key)).collect()
    }

    /// 按插入顺序遍历
    fn ordered(&self) -> impl Iterator<Item = (&String, &CacheEntry)> {
        self.order
            .iter()
            .filter_map(move |key| self.entries.get(key).map(|entry| (key, entry)))
    }
}

impl CacheState {
    fn used_space(&self) -> u64 {
        self.caches.values().map(|c| c.used_space).sum()
    }

    /// 检查写入 `size` 字节后是否超出配额
    fn check_quota(&self, name: &str, key: &str, size: u64) -> Result<()> {
        let replaced = self
            .caches
            .get(name)
            .and_then(|c| c.entries.get(key))
            .map(|e| e.size)
            .unwrap_or(0);
        let used = self.used_space() - replaced;
        if used + size > self.max_space {
            return Err(WorkerError::QuotaExceeded {
                cache: name.to_string(),
                needed: size,
                available: self.max_space.saturating_sub(used),
            });
        }
        Ok(())
    }
}

impl CacheManager {
    pub fn new(max_space: u64, policies: HashMap<String, CachePolicy>, clock: Arc<dyn Clock>) -> Self {
        info!("Initializing cache manager, max space: {} bytes, {} policies", max_space, policies.len());
        Self {
            state: Arc::new(RwLock::new(CacheState {
                caches: HashMap::new(),
                max_space,
                last_cleanup_ms: None,
                loaded: false,
            })),
            policies: Arc::new(policies),
            disk: None,
            clock,
        }
    }

    /// 按配置为当前这一代的缓存名建立策略
    pub fn from_config(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let names = CacheNames::new(&config.version);
        let mut policies = HashMap::new();
        policies.insert(names.static_resources, CachePolicy::from(&config.static_resources));
        policies.insert(names.images, CachePolicy::from(&config.images));
        policies.insert(names.data, CachePolicy::from(&config.data));
        policies.insert(names.offline, CachePolicy::from(&config.offline));
        Self::new(config.max_space, policies, clock)
    }

    /// 把缓存持久化到 `root` 下，每个命名缓存一个目录
    pub fn persist_to<P: AsRef<Path>>(mut self, root: P) -> Self {
        info!("Persisting caches under {}", root.as_ref().display());
        self.disk = Some(Arc::new(CacheDisk::new(root)));
        self
    }

    fn policy_for(&self, name: &str) -> CachePolicy {
        self.policies.get(name).cloned().unwrap_or_default()
    }

    /// 取写锁；第一次访问时从磁盘载入已有缓存
    async fn state_mut(&self) -> RwLockWriteGuard<'_, CacheState> {
        let mut state = self.state.write().await;
        if state.loaded {
            return state;
        }
        state.loaded = true;

        let disk = match &self.disk {
            Some(disk) => disk,
            None => return state,
        };
        match disk.load().await {
            Ok(stored) => {
                for (name, entries) in stored {
                    let mut cache = NamedCache::new(self.policy_for(&name));
                    for (key, entry) in entries {
                        cache.insert(key, entry);
                    }
                    state.caches.insert(name, cache);
                }
                info!("Loaded {} caches from {}", state.caches.len(), disk.root().display());
            }
            Err(e) => warn!("Cache storage unreadable, starting empty: {}", e),
        }
        state
    }

    async fn persist_index(&self, name: &str, cache: &NamedCache) {
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.write_index(name, cache.ordered()).await {
                warn!("Failed to persist index of cache {}: {}", name, e);
            }
        }
    }

    async fn discard_bodies(&self, name: &str, removed: Vec<CacheEntry>) {
        if let Some(disk) = &self.disk {
            for entry in removed {
                if let Some(file) = entry.file {
                    disk.remove_body(name, &file).await;
                }
            }
        }
    }

    /// 打开命名缓存，不存在时创建；重复调用无副作用
    pub async fn open_cache(&self, name: &str) -> CacheHandle {
        let mut state = self.state_mut().await;
        if !state.caches.contains_key(name) {
            debug!("Creating cache: {}", name);
            let cache = NamedCache::new(self.policy_for(name));
            self.persist_index(name, &cache).await;
            state.caches.insert(name.to_string(), cache);
        }
        CacheHandle {
            name: name.to_string(),
            manager: self.clone(),
        }
    }

    /// 查找缓存条目；过期条目视为不存在并顺带删除
    pub async fn match_entry(&self, name: &str, key: &str) -> Option<Response> {
        let now = self.clock.now_ms();
        let mut state = self.state_mut().await;
        let cache = state.caches.get_mut(name)?;

        let expired = {
            let entry = cache.entries.get(key)?;
            cache.policy.is_expired(entry.cached_at_ms, now)
        };
        if expired {
            debug!("Cache entry expired in {}: {}", name, key);
            let removed: Vec<CacheEntry> = cache.remove(key).into_iter().collect();
            self.persist_index(name, cache).await;
            self.discard_bodies(name, removed).await;
            return None;
        }

        let entry = cache.entries.get(key)?;
        debug!("Cache hit in {} for {} (age {}ms)", name, key, entry.age_ms(now));
        Some(entry.response.clone())
    }

    /// 在所有缓存里查找 (对应 `caches.match`)
    pub async fn match_any(&self, key: &str) -> Option<Response> {
        let mut names = self.cache_names().await;
        names.sort();
        for name in names {
            if let Some(response) = self.match_entry(&name, key).await {
                return Some(response);
            }
        }
        None
    }

    pub async fn put(&self, name: &str, key: &str, response: Response) -> PutOutcome {
        let policy = self.policy_for(name);
        let mut state = self.state_mut().await;
        let policy = state.caches.get(name).map(|c| c.policy.clone()).unwrap_or(policy);

        if response.is_error() || !policy.accepts(response.status) {
            debug!("Not caching {} in {}: status {} not accepted", key, name, response.status);
            return PutOutcome::Rejected { status: response.status };
        }

        let now = self.clock.now_ms();
        let mut entry = CacheEntry::new(response, now);
        let size = entry.size;

        if size > state.max_space {
            warn!("Response for {} ({} bytes) larger than cache quota, not caching", key, size);
            return PutOutcome::Dropped;
        }

        // 超出配额时清理同一缓存里最旧的条目
        let mut removed = Vec::new();
        let mut dropped = false;
        while let Err(e) = state.check_quota(name, key, size) {
            warn!("{}, purging oldest entry", e);
            match state.caches.get_mut(name).and_then(|c| c.pop_oldest()) {
                Some((purged_key, purged)) => {
                    debug!("Purged {} from {}", purged_key, name);
                    removed.push(purged);
                }
                None => {
                    warn!("Nothing left to purge in {}, dropping {}", name, key);
                    dropped = true;
                    break;
                }
            }
        }
        if dropped {
            if !removed.is_empty() {
                if let Some(cache) = state.caches.get(name) {
                    self.persist_index(name, cache).await;
                }
                self.discard_bodies(name, removed).await;
            }
            return PutOutcome::Dropped;
        }

        if let Some(disk) = &self.disk {
            let file = CacheDisk::new_body_file();
            let written = disk.write_body(name, &file, &entry.response.body).await;
            match written {
                Ok(()) => entry = entry.with_file(file),
                Err(e) => warn!("Failed to persist body of {} in {}: {}", key, name, e),
            }
        }

        let cache = state
            .caches
            .entry(name.to_string())
            .or_insert_with(|| NamedCache::new(policy));
        removed.extend(cache.insert(key.to_string(), entry));

        let evicted = cache.evict_over_capacity();
        let expired = cache.evict_expired(now);
        if !evicted.is_empty() || !expired.is_empty() {
            debug!("Evicted {} entries from {} after put", evicted.len() + expired.len(), name);
        }
        removed.extend(evicted);
        removed.extend(expired);
        debug!("Stored {} bytes in {} for {}", size, name, key);

        let stored = cache.entries.contains_key(key);
        self.persist_index(name, cache).await;
        self.discard_bodies(name, removed).await;

        if stored {
            PutOutcome::Stored
        } else {
            PutOutcome::Dropped
        }
    }

    pub async fn delete_entry(&self, name: &str, key: &str) -> bool {
        let mut state = self.state_mut().await;
        let cache = match state.caches.get_mut(name) {
            Some(cache) => cache,
            None => return false,
        };
        match cache.remove(key) {
            Some(entry) => {
                self.persist_index(name, cache).await;
                self.discard_bodies(name, vec![entry]).await;
                true
            }
            None => false,
        }
    }

    async fn remove_from_disk(&self, name: &str) {
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.remove_cache(name).await {
                warn!("Failed to remove stored cache {}: {}", name, e);
            }
        }
    }

    pub async fn delete_cache(&self, name: &str) -> bool {
        let mut state = self.state_mut().await;
        let removed = state.caches.remove(name).is_some();
        if removed {
            self.remove_from_disk(name).await;
            info!("Deleted cache: {}", name);
        }
        removed
    }

    pub async fn has_cache(&self, name: &str) -> bool {
        self.state_mut().await.caches.contains_key(name)
    }

    pub async fn cache_names(&self) -> Vec<String> {
        self.state_mut().await.caches.keys().cloned().collect()
    }

    /// 删除不在 `current` 中的缓存，返回被删除的名字
    pub async fn cleanup_stale(&self, current: &HashSet<String>) -> Vec<String> {
        let mut state = self.state_mut().await;
        let mut stale: Vec<String> = state
            .caches
            .keys()
            .filter(|name| !current.contains(*name))
            .cloned()
            .collect();
        stale.sort();

        for name in &stale {
            state.caches.remove(name);
            self.remove_from_disk(name).await;
            info!("Deleted stale cache: {}", name);
        }
        stale
    }

    /// 清理所有缓存中的过期条目
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let mut state = self.state_mut().await;
        let touched: Vec<(String, Vec<CacheEntry>)> = state
            .caches
            .iter_mut()
            .map(|(name, c)| {
                let mut removed = c.evict_expired(now);
                removed.extend(c.evict_over_capacity());
                (name.clone(), removed)
            })
            .filter(|(_, removed)| !removed.is_empty())
            .collect();

        let mut count = 0;
        for (name, removed) in touched {
            count += removed.len();
            if let Some(cache) = state.caches.get(&name) {
                self.persist_index(&name, cache).await;
            }
            self.discard_bodies(&name, removed).await;
        }
        state.last_cleanup_ms = Some(now);
        info!("Cache sweep completed, removed {} entries", count);
        count
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state_mut().await;
        let mut caches: Vec<NamedCacheStats> = state
            .caches
            .iter()
            .map(|(name, c)| NamedCacheStats {
                name: name.clone(),
                entries: c.entries.len(),
                used_space: c.used_space,
            })
            .collect();
        caches.sort_by(|a, b| a.name.cmp(&b.name));

        let used_space = state.used_space();
        CacheStats {
            caches,
            used_space,
            max_space: state.max_space,
            usage_percent: if state.max_space == 0 {
                0.0
            } else {
                (used_space as f64 / state.max_space as f64) * 100.0
            },
            last_cleanup_ms: state.last_cleanup_ms,
        }
    }
}

impl CacheHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn match_request(&self, key: &str) -> Option<Response> {
        self.manager.match_entry(&self.name, key).await
    }

    pub async fn put(&self, key: &str, response: Response) -> PutOutcome {
        self.manager.put(&self.name, key, response).await
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.manager.delete_entry(&self.name, key).await
    }

    /// 按插入顺序返回所有键
    pub async fn keys(&self) -> Vec<String> {
        let state = self.manager.state_mut().await;
        state
            .caches
            .get(&self.name)
            .map(|c| c.order.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        let state = self.manager.state_mut().await;
        state.caches.get(&self.name).map(|c| c.entries.len()).unwrap_or(0)
    }
}
