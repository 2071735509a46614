use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, debug};
use super::CacheManager;

/// 定期清理所有缓存中的过期条目
pub struct CacheCleaner {
    cache: CacheManager,
    interval: Duration,
}

impl CacheCleaner {
    pub fn new(cache: CacheManager, interval: Duration) -> Self {
        Self {
            cache,
            interval,
        }
    }

    pub fn start(&self) -> JoinHandle<()> {
        info!("Starting cache cleaner with interval {:?}", self.interval);
        let cache = self.cache.clone();
        let interval = self.interval;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                debug!("Running cache cleanup cycle");
                let removed = cache.sweep().await;
                debug!("Cache cleanup removed {} entries", removed);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePolicy;
    use crate::http::Response;
    use crate::testing::ManualClock;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_cleaner_sweeps_periodically() {
        let clock = ManualClock::new(0);
        let mut policies = HashMap::new();
        policies.insert("data-cache".to_string(), CachePolicy::default().with_max_age(Duration::from_secs(30)));
        let manager = CacheManager::new(1024, policies, Arc::new(clock.clone()));
        let cache = manager.open_cache("data-cache").await;
        cache.put("k", Response::new(200, "x")).await;

        let handle = CacheCleaner::new(manager.clone(), Duration::from_secs(60)).start();
        clock.advance(Duration::from_secs(61));
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(cache.len().await, 0);
        handle.abort();
    }
}
