use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::CacheHandle;
use crate::error::WorkerError;
use crate::http::{Request, Response};
use crate::network::Fetcher;
use crate::Result;

/// 有缓存立即返回，同时后台刷新；无缓存则等待网络
pub async fn stale_while_revalidate(
    cache: CacheHandle,
    fetcher: Arc<dyn Fetcher>,
    request: Request,
) -> Result<Response> {
    let key = request.cache_key();
    if let Some(cached) = cache.match_request(&key).await {
        debug!("SWR hit in {} for {}, revalidating", cache.name(), key);
        tokio::spawn(async move {
            match fetcher.fetch(&request).await {
                Ok(response) => {
                    cache.put(&key, response).await;
                }
                Err(e) => debug!("Background revalidation of {} failed: {}", key, e),
            }
        });
        return Ok(cached);
    }

    let response = fetcher.fetch(&request).await?;
    cache.put(&key, response.clone()).await;
    Ok(response)
}

/// 优先缓存，未命中时走网络并写回
pub async fn cache_first(
    cache: CacheHandle,
    fetcher: Arc<dyn Fetcher>,
    request: Request,
) -> Result<Response> {
    let key = request.cache_key();
    if let Some(cached) = cache.match_request(&key).await {
        debug!("Cache-first hit in {} for {}", cache.name(), key);
        return Ok(cached);
    }

    let response = fetcher.fetch(&request).await?;
    cache.put(&key, response.clone()).await;
    Ok(response)
}

/// 网络优先，与超时赛跑；超时或失败时回退缓存
///
/// 网络请求在独立任务中完成并写缓存，超时后返回的响应仍会刷新缓存。
/// 超时但缓存未命中时继续等待网络结果。
pub async fn network_first(
    cache: CacheHandle,
    fetcher: Arc<dyn Fetcher>,
    request: Request,
    timeout: Duration,
) -> Result<Response> {
    let key = request.cache_key();

    let mut network = {
        let cache = cache.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let response = fetcher.fetch(&request).await?;
            cache.put(&key, response.clone()).await;
            Ok::<_, WorkerError>(response)
        })
    };

    match tokio::time::timeout(timeout, &mut network).await {
        Ok(joined) => match flatten(joined) {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!("Network failed for {}: {}, trying cache", key, e);
                cache.match_request(&key).await.ok_or(e)
            }
        },
        Err(_) => {
            warn!("Network timed out after {:?} for {}, trying cache", timeout, key);
            if let Some(cached) = cache.match_request(&key).await {
                return Ok(cached);
            }
            debug!("No cached entry for {}, waiting for network", key);
            flatten(network.await)
        }
    }
}

fn flatten(joined: std::result::Result<Result<Response>, tokio::task::JoinError>) -> Result<Response> {
    joined.map_err(|e| WorkerError::Network(format!("fetch task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheManager, CachePolicy};
    use crate::testing::{ManualClock, MockFetcher};
    use std::collections::HashMap;
    use url::Url;

    const URL: &str = "https://xpense.app/assets/app.css";

    async fn setup() -> (CacheHandle, Arc<MockFetcher>) {
        let mut policies = HashMap::new();
        policies.insert("c".to_string(), CachePolicy::default());
        let manager = CacheManager::new(1 << 20, policies, Arc::new(ManualClock::new(0)));
        (manager.open_cache("c").await, Arc::new(MockFetcher::new()))
    }

    /// 配额只有 16 字节的缓存，任何较大的响应都存不下
    async fn tiny_quota() -> (CacheHandle, Arc<MockFetcher>) {
        let manager = CacheManager::new(16, HashMap::new(), Arc::new(ManualClock::new(0)));
        (manager.open_cache("c").await, Arc::new(MockFetcher::new()))
    }

    fn request() -> Request {
        Request::get(Url::parse(URL).unwrap())
    }

    #[tokio::test]
    async fn test_swr_serves_cached_and_refreshes() {
        let (cache, fetcher) = setup().await;
        cache.put(URL, Response::new(200, "old")).await;
        fetcher.respond(URL, Response::new(200, "new"));

        let response = stale_while_revalidate(cache.clone(), fetcher.clone(), request()).await.unwrap();
        assert_eq!(&response.body[..], b"old");

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(&cache.match_request(URL).await.unwrap().body[..], b"new");
    }

    #[tokio::test]
    async fn test_swr_miss_blocks_on_network() {
        let (cache, fetcher) = setup().await;
        fetcher.respond(URL, Response::new(200, "fresh"));

        let response = stale_while_revalidate(cache.clone(), fetcher.clone(), request()).await.unwrap();
        assert_eq!(&response.body[..], b"fresh");
        assert!(cache.match_request(URL).await.is_some());
    }

    #[tokio::test]
    async fn test_swr_miss_offline_propagates() {
        let (cache, fetcher) = setup().await;
        let err = stale_while_revalidate(cache, fetcher, request()).await.unwrap_err();
        assert!(err.is_network_failure());
    }

    #[tokio::test]
    async fn test_cache_first_skips_network_on_hit() {
        let (cache, fetcher) = setup().await;
        cache.put(URL, Response::new(200, "cached")).await;

        let response = cache_first(cache, fetcher.clone(), request()).await.unwrap();
        assert_eq!(&response.body[..], b"cached");
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_first_miss_stores_response() {
        let (cache, fetcher) = setup().await;
        fetcher.respond(URL, Response::new(200, "img"));

        cache_first(cache.clone(), fetcher.clone(), request()).await.unwrap();
        cache_first(cache.clone(), fetcher.clone(), request()).await.unwrap();
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_first_does_not_store_404() {
        let (cache, fetcher) = setup().await;
        fetcher.respond(URL, Response::new(404, "missing"));

        let response = cache_first(cache.clone(), fetcher, request()).await.unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_first_timeout_uses_cache_then_refreshes() {
        let (cache, fetcher) = setup().await;
        cache.put(URL, Response::new(200, "cached")).await;
        fetcher.delay(URL, Duration::from_secs(5), Response::new(200, "late"));

        let started = tokio::time::Instant::now();
        let response = network_first(cache.clone(), fetcher, request(), Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(&response.body[..], b"cached");
        assert!(started.elapsed() <= Duration::from_millis(3100));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(&cache.match_request(URL).await.unwrap().body[..], b"late");
    }

    #[tokio::test]
    async fn test_network_first_success_stores() {
        let (cache, fetcher) = setup().await;
        cache.put(URL, Response::new(200, "cached")).await;
        fetcher.respond(URL, Response::new(200, "fresh"));

        let response = network_first(cache.clone(), fetcher, request(), Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(&response.body[..], b"fresh");
        assert_eq!(&cache.match_request(URL).await.unwrap().body[..], b"fresh");
    }

    #[tokio::test]
    async fn test_network_first_failure_falls_back() {
        let (cache, fetcher) = setup().await;
        cache.put(URL, Response::new(200, "cached")).await;
        fetcher.fail(URL);

        let response = network_first(cache.clone(), fetcher.clone(), request(), Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(&response.body[..], b"cached");

        cache.delete(URL).await;
        assert!(network_first(cache, fetcher, request(), Duration::from_secs(3)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_first_timeout_without_cache_waits() {
        let (cache, fetcher) = setup().await;
        fetcher.delay(URL, Duration::from_secs(5), Response::new(200, "slow"));

        let response = network_first(cache, fetcher, request(), Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(&response.body[..], b"slow");
    }

    #[tokio::test]
    async fn test_cache_first_serves_response_when_quota_exceeded() {
        let (cache, fetcher) = tiny_quota().await;
        fetcher.respond(URL, Response::new(200, vec![7u8; 64]));

        let response = cache_first(cache.clone(), fetcher, request()).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body.len(), 64);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_network_first_serves_response_when_quota_exceeded() {
        let (cache, fetcher) = tiny_quota().await;
        cache.put(URL, Response::new(200, "old")).await;
        fetcher.respond(URL, Response::new(200, vec![7u8; 64]));

        let response = network_first(cache.clone(), fetcher, request(), Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(response.body.len(), 64);
        assert_eq!(cache.keys().await, vec![URL.to_string()]);
        assert_eq!(&cache.match_request(URL).await.unwrap().body[..], b"old");
    }
}
