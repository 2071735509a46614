use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, debug};

use crate::cache::{CacheManager, CacheNames};
use crate::http::{Destination, Request, Response};
use crate::network::Fetcher;
use crate::Result;

mod offline;
mod strategy;

pub use offline::{offline_page, OFFLINE_HTML, OFFLINE_PATH};
pub use strategy::{cache_first, network_first, stale_while_revalidate};

pub const DATA_PATH: &str = "/data";

/// 请求分类，先匹配者优先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// style/script/font -> static-resources, Stale-While-Revalidate
    StaticAsset,
    /// image -> image-cache, Cache-First
    Image,
    /// `/data` -> data-cache, Network-First
    Data,
    /// 导航请求，失败时返回离线页
    Navigation,
    PassThrough,
}

pub fn classify(request: &Request) -> Route {
    if !request.is_get() {
        return Route::PassThrough;
    }
    match request.destination {
        Destination::Style | Destination::Script | Destination::Font => return Route::StaticAsset,
        Destination::Image => return Route::Image,
        _ => {}
    }
    if request.url.path() == DATA_PATH {
        return Route::Data;
    }
    if request.is_navigation() {
        return Route::Navigation;
    }
    Route::PassThrough
}

pub struct FetchInterceptor {
    caches: CacheManager,
    names: CacheNames,
    fetcher: Arc<dyn Fetcher>,
    network_timeout: Duration,
}

impl FetchInterceptor {
    pub fn new(caches: CacheManager, names: CacheNames, fetcher: Arc<dyn Fetcher>, network_timeout: Duration) -> Self {
        Self {
            caches,
            names,
            fetcher,
            network_timeout,
        }
    }

    #[tracing::instrument(skip(self, request), fields(url = %request.url))]
    pub async fn handle_fetch(&self, request: Request) -> Result<Response> {
        let route = classify(&request);
        debug!("Routing {} {} as {:?}", request.method, request.url, route);

        match route {
            Route::StaticAsset => {
                let cache = self.caches.open_cache(&self.names.static_resources).await;
                stale_while_revalidate(cache, self.fetcher.clone(), request).await
            }
            Route::Image => {
                let cache = self.caches.open_cache(&self.names.images).await;
                cache_first(cache, self.fetcher.clone(), request).await
            }
            Route::Data => {
                let cache = self.caches.open_cache(&self.names.data).await;
                network_first(cache, self.fetcher.clone(), request, self.network_timeout).await
            }
            Route::Navigation => match self.fetcher.fetch(&request).await {
                Ok(response) => Ok(response),
                Err(e) if e.is_network_failure() => {
                    warn!("Navigation to {} failed: {}, serving offline page", request.url, e);
                    Ok(self.offline_fallback(&request).await)
                }
                Err(e) => Err(e),
            },
            Route::PassThrough => self.fetcher.fetch(&request).await,
        }
    }

    /// 优先使用预缓存的 offline.html，没有则即时生成
    async fn offline_fallback(&self, request: &Request) -> Response {
        if let Ok(url) = request.url.join(OFFLINE_PATH) {
            let key = url.to_string();
            if let Some(cached) = self.caches.match_entry(&self.names.offline, &key).await {
                debug!("Serving precached offline page");
                return cached;
            }
            if let Some(cached) = self.caches.match_any(&key).await {
                debug!("Serving offline page from another cache");
                return cached;
            }
        }
        info!("No precached offline page, generating one");
        offline_page()
    }
}
