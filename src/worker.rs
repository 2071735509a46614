//! worker 生命周期与事件分发
//!
//! ```text
//! page ── WorkerMessage ──> Messenger ──> TimestampStore <── InactivityScheduler ──> Notifier
//!   │                                                            ^
//!   └── Request ──> FetchInterceptor ──> CacheManager            │
//!                          │                                 timer / sync / periodicsync
//!                          └──> Fetcher
//! ```
//!
//! 每个事件处理函数都在边界处吞掉错误并记录日志，fetch 总会得到一个响应。

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn, error, debug};
use url::Url;

use crate::cache::{CacheCleaner, CacheManager, CacheNames, CacheStats, PutOutcome};
use crate::clock::Clock;
use crate::config::Config;
use crate::http::{Request, Response};
use crate::intercept::{FetchInterceptor, OFFLINE_PATH};
use crate::messenger::{Messenger, MessengerHandle, WorkerMessage};
use crate::network::Fetcher;
use crate::scheduler::{
    handle_notification_click, register_if_supported, Capability, ClickOutcome, InactivityScheduler,
    LastTick, Notifier, PeriodicSync, SchedulerSettings, TickOutcome, WindowClients, INACTIVITY_SYNC_TAG,
};
use crate::store::{DocumentStore, TimestampSnapshot, TimestampStore};
use crate::Result;

/// 命名缓存在 `data_dir` 下的子目录
pub const CACHE_DIR: &str = "caches";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

/// worker 依赖的宿主能力
pub struct WorkerHost {
    pub fetcher: Arc<dyn Fetcher>,
    pub notifier: Arc<dyn Notifier>,
    pub clients: Arc<dyn WindowClients>,
    pub periodic_sync: Arc<dyn PeriodicSync>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install(Vec<Url>),
    Activate,
    Fetch(Request),
    Message(WorkerMessage),
    Sync(String),
    PeriodicSync(String),
    NotificationClick(Option<String>),
}

#[derive(Debug, Clone)]
pub enum EventOutcome {
    Installed(usize),
    Activated,
    Response(Response),
    MessageApplied,
    Tick(Option<TickOutcome>),
    Click(Option<ClickOutcome>),
}

/// 同步状态快照，供前台读取
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub cache_version: String,
    pub scheduler_running: bool,
    pub periodic_sync: Option<Capability>,
    pub last_tick: Option<LastTick>,
    pub caches: CacheStats,
    pub timestamps: TimestampSnapshot,
}

pub struct ServiceWorker {
    state: RwLock<WorkerState>,
    cache_version: String,
    caches: CacheManager,
    names: CacheNames,
    interceptor: FetchInterceptor,
    fetcher: Arc<dyn Fetcher>,
    store: TimestampStore,
    messenger: Messenger,
    scheduler: InactivityScheduler,
    clients: Arc<dyn WindowClients>,
    periodic_sync: Arc<dyn PeriodicSync>,
    periodic_capability: RwLock<Option<Capability>>,
    cleanup_interval: Duration,
    cleaner: Mutex<Option<JoinHandle<()>>>,
    clock: Arc<dyn Clock>,
}

impl ServiceWorker {
    pub fn new(config: &Config, host: WorkerHost) -> Self {
        let names = CacheNames::new(&config.cache.version);
        let caches = CacheManager::from_config(&config.cache, host.clock.clone())
            .persist_to(config.store.data_dir.join(CACHE_DIR));
        let interceptor = FetchInterceptor::new(
            caches.clone(),
            names.clone(),
            host.fetcher.clone(),
            config.network.timeout(),
        );
        let db = Arc::new(DocumentStore::xpense(&config.store.data_dir));
        let store = TimestampStore::new(db, host.clock.clone());
        let messenger = Messenger::new(store.clone(), host.clock.clone());
        let scheduler = InactivityScheduler::new(
            store.clone(),
            host.notifier.clone(),
            host.clock.clone(),
            SchedulerSettings::from(&config.scheduler),
        );

        info!("Service worker created, cache generation {}", config.cache.version);
        Self {
            state: RwLock::new(WorkerState::Parsed),
            cache_version: config.cache.version.clone(),
            caches,
            names,
            interceptor,
            fetcher: host.fetcher,
            store,
            messenger,
            scheduler,
            clients: host.clients,
            periodic_sync: host.periodic_sync,
            periodic_capability: RwLock::new(None),
            cleanup_interval: Duration::from_secs(config.cache.cleanup_interval_secs),
            cleaner: Mutex::new(None),
            clock: host.clock,
        }
    }

    pub fn caches(&self) -> &CacheManager {
        &self.caches
    }

    pub fn cache_names(&self) -> &CacheNames {
        &self.names
    }

    pub fn scheduler(&self) -> &InactivityScheduler {
        &self.scheduler
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: WorkerState) {
        debug!("Worker state -> {:?}", state);
        *self.state.write().await = state;
    }

    pub async fn dispatch(&self, event: WorkerEvent) -> EventOutcome {
        match event {
            WorkerEvent::Install(manifest) => EventOutcome::Installed(self.install(&manifest).await),
            WorkerEvent::Activate => {
                self.activate().await;
                EventOutcome::Activated
            }
            WorkerEvent::Fetch(request) => EventOutcome::Response(self.on_fetch(request).await),
            WorkerEvent::Message(message) => {
                self.on_message(&message).await;
                EventOutcome::MessageApplied
            }
            WorkerEvent::Sync(tag) | WorkerEvent::PeriodicSync(tag) => EventOutcome::Tick(self.on_sync(&tag).await),
            WorkerEvent::NotificationClick(action) => {
                EventOutcome::Click(self.on_notification_click(action.as_deref()).await)
            }
        }
    }

    /// 预缓存当前版本的资源清单，返回成功缓存的数量
    pub async fn install(&self, manifest: &[Url]) -> usize {
        self.set_state(WorkerState::Installing).await;
        let static_cache = self.caches.open_cache(&self.names.static_resources).await;
        let offline_cache = self.caches.open_cache(&self.names.offline).await;

        let mut stored = 0;
        for url in manifest {
            let cache = if url.path() == OFFLINE_PATH { &offline_cache } else { &static_cache };
            match self.fetcher.fetch(&Request::get(url.clone())).await {
                Ok(response) => {
                    if cache.put(url.as_str(), response).await == PutOutcome::Stored {
                        stored += 1;
                    } else {
                        warn!("Precache of {} was not stored", url);
                    }
                }
                Err(e) => warn!("Precache fetch failed for {}: {}", url, e),
            }
        }

        info!("Install complete, precached {}/{} resources", stored, manifest.len());
        self.set_state(WorkerState::Installed).await;
        stored
    }

    /// 清理旧代缓存并启动所有提醒触发器
    pub async fn activate(&self) {
        self.set_state(WorkerState::Activating).await;

        let deleted = self.caches.cleanup_stale(&self.names.current()).await;
        if !deleted.is_empty() {
            info!("Removed {} stale caches: {:?}", deleted.len(), deleted);
        }

        self.scheduler.start();
        self.scheduler.schedule_initial_check();
        let capability = register_if_supported(
            self.periodic_sync.as_ref(),
            INACTIVITY_SYNC_TAG,
            self.scheduler.settings().interval,
        )
        .await;
        *self.periodic_capability.write().await = Some(capability);

        let handle = CacheCleaner::new(self.caches.clone(), self.cleanup_interval).start();
        if let Ok(mut cleaner) = self.cleaner.lock() {
            if let Some(previous) = cleaner.replace(handle) {
                previous.abort();
            }
        }

        self.set_state(WorkerState::Activated).await;
        info!("Service worker activated");
    }

    pub async fn on_fetch(&self, request: Request) -> Response {
        let url = request.url.clone();
        match self.interceptor.handle_fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                error!("Fetch for {} failed: {}", url, e);
                Response::network_error()
            }
        }
    }

    pub async fn on_message(&self, message: &WorkerMessage) {
        self.messenger.handle(message).await;
    }

    /// 原始 JSON 消息，格式错误时返回 `InvalidMessage`
    pub async fn on_raw_message(&self, raw: &[u8]) -> Result<()> {
        self.messenger.handle_raw(raw).await
    }

    /// 建立前台到 worker 的消息通道
    pub fn connect(&self) -> (MessengerHandle, JoinHandle<()>) {
        Messenger::new(self.store.clone(), self.clock.clone()).spawn()
    }

    /// `sync` 与 `periodicsync` 事件，只处理 `inactivity-check`
    pub async fn on_sync(&self, tag: &str) -> Option<TickOutcome> {
        if tag != INACTIVITY_SYNC_TAG {
            debug!("Ignoring sync event with tag {}", tag);
            return None;
        }
        Some(self.scheduler.tick().await)
    }

    pub async fn on_notification_click(&self, action: Option<&str>) -> Option<ClickOutcome> {
        let app_url = self.scheduler.settings().app_url.clone();
        match handle_notification_click(self.clients.as_ref(), &app_url, action).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Notification click handling failed: {}", e);
                None
            }
        }
    }

    pub async fn status(&self) -> WorkerStatus {
        WorkerStatus {
            state: self.state().await,
            cache_version: self.cache_version.clone(),
            scheduler_running: self.scheduler.is_running(),
            periodic_sync: self.periodic_capability.read().await.clone(),
            last_tick: self.scheduler.last_tick(),
            caches: self.caches.stats().await,
            timestamps: self.store.snapshot().await,
        }
    }

    pub async fn shutdown(&self) {
        self.scheduler.stop();
        if let Ok(mut cleaner) = self.cleaner.lock() {
            if let Some(handle) = cleaner.take() {
                handle.abort();
            }
        }
        self.set_state(WorkerState::Redundant).await;
        info!("Service worker shut down");
    }
}
