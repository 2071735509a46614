// 标准库导入
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// 第三方库导入
use async_trait::async_trait;
use tracing::{info, warn};
use url::Url;

// 项目导入
use offline_cache_worker::error::WorkerError;
use offline_cache_worker::logger::init_logger;
use offline_cache_worker::prelude::*;
use offline_cache_worker::scheduler::HeadlessClients;

/// 内存中的上游站点，可以随时断网
#[derive(Default)]
struct DemoOrigin {
    online: AtomicBool,
    pages: Mutex<HashMap<String, Response>>,
}

#[async_trait]
impl Fetcher for DemoOrigin {
    async fn fetch(&self, request: &Request) -> offline_cache_worker::Result<Response> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(WorkerError::Network(format!("offline: {}", request.url)));
        }
        let pages = self.pages.lock().map_err(|e| WorkerError::Network(e.to_string()))?;
        Ok(pages
            .get(request.url.as_str())
            .cloned()
            .unwrap_or_else(|| Response::new(404, "not found")))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();

    let origin = Url::parse("https://xpense.local")?;
    let data_dir = std::env::temp_dir().join("offline-walkthrough");

    let mut config = Config::default();
    config.store.data_dir = data_dir.clone();
    config.scheduler.app_url = origin.to_string();
    config.scheduler.notifications_granted = true;

    let upstream = Arc::new(DemoOrigin::default());
    upstream.online.store(true, Ordering::SeqCst);
    if let Ok(mut pages) = upstream.pages.lock() {
        pages.insert(origin.join("/app.css")?.to_string(), Response::new(200, "body { margin: 0 }"));
        pages.insert(origin.join("/data")?.to_string(), Response::new(200, r#"{"expenses":[]}"#));
        pages.insert(origin.join("/")?.to_string(), Response::new(200, "<h1>Xpense</h1>"));
    }

    let worker = ServiceWorker::new(
        &config,
        WorkerHost {
            fetcher: upstream.clone(),
            notifier: Arc::new(TracingNotifier::new(true)),
            clients: Arc::new(HeadlessClients::new()),
            periodic_sync: Arc::new(UnsupportedPeriodicSync),
            clock: Arc::new(SystemClock),
        },
    );

    worker.install(&[origin.join("/app.css")?, origin.join("/offline.html")?]).await;
    worker.activate().await;

    info!("--- online ---");
    let home = worker.on_fetch(Request::navigate(origin.join("/")?)).await;
    info!("GET / -> {} ({} bytes)", home.status, home.size());
    let data = worker.on_fetch(Request::get(origin.join("/data")?)).await;
    info!("GET /data -> {} ({} bytes)", data.status, data.size());

    info!("--- offline ---");
    upstream.online.store(false, Ordering::SeqCst);
    let css = worker
        .on_fetch(Request::get(origin.join("/app.css")?).with_destination(Destination::Style))
        .await;
    info!("GET /app.css -> {} from cache", css.status);
    let data = worker.on_fetch(Request::get(origin.join("/data")?)).await;
    info!("GET /data -> {} from cache", data.status);
    let page = worker.on_fetch(Request::navigate(origin.join("/reports")?)).await;
    info!("GET /reports -> {} ({:?})", page.status, page.content_type());

    info!("--- reminder ---");
    let (messages, listener) = worker.connect();
    let two_days_ago = chrono::Utc::now().timestamp_millis() - 2 * 24 * 60 * 60 * 1000;
    messages.post(WorkerMessage::UpdateLastActivity { timestamp: Some(two_days_ago) });
    messages.record_transaction(two_days_ago);
    drop(messages);
    if let Err(e) = listener.await {
        warn!("Messenger task failed: {}", e);
    }
    let outcome = worker.on_sync("inactivity-check").await;
    info!("Inactivity check: {:?}", outcome);

    let status = worker.status().await;
    info!("Status: {}", serde_json::to_string_pretty(&status)?);

    worker.shutdown().await;
    let _ = std::fs::remove_dir_all(data_dir);
    Ok(())
}
