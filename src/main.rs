use std::net::SocketAddr;
use std::sync::Arc;

use offline_cache_worker::clock::SystemClock;
use offline_cache_worker::logger::init_logger;
use offline_cache_worker::migration::{FilePageStorage, LegacyMigration, StaticRegistrations};
use offline_cache_worker::network::HyperFetcher;
use offline_cache_worker::prelude::*;
use offline_cache_worker::scheduler::HeadlessClients;
use offline_cache_worker::utils::resolve_url;
use tokio::signal;
use tracing::{info, warn, error};
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    init_logger();
    info!("Starting offline cache worker");

    // 初始化配置
    let config = load_config()?;
    let upstream = Url::parse(&config.server.upstream)?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let worker = Arc::new(ServiceWorker::new(
        &config,
        WorkerHost {
            fetcher: Arc::new(HyperFetcher::new()),
            notifier: Arc::new(TracingNotifier::new(config.scheduler.notifications_granted)),
            clients: Arc::new(HeadlessClients::new()),
            periodic_sync: Arc::new(UnsupportedPeriodicSync),
            clock: Arc::new(SystemClock),
        },
    ));

    // 旧版 worker 清理
    let migration = LegacyMigration::new(
        Arc::new(FilePageStorage::new(config.store.data_dir.join("local-storage.json"))),
        Arc::new(StaticRegistrations::default()),
        worker.caches().clone(),
        config.migration.clone(),
    );
    info!("Legacy migration: {:?}", migration.run().await);

    // 安装与激活
    let manifest: Vec<Url> = config
        .server
        .precache
        .iter()
        .filter_map(|path| match resolve_url(upstream.as_str(), path) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Skipping precache entry {}: {}", path, e);
                None
            }
        })
        .collect();
    worker.install(&manifest).await;
    worker.activate().await;

    let proxy = ProxyServer::new(addr, upstream, worker.clone());
    if let Err(e) = proxy.run(wait_for_shutdown()).await {
        error!("Proxy server failed: {}", e);
    }

    // 优雅关闭
    info!("Shutting down...");
    worker.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    Ok(Config::load()?)
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
