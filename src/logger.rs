use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_DIRECTIVE: &str = "offline_cache_worker=info";

pub fn init_logger() {
    let filter = EnvFilter::from_default_env().add_directive(
        DEFAULT_DIRECTIVE
            .parse()
            .unwrap_or_else(|_| tracing::Level::INFO.into()),
    );
    // 重复初始化时忽略 (测试与 demo 可能多次调用)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .try_init();
}

pub fn log_request(method: &str, path: &str, status: u16, duration: Duration) {
    info!(
        target: "request",
        method = %method,
        path = %path,
        status = status,
        duration_ms = %duration.as_millis(),
        "Request completed"
    );
}
