use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use hyper::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Server, StatusCode};
use tracing::{info, warn, error, debug};
use url::Url;

use crate::error::WorkerError;
use crate::http::{Destination, Request, RequestMode, Response};
use crate::logger::log_request;
use crate::worker::ServiceWorker;
use crate::Result;

pub const STATUS_PATH: &str = "/__worker/status";
pub const MESSAGE_PATH: &str = "/__worker/message";

/// 不转发给上游的逐跳头
const HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "content-length",
    "upgrade",
];

/// 站在页面与上游之间的 HTTP 前端，每个请求都交给 worker 的 fetch 处理
#[derive(Clone)]
pub struct ProxyServer {
    addr: SocketAddr,
    upstream: Url,
    worker: Arc<ServiceWorker>,
}

impl ProxyServer {
    pub fn new(addr: SocketAddr, upstream: Url, worker: Arc<ServiceWorker>) -> Self {
        info!("Creating proxy server on {} for upstream {}", addr, upstream);
        Self { addr, upstream, worker }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[tracing::instrument(skip(self, shutdown))]
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let worker = self.worker.clone();
        let upstream = self.upstream.clone();

        let make_svc = make_service_fn(move |conn: &AddrStream| {
            let remote_addr = conn.remote_addr();
            debug!("New connection from: {}", remote_addr);

            let worker = worker.clone();
            let upstream = upstream.clone();

            async move {
                Ok::<_, hyper::Error>(service_fn(move |req| {
                    let worker = worker.clone();
                    let upstream = upstream.clone();
                    async move { Ok::<_, hyper::Error>(handle_request(req, &worker, &upstream).await) }
                }))
            }
        });

        let server = Server::try_bind(&self.addr)
            .map_err(|e| WorkerError::Network(format!("cannot bind {}: {}", self.addr, e)))?
            .serve(make_svc)
            .with_graceful_shutdown(shutdown);
        info!("Proxy server listening on {}", self.addr);

        if let Err(e) = server.await {
            error!("Server error: {}", e);
            return Err(WorkerError::Network(e.to_string()));
        }

        info!("Proxy server stopped");
        Ok(())
    }
}

pub async fn handle_request(
    req: hyper::Request<Body>,
    worker: &ServiceWorker,
    upstream: &Url,
) -> hyper::Response<Body> {
    let started = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let response = match (req.method(), path.as_str()) {
        (&Method::GET, STATUS_PATH) => status_response(worker).await,
        (&Method::POST, MESSAGE_PATH) => message_response(req, worker).await,
        _ => forward(req, worker, upstream).await,
    };

    log_request(&method, &path, response.status().as_u16(), started.elapsed());
    response
}

/// 其余请求连同 body 一起交给 worker
async fn forward(req: hyper::Request<Body>, worker: &ServiceWorker, upstream: &Url) -> hyper::Response<Body> {
    let (parts, body) = req.into_parts();
    let body = match hyper::body::to_bytes(body).await {
        Ok(body) => body,
        Err(e) => {
            warn!("Cannot read request body for {}: {}", parts.uri, e);
            return plain(StatusCode::BAD_REQUEST, "unreadable body");
        }
    };

    let head = hyper::Request::from_parts(parts, ());
    match to_worker_request(&head, upstream) {
        Ok(request) => into_hyper(worker.on_fetch(request.with_body(body)).await),
        Err(e) => {
            warn!("Cannot map request {}: {}", head.uri(), e);
            plain(StatusCode::BAD_REQUEST, "bad request")
        }
    }
}

async fn status_response(worker: &ServiceWorker) -> hyper::Response<Body> {
    match serde_json::to_vec_pretty(&worker.status().await) {
        Ok(json) => {
            let mut response = hyper::Response::new(Body::from(json));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            error!("Cannot serialize worker status: {}", e);
            plain(StatusCode::INTERNAL_SERVER_ERROR, "status unavailable")
        }
    }
}

async fn message_response(req: hyper::Request<Body>, worker: &ServiceWorker) -> hyper::Response<Body> {
    let raw = match hyper::body::to_bytes(req.into_body()).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Cannot read message body: {}", e);
            return plain(StatusCode::BAD_REQUEST, "unreadable body");
        }
    };
    match worker.on_raw_message(&raw).await {
        Ok(()) => plain(StatusCode::ACCEPTED, "accepted"),
        Err(e) => {
            warn!("Ignoring message: {}", e);
            plain(StatusCode::BAD_REQUEST, "invalid message")
        }
    }
}

/// 把页面请求映射到上游 URL，并由 `Sec-Fetch-*` 头 (或 `Accept`) 推断 destination/mode
pub fn to_worker_request<B>(req: &hyper::Request<B>, upstream: &Url) -> Result<Request> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = upstream
        .join(path_and_query)
        .map_err(|e| WorkerError::InvalidMessage(format!("invalid request path {}: {}", path_and_query, e)))?;

    let accept = header(req, ACCEPT.as_str()).unwrap_or_default();

    let destination = match header(req, "sec-fetch-dest") {
        Some(dest) => Destination::parse(dest),
        None => destination_from_accept(accept),
    };
    let mode = match header(req, "sec-fetch-mode") {
        Some(mode) => RequestMode::parse(mode),
        None if destination == Destination::Document && *req.method() == Method::GET => RequestMode::Navigate,
        None => RequestMode::Cors,
    };

    let mut request = Request::get(url)
        .with_method(req.method().as_str())
        .with_destination(destination)
        .with_mode(mode);
    for (name, value) in req.headers() {
        if HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            request.headers.insert(name.as_str().to_string(), value.to_string());
        }
    }
    Ok(request)
}

fn header<'a, B>(req: &'a hyper::Request<B>, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

fn destination_from_accept(accept: &str) -> Destination {
    if accept.contains("text/html") {
        Destination::Document
    } else if accept.contains("text/css") {
        Destination::Style
    } else if accept.contains("javascript") {
        Destination::Script
    } else if accept.starts_with("image/") {
        Destination::Image
    } else if accept.starts_with("font/") {
        Destination::Font
    } else {
        Destination::Empty
    }
}

/// 网络错误与不透明响应都没有可用的状态码，统一返回 502
pub fn into_hyper(response: Response) -> hyper::Response<Body> {
    if response.is_error() || response.status == 0 {
        return plain(StatusCode::BAD_GATEWAY, "upstream unavailable");
    }
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut builder = hyper::Response::builder().status(status);
    for (name, value) in &response.headers {
        if HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.body(Body::from(response.body)).unwrap_or_else(|e| {
        warn!("Dropping invalid upstream headers: {}", e);
        plain(StatusCode::BAD_GATEWAY, "invalid upstream response")
    })
}

fn plain(status: StatusCode, text: &'static str) -> hyper::Response<Body> {
    let mut response = hyper::Response::new(Body::from(text));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::scheduler::Capability;
    use crate::testing::{ManualClock, MockClients, MockFetcher, MockPeriodicSync, RecordingNotifier};
    use crate::network::Fetcher;
    use crate::worker::WorkerHost;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 记录收到的请求并原样回显 body
    #[derive(Default)]
    struct EchoUpstream {
        seen: Mutex<Vec<Request>>,
    }

    #[async_trait]
    impl Fetcher for EchoUpstream {
        async fn fetch(&self, request: &Request) -> Result<Response> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(Response::new(201, request.body.clone()))
        }
    }

    fn upstream() -> Url {
        Url::parse("http://127.0.0.1:5173").unwrap()
    }

    fn worker(dir: &std::path::Path, fetcher: Arc<dyn Fetcher>) -> ServiceWorker {
        let mut config = Config::default();
        config.store.data_dir = dir.to_path_buf();
        ServiceWorker::new(
            &config,
            WorkerHost {
                fetcher,
                notifier: Arc::new(RecordingNotifier::default()),
                clients: Arc::new(MockClients::default()),
                periodic_sync: Arc::new(MockPeriodicSync::new(Capability::Unsupported)),
                clock: Arc::new(ManualClock::new(1_000)),
            },
        )
    }

    #[test]
    fn test_sec_fetch_headers_drive_routing() {
        let req = hyper::Request::get("/app.css?v=2")
            .header("sec-fetch-dest", "style")
            .header("sec-fetch-mode", "no-cors")
            .header("host", "localhost:8080")
            .body(())
            .unwrap();
        let request = to_worker_request(&req, &upstream()).unwrap();

        assert_eq!(request.url.as_str(), "http://127.0.0.1:5173/app.css?v=2");
        assert_eq!(request.destination, Destination::Style);
        assert_eq!(request.mode, RequestMode::NoCors);
        assert!(!request.headers.contains_key("host"));
    }

    #[test]
    fn test_accept_fallback() {
        let req = hyper::Request::get("/trips")
            .header("accept", "text/html,application/xhtml+xml")
            .body(())
            .unwrap();
        let request = to_worker_request(&req, &upstream()).unwrap();
        assert!(request.is_navigation());

        let req = hyper::Request::get("/logo.png").header("accept", "image/avif,image/webp").body(()).unwrap();
        assert_eq!(to_worker_request(&req, &upstream()).unwrap().destination, Destination::Image);

        let req = hyper::Request::post("/data").body(()).unwrap();
        let request = to_worker_request(&req, &upstream()).unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.mode, RequestMode::Cors);
    }

    #[test]
    fn test_network_error_becomes_bad_gateway() {
        assert_eq!(into_hyper(Response::network_error()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(into_hyper(Response::opaque()).status(), StatusCode::BAD_GATEWAY);

        let ok = into_hyper(Response::new(404, "nope").with_header("Content-Type", "text/plain"));
        assert_eq!(ok.status(), StatusCode::NOT_FOUND);
        assert_eq!(ok.headers()[CONTENT_TYPE], "text/plain");
    }

    #[tokio::test]
    async fn test_worker_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let worker = worker(dir.path(), Arc::new(MockFetcher::new()));

        let req = hyper::Request::post(MESSAGE_PATH)
            .body(Body::from(r#"{"type":"UPDATE_LAST_ACTIVITY","timestamp":42}"#))
            .unwrap();
        assert_eq!(handle_request(req, &worker, &upstream()).await.status(), StatusCode::ACCEPTED);

        let req = hyper::Request::post(MESSAGE_PATH).body(Body::from("{}")).unwrap();
        assert_eq!(handle_request(req, &worker, &upstream()).await.status(), StatusCode::BAD_REQUEST);

        let req = hyper::Request::get(STATUS_PATH).body(Body::empty()).unwrap();
        let resp = handle_request(req, &worker, &upstream()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["state"], "parsed");
        assert_eq!(json["timestamps"]["last_activity"], 42);
    }

    #[tokio::test]
    async fn test_offline_navigation_is_served() {
        let dir = tempfile::tempdir().unwrap();
        let worker = worker(dir.path(), Arc::new(MockFetcher::new()));

        let req = hyper::Request::get("/trips")
            .header("sec-fetch-dest", "document")
            .header("sec-fetch-mode", "navigate")
            .body(Body::empty())
            .unwrap();
        let resp = handle_request(req, &worker, &upstream()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = hyper::Request::get("/api/other").body(Body::empty()).unwrap();
        assert_eq!(handle_request(req, &worker, &upstream()).await.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_pass_through_forwards_body() {
        let dir = tempfile::tempdir().unwrap();
        let echo = Arc::new(EchoUpstream::default());
        let worker = worker(dir.path(), echo.clone());

        let req = hyper::Request::post("/api/expenses")
            .header("content-type", "application/json")
            .header("content-length", "13")
            .body(Body::from(r#"{"amount":12}"#))
            .unwrap();
        let resp = handle_request(req, &worker, &upstream()).await;

        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(&body[..], br#"{"amount":12}"#);

        let seen = echo.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].url.as_str(), "http://127.0.0.1:5173/api/expenses");
        assert_eq!(&seen[0].body[..], br#"{"amount":12}"#);
        assert_eq!(seen[0].headers.get("content-type").map(String::as_str), Some("application/json"));
        assert!(worker.caches().cache_names().await.is_empty());
    }
}
