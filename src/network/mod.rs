use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client};
use hyper_tls::HttpsConnector;
use std::collections::HashMap;
use tracing::debug;

use crate::error::WorkerError;
use crate::http::{Request, Response};
use crate::Result;

/// 真正发出网络请求的一方 (对应 worker 里的 `fetch`)
///
/// HTTP 错误状态码同样是 `Ok` 响应，只有连接层失败才返回 `Err`。
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

#[derive(Debug, Clone)]
pub struct HyperFetcher {
    client: Client<HttpsConnector<HttpConnector>>,
}

impl HyperFetcher {
    pub fn new() -> Self {
        Self {
            client: Client::builder().build(HttpsConnector::new()),
        }
    }

    fn build_request(request: &Request) -> Result<hyper::Request<Body>> {
        let mut builder = hyper::Request::builder()
            .method(request.method.as_str())
            .uri(request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
            .body(Body::from(request.body.clone()))
            .map_err(|e| WorkerError::Network(e.to_string()))
    }
}

impl Default for HyperFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HyperFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        debug!("Fetching {} {}", request.method, request.url);
        let req = Self::build_request(request)?;

        let resp = self.client
            .request(req)
            .await
            .map_err(|e| WorkerError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let headers: HashMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = hyper::body::to_bytes(resp.into_body())
            .await
            .map_err(|e| WorkerError::Network(e.to_string()))?;

        debug!("Fetched {} -> {} ({} bytes)", request.url, status, body.len());
        let mut response = Response::new(status, body);
        response.headers = headers;
        Ok(response)
    }
}
