//! 请求/响应模型，对应页面发出的 fetch 与 worker 返回的结果。

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// 请求的目标类型 (对应 `Request.destination`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Document,
    Style,
    Script,
    Font,
    Image,
    Empty,
    Other,
}

impl Destination {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" | "iframe" | "frame" => Destination::Document,
            "style" => Destination::Style,
            "script" | "worker" | "sharedworker" => Destination::Script,
            "font" => Destination::Font,
            "image" => Destination::Image,
            "" | "empty" => Destination::Empty,
            _ => Destination::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    NoCors,
    Cors,
}

impl RequestMode {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "navigate" => RequestMode::Navigate,
            "same-origin" => RequestMode::SameOrigin,
            "no-cors" => RequestMode::NoCors,
            _ => RequestMode::Cors,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: String,
    pub destination: Destination,
    pub mode: RequestMode,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl Request {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: "GET".to_string(),
            destination: Destination::Empty,
            mode: RequestMode::Cors,
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn navigate(url: Url) -> Self {
        Self {
            destination: Destination::Document,
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = method.to_ascii_uppercase();
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// 缓存键: 完整 URL
    pub fn cache_key(&self) -> String {
        self.url.to_string()
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// 响应类型 (对应 `Response.type`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Basic,
    /// 跨域不透明响应，status 恒为 0
    Opaque,
    Error,
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub response_type: ResponseType,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            response_type: ResponseType::Basic,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn opaque() -> Self {
        Self {
            status: 0,
            response_type: ResponseType::Opaque,
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn network_error() -> Self {
        Self {
            status: 0,
            response_type: ResponseType::Error,
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|v| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn is_error(&self) -> bool {
        self.response_type == ResponseType::Error
    }

    /// 估算占用空间: body + header
    pub fn size(&self) -> u64 {
        let headers: usize = self.headers.iter().map(|(k, v)| k.len() + v.len()).sum();
        (self.body.len() + headers) as u64
    }
}
