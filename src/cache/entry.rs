use crate::http::Response;

#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub response: Response,
    pub size: u64,
    pub cached_at_ms: i64,
    /// 磁盘上的 body 文件名，未落盘时为 None
    pub file: Option<String>,
}

impl CacheEntry {
    pub fn new(response: Response, cached_at_ms: i64) -> Self {
        Self {
            size: response.size(),
            response,
            cached_at_ms,
            file: None,
        }
    }

    pub fn with_file(mut self, file: String) -> Self {
        self.file = Some(file);
        self
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.cached_at_ms)
    }
}
