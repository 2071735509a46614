use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Quota exceeded in cache {cache}: needed {needed} bytes, {available} bytes available")]
    QuotaExceeded {
        cache: String,
        needed: u64,
        available: u64,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Notification unavailable: {0}")]
    NotificationUnavailable(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkerError {
    /// 网络层失败 (含超时)，导航请求需要离线页兜底
    pub fn is_network_failure(&self) -> bool {
        matches!(self, WorkerError::Network(_) | WorkerError::Timeout(_))
    }
}
