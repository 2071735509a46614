use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn, debug};

use crate::clock::Clock;
use crate::error::WorkerError;
use crate::store::{TimestampKey, TimestampStore};
use crate::Result;

/// 前台页面发给 worker 的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    #[serde(rename = "UPDATE_LAST_ACTIVITY")]
    UpdateLastActivity {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    #[serde(rename = "UPDATE_LAST_TRANSACTION")]
    UpdateLastTransaction {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
}

impl WorkerMessage {
    pub fn from_json(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(|e| WorkerError::InvalidMessage(e.to_string()))
    }

    pub fn key(&self) -> TimestampKey {
        match self {
            WorkerMessage::UpdateLastActivity { .. } => TimestampKey::LastActivity,
            WorkerMessage::UpdateLastTransaction { .. } => TimestampKey::LastTransaction,
        }
    }

    pub fn timestamp(&self) -> Option<i64> {
        match self {
            WorkerMessage::UpdateLastActivity { timestamp } | WorkerMessage::UpdateLastTransaction { timestamp } => *timestamp,
        }
    }
}

/// 前台持有的发送端，发送即返回，不等待持久化
#[derive(Debug, Clone)]
pub struct MessengerHandle {
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl MessengerHandle {
    pub fn post(&self, message: WorkerMessage) {
        if self.tx.send(message).is_err() {
            warn!("Worker is gone, dropping message");
        }
    }

    pub fn record_activity(&self) {
        self.post(WorkerMessage::UpdateLastActivity { timestamp: None });
    }

    pub fn record_transaction(&self, timestamp: i64) {
        self.post(WorkerMessage::UpdateLastTransaction { timestamp: Some(timestamp) });
    }
}

/// worker 侧的接收端，把消息写入时间戳存储
pub struct Messenger {
    store: TimestampStore,
    clock: Arc<dyn Clock>,
}

impl Messenger {
    pub fn new(store: TimestampStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// 处理一条消息；缺少 timestamp 时用接收时刻
    pub async fn handle(&self, message: &WorkerMessage) {
        let timestamp = message.timestamp().unwrap_or_else(|| self.clock.now_ms());
        debug!("Applying {:?} at {}", message.key(), timestamp);
        self.store.set(message.key(), timestamp).await;
    }

    pub async fn handle_raw(&self, raw: &[u8]) -> Result<()> {
        let message = WorkerMessage::from_json(raw)?;
        self.handle(&message).await;
        Ok(())
    }

    /// 建立通道并在后台按顺序消费消息
    pub fn spawn(self) -> (MessengerHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerMessage>();
        let handle = tokio::spawn(async move {
            info!("Messenger listening");
            while let Some(message) = rx.recv().await {
                self.handle(&message).await;
            }
            info!("Messenger channel closed");
        });
        (MessengerHandle { tx }, handle)
    }
}
