use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{warn, debug};

use super::{DocumentStore, Record, SETTINGS_STORE};
use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimestampKey {
    LastActivity,
    LastTransaction,
    /// 上次发出提醒的时间，仅在设置了提醒冷却时写入
    LastReminder,
}

impl TimestampKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimestampKey::LastActivity => "lastActivityTime",
            TimestampKey::LastTransaction => "lastTransactionTime",
            TimestampKey::LastReminder => "lastReminderTime",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimestampSnapshot {
    pub last_activity: Option<i64>,
    pub last_transaction: Option<i64>,
    pub last_reminder: Option<i64>,
}

/// 时间戳存储。存储不可用时 `get` 按 "刚刚活跃" 处理，`set` 记日志后忽略。
#[derive(Debug, Clone)]
pub struct TimestampStore {
    db: Arc<DocumentStore>,
    clock: Arc<dyn Clock>,
}

impl TimestampStore {
    pub fn new(db: Arc<DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub async fn get(&self, key: TimestampKey) -> Option<i64> {
        match self.db.get(SETTINGS_STORE, key.as_str()).await {
            Ok(Some(record)) => {
                let value = record.value.as_i64();
                if value.is_none() {
                    warn!("Ignoring non-numeric value for {}: {}", key.as_str(), record.value);
                }
                value
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Reading {} failed, assuming active now: {}", key.as_str(), e);
                Some(self.clock.now_ms())
            }
        }
    }

    /// 缺失时取当前时间，避免冷启动时误报
    pub async fn get_or_now(&self, key: TimestampKey) -> i64 {
        match self.get(key).await {
            Some(ts) => ts,
            None => self.clock.now_ms(),
        }
    }

    pub async fn set(&self, key: TimestampKey, timestamp: i64) {
        let record = Record {
            key: key.as_str().to_string(),
            value: json!(timestamp),
        };
        match self.db.put(SETTINGS_STORE, record).await {
            Ok(()) => debug!("Stored {} = {}", key.as_str(), timestamp),
            Err(e) => warn!("Failed to store {}: {}", key.as_str(), e),
        }
    }

    pub async fn snapshot(&self) -> TimestampSnapshot {
        TimestampSnapshot {
            last_activity: self.get(TimestampKey::LastActivity).await,
            last_transaction: self.get(TimestampKey::LastTransaction).await,
            last_reminder: self.get(TimestampKey::LastReminder).await,
        }
    }
}
