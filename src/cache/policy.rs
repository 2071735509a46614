use std::collections::HashSet;
use std::time::Duration;

use crate::config::PolicyConfig;

/// 单个命名缓存的淘汰策略，None 表示不限制
#[derive(Debug, Clone, PartialEq)]
pub struct CachePolicy {
    pub max_entries: Option<usize>,
    pub max_age: Option<Duration>,
    pub accepted_statuses: HashSet<u16>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            max_entries: None,
            max_age: None,
            // 0 为跨域不透明响应
            accepted_statuses: [0, 200].into_iter().collect(),
        }
    }
}

impl CachePolicy {
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_accepted_statuses<I: IntoIterator<Item = u16>>(mut self, statuses: I) -> Self {
        self.accepted_statuses = statuses.into_iter().collect();
        self
    }

    pub fn accepts(&self, status: u16) -> bool {
        self.accepted_statuses.contains(&status)
    }

    pub fn is_expired(&self, cached_at_ms: i64, now_ms: i64) -> bool {
        match self.max_age {
            Some(max_age) => now_ms.saturating_sub(cached_at_ms) > max_age.as_millis() as i64,
            None => false,
        }
    }
}

impl From<&PolicyConfig> for CachePolicy {
    fn from(config: &PolicyConfig) -> Self {
        Self {
            max_entries: config.max_entries,
            max_age: config.max_age_secs.map(Duration::from_secs),
            accepted_statuses: config.accepted_statuses.iter().copied().collect(),
        }
    }
}
