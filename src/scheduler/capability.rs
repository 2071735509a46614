use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::Result;

/// 宿主能力探测结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "kebab-case")]
pub enum Capability {
    Supported,
    Unsupported,
    Unknown(String),
}

/// 系统级后台唤醒 (periodic background sync)
#[async_trait]
pub trait PeriodicSync: Send + Sync {
    async fn capability(&self) -> Capability;

    async fn register(&self, tag: &str, min_interval: Duration) -> Result<()>;
}

/// 大多数环境都没有后台唤醒能力
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedPeriodicSync;

#[async_trait]
impl PeriodicSync for UnsupportedPeriodicSync {
    async fn capability(&self) -> Capability {
        Capability::Unsupported
    }

    async fn register(&self, tag: &str, _min_interval: Duration) -> Result<()> {
        Err(crate::error::WorkerError::Config(format!("periodic sync unsupported, cannot register {}", tag)))
    }
}

/// 探测并在支持时注册；不支持只是一种状态，不是错误
pub async fn register_if_supported(sync: &dyn PeriodicSync, tag: &str, min_interval: Duration) -> Capability {
    match sync.capability().await {
        Capability::Supported => match sync.register(tag, min_interval).await {
            Ok(()) => {
                info!("Registered periodic sync {} every {:?}", tag, min_interval);
                Capability::Supported
            }
            Err(e) => {
                warn!("Periodic sync registration for {} failed: {}", tag, e);
                Capability::Unknown(e.to_string())
            }
        },
        Capability::Unsupported => {
            info!("Periodic background sync not available, relying on timers");
            Capability::Unsupported
        }
        Capability::Unknown(reason) => {
            warn!("Could not determine periodic sync support: {}", reason);
            Capability::Unknown(reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPeriodicSync;

    #[tokio::test]
    async fn test_supported_registers_tag() {
        let sync = MockPeriodicSync::new(Capability::Supported);
        let result = register_if_supported(&sync, "inactivity-check", Duration::from_secs(1800)).await;

        assert_eq!(result, Capability::Supported);
        assert_eq!(
            sync.registered.lock().unwrap().as_slice(),
            &[("inactivity-check".to_string(), Duration::from_secs(1800))]
        );
    }

    #[tokio::test]
    async fn test_unsupported_is_not_an_error() {
        let result = register_if_supported(&UnsupportedPeriodicSync, "inactivity-check", Duration::from_secs(1)).await;
        assert_eq!(result, Capability::Unsupported);
    }

    #[tokio::test]
    async fn test_unknown_skips_registration() {
        let sync = MockPeriodicSync::new(Capability::Unknown("permission query failed".into()));
        let result = register_if_supported(&sync, "inactivity-check", Duration::from_secs(1)).await;

        assert!(matches!(result, Capability::Unknown(_)));
        assert!(sync.registered.lock().unwrap().is_empty());
    }
}
