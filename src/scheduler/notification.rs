use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn, debug};
use url::Url;

use crate::error::WorkerError;
use crate::utils::{describe_duration_ms, same_origin};
use crate::Result;

pub const REMINDER_TITLE: &str = "Track Your Expenses";
pub const REMINDER_TAG: &str = "inactivity-reminder";
pub const ACTION_OPEN_APP: &str = "open-app";
pub const ACTION_DISMISS: &str = "dismiss";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationData {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// 相同 tag 的通知会替换而不是叠加
    pub tag: String,
    pub vibrate: Vec<u32>,
    pub actions: Vec<NotificationAction>,
    pub data: NotificationData,
}

impl Notification {
    pub fn inactivity_reminder(inactive_ms: i64, app_url: &str) -> Self {
        Self {
            title: REMINDER_TITLE.to_string(),
            body: format!(
                "You haven't logged any expenses in {}. Take a moment to record your spending.",
                describe_duration_ms(inactive_ms)
            ),
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/badge-72x72.png".to_string(),
            tag: REMINDER_TAG.to_string(),
            vibrate: vec![200, 100, 200],
            actions: vec![
                NotificationAction {
                    action: ACTION_OPEN_APP.to_string(),
                    title: "Open App".to_string(),
                },
                NotificationAction {
                    action: ACTION_DISMISS.to_string(),
                    title: "Dismiss".to_string(),
                },
            ],
            data: NotificationData {
                kind: REMINDER_TAG.to_string(),
                url: app_url.to_string(),
            },
        }
    }
}

/// 本地通知能力 (对应 `registration.showNotification`)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn show(&self, notification: &Notification) -> Result<()>;
}

/// 无图形环境下把通知写进日志
#[derive(Debug, Clone)]
pub struct TracingNotifier {
    granted: bool,
}

impl TracingNotifier {
    pub fn new(granted: bool) -> Self {
        Self { granted }
    }
}

#[async_trait]
impl Notifier for TracingNotifier {
    async fn show(&self, notification: &Notification) -> Result<()> {
        if !self.granted {
            return Err(WorkerError::NotificationUnavailable("notification permission not granted".into()));
        }
        info!(
            target: "notification",
            tag = %notification.tag,
            title = %notification.title,
            "{}",
            notification.body
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowClient {
    pub id: String,
    pub url: Url,
}

/// 受控页面窗口 (对应 `clients`)
#[async_trait]
pub trait WindowClients: Send + Sync {
    async fn match_all(&self) -> Vec<WindowClient>;

    async fn focus(&self, id: &str) -> Result<()>;

    async fn open_window(&self, url: &str) -> Result<WindowClient>;
}

#[derive(Debug, Default)]
pub struct HeadlessClients {
    windows: RwLock<Vec<WindowClient>>,
}

impl HeadlessClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, url: Url) -> WindowClient {
        let client = WindowClient {
            id: uuid::Uuid::new_v4().to_string(),
            url,
        };
        self.windows.write().await.push(client.clone());
        client
    }
}

#[async_trait]
impl WindowClients for HeadlessClients {
    async fn match_all(&self) -> Vec<WindowClient> {
        self.windows.read().await.clone()
    }

    async fn focus(&self, id: &str) -> Result<()> {
        let windows = self.windows.read().await;
        if windows.iter().any(|w| w.id == id) {
            info!("Focusing window {}", id);
            Ok(())
        } else {
            Err(WorkerError::InvalidMessage(format!("no window {}", id)))
        }
    }

    async fn open_window(&self, url: &str) -> Result<WindowClient> {
        let url = Url::parse(url).map_err(|e| WorkerError::InvalidMessage(e.to_string()))?;
        info!("Opening window at {}", url);
        Ok(self.add(url).await)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Focused(String),
    Opened(String),
    Dismissed,
}

/// 点击通知正文或 `open-app`: 聚焦已打开的同源窗口，否则打开新窗口
pub async fn handle_notification_click(
    clients: &dyn WindowClients,
    app_url: &str,
    action: Option<&str>,
) -> Result<ClickOutcome> {
    match action {
        None | Some("") | Some(ACTION_OPEN_APP) => {}
        Some(ACTION_DISMISS) => {
            debug!("Notification dismissed");
            return Ok(ClickOutcome::Dismissed);
        }
        Some(other) => {
            warn!("Unknown notification action: {}", other);
            return Ok(ClickOutcome::Dismissed);
        }
    }

    let app = Url::parse(app_url).map_err(|e| WorkerError::Config(format!("invalid app url {}: {}", app_url, e)))?;
    let existing = clients
        .match_all()
        .await
        .into_iter()
        .find(|client| same_origin(&client.url, &app));

    match existing {
        Some(client) => {
            clients.focus(&client.id).await?;
            Ok(ClickOutcome::Focused(client.id))
        }
        None => {
            let root = app.join("/").map_err(|e| WorkerError::Config(e.to_string()))?;
            let client = clients.open_window(root.as_str()).await?;
            Ok(ClickOutcome::Opened(client.id))
        }
    }
}
