//! 测试用的宿主替身

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::Clock;
use crate::error::WorkerError;
use crate::http::{Request, Response};
use crate::network::Fetcher;
use crate::scheduler::{Capability, Notification, Notifier, PeriodicSync, WindowClient, WindowClients};
use crate::Result;

#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now_ms)),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(Response),
    Delayed(Duration, Response),
    Fail,
}

/// 按 URL 返回预设结果的网络层；未预设的 URL 视为断网
#[derive(Debug, Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: Response) {
        self.push(url, Scripted::Respond(response));
    }

    pub fn delay(&self, url: &str, delay: Duration, response: Response) {
        self.push(url, Scripted::Delayed(delay, response));
    }

    pub fn fail(&self, url: &str) {
        self.push(url, Scripted::Fail);
    }

    fn push(&self, url: &str, scripted: Scripted) {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(scripted);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = {
            let mut routes = self.routes.lock().unwrap();
            routes.get_mut(request.url.as_str()).and_then(|queue| {
                // 最后一个结果重复使用
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            })
        };

        match scripted {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Delayed(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            Some(Scripted::Fail) | None => Err(WorkerError::Network(format!("offline: {}", request.url))),
        }
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub shown: Mutex<Vec<Notification>>,
    pub denied: bool,
}

impl RecordingNotifier {
    pub fn denied() -> Self {
        Self {
            denied: true,
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.shown.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn show(&self, notification: &Notification) -> Result<()> {
        if self.denied {
            return Err(WorkerError::NotificationUnavailable("permission denied".into()));
        }
        self.shown.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MockClients {
    pub windows: Mutex<Vec<WindowClient>>,
    pub focused: Mutex<Vec<String>>,
    pub opened: Mutex<Vec<String>>,
}

#[async_trait]
impl WindowClients for MockClients {
    async fn match_all(&self) -> Vec<WindowClient> {
        self.windows.lock().unwrap().clone()
    }

    async fn focus(&self, id: &str) -> Result<()> {
        self.focused.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn open_window(&self, url: &str) -> Result<WindowClient> {
        self.opened.lock().unwrap().push(url.to_string());
        let client = WindowClient {
            id: format!("opened-{}", self.opened.lock().unwrap().len()),
            url: url::Url::parse(url).map_err(|e| WorkerError::InvalidMessage(e.to_string()))?,
        };
        Ok(client)
    }
}

#[derive(Debug)]
pub struct MockPeriodicSync {
    pub capability: Capability,
    pub registered: Mutex<Vec<(String, Duration)>>,
}

impl MockPeriodicSync {
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            registered: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PeriodicSync for MockPeriodicSync {
    async fn capability(&self) -> Capability {
        self.capability.clone()
    }

    async fn register(&self, tag: &str, min_interval: Duration) -> Result<()> {
        self.registered.lock().unwrap().push((tag.to_string(), min_interval));
        Ok(())
    }
}
