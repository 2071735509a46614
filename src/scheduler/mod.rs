//! 不活跃提醒调度
//!
//! 每次 tick 都独立判断: 取 `last-activity` 与 `last-transaction` 中较早的一个作为基线，
//! 距今超过阈值即发出一条提醒。触发来源有三个，宿主支持哪个就用哪个:
//!
//! - 每 30 分钟一次的定时器
//! - 激活后 5 秒的一次性检查
//! - 系统级后台唤醒 (`inactivity-check`)
//!
//! 同一个 tag 的通知会互相替换，所以并发的 tick 不需要互斥。

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn, debug};

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::store::{TimestampKey, TimestampStore};

mod capability;
mod notification;

pub use capability::{register_if_supported, Capability, PeriodicSync, UnsupportedPeriodicSync};
pub use notification::{
    handle_notification_click, ClickOutcome, HeadlessClients, Notification, NotificationAction,
    NotificationData, Notifier, TracingNotifier, WindowClient, WindowClients, ACTION_DISMISS,
    ACTION_OPEN_APP, REMINDER_TAG, REMINDER_TITLE,
};

pub const INACTIVITY_SYNC_TAG: &str = "inactivity-check";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderPolicy {
    /// 超过阈值后每次 tick 都提醒
    EveryTick,
    /// 两次提醒之间至少间隔指定时长
    Cooldown(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TickOutcome {
    NotificationSent,
    NoOp,
    Suppressed,
    NotificationUnavailable,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub threshold: Duration,
    pub interval: Duration,
    pub initial_delay: Duration,
    pub policy: ReminderPolicy,
    pub app_url: String,
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            threshold: Duration::from_secs(config.threshold_secs),
            interval: Duration::from_secs(config.interval_secs),
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            policy: match config.reminder_cooldown_secs {
                Some(secs) => ReminderPolicy::Cooldown(Duration::from_secs(secs)),
                None => ReminderPolicy::EveryTick,
            },
            app_url: config.app_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct LastTick {
    pub outcome: TickOutcome,
    pub at_ms: i64,
}

struct SchedulerInner {
    store: TimestampStore,
    notifier: Arc<dyn notification::Notifier>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
    last_tick: Mutex<Option<LastTick>>,
}

pub struct InactivityScheduler {
    inner: Arc<SchedulerInner>,
    // 每个实例至多一个活动定时器
    timer: Mutex<Option<JoinHandle<()>>>,
    initial_check: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerInner {
    async fn tick(&self) -> TickOutcome {
        let now = self.clock.now_ms();
        let last_activity = self.store.get_or_now(TimestampKey::LastActivity).await;
        let last_transaction = self.store.get_or_now(TimestampKey::LastTransaction).await;
        let baseline = last_activity.min(last_transaction);
        let inactive_ms = now.saturating_sub(baseline);

        let outcome = if inactive_ms < self.settings.threshold.as_millis() as i64 {
            debug!("Inactive for {}ms, below threshold", inactive_ms);
            TickOutcome::NoOp
        } else if self.in_cooldown(now).await {
            debug!("Reminder suppressed by cooldown");
            TickOutcome::Suppressed
        } else {
            let reminder = Notification::inactivity_reminder(inactive_ms, &self.settings.app_url);
            match self.notifier.show(&reminder).await {
                Ok(()) => {
                    info!("Sent inactivity reminder after {}ms", inactive_ms);
                    if let ReminderPolicy::Cooldown(_) = self.settings.policy {
                        self.store.set(TimestampKey::LastReminder, now).await;
                    }
                    TickOutcome::NotificationSent
                }
                Err(e) => {
                    warn!("Cannot show inactivity reminder: {}", e);
                    TickOutcome::NotificationUnavailable
                }
            }
        };

        if let Ok(mut last) = self.last_tick.lock() {
            *last = Some(LastTick { outcome, at_ms: now });
        }
        outcome
    }

    async fn in_cooldown(&self, now: i64) -> bool {
        match self.settings.policy {
            ReminderPolicy::EveryTick => false,
            ReminderPolicy::Cooldown(cooldown) => match self.store.get(TimestampKey::LastReminder).await {
                Some(last) => now.saturating_sub(last) < cooldown.as_millis() as i64,
                None => false,
            },
        }
    }
}

impl InactivityScheduler {
    pub fn new(
        store: TimestampStore,
        notifier: Arc<dyn notification::Notifier>,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                notifier,
                clock,
                settings,
                last_tick: Mutex::new(None),
            }),
            timer: Mutex::new(None),
            initial_check: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.inner.settings
    }

    /// 评估一次，必要时发出提醒
    pub async fn tick(&self) -> TickOutcome {
        self.inner.tick().await
    }

    /// 启动周期定时器，先取消已有的定时器
    pub fn start(&self) {
        let interval = self.inner.settings.interval;
        let mut timer = lock_slot(&self.timer);
        if let Some(previous) = timer.take() {
            debug!("Replacing existing inactivity timer");
            previous.abort();
        }

        let inner = self.inner.clone();
        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                debug!("Inactivity timer fired");
                inner.tick().await;
            }
        }));
        info!("Inactivity timer armed every {:?}", interval);
    }

    /// 激活后稍等片刻做一次检查，覆盖长时间休眠后刚安装/更新的情况
    pub fn schedule_initial_check(&self) {
        let delay = self.inner.settings.initial_delay;
        let mut initial = lock_slot(&self.initial_check);
        if let Some(previous) = initial.take() {
            previous.abort();
        }

        let inner = self.inner.clone();
        *initial = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!("Running initial inactivity check");
            inner.tick().await;
        }));
    }

    pub fn stop(&self) {
        self.abort_all();
        info!("Inactivity scheduler stopped");
    }

    fn abort_all(&self) {
        for slot in [&self.timer, &self.initial_check] {
            if let Some(handle) = lock_slot(slot).take() {
                handle.abort();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        lock_slot(&self.timer)
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    pub fn last_tick(&self) -> Option<LastTick> {
        self.inner.last_tick.lock().ok().and_then(|last| *last)
    }
}

impl Drop for InactivityScheduler {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// 句柄槽位；锁中毒时照常取用，保证定时器始终可被取消
fn lock_slot(slot: &Mutex<Option<JoinHandle<()>>>) -> MutexGuard<'_, Option<JoinHandle<()>>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
