//! Repeat-reminder scheduler
//!
//! Re-announces a still-unread message on a fixed interval until the bounded
//! repeat count is consumed or the user interacts with the alert. The timer
//! task re-reads device state at fire time rather than trusting anything
//! captured at arm time; a firing suppressed by the screen requirement still
//! consumes its repeat and the timer is rescheduled (or retired) as if it had
//! fired.

use crate::config::ReminderConfig;
use crate::message::Message;
use crate::presenter::DeviceState;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info};

/// Scheduler lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderState {
    /// No reminder pending
    Idle,
    /// Timer running for the armed message
    Armed,
    /// Fire in progress
    Firing,
}

/// Receiver of reminder firings
///
/// Implemented by the decision engine; a firing re-enters its
/// passive-notification path only and never opens a popup.
#[async_trait]
pub trait ReminderTarget: Send + Sync {
    async fn remind(&self, message: &Message);
}

struct Inner {
    state: ReminderState,
    task: Option<JoinHandle<()>>,
}

/// Timer-driven re-notification with a bounded repeat count
pub struct ReminderScheduler {
    device: Arc<dyn DeviceState>,
    inner: Mutex<Inner>,
}

impl ReminderScheduler {
    pub fn new(device: Arc<dyn DeviceState>) -> Arc<Self> {
        Arc::new(Self {
            device,
            inner: Mutex::new(Inner {
                state: ReminderState::Idle,
                task: None,
            }),
        })
    }

    pub fn state(&self) -> ReminderState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    /// Arm the scheduler for `message`, replacing any pending reminder.
    ///
    /// The message is shared: the scheduler is the only writer of its
    /// `reminder_count`.
    pub fn arm(
        self: &Arc<Self>,
        message: Arc<Mutex<Message>>,
        config: &ReminderConfig,
        target: Arc<dyn ReminderTarget>,
    ) {
        if !config.enabled {
            debug!("reminders disabled, not arming");
            return;
        }

        let interval = Duration::from_secs(config.interval_seconds);
        let max_repeats = config.max_repeats;
        let require_screen_on = config.require_screen_on;

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.state = ReminderState::Armed;

        let scheduler = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                sleep(interval).await;

                scheduler.set_state(ReminderState::Firing);

                // Consume the repeat first; a suppressed firing still counts.
                let snapshot = {
                    let mut message = message.lock().unwrap_or_else(|e| e.into_inner());
                    message.note_reminder();
                    message.clone()
                };

                let screen_ok = !require_screen_on || scheduler.device.is_screen_on();
                if screen_ok {
                    info!(
                        reminder = snapshot.reminder_count,
                        address = %snapshot.address,
                        "reminder firing"
                    );
                    target.remind(&snapshot).await;
                } else {
                    debug!(
                        reminder = snapshot.reminder_count,
                        "screen requirement not met, skipping firing"
                    );
                }

                if snapshot.reminder_count < max_repeats {
                    scheduler.set_state(ReminderState::Armed);
                } else {
                    scheduler.retire();
                    break;
                }
            }
        });
        inner.task = Some(task);

        debug!(
            interval_seconds = config.interval_seconds,
            max_repeats, "reminder armed"
        );
    }

    /// Discard any pending reminder; callable from any state.
    ///
    /// Every user interaction with an open popup or notification lands here.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = inner.task.take() {
            task.abort();
            debug!("reminder cancelled");
        }
        inner.state = ReminderState::Idle;
    }

    fn set_state(&self, state: ReminderState) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state = state;
    }

    fn retire(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.state = ReminderState::Idle;
        inner.task = None;
    }
}

impl Drop for ReminderScheduler {
    fn drop(&mut self) {
        if let Some(task) = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .task
            .take()
        {
            task.abort();
        }
    }
}
