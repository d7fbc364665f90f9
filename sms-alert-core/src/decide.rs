//! Notification decision engine
//!
//! Maps a resolved message plus device lock state and configuration to
//! exactly one of the popup or passive-notification paths, and owns the
//! active popup session's queue handle. Recounts (queue membership changes
//! inside an open session) re-enter here but only ever drive the silent
//! update path; sound, vibration and LED belong to the first announcement
//! alone.

use crate::config::AlertConfig;
use crate::error::Result;
use crate::message::{Message, MessageSnapshot};
use crate::presenter::{DeviceState, NotificationPresenter, PopupSurface, SLOT_ALERT};
use crate::queue::MessageQueue;
use crate::reminder::{ReminderScheduler, ReminderTarget};
use crate::wake::WakeSource;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Where a resolved message gets surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertRoute {
    /// Blocking full-screen popup
    Popup,
    /// Passive status-bar notification
    StatusBar,
}

/// Pure decision rule, first match wins.
///
/// A locked device always gets the popup; an unlocked one gets it unless the
/// user restricted popups to the keyguard or is already inside the messaging
/// app.
pub fn decide(locked: bool, in_messaging_app: bool, config: &AlertConfig) -> AlertRoute {
    if !config.popup_enabled {
        return AlertRoute::StatusBar;
    }
    if locked || (!config.only_show_on_keyguard && !in_messaging_app) {
        AlertRoute::Popup
    } else {
        AlertRoute::StatusBar
    }
}

/// Shared handle to the active popup session's queue, `None` between sessions
pub type SessionQueue = Arc<AsyncMutex<Option<MessageQueue>>>;

/// Routes resolved messages and drives the presenter, popup surface and
/// reminder scheduler
pub struct DecisionEngine {
    config: Arc<AlertConfig>,
    device: Arc<dyn DeviceState>,
    presenter: Arc<dyn NotificationPresenter>,
    popup: Arc<dyn PopupSurface>,
    wake: Arc<dyn WakeSource>,
    scheduler: Arc<ReminderScheduler>,
    queue: SessionQueue,
    /// Identity of the native messaging application; arrivals while it is
    /// foregrounded never open the popup
    messaging_app: String,
}

impl DecisionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<AlertConfig>,
        device: Arc<dyn DeviceState>,
        presenter: Arc<dyn NotificationPresenter>,
        popup: Arc<dyn PopupSurface>,
        wake: Arc<dyn WakeSource>,
        scheduler: Arc<ReminderScheduler>,
        messaging_app: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            device,
            presenter,
            popup,
            wake,
            scheduler,
            queue: Arc::new(AsyncMutex::new(None)),
            messaging_app: messaging_app.into(),
        })
    }

    /// Queue handle for the popup session layer
    pub fn session_queue(&self) -> SessionQueue {
        Arc::clone(&self.queue)
    }

    pub fn scheduler(&self) -> Arc<ReminderScheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn config(&self) -> Arc<AlertConfig> {
        Arc::clone(&self.config)
    }

    /// Route one resolved message; exactly one path executes.
    pub async fn handle_resolved(self: &Arc<Self>, message: Message) -> Result<()> {
        let locked = self.device.is_locked();
        let in_messaging = self
            .device
            .foreground_app()
            .map(|app| app == self.messaging_app)
            .unwrap_or(false);

        match decide(locked, in_messaging, &self.config) {
            AlertRoute::Popup => {
                info!(locked, address = %message.address, "routing to popup");
                self.open_popup(message).await
            }
            AlertRoute::StatusBar => {
                info!(in_messaging, address = %message.address, "routing to status bar");
                self.announce(message).await
            }
        }
    }

    /// Popup path: push into the session queue (starting a session when none
    /// is open) and open the surface with the display forced on.
    async fn open_popup(self: &Arc<Self>, message: Message) -> Result<()> {
        let (snapshots, session_existed) = {
            let mut slot = self.queue.lock().await;
            let session_existed = slot.is_some();
            let queue = slot.get_or_insert_with(|| {
                debug!("starting popup session");
                MessageQueue::new()
            });
            queue.append(message);
            let snapshots: Vec<MessageSnapshot> =
                queue.messages().iter().map(MessageSnapshot::of).collect();
            (snapshots, session_existed)
        };

        // Temporary full-wake so the display turns on for the popup.
        let _wake = self.wake.acquire_full();
        if let Err(e) = self.popup.open(snapshots).await {
            warn!(error = %e, "popup surface failed to open");
        }

        if session_existed {
            // The queue count changed inside an open session; refresh the
            // passive notification without re-announcing.
            self.recount().await;
        }
        Ok(())
    }

    /// Passive path: first announcement plus reminder arming.
    pub async fn announce(self: &Arc<Self>, mut message: Message) -> Result<()> {
        if self.config.notifications_enabled {
            if let Err(e) = self.presenter.show(&message, SLOT_ALERT).await {
                warn!(error = %e, "notification show failed");
            }
        } else {
            debug!("notifications disabled, skipping show");
        }
        message.mark_announced();

        let shared = Arc::new(Mutex::new(message));
        self.scheduler.arm(
            shared,
            &self.config.reminder,
            Arc::clone(self) as Arc<dyn ReminderTarget>,
        );
        Ok(())
    }

    /// Queue membership changed without a new arrival: update the passive
    /// notification for the first unannounced message, if any.
    ///
    /// Idempotent per message identity; repeated recounts never replay
    /// sound, vibration or LED.
    pub async fn recount(self: &Arc<Self>) {
        let pending = {
            let mut slot = self.queue.lock().await;
            let Some(queue) = slot.as_mut() else {
                return;
            };
            let count = queue.len();
            match queue.first_unannounced_mut() {
                Some(message) => {
                    message.mark_announced();
                    Some((message.clone(), count))
                }
                None => None,
            }
        };

        let Some((message, count)) = pending else {
            return;
        };

        if self.config.notifications_enabled {
            if let Err(e) = self.presenter.update(&message, count, SLOT_ALERT).await {
                warn!(error = %e, "notification update failed");
            }
        }
        self.scheduler.arm(
            Arc::new(Mutex::new(message)),
            &self.config.reminder,
            Arc::clone(self) as Arc<dyn ReminderTarget>,
        );
    }
}

#[async_trait]
impl ReminderTarget for DecisionEngine {
    /// Reminder firings re-enter the passive path only; a reminder is a
    /// deliberate re-announcement and may play sound again.
    async fn remind(&self, message: &Message) {
        if !self.config.notifications_enabled {
            return;
        }
        if let Err(e) = self.presenter.show(message, SLOT_ALERT).await {
            warn!(error = %e, "reminder notification failed");
        }
    }
}
