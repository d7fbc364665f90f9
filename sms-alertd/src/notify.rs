//! Desktop Notifications Integration
//!
//! Implements the core's [`NotificationPresenter`] over the freedesktop.org
//! DBus notification specification. Each core slot maps to one replaceable
//! desktop notification: a `show` creates or replaces the notification with
//! full announcement (sound hint allowed), an `update` replaces it with the
//! `suppress-sound` hint set so repeated recounts stay silent.

use anyhow::Context;
use async_trait::async_trait;
use sms_alert_core::{AlertError, Message, MessageKind, NotificationPresenter, PrivacyMode, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use zbus::Connection;

const NOTIFY_TIMEOUT_MS: i32 = 10_000;
const APP_NAME: &str = "SMS Alert";
const ICON: &str = "mail-unread-symbolic";

/// Freedesktop notification presenter
pub struct FreedesktopPresenter {
    connection: Connection,
    privacy: PrivacyMode,
    /// Core slot id → live desktop notification id
    live: Mutex<HashMap<u32, u32>>,
}

/// Canned message for the command-line notification test
pub fn test_message() -> Message {
    let now = chrono::Utc::now().timestamp_millis();
    let mut message = Message::from_arrival("5550123456", "Test notification", now, MessageKind::Sms);
    message.contact_name = Some("SMS Alert".to_string());
    message
}

/// Compose the notification summary line under the privacy mode
pub fn compose_summary(message: &Message, count: usize, privacy: PrivacyMode) -> String {
    let sender = match privacy {
        PrivacyMode::HideAll => "New message".to_string(),
        _ => message.display_name(),
    };
    if count > 1 {
        format!("{sender} ({count} messages)")
    } else {
        sender
    }
}

/// Compose the notification body under the privacy mode
pub fn compose_body(message: &Message, privacy: PrivacyMode) -> String {
    match privacy {
        PrivacyMode::Off => message.body.clone(),
        PrivacyMode::HideMessage | PrivacyMode::HideAll => message.formatted_timestamp(),
    }
}

impl FreedesktopPresenter {
    /// Connect to the session bus
    pub async fn new(privacy: PrivacyMode) -> anyhow::Result<Self> {
        let connection = Connection::session()
            .await
            .context("Failed to connect to session DBus")?;
        debug!("connected to notification service");
        Ok(Self {
            connection,
            privacy,
            live: Mutex::new(HashMap::new()),
        })
    }

    async fn notify(
        &self,
        slot: u32,
        summary: &str,
        body: &str,
        silent: bool,
    ) -> Result<()> {
        let replaces_id = {
            let live = self.live.lock().unwrap_or_else(|e| e.into_inner());
            live.get(&slot).copied().unwrap_or(0)
        };

        let mut hints: HashMap<&str, zbus::zvariant::Value<'_>> = HashMap::new();
        hints.insert("category", zbus::zvariant::Value::Str("im.received".into()));
        hints.insert("urgency", zbus::zvariant::Value::U8(1));
        if silent {
            hints.insert("suppress-sound", zbus::zvariant::Value::Bool(true));
        }

        let proxy = zbus::Proxy::new(
            &self.connection,
            "org.freedesktop.Notifications",
            "/org/freedesktop/Notifications",
            "org.freedesktop.Notifications",
        )
        .await
        .map_err(dbus_err)?;

        let actions: Vec<String> = Vec::new();
        let notification_id: u32 = proxy
            .call_method(
                "Notify",
                &(
                    APP_NAME,
                    replaces_id,
                    ICON,
                    summary,
                    body,
                    &actions,
                    &hints,
                    NOTIFY_TIMEOUT_MS,
                ),
            )
            .await
            .map_err(dbus_err)?
            .body()
            .deserialize()
            .map_err(dbus_err)?;

        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        live.insert(slot, notification_id);
        debug!(slot, notification_id, silent, "notification posted");
        Ok(())
    }

    async fn close(&self, notification_id: u32) -> Result<()> {
        let proxy = zbus::Proxy::new(
            &self.connection,
            "org.freedesktop.Notifications",
            "/org/freedesktop/Notifications",
            "org.freedesktop.Notifications",
        )
        .await
        .map_err(dbus_err)?;
        proxy
            .call_method("CloseNotification", &(notification_id,))
            .await
            .map_err(dbus_err)?;
        Ok(())
    }
}

fn dbus_err(e: zbus::Error) -> AlertError {
    AlertError::presentation(format!("notification dbus call failed: {e}"))
}

#[async_trait]
impl NotificationPresenter for FreedesktopPresenter {
    async fn show(&self, message: &Message, slot: u32) -> Result<()> {
        let summary = compose_summary(message, 1, self.privacy);
        let body = compose_body(message, self.privacy);
        self.notify(slot, &summary, &body, false).await
    }

    async fn update(&self, message: &Message, count: usize, slot: u32) -> Result<()> {
        let summary = compose_summary(message, count, self.privacy);
        let body = compose_body(message, self.privacy);
        self.notify(slot, &summary, &body, true).await
    }

    async fn clear(&self, slot: u32) -> Result<()> {
        let id = {
            let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
            live.remove(&slot)
        };
        if let Some(id) = id {
            self.close(id).await?;
        }
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        let ids: Vec<u32> = {
            let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
            live.drain().map(|(_, id)| id).collect()
        };
        let results = futures::future::join_all(ids.into_iter().map(|id| self.close(id))).await;
        for result in results {
            result?;
        }
        Ok(())
    }
}
