//! Device State via systemd-logind
//!
//! The core's routing decisions need the lock and screen state. On a Linux
//! desktop those live in the logind session properties (`LockedHint`,
//! `IdleHint`); the trait getters are synchronous, so a background task polls
//! the properties into atomics and the getters read the cached values.
//!
//! Foreground-application identity has no portable desktop query, so it is
//! reported as unknown; the in-messaging-app suppression only engages when a
//! front-end pushes the information in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use zbus::Connection;

use sms_alert_core::DeviceState;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Cached device presentation state
pub struct LogindDeviceState {
    locked: AtomicBool,
    screen_on: AtomicBool,
    foreground: Mutex<Option<String>>,
}

impl LogindDeviceState {
    /// Create with optimistic defaults (unlocked, screen on)
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            locked: AtomicBool::new(false),
            screen_on: AtomicBool::new(true),
            foreground: Mutex::new(None),
        })
    }

    /// Start polling logind session properties into the cache.
    ///
    /// Polling failures downgrade to the last cached values; a desktop
    /// without logind simply keeps the optimistic defaults.
    pub fn spawn_poller(self: &Arc<Self>, connection: Connection) {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match Self::query_hints(&connection).await {
                    Ok((locked, idle)) => {
                        state.locked.store(locked, Ordering::SeqCst);
                        state.screen_on.store(!idle, Ordering::SeqCst);
                    }
                    Err(e) => {
                        debug!(error = %e, "logind hint query failed, keeping cached state");
                    }
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        });
    }

    async fn query_hints(connection: &Connection) -> anyhow::Result<(bool, bool)> {
        let proxy = zbus::Proxy::new(
            connection,
            "org.freedesktop.login1",
            "/org/freedesktop/login1/session/auto",
            "org.freedesktop.login1.Session",
        )
        .await?;
        let locked: bool = proxy.get_property("LockedHint").await?;
        let idle: bool = proxy.get_property("IdleHint").await?;
        Ok((locked, idle))
    }

    /// Record the foreground application reported by a front-end
    pub fn set_foreground_app(&self, app: Option<String>) {
        let mut foreground = self.foreground.lock().unwrap_or_else(|e| e.into_inner());
        *foreground = app;
    }

    /// Force the lock state; used by front-ends that know better than logind
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }
}

impl DeviceState for LogindDeviceState {
    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    fn foreground_app(&self) -> Option<String> {
        self.foreground
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn is_screen_on(&self) -> bool {
        self.screen_on.load(Ordering::SeqCst)
    }
}

/// Connect to the system bus for logind access; absence is not fatal
pub async fn system_bus() -> Option<Connection> {
    match Connection::system().await {
        Ok(connection) => Some(connection),
        Err(e) => {
            warn!(error = %e, "system DBus unavailable, lock state will use defaults");
            None
        }
    }
}
