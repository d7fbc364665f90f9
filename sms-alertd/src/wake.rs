//! Suspend Inhibition via systemd-logind
//!
//! Implements the core's [`WakeSource`] with logind inhibitor locks. The
//! logind `Inhibit()` call returns a file descriptor; the lock holds as long
//! as the descriptor stays open. The trait's acquire methods are synchronous,
//! so each token spawns a task that performs the async DBus call, parks on a
//! channel while holding the descriptor, and exits (closing it) when the
//! token is dropped.

use sms_alert_core::{WakeSource, WakeToken};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use zbus::zvariant::OwnedFd as ZbusOwnedFd;
use zbus::Connection;

const WHO: &str = "sms-alertd";

/// Logind-backed wake source
pub struct LogindWakeSource {
    connection: Option<Connection>,
}

impl LogindWakeSource {
    /// Wrap an optional system-bus connection; without one, tokens are
    /// accounting-only no-ops
    pub fn new(connection: Option<Connection>) -> Self {
        Self { connection }
    }

    fn acquire(&self, what: &'static str, why: &'static str) -> Box<dyn WakeToken> {
        let (guard_tx, guard_rx) = oneshot::channel::<()>();

        if let Some(connection) = self.connection.clone() {
            tokio::spawn(async move {
                match inhibit(&connection, what, why).await {
                    Ok(fd) => {
                        debug!(what, "inhibitor lock acquired");
                        // Park with the descriptor open until the token drops.
                        let _fd = fd;
                        let _ = guard_rx.await;
                        debug!(what, "inhibitor lock released");
                    }
                    Err(e) => {
                        warn!(what, error = %e, "failed to acquire inhibitor lock");
                        let _ = guard_rx.await;
                    }
                }
            });
        }

        Box::new(LogindToken { _guard: guard_tx })
    }
}

impl WakeSource for LogindWakeSource {
    fn acquire_partial(&self) -> Box<dyn WakeToken> {
        self.acquire("sleep", "processing incoming message")
    }

    fn acquire_full(&self) -> Box<dyn WakeToken> {
        self.acquire("sleep:idle", "presenting message alert")
    }
}

/// Dropping the token closes the guard channel and lets the holder task exit
struct LogindToken {
    _guard: oneshot::Sender<()>,
}

impl WakeToken for LogindToken {}

/// Call org.freedesktop.login1.Manager.Inhibit and keep the returned fd
async fn inhibit(connection: &Connection, what: &str, why: &str) -> anyhow::Result<OwnedFd> {
    let reply = connection
        .call_method(
            Some("org.freedesktop.login1"),
            "/org/freedesktop/login1",
            Some("org.freedesktop.login1.Manager"),
            "Inhibit",
            &(what, WHO, why, "block"),
        )
        .await?;

    let fd: ZbusOwnedFd = reply.body().deserialize()?;

    // Duplicate before zbus's OwnedFd closes the original.
    let dup_fd = nix::unistd::dup(fd.as_raw_fd())?;
    // Safety: dup returned a valid descriptor we now own.
    Ok(unsafe { OwnedFd::from_raw_fd(dup_fd) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokens_without_bus_are_noops() {
        let source = LogindWakeSource::new(None);
        let partial = source.acquire_partial();
        let full = source.acquire_full();
        drop(partial);
        drop(full);
    }
}
