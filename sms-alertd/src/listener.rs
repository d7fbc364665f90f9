//! Control Socket Listener
//!
//! Front-ends (the SMS transport bridge and the popup UI) talk to the daemon
//! over a unix socket carrying newline-delimited JSON. Arrivals are persisted
//! into the local store before entering the pipeline, so reconciliation has a
//! row to find; popup actions and device-state reports are dispatched
//! directly.
//!
//! A malformed line is logged and skipped; the connection stays up.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use sms_alert_core::{
    parse_sms_fragments, ArrivalEvent, IngestHandle, MessageKind, PopupAction, PopupSession,
    PopupSurface, SessionOutcome, MMS_DATA_TYPE,
};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::device::LogindDeviceState;
use crate::popup::SnapshotPopupSurface;
use crate::store::SqliteMessageStore;

/// One line of the control protocol
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// A new SMS/MMS arrival from the transport bridge
    Arrival(ArrivalEvent),
    /// A popup action from the UI
    Action { action: String },
    /// Move the popup cursor
    Select { index: usize },
    /// Foreground application report from a front-end
    Foreground { app: Option<String> },
    /// Lock-state report from a front-end
    Locked { locked: bool },
}

/// Accepts control connections and dispatches their messages
pub struct ControlListener {
    handle: IngestHandle,
    session: Arc<PopupSession>,
    store: Arc<SqliteMessageStore>,
    surface: Arc<SnapshotPopupSurface>,
    device: Arc<LogindDeviceState>,
}

impl ControlListener {
    pub fn new(
        handle: IngestHandle,
        session: Arc<PopupSession>,
        store: Arc<SqliteMessageStore>,
        surface: Arc<SnapshotPopupSurface>,
        device: Arc<LogindDeviceState>,
    ) -> Self {
        Self {
            handle,
            session,
            store,
            surface,
            device,
        }
    }

    /// Bind the socket, replacing a stale file from a previous run
    pub fn bind(socket_path: &Path) -> Result<UnixListener> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
        }
        UnixListener::bind(socket_path).context("Failed to bind control socket")
    }

    /// Accept and serve connections until cancelled.
    ///
    /// Connections are served one at a time; the control socket carries
    /// low-volume front-end traffic, not bulk data.
    pub async fn run(&self, listener: UnixListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("control connection accepted");
                    self.serve(stream).await;
                }
                Err(e) => {
                    warn!(error = %e, "control accept failed");
                }
            }
        }
    }

    async fn serve(&self, stream: UnixStream) {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Err(e) = self.process_line(&line).await {
                        warn!(error = %e, "control line failed");
                    }
                }
                Ok(None) => {
                    debug!("control connection closed");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "control read failed");
                    return;
                }
            }
        }
    }

    async fn process_line(&self, line: &str) -> Result<()> {
        let message: ControlMessage =
            serde_json::from_str(line).context("Failed to decode control line")?;
        match message {
            ControlMessage::Arrival(event) => self.handle_arrival(event),
            ControlMessage::Action { action } => self.handle_action(&action).await,
            ControlMessage::Select { index } => {
                self.session.select(index).await?;
                Ok(())
            }
            ControlMessage::Foreground { app } => {
                self.device.set_foreground_app(app);
                Ok(())
            }
            ControlMessage::Locked { locked } => {
                self.device.set_locked(locked);
                Ok(())
            }
        }
    }

    /// Persist the arrival so reconciliation has a row to find, then hand it
    /// to the worker
    fn handle_arrival(&self, event: ArrivalEvent) -> Result<()> {
        let timestamp = Utc::now().timestamp_millis();
        match event.kind {
            MessageKind::Sms => {
                if let Ok(fragments) = parse_sms_fragments(&event.raw_payload) {
                    if !fragments[0].is_droppable() {
                        let body: String =
                            fragments.iter().map(|f| f.body.as_str()).collect();
                        let thread = self.store.resolve_thread(&event.address)?;
                        self.store.insert_message(
                            thread,
                            &event.address,
                            &body,
                            timestamp,
                            MessageKind::Sms,
                        )?;
                    }
                }
            }
            MessageKind::Mms => {
                if event.data_type == MMS_DATA_TYPE {
                    let thread = self.store.resolve_thread(&event.address)?;
                    self.store.insert_message(
                        thread,
                        &event.address,
                        "",
                        timestamp,
                        MessageKind::Mms,
                    )?;
                }
            }
        }

        self.handle
            .submit(event)
            .context("Failed to enqueue arrival")?;
        Ok(())
    }

    async fn handle_action(&self, action: &str) -> Result<()> {
        let Some(action) = PopupAction::from_str(action) else {
            anyhow::bail!("unknown popup action: {action}");
        };
        match self.session.dispatch(action).await {
            Ok(SessionOutcome::Closed) => {
                self.surface.clear();
                info!(action = action.as_str(), "popup session ended");
            }
            Ok(SessionOutcome::Open) => {}
            Err(e) => warn!(action = action.as_str(), error = %e, "popup action failed"),
        }
        Ok(())
    }

    /// Persist the open session (if any) and drain the worker.
    pub async fn shutdown(self) {
        let snapshots = self.session.snapshot().await;
        if snapshots.is_empty() {
            self.surface.clear();
        } else if let Err(e) = self.surface.open(snapshots).await {
            warn!(error = %e, "failed to persist session on shutdown");
        }
        self.handle.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_arrival_line() {
        let line = r#"{"type":"arrival","kind":"sms","address":"+15551234567","raw_payload":"[{\"body\":\"hi\"}]"}"#;
        let message: ControlMessage = serde_json::from_str(line).unwrap();
        match message {
            ControlMessage::Arrival(event) => {
                assert_eq!(event.kind, MessageKind::Sms);
                assert_eq!(event.address, "+15551234567");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_decode_action_and_state_lines() {
        let message: ControlMessage =
            serde_json::from_str(r#"{"type":"action","action":"close"}"#).unwrap();
        assert!(matches!(message, ControlMessage::Action { ref action } if action == "close"));

        let message: ControlMessage =
            serde_json::from_str(r#"{"type":"select","index":2}"#).unwrap();
        assert!(matches!(message, ControlMessage::Select { index: 2 }));

        let message: ControlMessage =
            serde_json::from_str(r#"{"type":"locked","locked":true}"#).unwrap();
        assert!(matches!(message, ControlMessage::Locked { locked: true }));

        let message: ControlMessage =
            serde_json::from_str(r#"{"type":"foreground","app":null}"#).unwrap();
        assert!(matches!(message, ControlMessage::Foreground { app: None }));
    }

    #[test]
    fn test_malformed_line_rejected() {
        assert!(serde_json::from_str::<ControlMessage>("{}").is_err());
        assert!(serde_json::from_str::<ControlMessage>(r#"{"type":"nope"}"#).is_err());
    }
}
