//! Popup Session Handoff
//!
//! The daemon has no UI of its own; the popup surface serializes the session
//! snapshot to a well-known file and lets the popup front-end pick it up.
//! Writes go through a temp file and rename so the front-end never reads a
//! half-written session.

use async_trait::async_trait;
use sms_alert_core::{AlertError, MessageSnapshot, PopupSurface, Result};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// File-handoff popup surface
pub struct SnapshotPopupSurface {
    path: PathBuf,
}

impl SnapshotPopupSurface {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read back a previously written session, if any.
    ///
    /// Used on startup to resume an alert session that was open when the
    /// daemon last stopped. Unreadable snapshots are discarded, not fatal.
    pub fn load(&self) -> Option<Vec<MessageSnapshot>> {
        let contents = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<Vec<MessageSnapshot>>(&contents) {
            Ok(snapshots) if !snapshots.is_empty() => Some(snapshots),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "discarding unreadable session snapshot");
                let _ = fs::remove_file(&self.path);
                None
            }
        }
    }

    /// Remove the handoff file after session teardown
    pub fn clear(&self) {
        if self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(error = %e, "failed to remove session snapshot");
            }
        }
    }
}

#[async_trait]
impl PopupSurface for SnapshotPopupSurface {
    async fn open(&self, messages: Vec<MessageSnapshot>) -> Result<()> {
        let contents = serde_json::to_string_pretty(&messages)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            AlertError::presentation(format!("session snapshot rename failed: {e}"))
        })?;
        debug!(messages = messages.len(), path = %self.path.display(), "session handed to popup surface");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sms_alert_core::{Message, MessageKind};

    fn snapshot(body: &str) -> MessageSnapshot {
        MessageSnapshot::of(&Message::from_arrival("5550001", body, 42, MessageKind::Sms))
    }

    #[tokio::test]
    async fn test_open_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let surface = SnapshotPopupSurface::new(dir.path().join("session.json"));

        surface
            .open(vec![snapshot("one"), snapshot("two")])
            .await
            .unwrap();

        let loaded = surface.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].clone().into_message().body, "two");
    }

    #[tokio::test]
    async fn test_load_missing_or_empty_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let surface = SnapshotPopupSurface::new(dir.path().join("session.json"));
        assert!(surface.load().is_none());

        surface.open(Vec::new()).await.unwrap();
        assert!(surface.load().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{broken").unwrap();

        let surface = SnapshotPopupSurface::new(path.clone());
        assert!(surface.load().is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let surface = SnapshotPopupSurface::new(dir.path().join("session.json"));
        surface.open(vec![snapshot("one")]).await.unwrap();
        surface.clear();
        assert!(surface.load().is_none());
    }
}
