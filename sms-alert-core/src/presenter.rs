//! Presentation and device-state seams
//!
//! The core never touches OS notification or alert primitives directly; it
//! issues abstract show/update/clear/open calls through these traits. A
//! `show` is a first announcement (sound/vibration/LED); an `update` is a
//! recount that changes text and number only and must stay silent no matter
//! how often it is repeated for the same message.

use crate::error::Result;
use crate::message::{Message, MessageSnapshot};
use async_trait::async_trait;

/// Notification slot for the live alert
pub const SLOT_ALERT: u32 = 1337;

/// Notification slot for test notifications driven from preferences
pub const SLOT_TEST: u32 = 888;

/// Status-bar notification collaborator
#[async_trait]
pub trait NotificationPresenter: Send + Sync {
    /// First announcement for a message; plays sound/vibration/LED
    async fn show(&self, message: &Message, slot: u32) -> Result<()>;

    /// Recount update; refreshes text and count without re-announcing
    async fn update(&self, message: &Message, count: usize, slot: u32) -> Result<()>;

    /// Clear one slot
    async fn clear(&self, slot: u32) -> Result<()>;

    /// Clear every slot
    async fn clear_all(&self) -> Result<()>;
}

/// Full-screen popup collaborator
///
/// Receives session snapshots in the restart-safe wire shape; rendering is
/// entirely its concern.
#[async_trait]
pub trait PopupSurface: Send + Sync {
    /// Open (or refresh) the popup for the given pending messages
    async fn open(&self, messages: Vec<MessageSnapshot>) -> Result<()>;
}

/// Read-only view of device presentation state
pub trait DeviceState: Send + Sync {
    /// Whether the device sits behind its keyguard
    fn is_locked(&self) -> bool;

    /// Identity of the foreground application, when known
    fn foreground_app(&self) -> Option<String>;

    /// Whether the display is currently on
    fn is_screen_on(&self) -> bool;
}
