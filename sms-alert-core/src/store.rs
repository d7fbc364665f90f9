//! Persistent message store and contact directory seams
//!
//! The store is the system-of-record for delivered SMS/MMS content; this core
//! queries it but does not own it. Store write failures are logged no-ops to
//! the pipeline, never crashes.

use crate::error::Result;
use crate::message::{Message, MessageKind};
use async_trait::async_trait;

/// Largest contact photo the core will carry along with a message.
///
/// Bigger blobs are treated as "no photo available", not as an error.
pub const MAX_CONTACT_PHOTO_BYTES: usize = 512 * 1024;

/// Read/write access to the system message store
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Most recent unread message, optionally restricted to one kind and
    /// optionally excluding a thread
    async fn most_recent_unread(
        &self,
        exclude_thread: Option<i64>,
        kind: Option<MessageKind>,
    ) -> Result<Option<Message>>;

    /// Most recent already-read message; last-resort fallback when no unread
    /// candidate ever appears
    async fn most_recent_read(&self) -> Result<Option<Message>>;

    /// All messages in one conversation thread, oldest first
    async fn messages_for_thread(&self, thread_id: i64) -> Result<Vec<Message>>;

    /// Count of unread items across both kinds
    async fn unread_count(&self) -> Result<u32>;

    /// Resolve the store row id for a message by thread, timestamp and kind;
    /// 0 when no row matches
    async fn find_persisted_id(
        &self,
        thread_id: i64,
        timestamp: i64,
        kind: MessageKind,
    ) -> Result<i64>;

    /// Mark one message read
    async fn mark_message_read(&self, persisted_id: i64, kind: MessageKind) -> Result<()>;

    /// Mark a whole thread read
    async fn mark_thread_read(&self, thread_id: i64) -> Result<()>;

    /// Delete one message; `Ok(false)` when no row was deleted
    async fn delete_message(&self, persisted_id: i64, kind: MessageKind) -> Result<bool>;
}

/// A resolved contact record
#[derive(Debug, Clone, Default)]
pub struct ContactInfo {
    pub id: String,
    pub name: Option<String>,
    pub photo: Option<Vec<u8>>,
}

/// Lookup from an originating address to contact details
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    /// Find the contact owning `address`, if any
    async fn lookup(&self, address: &str) -> Option<ContactInfo>;
}
