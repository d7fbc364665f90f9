//! Pending-message queue
//!
//! One [`MessageQueue`] exists per popup session and owns the ordered
//! sequence of not-yet-dismissed messages plus the active-item cursor. All
//! mutating operations assume single-writer discipline: callers serialize
//! access behind one mutex.
//!
//! Removal is two-phase because it may span a UI transition: `begin_remove`
//! marks the removal in flight and `finish_remove` performs the mutation.
//! A second removal request while one is in flight is rejected with
//! [`RemovalOutcome::Busy`] rather than raced. The one-shot [`remove_at`]
//! runs both phases back to back.
//!
//! [`remove_at`]: MessageQueue::remove_at

use crate::error::{AlertError, Result};
use crate::message::Message;
use tracing::{debug, warn};

/// Result of a removal request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// The message was removed and the queue still holds others
    Removed,
    /// Removal would empty the queue; nothing was mutated. Final closure is
    /// a distinct, caller-driven teardown.
    EmptyAfterRemoval,
    /// Another removal is in flight; the caller must not spin-retry
    Busy,
}

/// Result of starting a two-phase removal
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalStart {
    /// Removal is now in flight; call `finish_remove` (or `abort_remove`)
    Started,
    /// Removal was rejected without mutating
    Rejected(RemovalOutcome),
}

/// Ordered collection of pending messages with an active-item cursor
#[derive(Debug, Default)]
pub struct MessageQueue {
    messages: Vec<Message>,
    active_index: usize,
    pending_removal: Option<usize>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    /// Move the cursor; out-of-range values are clamped
    pub fn set_active_index(&mut self, index: usize) {
        self.active_index = index.min(self.messages.len().saturating_sub(1));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Add a single new arrival to the end of the sequence
    pub fn append(&mut self, message: Message) {
        debug!(
            address = %message.address,
            total = self.messages.len() + 1,
            "message appended to queue"
        );
        self.messages.push(message);
    }

    /// Insert a batch of previously-unread messages at the front.
    ///
    /// Front insertion preserves chronological order when the batch is
    /// surfaced together with a newly arrived message the caller appends
    /// afterwards.
    pub fn append_batch(&mut self, batch: Vec<Message>) {
        if batch.is_empty() {
            return;
        }
        debug!(batch = batch.len(), "message batch inserted at queue front");
        let shift = batch.len();
        let was_empty = self.messages.is_empty();
        self.messages.splice(0..0, batch);
        // Keep the cursor on the same message it pointed at before the shift.
        if !was_empty {
            self.active_index += shift;
        }
        // An in-flight removal tracks its element the same way.
        if let Some(pending) = self.pending_removal.as_mut() {
            *pending += shift;
        }
    }

    /// Message under the cursor
    pub fn active_message(&self) -> Result<&Message> {
        self.messages.get(self.active_index).ok_or(AlertError::EmptyQueue)
    }

    pub fn active_message_mut(&mut self) -> Result<&mut Message> {
        self.messages
            .get_mut(self.active_index)
            .ok_or(AlertError::EmptyQueue)
    }

    /// First message not yet handled by the decision engine, if any.
    ///
    /// Used when queue membership changes without an explicit new-arrival
    /// call.
    pub fn first_unannounced(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.should_notify)
    }

    pub fn first_unannounced_mut(&mut self) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.should_notify)
    }

    /// Whether a removal is currently in flight
    pub fn removal_in_flight(&self) -> bool {
        self.pending_removal.is_some()
    }

    /// Start removing the message at `index`
    pub fn begin_remove(&mut self, index: usize) -> RemovalStart {
        if self.pending_removal.is_some() {
            debug!(index, "removal rejected, another removal in flight");
            return RemovalStart::Rejected(RemovalOutcome::Busy);
        }
        if self.messages.len() <= 1 {
            return RemovalStart::Rejected(RemovalOutcome::EmptyAfterRemoval);
        }
        if index >= self.messages.len() {
            warn!(index, len = self.messages.len(), "removal index out of range");
            return RemovalStart::Rejected(RemovalOutcome::EmptyAfterRemoval);
        }
        self.pending_removal = Some(index);
        RemovalStart::Started
    }

    /// Complete an in-flight removal
    ///
    /// Adjusts the cursor (a removed index before the cursor pulls it back
    /// when the cursor is not already on the last item), removes the element
    /// and clears the in-flight guard.
    pub fn finish_remove(&mut self) -> RemovalOutcome {
        let Some(index) = self.pending_removal.take() else {
            warn!("finish_remove called with no removal in flight");
            return RemovalOutcome::Busy;
        };
        let last = self.messages.len() - 1;
        if index < self.active_index && self.active_index != last {
            self.active_index -= 1;
        }
        self.messages.remove(index);
        self.active_index = self.active_index.min(self.messages.len() - 1);
        debug!(
            index,
            active = self.active_index,
            remaining = self.messages.len(),
            "message removed from queue"
        );
        RemovalOutcome::Removed
    }

    /// Abandon an in-flight removal without mutating the sequence
    pub fn abort_remove(&mut self) {
        self.pending_removal = None;
    }

    /// One-shot removal of the message at `index`
    pub fn remove_at(&mut self, index: usize) -> RemovalOutcome {
        match self.begin_remove(index) {
            RemovalStart::Rejected(outcome) => outcome,
            RemovalStart::Started => self.finish_remove(),
        }
    }

    /// One-shot removal of the active message
    pub fn remove_active(&mut self) -> RemovalOutcome {
        self.remove_at(self.active_index)
    }
}
