//! Popup session and user actions
//!
//! A [`PopupSession`] wraps the decision engine's queue handle and turns user
//! actions from the popup surface into queue mutations, store writes and
//! teardown. The action set is closed; anything the surface renders maps to
//! one of these variants.
//!
//! Store writes on this path are best-effort: a failed mark-read or delete is
//! logged and the session carries on, because the alert flow must never die
//! on a store hiccup.

use crate::decide::{DecisionEngine, SessionQueue};
use crate::error::{AlertError, Result};
use crate::message::{Message, MessageSnapshot};
use crate::presenter::NotificationPresenter;
use crate::queue::{MessageQueue, RemovalOutcome};
use crate::store::MessageStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// User action dispatched from the popup surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupAction {
    /// Dismiss the active message
    Close,
    /// Delete the active message from the store after confirmation
    Delete,
    /// Delete without confirmation
    DeleteNoConfirm,
    /// Open full reply composition
    Reply,
    /// Inline quick reply
    QuickReply,
    /// Reply addressed by raw number rather than contact
    ReplyByAddress,
    /// Jump to the message inbox
    Inbox,
    /// Read the active message aloud
    Speak,
    /// Button present but disabled in the current configuration
    Disabled,
}

impl PopupAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Close => "close",
            Self::Delete => "delete",
            Self::DeleteNoConfirm => "delete_no_confirm",
            Self::Reply => "reply",
            Self::QuickReply => "quick_reply",
            Self::ReplyByAddress => "reply_by_address",
            Self::Inbox => "inbox",
            Self::Speak => "speak",
            Self::Disabled => "disabled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "close" => Some(Self::Close),
            "delete" => Some(Self::Delete),
            "delete_no_confirm" => Some(Self::DeleteNoConfirm),
            "reply" => Some(Self::Reply),
            "quick_reply" => Some(Self::QuickReply),
            "reply_by_address" => Some(Self::ReplyByAddress),
            "inbox" => Some(Self::Inbox),
            "speak" => Some(Self::Speak),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// Whether the session survives a dispatched action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The popup stays open with the remaining messages
    Open,
    /// The session was torn down
    Closed,
}

/// Dispatches popup actions against the active queue
pub struct PopupSession {
    engine: Arc<DecisionEngine>,
    store: Arc<dyn MessageStore>,
    presenter: Arc<dyn NotificationPresenter>,
    queue: SessionQueue,
}

impl PopupSession {
    pub fn new(
        engine: Arc<DecisionEngine>,
        store: Arc<dyn MessageStore>,
        presenter: Arc<dyn NotificationPresenter>,
    ) -> Self {
        let queue = engine.session_queue();
        Self {
            engine,
            store,
            presenter,
            queue,
        }
    }

    /// Dispatch one user action against the active message.
    pub async fn dispatch(&self, action: PopupAction) -> Result<SessionOutcome> {
        debug!(action = action.as_str(), "popup action dispatched");
        match action {
            PopupAction::Close => self.close_active(false).await,
            PopupAction::Delete | PopupAction::DeleteNoConfirm => self.close_active(true).await,
            PopupAction::Reply | PopupAction::QuickReply | PopupAction::ReplyByAddress => {
                self.leave_for_reply().await
            }
            PopupAction::Inbox => self.leave_for_inbox().await,
            PopupAction::Speak | PopupAction::Disabled => Ok(SessionOutcome::Open),
        }
    }

    /// Move the cursor; out-of-range values are clamped.
    pub async fn select(&self, index: usize) -> Result<()> {
        let mut slot = self.queue.lock().await;
        let queue = slot.as_mut().ok_or(AlertError::EmptyQueue)?;
        queue.set_active_index(index);
        Ok(())
    }

    /// Serialize the session for restart resume.
    pub async fn snapshot(&self) -> Vec<MessageSnapshot> {
        let slot = self.queue.lock().await;
        slot.as_ref()
            .map(|q| q.messages().iter().map(MessageSnapshot::of).collect())
            .unwrap_or_default()
    }

    /// Rebuild a session from serialized snapshots after a restart.
    ///
    /// All but the newest entry land as a front batch so chronology is
    /// preserved; the newest is appended like a fresh arrival.
    pub async fn resume(&self, mut snapshots: Vec<MessageSnapshot>) -> Result<()> {
        let Some(newest) = snapshots.pop() else {
            warn!("resume requested with no snapshots");
            return Ok(());
        };
        let previous: Vec<Message> = snapshots.into_iter().map(MessageSnapshot::into_message).collect();

        let mut slot = self.queue.lock().await;
        let queue = slot.get_or_insert_with(MessageQueue::new);
        queue.append_batch(previous);
        queue.append(newest.into_message());
        info!(total = queue.len(), "popup session resumed from snapshot");
        Ok(())
    }

    /// Dismiss the active message, optionally deleting it from the store.
    async fn close_active(&self, delete: bool) -> Result<SessionOutcome> {
        let (active, outcome) = {
            let mut slot = self.queue.lock().await;
            let queue = slot.as_mut().ok_or(AlertError::EmptyQueue)?;
            let active = queue.active_message()?.clone();
            let outcome = if queue.len() > 1 {
                queue.remove_active()
            } else {
                RemovalOutcome::EmptyAfterRemoval
            };
            (active, outcome)
        };

        // A Busy rejection must leave the store untouched too, so the
        // delete waits until the removal actually went through.
        match outcome {
            RemovalOutcome::Busy => Err(AlertError::QueueBusy),
            RemovalOutcome::Removed => {
                if delete {
                    self.delete_from_store(&active).await;
                } else if self.engine.config().mark_read_on_open {
                    self.mark_read(&active).await;
                }
                // Membership changed without a new arrival
                self.engine.recount().await;
                Ok(SessionOutcome::Open)
            }
            RemovalOutcome::EmptyAfterRemoval => {
                if delete {
                    self.delete_from_store(&active).await;
                }
                if self.engine.config().mark_read_on_open {
                    self.mark_thread_read(&active).await;
                }
                self.teardown().await;
                Ok(SessionOutcome::Closed)
            }
        }
    }

    /// Reply paths: the composition itself belongs to the surface; here the
    /// alert is acknowledged and the session ends.
    async fn leave_for_reply(&self) -> Result<SessionOutcome> {
        let active = {
            let slot = self.queue.lock().await;
            let queue = slot.as_ref().ok_or(AlertError::EmptyQueue)?;
            queue.active_message()?.clone()
        };
        self.mark_read(&active).await;
        self.teardown().await;
        Ok(SessionOutcome::Closed)
    }

    async fn leave_for_inbox(&self) -> Result<SessionOutcome> {
        if self.engine.config().mark_read_on_open {
            let active = {
                let slot = self.queue.lock().await;
                let queue = slot.as_ref().ok_or(AlertError::EmptyQueue)?;
                queue.active_message()?.clone()
            };
            self.mark_thread_read(&active).await;
        }
        self.teardown().await;
        Ok(SessionOutcome::Closed)
    }

    /// End the session: notifications cleared, reminder cancelled, queue gone.
    async fn teardown(&self) {
        if let Err(e) = self.presenter.clear_all().await {
            warn!(error = %e, "notification clear failed during teardown");
        }
        self.engine.scheduler().cancel();
        let mut slot = self.queue.lock().await;
        *slot = None;
        info!("popup session closed");
    }

    async fn delete_from_store(&self, message: &Message) {
        let mut target = message.clone();
        if target.persisted_id <= 0 {
            // Late resolution for messages that arrived before the store row
            self.refresh_persisted_id(&mut target).await;
        }
        if target.persisted_id <= 0 {
            warn!(thread = target.thread_id, "no store row found to delete");
            return;
        }
        match self.store.delete_message(target.persisted_id, target.kind).await {
            Ok(true) => debug!(persisted_id = target.persisted_id, "message deleted from store"),
            Ok(false) => {
                // The row id went stale under us; resolve again and retry once
                target.invalidate_persisted_id();
                self.refresh_persisted_id(&mut target).await;
                if target.persisted_id <= 0 {
                    warn!(thread = target.thread_id, "delete matched no store row");
                    return;
                }
                match self.store.delete_message(target.persisted_id, target.kind).await {
                    Ok(true) => {
                        debug!(persisted_id = target.persisted_id, "message deleted from store")
                    }
                    Ok(false) => {
                        warn!(persisted_id = target.persisted_id, "delete matched no store row")
                    }
                    Err(e) => warn!(error = %e, "store delete failed"),
                }
            }
            Err(e) => warn!(error = %e, "store delete failed"),
        }
    }

    async fn refresh_persisted_id(&self, message: &mut Message) {
        match self
            .store
            .find_persisted_id(message.thread_id, message.local_timestamp, message.kind)
            .await
        {
            Ok(id) => message.persisted_id = id,
            Err(e) => warn!(error = %e, "persisted id lookup failed before delete"),
        }
    }

    async fn mark_read(&self, message: &Message) {
        let result = if message.persisted_id > 0 {
            self.store
                .mark_message_read(message.persisted_id, message.kind)
                .await
        } else {
            self.store.mark_thread_read(message.thread_id).await
        };
        if let Err(e) = result {
            warn!(error = %e, "mark read failed");
        }
    }

    async fn mark_thread_read(&self, message: &Message) {
        if let Err(e) = self.store.mark_thread_read(message.thread_id).await {
            warn!(error = %e, "mark thread read failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertConfig;
    use crate::message::MessageKind;
    use crate::presenter::{DeviceState, PopupSurface};
    use crate::reminder::ReminderScheduler;
    use crate::store::MessageStore;
    use crate::wake::{WakeSource, WakeToken};
    use crate::queue::RemovalStart;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        deleted: Mutex<Vec<i64>>,
        marked_read: Mutex<Vec<i64>>,
        marked_threads: Mutex<Vec<i64>>,
        /// Row ids for which `delete_message` reports no matching row
        stale: Mutex<Vec<i64>>,
        /// Id handed out by `find_persisted_id`
        resolved: AtomicI64,
    }

    #[async_trait]
    impl MessageStore for FakeStore {
        async fn most_recent_unread(
            &self,
            _exclude_thread: Option<i64>,
            _kind: Option<MessageKind>,
        ) -> Result<Option<Message>> {
            Ok(None)
        }

        async fn most_recent_read(&self) -> Result<Option<Message>> {
            Ok(None)
        }

        async fn messages_for_thread(&self, _thread_id: i64) -> Result<Vec<Message>> {
            Ok(Vec::new())
        }

        async fn unread_count(&self) -> Result<u32> {
            Ok(0)
        }

        async fn find_persisted_id(
            &self,
            _thread_id: i64,
            _timestamp: i64,
            _kind: MessageKind,
        ) -> Result<i64> {
            Ok(self.resolved.load(Ordering::SeqCst))
        }

        async fn mark_message_read(&self, persisted_id: i64, _kind: MessageKind) -> Result<()> {
            self.marked_read.lock().unwrap().push(persisted_id);
            Ok(())
        }

        async fn mark_thread_read(&self, thread_id: i64) -> Result<()> {
            self.marked_threads.lock().unwrap().push(thread_id);
            Ok(())
        }

        async fn delete_message(&self, persisted_id: i64, _kind: MessageKind) -> Result<bool> {
            self.deleted.lock().unwrap().push(persisted_id);
            Ok(!self.stale.lock().unwrap().contains(&persisted_id))
        }
    }

    #[derive(Default)]
    struct CountingPresenter {
        shows: AtomicU32,
        updates: AtomicU32,
        clear_alls: AtomicU32,
    }

    #[async_trait]
    impl NotificationPresenter for CountingPresenter {
        async fn show(&self, _message: &Message, _slot: u32) -> Result<()> {
            self.shows.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn update(&self, _message: &Message, _count: usize, _slot: u32) -> Result<()> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn clear(&self, _slot: u32) -> Result<()> {
            Ok(())
        }

        async fn clear_all(&self) -> Result<()> {
            self.clear_alls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NullPopup;

    #[async_trait]
    impl PopupSurface for NullPopup {
        async fn open(&self, _messages: Vec<MessageSnapshot>) -> Result<()> {
            Ok(())
        }
    }

    struct LockedDevice;

    impl DeviceState for LockedDevice {
        fn is_locked(&self) -> bool {
            true
        }

        fn foreground_app(&self) -> Option<String> {
            None
        }

        fn is_screen_on(&self) -> bool {
            false
        }
    }

    struct NullToken;
    impl WakeToken for NullToken {}

    #[derive(Default)]
    struct NullWake {
        full: AtomicU64,
    }

    impl WakeSource for NullWake {
        fn acquire_partial(&self) -> Box<dyn WakeToken> {
            Box::new(NullToken)
        }

        fn acquire_full(&self) -> Box<dyn WakeToken> {
            self.full.fetch_add(1, Ordering::SeqCst);
            Box::new(NullToken)
        }
    }

    struct Fixture {
        session: PopupSession,
        engine: Arc<DecisionEngine>,
        store: Arc<FakeStore>,
        presenter: Arc<CountingPresenter>,
    }

    fn fixture(config: AlertConfig) -> Fixture {
        let store = Arc::new(FakeStore::default());
        let presenter = Arc::new(CountingPresenter::default());
        let device = Arc::new(LockedDevice);
        let engine = DecisionEngine::new(
            Arc::new(config),
            device.clone(),
            presenter.clone(),
            Arc::new(NullPopup),
            Arc::new(NullWake::default()),
            ReminderScheduler::new(device),
            "org.example.messages",
        );
        let session = PopupSession::new(engine.clone(), store.clone(), presenter.clone());
        Fixture {
            session,
            engine,
            store,
            presenter,
        }
    }

    fn message(n: i64) -> Message {
        let mut m = Message::from_arrival(&format!("555000{n}"), &format!("m{n}"), n, MessageKind::Sms);
        m.persisted_id = 100 + n;
        m.thread_id = 7;
        m
    }

    async fn seed(engine: &Arc<DecisionEngine>, count: i64) {
        let queue = engine.session_queue();
        let mut slot = queue.lock().await;
        let q = slot.get_or_insert_with(MessageQueue::new);
        for n in 0..count {
            q.append(message(n));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_with_remaining_messages_keeps_session_open() {
        let f = fixture(AlertConfig::default());
        seed(&f.engine, 3).await;

        let outcome = f.session.dispatch(PopupAction::Close).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Open);

        let queue = f.engine.session_queue();
        assert_eq!(queue.lock().await.as_ref().unwrap().len(), 2);
        // Membership change drove the silent recount path
        assert_eq!(f.presenter.updates.load(Ordering::SeqCst), 1);
        assert_eq!(f.presenter.shows.load(Ordering::SeqCst), 0);
        f.engine.scheduler().cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_last_message_tears_down() {
        let config = AlertConfig {
            mark_read_on_open: true,
            ..AlertConfig::default()
        };
        let f = fixture(config);
        seed(&f.engine, 1).await;

        let outcome = f.session.dispatch(PopupAction::Close).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Closed);

        assert!(f.engine.session_queue().lock().await.is_none());
        assert_eq!(f.presenter.clear_alls.load(Ordering::SeqCst), 1);
        assert_eq!(*f.store.marked_threads.lock().unwrap(), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_removes_store_row() {
        let f = fixture(AlertConfig::default());
        seed(&f.engine, 2).await;

        f.session.dispatch(PopupAction::Delete).await.unwrap();
        assert_eq!(*f.store.deleted.lock().unwrap(), vec![100]);
        f.engine.scheduler().cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_rejected_while_removal_in_flight_leaves_store_alone() {
        let f = fixture(AlertConfig::default());
        seed(&f.engine, 3).await;
        {
            let queue = f.engine.session_queue();
            let mut slot = queue.lock().await;
            assert_eq!(slot.as_mut().unwrap().begin_remove(1), RemovalStart::Started);
        }

        let result = f.session.dispatch(PopupAction::Delete).await;
        assert!(matches!(result, Err(AlertError::QueueBusy)));
        assert!(f.store.deleted.lock().unwrap().is_empty());
        let queue = f.engine.session_queue();
        assert_eq!(queue.lock().await.as_ref().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_retries_with_fresh_row_id_when_stale() {
        let f = fixture(AlertConfig::default());
        seed(&f.engine, 2).await;
        f.store.stale.lock().unwrap().push(100);
        f.store.resolved.store(205, Ordering::SeqCst);

        f.session.dispatch(PopupAction::Delete).await.unwrap();
        assert_eq!(*f.store.deleted.lock().unwrap(), vec![100, 205]);
        f.engine.scheduler().cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_marks_read_and_closes() {
        let f = fixture(AlertConfig::default());
        seed(&f.engine, 2).await;

        let outcome = f.session.dispatch(PopupAction::Reply).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Closed);
        assert_eq!(*f.store.marked_read.lock().unwrap(), vec![100]);
        assert!(f.engine.session_queue().lock().await.is_none());
        assert_eq!(f.presenter.clear_alls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbox_without_mark_read_leaves_store_untouched() {
        let config = AlertConfig {
            mark_read_on_open: false,
            ..AlertConfig::default()
        };
        let f = fixture(config);
        seed(&f.engine, 1).await;

        let outcome = f.session.dispatch(PopupAction::Inbox).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Closed);
        assert!(f.store.marked_read.lock().unwrap().is_empty());
        assert!(f.store.marked_threads.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_speak_mutates_nothing() {
        let f = fixture(AlertConfig::default());
        seed(&f.engine, 2).await;

        let outcome = f.session.dispatch(PopupAction::Speak).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Open);
        assert_eq!(f.engine.session_queue().lock().await.as_ref().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_on_closed_session_is_empty_queue() {
        let f = fixture(AlertConfig::default());
        assert!(matches!(
            f.session.dispatch(PopupAction::Close).await,
            Err(AlertError::EmptyQueue)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_preserves_chronology() {
        let f = fixture(AlertConfig::default());
        let snapshots: Vec<MessageSnapshot> =
            (0..3).map(|n| MessageSnapshot::of(&message(n))).collect();

        f.session.resume(snapshots).await.unwrap();

        let queue = f.engine.session_queue();
        let slot = queue.lock().await;
        let bodies: Vec<_> = slot
            .as_ref()
            .unwrap()
            .messages()
            .iter()
            .map(|m| m.body.clone())
            .collect();
        assert_eq!(bodies, vec!["m0", "m1", "m2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_round_trip() {
        let f = fixture(AlertConfig::default());
        seed(&f.engine, 2).await;

        let snapshots = f.session.snapshot().await;
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].clone().into_message().body, "m0");
    }

    #[test]
    fn test_action_names_round_trip() {
        for action in [
            PopupAction::Close,
            PopupAction::Delete,
            PopupAction::DeleteNoConfirm,
            PopupAction::Reply,
            PopupAction::QuickReply,
            PopupAction::ReplyByAddress,
            PopupAction::Inbox,
            PopupAction::Speak,
            PopupAction::Disabled,
        ] {
            assert_eq!(PopupAction::from_str(action.as_str()), Some(action));
        }
        assert_eq!(PopupAction::from_str("nope"), None);
    }
}
