//! Message reconciliation engine
//!
//! An arrival event and the store row written for the same message share no
//! primary key, and the platform does not order the arrival broadcast
//! relative to the store write. The engine bridges that gap with a bounded
//! retry loop: poll the store for the newest unread candidate, compare it
//! against the event under the tolerance-based equality policy, and sleep a
//! fixed pause between attempts. The sleeps deliberately block the ingestion
//! worker's task; a burst of arrivals queues up behind the loop instead of
//! interleaving with it.
//!
//! The final attempt accepts whatever candidate is present even when the
//! equality policy fails. This is intentional graceful degradation: when the
//! store write is delayed past the retry window, showing a plausible message
//! beats silently dropping a real one. Do not tighten this into strict
//! matching.

use crate::message::{Message, MessageKind};
use crate::store::{ContactDirectory, MessageStore, MAX_CONTACT_PHOTO_BYTES};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Attempts made against the store before giving up on an exact match
pub const MESSAGE_RETRY: u32 = 8;

/// Fixed pause between attempts
pub const RETRY_PAUSE: Duration = Duration::from_millis(500);

/// Resolves raw arrival events into fully-populated message records
pub struct ReconciliationEngine {
    store: Arc<dyn MessageStore>,
    contacts: Arc<dyn ContactDirectory>,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn MessageStore>, contacts: Arc<dyn ContactDirectory>) -> Self {
        Self { store, contacts }
    }

    /// Resolve an SMS arrival against the store.
    ///
    /// Returns `None` only when the store never produced any candidate at
    /// all, not even a read one; that event is abandoned silently.
    pub async fn resolve_sms(
        &self,
        address: &str,
        body: &str,
        local_timestamp: i64,
    ) -> Option<Message> {
        let mut found_any = false;

        for attempt in 1..=MESSAGE_RETRY {
            let candidate = match self
                .store
                .most_recent_unread(None, Some(MessageKind::Sms))
                .await
            {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!(attempt, error = %e, "unread query failed");
                    None
                }
            };

            if let Some(candidate) = candidate {
                found_any = true;
                let matched = candidate.matches_arrival(address, body, local_timestamp);
                if matched || attempt == MESSAGE_RETRY {
                    if !matched {
                        info!(
                            attempt,
                            address = %candidate.address,
                            "accepting loose candidate on final attempt"
                        );
                    }
                    return Some(self.enrich(candidate, Some(local_timestamp)).await);
                }
            }

            if attempt < MESSAGE_RETRY {
                debug!(attempt, "no matching message yet, sleeping");
                sleep(RETRY_PAUSE).await;
            }
        }

        if found_any {
            // Candidates existed but the final attempt raced them away.
            return None;
        }

        // No unread candidate ever appeared; fall back to the most recent
        // already-read message rather than dropping the event outright.
        match self.store.most_recent_read().await {
            Ok(Some(candidate)) => {
                info!("no unread candidate found, showing most recent read message");
                Some(self.enrich(candidate, Some(local_timestamp)).await)
            }
            Ok(None) => {
                info!(address, "abandoning arrival, store has no candidate at all");
                None
            }
            Err(e) => {
                warn!(error = %e, "read fallback query failed, abandoning arrival");
                None
            }
        }
    }

    /// Resolve an MMS arrival.
    ///
    /// MMS events carry no payload to compare against, so the first persisted
    /// candidate wins; the loop only covers the window where the system
    /// transaction service has not written the row yet.
    pub async fn resolve_mms(&self) -> Option<Message> {
        for attempt in 1..=MESSAGE_RETRY {
            match self
                .store
                .most_recent_unread(None, Some(MessageKind::Mms))
                .await
            {
                Ok(Some(candidate)) => {
                    debug!(attempt, "mms found in store");
                    return Some(self.enrich(candidate, None).await);
                }
                Ok(None) => {}
                Err(e) => warn!(attempt, error = %e, "mms query failed"),
            }
            if attempt < MESSAGE_RETRY {
                debug!(attempt, "mms not in store yet, sleeping");
                sleep(RETRY_PAUSE).await;
            }
        }
        info!("abandoning mms arrival, store never produced the row");
        None
    }

    /// Fill in contact fields, the unread-count snapshot and the persisted id
    async fn enrich(&self, mut message: Message, local_timestamp: Option<i64>) -> Message {
        if let Some(ts) = local_timestamp {
            message.local_timestamp = ts;
        }

        if let Some(contact) = self.contacts.lookup(&message.address).await {
            message.contact_name = contact.name;
            message.contact_photo = contact.photo.filter(|photo| {
                if photo.len() > MAX_CONTACT_PHOTO_BYTES {
                    debug!(
                        bytes = photo.len(),
                        "contact photo over size cap, treating as absent"
                    );
                    false
                } else {
                    true
                }
            });
            message.contact_id = Some(contact.id);
        }

        match self.store.unread_count().await {
            Ok(count) => message.unread_count = count.max(1),
            Err(e) => warn!(error = %e, "unread count query failed, keeping snapshot"),
        }

        if message.persisted_id == 0 {
            match self
                .store
                .find_persisted_id(message.thread_id, message.provider_timestamp, message.kind)
                .await
            {
                Ok(id) => message.persisted_id = id,
                Err(e) => warn!(error = %e, "persisted id lookup failed"),
            }
        }

        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::store::ContactInfo;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Store that yields `None` for the first `appear_after` unread queries,
    /// then a fixed candidate.
    struct ScriptedStore {
        unread_queries: AtomicU32,
        read_queries: AtomicU32,
        appear_after: u32,
        candidate: Mutex<Option<Message>>,
        read_fallback: Mutex<Option<Message>>,
    }

    impl ScriptedStore {
        fn new(appear_after: u32, candidate: Option<Message>, fallback: Option<Message>) -> Self {
            Self {
                unread_queries: AtomicU32::new(0),
                read_queries: AtomicU32::new(0),
                appear_after,
                candidate: Mutex::new(candidate),
                read_fallback: Mutex::new(fallback),
            }
        }
    }

    #[async_trait]
    impl MessageStore for ScriptedStore {
        async fn most_recent_unread(
            &self,
            _exclude_thread: Option<i64>,
            _kind: Option<MessageKind>,
        ) -> Result<Option<Message>> {
            let n = self.unread_queries.fetch_add(1, Ordering::SeqCst) + 1;
            if n > self.appear_after {
                Ok(self.candidate.lock().unwrap().clone())
            } else {
                Ok(None)
            }
        }

        async fn most_recent_read(&self) -> Result<Option<Message>> {
            self.read_queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.read_fallback.lock().unwrap().clone())
        }

        async fn messages_for_thread(&self, _thread_id: i64) -> Result<Vec<Message>> {
            Ok(Vec::new())
        }

        async fn unread_count(&self) -> Result<u32> {
            Ok(3)
        }

        async fn find_persisted_id(
            &self,
            _thread_id: i64,
            _timestamp: i64,
            _kind: MessageKind,
        ) -> Result<i64> {
            Ok(41)
        }

        async fn mark_message_read(&self, _id: i64, _kind: MessageKind) -> Result<()> {
            Ok(())
        }

        async fn mark_thread_read(&self, _thread_id: i64) -> Result<()> {
            Ok(())
        }

        async fn delete_message(&self, _id: i64, _kind: MessageKind) -> Result<bool> {
            Ok(true)
        }
    }

    struct NoContacts;

    #[async_trait]
    impl ContactDirectory for NoContacts {
        async fn lookup(&self, _address: &str) -> Option<ContactInfo> {
            None
        }
    }

    fn candidate(ts: i64) -> Message {
        Message::from_store_row(0, 5, "15551234567", "hi", ts, 1, MessageKind::Sms)
    }

    fn engine(store: Arc<ScriptedStore>) -> ReconciliationEngine {
        ReconciliationEngine::new(store, Arc::new(NoContacts))
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepts_candidate_within_tolerance() {
        let t = 1_700_000_000_000;
        let store = Arc::new(ScriptedStore::new(0, Some(candidate(t + 150)), None));
        let engine = engine(store.clone());

        let resolved = engine.resolve_sms("+15551234567", "hi", t).await.unwrap();
        assert_eq!(resolved.thread_id, 5);
        assert_eq!(resolved.local_timestamp, t);
        assert_eq!(resolved.unread_count, 3);
        assert_eq!(resolved.persisted_id, 41);
        assert_eq!(store.unread_queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_candidate_appears() {
        let t = 1_700_000_000_000;
        let store = Arc::new(ScriptedStore::new(4, Some(candidate(t)), None));
        let engine = engine(store.clone());

        let resolved = engine.resolve_sms("15551234567", "hi", t).await;
        assert!(resolved.is_some());
        assert_eq!(store.unread_queries.load(Ordering::SeqCst), 5);
        // No fallback needed
        assert_eq!(store.read_queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_attempt_accepts_loose_candidate() {
        let t = 1_700_000_000_000;
        // Candidate never matches: different body
        let mut loose = candidate(t);
        loose.body = "something else".to_string();
        let store = Arc::new(ScriptedStore::new(0, Some(loose), None));
        let engine = engine(store.clone());

        let resolved = engine.resolve_sms("15551234567", "hi", t).await;
        assert!(resolved.is_some());
        assert_eq!(store.unread_queries.load(Ordering::SeqCst), MESSAGE_RETRY);
        assert_eq!(resolved.unwrap().body, "something else");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_falls_back_to_read_query() {
        let t = 1_700_000_000_000;
        let store = Arc::new(ScriptedStore::new(u32::MAX, None, Some(candidate(t - 60_000))));
        let engine = engine(store.clone());

        let resolved = engine.resolve_sms("15551234567", "hi", t).await;
        assert!(resolved.is_some());
        assert_eq!(store.unread_queries.load(Ordering::SeqCst), MESSAGE_RETRY);
        assert_eq!(store.read_queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandons_when_store_is_empty() {
        let store = Arc::new(ScriptedStore::new(u32::MAX, None, None));
        let engine = engine(store.clone());

        let resolved = engine.resolve_sms("15551234567", "hi", 0).await;
        assert!(resolved.is_none());
        assert_eq!(store.unread_queries.load(Ordering::SeqCst), MESSAGE_RETRY);
        assert_eq!(store.read_queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mms_polls_until_row_appears() {
        let store = Arc::new(ScriptedStore::new(
            2,
            Some(Message::from_store_row(9, 2, "555", "", 10, 1, MessageKind::Mms)),
            None,
        ));
        let engine = engine(store.clone());

        let resolved = engine.resolve_mms().await.unwrap();
        assert_eq!(resolved.kind, MessageKind::Mms);
        assert_eq!(store.unread_queries.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mms_gives_up_after_retry_budget() {
        let store = Arc::new(ScriptedStore::new(u32::MAX, None, None));
        let engine = engine(store.clone());

        assert!(engine.resolve_mms().await.is_none());
        assert_eq!(store.unread_queries.load(Ordering::SeqCst), MESSAGE_RETRY);
    }

    struct PhotoContacts {
        photo: Vec<u8>,
    }

    #[async_trait]
    impl ContactDirectory for PhotoContacts {
        async fn lookup(&self, _address: &str) -> Option<ContactInfo> {
            Some(ContactInfo {
                id: "c1".to_string(),
                name: Some("Ada".to_string()),
                photo: Some(self.photo.clone()),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_photo_treated_as_absent() {
        let t = 1_700_000_000_000;
        let store = Arc::new(ScriptedStore::new(0, Some(candidate(t)), None));
        let engine = ReconciliationEngine::new(
            store,
            Arc::new(PhotoContacts {
                photo: vec![0u8; MAX_CONTACT_PHOTO_BYTES + 1],
            }),
        );

        let resolved = engine.resolve_sms("15551234567", "hi", t).await.unwrap();
        assert_eq!(resolved.contact_name.as_deref(), Some("Ada"));
        assert!(resolved.contact_photo.is_none());
    }
}
