//! Event ingestion worker
//!
//! One sequential task owns the arrival pipeline: events are submitted to a
//! bounded channel, each submission accounts for a power-retention unit, and
//! the worker drains the channel one event at a time through reconciliation
//! and the decision engine. Sequential draining keeps store retry loops for
//! separate arrivals from interleaving.
//!
//! A failed event is logged and dropped; the worker itself never aborts. The
//! degraded outcome of any ingestion failure is "no visible notification",
//! never a crash.

use crate::decide::DecisionEngine;
use crate::error::{AlertError, Result};
use crate::event::{assemble_body, parse_sms_fragments, ArrivalEvent, MMS_DATA_TYPE};
use crate::message::MessageKind;
use crate::reconcile::ReconciliationEngine;
use crate::wake::{WakeLedger, WakeSource};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bounded depth of the arrival channel; submissions beyond it are shed
pub const EVENT_QUEUE_DEPTH: usize = 32;

/// Producer-side handle to the ingestion worker
pub struct IngestHandle {
    tx: mpsc::Sender<ArrivalEvent>,
    ledger: Arc<WakeLedger>,
    task: JoinHandle<()>,
}

impl IngestHandle {
    /// Hand one arrival event to the worker.
    ///
    /// The power-retention unit is accounted before enqueueing so the device
    /// cannot suspend between submission and processing. A full channel sheds
    /// the event and gives the unit straight back.
    pub fn submit(&self, event: ArrivalEvent) -> Result<()> {
        self.ledger.begin_unit();
        if let Err(e) = self.tx.try_send(event) {
            self.ledger.finish_unit();
            warn!(error = %e, "arrival channel full, shedding event");
            return Err(AlertError::ResourceExhausted(
                "arrival channel full".to_string(),
            ));
        }
        Ok(())
    }

    /// Arrival units submitted but not yet fully processed
    pub fn outstanding(&self) -> u32 {
        self.ledger.outstanding()
    }

    /// Close the channel and wait for the worker to drain what it accepted.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            warn!(error = %e, "ingest worker task failed during shutdown");
        }
    }
}

/// Sequential arrival-processing task
pub struct IngestWorker {
    reconciler: ReconciliationEngine,
    engine: Arc<DecisionEngine>,
    ledger: Arc<WakeLedger>,
}

impl IngestWorker {
    /// Start the worker task and return the producer handle.
    pub fn spawn(
        reconciler: ReconciliationEngine,
        engine: Arc<DecisionEngine>,
        wake: Arc<dyn WakeSource>,
    ) -> IngestHandle {
        let ledger = Arc::new(WakeLedger::new(wake));
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let worker = Self {
            reconciler,
            engine,
            ledger: Arc::clone(&ledger),
        };
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                worker.process(event).await;
                // Completion is signalled even for dropped events; the ledger
                // must always drain back to zero.
                worker.ledger.finish_unit();
            }
            debug!("arrival channel closed, ingest worker exiting");
        });
        IngestHandle { tx, ledger, task }
    }

    async fn process(&self, event: ArrivalEvent) {
        // Local clock, not the payload clock: later store comparisons need a
        // timestamp coherent with the store's write path.
        let local_timestamp = Utc::now().timestamp_millis();
        debug!(kind = event.kind.as_str(), address = %event.address, "processing arrival");

        match event.kind {
            MessageKind::Sms => self.process_sms(&event, local_timestamp).await,
            MessageKind::Mms => self.process_mms(&event).await,
        }
    }

    async fn process_sms(&self, event: &ArrivalEvent, local_timestamp: i64) {
        let fragments = match parse_sms_fragments(&event.raw_payload) {
            Ok(fragments) => fragments,
            Err(e) => {
                warn!(error = %e, "dropping undecodable sms arrival");
                return;
            }
        };
        if fragments[0].is_droppable() {
            info!(address = %event.address, "dropping class-0/replacement sms");
            return;
        }
        let body = assemble_body(&fragments);

        let Some(message) = self
            .reconciler
            .resolve_sms(&event.address, &body, local_timestamp)
            .await
        else {
            return;
        };
        if let Err(e) = self.engine.handle_resolved(message).await {
            warn!(error = %e, "decision engine failed for sms arrival");
        }
    }

    async fn process_mms(&self, event: &ArrivalEvent) {
        if event.data_type != MMS_DATA_TYPE {
            debug!(data_type = %event.data_type, "ignoring push with unexpected content type");
            return;
        }
        let Some(message) = self.reconciler.resolve_mms().await else {
            return;
        };
        if let Err(e) = self.engine.handle_resolved(message).await {
            warn!(error = %e, "decision engine failed for mms arrival");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertConfig;
    use crate::message::{Message, MessageSnapshot};
    use crate::presenter::{DeviceState, NotificationPresenter, PopupSurface};
    use crate::reminder::ReminderScheduler;
    use crate::store::{ContactDirectory, ContactInfo, MessageStore};
    use crate::wake::WakeToken;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedStore {
        unread: Mutex<Option<Message>>,
    }

    impl ScriptedStore {
        fn with_unread(message: Message) -> Arc<Self> {
            Arc::new(Self {
                unread: Mutex::new(Some(message)),
            })
        }

        fn empty() -> Arc<Self> {
            Arc::new(Self {
                unread: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl MessageStore for ScriptedStore {
        async fn most_recent_unread(
            &self,
            _exclude_thread: Option<i64>,
            kind: Option<MessageKind>,
        ) -> crate::error::Result<Option<Message>> {
            let unread = self.unread.lock().unwrap().clone();
            Ok(unread.filter(|m| kind.is_none() || kind == Some(m.kind)))
        }

        async fn most_recent_read(&self) -> crate::error::Result<Option<Message>> {
            Ok(None)
        }

        async fn messages_for_thread(
            &self,
            _thread_id: i64,
        ) -> crate::error::Result<Vec<Message>> {
            Ok(Vec::new())
        }

        async fn unread_count(&self) -> crate::error::Result<u32> {
            Ok(1)
        }

        async fn find_persisted_id(
            &self,
            _thread_id: i64,
            _timestamp: i64,
            _kind: MessageKind,
        ) -> crate::error::Result<i64> {
            Ok(0)
        }

        async fn mark_message_read(
            &self,
            _persisted_id: i64,
            _kind: MessageKind,
        ) -> crate::error::Result<()> {
            Ok(())
        }

        async fn mark_thread_read(&self, _thread_id: i64) -> crate::error::Result<()> {
            Ok(())
        }

        async fn delete_message(
            &self,
            _persisted_id: i64,
            _kind: MessageKind,
        ) -> crate::error::Result<bool> {
            Ok(false)
        }
    }

    struct NoDirectory;

    #[async_trait]
    impl ContactDirectory for NoDirectory {
        async fn lookup(&self, _address: &str) -> Option<ContactInfo> {
            None
        }
    }

    #[derive(Default)]
    struct CountingPopup {
        opens: AtomicU32,
    }

    #[async_trait]
    impl PopupSurface for CountingPopup {
        async fn open(&self, _messages: Vec<MessageSnapshot>) -> crate::error::Result<()> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct SilentPresenter;

    #[async_trait]
    impl NotificationPresenter for SilentPresenter {
        async fn show(&self, _message: &Message, _slot: u32) -> crate::error::Result<()> {
            Ok(())
        }

        async fn update(
            &self,
            _message: &Message,
            _count: usize,
            _slot: u32,
        ) -> crate::error::Result<()> {
            Ok(())
        }

        async fn clear(&self, _slot: u32) -> crate::error::Result<()> {
            Ok(())
        }

        async fn clear_all(&self) -> crate::error::Result<()> {
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

    struct CountingToken {
        released: Arc<AtomicU32>,
    }

    impl WakeToken for CountingToken {}

    impl Drop for CountingToken {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CountingWake {
        partial_acquired: AtomicU32,
        partial_released: Arc<AtomicU32>,
    }

    impl WakeSource for CountingWake {
        fn acquire_partial(&self) -> Box<dyn WakeToken> {
            self.partial_acquired.fetch_add(1, Ordering::SeqCst);
            Box::new(CountingToken {
                released: Arc::clone(&self.partial_released),
            })
        }

        fn acquire_full(&self) -> Box<dyn WakeToken> {
            Box::new(CountingToken {
                released: Arc::new(AtomicU32::new(0)),
            })
        }
    }

    struct Fixture {
        handle: IngestHandle,
        popup: Arc<CountingPopup>,
        wake: Arc<CountingWake>,
    }

    fn fixture(store: Arc<ScriptedStore>) -> Fixture {
        let popup = Arc::new(CountingPopup::default());
        let wake = Arc::new(CountingWake::default());
        let device = Arc::new(LockedDevice);
        let engine = DecisionEngine::new(
            Arc::new(AlertConfig::default()),
            device.clone(),
            Arc::new(SilentPresenter),
            popup.clone(),
            wake.clone(),
            ReminderScheduler::new(device),
            "org.example.messages",
        );
        let reconciler = ReconciliationEngine::new(store, Arc::new(NoDirectory));
        let handle = IngestWorker::spawn(reconciler, engine, wake.clone());
        Fixture {
            handle,
            popup,
            wake,
        }
    }

    fn sms_event(address: &str, body: &str) -> ArrivalEvent {
        ArrivalEvent {
            kind: MessageKind::Sms,
            address: address.to_string(),
            raw_payload: format!(r#"[{{"body":{}}}]"#, serde_json::to_string(body).unwrap()),
            source_timestamp: 0,
            data_type: String::new(),
        }
    }

    fn matching_store(address: &str, body: &str) -> Arc<ScriptedStore> {
        // Provider timestamp taken from the same clock the worker stamps
        // arrivals with, so the first reconciliation attempt matches.
        let now = Utc::now().timestamp_millis();
        ScriptedStore::with_unread(Message::from_store_row(
            11,
            3,
            address,
            body,
            now,
            1,
            MessageKind::Sms,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_sms_arrival_flows_to_popup() {
        let f = fixture(matching_store("5551234567", "hello"));

        f.handle.submit(sms_event("5551234567", "hello")).unwrap();
        f.handle.shutdown().await;

        assert_eq!(f.popup.opens.load(Ordering::SeqCst), 1);
        assert_eq!(f.wake.partial_released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_class0_sms_is_dropped() {
        let f = fixture(matching_store("5551234567", "flash"));

        let mut event = sms_event("5551234567", "flash");
        event.raw_payload = r#"[{"body":"flash","class":0}]"#.to_string();
        f.handle.submit(event).unwrap();
        f.handle.shutdown().await;

        assert_eq!(f.popup.opens.load(Ordering::SeqCst), 0);
        // The unit still drained
        assert_eq!(f.wake.partial_released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_does_not_kill_worker() {
        let f = fixture(matching_store("5551234567", "hello"));

        let mut bad = sms_event("5551234567", "x");
        bad.raw_payload = "{broken".to_string();
        f.handle.submit(bad).unwrap();
        f.handle.submit(sms_event("5551234567", "hello")).unwrap();
        f.handle.shutdown().await;

        // The good event after the bad one was still processed
        assert_eq!(f.popup.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_mms_content_type_ignored() {
        let f = fixture(ScriptedStore::empty());

        let event = ArrivalEvent {
            kind: MessageKind::Mms,
            address: "5551234567".to_string(),
            raw_payload: String::new(),
            source_timestamp: 0,
            data_type: "application/octet-stream".to_string(),
        };
        f.handle.submit(event).unwrap();
        f.handle.shutdown().await;

        assert_eq!(f.popup.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mms_arrival_resolves_from_store() {
        let now = Utc::now().timestamp_millis();
        let store = ScriptedStore::with_unread(Message::from_store_row(
            21,
            5,
            "5551234567",
            "",
            now,
            1,
            MessageKind::Mms,
        ));
        let f = fixture(store);

        let event = ArrivalEvent {
            kind: MessageKind::Mms,
            address: "5551234567".to_string(),
            raw_payload: String::new(),
            source_timestamp: 0,
            data_type: MMS_DATA_TYPE.to_string(),
        };
        f.handle.submit(event).unwrap();
        f.handle.shutdown().await;

        assert_eq!(f.popup.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_shares_one_wake_token() {
        let f = fixture(matching_store("5551234567", "hello"));

        for _ in 0..3 {
            f.handle.submit(sms_event("5551234567", "hello")).unwrap();
        }
        f.handle.shutdown().await;

        // All three units rode shared acquisitions and every acquisition
        // was released by a last completion
        assert!(f.wake.partial_acquired.load(Ordering::SeqCst) >= 1);
        assert_eq!(
            f.wake.partial_acquired.load(Ordering::SeqCst),
            f.wake.partial_released.load(Ordering::SeqCst)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_store_abandons_silently() {
        let f = fixture(ScriptedStore::empty());

        f.handle.submit(sms_event("5551234567", "hello")).unwrap();
        f.handle.shutdown().await;

        assert_eq!(f.popup.opens.load(Ordering::SeqCst), 0);
        assert_eq!(
            f.wake.partial_acquired.load(Ordering::SeqCst),
            f.wake.partial_released.load(Ordering::SeqCst)
        );
    }
}
