//! SMS/MMS Alert Core
//!
//! Platform-independent core of an SMS/MMS alerting pipeline: arrival events
//! come in, get reconciled against the persistent message store, and come out
//! as either a full-screen popup session or a passive status-bar
//! notification, with bounded repeat reminders.
//!
//! Everything platform-specific (the actual store, notification service,
//! popup surface, wake locks and device state) sits behind traits; the daemon
//! crate provides the Linux implementations.

pub mod config;
pub mod decide;
pub mod event;
pub mod message;
pub mod presenter;
pub mod queue;
pub mod reconcile;
pub mod reminder;
pub mod session;
pub mod store;
pub mod wake;
pub mod worker;

mod error;

pub use config::{AlertConfig, LedConfig, PrivacyMode, ReminderConfig, VibrateConfig};
pub use decide::{decide, AlertRoute, DecisionEngine, SessionQueue};
pub use error::{AlertError, Result};
pub use event::{assemble_body, parse_sms_fragments, ArrivalEvent, SmsFragment, MMS_DATA_TYPE};
pub use message::{
    addresses_match, format_address, Message, MessageKind, MessageSnapshot,
    TIMESTAMP_TOLERANCE_MS, UNKNOWN_SENDER,
};
pub use presenter::{
    DeviceState, NotificationPresenter, PopupSurface, SLOT_ALERT, SLOT_TEST,
};
pub use queue::{MessageQueue, RemovalOutcome, RemovalStart};
pub use reconcile::{ReconciliationEngine, MESSAGE_RETRY, RETRY_PAUSE};
pub use reminder::{ReminderScheduler, ReminderState, ReminderTarget};
pub use session::{PopupAction, PopupSession, SessionOutcome};
pub use store::{ContactDirectory, ContactInfo, MessageStore, MAX_CONTACT_PHOTO_BYTES};
pub use wake::{WakeLedger, WakeSource, WakeToken};
pub use worker::{IngestHandle, IngestWorker, EVENT_QUEUE_DEPTH};
