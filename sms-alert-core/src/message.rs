//! Message data model
//!
//! A [`Message`] starts life with the minimal fields carried by an arrival
//! event and is enriched by the reconciliation engine (contact fields,
//! persisted id, unread-count snapshot). The reminder scheduler and decision
//! engine mutate it in place; it is destroyed only by explicit queue removal.
//!
//! Deduplication equality deliberately tolerates a clock skew between the
//! arrival-local clock and the clock the persistent store writes with: the two
//! are independently derived and routinely differ by tens to thousands of
//! milliseconds, so exact timestamp equality would never match.

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};

/// Allowed skew between the arrival-local timestamp and the store-reported
/// timestamp when deciding that an event and a persisted row are the same
/// message.
pub const TIMESTAMP_TOLERANCE_MS: i64 = 500;

/// Display name used when neither a contact name nor an address is available
pub const UNKNOWN_SENDER: &str = "Unknown sender";

/// Kind of message item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Short message (text payload delivered in the arrival event)
    Sms,
    /// Multimedia message (content only available from the store)
    Mms,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Mms => "mms",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sms" => Some(Self::Sms),
            "mms" => Some(Self::Mms),
            _ => None,
        }
    }
}

/// One SMS/MMS item moving through the alert pipeline
#[derive(Debug, Clone)]
pub struct Message {
    /// Originating address (phone number, possibly formatted)
    pub address: String,
    /// Message body text
    pub body: String,
    /// Arrival timestamp from the local clock (ms since epoch)
    pub local_timestamp: i64,
    /// Timestamp the persistent store reported for this row (ms since epoch)
    pub provider_timestamp: i64,
    /// Conversation thread id, 0 while unresolved
    pub thread_id: i64,
    /// Contact directory id, if the address resolved to a contact
    pub contact_id: Option<String>,
    /// Resolved contact name; empty until enrichment
    pub contact_name: Option<String>,
    /// Raw contact photo bytes, if any
    pub contact_photo: Option<Vec<u8>>,
    /// SMS or MMS
    pub kind: MessageKind,
    /// Unread items in the store, as observed at resolution time
    pub unread_count: u32,
    /// Store row id, 0 while unresolved; resolved lazily at most once
    pub persisted_id: i64,
    /// How many reminder firings this message has consumed
    pub reminder_count: u32,
    /// True until the decision engine has handled this message once
    pub should_notify: bool,
}

impl Message {
    /// Create a message with the minimal fields an arrival event carries
    pub fn from_arrival(address: &str, body: &str, local_timestamp: i64, kind: MessageKind) -> Self {
        Self {
            address: address.to_string(),
            body: body.to_string(),
            local_timestamp,
            provider_timestamp: local_timestamp,
            thread_id: 0,
            contact_id: None,
            contact_name: None,
            contact_photo: None,
            kind,
            unread_count: 1,
            persisted_id: 0,
            reminder_count: 0,
            should_notify: true,
        }
    }

    /// Create a message from a persisted store row
    #[allow(clippy::too_many_arguments)]
    pub fn from_store_row(
        persisted_id: i64,
        thread_id: i64,
        address: &str,
        body: &str,
        provider_timestamp: i64,
        unread_count: u32,
        kind: MessageKind,
    ) -> Self {
        Self {
            address: address.to_string(),
            body: body.to_string(),
            local_timestamp: provider_timestamp,
            provider_timestamp,
            thread_id,
            contact_id: None,
            contact_name: None,
            contact_photo: None,
            kind,
            unread_count,
            persisted_id,
            reminder_count: 0,
            should_notify: true,
        }
    }

    /// Compare this store candidate against an arrival event.
    ///
    /// Equality is normalized-address AND body AND timestamp-within-tolerance,
    /// never exact timestamp equality: the event clock and the store's write
    /// clock are independently derived.
    pub fn matches_arrival(&self, address: &str, body: &str, local_timestamp: i64) -> bool {
        addresses_match(&self.address, address)
            && self.body == body
            && (self.provider_timestamp - local_timestamp).abs() <= TIMESTAMP_TOLERANCE_MS
    }

    /// Name to present for this message: contact name, then formatted
    /// address, then a fixed unknown-sender string.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.contact_name {
            if !name.is_empty() {
                return name.clone();
            }
        }
        if !self.address.is_empty() {
            return format_address(&self.address);
        }
        UNKNOWN_SENDER.to_string()
    }

    /// Arrival time formatted for presentation
    pub fn formatted_timestamp(&self) -> String {
        match Local.timestamp_millis_opt(self.local_timestamp).single() {
            Some(t) => t.format("%H:%M").to_string(),
            None => String::new(),
        }
    }

    /// Record one consumed reminder firing
    pub fn note_reminder(&mut self) {
        self.reminder_count += 1;
    }

    /// Mark this message as handled by the decision engine
    pub fn mark_announced(&mut self) {
        self.should_notify = false;
    }

    /// Forget the resolved store row id so the next lookup resolves it again
    pub fn invalidate_persisted_id(&mut self) {
        self.persisted_id = 0;
    }
}

/// Strip an address down to its digits
fn address_digits(address: &str) -> String {
    address.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Compare two addresses ignoring formatting and country-code prefixes.
///
/// Two addresses match when the shorter digit string is a suffix of the
/// longer one and carries at least seven digits, so `+1 555 123 4567`
/// matches `5551234567`.
pub fn addresses_match(a: &str, b: &str) -> bool {
    let da = address_digits(a);
    let db = address_digits(b);
    if da.is_empty() || db.is_empty() {
        return a == b;
    }
    if da == db {
        return true;
    }
    let (longer, shorter) = if da.len() >= db.len() { (&da, &db) } else { (&db, &da) };
    shorter.len() >= 7 && longer.ends_with(shorter.as_str())
}

/// Format a raw address for display
///
/// NANP-length digit strings get conventional grouping; anything else is
/// returned untouched.
pub fn format_address(address: &str) -> String {
    let digits = address_digits(address);
    match digits.len() {
        10 => format!("({}) {}-{}", &digits[0..3], &digits[3..6], &digits[6..]),
        11 if digits.starts_with('1') => {
            format!("+1 ({}) {}-{}", &digits[1..4], &digits[4..7], &digits[7..])
        }
        _ => address.to_string(),
    }
}

/// Flat, restart-safe snapshot of one [`Message`]
///
/// This is the wire contract for handing a message between alert-session
/// instances (e.g. resuming a popup after a restart). Every field is optional
/// on read; key order is irrelevant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_photo: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MessageKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persisted_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_notify: Option<bool>,
}

impl MessageSnapshot {
    /// Snapshot a live message
    pub fn of(message: &Message) -> Self {
        Self {
            address: Some(message.address.clone()),
            body: Some(message.body.clone()),
            local_timestamp: Some(message.local_timestamp),
            provider_timestamp: Some(message.provider_timestamp),
            thread_id: Some(message.thread_id),
            contact_id: message.contact_id.clone(),
            contact_name: message.contact_name.clone(),
            contact_photo: message.contact_photo.clone(),
            kind: Some(message.kind),
            unread_count: Some(message.unread_count),
            persisted_id: Some(message.persisted_id),
            reminder_count: Some(message.reminder_count),
            should_notify: Some(message.should_notify),
        }
    }

    /// Rehydrate a message, filling every absent key with its default
    pub fn into_message(self) -> Message {
        let local = self.local_timestamp.unwrap_or(0);
        Message {
            address: self.address.unwrap_or_default(),
            body: self.body.unwrap_or_default(),
            local_timestamp: local,
            provider_timestamp: self.provider_timestamp.unwrap_or(local),
            thread_id: self.thread_id.unwrap_or(0),
            contact_id: self.contact_id,
            contact_name: self.contact_name,
            contact_photo: self.contact_photo,
            kind: self.kind.unwrap_or(MessageKind::Sms),
            unread_count: self.unread_count.unwrap_or(1),
            persisted_id: self.persisted_id.unwrap_or(0),
            reminder_count: self.reminder_count.unwrap_or(0),
            // A resumed session has already been announced once.
            should_notify: self.should_notify.unwrap_or(false),
        }
    }
}
