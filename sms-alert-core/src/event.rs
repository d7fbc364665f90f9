//! Arrival events
//!
//! The raw shape handed in by the platform when a new SMS or MMS lands. SMS
//! events carry their text inline as an ordered list of fragments; MMS events
//! carry no usable inline payload and are matched against the store instead.

use crate::error::{AlertError, Result};
use crate::message::MessageKind;
use serde::{Deserialize, Serialize};

/// Content type identifying an MMS arrival
pub const MMS_DATA_TYPE: &str = "application/vnd.wap.mms-message";

/// Raw arrival event from the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrivalEvent {
    pub kind: MessageKind,

    /// Originating address as reported by the event source
    pub address: String,

    /// For SMS: JSON-encoded fragment list in arrival order. Unused for MMS.
    #[serde(default)]
    pub raw_payload: String,

    /// Timestamp embedded in the payload by the source network.
    ///
    /// Kept for diagnostics only; the pipeline stamps its own local arrival
    /// time because later store comparisons need a clock coherent with the
    /// store's write path.
    #[serde(default)]
    pub source_timestamp: i64,

    /// MIME type of the payload
    #[serde(default)]
    pub data_type: String,
}

/// One SMS payload fragment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsFragment {
    pub body: String,

    /// Message class; class 0 is a silent flash message
    #[serde(default)]
    pub class: Option<u8>,

    /// Replacement-type short message
    #[serde(default)]
    pub replace: bool,
}

impl SmsFragment {
    /// Silent/class-0 and replacement messages never reach reconciliation
    pub fn is_droppable(&self) -> bool {
        self.class == Some(0) || self.replace
    }
}

/// Decode the fragment list of an SMS arrival
///
/// Fails with [`AlertError::MalformedPayload`] when the payload is not valid
/// JSON or holds no fragments.
pub fn parse_sms_fragments(raw_payload: &str) -> Result<Vec<SmsFragment>> {
    if raw_payload.trim().is_empty() {
        return Err(AlertError::malformed("empty payload"));
    }
    let fragments: Vec<SmsFragment> = serde_json::from_str(raw_payload)
        .map_err(|e| AlertError::malformed(format!("fragment parse failed: {e}")))?;
    if fragments.is_empty() {
        return Err(AlertError::malformed("empty fragment list"));
    }
    Ok(fragments)
}

/// Concatenate fragment bodies in arrival order
pub fn assemble_body(fragments: &[SmsFragment]) -> String {
    let mut body = String::new();
    for fragment in fragments {
        body.push_str(&fragment.body);
    }
    body
}
