//! Power-retention tokens
//!
//! An arrival event must keep the device from suspending until its unit of
//! work is fully processed. The token itself comes from a platform
//! collaborator ([`WakeSource`]) and is held RAII-style; the ledger layers a
//! counting handshake on top so several outstanding units share one token and
//! only the last completion releases it.

use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// An acquired power-retention token; dropping it releases the resource
pub trait WakeToken: Send {}

/// Source of power-retention tokens
pub trait WakeSource: Send + Sync {
    /// Keep the CPU running while held; display may stay off
    fn acquire_partial(&self) -> Box<dyn WakeToken>;

    /// Turn and keep the display on while held
    fn acquire_full(&self) -> Box<dyn WakeToken>;
}

struct LedgerState {
    outstanding: u32,
    token: Option<Box<dyn WakeToken>>,
}

/// Counting handshake over one shared partial-wake token
///
/// `begin_unit` is called before an event is enqueued and `finish_unit` when
/// the worker signals completion for that unit. The first outstanding unit
/// acquires the token, the last completion releases it; one lock guards the
/// whole acquire/track/release sequence.
pub struct WakeLedger {
    source: Arc<dyn WakeSource>,
    state: Mutex<LedgerState>,
}

impl WakeLedger {
    pub fn new(source: Arc<dyn WakeSource>) -> Self {
        Self {
            source,
            state: Mutex::new(LedgerState {
                outstanding: 0,
                token: None,
            }),
        }
    }

    /// Account for one unit of work, acquiring the shared token if this is
    /// the first outstanding unit
    pub fn begin_unit(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.outstanding == 0 {
            debug!("acquiring shared power-retention token");
            state.token = Some(self.source.acquire_partial());
        }
        state.outstanding += 1;
    }

    /// Signal completion for one unit, releasing the token when it was the
    /// last one outstanding
    pub fn finish_unit(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.outstanding == 0 {
            warn!("finish_unit without a matching begin_unit");
            return;
        }
        state.outstanding -= 1;
        if state.outstanding == 0 {
            debug!("releasing shared power-retention token");
            state.token = None;
        }
    }

    /// Units currently outstanding
    pub fn outstanding(&self) -> u32 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).outstanding
    }
}
