//! In-process single-flight registry for on-chain writes.
//!
//! At most one write may be in flight per key (`bounty:<id>` for
//! resolve/refund, `fees:<alias>:<token>` for withdrawals). A second caller
//! is rejected with a conflict while the first holds the permit; nothing is
//! queued, since on-chain state may have changed by the time a queued write
//! would run.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::{EngineError, EngineResult};

/// Cloneable handle to one shared in-flight key set.
#[derive(Clone, Default)]
pub struct FlightGuard {
    inflight: Arc<Mutex<HashSet<String>>>,
}

impl FlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the key, or fail with 409 if a write for it is already in
    /// flight. The permit releases the key on drop.
    pub fn acquire(&self, key: impl Into<String>) -> EngineResult<FlightPermit> {
        let key = key.into();
        let mut inflight = self.inflight.lock().expect("flight guard lock poisoned");

        if !inflight.insert(key.clone()) {
            return Err(EngineError::Conflict(format!(
                "another transaction for '{key}' is already in flight"
            )));
        }

        Ok(FlightPermit {
            inflight: Arc::clone(&self.inflight),
            key,
        })
    }

    pub fn bounty_key(bounty_id: &str) -> String {
        format!("bounty:{bounty_id}")
    }

    pub fn fees_key(alias: &str, token: &str) -> String {
        format!("fees:{alias}:{token}")
    }
}

#[derive(Debug)]
pub struct FlightPermit {
    inflight: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        let mut inflight = self.inflight.lock().expect("flight guard lock poisoned");
        inflight.remove(&self.key);
    }
}
