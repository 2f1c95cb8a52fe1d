//! Correlation of controller oracle requests with the sessions that made them
//!
//! LE Rand and LE Encrypt complete in the order they were issued, so a FIFO
//! of `(session, operation)` pairs is enough to route each result. An entry
//! must be pushed before its command is queued.
//!
//! A discarded session's entries stay queued without an owner until the
//! controller answers them, so later results still line up.

use super::session::SessionId;
use crate::hci::constants::{OP_LE_ENCRYPT, OP_LE_RAND};
use std::collections::VecDeque;
use std::sync::Mutex;

/// What an outstanding oracle command computes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleOp {
    /// Low half of the local pairing random
    RandLow,
    RandHigh,
    /// `e(k, r ^ p1)`
    ConfirmStage1,
    /// `e(k, stage1 ^ p2)`, the confirm value
    ConfirmStage2,
    ShortTermKey,
}

impl OracleOp {
    /// Command whose completion carries this result
    pub fn opcode(self) -> u16 {
        match self {
            OracleOp::RandLow | OracleOp::RandHigh => OP_LE_RAND,
            _ => OP_LE_ENCRYPT,
        }
    }
}

#[derive(Debug, Default)]
pub struct OracleMailbox {
    queue: Mutex<VecDeque<(Option<SessionId>, OracleOp)>>,
}

impl OracleMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<(Option<SessionId>, OracleOp)>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, session: SessionId, op: OracleOp) {
        self.lock().push_back((Some(session), op));
    }

    /// Oldest outstanding request; the owner is `None` if it was discarded
    pub fn pop(&self) -> Option<(Option<SessionId>, OracleOp)> {
        self.lock().pop_front()
    }

    /// Disowns every outstanding request of `session`. Returns how many.
    pub fn discard(&self, session: SessionId) -> usize {
        let mut count = 0;
        for entry in self.lock().iter_mut() {
            if entry.0 == Some(session) {
                entry.0 = None;
                count += 1;
            }
        }
        count
    }

    /// Withdraws the newest entry when its command could not be queued
    pub fn retract(&self, session: SessionId, op: OracleOp) -> bool {
        let mut queue = self.lock();
        if queue.back() == Some(&(Some(session), op)) {
            queue.pop_back();
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
