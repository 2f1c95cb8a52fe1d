//! Outbound feedback (rumble, LEDs) waiting for the feedback job
//!
//! Producers live outside the receive path, so the queue is shared behind
//! a mutex. It never blocks: a full queue drops the new report.

use super::session::SessionId;
use log::{trace, warn};
use std::collections::VecDeque;
use std::sync::Mutex;

/// One output report for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub session: SessionId,
    pub report: Vec<u8>,
}

/// Bounded try-push queue of [`Feedback`] entries
#[derive(Debug)]
pub struct FeedbackQueue {
    items: Mutex<VecDeque<Feedback>>,
    capacity: usize,
}

impl FeedbackQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Feedback>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues `report` for `session`. Returns false when it was dropped.
    pub fn try_push(&self, session: SessionId, report: &[u8]) -> bool {
        let mut items = self.lock();
        if items.len() >= self.capacity {
            warn!(
                "feedback queue full, dropping {} bytes for session {}",
                report.len(),
                session
            );
            return false;
        }
        trace!("feedback for session {}: {}", session, hex::encode(report));
        items.push_back(Feedback {
            session,
            report: report.to_vec(),
        });
        true
    }

    pub fn pop(&self) -> Option<Feedback> {
        self.lock().pop_front()
    }

    /// Drops everything queued for `session`
    pub fn discard(&self, session: SessionId) {
        self.lock().retain(|f| f.session != session);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
