//! Fixed arena of session slots

use super::session::{ConnFlags, DeviceSession, SessionId, MAX_SESSIONS};
use crate::gap::BdAddr;
use log::debug;

#[derive(Debug)]
pub struct SessionPool {
    sessions: Vec<DeviceSession>,
}

impl Default for SessionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionPool {
    pub fn new() -> Self {
        Self {
            sessions: (0..MAX_SESSIONS as u8)
                .map(|i| DeviceSession::new(SessionId(i)))
                .collect(),
        }
    }

    /// Claims the first free slot and marks it `DEVICE_FOUND`.
    pub fn allocate(&mut self) -> Option<SessionId> {
        let session = self.sessions.iter_mut().find(|s| !s.is_active())?;
        session.flags.insert(ConnFlags::DEVICE_FOUND);
        debug!("allocated session {}", session.id);
        Some(session.id)
    }

    pub fn find_by_address(&self, addr: &BdAddr) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|s| s.is_active() && s.remote.addr == *addr)
            .map(|s| s.id)
    }

    pub fn find_by_handle(&self, handle: u16) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|s| s.is_active() && s.acl_handle == Some(handle))
            .map(|s| s.id)
    }

    pub fn get(&self, id: SessionId) -> Option<&DeviceSession> {
        self.sessions.get(id.index())
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut DeviceSession> {
        self.sessions.get_mut(id.index())
    }

    pub fn reset(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.get_mut(id.index()) {
            debug!("reset session {}", id);
            session.reset();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceSession> {
        self.sessions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DeviceSession> {
        self.sessions.iter_mut()
    }

    pub fn has_free_slot(&self) -> bool {
        self.sessions.iter().any(|s| !s.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_active()).count()
    }
}
