//! Byte-stream boundary to the radio controller

use crate::error::HciResult;

/// Outbound half of the controller link.
///
/// Frames are complete H4 packets (indicator byte included). Inbound frames
/// are pushed into the host by whoever owns the receive side.
pub trait Transport: Send + Sync {
    fn send(&self, frame: &[u8]) -> HciResult<()>;
}
