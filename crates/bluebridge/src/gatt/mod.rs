//! GATT (Generic Attribute Profile) client side
//!
//! Discovers and enables a peer's HID over GATT service. The local
//! configuration service is served by [`crate::att::AttServer`].

pub mod hid_client;


pub use hid_client::{GattEvent, GattStep, HidGattClient, ReportHandle};

use crate::att::{AttError, AttErrorCode};
use crate::error::HciError;
use thiserror::Error;

/// Error types specific to GATT operations
#[derive(Debug, Error)]
pub enum GattError {
    #[error("Device not connected")]
    NotConnected,

    #[error("HID service not found")]
    ServiceNotFound,

    #[error("Characteristic 0x{0:04x} not found")]
    CharacteristicNotFound(u16),

    #[error("Peer refused {step:?} on handle 0x{handle:04x}: {code:?}")]
    Peer {
        step: GattStep,
        handle: u16,
        code: AttErrorCode,
    },

    #[error("Unexpected ATT PDU 0x{0:02x}")]
    UnexpectedResponse(u8),

    #[error("ATT error: {0}")]
    Att(#[from] AttError),

    #[error("HCI error: {0}")]
    Hci(#[from] HciError),
}

pub type GattResult<T> = std::result::Result<T, GattError>;
