//! SDP (Service Discovery Protocol)
//!
//! A client that pulls the HID descriptor out of a peer's records and a
//! responder that keeps peers querying us satisfied.

pub mod client;
pub mod protocol;
pub mod server;
pub mod types;

pub use client::{begin_attr_search, extract_hid_descriptor, handle_response, SdpEvent, SdpStaging};
pub use types::DataElement;

use crate::l2cap::L2capError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SdpError {
    #[error("Invalid PDU: {0}")]
    InvalidPdu(String),

    #[error("Peer returned SDP error 0x{0:04x}")]
    PeerError(u16),

    #[error("Unexpected PDU 0x{0:02x}")]
    UnexpectedPdu(u8),

    #[error("No search in progress")]
    NoQuery,

    #[error("L2CAP error: {0}")]
    L2cap(#[from] L2capError),
}

pub type SdpResult<T> = std::result::Result<T, SdpError>;
