//! Security Manager Protocol (SMP)
//!
//! LE legacy pairing with the Just Works method, run as initiator, plus
//! re-encryption of bonded peers with their stored long-term key.

pub mod constants;
pub mod crypto;
pub mod manager;
pub mod pdu;
#[cfg(test)]
mod tests;

pub use self::manager::{
    handle_pdu, on_encryption_changed, on_oracle_result, start_pairing, start_security,
    PairingScratch, PairingState, SmpContext, SmpEvent,
};
pub use self::pdu::{AuthReq, KeyDistribution, PairingFeatures, SmpPdu};

use crate::error::HciError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmpError {
    #[error("Invalid PDU: {0}")]
    InvalidPdu(String),

    #[error("Unknown SMP command 0x{0:02x}")]
    UnknownCommand(u8),

    #[error("Unexpected SMP command 0x{0:02x}")]
    UnexpectedPdu(u8),

    #[error("Session has no link")]
    NotConnected,

    #[error("No pairing in progress")]
    NoPairing,

    #[error("HCI error: {0}")]
    Hci(#[from] HciError),
}

pub type SmpResult<T> = std::result::Result<T, SmpError>;
