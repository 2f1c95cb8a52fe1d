//! Error types for the bluebridge library
//!
//! Each protocol layer carries its own error enum; this module holds the
//! transport-level `HciError` and the umbrella `Error` used at the dispatch
//! boundary, where every failure is downgraded to a log line.

use thiserror::Error;

/// Errors that can occur when talking to the controller
#[derive(Error, Debug)]
pub enum HciError {
    #[error("Failed to open HCI socket: {0}")]
    SocketError(#[from] std::io::Error),

    #[error("Failed to bind to HCI device: {0}")]
    BindError(std::io::Error),

    #[error("Failed to send HCI packet: {0}")]
    SendError(std::io::Error),

    #[error("Failed to receive HCI packet: {0}")]
    ReceiveError(std::io::Error),

    #[error("Invalid parameter length: {0}")]
    InvalidParamLength(usize),

    #[error("Invalid HCI packet format")]
    InvalidPacketFormat,

    #[error("Transmit queue full, dropping {0} byte frame")]
    QueueFull(usize),

    #[error("Unsupported operation")]
    Unsupported,
}

pub type HciResult<T> = std::result::Result<T, HciError>;

/// Crate-wide error, one variant per layer
#[derive(Error, Debug)]
pub enum Error {
    #[error("HCI: {0}")]
    Hci(#[from] HciError),

    #[error("L2CAP: {0}")]
    L2cap(#[from] crate::l2cap::L2capError),

    #[error("SDP: {0}")]
    Sdp(#[from] crate::sdp::SdpError),

    #[error("SMP: {0}")]
    Smp(#[from] crate::smp::SmpError),

    #[error("ATT: {0}")]
    Att(#[from] crate::att::AttError),

    #[error("GATT: {0}")]
    Gatt(#[from] crate::gatt::GattError),

    #[error("Storage: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("Config: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("No session for {0}")]
    UnknownSession(String),

    #[error("Session {0} has no open output report")]
    NoOutputPath(String),
}

pub type Result<T> = std::result::Result<T, Error>;
