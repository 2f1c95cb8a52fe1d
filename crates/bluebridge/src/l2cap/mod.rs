//! L2CAP (Logical Link Control and Adaptation Protocol)
//!
//! Signaling codec, per-session channel records and the negotiation logic
//! for the SDP and HID channels a session uses.

pub mod channel;
pub mod constants;
pub mod manager;
pub mod signaling;

pub use self::channel::{ChannelKind, ChannelState, L2capChannelRecord};
pub use self::manager::ChannelEvent;
pub use self::signaling::{ConfigOptions, SignalingMessage};

use crate::error::HciError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum L2capError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("No channel with local CID 0x{0:04x}")]
    UnknownChannel(u16),

    #[error("Channel {0} is not open")]
    ChannelNotOpen(ChannelKind),

    #[error("Session has no ACL link")]
    NotConnected,

    #[error("HCI error: {0}")]
    Hci(#[from] HciError),
}

pub type L2capResult<T> = std::result::Result<T, L2capError>;
