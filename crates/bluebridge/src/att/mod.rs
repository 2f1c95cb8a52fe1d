//! Attribute Protocol (ATT)
//!
//! PDU codec shared by the local configuration server and the GATT HID
//! client, plus the server itself and its fixed attribute table.

pub mod constants;
pub mod error;
pub mod pdu;
pub mod server;
pub mod table;

#[cfg(test)]
mod tests;

pub use self::constants::*;
pub use self::error::{AttError, AttErrorCode, AttResult, ErrorRsp};
pub use self::pdu::{AttRequest, AttResponse};
pub use self::server::{AttContext, AttServer, AttSession};
pub use self::table::{AttributeTable, Resource};
