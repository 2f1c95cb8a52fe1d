//! Bluetooth HCI (Host Controller Interface) implementation
//!
//! Command and event codecs, ACL framing and reassembly, and the Linux
//! user-channel socket used as the daemon's transport.

pub mod acl;
pub mod constants;
pub mod packet;
pub mod socket;
pub mod transport;


pub use acl::{build_acl_packets, AclHeader, Reassembler};
pub use packet::{HciCommand, HciEvent, LeAdvertisingReport};
pub use socket::HciSocket;
pub use transport::Transport;
