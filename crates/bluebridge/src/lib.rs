//! BlueBridge - a Bluetooth host engine for game controller bridges
//!
//! The library drives a controller over raw HCI frames: it brings the
//! controller up, discovers and connects classic and LE game controllers,
//! secures the links, finds their HID descriptors over SDP or GATT and
//! hands validated input reports to a bridge. LE configuration clients are
//! served from a fixed attribute table.
//!
//! Everything is owned by a single [`Host`]. The embedding program feeds it
//! controller frames and transmit credit, and runs its housekeeping and
//! feedback jobs.

pub mod att;
pub mod config;
pub mod error;
pub mod gap;
pub mod gatt;
pub mod hci;
pub mod hid;
pub mod host;
pub mod keystore;
pub mod l2cap;
pub mod sdp;
pub mod smp;
pub mod storage;
pub mod uuid;

#[cfg(test)]
mod testutil;

// Re-export common types for convenience
pub use config::{BridgeConfig, HostConfig};
pub use error::{Error, HciError, HciResult, Result};
pub use gap::{AddressType, BdAddr, RemoteAddress};
pub use hci::{HciCommand, HciEvent, HciSocket, Transport};
pub use hid::{
    Collaborators, DescriptorParser, DriverStep, HidContext, HidDriver, Platform, ReportBridge,
    ReportInfo, ReportKind, ReportMap,
};
pub use host::{FeedbackQueue, Host, SessionId};
pub use keystore::KeyStore;
pub use storage::{FileStorage, MemoryStorage, Storage};

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    #[test]
    #[ignore = "needs CAP_NET_ADMIN and a powered-down hci0"]
    fn test_open_hci_socket() {
        let socket = HciSocket::open(0).unwrap();
        assert!(socket.as_raw_fd() > 0);
    }
}
