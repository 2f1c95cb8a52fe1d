use crate::gap::constants::*;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressType {
    #[default]
    Public,
    Random,
    PublicIdentity,
    RandomIdentity,
}

impl From<u8> for AddressType {
    fn from(value: u8) -> Self {
        match value {
            PUBLIC_DEVICE_ADDRESS => AddressType::Public,
            RANDOM_DEVICE_ADDRESS => AddressType::Random,
            PUBLIC_IDENTITY_ADDRESS => AddressType::PublicIdentity,
            RANDOM_IDENTITY_ADDRESS => AddressType::RandomIdentity,
            _ => AddressType::Public,
        }
    }
}

impl From<AddressType> for u8 {
    fn from(value: AddressType) -> Self {
        match value {
            AddressType::Public => PUBLIC_DEVICE_ADDRESS,
            AddressType::Random => RANDOM_DEVICE_ADDRESS,
            AddressType::PublicIdentity => PUBLIC_IDENTITY_ADDRESS,
            AddressType::RandomIdentity => RANDOM_IDENTITY_ADDRESS,
        }
    }
}

/// Device address, stored in wire (little-endian) order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BdAddr {
    pub bytes: [u8; 6],
}

impl BdAddr {
    pub const ZERO: BdAddr = BdAddr { bytes: [0; 6] };

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() >= 6 {
            let mut bytes = [0u8; 6];
            bytes.copy_from_slice(&slice[0..6]);
            Some(Self { bytes })
        } else {
            None
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_zero(&self) -> bool {
        self.bytes == [0; 6]
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.bytes[5],
            self.bytes[4],
            self.bytes[3],
            self.bytes[2],
            self.bytes[1],
            self.bytes[0]
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidAddress(pub String);

impl fmt::Display for InvalidAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid device address: {}", self.0)
    }
}

impl std::error::Error for InvalidAddress {}

impl FromStr for BdAddr {
    type Err = InvalidAddress;

    /// Parses the usual `AA:BB:CC:DD:EE:FF` form, most significant byte first.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let mut bytes = [0u8; 6];
        hex::decode_to_slice(&cleaned, &mut bytes).map_err(|_| InvalidAddress(s.to_string()))?;
        bytes.reverse();
        Ok(BdAddr { bytes })
    }
}

/// Peer address as seen by a session: a classic address, or an LE address
/// together with its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RemoteAddress {
    pub addr: BdAddr,
    pub kind: AddressType,
}

impl RemoteAddress {
    pub const fn classic(addr: BdAddr) -> Self {
        Self {
            addr,
            kind: AddressType::Public,
        }
    }

    pub const fn le(addr: BdAddr, kind: AddressType) -> Self {
        Self { addr, kind }
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.addr, self.kind)
    }
}

/// Returns true when a class-of-device value names a peripheral (HID) device.
pub fn is_peripheral_class(class_of_device: u32) -> bool {
    ((class_of_device >> 8) & 0x1F) as u8 == COD_MAJOR_PERIPHERAL
}
