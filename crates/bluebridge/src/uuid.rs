use std::fmt;

/// Represents a 128-bit Bluetooth UUID.
///
/// 16-bit and 32-bit SIG values are expanded onto the Bluetooth base UUID.
/// Internally, the UUID is always stored as a 128-bit value in little-endian byte order,
/// which is also the order ATT puts it on the wire.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Uuid {
    bytes: [u8; 16],
}

/// "00000000-0000-1000-8000-00805F9B34FB" in little-endian order.
const BASE_UUID_BYTES: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Offset within the base UUID where the 16/32-bit value is inserted.
const BASE_OFFSET: usize = 12;

/// Vendor base for the configuration service, "56830f56-5180-fab0-314b-2fa176799a00".
/// The low byte selects the service or one of its characteristics.
const BRIDGE_BASE_BYTES: [u8; 16] = [
    0x00, 0x9A, 0x79, 0x76, 0xA1, 0x2F, 0x4B, 0x31, 0xB0, 0xFA, 0x80, 0x51, 0x56, 0x0F, 0x83, 0x56,
];

// SIG assigned values used by the attribute server, the HID client and SDP
pub const L2CAP_UUID16: u16 = 0x0100;
pub const GAP_SERVICE_UUID16: u16 = 0x1800;
pub const GATT_SERVICE_UUID16: u16 = 0x1801;
pub const BATTERY_SERVICE_UUID16: u16 = 0x180F;
pub const HID_SERVICE_UUID16: u16 = 0x1812;
pub const PRIMARY_SERVICE_UUID16: u16 = 0x2800;
pub const CHARACTERISTIC_UUID16: u16 = 0x2803;
pub const CCCD_UUID16: u16 = 0x2902;
pub const REPORT_REFERENCE_UUID16: u16 = 0x2908;
pub const DEVICE_NAME_UUID16: u16 = 0x2A00;
pub const APPEARANCE_UUID16: u16 = 0x2A01;
pub const SERVICE_CHANGED_UUID16: u16 = 0x2A05;
pub const BATTERY_LEVEL_UUID16: u16 = 0x2A19;
pub const REPORT_MAP_UUID16: u16 = 0x2A4B;
pub const REPORT_UUID16: u16 = 0x2A4D;

impl Uuid {
    /// Creates a new 128-bit UUID directly from 16 bytes (little-endian).
    pub const fn from_bytes_le(bytes: [u8; 16]) -> Self {
        Uuid { bytes }
    }

    /// Creates a new 128-bit UUID directly from 16 bytes (big-endian).
    pub fn from_bytes_be(mut bytes: [u8; 16]) -> Self {
        bytes.reverse();
        Uuid { bytes }
    }

    /// Creates a 128-bit UUID from a 16-bit SIG-assigned value.
    pub const fn from_u16(uuid16: u16) -> Self {
        let mut bytes = BASE_UUID_BYTES;
        bytes[BASE_OFFSET] = uuid16 as u8;
        bytes[BASE_OFFSET + 1] = (uuid16 >> 8) as u8;
        Uuid { bytes }
    }

    /// Creates a 128-bit UUID from a 32-bit SIG-assigned value.
    pub const fn from_u32(uuid32: u32) -> Self {
        let mut bytes = BASE_UUID_BYTES;
        bytes[BASE_OFFSET] = uuid32 as u8;
        bytes[BASE_OFFSET + 1] = (uuid32 >> 8) as u8;
        bytes[BASE_OFFSET + 2] = (uuid32 >> 16) as u8;
        bytes[BASE_OFFSET + 3] = (uuid32 >> 24) as u8;
        Uuid { bytes }
    }

    /// UUID of the vendor configuration service (`index == 0`) or one of its
    /// characteristics.
    pub const fn bridge(index: u8) -> Self {
        let mut bytes = BRIDGE_BASE_BYTES;
        bytes[0] = index;
        Uuid { bytes }
    }

    /// Tries to create a UUID from a little-endian byte slice of 2, 4 or 16 bytes.
    pub fn try_from_slice_le(slice: &[u8]) -> Option<Self> {
        match slice.len() {
            2 => Some(Uuid::from_u16(u16::from_le_bytes([slice[0], slice[1]]))),
            4 => Some(Uuid::from_u32(u32::from_le_bytes([
                slice[0], slice[1], slice[2], slice[3],
            ]))),
            16 => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(slice);
                Some(Uuid::from_bytes_le(bytes))
            }
            _ => None,
        }
    }

    /// Returns the underlying 16 bytes in big-endian order.
    pub fn as_bytes_be(&self) -> [u8; 16] {
        let mut bytes = self.bytes;
        bytes.reverse();
        bytes
    }

    fn is_sig_assigned(&self) -> bool {
        self.bytes[0..BASE_OFFSET] == BASE_UUID_BYTES[0..BASE_OFFSET]
    }

    /// Returns `Some(u16)` if the UUID is a SIG-assigned 16-bit UUID.
    pub fn as_u16(&self) -> Option<u16> {
        if self.is_sig_assigned()
            && self.bytes[BASE_OFFSET + 2] == 0
            && self.bytes[BASE_OFFSET + 3] == 0
        {
            Some(u16::from_le_bytes([
                self.bytes[BASE_OFFSET],
                self.bytes[BASE_OFFSET + 1],
            ]))
        } else {
            None
        }
    }

    /// Shortest ATT wire form: 2 bytes for 16-bit SIG values, 16 otherwise.
    pub fn to_att_bytes(&self) -> Vec<u8> {
        match self.as_u16() {
            Some(short) => short.to_le_bytes().to_vec(),
            None => self.bytes.to_vec(),
        }
    }

    /// Length of [`Uuid::to_att_bytes`].
    pub fn att_len(&self) -> usize {
        if self.as_u16().is_some() {
            2
        } else {
            16
        }
    }
}

impl From<u16> for Uuid {
    fn from(uuid16: u16) -> Self {
        Uuid::from_u16(uuid16)
    }
}

impl PartialEq<u16> for Uuid {
    fn eq(&self, other: &u16) -> bool {
        self.as_u16() == Some(*other)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.as_bytes_be();
        write!(
            f,
            "{}-{}-{}-{}-{}",
            hex::encode(&b[0..4]),
            hex::encode(&b[4..6]),
            hex::encode(&b[6..8]),
            hex::encode(&b[8..10]),
            hex::encode(&b[10..16])
        )
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(u16_val) = self.as_u16() {
            write!(f, "Uuid(0x{:04X})", u16_val)
        } else {
            fmt::Display::fmt(self, f)
        }
    }
}
