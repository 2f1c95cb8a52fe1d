//! SDP data elements
//!
//! Every element starts with a descriptor byte: type in the high five bits,
//! size index in the low three. Values are big-endian.

use super::{SdpError, SdpResult};
use crate::uuid::Uuid;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

// Data element types
pub const DE_NIL: u8 = 0;
pub const DE_UINT: u8 = 1;
pub const DE_SINT: u8 = 2;
pub const DE_UUID: u8 = 3;
pub const DE_TEXT: u8 = 4;
pub const DE_BOOL: u8 = 5;
pub const DE_SEQ: u8 = 6;
pub const DE_ALT: u8 = 7;
pub const DE_URL: u8 = 8;

/// HID descriptor list attribute
pub const ATTR_HID_DESCRIPTOR_LIST: u16 = 0x0206;
/// Class descriptor type of a report descriptor
pub const HID_REPORT_DESCRIPTOR_TYPE: u8 = 0x22;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataElement {
    Nil,
    Uint(u64),
    Sint(i64),
    Uuid(Uuid),
    /// Text is kept as raw bytes: HID descriptors travel as text strings
    Text(Vec<u8>),
    Bool(bool),
    Sequence(Vec<DataElement>),
    Alternative(Vec<DataElement>),
    Url(Vec<u8>),
}

fn truncated(what: &str) -> SdpError {
    SdpError::InvalidPdu(format!("data element truncated in {}", what))
}

impl DataElement {
    /// Decodes one element from the front of `data`; returns it with the
    /// number of bytes consumed.
    pub fn parse(data: &[u8]) -> SdpResult<(Self, usize)> {
        let mut cursor = Cursor::new(data);
        let descriptor = cursor.read_u8().map_err(|_| truncated("descriptor"))?;
        let kind = descriptor >> 3;
        let size_index = descriptor & 0x07;

        let len = match size_index {
            0 if kind == DE_NIL => 0,
            0 => 1,
            1 => 2,
            2 => 4,
            3 => 8,
            4 => 16,
            5 => cursor.read_u8().map_err(|_| truncated("size"))? as usize,
            6 => cursor
                .read_u16::<BigEndian>()
                .map_err(|_| truncated("size"))? as usize,
            _ => cursor
                .read_u32::<BigEndian>()
                .map_err(|_| truncated("size"))? as usize,
        };
        let start = cursor.position() as usize;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| truncated("value"))?;
        let value = &data[start..end];

        let element = match kind {
            DE_NIL => DataElement::Nil,
            DE_UINT => DataElement::Uint(read_uint(value)?),
            DE_SINT => {
                let raw = read_uint(value)?;
                let shift = 64 - 8 * value.len().clamp(1, 8) as u32;
                DataElement::Sint(((raw << shift) as i64) >> shift)
            }
            DE_UUID => {
                let uuid = match value.len() {
                    2 => Uuid::from_u16(u16::from_be_bytes([value[0], value[1]])),
                    4 => Uuid::from_u32(u32::from_be_bytes([
                        value[0], value[1], value[2], value[3],
                    ])),
                    16 => {
                        let mut bytes = [0u8; 16];
                        bytes.copy_from_slice(value);
                        Uuid::from_bytes_be(bytes)
                    }
                    n => {
                        return Err(SdpError::InvalidPdu(format!("UUID of {} bytes", n)));
                    }
                };
                DataElement::Uuid(uuid)
            }
            DE_TEXT => DataElement::Text(value.to_vec()),
            DE_BOOL => DataElement::Bool(value.first().copied().unwrap_or(0) != 0),
            DE_SEQ => DataElement::Sequence(Self::parse_list(value)?),
            DE_ALT => DataElement::Alternative(Self::parse_list(value)?),
            DE_URL => DataElement::Url(value.to_vec()),
            other => {
                return Err(SdpError::InvalidPdu(format!(
                    "unknown data element type {}",
                    other
                )))
            }
        };
        Ok((element, end))
    }

    /// Decodes back-to-back elements filling `data`
    pub fn parse_list(mut data: &[u8]) -> SdpResult<Vec<Self>> {
        let mut elements = Vec::new();
        while !data.is_empty() {
            let (element, used) = Self::parse(data)?;
            elements.push(element);
            data = &data[used..];
        }
        Ok(elements)
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            DataElement::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[DataElement]> {
        match self {
            DataElement::Sequence(items) | DataElement::Alternative(items) => Some(items),
            _ => None,
        }
    }
}

fn read_uint(value: &[u8]) -> SdpResult<u64> {
    match value.len() {
        1..=8 => Ok(value.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)),
        // 128-bit integers are not used by any attribute read here
        16 => Ok(0),
        n => Err(SdpError::InvalidPdu(format!("integer of {} bytes", n))),
    }
}

/// Sequence header for `len` bytes of content
pub fn sequence_header(len: usize) -> Vec<u8> {
    if len <= u8::MAX as usize {
        vec![(DE_SEQ << 3) | 5, len as u8]
    } else {
        let mut out = vec![(DE_SEQ << 3) | 6];
        out.extend_from_slice(&(len as u16).to_be_bytes());
        out
    }
}

/// `UUID16` element
pub fn uuid16(value: u16) -> [u8; 3] {
    let be = value.to_be_bytes();
    [(DE_UUID << 3) | 1, be[0], be[1]]
}

/// `uint32` element
pub fn uint32(value: u32) -> [u8; 5] {
    let be = value.to_be_bytes();
    [(DE_UINT << 3) | 2, be[0], be[1], be[2], be[3]]
}
