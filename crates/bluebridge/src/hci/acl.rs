//! ACL data packets: header codec, outbound fragmentation and inbound
//! reassembly of L2CAP frames.

use crate::error::{HciError, HciResult};
use crate::hci::constants::HCI_ACL_PKT;
use byteorder::{LittleEndian, ReadBytesExt};
use log::{trace, warn};
use std::io::Cursor;

/// Packet boundary flag: first non-flushable fragment
pub const PB_FIRST_NON_FLUSHABLE: u8 = 0b00;
/// Packet boundary flag: continuation fragment
pub const PB_CONTINUATION: u8 = 0b01;
/// Packet boundary flag: first flushable fragment
pub const PB_FIRST_FLUSHABLE: u8 = 0b10;

pub const ACL_HEADER_LEN: usize = 4;
pub const L2CAP_HEADER_LEN: usize = 4;

/// ACL data header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AclHeader {
    pub handle: u16,
    pub packet_boundary: u8,
    pub broadcast: u8,
    pub data_len: u16,
}

impl AclHeader {
    /// Parses an ACL packet without its H4 indicator, returning the header and
    /// the fragment payload.
    pub fn parse(data: &[u8]) -> HciResult<(Self, &[u8])> {
        let mut cursor = Cursor::new(data);
        let raw = cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| HciError::InvalidPacketFormat)?;
        let data_len = cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| HciError::InvalidPacketFormat)?;
        let payload = &data[ACL_HEADER_LEN..];
        if payload.len() < data_len as usize {
            return Err(HciError::InvalidParamLength(payload.len()));
        }
        Ok((
            Self {
                handle: raw & 0x0FFF,
                packet_boundary: ((raw >> 12) & 0x3) as u8,
                broadcast: ((raw >> 14) & 0x3) as u8,
                data_len,
            },
            &payload[..data_len as usize],
        ))
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        let raw = (self.handle & 0x0FFF)
            | ((self.packet_boundary as u16 & 0x3) << 12)
            | ((self.broadcast as u16 & 0x3) << 14);
        let raw = raw.to_le_bytes();
        let len = self.data_len.to_le_bytes();
        [raw[0], raw[1], len[0], len[1]]
    }

    pub fn is_start(&self) -> bool {
        self.packet_boundary != PB_CONTINUATION
    }
}

/// Wraps `payload` in an L2CAP basic header for `cid` and splits it into H4
/// ACL packets no larger than `acl_mtu` bytes of data each.
pub fn build_acl_packets(handle: u16, cid: u16, payload: &[u8], acl_mtu: usize) -> Vec<Vec<u8>> {
    let mut pdu = Vec::with_capacity(L2CAP_HEADER_LEN + payload.len());
    pdu.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    pdu.extend_from_slice(&cid.to_le_bytes());
    pdu.extend_from_slice(payload);

    let acl_mtu = acl_mtu.max(1);
    pdu.chunks(acl_mtu)
        .enumerate()
        .map(|(i, chunk)| {
            let header = AclHeader {
                handle,
                packet_boundary: if i == 0 {
                    PB_FIRST_FLUSHABLE
                } else {
                    PB_CONTINUATION
                },
                broadcast: 0,
                data_len: chunk.len() as u16,
            };
            let mut packet = Vec::with_capacity(1 + ACL_HEADER_LEN + chunk.len());
            packet.push(HCI_ACL_PKT);
            packet.extend_from_slice(&header.to_bytes());
            packet.extend_from_slice(chunk);
            packet
        })
        .collect()
}

/// Accumulates ACL fragments into complete L2CAP frames.
///
/// A single scratch buffer is shared by all connections: fragments of one
/// frame are expected back to back before the next frame starts.
#[derive(Debug, Default)]
pub struct Reassembler {
    handle: u16,
    expected: usize,
    buf: Vec<u8>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a frame is partially assembled
    pub fn in_progress(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Feeds one fragment; returns `(handle, frame)` once the frame declared by
    /// the first fragment's L2CAP length is complete. The frame includes the
    /// L2CAP basic header.
    pub fn push(&mut self, header: &AclHeader, data: &[u8]) -> Option<(u16, Vec<u8>)> {
        if header.is_start() {
            if self.in_progress() {
                warn!(
                    "ACL start on handle 0x{:03x} while 0x{:03x} incomplete ({}/{}), dropping partial frame",
                    header.handle,
                    self.handle,
                    self.buf.len(),
                    self.expected
                );
                self.buf.clear();
            }
            if data.len() < 2 {
                warn!("ACL start fragment too short for an L2CAP header");
                return None;
            }
            let expected = u16::from_le_bytes([data[0], data[1]]) as usize + L2CAP_HEADER_LEN;
            if data.len() >= expected {
                return Some((header.handle, data[..expected].to_vec()));
            }
            trace!(
                "ACL handle 0x{:03x}: buffering {}/{}",
                header.handle,
                data.len(),
                expected
            );
            self.handle = header.handle;
            self.expected = expected;
            self.buf.reserve(expected);
            self.buf.extend_from_slice(data);
            return None;
        }

        if !self.in_progress() || self.handle != header.handle {
            warn!(
                "ACL continuation on handle 0x{:03x} without a start fragment, dropped",
                header.handle
            );
            return None;
        }

        self.buf.extend_from_slice(data);
        if self.buf.len() < self.expected {
            return None;
        }
        let mut frame = std::mem::take(&mut self.buf);
        frame.truncate(self.expected);
        Some((self.handle, frame))
    }
}
