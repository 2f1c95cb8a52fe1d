//! SDP PDU framing

use super::types::{sequence_header, uint32, uuid16};
use super::{SdpError, SdpResult};
use crate::uuid::L2CAP_UUID16;

pub const SDP_ERROR_RSP: u8 = 0x01;
pub const SDP_SERVICE_SEARCH_REQ: u8 = 0x02;
pub const SDP_SERVICE_SEARCH_RSP: u8 = 0x03;
pub const SDP_SERVICE_ATTR_REQ: u8 = 0x04;
pub const SDP_SERVICE_ATTR_RSP: u8 = 0x05;
pub const SDP_SERVICE_SEARCH_ATTR_REQ: u8 = 0x06;
pub const SDP_SERVICE_SEARCH_ATTR_RSP: u8 = 0x07;

pub const SDP_ERR_INVALID_SYNTAX: u16 = 0x0003;

/// Largest attribute byte count requested per response
pub const SDP_MAX_ATTR_BYTES: u16 = 0x0200;
/// Longest continuation state a peer may hand us
pub const SDP_MAX_CONTINUATION: usize = 16;

const PDU_HEADER_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpPacket {
    pub pdu_id: u8,
    pub transaction_id: u16,
    pub parameters: Vec<u8>,
}

impl SdpPacket {
    pub fn new(pdu_id: u8, transaction_id: u16, parameters: Vec<u8>) -> Self {
        Self {
            pdu_id,
            transaction_id,
            parameters,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(PDU_HEADER_LEN + self.parameters.len());
        buffer.push(self.pdu_id);
        buffer.extend_from_slice(&self.transaction_id.to_be_bytes());
        buffer.extend_from_slice(&(self.parameters.len() as u16).to_be_bytes());
        buffer.extend_from_slice(&self.parameters);
        buffer
    }

    pub fn parse(data: &[u8]) -> SdpResult<Self> {
        if data.len() < PDU_HEADER_LEN {
            return Err(SdpError::InvalidPdu("SDP packet too short".into()));
        }
        let transaction_id = u16::from_be_bytes([data[1], data[2]]);
        let length = u16::from_be_bytes([data[3], data[4]]) as usize;
        let parameters = data
            .get(PDU_HEADER_LEN..PDU_HEADER_LEN + length)
            .ok_or_else(|| SdpError::InvalidPdu("SDP parameters truncated".into()))?;
        Ok(Self {
            pdu_id: data[0],
            transaction_id,
            parameters: parameters.to_vec(),
        })
    }
}

fn push_continuation(params: &mut Vec<u8>, continuation: &[u8]) {
    params.push(continuation.len() as u8);
    params.extend_from_slice(continuation);
}

/// Service Search Attribute request for every record and every attribute
pub fn search_attr_request(transaction_id: u16, continuation: &[u8]) -> SdpPacket {
    let pattern = uuid16(L2CAP_UUID16);
    let range = uint32(0x0000_FFFF);

    let mut params = Vec::with_capacity(20 + continuation.len());
    params.extend(sequence_header(pattern.len()));
    params.extend_from_slice(&pattern);
    params.extend_from_slice(&SDP_MAX_ATTR_BYTES.to_be_bytes());
    params.extend(sequence_header(range.len()));
    params.extend_from_slice(&range);
    push_continuation(&mut params, continuation);
    SdpPacket::new(SDP_SERVICE_SEARCH_ATTR_REQ, transaction_id, params)
}

/// One page of an attribute response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrResponse<'a> {
    pub attribute_lists: &'a [u8],
    pub continuation: &'a [u8],
}

impl<'a> AttrResponse<'a> {
    /// Parses the parameters of a Service (Search) Attribute response
    pub fn parse(params: &'a [u8]) -> SdpResult<Self> {
        if params.len() < 2 {
            return Err(SdpError::InvalidPdu("attribute response too short".into()));
        }
        let count = u16::from_be_bytes([params[0], params[1]]) as usize;
        let lists = params
            .get(2..2 + count)
            .ok_or_else(|| SdpError::InvalidPdu("attribute byte count overruns PDU".into()))?;
        let cont_len = *params
            .get(2 + count)
            .ok_or_else(|| SdpError::InvalidPdu("continuation state missing".into()))?
            as usize;
        if cont_len > SDP_MAX_CONTINUATION {
            return Err(SdpError::InvalidPdu(format!(
                "continuation state of {} bytes",
                cont_len
            )));
        }
        let continuation = params
            .get(3 + count..3 + count + cont_len)
            .ok_or_else(|| SdpError::InvalidPdu("continuation state truncated".into()))?;
        Ok(Self {
            attribute_lists: lists,
            continuation,
        })
    }
}

/// Attribute response carrying `lists` and no continuation
pub fn attr_response(pdu_id: u8, transaction_id: u16, lists: &[u8]) -> SdpPacket {
    let mut params = Vec::with_capacity(3 + lists.len());
    params.extend_from_slice(&(lists.len() as u16).to_be_bytes());
    params.extend_from_slice(lists);
    push_continuation(&mut params, &[]);
    SdpPacket::new(pdu_id, transaction_id, params)
}

/// Service Search response listing no records
pub fn empty_search_response(transaction_id: u16) -> SdpPacket {
    SdpPacket::new(
        SDP_SERVICE_SEARCH_RSP,
        transaction_id,
        vec![0x00, 0x00, 0x00, 0x00, 0x00],
    )
}

pub fn error_response(transaction_id: u16, code: u16) -> SdpPacket {
    SdpPacket::new(SDP_ERROR_RSP, transaction_id, code.to_be_bytes().to_vec())
}
