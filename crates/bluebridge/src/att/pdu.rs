//! ATT PDU codec
//!
//! Requests and responses are both encoded and decoded here: the server
//! parses requests and builds responses, the HID client does the reverse.

use super::constants::*;
use super::error::{AttError, AttErrorCode, AttResult, ErrorRsp};
use crate::uuid::Uuid;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

fn short(opcode: u8) -> AttError {
    AttError::InvalidPdu(format!("ATT PDU 0x{:02x} too short", opcode))
}

fn read_u16(cursor: &mut Cursor<&[u8]>, opcode: u8) -> AttResult<u16> {
    cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| short(opcode))
}

fn rest(cursor: &mut Cursor<&[u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    let _ = cursor.read_to_end(&mut out);
    out
}

fn read_uuid(cursor: &mut Cursor<&[u8]>) -> AttResult<Uuid> {
    let raw = rest(cursor);
    Uuid::try_from_slice_le(&raw)
        .ok_or_else(|| AttError::InvalidPdu(format!("UUID of {} bytes", raw.len())))
}

/// Client to server PDUs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttRequest {
    ExchangeMtu { mtu: u16 },
    FindInformation { start: u16, end: u16 },
    FindByTypeValue { start: u16, end: u16, attr_type: u16, value: Vec<u8> },
    ReadByType { start: u16, end: u16, attr_type: Uuid },
    Read { handle: u16 },
    ReadBlob { handle: u16, offset: u16 },
    ReadByGroupType { start: u16, end: u16, group_type: Uuid },
    Write { handle: u16, value: Vec<u8> },
    WriteCommand { handle: u16, value: Vec<u8> },
    PrepareWrite { handle: u16, offset: u16, value: Vec<u8> },
    ExecuteWrite { commit: bool },
    HandleValueConfirmation,
}

impl AttRequest {
    pub fn opcode(&self) -> u8 {
        match self {
            AttRequest::ExchangeMtu { .. } => ATT_EXCHANGE_MTU_REQ,
            AttRequest::FindInformation { .. } => ATT_FIND_INFO_REQ,
            AttRequest::FindByTypeValue { .. } => ATT_FIND_BY_TYPE_VALUE_REQ,
            AttRequest::ReadByType { .. } => ATT_READ_BY_TYPE_REQ,
            AttRequest::Read { .. } => ATT_READ_REQ,
            AttRequest::ReadBlob { .. } => ATT_READ_BLOB_REQ,
            AttRequest::ReadByGroupType { .. } => ATT_READ_BY_GROUP_TYPE_REQ,
            AttRequest::Write { .. } => ATT_WRITE_REQ,
            AttRequest::WriteCommand { .. } => ATT_WRITE_CMD,
            AttRequest::PrepareWrite { .. } => ATT_PREPARE_WRITE_REQ,
            AttRequest::ExecuteWrite { .. } => ATT_EXECUTE_WRITE_REQ,
            AttRequest::HandleValueConfirmation => ATT_HANDLE_VALUE_CONF,
        }
    }

    /// Handle reported in an Error Response to this request
    pub fn handle(&self) -> u16 {
        match self {
            AttRequest::FindInformation { start, .. }
            | AttRequest::FindByTypeValue { start, .. }
            | AttRequest::ReadByType { start, .. }
            | AttRequest::ReadByGroupType { start, .. } => *start,
            AttRequest::Read { handle }
            | AttRequest::ReadBlob { handle, .. }
            | AttRequest::Write { handle, .. }
            | AttRequest::WriteCommand { handle, .. }
            | AttRequest::PrepareWrite { handle, .. } => *handle,
            _ => 0,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![self.opcode()];
        match self {
            AttRequest::ExchangeMtu { mtu } => out.extend_from_slice(&mtu.to_le_bytes()),
            AttRequest::FindInformation { start, end } => {
                out.extend_from_slice(&start.to_le_bytes());
                out.extend_from_slice(&end.to_le_bytes());
            }
            AttRequest::FindByTypeValue {
                start,
                end,
                attr_type,
                value,
            } => {
                out.extend_from_slice(&start.to_le_bytes());
                out.extend_from_slice(&end.to_le_bytes());
                out.extend_from_slice(&attr_type.to_le_bytes());
                out.extend_from_slice(value);
            }
            AttRequest::ReadByType {
                start,
                end,
                attr_type: uuid,
            }
            | AttRequest::ReadByGroupType {
                start,
                end,
                group_type: uuid,
            } => {
                out.extend_from_slice(&start.to_le_bytes());
                out.extend_from_slice(&end.to_le_bytes());
                out.extend_from_slice(&uuid.to_att_bytes());
            }
            AttRequest::Read { handle } => out.extend_from_slice(&handle.to_le_bytes()),
            AttRequest::ReadBlob { handle, offset } => {
                out.extend_from_slice(&handle.to_le_bytes());
                out.extend_from_slice(&offset.to_le_bytes());
            }
            AttRequest::Write { handle, value } | AttRequest::WriteCommand { handle, value } => {
                out.extend_from_slice(&handle.to_le_bytes());
                out.extend_from_slice(value);
            }
            AttRequest::PrepareWrite {
                handle,
                offset,
                value,
            } => {
                out.extend_from_slice(&handle.to_le_bytes());
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(value);
            }
            AttRequest::ExecuteWrite { commit } => out.push(if *commit {
                ATT_EXEC_WRITE_COMMIT
            } else {
                ATT_EXEC_WRITE_CANCEL
            }),
            AttRequest::HandleValueConfirmation => {}
        }
        out
    }

    pub fn parse(data: &[u8]) -> AttResult<Self> {
        let mut cursor = Cursor::new(data);
        let opcode = cursor
            .read_u8()
            .map_err(|_| AttError::InvalidPdu("empty ATT PDU".into()))?;
        let c = &mut cursor;
        let request = match opcode {
            ATT_EXCHANGE_MTU_REQ => AttRequest::ExchangeMtu {
                mtu: read_u16(c, opcode)?,
            },
            ATT_FIND_INFO_REQ => AttRequest::FindInformation {
                start: read_u16(c, opcode)?,
                end: read_u16(c, opcode)?,
            },
            ATT_FIND_BY_TYPE_VALUE_REQ => AttRequest::FindByTypeValue {
                start: read_u16(c, opcode)?,
                end: read_u16(c, opcode)?,
                attr_type: read_u16(c, opcode)?,
                value: rest(c),
            },
            ATT_READ_BY_TYPE_REQ => AttRequest::ReadByType {
                start: read_u16(c, opcode)?,
                end: read_u16(c, opcode)?,
                attr_type: read_uuid(c)?,
            },
            ATT_READ_REQ => AttRequest::Read {
                handle: read_u16(c, opcode)?,
            },
            ATT_READ_BLOB_REQ => AttRequest::ReadBlob {
                handle: read_u16(c, opcode)?,
                offset: read_u16(c, opcode)?,
            },
            ATT_READ_BY_GROUP_TYPE_REQ => AttRequest::ReadByGroupType {
                start: read_u16(c, opcode)?,
                end: read_u16(c, opcode)?,
                group_type: read_uuid(c)?,
            },
            ATT_WRITE_REQ => AttRequest::Write {
                handle: read_u16(c, opcode)?,
                value: rest(c),
            },
            ATT_WRITE_CMD => AttRequest::WriteCommand {
                handle: read_u16(c, opcode)?,
                value: rest(c),
            },
            ATT_PREPARE_WRITE_REQ => AttRequest::PrepareWrite {
                handle: read_u16(c, opcode)?,
                offset: read_u16(c, opcode)?,
                value: rest(c),
            },
            ATT_EXECUTE_WRITE_REQ => AttRequest::ExecuteWrite {
                commit: c.read_u8().map_err(|_| short(opcode))? == ATT_EXEC_WRITE_COMMIT,
            },
            ATT_HANDLE_VALUE_CONF => AttRequest::HandleValueConfirmation,
            other => return Err(AttError::UnsupportedOpcode(other)),
        };
        Ok(request)
    }
}

/// Server to client PDUs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttResponse {
    Error(ErrorRsp),
    ExchangeMtu { mtu: u16 },
    /// `(handle, type)` pairs; all types share one width
    FindInformation(Vec<(u16, Uuid)>),
    /// `(found, group end)` pairs
    FindByTypeValue(Vec<(u16, u16)>),
    /// `(handle, value)` pairs; all values share one length
    ReadByType(Vec<(u16, Vec<u8>)>),
    Read(Vec<u8>),
    ReadBlob(Vec<u8>),
    /// `(start, end, value)` triples; all values share one length
    ReadByGroupType(Vec<(u16, u16, Vec<u8>)>),
    Write,
    PrepareWrite { handle: u16, offset: u16, value: Vec<u8> },
    ExecuteWrite,
    Notification { handle: u16, value: Vec<u8> },
    Indication { handle: u16, value: Vec<u8> },
}

impl AttResponse {
    pub fn opcode(&self) -> u8 {
        match self {
            AttResponse::Error(_) => ATT_ERROR_RSP,
            AttResponse::ExchangeMtu { .. } => ATT_EXCHANGE_MTU_RSP,
            AttResponse::FindInformation(_) => ATT_FIND_INFO_RSP,
            AttResponse::FindByTypeValue(_) => ATT_FIND_BY_TYPE_VALUE_RSP,
            AttResponse::ReadByType(_) => ATT_READ_BY_TYPE_RSP,
            AttResponse::Read(_) => ATT_READ_RSP,
            AttResponse::ReadBlob(_) => ATT_READ_BLOB_RSP,
            AttResponse::ReadByGroupType(_) => ATT_READ_BY_GROUP_TYPE_RSP,
            AttResponse::Write => ATT_WRITE_RSP,
            AttResponse::PrepareWrite { .. } => ATT_PREPARE_WRITE_RSP,
            AttResponse::ExecuteWrite => ATT_EXECUTE_WRITE_RSP,
            AttResponse::Notification { .. } => ATT_HANDLE_VALUE_NTF,
            AttResponse::Indication { .. } => ATT_HANDLE_VALUE_IND,
        }
    }

    /// Whether `opcode` is something a server sends
    pub fn is_server_opcode(opcode: u8) -> bool {
        matches!(
            opcode,
            ATT_ERROR_RSP
                | ATT_EXCHANGE_MTU_RSP
                | ATT_FIND_INFO_RSP
                | ATT_FIND_BY_TYPE_VALUE_RSP
                | ATT_READ_BY_TYPE_RSP
                | ATT_READ_RSP
                | ATT_READ_BLOB_RSP
                | ATT_READ_BY_GROUP_TYPE_RSP
                | ATT_WRITE_RSP
                | ATT_PREPARE_WRITE_RSP
                | ATT_EXECUTE_WRITE_RSP
                | ATT_HANDLE_VALUE_NTF
                | ATT_HANDLE_VALUE_IND
        )
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![self.opcode()];
        match self {
            AttResponse::Error(e) => {
                out.push(e.request_opcode);
                out.extend_from_slice(&e.handle.to_le_bytes());
                out.push(e.code.into());
            }
            AttResponse::ExchangeMtu { mtu } => out.extend_from_slice(&mtu.to_le_bytes()),
            AttResponse::FindInformation(entries) => {
                let wide = entries.first().map(|(_, u)| u.att_len() == 16).unwrap_or(false);
                out.push(if wide {
                    ATT_FIND_INFO_RSP_FORMAT_128BIT
                } else {
                    ATT_FIND_INFO_RSP_FORMAT_16BIT
                });
                for (handle, uuid) in entries {
                    out.extend_from_slice(&handle.to_le_bytes());
                    out.extend_from_slice(&uuid.to_att_bytes());
                }
            }
            AttResponse::FindByTypeValue(ranges) => {
                for (found, end) in ranges {
                    out.extend_from_slice(&found.to_le_bytes());
                    out.extend_from_slice(&end.to_le_bytes());
                }
            }
            AttResponse::ReadByType(entries) => {
                let len = entries.first().map(|(_, v)| v.len() + 2).unwrap_or(2);
                out.push(len as u8);
                for (handle, value) in entries {
                    out.extend_from_slice(&handle.to_le_bytes());
                    out.extend_from_slice(value);
                }
            }
            AttResponse::Read(value) | AttResponse::ReadBlob(value) => {
                out.extend_from_slice(value)
            }
            AttResponse::ReadByGroupType(entries) => {
                let len = entries.first().map(|(_, _, v)| v.len() + 4).unwrap_or(4);
                out.push(len as u8);
                for (start, end, value) in entries {
                    out.extend_from_slice(&start.to_le_bytes());
                    out.extend_from_slice(&end.to_le_bytes());
                    out.extend_from_slice(value);
                }
            }
            AttResponse::Write | AttResponse::ExecuteWrite => {}
            AttResponse::PrepareWrite {
                handle,
                offset,
                value,
            } => {
                out.extend_from_slice(&handle.to_le_bytes());
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(value);
            }
            AttResponse::Notification { handle, value }
            | AttResponse::Indication { handle, value } => {
                out.extend_from_slice(&handle.to_le_bytes());
                out.extend_from_slice(value);
            }
        }
        out
    }

    pub fn parse(data: &[u8]) -> AttResult<Self> {
        let mut cursor = Cursor::new(data);
        let opcode = cursor
            .read_u8()
            .map_err(|_| AttError::InvalidPdu("empty ATT PDU".into()))?;
        let c = &mut cursor;
        let response = match opcode {
            ATT_ERROR_RSP => {
                let request_opcode = c.read_u8().map_err(|_| short(opcode))?;
                let handle = read_u16(c, opcode)?;
                let code = c.read_u8().map_err(|_| short(opcode))?;
                AttResponse::Error(ErrorRsp::new(request_opcode, handle, AttErrorCode::from(code)))
            }
            ATT_EXCHANGE_MTU_RSP => AttResponse::ExchangeMtu {
                mtu: read_u16(c, opcode)?,
            },
            ATT_FIND_INFO_RSP => {
                let format = c.read_u8().map_err(|_| short(opcode))?;
                let width = match format {
                    ATT_FIND_INFO_RSP_FORMAT_16BIT => 2,
                    ATT_FIND_INFO_RSP_FORMAT_128BIT => 16,
                    other => {
                        return Err(AttError::InvalidPdu(format!(
                            "find information format {}",
                            other
                        )))
                    }
                };
                let entries = rest(c)
                    .chunks_exact(2 + width)
                    .filter_map(|e| {
                        let handle = u16::from_le_bytes([e[0], e[1]]);
                        Uuid::try_from_slice_le(&e[2..]).map(|u| (handle, u))
                    })
                    .collect();
                AttResponse::FindInformation(entries)
            }
            ATT_FIND_BY_TYPE_VALUE_RSP => AttResponse::FindByTypeValue(
                rest(c)
                    .chunks_exact(4)
                    .map(|e| {
                        (
                            u16::from_le_bytes([e[0], e[1]]),
                            u16::from_le_bytes([e[2], e[3]]),
                        )
                    })
                    .collect(),
            ),
            ATT_READ_BY_TYPE_RSP => {
                let len = c.read_u8().map_err(|_| short(opcode))? as usize;
                if len < 2 {
                    return Err(AttError::InvalidPdu(format!("entry length {}", len)));
                }
                AttResponse::ReadByType(
                    rest(c)
                        .chunks_exact(len)
                        .map(|e| (u16::from_le_bytes([e[0], e[1]]), e[2..].to_vec()))
                        .collect(),
                )
            }
            ATT_READ_RSP => AttResponse::Read(rest(c)),
            ATT_READ_BLOB_RSP => AttResponse::ReadBlob(rest(c)),
            ATT_READ_BY_GROUP_TYPE_RSP => {
                let len = c.read_u8().map_err(|_| short(opcode))? as usize;
                if len < 4 {
                    return Err(AttError::InvalidPdu(format!("entry length {}", len)));
                }
                AttResponse::ReadByGroupType(
                    rest(c)
                        .chunks_exact(len)
                        .map(|e| {
                            (
                                u16::from_le_bytes([e[0], e[1]]),
                                u16::from_le_bytes([e[2], e[3]]),
                                e[4..].to_vec(),
                            )
                        })
                        .collect(),
                )
            }
            ATT_WRITE_RSP => AttResponse::Write,
            ATT_PREPARE_WRITE_RSP => AttResponse::PrepareWrite {
                handle: read_u16(c, opcode)?,
                offset: read_u16(c, opcode)?,
                value: rest(c),
            },
            ATT_EXECUTE_WRITE_RSP => AttResponse::ExecuteWrite,
            ATT_HANDLE_VALUE_NTF => AttResponse::Notification {
                handle: read_u16(c, opcode)?,
                value: rest(c),
            },
            ATT_HANDLE_VALUE_IND => AttResponse::Indication {
                handle: read_u16(c, opcode)?,
                value: rest(c),
            },
            other => return Err(AttError::UnsupportedOpcode(other)),
        };
        Ok(response)
    }
}
