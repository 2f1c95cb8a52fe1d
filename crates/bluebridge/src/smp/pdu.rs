//! SMP PDU codec

use super::constants::*;
use super::{SmpError, SmpResult};
use crate::gap::BdAddr;
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

bitflags! {
    /// Authentication requirements field
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AuthReq: u8 {
        const BONDING = 0x01;
        const MITM = 0x04;
        const SC = 0x08;
        const KEYPRESS = 0x10;
        const CT2 = 0x20;
    }
}

bitflags! {
    /// Keys a side offers to distribute
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyDistribution: u8 {
        /// LTK, EDIV and Rand
        const ENC_KEY = 0x01;
        /// IRK and identity address
        const ID_KEY = 0x02;
        /// CSRK
        const SIGN_KEY = 0x04;
        const LINK_KEY = 0x08;
    }
}

/// Body shared by Pairing Request and Pairing Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingFeatures {
    pub io_capability: u8,
    pub oob: u8,
    pub auth_req: AuthReq,
    pub max_key_size: u8,
    pub initiator_keys: KeyDistribution,
    pub responder_keys: KeyDistribution,
}

impl Default for PairingFeatures {
    /// No input/output, bonding, 16-byte keys, encryption and identity keys both ways
    fn default() -> Self {
        Self {
            io_capability: SMP_IO_CAPABILITY_NO_INPUT_NO_OUTPUT,
            oob: SMP_OOB_NOT_PRESENT,
            auth_req: AuthReq::BONDING,
            max_key_size: SMP_MAX_ENCRYPTION_KEY_SIZE,
            initiator_keys: KeyDistribution::ENC_KEY | KeyDistribution::ID_KEY,
            responder_keys: KeyDistribution::ENC_KEY | KeyDistribution::ID_KEY,
        }
    }
}

impl PairingFeatures {
    fn to_bytes(self) -> [u8; 6] {
        [
            self.io_capability,
            self.oob,
            self.auth_req.bits(),
            self.max_key_size,
            self.initiator_keys.bits(),
            self.responder_keys.bits(),
        ]
    }

    fn from_bytes(b: &[u8; 6]) -> Self {
        Self {
            io_capability: b[0],
            oob: b[1],
            auth_req: AuthReq::from_bits_retain(b[2]),
            max_key_size: b[3],
            initiator_keys: KeyDistribution::from_bits_retain(b[4]),
            responder_keys: KeyDistribution::from_bits_retain(b[5]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmpPdu {
    PairingRequest(PairingFeatures),
    PairingResponse(PairingFeatures),
    PairingConfirm([u8; 16]),
    PairingRandom([u8; 16]),
    PairingFailed(u8),
    EncryptionInformation([u8; 16]),
    MasterIdentification { ediv: u16, rand: [u8; 8] },
    IdentityInformation([u8; 16]),
    IdentityAddressInformation { addr_type: u8, addr: BdAddr },
    SigningInformation([u8; 16]),
    SecurityRequest(AuthReq),
}

fn truncated(code: u8) -> SmpError {
    SmpError::InvalidPdu(format!("SMP PDU 0x{:02x} truncated", code))
}

impl SmpPdu {
    pub fn code(&self) -> u8 {
        match self {
            SmpPdu::PairingRequest(_) => SMP_PAIRING_REQUEST,
            SmpPdu::PairingResponse(_) => SMP_PAIRING_RESPONSE,
            SmpPdu::PairingConfirm(_) => SMP_PAIRING_CONFIRM,
            SmpPdu::PairingRandom(_) => SMP_PAIRING_RANDOM,
            SmpPdu::PairingFailed(_) => SMP_PAIRING_FAILED,
            SmpPdu::EncryptionInformation(_) => SMP_ENCRYPTION_INFORMATION,
            SmpPdu::MasterIdentification { .. } => SMP_MASTER_IDENTIFICATION,
            SmpPdu::IdentityInformation(_) => SMP_IDENTITY_INFORMATION,
            SmpPdu::IdentityAddressInformation { .. } => SMP_IDENTITY_ADDRESS_INFORMATION,
            SmpPdu::SigningInformation(_) => SMP_SIGNING_INFORMATION,
            SmpPdu::SecurityRequest(_) => SMP_SECURITY_REQUEST,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![self.code()];
        match self {
            SmpPdu::PairingRequest(features) | SmpPdu::PairingResponse(features) => {
                out.extend_from_slice(&features.to_bytes())
            }
            SmpPdu::PairingConfirm(value)
            | SmpPdu::PairingRandom(value)
            | SmpPdu::EncryptionInformation(value)
            | SmpPdu::IdentityInformation(value)
            | SmpPdu::SigningInformation(value) => out.extend_from_slice(value),
            SmpPdu::PairingFailed(reason) => out.push(*reason),
            SmpPdu::MasterIdentification { ediv, rand } => {
                out.extend_from_slice(&ediv.to_le_bytes());
                out.extend_from_slice(rand);
            }
            SmpPdu::IdentityAddressInformation { addr_type, addr } => {
                out.push(*addr_type);
                out.extend_from_slice(&addr.bytes);
            }
            SmpPdu::SecurityRequest(auth_req) => out.push(auth_req.bits()),
        }
        out
    }

    pub fn parse(data: &[u8]) -> SmpResult<Self> {
        let mut cursor = Cursor::new(data);
        let code = cursor
            .read_u8()
            .map_err(|_| SmpError::InvalidPdu("empty SMP PDU".into()))?;

        let mut block = [0u8; 16];
        let pdu = match code {
            SMP_PAIRING_REQUEST | SMP_PAIRING_RESPONSE => {
                let mut body = [0u8; 6];
                cursor.read_exact(&mut body).map_err(|_| truncated(code))?;
                let features = PairingFeatures::from_bytes(&body);
                if code == SMP_PAIRING_REQUEST {
                    SmpPdu::PairingRequest(features)
                } else {
                    SmpPdu::PairingResponse(features)
                }
            }
            SMP_PAIRING_CONFIRM
            | SMP_PAIRING_RANDOM
            | SMP_ENCRYPTION_INFORMATION
            | SMP_IDENTITY_INFORMATION
            | SMP_SIGNING_INFORMATION => {
                cursor.read_exact(&mut block).map_err(|_| truncated(code))?;
                match code {
                    SMP_PAIRING_CONFIRM => SmpPdu::PairingConfirm(block),
                    SMP_PAIRING_RANDOM => SmpPdu::PairingRandom(block),
                    SMP_ENCRYPTION_INFORMATION => SmpPdu::EncryptionInformation(block),
                    SMP_IDENTITY_INFORMATION => SmpPdu::IdentityInformation(block),
                    _ => SmpPdu::SigningInformation(block),
                }
            }
            SMP_PAIRING_FAILED => SmpPdu::PairingFailed(cursor.read_u8().map_err(|_| truncated(code))?),
            SMP_MASTER_IDENTIFICATION => {
                let ediv = cursor
                    .read_u16::<LittleEndian>()
                    .map_err(|_| truncated(code))?;
                let mut rand = [0u8; 8];
                cursor.read_exact(&mut rand).map_err(|_| truncated(code))?;
                SmpPdu::MasterIdentification { ediv, rand }
            }
            SMP_IDENTITY_ADDRESS_INFORMATION => {
                let addr_type = cursor.read_u8().map_err(|_| truncated(code))?;
                let mut addr = BdAddr::ZERO;
                cursor
                    .read_exact(&mut addr.bytes)
                    .map_err(|_| truncated(code))?;
                SmpPdu::IdentityAddressInformation { addr_type, addr }
            }
            SMP_SECURITY_REQUEST => {
                SmpPdu::SecurityRequest(AuthReq::from_bits_retain(
                    cursor.read_u8().map_err(|_| truncated(code))?,
                ))
            }
            other => return Err(SmpError::UnknownCommand(other)),
        };
        Ok(pdu)
    }
}
