//! L2CAP signaling commands
//!
//! Codec for the BR/EDR signaling channel (CID 1) and the subset of the LE
//! signaling channel (CID 5) a central needs.

use super::constants::*;
use super::L2capError;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Handle for identifying signaling transactions
pub type SignalId = u8;

/// Configuration options carried by CONF_REQ/CONF_RSP
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigOptions {
    pub mtu: Option<u16>,
    pub flush_timeout: Option<u16>,
    /// A non-hint option this side does not understand was present
    pub unknown: Option<u8>,
}

impl ConfigOptions {
    pub fn with_mtu(mtu: u16) -> Self {
        Self {
            mtu: Some(mtu),
            ..Self::default()
        }
    }

    fn parse(data: &[u8]) -> Self {
        let mut options = ConfigOptions::default();
        let mut offset = 0;

        while offset + 2 <= data.len() {
            let option_type = data[offset];
            let option_length = data[offset + 1] as usize;
            if offset + 2 + option_length > data.len() {
                break;
            }
            let value = &data[offset + 2..offset + 2 + option_length];

            match (option_type & !L2CAP_CONF_HINT, option_length) {
                (L2CAP_CONF_MTU, 2) => options.mtu = Some(u16::from_le_bytes([value[0], value[1]])),
                (L2CAP_CONF_FLUSH_TIMEOUT, 2) => {
                    options.flush_timeout = Some(u16::from_le_bytes([value[0], value[1]]))
                }
                _ if option_type & L2CAP_CONF_HINT == 0 && options.unknown.is_none() => {
                    options.unknown = Some(option_type)
                }
                _ => {}
            }

            offset += 2 + option_length;
        }

        options
    }

    fn serialize(&self, out: &mut Vec<u8>) {
        if let Some(mtu) = self.mtu {
            out.push(L2CAP_CONF_MTU);
            out.push(2);
            out.extend_from_slice(&mtu.to_le_bytes());
        }
        if let Some(timeout) = self.flush_timeout {
            out.push(L2CAP_CONF_FLUSH_TIMEOUT);
            out.push(2);
            out.extend_from_slice(&timeout.to_le_bytes());
        }
    }
}

/// L2CAP signaling command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    CommandReject {
        identifier: SignalId,
        reason: u16,
        data: Vec<u8>,
    },
    ConnectionRequest {
        identifier: SignalId,
        psm: u16,
        source_cid: u16,
    },
    ConnectionResponse {
        identifier: SignalId,
        destination_cid: u16,
        source_cid: u16,
        result: u16,
        status: u16,
    },
    ConfigureRequest {
        identifier: SignalId,
        destination_cid: u16,
        flags: u16,
        options: ConfigOptions,
    },
    ConfigureResponse {
        identifier: SignalId,
        source_cid: u16,
        flags: u16,
        result: u16,
        options: ConfigOptions,
    },
    DisconnectionRequest {
        identifier: SignalId,
        destination_cid: u16,
        source_cid: u16,
    },
    DisconnectionResponse {
        identifier: SignalId,
        destination_cid: u16,
        source_cid: u16,
    },
    EchoRequest {
        identifier: SignalId,
        data: Vec<u8>,
    },
    EchoResponse {
        identifier: SignalId,
        data: Vec<u8>,
    },
    InformationRequest {
        identifier: SignalId,
        info_type: u16,
    },
    InformationResponse {
        identifier: SignalId,
        info_type: u16,
        result: u16,
    },
    ConnectionParameterUpdateRequest {
        identifier: SignalId,
        interval_min: u16,
        interval_max: u16,
        latency: u16,
        timeout: u16,
    },
    ConnectionParameterUpdateResponse {
        identifier: SignalId,
        result: u16,
    },
    /// Parsed header of a command this host does not handle
    Unknown {
        code: u8,
        identifier: SignalId,
    },
}

fn too_short(what: &str) -> L2capError {
    L2capError::InvalidParameter(format!("{} parameters too short", what))
}

impl SignalingMessage {
    pub fn command_code(&self) -> u8 {
        match self {
            Self::CommandReject { .. } => L2CAP_COMMAND_REJECT,
            Self::ConnectionRequest { .. } => L2CAP_CONNECTION_REQUEST,
            Self::ConnectionResponse { .. } => L2CAP_CONNECTION_RESPONSE,
            Self::ConfigureRequest { .. } => L2CAP_CONFIGURE_REQUEST,
            Self::ConfigureResponse { .. } => L2CAP_CONFIGURE_RESPONSE,
            Self::DisconnectionRequest { .. } => L2CAP_DISCONNECTION_REQUEST,
            Self::DisconnectionResponse { .. } => L2CAP_DISCONNECTION_RESPONSE,
            Self::EchoRequest { .. } => L2CAP_ECHO_REQUEST,
            Self::EchoResponse { .. } => L2CAP_ECHO_RESPONSE,
            Self::InformationRequest { .. } => L2CAP_INFORMATION_REQUEST,
            Self::InformationResponse { .. } => L2CAP_INFORMATION_RESPONSE,
            Self::ConnectionParameterUpdateRequest { .. } => {
                L2CAP_CONNECTION_PARAMETER_UPDATE_REQUEST
            }
            Self::ConnectionParameterUpdateResponse { .. } => {
                L2CAP_CONNECTION_PARAMETER_UPDATE_RESPONSE
            }
            Self::Unknown { code, .. } => *code,
        }
    }

    pub fn identifier(&self) -> SignalId {
        match self {
            Self::CommandReject { identifier, .. }
            | Self::ConnectionRequest { identifier, .. }
            | Self::ConnectionResponse { identifier, .. }
            | Self::ConfigureRequest { identifier, .. }
            | Self::ConfigureResponse { identifier, .. }
            | Self::DisconnectionRequest { identifier, .. }
            | Self::DisconnectionResponse { identifier, .. }
            | Self::EchoRequest { identifier, .. }
            | Self::EchoResponse { identifier, .. }
            | Self::InformationRequest { identifier, .. }
            | Self::InformationResponse { identifier, .. }
            | Self::ConnectionParameterUpdateRequest { identifier, .. }
            | Self::ConnectionParameterUpdateResponse { identifier, .. }
            | Self::Unknown { identifier, .. } => *identifier,
        }
    }

    /// Splits a signaling C-frame into its commands. A malformed command
    /// ends the walk; the commands before it are still returned.
    pub fn parse_all(data: &[u8]) -> Vec<Result<Self, L2capError>> {
        let mut commands = Vec::new();
        let mut offset = 0;
        while offset + 4 <= data.len() {
            let length = u16::from_le_bytes([data[offset + 2], data[offset + 3]]) as usize;
            let end = (offset + 4 + length).min(data.len());
            let parsed = Self::parse(&data[offset..end]);
            let failed = parsed.is_err();
            commands.push(parsed);
            if failed {
                break;
            }
            offset = end;
        }
        commands
    }

    /// Parse one signaling command (4 byte command header included)
    pub fn parse(data: &[u8]) -> Result<Self, L2capError> {
        if data.len() < 4 {
            return Err(L2capError::InvalidParameter(
                "Signaling data too short".into(),
            ));
        }

        let code = data[0];
        let identifier = data[1];
        let length = u16::from_le_bytes([data[2], data[3]]) as usize;
        let params = &data[4..];
        if params.len() < length {
            return Err(L2capError::InvalidParameter(
                "Command parameters too short".into(),
            ));
        }
        let params = &params[..length];
        let mut cursor = Cursor::new(params);
        let mut u16_field = |what: &str| {
            cursor
                .read_u16::<LittleEndian>()
                .map_err(|_| too_short(what))
        };

        let message = match code {
            L2CAP_COMMAND_REJECT => Self::CommandReject {
                identifier,
                reason: u16_field("Command reject")?,
                data: params.get(2..).unwrap_or_default().to_vec(),
            },
            L2CAP_CONNECTION_REQUEST => Self::ConnectionRequest {
                identifier,
                psm: u16_field("Connection request")?,
                source_cid: u16_field("Connection request")?,
            },
            L2CAP_CONNECTION_RESPONSE => Self::ConnectionResponse {
                identifier,
                destination_cid: u16_field("Connection response")?,
                source_cid: u16_field("Connection response")?,
                result: u16_field("Connection response")?,
                status: u16_field("Connection response")?,
            },
            L2CAP_CONFIGURE_REQUEST => Self::ConfigureRequest {
                identifier,
                destination_cid: u16_field("Configure request")?,
                flags: u16_field("Configure request")?,
                options: ConfigOptions::parse(params.get(4..).unwrap_or_default()),
            },
            L2CAP_CONFIGURE_RESPONSE => Self::ConfigureResponse {
                identifier,
                source_cid: u16_field("Configure response")?,
                flags: u16_field("Configure response")?,
                result: u16_field("Configure response")?,
                options: ConfigOptions::parse(params.get(6..).unwrap_or_default()),
            },
            L2CAP_DISCONNECTION_REQUEST => Self::DisconnectionRequest {
                identifier,
                destination_cid: u16_field("Disconnection request")?,
                source_cid: u16_field("Disconnection request")?,
            },
            L2CAP_DISCONNECTION_RESPONSE => Self::DisconnectionResponse {
                identifier,
                destination_cid: u16_field("Disconnection response")?,
                source_cid: u16_field("Disconnection response")?,
            },
            L2CAP_ECHO_REQUEST => Self::EchoRequest {
                identifier,
                data: params.to_vec(),
            },
            L2CAP_ECHO_RESPONSE => Self::EchoResponse {
                identifier,
                data: params.to_vec(),
            },
            L2CAP_INFORMATION_REQUEST => Self::InformationRequest {
                identifier,
                info_type: u16_field("Information request")?,
            },
            L2CAP_INFORMATION_RESPONSE => Self::InformationResponse {
                identifier,
                info_type: u16_field("Information response")?,
                result: u16_field("Information response")?,
            },
            L2CAP_CONNECTION_PARAMETER_UPDATE_REQUEST => Self::ConnectionParameterUpdateRequest {
                identifier,
                interval_min: u16_field("Connection parameter update")?,
                interval_max: u16_field("Connection parameter update")?,
                latency: u16_field("Connection parameter update")?,
                timeout: u16_field("Connection parameter update")?,
            },
            L2CAP_CONNECTION_PARAMETER_UPDATE_RESPONSE => {
                Self::ConnectionParameterUpdateResponse {
                    identifier,
                    result: u16_field("Connection parameter update response")?,
                }
            }
            _ => Self::Unknown { code, identifier },
        };

        Ok(message)
    }

    /// Serialize the command, header included, ready to go out on a
    /// signaling channel
    pub fn serialize(&self) -> Vec<u8> {
        let mut params = Vec::with_capacity(16);
        match self {
            Self::CommandReject { reason, data, .. } => {
                params.extend_from_slice(&reason.to_le_bytes());
                params.extend_from_slice(data);
            }
            Self::ConnectionRequest {
                psm, source_cid, ..
            } => {
                params.extend_from_slice(&psm.to_le_bytes());
                params.extend_from_slice(&source_cid.to_le_bytes());
            }
            Self::ConnectionResponse {
                destination_cid,
                source_cid,
                result,
                status,
                ..
            } => {
                params.extend_from_slice(&destination_cid.to_le_bytes());
                params.extend_from_slice(&source_cid.to_le_bytes());
                params.extend_from_slice(&result.to_le_bytes());
                params.extend_from_slice(&status.to_le_bytes());
            }
            Self::ConfigureRequest {
                destination_cid,
                flags,
                options,
                ..
            } => {
                params.extend_from_slice(&destination_cid.to_le_bytes());
                params.extend_from_slice(&flags.to_le_bytes());
                options.serialize(&mut params);
            }
            Self::ConfigureResponse {
                source_cid,
                flags,
                result,
                options,
                ..
            } => {
                params.extend_from_slice(&source_cid.to_le_bytes());
                params.extend_from_slice(&flags.to_le_bytes());
                params.extend_from_slice(&result.to_le_bytes());
                options.serialize(&mut params);
            }
            Self::DisconnectionRequest {
                destination_cid,
                source_cid,
                ..
            }
            | Self::DisconnectionResponse {
                destination_cid,
                source_cid,
                ..
            } => {
                params.extend_from_slice(&destination_cid.to_le_bytes());
                params.extend_from_slice(&source_cid.to_le_bytes());
            }
            Self::EchoRequest { data, .. } | Self::EchoResponse { data, .. } => {
                params.extend_from_slice(data);
            }
            Self::InformationRequest { info_type, .. } => {
                params.extend_from_slice(&info_type.to_le_bytes());
            }
            Self::InformationResponse {
                info_type, result, ..
            } => {
                params.extend_from_slice(&info_type.to_le_bytes());
                params.extend_from_slice(&result.to_le_bytes());
            }
            Self::ConnectionParameterUpdateRequest {
                interval_min,
                interval_max,
                latency,
                timeout,
                ..
            } => {
                params.extend_from_slice(&interval_min.to_le_bytes());
                params.extend_from_slice(&interval_max.to_le_bytes());
                params.extend_from_slice(&latency.to_le_bytes());
                params.extend_from_slice(&timeout.to_le_bytes());
            }
            Self::ConnectionParameterUpdateResponse { result, .. } => {
                params.extend_from_slice(&result.to_le_bytes());
            }
            Self::Unknown { .. } => {}
        }

        let mut packet = Vec::with_capacity(4 + params.len());
        packet.push(self.command_code());
        packet.push(self.identifier());
        packet.extend_from_slice(&(params.len() as u16).to_le_bytes());
        packet.extend_from_slice(&params);
        packet
    }
}
