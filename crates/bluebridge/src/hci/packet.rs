//! HCI packet structures and parsing
//!
//! Commands are built from a typed enum; events are split into a generic
//! `HciEvent` envelope plus one small struct per event the host reacts to.

use crate::error::{HciError, HciResult};
use crate::gap::{AddressType, BdAddr};
use crate::hci::constants::*;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

/// HCI commands issued by the host
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HciCommand {
    // Link Control Commands (OGF: 0x01)
    Inquiry {
        lap: [u8; 3],
        length: u8,
        num_responses: u8,
    },
    InquiryCancel,
    CreateConnection {
        bd_addr: BdAddr,
        packet_type: u16,
        page_scan_repetition_mode: u8,
        clock_offset: u16,
        allow_role_switch: bool,
    },
    Disconnect {
        handle: u16,
        reason: u8,
    },
    AcceptConnectionRequest {
        bd_addr: BdAddr,
        role: u8,
    },
    RejectConnectionRequest {
        bd_addr: BdAddr,
        reason: u8,
    },
    LinkKeyRequestReply {
        bd_addr: BdAddr,
        link_key: [u8; 16],
    },
    LinkKeyRequestNegativeReply {
        bd_addr: BdAddr,
    },
    PinCodeRequestReply {
        bd_addr: BdAddr,
        pin: Vec<u8>,
    },
    AuthenticationRequested {
        handle: u16,
    },
    SetConnectionEncryption {
        handle: u16,
        enable: bool,
    },
    IoCapabilityRequestReply {
        bd_addr: BdAddr,
        io_capability: u8,
        oob_data_present: u8,
        authentication_requirements: u8,
    },
    UserConfirmationRequestReply {
        bd_addr: BdAddr,
    },

    // Link Policy Commands (OGF: 0x02)
    WriteDefaultLinkPolicySettings {
        settings: u16,
    },

    // Host Controller Commands (OGF: 0x03)
    Reset,
    SetEventMask {
        event_mask: u64,
    },
    WriteLocalName {
        name: String,
    },
    WriteScanEnable {
        scan_enable: u8,
    },
    WritePageScanActivity {
        interval: u16,
        window: u16,
    },
    WriteClassOfDevice {
        class_of_device: u32,
    },
    WriteInquiryMode {
        mode: u8,
    },
    WriteSimplePairingMode {
        enable: bool,
    },
    WriteLeHostSupported {
        le_supported: bool,
        simultaneous: bool,
    },

    // Informational Parameters (OGF: 0x04)
    ReadLocalVersion,
    ReadBufferSize,
    ReadBdAddr,

    // LE Commands (OGF: 0x08)
    LeSetEventMask {
        event_mask: u64,
    },
    LeReadBufferSize,
    LeSetAdvertisingParameters {
        interval_min: u16,
        interval_max: u16,
        advertising_type: u8,
        own_address_type: u8,
        channel_map: u8,
        filter_policy: u8,
    },
    LeSetAdvertisingData {
        data: Vec<u8>,
    },
    LeSetAdvertisingEnable {
        enable: bool,
    },
    LeSetScanParameters {
        scan_type: u8,
        scan_interval: u16,
        scan_window: u16,
        own_address_type: u8,
        filter_policy: u8,
    },
    LeSetScanEnable {
        enable: bool,
        filter_duplicates: bool,
    },
    LeCreateConnection {
        scan_interval: u16,
        scan_window: u16,
        filter_policy: u8,
        peer_addr_type: AddressType,
        peer_addr: BdAddr,
        conn_interval_min: u16,
        conn_interval_max: u16,
        conn_latency: u16,
        supervision_timeout: u16,
    },
    LeCreateConnectionCancel,
    LeClearAcceptList,
    LeAddDeviceToAcceptList {
        addr_type: AddressType,
        addr: BdAddr,
    },
    LeConnectionUpdate {
        handle: u16,
        interval_min: u16,
        interval_max: u16,
        latency: u16,
        supervision_timeout: u16,
    },
    LeEncrypt {
        key: [u8; 16],
        plaintext: [u8; 16],
    },
    LeRand,
    LeEnableEncryption {
        handle: u16,
        rand: [u8; 8],
        ediv: u16,
        ltk: [u8; 16],
    },
    LeLongTermKeyRequestNegativeReply {
        handle: u16,
    },

    // Anything else
    Raw {
        ogf: u8,
        ocf: u16,
        parameters: Vec<u8>,
    },
}

impl HciCommand {
    /// Creates a raw command with custom parameters
    pub fn new(ogf: u8, ocf: u16, parameters: Vec<u8>) -> Self {
        Self::Raw {
            ogf,
            ocf,
            parameters,
        }
    }

    /// Get the OGF and OCF for this command
    pub fn opcode_parts(&self) -> (u8, u16) {
        match self {
            Self::Inquiry { .. } => (OGF_LINK_CTL, OCF_INQUIRY),
            Self::InquiryCancel => (OGF_LINK_CTL, OCF_INQUIRY_CANCEL),
            Self::CreateConnection { .. } => (OGF_LINK_CTL, OCF_CREATE_CONNECTION),
            Self::Disconnect { .. } => (OGF_LINK_CTL, OCF_DISCONNECT),
            Self::AcceptConnectionRequest { .. } => (OGF_LINK_CTL, OCF_ACCEPT_CONNECTION_REQUEST),
            Self::RejectConnectionRequest { .. } => (OGF_LINK_CTL, OCF_REJECT_CONNECTION_REQUEST),
            Self::LinkKeyRequestReply { .. } => (OGF_LINK_CTL, OCF_LINK_KEY_REQUEST_REPLY),
            Self::LinkKeyRequestNegativeReply { .. } => {
                (OGF_LINK_CTL, OCF_LINK_KEY_REQUEST_NEGATIVE_REPLY)
            }
            Self::PinCodeRequestReply { .. } => (OGF_LINK_CTL, OCF_PIN_CODE_REQUEST_REPLY),
            Self::AuthenticationRequested { .. } => (OGF_LINK_CTL, OCF_AUTHENTICATION_REQUESTED),
            Self::SetConnectionEncryption { .. } => (OGF_LINK_CTL, OCF_SET_CONNECTION_ENCRYPTION),
            Self::IoCapabilityRequestReply { .. } => {
                (OGF_LINK_CTL, OCF_IO_CAPABILITY_REQUEST_REPLY)
            }
            Self::UserConfirmationRequestReply { .. } => {
                (OGF_LINK_CTL, OCF_USER_CONFIRMATION_REQUEST_REPLY)
            }

            Self::WriteDefaultLinkPolicySettings { .. } => {
                (OGF_LINK_POLICY, OCF_WRITE_DEFAULT_LINK_POLICY_SETTINGS)
            }

            Self::Reset => (OGF_HOST_CTL, OCF_RESET),
            Self::SetEventMask { .. } => (OGF_HOST_CTL, OCF_SET_EVENT_MASK),
            Self::WriteLocalName { .. } => (OGF_HOST_CTL, OCF_WRITE_LOCAL_NAME),
            Self::WriteScanEnable { .. } => (OGF_HOST_CTL, OCF_WRITE_SCAN_ENABLE),
            Self::WritePageScanActivity { .. } => (OGF_HOST_CTL, OCF_WRITE_PAGE_SCAN_ACTIVITY),
            Self::WriteClassOfDevice { .. } => (OGF_HOST_CTL, OCF_WRITE_CLASS_OF_DEVICE),
            Self::WriteInquiryMode { .. } => (OGF_HOST_CTL, OCF_WRITE_INQUIRY_MODE),
            Self::WriteSimplePairingMode { .. } => (OGF_HOST_CTL, OCF_WRITE_SIMPLE_PAIRING_MODE),
            Self::WriteLeHostSupported { .. } => (OGF_HOST_CTL, OCF_WRITE_LE_HOST_SUPPORTED),

            Self::ReadLocalVersion => (OGF_INFO_PARAM, OCF_READ_LOCAL_VERSION),
            Self::ReadBufferSize => (OGF_INFO_PARAM, OCF_READ_BUFFER_SIZE),
            Self::ReadBdAddr => (OGF_INFO_PARAM, OCF_READ_BD_ADDR),

            Self::LeSetEventMask { .. } => (OGF_LE, OCF_LE_SET_EVENT_MASK),
            Self::LeReadBufferSize => (OGF_LE, OCF_LE_READ_BUFFER_SIZE),
            Self::LeSetAdvertisingParameters { .. } => (OGF_LE, OCF_LE_SET_ADVERTISING_PARAMETERS),
            Self::LeSetAdvertisingData { .. } => (OGF_LE, OCF_LE_SET_ADVERTISING_DATA),
            Self::LeSetAdvertisingEnable { .. } => (OGF_LE, OCF_LE_SET_ADVERTISING_ENABLE),
            Self::LeSetScanParameters { .. } => (OGF_LE, OCF_LE_SET_SCAN_PARAMETERS),
            Self::LeSetScanEnable { .. } => (OGF_LE, OCF_LE_SET_SCAN_ENABLE),
            Self::LeCreateConnection { .. } => (OGF_LE, OCF_LE_CREATE_CONNECTION),
            Self::LeCreateConnectionCancel => (OGF_LE, OCF_LE_CREATE_CONNECTION_CANCEL),
            Self::LeClearAcceptList => (OGF_LE, OCF_LE_CLEAR_ACCEPT_LIST),
            Self::LeAddDeviceToAcceptList { .. } => (OGF_LE, OCF_LE_ADD_DEVICE_TO_ACCEPT_LIST),
            Self::LeConnectionUpdate { .. } => (OGF_LE, OCF_LE_CONNECTION_UPDATE),
            Self::LeEncrypt { .. } => (OGF_LE, OCF_LE_ENCRYPT),
            Self::LeRand => (OGF_LE, OCF_LE_RAND),
            Self::LeEnableEncryption { .. } => (OGF_LE, OCF_LE_ENABLE_ENCRYPTION),
            Self::LeLongTermKeyRequestNegativeReply { .. } => {
                (OGF_LE, OCF_LE_LTK_REQUEST_NEGATIVE_REPLY)
            }

            Self::Raw { ogf, ocf, .. } => (*ogf, *ocf),
        }
    }

    /// Full 16-bit opcode
    pub fn opcode(&self) -> u16 {
        let (ogf, ocf) = self.opcode_parts();
        opcode(ogf, ocf)
    }

    /// Convert the command to its raw parameter bytes
    pub fn parameters(&self) -> Vec<u8> {
        match self {
            Self::InquiryCancel
            | Self::Reset
            | Self::ReadLocalVersion
            | Self::ReadBufferSize
            | Self::ReadBdAddr
            | Self::LeReadBufferSize
            | Self::LeCreateConnectionCancel
            | Self::LeClearAcceptList
            | Self::LeRand => vec![],

            Self::Inquiry {
                lap,
                length,
                num_responses,
            } => {
                let mut params = Vec::with_capacity(5);
                params.extend_from_slice(lap);
                params.push(*length);
                params.push(*num_responses);
                params
            }

            Self::CreateConnection {
                bd_addr,
                packet_type,
                page_scan_repetition_mode,
                clock_offset,
                allow_role_switch,
            } => {
                let mut params = Vec::with_capacity(13);
                params.extend_from_slice(&bd_addr.bytes);
                params.extend_from_slice(&packet_type.to_le_bytes());
                params.push(*page_scan_repetition_mode);
                params.push(0x00); // reserved
                params.extend_from_slice(&clock_offset.to_le_bytes());
                params.push(*allow_role_switch as u8);
                params
            }

            Self::Disconnect { handle, reason } => {
                let mut params = Vec::with_capacity(3);
                params.extend_from_slice(&handle.to_le_bytes());
                params.push(*reason);
                params
            }

            Self::AcceptConnectionRequest { bd_addr, role } => {
                let mut params = bd_addr.bytes.to_vec();
                params.push(*role);
                params
            }

            Self::RejectConnectionRequest { bd_addr, reason } => {
                let mut params = bd_addr.bytes.to_vec();
                params.push(*reason);
                params
            }

            Self::LinkKeyRequestReply { bd_addr, link_key } => {
                let mut params = Vec::with_capacity(22);
                params.extend_from_slice(&bd_addr.bytes);
                params.extend_from_slice(link_key);
                params
            }

            Self::LinkKeyRequestNegativeReply { bd_addr }
            | Self::UserConfirmationRequestReply { bd_addr } => bd_addr.bytes.to_vec(),

            Self::PinCodeRequestReply { bd_addr, pin } => {
                let mut params = Vec::with_capacity(23);
                params.extend_from_slice(&bd_addr.bytes);
                let len = pin.len().min(16);
                params.push(len as u8);
                params.extend_from_slice(&pin[..len]);
                params.resize(23, 0);
                params
            }

            Self::AuthenticationRequested { handle }
            | Self::LeLongTermKeyRequestNegativeReply { handle } => handle.to_le_bytes().to_vec(),

            Self::SetConnectionEncryption { handle, enable } => {
                let mut params = handle.to_le_bytes().to_vec();
                params.push(*enable as u8);
                params
            }

            Self::IoCapabilityRequestReply {
                bd_addr,
                io_capability,
                oob_data_present,
                authentication_requirements,
            } => {
                let mut params = bd_addr.bytes.to_vec();
                params.push(*io_capability);
                params.push(*oob_data_present);
                params.push(*authentication_requirements);
                params
            }

            Self::WriteDefaultLinkPolicySettings { settings } => settings.to_le_bytes().to_vec(),

            Self::SetEventMask { event_mask } | Self::LeSetEventMask { event_mask } => {
                event_mask.to_le_bytes().to_vec()
            }

            Self::WriteLocalName { name } => {
                let mut params = name.as_bytes().to_vec();
                params.truncate(247);
                params.resize(248, 0);
                params
            }

            Self::WriteScanEnable { scan_enable } => vec![*scan_enable],

            Self::WritePageScanActivity { interval, window } => {
                let mut params = interval.to_le_bytes().to_vec();
                params.extend_from_slice(&window.to_le_bytes());
                params
            }

            Self::WriteClassOfDevice { class_of_device } => {
                class_of_device.to_le_bytes()[..3].to_vec()
            }

            Self::WriteInquiryMode { mode } => vec![*mode],

            Self::WriteSimplePairingMode { enable } => vec![*enable as u8],

            Self::WriteLeHostSupported {
                le_supported,
                simultaneous,
            } => vec![*le_supported as u8, *simultaneous as u8],

            Self::LeSetAdvertisingParameters {
                interval_min,
                interval_max,
                advertising_type,
                own_address_type,
                channel_map,
                filter_policy,
            } => {
                let mut params = Vec::with_capacity(15);
                params.extend_from_slice(&interval_min.to_le_bytes());
                params.extend_from_slice(&interval_max.to_le_bytes());
                params.push(*advertising_type);
                params.push(*own_address_type);
                params.push(0x00); // direct address type
                params.extend_from_slice(&[0u8; 6]); // direct address
                params.push(*channel_map);
                params.push(*filter_policy);
                params
            }

            Self::LeSetAdvertisingData { data } => {
                let len = data.len().min(31);
                let mut params = Vec::with_capacity(32);
                params.push(len as u8);
                params.extend_from_slice(&data[..len]);
                params.resize(32, 0);
                params
            }

            Self::LeSetAdvertisingEnable { enable } => vec![*enable as u8],

            Self::LeSetScanParameters {
                scan_type,
                scan_interval,
                scan_window,
                own_address_type,
                filter_policy,
            } => {
                let mut params = Vec::with_capacity(7);
                params.push(*scan_type);
                params.extend_from_slice(&scan_interval.to_le_bytes());
                params.extend_from_slice(&scan_window.to_le_bytes());
                params.push(*own_address_type);
                params.push(*filter_policy);
                params
            }

            Self::LeSetScanEnable {
                enable,
                filter_duplicates,
            } => vec![*enable as u8, *filter_duplicates as u8],

            Self::LeCreateConnection {
                scan_interval,
                scan_window,
                filter_policy,
                peer_addr_type,
                peer_addr,
                conn_interval_min,
                conn_interval_max,
                conn_latency,
                supervision_timeout,
            } => {
                let mut params = Vec::with_capacity(25);
                params.extend_from_slice(&scan_interval.to_le_bytes());
                params.extend_from_slice(&scan_window.to_le_bytes());
                params.push(*filter_policy);
                params.push(u8::from(*peer_addr_type));
                params.extend_from_slice(&peer_addr.bytes);
                params.push(0x00); // own address type: public
                params.extend_from_slice(&conn_interval_min.to_le_bytes());
                params.extend_from_slice(&conn_interval_max.to_le_bytes());
                params.extend_from_slice(&conn_latency.to_le_bytes());
                params.extend_from_slice(&supervision_timeout.to_le_bytes());
                params.extend_from_slice(&0u16.to_le_bytes()); // min CE length
                params.extend_from_slice(&0u16.to_le_bytes()); // max CE length
                params
            }

            Self::LeAddDeviceToAcceptList { addr_type, addr } => {
                let mut params = vec![u8::from(*addr_type)];
                params.extend_from_slice(&addr.bytes);
                params
            }

            Self::LeConnectionUpdate {
                handle,
                interval_min,
                interval_max,
                latency,
                supervision_timeout,
            } => {
                let mut params = Vec::with_capacity(14);
                params.extend_from_slice(&handle.to_le_bytes());
                params.extend_from_slice(&interval_min.to_le_bytes());
                params.extend_from_slice(&interval_max.to_le_bytes());
                params.extend_from_slice(&latency.to_le_bytes());
                params.extend_from_slice(&supervision_timeout.to_le_bytes());
                params.extend_from_slice(&0u16.to_le_bytes());
                params.extend_from_slice(&0u16.to_le_bytes());
                params
            }

            Self::LeEncrypt { key, plaintext } => {
                let mut params = Vec::with_capacity(32);
                params.extend_from_slice(key);
                params.extend_from_slice(plaintext);
                params
            }

            Self::LeEnableEncryption {
                handle,
                rand,
                ediv,
                ltk,
            } => {
                let mut params = Vec::with_capacity(28);
                params.extend_from_slice(&handle.to_le_bytes());
                params.extend_from_slice(rand);
                params.extend_from_slice(&ediv.to_le_bytes());
                params.extend_from_slice(ltk);
                params
            }

            Self::Raw { parameters, .. } => parameters.clone(),
        }
    }

    /// Convert the command to a raw H4 packet
    pub fn to_packet(&self) -> Vec<u8> {
        let params = self.parameters();

        let mut packet = Vec::with_capacity(4 + params.len());
        packet.push(HCI_COMMAND_PKT);
        packet.extend_from_slice(&self.opcode().to_le_bytes());
        packet.push(params.len().min(HCI_MAX_PARAM_LEN) as u8);
        packet.extend_from_slice(&params[..params.len().min(HCI_MAX_PARAM_LEN)]);
        packet
    }
}

/// HCI Event packet
#[derive(Debug, Clone)]
pub struct HciEvent {
    pub event_code: u8,
    pub parameter_total_length: u8,
    pub parameters: Vec<u8>,
}

impl HciEvent {
    /// Parse an HCI event from raw bytes, without the H4 indicator
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 2 {
            return None;
        }

        let event_code = data[0];
        let parameter_total_length = data[1];

        if data.len() < (parameter_total_length as usize + 2) {
            return None;
        }

        let parameters = data[2..(parameter_total_length as usize + 2)].to_vec();

        Some(HciEvent {
            event_code,
            parameter_total_length,
            parameters,
        })
    }

    /// Build the wire form of an event, H4 indicator included
    pub fn to_packet(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.parameters.len());
        packet.push(HCI_EVENT_PKT);
        packet.push(self.event_code);
        packet.push(self.parameters.len() as u8);
        packet.extend_from_slice(&self.parameters);
        packet
    }
}

fn truncated(_: std::io::Error) -> HciError {
    HciError::InvalidPacketFormat
}

fn read_addr(cursor: &mut Cursor<&[u8]>) -> HciResult<BdAddr> {
    let mut bytes = [0u8; 6];
    cursor.read_exact(&mut bytes).map_err(truncated)?;
    Ok(BdAddr::new(bytes))
}

fn read_u24(cursor: &mut Cursor<&[u8]>) -> HciResult<u32> {
    cursor.read_u24::<LittleEndian>().map_err(truncated)
}

/// Command Complete event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandComplete {
    pub num_packets: u8,
    pub opcode: u16,
    pub return_parameters: Vec<u8>,
}

impl CommandComplete {
    pub fn parse(params: &[u8]) -> HciResult<Self> {
        let mut cursor = Cursor::new(params);
        let num_packets = cursor.read_u8().map_err(truncated)?;
        let opcode = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        Ok(Self {
            num_packets,
            opcode,
            return_parameters: params[3..].to_vec(),
        })
    }

    /// First return parameter; every command the host issues puts its status there.
    pub fn status(&self) -> u8 {
        self.return_parameters.first().copied().unwrap_or(HCI_SUCCESS)
    }
}

/// Command Status event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    pub status: u8,
    pub num_packets: u8,
    pub opcode: u16,
}

impl CommandStatus {
    pub fn parse(params: &[u8]) -> HciResult<Self> {
        let mut cursor = Cursor::new(params);
        Ok(Self {
            status: cursor.read_u8().map_err(truncated)?,
            num_packets: cursor.read_u8().map_err(truncated)?,
            opcode: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
        })
    }
}

/// Classic Connection Complete event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionComplete {
    pub status: u8,
    pub handle: u16,
    pub bd_addr: BdAddr,
    pub link_type: u8,
    pub encryption_enabled: bool,
}

impl ConnectionComplete {
    pub fn parse(params: &[u8]) -> HciResult<Self> {
        let mut cursor = Cursor::new(params);
        Ok(Self {
            status: cursor.read_u8().map_err(truncated)?,
            handle: cursor.read_u16::<LittleEndian>().map_err(truncated)? & 0x0FFF,
            bd_addr: read_addr(&mut cursor)?,
            link_type: cursor.read_u8().map_err(truncated)?,
            encryption_enabled: cursor.read_u8().map_err(truncated)? != 0,
        })
    }
}

/// Incoming Connection Request event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub bd_addr: BdAddr,
    pub class_of_device: u32,
    pub link_type: u8,
}

impl ConnectionRequest {
    pub fn parse(params: &[u8]) -> HciResult<Self> {
        let mut cursor = Cursor::new(params);
        Ok(Self {
            bd_addr: read_addr(&mut cursor)?,
            class_of_device: read_u24(&mut cursor)?,
            link_type: cursor.read_u8().map_err(truncated)?,
        })
    }
}

/// Disconnection Complete event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectionComplete {
    pub status: u8,
    pub handle: u16,
    pub reason: u8,
}

impl DisconnectionComplete {
    pub fn parse(params: &[u8]) -> HciResult<Self> {
        let mut cursor = Cursor::new(params);
        Ok(Self {
            status: cursor.read_u8().map_err(truncated)?,
            handle: cursor.read_u16::<LittleEndian>().map_err(truncated)? & 0x0FFF,
            reason: cursor.read_u8().map_err(truncated)?,
        })
    }
}

/// Status + handle pair shared by Authentication Complete and Encryption Change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleStatus {
    pub status: u8,
    pub handle: u16,
    /// Encryption Change only: encryption now enabled
    pub enabled: bool,
}

impl HandleStatus {
    pub fn parse(params: &[u8]) -> HciResult<Self> {
        let mut cursor = Cursor::new(params);
        let status = cursor.read_u8().map_err(truncated)?;
        let handle = cursor.read_u16::<LittleEndian>().map_err(truncated)? & 0x0FFF;
        let enabled = cursor.read_u8().map(|v| v != 0).unwrap_or(false);
        Ok(Self {
            status,
            handle,
            enabled,
        })
    }
}

/// Role Change event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleChange {
    pub status: u8,
    pub bd_addr: BdAddr,
    pub role: u8,
}

impl RoleChange {
    pub fn parse(params: &[u8]) -> HciResult<Self> {
        let mut cursor = Cursor::new(params);
        Ok(Self {
            status: cursor.read_u8().map_err(truncated)?,
            bd_addr: read_addr(&mut cursor)?,
            role: cursor.read_u8().map_err(truncated)?,
        })
    }
}

/// Link Key Notification event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkKeyNotification {
    pub bd_addr: BdAddr,
    pub link_key: [u8; 16],
    pub key_type: u8,
}

impl LinkKeyNotification {
    pub fn parse(params: &[u8]) -> HciResult<Self> {
        let mut cursor = Cursor::new(params);
        let bd_addr = read_addr(&mut cursor)?;
        let mut link_key = [0u8; 16];
        cursor.read_exact(&mut link_key).map_err(truncated)?;
        Ok(Self {
            bd_addr,
            link_key,
            key_type: cursor.read_u8().map_err(truncated)?,
        })
    }
}

/// Address-only events (PIN code, link key, IO capability and user
/// confirmation requests all start with the peer address).
pub fn parse_event_addr(params: &[u8]) -> HciResult<BdAddr> {
    BdAddr::from_slice(params).ok_or(HciError::InvalidPacketFormat)
}

/// One responder from any of the three inquiry result events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InquiryResponse {
    pub bd_addr: BdAddr,
    pub page_scan_repetition_mode: u8,
    pub class_of_device: u32,
    pub clock_offset: u16,
    pub rssi: Option<i8>,
}

impl InquiryResponse {
    /// Parses Inquiry Result, Inquiry Result with RSSI and Extended Inquiry Result.
    ///
    /// The first two lay their fields out as parallel arrays, one entry per
    /// responder.
    pub fn parse_all(event_code: u8, params: &[u8]) -> HciResult<Vec<Self>> {
        let num = *params.first().ok_or(HciError::InvalidPacketFormat)? as usize;
        let body = &params[1..];
        let (reserved, with_rssi) = match event_code {
            EVT_INQUIRY_RESULT => (2, false),
            EVT_INQUIRY_RESULT_WITH_RSSI | EVT_EXTENDED_INQUIRY_RESULT => (1, true),
            _ => return Err(HciError::InvalidPacketFormat),
        };
        let per_entry = 6 + 1 + reserved + 3 + 2 + with_rssi as usize;
        let num = if event_code == EVT_EXTENDED_INQUIRY_RESULT {
            num.min(1)
        } else {
            num
        };
        if body.len() < per_entry * num {
            return Err(HciError::InvalidParamLength(params.len()));
        }

        let addr_at = 0;
        let psrm_at = addr_at + 6 * num;
        let cod_at = psrm_at + (1 + reserved) * num;
        let clk_at = cod_at + 3 * num;
        let rssi_at = clk_at + 2 * num;

        let mut responses = Vec::with_capacity(num);
        for i in 0..num {
            let a = addr_at + 6 * i;
            let c = cod_at + 3 * i;
            let k = clk_at + 2 * i;
            responses.push(InquiryResponse {
                bd_addr: BdAddr::from_slice(&body[a..a + 6]).ok_or(HciError::InvalidPacketFormat)?,
                page_scan_repetition_mode: body[psrm_at + i],
                class_of_device: u32::from_le_bytes([body[c], body[c + 1], body[c + 2], 0]),
                clock_offset: u16::from_le_bytes([body[k], body[k + 1]]),
                rssi: with_rssi.then(|| body[rssi_at + i] as i8),
            });
        }
        Ok(responses)
    }
}

/// LE Connection Complete and LE Enhanced Connection Complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeConnectionComplete {
    pub status: u8,
    pub handle: u16,
    pub role: u8,
    pub peer_addr_type: AddressType,
    pub peer_addr: BdAddr,
    pub interval: u16,
    pub latency: u16,
    pub supervision_timeout: u16,
}

impl LeConnectionComplete {
    /// Parses the LE meta sub-event parameters (sub-event code excluded).
    pub fn parse(subevent: u8, params: &[u8]) -> HciResult<Self> {
        let mut cursor = Cursor::new(params);
        let status = cursor.read_u8().map_err(truncated)?;
        let handle = cursor.read_u16::<LittleEndian>().map_err(truncated)? & 0x0FFF;
        let role = cursor.read_u8().map_err(truncated)?;
        let peer_addr_type = AddressType::from(cursor.read_u8().map_err(truncated)?);
        let peer_addr = read_addr(&mut cursor)?;
        if subevent == EVT_LE_ENHANCED_CONN_COMPLETE {
            // local and peer resolvable private addresses
            read_addr(&mut cursor)?;
            read_addr(&mut cursor)?;
        }
        Ok(Self {
            status,
            handle,
            role,
            peer_addr_type,
            peer_addr,
            interval: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            latency: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            supervision_timeout: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
        })
    }
}

/// LE Long Term Key Request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeLtkRequest {
    pub handle: u16,
    pub rand: [u8; 8],
    pub ediv: u16,
}

impl LeLtkRequest {
    pub fn parse(params: &[u8]) -> HciResult<Self> {
        let mut cursor = Cursor::new(params);
        let handle = cursor.read_u16::<LittleEndian>().map_err(truncated)? & 0x0FFF;
        let mut rand = [0u8; 8];
        cursor.read_exact(&mut rand).map_err(truncated)?;
        Ok(Self {
            handle,
            rand,
            ediv: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
        })
    }
}

/// LE Advertising Report Event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeAdvertisingReport {
    pub event_type: u8,
    pub address_type: AddressType,
    pub address: BdAddr,
    pub data: Vec<u8>,
    pub rssi: i8,
}

impl LeAdvertisingReport {
    /// Parses every report of an LE Advertising Report sub-event (sub-event
    /// code excluded). Fields are laid out as parallel arrays.
    pub fn parse_all(params: &[u8]) -> HciResult<Vec<Self>> {
        let num = *params.first().ok_or(HciError::InvalidPacketFormat)? as usize;
        let body = &params[1..];

        let types_at = 0;
        let addr_types_at = types_at + num;
        let addrs_at = addr_types_at + num;
        let lens_at = addrs_at + 6 * num;
        let data_at = lens_at + num;
        if body.len() < data_at {
            return Err(HciError::InvalidParamLength(params.len()));
        }
        let total_data: usize = body[lens_at..data_at].iter().map(|l| *l as usize).sum();
        let rssi_at = data_at + total_data;
        if body.len() < rssi_at + num {
            return Err(HciError::InvalidParamLength(params.len()));
        }

        let mut reports = Vec::with_capacity(num);
        let mut data_offset = data_at;
        for i in 0..num {
            let len = body[lens_at + i] as usize;
            let a = addrs_at + 6 * i;
            reports.push(LeAdvertisingReport {
                event_type: body[types_at + i],
                address_type: AddressType::from(body[addr_types_at + i]),
                address: BdAddr::from_slice(&body[a..a + 6]).ok_or(HciError::InvalidPacketFormat)?,
                data: body[data_offset..data_offset + len].to_vec(),
                rssi: body[rssi_at + i] as i8,
            });
            data_offset += len;
        }
        Ok(reports)
    }
}
