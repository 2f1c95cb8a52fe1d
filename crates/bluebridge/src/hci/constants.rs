//! HCI protocol constants
//!
//! This module contains constants used in the Bluetooth HCI protocol.

// HCI packet types
pub const HCI_COMMAND_PKT: u8 = 0x01;
pub const HCI_ACL_PKT: u8 = 0x02;
pub const HCI_SCO_PKT: u8 = 0x03;
pub const HCI_EVENT_PKT: u8 = 0x04;

// Maximum size of HCI command parameters
pub const HCI_MAX_PARAM_LEN: usize = 255;

// Common OGF (Opcode Group Field) values
pub const OGF_LINK_CTL: u8 = 0x01;
pub const OGF_LINK_POLICY: u8 = 0x02;
pub const OGF_HOST_CTL: u8 = 0x03;
pub const OGF_INFO_PARAM: u8 = 0x04;
pub const OGF_LE: u8 = 0x08;

// Link Control Commands (OGF: 0x01)
pub const OCF_INQUIRY: u16 = 0x0001;
pub const OCF_INQUIRY_CANCEL: u16 = 0x0002;
pub const OCF_CREATE_CONNECTION: u16 = 0x0005;
pub const OCF_DISCONNECT: u16 = 0x0006;
pub const OCF_ACCEPT_CONNECTION_REQUEST: u16 = 0x0009;
pub const OCF_REJECT_CONNECTION_REQUEST: u16 = 0x000A;
pub const OCF_LINK_KEY_REQUEST_REPLY: u16 = 0x000B;
pub const OCF_LINK_KEY_REQUEST_NEGATIVE_REPLY: u16 = 0x000C;
pub const OCF_PIN_CODE_REQUEST_REPLY: u16 = 0x000D;
pub const OCF_AUTHENTICATION_REQUESTED: u16 = 0x0011;
pub const OCF_SET_CONNECTION_ENCRYPTION: u16 = 0x0013;
pub const OCF_IO_CAPABILITY_REQUEST_REPLY: u16 = 0x002B;
pub const OCF_USER_CONFIRMATION_REQUEST_REPLY: u16 = 0x002C;

// Link Policy Commands (OGF: 0x02)
pub const OCF_WRITE_DEFAULT_LINK_POLICY_SETTINGS: u16 = 0x000F;

// Host Controller Commands (OGF: 0x03)
pub const OCF_SET_EVENT_MASK: u16 = 0x0001;
pub const OCF_RESET: u16 = 0x0003;
pub const OCF_WRITE_LOCAL_NAME: u16 = 0x0013;
pub const OCF_WRITE_SCAN_ENABLE: u16 = 0x001A;
pub const OCF_WRITE_PAGE_SCAN_ACTIVITY: u16 = 0x001C;
pub const OCF_WRITE_CLASS_OF_DEVICE: u16 = 0x0024;
pub const OCF_WRITE_INQUIRY_MODE: u16 = 0x0045;
pub const OCF_WRITE_SIMPLE_PAIRING_MODE: u16 = 0x0056;
pub const OCF_WRITE_LE_HOST_SUPPORTED: u16 = 0x006D;

// Informational Parameters (OGF: 0x04)
pub const OCF_READ_LOCAL_VERSION: u16 = 0x0001;
pub const OCF_READ_BUFFER_SIZE: u16 = 0x0005;
pub const OCF_READ_BD_ADDR: u16 = 0x0009;

// LE Command OCF values (OGF: 0x08)
pub const OCF_LE_SET_EVENT_MASK: u16 = 0x0001;
pub const OCF_LE_READ_BUFFER_SIZE: u16 = 0x0002;
pub const OCF_LE_SET_ADVERTISING_PARAMETERS: u16 = 0x0006;
pub const OCF_LE_SET_ADVERTISING_DATA: u16 = 0x0008;
pub const OCF_LE_SET_ADVERTISING_ENABLE: u16 = 0x000A;
pub const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
pub const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;
pub const OCF_LE_CREATE_CONNECTION: u16 = 0x000D;
pub const OCF_LE_CREATE_CONNECTION_CANCEL: u16 = 0x000E;
pub const OCF_LE_CLEAR_ACCEPT_LIST: u16 = 0x0010;
pub const OCF_LE_ADD_DEVICE_TO_ACCEPT_LIST: u16 = 0x0011;
pub const OCF_LE_CONNECTION_UPDATE: u16 = 0x0013;
pub const OCF_LE_ENCRYPT: u16 = 0x0017;
pub const OCF_LE_RAND: u16 = 0x0018;
pub const OCF_LE_ENABLE_ENCRYPTION: u16 = 0x0019;
pub const OCF_LE_LTK_REQUEST_NEGATIVE_REPLY: u16 = 0x001B;

/// Builds a full opcode from its group and command fields.
pub const fn opcode(ogf: u8, ocf: u16) -> u16 {
    ((ogf as u16) << 10) | (ocf & 0x03ff)
}

pub const OP_CREATE_CONNECTION: u16 = opcode(OGF_LINK_CTL, OCF_CREATE_CONNECTION);
pub const OP_LE_CREATE_CONNECTION: u16 = opcode(OGF_LE, OCF_LE_CREATE_CONNECTION);
pub const OP_RESET: u16 = opcode(OGF_HOST_CTL, OCF_RESET);
pub const OP_READ_BUFFER_SIZE: u16 = opcode(OGF_INFO_PARAM, OCF_READ_BUFFER_SIZE);
pub const OP_READ_BD_ADDR: u16 = opcode(OGF_INFO_PARAM, OCF_READ_BD_ADDR);
pub const OP_LE_READ_BUFFER_SIZE: u16 = opcode(OGF_LE, OCF_LE_READ_BUFFER_SIZE);
pub const OP_LE_ENCRYPT: u16 = opcode(OGF_LE, OCF_LE_ENCRYPT);
pub const OP_LE_RAND: u16 = opcode(OGF_LE, OCF_LE_RAND);
pub const OP_LE_ENABLE_ENCRYPTION: u16 = opcode(OGF_LE, OCF_LE_ENABLE_ENCRYPTION);
pub const OP_LE_CONNECTION_UPDATE: u16 = opcode(OGF_LE, OCF_LE_CONNECTION_UPDATE);
pub const OP_DISCONNECT: u16 = opcode(OGF_LINK_CTL, OCF_DISCONNECT);
pub const OP_INQUIRY: u16 = opcode(OGF_LINK_CTL, OCF_INQUIRY);
pub const OP_ACCEPT_CONNECTION_REQUEST: u16 = opcode(OGF_LINK_CTL, OCF_ACCEPT_CONNECTION_REQUEST);
pub const OP_LE_SET_ADVERTISING_ENABLE: u16 = opcode(OGF_LE, OCF_LE_SET_ADVERTISING_ENABLE);
pub const OP_INQUIRY_CANCEL: u16 = opcode(OGF_LINK_CTL, OCF_INQUIRY_CANCEL);
pub const OP_REJECT_CONNECTION_REQUEST: u16 = opcode(OGF_LINK_CTL, OCF_REJECT_CONNECTION_REQUEST);
pub const OP_LINK_KEY_REQUEST_REPLY: u16 = opcode(OGF_LINK_CTL, OCF_LINK_KEY_REQUEST_REPLY);
pub const OP_LINK_KEY_REQUEST_NEGATIVE_REPLY: u16 =
    opcode(OGF_LINK_CTL, OCF_LINK_KEY_REQUEST_NEGATIVE_REPLY);
pub const OP_PIN_CODE_REQUEST_REPLY: u16 = opcode(OGF_LINK_CTL, OCF_PIN_CODE_REQUEST_REPLY);
pub const OP_AUTHENTICATION_REQUESTED: u16 = opcode(OGF_LINK_CTL, OCF_AUTHENTICATION_REQUESTED);
pub const OP_SET_CONNECTION_ENCRYPTION: u16 = opcode(OGF_LINK_CTL, OCF_SET_CONNECTION_ENCRYPTION);
pub const OP_IO_CAPABILITY_REQUEST_REPLY: u16 = opcode(OGF_LINK_CTL, OCF_IO_CAPABILITY_REQUEST_REPLY);
pub const OP_USER_CONFIRMATION_REQUEST_REPLY: u16 =
    opcode(OGF_LINK_CTL, OCF_USER_CONFIRMATION_REQUEST_REPLY);
pub const OP_LE_SET_SCAN_ENABLE: u16 = opcode(OGF_LE, OCF_LE_SET_SCAN_ENABLE);
pub const OP_LE_LTK_REQUEST_NEGATIVE_REPLY: u16 = opcode(OGF_LE, OCF_LE_LTK_REQUEST_NEGATIVE_REPLY);

// HCI Events
pub const EVT_INQUIRY_COMPLETE: u8 = 0x01;
pub const EVT_INQUIRY_RESULT: u8 = 0x02;
pub const EVT_CONN_COMPLETE: u8 = 0x03;
pub const EVT_CONN_REQUEST: u8 = 0x04;
pub const EVT_DISCONN_COMPLETE: u8 = 0x05;
pub const EVT_AUTH_COMPLETE: u8 = 0x06;
pub const EVT_ENCRYPTION_CHANGE: u8 = 0x08;
pub const EVT_CMD_COMPLETE: u8 = 0x0E;
pub const EVT_CMD_STATUS: u8 = 0x0F;
pub const EVT_ROLE_CHANGE: u8 = 0x12;
pub const EVT_NUM_COMP_PKTS: u8 = 0x13;
pub const EVT_PIN_CODE_REQUEST: u8 = 0x16;
pub const EVT_LINK_KEY_REQUEST: u8 = 0x17;
pub const EVT_LINK_KEY_NOTIFICATION: u8 = 0x18;
pub const EVT_INQUIRY_RESULT_WITH_RSSI: u8 = 0x22;
pub const EVT_EXTENDED_INQUIRY_RESULT: u8 = 0x2F;
pub const EVT_IO_CAPABILITY_REQUEST: u8 = 0x31;
pub const EVT_IO_CAPABILITY_RESPONSE: u8 = 0x32;
pub const EVT_USER_CONFIRMATION_REQUEST: u8 = 0x33;
pub const EVT_SIMPLE_PAIRING_COMPLETE: u8 = 0x36;
pub const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta Events
pub const EVT_LE_CONN_COMPLETE: u8 = 0x01;
pub const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;
pub const EVT_LE_CONN_UPDATE_COMPLETE: u8 = 0x03;
pub const EVT_LE_LTK_REQUEST: u8 = 0x05;
pub const EVT_LE_ENHANCED_CONN_COMPLETE: u8 = 0x0A;

// Status codes
pub const HCI_SUCCESS: u8 = 0x00;
pub const HCI_AUTHENTICATION_FAILURE: u8 = 0x05;
pub const HCI_REJECTED_LIMITED_RESOURCES: u8 = 0x0D;
pub const HCI_REMOTE_USER_TERMINATED: u8 = 0x13;

// Connection roles
pub const ROLE_CENTRAL: u8 = 0x00;
pub const ROLE_PERIPHERAL: u8 = 0x01;

/// Controller ACL buffer size assumed until Read Buffer Size answers
pub const DEFAULT_ACL_MTU: usize = 1021;

/// Packet types DM1/DH1/DM3/DH3/DM5/DH5
pub const ACL_PACKET_TYPES: u16 = 0xCC18;
