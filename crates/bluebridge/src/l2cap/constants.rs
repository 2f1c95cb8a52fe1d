//! L2CAP protocol constants

// Fixed channel identifiers
pub const L2CAP_SIGNALING_CID: u16 = 0x0001;
pub const L2CAP_ATT_CID: u16 = 0x0004;
pub const L2CAP_LE_SIGNALING_CID: u16 = 0x0005;
pub const L2CAP_SMP_CID: u16 = 0x0006;

// Protocol/service multiplexers
pub const PSM_SDP: u16 = 0x0001;
pub const PSM_HID_CONTROL: u16 = 0x0011;
pub const PSM_HID_INTERRUPT: u16 = 0x0013;

// Local dynamic CID bases, one CID per slot on top
pub const SDP_RX_CID_BASE: u16 = 0x0040;
pub const SDP_TX_CID_BASE: u16 = 0x0050;
pub const HID_CTRL_CID_BASE: u16 = 0x0060;
pub const HID_INTR_CID_BASE: u16 = 0x0070;

/// MTU assumed when a configuration request carries no MTU option
pub const L2CAP_DEFAULT_MTU: u16 = 672;
pub const L2CAP_MIN_MTU: u16 = 48;

// Signaling command codes
pub const L2CAP_COMMAND_REJECT: u8 = 0x01;
pub const L2CAP_CONNECTION_REQUEST: u8 = 0x02;
pub const L2CAP_CONNECTION_RESPONSE: u8 = 0x03;
pub const L2CAP_CONFIGURE_REQUEST: u8 = 0x04;
pub const L2CAP_CONFIGURE_RESPONSE: u8 = 0x05;
pub const L2CAP_DISCONNECTION_REQUEST: u8 = 0x06;
pub const L2CAP_DISCONNECTION_RESPONSE: u8 = 0x07;
pub const L2CAP_ECHO_REQUEST: u8 = 0x08;
pub const L2CAP_ECHO_RESPONSE: u8 = 0x09;
pub const L2CAP_INFORMATION_REQUEST: u8 = 0x0A;
pub const L2CAP_INFORMATION_RESPONSE: u8 = 0x0B;
pub const L2CAP_CONNECTION_PARAMETER_UPDATE_REQUEST: u8 = 0x12;
pub const L2CAP_CONNECTION_PARAMETER_UPDATE_RESPONSE: u8 = 0x13;

// Configuration option types
pub const L2CAP_CONF_MTU: u8 = 0x01;
pub const L2CAP_CONF_FLUSH_TIMEOUT: u8 = 0x02;
pub const L2CAP_CONF_HINT: u8 = 0x80;

// Connection response results
pub const L2CAP_CR_SUCCESS: u16 = 0x0000;
pub const L2CAP_CR_PENDING: u16 = 0x0001;
pub const L2CAP_CR_PSM_NOT_SUPPORTED: u16 = 0x0002;
pub const L2CAP_CR_NO_RESOURCES: u16 = 0x0004;

// Configuration response results
pub const L2CAP_CONF_SUCCESS: u16 = 0x0000;
pub const L2CAP_CONF_UNKNOWN_OPTIONS: u16 = 0x0003;

// Command reject reasons
pub const L2CAP_REJ_NOT_UNDERSTOOD: u16 = 0x0000;
pub const L2CAP_REJ_INVALID_CID: u16 = 0x0002;

// Information response result
pub const L2CAP_INFO_NOT_SUPPORTED: u16 = 0x0001;

// Connection parameter update results
pub const L2CAP_CONN_PARAM_ACCEPTED: u16 = 0x0000;
pub const L2CAP_CONN_PARAM_REJECTED: u16 = 0x0001;
