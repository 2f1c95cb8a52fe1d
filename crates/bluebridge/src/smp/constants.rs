//! Constants for the Security Manager Protocol

// SMP command codes
pub const SMP_PAIRING_REQUEST: u8 = 0x01;
pub const SMP_PAIRING_RESPONSE: u8 = 0x02;
pub const SMP_PAIRING_CONFIRM: u8 = 0x03;
pub const SMP_PAIRING_RANDOM: u8 = 0x04;
pub const SMP_PAIRING_FAILED: u8 = 0x05;
pub const SMP_ENCRYPTION_INFORMATION: u8 = 0x06;
pub const SMP_MASTER_IDENTIFICATION: u8 = 0x07;
pub const SMP_IDENTITY_INFORMATION: u8 = 0x08;
pub const SMP_IDENTITY_ADDRESS_INFORMATION: u8 = 0x09;
pub const SMP_SIGNING_INFORMATION: u8 = 0x0A;
pub const SMP_SECURITY_REQUEST: u8 = 0x0B;

// IO Capability values
pub const SMP_IO_CAPABILITY_DISPLAY_ONLY: u8 = 0x00;
pub const SMP_IO_CAPABILITY_DISPLAY_YES_NO: u8 = 0x01;
pub const SMP_IO_CAPABILITY_KEYBOARD_ONLY: u8 = 0x02;
pub const SMP_IO_CAPABILITY_NO_INPUT_NO_OUTPUT: u8 = 0x03;
pub const SMP_IO_CAPABILITY_KEYBOARD_DISPLAY: u8 = 0x04;

// OOB data flag
pub const SMP_OOB_NOT_PRESENT: u8 = 0x00;

// Pairing Failed reason codes
pub const SMP_REASON_PASSKEY_ENTRY_FAILED: u8 = 0x01;
pub const SMP_REASON_OOB_NOT_AVAILABLE: u8 = 0x02;
pub const SMP_REASON_AUTHENTICATION_REQUIREMENTS: u8 = 0x03;
pub const SMP_REASON_CONFIRM_VALUE_FAILED: u8 = 0x04;
pub const SMP_REASON_PAIRING_NOT_SUPPORTED: u8 = 0x05;
pub const SMP_REASON_ENCRYPTION_KEY_SIZE: u8 = 0x06;
pub const SMP_REASON_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const SMP_REASON_UNSPECIFIED_REASON: u8 = 0x08;
pub const SMP_REASON_REPEATED_ATTEMPTS: u8 = 0x09;
pub const SMP_REASON_INVALID_PARAMETERS: u8 = 0x0A;

// SMP encryption key size limits
pub const SMP_MIN_ENCRYPTION_KEY_SIZE: u8 = 7;
pub const SMP_MAX_ENCRYPTION_KEY_SIZE: u8 = 16;

// SMP address types, as carried in c1 and Identity Address Information
pub const SMP_ADDR_TYPE_PUBLIC: u8 = 0x00;
pub const SMP_ADDR_TYPE_RANDOM: u8 = 0x01;

/// Temporary key of Just Works pairing
pub const SMP_JUST_WORKS_TK: [u8; 16] = [0; 16];

/// Short name of a Pairing Failed reason, for logs
pub fn reason_name(reason: u8) -> &'static str {
    match reason {
        SMP_REASON_PASSKEY_ENTRY_FAILED => "passkey entry failed",
        SMP_REASON_OOB_NOT_AVAILABLE => "OOB not available",
        SMP_REASON_AUTHENTICATION_REQUIREMENTS => "authentication requirements",
        SMP_REASON_CONFIRM_VALUE_FAILED => "confirm value failed",
        SMP_REASON_PAIRING_NOT_SUPPORTED => "pairing not supported",
        SMP_REASON_ENCRYPTION_KEY_SIZE => "encryption key size",
        SMP_REASON_COMMAND_NOT_SUPPORTED => "command not supported",
        SMP_REASON_UNSPECIFIED_REASON => "unspecified reason",
        SMP_REASON_REPEATED_ATTEMPTS => "repeated attempts",
        SMP_REASON_INVALID_PARAMETERS => "invalid parameters",
        _ => "unknown",
    }
}
