// Address types
pub const PUBLIC_DEVICE_ADDRESS: u8 = 0x00;
pub const RANDOM_DEVICE_ADDRESS: u8 = 0x01;
pub const PUBLIC_IDENTITY_ADDRESS: u8 = 0x02;
pub const RANDOM_IDENTITY_ADDRESS: u8 = 0x03;

// Advertising Data Types
pub const ADV_TYPE_FLAGS: u8 = 0x01;
pub const ADV_TYPE_16BIT_SERVICE_UUID_PARTIAL: u8 = 0x02;
pub const ADV_TYPE_16BIT_SERVICE_UUID_COMPLETE: u8 = 0x03;
pub const ADV_TYPE_SHORT_LOCAL_NAME: u8 = 0x08;
pub const ADV_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
pub const ADV_TYPE_APPEARANCE: u8 = 0x19;

// Advertising event types
pub const ADV_IND: u8 = 0x00;
pub const ADV_DIRECT_IND: u8 = 0x01;

// AD flags
pub const AD_FLAG_LE_GENERAL_DISCOVERABLE: u8 = 0x02;
pub const AD_FLAG_BR_EDR_NOT_SUPPORTED: u8 = 0x04;

// Class of device
pub const COD_MAJOR_PERIPHERAL: u8 = 0x05;
/// Major class Computer, minor Desktop
pub const COD_DEFAULT: u32 = 0x000104;

// Appearance values for game controllers
pub const APPEARANCE_HID_GENERIC: u16 = 0x03C0;
pub const APPEARANCE_HID_JOYSTICK: u16 = 0x03C3;
pub const APPEARANCE_HID_GAMEPAD: u16 = 0x03C4;

/// General/Unlimited Inquiry Access Code
pub const GIAC_LAP: [u8; 3] = [0x33, 0x8B, 0x9E];
