//! Advertising data parsing

use crate::gap::constants::*;

/// The fields of an advertising payload discovery cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisingData {
    pub flags: Option<u8>,
    pub name: Option<String>,
    pub service_uuids16: Vec<u16>,
    pub appearance: Option<u16>,
}

impl AdvertisingData {
    pub fn parse(data: &[u8]) -> Self {
        let mut adv = AdvertisingData::default();
        for (ad_type, value) in parse_advertising_data(data) {
            match ad_type {
                ADV_TYPE_FLAGS if !value.is_empty() => adv.flags = Some(value[0]),
                ADV_TYPE_16BIT_SERVICE_UUID_PARTIAL | ADV_TYPE_16BIT_SERVICE_UUID_COMPLETE => {
                    adv.service_uuids16.extend(
                        value
                            .chunks_exact(2)
                            .map(|c| u16::from_le_bytes([c[0], c[1]])),
                    );
                }
                ADV_TYPE_SHORT_LOCAL_NAME | ADV_TYPE_COMPLETE_LOCAL_NAME => {
                    adv.name = Some(String::from_utf8_lossy(&value).into_owned());
                }
                ADV_TYPE_APPEARANCE if value.len() >= 2 => {
                    adv.appearance = Some(u16::from_le_bytes([value[0], value[1]]));
                }
                _ => {}
            }
        }
        adv
    }

    /// True for peers advertising a HID service or a game controller appearance.
    pub fn is_game_controller(&self) -> bool {
        self.service_uuids16.contains(&crate::uuid::HID_SERVICE_UUID16)
            || matches!(
                self.appearance,
                Some(APPEARANCE_HID_GENERIC | APPEARANCE_HID_JOYSTICK | APPEARANCE_HID_GAMEPAD)
            )
    }
}

/// Splits advertising data into `(type, value)` records.
///
/// Stops at the first zero-length or truncated record.
pub fn parse_advertising_data(data: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut result = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let length = data[i] as usize;
        if length == 0 || i + length >= data.len() {
            break;
        }

        let ad_type = data[i + 1];
        let ad_data = data[i + 2..i + 1 + length].to_vec();

        result.push((ad_type, ad_data));

        i += 1 + length;
    }

    result
}

/// Builds the advertising payload for the local configuration server.
pub fn build_advertising_data(name: &str) -> Vec<u8> {
    let mut data = vec![
        2,
        ADV_TYPE_FLAGS,
        AD_FLAG_LE_GENERAL_DISCOVERABLE | AD_FLAG_BR_EDR_NOT_SUPPORTED,
    ];
    let name = name.as_bytes();
    let room = 31 - data.len() - 2;
    let len = name.len().min(room);
    data.push(len as u8 + 1);
    data.push(ADV_TYPE_COMPLETE_LOCAL_NAME);
    data.extend_from_slice(&name[..len]);
    data
}
