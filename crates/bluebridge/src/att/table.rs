//! Fixed attribute table of the configuration server
//!
//! Handles are assigned in declaration order and never change, so peers
//! can cache them. Values that live elsewhere (configuration, platform
//! state) are referenced through [`Resource`] and produced on each read.

use super::constants::*;
use crate::uuid::*;
use bitflags::bitflags;

bitflags! {
    /// Access allowed on an attribute
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AttPerms: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
    }
}

/// Externally backed attribute values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    BatteryLevel,
    ServiceChangedCccd,
    ApiVersion,
    GlobalConfig,
    /// Selects the output port addressed by `OutputData`
    OutputControl,
    OutputData,
    /// Selects the input and byte window addressed by `InputData`
    InputControl,
    InputData,
    OtaData,
    FirmwareName,
    BdAddr,
    /// Byte offset into the memory card image
    McControl,
    McData,
    Command,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Fixed(Vec<u8>),
    Dynamic(Resource),
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub handle: u16,
    pub attr_type: Uuid,
    pub perms: AttPerms,
    pub value: AttrValue,
}

impl Attribute {
    pub fn is_primary_service(&self) -> bool {
        self.attr_type == PRIMARY_SERVICE_UUID16
    }
}

// Value handles of the configuration service
pub const BATTERY_LEVEL_HANDLE: u16 = 0x000C;
pub const SERVICE_CHANGED_CCCD_HANDLE: u16 = 0x0009;
pub const BRIDGE_SERVICE_HANDLE: u16 = 0x000D;
pub const API_VERSION_HANDLE: u16 = 0x000F;
pub const GLOBAL_CFG_HANDLE: u16 = 0x0011;
pub const OUT_CTRL_HANDLE: u16 = 0x0013;
pub const OUT_DATA_HANDLE: u16 = 0x0015;
pub const IN_CTRL_HANDLE: u16 = 0x0017;
pub const IN_DATA_HANDLE: u16 = 0x0019;
pub const OTA_DATA_HANDLE: u16 = 0x001B;
pub const FW_NAME_HANDLE: u16 = 0x001D;
pub const BD_ADDR_HANDLE: u16 = 0x001F;
pub const MC_CTRL_HANDLE: u16 = 0x0021;
pub const MC_DATA_HANDLE: u16 = 0x0023;
pub const CMD_HANDLE: u16 = 0x0025;

/// Appearance reported by the GAP service: generic gamepad
const APPEARANCE_GAMEPAD: u16 = 0x03C4;

const RW: AttPerms = AttPerms::READ.union(AttPerms::WRITE);
const PROP_RW: u8 = CHAR_PROP_READ | CHAR_PROP_WRITE;

struct Builder {
    attrs: Vec<Attribute>,
}

impl Builder {
    fn push(&mut self, attr_type: Uuid, perms: AttPerms, value: AttrValue) -> u16 {
        let handle = self.attrs.len() as u16 + 1;
        self.attrs.push(Attribute {
            handle,
            attr_type,
            perms,
            value,
        });
        handle
    }

    fn service(&mut self, uuid: Uuid) {
        self.push(
            Uuid::from_u16(PRIMARY_SERVICE_UUID16),
            AttPerms::READ,
            AttrValue::Fixed(uuid.to_att_bytes()),
        );
    }

    /// Declaration plus value; returns the value handle
    fn characteristic(&mut self, uuid: Uuid, props: u8, perms: AttPerms, value: AttrValue) -> u16 {
        let value_handle = self.attrs.len() as u16 + 2;
        let mut decl = vec![props];
        decl.extend_from_slice(&value_handle.to_le_bytes());
        decl.extend_from_slice(&uuid.to_att_bytes());
        self.push(
            Uuid::from_u16(CHARACTERISTIC_UUID16),
            AttPerms::READ,
            AttrValue::Fixed(decl),
        );
        self.push(uuid, perms, value)
    }
}

#[derive(Debug, Clone)]
pub struct AttributeTable {
    attrs: Vec<Attribute>,
}

impl AttributeTable {
    pub fn new(device_name: &str) -> Self {
        let mut b = Builder { attrs: Vec::new() };

        b.service(Uuid::from_u16(GAP_SERVICE_UUID16));
        b.characteristic(
            Uuid::from_u16(DEVICE_NAME_UUID16),
            CHAR_PROP_READ,
            AttPerms::READ,
            AttrValue::Fixed(device_name.as_bytes().to_vec()),
        );
        b.characteristic(
            Uuid::from_u16(APPEARANCE_UUID16),
            CHAR_PROP_READ,
            AttPerms::READ,
            AttrValue::Fixed(APPEARANCE_GAMEPAD.to_le_bytes().to_vec()),
        );

        b.service(Uuid::from_u16(GATT_SERVICE_UUID16));
        b.characteristic(
            Uuid::from_u16(SERVICE_CHANGED_UUID16),
            CHAR_PROP_INDICATE,
            AttPerms::empty(),
            AttrValue::Fixed(vec![0x01, 0x00, 0xFF, 0xFF]),
        );
        b.push(
            Uuid::from_u16(CCCD_UUID16),
            RW,
            AttrValue::Dynamic(Resource::ServiceChangedCccd),
        );

        b.service(Uuid::from_u16(BATTERY_SERVICE_UUID16));
        b.characteristic(
            Uuid::from_u16(BATTERY_LEVEL_UUID16),
            CHAR_PROP_READ,
            AttPerms::READ,
            AttrValue::Dynamic(Resource::BatteryLevel),
        );

        b.service(Uuid::bridge(0));
        let bridge_chars = [
            (Resource::ApiVersion, CHAR_PROP_READ, AttPerms::READ),
            (Resource::GlobalConfig, PROP_RW, RW),
            (Resource::OutputControl, PROP_RW, RW),
            (Resource::OutputData, PROP_RW, RW),
            (Resource::InputControl, PROP_RW, RW),
            (Resource::InputData, PROP_RW, RW),
            (
                Resource::OtaData,
                CHAR_PROP_WRITE | CHAR_PROP_WRITE_WITHOUT_RESPONSE,
                AttPerms::WRITE,
            ),
            (Resource::FirmwareName, CHAR_PROP_READ, AttPerms::READ),
            (Resource::BdAddr, CHAR_PROP_READ, AttPerms::READ),
            (Resource::McControl, PROP_RW, RW),
            (Resource::McData, PROP_RW, RW),
            (Resource::Command, PROP_RW, RW),
        ];
        for (i, (resource, props, perms)) in bridge_chars.into_iter().enumerate() {
            b.characteristic(
                Uuid::bridge(i as u8 + 1),
                props,
                perms,
                AttrValue::Dynamic(resource),
            );
        }

        Self { attrs: b.attrs }
    }

    pub fn get(&self, handle: u16) -> Option<&Attribute> {
        let index = (handle as usize).checked_sub(1)?;
        self.attrs.get(index)
    }

    /// Attributes with `start <= handle <= end`
    pub fn range(&self, start: u16, end: u16) -> impl Iterator<Item = &Attribute> {
        self.attrs
            .iter()
            .filter(move |a| a.handle >= start && a.handle <= end)
    }

    /// Last handle of the service group starting at `handle`
    pub fn group_end(&self, handle: u16) -> u16 {
        self.attrs
            .iter()
            .find(|a| a.handle > handle && a.is_primary_service())
            .map(|a| a.handle - 1)
            .unwrap_or_else(|| self.last_handle())
    }

    pub fn last_handle(&self) -> u16 {
        self.attrs.len() as u16
    }
}
