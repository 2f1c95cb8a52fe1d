//! Runtime options and the persisted bridge configuration
//!
//! [`HostConfig`] holds the knobs of the Bluetooth engine itself.
//! [`BridgeConfig`] is the user-facing configuration exposed over the
//! attribute server and stored as a single fixed-size blob.

use crate::gap::COD_DEFAULT;
use crate::storage::{Storage, StorageError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{info, warn};
use std::io::{Cursor, Read};
use std::time::Duration;
use thiserror::Error;

/// Wired output ports
pub const MAX_OUTPUTS: usize = 12;
/// Wireless input slots, one per session
pub const MAX_INPUTS: usize = 7;
/// Mapping entries per input
pub const MAX_MAPPINGS: usize = 128;

pub const CONFIG_FILE: &str = "config.bin";
pub const CONFIG_MAGIC: u32 = 0xA3F4_1C07;
pub const CONFIG_VERSION: u8 = 1;

/// Default mapping entries written for a fresh input
const DEFAULT_MAP_SIZE: usize = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Bad configuration magic 0x{0:08x}")]
    BadMagic(u32),

    #[error("Unsupported configuration version {0}")]
    UnsupportedVersion(u8),

    #[error("Configuration blob truncated at {0} bytes")]
    Truncated(usize),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Engine options
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub local_name: String,
    pub class_of_device: u32,
    /// Run classic inquiry while slots are free
    pub classic_inquiry: bool,
    /// Scan for LE HID peers while slots are free
    pub le_scan: bool,
    /// Advertise the configuration server
    pub le_advertising: bool,
    /// Inquiry length in 1.28 s units
    pub inquiry_length: u8,
    /// Retries for connection attempts and HID init steps
    pub max_retry: u8,
    /// Consecutive failures tolerated per bring-up step
    pub bringup_max_retry: u8,
    pub tx_queue_capacity: usize,
    pub feedback_queue_capacity: usize,
    /// Upper bound on an assembled SDP response
    pub sdp_staging_cap: usize,
    pub l2cap_mtu: u16,
    pub att_mtu: u16,
    /// Pause inserted after controller reset
    pub reset_settle: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            local_name: "BlueBridge".to_string(),
            class_of_device: COD_DEFAULT,
            classic_inquiry: true,
            le_scan: true,
            le_advertising: true,
            inquiry_length: 0x08,
            max_retry: 3,
            bringup_max_retry: 3,
            tx_queue_capacity: 64,
            feedback_queue_capacity: 16,
            sdp_staging_cap: 4096,
            l2cap_mtu: 672,
            att_mtu: 185,
            reset_settle: Duration::from_millis(20),
        }
    }
}

/// System-wide settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlobalConfig {
    pub system_cfg: u8,
    pub multitap_cfg: u8,
    pub inquiry_mode: u8,
    pub banksel: u8,
}

impl GlobalConfig {
    pub const LEN: usize = 4;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        [
            self.system_cfg,
            self.multitap_cfg,
            self.inquiry_mode,
            self.banksel,
        ]
    }

    /// Missing trailing bytes keep their current value.
    pub fn update_from(&mut self, data: &[u8]) {
        let mut bytes = self.to_bytes();
        let len = data.len().min(Self::LEN);
        bytes[..len].copy_from_slice(&data[..len]);
        *self = Self {
            system_cfg: bytes[0],
            multitap_cfg: bytes[1],
            inquiry_mode: bytes[2],
            banksel: bytes[3],
        };
    }
}

/// Per wired port settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputConfig {
    pub dev_mode: u8,
    pub acc_mode: u8,
}

impl OutputConfig {
    pub const LEN: usize = 2;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        [self.dev_mode, self.acc_mode]
    }

    pub fn update_from(&mut self, data: &[u8]) {
        if let Some(v) = data.first() {
            self.dev_mode = *v;
        }
        if let Some(v) = data.get(1) {
            self.acc_mode = *v;
        }
    }
}

/// One source-to-destination mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapEntry {
    pub src: u8,
    pub dst: u8,
    pub dst_id: u8,
    pub perc_max: u8,
    pub perc_threshold: u8,
    pub perc_deadzone: u8,
    pub turbo: u8,
    pub algo: u8,
}

impl MapEntry {
    pub const LEN: usize = 8;

    fn to_bytes(self) -> [u8; Self::LEN] {
        [
            self.src,
            self.dst,
            self.dst_id,
            self.perc_max,
            self.perc_threshold,
            self.perc_deadzone,
            self.turbo,
            self.algo,
        ]
    }

    fn from_bytes(b: &[u8; Self::LEN]) -> Self {
        Self {
            src: b[0],
            dst: b[1],
            dst_id: b[2],
            perc_max: b[3],
            perc_threshold: b[4],
            perc_deadzone: b[5],
            turbo: b[6],
            algo: b[7],
        }
    }
}

/// Per wireless input mapping table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputConfig {
    pub bt_dev_id: u8,
    pub bt_subdev_id: u8,
    pub map_size: u8,
    pub map: [MapEntry; MAX_MAPPINGS],
}

impl InputConfig {
    pub const LEN: usize = 3 + MAX_MAPPINGS * MapEntry::LEN;

    fn with_identity_map(index: usize) -> Self {
        let mut map = [MapEntry::default(); MAX_MAPPINGS];
        for (i, entry) in map.iter_mut().take(DEFAULT_MAP_SIZE).enumerate() {
            *entry = MapEntry {
                src: i as u8,
                dst: i as u8,
                dst_id: index as u8,
                perc_max: 100,
                perc_threshold: 50,
                perc_deadzone: 135,
                turbo: 0,
                algo: 0,
            };
        }
        Self {
            bt_dev_id: 0,
            bt_subdev_id: 0,
            map_size: DEFAULT_MAP_SIZE as u8,
            map,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.push(self.bt_dev_id);
        out.push(self.bt_subdev_id);
        out.push(self.map_size);
        for entry in &self.map {
            out.extend_from_slice(&entry.to_bytes());
        }
        out
    }

    fn from_cursor(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        let bt_dev_id = cursor.read_u8()?;
        let bt_subdev_id = cursor.read_u8()?;
        let map_size = cursor.read_u8()?.min(MAX_MAPPINGS as u8);
        let mut map = [MapEntry::default(); MAX_MAPPINGS];
        for entry in map.iter_mut() {
            let mut raw = [0u8; MapEntry::LEN];
            cursor.read_exact(&mut raw)?;
            *entry = MapEntry::from_bytes(&raw);
        }
        Ok(Self {
            bt_dev_id,
            bt_subdev_id,
            map_size,
            map,
        })
    }

    /// Overwrites part of the serialized form starting at `offset`; bytes
    /// past the end are dropped. Returns the number of bytes applied.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> usize {
        let mut bytes = self.to_bytes();
        if offset >= bytes.len() {
            return 0;
        }
        let len = data.len().min(bytes.len() - offset);
        bytes[offset..offset + len].copy_from_slice(&data[..len]);
        let mut cursor = Cursor::new(bytes.as_slice());
        if let Ok(updated) = Self::from_cursor(&mut cursor) {
            *self = updated;
        }
        len
    }
}

/// Complete persisted configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub global: GlobalConfig,
    pub outputs: [OutputConfig; MAX_OUTPUTS],
    pub inputs: Vec<InputConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            outputs: [OutputConfig::default(); MAX_OUTPUTS],
            inputs: (0..MAX_INPUTS).map(InputConfig::with_identity_map).collect(),
        }
    }
}

impl BridgeConfig {
    pub const LEN: usize =
        4 + 1 + GlobalConfig::LEN + MAX_OUTPUTS * OutputConfig::LEN + MAX_INPUTS * InputConfig::LEN;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        let _ = out.write_u32::<LittleEndian>(CONFIG_MAGIC);
        out.push(CONFIG_VERSION);
        out.extend_from_slice(&self.global.to_bytes());
        for output in &self.outputs {
            out.extend_from_slice(&output.to_bytes());
        }
        for input in &self.inputs {
            out.extend_from_slice(&input.to_bytes());
        }
        out
    }

    pub fn from_bytes(data: &[u8]) -> ConfigResult<Self> {
        let truncated = |_| ConfigError::Truncated(data.len());
        let mut cursor = Cursor::new(data);

        let magic = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        if magic != CONFIG_MAGIC {
            return Err(ConfigError::BadMagic(magic));
        }
        let version = cursor.read_u8().map_err(truncated)?;
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let mut global = [0u8; GlobalConfig::LEN];
        cursor.read_exact(&mut global).map_err(truncated)?;
        let mut config = BridgeConfig::default();
        config.global.update_from(&global);

        for output in config.outputs.iter_mut() {
            let mut raw = [0u8; OutputConfig::LEN];
            cursor.read_exact(&mut raw).map_err(truncated)?;
            output.update_from(&raw);
        }
        for input in config.inputs.iter_mut() {
            *input = InputConfig::from_cursor(&mut cursor).map_err(truncated)?;
        }
        Ok(config)
    }

    /// Loads the stored blob, falling back to (and writing back) defaults
    /// when it is missing or invalid.
    pub fn load(storage: &dyn Storage) -> Self {
        match storage.read(CONFIG_FILE) {
            Ok(Some(data)) => match Self::from_bytes(&data) {
                Ok(config) => return config,
                Err(e) => warn!("stored configuration rejected: {}", e),
            },
            Ok(None) => {}
            Err(e) => warn!("failed to read configuration: {}", e),
        }
        info!("using default configuration");
        let config = Self::default();
        config.save(storage);
        config
    }

    /// Writes the whole blob; failures are logged, memory stays authoritative.
    pub fn save(&self, storage: &dyn Storage) {
        if let Err(e) = self.try_save(storage) {
            warn!("configuration not persisted: {}", e);
        }
    }

    pub fn try_save(&self, storage: &dyn Storage) -> ConfigResult<()> {
        storage.write(CONFIG_FILE, &self.to_bytes())?;
        Ok(())
    }
}
