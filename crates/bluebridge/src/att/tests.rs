use super::table::*;
use super::*;
use crate::config::{BridgeConfig, InputConfig, CONFIG_FILE, MAX_OUTPUTS};
use crate::gap::BdAddr;
use crate::keystore::KeyStore;
use crate::storage::{MemoryStorage, Storage};
use crate::testutil::{peer_addr, MockPlatform};
use crate::uuid::Uuid;
use std::sync::Arc;

struct Fixture {
    server: AttServer,
    att: AttSession,
    config: BridgeConfig,
    storage: Arc<MemoryStorage>,
    keys: KeyStore,
    platform: MockPlatform,
}

impl Fixture {
    fn new() -> Self {
        let storage = Arc::new(MemoryStorage::new());
        Self {
            server: AttServer::new("BlueBridge", 185),
            att: AttSession::default(),
            config: BridgeConfig::default(),
            keys: KeyStore::load(storage.clone()),
            storage,
            platform: MockPlatform::new(256, &["a.mcd", "b.mcd"]),
        }
    }

    fn req(&mut self, pdu: &[u8]) -> Option<Vec<u8>> {
        let mut ctx = AttContext {
            config: &mut self.config,
            storage: &*self.storage,
            keys: &mut self.keys,
            platform: &self.platform,
            local_addr: BdAddr::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]),
        };
        self.server.handle_att_pdu(&mut self.att, &mut ctx, pdu)
    }

    fn write(&mut self, handle: u16, value: &[u8]) -> Vec<u8> {
        let mut pdu = vec![ATT_WRITE_REQ];
        pdu.extend_from_slice(&handle.to_le_bytes());
        pdu.extend_from_slice(value);
        self.req(&pdu).unwrap()
    }

    fn read(&mut self, handle: u16) -> Vec<u8> {
        let mut pdu = vec![ATT_READ_REQ];
        pdu.extend_from_slice(&handle.to_le_bytes());
        self.req(&pdu).unwrap()
    }

    fn read_blob(&mut self, handle: u16, offset: u16) -> Vec<u8> {
        let mut pdu = vec![ATT_READ_BLOB_REQ];
        pdu.extend_from_slice(&handle.to_le_bytes());
        pdu.extend_from_slice(&offset.to_le_bytes());
        self.req(&pdu).unwrap()
    }

    fn prepare(&mut self, handle: u16, offset: u16, value: &[u8]) -> Vec<u8> {
        let mut pdu = vec![ATT_PREPARE_WRITE_REQ];
        pdu.extend_from_slice(&handle.to_le_bytes());
        pdu.extend_from_slice(&offset.to_le_bytes());
        pdu.extend_from_slice(value);
        self.req(&pdu).unwrap()
    }
}

#[test]
fn test_table_layout() {
    let table = AttributeTable::new("BlueBridge");
    assert_eq!(table.last_handle(), CMD_HANDLE);
    assert_eq!(table.get(0x0003).unwrap().value, AttrValue::Fixed(b"BlueBridge".to_vec()));
    assert_eq!(
        table.get(BRIDGE_SERVICE_HANDLE).unwrap().value,
        AttrValue::Fixed(Uuid::bridge(0).to_att_bytes())
    );
    assert_eq!(
        table.get(BATTERY_LEVEL_HANDLE).unwrap().value,
        AttrValue::Dynamic(Resource::BatteryLevel)
    );
    assert_eq!(
        table.get(SERVICE_CHANGED_CCCD_HANDLE).unwrap().value,
        AttrValue::Dynamic(Resource::ServiceChangedCccd)
    );
    assert_eq!(table.get(IN_DATA_HANDLE).unwrap().attr_type, Uuid::bridge(6));
    assert_eq!(
        table.get(MC_CTRL_HANDLE).unwrap().value,
        AttrValue::Dynamic(Resource::McControl)
    );
    assert_eq!(table.group_end(0x0001), 0x0005);
    assert_eq!(table.group_end(BRIDGE_SERVICE_HANDLE), CMD_HANDLE);
    assert!(table.get(0).is_none());
}

#[test]
fn test_exchange_mtu() {
    let mut f = Fixture::new();
    assert_eq!(f.req(&[0x02, 0x05, 0x02]).unwrap(), vec![0x03, 0xB9, 0x00]);
    assert_eq!(f.att.mtu, 185);

    assert_eq!(f.req(&[0x02, 0x10, 0x00]).unwrap(), vec![0x03, 0xB9, 0x00]);
    assert_eq!(f.att.mtu, ATT_DEFAULT_MTU);
}

#[test]
fn test_primary_service_discovery() {
    let mut f = Fixture::new();
    let rsp = f.req(&[0x10, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x28]).unwrap();
    assert_eq!(
        rsp,
        vec![
            0x11, 0x06, //
            0x01, 0x00, 0x05, 0x00, 0x00, 0x18, //
            0x06, 0x00, 0x09, 0x00, 0x01, 0x18, //
            0x0A, 0x00, 0x0C, 0x00, 0x0F, 0x18,
        ]
    );

    let rsp = f.req(&[0x10, 0x0D, 0x00, 0xFF, 0xFF, 0x00, 0x28]).unwrap();
    let mut expected = vec![0x11, 0x14, 0x0D, 0x00, 0x25, 0x00];
    expected.extend_from_slice(&Uuid::bridge(0).to_att_bytes());
    assert_eq!(rsp, expected);

    let rsp = f.req(&[0x10, 0x26, 0x00, 0xFF, 0xFF, 0x00, 0x28]).unwrap();
    assert_eq!(rsp, vec![0x01, 0x10, 0x26, 0x00, 0x0A]);

    let rsp = f.req(&[0x10, 0x01, 0x00, 0xFF, 0xFF, 0x01, 0x28]).unwrap();
    assert_eq!(rsp, vec![0x01, 0x10, 0x01, 0x00, 0x10]);
}

#[test]
fn test_characteristic_and_descriptor_discovery() {
    let mut f = Fixture::new();
    let rsp = f.req(&[0x08, 0x01, 0x00, 0x05, 0x00, 0x03, 0x28]).unwrap();
    assert_eq!(
        rsp,
        vec![
            0x09, 0x07, //
            0x02, 0x00, 0x02, 0x03, 0x00, 0x00, 0x2A, //
            0x04, 0x00, 0x02, 0x05, 0x00, 0x01, 0x2A,
        ]
    );

    let rsp = f.req(&[0x04, 0x01, 0x00, 0x05, 0x00]).unwrap();
    assert_eq!(
        rsp,
        vec![
            0x05, 0x01, //
            0x01, 0x00, 0x00, 0x28, //
            0x02, 0x00, 0x03, 0x28, //
            0x03, 0x00, 0x00, 0x2A, //
            0x04, 0x00, 0x03, 0x28, //
            0x05, 0x00, 0x01, 0x2A,
        ]
    );

    let rsp = f.req(&[0x04, 0x0F, 0x00, 0x0F, 0x00]).unwrap();
    let mut expected = vec![0x05, 0x02, 0x0F, 0x00];
    expected.extend_from_slice(&Uuid::bridge(1).to_att_bytes());
    assert_eq!(rsp, expected);

    // inverted range
    let rsp = f.req(&[0x04, 0x05, 0x00, 0x01, 0x00]).unwrap();
    assert_eq!(rsp, vec![0x01, 0x04, 0x05, 0x00, 0x01]);
}

#[test]
fn test_read_blob_walks_input_config() {
    let mut f = Fixture::new();
    f.config.inputs[2].bt_dev_id = 9;
    assert_eq!(f.write(IN_CTRL_HANDLE, &[2, 0x00, 0x00]), vec![ATT_WRITE_RSP]);

    let first = f.read(IN_DATA_HANDLE);
    assert_eq!(first[0], ATT_READ_RSP);
    assert_eq!(first.len() - 1, 22);

    let mut value = first[1..].to_vec();
    let mut chunks = 1;
    loop {
        let rsp = f.read_blob(IN_DATA_HANDLE, value.len() as u16);
        assert_eq!(rsp[0], ATT_READ_BLOB_RSP);
        let chunk = &rsp[1..];
        value.extend_from_slice(chunk);
        chunks += 1;
        if chunk.len() < 22 {
            assert_eq!(chunk.len(), 15);
            break;
        }
    }
    assert_eq!(chunks, 47);
    assert_eq!(value.len(), InputConfig::LEN);
    assert_eq!(value, f.config.inputs[2].to_bytes());

    assert_eq!(f.read_blob(IN_DATA_HANDLE, InputConfig::LEN as u16), vec![ATT_READ_BLOB_RSP]);
    assert_eq!(
        f.read_blob(IN_DATA_HANDLE, InputConfig::LEN as u16 + 1),
        vec![0x01, 0x0C, 0x19, 0x00, 0x07]
    );
}

#[test]
fn test_input_window_offset() {
    let mut f = Fixture::new();
    f.write(IN_CTRL_HANDLE, &[1, 0x00, 0x04]);
    assert_eq!(f.read(IN_CTRL_HANDLE), vec![ATT_READ_RSP, 1, 0x00, 0x04]);

    let tail = f.config.inputs[1].to_bytes()[1024..].to_vec();
    let rsp = f.read(IN_DATA_HANDLE);
    assert_eq!(&rsp[1..], tail.as_slice());

    // index past the last input is clamped
    f.write(IN_CTRL_HANDLE, &[40]);
    assert_eq!(f.att.in_index, 6);
    assert_eq!(f.att.in_offset, 0);
}

#[test]
fn test_config_write_persists() {
    let mut f = Fixture::new();
    assert_eq!(f.write(GLOBAL_CFG_HANDLE, &[1, 2, 3, 4]), vec![ATT_WRITE_RSP]);
    assert_eq!(f.config.global.to_bytes(), [1, 2, 3, 4]);

    let stored = f.storage.read(CONFIG_FILE).unwrap().unwrap();
    assert_eq!(BridgeConfig::from_bytes(&stored).unwrap(), f.config);
    assert_eq!(f.read(GLOBAL_CFG_HANDLE), vec![ATT_READ_RSP, 1, 2, 3, 4]);

    f.write(OUT_CTRL_HANDLE, &[0x20]);
    assert_eq!(f.att.out_index, MAX_OUTPUTS - 1);
    assert_eq!(f.read(OUT_CTRL_HANDLE), vec![ATT_READ_RSP, 11]);
    f.write(OUT_DATA_HANDLE, &[7, 8]);
    assert_eq!(f.config.outputs[11].dev_mode, 7);
    assert_eq!(f.config.outputs[11].acc_mode, 8);
}

#[test]
fn test_long_write_through_prepare_queue() {
    let mut f = Fixture::new();
    f.write(IN_CTRL_HANDLE, &[1]);
    let before = f.config.inputs[1].clone();

    let rsp = f.prepare(IN_DATA_HANDLE, 3, &[0x5A; 18]);
    assert_eq!(rsp[..5], [ATT_PREPARE_WRITE_RSP, 0x19, 0x00, 0x03, 0x00]);
    assert_eq!(&rsp[5..], &[0x5A; 18]);
    f.prepare(IN_DATA_HANDLE, 21, &[0x5A; 18]);
    assert_eq!(f.config.inputs[1], before);
    assert_eq!(f.att.prepared_writes(), 2);

    assert_eq!(f.req(&[0x18, 0x01]).unwrap(), vec![ATT_EXECUTE_WRITE_RSP]);
    assert_eq!(f.att.prepared_writes(), 0);
    let bytes = f.config.inputs[1].to_bytes();
    assert!(bytes[3..39].iter().all(|b| *b == 0x5A));
    assert_eq!(bytes[..3], before.to_bytes()[..3]);
}

#[test]
fn test_cancelled_and_overflowing_prepare_queue() {
    let mut f = Fixture::new();
    let before = f.config.clone();
    f.prepare(GLOBAL_CFG_HANDLE, 0, &[9, 9]);
    assert_eq!(f.req(&[0x18, 0x00]).unwrap(), vec![ATT_EXECUTE_WRITE_RSP]);
    assert_eq!(f.config, before);

    for i in 0..16 {
        let rsp = f.prepare(IN_DATA_HANDLE, i * 4, &[1, 2, 3, 4]);
        assert_eq!(rsp[0], ATT_PREPARE_WRITE_RSP);
    }
    assert_eq!(
        f.prepare(IN_DATA_HANDLE, 64, &[1]),
        vec![0x01, 0x16, 0x19, 0x00, 0x09]
    );

    // read-only targets are refused at prepare time
    assert_eq!(
        f.prepare(API_VERSION_HANDLE, 0, &[1]),
        vec![0x01, 0x16, 0x0F, 0x00, 0x03]
    );
}

#[test]
fn test_command_characteristic() {
    let mut f = Fixture::new();
    assert_eq!(f.write(CMD_HANDLE, &[0x20]), vec![ATT_WRITE_RSP]);
    assert_eq!(f.read(CMD_HANDLE), [&[ATT_READ_RSP][..], b"a.mcd"].concat());
    assert_eq!(f.read(CMD_HANDLE), [&[ATT_READ_RSP][..], b"b.mcd"].concat());
    assert_eq!(f.read(CMD_HANDLE), vec![ATT_READ_RSP]);

    // unknown commands are still acknowledged
    assert_eq!(f.write(CMD_HANDLE, &[0x77]), vec![ATT_WRITE_RSP]);
    assert_eq!(f.write(CMD_HANDLE, &[0x03]), vec![ATT_WRITE_RSP]);
    assert_eq!(f.write(CMD_HANDLE, &[]), vec![0x01, 0x12, 0x25, 0x00, 0x0D]);
    assert_eq!(f.platform.calls(), vec!["dir_open", "sleep"]);
}

#[test]
fn test_factory_reset() {
    let mut f = Fixture::new();
    f.config.global.system_cfg = 5;
    f.keys.store_classic(&peer_addr(), &[7; 16]);

    assert_eq!(f.write(CMD_HANDLE, &[0x02]), vec![ATT_WRITE_RSP]);
    assert_eq!(f.config, BridgeConfig::default());
    assert!(f.keys.load_classic(&peer_addr()).is_none());
    assert_eq!(f.platform.calls(), vec!["factory_reset"]);
    let stored = f.storage.read(CONFIG_FILE).unwrap().unwrap();
    assert_eq!(BridgeConfig::from_bytes(&stored).unwrap(), BridgeConfig::default());
}

#[test]
fn test_ota_upload() {
    let mut f = Fixture::new();
    f.write(CMD_HANDLE, &[0x10]);
    assert_eq!(f.req(&[0x52, 0x1B, 0x00, 1, 2, 3]), None);
    assert_eq!(f.write(OTA_DATA_HANDLE, &[4, 5]), vec![ATT_WRITE_RSP]);
    f.write(CMD_HANDLE, &[0x11]);

    assert_eq!(*f.platform.ota.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    assert_eq!(f.platform.calls(), vec!["ota_begin", "ota_end"]);
    assert_eq!(f.read(OTA_DATA_HANDLE), vec![0x01, 0x0A, 0x1B, 0x00, 0x02]);
}

#[test]
fn test_memory_card_window() {
    let mut f = Fixture::new();
    assert_eq!(f.write(MC_CTRL_HANDLE, &[100, 0, 0, 0]), vec![ATT_WRITE_RSP]);
    assert_eq!(f.read(MC_CTRL_HANDLE), vec![ATT_READ_RSP, 100, 0, 0, 0]);

    let expected: Vec<u8> = (100u8..122).collect();
    assert_eq!(&f.read(MC_DATA_HANDLE)[1..], expected.as_slice());

    f.write(MC_DATA_HANDLE, &[0xFF, 0xFE]);
    assert_eq!(f.platform.card.lock().unwrap()[100..103], [0xFF, 0xFE, 102]);

    assert_eq!(&f.read_blob(MC_DATA_HANDLE, 150)[1..], &[250, 251, 252, 253, 254, 255]);
    assert_eq!(
        f.read_blob(MC_DATA_HANDLE, 200),
        vec![0x01, 0x0C, 0x23, 0x00, 0x07]
    );
    assert_eq!(f.write(MC_CTRL_HANDLE, &[1]), vec![0x01, 0x12, 0x21, 0x00, 0x0D]);
}

#[test]
fn test_static_and_platform_values() {
    let mut f = Fixture::new();
    assert_eq!(f.read(0x0003), [&[ATT_READ_RSP][..], b"BlueBridge"].concat());
    assert_eq!(f.read(BATTERY_LEVEL_HANDLE), vec![ATT_READ_RSP, 87]);
    assert_eq!(f.read(API_VERSION_HANDLE), vec![ATT_READ_RSP, 0x01]);
    assert_eq!(
        f.read(BD_ADDR_HANDLE),
        vec![ATT_READ_RSP, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]
    );
    assert_eq!(f.read(FW_NAME_HANDLE), [&[ATT_READ_RSP][..], b"bluebridge-test"].concat());

    assert_eq!(f.write(SERVICE_CHANGED_CCCD_HANDLE, &[0x02, 0x00]), vec![ATT_WRITE_RSP]);
    assert_eq!(f.att.service_changed_cccd, CCCD_INDICATE);
}

#[test]
fn test_error_responses() {
    let mut f = Fixture::new();
    assert_eq!(f.read(0x0099), vec![0x01, 0x0A, 0x99, 0x00, 0x01]);
    assert_eq!(f.read(0x0000), vec![0x01, 0x0A, 0x00, 0x00, 0x01]);
    assert_eq!(f.write(API_VERSION_HANDLE, &[5]), vec![0x01, 0x12, 0x0F, 0x00, 0x03]);
    assert_eq!(f.write(0x0003, b"x"), vec![0x01, 0x12, 0x03, 0x00, 0x03]);

    // find by type value is answered with not found
    let rsp = f.req(&[0x06, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x28, 0x00, 0x18]);
    assert_eq!(rsp.unwrap(), vec![0x01, 0x06, 0x01, 0x00, 0x0A]);

    // unknown request vs unknown command
    assert_eq!(f.req(&[0x20, 0x01]).unwrap(), vec![0x01, 0x20, 0x00, 0x00, 0x06]);
    assert_eq!(f.req(&[0x60, 0x01]), None);
    assert_eq!(f.req(&[0x52, 0x0F, 0x00, 0x01]), None);
    assert_eq!(f.req(&[0x1E]), None);
    assert_eq!(f.req(&[0x0A, 0x01]).unwrap(), vec![0x01, 0x0A, 0x00, 0x00, 0x04]);
    assert_eq!(f.req(&[]), None);
}
