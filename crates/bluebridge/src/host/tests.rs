use super::*;
use crate::config::HostConfig;
use crate::error::HciError;
use crate::gap::{AddressType, BdAddr, RemoteAddress};
use crate::hci::constants::*;
use crate::hci::HciCommand;
use crate::hid::DriverStep;
use crate::keystore::{KeyStore, MasterIdent};
use crate::l2cap::constants::*;
use crate::l2cap::{ConfigOptions, SignalingMessage};
use crate::smp::PairingState;
use crate::sdp::protocol::{SdpPacket, SDP_SERVICE_SEARCH_ATTR_RSP};
use crate::storage::MemoryStorage;
use crate::testutil::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

const HANDLE: u16 = 0x0040;
const LE_HANDLE: u16 = 0x0041;
const PAD_CLASS: u32 = 0x002508;
const PHONE_CLASS: u32 = 0x5A020C;

fn local_addr() -> BdAddr {
    BdAddr::new([0xA6, 0xA5, 0xA4, 0xA3, 0xA2, 0xA1])
}

fn config() -> HostConfig {
    HostConfig {
        reset_settle: Duration::ZERO,
        ..HostConfig::default()
    }
}

fn opcodes(commands: &[(u16, Vec<u8>)]) -> Vec<u16> {
    commands.iter().map(|(op, _)| *op).collect()
}

fn signals(frames: &[Vec<u8>]) -> Vec<SignalingMessage> {
    payloads_on(frames, L2CAP_SIGNALING_CID)
        .iter()
        .filter_map(|p| SignalingMessage::parse(p).ok())
        .collect()
}

fn answer_bringup(bringup: &mut Bringup, transport: &RecordingTransport, tx: &Sequencer, keys: &mut KeyStore) -> Vec<u16> {
    let mut sent_ops = Vec::new();
    for _ in 0..64 {
        let cmds = commands(&sent(transport, tx));
        if cmds.is_empty() {
            break;
        }
        for (op, _) in cmds {
            sent_ops.push(op);
            bringup.on_command_complete(op, HCI_SUCCESS, tx, keys).unwrap();
        }
    }
    sent_ops
}

fn empty_keys() -> KeyStore {
    KeyStore::load(Arc::new(MemoryStorage::new()))
}

#[test]
fn test_sequencer_one_frame_per_credit() {
    let (transport, tx) = sequencer();
    tx.send_command(&HciCommand::Reset).unwrap();
    tx.send_command(&HciCommand::ReadBdAddr).unwrap();
    assert!(transport.take().is_empty());
    assert_eq!(tx.pending(), 2);

    assert!(tx.on_controller_ready());
    let frames = transport.take();
    assert_eq!(opcodes(&commands(&frames)), vec![OP_RESET]);
    assert_eq!(tx.pending(), 1);

    assert!(tx.on_controller_ready());
    assert_eq!(opcodes(&commands(&transport.take())), vec![OP_READ_BD_ADDR]);
    assert!(!tx.on_controller_ready());

    // Unused credit is kept for the next frame
    tx.send_command(&HciCommand::Reset).unwrap();
    assert_eq!(transport.take().len(), 1);
}

#[test]
fn test_sequencer_queue_full() {
    let transport = Arc::new(RecordingTransport::default());
    let tx = Sequencer::new(transport.clone(), 2);
    tx.send_command(&HciCommand::Reset).unwrap();
    tx.send_command(&HciCommand::Reset).unwrap();
    assert!(matches!(
        tx.send_command(&HciCommand::Reset),
        Err(HciError::QueueFull(4))
    ));
    assert_eq!(tx.pending(), 2);
}

#[test]
fn test_sequencer_fragments_are_all_or_nothing() {
    let transport = Arc::new(RecordingTransport::default());
    let tx = Sequencer::new(transport.clone(), 2);
    tx.set_acl_mtu(8);
    // 24 byte L2CAP frame needs three fragments
    assert!(tx.send_l2cap(HANDLE, 0x0040, &[0x55; 20]).is_err());
    assert_eq!(tx.pending(), 0);

    tx.send_l2cap(HANDLE, 0x0040, &[0x55; 12]).unwrap();
    assert_eq!(tx.pending(), 2);
}

#[test]
fn test_sequencer_delay_holds_queue() {
    let (transport, tx) = sequencer();
    assert!(!tx.on_controller_ready());
    tx.enqueue_delay(Duration::from_secs(10)).unwrap();
    tx.send_command(&HciCommand::Reset).unwrap();
    tx.drain();
    assert!(transport.take().is_empty());

    assert!(tx.drain_at(Instant::now() + Duration::from_secs(11)));
    assert_eq!(opcodes(&commands(&transport.take())), vec![OP_RESET]);
}

#[test]
fn test_bringup_walks_table() {
    let config = config();
    let (transport, tx) = sequencer();
    let mut keys = empty_keys();
    let table = Bringup::table(&config);
    let expected = table
        .iter()
        .filter(|s| matches!(s, BringupStep::Command(_)))
        .count();
    let mut bringup = Bringup::new(table, 3);

    bringup.run_bringup_step(&tx, &mut keys).unwrap();
    let sent_ops = answer_bringup(&mut bringup, &transport, &tx, &mut keys);
    assert!(bringup.is_done());
    assert_eq!(sent_ops.len(), expected);
    assert_eq!(sent_ops.first(), Some(&OP_RESET));
    assert_eq!(sent_ops.last(), Some(&OP_LE_SET_ADVERTISING_ENABLE));
    assert_eq!(bringup.restarts(), 0);

    // Late completions are ignored once done
    assert_eq!(
        bringup
            .on_command_complete(OP_RESET, HCI_SUCCESS, &tx, &mut keys)
            .unwrap(),
        BringupProgress::Ignored
    );
}

#[test]
fn test_bringup_retries_then_restarts_once() {
    let (transport, tx) = sequencer();
    let mut keys = empty_keys();
    let mut bringup = Bringup::new(Bringup::table(&config()), 3);
    bringup.run_bringup_step(&tx, &mut keys).unwrap();
    sent(&transport, &tx);

    assert_eq!(
        bringup.on_command_complete(OP_RESET, HCI_SUCCESS, &tx, &mut keys).unwrap(),
        BringupProgress::Advanced
    );
    assert_eq!(opcodes(&commands(&sent(&transport, &tx))), vec![OP_READ_BUFFER_SIZE]);

    for _ in 0..2 {
        assert_eq!(
            bringup.on_command_complete(OP_READ_BUFFER_SIZE, 0x0C, &tx, &mut keys).unwrap(),
            BringupProgress::Retried
        );
        assert_eq!(opcodes(&commands(&sent(&transport, &tx))), vec![OP_READ_BUFFER_SIZE]);
    }
    assert_eq!(
        bringup.on_command_complete(OP_READ_BUFFER_SIZE, 0x0C, &tx, &mut keys).unwrap(),
        BringupProgress::Restarted
    );
    assert_eq!(bringup.restarts(), 1);
    assert_eq!(bringup.current_step(), 0);
    assert_eq!(opcodes(&commands(&sent(&transport, &tx))), vec![OP_RESET]);

    // A stale answer for the abandoned step changes nothing
    assert_eq!(
        bringup.on_command_complete(OP_READ_BUFFER_SIZE, HCI_SUCCESS, &tx, &mut keys).unwrap(),
        BringupProgress::Ignored
    );

    bringup.on_command_complete(OP_RESET, HCI_SUCCESS, &tx, &mut keys).unwrap();
    answer_bringup(&mut bringup, &transport, &tx, &mut keys);
    assert!(bringup.is_done());
    assert_eq!(bringup.restarts(), 1);
}

#[test]
fn test_bringup_loads_accept_list() {
    let (transport, tx) = sequencer();
    let mut keys = empty_keys();
    for i in 1..=2u8 {
        let remote = RemoteAddress::le(BdAddr::new([i; 6]), AddressType::Public);
        keys.store_le_ltk(&remote, &[i; 16]);
    }
    let mut bringup = Bringup::new(Bringup::table(&config()), 3);
    bringup.run_bringup_step(&tx, &mut keys).unwrap();
    let sent_ops = answer_bringup(&mut bringup, &transport, &tx, &mut keys);

    let add = HciCommand::LeAddDeviceToAcceptList {
        addr_type: AddressType::Public,
        addr: BdAddr::new([1; 6]),
    }
    .opcode();
    assert_eq!(sent_ops.iter().filter(|op| **op == add).count(), 2);
    assert!(bringup.is_done());
}

#[test]
fn test_mailbox_fifo_and_retract() {
    let mailbox = OracleMailbox::new();
    mailbox.push(SessionId(0), OracleOp::RandLow);
    mailbox.push(SessionId(1), OracleOp::RandLow);
    mailbox.push(SessionId(0), OracleOp::RandHigh);

    assert!(!mailbox.retract(SessionId(1), OracleOp::RandLow));
    assert!(mailbox.retract(SessionId(0), OracleOp::RandHigh));
    assert_eq!(mailbox.len(), 2);
    assert_eq!(mailbox.pop(), Some((Some(SessionId(0)), OracleOp::RandLow)));
    assert_eq!(mailbox.pop(), Some((Some(SessionId(1)), OracleOp::RandLow)));
    assert_eq!(mailbox.pop(), None);
    assert!(mailbox.is_empty());
}

#[test]
fn test_mailbox_discard_keeps_order() {
    let mailbox = OracleMailbox::new();
    mailbox.push(SessionId(0), OracleOp::ConfirmStage1);
    mailbox.push(SessionId(1), OracleOp::RandLow);
    mailbox.push(SessionId(0), OracleOp::RandLow);
    assert_eq!(mailbox.discard(SessionId(0)), 2);
    assert_eq!(mailbox.len(), 3);
    assert!(!mailbox.retract(SessionId(0), OracleOp::RandLow));

    assert_eq!(mailbox.pop(), Some((None, OracleOp::ConfirmStage1)));
    assert_eq!(mailbox.pop(), Some((Some(SessionId(1)), OracleOp::RandLow)));
    assert_eq!(mailbox.pop(), Some((None, OracleOp::RandLow)));
}

#[test]
fn test_pool_allocate_and_reset() {
    let mut pool = SessionPool::new();
    let ids: Vec<_> = std::iter::from_fn(|| pool.allocate()).collect();
    assert_eq!(ids.len(), MAX_SESSIONS);
    assert_eq!(ids[0], SessionId(0));
    assert!(!pool.has_free_slot());

    let session = pool.get_mut(SessionId(3)).unwrap();
    session.remote = RemoteAddress::classic(peer_addr());
    session.acl_handle = Some(HANDLE);
    assert_eq!(pool.find_by_address(&peer_addr()), Some(SessionId(3)));
    assert_eq!(pool.find_by_handle(HANDLE), Some(SessionId(3)));

    pool.reset(SessionId(3));
    assert_eq!(pool.find_by_handle(HANDLE), None);
    assert_eq!(pool.active_count(), MAX_SESSIONS - 1);
    assert_eq!(pool.allocate(), Some(SessionId(3)));
    assert_eq!(pool.get(SessionId(3)).unwrap().id, SessionId(3));
}

#[test]
fn test_session_hid_state_and_identifiers() {
    let mut session = DeviceSession::new(SessionId(2));
    session.advance_hid_state(2);
    session.retry_count = 2;
    session.advance_hid_state(1);
    assert_eq!(session.hid_state(), 2);
    assert_eq!(session.retry_count, 2);
    session.advance_hid_state(3);
    assert_eq!(session.retry_count, 0);

    session.reset_hid_state();
    assert_eq!(session.hid_state(), 0);

    for _ in 0..300 {
        assert_ne!(session.next_signal_id(), 0);
    }
}

#[test]
fn test_feedback_queue_drops_when_full() {
    let queue = FeedbackQueue::new(2);
    assert!(queue.try_push(SessionId(0), &[1]));
    assert!(queue.try_push(SessionId(1), &[2]));
    assert!(!queue.try_push(SessionId(0), &[3]));
    assert_eq!(queue.len(), 2);

    queue.discard(SessionId(0));
    assert_eq!(queue.pop().map(|f| f.report), Some(vec![2]));
    assert!(queue.is_empty());
}

struct Rig {
    transport: Arc<RecordingTransport>,
    host: Host,
    mocks: Mocks,
}

impl Rig {
    fn new(config: HostConfig, driver: MockDriver) -> Self {
        Self::with_storage(config, driver, Arc::new(MemoryStorage::new()))
    }

    fn with_storage(config: HostConfig, driver: MockDriver, storage: Arc<MemoryStorage>) -> Self {
        let transport = Arc::new(RecordingTransport::default());
        let mocks = Mocks::new(driver);
        let host = Host::new(config, transport.clone(), storage, mocks.collaborators());
        Self {
            transport,
            host,
            mocks,
        }
    }

    fn feed(&mut self, frame: Vec<u8>) {
        self.host.on_controller_frame(&frame);
    }

    fn sent(&self) -> Vec<Vec<u8>> {
        sent(&self.transport, self.host.sequencer())
    }

    fn commands(&self) -> Vec<(u16, Vec<u8>)> {
        commands(&self.sent())
    }

    fn session(&self, id: u8) -> &DeviceSession {
        self.host.pool().get(SessionId(id)).unwrap()
    }

    /// Answers every bring-up command; returns what was sent after it
    fn bring_up(&mut self) -> Vec<(u16, Vec<u8>)> {
        self.host.start().unwrap();
        for _ in 0..64 {
            let cmds = self.commands();
            if self.host.is_ready() {
                return cmds;
            }
            for (op, _) in cmds {
                let ret = match op {
                    OP_READ_BUFFER_SIZE => vec![0x00, 0x00, 0x01, 0x40, 0x08, 0x00, 0x00, 0x00],
                    OP_READ_BD_ADDR => [&[0x00][..], &local_addr().bytes].concat(),
                    _ => vec![0x00],
                };
                self.feed(command_complete(op, &ret));
            }
        }
        panic!("bring-up did not finish");
    }

    /// Classic pad found by inquiry, authenticated and encrypted
    fn classic_link(&mut self) {
        self.bring_up();
        self.feed(inquiry_result(peer_addr(), PAD_CLASS));
        self.feed(conn_complete(HCI_SUCCESS, HANDLE, peer_addr()));
        self.feed(handle_status(EVT_AUTH_COMPLETE, HCI_SUCCESS, HANDLE, None));
        self.feed(handle_status(EVT_ENCRYPTION_CHANGE, HCI_SUCCESS, HANDLE, Some(1)));
    }

    /// Peer accepts and configures the channel we asked for
    fn open_channel(&mut self, local_cid: u16, remote_cid: u16) {
        let messages = [
            SignalingMessage::ConnectionResponse {
                identifier: 0x10,
                destination_cid: remote_cid,
                source_cid: local_cid,
                result: L2CAP_CR_SUCCESS,
                status: 0,
            },
            SignalingMessage::ConfigureRequest {
                identifier: 0x11,
                destination_cid: local_cid,
                flags: 0,
                options: ConfigOptions::default(),
            },
            SignalingMessage::ConfigureResponse {
                identifier: 0x12,
                source_cid: local_cid,
                flags: 0,
                result: L2CAP_CONF_SUCCESS,
                options: ConfigOptions::default(),
            },
        ];
        for message in messages {
            self.feed(acl(HANDLE, L2CAP_SIGNALING_CID, &message.serialize()));
        }
    }

    /// Classic link with both HID channels open
    fn classic_hid(&mut self) {
        self.classic_link();
        self.open_channel(0x0060, 0x0041);
        self.open_channel(0x0070, 0x0042);
    }
}

fn inquiry_result(addr: BdAddr, class: u32) -> Vec<u8> {
    let mut params = vec![1];
    params.extend_from_slice(&addr.bytes);
    params.extend_from_slice(&[0x01, 0x00]);
    params.extend_from_slice(&class.to_le_bytes()[..3]);
    params.extend_from_slice(&0x1234u16.to_le_bytes());
    params.push(0xC8);
    event(EVT_INQUIRY_RESULT_WITH_RSSI, &params)
}

fn conn_complete(status: u8, handle: u16, addr: BdAddr) -> Vec<u8> {
    let mut params = vec![status];
    params.extend_from_slice(&handle.to_le_bytes());
    params.extend_from_slice(&addr.bytes);
    params.extend_from_slice(&[0x01, 0x00]);
    event(EVT_CONN_COMPLETE, &params)
}

fn le_conn_complete(handle: u16, role: u8, addr: BdAddr) -> Vec<u8> {
    let mut params = vec![HCI_SUCCESS];
    params.extend_from_slice(&handle.to_le_bytes());
    params.push(role);
    params.push(0x00);
    params.extend_from_slice(&addr.bytes);
    params.extend_from_slice(&[0x06, 0x00, 0x00, 0x00, 0xC8, 0x00, 0x00]);
    le_meta(EVT_LE_CONN_COMPLETE, &params)
}

fn adv_report(addr: BdAddr, data: &[u8]) -> Vec<u8> {
    let mut params = vec![1, 0x00, 0x00];
    params.extend_from_slice(&addr.bytes);
    params.push(data.len() as u8);
    params.extend_from_slice(data);
    params.push(0xC0);
    le_meta(EVT_LE_ADVERTISING_REPORT, &params)
}

fn disconnection(handle: u16) -> Vec<u8> {
    let mut params = vec![HCI_SUCCESS];
    params.extend_from_slice(&handle.to_le_bytes());
    params.push(HCI_REMOTE_USER_TERMINATED);
    event(EVT_DISCONN_COMPLETE, &params)
}

const DESCRIPTOR: [u8; 6] = [0x05, 0x01, 0x09, 0x05, 0xA1, 0x01];

fn sdp_response(tid: u16) -> Vec<u8> {
    let mut inner = vec![0x08, 0x22, 0x25, DESCRIPTOR.len() as u8];
    inner.extend_from_slice(&DESCRIPTOR);
    let mut value = vec![0x35, inner.len() as u8 + 2, 0x35, inner.len() as u8];
    value.extend(inner);
    let mut record = vec![0x09, 0x02, 0x06];
    record.extend(value);
    let mut lists = vec![0x35, record.len() as u8 + 2, 0x35, record.len() as u8];
    lists.extend(record);

    let mut params = (lists.len() as u16).to_be_bytes().to_vec();
    params.extend(lists);
    params.push(0);
    SdpPacket::new(SDP_SERVICE_SEARCH_ATTR_RSP, tid, params).serialize()
}

#[test]
fn test_bringup_then_discovery() {
    let mut rig = Rig::new(config(), MockDriver::default());
    let after = rig.bring_up();
    assert_eq!(rig.host.local_addr(), local_addr());
    assert_eq!(rig.host.sequencer().acl_mtu(), 256);
    assert_eq!(opcodes(&after), vec![OP_INQUIRY, OP_LE_SET_SCAN_ENABLE]);
    assert_eq!(after[0].1, vec![0x33, 0x8B, 0x9E, 0x08, 0x00]);
    assert_eq!(after[1].1, vec![0x01, 0x01]);

    rig.host.housekeeping();
    assert!(rig.commands().is_empty());

    rig.feed(event(EVT_INQUIRY_COMPLETE, &[HCI_SUCCESS]));
    rig.host.housekeeping();
    assert_eq!(opcodes(&rig.commands()), vec![OP_INQUIRY]);
}

#[test]
fn test_inquiry_pages_peripherals_only() {
    let mut rig = Rig::new(config(), MockDriver::default());
    rig.bring_up();

    rig.feed(inquiry_result(BdAddr::new([7; 6]), PHONE_CLASS));
    assert!(rig.commands().is_empty());
    assert_eq!(rig.host.pool().active_count(), 0);

    rig.feed(inquiry_result(peer_addr(), PAD_CLASS));
    let cmds = rig.commands();
    assert_eq!(opcodes(&cmds), vec![OP_INQUIRY_CANCEL, OP_CREATE_CONNECTION]);
    assert_eq!(&cmds[1].1[..6], &peer_addr().bytes);
    assert_eq!(&cmds[1].1[10..12], &[0x34, 0x92]);
    let session = rig.session(0);
    assert!(session.flags.contains(ConnFlags::DEVICE_FOUND));
    assert_eq!(session.class_of_device, PAD_CLASS);

    // One page at a time
    rig.feed(inquiry_result(BdAddr::new([8; 6]), PAD_CLASS));
    assert!(rig.commands().is_empty());
}

#[test]
fn test_page_failure_retries_then_frees_slot() {
    let mut rig = Rig::new(config(), MockDriver::default());
    rig.bring_up();
    rig.feed(inquiry_result(peer_addr(), PAD_CLASS));
    rig.sent();

    for _ in 0..3 {
        rig.feed(conn_complete(0x04, 0, peer_addr()));
        assert_eq!(opcodes(&rig.commands()), vec![OP_CREATE_CONNECTION]);
    }
    rig.feed(conn_complete(0x04, 0, peer_addr()));
    assert!(rig.commands().is_empty());
    assert_eq!(rig.host.pool().active_count(), 0);
}

#[test]
fn test_rejected_page_frees_slot() {
    let mut rig = Rig::new(config(), MockDriver::default());
    rig.bring_up();
    rig.feed(inquiry_result(peer_addr(), PAD_CLASS));
    rig.sent();
    assert_eq!(rig.host.pool().active_count(), 1);

    rig.feed(command_status(0x0C, OP_CREATE_CONNECTION));
    assert_eq!(rig.host.pool().active_count(), 0);
    assert!(rig.host.is_ready());
}

#[test]
fn test_classic_security_handshake() {
    let pad = peer_addr();
    let mut rig = Rig::new(config(), MockDriver::default());
    rig.bring_up();
    rig.feed(inquiry_result(pad, PAD_CLASS));
    rig.sent();

    rig.feed(conn_complete(HCI_SUCCESS, HANDLE, pad));
    assert_eq!(
        rig.commands(),
        vec![(OP_AUTHENTICATION_REQUESTED, HANDLE.to_le_bytes().to_vec())]
    );
    assert_eq!(rig.session(0).acl_handle, Some(HANDLE));

    rig.feed(event(EVT_LINK_KEY_REQUEST, &pad.bytes));
    assert_eq!(
        rig.commands(),
        vec![(OP_LINK_KEY_REQUEST_NEGATIVE_REPLY, pad.bytes.to_vec())]
    );

    rig.feed(event(EVT_IO_CAPABILITY_REQUEST, &pad.bytes));
    let cmds = rig.commands();
    assert_eq!(cmds[0].0, OP_IO_CAPABILITY_REQUEST_REPLY);
    assert_eq!(&cmds[0].1[6..], &[0x03, 0x00, 0x00]);

    rig.feed(event(
        EVT_USER_CONFIRMATION_REQUEST,
        &[&pad.bytes[..], &[0x40, 0xE2, 0x01, 0x00]].concat(),
    ));
    assert_eq!(
        rig.commands(),
        vec![(OP_USER_CONFIRMATION_REQUEST_REPLY, pad.bytes.to_vec())]
    );

    let key = [0x5A; 16];
    rig.feed(event(
        EVT_LINK_KEY_NOTIFICATION,
        &[&pad.bytes[..], &key, &[0x04]].concat(),
    ));
    assert_eq!(rig.host.keys().load_classic(&pad), Some(key));

    rig.feed(handle_status(EVT_AUTH_COMPLETE, HCI_SUCCESS, HANDLE, None));
    assert_eq!(
        rig.commands(),
        vec![(OP_SET_CONNECTION_ENCRYPTION, vec![0x40, 0x00, 0x01])]
    );

    rig.feed(handle_status(EVT_ENCRYPTION_CHANGE, HCI_SUCCESS, HANDLE, Some(1)));
    let frames = rig.sent();
    assert!(matches!(
        signals(&frames)[..],
        [SignalingMessage::ConnectionRequest {
            psm: PSM_HID_CONTROL,
            source_cid: 0x0060,
            ..
        }]
    ));
    let session = rig.session(0);
    assert!(session.flags.contains(ConnFlags::ENCRYPTED | ConnFlags::HID_CTRL_PENDING));

    // The stored key answers the next request
    rig.feed(event(EVT_LINK_KEY_REQUEST, &pad.bytes));
    let cmds = rig.commands();
    assert_eq!(cmds[0].0, OP_LINK_KEY_REQUEST_REPLY);
    assert_eq!(&cmds[0].1[6..], &key);
}

#[test]
fn test_auth_failure_disconnects() {
    let mut rig = Rig::new(config(), MockDriver::default());
    rig.bring_up();
    rig.feed(inquiry_result(peer_addr(), PAD_CLASS));
    rig.feed(conn_complete(HCI_SUCCESS, HANDLE, peer_addr()));
    rig.sent();

    rig.feed(handle_status(EVT_AUTH_COMPLETE, 0x06, HANDLE, None));
    assert_eq!(
        rig.commands(),
        vec![(OP_DISCONNECT, vec![0x40, 0x00, HCI_AUTHENTICATION_FAILURE])]
    );
}

#[test]
fn test_pin_code_is_peer_address() {
    let mut rig = Rig::new(config(), MockDriver::default());
    rig.bring_up();
    rig.feed(event(EVT_PIN_CODE_REQUEST, &peer_addr().bytes));
    let cmds = rig.commands();
    assert_eq!(cmds[0].0, OP_PIN_CODE_REQUEST_REPLY);
    assert_eq!(cmds[0].1[6], 6);
    assert_eq!(&cmds[0].1[7..13], &peer_addr().bytes);
}

#[test]
fn test_incoming_connection_accepted_as_central() {
    let pad = peer_addr();
    let mut rig = Rig::new(config(), MockDriver::default());
    rig.bring_up();

    let mut params = pad.bytes.to_vec();
    params.extend_from_slice(&PAD_CLASS.to_le_bytes()[..3]);
    params.push(0x01);
    rig.feed(event(EVT_CONN_REQUEST, &params));
    assert_eq!(
        rig.commands(),
        vec![(OP_ACCEPT_CONNECTION_REQUEST, [&pad.bytes[..], &[ROLE_CENTRAL]].concat())]
    );
    assert!(rig.session(0).flags.contains(ConnFlags::IS_INCOMING));

    // The peer drives security on incoming links
    rig.feed(conn_complete(HCI_SUCCESS, HANDLE, pad));
    assert!(!opcodes(&rig.commands()).contains(&OP_AUTHENTICATION_REQUESTED));

    rig.feed(event(EVT_ROLE_CHANGE, &[&[0x21][..], &pad.bytes, &[0x01]].concat()));
    assert!(rig.session(0).flags.contains(ConnFlags::ROLE_SWITCH_FAILED));

    let request = SignalingMessage::ConnectionRequest {
        identifier: 3,
        psm: PSM_HID_CONTROL,
        source_cid: 0x0047,
    };
    rig.feed(acl(HANDLE, L2CAP_SIGNALING_CID, &request.serialize()));
    let sigs = signals(&rig.sent());
    assert!(matches!(
        sigs[0],
        SignalingMessage::ConnectionResponse {
            destination_cid: 0x0060,
            source_cid: 0x0047,
            result: L2CAP_CR_SUCCESS,
            ..
        }
    ));
    assert!(matches!(sigs[1], SignalingMessage::ConfigureRequest { destination_cid: 0x0047, .. }));
}

#[test]
fn test_classic_hid_init_runs_once_and_bridges_reports() {
    let mut rig = Rig::new(config(), MockDriver::default());
    rig.classic_link();
    rig.sent();

    rig.open_channel(0x0060, 0x0041);
    let sigs = signals(&rig.sent());
    assert!(sigs.iter().any(|s| matches!(
        s,
        SignalingMessage::ConnectionRequest {
            psm: PSM_HID_INTERRUPT,
            source_cid: 0x0070,
            ..
        }
    )));
    assert_eq!(rig.mocks.driver.init_count(), 0);

    // Interrupt data before init is not bridged
    rig.feed(acl(HANDLE, 0x0070, &[0xA1, 0x01, 0x7F]));
    rig.open_channel(0x0070, 0x0042);
    assert_eq!(rig.mocks.driver.init_count(), 1);
    let session = rig.session(0);
    assert!(session.flags.contains(ConnFlags::HID_INIT_DONE | ConnFlags::HID_INTR_READY));
    assert_eq!(session.hid_state(), 1);

    // No report map yet, so the descriptor is fetched over SDP
    let sigs = signals(&rig.sent());
    assert!(sigs.iter().any(|s| matches!(
        s,
        SignalingMessage::ConnectionRequest {
            psm: PSM_SDP,
            source_cid: 0x0050,
            ..
        }
    )));

    // A repeated configuration exchange does not run init again
    rig.open_channel(0x0070, 0x0042);
    assert_eq!(rig.mocks.driver.init_count(), 1);

    rig.feed(acl(HANDLE, 0x0070, &[0xA1, 0x01, 0x10, 0x20]));
    assert_eq!(
        *rig.mocks.bridge.reports.lock().unwrap(),
        vec![(SessionId(0), 0x01, vec![0x10, 0x20])]
    );

    rig.feed(acl(HANDLE, 0x0060, &[0x00]));
    assert_eq!(*rig.mocks.driver.control.lock().unwrap(), vec![vec![0x00]]);
}

#[test]
fn test_sdp_descriptor_parsed_by_housekeeping() {
    let mut rig = Rig::new(config(), MockDriver::default());
    rig.classic_hid();
    rig.sent();

    rig.open_channel(0x0050, 0x0043);
    let frames = rig.sent();
    let requests = payloads_on(&frames, 0x0043);
    assert_eq!(requests.len(), 1);
    let tid = u16::from_be_bytes([requests[0][1], requests[0][2]]);

    rig.feed(acl(HANDLE, 0x0050, &sdp_response(tid)));
    let sigs = signals(&rig.sent());
    assert!(sigs.iter().any(|s| matches!(
        s,
        SignalingMessage::DisconnectionRequest {
            destination_cid: 0x0043,
            source_cid: 0x0050,
            ..
        }
    )));
    assert!(rig.session(0).flags.contains(ConnFlags::SDP_DATA_PENDING));
    assert!(rig.mocks.parser.parsed.lock().unwrap().is_empty());

    rig.host.housekeeping();
    assert_eq!(*rig.mocks.parser.parsed.lock().unwrap(), vec![DESCRIPTOR.to_vec()]);
    let session = rig.session(0);
    assert!(!session.flags.contains(ConnFlags::SDP_DATA_PENDING));
    assert!(session.report_map.is_some());
}

#[test]
fn test_feedback_drained_to_initialized_sessions() {
    let mut rig = Rig::new(config(), MockDriver::default());
    let feedback = rig.host.feedback();
    assert!(feedback.try_push(SessionId(0), &[0x01, 0x10]));
    assert_eq!(rig.host.drain_feedback(), 0);

    rig.classic_hid();
    rig.sent();
    assert!(feedback.try_push(SessionId(0), &[0x01, 0x10]));
    assert!(feedback.try_push(SessionId(4), &[0x01, 0x11]));
    assert_eq!(rig.host.drain_feedback(), 1);
    assert!(feedback.is_empty());
    assert_eq!(payloads_on(&rig.sent(), 0x0042), vec![vec![0xA2, 0x01, 0x10]]);

    // Disconnection drops queued feedback and frees the slot
    assert!(feedback.try_push(SessionId(0), &[0x01, 0x12]));
    rig.feed(disconnection(HANDLE));
    assert!(feedback.is_empty());
    assert_eq!(rig.host.pool().active_count(), 0);
}

#[test]
fn test_driver_timer_gives_up_after_max_retry() {
    let wait = DriverStep::Wait(Duration::from_millis(10));
    let mut rig = Rig::new(config(), MockDriver::new(wait, wait, false));
    rig.classic_hid();
    rig.sent();
    assert!(rig.session(0).pending_timer.is_some());

    let start = Instant::now();
    for i in 1..=3u32 {
        rig.host.housekeeping_at(start + Duration::from_millis(20) * i);
        assert!(!opcodes(&rig.commands()).contains(&OP_DISCONNECT));
    }
    assert_eq!(*rig.mocks.driver.timers.lock().unwrap(), 3);

    rig.host.housekeeping_at(start + Duration::from_millis(80));
    let cmds = rig.commands();
    assert!(cmds.contains(&(OP_DISCONNECT, vec![0x40, 0x00, HCI_REMOTE_USER_TERMINATED])));
    assert_eq!(*rig.mocks.driver.timers.lock().unwrap(), 3);
    assert_eq!(rig.session(0).hid_state(), 0);
}

#[test]
fn test_driver_progress_keeps_timer_alive() {
    let wait = DriverStep::Wait(Duration::from_millis(10));
    let mut rig = Rig::new(config(), MockDriver::new(wait, wait, true));
    rig.classic_hid();
    rig.sent();

    let start = Instant::now();
    for i in 1..=6u32 {
        rig.host.housekeeping_at(start + Duration::from_millis(20) * i);
    }
    assert_eq!(*rig.mocks.driver.timers.lock().unwrap(), 6);
    assert!(!opcodes(&rig.commands()).contains(&OP_DISCONNECT));
    assert_eq!(rig.session(0).hid_state(), 7);
}

#[test]
fn test_driver_writes_on_hid_channels() {
    let driver = MockDriver {
        init_control: Some(vec![0x52, 0x11, 0x01]),
        timer_output: Some(vec![0x01, 0x80]),
        ..MockDriver::new(DriverStep::Wait(Duration::from_millis(10)), DriverStep::Done, false)
    };
    let mut rig = Rig::new(config(), driver);
    rig.classic_hid();
    let frames = l2cap_frames(&rig.sent());
    assert!(frames.contains(&(0x0041, vec![0x52, 0x11, 0x01])));

    rig.host
        .housekeeping_at(Instant::now() + Duration::from_millis(20));
    let frames = l2cap_frames(&rig.sent());
    assert!(frames.contains(&(0x0042, vec![0xA2, 0x01, 0x80])));
    assert!(rig.session(0).pending_timer.is_none());
}

#[test]
fn test_le_scan_connects_game_controllers() {
    let pad = peer_addr();
    let mut rig = Rig::new(config(), MockDriver::default());
    rig.bring_up();

    rig.feed(adv_report(BdAddr::new([3; 6]), &[0x02, 0x01, 0x06]));
    assert!(rig.commands().is_empty());

    rig.feed(adv_report(pad, &[0x02, 0x01, 0x06, 0x03, 0x03, 0x12, 0x18]));
    let cmds = rig.commands();
    assert_eq!(opcodes(&cmds), vec![OP_LE_SET_SCAN_ENABLE, OP_LE_CREATE_CONNECTION]);
    assert_eq!(cmds[0].1, vec![0x00, 0x01]);
    assert!(rig.session(0).is_ble());

    rig.feed(le_conn_complete(LE_HANDLE, ROLE_CENTRAL, pad));
    let frames = rig.sent();
    let smp = payloads_on(&frames, L2CAP_SMP_CID);
    assert_eq!(smp.len(), 1);
    assert_eq!(smp[0][0], 0x01);
    assert_eq!(rig.host.pool().active_count(), 1);
    assert_eq!(rig.session(0).acl_handle, Some(LE_HANDLE));

    // Scanning resumes while slots remain
    rig.host.housekeeping();
    assert!(rig.commands().contains(&(OP_LE_SET_SCAN_ENABLE, vec![0x01, 0x01])));
}

const PAIRING_RESPONSE: [u8; 7] = [0x02, 0x03, 0x00, 0x01, 0x10, 0x03, 0x03];
const HID_ADV: [u8; 7] = [0x02, 0x01, 0x06, 0x03, 0x03, 0x12, 0x18];

fn pairing_state(rig: &Rig) -> Option<PairingState> {
    rig.session(0).pairing.as_ref().map(|p| p.state)
}

#[test]
fn test_reused_slot_ignores_old_oracle_results() {
    let pad = peer_addr();
    let mut rig = Rig::new(config(), MockDriver::default());
    rig.bring_up();

    rig.feed(adv_report(pad, &HID_ADV));
    rig.feed(le_conn_complete(LE_HANDLE, ROLE_CENTRAL, pad));
    rig.feed(acl(LE_HANDLE, L2CAP_SMP_CID, &PAIRING_RESPONSE));
    rig.sent();
    rig.feed(command_complete(OP_LE_RAND, &[0x00; 9]));
    rig.feed(command_complete(OP_LE_RAND, &[0x00; 9]));
    assert_eq!(opcodes(&rig.commands()), vec![OP_LE_ENCRYPT]);

    // Link lost with the first confirm stage still at the controller
    rig.feed(disconnection(LE_HANDLE));
    assert_eq!(rig.host.pool().active_count(), 0);

    rig.feed(adv_report(pad, &HID_ADV));
    rig.feed(le_conn_complete(LE_HANDLE + 1, ROLE_CENTRAL, pad));
    rig.feed(acl(LE_HANDLE + 1, L2CAP_SMP_CID, &PAIRING_RESPONSE));
    rig.sent();
    assert_eq!(rig.session(0).acl_handle, Some(LE_HANDLE + 1));
    assert_eq!(pairing_state(&rig), Some(PairingState::GeneratingRandom));

    rig.feed(command_complete(OP_LE_ENCRYPT, &[0x00; 17]));
    assert!(rig.commands().is_empty());
    assert_eq!(pairing_state(&rig), Some(PairingState::GeneratingRandom));

    rig.feed(command_complete(OP_LE_RAND, &[0x00; 9]));
    rig.feed(command_complete(OP_LE_RAND, &[0x00; 9]));
    assert_eq!(opcodes(&rig.commands()), vec![OP_LE_ENCRYPT]);
    assert_eq!(pairing_state(&rig), Some(PairingState::ComputingConfirm));
}

#[test]
fn test_mismatched_oracle_completion_is_dropped() {
    let pad = peer_addr();
    let mut rig = Rig::new(config(), MockDriver::default());
    rig.bring_up();
    rig.feed(adv_report(pad, &HID_ADV));
    rig.feed(le_conn_complete(LE_HANDLE, ROLE_CENTRAL, pad));
    rig.feed(acl(LE_HANDLE, L2CAP_SMP_CID, &PAIRING_RESPONSE));
    rig.sent();

    // LE Rand is outstanding, an LE Encrypt answer consumes it unused
    assert_eq!(rig.host.mailbox.len(), 2);
    rig.feed(command_complete(OP_LE_ENCRYPT, &[0x00; 17]));
    assert!(rig.commands().is_empty());
    assert_eq!(rig.host.mailbox.len(), 1);
    assert_eq!(pairing_state(&rig), Some(PairingState::GeneratingRandom));
}

#[test]
fn test_le_reconnect_uses_stored_ltk() {
    let pad = peer_addr();
    let storage = Arc::new(MemoryStorage::new());
    let ident = MasterIdent {
        ediv: 0x1234,
        rand: [7; 8],
    };
    {
        let mut keys = KeyStore::load(storage.clone());
        let remote = RemoteAddress::le(pad, AddressType::Public);
        keys.store_le_ltk(&remote, &[0x42; 16]);
        keys.store_le_ident(&remote, &ident);
    }
    let mut rig = Rig::with_storage(config(), MockDriver::default(), storage);
    rig.bring_up();

    rig.feed(le_conn_complete(LE_HANDLE, ROLE_CENTRAL, pad));
    let cmds = rig.commands();
    assert_eq!(cmds[0].0, OP_LE_ENABLE_ENCRYPTION);
    let mut expected = LE_HANDLE.to_le_bytes().to_vec();
    expected.extend_from_slice(&[7; 8]);
    expected.extend_from_slice(&0x1234u16.to_le_bytes());
    expected.extend_from_slice(&[0x42; 16]);
    assert_eq!(cmds[0].1, expected);

    rig.feed(handle_status(EVT_ENCRYPTION_CHANGE, HCI_SUCCESS, LE_HANDLE, Some(1)));
    assert!(rig.session(0).flags.contains(ConnFlags::ENCRYPTED));
    assert_eq!(
        payloads_on(&rig.sent(), L2CAP_ATT_CID),
        vec![vec![0x02, 0xB9, 0x00]]
    );
}

#[test]
fn test_config_client_served_over_att() {
    let client = BdAddr::new([0xC1, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6]);
    let mut rig = Rig::new(config(), MockDriver::default());
    rig.bring_up();

    rig.feed(le_conn_complete(LE_HANDLE, ROLE_PERIPHERAL, client));
    assert!(payloads_on(&rig.sent(), L2CAP_SMP_CID).is_empty());
    assert!(rig.session(0).flags.contains(ConnFlags::PERIPHERAL));

    let mut ltk_request = LE_HANDLE.to_le_bytes().to_vec();
    ltk_request.extend_from_slice(&[0; 10]);
    rig.feed(le_meta(EVT_LE_LTK_REQUEST, &ltk_request));
    assert_eq!(
        rig.commands(),
        vec![(OP_LE_LTK_REQUEST_NEGATIVE_REPLY, LE_HANDLE.to_le_bytes().to_vec())]
    );

    rig.feed(acl(LE_HANDLE, L2CAP_ATT_CID, &[0x0A, 0x1D, 0x00]));
    assert_eq!(
        payloads_on(&rig.sent(), L2CAP_ATT_CID),
        vec![[&[0x0B][..], b"bluebridge-test"].concat()]
    );

    rig.feed(disconnection(LE_HANDLE));
    assert_eq!(
        rig.commands(),
        vec![(OP_LE_SET_ADVERTISING_ENABLE, vec![0x01])]
    );
    assert_eq!(rig.host.pool().active_count(), 0);
}

#[test]
fn test_frames_for_unknown_handles_are_dropped() {
    let mut rig = Rig::new(config(), MockDriver::default());
    rig.bring_up();
    rig.feed(acl(0x0123, L2CAP_ATT_CID, &[0x0A, 0x1D, 0x00]));
    rig.feed(handle_status(EVT_ENCRYPTION_CHANGE, HCI_SUCCESS, 0x0123, Some(1)));
    rig.feed(vec![0x04, 0xFF]);
    assert!(rig.sent().is_empty());
}
