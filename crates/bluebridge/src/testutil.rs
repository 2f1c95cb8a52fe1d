//! Shared fixtures for unit tests

use crate::error::HciResult;
use crate::gap::{BdAddr, RemoteAddress};
use crate::hci::acl::{build_acl_packets, AclHeader};
use crate::hci::constants::{
    EVT_CMD_COMPLETE, EVT_CMD_STATUS, EVT_LE_META_EVENT, HCI_ACL_PKT, HCI_COMMAND_PKT,
    HCI_EVENT_PKT,
};
use crate::hci::Transport;
use crate::hid::{
    Collaborators, DescriptorParser, DriverStep, HidContext, HidDriver, ReportBridge, ReportInfo,
    ReportKind, ReportMap,
};
use crate::host::{ConnFlags, DeviceSession, Sequencer, SessionId};
use std::sync::{Arc, Mutex};

/// Transport that keeps every frame it is asked to send
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Vec<u8>>>,
}

impl RecordingTransport {
    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl Transport for RecordingTransport {
    fn send(&self, frame: &[u8]) -> HciResult<()> {
        self.sent.lock().unwrap().push(frame.to_vec());
        Ok(())
    }
}

pub fn sequencer() -> (Arc<RecordingTransport>, Sequencer) {
    let transport = Arc::new(RecordingTransport::default());
    let tx = Sequencer::new(transport.clone(), 256);
    (transport, tx)
}

/// Grants credit until the queue stops moving
pub fn flush(tx: &Sequencer) {
    while tx.on_controller_ready() {}
}

/// Flushes and returns everything sent
pub fn sent(transport: &RecordingTransport, tx: &Sequencer) -> Vec<Vec<u8>> {
    flush(tx);
    transport.take()
}

/// `(cid, payload)` of each single-fragment ACL frame in `frames`
pub fn l2cap_frames(frames: &[Vec<u8>]) -> Vec<(u16, Vec<u8>)> {
    frames
        .iter()
        .filter(|f| f.first() == Some(&HCI_ACL_PKT))
        .filter_map(|f| {
            let (_, data) = AclHeader::parse(&f[1..]).ok()?;
            let cid = u16::from_le_bytes([data[2], data[3]]);
            Some((cid, data[4..].to_vec()))
        })
        .collect()
}

/// Payloads sent on `cid`
pub fn payloads_on(frames: &[Vec<u8>], cid: u16) -> Vec<Vec<u8>> {
    l2cap_frames(frames)
        .into_iter()
        .filter(|(c, _)| *c == cid)
        .map(|(_, p)| p)
        .collect()
}

/// `(opcode, parameters)` of each command in `frames`
pub fn commands(frames: &[Vec<u8>]) -> Vec<(u16, Vec<u8>)> {
    frames
        .iter()
        .filter(|f| f.first() == Some(&HCI_COMMAND_PKT) && f.len() >= 4)
        .map(|f| (u16::from_le_bytes([f[1], f[2]]), f[4..].to_vec()))
        .collect()
}

pub fn peer_addr() -> BdAddr {
    BdAddr::new([0xB6, 0xB5, 0xB4, 0xB3, 0xB2, 0xB1])
}

/// Session in slot `id` with an ACL link on `handle`
pub fn connected_session(id: u8, handle: u16) -> DeviceSession {
    let mut session = DeviceSession::new(SessionId(id));
    session.flags.insert(ConnFlags::DEVICE_FOUND);
    session.remote = RemoteAddress::classic(peer_addr());
    session.acl_handle = Some(handle);
    session
}

/// Platform that records calls and keeps its memory card in RAM
pub struct MockPlatform {
    calls: Mutex<Vec<String>>,
    pub card: Mutex<Vec<u8>>,
    pub ota: Mutex<Vec<u8>>,
    entries: Vec<String>,
    listing: Mutex<Vec<String>>,
}

impl MockPlatform {
    pub fn new(card_size: usize, entries: &[&str]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            card: Mutex::new((0..card_size).map(|i| i as u8).collect()),
            ota: Mutex::new(Vec::new()),
            entries: entries.iter().map(|e| e.to_string()).collect(),
            listing: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new(0, &[])
    }
}

impl crate::hid::Platform for MockPlatform {
    fn reboot(&self) {
        self.record("reboot");
    }

    fn factory_reset(&self) {
        self.record("factory_reset");
    }

    fn sleep(&self) {
        self.record("sleep");
    }

    fn ota_begin(&self) -> bool {
        self.record("ota_begin");
        self.ota.lock().unwrap().clear();
        true
    }

    fn ota_write(&self, chunk: &[u8]) -> bool {
        self.ota.lock().unwrap().extend_from_slice(chunk);
        true
    }

    fn ota_end(&self) -> bool {
        self.record("ota_end");
        true
    }

    fn ota_abort(&self) {
        self.record("ota_abort");
    }

    fn dir_open(&self) {
        self.record("dir_open");
        let mut listing = self.listing.lock().unwrap();
        *listing = self.entries.iter().rev().cloned().collect();
    }

    fn next_dir_entry(&self) -> Option<String> {
        self.listing.lock().unwrap().pop()
    }

    fn firmware_name(&self) -> String {
        "bluebridge-test".to_string()
    }

    fn mc_size(&self) -> usize {
        self.card.lock().unwrap().len()
    }

    fn mc_read(&self, offset: usize, buf: &mut [u8]) -> usize {
        let card = self.card.lock().unwrap();
        let n = buf.len().min(card.len().saturating_sub(offset));
        buf[..n].copy_from_slice(&card[offset..offset + n]);
        n
    }

    fn mc_write(&self, offset: usize, data: &[u8]) -> usize {
        let mut card = self.card.lock().unwrap();
        let n = data.len().min(card.len().saturating_sub(offset));
        card[offset..offset + n].copy_from_slice(&data[..n]);
        n
    }

    fn battery_level(&self) -> u8 {
        87
    }
}

/// Parser that declares one input report per descriptor byte count
#[derive(Default)]
pub struct MockParser {
    pub parsed: Mutex<Vec<Vec<u8>>>,
}

impl DescriptorParser for MockParser {
    fn parse_descriptor(&self, _session: SessionId, descriptor: &[u8]) -> ReportMap {
        self.parsed.lock().unwrap().push(descriptor.to_vec());
        ReportMap {
            reports: vec![ReportInfo {
                id: 1,
                kind: ReportKind::Input,
                len: descriptor.len() as u16,
            }],
        }
    }
}

/// Bridge that keeps every report it receives
#[derive(Default)]
pub struct MockBridge {
    pub reports: Mutex<Vec<(SessionId, u8, Vec<u8>)>>,
}

impl ReportBridge for MockBridge {
    fn bridge(&self, session: SessionId, report_id: u8, data: &[u8]) {
        self.reports
            .lock()
            .unwrap()
            .push((session, report_id, data.to_vec()));
    }
}

/// Driver with scripted steps that counts its calls
pub struct MockDriver {
    pub init_step: DriverStep,
    pub timer_step: DriverStep,
    /// Each timer call moves `hid_state` forward
    pub advance_on_timer: bool,
    pub inits: Mutex<Vec<SessionId>>,
    pub timers: Mutex<usize>,
    pub control: Mutex<Vec<Vec<u8>>>,
    /// Sent on the control channel from `init`
    pub init_control: Option<Vec<u8>>,
    /// Sent as an output report from `on_timer`
    pub timer_output: Option<Vec<u8>>,
}

impl MockDriver {
    pub fn new(init_step: DriverStep, timer_step: DriverStep, advance_on_timer: bool) -> Self {
        Self {
            init_step,
            timer_step,
            advance_on_timer,
            inits: Mutex::new(Vec::new()),
            timers: Mutex::new(0),
            control: Mutex::new(Vec::new()),
            init_control: None,
            timer_output: None,
        }
    }

    pub fn init_count(&self) -> usize {
        self.inits.lock().unwrap().len()
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new(DriverStep::Done, DriverStep::Done, false)
    }
}

impl HidDriver for MockDriver {
    fn init(&self, ctx: &mut HidContext<'_>) -> DriverStep {
        self.inits.lock().unwrap().push(ctx.session.id);
        ctx.session.advance_hid_state(1);
        if let Some(data) = &self.init_control {
            ctx.send_control(data).unwrap();
        }
        self.init_step
    }

    fn on_timer(&self, ctx: &mut HidContext<'_>) -> DriverStep {
        *self.timers.lock().unwrap() += 1;
        if self.advance_on_timer {
            let next = ctx.session.hid_state() + 1;
            ctx.session.advance_hid_state(next);
        }
        if let Some(report) = &self.timer_output {
            ctx.send_output(report).unwrap();
        }
        self.timer_step
    }

    fn on_control(&self, _ctx: &mut HidContext<'_>, data: &[u8]) {
        self.control.lock().unwrap().push(data.to_vec());
    }
}

/// Collaborator mocks handed to a `Host`, kept for inspection
pub struct Mocks {
    pub parser: Arc<MockParser>,
    pub bridge: Arc<MockBridge>,
    pub driver: Arc<MockDriver>,
    pub platform: Arc<MockPlatform>,
}

impl Mocks {
    pub fn new(driver: MockDriver) -> Self {
        Self {
            parser: Arc::new(MockParser::default()),
            bridge: Arc::new(MockBridge::default()),
            driver: Arc::new(driver),
            platform: Arc::new(MockPlatform::new(256, &["slot0.mcd"])),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            parser: self.parser.clone(),
            bridge: self.bridge.clone(),
            driver: self.driver.clone(),
            platform: self.platform.clone(),
        }
    }
}

/// H4 event frame
pub fn event(code: u8, params: &[u8]) -> Vec<u8> {
    let mut frame = vec![HCI_EVENT_PKT, code, params.len() as u8];
    frame.extend_from_slice(params);
    frame
}

pub fn command_complete(opcode: u16, ret: &[u8]) -> Vec<u8> {
    let mut params = vec![1];
    params.extend_from_slice(&opcode.to_le_bytes());
    params.extend_from_slice(ret);
    event(EVT_CMD_COMPLETE, &params)
}

pub fn command_status(status: u8, opcode: u16) -> Vec<u8> {
    let mut params = vec![status, 1];
    params.extend_from_slice(&opcode.to_le_bytes());
    event(EVT_CMD_STATUS, &params)
}

pub fn le_meta(subevent: u8, params: &[u8]) -> Vec<u8> {
    let mut body = vec![subevent];
    body.extend_from_slice(params);
    event(EVT_LE_META_EVENT, &body)
}

/// Single-fragment ACL frame from the peer
pub fn acl(handle: u16, cid: u16, payload: &[u8]) -> Vec<u8> {
    build_acl_packets(handle, cid, payload, 1021).remove(0)
}

/// Status, handle and one trailing byte (Encryption Change, Auth Complete)
pub fn handle_status(code: u8, status: u8, handle: u16, extra: Option<u8>) -> Vec<u8> {
    let mut params = vec![status];
    params.extend_from_slice(&handle.to_le_bytes());
    params.extend(extra);
    event(code, &params)
}
