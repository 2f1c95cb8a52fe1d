//! HID over GATT client
//!
//! Walks a peer's HID service one request at a time: MTU, device name,
//! appearance, service range, characteristics, report map, descriptors,
//! report references, notification enables and finally a connection
//! parameter update. Each response advances exactly one step.

use super::{GattError, GattResult};
use crate::att::constants::*;
use crate::att::{AttErrorCode, AttRequest, AttResponse};
use crate::hci::HciCommand;
use crate::hid::ReportKind;
use crate::host::{ConnFlags, DeviceSession, Sequencer};
use crate::l2cap::constants::L2CAP_ATT_CID;
use crate::uuid::*;
use log::{debug, info, warn};

/// Connection interval requested once the HID service is set up, 7.5 ms
const HID_CONN_INTERVAL: u16 = 0x0006;
/// Supervision timeout in 10 ms units
const HID_SUPERVISION_TIMEOUT: u16 = 0x00C8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStep {
    ExchangeMtu,
    ReadName,
    ReadAppearance,
    FindHidService,
    DiscoverCharacteristics,
    ReadReportMap,
    DiscoverDescriptors,
    ReadReportReference,
    EnableNotifications,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidCharacteristic {
    pub decl_handle: u16,
    pub value_handle: u16,
    pub properties: u8,
    pub uuid: Uuid,
}

/// One Report characteristic and what its descriptors told us
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportHandle {
    pub value_handle: u16,
    pub properties: u8,
    pub reference_handle: Option<u16>,
    pub cccd_handle: Option<u16>,
    pub id: u8,
    pub kind: Option<ReportKind>,
}

/// What the host should do after a PDU was handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    /// Waiting for the next response
    Pending,
    /// Service set up; the raw report map for the descriptor parser
    Ready(Vec<u8>),
    /// The procedure already ran on this connection
    AlreadyInitialized,
    /// Input report notified by the peer
    Report { id: u8, data: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct HidGattClient {
    step: GattStep,
    local_mtu: u16,
    service: (u16, u16),
    characteristics: Vec<HidCharacteristic>,
    descriptors: Vec<(u16, Uuid)>,
    report_map_handle: u16,
    report_map: Vec<u8>,
    report_map_cap: usize,
    reports: Vec<ReportHandle>,
    cursor: usize,
}

impl HidGattClient {
    pub fn new(local_mtu: u16, report_map_cap: usize) -> Self {
        Self {
            step: GattStep::ExchangeMtu,
            local_mtu: local_mtu.max(ATT_DEFAULT_MTU),
            service: (0, 0),
            characteristics: Vec::new(),
            descriptors: Vec::new(),
            report_map_handle: 0,
            report_map: Vec::new(),
            report_map_cap,
            reports: Vec::new(),
            cursor: 0,
        }
    }

    pub fn step(&self) -> GattStep {
        self.step
    }

    pub fn is_done(&self) -> bool {
        self.step == GattStep::Done
    }

    pub fn reports(&self) -> &[ReportHandle] {
        &self.reports
    }

    pub fn report_map(&self) -> &[u8] {
        &self.report_map
    }

    /// Value handle of the first output report, target of feedback writes
    pub fn output_report_handle(&self) -> Option<u16> {
        self.reports
            .iter()
            .find(|r| r.kind == Some(ReportKind::Output))
            .map(|r| r.value_handle)
    }

    fn report_for_handle(&self, handle: u16) -> Option<&ReportHandle> {
        self.reports.iter().find(|r| r.value_handle == handle)
    }

    fn request(
        &mut self,
        session: &DeviceSession,
        tx: &Sequencer,
        step: GattStep,
        request: AttRequest,
    ) -> GattResult<GattEvent> {
        debug!("session {}: GATT {:?}", session.id, step);
        self.step = step;
        send(session, tx, &request)?;
        Ok(GattEvent::Pending)
    }

    fn on_response(
        &mut self,
        session: &mut DeviceSession,
        tx: &Sequencer,
        response: AttResponse,
    ) -> GattResult<GattEvent> {
        match (self.step, response) {
            (GattStep::ExchangeMtu, response) => {
                if let AttResponse::ExchangeMtu { mtu } = response {
                    session.att.mtu = mtu.min(self.local_mtu).max(ATT_DEFAULT_MTU);
                }
                self.request(
                    session,
                    tx,
                    GattStep::ReadName,
                    read_by_type(1, 0xFFFF, DEVICE_NAME_UUID16),
                )
            }
            (GattStep::ReadName, response) => {
                if let AttResponse::ReadByType(entries) = response {
                    if let Some((_, value)) = entries.first() {
                        session.name = Some(String::from_utf8_lossy(value).into_owned());
                    }
                }
                self.request(
                    session,
                    tx,
                    GattStep::ReadAppearance,
                    read_by_type(1, 0xFFFF, APPEARANCE_UUID16),
                )
            }
            (GattStep::ReadAppearance, response) => {
                if let AttResponse::ReadByType(entries) = response {
                    if let Some([lo, hi, ..]) = entries.first().map(|(_, v)| v.as_slice()) {
                        session.appearance = Some(u16::from_le_bytes([*lo, *hi]));
                    }
                }
                self.request(
                    session,
                    tx,
                    GattStep::FindHidService,
                    AttRequest::FindByTypeValue {
                        start: 0x0001,
                        end: 0xFFFF,
                        attr_type: PRIMARY_SERVICE_UUID16,
                        value: HID_SERVICE_UUID16.to_le_bytes().to_vec(),
                    },
                )
            }
            (GattStep::FindHidService, AttResponse::FindByTypeValue(ranges)) => {
                let (start, end) = ranges
                    .iter()
                    .copied()
                    .find(|&(start, end)| start != 0 && start <= end)
                    .ok_or(GattError::ServiceNotFound)?;
                info!(
                    "session {}: HID service 0x{:04x}-0x{:04x}",
                    session.id, start, end
                );
                self.service = (start, end);
                self.request(
                    session,
                    tx,
                    GattStep::DiscoverCharacteristics,
                    read_by_type(start, end, CHARACTERISTIC_UUID16),
                )
            }
            (GattStep::FindHidService, AttResponse::Error(_)) => Err(GattError::ServiceNotFound),
            (GattStep::DiscoverCharacteristics, AttResponse::ReadByType(entries)) => {
                for (decl_handle, value) in &entries {
                    match parse_declaration(*decl_handle, value) {
                        Some(c) => self.characteristics.push(c),
                        None => warn!(
                            "session {}: bad characteristic declaration at 0x{:04x}",
                            session.id, decl_handle
                        ),
                    }
                }
                match entries.last() {
                    Some((last, _)) if *last < self.service.1 => {
                        let next = *last + 1;
                        self.request(
                            session,
                            tx,
                            GattStep::DiscoverCharacteristics,
                            read_by_type(next, self.service.1, CHARACTERISTIC_UUID16),
                        )
                    }
                    _ => self.read_report_map(session, tx),
                }
            }
            (GattStep::DiscoverCharacteristics, AttResponse::Error(e))
                if e.code == AttErrorCode::AttributeNotFound =>
            {
                self.read_report_map(session, tx)
            }
            (GattStep::ReadReportMap, AttResponse::Read(chunk) | AttResponse::ReadBlob(chunk)) => {
                let room = self.report_map_cap.saturating_sub(self.report_map.len());
                if chunk.len() > room {
                    warn!(
                        "session {}: report map exceeds {} bytes, truncating",
                        session.id, self.report_map_cap
                    );
                }
                self.report_map.extend_from_slice(&chunk[..chunk.len().min(room)]);
                let full = chunk.len() + 1 >= session.att.mtu as usize;
                if full && self.report_map.len() < self.report_map_cap {
                    let request = AttRequest::ReadBlob {
                        handle: self.report_map_handle,
                        offset: self.report_map.len() as u16,
                    };
                    self.request(session, tx, GattStep::ReadReportMap, request)
                } else {
                    self.discover_descriptors(session, tx, self.service.0.saturating_add(1))
                }
            }
            (GattStep::ReadReportMap, AttResponse::Error(e)) if !self.report_map.is_empty() => {
                // map length was a multiple of the blob size
                debug!("session {}: report map ends with {:?}", session.id, e.code);
                self.discover_descriptors(session, tx, self.service.0.saturating_add(1))
            }
            (GattStep::DiscoverDescriptors, AttResponse::FindInformation(entries)) => {
                self.descriptors.extend(entries.iter().copied());
                match entries.last() {
                    Some((last, _)) if *last < self.service.1 => {
                        self.discover_descriptors(session, tx, *last + 1)
                    }
                    _ => self.collect_reports(session, tx),
                }
            }
            (GattStep::DiscoverDescriptors, AttResponse::Error(e))
                if e.code == AttErrorCode::AttributeNotFound =>
            {
                self.collect_reports(session, tx)
            }
            (GattStep::ReadReportReference, response) => {
                match response {
                    AttResponse::Read(value) if value.len() >= 2 => {
                        if let Some(report) = self.reports.get_mut(self.cursor) {
                            report.id = value[0];
                            report.kind = ReportKind::from_reference(value[1]);
                        }
                    }
                    other => warn!(
                        "session {}: report reference unreadable: {:?}",
                        session.id, other
                    ),
                }
                self.cursor += 1;
                self.next_reference(session, tx)
            }
            (GattStep::EnableNotifications, response) => {
                if let AttResponse::Error(e) = response {
                    warn!(
                        "session {}: CCCD 0x{:04x} write refused: {:?}",
                        session.id, e.handle, e.code
                    );
                }
                self.cursor += 1;
                self.next_notification(session, tx)
            }
            (step, AttResponse::Error(e)) => Err(GattError::Peer {
                step,
                handle: e.handle,
                code: e.code,
            }),
            (step, other) => {
                warn!(
                    "session {}: unexpected ATT 0x{:02x} in {:?}",
                    session.id,
                    other.opcode(),
                    step
                );
                Err(GattError::UnexpectedResponse(other.opcode()))
            }
        }
    }

    fn read_report_map(&mut self, session: &DeviceSession, tx: &Sequencer) -> GattResult<GattEvent> {
        let handle = self
            .characteristics
            .iter()
            .find(|c| c.uuid == REPORT_MAP_UUID16)
            .map(|c| c.value_handle)
            .ok_or(GattError::CharacteristicNotFound(REPORT_MAP_UUID16))?;
        self.report_map_handle = handle;
        self.request(session, tx, GattStep::ReadReportMap, AttRequest::Read { handle })
    }

    fn discover_descriptors(
        &mut self,
        session: &DeviceSession,
        tx: &Sequencer,
        start: u16,
    ) -> GattResult<GattEvent> {
        if start > self.service.1 {
            return self.collect_reports(session, tx);
        }
        let request = AttRequest::FindInformation {
            start,
            end: self.service.1,
        };
        self.request(session, tx, GattStep::DiscoverDescriptors, request)
    }

    /// Pairs every Report characteristic with the descriptors between its
    /// value handle and the next declaration.
    fn collect_reports(&mut self, session: &DeviceSession, tx: &Sequencer) -> GattResult<GattEvent> {
        let mut reports = Vec::new();
        for (i, c) in self.characteristics.iter().enumerate() {
            if c.uuid != REPORT_UUID16 {
                continue;
            }
            let limit = self
                .characteristics
                .get(i + 1)
                .map(|next| next.decl_handle)
                .unwrap_or(self.service.1.saturating_add(1));
            let mut report = ReportHandle {
                value_handle: c.value_handle,
                properties: c.properties,
                reference_handle: None,
                cccd_handle: None,
                id: 0,
                kind: None,
            };
            for (handle, uuid) in &self.descriptors {
                if *handle <= c.value_handle || *handle >= limit {
                    continue;
                }
                if *uuid == REPORT_REFERENCE_UUID16 {
                    report.reference_handle = Some(*handle);
                } else if *uuid == CCCD_UUID16 {
                    report.cccd_handle = Some(*handle);
                }
            }
            reports.push(report);
        }
        debug!("session {}: {} report characteristics", session.id, reports.len());
        self.reports = reports;
        self.cursor = 0;
        self.next_reference(session, tx)
    }

    fn next_reference(&mut self, session: &DeviceSession, tx: &Sequencer) -> GattResult<GattEvent> {
        while let Some(report) = self.reports.get(self.cursor) {
            if let Some(handle) = report.reference_handle {
                return self.request(
                    session,
                    tx,
                    GattStep::ReadReportReference,
                    AttRequest::Read { handle },
                );
            }
            self.cursor += 1;
        }
        self.cursor = 0;
        self.next_notification(session, tx)
    }

    fn next_notification(
        &mut self,
        session: &DeviceSession,
        tx: &Sequencer,
    ) -> GattResult<GattEvent> {
        while let Some(report) = self.reports.get(self.cursor) {
            let wants_input = matches!(report.kind, None | Some(ReportKind::Input))
                && report.properties & CHAR_PROP_NOTIFY != 0;
            if let (true, Some(handle)) = (wants_input, report.cccd_handle) {
                return self.request(
                    session,
                    tx,
                    GattStep::EnableNotifications,
                    AttRequest::Write {
                        handle,
                        value: CCCD_NOTIFY.to_le_bytes().to_vec(),
                    },
                );
            }
            self.cursor += 1;
        }
        self.finish(session, tx)
    }

    fn finish(&mut self, session: &DeviceSession, tx: &Sequencer) -> GattResult<GattEvent> {
        let handle = session.acl_handle.ok_or(GattError::NotConnected)?;
        tx.send_command(&HciCommand::LeConnectionUpdate {
            handle,
            interval_min: HID_CONN_INTERVAL,
            interval_max: HID_CONN_INTERVAL,
            latency: 0,
            supervision_timeout: HID_SUPERVISION_TIMEOUT,
        })?;
        self.step = GattStep::Done;
        info!(
            "session {}: HID service ready, {} byte report map, {} reports",
            session.id,
            self.report_map.len(),
            self.reports.len()
        );
        Ok(GattEvent::Ready(self.report_map.clone()))
    }
}

fn send(session: &DeviceSession, tx: &Sequencer, request: &AttRequest) -> GattResult<()> {
    let handle = session.acl_handle.ok_or(GattError::NotConnected)?;
    tx.send_l2cap(handle, L2CAP_ATT_CID, &request.serialize())?;
    Ok(())
}

fn read_by_type(start: u16, end: u16, uuid16: u16) -> AttRequest {
    AttRequest::ReadByType {
        start,
        end,
        attr_type: Uuid::from_u16(uuid16),
    }
}

/// `props | value handle | uuid` of a characteristic declaration
fn parse_declaration(decl_handle: u16, value: &[u8]) -> Option<HidCharacteristic> {
    if value.len() < 5 {
        return None;
    }
    Some(HidCharacteristic {
        decl_handle,
        value_handle: u16::from_le_bytes([value[1], value[2]]),
        properties: value[0],
        uuid: Uuid::try_from_slice_le(&value[3..])?,
    })
}

/// Starts the HID service walk. Entering again on the same connection is a
/// no-op reported as [`GattEvent::AlreadyInitialized`] or `Pending`.
pub fn start(
    session: &mut DeviceSession,
    tx: &Sequencer,
    local_mtu: u16,
    report_map_cap: usize,
) -> GattResult<GattEvent> {
    let done = session.gatt.as_ref().is_some_and(|g| g.is_done());
    if done || session.flags.contains(ConnFlags::HID_INIT_DONE) {
        info!("session {}: HID already initialized", session.id);
        return Ok(GattEvent::AlreadyInitialized);
    }
    if session.gatt.is_some() {
        debug!("session {}: GATT walk already running", session.id);
        return Ok(GattEvent::Pending);
    }
    let mut client = HidGattClient::new(local_mtu, report_map_cap);
    let request = AttRequest::ExchangeMtu {
        mtu: client.local_mtu,
    };
    client.request(session, tx, GattStep::ExchangeMtu, request)?;
    session.gatt = Some(client);
    Ok(GattEvent::Pending)
}

/// Handles one server-to-client PDU (response, notification, indication)
pub fn handle_pdu(
    session: &mut DeviceSession,
    tx: &Sequencer,
    data: &[u8],
) -> GattResult<GattEvent> {
    let response = AttResponse::parse(data)?;
    match response {
        AttResponse::Notification { handle, value } => Ok(report_event(session, handle, value)),
        AttResponse::Indication { handle, value } => {
            send(session, tx, &AttRequest::HandleValueConfirmation)?;
            Ok(report_event(session, handle, value))
        }
        response => {
            let mut client = session
                .gatt
                .take()
                .ok_or(GattError::UnexpectedResponse(response.opcode()))?;
            let result = client.on_response(session, tx, response);
            session.gatt = Some(client);
            result
        }
    }
}

fn report_event(session: &DeviceSession, handle: u16, data: Vec<u8>) -> GattEvent {
    match session
        .gatt
        .as_ref()
        .and_then(|g| g.report_for_handle(handle))
    {
        Some(report) => GattEvent::Report { id: report.id, data },
        None => {
            debug!(
                "session {}: notification on unknown handle 0x{:04x}",
                session.id, handle
            );
            GattEvent::Pending
        }
    }
}
