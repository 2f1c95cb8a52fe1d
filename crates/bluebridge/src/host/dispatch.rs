//! Event dispatch
//!
//! [`Host`] is the single owner of every session. Controller frames are
//! decoded here and routed by event code, connection handle and channel
//! identifier to exactly one protocol layer. Errors from the layers stop
//! at this boundary and become log lines; an affected session is reset or
//! disconnected, never the whole host.

use super::discovery::DiscoveryState;
use super::feedback::FeedbackQueue;
use super::mailbox::OracleMailbox;
use super::pool::SessionPool;
use super::sequencer::{Bringup, BringupProgress, Sequencer};
use super::session::{ConnFlags, DeviceSession, SessionId};
use crate::att::{AttContext, AttResponse, AttServer};
use crate::config::{BridgeConfig, HostConfig};
use crate::error::{Error, HciError, Result};
use crate::gap::{AddressType, BdAddr, RemoteAddress};
use crate::gatt::{self, GattError, GattEvent};
use crate::hci::acl::L2CAP_HEADER_LEN;
use crate::hci::constants::*;
use crate::hci::packet::{
    CommandComplete, CommandStatus, DisconnectionComplete, HandleStatus, LeConnectionComplete,
    LeLtkRequest,
};
use crate::hci::{AclHeader, HciCommand, HciEvent, Reassembler, Transport};
use crate::hid::{self, Collaborators, DriverStep, HidContext, HIDP_DATA_INPUT};
use crate::keystore::KeyStore;
use crate::l2cap::constants::*;
use crate::l2cap::{manager, ChannelEvent, ChannelKind};
use crate::sdp::{self, SdpEvent};
use crate::smp::{self, SmpContext, SmpEvent};
use crate::storage::Storage;
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use std::time::Instant;

pub(super) fn slot(pool: &mut SessionPool, id: SessionId) -> Result<&mut DeviceSession> {
    pool.get_mut(id)
        .filter(|s| s.is_active())
        .ok_or_else(|| Error::UnknownSession(id.to_string()))
}

fn arm_timer(session: &mut DeviceSession, step: DriverStep, now: Instant) {
    session.pending_timer = match step {
        DriverStep::Done => None,
        DriverStep::Wait(delay) => Some(now + delay),
    };
}

/// The Bluetooth host engine
pub struct Host {
    pub(super) config: HostConfig,
    pub(super) tx: Sequencer,
    pub(super) pool: SessionPool,
    pub(super) mailbox: OracleMailbox,
    pub(super) keys: KeyStore,
    pub(super) bridge_config: BridgeConfig,
    pub(super) storage: Arc<dyn Storage>,
    pub(super) collaborators: Collaborators,
    pub(super) att_server: AttServer,
    pub(super) reassembler: Reassembler,
    pub(super) bringup: Bringup,
    pub(super) discovery: DiscoveryState,
    pub(super) feedback: Arc<FeedbackQueue>,
    pub(super) local_addr: BdAddr,
}

impl Host {
    /// Loads keys and configuration from `storage`. Nothing is sent until
    /// [`Host::start`].
    pub fn new(
        config: HostConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn Storage>,
        collaborators: Collaborators,
    ) -> Self {
        let keys = KeyStore::load(storage.clone());
        let bridge_config = BridgeConfig::load(&*storage);
        let bringup = Bringup::new(Bringup::table(&config), config.bringup_max_retry);
        Self {
            tx: Sequencer::new(transport, config.tx_queue_capacity),
            pool: SessionPool::new(),
            mailbox: OracleMailbox::new(),
            keys,
            bridge_config,
            storage,
            att_server: AttServer::new(&config.local_name, config.att_mtu),
            reassembler: Reassembler::new(),
            bringup,
            discovery: DiscoveryState::default(),
            feedback: Arc::new(FeedbackQueue::new(config.feedback_queue_capacity)),
            local_addr: BdAddr::ZERO,
            collaborators,
            config,
        }
    }

    /// Issues the first bring-up command
    pub fn start(&mut self) -> Result<()> {
        info!("starting controller bring-up");
        self.bringup.run_bringup_step(&self.tx, &mut self.keys)?;
        Ok(())
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.tx
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub fn bridge_config(&self) -> &BridgeConfig {
        &self.bridge_config
    }

    /// Handle for producers of output reports
    pub fn feedback(&self) -> Arc<FeedbackQueue> {
        self.feedback.clone()
    }

    pub fn local_addr(&self) -> BdAddr {
        self.local_addr
    }

    /// Bring-up finished and discovery is running
    pub fn is_ready(&self) -> bool {
        self.bringup.is_done()
    }

    pub fn bringup(&self) -> &Bringup {
        &self.bringup
    }

    fn local_le(&self) -> RemoteAddress {
        RemoteAddress::le(self.local_addr, AddressType::Public)
    }

    /// Transmit credit from the controller. Returns true if a frame went out.
    pub fn on_controller_ready(&self) -> bool {
        self.tx.on_controller_ready()
    }

    /// One H4 frame from the controller, indicator byte included
    pub fn on_controller_frame(&mut self, frame: &[u8]) {
        let result = match frame.split_first() {
            Some((&HCI_EVENT_PKT, rest)) => self.handle_event(rest),
            Some((&HCI_ACL_PKT, rest)) => self.handle_acl(rest),
            Some((indicator, _)) => {
                debug!("ignoring packet type 0x{:02x}", indicator);
                Ok(())
            }
            None => Ok(()),
        };
        if let Err(e) = result {
            warn!("dispatch: {}", e);
        }
    }

    /// Periodic job: parses pending descriptors, fires session timers and
    /// keeps discovery running.
    pub fn housekeeping(&mut self) {
        self.housekeeping_at(Instant::now());
    }

    pub fn housekeeping_at(&mut self, now: Instant) {
        self.parse_pending_descriptors();
        self.run_timers(now);
        if self.bringup.is_done() {
            if let Err(e) = self.discovery_tick() {
                warn!("discovery: {}", e);
            }
        }
        self.tx.drain_at(now);
    }

    /// Feedback job: sends every queued output report. Returns how many
    /// went out.
    pub fn drain_feedback(&self) -> usize {
        let mut sent = 0;
        while let Some(item) = self.feedback.pop() {
            let Some(session) = self.pool.get(item.session) else {
                continue;
            };
            if !session.flags.contains(ConnFlags::DEVICE_FOUND | ConnFlags::HID_INIT_DONE) {
                debug!("session {}: not initialized, feedback dropped", item.session);
                continue;
            }
            match hid::send_output_report(session, &self.tx, &item.report) {
                Ok(()) => sent += 1,
                Err(e) => warn!("session {}: feedback not sent: {}", item.session, e),
            }
        }
        sent
    }

    /// Frees a slot along with its queued feedback and oracle requests
    pub(super) fn release(&mut self, id: SessionId) {
        self.pool.reset(id);
        self.feedback.discard(id);
        let orphaned = self.mailbox.discard(id);
        if orphaned > 0 {
            debug!("session {}: {} oracle requests orphaned", id, orphaned);
        }
    }

    /// Asks the controller to drop the link; a slot without a link is
    /// freed right away.
    pub(super) fn disconnect_link(&mut self, id: SessionId, reason: u8) -> Result<()> {
        match self.pool.get(id).and_then(|s| s.acl_handle) {
            Some(handle) => {
                info!("session {}: disconnecting (0x{:02x})", id, reason);
                self.tx.send_command(&HciCommand::Disconnect { handle, reason })?;
            }
            None => self.release(id),
        }
        Ok(())
    }

    fn handle_event(&mut self, data: &[u8]) -> Result<()> {
        let Some(event) = HciEvent::parse(data) else {
            return Err(HciError::InvalidPacketFormat.into());
        };
        let params = event.parameters.as_slice();
        match event.event_code {
            EVT_CMD_COMPLETE => self.on_command_complete(CommandComplete::parse(params)?),
            EVT_CMD_STATUS => self.on_command_status(CommandStatus::parse(params)?),
            EVT_DISCONN_COMPLETE => self.on_disconnection(DisconnectionComplete::parse(params)?),
            EVT_ENCRYPTION_CHANGE => self.on_encryption_change(HandleStatus::parse(params)?),
            EVT_INQUIRY_COMPLETE
            | EVT_INQUIRY_RESULT
            | EVT_INQUIRY_RESULT_WITH_RSSI
            | EVT_EXTENDED_INQUIRY_RESULT => self.on_inquiry_event(event.event_code, params),
            EVT_CONN_REQUEST | EVT_CONN_COMPLETE | EVT_ROLE_CHANGE => {
                self.on_classic_link_event(event.event_code, params)
            }
            EVT_AUTH_COMPLETE
            | EVT_LINK_KEY_REQUEST
            | EVT_LINK_KEY_NOTIFICATION
            | EVT_PIN_CODE_REQUEST
            | EVT_IO_CAPABILITY_REQUEST
            | EVT_IO_CAPABILITY_RESPONSE
            | EVT_USER_CONFIRMATION_REQUEST
            | EVT_SIMPLE_PAIRING_COMPLETE => self.on_classic_security(event.event_code, params),
            EVT_LE_META_EVENT => self.on_le_meta(params),
            EVT_NUM_COMP_PKTS => Ok(()),
            other => {
                trace!("unhandled event 0x{:02x}", other);
                Ok(())
            }
        }
    }

    fn on_command_complete(&mut self, cc: CommandComplete) -> Result<()> {
        let status = cc.status();
        trace!("command complete 0x{:04x} status 0x{:02x}", cc.opcode, status);
        let progress = self
            .bringup
            .on_command_complete(cc.opcode, status, &self.tx, &mut self.keys)?;

        match cc.opcode {
            OP_READ_BUFFER_SIZE if status == HCI_SUCCESS => {
                if let [_, lo, hi, ..] = cc.return_parameters[..] {
                    let mtu = u16::from_le_bytes([lo, hi]) as usize;
                    info!("controller ACL buffer {} bytes", mtu);
                    self.tx.set_acl_mtu(mtu);
                }
            }
            OP_READ_BD_ADDR if status == HCI_SUCCESS => {
                if let Some(addr) = cc.return_parameters.get(1..7).and_then(BdAddr::from_slice) {
                    info!("local address {}", addr);
                    self.local_addr = addr;
                }
            }
            OP_LE_RAND | OP_LE_ENCRYPT => self.on_oracle_complete(&cc)?,
            _ => {}
        }

        if progress == BringupProgress::Done {
            self.discovery_tick()?;
        }
        Ok(())
    }

    fn on_command_status(&mut self, cs: CommandStatus) -> Result<()> {
        if cs.status != HCI_SUCCESS {
            warn!(
                "command 0x{:04x} rejected with 0x{:02x}",
                cs.opcode, cs.status
            );
            self.bringup
                .on_command_complete(cs.opcode, cs.status, &self.tx, &mut self.keys)?;
        }
        match cs.opcode {
            OP_INQUIRY => {
                self.discovery.inquiry_active = cs.status == HCI_SUCCESS;
                Ok(())
            }
            OP_CREATE_CONNECTION | OP_LE_CREATE_CONNECTION if cs.status != HCI_SUCCESS => {
                self.on_connect_failed(cs.opcode)
            }
            _ => Ok(()),
        }
    }

    /// Routes an LE Rand or LE Encrypt result to the session that asked
    fn on_oracle_complete(&mut self, cc: &CommandComplete) -> Result<()> {
        let Some((owner, op)) = self.mailbox.pop() else {
            warn!("oracle result 0x{:04x} with nothing outstanding", cc.opcode);
            return Ok(());
        };
        if op.opcode() != cc.opcode {
            warn!("{:?} answered by 0x{:04x}, result dropped", op, cc.opcode);
            return Ok(());
        }
        let Some(id) = owner else {
            debug!("{:?} result of a released session dropped", op);
            return Ok(());
        };
        let local = self.local_le();
        let session = slot(&mut self.pool, id)?;
        if cc.status() != HCI_SUCCESS {
            error!(
                "session {}: {:?} failed with 0x{:02x}",
                id,
                op,
                cc.status()
            );
            session.pairing = None;
            self.mailbox.discard(id);
            return self.disconnect_link(id, HCI_AUTHENTICATION_FAILURE);
        }
        let mut ctx = SmpContext {
            tx: &self.tx,
            mailbox: &self.mailbox,
            keys: &mut self.keys,
            local,
        };
        let result = cc.return_parameters.get(1..).unwrap_or_default();
        let event = smp::on_oracle_result(session, &mut ctx, op, result)?;
        self.on_smp_event(id, event)
    }

    fn on_disconnection(&mut self, dc: DisconnectionComplete) -> Result<()> {
        let Some(id) = self.pool.find_by_handle(dc.handle) else {
            debug!("disconnection of unknown handle 0x{:03x}", dc.handle);
            return Ok(());
        };
        let flags = self.pool.get(id).map(|s| s.flags).unwrap_or_default();
        info!("session {}: disconnected (0x{:02x})", id, dc.reason);
        self.release(id);
        if self.discovery.paging == Some(id) {
            self.discovery.paging = None;
        }
        if self.discovery.le_connecting == Some(id) {
            self.discovery.le_connecting = None;
        }
        if flags.contains(ConnFlags::PERIPHERAL) && self.config.le_advertising {
            debug!("re-enabling advertising");
            self.tx
                .send_command(&HciCommand::LeSetAdvertisingEnable { enable: true })?;
        }
        Ok(())
    }

    fn on_encryption_change(&mut self, change: HandleStatus) -> Result<()> {
        let Some(id) = self.pool.find_by_handle(change.handle) else {
            debug!("encryption change on unknown handle 0x{:03x}", change.handle);
            return Ok(());
        };
        let local = self.local_le();
        let session = slot(&mut self.pool, id)?;
        if !session.is_ble() {
            return self.on_classic_encryption(id, change);
        }
        if session.flags.contains(ConnFlags::PERIPHERAL) {
            session
                .flags
                .set(ConnFlags::ENCRYPTED, change.status == HCI_SUCCESS && change.enabled);
            return Ok(());
        }
        let mut ctx = SmpContext {
            tx: &self.tx,
            mailbox: &self.mailbox,
            keys: &mut self.keys,
            local,
        };
        let event = smp::on_encryption_changed(session, &mut ctx, change.status, change.enabled)?;
        self.on_smp_event(id, event)
    }

    fn on_le_meta(&mut self, params: &[u8]) -> Result<()> {
        let Some((&subevent, rest)) = params.split_first() else {
            return Err(HciError::InvalidPacketFormat.into());
        };
        match subevent {
            EVT_LE_CONN_COMPLETE | EVT_LE_ENHANCED_CONN_COMPLETE => {
                self.on_le_connection(LeConnectionComplete::parse(subevent, rest)?)
            }
            EVT_LE_ADVERTISING_REPORT => self.on_advertising_reports(rest),
            EVT_LE_LTK_REQUEST => {
                // Configuration clients never bond with us
                let request = LeLtkRequest::parse(rest)?;
                debug!("LTK request on 0x{:03x} refused", request.handle);
                self.tx.send_command(&HciCommand::LeLongTermKeyRequestNegativeReply {
                    handle: request.handle,
                })?;
                Ok(())
            }
            EVT_LE_CONN_UPDATE_COMPLETE => {
                debug!("LE connection update complete");
                Ok(())
            }
            other => {
                trace!("unhandled LE sub-event 0x{:02x}", other);
                Ok(())
            }
        }
    }

    fn on_le_connection(&mut self, ev: LeConnectionComplete) -> Result<()> {
        let remote = RemoteAddress::le(ev.peer_addr, ev.peer_addr_type);
        if ev.role == ROLE_CENTRAL {
            self.discovery.le_connecting = None;
        }
        if ev.status != HCI_SUCCESS {
            warn!("LE connection to {} failed: 0x{:02x}", remote, ev.status);
            if let Some(id) = self.pool.find_by_address(&ev.peer_addr) {
                self.release(id);
            }
            return Ok(());
        }

        let existing = self
            .pool
            .find_by_address(&ev.peer_addr)
            .filter(|id| self.pool.get(*id).is_some_and(|s| s.acl_handle.is_none()));
        let Some(id) = existing.or_else(|| self.pool.allocate()) else {
            warn!("no free session for {}", remote);
            self.tx.send_command(&HciCommand::Disconnect {
                handle: ev.handle,
                reason: HCI_REJECTED_LIMITED_RESOURCES,
            })?;
            return Ok(());
        };

        let local = self.local_le();
        let session = slot(&mut self.pool, id)?;
        session.flags.insert(ConnFlags::IS_BLE);
        session.remote = remote;
        session.acl_handle = Some(ev.handle);
        session.retry_count = 0;

        if ev.role == ROLE_PERIPHERAL {
            session.flags.insert(ConnFlags::PERIPHERAL);
            info!("session {}: configuration client {} connected", id, remote);
            return Ok(());
        }

        info!(
            "session {}: LE link to {} (handle 0x{:03x})",
            id, remote, ev.handle
        );
        let mut ctx = SmpContext {
            tx: &self.tx,
            mailbox: &self.mailbox,
            keys: &mut self.keys,
            local,
        };
        smp::start_security(session, &mut ctx)?;
        Ok(())
    }

    fn on_smp_event(&mut self, id: SessionId, event: Option<SmpEvent>) -> Result<()> {
        match event {
            None => Ok(()),
            Some(SmpEvent::Complete) | Some(SmpEvent::Encrypted) => self.start_gatt(id),
            Some(SmpEvent::Failed(reason)) => {
                error!("session {}: dropping link after pairing failure 0x{:02x}", id, reason);
                self.disconnect_link(id, HCI_AUTHENTICATION_FAILURE)
            }
        }
    }

    fn start_gatt(&mut self, id: SessionId) -> Result<()> {
        let session = slot(&mut self.pool, id)?;
        if session.flags.contains(ConnFlags::PERIPHERAL) {
            return Ok(());
        }
        let event = gatt::hid_client::start(
            session,
            &self.tx,
            self.config.att_mtu,
            self.config.sdp_staging_cap,
        )?;
        self.on_gatt_event(id, event)
    }

    fn on_gatt_event(&mut self, id: SessionId, event: GattEvent) -> Result<()> {
        match event {
            GattEvent::Pending | GattEvent::AlreadyInitialized => Ok(()),
            GattEvent::Ready(descriptor) => {
                let parser = self.collaborators.parser.clone();
                let session = slot(&mut self.pool, id)?;
                let map = parser.parse_descriptor(id, &descriptor);
                info!(
                    "session {}: report map with {} reports",
                    id,
                    map.reports.len()
                );
                session.report_map = Some(map);
                self.run_hid_init(id)
            }
            GattEvent::Report { id: report_id, data } => {
                self.bridge_report(id, report_id, &data);
                Ok(())
            }
        }
    }

    fn bridge_report(&self, id: SessionId, report_id: u8, data: &[u8]) {
        let ready = self
            .pool
            .get(id)
            .is_some_and(|s| s.flags.contains(ConnFlags::HID_INIT_DONE));
        if !ready {
            trace!("session {}: report {} before init, dropped", id, report_id);
            return;
        }
        self.collaborators.bridge.bridge(id, report_id, data);
    }

    /// Runs the peer's HID init procedure, once per connection
    fn run_hid_init(&mut self, id: SessionId) -> Result<()> {
        let driver = self.collaborators.driver.clone();
        let session = slot(&mut self.pool, id)?;
        if session.flags.contains(ConnFlags::HID_INIT_DONE) {
            debug!("session {}: HID init already ran", id);
            return Ok(());
        }
        session.flags.insert(ConnFlags::HID_INIT_DONE);
        session.reset_hid_state();
        info!("session {}: HID init", id);
        let step = driver.init(&mut HidContext {
            session: &mut *session,
            tx: &self.tx,
        });
        arm_timer(session, step, Instant::now());
        Ok(())
    }

    fn handle_acl(&mut self, data: &[u8]) -> Result<()> {
        let (header, fragment) = AclHeader::parse(data)?;
        let Some((handle, frame)) = self.reassembler.push(&header, fragment) else {
            return Ok(());
        };
        let Some(id) = self.pool.find_by_handle(handle) else {
            warn!("ACL frame for unknown handle 0x{:03x}", handle);
            return Ok(());
        };
        let (Some(cid), Some(payload)) = (frame.get(2..4), frame.get(L2CAP_HEADER_LEN..)) else {
            return Err(HciError::InvalidPacketFormat.into());
        };
        let cid = u16::from_le_bytes([cid[0], cid[1]]);
        trace!(
            "session {}: L2CAP rx cid 0x{:04x}: {}",
            id,
            cid,
            hex::encode(payload)
        );
        self.route_l2cap(id, cid, payload)
    }

    fn route_l2cap(&mut self, id: SessionId, cid: u16, payload: &[u8]) -> Result<()> {
        match cid {
            L2CAP_SIGNALING_CID => {
                let session = slot(&mut self.pool, id)?;
                let events =
                    manager::handle_signaling(session, &self.tx, self.config.l2cap_mtu, payload)?;
                for event in events {
                    self.on_channel_event(id, event)?;
                }
                Ok(())
            }
            L2CAP_LE_SIGNALING_CID => {
                let session = slot(&mut self.pool, id)?;
                manager::handle_le_signaling(session, &self.tx, payload)?;
                Ok(())
            }
            L2CAP_ATT_CID => self.on_att(id, payload),
            L2CAP_SMP_CID => {
                let local = self.local_le();
                let session = slot(&mut self.pool, id)?;
                let mut ctx = SmpContext {
                    tx: &self.tx,
                    mailbox: &self.mailbox,
                    keys: &mut self.keys,
                    local,
                };
                let event = smp::handle_pdu(session, &mut ctx, payload)?;
                self.on_smp_event(id, event)
            }
            _ => match ChannelKind::from_local_cid(cid) {
                Some((kind, owner)) if owner == id.0 => self.on_channel_data(id, kind, payload),
                _ => {
                    warn!("session {}: data on unknown CID 0x{:04x}", id, cid);
                    Ok(())
                }
            },
        }
    }

    fn on_att(&mut self, id: SessionId, payload: &[u8]) -> Result<()> {
        let Some(&opcode) = payload.first() else {
            return Ok(());
        };
        let local_addr = self.local_addr;
        let session = slot(&mut self.pool, id)?;

        if AttResponse::is_server_opcode(opcode) {
            if session.flags.contains(ConnFlags::PERIPHERAL) {
                debug!("session {}: ATT 0x{:02x} from a client, ignored", id, opcode);
                return Ok(());
            }
            return match gatt::hid_client::handle_pdu(session, &self.tx, payload) {
                Ok(event) => self.on_gatt_event(id, event),
                Err(e @ (GattError::ServiceNotFound | GattError::Peer { .. })) => {
                    error!("session {}: HID service unusable: {}", id, e);
                    self.disconnect_link(id, HCI_REMOTE_USER_TERMINATED)
                }
                Err(e) => Err(e.into()),
            };
        }

        let mut ctx = AttContext {
            config: &mut self.bridge_config,
            storage: &*self.storage,
            keys: &mut self.keys,
            platform: &*self.collaborators.platform,
            local_addr,
        };
        if let Some(response) = self
            .att_server
            .handle_att_pdu(&mut session.att, &mut ctx, payload)
        {
            let handle = session
                .acl_handle
                .ok_or_else(|| Error::UnknownSession(id.to_string()))?;
            self.tx.send_l2cap(handle, L2CAP_ATT_CID, &response)?;
        }
        Ok(())
    }

    fn on_channel_event(&mut self, id: SessionId, event: ChannelEvent) -> Result<()> {
        let session = slot(&mut self.pool, id)?;
        match event {
            ChannelEvent::Opened(ChannelKind::HidControl) => {
                session.flags.remove(ConnFlags::HID_CTRL_PENDING);
                if !session.flags.contains(ConnFlags::IS_INCOMING) {
                    session.flags.insert(ConnFlags::HID_INTR_PENDING);
                    manager::connect(session, &self.tx, ChannelKind::HidInterrupt)?;
                }
            }
            ChannelEvent::Opened(ChannelKind::HidInterrupt) => {
                session
                    .flags
                    .remove(ConnFlags::HID_INTR_PENDING);
                session.flags.insert(ConnFlags::HID_INTR_READY);
            }
            ChannelEvent::Opened(ChannelKind::SdpTx) => {
                sdp::begin_attr_search(session, &self.tx, self.config.sdp_staging_cap)?;
                return Ok(());
            }
            ChannelEvent::Opened(ChannelKind::SdpRx) => return Ok(()),
            ChannelEvent::Refused(kind, result) => {
                warn!("session {}: {} refused (0x{:04x})", id, kind, result);
                return match kind {
                    ChannelKind::HidControl | ChannelKind::HidInterrupt => {
                        session
                            .flags
                            .remove(ConnFlags::HID_CTRL_PENDING | ConnFlags::HID_INTR_PENDING);
                        self.disconnect_link(id, HCI_REMOTE_USER_TERMINATED)
                    }
                    ChannelKind::SdpRx | ChannelKind::SdpTx => Ok(()),
                };
            }
            ChannelEvent::Closed(kind) => {
                if kind == ChannelKind::HidInterrupt {
                    session.flags.remove(ConnFlags::HID_INTR_READY);
                }
                return Ok(());
            }
        }

        if !session.hid_channels_open() || session.flags.contains(ConnFlags::HID_INIT_DONE) {
            return Ok(());
        }
        if session.report_map.is_none()
            && session.descriptor.is_none()
            && session.channel(ChannelKind::SdpTx).is_idle()
        {
            manager::connect(session, &self.tx, ChannelKind::SdpTx)?;
        }
        self.run_hid_init(id)
    }

    fn on_channel_data(&mut self, id: SessionId, kind: ChannelKind, payload: &[u8]) -> Result<()> {
        let driver = self.collaborators.driver.clone();
        let session = slot(&mut self.pool, id)?;
        match kind {
            ChannelKind::SdpRx => sdp::server::handle_request(session, &self.tx, payload)?,
            ChannelKind::SdpTx => match sdp::handle_response(session, &self.tx, payload)? {
                SdpEvent::Continue | SdpEvent::Stale => {}
                SdpEvent::Complete(attribute_lists) => {
                    match sdp::extract_hid_descriptor(&attribute_lists) {
                        Some(descriptor) => {
                            info!(
                                "session {}: HID descriptor, {} bytes",
                                id,
                                descriptor.len()
                            );
                            session.descriptor = Some(descriptor);
                            session.flags.insert(ConnFlags::SDP_DATA_PENDING);
                        }
                        None => warn!("session {}: no HID descriptor in SDP records", id),
                    }
                    manager::disconnect(session, &self.tx, ChannelKind::SdpTx)?;
                }
            },
            ChannelKind::HidControl => driver.on_control(
                &mut HidContext {
                    session,
                    tx: &self.tx,
                },
                payload,
            ),
            ChannelKind::HidInterrupt => match payload {
                [HIDP_DATA_INPUT, report_id, data @ ..] => {
                    self.bridge_report(id, *report_id, data)
                }
                _ => trace!("session {}: HIDP frame {}", id, hex::encode(payload)),
            },
        }
        Ok(())
    }

    /// Hands descriptors fetched over SDP to the parser
    fn parse_pending_descriptors(&mut self) {
        let parser = self.collaborators.parser.clone();
        for session in self
            .pool
            .iter_mut()
            .filter(|s| s.flags.contains(ConnFlags::SDP_DATA_PENDING))
        {
            session.flags.remove(ConnFlags::SDP_DATA_PENDING);
            if let Some(descriptor) = session.descriptor.take() {
                let map = parser.parse_descriptor(session.id, &descriptor);
                info!(
                    "session {}: report map with {} reports",
                    session.id,
                    map.reports.len()
                );
                session.report_map = Some(map);
            }
        }
    }

    /// Fires due driver timers. A driver that makes no progress for
    /// `max_retry` expirations is restarted and its peer dropped.
    fn run_timers(&mut self, now: Instant) {
        let driver = self.collaborators.driver.clone();
        let max_retry = self.config.max_retry;
        let mut stuck = Vec::new();

        for session in self.pool.iter_mut().filter(|s| s.is_active()) {
            match session.pending_timer {
                Some(deadline) if deadline <= now => session.pending_timer = None,
                _ => continue,
            }
            if session.retry_count >= max_retry {
                error!(
                    "session {}: HID init stuck at step {} after {} retries",
                    session.id,
                    session.hid_state(),
                    session.retry_count
                );
                session.reset_hid_state();
                stuck.push(session.id);
                continue;
            }
            session.retry_count += 1;
            let step = driver.on_timer(&mut HidContext {
                session: &mut *session,
                tx: &self.tx,
            });
            arm_timer(session, step, now);
        }

        for id in stuck {
            if let Err(e) = self.disconnect_link(id, HCI_REMOTE_USER_TERMINATED) {
                warn!("session {}: {}", id, e);
            }
        }
    }
}
