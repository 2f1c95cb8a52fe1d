//! BR/EDR link lifecycle and security handshake
//!
//! Outgoing links authenticate and encrypt before the HID channels are
//! opened. Incoming links are driven by the peer; we only answer.

use super::dispatch::{slot, Host};
use super::session::{ConnFlags, SessionId};
use crate::error::Result;
use crate::gap::RemoteAddress;
use crate::hci::constants::*;
use crate::hci::packet::{
    parse_event_addr, ConnectionComplete, ConnectionRequest, HandleStatus, LinkKeyNotification,
    RoleChange,
};
use crate::hci::HciCommand;
use crate::l2cap::{manager, ChannelKind};
use log::{debug, error, info, trace, warn};

const LINK_TYPE_ACL: u8 = 0x01;

// Secure Simple Pairing answers: Just Works without MITM protection
const IO_CAP_NO_INPUT_NO_OUTPUT: u8 = 0x03;
const AUTH_REQ_NO_BONDING: u8 = 0x00;

impl Host {
    pub(super) fn on_classic_link_event(&mut self, event_code: u8, params: &[u8]) -> Result<()> {
        match event_code {
            EVT_CONN_REQUEST => self.on_connection_request(ConnectionRequest::parse(params)?),
            EVT_CONN_COMPLETE => self.on_connection_complete(ConnectionComplete::parse(params)?),
            EVT_ROLE_CHANGE => {
                let change = RoleChange::parse(params)?;
                if change.status != HCI_SUCCESS {
                    warn!(
                        "role switch with {} failed: 0x{:02x}",
                        change.bd_addr, change.status
                    );
                    if let Some(id) = self.pool.find_by_address(&change.bd_addr) {
                        slot(&mut self.pool, id)?
                            .flags
                            .insert(ConnFlags::ROLE_SWITCH_FAILED);
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn on_connection_request(&mut self, req: ConnectionRequest) -> Result<()> {
        if req.link_type != LINK_TYPE_ACL {
            self.tx.send_command(&HciCommand::RejectConnectionRequest {
                bd_addr: req.bd_addr,
                reason: HCI_REJECTED_LIMITED_RESOURCES,
            })?;
            return Ok(());
        }
        let id = match self.pool.find_by_address(&req.bd_addr) {
            Some(id) => Some(id),
            None => self.pool.allocate(),
        };
        let Some(id) = id else {
            warn!("no free session, rejecting {}", req.bd_addr);
            self.tx.send_command(&HciCommand::RejectConnectionRequest {
                bd_addr: req.bd_addr,
                reason: HCI_REJECTED_LIMITED_RESOURCES,
            })?;
            return Ok(());
        };

        let session = slot(&mut self.pool, id)?;
        session.flags.insert(ConnFlags::IS_INCOMING);
        session.remote = RemoteAddress::classic(req.bd_addr);
        session.class_of_device = req.class_of_device;
        info!(
            "session {}: incoming connection from {} (class 0x{:06x})",
            id, req.bd_addr, req.class_of_device
        );
        // Ask to become central so every peer shares our piconet
        self.tx.send_command(&HciCommand::AcceptConnectionRequest {
            bd_addr: req.bd_addr,
            role: ROLE_CENTRAL,
        })?;
        Ok(())
    }

    fn on_connection_complete(&mut self, cc: ConnectionComplete) -> Result<()> {
        if cc.link_type != LINK_TYPE_ACL {
            return Ok(());
        }
        let Some(id) = self.pool.find_by_address(&cc.bd_addr) else {
            warn!("connection complete for unknown peer {}", cc.bd_addr);
            if cc.status == HCI_SUCCESS {
                self.tx.send_command(&HciCommand::Disconnect {
                    handle: cc.handle,
                    reason: HCI_REMOTE_USER_TERMINATED,
                })?;
            }
            return Ok(());
        };
        if self.discovery.paging == Some(id) {
            self.discovery.paging = None;
        }

        let max_retry = self.config.max_retry;
        let session = slot(&mut self.pool, id)?;
        if cc.status != HCI_SUCCESS {
            let incoming = session.flags.contains(ConnFlags::IS_INCOMING);
            if incoming || session.retry_count >= max_retry {
                warn!(
                    "session {}: connection to {} failed (0x{:02x}), giving up",
                    id, cc.bd_addr, cc.status
                );
                self.release(id);
                return Ok(());
            }
            session.retry_count += 1;
            warn!(
                "session {}: connection to {} failed (0x{:02x}), retry {}/{}",
                id, cc.bd_addr, cc.status, session.retry_count, max_retry
            );
            let command = HciCommand::CreateConnection {
                bd_addr: cc.bd_addr,
                packet_type: ACL_PACKET_TYPES,
                page_scan_repetition_mode: session.page.page_scan_repetition_mode,
                clock_offset: session.page.clock_offset,
                allow_role_switch: true,
            };
            self.discovery.paging = Some(id);
            self.tx.send_command(&command)?;
            return Ok(());
        }

        session.acl_handle = Some(cc.handle);
        session.retry_count = 0;
        session
            .flags
            .set(ConnFlags::ENCRYPTED, cc.encryption_enabled);
        info!(
            "session {}: ACL link to {} (handle 0x{:03x})",
            id, cc.bd_addr, cc.handle
        );
        if !session.flags.contains(ConnFlags::IS_INCOMING) {
            self.tx
                .send_command(&HciCommand::AuthenticationRequested { handle: cc.handle })?;
        }
        Ok(())
    }

    pub(super) fn on_classic_security(&mut self, event_code: u8, params: &[u8]) -> Result<()> {
        match event_code {
            EVT_LINK_KEY_REQUEST => {
                let bd_addr = parse_event_addr(params)?;
                let command = match self.keys.load_classic(&bd_addr) {
                    Some(link_key) => {
                        debug!("link key for {} found", bd_addr);
                        HciCommand::LinkKeyRequestReply { bd_addr, link_key }
                    }
                    None => {
                        debug!("no link key for {}", bd_addr);
                        HciCommand::LinkKeyRequestNegativeReply { bd_addr }
                    }
                };
                self.tx.send_command(&command)?;
            }
            EVT_LINK_KEY_NOTIFICATION => {
                let notification = LinkKeyNotification::parse(params)?;
                info!(
                    "new link key for {} (type {})",
                    notification.bd_addr, notification.key_type
                );
                self.keys
                    .store_classic(&notification.bd_addr, &notification.link_key);
            }
            EVT_PIN_CODE_REQUEST => {
                // Legacy pads expect the bonding address bytes as PIN
                let bd_addr = parse_event_addr(params)?;
                self.tx.send_command(&HciCommand::PinCodeRequestReply {
                    bd_addr,
                    pin: bd_addr.bytes.to_vec(),
                })?;
            }
            EVT_IO_CAPABILITY_REQUEST => {
                let bd_addr = parse_event_addr(params)?;
                self.tx.send_command(&HciCommand::IoCapabilityRequestReply {
                    bd_addr,
                    io_capability: IO_CAP_NO_INPUT_NO_OUTPUT,
                    oob_data_present: 0x00,
                    authentication_requirements: AUTH_REQ_NO_BONDING,
                })?;
            }
            EVT_USER_CONFIRMATION_REQUEST => {
                let bd_addr = parse_event_addr(params)?;
                self.tx
                    .send_command(&HciCommand::UserConfirmationRequestReply { bd_addr })?;
            }
            EVT_AUTH_COMPLETE => {
                let auth = HandleStatus::parse(params)?;
                let Some(id) = self.pool.find_by_handle(auth.handle) else {
                    return Ok(());
                };
                if auth.status != HCI_SUCCESS {
                    error!(
                        "session {}: authentication failed (0x{:02x})",
                        id, auth.status
                    );
                    return self.disconnect_link(id, HCI_AUTHENTICATION_FAILURE);
                }
                debug!("session {}: authenticated", id);
                self.tx.send_command(&HciCommand::SetConnectionEncryption {
                    handle: auth.handle,
                    enable: true,
                })?;
            }
            EVT_IO_CAPABILITY_RESPONSE | EVT_SIMPLE_PAIRING_COMPLETE => {
                trace!("SSP event 0x{:02x}", event_code);
            }
            _ => {}
        }
        Ok(())
    }

    /// Encryption Change on a BR/EDR link; HID channels follow on success.
    pub(super) fn on_classic_encryption(
        &mut self,
        id: SessionId,
        change: HandleStatus,
    ) -> Result<()> {
        let session = slot(&mut self.pool, id)?;
        if change.status != HCI_SUCCESS || !change.enabled {
            session.flags.remove(ConnFlags::ENCRYPTED);
            error!(
                "session {}: encryption failed (0x{:02x})",
                id, change.status
            );
            return self.disconnect_link(id, HCI_AUTHENTICATION_FAILURE);
        }
        session.flags.insert(ConnFlags::ENCRYPTED);
        info!("session {}: link encrypted", id);
        if !session.flags.contains(ConnFlags::IS_INCOMING) {
            session.flags.insert(ConnFlags::HID_CTRL_PENDING);
            manager::connect(session, &self.tx, ChannelKind::HidControl)?;
        }
        Ok(())
    }
}
