//! Per-session channel negotiation
//!
//! Drives the four dynamic channels of a session through connect,
//! configure and disconnect. A channel opens once both configuration
//! directions completed, in whichever order they arrive; callers learn
//! about it through the returned [`ChannelEvent`]s.

use super::channel::{ChannelKind, ChannelState};
use super::constants::*;
use super::signaling::{ConfigOptions, SignalingMessage};
use super::{L2capError, L2capResult};
use crate::hci::HciCommand;
use crate::host::{DeviceSession, Sequencer};
use log::{debug, info, warn};

/// Channel milestones the host reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened(ChannelKind),
    Closed(ChannelKind),
    /// Our connect request was refused with the given result
    Refused(ChannelKind, u16),
}

/// CONF_REQ flag bit: more options follow in another request
const CONF_FLAG_CONTINUATION: u16 = 0x0001;

fn send_signal(
    session: &DeviceSession,
    tx: &Sequencer,
    cid: u16,
    message: &SignalingMessage,
) -> L2capResult<()> {
    let handle = session.acl_handle.ok_or(L2capError::NotConnected)?;
    debug!("session {} L2CAP sig tx {:?}", session.id, message);
    tx.send_l2cap(handle, cid, &message.serialize())?;
    Ok(())
}

fn send_config_request(
    session: &mut DeviceSession,
    tx: &Sequencer,
    kind: ChannelKind,
    local_mtu: u16,
) -> L2capResult<()> {
    let message = SignalingMessage::ConfigureRequest {
        identifier: session.next_signal_id(),
        destination_cid: session.channel(kind).remote_cid,
        flags: 0,
        options: ConfigOptions::with_mtu(local_mtu),
    };
    send_signal(session, tx, L2CAP_SIGNALING_CID, &message)
}

/// Opens `kind` towards the peer. A channel that is not idle is left alone.
pub fn connect(session: &mut DeviceSession, tx: &Sequencer, kind: ChannelKind) -> L2capResult<()> {
    let channel = *session.channel(kind);
    if !channel.is_idle() {
        debug!(
            "session {}: {} already {:?}, connect skipped",
            session.id, kind, channel.state
        );
        return Ok(());
    }
    let message = SignalingMessage::ConnectionRequest {
        identifier: session.next_signal_id(),
        psm: kind.psm(),
        source_cid: channel.local_cid,
    };
    send_signal(session, tx, L2CAP_SIGNALING_CID, &message)?;
    session.channel_mut(kind).state = ChannelState::ConnReqSent;
    Ok(())
}

/// Starts closing `kind`; the channel goes idle on the peer's response.
pub fn disconnect(
    session: &mut DeviceSession,
    tx: &Sequencer,
    kind: ChannelKind,
) -> L2capResult<()> {
    let channel = *session.channel(kind);
    if channel.is_idle() || channel.state == ChannelState::Disconnecting {
        return Ok(());
    }
    if channel.state == ChannelState::ConnReqSent {
        // No remote CID to name yet
        session.channel_mut(kind).close();
        return Ok(());
    }
    let message = SignalingMessage::DisconnectionRequest {
        identifier: session.next_signal_id(),
        destination_cid: channel.remote_cid,
        source_cid: channel.local_cid,
    };
    send_signal(session, tx, L2CAP_SIGNALING_CID, &message)?;
    session.channel_mut(kind).state = ChannelState::Disconnecting;
    Ok(())
}

/// Sends `payload` on an open channel
pub fn send_data(
    session: &DeviceSession,
    tx: &Sequencer,
    kind: ChannelKind,
    payload: &[u8],
) -> L2capResult<()> {
    let handle = session.acl_handle.ok_or(L2capError::NotConnected)?;
    let channel = session.channel(kind);
    if !channel.is_open() {
        return Err(L2capError::ChannelNotOpen(kind));
    }
    if payload.len() > channel.negotiated_mtu as usize {
        warn!(
            "session {}: {} payload {} exceeds peer MTU {}",
            session.id,
            kind,
            payload.len(),
            channel.negotiated_mtu
        );
    }
    tx.send_l2cap(handle, channel.remote_cid, payload)?;
    Ok(())
}

/// Our channel kind for a local CID, if it belongs to this session
fn local_kind(session: &DeviceSession, cid: u16) -> Option<ChannelKind> {
    ChannelKind::from_local_cid(cid)
        .filter(|(_, slot)| *slot == session.id.0)
        .map(|(kind, _)| kind)
}

fn reject_invalid_cid(
    session: &DeviceSession,
    tx: &Sequencer,
    identifier: u8,
    local: u16,
    remote: u16,
) -> L2capResult<()> {
    let mut data = Vec::with_capacity(4);
    data.extend_from_slice(&local.to_le_bytes());
    data.extend_from_slice(&remote.to_le_bytes());
    let reject = SignalingMessage::CommandReject {
        identifier,
        reason: L2CAP_REJ_INVALID_CID,
        data,
    };
    send_signal(session, tx, L2CAP_SIGNALING_CID, &reject)
}

/// Processes one BR/EDR signaling frame (CID 1 payload).
pub fn handle_signaling(
    session: &mut DeviceSession,
    tx: &Sequencer,
    local_mtu: u16,
    data: &[u8],
) -> L2capResult<Vec<ChannelEvent>> {
    let mut events = Vec::new();
    for parsed in SignalingMessage::parse_all(data) {
        let message = parsed?;
        debug!("session {} L2CAP sig rx {:?}", session.id, message);
        handle_command(session, tx, local_mtu, message, &mut events)?;
    }
    Ok(events)
}

fn handle_command(
    session: &mut DeviceSession,
    tx: &Sequencer,
    local_mtu: u16,
    message: SignalingMessage,
    events: &mut Vec<ChannelEvent>,
) -> L2capResult<()> {
    match message {
        SignalingMessage::ConnectionRequest {
            identifier,
            psm,
            source_cid,
        } => {
            let kind = ChannelKind::for_incoming_psm(psm);
            let result = match kind {
                None => L2CAP_CR_PSM_NOT_SUPPORTED,
                Some(kind) if !session.channel(kind).is_idle() => L2CAP_CR_NO_RESOURCES,
                Some(_) => L2CAP_CR_SUCCESS,
            };
            let destination_cid = match kind {
                Some(kind) if result == L2CAP_CR_SUCCESS => session.channel(kind).local_cid,
                _ => 0,
            };
            let response = SignalingMessage::ConnectionResponse {
                identifier,
                destination_cid,
                source_cid,
                result,
                status: 0,
            };
            if let Some(kind) = kind.filter(|_| result == L2CAP_CR_SUCCESS) {
                session.channel_mut(kind).state = ChannelState::ConnReqRecv;
                send_signal(session, tx, L2CAP_SIGNALING_CID, &response)?;
                session.channel_mut(kind).start_configuring(source_cid);
                send_config_request(session, tx, kind, local_mtu)?;
            } else {
                warn!(
                    "session {}: refusing connect on PSM 0x{:04x} (0x{:04x})",
                    session.id, psm, result
                );
                send_signal(session, tx, L2CAP_SIGNALING_CID, &response)?;
            }
        }

        SignalingMessage::ConnectionResponse {
            destination_cid,
            source_cid,
            result,
            ..
        } => {
            let Some(kind) = local_kind(session, source_cid) else {
                return Err(L2capError::UnknownChannel(source_cid));
            };
            if session.channel(kind).state != ChannelState::ConnReqSent {
                debug!("session {}: stray CONN_RSP for {}", session.id, kind);
                return Ok(());
            }
            match result {
                L2CAP_CR_SUCCESS => {
                    session.channel_mut(kind).start_configuring(destination_cid);
                    send_config_request(session, tx, kind, local_mtu)?;
                }
                L2CAP_CR_PENDING => debug!("session {}: {} pending", session.id, kind),
                _ => {
                    warn!(
                        "session {}: {} refused by peer (0x{:04x})",
                        session.id, kind, result
                    );
                    session.channel_mut(kind).close();
                    events.push(ChannelEvent::Refused(kind, result));
                }
            }
        }

        SignalingMessage::ConfigureRequest {
            identifier,
            destination_cid,
            flags,
            options,
        } => {
            let Some(kind) = local_kind(session, destination_cid) else {
                return reject_invalid_cid(session, tx, identifier, destination_cid, 0);
            };
            let mtu = options.mtu.unwrap_or(L2CAP_DEFAULT_MTU);
            let channel = session.channel_mut(kind);
            channel.negotiated_mtu = mtu;
            let response = SignalingMessage::ConfigureResponse {
                identifier,
                source_cid: channel.remote_cid,
                flags: 0,
                result: L2CAP_CONF_SUCCESS,
                options: ConfigOptions::with_mtu(mtu),
            };
            send_signal(session, tx, L2CAP_SIGNALING_CID, &response)?;
            if flags & CONF_FLAG_CONTINUATION == 0
                && session.channel_mut(kind).mark_remote_configured()
            {
                info!("session {}: {} open, MTU {}", session.id, kind, mtu);
                events.push(ChannelEvent::Opened(kind));
            }
        }

        SignalingMessage::ConfigureResponse {
            source_cid, result, ..
        } => {
            let Some(kind) = local_kind(session, source_cid) else {
                return Err(L2capError::UnknownChannel(source_cid));
            };
            if result != L2CAP_CONF_SUCCESS {
                warn!(
                    "session {}: {} configuration rejected (0x{:04x})",
                    session.id, kind, result
                );
                return disconnect(session, tx, kind);
            }
            if session.channel_mut(kind).mark_local_configured() {
                info!(
                    "session {}: {} open, MTU {}",
                    session.id,
                    kind,
                    session.channel(kind).negotiated_mtu
                );
                events.push(ChannelEvent::Opened(kind));
            }
        }

        SignalingMessage::DisconnectionRequest {
            identifier,
            destination_cid,
            source_cid,
        } => {
            let Some(kind) = local_kind(session, destination_cid) else {
                return reject_invalid_cid(session, tx, identifier, destination_cid, source_cid);
            };
            let response = SignalingMessage::DisconnectionResponse {
                identifier,
                destination_cid,
                source_cid,
            };
            send_signal(session, tx, L2CAP_SIGNALING_CID, &response)?;
            session.channel_mut(kind).close();
            debug!("session {}: {} closed by peer", session.id, kind);
            events.push(ChannelEvent::Closed(kind));
        }

        SignalingMessage::DisconnectionResponse { source_cid, .. } => {
            if let Some(kind) = local_kind(session, source_cid) {
                session.channel_mut(kind).close();
                debug!("session {}: {} closed", session.id, kind);
                events.push(ChannelEvent::Closed(kind));
            }
        }

        SignalingMessage::EchoRequest { identifier, data } => {
            let response = SignalingMessage::EchoResponse { identifier, data };
            send_signal(session, tx, L2CAP_SIGNALING_CID, &response)?;
        }

        SignalingMessage::InformationRequest {
            identifier,
            info_type,
        } => {
            let response = SignalingMessage::InformationResponse {
                identifier,
                info_type,
                result: L2CAP_INFO_NOT_SUPPORTED,
            };
            send_signal(session, tx, L2CAP_SIGNALING_CID, &response)?;
        }

        SignalingMessage::CommandReject { reason, .. } => {
            warn!(
                "session {}: peer rejected a signaling command (0x{:04x})",
                session.id, reason
            );
        }

        SignalingMessage::EchoResponse { .. } | SignalingMessage::InformationResponse { .. } => {}

        other => {
            let reject = SignalingMessage::CommandReject {
                identifier: other.identifier(),
                reason: L2CAP_REJ_NOT_UNDERSTOOD,
                data: Vec::new(),
            };
            send_signal(session, tx, L2CAP_SIGNALING_CID, &reject)?;
        }
    }
    Ok(())
}

/// Processes one LE signaling frame (CID 5 payload). Connection parameter
/// updates are always accepted and applied.
pub fn handle_le_signaling(
    session: &mut DeviceSession,
    tx: &Sequencer,
    data: &[u8],
) -> L2capResult<()> {
    let handle = session.acl_handle.ok_or(L2capError::NotConnected)?;
    for parsed in SignalingMessage::parse_all(data) {
        match parsed? {
            SignalingMessage::ConnectionParameterUpdateRequest {
                identifier,
                interval_min,
                interval_max,
                latency,
                timeout,
            } => {
                debug!(
                    "session {}: conn params {}-{} latency {} timeout {}",
                    session.id, interval_min, interval_max, latency, timeout
                );
                let response = SignalingMessage::ConnectionParameterUpdateResponse {
                    identifier,
                    result: L2CAP_CONN_PARAM_ACCEPTED,
                };
                send_signal(session, tx, L2CAP_LE_SIGNALING_CID, &response)?;
                tx.send_command(&HciCommand::LeConnectionUpdate {
                    handle,
                    interval_min,
                    interval_max,
                    latency,
                    supervision_timeout: timeout,
                })?;
            }
            SignalingMessage::CommandReject { reason, .. } => warn!(
                "session {}: LE signaling reject 0x{:04x}",
                session.id, reason
            ),
            SignalingMessage::ConnectionParameterUpdateResponse { .. } => {}
            other => {
                let reject = SignalingMessage::CommandReject {
                    identifier: other.identifier(),
                    reason: L2CAP_REJ_NOT_UNDERSTOOD,
                    data: Vec::new(),
                };
                send_signal(session, tx, L2CAP_LE_SIGNALING_CID, &reject)?;
            }
        }
    }
    Ok(())
}
