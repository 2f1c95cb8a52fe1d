//! Minimal SDP responder
//!
//! Peers that query us before opening HID channels only need an answer,
//! so every search returns no records and every attribute request an empty
//! attribute list.

use super::protocol::*;
use super::SdpResult;
use crate::host::{DeviceSession, Sequencer};
use crate::l2cap::{manager, ChannelKind};
use log::debug;

const EMPTY_ATTRIBUTE_LIST: [u8; 2] = [0x35, 0x00];

/// Answers one request received on SDP-RX
pub fn handle_request(session: &mut DeviceSession, tx: &Sequencer, data: &[u8]) -> SdpResult<()> {
    let request = SdpPacket::parse(data)?;
    debug!(
        "session {}: SDP request 0x{:02x} tid 0x{:04x}",
        session.id, request.pdu_id, request.transaction_id
    );
    let tid = request.transaction_id;
    let response = match request.pdu_id {
        SDP_SERVICE_SEARCH_REQ => empty_search_response(tid),
        SDP_SERVICE_ATTR_REQ => attr_response(SDP_SERVICE_ATTR_RSP, tid, &EMPTY_ATTRIBUTE_LIST),
        SDP_SERVICE_SEARCH_ATTR_REQ => {
            attr_response(SDP_SERVICE_SEARCH_ATTR_RSP, tid, &EMPTY_ATTRIBUTE_LIST)
        }
        _ => error_response(tid, SDP_ERR_INVALID_SYNTAX),
    };
    manager::send_data(session, tx, ChannelKind::SdpRx, &response.serialize())?;
    Ok(())
}
