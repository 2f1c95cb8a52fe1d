//! Attribute search against a peer's SDP server
//!
//! One search per session: the request asks for every attribute of every
//! record, pages are appended to a staging buffer until the peer sends an
//! empty continuation state, and the buffer is handed back exactly once.

use super::protocol::{
    search_attr_request, AttrResponse, SdpPacket, SDP_ERROR_RSP, SDP_SERVICE_SEARCH_ATTR_RSP,
};
use super::types::{DataElement, ATTR_HID_DESCRIPTOR_LIST, HID_REPORT_DESCRIPTOR_TYPE};
use super::{SdpError, SdpResult};
use crate::host::{DeviceSession, Sequencer};
use crate::l2cap::{manager, ChannelKind};
use log::{debug, info, warn};

/// Assembly buffer of one attribute search
#[derive(Debug, Clone)]
pub struct SdpStaging {
    buf: Vec<u8>,
    cap: usize,
    truncated: bool,
    transaction_id: u16,
}

impl SdpStaging {
    pub fn new(cap: usize, transaction_id: u16) -> Self {
        Self {
            buf: Vec::new(),
            cap,
            truncated: false,
            transaction_id,
        }
    }

    /// Appends a page, dropping whatever exceeds the cap
    fn append(&mut self, data: &[u8]) {
        let room = self.cap.saturating_sub(self.buf.len());
        if data.len() > room && !self.truncated {
            warn!(
                "SDP response exceeds {} bytes, truncating",
                self.cap
            );
            self.truncated = true;
        }
        self.buf.extend_from_slice(&data[..data.len().min(room)]);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

/// Result of one response page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdpEvent {
    /// Another page was requested
    Continue,
    /// Response to an older transaction, dropped
    Stale,
    /// Search finished; the assembled attribute lists
    Complete(Vec<u8>),
}

fn send(session: &mut DeviceSession, tx: &Sequencer, packet: &SdpPacket) -> SdpResult<()> {
    manager::send_data(session, tx, ChannelKind::SdpTx, &packet.serialize())?;
    Ok(())
}

/// Starts the attribute search on the open SDP-TX channel
pub fn begin_attr_search(
    session: &mut DeviceSession,
    tx: &Sequencer,
    staging_cap: usize,
) -> SdpResult<()> {
    if session.sdp.is_some() {
        debug!("session {}: SDP search already running", session.id);
        return Ok(());
    }
    let transaction_id = session.next_sdp_tid();
    send(session, tx, &search_attr_request(transaction_id, &[]))?;
    session.sdp = Some(SdpStaging::new(staging_cap, transaction_id));
    Ok(())
}

/// Processes one PDU received on SDP-TX
pub fn handle_response(
    session: &mut DeviceSession,
    tx: &Sequencer,
    data: &[u8],
) -> SdpResult<SdpEvent> {
    let packet = SdpPacket::parse(data)?;
    if packet.pdu_id == SDP_ERROR_RSP {
        session.sdp = None;
        let code = match packet.parameters.as_slice() {
            [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
            _ => 0,
        };
        return Err(SdpError::PeerError(code));
    }
    if packet.pdu_id != SDP_SERVICE_SEARCH_ATTR_RSP {
        return Err(SdpError::UnexpectedPdu(packet.pdu_id));
    }

    let response = AttrResponse::parse(&packet.parameters)?;
    let staging = session.sdp.as_mut().ok_or(SdpError::NoQuery)?;
    if packet.transaction_id != staging.transaction_id {
        warn!(
            "session {}: SDP transaction 0x{:04x}, expected 0x{:04x}, dropped",
            session.id, packet.transaction_id, staging.transaction_id
        );
        return Ok(SdpEvent::Stale);
    }
    staging.append(response.attribute_lists);

    if !response.continuation.is_empty() {
        let continuation = response.continuation.to_vec();
        let transaction_id = session.next_sdp_tid();
        if let Some(staging) = session.sdp.as_mut() {
            staging.transaction_id = transaction_id;
        }
        debug!(
            "session {}: SDP continuation {}",
            session.id,
            hex::encode(&continuation)
        );
        send(session, tx, &search_attr_request(transaction_id, &continuation))?;
        return Ok(SdpEvent::Continue);
    }

    let staging = session.sdp.take().ok_or(SdpError::NoQuery)?;
    info!(
        "session {}: SDP search complete, {} bytes",
        session.id,
        staging.len()
    );
    Ok(SdpEvent::Complete(staging.buf))
}

/// Finds the first report descriptor in an attribute-list blob:
/// attribute 0x0206, `seq{ seq{ uint8 0x22, text descriptor } }`.
pub fn extract_hid_descriptor(attribute_lists: &[u8]) -> Option<Vec<u8>> {
    let elements = match DataElement::parse_list(attribute_lists) {
        Ok(elements) => elements,
        Err(e) => {
            warn!("SDP attribute lists undecodable: {}", e);
            return None;
        }
    };

    // Either a list of records (search response) or one record
    let records: Vec<&[DataElement]> = match elements.first() {
        Some(DataElement::Sequence(items))
            if items.iter().all(|i| i.as_sequence().is_some()) =>
        {
            items.iter().filter_map(DataElement::as_sequence).collect()
        }
        Some(DataElement::Sequence(items)) => vec![items.as_slice()],
        _ => return None,
    };

    records.into_iter().find_map(|attributes| {
        attributes.chunks(2).find_map(|pair| match pair {
            [id, value] if id.as_uint() == Some(ATTR_HID_DESCRIPTOR_LIST as u64) => {
                value.as_sequence()?.iter().find_map(|entry| match entry.as_sequence()? {
                    [kind, DataElement::Text(bytes)]
                        if kind.as_uint() == Some(HID_REPORT_DESCRIPTOR_TYPE as u64) =>
                    {
                        Some(bytes.clone())
                    }
                    _ => None,
                })
            }
            _ => None,
        })
    })
}
