//! Per-peer session state

use crate::att::AttSession;
use crate::gap::RemoteAddress;
use crate::gatt::HidGattClient;
use crate::hid::ReportMap;
use crate::l2cap::{ChannelKind, L2capChannelRecord};
use crate::sdp::SdpStaging;
use crate::smp::PairingScratch;
use bitflags::bitflags;
use log::warn;
use std::fmt;
use std::time::Instant;

/// Number of session slots
pub const MAX_SESSIONS: usize = 7;

/// Stable slot index of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u8);

impl SessionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    /// Connection status bits of a session
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConnFlags: u32 {
        /// Slot is claimed by a peer
        const DEVICE_FOUND = 1 << 0;
        /// Peer paged us
        const IS_INCOMING = 1 << 1;
        const ENCRYPTED = 1 << 2;
        const IS_BLE = 1 << 3;
        const ROLE_SWITCH_FAILED = 1 << 4;
        /// An assembled descriptor waits for the housekeeping job
        const SDP_DATA_PENDING = 1 << 5;
        /// HID control connect request outstanding
        const HID_CTRL_PENDING = 1 << 6;
        /// HID interrupt connect request outstanding
        const HID_INTR_PENDING = 1 << 7;
        const HID_INTR_READY = 1 << 8;
        const HID_INIT_DONE = 1 << 9;
        /// We are the LE peripheral (configuration client connected to us)
        const PERIPHERAL = 1 << 10;
    }
}

/// Paging parameters kept from the inquiry result for reconnect attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageParams {
    pub page_scan_repetition_mode: u8,
    pub clock_offset: u16,
}

/// One connected or connecting peer
#[derive(Debug)]
pub struct DeviceSession {
    pub id: SessionId,
    pub flags: ConnFlags,
    pub remote: RemoteAddress,
    pub acl_handle: Option<u16>,
    hid_state: u8,
    pub retry_count: u8,
    /// Deadline of the deferred driver callback
    pub pending_timer: Option<Instant>,
    pub channels: [L2capChannelRecord; 4],
    pub pairing: Option<PairingScratch>,
    pub sdp: Option<SdpStaging>,
    pub gatt: Option<HidGattClient>,
    pub att: AttSession,
    pub report_map: Option<ReportMap>,
    /// Descriptor handed over by SDP, consumed by housekeeping
    pub descriptor: Option<Vec<u8>>,
    pub page: PageParams,
    pub class_of_device: u32,
    pub name: Option<String>,
    pub appearance: Option<u16>,
    sig_ident: u8,
    sdp_tid: u16,
}

impl DeviceSession {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            flags: ConnFlags::empty(),
            remote: RemoteAddress::default(),
            acl_handle: None,
            hid_state: 0,
            retry_count: 0,
            pending_timer: None,
            channels: ChannelKind::ALL.map(|kind| L2capChannelRecord::new(kind, id.0)),
            pairing: None,
            sdp: None,
            gatt: None,
            att: AttSession::default(),
            report_map: None,
            descriptor: None,
            page: PageParams::default(),
            class_of_device: 0,
            name: None,
            appearance: None,
            sig_ident: 0,
            sdp_tid: 0,
        }
    }

    /// Returns the slot to its pristine state, keeping only its id.
    pub fn reset(&mut self) {
        *self = Self::new(self.id);
    }

    pub fn is_active(&self) -> bool {
        self.flags.contains(ConnFlags::DEVICE_FOUND)
    }

    pub fn is_ble(&self) -> bool {
        self.flags.contains(ConnFlags::IS_BLE)
    }

    pub fn channel(&self, kind: ChannelKind) -> &L2capChannelRecord {
        &self.channels[kind.index()]
    }

    pub fn channel_mut(&mut self, kind: ChannelKind) -> &mut L2capChannelRecord {
        &mut self.channels[kind.index()]
    }

    pub fn hid_state(&self) -> u8 {
        self.hid_state
    }

    /// Moves the HID init step forward; backward moves are ignored.
    pub fn advance_hid_state(&mut self, state: u8) {
        if state < self.hid_state {
            warn!(
                "session {}: refusing hid_state {} -> {}",
                self.id, self.hid_state, state
            );
            return;
        }
        if state > self.hid_state {
            self.retry_count = 0;
        }
        self.hid_state = state;
    }

    /// Restarts the HID init procedure from its first step
    pub fn reset_hid_state(&mut self) {
        self.hid_state = 0;
        self.retry_count = 0;
        self.pending_timer = None;
    }

    /// Next signaling identifier, never zero
    pub fn next_signal_id(&mut self) -> u8 {
        self.sig_ident = self.sig_ident.wrapping_add(1);
        if self.sig_ident == 0 {
            self.sig_ident = 1;
        }
        self.sig_ident
    }

    pub fn next_sdp_tid(&mut self) -> u16 {
        self.sdp_tid = self.sdp_tid.wrapping_add(1);
        self.sdp_tid
    }

    /// Both HID channels are usable
    pub fn hid_channels_open(&self) -> bool {
        self.channel(ChannelKind::HidControl).is_open()
            && self.channel(ChannelKind::HidInterrupt).is_open()
    }
}
