//! Per-session L2CAP channel records

use super::constants::*;
use std::fmt;

/// The four dynamic channels a session can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// SDP channel opened by the peer towards our responder
    SdpRx,
    /// SDP channel we open to query the peer
    SdpTx,
    HidControl,
    HidInterrupt,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::SdpRx,
        ChannelKind::SdpTx,
        ChannelKind::HidControl,
        ChannelKind::HidInterrupt,
    ];

    pub fn index(self) -> usize {
        match self {
            ChannelKind::SdpRx => 0,
            ChannelKind::SdpTx => 1,
            ChannelKind::HidControl => 2,
            ChannelKind::HidInterrupt => 3,
        }
    }

    pub fn psm(self) -> u16 {
        match self {
            ChannelKind::SdpRx | ChannelKind::SdpTx => PSM_SDP,
            ChannelKind::HidControl => PSM_HID_CONTROL,
            ChannelKind::HidInterrupt => PSM_HID_INTERRUPT,
        }
    }

    /// Channel a peer-initiated connection on `psm` lands on
    pub fn for_incoming_psm(psm: u16) -> Option<Self> {
        match psm {
            PSM_SDP => Some(ChannelKind::SdpRx),
            PSM_HID_CONTROL => Some(ChannelKind::HidControl),
            PSM_HID_INTERRUPT => Some(ChannelKind::HidInterrupt),
            _ => None,
        }
    }

    fn cid_base(self) -> u16 {
        match self {
            ChannelKind::SdpRx => SDP_RX_CID_BASE,
            ChannelKind::SdpTx => SDP_TX_CID_BASE,
            ChannelKind::HidControl => HID_CTRL_CID_BASE,
            ChannelKind::HidInterrupt => HID_INTR_CID_BASE,
        }
    }

    /// Local CID used by session `slot` for this channel
    pub fn local_cid(self, slot: u8) -> u16 {
        self.cid_base() + slot as u16
    }

    /// Reverse of [`ChannelKind::local_cid`]
    pub fn from_local_cid(cid: u16) -> Option<(Self, u8)> {
        Self::ALL.into_iter().find_map(|kind| {
            let base = kind.cid_base();
            (cid >= base && cid < base + 0x10).then(|| (kind, (cid - base) as u8))
        })
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelKind::SdpRx => "SDP-RX",
            ChannelKind::SdpTx => "SDP-TX",
            ChannelKind::HidControl => "HID-CTRL",
            ChannelKind::HidInterrupt => "HID-INTR",
        };
        f.write_str(name)
    }
}

/// Channel state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Idle,
    /// We sent CONN_REQ
    ConnReqSent,
    /// Peer sent CONN_REQ, our response is out
    ConnReqRecv,
    /// Both configuration directions in flight. `local_done`: our CONF_REQ
    /// was accepted. `remote_done`: we accepted the peer's CONF_REQ.
    Configuring { local_done: bool, remote_done: bool },
    Open,
    Disconnecting,
}

/// One dynamic channel of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2capChannelRecord {
    pub local_cid: u16,
    pub remote_cid: u16,
    /// MTU the peer can receive, from its CONF_REQ
    pub negotiated_mtu: u16,
    pub state: ChannelState,
}

impl L2capChannelRecord {
    pub fn new(kind: ChannelKind, slot: u8) -> Self {
        Self {
            local_cid: kind.local_cid(slot),
            remote_cid: 0,
            negotiated_mtu: L2CAP_DEFAULT_MTU,
            state: ChannelState::Idle,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    pub fn is_idle(&self) -> bool {
        self.state == ChannelState::Idle
    }

    /// Peer's CONN_RSP accepted our request, or we accepted the peer's.
    pub fn start_configuring(&mut self, remote_cid: u16) {
        self.remote_cid = remote_cid;
        self.state = ChannelState::Configuring {
            local_done: false,
            remote_done: false,
        };
    }

    /// Marks our configuration request as accepted. Returns true only on the
    /// transition to `Open`.
    pub fn mark_local_configured(&mut self) -> bool {
        self.complete_direction(true)
    }

    /// Marks the peer's configuration request as accepted. Returns true only
    /// on the transition to `Open`.
    pub fn mark_remote_configured(&mut self) -> bool {
        self.complete_direction(false)
    }

    fn complete_direction(&mut self, local: bool) -> bool {
        let ChannelState::Configuring {
            mut local_done,
            mut remote_done,
        } = self.state
        else {
            return false;
        };
        if local {
            local_done = true;
        } else {
            remote_done = true;
        }
        if local_done && remote_done {
            self.state = ChannelState::Open;
            true
        } else {
            self.state = ChannelState::Configuring {
                local_done,
                remote_done,
            };
            false
        }
    }

    /// Back to idle, keeping the slot-derived local CID
    pub fn close(&mut self) {
        self.remote_cid = 0;
        self.negotiated_mtu = L2CAP_DEFAULT_MTU;
        self.state = ChannelState::Idle;
    }
}
