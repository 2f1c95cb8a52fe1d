//! HID boundary: report maps and the collaborators behind the engine
//!
//! Descriptor parsing, report translation, peer specific init sequences and
//! the platform (OTA, memory card, power) live outside this crate. The engine
//! talks to them only through the traits below.

use crate::att::pdu::AttRequest;
use crate::error::{Error, Result};
use crate::host::{DeviceSession, SessionId, Sequencer};
use crate::l2cap::constants::L2CAP_ATT_CID;
use crate::l2cap::{manager, ChannelKind};
use std::sync::Arc;
use std::time::Duration;

/// HIDP header of a DATA Output report on the interrupt channel
pub const HIDP_DATA_OUTPUT: u8 = 0xA2;
/// HIDP header of a DATA Input report on the interrupt channel
pub const HIDP_DATA_INPUT: u8 = 0xA1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Input,
    Output,
    Feature,
}

impl ReportKind {
    /// Value of a Report Reference descriptor's type byte
    pub fn from_reference(value: u8) -> Option<Self> {
        match value {
            1 => Some(ReportKind::Input),
            2 => Some(ReportKind::Output),
            3 => Some(ReportKind::Feature),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportInfo {
    pub id: u8,
    pub kind: ReportKind,
    /// Payload length in bytes, without the report id
    pub len: u16,
}

/// Reports declared by a peer's HID descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportMap {
    pub reports: Vec<ReportInfo>,
}

impl ReportMap {
    pub fn get(&self, id: u8, kind: ReportKind) -> Option<&ReportInfo> {
        self.reports.iter().find(|r| r.id == id && r.kind == kind)
    }

    pub fn inputs(&self) -> impl Iterator<Item = &ReportInfo> {
        self.reports.iter().filter(|r| r.kind == ReportKind::Input)
    }
}

/// Turns a raw report descriptor into a [`ReportMap`]
pub trait DescriptorParser: Send + Sync {
    fn parse_descriptor(&self, session: SessionId, descriptor: &[u8]) -> ReportMap;
}

/// Receives validated input reports
pub trait ReportBridge: Send + Sync {
    fn bridge(&self, session: SessionId, report_id: u8, data: &[u8]);
}

/// What a driver step wants next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStep {
    Done,
    /// Call `on_timer` after this delay
    Wait(Duration),
}

/// Session handle given to a [`HidDriver`]
pub struct HidContext<'a> {
    pub session: &'a mut DeviceSession,
    pub tx: &'a Sequencer,
}

impl HidContext<'_> {
    /// Sends a SET_REPORT style payload on the HID control channel
    pub fn send_control(&self, data: &[u8]) -> Result<()> {
        manager::send_data(&*self.session, self.tx, ChannelKind::HidControl, data)?;
        Ok(())
    }

    /// Sends an output report the way the peer's transport expects
    pub fn send_output(&self, report: &[u8]) -> Result<()> {
        send_output_report(&*self.session, self.tx, report)
    }
}

/// Peer specific HID bring-up (LEDs, rumble enable, mode switches)
pub trait HidDriver: Send + Sync {
    /// First step, run once both HID channels are open
    fn init(&self, ctx: &mut HidContext<'_>) -> DriverStep;

    /// A `Wait` elapsed
    fn on_timer(&self, ctx: &mut HidContext<'_>) -> DriverStep;

    /// Handshake or report arriving on the control channel
    fn on_control(&self, _ctx: &mut HidContext<'_>, _data: &[u8]) {}
}

/// Board services reached through the configuration server
pub trait Platform: Send + Sync {
    fn reboot(&self);
    fn factory_reset(&self);
    fn sleep(&self);
    fn ota_begin(&self) -> bool;
    fn ota_write(&self, chunk: &[u8]) -> bool;
    fn ota_end(&self) -> bool;
    fn ota_abort(&self);
    /// Restarts the directory listing
    fn dir_open(&self);
    fn next_dir_entry(&self) -> Option<String>;
    fn firmware_name(&self) -> String;
    /// Size of the memory card image in bytes
    fn mc_size(&self) -> usize;
    fn mc_read(&self, offset: usize, buf: &mut [u8]) -> usize;
    fn mc_write(&self, offset: usize, data: &[u8]) -> usize;
    fn battery_level(&self) -> u8;
}

/// Everything the host hands off to
#[derive(Clone)]
pub struct Collaborators {
    pub parser: Arc<dyn DescriptorParser>,
    pub bridge: Arc<dyn ReportBridge>,
    pub driver: Arc<dyn HidDriver>,
    pub platform: Arc<dyn Platform>,
}

/// Output report to a peer: HIDP on the interrupt channel for classic
/// links, Write Command to the first output report for LE ones.
pub fn send_output_report(session: &DeviceSession, tx: &Sequencer, report: &[u8]) -> Result<()> {
    if session.is_ble() {
        let handle = session
            .gatt
            .as_ref()
            .and_then(|gatt| gatt.output_report_handle())
            .ok_or_else(|| Error::NoOutputPath(session.id.to_string()))?;
        let acl = session
            .acl_handle
            .ok_or_else(|| Error::NoOutputPath(session.id.to_string()))?;
        let pdu = AttRequest::WriteCommand {
            handle,
            value: report.to_vec(),
        };
        tx.send_l2cap(acl, L2CAP_ATT_CID, &pdu.serialize())?;
    } else {
        let mut frame = Vec::with_capacity(report.len() + 1);
        frame.push(HIDP_DATA_OUTPUT);
        frame.extend_from_slice(report);
        manager::send_data(session, tx, ChannelKind::HidInterrupt, &frame)?;
    }
    Ok(())
}
