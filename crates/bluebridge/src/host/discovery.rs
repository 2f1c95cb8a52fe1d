//! Classic inquiry and LE scanning while session slots are free
//!
//! Only one outgoing connection of each transport is attempted at a time.
//! Inquiry is cancelled while paging and LE scanning is paused while an LE
//! connection is being created; the housekeeping job restarts both.

use super::dispatch::{slot, Host};
use super::session::{ConnFlags, PageParams, SessionId};
use crate::error::Result;
use crate::gap::{is_peripheral_class, AdvertisingData, RemoteAddress, GIAC_LAP};
use crate::hci::constants::*;
use crate::hci::packet::InquiryResponse;
use crate::hci::{HciCommand, LeAdvertisingReport};
use log::{debug, info, trace};

/// Clock offset valid bit of Create Connection
const CLOCK_OFFSET_VALID: u16 = 0x8000;

#[derive(Debug, Default)]
pub(crate) struct DiscoveryState {
    pub inquiry_active: bool,
    pub scanning: bool,
    /// Session being paged
    pub paging: Option<SessionId>,
    /// Session an LE Create Connection is pending for
    pub le_connecting: Option<SessionId>,
}

impl Host {
    /// Starts or stops inquiry and scanning to match the free slots
    pub(super) fn discovery_tick(&mut self) -> Result<()> {
        let free = self.pool.has_free_slot();

        if self.config.classic_inquiry
            && free
            && !self.discovery.inquiry_active
            && self.discovery.paging.is_none()
        {
            debug!("starting inquiry");
            self.tx.send_command(&HciCommand::Inquiry {
                lap: GIAC_LAP,
                length: self.config.inquiry_length,
                num_responses: 0,
            })?;
            self.discovery.inquiry_active = true;
        }

        let scan = self.config.le_scan && free && self.discovery.le_connecting.is_none();
        if scan != self.discovery.scanning {
            debug!("LE scan {}", if scan { "on" } else { "off" });
            self.tx.send_command(&HciCommand::LeSetScanEnable {
                enable: scan,
                filter_duplicates: true,
            })?;
            self.discovery.scanning = scan;
        }
        Ok(())
    }

    pub(super) fn on_inquiry_event(&mut self, event_code: u8, params: &[u8]) -> Result<()> {
        if event_code == EVT_INQUIRY_COMPLETE {
            debug!("inquiry complete");
            self.discovery.inquiry_active = false;
            return Ok(());
        }

        for response in InquiryResponse::parse_all(event_code, params)? {
            if !is_peripheral_class(response.class_of_device) {
                trace!(
                    "skipping {} (class 0x{:06x})",
                    response.bd_addr,
                    response.class_of_device
                );
                continue;
            }
            if self.pool.find_by_address(&response.bd_addr).is_some()
                || self.discovery.paging.is_some()
            {
                continue;
            }
            let Some(id) = self.pool.allocate() else {
                break;
            };

            let session = slot(&mut self.pool, id)?;
            session.remote = RemoteAddress::classic(response.bd_addr);
            session.class_of_device = response.class_of_device;
            session.page = PageParams {
                page_scan_repetition_mode: response.page_scan_repetition_mode,
                clock_offset: response.clock_offset | CLOCK_OFFSET_VALID,
            };
            info!(
                "session {}: found {} (class 0x{:06x}, rssi {:?})",
                id, response.bd_addr, response.class_of_device, response.rssi
            );
            let command = HciCommand::CreateConnection {
                bd_addr: response.bd_addr,
                packet_type: ACL_PACKET_TYPES,
                page_scan_repetition_mode: session.page.page_scan_repetition_mode,
                clock_offset: session.page.clock_offset,
                allow_role_switch: true,
            };

            if self.discovery.inquiry_active {
                self.tx.send_command(&HciCommand::InquiryCancel)?;
                self.discovery.inquiry_active = false;
            }
            self.discovery.paging = Some(id);
            self.tx.send_command(&command)?;
        }
        Ok(())
    }

    pub(super) fn on_advertising_reports(&mut self, params: &[u8]) -> Result<()> {
        for report in LeAdvertisingReport::parse_all(params)? {
            if self.discovery.le_connecting.is_some() {
                break;
            }
            let adv = AdvertisingData::parse(&report.data);
            if !adv.is_game_controller() || self.pool.find_by_address(&report.address).is_some() {
                continue;
            }
            let Some(id) = self.pool.allocate() else {
                break;
            };

            let session = slot(&mut self.pool, id)?;
            session.flags.insert(ConnFlags::IS_BLE);
            session.remote = RemoteAddress::le(report.address, report.address_type);
            session.name = adv.name.clone();
            session.appearance = adv.appearance;
            info!(
                "session {}: found LE controller {} {:?} ({} dBm)",
                id, session.remote, adv.name, report.rssi
            );

            if self.discovery.scanning {
                self.tx.send_command(&HciCommand::LeSetScanEnable {
                    enable: false,
                    filter_duplicates: true,
                })?;
                self.discovery.scanning = false;
            }
            self.discovery.le_connecting = Some(id);
            self.tx.send_command(&HciCommand::LeCreateConnection {
                scan_interval: 0x0060,
                scan_window: 0x0030,
                filter_policy: 0x00,
                peer_addr_type: report.address_type,
                peer_addr: report.address,
                conn_interval_min: 0x0006,
                conn_interval_max: 0x000C,
                conn_latency: 0,
                supervision_timeout: 0x00C8,
            })?;
        }
        Ok(())
    }

    /// A connection attempt was rejected before it started
    pub(super) fn on_connect_failed(&mut self, opcode: u16) -> Result<()> {
        let pending = if opcode == OP_CREATE_CONNECTION {
            self.discovery.paging.take()
        } else {
            self.discovery.le_connecting.take()
        };
        if let Some(id) = pending {
            debug!("session {}: connection attempt rejected", id);
            self.release(id);
        }
        Ok(())
    }
}
