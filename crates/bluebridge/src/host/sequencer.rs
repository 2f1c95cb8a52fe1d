//! Command/transmit sequencer
//!
//! Every outbound frame goes through one bounded queue. The head frame is
//! sent only after the controller signals transmit credit, one frame per
//! credit. Delay entries hold the queue back for a fixed time without
//! sending anything.
//!
//! The controller bring-up walks a fixed table of commands, one command in
//! flight at a time. A step that keeps failing is re-issued until the retry
//! cap, after which the whole table restarts from the first step.

use crate::config::HostConfig;
use crate::error::{HciError, HciResult};
use crate::gap::advertising::build_advertising_data;
use crate::hci::acl::build_acl_packets;
use crate::hci::constants::*;
use crate::hci::{HciCommand, Transport};
use crate::keystore::KeyStore;
use log::{debug, error, info, trace, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Queue entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxItem {
    Frame(Vec<u8>),
    Delay(Duration),
}

#[derive(Debug, Default)]
struct TxQueue {
    items: VecDeque<TxItem>,
    paused_until: Option<Instant>,
}

/// Credit-gated outbound queue shared by every protocol component
pub struct Sequencer {
    transport: Arc<dyn Transport>,
    queue: Mutex<TxQueue>,
    credit: AtomicBool,
    capacity: usize,
    acl_mtu: AtomicUsize,
}

impl Sequencer {
    pub fn new(transport: Arc<dyn Transport>, capacity: usize) -> Self {
        Self {
            transport,
            queue: Mutex::new(TxQueue::default()),
            credit: AtomicBool::new(false),
            capacity: capacity.max(1),
            acl_mtu: AtomicUsize::new(DEFAULT_ACL_MTU),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TxQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends items atomically: either all fit or none is queued.
    fn push_all(&self, items: Vec<TxItem>) -> HciResult<()> {
        {
            let mut queue = self.lock();
            if queue.items.len() + items.len() > self.capacity {
                let bytes = items
                    .iter()
                    .map(|i| match i {
                        TxItem::Frame(f) => f.len(),
                        TxItem::Delay(_) => 0,
                    })
                    .sum();
                warn!(
                    "tx queue full ({} queued), dropping {} bytes",
                    queue.items.len(),
                    bytes
                );
                return Err(HciError::QueueFull(bytes));
            }
            queue.items.extend(items);
        }
        self.drain();
        Ok(())
    }

    /// Queues one raw H4 frame
    pub fn enqueue(&self, frame: Vec<u8>) -> HciResult<()> {
        self.push_all(vec![TxItem::Frame(frame)])
    }

    /// Queues a pause; frames queued after it wait at least `delay`
    pub fn enqueue_delay(&self, delay: Duration) -> HciResult<()> {
        self.push_all(vec![TxItem::Delay(delay)])
    }

    pub fn send_command(&self, command: &HciCommand) -> HciResult<()> {
        debug!("HCI cmd 0x{:04x} {:?}", command.opcode(), command);
        self.enqueue(command.to_packet())
    }

    /// Sends an L2CAP payload on `cid`, fragmented to the controller buffer
    pub fn send_l2cap(&self, handle: u16, cid: u16, payload: &[u8]) -> HciResult<()> {
        trace!(
            "L2CAP tx handle 0x{:03x} cid 0x{:04x}: {}",
            handle,
            cid,
            hex::encode(payload)
        );
        let packets = build_acl_packets(handle, cid, payload, self.acl_mtu());
        self.push_all(packets.into_iter().map(TxItem::Frame).collect())
    }

    pub fn acl_mtu(&self) -> usize {
        self.acl_mtu.load(Ordering::Relaxed)
    }

    pub fn set_acl_mtu(&self, mtu: usize) {
        if mtu > 0 {
            self.acl_mtu.store(mtu, Ordering::Relaxed);
        }
    }

    /// Items waiting, delays included
    pub fn pending(&self) -> usize {
        self.lock().items.len()
    }

    /// Transmit credit from the controller. Returns true if a frame went out.
    pub fn on_controller_ready(&self) -> bool {
        self.credit.store(true, Ordering::SeqCst);
        self.drain()
    }

    pub fn drain(&self) -> bool {
        self.drain_at(Instant::now())
    }

    /// Sends the head frame if credit is available and no delay is running.
    pub fn drain_at(&self, now: Instant) -> bool {
        let frame = {
            let mut queue = self.lock();
            loop {
                if let Some(until) = queue.paused_until {
                    if now < until {
                        return false;
                    }
                    queue.paused_until = None;
                }
                match queue.items.front() {
                    None => return false,
                    Some(TxItem::Delay(delay)) => {
                        queue.paused_until = Some(now + *delay);
                        queue.items.pop_front();
                    }
                    Some(TxItem::Frame(_)) => {
                        if !self.credit.swap(false, Ordering::SeqCst) {
                            return false;
                        }
                        match queue.items.pop_front() {
                            Some(TxItem::Frame(frame)) => break frame,
                            _ => return false,
                        }
                    }
                }
            }
        };

        if let Err(e) = self.transport.send(&frame) {
            warn!("transport send failed, frame dropped: {}", e);
        }
        true
    }
}

/// One row of the bring-up table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BringupStep {
    Command(HciCommand),
    /// Queue a pause, no controller round trip
    Settle(Duration),
    /// Add every LE key store peer to the controller accept list
    LoadAcceptList,
}

/// Outcome of feeding a command-complete to the bring-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringupProgress {
    /// Not a bring-up command, or bring-up already finished
    Ignored,
    Advanced,
    Retried,
    Restarted,
    Done,
}

/// Fixed command table driven to completion with bounded retry
#[derive(Debug)]
pub struct Bringup {
    steps: Vec<BringupStep>,
    current: usize,
    in_flight: Option<HciCommand>,
    failures: u8,
    max_retry: u8,
    restarts: u32,
    done: bool,
}

impl Bringup {
    pub fn new(steps: Vec<BringupStep>, max_retry: u8) -> Self {
        Self {
            steps,
            current: 0,
            in_flight: None,
            failures: 0,
            max_retry: max_retry.max(1),
            restarts: 0,
            done: false,
        }
    }

    /// The standard table for `config`
    pub fn table(config: &HostConfig) -> Vec<BringupStep> {
        use BringupStep::*;
        let mut steps = vec![
            Command(HciCommand::Reset),
            Settle(config.reset_settle),
            Command(HciCommand::ReadBufferSize),
            Command(HciCommand::ReadBdAddr),
            Command(HciCommand::SetEventMask {
                event_mask: 0x3DBF_F807_FFFB_FFFF,
            }),
            Command(HciCommand::WriteSimplePairingMode { enable: true }),
            Command(HciCommand::WriteLeHostSupported {
                le_supported: true,
                simultaneous: false,
            }),
            Command(HciCommand::LeSetEventMask { event_mask: 0x1F }),
            Command(HciCommand::LeReadBufferSize),
            Command(HciCommand::WriteClassOfDevice {
                class_of_device: config.class_of_device,
            }),
            Command(HciCommand::WriteLocalName {
                name: config.local_name.clone(),
            }),
            Command(HciCommand::WriteDefaultLinkPolicySettings { settings: 0x0005 }),
            Command(HciCommand::WritePageScanActivity {
                interval: 0x0800,
                window: 0x0012,
            }),
            Command(HciCommand::WriteInquiryMode { mode: 0x02 }),
            Command(HciCommand::WriteScanEnable { scan_enable: 0x02 }),
            Command(HciCommand::LeClearAcceptList),
            LoadAcceptList,
            Command(HciCommand::LeSetScanParameters {
                scan_type: 0x00,
                scan_interval: 0x0060,
                scan_window: 0x0030,
                own_address_type: 0x00,
                filter_policy: 0x00,
            }),
        ];
        if config.le_advertising {
            steps.extend([
                Command(HciCommand::LeSetAdvertisingParameters {
                    interval_min: 0x00A0,
                    interval_max: 0x00A0,
                    advertising_type: 0x00,
                    own_address_type: 0x00,
                    channel_map: 0x07,
                    filter_policy: 0x00,
                }),
                Command(HciCommand::LeSetAdvertisingData {
                    data: build_advertising_data(&config.local_name),
                }),
                Command(HciCommand::LeSetAdvertisingEnable { enable: true }),
            ]);
        }
        steps
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn current_step(&self) -> usize {
        self.current
    }

    /// Issues the current step. Steps that need no controller answer are
    /// consumed inline until a command is in flight or the table ends.
    pub fn run_bringup_step(&mut self, tx: &Sequencer, keys: &mut KeyStore) -> HciResult<()> {
        while let Some(step) = self.steps.get(self.current) {
            match step {
                BringupStep::Command(command) => {
                    let command = command.clone();
                    tx.send_command(&command)?;
                    self.in_flight = Some(command);
                    return Ok(());
                }
                BringupStep::Settle(delay) => {
                    tx.enqueue_delay(*delay)?;
                    self.current += 1;
                }
                BringupStep::LoadAcceptList => match keys.next_accept_list_entry() {
                    Some(remote) => {
                        let command = HciCommand::LeAddDeviceToAcceptList {
                            addr_type: remote.kind,
                            addr: remote.addr,
                        };
                        tx.send_command(&command)?;
                        self.in_flight = Some(command);
                        return Ok(());
                    }
                    None => self.current += 1,
                },
            }
        }
        self.in_flight = None;
        self.done = true;
        info!("controller bring-up complete");
        Ok(())
    }

    /// Feeds a command-complete (or failing command-status) for `opcode`.
    pub fn on_command_complete(
        &mut self,
        opcode: u16,
        status: u8,
        tx: &Sequencer,
        keys: &mut KeyStore,
    ) -> HciResult<BringupProgress> {
        let Some(in_flight) = self.in_flight.clone() else {
            return Ok(BringupProgress::Ignored);
        };
        if self.done || in_flight.opcode() != opcode {
            return Ok(BringupProgress::Ignored);
        }

        if status == HCI_SUCCESS {
            self.failures = 0;
            if !matches!(self.steps.get(self.current), Some(BringupStep::LoadAcceptList)) {
                self.current += 1;
            }
            self.in_flight = None;
            self.run_bringup_step(tx, keys)?;
            return Ok(if self.done {
                BringupProgress::Done
            } else {
                BringupProgress::Advanced
            });
        }

        self.failures += 1;
        if self.failures < self.max_retry {
            warn!(
                "bring-up step {} (0x{:04x}) failed with 0x{:02x}, retry {}/{}",
                self.current, opcode, status, self.failures, self.max_retry
            );
            tx.send_command(&in_flight)?;
            return Ok(BringupProgress::Retried);
        }

        error!(
            "bring-up step {} (0x{:04x}) failed {} times, restarting from reset",
            self.current, opcode, self.failures
        );
        self.restarts += 1;
        self.current = 0;
        self.failures = 0;
        self.in_flight = None;
        keys.rewind_accept_list();
        self.run_bringup_step(tx, keys)?;
        Ok(BringupProgress::Restarted)
    }
}
