//! Collaborators for running on a Linux host
//!
//! Reports are logged instead of forwarded to a console, and the platform
//! services are backed by files in the data directory.

use bluebridge::{
    DescriptorParser, DriverStep, HidContext, HidDriver, Platform, ReportBridge, ReportInfo,
    ReportKind, ReportMap, SessionId,
};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

const MEMCARD_FILE: &str = "memcard.bin";
const OTA_FILE: &str = "ota.bin";
/// One standard memory card
const MEMCARD_SIZE: usize = 128 * 1024;

/// Reads report ids and sizes out of the main items of a report descriptor
pub struct ReportScanner;

impl DescriptorParser for ReportScanner {
    fn parse_descriptor(&self, session: SessionId, descriptor: &[u8]) -> ReportMap {
        let map = scan_reports(descriptor);
        debug!("session {}: {} reports declared", session, map.reports.len());
        map
    }
}

fn scan_reports(descriptor: &[u8]) -> ReportMap {
    // (id, kind, bits)
    let mut found: Vec<(u8, ReportKind, u32)> = Vec::new();
    let (mut report_id, mut report_size, mut report_count) = (0u8, 0u32, 0u32);
    let mut pos = 0;

    while pos < descriptor.len() {
        let prefix = descriptor[pos];
        if prefix == 0xFE {
            // Long item
            let len = descriptor.get(pos + 1).copied().unwrap_or(0) as usize;
            pos += 3 + len;
            continue;
        }
        let len = match prefix & 0x03 {
            3 => 4,
            n => n as usize,
        };
        let Some(data) = descriptor.get(pos + 1..pos + 1 + len) else {
            break;
        };
        let value = data
            .iter()
            .rev()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));

        let kind = match prefix & 0xFC {
            0x84 => {
                report_id = value as u8;
                None
            }
            0x74 => {
                report_size = value;
                None
            }
            0x94 => {
                report_count = value;
                None
            }
            0x80 => Some(ReportKind::Input),
            0x90 => Some(ReportKind::Output),
            0xB0 => Some(ReportKind::Feature),
            _ => None,
        };
        if let Some(kind) = kind {
            let bits = report_size.saturating_mul(report_count);
            match found.iter_mut().find(|(id, k, _)| *id == report_id && *k == kind) {
                Some(entry) => entry.2 = entry.2.saturating_add(bits),
                None => found.push((report_id, kind, bits)),
            }
        }
        pos += 1 + len;
    }

    ReportMap {
        reports: found
            .into_iter()
            .map(|(id, kind, bits)| ReportInfo {
                id,
                kind,
                len: bits.div_ceil(8).min(u32::from(u16::MAX)) as u16,
            })
            .collect(),
    }
}

/// Logs every bridged report
pub struct LogBridge;

impl ReportBridge for LogBridge {
    fn bridge(&self, session: SessionId, report_id: u8, data: &[u8]) {
        tracing::trace!(
            "session {}: report {} {}",
            session,
            report_id,
            hex::encode(data)
        );
    }
}

/// Driver for peers that stream reports without any setup
pub struct PassiveDriver;

impl HidDriver for PassiveDriver {
    fn init(&self, ctx: &mut HidContext<'_>) -> DriverStep {
        info!("session {}: ready", ctx.session.id);
        DriverStep::Done
    }

    fn on_timer(&self, _ctx: &mut HidContext<'_>) -> DriverStep {
        DriverStep::Done
    }
}

/// Platform services kept under the data directory
pub struct FilePlatform {
    root: PathBuf,
    ota: Mutex<Option<File>>,
    listing: Mutex<VecDeque<String>>,
}

impl FilePlatform {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            ota: Mutex::new(None),
            listing: Mutex::new(VecDeque::new()),
        }
    }

    fn memcard(&self, write: bool) -> std::io::Result<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(write)
            .create(write)
            .truncate(false)
            .open(self.root.join(MEMCARD_FILE))?;
        if write && file.metadata()?.len() < MEMCARD_SIZE as u64 {
            file.set_len(MEMCARD_SIZE as u64)?;
        }
        Ok(file)
    }
}

impl Platform for FilePlatform {
    fn reboot(&self) {
        info!("reboot requested");
    }

    fn factory_reset(&self) {
        info!("factory reset requested");
    }

    fn sleep(&self) {
        info!("sleep requested");
    }

    fn ota_begin(&self) -> bool {
        match File::create(self.root.join(OTA_FILE)) {
            Ok(file) => {
                if let Ok(mut ota) = self.ota.lock() {
                    *ota = Some(file);
                    return true;
                }
                false
            }
            Err(e) => {
                warn!("ota: {}", e);
                false
            }
        }
    }

    fn ota_write(&self, chunk: &[u8]) -> bool {
        let Ok(mut ota) = self.ota.lock() else {
            return false;
        };
        match ota.as_mut() {
            Some(file) => file.write_all(chunk).is_ok(),
            None => false,
        }
    }

    fn ota_end(&self) -> bool {
        let Ok(mut ota) = self.ota.lock() else {
            return false;
        };
        match ota.take() {
            Some(file) => {
                let ok = file.sync_all().is_ok();
                info!("ota image stored");
                ok
            }
            None => false,
        }
    }

    fn ota_abort(&self) {
        if let Ok(mut ota) = self.ota.lock() {
            if ota.take().is_some() {
                let _ = fs::remove_file(self.root.join(OTA_FILE));
                info!("ota aborted");
            }
        }
    }

    fn dir_open(&self) {
        let mut names: Vec<String> = fs::read_dir(&self.root)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.file_name().into_string().ok())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        if let Ok(mut listing) = self.listing.lock() {
            *listing = names.into();
        }
    }

    fn next_dir_entry(&self) -> Option<String> {
        self.listing.lock().ok()?.pop_front()
    }

    fn firmware_name(&self) -> String {
        format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }

    fn mc_size(&self) -> usize {
        MEMCARD_SIZE
    }

    fn mc_read(&self, offset: usize, buf: &mut [u8]) -> usize {
        if offset >= MEMCARD_SIZE {
            return 0;
        }
        let len = buf.len().min(MEMCARD_SIZE - offset);
        let Ok(mut file) = self.memcard(false) else {
            // Unwritten card reads as erased
            buf[..len].fill(0xFF);
            return len;
        };
        let mut read = 0;
        if file.seek(SeekFrom::Start(offset as u64)).is_ok() {
            while read < len {
                match file.read(&mut buf[read..len]) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => read += n,
                }
            }
        }
        buf[read..len].fill(0xFF);
        len
    }

    fn mc_write(&self, offset: usize, data: &[u8]) -> usize {
        if offset >= MEMCARD_SIZE {
            return 0;
        }
        let len = data.len().min(MEMCARD_SIZE - offset);
        let result = self.memcard(true).and_then(|mut file| {
            file.seek(SeekFrom::Start(offset as u64))?;
            file.write_all(&data[..len])
        });
        match result {
            Ok(()) => len,
            Err(e) => {
                warn!("memory card: {}", e);
                0
            }
        }
    }

    fn battery_level(&self) -> u8 {
        100
    }
}
