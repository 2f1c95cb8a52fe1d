//! Persistent pairing keys
//!
//! Classic link keys and LE long-term keys live in two fixed-capacity rings.
//! A new address takes the slot under the write index and advances it,
//! evicting the oldest entry once the ring is full. Updating an address that
//! is already known rewrites its slot in place and leaves the index alone.
//!
//! Every store rewrites the whole ring file. Write failures are logged and
//! otherwise ignored; a lost key only means the peer has to pair again.

use crate::gap::{AddressType, BdAddr, RemoteAddress};
use crate::storage::Storage;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info, warn};
use std::io::{Cursor, Read};
use std::sync::Arc;

/// Entries per ring
pub const KEY_RING_SIZE: usize = 16;

pub const CLASSIC_KEYS_FILE: &str = "link_keys.bin";
pub const LE_KEYS_FILE: &str = "le_keys.bin";

pub type LinkKey = [u8; 16];
pub type Ltk = [u8; 16];

/// Encrypted diversifier and random number identifying an LTK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MasterIdent {
    pub ediv: u16,
    pub rand: [u8; 8],
}

trait RingEntry: Copy + Default {
    const ENCODED_LEN: usize;

    fn addr(&self) -> &BdAddr;
    fn encode(&self, out: &mut Vec<u8>);
    fn decode(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Self>;

    fn is_empty(&self) -> bool {
        self.addr().is_zero()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ClassicEntry {
    addr: BdAddr,
    link_key: LinkKey,
}

impl RingEntry for ClassicEntry {
    const ENCODED_LEN: usize = 6 + 16;

    fn addr(&self) -> &BdAddr {
        &self.addr
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.addr.bytes);
        out.extend_from_slice(&self.link_key);
    }

    fn decode(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        let mut entry = ClassicEntry::default();
        cursor.read_exact(&mut entry.addr.bytes)?;
        cursor.read_exact(&mut entry.link_key)?;
        Ok(entry)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct LeEntry {
    addr: BdAddr,
    kind: AddressType,
    ltk: Ltk,
    ident: MasterIdent,
}

impl RingEntry for LeEntry {
    const ENCODED_LEN: usize = 6 + 1 + 16 + 2 + 8;

    fn addr(&self) -> &BdAddr {
        &self.addr
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.addr.bytes);
        out.push(u8::from(self.kind));
        out.extend_from_slice(&self.ltk);
        out.extend_from_slice(&self.ident.ediv.to_le_bytes());
        out.extend_from_slice(&self.ident.rand);
    }

    fn decode(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        let mut entry = LeEntry::default();
        cursor.read_exact(&mut entry.addr.bytes)?;
        entry.kind = AddressType::from(cursor.read_u8()?);
        cursor.read_exact(&mut entry.ltk)?;
        entry.ident.ediv = cursor.read_u16::<LittleEndian>()?;
        cursor.read_exact(&mut entry.ident.rand)?;
        Ok(entry)
    }
}

#[derive(Debug)]
struct KeyRing<T: RingEntry> {
    entries: [T; KEY_RING_SIZE],
    index: usize,
}

impl<T: RingEntry> KeyRing<T> {
    fn new() -> Self {
        Self {
            entries: [T::default(); KEY_RING_SIZE],
            index: 0,
        }
    }

    fn find(&self, pred: impl Fn(&T) -> bool) -> Option<usize> {
        self.entries.iter().position(|e| !e.is_empty() && pred(e))
    }

    /// Slot for an address: its current slot, or the write index (advanced).
    fn slot_for(&mut self, pred: impl Fn(&T) -> bool) -> usize {
        match self.find(pred) {
            Some(slot) => slot,
            None => {
                let slot = self.index;
                if !self.entries[slot].is_empty() {
                    debug!("key ring full, evicting {}", self.entries[slot].addr());
                }
                self.entries[slot] = T::default();
                self.index = (self.index + 1) % KEY_RING_SIZE;
                slot
            }
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + KEY_RING_SIZE * T::ENCODED_LEN);
        // Vec<u8> writes cannot fail
        let _ = out.write_u32::<LittleEndian>(self.index as u32);
        for entry in &self.entries {
            entry.encode(&mut out);
        }
        out
    }

    fn from_bytes(data: &[u8]) -> std::io::Result<Self> {
        let mut cursor = Cursor::new(data);
        let index = cursor.read_u32::<LittleEndian>()? as usize % KEY_RING_SIZE;
        let mut ring = Self::new();
        ring.index = index;
        for entry in ring.entries.iter_mut() {
            *entry = T::decode(&mut cursor)?;
        }
        Ok(ring)
    }
}

/// Classic and LE key rings backed by durable storage
pub struct KeyStore {
    storage: Arc<dyn Storage>,
    classic: KeyRing<ClassicEntry>,
    le: KeyRing<LeEntry>,
    accept_cursor: usize,
}

impl KeyStore {
    /// Loads both rings; a missing or unreadable file yields an empty ring.
    pub fn load(storage: Arc<dyn Storage>) -> Self {
        let classic = Self::load_ring(storage.as_ref(), CLASSIC_KEYS_FILE);
        let le = Self::load_ring(storage.as_ref(), LE_KEYS_FILE);
        Self {
            storage,
            classic,
            le,
            accept_cursor: 0,
        }
    }

    fn load_ring<T: RingEntry>(storage: &dyn Storage, name: &str) -> KeyRing<T> {
        match storage.read(name) {
            Ok(Some(data)) => KeyRing::from_bytes(&data).unwrap_or_else(|e| {
                warn!("discarding corrupt key file {}: {}", name, e);
                KeyRing::new()
            }),
            Ok(None) => KeyRing::new(),
            Err(e) => {
                warn!("failed to read key file {}: {}", name, e);
                KeyRing::new()
            }
        }
    }

    fn persist_classic(&self) {
        if let Err(e) = self.storage.write(CLASSIC_KEYS_FILE, &self.classic.to_bytes()) {
            warn!("link key not persisted: {}", e);
        }
    }

    fn persist_le(&self) {
        if let Err(e) = self.storage.write(LE_KEYS_FILE, &self.le.to_bytes()) {
            warn!("LE keys not persisted: {}", e);
        }
    }

    pub fn load_classic(&self, addr: &BdAddr) -> Option<LinkKey> {
        self.classic
            .find(|e| e.addr == *addr)
            .map(|slot| self.classic.entries[slot].link_key)
    }

    pub fn store_classic(&mut self, addr: &BdAddr, key: &LinkKey) {
        let slot = self.classic.slot_for(|e| e.addr == *addr);
        self.classic.entries[slot] = ClassicEntry {
            addr: *addr,
            link_key: *key,
        };
        info!("stored link key for {}", addr);
        self.persist_classic();
    }

    pub fn load_le(&self, remote: &RemoteAddress) -> Option<(Ltk, MasterIdent)> {
        self.le
            .find(|e| e.addr == remote.addr && e.kind == remote.kind)
            .map(|slot| {
                let entry = &self.le.entries[slot];
                (entry.ltk, entry.ident)
            })
    }

    fn le_slot(&mut self, remote: &RemoteAddress) -> usize {
        let slot = self
            .le
            .slot_for(|e| e.addr == remote.addr && e.kind == remote.kind);
        let entry = &mut self.le.entries[slot];
        entry.addr = remote.addr;
        entry.kind = remote.kind;
        slot
    }

    pub fn store_le_ltk(&mut self, remote: &RemoteAddress, ltk: &Ltk) {
        let slot = self.le_slot(remote);
        self.le.entries[slot].ltk = *ltk;
        info!("stored LTK for {}", remote);
        self.persist_le();
    }

    pub fn store_le_ident(&mut self, remote: &RemoteAddress, ident: &MasterIdent) {
        let slot = self.le_slot(remote);
        self.le.entries[slot].ident = *ident;
        debug!("stored EDIV 0x{:04x} for {}", ident.ediv, remote);
        self.persist_le();
    }

    pub fn clear_le(&mut self, remote: &RemoteAddress) {
        if let Some(slot) = self
            .le
            .find(|e| e.addr == remote.addr && e.kind == remote.kind)
        {
            self.le.entries[slot] = LeEntry::default();
            info!("cleared LE keys for {}", remote);
            self.persist_le();
        }
    }

    /// Forgets every key, classic and LE
    pub fn clear_all(&mut self) {
        self.classic = KeyRing::new();
        self.le = KeyRing::new();
        self.accept_cursor = 0;
        self.persist_classic();
        self.persist_le();
    }

    /// Walks the non-empty LE entries for accept-list loading. Returns `None`
    /// once after the last entry, then starts over.
    pub fn next_accept_list_entry(&mut self) -> Option<RemoteAddress> {
        while self.accept_cursor < KEY_RING_SIZE {
            let entry = &self.le.entries[self.accept_cursor];
            self.accept_cursor += 1;
            if !entry.is_empty() {
                return Some(RemoteAddress::le(entry.addr, entry.kind));
            }
        }
        self.accept_cursor = 0;
        None
    }

    /// Restarts [`KeyStore::next_accept_list_entry`] from the first entry
    pub fn rewind_accept_list(&mut self) {
        self.accept_cursor = 0;
    }

    #[cfg(test)]
    pub(crate) fn classic_write_index(&self) -> usize {
        self.classic.index
    }
}
