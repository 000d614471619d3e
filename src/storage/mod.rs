//! Versioned persistent storage for bridged-device pairings.
//!
//! Everything lives in the `bridge` namespace of the [`StoragePort`]:
//!
//! | Key          | Contents                                   |
//! |--------------|--------------------------------------------|
//! | `br/ver`     | schema version (`u8`)                      |
//! | `br/cnt`     | number of occupied slots (`u8`)            |
//! | `br/idx`     | occupied slot indices, one byte each       |
//! | `br/dev/<i>` | flat [`PersistedRecord`] for slot `i`      |
//!
//! [`BridgeStorage::init`] runs the forward migration chain once at boot.

pub mod migration;
pub mod record;

pub use record::{PersistedRecord, RecordBytes, MAX_RECORD_SIZE};

use core::fmt::Write;

use log::debug;
use rand_core::RngCore;

use crate::app::ports::StoragePort;
use crate::config::MAX_BRIDGED_DEVICES;
use crate::error::{BridgeError, Result};

pub(crate) const NAMESPACE: &str = "bridge";
pub(crate) const KEY_VERSION: &str = "br/ver";
pub(crate) const KEY_COUNT: &str = "br/cnt";
pub(crate) const KEY_INDEXES: &str = "br/idx";

pub type IndexList = heapless::Vec<u8, MAX_BRIDGED_DEVICES>;

/// Storage key, e.g. `br/dev/12` or `br/3/lbl`.
pub(crate) type Key = heapless::String<16>;

pub(crate) fn device_key(index: u8) -> Key {
    let mut k = Key::new();
    // "br/dev/255" is 10 bytes.
    let _ = write!(k, "br/dev/{}", index);
    k
}

pub struct BridgeStorage<S> {
    port: S,
}

impl<S: StoragePort> BridgeStorage<S> {
    pub fn new(port: S) -> Self {
        Self { port }
    }

    pub fn port(&self) -> &S {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut S {
        &mut self.port
    }

    /// Bring the stored layout up to the current version.  Any failure
    /// must stop bring-up.
    pub fn init(&mut self, rng: &mut impl RngCore) -> Result<()> {
        migration::migrate(&mut self.port, rng)
    }

    pub fn load_version(&self) -> Result<Option<u8>> {
        migration::read_version(&self.port)
    }

    // ── Records ───────────────────────────────────────────────

    pub fn store_record(&mut self, index: u8, record: &PersistedRecord) -> Result<()> {
        check_index(index)?;
        self.port
            .write(NAMESPACE, &device_key(index), &record.encode())?;
        debug!("Storage: stored record {}", index);
        Ok(())
    }

    pub fn load_record(&self, index: u8) -> Result<PersistedRecord> {
        check_index(index)?;
        let mut buf = [0u8; MAX_RECORD_SIZE];
        let n = self.port.read(NAMESPACE, &device_key(index), &mut buf)?;
        PersistedRecord::decode(&buf[..n])
    }

    pub fn remove_record(&mut self, index: u8) -> Result<()> {
        check_index(index)?;
        self.port.delete(NAMESPACE, &device_key(index))?;
        Ok(())
    }

    // ── Index list and count ──────────────────────────────────

    pub fn store_index_list(&mut self, indexes: &[u8]) -> Result<()> {
        if indexes.len() > MAX_BRIDGED_DEVICES {
            return Err(BridgeError::InvalidArgument);
        }
        self.port.write(NAMESPACE, KEY_INDEXES, indexes)?;
        Ok(())
    }

    /// Occupied indices in insertion order.  `NotFound` on fresh storage.
    pub fn load_index_list(&self) -> Result<IndexList> {
        read_index_list(&self.port)
    }

    pub fn store_count(&mut self, count: u8) -> Result<()> {
        self.port.write(NAMESPACE, KEY_COUNT, &[count])?;
        Ok(())
    }

    pub fn load_count(&self) -> Result<u8> {
        let mut buf = [0u8; 1];
        match self.port.read(NAMESPACE, KEY_COUNT, &mut buf)? {
            1 => Ok(buf[0]),
            _ => Err(BridgeError::NotFound),
        }
    }
}

fn check_index(index: u8) -> Result<()> {
    if (index as usize) < MAX_BRIDGED_DEVICES {
        Ok(())
    } else {
        Err(BridgeError::InvalidArgument)
    }
}

pub(crate) fn read_index_list<S: StoragePort>(port: &S) -> Result<IndexList> {
    let mut buf = [0u8; MAX_BRIDGED_DEVICES + 1];
    let n = port.read(NAMESPACE, KEY_INDEXES, &mut buf)?;
    if n > MAX_BRIDGED_DEVICES {
        return Err(BridgeError::InvalidArgument);
    }
    let mut list = IndexList::new();
    for &index in &buf[..n] {
        check_index(index)?;
        if list.contains(&index) {
            return Err(BridgeError::InvalidArgument);
        }
        // n <= capacity, checked above.
        let _ = list.push(index);
    }
    Ok(list)
}

/// Same as [`read_index_list`] but an absent list is empty.
pub(crate) fn read_index_list_or_empty<S: StoragePort>(port: &S) -> Result<IndexList> {
    match read_index_list(port) {
        Err(BridgeError::NotFound) => Ok(IndexList::new()),
        other => other,
    }
}
