//! Forward-only schema migration.
//!
//! | Version | Layout                                                        |
//! |---------|---------------------------------------------------------------|
//! | none/0  | one key per field: `br/<i>/ep`, `br/<i>/dt`, `br/<i>/lbl`, `br/<i>/ud` |
//! | 1       | flat record at `br/dev/<i>`, no unique id                     |
//! | 2       | flat record at `br/dev/<i>` with unique id                    |
//!
//! Each step converts every occupied index and stamps its version only
//! after all of them succeeded, so an interrupted step is re-run from the
//! start on the next boot.  Steps whose decoder is compiled out fail
//! closed with `Unsupported`.

use log::{debug, error, info};
use rand_core::RngCore;

use super::{IndexList, NAMESPACE};
use super::{KEY_COUNT, KEY_INDEXES, KEY_VERSION};
use crate::app::ports::StoragePort;
use crate::config::STORAGE_VERSION;
use crate::error::{BridgeError, Result};

pub fn read_version<S: StoragePort>(port: &S) -> Result<Option<u8>> {
    let mut buf = [0u8; 1];
    match port.read(NAMESPACE, KEY_VERSION, &mut buf) {
        Ok(1) => Ok(Some(buf[0])),
        Ok(_) => Err(BridgeError::InvalidArgument),
        Err(crate::app::ports::StorageError::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_version<S: StoragePort>(port: &mut S, version: u8) -> Result<()> {
    port.write(NAMESPACE, KEY_VERSION, &[version])?;
    Ok(())
}

/// Run every step between the stored version and [`STORAGE_VERSION`].
///
/// Already-current storage is left untouched (zero writes).
pub fn migrate<S: StoragePort>(port: &mut S, rng: &mut impl RngCore) -> Result<()> {
    let mut version = match read_version(port)? {
        Some(v) if v == STORAGE_VERSION => {
            debug!("Storage: schema v{} is current", v);
            return Ok(());
        }
        Some(v) if v > STORAGE_VERSION => {
            error!("Storage: schema v{} is newer than supported v{}", v, STORAGE_VERSION);
            return Err(BridgeError::Unsupported);
        }
        Some(v) => v,
        None if !port.exists(NAMESPACE, KEY_COUNT) && !port.exists(NAMESPACE, KEY_INDEXES) => {
            info!("Storage: fresh store, stamping schema v{}", STORAGE_VERSION);
            return write_version(port, STORAGE_VERSION);
        }
        None => 0,
    };

    info!("Storage: migrating schema v{} -> v{}", version, STORAGE_VERSION);
    while version < STORAGE_VERSION {
        match version {
            0 => v0::migrate_to_v1(port)?,
            1 => v1::migrate_to_v2(port, rng)?,
            _ => return Err(BridgeError::Internal),
        }
        version += 1;
        write_version(port, version)?;
        info!("Storage: schema now v{}", version);
    }
    Ok(())
}

fn occupied<S: StoragePort>(port: &S) -> Result<IndexList> {
    super::read_index_list_or_empty(port)
}

// ───────────────────────────────────────────────────────────────
// v0 → v1: per-field keys into one flat record
// ───────────────────────────────────────────────────────────────

#[cfg(feature = "storage-migration-v0")]
mod v0 {
    use core::fmt::Write;

    use log::debug;

    use super::occupied;
    use crate::app::ports::{StorageError, StoragePort};
    use crate::config::{MAX_NODE_LABEL_LEN, MAX_USER_DATA_SIZE};
    use crate::error::{BridgeError, Result};
    use crate::providers::UserData;
    use crate::storage::{device_key, Key, PersistedRecord, NAMESPACE};

    const FIELDS: [&str; 4] = ["ep", "dt", "lbl", "ud"];

    fn field_key(index: u8, field: &str) -> Key {
        let mut k = Key::new();
        let _ = write!(k, "br/{}/{}", index, field);
        k
    }

    fn read_u16<S: StoragePort>(port: &S, index: u8, field: &str) -> Result<u16> {
        let mut buf = [0u8; 2];
        match port.read(NAMESPACE, &field_key(index, field), &mut buf)? {
            2 => Ok(u16::from_le_bytes(buf)),
            _ => Err(BridgeError::NotFound),
        }
    }

    /// Optional field: absent reads as empty.
    fn read_optional<'a, S: StoragePort>(port: &S, index: u8, field: &str, buf: &'a mut [u8]) -> Result<&'a [u8]> {
        match port.read(NAMESPACE, &field_key(index, field), buf) {
            Ok(n) => Ok(&buf[..n]),
            Err(StorageError::NotFound) => Ok(&[]),
            Err(e) => Err(e.into()),
        }
    }

    pub(super) fn migrate_to_v1<S: StoragePort>(port: &mut S) -> Result<()> {
        for index in occupied(port)? {
            let ep_key = field_key(index, "ep");
            if !port.exists(NAMESPACE, &ep_key) && port.exists(NAMESPACE, &device_key(index)) {
                // Converted by an interrupted earlier run.
                continue;
            }
            let mut record = PersistedRecord {
                endpoint_id: read_u16(port, index, "ep")?,
                device_type: read_u16(port, index, "dt")?,
                ..Default::default()
            };

            let mut label = [0u8; MAX_NODE_LABEL_LEN];
            let label = read_optional(port, index, "lbl", &mut label)?;
            let label = core::str::from_utf8(label).map_err(|_| BridgeError::InvalidArgument)?;
            record
                .node_label
                .push_str(label)
                .map_err(|_| BridgeError::InvalidArgument)?;

            let mut ud = [0u8; MAX_USER_DATA_SIZE];
            record.user_data = UserData::from_slice(read_optional(port, index, "ud", &mut ud)?)
                .map_err(|_| BridgeError::InvalidArgument)?;

            port.write(NAMESPACE, &device_key(index), &record.encode_v1())?;
            for field in FIELDS {
                port.delete(NAMESPACE, &field_key(index, field))?;
            }
            debug!("Storage: slot {} converted to v1", index);
        }
        Ok(())
    }
}

#[cfg(not(feature = "storage-migration-v0"))]
mod v0 {
    use log::error;

    use crate::app::ports::StoragePort;
    use crate::error::{BridgeError, Result};

    pub(super) fn migrate_to_v1<S: StoragePort>(_port: &mut S) -> Result<()> {
        error!("Storage: pre-versioning layout found but its migration is not built in");
        Err(BridgeError::Unsupported)
    }
}

// ───────────────────────────────────────────────────────────────
// v1 → v2: synthesise unique ids
// ───────────────────────────────────────────────────────────────

#[cfg(feature = "storage-migration-v1")]
mod v1 {
    use log::debug;
    use rand_core::RngCore;

    use super::occupied;
    use crate::app::ports::StoragePort;
    use crate::config::MAX_BRIDGED_DEVICES;
    use crate::error::Result;
    use crate::factory::generate_unique_id;
    use crate::storage::{device_key, PersistedRecord, MAX_RECORD_SIZE, NAMESPACE};

    pub(super) fn migrate_to_v2<S: StoragePort>(port: &mut S, rng: &mut impl RngCore) -> Result<()> {
        // Decode everything first so a bad record aborts before any rewrite.
        let mut pending: heapless::Vec<(u8, PersistedRecord), MAX_BRIDGED_DEVICES> = heapless::Vec::new();
        for index in occupied(port)? {
            let mut buf = [0u8; MAX_RECORD_SIZE];
            let n = port.read(NAMESPACE, &device_key(index), &mut buf)?;
            let record = PersistedRecord::decode_v1(&buf[..n])?;
            // The index list holds at most MAX_BRIDGED_DEVICES entries.
            let _ = pending.push((index, record));
        }
        for (index, mut record) in pending {
            record.unique_id = generate_unique_id(rng);
            port.write(NAMESPACE, &device_key(index), &record.encode())?;
            debug!("Storage: slot {} converted to v2 (uid {})", index, record.unique_id);
        }
        Ok(())
    }
}

#[cfg(not(feature = "storage-migration-v1"))]
mod v1 {
    use log::error;
    use rand_core::RngCore;

    use crate::app::ports::StoragePort;
    use crate::error::{BridgeError, Result};

    pub(super) fn migrate_to_v2<S: StoragePort>(_port: &mut S, _rng: &mut impl RngCore) -> Result<()> {
        error!("Storage: schema v1 found but its migration is not built in");
        Err(BridgeError::Unsupported)
    }
}
