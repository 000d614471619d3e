//! Flat persisted-record codec.
//!
//! Layout (little-endian, current version):
//!
//! ```text
//! endpointId:u16 | deviceType:u16 | uidLen:u8 | uid | labelLen:u8 | label | [udLen:u8 | ud]
//! ```
//!
//! The user-data trailer is written only when user data is non-empty.
//! Version 1 records are identical minus the unique-id field.  Decoding
//! never reads past the buffer: a short record is `NotFound`, an
//! out-of-bounds length or non-UTF-8 text is `InvalidArgument`.

use crate::config::{MAX_NODE_LABEL_LEN, MAX_UNIQUE_ID_LEN, MAX_USER_DATA_SIZE};
use crate::error::{BridgeError, Result};
use crate::providers::UserData;

/// Largest encoded record.
pub const MAX_RECORD_SIZE: usize =
    2 + 2 + 1 + MAX_UNIQUE_ID_LEN + 1 + MAX_NODE_LABEL_LEN + 1 + MAX_USER_DATA_SIZE;

pub type RecordBytes = heapless::Vec<u8, MAX_RECORD_SIZE>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PersistedRecord {
    pub endpoint_id: u16,
    pub device_type: u16,
    pub unique_id: heapless::String<MAX_UNIQUE_ID_LEN>,
    pub node_label: heapless::String<MAX_NODE_LABEL_LEN>,
    pub user_data: UserData,
}

impl PersistedRecord {
    pub fn encode(&self) -> RecordBytes {
        let mut w = Writer::default();
        w.u16(self.endpoint_id);
        w.u16(self.device_type);
        w.short_bytes(self.unique_id.as_bytes());
        w.short_bytes(self.node_label.as_bytes());
        if !self.user_data.is_empty() {
            w.short_bytes(&self.user_data);
        }
        w.out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let endpoint_id = r.u16()?;
        let device_type = r.u16()?;
        let unique_id = r.string::<MAX_UNIQUE_ID_LEN>()?;
        let node_label = r.string::<MAX_NODE_LABEL_LEN>()?;
        let user_data = r.trailer()?;
        Ok(Self {
            endpoint_id,
            device_type,
            unique_id,
            node_label,
            user_data,
        })
    }

    /// Version 1 layout: no unique id.
    #[cfg(feature = "storage-migration-v1")]
    pub fn encode_v1(&self) -> RecordBytes {
        let mut w = Writer::default();
        w.u16(self.endpoint_id);
        w.u16(self.device_type);
        w.short_bytes(self.node_label.as_bytes());
        if !self.user_data.is_empty() {
            w.short_bytes(&self.user_data);
        }
        w.out
    }

    /// Decode a version 1 record; `unique_id` comes back empty.
    #[cfg(feature = "storage-migration-v1")]
    pub fn decode_v1(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let endpoint_id = r.u16()?;
        let device_type = r.u16()?;
        let node_label = r.string::<MAX_NODE_LABEL_LEN>()?;
        let user_data = r.trailer()?;
        Ok(Self {
            endpoint_id,
            device_type,
            unique_id: heapless::String::new(),
            node_label,
            user_data,
        })
    }
}

// ───────────────────────────────────────────────────────────────
// Bounds-checked cursor
// ───────────────────────────────────────────────────────────────

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(BridgeError::NotFound)?;
        let s = self.buf.get(self.pos..end).ok_or(BridgeError::NotFound)?;
        self.pos = end;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn string<const N: usize>(&mut self) -> Result<heapless::String<N>> {
        let len = self.u8()? as usize;
        if len > N {
            return Err(BridgeError::InvalidArgument);
        }
        let text = core::str::from_utf8(self.take(len)?).map_err(|_| BridgeError::InvalidArgument)?;
        let mut s = heapless::String::new();
        s.push_str(text).map_err(|_| BridgeError::InvalidArgument)?;
        Ok(s)
    }

    /// Optional user-data trailer; must consume the record exactly.
    fn trailer(&mut self) -> Result<UserData> {
        if self.pos == self.buf.len() {
            return Ok(UserData::new());
        }
        let len = self.u8()? as usize;
        if len > MAX_USER_DATA_SIZE {
            return Err(BridgeError::InvalidArgument);
        }
        let data = UserData::from_slice(self.take(len)?).map_err(|_| BridgeError::InvalidArgument)?;
        if self.pos != self.buf.len() {
            return Err(BridgeError::InvalidArgument);
        }
        Ok(data)
    }
}

#[derive(Default)]
struct Writer {
    out: RecordBytes,
}

impl Writer {
    // Field bounds keep every record within MAX_RECORD_SIZE, so pushes
    // cannot overflow.
    fn u16(&mut self, v: u16) {
        let _ = self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn short_bytes(&mut self, bytes: &[u8]) {
        let _ = self.out.push(bytes.len() as u8);
        let _ = self.out.extend_from_slice(bytes);
    }
}
