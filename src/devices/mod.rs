//! Fabric-visible bridged nodes.
//!
//! A [`BridgedNode`] is the data-model face of one accessory function: it
//! answers attribute reads/writes from the fabric and absorbs state pushed
//! by its data provider.  Identity (Bridged Device Basic Information) and
//! Descriptor reads are answered here for every node, so they work even
//! while the accessory is unreachable.

pub mod humidity_sensor;
pub mod on_off_light;
pub mod temperature_sensor;

pub use humidity_sensor::HumiditySensor;
pub use on_off_light::OnOffLight;
pub use temperature_sensor::TemperatureSensor;

use crate::adapters::utils::is_printable_ascii;
use crate::config::{INVALID_ENDPOINT_ID, MAX_NODE_LABEL_LEN, MAX_UNIQUE_ID_LEN};
use crate::error::{BridgeError, Result};

pub type ClusterId = u32;
pub type AttributeId = u32;
pub type CommandId = u32;

/// Cluster, attribute and command identifiers used by the thin nodes.
pub mod clusters {
    use super::{AttributeId, ClusterId, CommandId};

    // Global attributes, valid on every cluster.
    pub const ATTR_FEATURE_MAP: AttributeId = 0xFFFC;
    pub const ATTR_CLUSTER_REVISION: AttributeId = 0xFFFD;

    pub const ON_OFF: ClusterId = 0x0006;
    pub const ATTR_ON_OFF: AttributeId = 0x0000;
    pub const CMD_OFF: CommandId = 0x00;
    pub const CMD_ON: CommandId = 0x01;
    pub const CMD_TOGGLE: CommandId = 0x02;

    pub const DESCRIPTOR: ClusterId = 0x001D;

    pub const BRIDGED_DEVICE_BASIC_INFORMATION: ClusterId = 0x0039;
    pub const ATTR_NODE_LABEL: AttributeId = 0x0005;
    pub const ATTR_REACHABLE: AttributeId = 0x0011;
    pub const ATTR_UNIQUE_ID: AttributeId = 0x0012;

    pub const TEMPERATURE_MEASUREMENT: ClusterId = 0x0402;
    pub const RELATIVE_HUMIDITY_MEASUREMENT: ClusterId = 0x0405;
    pub const ATTR_MEASURED_VALUE: AttributeId = 0x0000;
    pub const ATTR_MIN_MEASURED_VALUE: AttributeId = 0x0001;
    pub const ATTR_MAX_MEASURED_VALUE: AttributeId = 0x0002;
}

use clusters::*;

const BASIC_INFORMATION_REVISION: u16 = 2;
const DESCRIPTOR_REVISION: u16 = 1;

// ───────────────────────────────────────────────────────────────
// Device types
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum DeviceType {
    OnOffLight = 0x0100,
    TemperatureSensor = 0x0302,
    HumiditySensor = 0x0307,
}

impl DeviceType {
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            0x0100 => Some(Self::OnOffLight),
            0x0302 => Some(Self::TemperatureSensor),
            0x0307 => Some(Self::HumiditySensor),
            _ => None,
        }
    }

    pub fn id(self) -> u16 {
        self as u16
    }
}

// ───────────────────────────────────────────────────────────────
// Node identity
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub device_type: DeviceType,
    pub unique_id: heapless::String<MAX_UNIQUE_ID_LEN>,
    pub node_label: heapless::String<MAX_NODE_LABEL_LEN>,
    /// Latched by the registry once the fabric accepts the endpoint.
    pub endpoint_id: u16,
    pub reachable: bool,
}

impl NodeInfo {
    /// Fails with `InvalidArgument` if either string exceeds its bound.
    pub fn new(device_type: DeviceType, unique_id: &str, node_label: &str) -> Result<Self> {
        let mut uid = heapless::String::new();
        uid.push_str(unique_id).map_err(|_| BridgeError::InvalidArgument)?;
        let mut label = heapless::String::new();
        label.push_str(node_label).map_err(|_| BridgeError::InvalidArgument)?;
        Ok(Self {
            device_type,
            unique_id: uid,
            node_label: label,
            endpoint_id: INVALID_ENDPOINT_ID,
            reachable: true,
        })
    }
}

// ───────────────────────────────────────────────────────────────
// Node trait
// ───────────────────────────────────────────────────────────────

/// A bridged node.  Owned by the registry from acceptance until removal.
pub trait BridgedNode {
    fn info(&self) -> &NodeInfo;

    fn info_mut(&mut self) -> &mut NodeInfo;

    /// Encode a device-specific attribute into `buf`, returning its length.
    fn read_attribute(&self, cluster: ClusterId, attribute: AttributeId, buf: &mut [u8]) -> Result<usize>;

    /// Apply a fabric write to a device-specific attribute.
    fn write_attribute(&mut self, cluster: ClusterId, attribute: AttributeId, data: &[u8]) -> Result<()>;

    /// Absorb a state change reported by the provider.  Returns whether
    /// the stored value actually changed.  `Unsupported` means the node
    /// does not carry that attribute.
    fn apply_change(&mut self, cluster: ClusterId, attribute: AttributeId, data: &[u8]) -> Result<bool>;

    /// Execute a command requested by the accessory (e.g. a button press).
    /// Returns the attribute the command changed, if any.
    fn handle_command(&mut self, _cluster: ClusterId, _command: CommandId) -> Result<Option<AttributeId>> {
        Err(BridgeError::Unsupported)
    }
}

// ───────────────────────────────────────────────────────────────
// Identity / generic clusters, shared by every node
// ───────────────────────────────────────────────────────────────

/// Answer identity and descriptor reads.  `None` if `cluster` is
/// device-specific.
pub fn read_common(
    info: &NodeInfo,
    cluster: ClusterId,
    attribute: AttributeId,
    buf: &mut [u8],
) -> Option<Result<usize>> {
    match cluster {
        BRIDGED_DEVICE_BASIC_INFORMATION => Some(match attribute {
            ATTR_NODE_LABEL => encode_char_string(buf, &info.node_label),
            ATTR_REACHABLE => encode(buf, &[u8::from(info.reachable)]),
            ATTR_UNIQUE_ID => encode_char_string(buf, &info.unique_id),
            ATTR_CLUSTER_REVISION => encode(buf, &BASIC_INFORMATION_REVISION.to_le_bytes()),
            ATTR_FEATURE_MAP => encode(buf, &0u32.to_le_bytes()),
            _ => Err(BridgeError::InvalidArgument),
        }),
        DESCRIPTOR => Some(match attribute {
            ATTR_CLUSTER_REVISION => encode(buf, &DESCRIPTOR_REVISION.to_le_bytes()),
            ATTR_FEATURE_MAP => encode(buf, &0u32.to_le_bytes()),
            _ => Err(BridgeError::InvalidArgument),
        }),
        _ => None,
    }
}

/// Handle writes to identity clusters.  Only NodeLabel is writable.
pub fn write_common(
    info: &mut NodeInfo,
    cluster: ClusterId,
    attribute: AttributeId,
    data: &[u8],
) -> Option<Result<()>> {
    match (cluster, attribute) {
        (BRIDGED_DEVICE_BASIC_INFORMATION, ATTR_NODE_LABEL) => Some(set_node_label(info, data)),
        (BRIDGED_DEVICE_BASIC_INFORMATION | DESCRIPTOR, _) => Some(Err(BridgeError::InvalidArgument)),
        _ => None,
    }
}

/// Apply a provider-reported reachability change.
pub fn apply_reachable(info: &mut NodeInfo, data: &[u8]) -> Result<bool> {
    let reachable = *data.first().ok_or(BridgeError::InvalidArgument)? != 0;
    let changed = info.reachable != reachable;
    info.reachable = reachable;
    Ok(changed)
}

fn set_node_label(info: &mut NodeInfo, data: &[u8]) -> Result<()> {
    let label = decode_char_string(data)?;
    if label.len() > MAX_NODE_LABEL_LEN || !is_printable_ascii(label) {
        return Err(BridgeError::InvalidArgument);
    }
    info.node_label.clear();
    info.node_label
        .push_str(label)
        .map_err(|_| BridgeError::InvalidArgument)
}

// ───────────────────────────────────────────────────────────────
// Attribute encoding
// ───────────────────────────────────────────────────────────────

/// Copy a fixed-width value into the read buffer.
pub(crate) fn encode(buf: &mut [u8], bytes: &[u8]) -> Result<usize> {
    let dst = buf
        .get_mut(..bytes.len())
        .ok_or(BridgeError::InvalidArgument)?;
    dst.copy_from_slice(bytes);
    Ok(bytes.len())
}

/// Length-prefixed character string, as the data model stores them.
pub(crate) fn encode_char_string(buf: &mut [u8], s: &str) -> Result<usize> {
    let len = u8::try_from(s.len()).map_err(|_| BridgeError::InvalidArgument)?;
    let dst = buf
        .get_mut(..1 + s.len())
        .ok_or(BridgeError::InvalidArgument)?;
    dst[0] = len;
    dst[1..].copy_from_slice(s.as_bytes());
    Ok(1 + s.len())
}

pub(crate) fn decode_char_string(data: &[u8]) -> Result<&str> {
    let (&len, rest) = data.split_first().ok_or(BridgeError::InvalidArgument)?;
    let bytes = rest
        .get(..len as usize)
        .ok_or(BridgeError::InvalidArgument)?;
    core::str::from_utf8(bytes).map_err(|_| BridgeError::InvalidArgument)
}

pub(crate) fn decode_u16(data: &[u8]) -> Result<u16> {
    match data {
        [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
        _ => Err(BridgeError::InvalidArgument),
    }
}
