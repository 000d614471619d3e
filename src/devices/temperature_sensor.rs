//! Temperature sensor.  Values are hundredths of a degree Celsius.

use super::clusters::*;
use super::{decode_u16, encode, AttributeId, BridgedNode, ClusterId, DeviceType, NodeInfo};
use crate::error::{BridgeError, Result};

const REVISION: u16 = 4;
const MIN_MEASURED: i16 = -4_000;
const MAX_MEASURED: i16 = 8_500;

pub struct TemperatureSensor {
    info: NodeInfo,
    measured: i16,
}

impl TemperatureSensor {
    pub fn new(unique_id: &str, node_label: &str) -> Result<Self> {
        Ok(Self {
            info: NodeInfo::new(DeviceType::TemperatureSensor, unique_id, node_label)?,
            measured: 0,
        })
    }

    pub fn measured(&self) -> i16 {
        self.measured
    }
}

impl BridgedNode for TemperatureSensor {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut NodeInfo {
        &mut self.info
    }

    fn read_attribute(&self, cluster: ClusterId, attribute: AttributeId, buf: &mut [u8]) -> Result<usize> {
        if cluster != TEMPERATURE_MEASUREMENT {
            return Err(BridgeError::InvalidArgument);
        }
        match attribute {
            ATTR_MEASURED_VALUE => encode(buf, &self.measured.to_le_bytes()),
            ATTR_MIN_MEASURED_VALUE => encode(buf, &MIN_MEASURED.to_le_bytes()),
            ATTR_MAX_MEASURED_VALUE => encode(buf, &MAX_MEASURED.to_le_bytes()),
            ATTR_CLUSTER_REVISION => encode(buf, &REVISION.to_le_bytes()),
            ATTR_FEATURE_MAP => encode(buf, &0u32.to_le_bytes()),
            _ => Err(BridgeError::InvalidArgument),
        }
    }

    fn write_attribute(&mut self, _cluster: ClusterId, _attribute: AttributeId, _data: &[u8]) -> Result<()> {
        // Every measurement attribute is read-only.
        Err(BridgeError::InvalidArgument)
    }

    fn apply_change(&mut self, cluster: ClusterId, attribute: AttributeId, data: &[u8]) -> Result<bool> {
        if (cluster, attribute) != (TEMPERATURE_MEASUREMENT, ATTR_MEASURED_VALUE) {
            return Err(BridgeError::Unsupported);
        }
        let value = decode_u16(data)? as i16;
        let changed = value != self.measured;
        self.measured = value;
        Ok(changed)
    }
}
