//! On/Off light: one boolean attribute plus On/Off/Toggle commands.

use super::clusters::*;
use super::{encode, AttributeId, BridgedNode, ClusterId, CommandId, DeviceType, NodeInfo};
use crate::error::{BridgeError, Result};

const ON_OFF_REVISION: u16 = 4;

pub struct OnOffLight {
    info: NodeInfo,
    on: bool,
}

impl OnOffLight {
    pub fn new(unique_id: &str, node_label: &str) -> Result<Self> {
        Ok(Self {
            info: NodeInfo::new(DeviceType::OnOffLight, unique_id, node_label)?,
            on: false,
        })
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    fn set(&mut self, on: bool) -> bool {
        let changed = self.on != on;
        self.on = on;
        changed
    }
}

impl BridgedNode for OnOffLight {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut NodeInfo {
        &mut self.info
    }

    fn read_attribute(&self, cluster: ClusterId, attribute: AttributeId, buf: &mut [u8]) -> Result<usize> {
        if cluster != ON_OFF {
            return Err(BridgeError::InvalidArgument);
        }
        match attribute {
            ATTR_ON_OFF => encode(buf, &[u8::from(self.on)]),
            ATTR_CLUSTER_REVISION => encode(buf, &ON_OFF_REVISION.to_le_bytes()),
            ATTR_FEATURE_MAP => encode(buf, &0u32.to_le_bytes()),
            _ => Err(BridgeError::InvalidArgument),
        }
    }

    fn write_attribute(&mut self, cluster: ClusterId, attribute: AttributeId, data: &[u8]) -> Result<()> {
        match (cluster, attribute, data.first()) {
            (ON_OFF, ATTR_ON_OFF, Some(&v)) => {
                self.set(v != 0);
                Ok(())
            }
            _ => Err(BridgeError::InvalidArgument),
        }
    }

    fn apply_change(&mut self, cluster: ClusterId, attribute: AttributeId, data: &[u8]) -> Result<bool> {
        match (cluster, attribute) {
            (ON_OFF, ATTR_ON_OFF) => {
                let v = *data.first().ok_or(BridgeError::InvalidArgument)?;
                Ok(self.set(v != 0))
            }
            _ => Err(BridgeError::Unsupported),
        }
    }

    fn handle_command(&mut self, cluster: ClusterId, command: CommandId) -> Result<Option<AttributeId>> {
        if cluster != ON_OFF {
            return Err(BridgeError::Unsupported);
        }
        let target = match command {
            CMD_OFF => false,
            CMD_ON => true,
            CMD_TOGGLE => !self.on,
            _ => return Err(BridgeError::Unsupported),
        };
        Ok(self.set(target).then_some(ATTR_ON_OFF))
    }
}
