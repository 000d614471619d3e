//! Radio-less provider for devices added without an accessory.
//!
//! Accepts every write locally, so the node behaves like a virtual device.

use log::debug;

use super::DataProvider;
use crate::app::ports::GattLink;
use crate::devices::{AttributeId, ClusterId, DeviceType};
use crate::error::Result;

pub struct SimulatedProvider {
    device_type: DeviceType,
}

impl SimulatedProvider {
    pub fn new(device_type: DeviceType) -> Self {
        Self { device_type }
    }
}

impl DataProvider for SimulatedProvider {
    fn update_state(
        &mut self,
        cluster: ClusterId,
        attribute: AttributeId,
        data: &[u8],
        _link: &mut dyn GattLink,
    ) -> Result<()> {
        debug!(
            "Simulated {:?}: cluster 0x{:04x} attr 0x{:04x} <- {:02x?}",
            self.device_type, cluster, attribute, data
        );
        Ok(())
    }
}
