//! Environmental Sensing Service provider, backing a temperature node and
//! a humidity node from one accessory.

use log::warn;

use super::{encode_ble_user_data, DataProvider, ProviderEvent, UserData};
use crate::app::ports::GattLink;
use crate::connectivity::{
    BtAddress, DiscoveredCharacteristic, ServiceId, ESS_HUMIDITY_UUID, ESS_TEMPERATURE_UUID,
};
use crate::devices::clusters::{
    ATTR_MEASURED_VALUE, RELATIVE_HUMIDITY_MEASUREMENT, TEMPERATURE_MEASUREMENT,
};
use crate::devices::{AttributeId, ClusterId};
use crate::error::{BridgeError, Result};

pub struct BleEnvironmentalProvider {
    address: BtAddress,
    temperature_handle: Option<u16>,
    humidity_handle: Option<u16>,
}

impl BleEnvironmentalProvider {
    pub fn new(address: BtAddress) -> Self {
        Self {
            address,
            temperature_handle: None,
            humidity_handle: None,
        }
    }
}

impl DataProvider for BleEnvironmentalProvider {
    fn address(&self) -> Option<BtAddress> {
        Some(self.address)
    }

    fn service(&self) -> Option<ServiceId> {
        Some(ServiceId::EnvironmentalSensing)
    }

    fn user_data(&self) -> UserData {
        encode_ble_user_data(ServiceId::EnvironmentalSensing, self.address)
    }

    fn update_state(
        &mut self,
        _cluster: ClusterId,
        _attribute: AttributeId,
        _data: &[u8],
        _link: &mut dyn GattLink,
    ) -> Result<()> {
        // Sensors have nothing writable.
        Err(BridgeError::Unsupported)
    }

    fn on_discovered(
        &mut self,
        characteristics: &[DiscoveredCharacteristic],
        link: &mut dyn GattLink,
    ) -> Result<()> {
        let mut found = false;
        for c in characteristics {
            let slot = if c.uuid == ESS_TEMPERATURE_UUID {
                &mut self.temperature_handle
            } else if c.uuid == ESS_HUMIDITY_UUID {
                &mut self.humidity_handle
            } else {
                continue;
            };
            *slot = Some(c.value_handle);
            found = true;
            if let Some(ccc) = c.ccc_handle {
                link.subscribe(self.address, ccc)?;
            }
        }
        if !found {
            warn!("ESS {}: no temperature or humidity characteristic", self.address);
            return Err(BridgeError::NotFound);
        }
        Ok(())
    }

    fn on_notification(&mut self, handle: u16, data: &[u8]) -> Option<ProviderEvent> {
        let value = data.get(..2)?;
        if Some(handle) == self.temperature_handle {
            ProviderEvent::changed(TEMPERATURE_MEASUREMENT, ATTR_MEASURED_VALUE, value)
        } else if Some(handle) == self.humidity_handle {
            ProviderEvent::changed(RELATIVE_HUMIDITY_MEASUREMENT, ATTR_MEASURED_VALUE, value)
        } else {
            None
        }
    }
}
