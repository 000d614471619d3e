//! Nordic LED Button Service provider, backing an On/Off light.
//!
//! The LED follows the node's OnOff attribute; a button press on the
//! accessory requests a Toggle.

use log::{debug, warn};

use super::{encode_ble_user_data, DataProvider, ProviderEvent, UserData};
use crate::app::ports::GattLink;
use crate::connectivity::{
    BtAddress, DiscoveredCharacteristic, ServiceId, LBS_BUTTON_UUID, LBS_LED_UUID,
};
use crate::devices::clusters::{ATTR_ON_OFF, CMD_TOGGLE, ON_OFF};
use crate::devices::{AttributeId, ClusterId};
use crate::error::{BridgeError, Result};

const BUTTON_PRESSED: u8 = 1;

pub struct BleLbsProvider {
    address: BtAddress,
    led_handle: Option<u16>,
    button_handle: Option<u16>,
}

impl BleLbsProvider {
    pub fn new(address: BtAddress) -> Self {
        Self {
            address,
            led_handle: None,
            button_handle: None,
        }
    }
}

impl DataProvider for BleLbsProvider {
    fn address(&self) -> Option<BtAddress> {
        Some(self.address)
    }

    fn service(&self) -> Option<ServiceId> {
        Some(ServiceId::LedButton)
    }

    fn user_data(&self) -> UserData {
        encode_ble_user_data(ServiceId::LedButton, self.address)
    }

    fn update_state(
        &mut self,
        cluster: ClusterId,
        attribute: AttributeId,
        data: &[u8],
        link: &mut dyn GattLink,
    ) -> Result<()> {
        if (cluster, attribute) != (ON_OFF, ATTR_ON_OFF) {
            return Err(BridgeError::Unsupported);
        }
        let handle = self.led_handle.ok_or(BridgeError::IncorrectState)?;
        let on = *data.first().ok_or(BridgeError::InvalidArgument)?;
        link.write(self.address, handle, &[u8::from(on != 0)])
    }

    fn on_discovered(
        &mut self,
        characteristics: &[DiscoveredCharacteristic],
        link: &mut dyn GattLink,
    ) -> Result<()> {
        let led = characteristics.iter().find(|c| c.uuid == LBS_LED_UUID);
        let button = characteristics.iter().find(|c| c.uuid == LBS_BUTTON_UUID);
        let (Some(led), Some(button)) = (led, button) else {
            warn!("LBS {}: LED or button characteristic missing", self.address);
            return Err(BridgeError::NotFound);
        };
        self.led_handle = Some(led.value_handle);
        self.button_handle = Some(button.value_handle);
        match button.ccc_handle {
            Some(ccc) => link.subscribe(self.address, ccc),
            None => {
                debug!("LBS {}: button is not notifiable", self.address);
                Ok(())
            }
        }
    }

    fn on_notification(&mut self, handle: u16, data: &[u8]) -> Option<ProviderEvent> {
        if Some(handle) != self.button_handle || data.first() != Some(&BUTTON_PRESSED) {
            return None;
        }
        Some(ProviderEvent::CommandRequested {
            cluster: ON_OFF,
            command: CMD_TOGGLE,
        })
    }
}
