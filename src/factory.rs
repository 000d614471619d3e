//! Node and provider constructors keyed by device type or BLE service.
//!
//! The registry never names a concrete node or provider type; everything
//! it holds is built here.

use rand_core::RngCore;

use crate::adapters::utils::hex_encode;
use crate::config::MAX_UNIQUE_ID_LEN;
use crate::connectivity::{BtAddress, ServiceId};
use crate::devices::{BridgedNode, DeviceType, HumiditySensor, OnOffLight, TemperatureSensor};
use crate::error::Result;
use crate::providers::{BleEnvironmentalProvider, BleLbsProvider, DataProvider, SimulatedProvider};

pub fn create_node(device_type: DeviceType, unique_id: &str, node_label: &str) -> Result<Box<dyn BridgedNode>> {
    Ok(match device_type {
        DeviceType::OnOffLight => Box::new(OnOffLight::new(unique_id, node_label)?),
        DeviceType::TemperatureSensor => Box::new(TemperatureSensor::new(unique_id, node_label)?),
        DeviceType::HumiditySensor => Box::new(HumiditySensor::new(unique_id, node_label)?),
    })
}

/// BLE service an accessory of `device_type` must expose.
pub fn required_service(device_type: DeviceType) -> ServiceId {
    match device_type {
        DeviceType::OnOffLight => ServiceId::LedButton,
        DeviceType::TemperatureSensor | DeviceType::HumiditySensor => ServiceId::EnvironmentalSensing,
    }
}

/// Every node type one accessory with `service` is bridged as.
pub fn nodes_for_service(service: ServiceId) -> &'static [DeviceType] {
    match service {
        ServiceId::LedButton => &[DeviceType::OnOffLight],
        ServiceId::EnvironmentalSensing => &[DeviceType::TemperatureSensor, DeviceType::HumiditySensor],
    }
}

pub fn create_simulated_provider(device_type: DeviceType) -> Box<dyn DataProvider> {
    Box::new(SimulatedProvider::new(device_type))
}

pub fn create_ble_provider(service: ServiceId, address: BtAddress) -> Box<dyn DataProvider> {
    match service {
        ServiceId::LedButton => Box::new(BleLbsProvider::new(address)),
        ServiceId::EnvironmentalSensing => Box::new(BleEnvironmentalProvider::new(address)),
    }
}

/// 128 random bits as 32 lowercase hex characters.
pub fn generate_unique_id(rng: &mut impl RngCore) -> heapless::String<MAX_UNIQUE_ID_LEN> {
    let mut raw = [0u8; MAX_UNIQUE_ID_LEN / 2];
    rng.fill_bytes(&mut raw);
    hex_encode(&raw)
}
