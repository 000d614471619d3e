//! Data providers: the connectivity-specific half of a bridged device.
//!
//! A provider talks to the real accessory and backs one or more
//! [`BridgedNode`](crate::devices::BridgedNode)s.  It never calls back into
//! the registry.  Accessory-originated changes are returned from
//! [`DataProvider::on_notification`] as a [`ProviderEvent`] and the bridge
//! fans them out to every node the provider backs.

pub mod ble_environmental;
pub mod ble_lbs;
pub mod simulated;

pub use ble_environmental::BleEnvironmentalProvider;
pub use ble_lbs::BleLbsProvider;
pub use simulated::SimulatedProvider;

use crate::app::ports::GattLink;
use crate::config::MAX_USER_DATA_SIZE;
use crate::connectivity::{AddressType, BtAddress, DiscoveredCharacteristic, ServiceId};
use crate::devices::{AttributeId, ClusterId, CommandId};
use crate::error::{BridgeError, Result};

/// Opaque provider blob persisted alongside each record.
pub type UserData = heapless::Vec<u8, MAX_USER_DATA_SIZE>;

/// Largest attribute value carried in a [`ProviderEvent`].
pub const MAX_CHANGE_LEN: usize = 8;

/// Something the accessory did that the bridged nodes must reflect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    AttributeChanged {
        cluster: ClusterId,
        attribute: AttributeId,
        data: heapless::Vec<u8, MAX_CHANGE_LEN>,
    },
    CommandRequested { cluster: ClusterId, command: CommandId },
}

impl ProviderEvent {
    pub(crate) fn changed(cluster: ClusterId, attribute: AttributeId, bytes: &[u8]) -> Option<Self> {
        Some(Self::AttributeChanged {
            cluster,
            attribute,
            data: heapless::Vec::from_slice(bytes).ok()?,
        })
    }
}

pub trait DataProvider {
    /// One-time setup when the registry first accepts this provider.
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Radio address, for BLE-backed providers.
    fn address(&self) -> Option<BtAddress> {
        None
    }

    fn service(&self) -> Option<ServiceId> {
        None
    }

    /// Bytes persisted with every record this provider backs.  Empty
    /// means "no radio state" and restores as a simulated provider.
    fn user_data(&self) -> UserData {
        UserData::new()
    }

    /// Push a fabric-side write to the accessory.  `Unsupported` is
    /// treated as success by the registry.
    fn update_state(
        &mut self,
        cluster: ClusterId,
        attribute: AttributeId,
        data: &[u8],
        link: &mut dyn GattLink,
    ) -> Result<()>;

    /// Service discovery finished on a fresh or recovered link.
    fn on_discovered(
        &mut self,
        _characteristics: &[DiscoveredCharacteristic],
        _link: &mut dyn GattLink,
    ) -> Result<()> {
        Ok(())
    }

    fn on_notification(&mut self, _handle: u16, _data: &[u8]) -> Option<ProviderEvent> {
        None
    }
}

// ───────────────────────────────────────────────────────────────
// BLE provider user data: [service tag | address type | address]
// ───────────────────────────────────────────────────────────────

pub const BLE_USER_DATA_LEN: usize = 8;

pub fn encode_ble_user_data(service: ServiceId, address: BtAddress) -> UserData {
    let mut out = UserData::new();
    // 8 bytes always fit in MAX_USER_DATA_SIZE.
    let _ = out.push(service.tag());
    let _ = out.push(address.kind as u8);
    let _ = out.extend_from_slice(&address.bytes);
    out
}

pub fn decode_ble_user_data(data: &[u8]) -> Result<(ServiceId, BtAddress)> {
    let [tag, kind, a0, a1, a2, a3, a4, a5] = data else {
        return Err(BridgeError::InvalidArgument);
    };
    let service = ServiceId::from_tag(*tag).ok_or(BridgeError::InvalidArgument)?;
    let kind = AddressType::from_u8(*kind).ok_or(BridgeError::InvalidArgument)?;
    Ok((service, BtAddress::new([*a0, *a1, *a2, *a3, *a4, *a5], kind)))
}
