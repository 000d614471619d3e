//! In-memory dynamic endpoint table.
//!
//! Implements [`FabricPort`]: the slice of the mesh data model the bridge
//! needs.  Endpoint 0 (root) and the aggregator are fixed; the aggregator
//! doubles as the placeholder endpoint the registry disables at bring-up.
//! Dynamic endpoints are indexed by registry slot, which lets the fabric
//! side map a raw endpoint id back to the slot index it passes to
//! `handle_read` / `handle_write`.

use log::{debug, info};

use crate::app::ports::{FabricError, FabricPort};
use crate::config::MAX_BRIDGED_DEVICES;
use crate::devices::{AttributeId, ClusterId, DeviceType};

/// Root node plus aggregator.
pub const DEFAULT_LAST_FIXED_ENDPOINT: u16 = 1;

const MAX_PENDING_REPORTS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeReport {
    pub endpoint_id: u16,
    pub cluster: ClusterId,
    pub attribute: AttributeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DynamicEndpoint {
    endpoint_id: u16,
    device_type: DeviceType,
}

pub struct DynamicEndpointTable {
    last_fixed: u16,
    placeholder_enabled: bool,
    slots: [Option<DynamicEndpoint>; MAX_BRIDGED_DEVICES],
    /// Oldest reports are dropped once the subscriber falls behind.
    reports: heapless::Deque<AttributeReport, MAX_PENDING_REPORTS>,
}

impl DynamicEndpointTable {
    pub fn new(last_fixed_endpoint_id: u16) -> Self {
        Self {
            last_fixed: last_fixed_endpoint_id,
            placeholder_enabled: true,
            slots: [None; MAX_BRIDGED_DEVICES],
            reports: heapless::Deque::new(),
        }
    }

    /// Slot index registered under `endpoint_id`.
    pub fn index_of(&self, endpoint_id: u16) -> Option<u8> {
        self.slots
            .iter()
            .position(|s| s.is_some_and(|e| e.endpoint_id == endpoint_id))
            .map(|i| i as u8)
    }

    pub fn endpoint_of(&self, index: u8) -> Option<u16> {
        self.slots.get(index as usize)?.map(|e| e.endpoint_id)
    }

    pub fn device_type_of(&self, index: u8) -> Option<DeviceType> {
        self.slots.get(index as usize)?.map(|e| e.device_type)
    }

    pub fn dynamic_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn placeholder_enabled(&self) -> bool {
        self.placeholder_enabled
    }

    /// Hand queued attribute reports to the subscription layer.
    pub fn take_reports(&mut self) -> impl Iterator<Item = AttributeReport> + '_ {
        core::iter::from_fn(move || self.reports.pop_front())
    }
}

impl Default for DynamicEndpointTable {
    fn default() -> Self {
        Self::new(DEFAULT_LAST_FIXED_ENDPOINT)
    }
}

impl FabricPort for DynamicEndpointTable {
    fn last_fixed_endpoint_id(&self) -> u16 {
        self.last_fixed
    }

    fn set_endpoint_enabled(&mut self, endpoint_id: u16, enabled: bool) {
        if endpoint_id == self.last_fixed {
            self.placeholder_enabled = enabled;
        }
        debug!("Fabric: endpoint {} {}", endpoint_id, if enabled { "enabled" } else { "disabled" });
    }

    fn add_dynamic_endpoint(&mut self, index: u8, endpoint_id: u16, device_type: DeviceType) -> Result<(), FabricError> {
        if endpoint_id <= self.last_fixed || self.index_of(endpoint_id).is_some() {
            return Err(FabricError::EndpointExists);
        }
        let slot = self.slots.get_mut(index as usize).ok_or(FabricError::NoSpace)?;
        if slot.is_some() {
            return Err(FabricError::Failed);
        }
        *slot = Some(DynamicEndpoint {
            endpoint_id,
            device_type,
        });
        info!("Fabric: endpoint {} -> slot {} ({:?})", endpoint_id, index, device_type);
        Ok(())
    }

    fn remove_dynamic_endpoint(&mut self, index: u8) -> Result<u16, FabricError> {
        let slot = self.slots.get_mut(index as usize).ok_or(FabricError::UnknownEndpoint)?;
        let removed = slot.take().ok_or(FabricError::UnknownEndpoint)?;
        info!("Fabric: endpoint {} released", removed.endpoint_id);
        Ok(removed.endpoint_id)
    }

    fn report_attribute_changed(&mut self, endpoint_id: u16, cluster: ClusterId, attribute: AttributeId) {
        if self.reports.is_full() {
            self.reports.pop_front();
        }
        let _ = self.reports.push_back(AttributeReport {
            endpoint_id,
            cluster,
            attribute,
        });
    }
}
