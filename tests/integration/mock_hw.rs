//! Mock adapters for integration tests.
//!
//! Each mock records every call so tests can assert on the full history
//! without a Bluetooth stack, flash or a fabric data model.

use std::collections::HashMap;

use blebridge::adapters::fabric::DynamicEndpointTable;
use blebridge::app::events::BridgeEvent;
use blebridge::app::ports::{
    EventSink, FabricError, FabricPort, RadioError, RadioPort, StorageError, StoragePort, TimerPort,
};
use blebridge::connectivity::{
    AddressType, BtAddress, CharacteristicList, ConnHandle, ConnParams, DiscoveredCharacteristic, SecurityLevel, ServiceId,
    LBS_BUTTON_UUID, LBS_LED_UUID,
};
use blebridge::devices::{AttributeId, ClusterId, DeviceType};
use blebridge::events::TimerId;

// ── Radio ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum RadioCall {
    StartScan,
    StopScan,
    Connect(BtAddress),
    Disconnect(ConnHandle),
    Discover(ConnHandle, ServiceId),
    Write { conn: ConnHandle, handle: u16, data: Vec<u8> },
    Subscribe { conn: ConnHandle, ccc_handle: u16 },
}

#[derive(Default)]
pub struct MockRadio {
    pub calls: Vec<RadioCall>,
    pub fail_connect: bool,
    pub fail_disconnect: bool,
}

#[allow(dead_code)]
impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connects(&self) -> usize {
        self.calls.iter().filter(|c| matches!(c, RadioCall::Connect(_))).count()
    }

    pub fn writes(&self) -> Vec<(u16, Vec<u8>)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                RadioCall::Write { handle, data, .. } => Some((*handle, data.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn subscribed(&self, ccc: u16) -> bool {
        self.calls
            .iter()
            .any(|c| matches!(c, RadioCall::Subscribe { ccc_handle, .. } if *ccc_handle == ccc))
    }
}

impl RadioPort for MockRadio {
    fn start_scan(&mut self) -> Result<(), RadioError> {
        self.calls.push(RadioCall::StartScan);
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), RadioError> {
        self.calls.push(RadioCall::StopScan);
        Ok(())
    }

    fn connect(&mut self, address: BtAddress, _: &ConnParams, _: Option<SecurityLevel>) -> Result<(), RadioError> {
        self.calls.push(RadioCall::Connect(address));
        if self.fail_connect {
            return Err(RadioError::NoResources);
        }
        Ok(())
    }

    fn disconnect(&mut self, conn: ConnHandle) -> Result<(), RadioError> {
        self.calls.push(RadioCall::Disconnect(conn));
        if self.fail_disconnect {
            Err(RadioError::NotConnected)
        } else {
            Ok(())
        }
    }

    fn discover(&mut self, conn: ConnHandle, service: ServiceId) -> Result<(), RadioError> {
        self.calls.push(RadioCall::Discover(conn, service));
        Ok(())
    }

    fn write(&mut self, conn: ConnHandle, handle: u16, data: &[u8]) -> Result<(), RadioError> {
        self.calls.push(RadioCall::Write {
            conn,
            handle,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn subscribe(&mut self, conn: ConnHandle, ccc_handle: u16) -> Result<(), RadioError> {
        self.calls.push(RadioCall::Subscribe { conn, ccc_handle });
        Ok(())
    }
}

// ── Timers ────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockTimers {
    pub scan_window: Option<u32>,
    pub recovery: Option<u32>,
    pub started: Vec<(TimerId, u32)>,
}

impl TimerPort for MockTimers {
    fn start(&mut self, id: TimerId, duration_ms: u32) {
        self.started.push((id, duration_ms));
        match id {
            TimerId::ScanWindow => self.scan_window = Some(duration_ms),
            TimerId::Recovery => self.recovery = Some(duration_ms),
        }
    }

    fn cancel(&mut self, id: TimerId) {
        match id {
            TimerId::ScanWindow => self.scan_window = None,
            TimerId::Recovery => self.recovery = None,
        }
    }

    fn is_running(&self, id: TimerId) -> bool {
        match id {
            TimerId::ScanWindow => self.scan_window.is_some(),
            TimerId::Recovery => self.recovery.is_some(),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

/// HashMap-backed storage that counts writes and can fail on demand.
#[derive(Default, Clone)]
pub struct MockStorage {
    pub entries: HashMap<String, Vec<u8>>,
    pub writes: usize,
    pub deletes: usize,
    pub fail_writes: bool,
}

#[allow(dead_code)]
impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    pub fn raw(&self, namespace: &str, key: &str) -> Option<&Vec<u8>> {
        self.entries.get(&Self::key(namespace, key))
    }

    pub fn put(&mut self, namespace: &str, key: &str, data: &[u8]) {
        self.entries.insert(Self::key(namespace, key), data.to_vec());
    }
}

impl StoragePort for MockStorage {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let data = self
            .entries
            .get(&Self::key(namespace, key))
            .ok_or(StorageError::NotFound)?;
        if data.len() > buf.len() {
            return Err(StorageError::IoError);
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::IoError);
        }
        self.writes += 1;
        self.entries.insert(Self::key(namespace, key), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.deletes += 1;
        self.entries.remove(&Self::key(namespace, key));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.entries.contains_key(&Self::key(namespace, key))
    }
}

// ── Fabric ────────────────────────────────────────────────────

/// The real endpoint table plus failure injection and a report log.
#[derive(Default)]
pub struct MockFabric {
    pub table: DynamicEndpointTable,
    /// Fail the add with this zero-based call number.
    pub fail_add_on_call: Option<usize>,
    /// Endpoint ids the fabric claims are taken by something else.
    pub foreign_endpoints: Vec<u16>,
    pub fail_remove: bool,
    pub add_calls: usize,
    pub reports: Vec<(u16, ClusterId, AttributeId)>,
    pub placeholder_disabled: bool,
}

#[allow(dead_code)]
impl MockFabric {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FabricPort for MockFabric {
    fn last_fixed_endpoint_id(&self) -> u16 {
        self.table.last_fixed_endpoint_id()
    }

    fn set_endpoint_enabled(&mut self, endpoint_id: u16, enabled: bool) {
        if endpoint_id == self.table.last_fixed_endpoint_id() {
            self.placeholder_disabled = !enabled;
        }
        self.table.set_endpoint_enabled(endpoint_id, enabled);
    }

    fn add_dynamic_endpoint(&mut self, index: u8, endpoint_id: u16, device_type: DeviceType) -> Result<(), FabricError> {
        let call = self.add_calls;
        self.add_calls += 1;
        if self.fail_add_on_call == Some(call) {
            return Err(FabricError::Failed);
        }
        if self.foreign_endpoints.contains(&endpoint_id) {
            return Err(FabricError::EndpointExists);
        }
        self.table.add_dynamic_endpoint(index, endpoint_id, device_type)
    }

    fn remove_dynamic_endpoint(&mut self, index: u8) -> Result<u16, FabricError> {
        if self.fail_remove {
            return Err(FabricError::Failed);
        }
        self.table.remove_dynamic_endpoint(index)
    }

    fn report_attribute_changed(&mut self, endpoint_id: u16, cluster: ClusterId, attribute: AttributeId) {
        self.reports.push((endpoint_id, cluster, attribute));
    }
}

// ── Event sink ────────────────────────────────────────────────

#[derive(Default)]
pub struct CollectingSink {
    pub events: Vec<BridgeEvent>,
}

#[allow(dead_code)]
impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&mut self) -> Vec<BridgeEvent> {
        std::mem::take(&mut self.events)
    }
}

impl EventSink for CollectingSink {
    fn emit(&mut self, event: &BridgeEvent) {
        self.events.push(event.clone());
    }
}

// ── Fixtures ──────────────────────────────────────────────────

#[allow(dead_code)]
pub fn address(n: u8) -> BtAddress {
    BtAddress::new([0xC0, 0xFF, 0xEE, 0x00, 0x00, n], AddressType::Random)
}

pub const LED_HANDLE: u16 = 0x0010;
pub const BUTTON_HANDLE: u16 = 0x0012;
pub const BUTTON_CCC: u16 = 0x0013;

/// Characteristics a Nordic LED Button accessory exposes.
#[allow(dead_code)]
pub fn lbs_characteristics() -> CharacteristicList {
    let mut list = CharacteristicList::new();
    let _ = list.push(DiscoveredCharacteristic {
        uuid: LBS_LED_UUID,
        value_handle: LED_HANDLE,
        ccc_handle: None,
    });
    let _ = list.push(DiscoveredCharacteristic {
        uuid: LBS_BUTTON_UUID,
        value_handle: BUTTON_HANDLE,
        ccc_handle: Some(BUTTON_CCC),
    });
    list
}
