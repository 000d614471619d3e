//! Bridge service: the hexagonal core.
//!
//! [`Bridge`] owns the device registry, the connectivity manager and the
//! versioned storage, and holds every port it needs.  It is driven one
//! [`WorkItem`] at a time from the main loop, so no two operations on its
//! tables ever interleave.
//!
//! ```text
//!  StoragePort ◀──┐ ┌──────────────────────────────┐ ──▶ EventSink
//!  RadioPort   ◀──┼─│            Bridge            │
//!  TimerPort   ◀──┤ │ Registry · Connectivity · NVS│
//!  FabricPort  ◀──┘ └──────────────────────────────┘
//! ```

use log::{debug, error, info, warn};
use rand_core::OsRng;

use crate::config::{BridgeConfig, MAX_CONNECTED_DEVICES};
use crate::connectivity::{
    BleConnectivityManager, BleStatus, BtAddress, DiscoveredCharacteristic, Notice, ScanResults,
};
use crate::devices::clusters::{ATTR_NODE_LABEL, BRIDGED_DEVICE_BASIC_INFORMATION};
use crate::devices::{AttributeId, BridgedNode, ClusterId, DeviceType};
use crate::error::{BridgeError, Result};
use crate::events::{self, WorkItem, WorkQueue};
use crate::factory;
use crate::providers::{decode_ble_user_data, DataProvider, ProviderEvent};
use crate::registry::{BridgeManager, ProviderHandle, ProviderId, RegistryState};
use crate::storage::BridgeStorage;

use super::commands::{BridgeCommand, NodeLabel};
use super::events::BridgeEvent;
use super::ports::{EventSink, FabricPort, GattLink, RadioPort, StoragePort, TimerPort};

// ───────────────────────────────────────────────────────────────
// GATT access for providers
// ───────────────────────────────────────────────────────────────

/// Resolves a provider's address to its open link and forwards to the
/// radio.  Fails with `IncorrectState` while the device is not connected.
struct LinkAccess<'a, R> {
    connectivity: &'a BleConnectivityManager,
    radio: &'a mut R,
}

impl<R: RadioPort> GattLink for LinkAccess<'_, R> {
    fn write(&mut self, address: BtAddress, handle: u16, data: &[u8]) -> Result<()> {
        let conn = self
            .connectivity
            .connection_of(&address)
            .ok_or(BridgeError::IncorrectState)?;
        self.radio.write(conn, handle, data)?;
        Ok(())
    }

    fn subscribe(&mut self, address: BtAddress, ccc_handle: u16) -> Result<()> {
        let conn = self
            .connectivity
            .connection_of(&address)
            .ok_or(BridgeError::IncorrectState)?;
        self.radio.subscribe(conn, ccc_handle)?;
        Ok(())
    }
}

/// A BLE provider waiting for its first link.  Nodes are created only
/// once the accessory's services have been discovered.
struct PendingPairing {
    address: BtAddress,
    label: NodeLabel,
    provider: Box<dyn DataProvider>,
}

// ───────────────────────────────────────────────────────────────
// Bridge
// ───────────────────────────────────────────────────────────────

pub struct Bridge<S, R, T, F> {
    config: BridgeConfig,
    registry: BridgeManager,
    connectivity: BleConnectivityManager,
    storage: BridgeStorage<S>,
    radio: R,
    timers: T,
    fabric: F,
    pending: heapless::Vec<PendingPairing, MAX_CONNECTED_DEVICES>,
    last_status: BleStatus,
}

impl<S, R, T, F> Bridge<S, R, T, F>
where
    S: StoragePort,
    R: RadioPort,
    T: TimerPort,
    F: FabricPort,
{
    /// Construct the bridge around its ports.
    ///
    /// Touches no port; call [`init`](Self::init) next.
    pub fn new(config: BridgeConfig, storage: S, radio: R, timers: T, fabric: F) -> Self {
        Self {
            connectivity: BleConnectivityManager::new(&config),
            config,
            registry: BridgeManager::new(),
            storage: BridgeStorage::new(storage),
            radio,
            timers,
            fabric,
            pending: heapless::Vec::new(),
            last_status: BleStatus::NoDevices,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Migrate storage and restore every persisted pairing.
    ///
    /// Migration runs inside the registry's bring-up, after the placeholder
    /// endpoint is disabled.  Any migration or restore failure stops
    /// bring-up and leaves the registry `Failed`.
    pub fn init(&mut self, sink: &mut impl EventSink) -> Result<usize> {
        let Self {
            registry,
            connectivity,
            storage,
            timers,
            fabric,
            ..
        } = self;
        let restored = registry.init(fabric, |registry, fabric| {
            if let Err(e) = storage.init(&mut OsRng) {
                error!("Storage: migration failed: {}", e);
                return Err(e);
            }
            restore_devices(registry, fabric, storage, connectivity, timers)
        })?;

        sink.emit(&BridgeEvent::Initialized { restored });
        self.publish_status(sink);
        info!("Bridge ready, {} device(s) restored", restored);
        Ok(restored)
    }

    // ── Work items ────────────────────────────────────────────

    /// Handle one queued item.  Command failures are logged, not returned.
    pub fn process(&mut self, item: WorkItem, sink: &mut impl EventSink) {
        let notice = match item {
            WorkItem::Radio(event) => {
                self.connectivity
                    .on_radio_event(event, &mut self.radio, &mut self.timers)
            }
            WorkItem::Timer(id) => self.connectivity.on_timer(id, &mut self.radio, &mut self.timers),
            WorkItem::Command(cmd) => {
                if let Err(e) = self.execute(cmd, sink) {
                    warn!("Bridge: command failed: {}", e);
                }
                None
            }
        };
        if let Some(notice) = notice {
            self.on_notice(notice, sink);
        }
        self.publish_status(sink);
    }

    /// Process everything currently queued.  Returns the number of items.
    pub fn drain(&mut self, queue: &WorkQueue, sink: &mut impl EventSink) -> usize {
        let mut handled = 0;
        while let Some(item) = events::next(queue) {
            self.process(item, sink);
            handled += 1;
        }
        handled
    }

    // ── Commands ──────────────────────────────────────────────

    pub fn execute(&mut self, cmd: BridgeCommand, sink: &mut impl EventSink) -> Result<()> {
        if self.registry.state() != RegistryState::Ready {
            return Err(BridgeError::IncorrectState);
        }
        let result = match cmd {
            BridgeCommand::Add {
                device_type,
                radio_index: None,
                label,
            } => self.add_simulated(device_type, &label, sink),
            BridgeCommand::Add {
                device_type,
                radio_index: Some(i),
                label,
            } => self.start_pairing(device_type, i, label, sink),
            BridgeCommand::Remove { endpoint_id } => self.remove(endpoint_id, sink),
            BridgeCommand::Scan => self.connectivity.scan(&mut self.radio, &mut self.timers),
        };
        self.publish_status(sink);
        result
    }

    fn add_simulated(&mut self, device_type: DeviceType, label: &str, sink: &mut impl EventSink) -> Result<()> {
        let unique_id = factory::generate_unique_id(&mut OsRng);
        let node = factory::create_node(device_type, &unique_id, label)?;
        let provider = factory::create_simulated_provider(device_type);
        let added = self
            .registry
            .add_devices(vec![node], ProviderHandle::New(provider), None, None, &mut self.fabric)
            .map_err(|rejected| rejected.error)?;
        self.on_devices_added(&added, sink);
        Ok(())
    }

    /// Create the BLE provider and issue the first connect.  Nodes are
    /// added when the link is ready.
    fn start_pairing(
        &mut self,
        device_type: DeviceType,
        radio_index: u8,
        label: NodeLabel,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        let seen = *self
            .connectivity
            .scan_results()
            .get(radio_index as usize)
            .ok_or(BridgeError::NotFound)?;
        if seen.service != factory::required_service(device_type) {
            warn!(
                "Bridge: {} exposes {:?}, not the service {:?} needs",
                seen.address, seen.service, device_type
            );
            return Err(BridgeError::InvalidArgument);
        }
        if self.registry.find_provider_by_address(&seen.address).is_some()
            || self.connectivity.is_tracked(&seen.address)
        {
            return Err(BridgeError::Conflict);
        }
        if self.pending.is_full() {
            return Err(BridgeError::ResourceExhausted);
        }

        let provider = factory::create_ble_provider(seen.service, seen.address);
        self.connectivity.add_provider(seen.address, seen.service)?;
        if let Err(e) = self
            .connectivity
            .connect(seen.address, None, &mut self.radio, &mut self.timers)
        {
            let _ = self
                .connectivity
                .remove_provider(seen.address, &mut self.radio, &mut self.timers);
            return Err(e);
        }
        // Capacity checked above.
        let _ = self.pending.push(PendingPairing {
            address: seen.address,
            label,
            provider,
        });
        sink.emit(&BridgeEvent::PairingStarted { address: seen.address });
        Ok(())
    }

    fn remove(&mut self, endpoint_id: u16, sink: &mut impl EventSink) -> Result<()> {
        let removal = self.registry.remove_device(endpoint_id, &mut self.fabric)?;
        if let Some(address) = removal.released_address {
            if let Err(e) = self
                .connectivity
                .remove_provider(address, &mut self.radio, &mut self.timers)
            {
                debug!("Bridge: {} was not tracked by connectivity ({})", address, e);
            }
        }

        match self.storage.remove_record(removal.index) {
            Ok(()) | Err(BridgeError::NotFound) => {}
            Err(error) => {
                warn!("Storage: could not delete record {}: {}", removal.index, error);
                sink.emit(&BridgeEvent::PersistenceFailed {
                    index: Some(removal.index),
                    error,
                });
            }
        }
        self.persist_index_list(sink);
        sink.emit(&BridgeEvent::DeviceRemoved {
            index: removal.index,
            endpoint_id,
        });
        Ok(())
    }

    // ── Connectivity notices ──────────────────────────────────

    fn on_notice(&mut self, notice: Notice, sink: &mut impl EventSink) {
        match notice {
            Notice::ScanCompleted => {
                let results = ScanResults::from_slice(self.connectivity.scan_results()).unwrap_or_default();
                sink.emit(&BridgeEvent::ScanCompleted { results });
            }
            Notice::LinkReady {
                address,
                characteristics,
                ..
            } => {
                if let Some(pos) = self.pending.iter().position(|p| p.address == address) {
                    let pairing = self.pending.swap_remove(pos);
                    self.complete_pairing(pairing, &characteristics, sink);
                } else if let Some(id) = self.registry.find_provider_by_address(&address) {
                    self.on_recovered(id, address, &characteristics);
                } else {
                    debug!("Bridge: link to untracked {} ignored", address);
                }
            }
            Notice::FirstConnectionFailed { address, error } => {
                if let Some(pos) = self.pending.iter().position(|p| p.address == address) {
                    drop(self.pending.swap_remove(pos));
                    self.fail_pairing(address, error, sink);
                }
            }
            Notice::ConnectionLost { address } => {
                if let Some(id) = self.registry.find_provider_by_address(&address) {
                    self.registry.set_reachable(id, false, &mut self.fabric);
                }
            }
            Notice::RecoveryFailed { address, error } => self.retry_recovery(address, error),
            Notice::Notification { address, handle, data } => {
                self.on_notification(address, handle, &data);
            }
        }
    }

    /// Put a device whose reconnect failed back in the recovery queue, as
    /// long as the registry still bridges it.
    fn retry_recovery(&mut self, address: BtAddress, error: BridgeError) {
        if self.registry.find_provider_by_address(&address).is_none() {
            debug!("Bridge: {} no longer bridged, not retrying ({})", address, error);
            return;
        }
        match self.connectivity.queue_recovery(address, &mut self.timers) {
            Ok(()) => debug!("Bridge: {} requeued for recovery after {}", address, error),
            Err(e) => warn!("Bridge: {} will not be recovered: {}", address, e),
        }
    }

    fn complete_pairing(
        &mut self,
        pairing: PendingPairing,
        characteristics: &[DiscoveredCharacteristic],
        sink: &mut impl EventSink,
    ) {
        let PendingPairing {
            address,
            label,
            mut provider,
        } = pairing;
        let mut link = LinkAccess {
            connectivity: &self.connectivity,
            radio: &mut self.radio,
        };
        if let Err(e) = provider.on_discovered(characteristics, &mut link) {
            self.fail_pairing(address, e, sink);
            return;
        }
        let Some(service) = provider.service() else {
            self.fail_pairing(address, BridgeError::Internal, sink);
            return;
        };

        let mut nodes: Vec<Box<dyn BridgedNode>> = Vec::new();
        for &device_type in factory::nodes_for_service(service) {
            let unique_id = factory::generate_unique_id(&mut OsRng);
            match factory::create_node(device_type, &unique_id, &label) {
                Ok(node) => nodes.push(node),
                Err(e) => {
                    self.fail_pairing(address, e, sink);
                    return;
                }
            }
        }

        match self.registry.add_devices(
            nodes,
            ProviderHandle::New(provider),
            None,
            None,
            &mut self.fabric,
        ) {
            Ok(added) => {
                info!("Bridge: {} paired as {} device(s)", address, added.len());
                self.on_devices_added(&added, sink);
            }
            // Dropping the rejection destroys the nodes and the provider.
            Err(rejected) => self.fail_pairing(address, rejected.error, sink),
        }
    }

    fn fail_pairing(&mut self, address: BtAddress, error: BridgeError, sink: &mut impl EventSink) {
        if let Err(e) = self
            .connectivity
            .remove_provider(address, &mut self.radio, &mut self.timers)
        {
            debug!("Bridge: {} already released ({})", address, e);
        }
        warn!("Bridge: pairing with {} failed: {}", address, error);
        sink.emit(&BridgeEvent::PairingFailed { address, error });
    }

    fn on_recovered(&mut self, id: ProviderId, address: BtAddress, characteristics: &[DiscoveredCharacteristic]) {
        let Some(provider) = self.registry.provider_mut(id) else {
            return;
        };
        let mut link = LinkAccess {
            connectivity: &self.connectivity,
            radio: &mut self.radio,
        };
        match provider.on_discovered(characteristics, &mut link) {
            Ok(()) => {
                let changed = self.registry.set_reachable(id, true, &mut self.fabric);
                info!("Bridge: {} reachable again ({} node(s))", address, changed);
            }
            Err(e) => warn!("Bridge: {} reconnected but setup failed: {}", address, e),
        }
    }

    fn on_notification(&mut self, address: BtAddress, handle: u16, data: &[u8]) {
        let Some(id) = self.registry.find_provider_by_address(&address) else {
            return;
        };
        let Some(event) = self
            .registry
            .provider_mut(id)
            .and_then(|p| p.on_notification(handle, data))
        else {
            return;
        };
        match event {
            ProviderEvent::AttributeChanged {
                cluster,
                attribute,
                data,
            } => {
                self.registry
                    .on_provider_state_changed(id, cluster, attribute, &data, &mut self.fabric);
            }
            ProviderEvent::CommandRequested { cluster, command } => {
                let mut link = LinkAccess {
                    connectivity: &self.connectivity,
                    radio: &mut self.radio,
                };
                self.registry
                    .on_provider_command(id, cluster, command, &mut self.fabric, &mut link);
            }
        }
    }

    // ── Fabric attribute access ───────────────────────────────

    pub fn handle_read(&self, index: u8, cluster: ClusterId, attribute: AttributeId, buf: &mut [u8]) -> Result<usize> {
        self.registry.handle_read(index, cluster, attribute, buf)
    }

    /// Apply a fabric write.  A new node label is persisted straight away.
    pub fn handle_write(
        &mut self,
        index: u8,
        cluster: ClusterId,
        attribute: AttributeId,
        data: &[u8],
        sink: &mut impl EventSink,
    ) -> Result<()> {
        let mut link = LinkAccess {
            connectivity: &self.connectivity,
            radio: &mut self.radio,
        };
        self.registry
            .handle_write(index, cluster, attribute, data, &mut link)?;
        if (cluster, attribute) == (BRIDGED_DEVICE_BASIC_INFORMATION, ATTR_NODE_LABEL) {
            self.persist_record(index, sink);
        }
        Ok(())
    }

    // ── Persistence ───────────────────────────────────────────

    fn on_devices_added(&mut self, indexes: &[u8], sink: &mut impl EventSink) {
        for &index in indexes {
            self.persist_record(index, sink);
        }
        self.persist_index_list(sink);
        for &index in indexes {
            if let Some(node) = self.registry.node(index) {
                let info = node.info();
                sink.emit(&BridgeEvent::DeviceAdded {
                    index,
                    endpoint_id: info.endpoint_id,
                    device_type: info.device_type,
                });
            }
        }
    }

    fn persist_record(&mut self, index: u8, sink: &mut impl EventSink) {
        let Some(record) = self.registry.record_for(index) else {
            return;
        };
        if let Err(error) = self.storage.store_record(index, &record) {
            warn!("Storage: could not persist record {}: {}", index, error);
            sink.emit(&BridgeEvent::PersistenceFailed {
                index: Some(index),
                error,
            });
        }
    }

    fn persist_index_list(&mut self, sink: &mut impl EventSink) {
        let result = self
            .storage
            .store_index_list(self.registry.indexes())
            .and_then(|()| self.storage.store_count(self.registry.device_count() as u8));
        if let Err(error) = result {
            warn!("Storage: could not persist index list: {}", error);
            sink.emit(&BridgeEvent::PersistenceFailed { index: None, error });
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn status(&self) -> BleStatus {
        self.connectivity.status()
    }

    fn publish_status(&mut self, sink: &mut impl EventSink) {
        let status = self.status();
        if status != self.last_status {
            self.last_status = status;
            debug!("Bridge: status {}", status);
            sink.emit(&BridgeEvent::StatusChanged(status));
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &BridgeManager {
        &self.registry
    }

    pub fn connectivity(&self) -> &BleConnectivityManager {
        &self.connectivity
    }

    pub fn storage(&self) -> &BridgeStorage<S> {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut BridgeStorage<S> {
        &mut self.storage
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn timers(&self) -> &T {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut T {
        &mut self.timers
    }

    pub fn fabric(&self) -> &F {
        &self.fabric
    }

    pub fn fabric_mut(&mut self) -> &mut F {
        &mut self.fabric
    }
}

// ───────────────────────────────────────────────────────────────
// Restore
// ───────────────────────────────────────────────────────────────

/// Re-add every persisted pairing with its stored index and endpoint id.
///
/// Records carrying the same BLE address share one provider.  BLE nodes
/// start unreachable and their provider is queued for recovery.
fn restore_devices<S, F, T>(
    registry: &mut BridgeManager,
    fabric: &mut F,
    storage: &BridgeStorage<S>,
    connectivity: &mut BleConnectivityManager,
    timers: &mut T,
) -> Result<usize>
where
    S: StoragePort,
    F: FabricPort,
    T: TimerPort,
{
    let indexes = match storage.load_index_list() {
        Ok(list) => list,
        Err(BridgeError::NotFound) => return Ok(0),
        Err(e) => return Err(e),
    };
    match storage.load_count() {
        Ok(count) if count as usize != indexes.len() => warn!(
            "Storage: count {} disagrees with {} listed index(es), trusting the list",
            count,
            indexes.len()
        ),
        _ => {}
    }

    for &index in &indexes {
        let record = storage.load_record(index)?;
        let device_type = DeviceType::from_u16(record.device_type).ok_or_else(|| {
            error!("Storage: record {} has unknown device type 0x{:04x}", index, record.device_type);
            BridgeError::InvalidArgument
        })?;
        let node = factory::create_node(device_type, &record.unique_id, &record.node_label)?;

        let mut ble = None;
        let handle = if record.user_data.is_empty() {
            ProviderHandle::New(factory::create_simulated_provider(device_type))
        } else {
            let (service, address) = decode_ble_user_data(&record.user_data)?;
            match registry.find_provider_by_address(&address) {
                Some(id) => ProviderHandle::Existing(id),
                None => {
                    ble = Some((address, service));
                    ProviderHandle::New(factory::create_ble_provider(service, address))
                }
            }
        };

        registry
            .add_devices(vec![node], handle, Some(&[index]), Some(&[record.endpoint_id]), fabric)
            .map_err(|rejected| {
                error!("Registry: restoring slot {} failed: {}", index, rejected.error);
                rejected.error
            })?;

        if !record.user_data.is_empty() {
            if let Some(id) = registry.provider_of(index) {
                registry.set_reachable(id, false, fabric);
            }
        }
        if let Some((address, service)) = ble {
            let tracked = connectivity
                .add_provider(address, service)
                .and_then(|()| connectivity.queue_recovery(address, timers));
            if let Err(e) = tracked {
                warn!("BLE: {} restored but will not be recovered: {}", address, e);
            }
        }
        debug!("Registry: restored slot {} as {:?}", index, device_type);
    }
    Ok(indexes.len())
}
