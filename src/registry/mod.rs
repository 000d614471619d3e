//! Bridged-device registry.
//!
//! Owns every live (node, provider, slot, endpoint) tuple and is the only
//! writer of the slot table.
//!
//! ```text
//!  slots[index] ──▶ Slot { node: Box<dyn BridgedNode>, provider: ProviderId }
//!                                                           │
//!  providers[id] ◀───────────────────────────────────────────┘
//! ```
//!
//! A provider may back several nodes, so several slots may carry the same
//! [`ProviderId`].  A provider is dropped only when the last slot that
//! references it is removed (linear duplicate scan, no refcount).  Nodes
//! and providers are moved in as `Box`es; on a failed batch they are
//! handed back inside [`AddRejected`].

use core::fmt;

use log::{debug, info, warn};

use crate::app::ports::{FabricError, FabricPort, GattLink};
use crate::config::{
    INVALID_ENDPOINT_ID, MAX_BRIDGED_DEVICES, MAX_BRIDGED_DEVICES_PER_PROVIDER, MAX_DATA_PROVIDERS,
};
use crate::connectivity::BtAddress;
use crate::devices::clusters::{ATTR_REACHABLE, BRIDGED_DEVICE_BASIC_INFORMATION};
use crate::devices::{self, AttributeId, BridgedNode, ClusterId, CommandId};
use crate::error::{BridgeError, Result};
use crate::providers::DataProvider;
use crate::storage::PersistedRecord;

/// Index into the provider arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderId(pub u8);

/// Provider for an [`BridgeManager::add_devices`] batch.
pub enum ProviderHandle {
    /// A provider the registry has not seen; ownership moves in on success.
    New(Box<dyn DataProvider>),
    /// A provider already backing other slots.
    Existing(ProviderId),
}

/// A failed batch.  The caller gets back every node and, if it was new,
/// the provider; dropping them destroys them.
pub struct AddRejected {
    pub error: BridgeError,
    pub nodes: Vec<Box<dyn BridgedNode>>,
    pub provider: Option<Box<dyn DataProvider>>,
}

impl fmt::Debug for AddRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddRejected")
            .field("error", &self.error)
            .field("nodes", &self.nodes.len())
            .field("provider", &self.provider.is_some())
            .finish()
    }
}

/// What [`BridgeManager::remove_device`] tore down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    pub index: u8,
    pub endpoint_id: u16,
    pub provider: ProviderId,
    /// The removed slot was the provider's last reference.
    pub provider_destroyed: bool,
    /// Radio address of the destroyed provider, if it had one.
    pub released_address: Option<BtAddress>,
}

pub type AddedIndexes = heapless::Vec<u8, MAX_BRIDGED_DEVICES_PER_PROVIDER>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    Uninitialized,
    /// Replaying persisted pairings.
    Restoring,
    Ready,
    /// Restore failed; the registry refuses all changes.
    Failed,
}

struct Slot {
    node: Box<dyn BridgedNode>,
    provider: ProviderId,
}

pub struct BridgeManager {
    state: RegistryState,
    slots: [Option<Slot>; MAX_BRIDGED_DEVICES],
    providers: [Option<Box<dyn DataProvider>>; MAX_DATA_PROVIDERS],
    /// Occupied indices in insertion order.
    indexes: heapless::Vec<u8, MAX_BRIDGED_DEVICES>,
    first_dynamic_endpoint_id: u16,
    current_endpoint_id: u16,
}

impl BridgeManager {
    pub fn new() -> Self {
        Self {
            state: RegistryState::Uninitialized,
            slots: [const { None }; MAX_BRIDGED_DEVICES],
            providers: [const { None }; MAX_DATA_PROVIDERS],
            indexes: heapless::Vec::new(),
            first_dynamic_endpoint_id: 0,
            current_endpoint_id: 0,
        }
    }

    /// One-time bring-up.
    ///
    /// Computes the first dynamic endpoint id, disables the placeholder
    /// endpoint, then calls `restore`, which re-adds persisted pairings
    /// through [`add_devices`](Self::add_devices).  An error from `restore`
    /// fails `init` and leaves the registry refusing changes.
    pub fn init<F, R>(&mut self, fabric: &mut F, restore: R) -> Result<usize>
    where
        F: FabricPort,
        R: FnOnce(&mut Self, &mut F) -> Result<usize>,
    {
        if self.state != RegistryState::Uninitialized {
            return Err(BridgeError::AlreadyInitialized);
        }
        let placeholder = fabric.last_fixed_endpoint_id();
        self.first_dynamic_endpoint_id = placeholder.wrapping_add(1);
        self.current_endpoint_id = self.first_dynamic_endpoint_id;
        fabric.set_endpoint_enabled(placeholder, false);

        self.state = RegistryState::Restoring;
        match restore(self, fabric) {
            Ok(restored) => {
                self.state = RegistryState::Ready;
                info!(
                    "Registry: ready, {} device(s) restored, next endpoint {}",
                    restored, self.current_endpoint_id
                );
                Ok(restored)
            }
            Err(e) => {
                self.state = RegistryState::Failed;
                warn!("Registry: restore failed: {}", e);
                Err(e)
            }
        }
    }

    pub fn state(&self) -> RegistryState {
        self.state
    }

    // ── Add ───────────────────────────────────────────────────

    /// Atomically insert 1..=`MAX_BRIDGED_DEVICES_PER_PROVIDER` nodes backed
    /// by one provider.
    ///
    /// `indexes` / `endpoint_ids` pin the slot and endpoint of each node
    /// (restore path); otherwise the lowest free slot and the next endpoint
    /// id from the cursor are used.  On any failure every insert of this
    /// call is rolled back and ownership returns in [`AddRejected`].
    pub fn add_devices(
        &mut self,
        nodes: Vec<Box<dyn BridgedNode>>,
        provider: ProviderHandle,
        indexes: Option<&[u8]>,
        endpoint_ids: Option<&[u16]>,
        fabric: &mut impl FabricPort,
    ) -> core::result::Result<AddedIndexes, AddRejected> {
        let reject = |error, nodes, provider: ProviderHandle| AddRejected {
            error,
            nodes,
            provider: match provider {
                ProviderHandle::New(p) => Some(p),
                ProviderHandle::Existing(_) => None,
            },
        };

        if !matches!(self.state, RegistryState::Ready | RegistryState::Restoring) {
            return Err(reject(BridgeError::IncorrectState, nodes, provider));
        }
        if let Err(e) = self.check_batch(nodes.len(), indexes, endpoint_ids) {
            return Err(reject(e, nodes, provider));
        }

        let (provider_id, is_new) = match provider {
            ProviderHandle::Existing(id) => {
                if self.provider(id).is_none() {
                    return Err(reject(BridgeError::NotFound, nodes, ProviderHandle::Existing(id)));
                }
                (id, false)
            }
            ProviderHandle::New(mut p) => {
                let Some(free) = self.providers.iter().position(Option::is_none) else {
                    return Err(reject(BridgeError::ResourceExhausted, nodes, ProviderHandle::New(p)));
                };
                if let Err(e) = p.init() {
                    return Err(reject(e, nodes, ProviderHandle::New(p)));
                }
                self.providers[free] = Some(p);
                (ProviderId(free as u8), true)
            }
        };

        let saved_cursor = self.current_endpoint_id;
        let mut added = AddedIndexes::new();
        let mut pending = nodes.into_iter();
        let mut failure = None;

        for (n, mut node) in pending.by_ref().enumerate() {
            let index = match indexes {
                Some(list) => list[n],
                None => match self.lowest_free_index() {
                    Some(i) => i,
                    None => {
                        failure = Some((BridgeError::ResourceExhausted, node));
                        break;
                    }
                },
            };
            let device_type = node.info().device_type;
            let registered = match endpoint_ids {
                Some(list) => self.register_explicit(fabric, index, list[n], device_type),
                None => self.register_next(fabric, index, device_type),
            };
            match registered {
                Ok(endpoint_id) => {
                    node.info_mut().endpoint_id = endpoint_id;
                    self.slots[index as usize] = Some(Slot {
                        node,
                        provider: provider_id,
                    });
                    // Capacity equals the slot count.
                    let _ = self.indexes.push(index);
                    let _ = added.push(index);
                    debug!("Registry: slot {} -> endpoint {}", index, endpoint_id);
                }
                Err(e) => {
                    failure = Some((e, node));
                    break;
                }
            }
        }

        let Some((error, failed_node)) = failure else {
            return Ok(added);
        };

        // Roll back every insert of this call, restoring the caller's order.
        let mut returned: Vec<Box<dyn BridgedNode>> = Vec::with_capacity(added.len() + 1);
        for &index in &added {
            if let Err(e) = fabric.remove_dynamic_endpoint(index) {
                warn!("Registry: rollback of slot {} endpoint failed: {}", index, e);
            }
            if let Some(slot) = self.slots[index as usize].take() {
                let mut node = slot.node;
                node.info_mut().endpoint_id = INVALID_ENDPOINT_ID;
                returned.push(node);
            }
            self.indexes.retain(|&i| i != index);
        }
        returned.push(failed_node);
        returned.extend(pending);
        self.current_endpoint_id = saved_cursor;

        let provider = if is_new {
            self.providers[provider_id.0 as usize].take()
        } else {
            None
        };
        warn!("Registry: add rejected: {}", error);
        Err(AddRejected {
            error,
            nodes: returned,
            provider,
        })
    }

    fn check_batch(&self, count: usize, indexes: Option<&[u8]>, endpoint_ids: Option<&[u16]>) -> Result<()> {
        if count == 0 || count > MAX_BRIDGED_DEVICES_PER_PROVIDER {
            return Err(BridgeError::InvalidArgument);
        }
        if indexes.is_some_and(|l| l.len() != count) || endpoint_ids.is_some_and(|l| l.len() != count) {
            return Err(BridgeError::InvalidArgument);
        }
        if self.slots.iter().filter(|s| s.is_none()).count() < count {
            return Err(BridgeError::ResourceExhausted);
        }
        if let Some(list) = indexes {
            for (n, &index) in list.iter().enumerate() {
                if index as usize >= MAX_BRIDGED_DEVICES {
                    return Err(BridgeError::InvalidArgument);
                }
                if self.slots[index as usize].is_some() || list[..n].contains(&index) {
                    return Err(BridgeError::Conflict);
                }
            }
        }
        Ok(())
    }

    fn lowest_free_index(&self) -> Option<u8> {
        self.slots.iter().position(Option::is_none).map(|i| i as u8)
    }

    /// Register a persisted endpoint id as-is and move the cursor past it.
    fn register_explicit(
        &mut self,
        fabric: &mut impl FabricPort,
        index: u8,
        endpoint_id: u16,
        device_type: devices::DeviceType,
    ) -> Result<u16> {
        if endpoint_id < self.first_dynamic_endpoint_id || endpoint_id == INVALID_ENDPOINT_ID {
            return Err(BridgeError::InvalidArgument);
        }
        fabric.add_dynamic_endpoint(index, endpoint_id, device_type)?;
        if endpoint_id >= self.current_endpoint_id {
            self.current_endpoint_id = self.wrap(endpoint_id.wrapping_add(1));
        }
        Ok(endpoint_id)
    }

    /// Take ids from the cursor, skipping ones the fabric reports in use.
    fn register_next(
        &mut self,
        fabric: &mut impl FabricPort,
        index: u8,
        device_type: devices::DeviceType,
    ) -> Result<u16> {
        let span = INVALID_ENDPOINT_ID.saturating_sub(self.first_dynamic_endpoint_id);
        for _ in 0..span {
            let candidate = self.current_endpoint_id;
            self.current_endpoint_id = self.wrap(candidate.wrapping_add(1));
            match fabric.add_dynamic_endpoint(index, candidate, device_type) {
                Ok(()) => return Ok(candidate),
                Err(FabricError::EndpointExists) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(BridgeError::ResourceExhausted)
    }

    fn wrap(&self, endpoint_id: u16) -> u16 {
        if endpoint_id < self.first_dynamic_endpoint_id || endpoint_id == INVALID_ENDPOINT_ID {
            self.first_dynamic_endpoint_id
        } else {
            endpoint_id
        }
    }

    // ── Remove ────────────────────────────────────────────────

    /// Remove the node at `endpoint_id`, releasing its fabric endpoint and,
    /// if no other slot references it, its provider.
    pub fn remove_device(&mut self, endpoint_id: u16, fabric: &mut impl FabricPort) -> Result<Removal> {
        if self.state != RegistryState::Ready {
            return Err(BridgeError::IncorrectState);
        }
        let index = self.index_of_endpoint(endpoint_id).ok_or(BridgeError::NotFound)?;
        fabric.remove_dynamic_endpoint(index).map_err(|e| {
            warn!("Registry: fabric refused to release endpoint {}: {}", endpoint_id, e);
            BridgeError::Internal
        })?;

        let slot = self.slots[index as usize]
            .take()
            .ok_or(BridgeError::Internal)?;
        let provider = slot.provider;
        drop(slot.node);

        let still_referenced = self.slots.iter().flatten().any(|s| s.provider == provider);
        let mut released_address = None;
        if !still_referenced {
            if let Some(p) = self.providers[provider.0 as usize].take() {
                released_address = p.address();
            }
        }
        self.indexes.retain(|&i| i != index);
        info!(
            "Registry: removed endpoint {} (slot {}){}",
            endpoint_id,
            index,
            if still_referenced { "" } else { ", provider released" }
        );
        Ok(Removal {
            index,
            endpoint_id,
            provider,
            provider_destroyed: !still_referenced,
            released_address,
        })
    }

    // ── Fabric attribute access ───────────────────────────────

    /// Identity and descriptor attributes are always answered; anything
    /// else needs the accessory to be reachable.
    pub fn handle_read(&self, index: u8, cluster: ClusterId, attribute: AttributeId, buf: &mut [u8]) -> Result<usize> {
        let slot = self.slot(index)?;
        let info = slot.node.info();
        if let Some(result) = devices::read_common(info, cluster, attribute, buf) {
            return result;
        }
        if !info.reachable {
            return Err(BridgeError::IncorrectState);
        }
        slot.node.read_attribute(cluster, attribute, buf)
    }

    /// Apply a fabric write to the node, then forward it to the provider.
    ///
    /// Identity attributes are writable while the accessory is unreachable,
    /// matching [`handle_read`](Self::handle_read); they never reach the
    /// provider.
    pub fn handle_write(
        &mut self,
        index: u8,
        cluster: ClusterId,
        attribute: AttributeId,
        data: &[u8],
        link: &mut dyn GattLink,
    ) -> Result<()> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .and_then(Option::as_mut)
            .ok_or(BridgeError::NotFound)?;
        if let Some(result) = devices::write_common(slot.node.info_mut(), cluster, attribute, data) {
            return result;
        }
        if !slot.node.info().reachable {
            return Err(BridgeError::IncorrectState);
        }
        slot.node.write_attribute(cluster, attribute, data)?;
        let provider = self.providers[slot.provider.0 as usize]
            .as_deref_mut()
            .ok_or(BridgeError::Internal)?;
        match provider.update_state(cluster, attribute, data, link) {
            Err(BridgeError::Unsupported) => Ok(()),
            other => other,
        }
    }

    // ── Provider notifications ────────────────────────────────

    /// Apply a provider-side change to every node it backs and report the
    /// accepted ones to the fabric.  Returns how many nodes changed.
    pub fn on_provider_state_changed(
        &mut self,
        provider: ProviderId,
        cluster: ClusterId,
        attribute: AttributeId,
        data: &[u8],
        fabric: &mut impl FabricPort,
    ) -> usize {
        let mut changed = 0;
        for slot in self.slots.iter_mut().flatten().filter(|s| s.provider == provider) {
            let result = if (cluster, attribute) == (BRIDGED_DEVICE_BASIC_INFORMATION, ATTR_REACHABLE) {
                devices::apply_reachable(slot.node.info_mut(), data)
            } else {
                slot.node.apply_change(cluster, attribute, data)
            };
            match result {
                Ok(true) => {
                    fabric.report_attribute_changed(slot.node.info().endpoint_id, cluster, attribute);
                    changed += 1;
                }
                Ok(false) | Err(BridgeError::Unsupported) => {}
                Err(e) => debug!(
                    "Registry: endpoint {} rejected change 0x{:04x}/0x{:04x}: {}",
                    slot.node.info().endpoint_id,
                    cluster,
                    attribute,
                    e
                ),
            }
        }
        changed
    }

    pub fn set_reachable(&mut self, provider: ProviderId, reachable: bool, fabric: &mut impl FabricPort) -> usize {
        self.on_provider_state_changed(
            provider,
            BRIDGED_DEVICE_BASIC_INFORMATION,
            ATTR_REACHABLE,
            &[u8::from(reachable)],
            fabric,
        )
    }

    /// Run an accessory-requested command on every node of `provider`,
    /// report the result and push the new state back to the accessory.
    pub fn on_provider_command(
        &mut self,
        provider: ProviderId,
        cluster: ClusterId,
        command: CommandId,
        fabric: &mut impl FabricPort,
        link: &mut dyn GattLink,
    ) -> usize {
        let Some(p) = self.providers[provider.0 as usize].as_deref_mut() else {
            return 0;
        };
        let mut handled = 0;
        for slot in self.slots.iter_mut().flatten().filter(|s| s.provider == provider) {
            let attribute = match slot.node.handle_command(cluster, command) {
                Ok(Some(attribute)) => attribute,
                Ok(None) | Err(_) => continue,
            };
            handled += 1;
            fabric.report_attribute_changed(slot.node.info().endpoint_id, cluster, attribute);
            let mut buf = [0u8; 8];
            let Ok(n) = slot.node.read_attribute(cluster, attribute, &mut buf) else {
                continue;
            };
            match p.update_state(cluster, attribute, &buf[..n], link) {
                Ok(()) | Err(BridgeError::Unsupported) => {}
                Err(e) => warn!("Registry: provider rejected command state: {}", e),
            }
        }
        handled
    }

    // ── Lookups ───────────────────────────────────────────────

    fn slot(&self, index: u8) -> Result<&Slot> {
        self.slots
            .get(index as usize)
            .and_then(Option::as_ref)
            .ok_or(BridgeError::NotFound)
    }

    pub fn index_of_endpoint(&self, endpoint_id: u16) -> Option<u8> {
        self.indexes.iter().copied().find(|&i| {
            self.slots[i as usize]
                .as_ref()
                .is_some_and(|s| s.node.info().endpoint_id == endpoint_id)
        })
    }

    pub fn node(&self, index: u8) -> Option<&dyn BridgedNode> {
        self.slot(index).ok().map(|s| s.node.as_ref())
    }

    pub fn provider_of(&self, index: u8) -> Option<ProviderId> {
        self.slot(index).ok().map(|s| s.provider)
    }

    pub fn provider(&self, id: ProviderId) -> Option<&dyn DataProvider> {
        self.providers.get(id.0 as usize)?.as_deref()
    }

    pub fn provider_mut(&mut self, id: ProviderId) -> Option<&mut (dyn DataProvider + 'static)> {
        self.providers.get_mut(id.0 as usize)?.as_deref_mut()
    }

    pub fn find_provider_by_address(&self, address: &BtAddress) -> Option<ProviderId> {
        self.providers
            .iter()
            .position(|p| p.as_ref().is_some_and(|p| p.address().as_ref() == Some(address)))
            .map(|i| ProviderId(i as u8))
    }

    /// Slots backed by `provider`, in slot order.
    pub fn indexes_of_provider(&self, provider: ProviderId) -> AddedIndexes {
        let mut out = AddedIndexes::new();
        for &i in &self.indexes {
            if self.provider_of(i) == Some(provider) && out.push(i).is_err() {
                break;
            }
        }
        out
    }

    /// Snapshot of slot `index` in its persisted form.
    pub fn record_for(&self, index: u8) -> Option<PersistedRecord> {
        let slot = self.slot(index).ok()?;
        let info = slot.node.info();
        Some(PersistedRecord {
            endpoint_id: info.endpoint_id,
            device_type: info.device_type.id(),
            unique_id: info.unique_id.clone(),
            node_label: info.node_label.clone(),
            user_data: self.provider(slot.provider)?.user_data(),
        })
    }

    /// Occupied indices in insertion order.
    pub fn indexes(&self) -> &[u8] {
        &self.indexes
    }

    pub fn device_count(&self) -> usize {
        self.indexes.len()
    }

    pub fn provider_count(&self) -> usize {
        self.providers.iter().flatten().count()
    }

    pub fn next_endpoint_id(&self) -> u16 {
        self.current_endpoint_id
    }
}

impl Default for BridgeManager {
    fn default() -> Self {
        Self::new()
    }
}
