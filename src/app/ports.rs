//! Port traits: the hexagonal boundary between the bridge core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Bridge (domain)
//! ```
//!
//! Driven adapters (radio, timers, fabric endpoint table, storage, event
//! sinks) implement these traits.  The [`Bridge`](super::service::Bridge)
//! owns them via generics, so the registry and connectivity logic never
//! touch the Bluetooth stack or flash directly.
//!
//! Radio and timer adapters never call back into the domain: they post a
//! [`WorkItem`](crate::events::WorkItem) onto the work queue and the single
//! consumer feeds it to [`Bridge::process`](super::service::Bridge::process).

use crate::config::BridgeConfig;
use crate::connectivity::{BtAddress, ConnHandle, ConnParams, SecurityLevel, ServiceId};
use crate::devices::{AttributeId, ClusterId, DeviceType};
use crate::error::BridgeError;
use crate::events::TimerId;

// ───────────────────────────────────────────────────────────────
// Radio port (driven adapter: domain → BLE central stack)
// ───────────────────────────────────────────────────────────────

/// BLE central operations.  Every call only *starts* the operation; the
/// outcome arrives later as a [`RadioEvent`](crate::connectivity::RadioEvent).
pub trait RadioPort {
    /// Start an active scan.  Runs until [`stop_scan`](Self::stop_scan).
    fn start_scan(&mut self) -> Result<(), RadioError>;

    fn stop_scan(&mut self) -> Result<(), RadioError>;

    /// Open a connection to `address` with the parameters observed while
    /// scanning.  `security` requests pairing once the link is up.
    fn connect(
        &mut self,
        address: BtAddress,
        params: &ConnParams,
        security: Option<SecurityLevel>,
    ) -> Result<(), RadioError>;

    fn disconnect(&mut self, conn: ConnHandle) -> Result<(), RadioError>;

    /// Discover `service` and its characteristics on an open link.
    fn discover(&mut self, conn: ConnHandle, service: ServiceId) -> Result<(), RadioError>;

    /// Write without response to a characteristic value handle.
    fn write(&mut self, conn: ConnHandle, handle: u16, data: &[u8]) -> Result<(), RadioError>;

    /// Enable notifications by writing the client configuration descriptor.
    fn subscribe(&mut self, conn: ConnHandle, ccc_handle: u16) -> Result<(), RadioError>;
}

// ───────────────────────────────────────────────────────────────
// Timer port (driven adapter: domain → one-shot timers)
// ───────────────────────────────────────────────────────────────

/// One-shot timers.  Expiry posts `WorkItem::Timer(id)`.
pub trait TimerPort {
    /// Arm (or re-arm) timer `id`.
    fn start(&mut self, id: TimerId, duration_ms: u32);

    fn cancel(&mut self, id: TimerId);

    fn is_running(&self, id: TimerId) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Fabric port (driven adapter: domain → mesh data model)
// ───────────────────────────────────────────────────────────────

/// The dynamic-endpoint table of the fabric stack.
///
/// Endpoints below the first dynamic id are fixed (root node, aggregator
/// and one placeholder).  Dynamic endpoints are addressed by the bridge
/// slot index they were registered under.
pub trait FabricPort {
    /// Id of the last statically configured endpoint (the placeholder).
    fn last_fixed_endpoint_id(&self) -> u16;

    fn set_endpoint_enabled(&mut self, endpoint_id: u16, enabled: bool);

    /// Register `endpoint_id` at `index`.
    ///
    /// [`FabricError::EndpointExists`] is a retryable signal: the caller
    /// may try again with another id.
    fn add_dynamic_endpoint(
        &mut self,
        index: u8,
        endpoint_id: u16,
        device_type: DeviceType,
    ) -> Result<(), FabricError>;

    /// Release the endpoint registered at `index`, returning its id.
    fn remove_dynamic_endpoint(&mut self, index: u8) -> Result<u16, FabricError>;

    /// Mark an attribute dirty so subscribers get a report.
    fn report_attribute_changed(&mut self, endpoint_id: u16, cluster: ClusterId, attribute: AttributeId);
}

// ───────────────────────────────────────────────────────────────
// GATT link (domain → provider → connected accessory)
// ───────────────────────────────────────────────────────────────

/// Narrow view of the radio handed to data providers.  Providers only know
/// the address of their accessory; the link resolves the live connection.
pub trait GattLink {
    fn write(&mut self, address: BtAddress, handle: u16, data: &[u8]) -> Result<(), BridgeError>;

    fn subscribe(&mut self, address: BtAddress, ccc_handle: u16) -> Result<(), BridgeError>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / CLI output)
// ───────────────────────────────────────────────────────────────

/// The bridge emits structured [`BridgeEvent`](super::events::BridgeEvent)s
/// through this port.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::BridgeEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists the bridge configuration.
///
/// Implementations MUST validate before persisting.  Out-of-range values
/// are rejected with [`ConfigError::ValidationFailed`], never clamped.
pub trait ConfigPort {
    /// Returns [`BridgeConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<BridgeConfig, ConfigError>;

    fn save(&self, config: &BridgeConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage.
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic per key.  ESP-IDF NVS guarantees
///   this per `nvs_commit()`; the in-memory simulation trivially does.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
    /// Encryption or decryption failed (wrong key, corrupted blob).
    EncryptionError,
}

/// Synchronous failures of [`RadioPort`] primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// The stack is already running a conflicting procedure.
    Busy,
    /// No free connection or request slots in the stack.
    NoResources,
    /// The connection handle is not (or no longer) open.
    NotConnected,
    /// Raw stack status code.
    Stack(i32),
}

/// Errors from [`FabricPort`] endpoint management.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FabricError {
    /// The endpoint id is already in use (retry with another id).
    EndpointExists,
    /// No free dynamic endpoint slot.
    NoSpace,
    /// Nothing registered at the given index.
    UnknownEndpoint,
    /// Any other data-model failure.
    Failed,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::EncryptionError => write!(f, "encryption error"),
        }
    }
}

impl core::fmt::Display for RadioError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Busy => write!(f, "radio busy"),
            Self::NoResources => write!(f, "radio out of resources"),
            Self::NotConnected => write!(f, "not connected"),
            Self::Stack(rc) => write!(f, "stack error {}", rc),
        }
    }
}

impl core::fmt::Display for FabricError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::EndpointExists => write!(f, "endpoint exists"),
            Self::NoSpace => write!(f, "no dynamic endpoint space"),
            Self::UnknownEndpoint => write!(f, "unknown endpoint"),
            Self::Failed => write!(f, "data model failure"),
        }
    }
}
