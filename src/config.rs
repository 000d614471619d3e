//! Bridge configuration parameters
//!
//! Runtime-tunable timing lives in [`BridgeConfig`] and is persisted through
//! the [`ConfigPort`](crate::app::ports::ConfigPort).  Table capacities are
//! compile-time constants: every table in the bridge is a fixed array.

use serde::{Deserialize, Serialize};

// --- Capacities ---

/// Number of slots in the bridged-device table.
pub const MAX_BRIDGED_DEVICES: usize = 16;
/// Nodes a single provider may back in one `add_devices` batch.
pub const MAX_BRIDGED_DEVICES_PER_PROVIDER: usize = 2;
/// Live providers held by the registry at once.
pub const MAX_DATA_PROVIDERS: usize = 16;
/// Distinct advertisers remembered per scan cycle.
pub const MAX_SCANNED_DEVICES: usize = 16;
/// Providers tracked by the connectivity manager.
pub const MAX_CONNECTED_DEVICES: usize = 8;
/// Depth of the reconnection FIFO.
pub const MAX_RECOVERY_ENTRIES: usize = MAX_CONNECTED_DEVICES;

// --- Bounded strings and blobs ---

pub const MAX_UNIQUE_ID_LEN: usize = 32;
pub const MAX_NODE_LABEL_LEN: usize = 32;
pub const MAX_USER_DATA_SIZE: usize = 128;

// --- Storage / queue ---

/// Current persisted schema version.
pub const STORAGE_VERSION: u8 = 2;
/// Work-queue depth (radio, timer and CLI items).
pub const WORK_QUEUE_DEPTH: usize = 32;
/// Endpoint id of a node that is not registered with the fabric.
pub const INVALID_ENDPOINT_ID: u16 = 0xFFFF;

/// Runtime bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    // --- Scanning ---
    /// Duration of a user-requested discovery scan (milliseconds)
    pub scan_timeout_ms: u32,
    /// Duration of the scan window used while recovering lost devices
    pub recovery_scan_timeout_ms: u32,

    // --- Recovery ---
    /// First delay between recovery attempts
    pub recovery_interval_initial_ms: u32,
    /// Ceiling the recovery delay doubles up to on repeated failure
    pub recovery_interval_max_ms: u32,

    // --- Main loop ---
    /// How long the CLI reader sleeps between polls of stdin
    pub cli_poll_interval_ms: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 10_000,
            recovery_scan_timeout_ms: 5_000,

            recovery_interval_initial_ms: 10_000,
            recovery_interval_max_ms: 60_000,

            cli_poll_interval_ms: 100,
        }
    }
}
