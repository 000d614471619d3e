//! Outbound bridge events.
//!
//! The [`Bridge`](super::service::Bridge) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: log to serial, drive a status LED,
//! answer the CLI.

use crate::connectivity::{BleStatus, BtAddress, ScanResults};
use crate::devices::DeviceType;
use crate::error::BridgeError;

/// Structured events emitted by the bridge core.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// Bring-up finished; carries the number of restored devices.
    Initialized { restored: usize },

    /// A node is live on the fabric and persisted.
    DeviceAdded {
        index: u8,
        endpoint_id: u16,
        device_type: DeviceType,
    },

    DeviceRemoved { index: u8, endpoint_id: u16 },

    /// A BLE connect was issued; nodes follow on the first successful link.
    PairingStarted { address: BtAddress },

    PairingFailed { address: BtAddress, error: BridgeError },

    /// Discovery scan window closed.
    ScanCompleted { results: ScanResults },

    /// Aggregate radio status moved.
    StatusChanged(BleStatus),

    /// The registry change stands but could not be written to flash.
    /// `index` is `None` for index-list/count failures.
    PersistenceFailed { index: Option<u8>, error: BridgeError },
}
