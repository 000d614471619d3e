//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured bridge events to the
//! ESP-IDF logger (UART / USB-CDC in production).  The CLI reads its
//! answers from the same console, so scan results are listed here with
//! the index `add <type> <radioIndex>` expects.

use log::{info, warn};

use crate::app::events::BridgeEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`BridgeEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &BridgeEvent) {
        match event {
            BridgeEvent::Initialized { restored } => {
                info!("START | restored={}", restored);
            }
            BridgeEvent::DeviceAdded {
                index,
                endpoint_id,
                device_type,
            } => {
                info!("ADD   | index={} endpoint={} type={:?}", index, endpoint_id, device_type);
            }
            BridgeEvent::DeviceRemoved { index, endpoint_id } => {
                info!("REM   | index={} endpoint={}", index, endpoint_id);
            }
            BridgeEvent::PairingStarted { address } => {
                info!("PAIR  | connecting to {}", address);
            }
            BridgeEvent::PairingFailed { address, error } => {
                warn!("PAIR  | {} failed: {}", address, error);
            }
            BridgeEvent::ScanCompleted { results } => {
                info!("SCAN  | {} device(s)", results.len());
                for (i, r) in results.iter().enumerate() {
                    info!("SCAN  | [{}] {} rssi={} service={:?}", i, r.address, r.rssi, r.service);
                }
            }
            BridgeEvent::StatusChanged(status) => {
                info!("BLE   | {}", status);
            }
            BridgeEvent::PersistenceFailed { index, error } => match index {
                Some(i) => warn!("NVS   | record {} not persisted: {}", i, error),
                None => warn!("NVS   | index list not persisted: {}", error),
            },
        }
    }
}
