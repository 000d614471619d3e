//! Ordered work queue feeding the single bridge consumer.
//!
//! Work is produced by:
//! - Bluedroid GAP/GATTC callbacks (advertisements, link and discovery events)
//! - esp_timer callbacks (scan window, recovery interval)
//! - the CLI reader thread (parsed commands)
//!
//! and consumed by the main loop, which hands each item to
//! [`Bridge::process`](crate::app::service::Bridge::process) one at a time.
//! Producers never touch registry, storage or connectivity state.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ GAP/GATTC   │────▶│              │     │              │
//! │ esp_timer   │────▶│  Work Queue  │────▶│  Main Loop   │
//! │ CLI reader  │────▶│  (bounded)   │     │  (consumer)  │
//! └─────────────┘     └──────────────┘     └──────────────┘
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

use crate::app::commands::BridgeCommand;
use crate::config::WORK_QUEUE_DEPTH;
use crate::connectivity::RadioEvent;

/// One-shot timers owned by the connectivity manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerId {
    /// End of the current scan window (discovery or recovery).
    ScanWindow,
    /// Next recovery attempt for the lost-device queue.
    Recovery,
}

/// A unit of work for the bridge consumer.
#[derive(Debug, Clone)]
pub enum WorkItem {
    Radio(RadioEvent),
    Timer(TimerId),
    Command(BridgeCommand),
}

/// Bounded MPSC queue between callback contexts and the main loop.
pub type WorkQueue = Channel<CriticalSectionRawMutex, WorkItem, WORK_QUEUE_DEPTH>;

/// Post an item from any context.  Never blocks.
///
/// Returns `false` (and drops the item) if the queue is full.
pub fn post(queue: &WorkQueue, item: WorkItem) -> bool {
    match queue.try_send(item) {
        Ok(()) => true,
        Err(_) => {
            warn!("work queue full, dropping item");
            false
        }
    }
}

/// Pop the next pending item without waiting.
pub fn next(queue: &WorkQueue) -> Option<WorkItem> {
    queue.try_receive().ok()
}
