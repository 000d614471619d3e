//! Reconnection FIFO with exponential back-off.
//!
//! Lost providers wait here, in loss order, until their address shows up
//! in a recovery scan.  The delay between recovery scans doubles on every
//! fruitless attempt up to a ceiling and snaps back once a device
//! reconnects.

use heapless::Deque;

use crate::config::MAX_RECOVERY_ENTRIES;

use super::types::BtAddress;

pub struct RecoveryQueue {
    queue: Deque<BtAddress, MAX_RECOVERY_ENTRIES>,
    interval_ms: u32,
    initial_ms: u32,
    max_ms: u32,
}

impl RecoveryQueue {
    pub fn new(initial_ms: u32, max_ms: u32) -> Self {
        Self {
            queue: Deque::new(),
            interval_ms: initial_ms,
            initial_ms,
            max_ms: max_ms.max(initial_ms),
        }
    }

    /// Append `address` unless it is already waiting.
    ///
    /// Returns `false` if the queue is full.
    pub fn enqueue(&mut self, address: BtAddress) -> bool {
        if self.contains(&address) {
            return true;
        }
        self.queue.push_back(address).is_ok()
    }

    pub fn head(&self) -> Option<&BtAddress> {
        self.queue.front()
    }

    pub fn pop_head(&mut self) -> Option<BtAddress> {
        self.queue.pop_front()
    }

    /// Drop `address` wherever it sits, keeping the order of the rest.
    pub fn remove(&mut self, address: &BtAddress) {
        let mut kept = Deque::new();
        while let Some(a) = self.queue.pop_front() {
            if a != *address {
                // Capacity is identical, so this cannot overflow.
                let _ = kept.push_back(a);
            }
        }
        self.queue = kept;
    }

    pub fn contains(&self, address: &BtAddress) -> bool {
        self.queue.iter().any(|a| a == address)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Delay before the next recovery scan.
    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    /// Double the delay, saturating at the ceiling.
    pub fn back_off(&mut self) {
        self.interval_ms = self.interval_ms.saturating_mul(2).min(self.max_ms);
    }

    pub fn reset_interval(&mut self) {
        self.interval_ms = self.initial_ms;
    }
}
