//! One-shot timer adapter.
//!
//! Implements [`TimerPort`] for the scan-window and recovery timers.
//!
//! - **`target_os = "espidf"`**: one `esp_timer` per [`TimerId`].  The
//!   callback runs in the esp_timer task and only posts
//!   [`WorkItem::Timer`](crate::events::WorkItem) onto the work queue.
//! - **all other targets**: an armed set with no clock.  Whoever drives
//!   the simulation calls [`OneShotTimers::expire`] and posts the item.

use log::debug;

use crate::app::ports::TimerPort;
use crate::events::TimerId;

#[cfg(target_os = "espidf")]
use crate::events::WorkQueue;
#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

const TIMER_COUNT: usize = 2;

fn slot(id: TimerId) -> usize {
    match id {
        TimerId::ScanWindow => 0,
        TimerId::Recovery => 1,
    }
}

#[cfg(target_os = "espidf")]
static QUEUE: std::sync::OnceLock<&'static WorkQueue> = std::sync::OnceLock::new();

#[cfg(target_os = "espidf")]
unsafe extern "C" fn timer_cb(arg: *mut core::ffi::c_void) {
    let id = if arg.is_null() {
        TimerId::ScanWindow
    } else {
        TimerId::Recovery
    };
    if let Some(queue) = QUEUE.get() {
        crate::events::post(queue, crate::events::WorkItem::Timer(id));
    }
}

pub struct OneShotTimers {
    #[cfg(target_os = "espidf")]
    handles: [esp_timer_handle_t; TIMER_COUNT],
    #[cfg(not(target_os = "espidf"))]
    armed: [Option<u32>; TIMER_COUNT],
}

impl OneShotTimers {
    /// Create both timers and route their expiry to `queue`.
    #[cfg(target_os = "espidf")]
    pub fn new(queue: &'static WorkQueue) -> anyhow::Result<Self> {
        let _ = QUEUE.set(queue);
        let mut handles: [esp_timer_handle_t; TIMER_COUNT] = [core::ptr::null_mut(); TIMER_COUNT];
        let names: [&[u8]; TIMER_COUNT] = [b"scan_win\0", b"recovery\0"];
        for (i, handle) in handles.iter_mut().enumerate() {
            let args = esp_timer_create_args_t {
                callback: Some(timer_cb),
                // Null selects the scan window; anything else the recovery timer.
                arg: i as *mut core::ffi::c_void,
                dispatch_method: esp_timer_dispatch_t_ESP_TIMER_TASK,
                name: names[i].as_ptr() as *const _,
                skip_unhandled_events: true,
            };
            let ret = unsafe { esp_timer_create(&args, handle) };
            if ret != ESP_OK {
                anyhow::bail!("esp_timer_create failed (rc={})", ret);
            }
        }
        log::info!("timer: scan window + recovery timers created");
        Ok(Self { handles })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        Self {
            armed: [None; TIMER_COUNT],
        }
    }

    /// Simulation: fire `id` if armed.  Returns whether it was.
    #[cfg(not(target_os = "espidf"))]
    pub fn expire(&mut self, id: TimerId) -> bool {
        self.armed[slot(id)].take().is_some()
    }

    /// Simulation: duration `id` was last armed with, while armed.
    #[cfg(not(target_os = "espidf"))]
    pub fn armed_for(&self, id: TimerId) -> Option<u32> {
        self.armed[slot(id)]
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for OneShotTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerPort for OneShotTimers {
    fn start(&mut self, id: TimerId, duration_ms: u32) {
        #[cfg(target_os = "espidf")]
        {
            let handle = self.handles[slot(id)];
            // SAFETY: handles were created in `new` and live as long as self.
            unsafe {
                esp_timer_stop(handle);
                let ret = esp_timer_start_once(handle, u64::from(duration_ms) * 1_000);
                if ret != ESP_OK {
                    log::error!("timer: start {:?} failed (rc={})", id, ret);
                }
            }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.armed[slot(id)] = Some(duration_ms);
        }
        debug!("timer: {:?} armed for {} ms", id, duration_ms);
    }

    fn cancel(&mut self, id: TimerId) {
        #[cfg(target_os = "espidf")]
        unsafe {
            esp_timer_stop(self.handles[slot(id)]);
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.armed[slot(id)] = None;
        }
        debug!("timer: {:?} cancelled", id);
    }

    fn is_running(&self, id: TimerId) -> bool {
        #[cfg(target_os = "espidf")]
        {
            unsafe { esp_timer_is_active(self.handles[slot(id)]) }
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.armed[slot(id)].is_some()
        }
    }
}

#[cfg(target_os = "espidf")]
impl Drop for OneShotTimers {
    fn drop(&mut self) {
        for handle in self.handles {
            unsafe {
                esp_timer_stop(handle);
                esp_timer_delete(handle);
            }
        }
    }
}
