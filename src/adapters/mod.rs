//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements   | Connects to                      |
//! |-------------|--------------|----------------------------------|
//! | `ble`       | RadioPort    | Bluedroid GAP + GATT client      |
//! | `fabric`    | FabricPort   | Dynamic endpoint table           |
//! | `log_sink`  | EventSink    | Serial log output                |
//! | `nvs`       | ConfigPort   | NVS / in-memory store            |
//! |             | StoragePort  |                                  |
//! | `timer`     | TimerPort    | esp_timer one-shots / armed set  |

pub mod ble;
pub mod fabric;
pub mod log_sink;
pub mod nvs;
pub mod timer;
pub(crate) mod utils;
