//! BLE-to-mesh bridge core.
//!
//! Exposes the registry, connectivity and storage modules for integration
//! testing.  All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module; every other target
//! gets the in-memory simulation of the same adapters.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod connectivity;
pub mod devices;
pub mod error;
pub mod events;
pub mod factory;
pub mod providers;
pub mod registry;
pub mod storage;
