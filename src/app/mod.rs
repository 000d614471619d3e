//! Application core: the bridge context and its boundary types.
//!
//! [`service::Bridge`] owns the registry, the connectivity manager and
//! versioned storage, and drives them from work items.  All interaction
//! with the Bluetooth stack, the fabric data model and flash happens
//! through **port traits** defined in [`ports`], keeping this layer fully
//! testable on the host.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
