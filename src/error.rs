//! Unified error type for the bridge core.
//!
//! Every registry, storage and connectivity operation returns
//! [`BridgeError`].  Port-level errors (`StorageError`, `RadioError`,
//! `FabricError`) convert into it so callers see one small taxonomy.
//! All variants are `Copy` so they travel through events and the work
//! queue without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level bridge error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    /// Malformed caller input (bad count, out-of-range index, bad label).
    InvalidArgument,
    /// Slot, provider, connection or queue table is full.
    ResourceExhausted,
    /// Explicit index or endpoint id already in use.
    Conflict,
    /// Unknown endpoint, index, address or storage key.
    NotFound,
    /// Operation invalid for the current reachability / lifecycle state.
    IncorrectState,
    /// Primitive failure not attributable to caller input.
    Internal,
    /// Operation has no meaning for this node or provider.
    Unsupported,
    /// `init` was called more than once.
    AlreadyInitialized,
    /// A scan (or similar exclusive operation) is already running.
    AlreadyInProgress,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::ResourceExhausted => write!(f, "resource exhausted"),
            Self::Conflict => write!(f, "conflict"),
            Self::NotFound => write!(f, "not found"),
            Self::IncorrectState => write!(f, "incorrect state"),
            Self::Internal => write!(f, "internal error"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::AlreadyInitialized => write!(f, "already initialized"),
            Self::AlreadyInProgress => write!(f, "already in progress"),
        }
    }
}

impl core::error::Error for BridgeError {}

// ---------------------------------------------------------------------------
// Conversions from port errors
// ---------------------------------------------------------------------------

impl From<crate::app::ports::StorageError> for BridgeError {
    fn from(e: crate::app::ports::StorageError) -> Self {
        use crate::app::ports::StorageError;
        match e {
            StorageError::NotFound => Self::NotFound,
            StorageError::Full => Self::ResourceExhausted,
            StorageError::IoError | StorageError::EncryptionError => Self::Internal,
        }
    }
}

impl From<crate::app::ports::RadioError> for BridgeError {
    fn from(e: crate::app::ports::RadioError) -> Self {
        use crate::app::ports::RadioError;
        match e {
            RadioError::Busy => Self::AlreadyInProgress,
            RadioError::NoResources => Self::ResourceExhausted,
            RadioError::NotConnected => Self::IncorrectState,
            RadioError::Stack(_) => Self::Internal,
        }
    }
}

impl From<crate::app::ports::FabricError> for BridgeError {
    fn from(e: crate::app::ports::FabricError) -> Self {
        use crate::app::ports::FabricError;
        match e {
            FabricError::EndpointExists => Self::Conflict,
            FabricError::NoSpace => Self::ResourceExhausted,
            FabricError::UnknownEndpoint => Self::NotFound,
            FabricError::Failed => Self::Internal,
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Bridge-wide `Result` alias.
pub type Result<T> = core::result::Result<T, BridgeError>;
