//! Radio-level value types shared by the connectivity manager, the BLE
//! adapter and the data providers.

use core::fmt;

use crate::config::MAX_SCANNED_DEVICES;
use crate::error::BridgeError;

/// Maximum characteristics reported per discovered service.
pub const MAX_CHARACTERISTICS: usize = 8;
/// Largest notification payload forwarded to providers.
pub const MAX_NOTIFICATION_LEN: usize = 20;

// ───────────────────────────────────────────────────────────────
// Addresses and connection parameters
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressType {
    Public = 0,
    Random = 1,
}

impl AddressType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Public),
            1 => Some(Self::Random),
            _ => None,
        }
    }
}

/// A BLE device address.  Bytes are stored most significant first, the
/// way addresses are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BtAddress {
    pub bytes: [u8; 6],
    pub kind: AddressType,
}

impl BtAddress {
    pub const fn new(bytes: [u8; 6], kind: AddressType) -> Self {
        Self { bytes, kind }
    }
}

impl fmt::Display for BtAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Connection parameters in controller units (1.25 ms intervals, 10 ms
/// supervision timeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnParams {
    pub interval_min: u16,
    pub interval_max: u16,
    pub latency: u16,
    pub timeout: u16,
}

impl Default for ConnParams {
    fn default() -> Self {
        Self {
            interval_min: 24, // 30 ms
            interval_max: 40, // 50 ms
            latency: 0,
            timeout: 400, // 4 s
        }
    }
}

/// Stack-assigned identifier of an open link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnHandle(pub u16);

/// Security requested on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    /// Encrypted link, just-works pairing.
    Encrypted,
    /// Encrypted link with MITM protection.
    Authenticated,
}

// ───────────────────────────────────────────────────────────────
// Services and characteristics
// ───────────────────────────────────────────────────────────────

/// 128-bit UUID.  16-bit SIG UUIDs expand onto the Bluetooth base UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uuid(pub u128);

impl Uuid {
    const BASE: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

    pub const fn from_u16(short: u16) -> Self {
        Self(Self::BASE | ((short as u128) << 96))
    }

    /// The 16-bit alias, if this UUID lives on the base UUID.
    pub fn as_u16(&self) -> Option<u16> {
        let short = (self.0 >> 96) as u16;
        (Self::from_u16(short).0 == self.0).then_some(short)
    }
}

/// Nordic LED Button Service.
pub const LBS_SERVICE_UUID: Uuid = Uuid(0x00001523_1212_efde_1523_785feabcd123);
pub const LBS_BUTTON_UUID: Uuid = Uuid(0x00001524_1212_efde_1523_785feabcd123);
pub const LBS_LED_UUID: Uuid = Uuid(0x00001525_1212_efde_1523_785feabcd123);

/// Environmental Sensing Service and its measurement characteristics.
pub const ESS_SERVICE_UUID: Uuid = Uuid::from_u16(0x181A);
pub const ESS_TEMPERATURE_UUID: Uuid = Uuid::from_u16(0x2A6E);
pub const ESS_HUMIDITY_UUID: Uuid = Uuid::from_u16(0x2A6F);

/// GATT services the bridge knows how to back nodes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceId {
    LedButton = 1,
    EnvironmentalSensing = 2,
}

impl ServiceId {
    pub fn uuid(self) -> Uuid {
        match self {
            Self::LedButton => LBS_SERVICE_UUID,
            Self::EnvironmentalSensing => ESS_SERVICE_UUID,
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        if uuid == LBS_SERVICE_UUID {
            Some(Self::LedButton)
        } else if uuid == ESS_SERVICE_UUID {
            Some(Self::EnvironmentalSensing)
        } else {
            None
        }
    }

    /// Tag persisted in provider user data.
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::LedButton),
            2 => Some(Self::EnvironmentalSensing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub value_handle: u16,
    /// Client characteristic configuration descriptor, if notifiable.
    pub ccc_handle: Option<u16>,
}

pub type CharacteristicList = heapless::Vec<DiscoveredCharacteristic, MAX_CHARACTERISTICS>;

// ───────────────────────────────────────────────────────────────
// Radio events (posted from stack callbacks)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// We closed the link.
    LocalHost,
    /// The peer closed the link.
    RemoteUser,
    SupervisionTimeout,
    Other(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// An advertising report received while scanning.
    Advertisement {
        address: BtAddress,
        rssi: i8,
        service: Option<ServiceId>,
    },
    Connected {
        address: BtAddress,
        conn: ConnHandle,
    },
    ConnectFailed {
        address: BtAddress,
        status: i32,
    },
    Disconnected {
        conn: ConnHandle,
        reason: DisconnectReason,
    },
    DiscoveryCompleted {
        conn: ConnHandle,
        result: Result<CharacteristicList, BridgeError>,
    },
    Notification {
        conn: ConnHandle,
        handle: u16,
        data: heapless::Vec<u8, MAX_NOTIFICATION_LEN>,
    },
}

// ───────────────────────────────────────────────────────────────
// Scan results
// ───────────────────────────────────────────────────────────────

/// One advertiser seen during the last scan cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanResult {
    pub address: BtAddress,
    pub params: ConnParams,
    pub rssi: i8,
    pub service: ServiceId,
}

pub type ScanResults = heapless::Vec<ScanResult, MAX_SCANNED_DEVICES>;

/// Aggregate connectivity status shown to the user.
///
/// Variants are ordered by precedence: when several conditions hold, the
/// greatest one is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BleStatus {
    NoDevices,
    Idle,
    Connected,
    LostConnection,
    Pairing,
    Scanning,
}

impl fmt::Display for BleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoDevices => "no devices",
            Self::Idle => "idle",
            Self::Connected => "connected",
            Self::LostConnection => "lost connection",
            Self::Pairing => "pairing",
            Self::Scanning => "scanning",
        };
        f.write_str(s)
    }
}
