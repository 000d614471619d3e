//! BLE connectivity & recovery manager.
//!
//! Owns the radio connection lifecycle of every BLE-backed provider:
//!
//! ```text
//!  Idle ──connect──▶ Connecting ──link up──▶ Discovering ──done──▶ Connected
//!                                                                   │
//!            ┌────────────── unexpected disconnect ◀────────────────┘
//!            ▼
//!          Lost ──head seen in recovery scan──▶ Reconnecting ──▶ Discovering
//! ```
//!
//! The manager never calls into the registry.  Every entry point takes the
//! radio and timer ports by reference and returns an optional [`Notice`]
//! that the [`Bridge`](crate::app::service::Bridge) routes to providers,
//! the registry and the event sink.  Entries are keyed by device address,
//! so a provider can be tracked here before the registry has accepted it.

pub mod recovery;
pub mod types;

pub use recovery::RecoveryQueue;
pub use types::*;

use log::{debug, info, warn};

use crate::app::ports::{RadioPort, TimerPort};
use crate::config::{BridgeConfig, MAX_CONNECTED_DEVICES};
use crate::error::{BridgeError, Result};
use crate::events::TimerId;

// ───────────────────────────────────────────────────────────────
// Per-provider link state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Discovering,
    Connected,
    /// Link down, awaiting recovery.
    Lost,
    Reconnecting,
}

#[derive(Debug)]
struct LinkEntry {
    address: BtAddress,
    service: ServiceId,
    state: LinkState,
    conn: Option<ConnHandle>,
    /// The current attempt is the pairing connection, not a recovery.
    first_connection: bool,
    /// Removed by the owner; released once the stack confirms the link is gone.
    teardown: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanPurpose {
    Discovery,
    Recovery,
}

/// Outcome of a radio or timer event that the bridge has to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A discovery scan window closed; results are in
    /// [`BleConnectivityManager::scan_results`].
    ScanCompleted,
    /// Service discovery finished on a fresh or recovered link.
    LinkReady {
        address: BtAddress,
        characteristics: CharacteristicList,
        first_connection: bool,
    },
    /// The pairing connection could not be established.
    FirstConnectionFailed { address: BtAddress, error: BridgeError },
    /// A connected device dropped unexpectedly and is queued for recovery.
    ConnectionLost { address: BtAddress },
    /// A reconnect attempt failed.  The device has already left the
    /// recovery queue; the owner decides whether to queue it again.
    RecoveryFailed { address: BtAddress, error: BridgeError },
    Notification {
        address: BtAddress,
        handle: u16,
        data: heapless::Vec<u8, MAX_NOTIFICATION_LEN>,
    },
}

// ───────────────────────────────────────────────────────────────
// Manager
// ───────────────────────────────────────────────────────────────

pub struct BleConnectivityManager {
    entries: heapless::Vec<LinkEntry, MAX_CONNECTED_DEVICES>,
    scan: Option<ScanPurpose>,
    results: ScanResults,
    recovery_results: ScanResults,
    recovery: RecoveryQueue,
    recovery_armed: bool,
    reconnect_in_flight: Option<BtAddress>,
    scan_timeout_ms: u32,
    recovery_scan_timeout_ms: u32,
}

impl BleConnectivityManager {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            entries: heapless::Vec::new(),
            scan: None,
            results: heapless::Vec::new(),
            recovery_results: heapless::Vec::new(),
            recovery: RecoveryQueue::new(
                config.recovery_interval_initial_ms,
                config.recovery_interval_max_ms,
            ),
            recovery_armed: false,
            reconnect_in_flight: None,
            scan_timeout_ms: config.scan_timeout_ms,
            recovery_scan_timeout_ms: config.recovery_scan_timeout_ms,
        }
    }

    // ── Scanning ──────────────────────────────────────────────

    /// Start a discovery scan with the configured window.
    pub fn scan(&mut self, radio: &mut impl RadioPort, timers: &mut impl TimerPort) -> Result<()> {
        self.scan_with_timeout(self.scan_timeout_ms, radio, timers)
    }

    /// Start a discovery scan; [`Notice::ScanCompleted`] follows when the
    /// `ScanWindow` timer fires.
    pub fn scan_with_timeout(
        &mut self,
        timeout_ms: u32,
        radio: &mut impl RadioPort,
        timers: &mut impl TimerPort,
    ) -> Result<()> {
        if self.scan.is_some() {
            return Err(BridgeError::AlreadyInProgress);
        }
        self.results.clear();
        radio.start_scan()?;
        timers.start(TimerId::ScanWindow, timeout_ms);
        self.scan = Some(ScanPurpose::Discovery);
        info!("BLE: scanning for {} ms", timeout_ms);
        Ok(())
    }

    /// Abort the running scan without delivering results.
    pub fn stop_scan(&mut self, radio: &mut impl RadioPort, timers: &mut impl TimerPort) {
        if self.end_scan(radio, timers) == Some(ScanPurpose::Recovery) {
            self.arm_recovery(timers);
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scan == Some(ScanPurpose::Discovery)
    }

    /// Deduplicated results of the last discovery scan.
    pub fn scan_results(&self) -> &[ScanResult] {
        &self.results
    }

    fn end_scan(
        &mut self,
        radio: &mut impl RadioPort,
        timers: &mut impl TimerPort,
    ) -> Option<ScanPurpose> {
        let purpose = self.scan.take()?;
        timers.cancel(TimerId::ScanWindow);
        if let Err(e) = radio.stop_scan() {
            warn!("BLE: stop scan failed: {}", e);
        }
        Some(purpose)
    }

    // ── Provider table ────────────────────────────────────────

    /// Start tracking the device at `address`.
    pub fn add_provider(&mut self, address: BtAddress, service: ServiceId) -> Result<()> {
        if self.live_position(&address).is_some() {
            return Err(BridgeError::Conflict);
        }
        self.entries
            .push(LinkEntry {
                address,
                service,
                state: LinkState::Idle,
                conn: None,
                first_connection: false,
                teardown: false,
            })
            .map_err(|_| BridgeError::ResourceExhausted)?;
        debug!("BLE: tracking {} ({:?})", address, service);
        Ok(())
    }

    /// Stop tracking `address` and close its link.
    ///
    /// If the disconnect primitive fails, the entry is released at once.
    /// Otherwise it lingers, invisible, until the stack reports the link
    /// closed (or the in-flight connect resolves).
    pub fn remove_provider(
        &mut self,
        address: BtAddress,
        radio: &mut impl RadioPort,
        timers: &mut impl TimerPort,
    ) -> Result<()> {
        let i = self.live_position(&address).ok_or(BridgeError::NotFound)?;
        self.recovery.remove(&address);
        if self.reconnect_in_flight == Some(address) {
            self.reconnect_in_flight = None;
        }
        if self.recovery.is_empty() && self.recovery_armed {
            timers.cancel(TimerId::Recovery);
            self.recovery_armed = false;
        }

        let release_now = match (self.entries[i].conn, self.entries[i].state) {
            (Some(conn), _) => match radio.disconnect(conn) {
                Ok(()) => false,
                Err(e) => {
                    warn!("BLE: disconnect of {} failed ({}), releasing", address, e);
                    true
                }
            },
            // An in-flight connect cannot be cancelled; wait for its outcome.
            (None, LinkState::Connecting | LinkState::Reconnecting) => false,
            _ => true,
        };
        if release_now {
            self.entries.remove(i);
        } else {
            self.entries[i].teardown = true;
        }
        info!("BLE: stopped tracking {}", address);
        self.arm_recovery(timers);
        Ok(())
    }

    pub fn is_tracked(&self, address: &BtAddress) -> bool {
        self.live_position(address).is_some()
    }

    pub fn link_state(&self, address: &BtAddress) -> Option<LinkState> {
        self.live_position(address).map(|i| self.entries[i].state)
    }

    /// Open link to `address`, if fully connected.
    pub fn connection_of(&self, address: &BtAddress) -> Option<ConnHandle> {
        let e = &self.entries[self.live_position(address)?];
        if e.state == LinkState::Connected { e.conn } else { None }
    }

    // ── Connecting ────────────────────────────────────────────

    /// First connection to a tracked device seen in the last discovery scan.
    ///
    /// Stops any active scan.  The outcome arrives as
    /// [`Notice::LinkReady`] or [`Notice::FirstConnectionFailed`].
    pub fn connect(
        &mut self,
        address: BtAddress,
        security: Option<SecurityLevel>,
        radio: &mut impl RadioPort,
        timers: &mut impl TimerPort,
    ) -> Result<()> {
        let i = self.live_position(&address).ok_or(BridgeError::NotFound)?;
        if self.connect_in_flight() {
            return Err(BridgeError::AlreadyInProgress);
        }
        self.stop_scan(radio, timers);

        let params = self
            .results
            .iter()
            .find(|r| r.address == address)
            .map(|r| r.params)
            .ok_or(BridgeError::Internal)?;

        radio.connect(address, &params, security)?;
        let entry = &mut self.entries[i];
        entry.state = LinkState::Connecting;
        entry.first_connection = true;
        info!("BLE: connecting to {}", address);
        Ok(())
    }

    /// Queue a tracked device for reconnection (restored at boot, or lost).
    pub fn queue_recovery(&mut self, address: BtAddress, timers: &mut impl TimerPort) -> Result<()> {
        let i = self.live_position(&address).ok_or(BridgeError::NotFound)?;
        if !self.recovery.enqueue(address) {
            return Err(BridgeError::ResourceExhausted);
        }
        self.entries[i].state = LinkState::Lost;
        self.arm_recovery(timers);
        Ok(())
    }

    pub fn recovery_pending(&self) -> usize {
        self.recovery.len()
    }

    pub fn recovery_interval_ms(&self) -> u32 {
        self.recovery.interval_ms()
    }

    // ── Event handling ────────────────────────────────────────

    pub fn on_radio_event(
        &mut self,
        event: RadioEvent,
        radio: &mut impl RadioPort,
        timers: &mut impl TimerPort,
    ) -> Option<Notice> {
        match event {
            RadioEvent::Advertisement { address, rssi, service } => {
                self.record_advertisement(address, rssi, service);
                None
            }
            RadioEvent::Connected { address, conn } => self.on_connected(address, conn, radio, timers),
            RadioEvent::ConnectFailed { address, status } => {
                let i = self.pending_connect_position(&address)?;
                warn!("BLE: connect to {} failed (status {})", address, status);
                self.link_failed(i, BridgeError::Internal, radio, timers)
            }
            RadioEvent::Disconnected { conn, reason } => self.on_disconnected(conn, reason, radio, timers),
            RadioEvent::DiscoveryCompleted { conn, result } => {
                self.on_discovery_completed(conn, result, radio, timers)
            }
            RadioEvent::Notification { conn, handle, data } => {
                let e = &self.entries[self.conn_position(conn)?];
                (e.state == LinkState::Connected && !e.teardown).then(|| Notice::Notification {
                    address: e.address,
                    handle,
                    data,
                })
            }
        }
    }

    pub fn on_timer(
        &mut self,
        id: TimerId,
        radio: &mut impl RadioPort,
        timers: &mut impl TimerPort,
    ) -> Option<Notice> {
        match id {
            TimerId::ScanWindow => match self.end_scan(radio, timers)? {
                ScanPurpose::Discovery => {
                    info!("BLE: scan finished, {} device(s) found", self.results.len());
                    Some(Notice::ScanCompleted)
                }
                ScanPurpose::Recovery => self.try_recover_head(radio, timers),
            },
            TimerId::Recovery => {
                self.recovery_armed = false;
                self.start_recovery_scan(radio, timers);
                None
            }
        }
    }

    fn record_advertisement(&mut self, address: BtAddress, rssi: i8, service: Option<ServiceId>) {
        let (Some(purpose), Some(service)) = (self.scan, service) else {
            return;
        };
        let list = match purpose {
            ScanPurpose::Discovery => &mut self.results,
            ScanPurpose::Recovery => &mut self.recovery_results,
        };
        if let Some(known) = list.iter_mut().find(|r| r.address == address) {
            known.rssi = rssi;
            return;
        }
        let result = ScanResult {
            address,
            params: ConnParams::default(),
            rssi,
            service,
        };
        if list.push(result).is_err() {
            debug!("BLE: scan list full, ignoring {}", address);
        }
    }

    fn on_connected(
        &mut self,
        address: BtAddress,
        conn: ConnHandle,
        radio: &mut impl RadioPort,
        timers: &mut impl TimerPort,
    ) -> Option<Notice> {
        let Some(i) = self.pending_connect_position(&address) else {
            warn!("BLE: unexpected link to {}, closing", address);
            let _ = radio.disconnect(conn);
            return None;
        };
        self.entries[i].conn = Some(conn);
        if self.entries[i].teardown {
            if radio.disconnect(conn).is_err() {
                self.entries.remove(i);
            }
            return None;
        }
        self.entries[i].state = LinkState::Discovering;
        let service = self.entries[i].service;
        debug!("BLE: link to {} up (conn {}), discovering", address, conn.0);
        match radio.discover(conn, service) {
            Ok(()) => None,
            Err(e) => self.link_failed(i, e.into(), radio, timers),
        }
    }

    fn on_disconnected(
        &mut self,
        conn: ConnHandle,
        reason: DisconnectReason,
        radio: &mut impl RadioPort,
        timers: &mut impl TimerPort,
    ) -> Option<Notice> {
        let i = self.conn_position(conn)?;
        self.entries[i].conn = None;
        if self.entries[i].teardown {
            self.entries.remove(i);
            return None;
        }
        let address = self.entries[i].address;
        match self.entries[i].state {
            LinkState::Connected => {
                warn!("BLE: lost {} ({:?})", address, reason);
                self.entries[i].state = LinkState::Lost;
                if !self.recovery.enqueue(address) {
                    warn!("BLE: recovery queue full, {} will not be retried", address);
                }
                self.arm_recovery(timers);
                Some(Notice::ConnectionLost { address })
            }
            LinkState::Connecting | LinkState::Discovering | LinkState::Reconnecting => {
                self.link_failed(i, BridgeError::Internal, radio, timers)
            }
            LinkState::Idle | LinkState::Lost => None,
        }
    }

    fn on_discovery_completed(
        &mut self,
        conn: ConnHandle,
        result: Result<CharacteristicList>,
        radio: &mut impl RadioPort,
        timers: &mut impl TimerPort,
    ) -> Option<Notice> {
        let i = self.conn_position(conn)?;
        if self.entries[i].state != LinkState::Discovering || self.entries[i].teardown {
            return None;
        }
        match result {
            Ok(characteristics) => {
                let entry = &mut self.entries[i];
                entry.state = LinkState::Connected;
                let first_connection = entry.first_connection;
                entry.first_connection = false;
                let address = entry.address;
                if !first_connection {
                    info!("BLE: {} recovered", address);
                    self.reconnect_in_flight = None;
                    self.recovery.reset_interval();
                    self.arm_recovery(timers);
                } else {
                    info!("BLE: {} connected", address);
                }
                Some(Notice::LinkReady {
                    address,
                    characteristics,
                    first_connection,
                })
            }
            Err(e) => {
                if let Some(c) = self.entries[i].conn.take() {
                    let _ = radio.disconnect(c);
                }
                self.link_failed(i, e, radio, timers)
            }
        }
    }

    /// A connect, discovery or link attempt failed for entry `i`.
    fn link_failed(
        &mut self,
        i: usize,
        error: BridgeError,
        radio: &mut impl RadioPort,
        timers: &mut impl TimerPort,
    ) -> Option<Notice> {
        if let Some(c) = self.entries[i].conn.take() {
            let _ = radio.disconnect(c);
        }
        if self.entries[i].teardown {
            self.entries.remove(i);
            return None;
        }
        let entry = &mut self.entries[i];
        let address = entry.address;
        if entry.first_connection {
            entry.first_connection = false;
            entry.state = LinkState::Idle;
            warn!("BLE: pairing with {} failed: {}", address, error);
            return Some(Notice::FirstConnectionFailed { address, error });
        }

        debug!("BLE: recovery of {} failed: {}", address, error);
        entry.state = LinkState::Lost;
        self.reconnect_in_flight = None;
        self.recovery.back_off();
        self.arm_recovery(timers);
        Some(Notice::RecoveryFailed { address, error })
    }

    // ── Recovery ──────────────────────────────────────────────

    fn arm_recovery(&mut self, timers: &mut impl TimerPort) {
        if self.recovery_armed || self.recovery.is_empty() || self.reconnect_in_flight.is_some() {
            return;
        }
        timers.start(TimerId::Recovery, self.recovery.interval_ms());
        self.recovery_armed = true;
        debug!("BLE: recovery in {} ms", self.recovery.interval_ms());
    }

    fn start_recovery_scan(&mut self, radio: &mut impl RadioPort, timers: &mut impl TimerPort) {
        if self.recovery.is_empty() || self.reconnect_in_flight.is_some() {
            return;
        }
        if self.scan.is_some() || self.connect_in_flight() {
            // Busy with a user operation; try again next interval.
            self.arm_recovery(timers);
            return;
        }
        self.recovery_results.clear();
        if let Err(e) = radio.start_scan() {
            warn!("BLE: recovery scan failed to start: {}", e);
            self.recovery.back_off();
            self.arm_recovery(timers);
            return;
        }
        timers.start(TimerId::ScanWindow, self.recovery_scan_timeout_ms);
        self.scan = Some(ScanPurpose::Recovery);
        debug!("BLE: recovery scan, {} device(s) pending", self.recovery.len());
    }

    /// Reconnect the head of the queue if the recovery scan saw it.  A
    /// matching result dequeues the device whatever the connect outcome.
    fn try_recover_head(&mut self, radio: &mut impl RadioPort, timers: &mut impl TimerPort) -> Option<Notice> {
        let head = self.recovery.head().copied()?;
        let Some(seen) = self.recovery_results.iter().find(|r| r.address == head).copied() else {
            debug!("BLE: {} not advertising yet", head);
            self.recovery.back_off();
            self.arm_recovery(timers);
            return None;
        };
        self.recovery.pop_head();
        let Some(i) = self.live_position(&head) else {
            self.arm_recovery(timers);
            return None;
        };
        match radio.connect(head, &seen.params, None) {
            Ok(()) => {
                self.entries[i].state = LinkState::Reconnecting;
                self.entries[i].first_connection = false;
                self.reconnect_in_flight = Some(head);
                info!("BLE: reconnecting to {}", head);
                None
            }
            Err(e) => {
                warn!("BLE: reconnect to {} failed: {}", head, e);
                self.recovery.back_off();
                self.arm_recovery(timers);
                Some(Notice::RecoveryFailed {
                    address: head,
                    error: e.into(),
                })
            }
        }
    }

    // ── Status ────────────────────────────────────────────────

    /// Aggregate status, recomputed on every call.
    pub fn status(&self) -> BleStatus {
        let mut status = BleStatus::NoDevices;
        for e in self.entries.iter().filter(|e| !e.teardown) {
            let s = match e.state {
                LinkState::Idle => BleStatus::Idle,
                LinkState::Connected => BleStatus::Connected,
                LinkState::Connecting | LinkState::Discovering if e.first_connection => {
                    BleStatus::Pairing
                }
                LinkState::Connecting
                | LinkState::Discovering
                | LinkState::Lost
                | LinkState::Reconnecting => BleStatus::LostConnection,
            };
            status = status.max(s);
        }
        if self.is_scanning() {
            status = BleStatus::Scanning;
        }
        status
    }

    // ── Lookup helpers ────────────────────────────────────────

    fn live_position(&self, address: &BtAddress) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| !e.teardown && e.address == *address)
    }

    fn pending_connect_position(&self, address: &BtAddress) -> Option<usize> {
        self.entries.iter().position(|e| {
            e.address == *address
                && e.conn.is_none()
                && matches!(e.state, LinkState::Connecting | LinkState::Reconnecting)
        })
    }

    fn conn_position(&self, conn: ConnHandle) -> Option<usize> {
        self.entries.iter().position(|e| e.conn == Some(conn))
    }

    fn connect_in_flight(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e.state, LinkState::Connecting | LinkState::Reconnecting) && e.conn.is_none())
    }
}
