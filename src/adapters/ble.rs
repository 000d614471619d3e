//! BLE central adapter.
//!
//! Implements [`RadioPort`], the hexagonal boundary for scanning,
//! connecting to and talking GATT with bridged accessories.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GAP + GATT client.  Stack
//!   callbacks only translate and post [`WorkItem::Radio`] onto the work
//!   queue; they never touch bridge state.
//! - **all other targets**: logging simulation for host-side runs.
//!
//! Advertising-data parsing is pure and shared by both.

use core::fmt;

use log::{debug, info};

use crate::app::ports::{RadioError, RadioPort};
use crate::connectivity::{
    BtAddress, ConnHandle, ConnParams, DisconnectReason, SecurityLevel, ServiceId, Uuid,
};

#[cfg(target_os = "espidf")]
use crate::events::WorkQueue;

// ───────────────────────────────────────────────────────────────
// Advertising data
// ───────────────────────────────────────────────────────────────

const AD_UUID16_INCOMPLETE: u8 = 0x02;
const AD_UUID16_COMPLETE: u8 = 0x03;
const AD_UUID128_INCOMPLETE: u8 = 0x06;
const AD_UUID128_COMPLETE: u8 = 0x07;

/// First bridgeable service listed in an advertising payload
/// (advertising data followed by scan response).
///
/// Stops at the first malformed AD structure.
pub fn parse_adv_services(data: &[u8]) -> Option<ServiceId> {
    let mut rest = data;
    while let [len, tail @ ..] = rest {
        let len = *len as usize;
        if len == 0 {
            break;
        }
        let field = tail.get(..len)?;
        rest = &tail[len..];

        let payload = &field[1..];
        let found = match field[0] {
            AD_UUID16_INCOMPLETE | AD_UUID16_COMPLETE => payload
                .chunks_exact(2)
                .map(|c| Uuid::from_u16(u16::from_le_bytes([c[0], c[1]])))
                .find_map(ServiceId::from_uuid),
            AD_UUID128_INCOMPLETE | AD_UUID128_COMPLETE => payload
                .chunks_exact(16)
                .map(|c| {
                    let mut raw = [0u8; 16];
                    raw.copy_from_slice(c);
                    Uuid(u128::from_le_bytes(raw))
                })
                .find_map(ServiceId::from_uuid),
            _ => None,
        };
        if found.is_some() {
            return found;
        }
    }
    None
}

/// Map an HCI disconnect reason code.
pub fn disconnect_reason(code: u8) -> DisconnectReason {
    match code {
        0x08 => DisconnectReason::SupervisionTimeout,
        0x13 => DisconnectReason::RemoteUser,
        0x16 => DisconnectReason::LocalHost,
        other => DisconnectReason::Other(other),
    }
}

// ───────────────────────────────────────────────────────────────
// Adapter state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleStackState {
    Off,
    Ready,
    Failed,
}

impl fmt::Display for BleStackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

pub struct BleCentralAdapter {
    state: BleStackState,
    scanning: bool,
    #[cfg(not(target_os = "espidf"))]
    sim_links: heapless::Vec<ConnHandle, { crate::config::MAX_CONNECTED_DEVICES }>,
    #[cfg(not(target_os = "espidf"))]
    sim_next_conn: u16,
}

// ── ESP-IDF static state ──────────────────────────────────────
//
// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures.  These statics bridge the callback context to the adapter.

#[cfg(target_os = "espidf")]
mod stack {
    use core::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Mutex, OnceLock};

    use esp_idf_svc::sys::*;
    use log::{debug, warn};

    use super::{disconnect_reason, parse_adv_services};
    use crate::config::MAX_CONNECTED_DEVICES;
    use crate::connectivity::{
        AddressType, BtAddress, CharacteristicList, ConnHandle, DiscoveredCharacteristic, RadioEvent,
        SecurityLevel, Uuid, MAX_CHARACTERISTICS,
    };
    use crate::error::BridgeError;
    use crate::events::{self, WorkItem, WorkQueue};

    const CCC_UUID: u16 = 0x2902;

    pub(super) static QUEUE: OnceLock<&'static WorkQueue> = OnceLock::new();
    pub(super) static GATTC_IF: AtomicU32 = AtomicU32::new(0);

    /// Open links: conn id → peer address (needed by notify registration).
    pub(super) static LINKS: Mutex<heapless::Vec<(u16, [u8; 6]), MAX_CONNECTED_DEVICES>> =
        Mutex::new(heapless::Vec::new());
    /// Handle range of the service found by the last search, per link.
    static SEARCH: Mutex<heapless::Vec<(u16, u16, u16), MAX_CONNECTED_DEVICES>> =
        Mutex::new(heapless::Vec::new());
    /// Security to request once a link opens.
    pub(super) static SECURITY: Mutex<Option<([u8; 6], SecurityLevel)>> = Mutex::new(None);

    fn post(event: RadioEvent) {
        if let Some(queue) = QUEUE.get() {
            events::post(queue, WorkItem::Radio(event));
        }
    }

    pub(super) fn peer_of(conn: u16) -> Option<[u8; 6]> {
        LINKS.lock().ok()?.iter().find(|(c, _)| *c == conn).map(|(_, bda)| *bda)
    }

    pub(super) fn esp_uuid(uuid: Uuid) -> esp_bt_uuid_t {
        let mut t: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        if let Some(short) = uuid.as_u16() {
            t.len = 2;
            t.uuid.uuid16 = short;
        } else {
            t.len = 16;
            t.uuid.uuid128 = uuid.0.to_le_bytes();
        }
        t
    }

    fn from_esp_uuid(t: &esp_bt_uuid_t) -> Uuid {
        // SAFETY: `len` selects the active union member.
        unsafe {
            match t.len {
                2 => Uuid::from_u16(t.uuid.uuid16),
                16 => Uuid(u128::from_le_bytes(t.uuid.uuid128)),
                _ => Uuid(0),
            }
        }
    }

    pub(super) unsafe extern "C" fn gap_event_handler(
        event: esp_gap_ble_cb_event_t,
        param: *mut esp_ble_gap_cb_param_t,
    ) {
        match event {
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_SCAN_RESULT_EVT => {
                let r = unsafe { &(*param).scan_rst };
                if r.search_evt != esp_gap_search_evt_t_ESP_GAP_SEARCH_INQ_RES_EVT {
                    return;
                }
                let len = (r.adv_data_len as usize + r.scan_rsp_len as usize).min(r.ble_adv.len());
                let Some(kind) = AddressType::from_u8(r.ble_addr_type as u8) else {
                    return;
                };
                post(RadioEvent::Advertisement {
                    address: BtAddress::new(r.bda, kind),
                    rssi: r.rssi.clamp(i8::MIN as i32, i8::MAX as i32) as i8,
                    service: parse_adv_services(&r.ble_adv[..len]),
                });
            }
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_SEC_REQ_EVT => unsafe {
                esp_ble_gap_security_rsp((*param).ble_security.ble_req.bd_addr.as_mut_ptr(), true);
            },
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_AUTH_CMPL_EVT => {
                let p = unsafe { &(*param).ble_security.auth_cmpl };
                if p.success {
                    log::info!("BLE GAP: link encrypted");
                } else {
                    warn!("BLE GAP: authentication failed (reason={})", p.fail_reason);
                }
            }
            _ => {}
        }
    }

    pub(super) unsafe extern "C" fn gattc_event_handler(
        event: esp_gattc_cb_event_t,
        gattc_if: esp_gatt_if_t,
        param: *mut esp_ble_gattc_cb_param_t,
    ) {
        match event {
            esp_gattc_cb_event_t_ESP_GATTC_REG_EVT => {
                GATTC_IF.store(gattc_if as u32, Ordering::Relaxed);
                log::info!("BLE GATTC: app registered (if={})", gattc_if);
            }
            esp_gattc_cb_event_t_ESP_GATTC_OPEN_EVT => {
                let p = unsafe { &(*param).open };
                // Address type is not reported here; the manager matches
                // on the address bytes of its pending connect.
                let address = BtAddress::new(p.remote_bda, AddressType::Public);
                if p.status != esp_gatt_status_t_ESP_GATT_OK {
                    post(RadioEvent::ConnectFailed {
                        address,
                        status: p.status as i32,
                    });
                    return;
                }
                if let Ok(mut links) = LINKS.lock() {
                    let _ = links.push((p.conn_id, p.remote_bda));
                }
                if let Ok(mut sec) = SECURITY.lock() {
                    if let Some((bda, level)) = sec.take_if(|(bda, _)| *bda == p.remote_bda) {
                        let act = match level {
                            SecurityLevel::Encrypted => esp_ble_sec_act_t_ESP_BLE_SEC_ENCRYPT,
                            SecurityLevel::Authenticated => esp_ble_sec_act_t_ESP_BLE_SEC_ENCRYPT_MITM,
                        };
                        let mut bda = bda;
                        unsafe { esp_ble_set_encryption(bda.as_mut_ptr(), act) };
                    }
                }
                post(RadioEvent::Connected {
                    address,
                    conn: ConnHandle(p.conn_id),
                });
            }
            esp_gattc_cb_event_t_ESP_GATTC_DISCONNECT_EVT => {
                let p = unsafe { &(*param).disconnect };
                if let Ok(mut links) = LINKS.lock() {
                    links.retain(|(c, _)| *c != p.conn_id);
                }
                if let Ok(mut search) = SEARCH.lock() {
                    search.retain(|(c, _, _)| *c != p.conn_id);
                }
                post(RadioEvent::Disconnected {
                    conn: ConnHandle(p.conn_id),
                    reason: disconnect_reason(p.reason as u8),
                });
            }
            esp_gattc_cb_event_t_ESP_GATTC_SEARCH_RES_EVT => {
                let p = unsafe { &(*param).search_res };
                if let Ok(mut search) = SEARCH.lock() {
                    search.retain(|(c, _, _)| *c != p.conn_id);
                    let _ = search.push((p.conn_id, p.start_handle, p.end_handle));
                }
            }
            esp_gattc_cb_event_t_ESP_GATTC_SEARCH_CMPL_EVT => {
                let p = unsafe { &(*param).search_cmpl };
                let range = SEARCH
                    .lock()
                    .ok()
                    .and_then(|s| s.iter().find(|(c, _, _)| *c == p.conn_id).map(|&(_, a, b)| (a, b)));
                let result = match (p.status == esp_gatt_status_t_ESP_GATT_OK, range) {
                    (true, Some((start, end))) => unsafe { read_characteristics(gattc_if, p.conn_id, start, end) },
                    _ => Err(BridgeError::NotFound),
                };
                post(RadioEvent::DiscoveryCompleted {
                    conn: ConnHandle(p.conn_id),
                    result,
                });
            }
            esp_gattc_cb_event_t_ESP_GATTC_NOTIFY_EVT => {
                let p = unsafe { &(*param).notify };
                let data = unsafe { core::slice::from_raw_parts(p.value, p.value_len as usize) };
                let Ok(data) = heapless::Vec::from_slice(data) else {
                    debug!("BLE GATTC: oversized notification on {} dropped", p.handle);
                    return;
                };
                post(RadioEvent::Notification {
                    conn: ConnHandle(p.conn_id),
                    handle: p.handle,
                    data,
                });
            }
            _ => {}
        }
    }

    /// Characteristics of the discovered service with their CCC handles.
    unsafe fn read_characteristics(
        gattc_if: esp_gatt_if_t,
        conn_id: u16,
        start: u16,
        end: u16,
    ) -> Result<CharacteristicList, BridgeError> {
        let mut elems: [esp_gattc_char_elem_t; MAX_CHARACTERISTICS] = unsafe { core::mem::zeroed() };
        let mut count = MAX_CHARACTERISTICS as u16;
        let ret = unsafe { esp_ble_gattc_get_all_char(gattc_if, conn_id, start, end, elems.as_mut_ptr(), &mut count, 0) };
        if ret != esp_gatt_status_t_ESP_GATT_OK {
            return Err(BridgeError::Internal);
        }

        let mut list = CharacteristicList::new();
        for elem in &elems[..(count as usize).min(MAX_CHARACTERISTICS)] {
            let notifiable = elem.properties as u32 & ESP_GATT_CHAR_PROP_BIT_NOTIFY != 0;
            let ccc_handle = if notifiable {
                let mut descr: esp_gattc_descr_elem_t = unsafe { core::mem::zeroed() };
                let mut n: u16 = 1;
                let ret = unsafe {
                    esp_ble_gattc_get_descr_by_char_handle(
                        gattc_if,
                        conn_id,
                        elem.char_handle,
                        esp_uuid(Uuid::from_u16(CCC_UUID)),
                        &mut descr,
                        &mut n,
                    )
                };
                (ret == esp_gatt_status_t_ESP_GATT_OK && n > 0).then_some(descr.handle)
            } else {
                None
            };
            let _ = list.push(DiscoveredCharacteristic {
                uuid: from_esp_uuid(&elem.uuid),
                value_handle: elem.char_handle,
                ccc_handle,
            });
        }
        Ok(list)
    }
}

impl BleCentralAdapter {
    pub fn new() -> Self {
        Self {
            state: BleStackState::Off,
            scanning: false,
            #[cfg(not(target_os = "espidf"))]
            sim_links: heapless::Vec::new(),
            #[cfg(not(target_os = "espidf"))]
            sim_next_conn: 1,
        }
    }

    pub fn state(&self) -> BleStackState {
        self.state
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    fn ensure_ready(&self) -> Result<(), RadioError> {
        match self.state {
            BleStackState::Ready => Ok(()),
            _ => Err(RadioError::NotConnected),
        }
    }

    // ── Platform-specific ─────────────────────────────────────

    /// Bring up the controller and Bluedroid, and route stack callbacks to
    /// `queue`.
    #[cfg(target_os = "espidf")]
    pub fn start(&mut self, queue: &'static WorkQueue) {
        use esp_idf_svc::sys::*;
        let _ = stack::QUEUE.set(queue);
        unsafe {
            // Release classic BT memory (BLE-only mode saves ~30 KB).
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            let steps: [(&str, i32); 4] = [
                ("bt_controller_init", esp_bt_controller_init(&mut bt_cfg)),
                ("bt_controller_enable", esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE)),
                ("bluedroid_init", esp_bluedroid_init()),
                ("bluedroid_enable", esp_bluedroid_enable()),
            ];
            for (name, ret) in steps {
                if ret != ESP_OK as i32 {
                    log::error!("BLE: {} failed ({})", name, ret);
                    self.state = BleStackState::Failed;
                    return;
                }
            }

            esp_ble_gap_register_callback(Some(stack::gap_event_handler));
            esp_ble_gattc_register_callback(Some(stack::gattc_event_handler));
            esp_ble_gattc_app_register(0);

            // Just-works pairing with bonding; MITM is requested per link.
            let auth_req = esp_ble_auth_req_t_ESP_LE_AUTH_REQ_SC_BOND;
            let iocap = esp_ble_io_cap_t_ESP_IO_CAP_NONE;
            esp_ble_gap_set_security_param(
                esp_ble_sm_param_t_ESP_BLE_SM_AUTHEN_REQ_MODE,
                &auth_req as *const _ as *mut _,
                core::mem::size_of_val(&auth_req) as u32,
            );
            esp_ble_gap_set_security_param(
                esp_ble_sm_param_t_ESP_BLE_SM_IOCAP_MODE,
                &iocap as *const _ as *mut _,
                core::mem::size_of_val(&iocap) as u32,
            );
        }
        self.state = BleStackState::Ready;
        info!("BLE(espidf): Bluedroid central ready");
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn start(&mut self) {
        self.state = BleStackState::Ready;
        info!("BLE(sim): central ready");
    }

    #[cfg(target_os = "espidf")]
    fn gattc_if() -> esp_idf_svc::sys::esp_gatt_if_t {
        stack::GATTC_IF.load(core::sync::atomic::Ordering::Relaxed) as esp_idf_svc::sys::esp_gatt_if_t
    }

    #[cfg(target_os = "espidf")]
    fn check(ret: i32) -> Result<(), RadioError> {
        if ret == esp_idf_svc::sys::ESP_OK as i32 {
            Ok(())
        } else {
            Err(RadioError::Stack(ret))
        }
    }
}

impl Default for BleCentralAdapter {
    fn default() -> Self {
        Self::new()
    }
}

// ───────────────────────────────────────────────────────────────
// RadioPort implementation
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
impl RadioPort for BleCentralAdapter {
    fn start_scan(&mut self) -> Result<(), RadioError> {
        use esp_idf_svc::sys::*;
        self.ensure_ready()?;
        if self.scanning {
            return Err(RadioError::Busy);
        }
        let mut params = esp_ble_scan_params_t {
            scan_type: esp_ble_scan_type_t_BLE_SCAN_TYPE_ACTIVE,
            own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
            scan_filter_policy: esp_ble_scan_filter_t_BLE_SCAN_FILTER_ALLOW_ALL,
            scan_interval: 0x50,
            scan_window: 0x30,
            scan_duplicate: esp_ble_scan_duplicate_t_BLE_SCAN_DUPLICATE_DISABLE,
        };
        Self::check(unsafe { esp_ble_gap_set_scan_params(&mut params) })?;
        // Duration 0: scan until stopped; the scan window timer stops it.
        Self::check(unsafe { esp_ble_gap_start_scanning(0) })?;
        self.scanning = true;
        debug!("BLE: active scan started");
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), RadioError> {
        if !self.scanning {
            return Ok(());
        }
        Self::check(unsafe { esp_idf_svc::sys::esp_ble_gap_stop_scanning() })?;
        self.scanning = false;
        debug!("BLE: scan stopped");
        Ok(())
    }

    fn connect(
        &mut self,
        address: BtAddress,
        params: &ConnParams,
        security: Option<SecurityLevel>,
    ) -> Result<(), RadioError> {
        use esp_idf_svc::sys::*;
        self.ensure_ready()?;
        let mut bda = address.bytes;
        unsafe {
            esp_ble_gap_set_prefer_conn_params(
                bda.as_mut_ptr(),
                params.interval_min,
                params.interval_max,
                params.latency,
                params.timeout,
            );
        }
        if let Ok(mut sec) = stack::SECURITY.lock() {
            *sec = security.map(|level| (address.bytes, level));
        }
        let ret = unsafe { esp_ble_gattc_open(Self::gattc_if(), bda.as_mut_ptr(), address.kind as esp_ble_addr_type_t, true) };
        Self::check(ret)?;
        info!("BLE: opening link to {}", address);
        Ok(())
    }

    fn disconnect(&mut self, conn: ConnHandle) -> Result<(), RadioError> {
        if stack::peer_of(conn.0).is_none() {
            return Err(RadioError::NotConnected);
        }
        Self::check(unsafe { esp_idf_svc::sys::esp_ble_gattc_close(Self::gattc_if(), conn.0) })
    }

    fn discover(&mut self, conn: ConnHandle, service: ServiceId) -> Result<(), RadioError> {
        let mut uuid = stack::esp_uuid(service.uuid());
        Self::check(unsafe { esp_idf_svc::sys::esp_ble_gattc_search_service(Self::gattc_if(), conn.0, &mut uuid) })
    }

    fn write(&mut self, conn: ConnHandle, handle: u16, data: &[u8]) -> Result<(), RadioError> {
        use esp_idf_svc::sys::*;
        let ret = unsafe {
            esp_ble_gattc_write_char(
                Self::gattc_if(),
                conn.0,
                handle,
                data.len() as u16,
                data.as_ptr() as *mut u8,
                esp_gatt_write_type_t_ESP_GATT_WRITE_TYPE_RSP,
                esp_gatt_auth_req_t_ESP_GATT_AUTH_REQ_NONE,
            )
        };
        Self::check(ret)
    }

    fn subscribe(&mut self, conn: ConnHandle, ccc_handle: u16) -> Result<(), RadioError> {
        use esp_idf_svc::sys::*;
        let mut bda = stack::peer_of(conn.0).ok_or(RadioError::NotConnected)?;
        // The value handle directly precedes its CCC in both bridged services.
        let value_handle = ccc_handle.wrapping_sub(1);
        Self::check(unsafe { esp_ble_gattc_register_for_notify(Self::gattc_if(), bda.as_mut_ptr(), value_handle) })?;
        let mut enable = [0x01u8, 0x00];
        let ret = unsafe {
            esp_ble_gattc_write_char_descr(
                Self::gattc_if(),
                conn.0,
                ccc_handle,
                enable.len() as u16,
                enable.as_mut_ptr(),
                esp_gatt_write_type_t_ESP_GATT_WRITE_TYPE_RSP,
                esp_gatt_auth_req_t_ESP_GATT_AUTH_REQ_NONE,
            )
        };
        Self::check(ret)
    }
}

#[cfg(not(target_os = "espidf"))]
impl RadioPort for BleCentralAdapter {
    fn start_scan(&mut self) -> Result<(), RadioError> {
        self.ensure_ready()?;
        if self.scanning {
            return Err(RadioError::Busy);
        }
        self.scanning = true;
        info!("BLE(sim): scanning");
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), RadioError> {
        self.scanning = false;
        debug!("BLE(sim): scan stopped");
        Ok(())
    }

    fn connect(
        &mut self,
        address: BtAddress,
        _params: &ConnParams,
        security: Option<SecurityLevel>,
    ) -> Result<(), RadioError> {
        self.ensure_ready()?;
        let conn = ConnHandle(self.sim_next_conn);
        self.sim_links.push(conn).map_err(|_| RadioError::NoResources)?;
        self.sim_next_conn = self.sim_next_conn.wrapping_add(1);
        info!("BLE(sim): connect {} (conn {}, security {:?})", address, conn.0, security);
        Ok(())
    }

    fn disconnect(&mut self, conn: ConnHandle) -> Result<(), RadioError> {
        let i = self
            .sim_links
            .iter()
            .position(|c| *c == conn)
            .ok_or(RadioError::NotConnected)?;
        self.sim_links.swap_remove(i);
        info!("BLE(sim): disconnect conn {}", conn.0);
        Ok(())
    }

    fn discover(&mut self, conn: ConnHandle, service: ServiceId) -> Result<(), RadioError> {
        debug!("BLE(sim): discover {:?} on conn {}", service, conn.0);
        Ok(())
    }

    fn write(&mut self, conn: ConnHandle, handle: u16, data: &[u8]) -> Result<(), RadioError> {
        info!("BLE(sim): write conn {} handle {} = {:02x?}", conn.0, handle, data);
        Ok(())
    }

    fn subscribe(&mut self, conn: ConnHandle, ccc_handle: u16) -> Result<(), RadioError> {
        debug!("BLE(sim): subscribe conn {} ccc {}", conn.0, ccc_handle);
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
