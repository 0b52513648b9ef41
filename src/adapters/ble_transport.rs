//! BLE transport: command envelopes and raw chunks over GATT write,
//! responses over GATT notify.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GATT server. The C callbacks
//!   push deliveries into a static queue that the transport drains from the
//!   session loop.
//! - **all other targets**: deliveries are injected with [`BleTransport::on_write`]
//!   and friends, and notifications are captured for inspection.
//!
//! ## GATT Service Layout
//!
//! | Characteristic | UUID                                   | Perms        |
//! |----------------|----------------------------------------|--------------|
//! | Command (RX)   | `6e400002-b5a3-f393-e0a9-e50e24dcca9e` | Write        |
//! | Response (TX)  | `6e400003-b5a3-f393-e0a9-e50e24dcca9e` | Notify       |
//! | Code chunks    | `6e400004-b5a3-f393-e0a9-e50e24dcca9e` | Write+Notify |
//!
//! Responses longer than one ATT payload (`mtu - 3`) are sent as
//! consecutive notifications; the peer concatenates until the JSON closes.

use std::collections::VecDeque;

use log::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::rpc::frame::{BleChannel, Frame, ble_frame};
use crate::rpc::transport::{LinkEvent, Transport, TransportKind};

// ── Constants ────────────────────────────────────────────────

pub const SERVICE_UUID: u128 = 0x6e400001_b5a3_f393_e0a9_e50e24dcca9e;
pub const CHAR_RX: u128 = 0x6e400002_b5a3_f393_e0a9_e50e24dcca9e;
pub const CHAR_TX: u128 = 0x6e400003_b5a3_f393_e0a9_e50e24dcca9e;
pub const CHAR_CODE: u128 = 0x6e400004_b5a3_f393_e0a9_e50e24dcca9e;

const DEFAULT_MTU: usize = 23;
const ATT_HEADER: usize = 3;
/// Undelivered writes held before new ones are dropped.
const INBOX_CAP: usize = 32;

// ── Error type ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleTransportError {
    NotConnected,
    StackInitFailed(i32),
    AdvertiseFailed(i32),
    NotifyFailed(i32),
}

impl core::fmt::Display for BleTransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "BLE: no central connected"),
            Self::StackInitFailed(rc) => write!(f, "BLE: stack init failed ({})", rc),
            Self::AdvertiseFailed(rc) => write!(f, "BLE: advertising failed ({})", rc),
            Self::NotifyFailed(rc) => write!(f, "BLE: notify failed ({})", rc),
        }
    }
}

// ── Deliveries ───────────────────────────────────────────────

/// One event from the GATT server, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleDelivery {
    Link(LinkEvent),
    Write(BleChannel, Vec<u8>),
    Mtu(usize),
}

// ── ESP-IDF Bluedroid bridge ─────────────────────────────────
//
// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures. Handles live in atomics; deliveries in a mutex-guarded queue
// (GATTS callbacks run in the Bluedroid task, not an ISR).

#[cfg(target_os = "espidf")]
mod bridge {
    use core::sync::atomic::{AtomicU32, Ordering};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::{BleDelivery, CHAR_CODE, CHAR_RX, CHAR_TX, INBOX_CAP, SERVICE_UUID};
    use crate::events::{Event, push_event};
    use crate::rpc::frame::BleChannel;
    use crate::rpc::transport::LinkEvent;

    pub static GATTS_IF: AtomicU32 = AtomicU32::new(0);
    pub static CONN_ID: AtomicU32 = AtomicU32::new(u32::MAX);
    pub static SVC_HANDLE: AtomicU32 = AtomicU32::new(0);
    pub static RX_HANDLE: AtomicU32 = AtomicU32::new(0);
    pub static TX_HANDLE: AtomicU32 = AtomicU32::new(0);
    pub static CODE_HANDLE: AtomicU32 = AtomicU32::new(0);
    static STEP: AtomicU32 = AtomicU32::new(0);

    pub static DELIVERIES: Mutex<VecDeque<BleDelivery>> = Mutex::new(VecDeque::new());

    /// Client Characteristic Configuration descriptor.
    const CCCD_UUID: u16 = 0x2902;

    fn deliver(d: BleDelivery) {
        if let Ok(mut q) = DELIVERIES.lock() {
            if q.len() >= INBOX_CAP {
                log::warn!("BLE: inbox full, write dropped");
                return;
            }
            q.push_back(d);
        }
    }

    fn uuid128(uuid: u128) -> esp_idf_svc::sys::esp_bt_uuid_t {
        // SAFETY: plain C struct, all-zero is a valid bit pattern.
        let mut t: esp_idf_svc::sys::esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        t.len = 16;
        t.uuid.uuid128 = uuid.to_le_bytes();
        t
    }

    unsafe fn add_char(svc: u16, uuid: u128, perm: u32, prop: u32) {
        use esp_idf_svc::sys::*;
        let mut char_uuid = uuid128(uuid);
        // SAFETY: Bluedroid copies the UUID before returning.
        unsafe {
            esp_ble_gatts_add_char(
                svc,
                &mut char_uuid,
                perm as esp_gatt_perm_t,
                prop as esp_gatt_char_prop_t,
                core::ptr::null_mut(),
                core::ptr::null_mut(),
            );
        }
    }

    unsafe fn add_cccd(svc: u16) {
        use esp_idf_svc::sys::*;
        // SAFETY: plain C struct.
        let mut uuid: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        uuid.len = 2;
        uuid.uuid.uuid16 = CCCD_UUID;
        unsafe {
            esp_ble_gatts_add_char_descr(
                svc,
                &mut uuid,
                (ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE) as esp_gatt_perm_t,
                core::ptr::null_mut(),
                core::ptr::null_mut(),
            );
        }
    }

    pub fn adv_params() -> esp_idf_svc::sys::esp_ble_adv_params_t {
        use esp_idf_svc::sys::*;
        esp_ble_adv_params_t {
            adv_int_min: 0x20,
            adv_int_max: 0x40,
            adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
            own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
            channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
            adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
            // SAFETY: remaining fields are plain integers / arrays.
            ..unsafe { core::mem::zeroed() }
        }
    }

    pub unsafe extern "C" fn gap_event_handler(
        event: esp_idf_svc::sys::esp_gap_ble_cb_event_t,
        _param: *mut esp_idf_svc::sys::esp_ble_gap_cb_param_t,
    ) {
        use esp_idf_svc::sys::*;
        match event {
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
                log::info!("BLE GAP: advertising started");
            }
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
                log::info!("BLE GAP: advertising stopped");
            }
            _ => {}
        }
    }

    pub unsafe extern "C" fn gatts_event_handler(
        event: esp_idf_svc::sys::esp_gatts_cb_event_t,
        gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
        param: *mut esp_idf_svc::sys::esp_ble_gatts_cb_param_t,
    ) {
        use esp_idf_svc::sys::*;

        GATTS_IF.store(gatts_if as u32, Ordering::Relaxed);

        // SAFETY: Bluedroid passes a valid param union for the event kind.
        unsafe {
            match event {
                esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
                    let mut svc_id = esp_gatt_srvc_id_t {
                        id: esp_gatt_id_t {
                            uuid: uuid128(SERVICE_UUID),
                            inst_id: 0,
                        },
                        is_primary: true,
                    };
                    // 1 service + 3 chars (2 handles each) + 2 CCCDs
                    esp_ble_gatts_create_service(gatts_if, &mut svc_id, 10);
                }
                esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
                    let svc = (*param).create.service_handle;
                    SVC_HANDLE.store(svc as u32, Ordering::Relaxed);
                    esp_ble_gatts_start_service(svc);
                    STEP.store(1, Ordering::Relaxed);
                    add_char(svc, CHAR_RX, ESP_GATT_PERM_WRITE, ESP_GATT_CHAR_PROP_BIT_WRITE);
                }
                esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
                    let handle = (*param).add_char.attr_handle as u32;
                    let svc = SVC_HANDLE.load(Ordering::Relaxed) as u16;
                    match STEP.load(Ordering::Relaxed) {
                        1 => {
                            RX_HANDLE.store(handle, Ordering::Relaxed);
                            STEP.store(2, Ordering::Relaxed);
                            add_char(svc, CHAR_TX, ESP_GATT_PERM_READ, ESP_GATT_CHAR_PROP_BIT_NOTIFY);
                        }
                        2 => {
                            TX_HANDLE.store(handle, Ordering::Relaxed);
                            STEP.store(3, Ordering::Relaxed);
                            add_cccd(svc);
                        }
                        4 => {
                            CODE_HANDLE.store(handle, Ordering::Relaxed);
                            STEP.store(5, Ordering::Relaxed);
                            add_cccd(svc);
                        }
                        _ => {}
                    }
                }
                esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_DESCR_EVT => {
                    let svc = SVC_HANDLE.load(Ordering::Relaxed) as u16;
                    match STEP.load(Ordering::Relaxed) {
                        3 => {
                            STEP.store(4, Ordering::Relaxed);
                            add_char(
                                svc,
                                CHAR_CODE,
                                ESP_GATT_PERM_WRITE | ESP_GATT_PERM_READ,
                                ESP_GATT_CHAR_PROP_BIT_WRITE | ESP_GATT_CHAR_PROP_BIT_NOTIFY,
                            );
                        }
                        5 => {
                            STEP.store(6, Ordering::Relaxed);
                            log::info!("BLE GATTS: service registered");
                        }
                        _ => {}
                    }
                }
                esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
                    let conn = (*param).connect.conn_id;
                    CONN_ID.store(conn as u32, Ordering::Relaxed);
                    deliver(BleDelivery::Link(LinkEvent::Connected));
                    push_event(Event::BleConnected);
                }
                esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
                    CONN_ID.store(u32::MAX, Ordering::Relaxed);
                    deliver(BleDelivery::Link(LinkEvent::Disconnected));
                    push_event(Event::BleDisconnected);
                }
                esp_gatts_cb_event_t_ESP_GATTS_MTU_EVT => {
                    deliver(BleDelivery::Mtu((*param).mtu.mtu as usize));
                }
                esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
                    let p = &(*param).write;
                    if p.need_rsp {
                        esp_ble_gatts_send_response(
                            gatts_if,
                            p.conn_id,
                            p.trans_id,
                            esp_gatt_status_t_ESP_GATT_OK,
                            core::ptr::null_mut(),
                        );
                    }
                    let handle = p.handle as u32;
                    let channel = if handle == RX_HANDLE.load(Ordering::Relaxed) {
                        BleChannel::Command
                    } else if handle == CODE_HANDLE.load(Ordering::Relaxed) {
                        BleChannel::Chunk
                    } else {
                        return;
                    };
                    let data = core::slice::from_raw_parts(p.value, p.len as usize);
                    deliver(BleDelivery::Write(channel, data.to_vec()));
                }
                _ => {}
            }
        }
    }
}

// ── BLE Transport ────────────────────────────────────────────

/// Single-central BLE GATT transport.
pub struct BleTransport {
    device_name: heapless::String<24>,
    deliveries: VecDeque<BleDelivery>,
    connected: bool,
    mtu: usize,
    command_buffer: usize,
    chunk_buffer: usize,
    /// Simulation: every notification sent, oldest first.
    #[cfg(not(target_os = "espidf"))]
    notified: Vec<Vec<u8>>,
}

impl BleTransport {
    pub fn new(cfg: &DeviceConfig) -> Self {
        Self {
            device_name: cfg.device_name.clone(),
            deliveries: VecDeque::new(),
            connected: false,
            mtu: DEFAULT_MTU,
            command_buffer: cfg.ble_command_buffer,
            chunk_buffer: cfg.ble_chunk_buffer,
            #[cfg(not(target_os = "espidf"))]
            notified: Vec::new(),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    // ── Ingest (GATT server → transport) ─────────────────────

    pub fn on_connect(&mut self) {
        self.enqueue(BleDelivery::Link(LinkEvent::Connected));
    }

    pub fn on_disconnect(&mut self) {
        self.enqueue(BleDelivery::Link(LinkEvent::Disconnected));
    }

    /// A central wrote `data` to one of the writable characteristics.
    /// Writes beyond the characteristic buffer are truncated, as the
    /// GATT server would.
    pub fn on_write(&mut self, channel: BleChannel, data: &[u8]) {
        let cap = match channel {
            BleChannel::Command => self.command_buffer,
            BleChannel::Chunk => self.chunk_buffer,
        };
        if data.len() > cap {
            warn!("BLE: {:?} write of {} bytes truncated to {}", channel, data.len(), cap);
        }
        self.enqueue(BleDelivery::Write(channel, data[..data.len().min(cap)].to_vec()));
    }

    fn enqueue(&mut self, d: BleDelivery) {
        if self.deliveries.len() >= INBOX_CAP {
            warn!("BLE: inbox full, delivery dropped");
            return;
        }
        self.deliveries.push_back(d);
    }

    /// Move pending deliveries from the Bluedroid callbacks.
    #[cfg(target_os = "espidf")]
    fn pump(&mut self) {
        let drained: Vec<BleDelivery> = match bridge::DELIVERIES.lock() {
            Ok(mut q) => q.drain(..).collect(),
            Err(_) => return,
        };
        for d in drained {
            match d {
                BleDelivery::Write(channel, data) => self.on_write(channel, &data),
                other => self.enqueue(other),
            }
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn pump(&mut self) {}

    /// Apply MTU updates at the head of the queue.
    fn absorb_mtu(&mut self) {
        while let Some(BleDelivery::Mtu(mtu)) = self.deliveries.front() {
            self.mtu = (*mtu).max(DEFAULT_MTU);
            debug!("BLE: MTU {}", self.mtu);
            self.deliveries.pop_front();
        }
    }

    /// Simulation: drain captured notifications.
    #[cfg(not(target_os = "espidf"))]
    pub fn take_notifications(&mut self) -> Vec<Vec<u8>> {
        core::mem::take(&mut self.notified)
    }

    // ── Stack lifecycle ──────────────────────────────────────

    /// Bring up the controller, register the service and start advertising.
    #[cfg(target_os = "espidf")]
    pub fn start(&mut self) -> Result<(), BleTransportError> {
        use esp_idf_svc::sys::*;

        let name = std::ffi::CString::new(self.device_name.as_str())
            .map_err(|_| BleTransportError::StackInitFailed(ESP_ERR_INVALID_ARG as i32))?;

        // SAFETY: standard Bluedroid bring-up sequence, called once from
        // the main task before any callback can fire.
        unsafe {
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            let steps = [
                esp_bt_controller_init(&mut bt_cfg),
                esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE),
                esp_bluedroid_init(),
                esp_bluedroid_enable(),
            ];
            if let Some(&rc) = steps.iter().find(|&&rc| rc != ESP_OK as i32) {
                return Err(BleTransportError::StackInitFailed(rc));
            }

            esp_ble_gap_register_callback(Some(bridge::gap_event_handler));
            esp_ble_gatts_register_callback(Some(bridge::gatts_event_handler));
            esp_ble_gatts_app_register(0);
            esp_ble_gap_set_device_name(name.as_ptr());
        }

        info!("BLE(espidf): GATT server up as '{}'", self.device_name);
        self.restart_advertising()
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn start(&mut self) -> Result<(), BleTransportError> {
        info!(
            "BLE(sim): advertising '{}' (service {:032x})",
            self.device_name, SERVICE_UUID
        );
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    pub fn restart_advertising(&mut self) -> Result<(), BleTransportError> {
        use esp_idf_svc::sys::*;
        let mut params = bridge::adv_params();
        // SAFETY: params outlives the call; Bluedroid copies it.
        let rc = unsafe { esp_ble_gap_start_advertising(&mut params) };
        if rc != ESP_OK as i32 {
            return Err(BleTransportError::AdvertiseFailed(rc));
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn restart_advertising(&mut self) -> Result<(), BleTransportError> {
        info!("BLE(sim): advertising restarted");
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn notify(&mut self, fragment: &[u8]) -> Result<(), BleTransportError> {
        use core::sync::atomic::Ordering;
        use esp_idf_svc::sys::*;

        let conn = bridge::CONN_ID.load(Ordering::Relaxed);
        if conn == u32::MAX {
            return Err(BleTransportError::NotConnected);
        }
        // SAFETY: Bluedroid copies the value before returning.
        let rc = unsafe {
            esp_ble_gatts_send_indicate(
                bridge::GATTS_IF.load(Ordering::Relaxed) as esp_gatt_if_t,
                conn as u16,
                bridge::TX_HANDLE.load(Ordering::Relaxed) as u16,
                fragment.len() as u16,
                fragment.as_ptr() as *mut u8,
                false,
            )
        };
        if rc != ESP_OK as i32 {
            return Err(BleTransportError::NotifyFailed(rc));
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn notify(&mut self, fragment: &[u8]) -> Result<(), BleTransportError> {
        self.notified.push(fragment.to_vec());
        Ok(())
    }
}

impl Transport for BleTransport {
    type Error = BleTransportError;

    fn kind(&self) -> TransportKind {
        TransportKind::Ble
    }

    fn poll_link(&mut self) -> Option<LinkEvent> {
        self.pump();
        self.absorb_mtu();
        match self.deliveries.front() {
            Some(BleDelivery::Link(event)) => {
                let event = *event;
                self.deliveries.pop_front();
                self.connected = event == LinkEvent::Connected;
                if !self.connected {
                    self.mtu = DEFAULT_MTU;
                }
                Some(event)
            }
            _ => None,
        }
    }

    /// Stops at a pending link event so the session sees it first.
    fn poll_frame(&mut self) -> Option<Frame> {
        self.pump();
        self.absorb_mtu();
        match self.deliveries.front() {
            Some(BleDelivery::Write(..)) => match self.deliveries.pop_front() {
                Some(BleDelivery::Write(channel, data)) => Some(ble_frame(channel, &data)),
                _ => None,
            },
            _ => None,
        }
    }

    fn send(&mut self, envelope: &[u8]) -> Result<(), BleTransportError> {
        if !self.connected {
            return Err(BleTransportError::NotConnected);
        }
        let payload = self.mtu.saturating_sub(ATT_HEADER).max(1);
        for fragment in envelope.chunks(payload) {
            self.notify(fragment)?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ── Tests ────────────────────────────────────────────────────
