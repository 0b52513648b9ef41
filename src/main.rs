//! CodeLoader firmware: main entry point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  BleTransport      SerialTransport   FsStore (SPIFFS)          │
//! │  (GATT / NUS)      (UART0 console)   EspSystem · BoardPins     │
//! │                                                                │
//! │  ─────────────── Transport / Port Trait Boundary ────────────  │
//! │                                                                │
//! │  ┌────────────────────────────┐  ┌──────────────────────────┐  │
//! │  │ Session[BLE]   Session[USB]│─▶│ ExecutionSupervisor      │  │
//! │  │ Engine · TransferState     │  │ LuaInterpreter (APP core)│  │
//! │  └────────────────────────────┘  └──────────────────────────┘  │
//! │                                                                │
//! │  Main loop: sessions · button · status LED · re-advertise      │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use embedded_hal::digital::PinState;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::peripherals::Peripherals;
use log::{info, warn};

use codeloader::adapters::ble_transport::BleTransport;
use codeloader::adapters::lua::LuaInterpreter;
use codeloader::adapters::pins::BoardPins;
use codeloader::adapters::serial_transport::{SerialTransport, UartConsole};
use codeloader::adapters::storage::FsStore;
use codeloader::adapters::system::EspSystem;
use codeloader::app::events::Response;
use codeloader::app::ports::{
    FileStore, PinPort, SharedPins, SharedStore, SharedSystem, SystemPort,
};
use codeloader::app::supervisor::ExecutionSupervisor;
use codeloader::config::{CONFIG_FILE, DeviceConfig};
use codeloader::diagnostics;
use codeloader::drivers::button::{self, ButtonDriver};
use codeloader::drivers::status_led::StatusLed;
use codeloader::events::{self, Event, push_event};
use codeloader::pins;
use codeloader::rpc::session::{ReadvertiseTimer, Session};

/// Read `config.json` from storage, falling back to defaults.
fn load_config(store: &dyn FileStore) -> DeviceConfig {
    if !store.exists(CONFIG_FILE) {
        info!("Config: defaults (no {})", CONFIG_FILE);
        return DeviceConfig::default();
    }
    match store
        .read(CONFIG_FILE)
        .map_err(|e| e.to_string())
        .and_then(|bytes| DeviceConfig::from_json(&bytes).map_err(str::to_owned))
    {
        Ok(cfg) => {
            info!("Config loaded from {}", CONFIG_FILE);
            cfg
        }
        Err(e) => {
            warn!("Config: {} rejected ({}), using defaults", CONFIG_FILE, e);
            DeviceConfig::default()
        }
    }
}

fn print_banner(config: &DeviceConfig) {
    info!("Available commands:");
    info!("  run · save · list · delete · info · reboot");
    info!("  start_upload · start_run · stop");
    info!("  (serial) list · info · reboot · stop · delete <name>");
    if config.ble_enabled {
        info!("Waiting for a BLE connection as '{}'...", config.device_name);
    }
    if config.usb_enabled {
        info!("USB serial ready, responses tagged '{}'", config.serial_response_tag);
    }
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  CodeLoader v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    diagnostics::install_panic_handler();
    let peripherals = Peripherals::take()?;

    // ── 2. Storage + config ───────────────────────────────────
    let fs = FsStore::mount_spiffs().map_err(|e| anyhow!("storage mount failed: {e}"))?;
    let config = load_config(&fs);

    // ── 3. Shared ports ───────────────────────────────────────
    let store: SharedStore = Arc::new(Mutex::new(fs));
    let system: SharedSystem = Arc::new(EspSystem);
    let mut board = BoardPins::new();
    if let Err(e) = board.write(pins::AUX_LED_GPIO, PinState::Low) {
        warn!("AUX LED init failed: {}", e);
    }
    let pins: SharedPins = Arc::new(Mutex::new(board));

    let supervisor = Arc::new(ExecutionSupervisor::new(
        Arc::new(LuaInterpreter::new()),
        store.clone(),
        pins.clone(),
        system.clone(),
        config.worker_stack_kb,
    ));

    // ── 4. Board I/O ──────────────────────────────────────────
    if let Err(rc) = button::install() {
        warn!("Button ISR install failed (rc={}), button disabled", rc);
    }
    let mut button = ButtonDriver::new();
    let mut led = StatusLed::new(pins.clone());

    // ── 5. Sessions ───────────────────────────────────────────
    let mut ble = if config.ble_enabled {
        let mut transport = BleTransport::new(&config);
        transport.start().map_err(|e| anyhow!("BLE start failed: {e}"))?;
        Some(Session::new(
            transport,
            &config,
            supervisor.clone(),
            store.clone(),
            system.clone(),
        ))
    } else {
        None
    };

    let mut usb = if config.usb_enabled {
        let port = UartConsole::new(
            peripherals.uart0,
            peripherals.pins.gpio1,
            peripherals.pins.gpio3,
        )?;
        Some(Session::new(
            SerialTransport::new(port, &config),
            &config,
            supervisor.clone(),
            store.clone(),
            system.clone(),
        ))
    } else {
        None
    };

    print_banner(&config);
    info!("System ready. Entering main loop.");

    // ── 6. Main loop ──────────────────────────────────────────
    let mut readvertise = ReadvertiseTimer::new(config.readvertise_delay_ms);
    led.advertising(system.uptime_ms());

    loop {
        let now_ms = system.uptime_ms();

        if let Some(session) = ble.as_mut() {
            session.poll(now_ms);
            if readvertise.update(session, now_ms) {
                match session.transport_mut().restart_advertising() {
                    Ok(()) => info!("BLE: advertising restarted"),
                    Err(e) => warn!("BLE: restart advertising failed: {}", e),
                }
            }
        }
        if let Some(session) = usb.as_mut() {
            session.poll(now_ms);
        }

        if button.tick() {
            push_event(Event::ButtonPressed);
        }

        events::drain_events(|event| match event {
            Event::ButtonPressed => {
                let on = led.toggle_manual();
                let status = if on { "LED is ON." } else { "LED is OFF" };
                info!("Button: {}", status);
                let response = Response::info(status);
                if let Some(session) = ble.as_mut() {
                    session.broadcast(&response);
                }
                if let Some(session) = usb.as_mut() {
                    session.broadcast(&response);
                }
            }
            Event::BleConnected => led.connected(),
            Event::BleDisconnected => led.advertising(now_ms),
        });

        led.tick(now_ms);
        FreeRtos::delay_ms(config.loop_interval_ms);
    }
}
