//! BLE bridge firmware: main entry point.
//!
//! Hexagonal architecture driven by a single work queue.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  BleCentralAdapter  OneShotTimers  NvsAdapter  LogEventSink    │
//! │  (RadioPort)        (TimerPort)    (Config +   (EventSink)     │
//! │                                     Storage)                   │
//! │  DynamicEndpointTable (FabricPort)  CLI reader thread          │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │                   Bridge (pure logic)                  │    │
//! │  │  Registry · Connectivity & Recovery · Storage          │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Work queue: GAP/GATTC callbacks · esp_timer · CLI → main loop │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::io::BufRead;
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};

use blebridge::adapters::ble::BleCentralAdapter;
use blebridge::adapters::fabric::DynamicEndpointTable;
use blebridge::adapters::log_sink::LogEventSink;
use blebridge::adapters::nvs::NvsAdapter;
use blebridge::adapters::timer::OneShotTimers;
use blebridge::app::commands::BridgeCommand;
use blebridge::app::ports::ConfigPort;
use blebridge::app::service::Bridge;
use blebridge::config::BridgeConfig;
use blebridge::events::{self, WorkItem, WorkQueue};

static QUEUE: WorkQueue = WorkQueue::new();

// ── CLI reader ────────────────────────────────────────────────
//
// Runs on its own thread and only parses.  Valid commands are posted to
// the work queue; the bridge executes them on the main loop.

fn cli_loop(queue: &'static WorkQueue, poll_ms: u32) {
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => {
                std::thread::sleep(Duration::from_millis(u64::from(poll_ms)));
                continue;
            }
            Ok(_) => {}
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        match BridgeCommand::parse(input) {
            Ok(cmd) => {
                events::post(queue, WorkItem::Command(cmd));
            }
            Err(e) => warn!("CLI: '{}': {} (usage: add <type> [radioIndex] [label] | remove <endpoint> | scan)", input, e),
        }
    }
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  BLE bridge v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let nvs = NvsAdapter::new().map_err(|e| anyhow::anyhow!("NVS init failed: {}", e))?;
    let config = match nvs.load() {
        Ok(cfg) => {
            info!("Config loaded from NVS");
            cfg
        }
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            BridgeConfig::default()
        }
    };

    // ── 3. Construct adapters ─────────────────────────────────
    let mut radio = BleCentralAdapter::new();
    radio.start(&QUEUE);
    let timers = OneShotTimers::new(&QUEUE)?;
    let fabric = DynamicEndpointTable::default();
    let mut log_sink = LogEventSink::new();

    // ── 4. Bridge bring-up ────────────────────────────────────
    let poll_ms = config.cli_poll_interval_ms;
    let mut bridge = Bridge::new(config, nvs, radio, timers, fabric);
    if let Err(e) = bridge.init(&mut log_sink) {
        anyhow::bail!("bridge init failed: {}", e);
    }

    std::thread::Builder::new()
        .name("cli".into())
        .stack_size(8 * 1024)
        .spawn(move || cli_loop(&QUEUE, poll_ms))?;

    info!("System ready. Entering work loop.");

    // ── 5. Work loop ──────────────────────────────────────────
    loop {
        let item = futures_lite::future::block_on(QUEUE.receive());
        bridge.process(item, &mut log_sink);
        bridge.drain(&QUEUE, &mut log_sink);
    }
}
