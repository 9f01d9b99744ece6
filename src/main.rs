mod ble;
mod config;
mod control_plane;
mod discovery;
mod dispatcher;
mod error;
mod facade;
mod integration;
mod ir;
mod keymap;
mod model;
mod queue;
mod rf;
mod scene;
mod status;
mod store;

use std::sync::Arc;

use control_plane::ControlPlane;
use ir::hardware::IrHardware;
use rf::radio::RfRadio;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("equilibrium starting...");

    let cfg = config::Config::load();

    let ir_hardware = build_ir_hardware(&cfg.ir);
    let rf_radio = build_rf_radio(&cfg.rf);

    let control_plane = match ControlPlane::start(cfg, ir_hardware, rf_radio).await {
        Ok(cp) => cp,
        Err(e) => {
            // §7: hardware init failure at boot is fatal to the control plane.
            // A real deployment would still let the HTTP facade serve CRUD in
            // a degraded mode; there is no facade wired in this binary.
            log::error!("control plane failed to start: {e}");
            std::process::exit(1);
        }
    };

    log::info!("equilibrium running, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for shutdown signal: {e}");
    }

    log::info!("shutdown signal received");
    control_plane.shutdown().await;
}

#[cfg(target_os = "linux")]
fn build_ir_hardware(cfg: &config::IrConfig) -> Arc<dyn IrHardware> {
    use ir::hardware::rppal_hardware::RppalIrHardware;
    match RppalIrHardware::new(cfg.tx_gpio as u8, cfg.rx_gpio as u8, cfg.carrier_hz) {
        Ok(hw) => Arc::new(hw),
        Err(e) => {
            log::error!("failed to initialize IR hardware: {e}");
            std::process::exit(1);
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn build_ir_hardware(_cfg: &config::IrConfig) -> Arc<dyn IrHardware> {
    log::warn!("non-Linux build: IR transceiver backed by an in-memory fake, no real GPIO access");
    Arc::new(ir::hardware::FakeIrHardware::new())
}

#[cfg(target_os = "linux")]
fn build_rf_radio(cfg: &config::RfConfig) -> Option<Box<dyn RfRadio>> {
    use rf::radio::spidev_radio::SpidevRadio;
    match SpidevRadio::open(&cfg.spi_path, cfg.ce_pin) {
        Ok(radio) => Some(Box::new(radio)),
        Err(e) => {
            log::warn!("RF hardware is not responding, input router will not see remote button presses: {e}");
            None
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn build_rf_radio(_cfg: &config::RfConfig) -> Option<Box<dyn RfRadio>> {
    log::warn!("non-Linux build: RF listener disabled, no spidev/gpio-cdev backend available");
    None
}
