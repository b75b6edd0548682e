//! Bridges USB-attached CAN gateway devices to the driver-assistance bus.
//!
//! # Exit codes
//!
//! - `0`: clean exit, auto-enumeration found no gateways present.
//! - `1`: reserved for argument-parsing failure, surfaced by `clap` before
//!   this module's code runs at all.
//! - `2`: shutdown triggered after a successful open, whether by a fatal
//!   internal error or by the ordinary disconnect-and-respawn path; the
//!   supervising launcher is expected to respawn on any nonzero exit.

mod bus;
mod can;
mod config;
mod error;
mod fleet;
mod gps;
mod health;
mod params;
mod peripheral;
mod platform;
mod rtc;
mod safety;
mod state;
mod trace;

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use gateway_api::GatewayFactory;
use gateway_usb::UsbFactory;

use bus::{Bus, InMemoryBus};
use config::Cli;
use params::{FakeParamStore, ParamStore};
use platform::{HostSensors, NullHostSensors};
use state::SharedState;

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new().parse_filters(&cli.log_level).init();

    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            error!(target: "pandad", "fatal error: {err:#}");
            ExitCode::from(error::exit_code::UNRECOVERABLE as u8)
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let state = SharedState::new();
    state.install_signal_handler().context("installing SIGINT/SIGTERM handler")?;

    // Placeholders for the two external collaborators named in SPEC_FULL §1
    // (the pub/sub bus and the persistent parameter store): a real
    // deployment wires this daemon to its actual bus client and store
    // instead of these in-process stand-ins.
    let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
    let params: Arc<dyn ParamStore> = Arc::new(FakeParamStore::new());
    let sensors: Arc<dyn HostSensors> = Arc::new(NullHostSensors);

    let factory: Arc<dyn GatewayFactory> =
        Arc::new(UsbFactory::new().context("initializing USB context")?);

    let Some(opened) = fleet::open_fleet(factory.as_ref(), &cli.serials, bus.as_ref(), &state)
    else {
        return Ok(ExitCode::from(error::exit_code::CLEAN_EMPTY_FLEET as u8));
    };

    if cli.loopback_enabled() {
        for gw in opened.iter() {
            if let Err(err) = gw.set_loopback(true) {
                error!(target: "pandad::fleet", "failed to enable loopback on {}: {err}", gw.serial());
            }
        }
    }

    let fleet = Arc::new(opened);
    info!(target: "pandad", "fleet of {} gateway(s) open, starting activities", fleet.len());

    let fake_send = cli.fake_send_enabled();
    let fan_control_enabled = !cli.no_fan_control_enabled();
    let spoof_ignition = cli.spoof_ignition_enabled();

    let mut handles = Vec::new();

    handles.push(thread::spawn({
        let fleet = Arc::clone(&fleet);
        let bus = Arc::clone(&bus);
        let state = state.clone();
        move || can::run_can_receive_loop(fleet.as_ref(), bus.as_ref(), &state)
    }));

    handles.push(thread::spawn({
        let fleet = Arc::clone(&fleet);
        let bus = Arc::clone(&bus);
        let state = state.clone();
        move || can::run_can_send_loop(fleet.as_ref(), bus.as_ref(), &state, fake_send)
    }));

    handles.push(thread::spawn({
        let fleet = Arc::clone(&fleet);
        let bus = Arc::clone(&bus);
        let params = Arc::clone(&params);
        let factory = Arc::clone(&factory);
        let sensors = Arc::clone(&sensors);
        let state = state.clone();
        move || {
            health::run_health_loop(fleet, bus, params, factory, sensors, state, spoof_ignition)
        }
    }));

    handles.push(thread::spawn({
        let fleet = Arc::clone(&fleet);
        let bus = Arc::clone(&bus);
        let state = state.clone();
        move || {
            peripheral::run_peripheral_controller(fleet.as_ref(), bus.as_ref(), &state, fan_control_enabled)
        }
    }));

    handles.push(thread::spawn({
        let fleet = Arc::clone(&fleet);
        let bus = Arc::clone(&bus);
        let state = state.clone();
        move || {
            if let Some(gw) = fleet.peripheral_gateway() {
                gps::run_gps_passthrough(gw, bus.as_ref(), &state);
            }
        }
    }));

    for handle in handles {
        if handle.join().is_err() {
            error!(target: "pandad", "a long-lived activity panicked");
        }
    }

    info!(target: "pandad", "all activities joined, exiting for supervisor respawn");
    Ok(ExitCode::from(error::exit_code::UNRECOVERABLE as u8))
}
