//! Raw uBlox GPS passthrough (SPEC_FULL §4.5A). Supplements the distilled
//! spec: dropped in the initial extraction but present in the original
//! system, and kept here because it is a thin forward of gateway-supplied
//! bytes rather than a GPS driver, and because it owns `gps_active`, which
//! the Health Loop's power-save gating reads.

use std::time::Duration;

use log::{info, warn};

use gateway_api::Gateway;

use crate::bus::{topic, Bus, Message, UbloxRawMsg};
use crate::state::SharedState;
use crate::trace::{self, GpsTrace};

const POLL_PERIOD: Duration = Duration::from_millis(10);

/// Runs until shutdown or disconnection. Only meaningful for a gateway
/// reporting `has_gps()`; callers should not spawn this otherwise.
pub fn run_gps_passthrough(gw: &dyn Gateway, bus: &dyn Bus, state: &SharedState) {
    if !gw.has_gps() {
        return;
    }

    let mut ignition_was_on = state.ignition();
    if ignition_was_on {
        init_receiver(gw);
        state.set_gps_active(true);
    }

    loop {
        if state.shutdown_requested() || !gw.connected() {
            break;
        }

        let ignition_now = state.ignition();
        if ignition_now && !ignition_was_on {
            init_receiver(gw);
            state.set_gps_active(true);
        } else if !ignition_now && ignition_was_on {
            stop_receiver(gw);
            state.set_gps_active(false);
        }
        ignition_was_on = ignition_now;

        if ignition_now {
            match gw.recv_gps_raw() {
                Ok(bytes) if !bytes.is_empty() => {
                    if bytes[0] == 0 {
                        warn!(target: "pandad::gps", "null first byte while onroad, resetting receiver");
                        trace::gps().record(GpsTrace::ReceiverReset);
                        init_receiver(gw);
                    } else {
                        bus.publish(topic::UBLOX_RAW, Message::UbloxRaw(UbloxRawMsg { data: bytes }));
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    if err.is_disconnection() {
                        state.request_shutdown();
                    }
                }
            }
        }

        std::thread::sleep(POLL_PERIOD);
    }

    if ignition_was_on {
        stop_receiver(gw);
        state.set_gps_active(false);
    }
}

fn init_receiver(gw: &dyn Gateway) {
    info!(target: "pandad::gps", "initializing GPS receiver");
    trace::gps().record(GpsTrace::ReceiverInit);
    let _ = gw.gps_set_power(true);
    let _ = gw.gps_init();
}

fn stop_receiver(gw: &dyn Gateway) {
    info!(target: "pandad::gps", "stopping GPS receiver");
    trace::gps().record(GpsTrace::ReceiverStop);
    let _ = gw.gps_stop();
    let _ = gw.gps_set_power(false);
}
