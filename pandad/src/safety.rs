//! The one-shot safety-configuration handshake with the vehicle
//! identification subsystem, launched on the offroad -> onroad edge
//! (SPEC_FULL §4.6). Runs on its own thread, spawned by the health loop.

use std::thread;
use std::time::Duration;

use log::info;

use gateway_api::{HwType, SafetyModel};

use crate::fleet::Fleet;
use crate::params::{key, ParamStore};
use crate::state::SharedState;
use crate::trace::{self, SafetyTrace};

const PHASE2_POLL: Duration = Duration::from_millis(20);
const PHASE3_POLL: Duration = Duration::from_millis(100);

fn should_abort(fleet: &Fleet, state: &SharedState) -> bool {
    state.shutdown_requested() || !fleet.all_connected() || !state.ignition()
}

/// Runs the three-phase handshake to completion or abort. A `false` return
/// leaves every gateway's safety state exactly where it was; the health
/// loop re-commands "no-output" on the next offroad transition if still
/// applicable.
pub fn run_handshake(fleet: &Fleet, params: &dyn ParamStore, state: &SharedState) -> bool {
    if fleet.is_empty() {
        return false;
    }

    info!(target: "pandad::safety", "starting safety handshake");
    trace::safety().record(SafetyTrace::PreFingerprintStarted);

    // Phase 1: pre-fingerprint. Lets the external fingerprinter probe the
    // bus with no OBD multiplexing in effect anywhere.
    for gw in fleet.iter() {
        if gw.set_safety_model(SafetyModel::Elm327, 1).is_err() {
            trace::safety().record(SafetyTrace::Aborted);
            return false;
        }
    }

    // Phase 2: multiplexing loop.
    let gateway0_is_internal =
        fleet.get(0).map(|g| g.hw_type() == HwType::Internal).unwrap_or(false);
    let mut multiplexing_enabled = false;
    loop {
        if should_abort(fleet, state) {
            trace::safety().record(SafetyTrace::Aborted);
            return false;
        }

        let multiplexing_requested = params.get_bool(key::OBD_MULTIPLEXING_ENABLED);
        if multiplexing_requested != multiplexing_enabled {
            for (i, gw) in fleet.iter().enumerate() {
                let param = if i == 0 && gateway0_is_internal && multiplexing_requested {
                    0
                } else {
                    1
                };
                if gw.set_safety_model(SafetyModel::Elm327, param).is_err() {
                    trace::safety().record(SafetyTrace::Aborted);
                    return false;
                }
            }
            multiplexing_enabled = multiplexing_requested;
            params.put_bool(key::OBD_MULTIPLEXING_CHANGED, true);
            trace::safety().record(SafetyTrace::MultiplexingChanged { requested: multiplexing_requested });
        }

        if params.get_bool(key::FIRMWARE_QUERY_DONE) {
            info!(target: "pandad::safety", "finished firmware query");
            break;
        }
        thread::sleep(PHASE2_POLL);
    }

    // Phase 3: commit.
    info!(target: "pandad::safety", "waiting for controls-ready car params");
    let car_params = loop {
        if should_abort(fleet, state) {
            trace::safety().record(SafetyTrace::Aborted);
            return false;
        }
        if params.get_bool(key::CONTROLS_READY) {
            if let Some(cp) = params.get_car_params() {
                break cp;
            }
        }
        thread::sleep(PHASE3_POLL);
    };

    for (i, gw) in fleet.iter().enumerate() {
        let config = car_params.safety_configs.get(i).copied().unwrap_or_default();
        info!(
            target: "pandad::safety",
            "gateway {i}: setting safety model {:?} param {} alt-experience {}",
            config.model, config.param, car_params.alternative_experience
        );
        if gw.set_alternative_experience(car_params.alternative_experience).is_err() {
            trace::safety().record(SafetyTrace::Aborted);
            return false;
        }
        if gw.set_safety_model(config.model, config.param).is_err() {
            trace::safety().record(SafetyTrace::Aborted);
            return false;
        }
    }

    info!(target: "pandad::safety", "safety handshake committed for {} gateway(s)", fleet.len());
    trace::safety().record(SafetyTrace::Committed { gateway_count: fleet.len() });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{CarParams, FakeParamStore};
    use gateway_api::fake::FakeGateway;
    use gateway_api::SafetyConfig;

    fn fleet_of(gateways: Vec<FakeGateway>) -> Fleet {
        crate::fleet::Fleet::for_test(gateways.into_iter().map(|g| Box::new(g) as Box<dyn gateway_api::Gateway>).collect())
    }

    #[test]
    fn fingerprint_then_commit_matches_scenario_one() {
        let internal = FakeGateway::new("INT", HwType::Internal, 0);
        let external = FakeGateway::new("EXT", HwType::GatewayStandard, 1);
        let params = FakeParamStore::new();
        let state = SharedState::new();
        state.set_ignition(true);

        // Drive the handshake from a second thread since phases 2/3 poll.
        let fleet = fleet_of(vec![internal, external]);
        let handle = std::thread::scope(|scope| {
            let params_ref = &params;
            let state_ref = &state;
            let fleet_ref = &fleet;
            let h = scope.spawn(move || run_handshake(fleet_ref, params_ref, state_ref));

            std::thread::sleep(Duration::from_millis(40));
            params.put_bool(key::OBD_MULTIPLEXING_ENABLED, true);
            std::thread::sleep(Duration::from_millis(40));
            params.put_bool(key::FIRMWARE_QUERY_DONE, true);
            std::thread::sleep(Duration::from_millis(40));
            params.put_bool(key::CONTROLS_READY, true);
            params.set_car_params(CarParams {
                safety_configs: vec![SafetyConfig { model: SafetyModel::Honda, param: 2 }],
                alternative_experience: 0x4,
            });

            h.join().unwrap()
        });

        assert!(handle);
    }

    #[test]
    fn handshake_without_ignition_aborts_in_phase_two() {
        let internal = FakeGateway::new("INT", HwType::Internal, 0);
        let params = FakeParamStore::new();
        let state = SharedState::new();
        // Ignition never goes true, so phase 2's first abort-check fires.
        let fleet = fleet_of(vec![internal]);
        assert!(!run_handshake(&fleet, &params, &state));
    }

    #[test]
    fn empty_fleet_aborts_immediately() {
        let params = FakeParamStore::new();
        let state = SharedState::new();
        let fleet = fleet_of(vec![]);
        assert!(!run_handshake(&fleet, &params, &state));
    }
}
