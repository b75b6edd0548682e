//! The 2Hz health/peripheral telemetry loop (SPEC_FULL §4.2). Also drives
//! ignition detection, power-save transitions, fleet-change detection, and
//! launches the Safety Handshake on the offroad→onroad edge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};

use gateway_api::{Gateway, GatewayFactory, SafetyModel};

use crate::bus::{
    topic, Bus, ControlsStateMsg, Message, PandaState, PandaStatesMsg, PeripheralStateMsg,
};
use crate::fleet::Fleet;
use crate::params::{key, ParamStore};
use crate::platform::HostSensors;
use crate::safety;
use crate::state::SharedState;
use crate::trace::{self, HealthTrace};

const TICK_PERIOD: Duration = Duration::from_millis(500);
const BUSES_PER_GATEWAY: u8 = 4;

/// Fetches one gateway's full health snapshot. `None` means "abort the
/// tick" per SPEC_FULL §4.2 step 2: a single failed fetch anywhere in the
/// fleet skips ignition update and the `pandaStates` publish entirely.
fn fetch_gateway_state(gw: &dyn Gateway, spoof_ignition: bool) -> Option<PandaState> {
    let mut health = gw.get_health().ok()?;
    if spoof_ignition {
        health.ignition_line = true;
    }

    let mut can_health = Vec::with_capacity(BUSES_PER_GATEWAY as usize);
    for bus_index in 0..BUSES_PER_GATEWAY {
        can_health.push(gw.get_can_health(bus_index).ok()?);
    }

    Some(PandaState { health, can_health })
}

fn apply_derived_rules(gw: &dyn Gateway, state: &PandaState, gps_active: bool, ignition: bool) {
    if state.health.safety_model == SafetyModel::Silent {
        let _ = gw.set_safety_model(SafetyModel::NoOutput, state.health.safety_param);
    } else if !ignition && state.health.safety_model != SafetyModel::NoOutput {
        let _ = gw.set_safety_model(SafetyModel::NoOutput, state.health.safety_param);
    }

    let desired_power_save = !ignition && !gps_active;
    if state.health.power_save_enabled != desired_power_save {
        let _ = gw.set_power_saving(desired_power_save);
    }
}

fn publish_peripheral_state(bus: &dyn Bus, fleet: &Fleet, sensors: &dyn HostSensors) {
    let Some(gw) = fleet.peripheral_gateway() else { return };
    let fan_rpm = gw.get_fan_speed().unwrap_or(0);
    bus.publish(
        topic::PERIPHERAL_STATE,
        Message::PeripheralState(PeripheralStateMsg {
            voltage_mv: sensors.voltage_mv(),
            current_ma: sensors.current_ma(),
            fan_speed_rpm: fan_rpm,
            hw_type: gw.hw_type(),
        }),
    );
}

fn send_heartbeats(fleet: &Fleet, controls_sub: &mut dyn crate::bus::Subscriber) {
    let engaged = matches!(
        controls_sub.try_latest(),
        Some(Message::ControlsState(ControlsStateMsg { engaged: true }))
    );
    for gw in fleet.iter() {
        let _ = gw.send_heartbeat(engaged);
    }
}

/// Launches the Safety Handshake on a detached thread if one isn't already
/// running, returning without blocking either way.
fn maybe_launch_handshake(
    fleet: &Arc<Fleet>,
    params: &Arc<dyn ParamStore>,
    state: &SharedState,
    handshake_running: &Arc<AtomicBool>,
) {
    if handshake_running
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }

    let fleet = Arc::clone(fleet);
    let params = Arc::clone(params);
    let state = state.clone();
    let running = Arc::clone(handshake_running);
    thread::spawn(move || {
        let ok = safety::run_handshake(&fleet, params.as_ref(), &state);
        info!(target: "pandad::health", "safety handshake finished: {ok}");
        running.store(false, Ordering::Release);
    });
}

/// Runs the 2Hz telemetry loop until shutdown or fleet loss.
pub fn run_health_loop(
    fleet: Arc<Fleet>,
    bus: Arc<dyn Bus>,
    params: Arc<dyn ParamStore>,
    factory: Arc<dyn GatewayFactory>,
    sensors: Arc<dyn HostSensors>,
    state: SharedState,
    spoof_ignition: bool,
) {
    let mut controls_sub = bus.subscribe(topic::CONTROLS_STATE);
    let handshake_running = Arc::new(AtomicBool::new(false));
    // Seeded false, not the current `IsOnroad` value: a daemon that starts
    // already-onroad must still treat its first read as a rising edge and
    // launch the safety handshake.
    let mut onroad_was = false;
    let known_serials = fleet.serials();

    loop {
        if state.shutdown_requested() {
            break;
        }
        let tick_start = Instant::now();

        publish_peripheral_state(bus.as_ref(), &fleet, sensors.as_ref());

        let mut per_gateway = Vec::with_capacity(fleet.len());
        let mut aborted = false;
        for gw in fleet.iter() {
            match fetch_gateway_state(gw, spoof_ignition) {
                Some(snap) => per_gateway.push((gw, snap)),
                None => {
                    aborted = true;
                    break;
                }
            }
        }

        if aborted {
            trace::health().record(HealthTrace::TickAborted);
            thread::sleep(tick_sleep(tick_start));
            continue;
        }

        let ignition = per_gateway
            .iter()
            .any(|(_, s)| s.health.ignition_line || s.health.ignition_can);
        if ignition != state.ignition() {
            trace::health().record(HealthTrace::IgnitionEdge { now: ignition });
        }
        state.set_ignition(ignition);

        let gps_active = state.gps_active();
        let mut comms_healthy = true;
        let mut states = Vec::with_capacity(per_gateway.len());
        for (gw, snap) in &per_gateway {
            apply_derived_rules(*gw, snap, gps_active, ignition);
            comms_healthy &= gw.comms_healthy();
            states.push(snap.clone());
        }

        bus.publish(
            topic::PANDA_STATES,
            Message::PandaStates(PandaStatesMsg { valid: comms_healthy, states }),
        );

        if !ignition {
            if !fleet.all_connected() {
                warn!(target: "pandad::health", "a gateway disconnected while offroad");
                state.request_shutdown();
            } else if let Ok(present) = factory.list(true) {
                let new_arrival = present.iter().any(|d| !known_serials.contains(&d.serial));
                if new_arrival {
                    warn!(target: "pandad::health", "new gateway detected while offroad, restarting");
                    trace::health().record(HealthTrace::NewGatewayOffroad);
                    state.request_shutdown();
                }
            }
        }

        let onroad_now = params.get_bool(key::IS_ONROAD);
        if is_onroad_rising_edge(onroad_now, onroad_was) {
            maybe_launch_handshake(&fleet, &params, &state, &handshake_running);
        }
        onroad_was = onroad_now;

        send_heartbeats(&fleet, controls_sub.as_mut());

        thread::sleep(tick_sleep(tick_start));
    }
}

fn tick_sleep(tick_start: Instant) -> Duration {
    let elapsed = tick_start.elapsed();
    TICK_PERIOD.saturating_sub(elapsed)
}

/// `onroad_was` is seeded `false` regardless of `IsOnroad`'s value at
/// startup (see `run_health_loop`), so a daemon that starts already-onroad
/// still treats its first read as a rising edge.
fn is_onroad_rising_edge(onroad_now: bool, onroad_was: bool) -> bool {
    onroad_now && !onroad_was
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::params::FakeParamStore;
    use crate::platform::NullHostSensors;
    use gateway_api::fake::{FakeFactory, FakeGateway};
    use gateway_api::HwType;

    fn arc_fleet(gateways: Vec<FakeGateway>) -> Arc<Fleet> {
        Arc::new(Fleet::for_test(
            gateways.into_iter().map(|g| Box::new(g) as Box<dyn Gateway>).collect(),
        ))
    }

    #[test]
    fn silent_safety_model_is_switched_to_no_output() {
        let gw = FakeGateway::new("A", HwType::Internal, 0);
        let snap = PandaState { health: gateway_api::GatewayHealth::default(), can_health: vec![] };
        apply_derived_rules(&gw, &snap, false, true);
        assert_eq!(gw.safety.lock().unwrap().0, SafetyModel::NoOutput);
    }

    #[test]
    fn offroad_without_gps_converges_to_power_saving() {
        let gw = FakeGateway::new("A", HwType::Internal, 0);
        let mut health = gateway_api::GatewayHealth::default();
        health.safety_model = SafetyModel::NoOutput;
        health.power_save_enabled = false;
        let snap = PandaState { health, can_health: vec![] };
        apply_derived_rules(&gw, &snap, false, false);
        assert!(gw.power_saving.load(Ordering::Relaxed));
    }

    #[test]
    fn health_loop_publishes_panda_states_then_stops_on_shutdown() {
        let gw = FakeGateway::new("A", HwType::Internal, 0);
        let fleet = arc_fleet(vec![gw]);
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let params: Arc<dyn ParamStore> = Arc::new(FakeParamStore::new());
        let factory: Arc<dyn GatewayFactory> =
            Arc::new(FakeFactory::new(vec![], |s, p| FakeGateway::new(s, HwType::Internal, p)));
        let sensors: Arc<dyn HostSensors> = Arc::new(NullHostSensors);
        let state = SharedState::new();

        let mut sub = bus.subscribe(topic::PANDA_STATES);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                std::thread::sleep(Duration::from_millis(700));
                state.request_shutdown();
            });
            run_health_loop(fleet, bus.clone(), params, factory, sensors, state.clone(), false);
        });

        let msg = sub.recv_timeout(Duration::from_millis(50));
        assert!(matches!(msg, Some(Message::PandaStates(PandaStatesMsg { valid: true, .. }))));
    }

    #[test]
    fn first_tick_of_an_already_onroad_param_is_a_rising_edge() {
        // SPEC_FULL §8 scenario 1: IsOnroad is already true before the
        // health loop's first tick; `onroad_was` is seeded `false`
        // (not read from the param store), so this must still launch.
        assert!(is_onroad_rising_edge(true, false));
    }

    #[test]
    fn steady_state_onroad_does_not_relaunch_every_tick() {
        assert!(!is_onroad_rising_edge(true, true));
    }

    #[test]
    fn offroad_is_never_a_rising_edge() {
        assert!(!is_onroad_rising_edge(false, false));
        assert!(!is_onroad_rising_edge(false, true));
    }
}
