//! Fan speed, IR illumination, charging mode, and RTC drift correction
//! (SPEC_FULL §4.5). Runs as its own activity juggling three independent
//! cadences — the main 2Hz tick, a 50s defensive command refresh, and a 60s
//! RTC-sync check — via a [`Multitimer`] instead of tick-counter modulus
//! arithmetic.

use std::time::{Duration, Instant};

use enum_map::Enum;
use log::debug;
use multitimer::{Multitimer, Repeat};

use gateway_api::{Gateway, UsbPowerMode};

use crate::bus::{topic, Bus, DeviceStateMsg, DriverCameraStateMsg, Message};
use crate::fleet::Fleet;
use crate::rtc;
use crate::state::SharedState;

const TICK_PERIOD: Duration = Duration::from_millis(500);
/// "Every 100 ticks" in the spec, expressed as wall-clock time instead of a
/// tick count.
const REFRESH_PERIOD: Duration = Duration::from_millis(500 * 100);
const RTC_SYNC_PERIOD: Duration = Duration::from_secs(60);
const FRONT_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

const IR_FILTER_TAU_S: f32 = 30.0;
const IR_FILTER_DT_S: f32 = 0.05;
const IR_CUTOFF_IL: f32 = 400.0;
const IR_SATURATE_IL: f32 = 1000.0;
const MIN_IR_POWER: f32 = 0.0;
const MAX_IR_POWER: f32 = 0.5;
const IR_REFRESH_THRESHOLD: f32 = 0.5;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Enum)]
enum PeripheralTimer {
    Tick,
    Refresh,
    RtcSync,
}

fn ir_filter_alpha() -> f32 {
    IR_FILTER_DT_S / (IR_FILTER_TAU_S + IR_FILTER_DT_S)
}

fn low_pass(prev: f32, sample: f32) -> f32 {
    let alpha = ir_filter_alpha();
    alpha * sample + (1.0 - alpha) * prev
}

/// Piecewise-linear ramp from [`MIN_IR_POWER`] below [`IR_CUTOFF_IL`] to
/// [`MAX_IR_POWER`] at or above [`IR_SATURATE_IL`].
fn ir_power_for(integ_lines: f32) -> f32 {
    if integ_lines <= IR_CUTOFF_IL {
        MIN_IR_POWER
    } else if integ_lines >= IR_SATURATE_IL {
        MAX_IR_POWER
    } else {
        let frac = (integ_lines - IR_CUTOFF_IL) / (IR_SATURATE_IL - IR_CUTOFF_IL);
        MIN_IR_POWER + frac * (MAX_IR_POWER - MIN_IR_POWER)
    }
}

struct LoopState {
    prev_fan_percent: u8,
    prev_charging_disabled: bool,
    prev_ir_power: f32,
    filtered_integ_lines: f32,
    last_front_frame: Option<Instant>,
}

impl LoopState {
    fn new() -> Self {
        LoopState {
            prev_fan_percent: 0,
            prev_charging_disabled: false,
            prev_ir_power: 0.0,
            filtered_integ_lines: 0.0,
            last_front_frame: None,
        }
    }
}

fn handle_device_state(
    gw: &dyn Gateway,
    msg: &DeviceStateMsg,
    s: &mut LoopState,
    fan_control_enabled: bool,
    due_for_refresh: bool,
) {
    if fan_control_enabled && gw.hw_type().has_peripherals() {
        if msg.fan_speed_percent_desired != s.prev_fan_percent || due_for_refresh {
            if gw.set_fan_speed(msg.fan_speed_percent_desired).is_ok() {
                s.prev_fan_percent = msg.fan_speed_percent_desired;
            }
        }
    }

    if gw.hw_type().has_usb_power_control() && msg.charging_disabled != s.prev_charging_disabled {
        let mode = if msg.charging_disabled { UsbPowerMode::ClientOnly } else { UsbPowerMode::Cdp };
        if gw.set_usb_power_mode(mode).is_ok() {
            s.prev_charging_disabled = msg.charging_disabled;
        }
    }
}

fn handle_driver_camera_state(msg: &DriverCameraStateMsg, s: &mut LoopState) {
    s.filtered_integ_lines = low_pass(s.filtered_integ_lines, msg.integ_lines);
    s.last_front_frame = Some(Instant::now());
}

fn command_ir_power(gw: &dyn Gateway, s: &mut LoopState, due_for_refresh: bool) {
    if !gw.hw_type().has_peripherals() {
        return;
    }

    let timed_out = s.last_front_frame.map_or(true, |t| t.elapsed() >= FRONT_FRAME_TIMEOUT);
    let target = if timed_out { 0.0 } else { ir_power_for(s.filtered_integ_lines) };

    let above_defensive_threshold = target >= IR_REFRESH_THRESHOLD;
    if target != s.prev_ir_power || due_for_refresh || above_defensive_threshold {
        if gw.set_ir_power(target).is_ok() {
            s.prev_ir_power = target;
        }
    }
}

/// Runs the peripheral controller against fleet position 0 until shutdown
/// or disconnection. A gateway lacking fan/IR hardware silently skips those
/// commands rather than receiving nonsensical ones (see DESIGN.md).
pub fn run_peripheral_controller(fleet: &Fleet, bus: &dyn Bus, state: &SharedState, fan_control_enabled: bool) {
    let Some(gw) = fleet.peripheral_gateway() else {
        return;
    };

    let mut device_sub = bus.subscribe(topic::DEVICE_STATE);
    let mut camera_sub = bus.subscribe(topic::DRIVER_CAMERA_STATE);
    let mut s = LoopState::new();

    let mut timers: Multitimer<PeripheralTimer> = Multitimer::new();
    timers.set_timer_in(PeripheralTimer::Tick, TICK_PERIOD, Some(Repeat::AfterDeadline(TICK_PERIOD)));
    timers.set_timer_in(PeripheralTimer::Refresh, REFRESH_PERIOD, Some(Repeat::AfterDeadline(REFRESH_PERIOD)));
    timers.set_timer_in(PeripheralTimer::RtcSync, RTC_SYNC_PERIOD, Some(Repeat::AfterDeadline(RTC_SYNC_PERIOD)));

    loop {
        if state.shutdown_requested() || !gw.connected() {
            break;
        }

        if let Some(deadline) = timers.next_deadline() {
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
        }
        timers.poll_now();

        let mut due_for_refresh = false;
        let mut rtc_sync_due = false;
        for fired in timers.iter_fired() {
            match fired {
                PeripheralTimer::Tick => {}
                PeripheralTimer::Refresh => due_for_refresh = true,
                PeripheralTimer::RtcSync => rtc_sync_due = true,
            }
        }

        if let Some(Message::DeviceState(msg)) = device_sub.try_latest() {
            handle_device_state(gw, &msg, &mut s, fan_control_enabled, due_for_refresh);
        }
        if let Some(Message::DriverCameraState(msg)) = camera_sub.try_latest() {
            handle_driver_camera_state(&msg, &mut s);
        }
        command_ir_power(gw, &mut s, due_for_refresh);

        if rtc_sync_due && !state.ignition() {
            if let Err(err) = rtc::sync_to_gateway(gw) {
                debug!(target: "pandad::peripheral", "rtc sync skipped: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ir_power_is_zero_at_and_below_cutoff() {
        assert_eq!(ir_power_for(0.0), MIN_IR_POWER);
        assert_eq!(ir_power_for(IR_CUTOFF_IL), MIN_IR_POWER);
    }

    #[test]
    fn ir_power_saturates_at_max() {
        assert_eq!(ir_power_for(IR_SATURATE_IL), MAX_IR_POWER);
        assert_eq!(ir_power_for(5000.0), MAX_IR_POWER);
    }

    #[test]
    fn ir_power_is_monotonic_non_decreasing_across_the_ramp() {
        let samples = [0.0, 399.0, 400.0, 500.0, 700.0, 999.0, 1000.0, 1001.0];
        let mut prev = f32::MIN;
        for il in samples {
            let p = ir_power_for(il);
            assert!(p >= prev, "ir power decreased at {il}");
            prev = p;
        }
    }

    #[test]
    fn midpoint_of_the_ramp_is_the_midpoint_of_the_range() {
        let mid_il = (IR_CUTOFF_IL + IR_SATURATE_IL) / 2.0;
        let expected = (MIN_IR_POWER + MAX_IR_POWER) / 2.0;
        assert!((ir_power_for(mid_il) - expected).abs() < 1e-6);
    }

    #[test]
    fn low_pass_filter_moves_toward_the_sample_without_overshoot() {
        let mut value = 0.0;
        for _ in 0..1000 {
            value = low_pass(value, 1000.0);
        }
        assert!((value - 1000.0).abs() < 1.0);
    }

    #[test]
    fn stale_front_frame_forces_ir_power_to_zero() {
        let mut s = LoopState::new();
        s.filtered_integ_lines = 1200.0;
        s.last_front_frame = Some(Instant::now() - Duration::from_millis(1500));

        let gw = gateway_api::fake::FakeGateway::new("A", gateway_api::HwType::Internal, 0);
        command_ir_power(&gw, &mut s, false);

        assert_eq!(*gw.ir_power.lock().unwrap(), 0.0);
    }

    #[test]
    fn fan_is_not_commanded_on_hardware_without_peripherals() {
        let gw = gateway_api::fake::FakeGateway::new("A", gateway_api::HwType::GatewayStandard, 1);
        let mut s = LoopState::new();
        let msg = DeviceStateMsg { fan_speed_percent_desired: 80, charging_disabled: false };
        handle_device_state(&gw, &msg, &mut s, true, false);
        assert_eq!(*gw.fan_percent.lock().unwrap(), 0);
    }

    #[test]
    fn fan_is_commanded_on_change_for_capable_hardware() {
        let gw = gateway_api::fake::FakeGateway::new("A", gateway_api::HwType::Internal, 0);
        let mut s = LoopState::new();
        let msg = DeviceStateMsg { fan_speed_percent_desired: 80, charging_disabled: false };
        handle_device_state(&gw, &msg, &mut s, true, false);
        assert_eq!(*gw.fan_percent.lock().unwrap(), 80);
        assert_eq!(s.prev_fan_percent, 80);
    }

    #[test]
    fn fan_is_recommanded_on_refresh_even_without_a_change() {
        let gw = gateway_api::fake::FakeGateway::new("A", gateway_api::HwType::Internal, 0);
        let mut s = LoopState::new();
        s.prev_fan_percent = 40;
        let msg = DeviceStateMsg { fan_speed_percent_desired: 40, charging_disabled: false };
        handle_device_state(&gw, &msg, &mut s, true, true);
        assert_eq!(*gw.fan_percent.lock().unwrap(), 40);
    }

    #[test]
    fn charging_disabled_maps_to_client_only_usb_power_mode() {
        let gw = gateway_api::fake::FakeGateway::new("A", gateway_api::HwType::Internal, 0);
        let mut s = LoopState::new();
        let msg = DeviceStateMsg { fan_speed_percent_desired: 0, charging_disabled: true };
        handle_device_state(&gw, &msg, &mut s, true, false);
        assert_eq!(*gw.usb_power_mode.lock().unwrap(), gateway_api::UsbPowerMode::ClientOnly);
    }

    #[test]
    fn peripheral_controller_runs_until_shutdown_without_a_gateway() {
        let fleet = Fleet::for_test(vec![]);
        let bus = crate::bus::InMemoryBus::new();
        let state = SharedState::new();
        // No fleet position 0 at all: returns immediately rather than
        // blocking forever on subscriptions for a gateway that doesn't exist.
        run_peripheral_controller(&fleet, &bus, &state, true);
    }
}
