//! The bidirectional CAN pipe: a strict 100 Hz receive loop with fan-in
//! across the fleet, and an event-driven send loop with a 1s staleness
//! gate (SPEC_FULL §4.3, §4.4).

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use gateway_api::CanFrame;

use crate::bus::{topic, Bus, CanMsg, Message};
use crate::fleet::Fleet;
use crate::state::SharedState;

const RECEIVE_PERIOD: Duration = Duration::from_millis(10);
const SEND_RECV_TIMEOUT: Duration = Duration::from_millis(100);
const STALENESS_CUTOFF: Duration = Duration::from_secs(1);

fn is_stale(age: Duration) -> bool {
    age >= STALENESS_CUTOFF
}

/// Drains every gateway at a strict 100Hz cadence and fans the result into
/// one `can` publish per tick. Overrun ticks log (gated on ignition to
/// reduce offroad noise) and snap the deadline forward instead of trying to
/// catch up, so a single slow tick never compounds into permanent drift.
pub fn run_can_receive_loop(fleet: &Fleet, bus: &dyn Bus, state: &SharedState) {
    let mut next_frame_time = Instant::now() + RECEIVE_PERIOD;
    let mut frames: Vec<CanFrame> = Vec::new();

    loop {
        if state.shutdown_requested() {
            break;
        }
        if !fleet.all_connected() {
            state.request_shutdown();
            break;
        }

        frames.clear();
        let mut comms_healthy = true;
        for gw in fleet.iter() {
            match gw.can_receive(&mut frames) {
                Ok(healthy) => comms_healthy &= healthy,
                Err(err) => {
                    comms_healthy = false;
                    if err.is_disconnection() {
                        state.request_shutdown();
                    }
                }
            }
        }

        let published = std::mem::take(&mut frames);
        bus.publish(topic::CAN, Message::Can(CanMsg { valid: comms_healthy, frames: published }));

        let now = Instant::now();
        if next_frame_time > now {
            thread::sleep(next_frame_time - now);
        } else {
            if state.ignition() {
                let missed =
                    ((now - next_frame_time).as_secs_f64() / RECEIVE_PERIOD.as_secs_f64()) as i64;
                warn!(target: "pandad::can_rx", "missed cycles ({missed})");
            }
            next_frame_time = now;
        }
        next_frame_time += RECEIVE_PERIOD;
    }
}

/// Subscribes to `sendcan` and fans outbound CAN batches to every gateway,
/// in fleet order, dropping anything older than [`STALENESS_CUTOFF`].
pub fn run_can_send_loop(fleet: &Fleet, bus: &dyn Bus, state: &SharedState, fake_send: bool) {
    let mut sub = bus.subscribe(topic::SENDCAN);

    loop {
        if state.shutdown_requested() {
            break;
        }
        if !fleet.all_connected() {
            state.request_shutdown();
            break;
        }

        let Some(Message::SendCan(batch)) = sub.recv_timeout(SEND_RECV_TIMEOUT) else {
            continue;
        };

        let age = batch.sent_at.elapsed();
        if is_stale(age) {
            error!(target: "pandad::can_tx", "sendcan too old to send: {:.2}s", age.as_secs_f64());
            continue;
        }
        if fake_send {
            debug!(target: "pandad::can_tx", "fake-send enabled, dropping sendcan batch");
            continue;
        }

        for gw in fleet.iter() {
            if let Err(err) = gw.can_send(&batch.frames) {
                if err.is_disconnection() {
                    state.request_shutdown();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{InMemoryBus, SendCanMsg};
    use gateway_api::fake::FakeGateway;
    use gateway_api::HwType;

    #[test]
    fn stale_batches_are_dropped_fresh_ones_are_not() {
        assert!(is_stale(Duration::from_millis(1200)));
        assert!(!is_stale(Duration::from_millis(300)));
    }

    #[test]
    fn receive_loop_publishes_one_can_message_per_tick_with_and_of_health_flags() {
        let healthy = FakeGateway::new("A", HwType::Internal, 0);
        let unhealthy = FakeGateway::new("B", HwType::GatewayStandard, 1);
        unhealthy.set_comms_healthy(false);
        let fleet = Fleet::for_test(vec![Box::new(healthy), Box::new(unhealthy)]);
        let bus = InMemoryBus::new();
        let state = SharedState::new();
        let mut sub = bus.subscribe(topic::CAN);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                // let a few 10ms ticks elapse before asking the loop to stop
                std::thread::sleep(Duration::from_millis(35));
                state.request_shutdown();
            });
            run_can_receive_loop(&fleet, &bus, &state);
        });

        let msg = sub.recv_timeout(Duration::from_millis(50));
        assert!(matches!(msg, Some(Message::Can(CanMsg { valid: false, .. }))));
    }

    #[test]
    fn stale_send_batch_never_reaches_a_gateway() {
        let gw = FakeGateway::new("A", HwType::Internal, 0);
        let fleet = Fleet::for_test(vec![Box::new(gw)]);
        let bus = InMemoryBus::new();
        let state = SharedState::new();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                // give `run_can_send_loop` time to subscribe before publishing,
                // since the in-memory bus only delivers to already-registered
                // subscribers.
                std::thread::sleep(Duration::from_millis(20));
                bus.publish(
                    topic::SENDCAN,
                    Message::SendCan(SendCanMsg {
                        sent_at: Instant::now() - Duration::from_millis(1200),
                        frames: vec![CanFrame::new(0x100, 0, &[1, 2, 3])],
                    }),
                );
                std::thread::sleep(Duration::from_millis(150));
                state.request_shutdown();
            });
            run_can_send_loop(&fleet, &bus, &state, false);
        });
    }
}
