//! Enumerates, orders, and opens the gateway fleet. Owns every opened
//! handle for the life of the process; activities only ever borrow it.

use std::time::Duration;

use gateway_api::{DiscoveredGateway, Gateway, GatewayFactory, HwType};
use log::{info, warn};

use crate::bus::{topic, Bus, Message, PandaStatesMsg, PeripheralStateMsg};
use crate::rtc;
use crate::state::SharedState;
use crate::trace::{self, FleetTrace};

const OPEN_RETRY_PERIOD: Duration = Duration::from_millis(500);

/// The opened, ordered gateway fleet. Built once by [`open_fleet`]; never
/// mutated again until every long-lived activity has joined.
pub struct Fleet {
    gateways: Vec<Box<dyn Gateway>>,
}

impl Fleet {
    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Gateway> {
        self.gateways.iter().map(|g| g.as_ref())
    }

    pub fn get(&self, position: usize) -> Option<&dyn Gateway> {
        self.gateways.get(position).map(|g| g.as_ref())
    }

    /// The gateway peripheral commands (fan, IR, RTC-to-gateway, GPS) are
    /// sent to: fleet position 0. Per the open question recorded in
    /// DESIGN.md, this is additionally gated by the caller on
    /// `HwType::has_peripherals`/`has_gps` rather than assumed unconditionally.
    pub fn peripheral_gateway(&self) -> Option<&dyn Gateway> {
        self.gateways.first().map(|g| g.as_ref())
    }

    pub fn all_connected(&self) -> bool {
        self.gateways.iter().all(|g| g.connected())
    }

    pub fn serials(&self) -> Vec<String> {
        self.gateways.iter().map(|g| g.serial().to_string()).collect()
    }

    /// Builds a [`Fleet`] directly from already-opened handles, bypassing
    /// enumeration/open entirely. Only meant for other modules' unit tests.
    #[cfg(test)]
    pub fn for_test(gateways: Vec<Box<dyn Gateway>>) -> Self {
        Fleet { gateways }
    }
}

/// Orders auto-enumerated gateways: internal device first, then by
/// hardware-type declaration order, then serial lexicographically.
fn order_discovered(mut discovered: Vec<DiscoveredGateway>) -> Vec<DiscoveredGateway> {
    discovered.sort_by(|a, b| {
        let a_internal = a.hw_type == HwType::Internal;
        let b_internal = b.hw_type == HwType::Internal;
        match (a_internal, b_internal) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.hw_type.cmp(&b.hw_type).then_with(|| a.serial.cmp(&b.serial)),
        }
    });
    discovered
}

fn publish_empty(bus: &dyn Bus) {
    bus.publish(
        topic::PANDA_STATES,
        Message::PandaStates(PandaStatesMsg { valid: false, states: Vec::new() }),
    );
    bus.publish(
        topic::PERIPHERAL_STATE,
        Message::PeripheralState(PeripheralStateMsg {
            voltage_mv: 0,
            current_ma: 0,
            fan_speed_rpm: 0,
            hw_type: HwType::Unknown,
        }),
    );
}

/// Enumerates (if `required_serials` is empty) or uses the given serials,
/// then opens each in order, assigning fleet positions `0..n`. A failed
/// open retries the same slot forever (until shutdown) every 500ms,
/// publishing one empty `pandaStates`/`peripheralState` pair per attempt.
///
/// Returns `None` only when auto-enumeration finds nothing to open at all
/// (a clean exit); a non-empty required-serials list retries indefinitely
/// instead of giving up.
pub fn open_fleet(
    factory: &dyn GatewayFactory,
    required_serials: &[String],
    bus: &dyn Bus,
    state: &SharedState,
) -> Option<Fleet> {
    let planned: Vec<String> = if !required_serials.is_empty() {
        required_serials.to_vec()
    } else {
        let discovered = factory.list(false).unwrap_or_default();
        if discovered.is_empty() {
            warn!(target: "pandad::fleet", "no gateways found, exiting");
            return None;
        }
        order_discovered(discovered).into_iter().map(|d| d.serial).collect()
    };

    info!(target: "pandad::fleet", "attempting to connect to {} gateway(s)", planned.len());

    let mut gateways: Vec<Box<dyn Gateway>> = Vec::with_capacity(planned.len());
    let mut i = 0;
    while i < planned.len() {
        if state.shutdown_requested() {
            return None;
        }
        match factory.open(&planned[i], i) {
            Ok(gw) => {
                info!(target: "pandad::fleet", "opened gateway {} at position {i}", gw.serial());
                trace::fleet().record(FleetTrace::Opened { position: i });
                if let Err(err) = rtc::sync_from_gateway(gw.as_ref()) {
                    warn!(target: "pandad::fleet", "rtc sync from gateway {} failed: {err}", gw.serial());
                }
                gateways.push(gw);
                i += 1;
            }
            Err(err) => {
                warn!(target: "pandad::fleet", "open failed for slot {i}: {err}, retrying in 500ms");
                trace::fleet().record(FleetTrace::OpenRetry { position: i });
                publish_empty(bus);
                std::thread::sleep(OPEN_RETRY_PERIOD);
            }
        }
    }

    info!(target: "pandad::fleet", "connected to {} gateway(s)", gateways.len());
    Some(Fleet { gateways })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use gateway_api::fake::{FakeFactory, FakeGateway};

    fn discovered(serial: &str, hw: HwType) -> DiscoveredGateway {
        DiscoveredGateway { serial: serial.to_string(), hw_type: hw }
    }

    #[test]
    fn orders_internal_first_then_by_type_then_serial() {
        let list = vec![
            discovered("B", HwType::GatewayStandard),
            discovered("A", HwType::GatewayStandard),
            discovered("Z", HwType::Internal),
            discovered("C", HwType::GatewayMini),
        ];
        let ordered = order_discovered(list);
        let serials: Vec<_> = ordered.iter().map(|d| d.serial.as_str()).collect();
        assert_eq!(serials, ["Z", "C", "A", "B"]);
    }

    #[test]
    fn empty_enumeration_returns_none() {
        let bus = InMemoryBus::new();
        let state = SharedState::new();
        let factory = FakeFactory::new(vec![], |s, p| FakeGateway::new(s, HwType::GatewayStandard, p));
        assert!(open_fleet(&factory, &[], &bus, &state).is_none());
    }

    #[test]
    fn opens_required_serials_in_order_with_positions() {
        let bus = InMemoryBus::new();
        let state = SharedState::new();
        let factory = FakeFactory::new(
            vec![discovered("A", HwType::Internal), discovered("B", HwType::GatewayStandard)],
            |s, p| FakeGateway::new(s, HwType::GatewayStandard, p),
        );
        let fleet = open_fleet(&factory, &["A".into(), "B".into()], &bus, &state).unwrap();
        assert_eq!(fleet.len(), 2);
        assert_eq!(fleet.get(0).unwrap().serial(), "A");
        assert_eq!(fleet.get(1).unwrap().base_bus(), 4);
    }

    #[test]
    fn bases_are_contiguous_across_a_larger_fleet() {
        let bus = InMemoryBus::new();
        let state = SharedState::new();
        let serials = ["A", "B", "C", "D"];
        let factory = FakeFactory::new(
            serials.iter().map(|s| discovered(s, HwType::GatewayStandard)).collect(),
            |s, p| FakeGateway::new(s, HwType::GatewayStandard, p),
        );
        let required: Vec<String> = serials.iter().map(|s| s.to_string()).collect();
        let fleet = open_fleet(&factory, &required, &bus, &state).unwrap();
        for (i, gw) in fleet.iter().enumerate() {
            assert_eq!(gw.base_bus(), (i as u8) * 4);
        }
    }
}
