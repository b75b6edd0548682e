//! In-memory stand-ins for [`crate::Gateway`] and [`crate::GatewayFactory`],
//! so the fleet manager, health loop, and safety handshake can be exercised
//! in tests without any USB hardware.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::SystemTime;

use crate::error::GatewayError;
use crate::gateway::{Gateway, GatewayFactory};
use crate::types::{
    CanBusHealth, CanFrame, DiscoveredGateway, GatewayHealth, HwType, SafetyModel, UsbPowerMode,
};

/// A scripted gateway handle. Every field a test wants to observe or drive
/// is reachable directly; there is no hidden state.
pub struct FakeGateway {
    serial: String,
    hw_type: HwType,
    position: usize,
    has_rtc: bool,
    has_gps: bool,
    connected: AtomicBool,
    comms_healthy: AtomicBool,
    health: RwLock<GatewayHealth>,
    can_health: RwLock<[CanBusHealth; 4]>,
    rtc: Mutex<SystemTime>,
    fan_rpm: AtomicU16,
    pub sent_frames: Mutex<Vec<CanFrame>>,
    pub recv_frames: Mutex<Vec<CanFrame>>,
    pub ir_power: Mutex<f32>,
    pub fan_percent: Mutex<u8>,
    pub safety: Mutex<(SafetyModel, i16)>,
    pub alternative_experience: Mutex<u16>,
    pub power_saving: AtomicBool,
    pub loopback: AtomicBool,
    pub usb_power_mode: Mutex<UsbPowerMode>,
    pub heartbeats: Mutex<Vec<bool>>,
    pub gps_bytes: Mutex<Vec<u8>>,
    pub gps_powered: AtomicBool,
}

impl FakeGateway {
    pub fn new(serial: impl Into<String>, hw_type: HwType, position: usize) -> Self {
        FakeGateway {
            serial: serial.into(),
            hw_type,
            position,
            has_rtc: false,
            has_gps: false,
            connected: AtomicBool::new(true),
            comms_healthy: AtomicBool::new(true),
            health: RwLock::new(GatewayHealth::default()),
            can_health: RwLock::new([
                CanBusHealth::default(),
                CanBusHealth::default(),
                CanBusHealth::default(),
                CanBusHealth::default(),
            ]),
            rtc: Mutex::new(SystemTime::UNIX_EPOCH),
            fan_rpm: AtomicU16::new(0),
            sent_frames: Mutex::new(Vec::new()),
            recv_frames: Mutex::new(Vec::new()),
            ir_power: Mutex::new(0.0),
            fan_percent: Mutex::new(0),
            safety: Mutex::new((SafetyModel::Silent, 0)),
            alternative_experience: Mutex::new(0),
            power_saving: AtomicBool::new(false),
            loopback: AtomicBool::new(false),
            usb_power_mode: Mutex::new(UsbPowerMode::ClientOnly),
            heartbeats: Mutex::new(Vec::new()),
            gps_bytes: Mutex::new(Vec::new()),
            gps_powered: AtomicBool::new(false),
        }
    }

    pub fn with_rtc(mut self) -> Self {
        self.has_rtc = true;
        self
    }

    pub fn with_gps(mut self) -> Self {
        self.has_gps = true;
        self
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn set_comms_healthy(&self, healthy: bool) {
        self.comms_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn set_health(&self, health: GatewayHealth) {
        *self.health.write().unwrap() = health;
    }

    pub fn set_can_health(&self, bus: usize, health: CanBusHealth) {
        self.can_health.write().unwrap()[bus] = health;
    }

    pub fn queue_receive(&self, frames: Vec<CanFrame>) {
        self.recv_frames.lock().unwrap().extend(frames);
    }

    pub fn set_fan_rpm(&self, rpm: u16) {
        self.fan_rpm.store(rpm, Ordering::Relaxed);
    }

    pub fn queue_gps_bytes(&self, bytes: &[u8]) {
        self.gps_bytes.lock().unwrap().extend_from_slice(bytes);
    }

    fn err_if_gone(&self) -> Result<(), GatewayError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(GatewayError::Disconnected { serial: self.serial.clone() });
        }
        Ok(())
    }
}

impl Gateway for FakeGateway {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn hw_type(&self) -> HwType {
        self.hw_type
    }

    fn position(&self) -> usize {
        self.position
    }

    fn has_rtc(&self) -> bool {
        self.has_rtc
    }

    fn has_gps(&self) -> bool {
        self.has_gps
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn comms_healthy(&self) -> bool {
        self.comms_healthy.load(Ordering::Relaxed)
    }

    fn get_health(&self) -> Result<GatewayHealth, GatewayError> {
        self.err_if_gone()?;
        if !self.comms_healthy.load(Ordering::Relaxed) {
            return Err(GatewayError::NoResponse { serial: self.serial.clone() });
        }
        Ok(*self.health.read().unwrap())
    }

    fn get_can_health(&self, bus_index: u8) -> Result<CanBusHealth, GatewayError> {
        self.err_if_gone()?;
        Ok(self.can_health.read().unwrap()[bus_index as usize % 4])
    }

    fn can_send(&self, frames: &[CanFrame]) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        self.sent_frames.lock().unwrap().extend_from_slice(frames);
        Ok(())
    }

    fn can_receive(&self, out: &mut Vec<CanFrame>) -> Result<bool, GatewayError> {
        self.err_if_gone()?;
        out.extend(self.recv_frames.lock().unwrap().drain(..));
        Ok(self.comms_healthy.load(Ordering::Relaxed))
    }

    fn set_safety_model(&self, model: SafetyModel, param: i16) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        *self.safety.lock().unwrap() = (model, param);
        Ok(())
    }

    fn set_alternative_experience(&self, mask: u16) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        *self.alternative_experience.lock().unwrap() = mask;
        Ok(())
    }

    fn set_power_saving(&self, enabled: bool) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        self.power_saving.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    fn set_fan_speed(&self, percent: u8) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        *self.fan_percent.lock().unwrap() = percent;
        Ok(())
    }

    fn get_fan_speed(&self) -> Result<u16, GatewayError> {
        self.err_if_gone()?;
        Ok(self.fan_rpm.load(Ordering::Relaxed))
    }

    fn set_ir_power(&self, percent: f32) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        *self.ir_power.lock().unwrap() = percent;
        Ok(())
    }

    fn set_loopback(&self, enabled: bool) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        self.loopback.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    fn get_rtc(&self) -> Result<SystemTime, GatewayError> {
        self.err_if_gone()?;
        Ok(*self.rtc.lock().unwrap())
    }

    fn set_rtc(&self, time: SystemTime) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        *self.rtc.lock().unwrap() = time;
        Ok(())
    }

    fn send_heartbeat(&self, engaged: bool) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        self.heartbeats.lock().unwrap().push(engaged);
        Ok(())
    }

    fn set_usb_power_mode(&self, mode: UsbPowerMode) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        *self.usb_power_mode.lock().unwrap() = mode;
        Ok(())
    }

    fn recv_gps_raw(&self) -> Result<Vec<u8>, GatewayError> {
        self.err_if_gone()?;
        Ok(std::mem::take(&mut self.gps_bytes.lock().unwrap()))
    }

    fn gps_init(&self) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        self.gps_powered.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn gps_stop(&self) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        self.gps_powered.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn gps_set_power(&self, on: bool) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        self.gps_powered.store(on, Ordering::Relaxed);
        Ok(())
    }
}

/// A [`GatewayFactory`] backed by a fixed, pre-scripted list of serials.
/// `open` hands back a fresh [`FakeGateway`] built by the supplied closure,
/// matching the real fleet manager's "never re-opened in place" contract.
pub struct FakeFactory<F> {
    available: Mutex<Vec<DiscoveredGateway>>,
    build: F,
}

impl<F> FakeFactory<F>
where
    F: Fn(&str, usize) -> FakeGateway + Send + Sync,
{
    pub fn new(available: Vec<DiscoveredGateway>, build: F) -> Self {
        FakeFactory { available: Mutex::new(available), build }
    }

    pub fn push_discovered(&self, gateway: DiscoveredGateway) {
        self.available.lock().unwrap().push(gateway);
    }
}

impl<F> GatewayFactory for FakeFactory<F>
where
    F: Fn(&str, usize) -> FakeGateway + Send + Sync,
{
    fn list(&self, _include_disconnected: bool) -> Result<Vec<DiscoveredGateway>, GatewayError> {
        Ok(self.available.lock().unwrap().clone())
    }

    fn open(&self, serial: &str, position: usize) -> Result<Box<dyn Gateway>, GatewayError> {
        if !self.available.lock().unwrap().iter().any(|d| d.serial == serial) {
            return Err(GatewayError::OpenFailed(format!("unknown serial {serial}")));
        }
        Ok(Box::new((self.build)(serial, position)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_gateway_is_connected_and_healthy() {
        let gw = FakeGateway::new("ABC123", HwType::GatewayStandard, 0);
        assert!(gw.connected());
        assert!(gw.comms_healthy());
        assert_eq!(gw.get_health().unwrap(), GatewayHealth::default());
    }

    #[test]
    fn disconnection_surfaces_on_every_call() {
        let gw = FakeGateway::new("ABC123", HwType::GatewayStandard, 0);
        gw.set_connected(false);
        let err = gw.get_health().unwrap_err();
        assert!(err.is_disconnection());
    }

    #[test]
    fn can_receive_drains_queued_frames_in_order() {
        let gw = FakeGateway::new("ABC123", HwType::GatewayStandard, 0);
        gw.queue_receive(vec![CanFrame::new(0x100, 0, &[1, 2, 3]), CanFrame::new(0x200, 0, &[4])]);
        let mut out = Vec::new();
        let healthy = gw.can_receive(&mut out).unwrap();
        assert!(healthy);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].address, 0x100);
        assert_eq!(out[1].address, 0x200);
    }

    #[test]
    fn factory_open_rejects_unknown_serial() {
        let factory = FakeFactory::new(vec![], |s, p| FakeGateway::new(s, HwType::GatewayStandard, p));
        assert!(factory.open("nope", 0).is_err());
    }

    #[test]
    fn factory_open_succeeds_for_listed_serial() {
        let factory = FakeFactory::new(
            vec![DiscoveredGateway { serial: "ABC123".into(), hw_type: HwType::Internal }],
            |s, p| FakeGateway::new(s, HwType::Internal, p),
        );
        let gw = factory.open("ABC123", 0).unwrap();
        assert_eq!(gw.serial(), "ABC123");
        assert_eq!(gw.base_bus(), 0);
    }
}
