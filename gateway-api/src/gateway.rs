use crate::error::GatewayError;
use crate::types::{
    CanBusHealth, CanFrame, DiscoveredGateway, GatewayHealth, HwType, RtcTime, SafetyModel,
    UsbPowerMode,
};

/// One opened, physical gateway device.
///
/// Implementations serialize their own transport internally: every method
/// here is a blocking call that is safe to invoke concurrently from more
/// than one thread, since the fleet manager, health loop, CAN loops, and
/// peripheral controller all hold the same handle.
pub trait Gateway: Send + Sync {
    /// Stable device serial, assigned at manufacture, used as the fleet's
    /// external identifier.
    fn serial(&self) -> &str;

    fn hw_type(&self) -> HwType;

    /// 0-based slot in the fleet, assigned at open time and immutable for
    /// the handle's lifetime.
    fn position(&self) -> usize;

    /// `position * 4`. Added to a locally-reported bus index before a frame
    /// leaves this handle.
    fn base_bus(&self) -> u8 {
        (self.position() as u8) * 4
    }

    fn has_rtc(&self) -> bool;
    fn has_gps(&self) -> bool;

    /// Cheap liveness check; does not round-trip to the device.
    fn connected(&self) -> bool;

    /// Whether the most recent transport-level exchange succeeded.
    fn comms_healthy(&self) -> bool;

    fn get_health(&self) -> Result<GatewayHealth, GatewayError>;
    fn get_can_health(&self, bus_index: u8) -> Result<CanBusHealth, GatewayError>;

    fn can_send(&self, frames: &[CanFrame]) -> Result<(), GatewayError>;

    /// Appends any frames available since the last call onto `out`; returns
    /// whether the exchange itself succeeded (distinct from whether any
    /// frames were appended).
    fn can_receive(&self, out: &mut Vec<CanFrame>) -> Result<bool, GatewayError>;

    fn set_safety_model(&self, model: SafetyModel, param: i16) -> Result<(), GatewayError>;
    fn set_alternative_experience(&self, mask: u16) -> Result<(), GatewayError>;
    fn set_power_saving(&self, enabled: bool) -> Result<(), GatewayError>;

    fn set_fan_speed(&self, percent: u8) -> Result<(), GatewayError>;
    fn get_fan_speed(&self) -> Result<u16, GatewayError>;

    /// `percent` in `[0.0, 1.0]`.
    fn set_ir_power(&self, percent: f32) -> Result<(), GatewayError>;

    fn set_loopback(&self, enabled: bool) -> Result<(), GatewayError>;

    fn get_rtc(&self) -> Result<RtcTime, GatewayError>;
    fn set_rtc(&self, time: RtcTime) -> Result<(), GatewayError>;

    fn send_heartbeat(&self, engaged: bool) -> Result<(), GatewayError>;
    fn set_usb_power_mode(&self, mode: UsbPowerMode) -> Result<(), GatewayError>;

    fn recv_gps_raw(&self) -> Result<Vec<u8>, GatewayError>;
    fn gps_init(&self) -> Result<(), GatewayError>;
    fn gps_stop(&self) -> Result<(), GatewayError>;
    fn gps_set_power(&self, on: bool) -> Result<(), GatewayError>;
}

/// Enumerates and opens gateways over a concrete transport (USB, or a test
/// double). Kept separate from [`Gateway`] because listing and opening are
/// fleet-wide operations with no device handle yet to dispatch through.
pub trait GatewayFactory: Send + Sync {
    fn list(&self, include_disconnected: bool) -> Result<Vec<DiscoveredGateway>, GatewayError>;

    /// Opens `serial` and assigns it `position` (from which `base_bus` is
    /// derived). Returns a boxed trait object so callers can hold a fleet of
    /// mixed concrete handle types uniformly.
    fn open(&self, serial: &str, position: usize) -> Result<Box<dyn Gateway>, GatewayError>;
}
