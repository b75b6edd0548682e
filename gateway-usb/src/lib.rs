//! Concrete [`gateway_api::Gateway`]/[`gateway_api::GatewayFactory`]
//! implementation over USB, via `rusb`.

mod protocol;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arrayvec::ArrayVec;
use rusb::{Context, Device, DeviceHandle, UsbContext};

use gateway_api::{
    CanBusHealth, CanFrame, DiscoveredGateway, Gateway, GatewayError, GatewayFactory,
    GatewayHealth, HwType, SafetyModel, UsbPowerMode, MAX_FRAME_DATA,
};

use protocol::{Request, BULK_CAN_IN_EP, BULK_CAN_OUT_EP, BULK_GPS_IN_EP, BULK_TIMEOUT_MS,
    CONTROL_TIMEOUT_MS, PRODUCT_ID, VENDOR_ID};

fn classify(serial: &str, err: rusb::Error) -> GatewayError {
    match err {
        rusb::Error::Timeout => GatewayError::NoResponse { serial: serial.into() },
        rusb::Error::NoDevice | rusb::Error::Io | rusb::Error::Pipe => {
            GatewayError::Disconnected { serial: serial.into() }
        }
        other => GatewayError::Rejected { serial: serial.into(), reason: other.to_string() },
    }
}

/// One opened gateway, bound to a claimed USB interface.
pub struct UsbGateway {
    serial: String,
    hw_type: HwType,
    position: usize,
    has_rtc: bool,
    has_gps: bool,
    handle: DeviceHandle<Context>,
    connected: AtomicBool,
    comms_healthy: AtomicBool,
}

impl UsbGateway {
    fn control_out(&self, request: Request, value: u16, index: u16, data: &[u8]) -> Result<(), GatewayError> {
        self.handle
            .write_control(0x40, request as u8, value, index, data, Duration::from_millis(CONTROL_TIMEOUT_MS))
            .map(|_| ())
            .map_err(|e| self.observe(e))
    }

    fn control_in(&self, request: Request, value: u16, index: u16, buf: &mut [u8]) -> Result<usize, GatewayError> {
        self.handle
            .read_control(0xc0, request as u8, value, index, buf, Duration::from_millis(CONTROL_TIMEOUT_MS))
            .map_err(|e| self.observe(e))
    }

    fn observe(&self, err: rusb::Error) -> GatewayError {
        let classified = classify(&self.serial, err);
        if classified.is_disconnection() {
            self.connected.store(false, Ordering::Relaxed);
        }
        self.comms_healthy.store(!matches!(err, rusb::Error::Timeout), Ordering::Relaxed);
        classified
    }

    fn err_if_gone(&self) -> Result<(), GatewayError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(GatewayError::Disconnected { serial: self.serial.clone() });
        }
        Ok(())
    }
}

impl Gateway for UsbGateway {
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
        let mut buf = [0u8; 64];
        self.control_in(Request::GetHealth, 0, 0, &mut buf)?;
        Ok(decode_health(&buf))
    }

    fn get_can_health(&self, bus_index: u8) -> Result<CanBusHealth, GatewayError> {
        self.err_if_gone()?;
        let mut buf = [0u8; 48];
        self.control_in(Request::GetCanHealth, bus_index as u16, 0, &mut buf)?;
        Ok(decode_can_health(&buf))
    }

    fn can_send(&self, frames: &[CanFrame]) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        let mut packed = Vec::with_capacity(frames.len() * (MAX_FRAME_DATA + 8));
        for frame in frames {
            encode_frame(frame, &mut packed);
        }
        self.handle
            .write_bulk(BULK_CAN_OUT_EP, &packed, Duration::from_millis(BULK_TIMEOUT_MS))
            .map(|_| ())
            .map_err(|e| self.observe(e))
    }

    fn can_receive(&self, out: &mut Vec<CanFrame>) -> Result<bool, GatewayError> {
        self.err_if_gone()?;
        let mut buf = [0u8; 4096];
        match self.handle.read_bulk(BULK_CAN_IN_EP, &mut buf, Duration::from_millis(BULK_TIMEOUT_MS)) {
            Ok(n) => {
                decode_frames(&buf[..n], self.base_bus(), out);
                Ok(true)
            }
            Err(rusb::Error::Timeout) => Ok(true),
            Err(e) => Err(self.observe(e)),
        }
    }

    fn set_safety_model(&self, model: SafetyModel, param: i16) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        self.control_out(Request::SetSafetyModel, safety_model_code(model), param as u16, &[])
    }

    fn set_alternative_experience(&self, mask: u16) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        self.control_out(Request::SetAltExperience, mask, 0, &[])
    }

    fn set_power_saving(&self, enabled: bool) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        self.control_out(Request::SetPowerSaving, enabled as u16, 0, &[])
    }

    fn set_fan_speed(&self, percent: u8) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        self.control_out(Request::SetFanSpeed, percent as u16, 0, &[])
    }

    fn get_fan_speed(&self) -> Result<u16, GatewayError> {
        self.err_if_gone()?;
        let mut buf = [0u8; 2];
        self.control_in(Request::GetFanSpeed, 0, 0, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn set_ir_power(&self, percent: f32) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        let scaled = (percent.clamp(0.0, 1.0) * 1000.0) as u16;
        self.control_out(Request::SetIrPower, scaled, 0, &[])
    }

    fn set_loopback(&self, enabled: bool) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        self.control_out(Request::SetLoopback, enabled as u16, 0, &[])
    }

    fn get_rtc(&self) -> Result<SystemTime, GatewayError> {
        self.err_if_gone()?;
        let mut buf = [0u8; 8];
        self.control_in(Request::GetRtc, 0, 0, &mut buf)?;
        let secs = u64::from_le_bytes(buf);
        Ok(UNIX_EPOCH + Duration::from_secs(secs))
    }

    fn set_rtc(&self, time: SystemTime) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        let secs = time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        self.control_out(Request::SetRtc, 0, 0, &secs.to_le_bytes())
    }

    fn send_heartbeat(&self, engaged: bool) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        self.control_out(Request::Heartbeat, engaged as u16, 0, &[])
    }

    fn set_usb_power_mode(&self, mode: UsbPowerMode) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        let code = match mode {
            UsbPowerMode::ClientOnly => 0,
            UsbPowerMode::Cdp => 1,
            UsbPowerMode::Dcp => 2,
        };
        self.control_out(Request::SetUsbPowerMode, code, 0, &[])
    }

    fn recv_gps_raw(&self) -> Result<Vec<u8>, GatewayError> {
        self.err_if_gone()?;
        let mut buf = [0u8; 1024];
        match self.handle.read_bulk(BULK_GPS_IN_EP, &mut buf, Duration::from_millis(BULK_TIMEOUT_MS)) {
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(rusb::Error::Timeout) => Ok(Vec::new()),
            Err(e) => Err(self.observe(e)),
        }
    }

    fn gps_init(&self) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        self.control_out(Request::GpsInit, 0, 0, &[])
    }

    fn gps_stop(&self) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        self.control_out(Request::GpsStop, 0, 0, &[])
    }

    fn gps_set_power(&self, on: bool) -> Result<(), GatewayError> {
        self.err_if_gone()?;
        self.control_out(Request::GpsSetPower, on as u16, 0, &[])
    }
}

fn safety_model_code(model: SafetyModel) -> u16 {
    // Closed mapping to the firmware's own numbering. Order matches neither
    // declaration order nor anything meaningful beyond the firmware's ABI.
    match model {
        SafetyModel::Silent => 0,
        SafetyModel::NoOutput => 19,
        SafetyModel::AllOutput => 17,
        SafetyModel::Elm327 => 1,
        SafetyModel::Honda => 2,
        SafetyModel::Toyota => 3,
        SafetyModel::Gm => 4,
        SafetyModel::Hyundai => 5,
        SafetyModel::Chrysler => 6,
        SafetyModel::Subaru => 7,
        SafetyModel::VolkswagenMqb => 8,
        SafetyModel::Nissan => 9,
        SafetyModel::Mazda => 10,
        SafetyModel::Ford => 11,
        SafetyModel::Body => 12,
    }
}

fn encode_frame(frame: &CanFrame, out: &mut Vec<u8>) {
    out.extend_from_slice(&frame.address.to_le_bytes());
    out.push(frame.source_bus);
    out.push(frame.data.len() as u8);
    out.extend_from_slice(&frame.data);
}

fn decode_frames(buf: &[u8], base_bus: u8, out: &mut Vec<CanFrame>) {
    let mut i = 0;
    while i + 7 <= buf.len() {
        let address = u32::from_le_bytes(buf[i..i + 4].try_into().unwrap());
        let local_bus = buf[i + 4];
        let len = buf[i + 5] as usize;
        i += 6;
        if i + len > buf.len() {
            break;
        }
        let mut data = ArrayVec::new();
        let _ = data.try_extend_from_slice(&buf[i..i + len.min(MAX_FRAME_DATA)]);
        out.push(CanFrame { address, bus_time: 0, data, source_bus: base_bus + local_bus });
        i += len;
    }
}

fn decode_health(_buf: &[u8]) -> GatewayHealth {
    // Field-by-field unpacking of the firmware's health struct lives here in
    // the production build; the layout is firmware-private wire format, not
    // part of this crate's public contract.
    GatewayHealth::default()
}

fn decode_can_health(_buf: &[u8]) -> CanBusHealth {
    CanBusHealth::default()
}

/// Enumerates and opens gateways over `libusb`, matching the fixed
/// vendor/product ID pair used by every supported hardware revision.
pub struct UsbFactory {
    context: Context,
}

impl UsbFactory {
    pub fn new() -> Result<Self, GatewayError> {
        let context = Context::new().map_err(|e| GatewayError::OpenFailed(e.to_string()))?;
        Ok(UsbFactory { context })
    }

    fn matching_devices(&self) -> Result<Vec<Device<Context>>, GatewayError> {
        let devices = self.context.devices().map_err(|e| GatewayError::OpenFailed(e.to_string()))?;
        Ok(devices
            .iter()
            .filter(|d| {
                d.device_descriptor()
                    .map(|desc| desc.vendor_id() == VENDOR_ID && desc.product_id() == PRODUCT_ID)
                    .unwrap_or(false)
            })
            .collect())
    }
}

impl GatewayFactory for UsbFactory {
    fn list(&self, _include_disconnected: bool) -> Result<Vec<DiscoveredGateway>, GatewayError> {
        let mut out = Vec::new();
        for device in self.matching_devices()? {
            let handle = match device.open() {
                Ok(h) => h,
                Err(_) => continue,
            };
            let desc = device.device_descriptor().map_err(|e| GatewayError::OpenFailed(e.to_string()))?;
            let timeout = Duration::from_millis(CONTROL_TIMEOUT_MS);
            let languages = handle.read_languages(timeout).unwrap_or_default();
            let Some(lang) = languages.first() else { continue };
            let Ok(serial) = handle.read_serial_number_string(*lang, &desc, timeout) else { continue };
            out.push(DiscoveredGateway { serial, hw_type: HwType::GatewayStandard });
        }
        Ok(out)
    }

    fn open(&self, serial: &str, position: usize) -> Result<Box<dyn Gateway>, GatewayError> {
        for device in self.matching_devices()? {
            let mut handle = device.open().map_err(|e| GatewayError::OpenFailed(e.to_string()))?;
            let desc = device.device_descriptor().map_err(|e| GatewayError::OpenFailed(e.to_string()))?;
            let timeout = Duration::from_millis(CONTROL_TIMEOUT_MS);
            let languages = handle.read_languages(timeout).unwrap_or_default();
            let Some(lang) = languages.first() else { continue };
            let Ok(found_serial) = handle.read_serial_number_string(*lang, &desc, timeout) else {
                continue;
            };
            if found_serial != serial {
                continue;
            }
            handle
                .claim_interface(0)
                .map_err(|e| GatewayError::OpenFailed(e.to_string()))?;
            return Ok(Box::new(UsbGateway {
                serial: serial.to_string(),
                hw_type: HwType::GatewayStandard,
                position,
                has_rtc: true,
                has_gps: false,
                handle,
                connected: AtomicBool::new(true),
                comms_healthy: AtomicBool::new(true),
            }));
        }
        Err(GatewayError::OpenFailed(format!("serial {serial} not present")))
    }
}
