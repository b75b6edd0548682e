use std::time::SystemTime;

use arrayvec::ArrayVec;

/// Hardware family of a gateway device. Declaration order is the tiebreak
/// used when the fleet manager sorts auto-enumerated devices, so it must not
/// be reordered casually.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HwType {
    Unknown,
    Internal,
    GatewayMini,
    GatewayStandard,
    GatewayPro,
    GatewayProGps,
}

impl HwType {
    /// Whether this hardware exposes fan/IR/charging-mode peripheral
    /// controls at all. A gateway lacking this capability is skipped by the
    /// peripheral controller even if it happens to sit at fleet position 0.
    pub fn has_peripherals(self) -> bool {
        matches!(self, HwType::Internal | HwType::GatewayPro | HwType::GatewayProGps)
    }

    /// Whether this hardware exposes USB power-mode control (CDP/client).
    pub fn has_usb_power_control(self) -> bool {
        matches!(self, HwType::Internal | HwType::GatewayPro | HwType::GatewayProGps)
    }
}

/// A closed set of safety models a gateway's firmware can enforce. `Custom`
/// values beyond this set do not exist on real firmware; vehicle-specific
/// models are represented directly rather than through an open extension
/// point, matching the firmware's own closed dispatch table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SafetyModel {
    Silent,
    NoOutput,
    AllOutput,
    Elm327,
    Honda,
    Toyota,
    Gm,
    Hyundai,
    Chrysler,
    Subaru,
    VolkswagenMqb,
    Nissan,
    Mazda,
    Ford,
    Body,
}

impl Default for SafetyModel {
    fn default() -> Self {
        SafetyModel::Silent
    }
}

/// A `{model, param}` pair as applied to one gateway position.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct SafetyConfig {
    pub model: SafetyModel,
    pub param: i16,
}

/// USB charging posture commanded on hardware that exposes it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UsbPowerMode {
    ClientOnly,
    Cdp,
    Dcp,
}

/// Coarse fault state of a gateway, independent of which specific faults are
/// set in its [`FaultBits`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FaultStatus {
    Normal,
    TemporaryFault,
    PermanentFault,
}

/// Individual fault conditions a gateway can report. Bit position is
/// load-bearing: it is the index into the device's fault bitset, not just a
/// label.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FaultKind {
    RelayMalfunction = 0,
    SpiTransferError = 1,
    SpiMalfunction = 2,
    UartWriteOverflow = 3,
    HeartbeatLoop = 4,
    InterruptRateHigh = 5,
    BatteryVoltageLow = 6,
    LoopbackInvalid = 7,
    InternalCanComms = 8,
    RegisterDivergent = 9,
    UsbOverflow = 10,
}

impl FaultKind {
    pub const ALL: [FaultKind; 11] = [
        FaultKind::RelayMalfunction,
        FaultKind::SpiTransferError,
        FaultKind::SpiMalfunction,
        FaultKind::UartWriteOverflow,
        FaultKind::HeartbeatLoop,
        FaultKind::InterruptRateHigh,
        FaultKind::BatteryVoltageLow,
        FaultKind::LoopbackInvalid,
        FaultKind::InternalCanComms,
        FaultKind::RegisterDivergent,
        FaultKind::UsbOverflow,
    ];
}

/// A bitset of [`FaultKind`] values, as reported in one health snapshot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct FaultBits(pub u32);

impl FaultBits {
    pub const fn empty() -> Self {
        FaultBits(0)
    }

    pub fn set(&mut self, kind: FaultKind) {
        self.0 |= 1 << (kind as u8);
    }

    pub fn contains(&self, kind: FaultKind) -> bool {
        self.0 & (1 << (kind as u8)) != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = FaultKind> + '_ {
        FaultKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }

    pub fn any(&self) -> bool {
        self.0 != 0
    }
}

/// Whether the safety harness relay reads in its expected orientation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HarnessStatus {
    NotPresent,
    Normal,
    Flipped,
}

/// Counters accumulated on-device since power-on, reset only by a fresh
/// `open`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct GatewayCounters {
    pub tx_blocked: u32,
    pub rx_invalid: u32,
    pub tx_buffer_overflow: u32,
    pub rx_buffer_overflow: u32,
    pub gmlan_send_errors: u32,
    pub interrupt_load_permille: u32,
    pub fan_power_percent: u8,
    pub fan_stall_count: u16,
    pub spi_checksum_error_count: u32,
}

/// One atomic poll of a gateway's overall state.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct GatewayHealth {
    pub uptime_s: u32,
    pub safety_model: SafetyModel,
    pub safety_param: i16,
    pub alternative_experience: u16,
    pub fault_status: FaultStatus,
    pub faults: FaultBits,
    pub ignition_line: bool,
    pub ignition_can: bool,
    pub controls_allowed: bool,
    pub power_save_enabled: bool,
    pub heartbeat_lost: bool,
    pub harness_status: HarnessStatus,
    pub counters: GatewayCounters,
    pub voltage_pack_mv: u32,
    pub voltage_sbu1_mv: u32,
    pub voltage_sbu2_mv: u32,
    pub current_ma: u32,
}

impl Default for FaultStatus {
    fn default() -> Self {
        FaultStatus::Normal
    }
}

impl Default for HarnessStatus {
    fn default() -> Self {
        HarnessStatus::NotPresent
    }
}

/// Last observed CAN controller error codes, split by frame kind and by
/// whether the code reflects the live controller state or the last stored
/// value before a bus-off recovery.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct LastErrorCodes {
    pub classic_live: u8,
    pub classic_stored: u8,
    pub data_live: u8,
    pub data_stored: u8,
}

/// One poll of a single CAN controller's health, keyed by bus index.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct CanBusHealth {
    pub bus_off: bool,
    pub bus_off_count: u32,
    pub warning: bool,
    pub error_passive: bool,
    pub last_error: LastErrorCodes,
    pub tx_error_count: u8,
    pub rx_error_count: u8,
    pub total_error_count: u32,
    pub total_tx_lost_count: u32,
    pub total_rx_lost_count: u32,
    pub total_tx_count: u32,
    pub total_rx_count: u32,
    pub total_forwarded_count: u32,
    pub can_speed_khz: u16,
    pub can_data_speed_khz: u16,
    pub canfd_enabled: bool,
    pub brs_enabled: bool,
    pub canfd_non_iso: bool,
}

/// Maximum CAN/CAN-FD payload length a single frame can carry.
pub const MAX_FRAME_DATA: usize = 64;

/// One CAN frame, tagged with the logical bus it arrived on or should be
/// sent on. `source_bus` is already offset by the owning gateway's base bus
/// (`position * 4`) by the time a frame leaves [`crate::Gateway::can_receive`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanFrame {
    pub address: u32,
    pub bus_time: u16,
    pub data: ArrayVec<u8, MAX_FRAME_DATA>,
    pub source_bus: u8,
}

impl CanFrame {
    pub fn new(address: u32, source_bus: u8, data: &[u8]) -> Self {
        let mut buf = ArrayVec::new();
        let take = data.len().min(MAX_FRAME_DATA);
        buf.try_extend_from_slice(&data[..take]).expect("bounded by MAX_FRAME_DATA");
        CanFrame { address, bus_time: 0, data: buf, source_bus }
    }
}

/// A gateway discovered during enumeration but not yet opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredGateway {
    pub serial: String,
    pub hw_type: HwType,
}

/// A point in time as read from or written to a gateway's onboard RTC.
pub type RtcTime = SystemTime;
