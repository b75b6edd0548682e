//! Wire-level constants for the gateway's USB control protocol.
//!
//! Every [`gateway_api::Gateway`] operation that isn't a CAN bulk transfer
//! rides a single control transfer: `bRequest` picks the operation, `wValue`
//! and `wIndex` carry small scalar arguments, and the data stage (if any)
//! carries the rest. This mirrors the vendor-request style used by the
//! hardware this crate was written against.

pub const VENDOR_ID: u16 = 0xbbaa;
pub const PRODUCT_ID: u16 = 0xddcc;

pub const BULK_CAN_IN_EP: u8 = 0x81;
pub const BULK_CAN_OUT_EP: u8 = 0x02;
pub const BULK_GPS_IN_EP: u8 = 0x83;

pub const CONTROL_TIMEOUT_MS: u64 = 50;
pub const BULK_TIMEOUT_MS: u64 = 20;

#[repr(u8)]
#[derive(Copy, Clone)]
pub enum Request {
    GetHealth = 0xd2,
    GetCanHealth = 0xc2,
    SetSafetyModel = 0xdc,
    SetAltExperience = 0xdf,
    SetPowerSaving = 0xe7,
    SetFanSpeed = 0xb1,
    GetFanSpeed = 0xb2,
    SetIrPower = 0xb0,
    SetLoopback = 0xe5,
    GetRtc = 0xa0,
    SetRtc = 0xa1,
    Heartbeat = 0xf3,
    SetUsbPowerMode = 0xe6,
    GpsInit = 0xc4,
    GpsStop = 0xc5,
    GpsSetPower = 0xc6,
}
