//! Host/gateway real-time-clock synchronization (SPEC_FULL §4.7).
//!
//! Two independent directions: seeding a clearly-wrong host clock from a
//! gateway's onboard RTC once at open time, and nudging a drifted gateway
//! RTC back toward the host clock once a minute while offroad.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Datelike, Utc};
use gateway_api::{Gateway, GatewayError};
use log::{error, warn};

/// Below this year, a timestamp is assumed to be a pre-NTP-sync default
/// rather than a real reading.
const MIN_VALID_YEAR: i32 = 2020;
const DRIFT_THRESHOLD_S: f64 = 1.1;

fn is_valid(time: SystemTime) -> bool {
    let dt: DateTime<Utc> = time.into();
    dt.year() >= MIN_VALID_YEAR
}

fn signed_diff_secs(a: SystemTime, b: SystemTime) -> f64 {
    match a.duration_since(b) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

#[cfg(unix)]
fn set_host_clock(time: SystemTime) {
    let dur = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    let tv = libc::timeval {
        tv_sec: dur.as_secs() as libc::time_t,
        tv_usec: dur.subsec_micros() as libc::suseconds_t,
    };
    // SAFETY: `tv` is a fully-initialized timeval; a null timezone pointer
    // is the documented "no DST adjustment" form of this call.
    let rc = unsafe { libc::settimeofday(&tv, std::ptr::null()) };
    if rc != 0 {
        warn!(
            target: "pandad::fleet",
            "settimeofday failed (likely missing CAP_SYS_TIME): {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn set_host_clock(_time: SystemTime) {
    warn!(target: "pandad::fleet", "setting the host clock is not supported on this platform");
}

/// Called once per gateway open: if the host clock looks implausible and
/// the gateway's onboard RTC looks plausible, seed the host clock from it.
pub fn sync_from_gateway(gw: &dyn Gateway) -> Result<(), GatewayError> {
    if !gw.has_rtc() {
        return Ok(());
    }
    let host_now = SystemTime::now();
    let rtc_now = gw.get_rtc()?;
    if !is_valid(host_now) && is_valid(rtc_now) {
        error!(target: "pandad::fleet", "system time wrong, setting from gateway RTC");
        set_host_clock(rtc_now);
    }
    Ok(())
}

/// Called by the peripheral controller once a minute while offroad: if the
/// host clock looks plausible and has drifted from the gateway's RTC by
/// more than 1.1s in either direction, write the host time to the gateway.
pub fn sync_to_gateway(gw: &dyn Gateway) -> Result<(), GatewayError> {
    if !gw.has_rtc() {
        return Ok(());
    }
    let host_now = SystemTime::now();
    if !is_valid(host_now) {
        return Ok(());
    }
    let rtc_now = gw.get_rtc()?;
    let drift_s = signed_diff_secs(host_now, rtc_now);
    if drift_s.abs() > DRIFT_THRESHOLD_S {
        warn!(target: "pandad::peripheral", "updating gateway RTC, dt = {drift_s:.2}s");
        gw.set_rtc(host_now)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drift_under_threshold_is_not_flagged() {
        let a = SystemTime::now();
        let b = a + Duration::from_millis(500);
        assert!(signed_diff_secs(a, b).abs() < DRIFT_THRESHOLD_S);
    }

    #[test]
    fn drift_over_threshold_is_flagged() {
        let a = SystemTime::now();
        let b = a + Duration::from_millis(2000);
        assert!(signed_diff_secs(a, b).abs() > DRIFT_THRESHOLD_S);
    }

    #[test]
    fn unix_epoch_is_not_a_valid_instant() {
        assert!(!is_valid(UNIX_EPOCH));
    }

    #[test]
    fn now_is_a_valid_instant() {
        assert!(is_valid(SystemTime::now()));
    }
}
