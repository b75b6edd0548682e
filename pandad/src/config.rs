//! Command-line surface, layered over the environment variables the
//! original tooling reads directly. Precedence: CLI flag > environment
//! variable > built-in default.

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(
    name = "pandad",
    about = "Bridges USB-attached CAN gateways to the driver-assistance bus",
    version
)]
pub struct Cli {
    /// Pin the fleet to a specific, ordered set of serials. Repeatable.
    /// Absent means auto-enumerate.
    #[clap(long = "serial")]
    pub serials: Vec<String>,

    /// Enable CAN loopback on every opened gateway.
    #[clap(long)]
    pub loopback: bool,

    /// Drop every outbound CAN batch instead of forwarding it.
    #[clap(long = "fake-send")]
    pub fake_send: bool,

    /// Disable fan-speed commands from the peripheral controller.
    #[clap(long = "no-fan-control")]
    pub no_fan_control: bool,

    /// Force ignition-line-high for every gateway poll (test mode).
    #[clap(long = "spoof-ignition")]
    pub spoof_ignition: bool,

    /// Log level passed through to the logging subsystem.
    #[clap(long = "log-level", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn loopback_enabled(&self) -> bool {
        self.loopback || std::env::var_os("BOARDD_LOOPBACK").is_some()
    }

    pub fn fake_send_enabled(&self) -> bool {
        self.fake_send || std::env::var_os("FAKESEND").is_some()
    }

    pub fn no_fan_control_enabled(&self) -> bool {
        self.no_fan_control || std::env::var_os("NO_FAN_CONTROL").is_some()
    }

    pub fn spoof_ignition_enabled(&self) -> bool {
        self.spoof_ignition || std::env::var_os("STARTED").is_some()
    }
}
