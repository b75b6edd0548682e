use thiserror::Error;

/// Errors reported across the gateway transport seam.
///
/// Callers distinguish [`GatewayError::NoResponse`] (treat the current tick
/// as a skip and keep the fleet) from [`GatewayError::Disconnected`] (tear
/// down and let the supervising launcher respawn) without matching on a
/// string.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The device did not answer within the transport's own timeout. The
    /// device may still be present; retry on the next tick.
    #[error("gateway {serial} did not respond")]
    NoResponse { serial: String },

    /// The device is gone: unplugged, USB reset, or the transport observed
    /// an error that only a disconnect produces.
    #[error("gateway {serial} is disconnected")]
    Disconnected { serial: String },

    /// The device answered but rejected the request (e.g. an out-of-range
    /// safety parameter).
    #[error("gateway {serial} rejected request: {reason}")]
    Rejected { serial: String, reason: String },

    /// Enumeration or open failed before a handle existed, so no serial is
    /// available to attach to the error.
    #[error("gateway open failed: {0}")]
    OpenFailed(String),

    /// The underlying transport raised an I/O error that carries no
    /// connectivity information of its own.
    #[error("usb transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl GatewayError {
    /// True when this error means the device is gone and the fleet should
    /// be torn down, as opposed to a transient miss on a single call.
    pub fn is_disconnection(&self) -> bool {
        matches!(self, GatewayError::Disconnected { .. } | GatewayError::Transport(_))
    }
}
