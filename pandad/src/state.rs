//! Process-wide shared flags.
//!
//! Three atomics, each written by exactly one kind of writer and read by
//! every activity: `ignition` (written only by the health loop, on a
//! successful poll), `gps_active` (written only by the GPS passthrough
//! activity), and `shutdown` (written by any activity on a fatal condition,
//! or by the signal handler). There is no lock: every reader re-samples on
//! its own cadence, so transient disagreement across threads is harmless.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct SharedState {
    ignition: Arc<AtomicBool>,
    gps_active: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl SharedState {
    pub fn new() -> Self {
        SharedState {
            ignition: Arc::new(AtomicBool::new(false)),
            gps_active: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn ignition(&self) -> bool {
        self.ignition.load(Ordering::Relaxed)
    }

    pub fn set_ignition(&self, value: bool) {
        self.ignition.store(value, Ordering::Relaxed)
    }

    pub fn gps_active(&self) -> bool {
        self.gps_active.load(Ordering::Relaxed)
    }

    pub fn set_gps_active(&self, value: bool) {
        self.gps_active.store(value, Ordering::Relaxed)
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Write-once in spirit: later calls are harmless no-ops since the flag
    /// only ever moves false -> true.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed)
    }

    /// Registers a `SIGINT`/`SIGTERM` handler that does nothing but flip
    /// this state's shutdown flag. Must be called at most once per process.
    pub fn install_signal_handler(&self) -> Result<(), ctrlc::Error> {
        let state = self.clone();
        ctrlc::set_handler(move || state.request_shutdown())
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignition_defaults_false() {
        let state = SharedState::new();
        assert!(!state.ignition());
        state.set_ignition(true);
        assert!(state.ignition());
    }

    #[test]
    fn shutdown_is_sticky() {
        let state = SharedState::new();
        state.request_shutdown();
        state.request_shutdown();
        assert!(state.shutdown_requested());
    }

    #[test]
    fn clones_share_the_same_flags() {
        let state = SharedState::new();
        let clone = state.clone();
        clone.set_gps_active(true);
        assert!(state.gps_active());
    }
}
