//! Process exit codes returned from `main`. The daemon itself retries
//! recoverable conditions forever (see `fleet::open_fleet`), so only two
//! non-zero codes are reachable in practice; the third is reserved for
//! `clap` argument-parsing failures, which `clap` surfaces before `main`'s
//! body runs.

pub mod exit_code {
    /// Clean exit: auto-enumeration found no gateways present.
    pub const CLEAN_EMPTY_FLEET: i32 = 0;
    /// Reserved for argument-parsing failure surfaced by `clap`.
    pub const ARG_PARSE_FAILURE: i32 = 1;
    /// Shutdown triggered by an unrecoverable internal error (e.g. a USB
    /// context that failed to initialize), as opposed to the expected
    /// supervisory disconnect-and-respawn path.
    pub const UNRECOVERABLE: i32 = 2;
}
