//! Logging facilities for Horizon HostInfo.
//!
//! Horizon HostInfo uses the `tracing` crate for instrumentation and never
//! installs a subscriber itself. To see logs, install one in your application:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("horizon_hostinfo=debug")
//!         .init();
//! }
//! ```
//!
//! The constants below name the per-subsystem targets so filters can be
//! written against them.

/// Span names used throughout Horizon HostInfo for tracing.
pub mod span_names {
    /// One run of a run loop in a mode.
    pub const RUN_LOOP: &str = "horizon_hostinfo::run_loop";
    /// A synchronous resolution parked in the blocking mode.
    pub const BLOCKING_WAIT: &str = "horizon_hostinfo::blocking_wait";
    /// Delivery of a completed master lookup to its clients.
    pub const FAN_OUT: &str = "horizon_hostinfo::fan_out";
}

/// Target names for log filtering.
pub mod targets {
    /// Run loop target.
    pub const RUN_LOOP: &str = "horizon_hostinfo_core::run_loop";
    /// Source lifecycle target.
    pub const SOURCE: &str = "horizon_hostinfo_core::source";
    /// Resolution object target.
    pub const HOST: &str = "horizon_hostinfo::host";
    /// Master/client registry target.
    pub const REGISTRY: &str = "horizon_hostinfo::registry";
    /// Address cache target.
    pub const CACHE: &str = "horizon_hostinfo::cache";
    /// Platform resolver backends target.
    pub const PLATFORM: &str = "horizon_hostinfo::platform";
    /// Reachability provider target.
    pub const REACHABILITY: &str = "horizon_hostinfo::reachability";
}
