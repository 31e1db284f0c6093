//! Asynchronous host information resolution for Horizon HostInfo.
//!
//! A [`Host`] resolves forward addresses, reverse names, reachability flags
//! and raw DNS records for a host name or address. Results are delivered
//! either synchronously, by running the calling thread's [`RunLoop`] in a
//! private mode until the resolution finishes, or through a [`HostClient`]
//! performed on the run loops the host is scheduled on.
//!
//! Concurrent address lookups of the same name share one platform lookup
//! through the [`HostRegistry`], and successful results are kept for a short
//! time in its [`HostCache`].
//!
//! # Synchronous resolution
//!
//! ```no_run
//! use horizon_hostinfo::{Host, InfoType};
//!
//! let host = Host::with_name("localhost");
//! host.start_resolution(InfoType::Addresses)?;
//! for address in host.addresses().unwrap_or_default() {
//!     println!("{address}");
//! }
//! # Ok::<(), horizon_hostinfo::HostError>(())
//! ```
//!
//! # Asynchronous resolution
//!
//! ```no_run
//! use std::time::Duration;
//! use horizon_hostinfo::{Host, HostClient, InfoType, RunLoop, RunLoopMode};
//!
//! let host = Host::with_name("example.com");
//! host.schedule_with_run_loop(&RunLoop::current(), &RunLoopMode::DEFAULT);
//! host.set_client(Some(HostClient::new(|host, info, error| {
//!     match error {
//!         Some(error) => eprintln!("{info} failed: {error}"),
//!         None => println!("{info}: {:?}", host.addresses()),
//!     }
//! })));
//! host.start_resolution(InfoType::Addresses)?;
//!
//! RunLoop::current().run_in_mode(&RunLoopMode::DEFAULT, Some(Duration::from_secs(5)), true);
//! # Ok::<(), horizon_hostinfo::HostError>(())
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod host;
pub mod info;
pub mod platform;
pub mod reachability;
pub mod registry;

pub use cache::HostCache;
pub use config::{DnsConfig, HostConfig, IpStrategy, ResolverBackend};
pub use error::{HostError, Result};
pub use host::{BLOCKING_MODE, Host, HostClient};
pub use info::{HostInfo, InfoState, InfoType};
pub use platform::{
    AddressFamily, DnsReply, ForwardLookup, HickoryResolver, LookupHandle, PlatformResolver,
    SystemResolver,
};
#[cfg(unix)]
pub use platform::GaiResolver;
pub use reachability::{
    InterfaceReachability, ReachabilityFlags, ReachabilityProvider, ReachabilityTarget,
    ReachabilityWatch,
};
pub use registry::{HostRegistry, HostRegistryBuilder};

pub use horizon_hostinfo_core::{
    ErrorDomain, RunLoop, RunLoopMode, RunResult, ScheduleList, Source, StreamError,
};
