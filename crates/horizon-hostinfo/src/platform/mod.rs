//! Platform resolver adapters.
//!
//! A [`PlatformResolver`] starts one asynchronous lookup per call and reports
//! its outcome through a one-shot callback, which may run on any thread.
//! Backends are swappable; the resolution engine only sees the trait.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use horizon_hostinfo_core::StreamError;
use horizon_hostinfo_core::logging::targets;

use crate::config::{DnsConfig, HostConfig};
use crate::error::Result;

#[cfg(unix)]
mod gai;
mod hickory;
pub mod netdb;

#[cfg(unix)]
pub use gai::GaiResolver;
pub use hickory::HickoryResolver;

/// Address family a forward lookup is restricted to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    #[default]
    Unspecified,
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Whether `addr` belongs to this family.
    pub fn admits(self, addr: &SocketAddr) -> bool {
        match self {
            Self::Unspecified => true,
            Self::Ipv4 => addr.is_ipv4(),
            Self::Ipv6 => addr.is_ipv6(),
        }
    }
}

/// Outcome of a successful forward lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardLookup {
    /// Resolved addresses, in the order the platform returned them.
    pub addresses: Vec<SocketAddr>,
    /// Canonical names and aliases the query name resolved through.
    pub aliases: Vec<String>,
}

/// A raw DNS reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsReply {
    /// The reply in DNS wire format.
    pub reply: Vec<u8>,
    /// The server that answered, when the backend knows it.
    pub source: Option<SocketAddr>,
}

pub type ForwardCallback = Box<dyn FnOnce(std::result::Result<ForwardLookup, StreamError>) + Send>;
pub type ReverseCallback = Box<dyn FnOnce(std::result::Result<String, StreamError>) + Send>;
pub type QueryCallback = Box<dyn FnOnce(std::result::Result<DnsReply, StreamError>) + Send>;

/// Handle to an in-flight platform lookup.
///
/// Cancelling or dropping the handle suppresses the callback if it has not
/// run yet.
pub struct LookupHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl LookupHandle {
    /// A handle that runs `cancel` when cancelled or dropped.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to cancel.
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    /// Cancel the lookup.
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for LookupHandle {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl fmt::Debug for LookupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// An OS-level asynchronous name resolution primitive.
pub trait PlatformResolver: Send + Sync + fmt::Debug {
    /// Start a forward lookup of `name`.
    fn start_forward(
        &self,
        name: &str,
        family: AddressFamily,
        callback: ForwardCallback,
    ) -> std::result::Result<LookupHandle, StreamError>;

    /// Start a reverse lookup of `address`.
    fn start_reverse(
        &self,
        address: SocketAddr,
        callback: ReverseCallback,
    ) -> std::result::Result<LookupHandle, StreamError>;

    /// Start a raw DNS query.
    fn start_query(
        &self,
        name: &str,
        class: u16,
        record_type: u16,
        callback: QueryCallback,
    ) -> std::result::Result<LookupHandle, StreamError>;
}

/// The default resolver: `getaddrinfo` for forward and reverse lookups on
/// unix, hickory everywhere else and for raw queries.
#[derive(Debug)]
pub struct SystemResolver {
    lookups: Arc<dyn PlatformResolver>,
    dns: DnsConfig,
    queries: OnceLock<Option<Arc<HickoryResolver>>>,
}

impl SystemResolver {
    pub fn new(config: &HostConfig) -> Result<Self> {
        #[cfg(unix)]
        let lookups: Arc<dyn PlatformResolver> = Arc::new(GaiResolver::new(config.gai_workers)?);
        #[cfg(not(unix))]
        let lookups: Arc<dyn PlatformResolver> = Arc::new(HickoryResolver::new(&config.dns)?);

        Ok(Self {
            lookups,
            dns: config.dns.clone(),
            queries: OnceLock::new(),
        })
    }

    fn queries(&self) -> Option<&Arc<HickoryResolver>> {
        self.queries
            .get_or_init(|| match HickoryResolver::new(&self.dns) {
                Ok(resolver) => Some(Arc::new(resolver)),
                Err(err) => {
                    tracing::warn!(target: targets::PLATFORM, %err, "could not build DNS query resolver");
                    None
                }
            })
            .as_ref()
    }
}

impl PlatformResolver for SystemResolver {
    fn start_forward(
        &self,
        name: &str,
        family: AddressFamily,
        callback: ForwardCallback,
    ) -> std::result::Result<LookupHandle, StreamError> {
        self.lookups.start_forward(name, family, callback)
    }

    fn start_reverse(
        &self,
        address: SocketAddr,
        callback: ReverseCallback,
    ) -> std::result::Result<LookupHandle, StreamError> {
        self.lookups.start_reverse(address, callback)
    }

    fn start_query(
        &self,
        name: &str,
        class: u16,
        record_type: u16,
        callback: QueryCallback,
    ) -> std::result::Result<LookupHandle, StreamError> {
        match self.queries() {
            Some(resolver) => resolver.start_query(name, class, record_type, callback),
            None => Err(StreamError::netdb(netdb::NETDB_INTERNAL)),
        }
    }
}

/// Stand-in used when no backend could be built. Every lookup fails with an
/// internal resolver error.
#[derive(Debug, Default)]
pub(crate) struct UnavailableResolver;

impl PlatformResolver for UnavailableResolver {
    fn start_forward(
        &self,
        _name: &str,
        _family: AddressFamily,
        _callback: ForwardCallback,
    ) -> std::result::Result<LookupHandle, StreamError> {
        Err(StreamError::netdb(netdb::NETDB_INTERNAL))
    }

    fn start_reverse(
        &self,
        _address: SocketAddr,
        _callback: ReverseCallback,
    ) -> std::result::Result<LookupHandle, StreamError> {
        Err(StreamError::netdb(netdb::NETDB_INTERNAL))
    }

    fn start_query(
        &self,
        _name: &str,
        _class: u16,
        _record_type: u16,
        _callback: QueryCallback,
    ) -> std::result::Result<LookupHandle, StreamError> {
        Err(StreamError::netdb(netdb::NETDB_INTERNAL))
    }
}

static_assertions::assert_impl_all!(SystemResolver: Send, Sync);
static_assertions::assert_impl_all!(LookupHandle: Send);
