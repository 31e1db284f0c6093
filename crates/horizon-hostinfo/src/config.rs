//! Configuration for host resolution.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{HostError, Result};
use crate::platform::{HickoryResolver, PlatformResolver, SystemResolver};

/// Default number of entries kept in the shared address cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 25;

/// Default lifetime of a shared address cache entry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(1);

/// Default number of `getaddrinfo` worker threads.
pub const DEFAULT_GAI_WORKERS: usize = 4;

/// Which platform resolver backs a registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolverBackend {
    /// `getaddrinfo` on unix, hickory elsewhere; raw queries through hickory.
    #[default]
    System,
    /// `getaddrinfo`/`getnameinfo` on worker threads. Unix only.
    Getaddrinfo,
    /// hickory-resolver on an owned tokio runtime.
    Hickory,
}

/// Configuration for a [`HostRegistry`](crate::HostRegistry).
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Maximum number of shared address cache entries.
    pub cache_capacity: usize,
    /// How long a shared address cache entry stays fresh.
    pub cache_ttl: Duration,
    /// Platform resolver backend.
    pub backend: ResolverBackend,
    /// Settings for the hickory backend and raw DNS queries.
    pub dns: DnsConfig,
    /// Number of `getaddrinfo` worker threads.
    pub gai_workers: usize,
    /// Whether reachability resolution is available.
    pub reachability: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl: DEFAULT_CACHE_TTL,
            backend: ResolverBackend::default(),
            dns: DnsConfig::default(),
            gai_workers: DEFAULT_GAI_WORKERS,
            reachability: true,
        }
    }
}

impl HostConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache capacity.
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set the cache entry lifetime.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the resolver backend.
    pub fn backend(mut self, backend: ResolverBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the DNS settings.
    pub fn dns(mut self, dns: DnsConfig) -> Self {
        self.dns = dns;
        self
    }

    /// Set the number of `getaddrinfo` worker threads.
    pub fn gai_workers(mut self, workers: usize) -> Self {
        self.gai_workers = workers;
        self
    }

    /// Enable or disable reachability resolution.
    pub fn reachability(mut self, enabled: bool) -> Self {
        self.reachability = enabled;
        self
    }

    /// Check the configuration for values no registry can work with.
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(HostError::Config("cache capacity must be at least 1".into()));
        }
        if self.gai_workers == 0 {
            return Err(HostError::Config("at least one getaddrinfo worker is required".into()));
        }
        if !self.dns.use_system_config && self.dns.nameservers.is_empty() {
            return Err(HostError::Config("no nameservers configured".into()));
        }
        Ok(())
    }

    /// Build the platform resolver this configuration selects.
    pub fn build_resolver(&self) -> Result<Arc<dyn PlatformResolver>> {
        self.validate()?;
        Ok(match self.backend {
            ResolverBackend::System => Arc::new(SystemResolver::new(self)?),
            ResolverBackend::Hickory => Arc::new(HickoryResolver::new(&self.dns)?),
            #[cfg(unix)]
            ResolverBackend::Getaddrinfo => {
                Arc::new(crate::platform::GaiResolver::new(self.gai_workers)?)
            }
            #[cfg(not(unix))]
            ResolverBackend::Getaddrinfo => {
                return Err(HostError::Config(
                    "the getaddrinfo backend is only available on unix".into(),
                ));
            }
        })
    }
}

/// Configuration for DNS resolution through hickory.
#[derive(Debug, Clone)]
pub struct DnsConfig {
    /// Use system DNS configuration (reads /etc/resolv.conf on Unix).
    /// If false, uses custom nameservers.
    pub use_system_config: bool,

    /// Custom nameservers to use when `use_system_config` is false.
    pub nameservers: Vec<SocketAddr>,

    /// Maximum number of entries in hickory's own record cache.
    pub cache_size: usize,

    /// Maximum TTL for positive responses.
    pub max_positive_ttl: Duration,

    /// Maximum TTL for negative responses (NXDOMAIN).
    pub max_negative_ttl: Duration,

    /// Whether to read from the hosts file.
    pub use_hosts_file: bool,

    /// IP version preference for unrestricted forward lookups.
    pub ip_strategy: IpStrategy,

    /// Number of retries for failed lookups.
    pub attempts: usize,

    /// Timeout for each DNS query attempt.
    pub timeout: Duration,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            use_system_config: true,
            nameservers: Vec::new(),
            cache_size: 256,
            max_positive_ttl: Duration::from_secs(86400), // 24 hours
            max_negative_ttl: Duration::from_secs(300),   // 5 minutes
            use_hosts_file: true,
            ip_strategy: IpStrategy::default(),
            attempts: 2,
            timeout: Duration::from_secs(5),
        }
    }
}

impl DnsConfig {
    /// System defaults.
    pub fn system() -> Self {
        Self::default()
    }

    /// Use the given nameservers instead of the system configuration.
    pub fn with_nameservers(nameservers: Vec<SocketAddr>) -> Self {
        Self {
            use_system_config: false,
            nameservers,
            ..Default::default()
        }
    }

    /// Use Google's public DNS servers.
    pub fn google() -> Self {
        Self::with_nameservers(vec![v4_server(8, 8, 8, 8), v4_server(8, 8, 4, 4)])
    }

    /// Use Cloudflare's public DNS servers.
    pub fn cloudflare() -> Self {
        Self::with_nameservers(vec![v4_server(1, 1, 1, 1), v4_server(1, 0, 0, 1)])
    }

    pub fn cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    pub fn max_positive_ttl(mut self, ttl: Duration) -> Self {
        self.max_positive_ttl = ttl;
        self
    }

    pub fn max_negative_ttl(mut self, ttl: Duration) -> Self {
        self.max_negative_ttl = ttl;
        self
    }

    pub fn use_hosts_file(mut self, use_hosts: bool) -> Self {
        self.use_hosts_file = use_hosts;
        self
    }

    pub fn ip_strategy(mut self, strategy: IpStrategy) -> Self {
        self.ip_strategy = strategy;
        self
    }

    pub fn attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn v4_server(a: u8, b: u8, c: u8, d: u8) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(a, b, c, d)), 53)
}

/// IP version lookup strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IpStrategy {
    /// Look up IPv4 addresses only.
    Ipv4Only,
    /// Look up IPv6 addresses only.
    Ipv6Only,
    /// Look up both, prefer IPv4.
    Ipv4ThenIpv6,
    /// Look up both, prefer IPv6.
    Ipv6ThenIpv4,
    /// Look up both in parallel.
    #[default]
    Ipv4AndIpv6,
}
