//! Process-wide sharing of in-flight address lookups.
//!
//! A [`HostRegistry`] owns two things behind one lock:
//!
//! - the master list, mapping a host name to the single master [`Host`]
//!   performing the real platform lookup and the client tokens waiting on it
//! - the [`HostCache`] of recently completed address lookups
//!
//! A name is present in the master list exactly while its master lookup is in
//! flight. When the master completes, its entry is popped under the lock and
//! the result is copied to every client with no registry lock held.
//!
//! Lock order is host, then registry, then master host. The registry lock is
//! never held while a client host is locked for delivery, and never across a
//! user callback.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use horizon_hostinfo_core::logging::{span_names, targets};
use horizon_hostinfo_core::{Source, StreamError};
use parking_lot::Mutex;

use crate::cache::HostCache;
use crate::config::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL, HostConfig};
use crate::error::{HostError, Result};
use crate::host::{CompletionSlot, Host, HostClient, HostInner, Resolved};
use crate::platform::{ForwardLookup, PlatformResolver, UnavailableResolver};
use crate::reachability::{InterfaceReachability, ReachabilityProvider};

static GLOBAL_REGISTRY: OnceLock<Arc<HostRegistry>> = OnceLock::new();

/// A client waiting on a master lookup.
pub(crate) struct ClientToken {
    pub(crate) host: Weak<HostInner>,
    pub(crate) source: Source,
    pub(crate) slot: CompletionSlot,
}

impl ClientToken {
    /// Hand a private copy of the master's outcome to the client, if the
    /// client is still waiting on this token's lookup.
    fn deliver(&self, outcome: std::result::Result<Resolved, StreamError>) {
        let Some(host) = Host::upgrade(&self.host) else {
            return;
        };
        let schedules = {
            let state = host.lock_state();
            if !state.is_pending_on(&self.source) {
                return;
            }
            *self.slot.lock() = Some(outcome);
            self.source.signal();
            state.schedules().clone()
        };
        // The signal is set before each loop lock is taken, so a loop that
        // is not parked yet will see it on its next scan.
        schedules.wake_waiting(&self.source);
    }
}

struct MasterEntry {
    master: Host,
    clients: Vec<ClientToken>,
}

struct RegistryState {
    lookups: HashMap<String, MasterEntry>,
    cache: HostCache,
}

/// Shared master list and address cache.
pub struct HostRegistry {
    resolver: Arc<dyn PlatformResolver>,
    reachability: Option<Arc<dyn ReachabilityProvider>>,
    state: Mutex<RegistryState>,
}

impl HostRegistry {
    /// The process-wide registry, created from [`HostConfig::default`] on
    /// first use unless [`init_global`](Self::init_global) ran first.
    pub fn global() -> Arc<HostRegistry> {
        GLOBAL_REGISTRY
            .get_or_init(|| {
                Self::from_config(&HostConfig::default()).unwrap_or_else(|err| {
                    tracing::error!(target: targets::REGISTRY, %err, "no resolver backend available");
                    Self::builder()
                        .resolver(Arc::new(UnavailableResolver))
                        .build_with_resolver()
                })
            })
            .clone()
    }

    /// Install the process-wide registry.
    ///
    /// Fails with [`HostError::AlreadyInitialized`] once a global registry
    /// exists, including one created implicitly by [`global`](Self::global).
    pub fn init_global(config: HostConfig) -> Result<Arc<HostRegistry>> {
        let registry = Self::from_config(&config)?;
        GLOBAL_REGISTRY
            .set(registry.clone())
            .map_err(|_| HostError::AlreadyInitialized)?;
        Ok(registry)
    }

    /// Build a registry from a configuration.
    pub fn from_config(config: &HostConfig) -> Result<Arc<HostRegistry>> {
        let resolver = config.build_resolver()?;
        let mut builder = Self::builder()
            .resolver(resolver.clone())
            .cache_capacity(config.cache_capacity)
            .cache_ttl(config.cache_ttl);
        if config.reachability {
            builder = builder.reachability(Arc::new(InterfaceReachability::new(resolver)));
        }
        Ok(builder.build_with_resolver())
    }

    /// Start building an isolated registry.
    pub fn builder() -> HostRegistryBuilder {
        HostRegistryBuilder::default()
    }

    /// The platform resolver lookups are started on.
    pub fn resolver(&self) -> &Arc<dyn PlatformResolver> {
        &self.resolver
    }

    /// The reachability provider, if reachability is supported.
    pub fn reachability(&self) -> Option<&Arc<dyn ReachabilityProvider>> {
        self.reachability.as_ref()
    }

    /// Number of live cache entries.
    pub fn cache_len(&self) -> usize {
        let mut state = self.state.lock();
        state.cache.expire_at(std::time::Instant::now());
        state.cache.len()
    }

    /// Drop every cache entry.
    pub fn clear_cache(&self) {
        self.state.lock().cache.clear();
    }

    /// Names with a master lookup in flight.
    pub fn in_flight(&self) -> Vec<String> {
        self.state.lock().lookups.keys().cloned().collect()
    }

    /// Whether a master lookup for `name` is in flight.
    pub fn is_in_flight(&self, name: &str) -> bool {
        self.state.lock().lookups.contains_key(name)
    }

    /// Number of clients waiting on the master lookup for `name`.
    pub fn client_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .lookups
            .get(name)
            .map_or(0, |entry| entry.clients.len())
    }

    pub(crate) fn cached_addresses(&self, name: &str) -> Option<Vec<SocketAddr>> {
        let addresses = self.state.lock().cache.lookup(name);
        if addresses.is_some() {
            tracing::trace!(target: targets::CACHE, host = name, "cache hit");
        }
        addresses
    }

    /// Join the master lookup for `name`, starting one if none is in flight.
    ///
    /// `make_client` receives the master's lookup source and returns the
    /// token for the calling client. On failure to start a master nothing is
    /// recorded.
    pub(crate) fn join_or_create_master<F>(
        self: &Arc<Self>,
        name: &str,
        make_client: F,
    ) -> std::result::Result<Source, StreamError>
    where
        F: FnOnce(&Source) -> ClientToken,
    {
        let mut state = self.state.lock();

        if let Some(entry) = state.lookups.get_mut(name) {
            let master_source = entry.master.pending_source();
            let token = match &master_source {
                Some(master_source) => make_client(master_source),
                // The master finished but has not popped its entry yet; the
                // client still receives the fan-out.
                None => make_client(&Source::new(|_| {})),
            };
            let source = token.source.clone();
            entry.clients.push(token);
            tracing::trace!(target: targets::REGISTRY, host = name, clients = entry.clients.len(), "joined master lookup");
            return Ok(source);
        }

        let master = Host::with_name_in(name, self.clone());
        let registry = Arc::downgrade(self);
        let key = name.to_string();
        master.set_client(Some(HostClient::new(move |master, _, _| {
            if let Some(registry) = registry.upgrade() {
                registry.finish_master(&key, master);
            }
        })));
        let master_source = master.start_master()?;

        let token = make_client(&master_source);
        let source = token.source.clone();
        state.lookups.insert(
            name.to_string(),
            MasterEntry {
                master,
                clients: vec![token],
            },
        );
        tracing::debug!(target: targets::REGISTRY, host = name, "master lookup started");
        Ok(source)
    }

    /// Remove the client whose lookup is `source`, abandoning the master
    /// lookup when no clients remain.
    pub(crate) fn unlink_client(&self, name: &str, source: &Source) {
        let collapsed = {
            let mut state = self.state.lock();
            let Some(entry) = state.lookups.get_mut(name) else {
                return;
            };
            entry.clients.retain(|token| token.source != *source);
            if !entry.clients.is_empty() {
                return;
            }
            state.lookups.remove(name)
        };
        if let Some(entry) = collapsed {
            tracing::debug!(target: targets::REGISTRY, host = name, "master lookup collapsed");
            entry.master.abandon();
        }
    }

    /// Completion of the master for `name`: pop the entry, cache a success,
    /// then copy the outcome to every client.
    fn finish_master(&self, name: &str, master: &Host) {
        let (addresses, names, error) = master.master_outcome();

        let entry = {
            let mut state = self.state.lock();
            match state.lookups.get(name) {
                Some(entry) if entry.master == *master => {}
                _ => return,
            }
            let Some(entry) = state.lookups.remove(name) else {
                return;
            };
            if error.is_none() && !addresses.is_empty() {
                state.cache.insert(&names, &addresses);
            }
            entry
        };

        let span = tracing::trace_span!(span_names::FAN_OUT, host = name, clients = entry.clients.len());
        let _enter = span.enter();

        let outcome = match error {
            Some(err) => Err(err),
            None => Ok(Resolved::Forward(ForwardLookup {
                addresses,
                aliases: Vec::new(),
            })),
        };
        for token in &entry.clients {
            token.deliver(outcome.clone());
        }
        tracing::debug!(target: targets::REGISTRY, host = name, ?error, "master lookup finished");
    }
}

impl fmt::Debug for HostRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HostRegistry")
            .field("resolver", &self.resolver)
            .field("reachability", &self.reachability.is_some())
            .field("in_flight", &state.lookups.keys().collect::<Vec<_>>())
            .field("cached", &state.cache.len())
            .finish()
    }
}

/// Builder for isolated [`HostRegistry`] instances.
pub struct HostRegistryBuilder {
    resolver: Option<Arc<dyn PlatformResolver>>,
    reachability: Option<Arc<dyn ReachabilityProvider>>,
    cache_capacity: usize,
    cache_ttl: Duration,
}

impl Default for HostRegistryBuilder {
    fn default() -> Self {
        Self {
            resolver: None,
            reachability: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl HostRegistryBuilder {
    /// Use `resolver` for every platform lookup.
    pub fn resolver(mut self, resolver: Arc<dyn PlatformResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Enable reachability resolution through `provider`.
    pub fn reachability(mut self, provider: Arc<dyn ReachabilityProvider>) -> Self {
        self.reachability = Some(provider);
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Build the registry. Without an explicit resolver the default backend
    /// is built from [`HostConfig::default`].
    pub fn build(mut self) -> Result<Arc<HostRegistry>> {
        if self.resolver.is_none() {
            self.resolver = Some(HostConfig::default().build_resolver()?);
        }
        if self.cache_capacity == 0 {
            return Err(HostError::Config("cache capacity must be at least 1".into()));
        }
        Ok(self.build_with_resolver())
    }

    fn build_with_resolver(self) -> Arc<HostRegistry> {
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(UnavailableResolver));
        Arc::new(HostRegistry {
            resolver,
            reachability: self.reachability,
            state: Mutex::new(RegistryState {
                lookups: HashMap::new(),
                cache: HostCache::new(self.cache_capacity, self.cache_ttl),
            }),
        })
    }
}

static_assertions::assert_impl_all!(HostRegistry: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let registry = HostRegistry::builder()
            .resolver(Arc::new(UnavailableResolver))
            .build()
            .unwrap();
        assert!(registry.reachability().is_none());
        assert_eq!(registry.cache_len(), 0);
        assert!(registry.in_flight().is_empty());
    }

    #[test]
    fn test_builder_rejects_zero_capacity() {
        let result = HostRegistry::builder()
            .resolver(Arc::new(UnavailableResolver))
            .cache_capacity(0)
            .build();
        assert!(matches!(result, Err(HostError::Config(_))));
    }

    #[test]
    fn test_failed_master_start_leaves_no_entry() {
        let registry = HostRegistry::builder()
            .resolver(Arc::new(UnavailableResolver))
            .build()
            .unwrap();
        let host = Host::with_name_in("unreachable.example", registry.clone());
        let err = host
            .start_resolution(crate::InfoType::Addresses)
            .unwrap_err();
        assert_eq!(
            err.stream_error(),
            Some(StreamError::netdb(crate::platform::netdb::NETDB_INTERNAL))
        );
        assert!(!registry.is_in_flight("unreachable.example"));
        assert!(!host.is_resolving());
    }

    #[test]
    fn test_unlink_unknown_name_is_noop() {
        let registry = HostRegistry::builder()
            .resolver(Arc::new(UnavailableResolver))
            .build()
            .unwrap();
        registry.unlink_client("nobody.example", &Source::new(|_| {}));
        assert!(registry.in_flight().is_empty());
    }
}
