//! Short-lived cache of completed address lookups.
//!
//! Entries expire after a fixed time-to-live and the cache holds a fixed
//! number of entries. Expired entries are swept before every lookup and
//! before every insertion; when the cache is still full the entry with the
//! oldest completion time is evicted.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use horizon_hostinfo_core::logging::targets;

#[derive(Debug, Clone)]
struct CacheEntry {
    addresses: Vec<SocketAddr>,
    resolved_at: Instant,
}

/// Bounded, time-expiring map from host name to resolved addresses.
#[derive(Debug)]
pub struct HostCache {
    entries: HashMap<String, CacheEntry>,
    capacity: usize,
    ttl: Duration,
}

impl HostCache {
    /// Create a cache holding at most `capacity` entries for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Look up `name`, returning a private copy of its addresses.
    pub fn lookup(&mut self, name: &str) -> Option<Vec<SocketAddr>> {
        self.lookup_at(name, Instant::now())
    }

    /// [`lookup`](Self::lookup) with an explicit clock.
    pub fn lookup_at(&mut self, name: &str, now: Instant) -> Option<Vec<SocketAddr>> {
        self.expire_at(now);
        self.entries.get(name).map(|entry| entry.addresses.clone())
    }

    /// Record `addresses` under every name in `names`.
    pub fn insert<S: AsRef<str>>(&mut self, names: &[S], addresses: &[SocketAddr]) {
        self.insert_at(names, addresses, Instant::now());
    }

    /// [`insert`](Self::insert) with an explicit clock.
    pub fn insert_at<S: AsRef<str>>(&mut self, names: &[S], addresses: &[SocketAddr], now: Instant) {
        for name in names {
            let name = name.as_ref();
            if !self.entries.contains_key(name) {
                self.expire_at(now);
                if self.entries.len() >= self.capacity {
                    self.evict_oldest();
                }
            }
            self.entries.insert(
                name.to_string(),
                CacheEntry {
                    addresses: addresses.to_vec(),
                    resolved_at: now,
                },
            );
            tracing::trace!(target: targets::CACHE, host = name, "cached");
        }
    }

    /// Remove every entry older than the time-to-live.
    pub fn expire_at(&mut self, now: Instant) {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.resolved_at) < ttl);
        let expired = before - self.entries.len();
        if expired > 0 {
            tracing::trace!(target: targets::CACHE, expired, "expired entries");
        }
    }

    fn evict_oldest(&mut self) {
        // Ties are broken arbitrarily.
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.resolved_at)
            .map(|(name, _)| name.clone());
        if let Some(name) = oldest {
            self.entries.remove(&name);
            tracing::debug!(target: targets::CACHE, host = %name, "evicted oldest entry");
        }
    }
}
