//! Reachability of a host.
//!
//! A [`ReachabilityProvider`] creates one [`ReachabilityWatch`] per target.
//! The default provider, [`InterfaceReachability`], judges a target against
//! the local interfaces and whether a default route exists. Name targets are
//! resolved through the registry's [`PlatformResolver`] first.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bitflags::bitflags;
use horizon_hostinfo_core::StreamError;
use horizon_hostinfo_core::logging::targets;

use crate::platform::{AddressFamily, ForwardLookup, LookupHandle, PlatformResolver};

/// Generic failure code in the reachability domain.
pub const STATUS_FAILED: i32 = 1001;

bitflags! {
    /// Reachability state of a target.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ReachabilityFlags: u32 {
        /// Reachable through a transient connection such as PPP.
        const TRANSIENT_CONNECTION = 1 << 0;
        /// Reachable with the current configuration.
        const REACHABLE = 1 << 1;
        /// Reachable, but a connection must be established first.
        const CONNECTION_REQUIRED = 1 << 2;
        /// Connection will be established automatically on traffic.
        const CONNECTION_AUTOMATIC = 1 << 3;
        /// Establishing the connection needs user intervention.
        const INTERVENTION_REQUIRED = 1 << 4;
        /// The target is an address of this host.
        const IS_LOCAL_ADDRESS = 1 << 16;
        /// Traffic to the target does not go through a gateway.
        const IS_DIRECT = 1 << 17;
    }
}

/// What a reachability watch evaluates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReachabilityTarget {
    Address(SocketAddr),
    Name(String),
}

impl ReachabilityTarget {
    /// The target as an IP address, when it is one or its name is an IP
    /// literal.
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Self::Address(addr) => Some(addr.ip()),
            Self::Name(name) => name.parse().ok(),
        }
    }
}

pub type ReachabilityCallback = Box<dyn FnOnce(ReachabilityFlags) + Send>;

/// One target under evaluation. Dropping the watch abandons an unfinished
/// evaluation.
pub trait ReachabilityWatch: Send {
    /// Evaluate the flags synchronously.
    fn flags_now(&self) -> Result<ReachabilityFlags, StreamError>;

    /// Report flags through `callback` once, now or later.
    fn start(&mut self, callback: ReachabilityCallback) -> Result<(), StreamError>;
}

/// Creates reachability watches.
pub trait ReachabilityProvider: Send + Sync + fmt::Debug {
    fn create(&self, target: &ReachabilityTarget) -> Result<Box<dyn ReachabilityWatch>, StreamError>;
}

/// Addresses and state of one local interface.
#[derive(Debug, Clone, Default)]
pub struct InterfaceSnapshot {
    pub name: String,
    pub is_up: bool,
    pub is_loopback: bool,
    /// Assigned addresses with their prefix lengths.
    pub networks: Vec<(IpAddr, u8)>,
}

impl InterfaceSnapshot {
    /// Snapshot every local interface, plus whether a default interface
    /// exists.
    pub fn collect() -> (Vec<InterfaceSnapshot>, bool) {
        let interfaces = netdev::get_interfaces()
            .into_iter()
            .map(|iface| {
                let mut networks: Vec<(IpAddr, u8)> = iface
                    .ipv4
                    .iter()
                    .map(|net| (IpAddr::V4(net.addr()), net.prefix_len()))
                    .collect();
                networks.extend(
                    iface
                        .ipv6
                        .iter()
                        .map(|net| (IpAddr::V6(net.addr()), net.prefix_len())),
                );
                InterfaceSnapshot {
                    name: iface.name.clone(),
                    is_up: iface.is_up(),
                    is_loopback: iface.is_loopback(),
                    networks,
                }
            })
            .collect();
        let has_default = netdev::get_default_interface().is_ok();
        (interfaces, has_default)
    }
}

fn same_network(a: IpAddr, b: IpAddr, prefix_len: u8) -> bool {
    match (a, b) {
        (IpAddr::V4(a), IpAddr::V4(b)) => {
            let prefix = u32::from(prefix_len.min(32));
            if prefix == 0 {
                return true;
            }
            let mask = u32::MAX << (32 - prefix);
            u32::from(a) & mask == u32::from(b) & mask
        }
        (IpAddr::V6(a), IpAddr::V6(b)) => {
            let prefix = u32::from(prefix_len.min(128));
            if prefix == 0 {
                return true;
            }
            let mask = u128::MAX << (128 - prefix);
            u128::from(a) & mask == u128::from(b) & mask
        }
        _ => false,
    }
}

/// Judge `target` against a set of interfaces.
pub fn evaluate(
    target: IpAddr,
    interfaces: &[InterfaceSnapshot],
    has_default_route: bool,
) -> ReachabilityFlags {
    let up = || interfaces.iter().filter(|iface| iface.is_up);

    let local = up().any(|iface| iface.networks.iter().any(|(addr, _)| *addr == target));
    if local || (target.is_loopback() && up().any(|iface| iface.is_loopback)) {
        return ReachabilityFlags::REACHABLE
            | ReachabilityFlags::IS_LOCAL_ADDRESS
            | ReachabilityFlags::IS_DIRECT;
    }

    let on_link = up().filter(|iface| !iface.is_loopback).any(|iface| {
        iface
            .networks
            .iter()
            .any(|(addr, prefix)| same_network(*addr, target, *prefix))
    });
    if on_link {
        return ReachabilityFlags::REACHABLE | ReachabilityFlags::IS_DIRECT;
    }

    let routable = up().any(|iface| !iface.is_loopback && !iface.networks.is_empty());
    if has_default_route && routable {
        ReachabilityFlags::REACHABLE
    } else {
        ReachabilityFlags::empty()
    }
}

fn evaluate_now(target: IpAddr) -> ReachabilityFlags {
    let (interfaces, has_default) = InterfaceSnapshot::collect();
    evaluate(target, &interfaces, has_default)
}

/// Flags for the first address a forward lookup produced. A failed or empty
/// lookup is unreachable.
fn flags_for(result: Result<ForwardLookup, StreamError>) -> ReachabilityFlags {
    match result {
        Ok(lookup) => lookup
            .addresses
            .first()
            .map_or_else(ReachabilityFlags::empty, |addr| evaluate_now(addr.ip())),
        Err(_) => ReachabilityFlags::empty(),
    }
}

/// Reachability judged from the local interface table.
#[derive(Debug, Clone)]
pub struct InterfaceReachability {
    resolver: Arc<dyn PlatformResolver>,
}

impl InterfaceReachability {
    /// A provider that resolves name targets through `resolver`.
    pub fn new(resolver: Arc<dyn PlatformResolver>) -> Self {
        Self { resolver }
    }
}

impl ReachabilityProvider for InterfaceReachability {
    fn create(&self, target: &ReachabilityTarget) -> Result<Box<dyn ReachabilityWatch>, StreamError> {
        if let ReachabilityTarget::Name(name) = target {
            if name.is_empty() || name.contains('\0') {
                return Err(StreamError::reachability(STATUS_FAILED));
            }
        }
        Ok(Box::new(InterfaceWatch {
            target: target.clone(),
            resolver: self.resolver.clone(),
            lookup: None,
        }))
    }
}

struct InterfaceWatch {
    target: ReachabilityTarget,
    resolver: Arc<dyn PlatformResolver>,
    // Dropping the handle cancels an unfinished name lookup.
    lookup: Option<LookupHandle>,
}

impl InterfaceWatch {
    fn name(&self) -> Result<&str, StreamError> {
        match &self.target {
            ReachabilityTarget::Name(name) => Ok(name),
            ReachabilityTarget::Address(_) => Err(StreamError::reachability(STATUS_FAILED)),
        }
    }
}

impl ReachabilityWatch for InterfaceWatch {
    fn flags_now(&self) -> Result<ReachabilityFlags, StreamError> {
        if let Some(ip) = self.target.ip() {
            return Ok(evaluate_now(ip));
        }
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let _lookup = self.resolver.start_forward(
            self.name()?,
            AddressFamily::Unspecified,
            Box::new(move |result| {
                let _ = sender.send(result);
            }),
        )?;
        let result = receiver
            .recv()
            .map_err(|_| StreamError::reachability(STATUS_FAILED))?;
        Ok(flags_for(result))
    }

    fn start(&mut self, callback: ReachabilityCallback) -> Result<(), StreamError> {
        if let Some(ip) = self.target.ip() {
            callback(evaluate_now(ip));
            return Ok(());
        }
        let name = self.name()?;
        let host = name.to_string();
        let handle = self.resolver.start_forward(
            name,
            AddressFamily::Unspecified,
            Box::new(move |result| {
                let flags = flags_for(result);
                tracing::trace!(target: targets::REACHABILITY, %host, ?flags, "name evaluated");
                callback(flags);
            }),
        )?;
        self.lookup = Some(handle);
        Ok(())
    }
}

static_assertions::assert_impl_all!(ReachabilityFlags: Send, Sync);
static_assertions::assert_impl_all!(InterfaceReachability: Send, Sync);
