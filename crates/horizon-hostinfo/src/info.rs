//! Info types and values a host can resolve.

use std::fmt;
use std::net::SocketAddr;

use crate::platform::DnsReply;
use crate::reachability::ReachabilityFlags;

const ADDRESSES: u32 = 0;
const NAMES: u32 = 1;
const REACHABILITY: u32 = 2;
const IPV4_ADDRESSES: u32 = 0xFFFE;
const IPV6_ADDRESSES: u32 = 0xFFFD;
const MASTER: u32 = 0xFFFC;
const DIRECT_ADDRESSES: u32 = 0xFFFB;

/// The kind of information a resolution produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoType {
    /// Forward lookup of all addresses. Shared across hosts and cached.
    Addresses,
    /// Reverse lookup of the host's address.
    Names,
    /// Reachability flags of the host.
    Reachability,
    /// Forward lookup restricted to IPv4.
    Ipv4Addresses,
    /// Forward lookup restricted to IPv6.
    Ipv6Addresses,
    /// Forward lookup that bypasses sharing and the cache.
    DirectAddresses,
    /// Raw DNS query for the given class and record type.
    ///
    /// Class 0 is reserved: such a value has no distinct raw form and
    /// starting a resolution of it fails. Build queries with
    /// [`InfoType::dns`] to rule it out.
    Dns {
        /// Query class (1 = IN).
        class: u16,
        /// Record type (1 = A, 28 = AAAA, 16 = TXT, ...).
        record_type: u16,
    },
}

impl InfoType {
    /// Map a raw numeric info type to its variant.
    ///
    /// Raw values that are not one of the named types are treated as
    /// `class << 16 | record_type`. The value reserved for internal shared
    /// lookups is rejected.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            ADDRESSES => Self::Addresses,
            NAMES => Self::Names,
            REACHABILITY => Self::Reachability,
            IPV4_ADDRESSES => Self::Ipv4Addresses,
            IPV6_ADDRESSES => Self::Ipv6Addresses,
            DIRECT_ADDRESSES => Self::DirectAddresses,
            MASTER => return None,
            other => Self::Dns {
                class: (other >> 16) as u16,
                record_type: (other & 0xFFFF) as u16,
            },
        })
    }

    /// A raw DNS query type. Returns `None` for the reserved class 0.
    pub fn dns(class: u16, record_type: u16) -> Option<Self> {
        (class != 0).then_some(Self::Dns { class, record_type })
    }

    /// The raw numeric value of this info type.
    ///
    /// `from_raw(info.as_raw()) == Some(info)` for every value except a
    /// `Dns` query of class 0, whose raw value overlaps the named types.
    pub fn as_raw(self) -> u32 {
        match self {
            Self::Addresses => ADDRESSES,
            Self::Names => NAMES,
            Self::Reachability => REACHABILITY,
            Self::Ipv4Addresses => IPV4_ADDRESSES,
            Self::Ipv6Addresses => IPV6_ADDRESSES,
            Self::DirectAddresses => DIRECT_ADDRESSES,
            Self::Dns { class, record_type } => (u32::from(class) << 16) | u32::from(record_type),
        }
    }

    /// Whether this info type resolves a list of addresses.
    pub fn yields_addresses(self) -> bool {
        matches!(
            self,
            Self::Addresses | Self::Ipv4Addresses | Self::Ipv6Addresses | Self::DirectAddresses
        )
    }
}

impl fmt::Display for InfoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Addresses => write!(f, "addresses"),
            Self::Names => write!(f, "names"),
            Self::Reachability => write!(f, "reachability"),
            Self::Ipv4Addresses => write!(f, "ipv4 addresses"),
            Self::Ipv6Addresses => write!(f, "ipv6 addresses"),
            Self::DirectAddresses => write!(f, "direct addresses"),
            Self::Dns { class, record_type } => write!(f, "dns class {class} type {record_type}"),
        }
    }
}

/// A resolved value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostInfo {
    /// Socket addresses, port 0 unless the platform reported one.
    Addresses(Vec<SocketAddr>),
    /// Host names.
    Names(Vec<String>),
    /// Reachability flags.
    Reachability(ReachabilityFlags),
    /// A raw DNS reply.
    Dns(DnsReply),
}

impl HostInfo {
    pub fn as_addresses(&self) -> Option<&[SocketAddr]> {
        match self {
            Self::Addresses(addrs) => Some(addrs),
            _ => None,
        }
    }

    pub fn as_names(&self) -> Option<&[String]> {
        match self {
            Self::Names(names) => Some(names),
            _ => None,
        }
    }

    /// Whether the value carries no data.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Addresses(addrs) => addrs.is_empty(),
            Self::Names(names) => names.is_empty(),
            Self::Reachability(_) => false,
            Self::Dns(reply) => reply.reply.is_empty(),
        }
    }
}

/// Resolution state of one info type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoState<T> {
    /// Never resolved.
    Unresolved,
    /// Resolved, but no data came back (or the resolution failed).
    ResolvedEmpty,
    /// Resolved with a value.
    Resolved(T),
}

impl<T> InfoState<T> {
    /// Distinguishes "not yet attempted" from "attempted".
    pub fn has_been_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }

    /// The value, if any.
    pub fn value(self) -> Option<T> {
        match self {
            Self::Resolved(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> InfoState<&T> {
        match self {
            Self::Unresolved => InfoState::Unresolved,
            Self::ResolvedEmpty => InfoState::ResolvedEmpty,
            Self::Resolved(value) => InfoState::Resolved(value),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> InfoState<U> {
        match self {
            Self::Unresolved => InfoState::Unresolved,
            Self::ResolvedEmpty => InfoState::ResolvedEmpty,
            Self::Resolved(value) => InfoState::Resolved(f(value)),
        }
    }
}
