//! Stream error values shared by every resolver component.
//!
//! A [`StreamError`] is a `(domain, code)` pair. The domain says which
//! numbering scheme the code belongs to: POSIX `errno` values, resolver
//! (`netdb`) status codes, or reachability codes.

use std::fmt;

/// The numbering scheme a [`StreamError`] code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    /// POSIX `errno` values.
    Posix,
    /// Resolver status codes (`EAI_*`, `h_errno`).
    NetDb,
    /// Reachability (SystemConfiguration) codes.
    SystemConfiguration,
    /// Any other numeric domain.
    Custom(i32),
}

impl ErrorDomain {
    /// Numeric value of the domain.
    pub fn raw(self) -> i32 {
        match self {
            Self::Posix => 1,
            Self::NetDb => 12,
            Self::SystemConfiguration => 13,
            Self::Custom(raw) => raw,
        }
    }

    /// Map a numeric domain back to its variant.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::Posix,
            12 => Self::NetDb,
            13 => Self::SystemConfiguration,
            other => Self::Custom(other),
        }
    }
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Posix => write!(f, "posix"),
            Self::NetDb => write!(f, "netdb"),
            Self::SystemConfiguration => write!(f, "system-configuration"),
            Self::Custom(raw) => write!(f, "domain {raw}"),
        }
    }
}

/// An error reported by a resolution: a domain plus a numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamError {
    /// Which numbering scheme `code` belongs to.
    pub domain: ErrorDomain,
    /// The domain-specific code.
    pub code: i32,
}

impl StreamError {
    /// Create an error from a domain and code.
    pub const fn new(domain: ErrorDomain, code: i32) -> Self {
        Self { domain, code }
    }

    /// An error in the POSIX domain.
    pub const fn posix(code: i32) -> Self {
        Self::new(ErrorDomain::Posix, code)
    }

    /// An error in the resolver domain.
    pub const fn netdb(code: i32) -> Self {
        Self::new(ErrorDomain::NetDb, code)
    }

    /// An error in the reachability domain.
    pub const fn reachability(code: i32) -> Self {
        Self::new(ErrorDomain::SystemConfiguration, code)
    }

    /// Returns `true` if the error is a POSIX error with the given code.
    pub fn is_posix(&self, code: i32) -> bool {
        self.domain == ErrorDomain::Posix && self.code == code
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error {}", self.domain, self.code)
    }
}

impl std::error::Error for StreamError {}
