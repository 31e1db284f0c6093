//! Error types for host resolution.

use horizon_hostinfo_core::StreamError;
use thiserror::Error;

use crate::info::InfoType;

/// Errors that can occur when starting or configuring host resolution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// A resolution is already pending on this host.
    #[error("a {0} resolution is already in progress")]
    AlreadyResolving(InfoType),

    /// The requested info type needs a name and the host has none.
    #[error("host has no name to resolve")]
    MissingName,

    /// The requested info type needs an address and the host has none.
    #[error("host has no address to resolve")]
    MissingAddress,

    /// The resolution failed or was cancelled.
    #[error("resolution failed: {0}")]
    Stream(#[from] StreamError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The global registry was already installed.
    #[error("host registry already initialized")]
    AlreadyInitialized,
}

impl HostError {
    /// The stream error carried by this error, if any.
    pub fn stream_error(&self) -> Option<StreamError> {
        match self {
            Self::Stream(err) => Some(*err),
            _ => None,
        }
    }

    /// Whether this error reports a cancelled resolution.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Stream(err) if err.is_posix(libc::ECANCELED))
    }
}

/// A specialized Result type for host operations.
pub type Result<T> = std::result::Result<T, HostError>;
