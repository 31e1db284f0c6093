//! Resolver status codes and their mapping to [`StreamError`]s.

use horizon_hostinfo_core::StreamError;

/// Internal resolver failure (`h_errno` scheme).
pub const NETDB_INTERNAL: i32 = -1;
/// Authoritative "no such host" (`h_errno` scheme).
pub const HOST_NOT_FOUND: i32 = 1;

#[cfg(unix)]
pub const EAI_FAIL: i32 = libc::EAI_FAIL;
#[cfg(unix)]
pub const EAI_NONAME: i32 = libc::EAI_NONAME;
#[cfg(unix)]
pub const EAI_SYSTEM: i32 = libc::EAI_SYSTEM;

#[cfg(not(unix))]
pub const EAI_FAIL: i32 = 4;
#[cfg(not(unix))]
pub const EAI_NONAME: i32 = 8;
#[cfg(not(unix))]
pub const EAI_SYSTEM: i32 = 11;

/// Map a `getaddrinfo`-style status to an error.
///
/// Returns `None` for status 0. `EAI_SYSTEM` reports `errno` in the POSIX
/// domain; every other status is reported as-is in the resolver domain.
pub fn error_from_status(status: i32, errno: i32) -> Option<StreamError> {
    match status {
        0 => None,
        EAI_SYSTEM => Some(StreamError::posix(errno)),
        other => Some(StreamError::netdb(other)),
    }
}

/// The error for a lookup that failed before the platform produced a status.
///
/// `errno` is used when set, otherwise the failure is reported as an internal
/// resolver error.
pub fn intuit_error(errno: i32) -> StreamError {
    if errno != 0 {
        StreamError::posix(errno)
    } else {
        StreamError::netdb(NETDB_INTERNAL)
    }
}

/// The calling thread's last OS error code, or 0.
pub(crate) fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
