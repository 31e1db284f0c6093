//! `getaddrinfo`/`getnameinfo` backend.
//!
//! The libc calls block, so each lookup runs on one of a small pool of named
//! worker threads fed through a channel. A cancelled lookup still runs to
//! completion on its worker but its callback is dropped.

use std::ffi::{CStr, CString};
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use horizon_hostinfo_core::StreamError;
use horizon_hostinfo_core::logging::targets;

use super::netdb;
use super::{
    AddressFamily, ForwardCallback, ForwardLookup, LookupHandle, PlatformResolver, QueryCallback,
    ReverseCallback,
};
use crate::error::{HostError, Result};

const NI_MAXHOST: usize = 1025;

enum GaiJob {
    Forward {
        name: CString,
        family: AddressFamily,
        cancelled: Arc<AtomicBool>,
        callback: ForwardCallback,
    },
    Reverse {
        address: SocketAddr,
        cancelled: Arc<AtomicBool>,
        callback: ReverseCallback,
    },
}

/// Resolver backed by the C library's `getaddrinfo` and `getnameinfo`.
#[derive(Debug)]
pub struct GaiResolver {
    sender: Sender<GaiJob>,
    workers: Vec<JoinHandle<()>>,
}

impl GaiResolver {
    /// Spawn `workers` lookup threads.
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(HostError::Config(
                "at least one getaddrinfo worker is required".into(),
            ));
        }
        let (sender, receiver) = unbounded();
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("hostinfo-gai-{index}"))
                .spawn(move || worker_loop(receiver))
                .map_err(|e| HostError::Config(format!("failed to spawn resolver thread: {e}")))?;
            handles.push(handle);
        }
        Ok(Self {
            sender,
            workers: handles,
        })
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn submit(&self, job: GaiJob, cancelled: Arc<AtomicBool>) -> std::result::Result<LookupHandle, StreamError> {
        self.sender
            .send(job)
            .map_err(|_| netdb::intuit_error(0))?;
        Ok(LookupHandle::new(move || {
            cancelled.store(true, Ordering::SeqCst);
        }))
    }
}

impl PlatformResolver for GaiResolver {
    fn start_forward(
        &self,
        name: &str,
        family: AddressFamily,
        callback: ForwardCallback,
    ) -> std::result::Result<LookupHandle, StreamError> {
        let name = CString::new(name).map_err(|_| StreamError::netdb(netdb::HOST_NOT_FOUND))?;
        let cancelled = Arc::new(AtomicBool::new(false));
        let job = GaiJob::Forward {
            name,
            family,
            cancelled: cancelled.clone(),
            callback,
        };
        self.submit(job, cancelled)
    }

    fn start_reverse(
        &self,
        address: SocketAddr,
        callback: ReverseCallback,
    ) -> std::result::Result<LookupHandle, StreamError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let job = GaiJob::Reverse {
            address,
            cancelled: cancelled.clone(),
            callback,
        };
        self.submit(job, cancelled)
    }

    fn start_query(
        &self,
        _name: &str,
        _class: u16,
        _record_type: u16,
        _callback: QueryCallback,
    ) -> std::result::Result<LookupHandle, StreamError> {
        Err(StreamError::posix(libc::EOPNOTSUPP))
    }
}

fn worker_loop(receiver: Receiver<GaiJob>) {
    // Exits once the resolver is dropped and the queue drains.
    while let Ok(job) = receiver.recv() {
        match job {
            GaiJob::Forward {
                name,
                family,
                cancelled,
                callback,
            } => {
                if cancelled.load(Ordering::SeqCst) {
                    continue;
                }
                let result = lookup_forward(&name, family);
                if let Err(err) = &result {
                    tracing::trace!(target: targets::PLATFORM, name = ?name, %err, "getaddrinfo failed");
                }
                if !cancelled.load(Ordering::SeqCst) {
                    callback(result);
                }
            }
            GaiJob::Reverse {
                address,
                cancelled,
                callback,
            } => {
                if cancelled.load(Ordering::SeqCst) {
                    continue;
                }
                let result = lookup_reverse(&address);
                if !cancelled.load(Ordering::SeqCst) {
                    callback(result);
                }
            }
        }
    }
}

fn lookup_forward(name: &CStr, family: AddressFamily) -> std::result::Result<ForwardLookup, StreamError> {
    // SAFETY: addrinfo is a plain C struct; all-zero is a valid "no hints" value.
    let mut hints: libc::addrinfo = unsafe { mem::zeroed() };
    hints.ai_flags = libc::AI_ADDRCONFIG | libc::AI_CANONNAME;
    hints.ai_family = match family {
        AddressFamily::Unspecified => libc::AF_UNSPEC,
        AddressFamily::Ipv4 => libc::AF_INET,
        AddressFamily::Ipv6 => libc::AF_INET6,
    };
    hints.ai_socktype = libc::SOCK_STREAM;

    let mut res: *mut libc::addrinfo = ptr::null_mut();
    // SAFETY: name is NUL terminated, hints and res outlive the call.
    let status = unsafe { libc::getaddrinfo(name.as_ptr(), ptr::null(), &hints, &mut res) };
    let errno = netdb::last_errno();
    if let Some(err) = netdb::error_from_status(status, errno) {
        return Err(err);
    }

    let mut lookup = ForwardLookup::default();
    let mut cursor = res;
    while !cursor.is_null() {
        // SAFETY: cursor walks the list getaddrinfo returned, which stays
        // valid until freeaddrinfo.
        let info = unsafe { &*cursor };
        if let Some(addr) = unsafe { from_sockaddr(info.ai_addr, info.ai_addrlen) } {
            if !lookup.addresses.contains(&addr) {
                lookup.addresses.push(addr);
            }
        }
        if !info.ai_canonname.is_null() {
            // SAFETY: ai_canonname is a NUL terminated string owned by the list.
            let canonical = unsafe { CStr::from_ptr(info.ai_canonname) }
                .to_string_lossy()
                .into_owned();
            if !canonical.is_empty() && !lookup.aliases.contains(&canonical) {
                lookup.aliases.push(canonical);
            }
        }
        cursor = info.ai_next;
    }
    if !res.is_null() {
        // SAFETY: res came from a successful getaddrinfo and is freed once.
        unsafe { libc::freeaddrinfo(res) };
    }
    Ok(lookup)
}

fn lookup_reverse(address: &SocketAddr) -> std::result::Result<String, StreamError> {
    let (storage, len) = to_sockaddr(address);
    let mut host = [0 as libc::c_char; NI_MAXHOST];
    // SAFETY: storage holds a sockaddr of length len; host is a writable
    // buffer of the advertised size.
    let status = unsafe {
        libc::getnameinfo(
            &storage as *const libc::sockaddr_storage as *const libc::sockaddr,
            len,
            host.as_mut_ptr(),
            NI_MAXHOST as libc::socklen_t,
            ptr::null_mut(),
            0,
            0,
        )
    };
    let errno = netdb::last_errno();
    if let Some(err) = netdb::error_from_status(status, errno) {
        return Err(err);
    }
    // SAFETY: getnameinfo NUL terminates host on success.
    Ok(unsafe { CStr::from_ptr(host.as_ptr()) }
        .to_string_lossy()
        .into_owned())
}

/// Convert a C socket address to a [`SocketAddr`].
///
/// # Safety
///
/// `sa` must be null or point to at least `len` readable bytes.
unsafe fn from_sockaddr(sa: *const libc::sockaddr, len: libc::socklen_t) -> Option<SocketAddr> {
    if sa.is_null() {
        return None;
    }
    let len = len as usize;
    // SAFETY: the caller guarantees sa is readable; the family field is
    // common to every sockaddr variant.
    match i32::from(unsafe { (*sa).sa_family }) {
        libc::AF_INET if len >= mem::size_of::<libc::sockaddr_in>() => {
            // SAFETY: family and length checked above.
            let sin = unsafe { &*(sa as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        libc::AF_INET6 if len >= mem::size_of::<libc::sockaddr_in6>() => {
            // SAFETY: family and length checked above.
            let sin6 = unsafe { &*(sa as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

fn to_sockaddr(address: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    // SAFETY: sockaddr_storage is a plain C struct; all-zero is valid.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match address {
        SocketAddr::V4(v4) => {
            // SAFETY: sockaddr_storage is large and aligned enough for any
            // sockaddr variant.
            let sin = unsafe { &mut *(&mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_in) };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr = libc::in_addr {
                s_addr: u32::from(*v4.ip()).to_be(),
            };
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "netbsd",
                target_os = "dragonfly"
            ))]
            {
                sin.sin_len = mem::size_of::<libc::sockaddr_in>() as u8;
            }
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            // SAFETY: as above.
            let sin6 = unsafe { &mut *(&mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_in6) };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_scope_id = v6.scope_id();
            sin6.sin6_addr = libc::in6_addr {
                s6_addr: v6.ip().octets(),
            };
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "netbsd",
                target_os = "dragonfly"
            ))]
            {
                sin6.sin6_len = mem::size_of::<libc::sockaddr_in6>() as u8;
            }
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}
