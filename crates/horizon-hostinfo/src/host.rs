//! Resolution objects.
//!
//! A [`Host`] holds what is known about one host (its info map) and runs at
//! most one resolution at a time. Every resolution is represented by a
//! completion [`Source`]: platform callbacks, cache hits, shared master
//! lookups and cancellations all finish by signalling that source, and the
//! result is applied when a run loop performs it.
//!
//! Without a [`HostClient`], [`Host::start_resolution`] blocks by running the
//! calling thread's loop in [`BLOCKING_MODE`] until the resolution clears.
//! With a client, it returns at once and the client is called from whichever
//! scheduled loop performs the completion.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use horizon_hostinfo_core::logging::targets;
use horizon_hostinfo_core::{RunLoop, RunLoopMode, RunResult, ScheduleList, Source, StreamError};
use parking_lot::{Mutex, MutexGuard};

use crate::error::{HostError, Result};
use crate::info::{HostInfo, InfoState, InfoType};
use crate::platform::{AddressFamily, DnsReply, ForwardLookup, LookupHandle};
use crate::reachability::{ReachabilityFlags, ReachabilityTarget, ReachabilityWatch};
use crate::registry::{ClientToken, HostRegistry};

/// The private mode synchronous resolutions run their loop in.
pub const BLOCKING_MODE: RunLoopMode = RunLoopMode::from_static("horizon_hostinfo::blocking");

/// Upper bound on one blocking-mode run before the waiter rechecks its host.
const BLOCKING_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A successful platform result, before it is stored in an info map.
#[derive(Debug, Clone)]
pub(crate) enum Resolved {
    Forward(ForwardLookup),
    Name(String),
    Flags(ReachabilityFlags),
    Dns(DnsReply),
}

pub(crate) type Outcome = std::result::Result<Resolved, StreamError>;

/// Where a completion parks its outcome until the lookup's source is
/// performed.
pub(crate) type CompletionSlot = Arc<Mutex<Option<Outcome>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LookupKind {
    Info(InfoType),
    /// The shared lookup a registry master performs for its clients.
    Master,
}

impl LookupKind {
    fn info_type(self) -> InfoType {
        match self {
            Self::Info(info) => info,
            Self::Master => InfoType::Addresses,
        }
    }
}

enum PendingOp {
    Platform(LookupHandle),
    /// Waiting on the registry master for `name`.
    Client {
        name: String,
    },
    Reachability(Box<dyn ReachabilityWatch>),
    /// Already signalled with its outcome.
    Immediate,
    Cancel,
}

struct PendingLookup {
    kind: LookupKind,
    source: Source,
    op: PendingOp,
}

pub(crate) struct HostState {
    info: HashMap<InfoType, InfoState<HostInfo>>,
    lookup: Option<PendingLookup>,
    error: Option<StreamError>,
    schedules: ScheduleList,
    client: Option<HostClient>,
}

impl HostState {
    /// Whether the current lookup is the one `source` completes.
    pub(crate) fn is_pending_on(&self, source: &Source) -> bool {
        self.lookup
            .as_ref()
            .is_some_and(|pending| pending.source == *source)
    }

    pub(crate) fn schedules(&self) -> &ScheduleList {
        &self.schedules
    }

    fn names(&self) -> Vec<String> {
        match self.info.get(&InfoType::Names) {
            Some(InfoState::Resolved(HostInfo::Names(names))) => names.clone(),
            _ => Vec::new(),
        }
    }

    fn addresses(&self) -> Vec<SocketAddr> {
        match self.info.get(&InfoType::Addresses) {
            Some(InfoState::Resolved(HostInfo::Addresses(addresses))) => addresses.clone(),
            _ => Vec::new(),
        }
    }

    fn name(&self) -> Option<String> {
        self.names().into_iter().next()
    }

    fn address(&self) -> Option<SocketAddr> {
        self.addresses().into_iter().next()
    }

    /// The name to query, falling back to the textual address.
    fn query_name(&self) -> Option<String> {
        self.name()
            .or_else(|| self.address().map(|address| address.ip().to_string()))
    }

    fn store(&mut self, kind: LookupKind, resolved: Resolved) {
        let info = kind.info_type();
        let value = match resolved {
            Resolved::Forward(lookup) => {
                if kind == LookupKind::Master {
                    self.add_names(lookup.aliases);
                }
                non_empty(!lookup.addresses.is_empty(), HostInfo::Addresses(lookup.addresses))
            }
            Resolved::Name(name) => non_empty(!name.is_empty(), HostInfo::Names(vec![name])),
            Resolved::Flags(flags) => InfoState::Resolved(HostInfo::Reachability(flags)),
            Resolved::Dns(reply) => non_empty(!reply.reply.is_empty(), HostInfo::Dns(reply)),
        };
        self.info.insert(info, value);
    }

    fn add_names(&mut self, aliases: Vec<String>) {
        let mut names = self.names();
        for alias in aliases {
            if !names.contains(&alias) {
                names.push(alias);
            }
        }
        if !names.is_empty() {
            self.info
                .insert(InfoType::Names, InfoState::Resolved(HostInfo::Names(names)));
        }
    }
}

fn non_empty(present: bool, value: HostInfo) -> InfoState<HostInfo> {
    if present {
        InfoState::Resolved(value)
    } else {
        InfoState::ResolvedEmpty
    }
}

pub(crate) struct HostInner {
    registry: Arc<HostRegistry>,
    state: Mutex<HostState>,
}

impl Drop for HostInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if detach_lookup(state, &self.registry).is_some() {
            tracing::trace!(target: targets::HOST, "pending resolution cancelled on release");
        }
    }
}

/// Take the pending lookup off `state`, detach its source from every loop
/// and leave any master it was waiting on.
fn detach_lookup(state: &mut HostState, registry: &HostRegistry) -> Option<PendingLookup> {
    let pending = state.lookup.take()?;
    state.schedules.unschedule(&pending.source);
    pending.source.invalidate();
    if let PendingOp::Client { name } = &pending.op {
        registry.unlink_client(name, &pending.source);
    }
    Some(pending)
}

type ClientFn = dyn Fn(&Host, InfoType, Option<&StreamError>) + Send + Sync;

/// Completion callback of a [`Host`].
///
/// The closure owns whatever context it captures; the context is released
/// when the client is replaced, cleared, or the host goes away.
#[derive(Clone)]
pub struct HostClient {
    callback: Arc<ClientFn>,
}

impl HostClient {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Host, InfoType, Option<&StreamError>) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    fn call(&self, host: &Host, info: InfoType, error: Option<&StreamError>) {
        (self.callback)(host, info, error)
    }
}

impl fmt::Debug for HostClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostClient").finish_non_exhaustive()
    }
}

/// A host name or address and everything resolved about it.
///
/// Cloning a `Host` yields another handle to the same host. When the last
/// handle is dropped any pending resolution is cancelled.
///
/// # Example
///
/// ```no_run
/// use horizon_hostinfo::{Host, InfoType};
///
/// let host = Host::with_name("localhost");
/// host.start_resolution(InfoType::Addresses)?;
/// println!("{:?}", host.addresses());
/// # Ok::<(), horizon_hostinfo::HostError>(())
/// ```
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

impl Host {
    /// A host known by name, resolved through the global registry.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self::with_name_in(name, HostRegistry::global())
    }

    /// A host known by name, resolved through `registry`.
    pub fn with_name_in(name: impl Into<String>, registry: Arc<HostRegistry>) -> Self {
        let mut info = HashMap::new();
        info.insert(
            InfoType::Names,
            InfoState::Resolved(HostInfo::Names(vec![name.into()])),
        );
        Self::from_info(info, registry)
    }

    /// A host known by address, resolved through the global registry.
    pub fn with_address(address: SocketAddr) -> Self {
        Self::with_address_in(address, HostRegistry::global())
    }

    /// A host known by address, resolved through `registry`.
    pub fn with_address_in(address: SocketAddr, registry: Arc<HostRegistry>) -> Self {
        let mut info = HashMap::new();
        info.insert(
            InfoType::Addresses,
            InfoState::Resolved(HostInfo::Addresses(vec![address])),
        );
        Self::from_info(info, registry)
    }

    /// A new idle host with a snapshot of this host's info.
    pub fn create_copy(&self) -> Self {
        let info = self.inner.state.lock().info.clone();
        Self::from_info(info, self.inner.registry.clone())
    }

    fn from_info(info: HashMap<InfoType, InfoState<HostInfo>>, registry: Arc<HostRegistry>) -> Self {
        Self {
            inner: Arc::new(HostInner {
                registry,
                state: Mutex::new(HostState {
                    info,
                    lookup: None,
                    error: None,
                    schedules: ScheduleList::new(),
                    client: None,
                }),
            }),
        }
    }

    pub(crate) fn upgrade(weak: &Weak<HostInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn downgrade(&self) -> Weak<HostInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, HostState> {
        self.inner.state.lock()
    }

    /// The registry this host resolves through.
    pub fn registry(&self) -> &Arc<HostRegistry> {
        &self.inner.registry
    }

    /// Start resolving `info`.
    ///
    /// With a client set this returns once the resolution is under way and
    /// the client is called on completion. Without one it blocks the calling
    /// thread until the resolution completes or is cancelled, returning the
    /// resolution's error, if any.
    pub fn start_resolution(&self, info: InfoType) -> Result<()> {
        let mut state = self.inner.state.lock();
        if let Some(pending) = &state.lookup {
            return Err(HostError::AlreadyResolving(pending.kind.info_type()));
        }
        state.error = None;

        let lookup = match self.create_lookup(&state, info) {
            Ok(lookup) => lookup,
            Err(err) => {
                if let HostError::Stream(stream) = &err {
                    state.error = Some(*stream);
                }
                tracing::trace!(target: targets::HOST, %info, %err, "resolution not started");
                return Err(err);
            }
        };
        tracing::trace!(target: targets::HOST, %info, "resolution started");
        let source = lookup.source.clone();
        state.lookup = Some(lookup);

        if state.client.is_some() {
            state.schedules.schedule(&source);
            return Ok(());
        }

        let run_loop = RunLoop::current();
        let added = state.schedules.add(&run_loop, &BLOCKING_MODE);
        run_loop.add_source(&source, &BLOCKING_MODE);
        drop(state);

        self.wait_for_completion(&run_loop);

        let mut state = self.inner.state.lock();
        if added {
            state.schedules.remove(&run_loop, &BLOCKING_MODE);
            if let Some(pending) = &state.lookup {
                run_loop.remove_source(&pending.source, &BLOCKING_MODE);
            }
        }
        match state.error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    #[tracing::instrument(name = "horizon_hostinfo::blocking_wait", skip_all, target = "horizon_hostinfo::host", level = "trace")]
    fn wait_for_completion(&self, run_loop: &RunLoop) {
        while self.is_resolving() {
            let result = run_loop.run_in_mode(&BLOCKING_MODE, Some(BLOCKING_POLL_INTERVAL), true);
            if result == RunResult::Finished {
                thread::yield_now();
            }
        }
    }

    fn create_lookup(&self, state: &HostState, info: InfoType) -> Result<PendingLookup> {
        let kind = LookupKind::Info(info);
        let registry = &self.inner.registry;

        let (source, op) = match info {
            InfoType::Addresses => {
                let name = state.name().ok_or(HostError::MissingName)?;
                if let Some(addresses) = registry.cached_addresses(&name) {
                    let (source, slot) = self.completion_source();
                    fill_slot(
                        &slot,
                        &source,
                        Ok(Resolved::Forward(ForwardLookup {
                            addresses,
                            aliases: Vec::new(),
                        })),
                    );
                    (source, PendingOp::Immediate)
                } else {
                    let host = self.downgrade();
                    let source = registry.join_or_create_master(&name, |master_source| {
                        let slot = CompletionSlot::default();
                        let master_source = master_source.clone();
                        let source = Source::with_schedule_hook(
                            perform_completion(host.clone(), slot.clone()),
                            move |run_loop, mode| run_loop.add_source(&master_source, mode),
                        );
                        ClientToken { host, source, slot }
                    })?;
                    (source, PendingOp::Client { name })
                }
            }
            InfoType::Ipv4Addresses | InfoType::Ipv6Addresses | InfoType::DirectAddresses => {
                let name = state.query_name().ok_or(HostError::MissingName)?;
                let family = match info {
                    InfoType::Ipv4Addresses => AddressFamily::Ipv4,
                    InfoType::Ipv6Addresses => AddressFamily::Ipv6,
                    _ => AddressFamily::Unspecified,
                };
                let (source, slot) = self.completion_source();
                let handle = registry.resolver().start_forward(
                    &name,
                    family,
                    completer(&slot, &source, move |mut lookup: ForwardLookup| {
                        lookup.addresses.retain(|address| family.admits(address));
                        Resolved::Forward(lookup)
                    }),
                )?;
                (source, PendingOp::Platform(handle))
            }
            InfoType::Names => {
                let address = state.address().ok_or(HostError::MissingAddress)?;
                let (source, slot) = self.completion_source();
                let handle = registry
                    .resolver()
                    .start_reverse(address, completer(&slot, &source, Resolved::Name))?;
                (source, PendingOp::Platform(handle))
            }
            InfoType::Reachability => {
                let Some(provider) = registry.reachability() else {
                    return Err(StreamError::posix(libc::EOPNOTSUPP).into());
                };
                let target = match (state.address(), state.name()) {
                    (Some(address), _) => ReachabilityTarget::Address(address),
                    (None, Some(name)) => ReachabilityTarget::Name(name),
                    (None, None) => return Err(HostError::MissingName),
                };
                let mut watch = provider.create(&target)?;
                let (source, slot) = self.completion_source();
                if target.ip().is_some() {
                    let flags = watch.flags_now()?;
                    fill_slot(&slot, &source, Ok(Resolved::Flags(flags)));
                    (source, PendingOp::Immediate)
                } else {
                    let (report_slot, report_source) = (slot.clone(), source.clone());
                    watch.start(Box::new(move |flags| {
                        complete_slot(&report_slot, &report_source, Ok(Resolved::Flags(flags)));
                    }))?;
                    (source, PendingOp::Reachability(watch))
                }
            }
            InfoType::Dns { class, record_type } => {
                // Class 0 is reserved.
                if class == 0 {
                    return Err(StreamError::posix(libc::EINVAL).into());
                }
                let name = state.query_name().ok_or(HostError::MissingName)?;
                let (source, slot) = self.completion_source();
                let handle = registry.resolver().start_query(
                    &name,
                    class,
                    record_type,
                    completer(&slot, &source, Resolved::Dns),
                )?;
                (source, PendingOp::Platform(handle))
            }
        };

        Ok(PendingLookup { kind, source, op })
    }

    /// Start the shared lookup of a registry master. Returns its source.
    pub(crate) fn start_master(&self) -> std::result::Result<Source, StreamError> {
        let mut state = self.inner.state.lock();
        let Some(name) = state.name() else {
            return Err(StreamError::netdb(crate::platform::netdb::HOST_NOT_FOUND));
        };
        let (source, slot) = self.completion_source();
        let handle = self.inner.registry.resolver().start_forward(
            &name,
            AddressFamily::Unspecified,
            completer(&slot, &source, Resolved::Forward),
        )?;
        state.lookup = Some(PendingLookup {
            kind: LookupKind::Master,
            source: source.clone(),
            op: PendingOp::Platform(handle),
        });
        Ok(source)
    }

    /// Drop the master lookup after its last client left.
    pub(crate) fn abandon(&self) {
        let pending = {
            let mut state = self.inner.state.lock();
            detach_lookup(&mut state, &self.inner.registry)
        };
        drop(pending);
    }

    pub(crate) fn pending_source(&self) -> Option<Source> {
        self.inner
            .state
            .lock()
            .lookup
            .as_ref()
            .map(|pending| pending.source.clone())
    }

    /// Addresses, names and error of a finished master.
    pub(crate) fn master_outcome(&self) -> (Vec<SocketAddr>, Vec<String>, Option<StreamError>) {
        let state = self.inner.state.lock();
        (state.addresses(), state.names(), state.error)
    }

    fn completion_source(&self) -> (Source, CompletionSlot) {
        let slot = CompletionSlot::default();
        let source = Source::new(perform_completion(self.downgrade(), slot.clone()));
        (source, slot)
    }

    /// Apply the outcome of the lookup `source` completes and call the
    /// client. Stale sources are ignored.
    fn complete(&self, source: &Source, outcome: Option<Outcome>) {
        let (pending, client, info, error) = {
            let mut state = self.inner.state.lock();
            if !state.is_pending_on(source) {
                return;
            }
            let Some(pending) = state.lookup.take() else {
                return;
            };
            state.schedules.unschedule(&pending.source);
            pending.source.invalidate();

            let info = pending.kind.info_type();
            match outcome {
                Some(Ok(resolved)) => {
                    state.info.remove(&info);
                    state.store(pending.kind, resolved);
                }
                Some(Err(err)) => {
                    state.error = Some(err);
                    state.info.insert(info, InfoState::ResolvedEmpty);
                }
                // Cancelled; the error is already recorded.
                None => {}
            }
            (pending, state.client.clone(), info, state.error)
        };
        drop(pending);

        tracing::trace!(target: targets::HOST, %info, ?error, "resolution finished");
        if let Some(client) = client {
            client.call(self, info, error.as_ref());
        }
    }

    /// What is known about `info`.
    pub fn info(&self, info: InfoType) -> InfoState<HostInfo> {
        self.inner
            .state
            .lock()
            .info
            .get(&info)
            .cloned()
            .unwrap_or(InfoState::Unresolved)
    }

    /// Whether `info` has ever been resolved, successfully or not.
    pub fn has_been_resolved(&self, info: InfoType) -> bool {
        self.inner.state.lock().info.contains_key(&info)
    }

    pub fn addresses(&self) -> Option<Vec<SocketAddr>> {
        match self.info(InfoType::Addresses).value() {
            Some(HostInfo::Addresses(addresses)) => Some(addresses),
            _ => None,
        }
    }

    pub fn names(&self) -> Option<Vec<String>> {
        match self.info(InfoType::Names).value() {
            Some(HostInfo::Names(names)) => Some(names),
            _ => None,
        }
    }

    pub fn reachability(&self) -> Option<ReachabilityFlags> {
        match self.info(InfoType::Reachability).value() {
            Some(HostInfo::Reachability(flags)) => Some(flags),
            _ => None,
        }
    }

    /// Cancel a pending resolution of `info`.
    ///
    /// The resolution completes promptly with a cancelled error, through the
    /// client when one is set, or by releasing a blocked
    /// [`start_resolution`](Self::start_resolution). Does nothing when no
    /// resolution of `info` is pending.
    pub fn cancel_resolution(&self, info: InfoType) {
        let previous = {
            let mut state = self.inner.state.lock();
            let cancellable = state.lookup.as_ref().is_some_and(|pending| {
                pending.kind == LookupKind::Info(info) && !matches!(pending.op, PendingOp::Cancel)
            });
            if !cancellable {
                return;
            }
            let previous = detach_lookup(&mut state, &self.inner.registry);

            state.error = Some(StreamError::posix(libc::ECANCELED));
            let (cancel, _) = self.completion_source();
            cancel.signal();
            state.schedules.schedule(&cancel);
            state.lookup = Some(PendingLookup {
                kind: LookupKind::Info(info),
                source: cancel,
                op: PendingOp::Cancel,
            });
            previous
        };
        drop(previous);
        tracing::trace!(target: targets::HOST, %info, "resolution cancelled");
    }

    /// Set or clear the completion callback.
    ///
    /// Clearing it cancels any pending resolution without calling anyone.
    /// Setting one while a synchronous resolution is pending moves that
    /// resolution onto the host's scheduled loops.
    pub fn set_client(&self, client: Option<HostClient>) -> bool {
        let (previous_client, previous_lookup) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            match client {
                None => {
                    let lookup = detach_lookup(state, &self.inner.registry);
                    (state.client.take(), lookup)
                }
                Some(client) => {
                    let was_synchronous = state.client.is_none();
                    let previous = state.client.replace(client);
                    if was_synchronous {
                        if let Some(pending) = &state.lookup {
                            state.schedules.schedule(&pending.source);
                        }
                    }
                    (previous, None)
                }
            }
        };
        drop(previous_lookup);
        drop(previous_client);
        true
    }

    /// Deliver completions on `run_loop` in `mode`, including the one already
    /// pending.
    pub fn schedule_with_run_loop(&self, run_loop: &RunLoop, mode: &RunLoopMode) {
        let mut state = self.inner.state.lock();
        if state.schedules.add(run_loop, mode) {
            if let Some(pending) = &state.lookup {
                run_loop.add_source(&pending.source, mode);
            }
        }
    }

    /// Stop delivering completions on `run_loop` in `mode`.
    pub fn unschedule_from_run_loop(&self, run_loop: &RunLoop, mode: &RunLoopMode) {
        let mut state = self.inner.state.lock();
        if state.schedules.remove(run_loop, mode) {
            if let Some(pending) = &state.lookup {
                run_loop.remove_source(&pending.source, mode);
            }
        }
    }

    /// Error of the last finished resolution.
    pub fn error(&self) -> Option<StreamError> {
        self.inner.state.lock().error
    }

    /// Whether a resolution is pending.
    pub fn is_resolving(&self) -> bool {
        self.inner.state.lock().lookup.is_some()
    }
}

/// Park `outcome` and mark `source` ready without waking anyone. For
/// sources that are not attached yet.
fn fill_slot(slot: &CompletionSlot, source: &Source, outcome: Outcome) {
    *slot.lock() = Some(outcome);
    source.signal();
}

/// Park `outcome` and wake every loop `source` is attached to.
fn complete_slot(slot: &CompletionSlot, source: &Source, outcome: Outcome) {
    fill_slot(slot, source, outcome);
    source.wake_loops();
}

/// A one-shot platform callback feeding `slot`.
fn completer<T, F>(
    slot: &CompletionSlot,
    source: &Source,
    into: F,
) -> Box<dyn FnOnce(std::result::Result<T, StreamError>) + Send>
where
    T: 'static,
    F: FnOnce(T) -> Resolved + Send + 'static,
{
    let (slot, source) = (slot.clone(), source.clone());
    Box::new(move |result| complete_slot(&slot, &source, result.map(into)))
}

fn perform_completion(
    host: Weak<HostInner>,
    slot: CompletionSlot,
) -> impl Fn(&Source) + Send + Sync + 'static {
    move |source| {
        // Holding the host keeps it alive through its own client callback.
        let Some(host) = Host::upgrade(&host) else {
            return;
        };
        let outcome = slot.lock().take();
        host.complete(source, outcome);
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Host {}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Host")
            .field("info", &state.info)
            .field(
                "resolving",
                &state.lookup.as_ref().map(|pending| pending.kind.info_type()),
            )
            .field("error", &state.error)
            .finish()
    }
}

static_assertions::assert_impl_all!(Host: Send, Sync);
static_assertions::assert_impl_all!(HostClient: Send, Sync);
