//! Resolution engine tests against a scripted platform resolver.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use horizon_hostinfo::platform::{ForwardCallback, QueryCallback, ReverseCallback};
use horizon_hostinfo::reachability::ReachabilityCallback;
use horizon_hostinfo::{
    AddressFamily, DnsReply, ForwardLookup, Host, HostClient, HostError, HostInfo, HostRegistry,
    InfoState, InfoType, LookupHandle, PlatformResolver, ReachabilityFlags, ReachabilityProvider,
    ReachabilityTarget, ReachabilityWatch, RunLoop, RunLoopMode, RunResult, StreamError,
};
use parking_lot::Mutex;

const WAIT: Duration = Duration::from_secs(5);

/// Records every lookup and completes it when the test says so.
#[derive(Default)]
struct ScriptedResolver {
    forward_calls: AtomicUsize,
    forward: Mutex<Vec<(String, AddressFamily, ForwardCallback)>>,
    reverse: Mutex<Vec<(SocketAddr, ReverseCallback)>>,
    queries: Mutex<Vec<(String, u16, u16, QueryCallback)>>,
}

impl fmt::Debug for ScriptedResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedResolver")
            .field("forward_calls", &self.forward_calls.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ScriptedResolver {
    fn forward_calls(&self) -> usize {
        self.forward_calls.load(Ordering::SeqCst)
    }

    fn wait_for_forward(&self, name: &str) -> bool {
        wait_until(|| self.forward.lock().iter().any(|(n, _, _)| n == name))
    }

    fn complete_forward(&self, name: &str, result: Result<ForwardLookup, StreamError>) -> bool {
        let callback = {
            let mut pending = self.forward.lock();
            match pending.iter().position(|(n, _, _)| n == name) {
                Some(pos) => pending.remove(pos).2,
                None => return false,
            }
        };
        callback(result);
        true
    }

    fn complete_reverse(&self, result: Result<String, StreamError>) -> bool {
        if !wait_until(|| !self.reverse.lock().is_empty()) {
            return false;
        }
        let (_, callback) = self.reverse.lock().remove(0);
        callback(result);
        true
    }
}

impl PlatformResolver for ScriptedResolver {
    fn start_forward(
        &self,
        name: &str,
        family: AddressFamily,
        callback: ForwardCallback,
    ) -> Result<LookupHandle, StreamError> {
        self.forward_calls.fetch_add(1, Ordering::SeqCst);
        self.forward.lock().push((name.to_string(), family, callback));
        Ok(LookupHandle::detached())
    }

    fn start_reverse(
        &self,
        address: SocketAddr,
        callback: ReverseCallback,
    ) -> Result<LookupHandle, StreamError> {
        self.reverse.lock().push((address, callback));
        Ok(LookupHandle::detached())
    }

    fn start_query(
        &self,
        name: &str,
        class: u16,
        record_type: u16,
        callback: QueryCallback,
    ) -> Result<LookupHandle, StreamError> {
        self.queries
            .lock()
            .push((name.to_string(), class, record_type, callback));
        Ok(LookupHandle::detached())
    }
}

#[derive(Debug)]
struct FixedReachability(ReachabilityFlags);

struct FixedWatch(ReachabilityFlags);

impl ReachabilityWatch for FixedWatch {
    fn flags_now(&self) -> Result<ReachabilityFlags, StreamError> {
        Ok(self.0)
    }

    fn start(&mut self, callback: ReachabilityCallback) -> Result<(), StreamError> {
        callback(self.0);
        Ok(())
    }
}

impl ReachabilityProvider for FixedReachability {
    fn create(&self, _target: &ReachabilityTarget) -> Result<Box<dyn ReachabilityWatch>, StreamError> {
        Ok(Box::new(FixedWatch(self.0)))
    }
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while !done() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    true
}

fn run_until(run_loop: &RunLoop, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while !done() {
        if Instant::now() >= deadline {
            return false;
        }
        run_loop.run_in_mode(&RunLoopMode::DEFAULT, Some(Duration::from_millis(10)), false);
    }
    true
}

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

fn lookup(addresses: &[&str]) -> ForwardLookup {
    ForwardLookup {
        addresses: addresses.iter().map(|a| addr(a)).collect(),
        aliases: Vec::new(),
    }
}

fn registry_with(resolver: &Arc<ScriptedResolver>, ttl: Duration) -> Arc<HostRegistry> {
    HostRegistry::builder()
        .resolver(resolver.clone())
        .cache_ttl(ttl)
        .build()
        .unwrap()
}

fn complete_forward_later(
    resolver: &Arc<ScriptedResolver>,
    name: &str,
    result: Result<ForwardLookup, StreamError>,
) -> thread::JoinHandle<bool> {
    let resolver = resolver.clone();
    let name = name.to_string();
    thread::spawn(move || resolver.wait_for_forward(&name) && resolver.complete_forward(&name, result))
}

type Calls = Arc<Mutex<Vec<(InfoType, Option<StreamError>)>>>;

fn recording_client() -> (HostClient, Calls) {
    let calls: Calls = Arc::default();
    let recorded = calls.clone();
    let client = HostClient::new(move |_, info, error| {
        recorded.lock().push((info, error.copied()));
    });
    (client, calls)
}

fn resolve_sync(
    resolver: &Arc<ScriptedResolver>,
    registry: &Arc<HostRegistry>,
    name: &str,
    result: Result<ForwardLookup, StreamError>,
) -> Host {
    let completer = complete_forward_later(resolver, name, result);
    let host = Host::with_name_in(name, registry.clone());
    host.start_resolution(InfoType::Addresses).unwrap();
    assert!(completer.join().unwrap());
    host
}

#[test]
fn test_concurrent_requests_share_one_lookup() {
    const HOSTS: usize = 8;
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));

    let waiters: Vec<_> = (0..HOSTS)
        .map(|_| {
            let registry = registry.clone();
            thread::spawn(move || {
                let host = Host::with_name_in("shared.example", registry);
                host.start_resolution(InfoType::Addresses)
                    .map(|()| host.addresses())
            })
        })
        .collect();

    assert!(wait_until(|| registry.client_count("shared.example") == HOSTS));
    assert_eq!(resolver.forward_calls(), 1);

    let mut result = lookup(&["192.0.2.1:0", "192.0.2.2:0"]);
    result.aliases.push("edge.example".into());
    assert!(resolver.complete_forward("shared.example", Ok(result)));

    for waiter in waiters {
        let addresses = waiter.join().unwrap().unwrap();
        assert_eq!(addresses, Some(vec![addr("192.0.2.1:0"), addr("192.0.2.2:0")]));
    }
    assert_eq!(resolver.forward_calls(), 1);
    assert!(!registry.is_in_flight("shared.example"));
    // Cached under the query name and the alias.
    assert_eq!(registry.cache_len(), 2);
}

#[test]
fn test_async_requests_share_one_lookup() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));
    let run_loop = RunLoop::current();

    let (client, calls) = recording_client();
    let hosts: Vec<Host> = (0..3)
        .map(|_| {
            let host = Host::with_name_in("async.example", registry.clone());
            host.schedule_with_run_loop(&run_loop, &RunLoopMode::DEFAULT);
            host.set_client(Some(client.clone()));
            host.start_resolution(InfoType::Addresses).unwrap();
            host
        })
        .collect();

    assert_eq!(resolver.forward_calls(), 1);
    assert_eq!(registry.client_count("async.example"), 3);

    let completer = complete_forward_later(&resolver, "async.example", Ok(lookup(&["198.51.100.7:0"])));
    assert!(run_until(&run_loop, || calls.lock().len() == 3));
    assert!(completer.join().unwrap());

    for (info, error) in calls.lock().iter() {
        assert_eq!(*info, InfoType::Addresses);
        assert_eq!(*error, None);
    }
    for host in &hosts {
        assert_eq!(host.addresses(), Some(vec![addr("198.51.100.7:0")]));
        assert!(!host.is_resolving());
    }
}

#[test]
fn test_cache_hit_skips_platform() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));

    let first = resolve_sync(&resolver, &registry, "host.example", Ok(lookup(&["192.0.2.10:0"])));
    assert_eq!(resolver.forward_calls(), 1);

    let second = Host::with_name_in("host.example", registry.clone());
    second.start_resolution(InfoType::Addresses).unwrap();

    assert_eq!(resolver.forward_calls(), 1);
    assert_eq!(second.addresses(), first.addresses());
}

#[test]
fn test_expired_entry_triggers_new_lookup() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_millis(50));

    resolve_sync(&resolver, &registry, "short.example", Ok(lookup(&["192.0.2.20:0"])));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(registry.cache_len(), 0);

    let again = resolve_sync(&resolver, &registry, "short.example", Ok(lookup(&["192.0.2.21:0"])));
    assert_eq!(resolver.forward_calls(), 2);
    assert_eq!(again.addresses(), Some(vec![addr("192.0.2.21:0")]));
}

#[test]
fn test_cache_bound_evicts_oldest() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = HostRegistry::builder()
        .resolver(resolver.clone())
        .cache_capacity(2)
        .cache_ttl(Duration::from_secs(60))
        .build()
        .unwrap();

    for (name, address) in [("a.example", "192.0.2.1:0"), ("b.example", "192.0.2.2:0"), ("c.example", "192.0.2.3:0")] {
        resolve_sync(&resolver, &registry, name, Ok(lookup(&[address])));
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(registry.cache_len(), 2);
    assert_eq!(resolver.forward_calls(), 3);

    // Newest entries survive.
    let c = Host::with_name_in("c.example", registry.clone());
    c.start_resolution(InfoType::Addresses).unwrap();
    let b = Host::with_name_in("b.example", registry.clone());
    b.start_resolution(InfoType::Addresses).unwrap();
    assert_eq!(resolver.forward_calls(), 3);

    // The oldest was evicted.
    resolve_sync(&resolver, &registry, "a.example", Ok(lookup(&["192.0.2.1:0"])));
    assert_eq!(resolver.forward_calls(), 4);
}

#[test]
fn test_cancel_releases_blocked_waiter() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));
    let host = Host::with_name_in("stuck.example", registry.clone());

    let waiter = {
        let host = host.clone();
        thread::spawn(move || {
            let started = Instant::now();
            let result = host.start_resolution(InfoType::Addresses);
            (result, started.elapsed())
        })
    };

    assert!(wait_until(|| host.is_resolving() && registry.client_count("stuck.example") == 1));
    host.cancel_resolution(InfoType::Addresses);

    let (result, elapsed) = waiter.join().unwrap();
    let err = result.unwrap_err();
    assert!(err.is_cancelled(), "unexpected error: {err}");
    assert!(elapsed < WAIT);
    assert_eq!(host.error(), Some(StreamError::posix(libc::ECANCELED)));
    assert!(!host.is_resolving());
    // The only client left, so the master was abandoned.
    assert!(!registry.is_in_flight("stuck.example"));
}

#[test]
fn test_cancel_from_many_threads_never_deadlocks() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));

    let mut waiters = Vec::new();
    let mut hosts = Vec::new();
    for _ in 0..4 {
        let host = Host::with_name_in("race.example", registry.clone());
        hosts.push(host.clone());
        waiters.push(thread::spawn(move || host.start_resolution(InfoType::Addresses)));
    }
    assert!(wait_until(|| registry.client_count("race.example") == 4));

    // Cancel two, complete the rest concurrently.
    let cancellers: Vec<_> = hosts[..2]
        .iter()
        .cloned()
        .map(|host| thread::spawn(move || host.cancel_resolution(InfoType::Addresses)))
        .collect();
    let completer = complete_forward_later(&resolver, "race.example", Ok(lookup(&["192.0.2.99:0"])));

    for canceller in cancellers {
        canceller.join().unwrap();
    }
    assert!(completer.join().unwrap());

    let results: Vec<Result<(), HostError>> = waiters.into_iter().map(|w| w.join().unwrap()).collect();
    for (host, result) in hosts.iter().zip(&results) {
        match result {
            Ok(()) => assert_eq!(host.addresses(), Some(vec![addr("192.0.2.99:0")])),
            Err(err) => assert!(err.is_cancelled()),
        }
    }
    assert!(results[2].is_ok());
    assert!(results[3].is_ok());
    assert!(!registry.is_in_flight("race.example"));
}

#[test]
fn test_cancel_one_client_keeps_master_for_others() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));
    let run_loop = RunLoop::current();

    let (client, calls) = recording_client();
    let make = || {
        let host = Host::with_name_in("pair.example", registry.clone());
        host.schedule_with_run_loop(&run_loop, &RunLoopMode::DEFAULT);
        host.set_client(Some(client.clone()));
        host.start_resolution(InfoType::Addresses).unwrap();
        host
    };
    let cancelled = make();
    let kept = make();

    cancelled.cancel_resolution(InfoType::Addresses);
    assert!(registry.is_in_flight("pair.example"));
    assert_eq!(registry.client_count("pair.example"), 1);

    let completer = complete_forward_later(&resolver, "pair.example", Ok(lookup(&["192.0.2.40:0"])));
    assert!(run_until(&run_loop, || calls.lock().len() == 2));
    assert!(completer.join().unwrap());

    let errors: Vec<Option<StreamError>> = calls.lock().iter().map(|(_, e)| *e).collect();
    assert!(errors.contains(&Some(StreamError::posix(libc::ECANCELED))));
    assert!(errors.contains(&None));
    assert_eq!(kept.addresses(), Some(vec![addr("192.0.2.40:0")]));
    assert_eq!(cancelled.info(InfoType::Addresses), InfoState::Unresolved);
}

#[test]
fn test_dropping_last_client_collapses_master() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));

    let host = Host::with_name_in("dropped.example", registry.clone());
    host.schedule_with_run_loop(&RunLoop::new(), &RunLoopMode::DEFAULT);
    host.set_client(Some(HostClient::new(|_, _, _| {})));
    host.start_resolution(InfoType::Addresses).unwrap();
    assert!(registry.is_in_flight("dropped.example"));

    drop(host);
    assert!(!registry.is_in_flight("dropped.example"));
}

#[test]
fn test_clear_client_is_idempotent() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));
    let host = Host::with_name_in("idle.example", registry.clone());

    assert!(host.set_client(None));
    assert!(host.set_client(None));
    assert!(!host.is_resolving());
    assert_eq!(resolver.forward_calls(), 0);
    assert!(registry.in_flight().is_empty());
}

#[test]
fn test_clear_client_cancels_pending_resolution() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));
    let host = Host::with_name_in("cleared.example", registry.clone());
    let (client, calls) = recording_client();

    host.schedule_with_run_loop(&RunLoop::new(), &RunLoopMode::DEFAULT);
    host.set_client(Some(client));
    host.start_resolution(InfoType::Addresses).unwrap();
    assert!(host.set_client(None));

    assert!(!host.is_resolving());
    assert!(!registry.is_in_flight("cleared.example"));
    assert!(calls.lock().is_empty());
}

#[test]
fn test_start_while_pending_fails_without_side_effects() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));
    let host = Host::with_name_in("busy.example", registry.clone());

    host.schedule_with_run_loop(&RunLoop::new(), &RunLoopMode::DEFAULT);
    host.set_client(Some(HostClient::new(|_, _, _| {})));
    host.start_resolution(InfoType::Addresses).unwrap();

    for info in [InfoType::Addresses, InfoType::Names, InfoType::Ipv4Addresses] {
        assert_eq!(
            host.start_resolution(info),
            Err(HostError::AlreadyResolving(InfoType::Addresses))
        );
    }
    assert_eq!(resolver.forward_calls(), 1);
    assert_eq!(registry.client_count("busy.example"), 1);
    assert_eq!(registry.cache_len(), 0);

    host.cancel_resolution(InfoType::Addresses);
}

#[test]
fn test_async_callback_fed_from_cache() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));
    resolve_sync(&resolver, &registry, "cached.example", Ok(lookup(&["192.0.2.50:0"])));

    let run_loop = RunLoop::current();
    let host = Host::with_name_in("cached.example", registry.clone());
    let (client, calls) = recording_client();
    host.schedule_with_run_loop(&run_loop, &RunLoopMode::DEFAULT);
    host.set_client(Some(client));
    host.start_resolution(InfoType::Addresses).unwrap();

    assert!(run_until(&run_loop, || !calls.lock().is_empty()));
    assert_eq!(calls.lock()[0], (InfoType::Addresses, None));
    assert_eq!(host.addresses(), Some(vec![addr("192.0.2.50:0")]));
    assert_eq!(resolver.forward_calls(), 1);
}

#[test]
fn test_failed_lookup_is_resolved_empty() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));
    let failure = StreamError::netdb(horizon_hostinfo::platform::netdb::EAI_NONAME);

    let completer = complete_forward_later(&resolver, "missing.example", Err(failure));
    let host = Host::with_name_in("missing.example", registry.clone());
    let err = host.start_resolution(InfoType::Addresses).unwrap_err();
    assert!(completer.join().unwrap());

    assert_eq!(err.stream_error(), Some(failure));
    assert_eq!(host.info(InfoType::Addresses), InfoState::ResolvedEmpty);
    assert!(host.has_been_resolved(InfoType::Addresses));
    assert_eq!(host.addresses(), None);
    assert_eq!(registry.cache_len(), 0);

    // The error is cleared by the next resolution.
    let completer = complete_forward_later(&resolver, "missing.example", Ok(lookup(&["192.0.2.60:0"])));
    host.start_resolution(InfoType::Addresses).unwrap();
    assert!(completer.join().unwrap());
    assert_eq!(host.error(), None);
}

#[test]
fn test_reverse_lookup() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));
    let host = Host::with_address_in(addr("192.0.2.70:0"), registry);

    let completer = {
        let resolver = resolver.clone();
        thread::spawn(move || resolver.complete_reverse(Ok("seventy.example".into())))
    };
    host.start_resolution(InfoType::Names).unwrap();
    assert!(completer.join().unwrap());

    assert_eq!(host.names(), Some(vec!["seventy.example".to_string()]));
    assert_eq!(resolver.forward_calls(), 0);
}

#[test]
fn test_family_restricted_lookup_filters_and_bypasses_sharing() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));
    let host = Host::with_name_in("dual.example", registry.clone());

    let completer = complete_forward_later(
        &resolver,
        "dual.example",
        Ok(lookup(&["192.0.2.80:0", "[2001:db8::80]:0"])),
    );
    host.start_resolution(InfoType::Ipv4Addresses).unwrap();
    assert!(completer.join().unwrap());

    assert_eq!(
        host.info(InfoType::Ipv4Addresses),
        InfoState::Resolved(HostInfo::Addresses(vec![addr("192.0.2.80:0")]))
    );
    assert_eq!(host.info(InfoType::Addresses), InfoState::Unresolved);
    assert_eq!(registry.cache_len(), 0);
}

#[test]
fn test_raw_query_uses_address_text() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));
    let host = Host::with_address_in(addr("192.0.2.90:0"), registry);
    let ptr = InfoType::Dns {
        class: 1,
        record_type: 12,
    };

    let completer = {
        let resolver = resolver.clone();
        thread::spawn(move || {
            if !wait_until(|| !resolver.queries.lock().is_empty()) {
                return None;
            }
            let (name, class, record_type, callback) = resolver.queries.lock().remove(0);
            callback(Ok(DnsReply {
                reply: vec![0xab, 0xcd],
                source: None,
            }));
            Some((name, class, record_type))
        })
    };
    host.start_resolution(ptr).unwrap();

    assert_eq!(
        completer.join().unwrap(),
        Some(("192.0.2.90".to_string(), 1, 12))
    );
    assert_eq!(
        host.info(ptr),
        InfoState::Resolved(HostInfo::Dns(DnsReply {
            reply: vec![0xab, 0xcd],
            source: None,
        }))
    );
}

#[test]
fn test_reachability_unsupported_without_provider() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));
    let host = Host::with_name_in("reach.example", registry);

    let err = host.start_resolution(InfoType::Reachability).unwrap_err();
    assert_eq!(err.stream_error(), Some(StreamError::posix(libc::EOPNOTSUPP)));
}

#[test]
fn test_reachability_through_provider() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = HostRegistry::builder()
        .resolver(resolver.clone())
        .reachability(Arc::new(FixedReachability(ReachabilityFlags::REACHABLE)))
        .build()
        .unwrap();

    let by_address = Host::with_address_in(addr("192.0.2.100:0"), registry.clone());
    by_address.start_resolution(InfoType::Reachability).unwrap();
    assert_eq!(by_address.reachability(), Some(ReachabilityFlags::REACHABLE));

    let by_name = Host::with_name_in("reach.example", registry);
    by_name.start_resolution(InfoType::Reachability).unwrap();
    assert_eq!(by_name.reachability(), Some(ReachabilityFlags::REACHABLE));
    assert_eq!(resolver.forward_calls(), 0);
}

#[test]
fn test_client_may_release_host_from_callback() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));
    resolve_sync(&resolver, &registry, "release.example", Ok(lookup(&["192.0.2.110:0"])));

    let run_loop = RunLoop::current();
    let slot: Arc<Mutex<Option<Host>>> = Arc::default();
    let fired = Arc::new(AtomicUsize::new(0));

    let host = Host::with_name_in("release.example", registry);
    host.schedule_with_run_loop(&run_loop, &RunLoopMode::DEFAULT);
    {
        let slot = slot.clone();
        let fired = fired.clone();
        host.set_client(Some(HostClient::new(move |host, _, _| {
            // Drops the last outside handle while the callback runs.
            slot.lock().take();
            assert!(host.addresses().is_some());
            fired.fetch_add(1, Ordering::SeqCst);
        })));
    }
    host.start_resolution(InfoType::Addresses).unwrap();
    *slot.lock() = Some(host);

    assert!(run_until(&run_loop, || fired.load(Ordering::SeqCst) == 1));
    assert!(slot.lock().is_none());
}

#[test]
fn test_copy_starts_idle() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));
    let host = Host::with_name_in("copy.example", registry.clone());
    host.schedule_with_run_loop(&RunLoop::new(), &RunLoopMode::DEFAULT);
    host.set_client(Some(HostClient::new(|_, _, _| {})));
    host.start_resolution(InfoType::Addresses).unwrap();

    let copy = host.create_copy();
    assert!(host.is_resolving());
    assert!(!copy.is_resolving());
    assert_eq!(copy.names(), Some(vec!["copy.example".to_string()]));

    host.cancel_resolution(InfoType::Addresses);
}

#[test]
fn test_alias_resolves_from_cache() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));
    let mut result = lookup(&["192.0.2.120:0"]);
    result.aliases.push("edge.alias.example".into());
    resolve_sync(&resolver, &registry, "www.alias.example", Ok(result));

    let edge = Host::with_name_in("edge.alias.example", registry);
    edge.start_resolution(InfoType::Addresses).unwrap();
    assert_eq!(edge.addresses(), Some(vec![addr("192.0.2.120:0")]));
    assert_eq!(resolver.forward_calls(), 1);
}

#[test]
fn test_set_client_moves_blocked_resolution_to_scheduled_loop() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));
    let run_loop = RunLoop::current();
    let host = Host::with_name_in("switch.example", registry.clone());
    host.schedule_with_run_loop(&run_loop, &RunLoopMode::DEFAULT);

    let waiter = {
        let host = host.clone();
        thread::spawn(move || host.start_resolution(InfoType::Addresses))
    };
    assert!(wait_until(|| registry.client_count("switch.example") == 1));
    // Blocking resolutions only wait on the caller's own loop.
    assert_eq!(
        run_loop.run_in_mode(&RunLoopMode::DEFAULT, Some(Duration::ZERO), true),
        RunResult::Finished
    );

    let (client, calls) = recording_client();
    host.set_client(Some(client));
    assert_eq!(
        run_loop.run_in_mode(&RunLoopMode::DEFAULT, Some(Duration::ZERO), true),
        RunResult::TimedOut
    );

    assert!(resolver.complete_forward("switch.example", Ok(lookup(&["192.0.2.130:0"]))));
    assert!(run_until(&run_loop, || !calls.lock().is_empty()));
    assert!(waiter.join().unwrap().is_ok());
    assert_eq!(*calls.lock(), vec![(InfoType::Addresses, None)]);
    assert_eq!(host.addresses(), Some(vec![addr("192.0.2.130:0")]));
}

#[test]
fn test_schedule_after_start_attaches_pending_lookup() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));
    let host = Host::with_name_in("late.example", registry);
    let (client, calls) = recording_client();
    host.set_client(Some(client));
    host.start_resolution(InfoType::Ipv4Addresses).unwrap();

    let first = RunLoop::new();
    let second = RunLoop::new();
    let mode = RunLoopMode::DEFAULT;
    assert_eq!(first.run_in_mode(&mode, Some(Duration::ZERO), true), RunResult::Finished);

    host.schedule_with_run_loop(&first, &mode);
    assert_eq!(first.run_in_mode(&mode, Some(Duration::ZERO), true), RunResult::TimedOut);
    host.unschedule_from_run_loop(&first, &mode);
    assert_eq!(first.run_in_mode(&mode, Some(Duration::ZERO), true), RunResult::Finished);

    host.schedule_with_run_loop(&second, &mode);
    assert!(resolver.wait_for_forward("late.example"));
    assert!(resolver.complete_forward(
        "late.example",
        Ok(lookup(&["192.0.2.140:0", "[2001:db8::140]:0"]))
    ));

    assert_eq!(first.run_in_mode(&mode, Some(Duration::ZERO), true), RunResult::Finished);
    assert_eq!(second.run_in_mode(&mode, Some(WAIT), true), RunResult::HandledSource);
    assert_eq!(*calls.lock(), vec![(InfoType::Ipv4Addresses, None)]);
    assert_eq!(
        host.info(InfoType::Ipv4Addresses),
        InfoState::Resolved(HostInfo::Addresses(vec![addr("192.0.2.140:0")]))
    );
}

#[test]
fn test_shared_completion_wakes_parked_client_loop() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));
    let local = RunLoop::current();
    let remote = RunLoop::new();

    let (local_client, local_calls) = recording_client();
    let near = Host::with_name_in("fan.example", registry.clone());
    near.schedule_with_run_loop(&local, &RunLoopMode::DEFAULT);
    near.set_client(Some(local_client));
    near.start_resolution(InfoType::Addresses).unwrap();

    let (remote_client, remote_calls) = recording_client();
    let far = Host::with_name_in("fan.example", registry.clone());
    far.schedule_with_run_loop(&remote, &RunLoopMode::DEFAULT);
    far.set_client(Some(remote_client));
    far.start_resolution(InfoType::Addresses).unwrap();
    assert_eq!(resolver.forward_calls(), 1);

    let runner = {
        let remote = remote.clone();
        let remote_calls = remote_calls.clone();
        thread::spawn(move || {
            let started = Instant::now();
            while remote_calls.lock().is_empty() && started.elapsed() < WAIT {
                remote.run_in_mode(&RunLoopMode::DEFAULT, Some(WAIT), true);
            }
            started.elapsed()
        })
    };

    assert!(wait_until(|| remote.is_waiting()));
    assert!(resolver.complete_forward("fan.example", Ok(lookup(&["192.0.2.150:0"]))));
    assert!(run_until(&local, || !local_calls.lock().is_empty()));

    let elapsed = runner.join().unwrap();
    assert!(elapsed < Duration::from_secs(2), "remote loop stayed parked for {elapsed:?}");
    assert_eq!(*local_calls.lock(), vec![(InfoType::Addresses, None)]);
    assert_eq!(*remote_calls.lock(), vec![(InfoType::Addresses, None)]);
    assert_eq!(far.addresses(), Some(vec![addr("192.0.2.150:0")]));
}

#[test]
fn test_raw_query_rejects_reserved_class() {
    let resolver = Arc::new(ScriptedResolver::default());
    let registry = registry_with(&resolver, Duration::from_secs(60));
    let host = Host::with_name_in("class.example", registry);

    let err = host
        .start_resolution(InfoType::Dns {
            class: 0,
            record_type: 1,
        })
        .unwrap_err();
    assert_eq!(err.stream_error(), Some(StreamError::posix(libc::EINVAL)));
    assert_eq!(host.error(), Some(StreamError::posix(libc::EINVAL)));
    assert!(!host.is_resolving());
    assert!(resolver.queries.lock().is_empty());
}
