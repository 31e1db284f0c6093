//! hickory-resolver backend.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use hickory_resolver::config::{
    LookupIpStrategy, NameServerConfig, ResolveHosts, ResolverConfig, ResolverOpts,
};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_resolver::proto::rr::{DNSClass, Record, RecordType};
use hickory_resolver::proto::serialize::binary::BinEncodable;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::{ResolveError, Resolver, TokioResolver};
use horizon_hostinfo_core::StreamError;
use horizon_hostinfo_core::logging::targets;
use tokio::runtime::{Builder, Handle, Runtime};

use super::netdb;
use super::{
    AddressFamily, DnsReply, ForwardCallback, ForwardLookup, LookupHandle, PlatformResolver,
    QueryCallback, ReverseCallback,
};
use crate::config::{DnsConfig, IpStrategy};
use crate::error::{HostError, Result};

/// Resolver backed by hickory on a private tokio runtime.
pub struct HickoryResolver {
    resolver: TokioResolver,
    handle: Handle,
    runtime: Option<Runtime>,
}

impl HickoryResolver {
    /// Create a resolver with the given configuration.
    pub fn new(config: &DnsConfig) -> Result<Self> {
        let (resolver_config, resolver_opts) = build_resolver_config(config)?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("hostinfo-dns")
            .enable_all()
            .build()
            .map_err(|e| HostError::Config(format!("failed to create DNS runtime: {e}")))?;
        let handle = runtime.handle().clone();

        let resolver = {
            let _guard = runtime.enter();
            Resolver::builder_with_config(resolver_config, TokioConnectionProvider::default())
                .with_options(resolver_opts)
                .build()
        };

        Ok(Self {
            resolver,
            handle,
            runtime: Some(runtime),
        })
    }

    /// Clear hickory's own record cache.
    pub fn clear_cache(&self) {
        self.resolver.clear_cache();
    }
}

impl Drop for HickoryResolver {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for HickoryResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HickoryResolver").finish_non_exhaustive()
    }
}

impl PlatformResolver for HickoryResolver {
    fn start_forward(
        &self,
        name: &str,
        family: AddressFamily,
        callback: ForwardCallback,
    ) -> std::result::Result<LookupHandle, StreamError> {
        let resolver = self.resolver.clone();
        let name = name.to_string();
        let task = self.handle.spawn(async move {
            callback(resolve_forward(&resolver, &name, family).await);
        });
        Ok(LookupHandle::new(move || task.abort()))
    }

    fn start_reverse(
        &self,
        address: SocketAddr,
        callback: ReverseCallback,
    ) -> std::result::Result<LookupHandle, StreamError> {
        let resolver = self.resolver.clone();
        let task = self.handle.spawn(async move {
            callback(resolve_reverse(&resolver, address.ip()).await);
        });
        Ok(LookupHandle::new(move || task.abort()))
    }

    fn start_query(
        &self,
        name: &str,
        class: u16,
        record_type: u16,
        callback: QueryCallback,
    ) -> std::result::Result<LookupHandle, StreamError> {
        if DNSClass::from(class) != DNSClass::IN {
            return Err(StreamError::posix(libc::EOPNOTSUPP));
        }
        let resolver = self.resolver.clone();
        let name = name.to_string();
        let task = self.handle.spawn(async move {
            callback(resolve_query(&resolver, &name, RecordType::from(record_type)).await);
        });
        Ok(LookupHandle::new(move || task.abort()))
    }
}

/// Build hickory resolver configuration from our DnsConfig.
fn build_resolver_config(config: &DnsConfig) -> Result<(ResolverConfig, ResolverOpts)> {
    let (resolver_config, mut opts) = if config.use_system_config {
        match hickory_resolver::system_conf::read_system_conf() {
            Ok(system) => system,
            Err(err) => {
                tracing::warn!(target: targets::PLATFORM, %err, "falling back to default DNS configuration");
                (ResolverConfig::default(), ResolverOpts::default())
            }
        }
    } else if config.nameservers.is_empty() {
        return Err(HostError::Config("no nameservers configured".to_string()));
    } else {
        let mut resolver_config = ResolverConfig::new();
        for addr in &config.nameservers {
            resolver_config.add_name_server(NameServerConfig::new(*addr, Protocol::Udp));
            resolver_config.add_name_server(NameServerConfig::new(*addr, Protocol::Tcp));
        }
        (resolver_config, ResolverOpts::default())
    };

    opts.cache_size = config.cache_size;
    opts.positive_max_ttl = Some(config.max_positive_ttl);
    opts.negative_max_ttl = Some(config.max_negative_ttl);
    opts.use_hosts_file = if config.use_hosts_file {
        ResolveHosts::Auto
    } else {
        ResolveHosts::Never
    };
    opts.attempts = config.attempts;
    opts.timeout = config.timeout;
    opts.ip_strategy = match config.ip_strategy {
        IpStrategy::Ipv4Only => LookupIpStrategy::Ipv4Only,
        IpStrategy::Ipv6Only => LookupIpStrategy::Ipv6Only,
        IpStrategy::Ipv4ThenIpv6 => LookupIpStrategy::Ipv4thenIpv6,
        IpStrategy::Ipv6ThenIpv4 => LookupIpStrategy::Ipv6thenIpv4,
        IpStrategy::Ipv4AndIpv6 => LookupIpStrategy::Ipv4AndIpv6,
    };

    Ok((resolver_config, opts))
}

fn map_error(err: &ResolveError) -> StreamError {
    if err.is_no_records_found() {
        StreamError::netdb(netdb::EAI_NONAME)
    } else {
        tracing::warn!(target: targets::PLATFORM, %err, "DNS lookup failed");
        StreamError::netdb(netdb::EAI_FAIL)
    }
}

fn owner_names<'a>(records: impl Iterator<Item = &'a Record>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for record in records {
        let name = record.name().to_utf8();
        let name = name.trim_end_matches('.').to_string();
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

async fn resolve_forward(
    resolver: &TokioResolver,
    name: &str,
    family: AddressFamily,
) -> std::result::Result<ForwardLookup, StreamError> {
    let (addresses, aliases): (Vec<IpAddr>, Vec<String>) = match family {
        AddressFamily::Unspecified => {
            let response = resolver.lookup_ip(name).await.map_err(|e| map_error(&e))?;
            (
                response.iter().collect(),
                owner_names(response.as_lookup().records().iter()),
            )
        }
        AddressFamily::Ipv4 => {
            let response = resolver.ipv4_lookup(name).await.map_err(|e| map_error(&e))?;
            (
                response.iter().map(|r| IpAddr::V4(r.0)).collect(),
                owner_names(response.as_lookup().records().iter()),
            )
        }
        AddressFamily::Ipv6 => {
            let response = resolver.ipv6_lookup(name).await.map_err(|e| map_error(&e))?;
            (
                response.iter().map(|r| IpAddr::V6(r.0)).collect(),
                owner_names(response.as_lookup().records().iter()),
            )
        }
    };

    let mut lookup = ForwardLookup {
        addresses: Vec::with_capacity(addresses.len()),
        aliases,
    };
    for ip in addresses {
        let addr = SocketAddr::new(ip, 0);
        if !lookup.addresses.contains(&addr) {
            lookup.addresses.push(addr);
        }
    }
    Ok(lookup)
}

async fn resolve_reverse(
    resolver: &TokioResolver,
    ip: IpAddr,
) -> std::result::Result<String, StreamError> {
    let response = resolver.reverse_lookup(ip).await.map_err(|e| map_error(&e))?;
    response
        .iter()
        .next()
        .map(|ptr| ptr.0.to_utf8().trim_end_matches('.').to_string())
        .ok_or(StreamError::netdb(netdb::EAI_NONAME))
}

async fn resolve_query(
    resolver: &TokioResolver,
    name: &str,
    record_type: RecordType,
) -> std::result::Result<DnsReply, StreamError> {
    let lookup = resolver
        .lookup(name, record_type)
        .await
        .map_err(|e| map_error(&e))?;

    let mut message = Message::new();
    message
        .set_id(0)
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .set_recursion_available(true)
        .set_response_code(ResponseCode::NoError);
    message.add_query(lookup.query().clone());
    message.add_answers(lookup.records().iter().cloned());

    let reply = message.to_bytes().map_err(|err| {
        tracing::warn!(target: targets::PLATFORM, %err, "could not encode DNS reply");
        StreamError::netdb(netdb::EAI_FAIL)
    })?;
    Ok(DnsReply {
        reply,
        source: None,
    })
}

static_assertions::assert_impl_all!(HickoryResolver: Send, Sync);
