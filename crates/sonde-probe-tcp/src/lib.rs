// # TCP Connect Probe
//
// This crate provides a probe executor that checks targets by opening a TCP
// connection and closing it again.
//
// ## Behavior
//
// - One cycle connects to every target in turn; the cycle succeeds only if
//   all connections succeed
// - The connection is bound to the probe's resolved source address, if any
// - Target names are resolved on every cycle, filtered to the probe's IP
//   version (or the source address family)
// - Latency and counters are recorded by `sonde_core::run_cycles`
//
// ## Configuration
//
// Targets are `host` or `host:port` strings. Targets without a port use the
// `port` from the probe's `extension` settings:
//
// ```json
// {
//   "name": "redis",
//   "probe_type": "tcp",
//   "targets": {"host_names": ["10.0.0.5", "cache.internal:6380"]},
//   "extension": {"port": 6379}
// }
// ```

use async_trait::async_trait;
use serde::Deserialize;
use sonde_core::config::{IpVersion, ProbeConfig, ProbeType, TargetsConfig};
use sonde_core::{Error, Options, Probe, ProbeContext, ProbeFactory, ProbeRegistry, Result};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpSocket;
use tracing::{debug, info};

/// Port used when neither the target nor the extension names one
pub const DEFAULT_PORT: u16 = 80;

/// Executor-specific settings read from `ProbeConfig::extension`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TcpExtension {
    #[serde(default)]
    port: Option<u16>,
}

/// One `host:port` pair to connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`
    ///
    /// A bare IPv6 literal (more than one `:`) is taken as a host without
    /// a port.
    pub fn parse(raw: &str, default_port: u16) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::config("TCP target cannot be empty"));
        }

        if let Some(rest) = raw.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| Error::config(format!("Unterminated IPv6 literal: {raw}")))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(raw, port)?,
                None if tail.is_empty() => default_port,
                None => return Err(Error::config(format!("Invalid TCP target: {raw}"))),
            };
            return Ok(Self {
                host: host.to_string(),
                port,
            });
        }

        match raw.split_once(':') {
            Some((host, port)) if !port.contains(':') => Ok(Self {
                host: host.to_string(),
                port: parse_port(raw, port)?,
            }),
            _ => Ok(Self {
                host: raw.to_string(),
                port: default_port,
            }),
        }
    }
}

fn parse_port(raw: &str, port: &str) -> Result<u16> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(Error::config(format!("Invalid port in TCP target: {raw}"))),
        Ok(port) => Ok(port),
    }
}

/// TCP connect probe
#[derive(Debug)]
pub struct TcpProbe {
    targets: Vec<Target>,
    source_ip: Option<IpAddr>,
    ip_version: Option<IpVersion>,
}

impl TcpProbe {
    /// Create a probe
    ///
    /// # Parameters
    ///
    /// - `targets`: Endpoints checked on every cycle
    /// - `source_ip`: Local address to bind, `None` for the default route
    /// - `ip_version`: Address family to resolve targets to
    pub fn new(targets: Vec<Target>, source_ip: Option<IpAddr>, ip_version: Option<IpVersion>) -> Self {
        Self {
            targets,
            source_ip,
            ip_version,
        }
    }

    /// Targets of this probe
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Family every connection must use
    fn family(&self) -> Option<IpVersion> {
        self.ip_version
            .or_else(|| self.source_ip.as_ref().map(IpVersion::of))
    }

    /// Connect to every target once
    async fn cycle(&self) -> Result<()> {
        for target in &self.targets {
            let addr = self.resolve(target).await?;
            self.connect(addr).await.map_err(|e| {
                debug!(host = %target.host, port = target.port, error = %e, "Connect failed");
                e
            })?;
        }
        Ok(())
    }

    async fn resolve(&self, target: &Target) -> Result<SocketAddr> {
        let family = self.family();
        let mut addrs = tokio::net::lookup_host((target.host.as_str(), target.port)).await?;
        addrs
            .find(|addr| family.is_none_or(|v| v.matches(&addr.ip())))
            .ok_or_else(|| {
                Error::execution(format!(
                    "{} has no {} address",
                    target.host,
                    family.map(|v| v.to_string()).unwrap_or_else(|| "usable".into())
                ))
            })
    }

    async fn connect(&self, addr: SocketAddr) -> Result<()> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        if let Some(source) = self.source_ip {
            socket.bind(SocketAddr::new(source, 0))?;
        }

        let stream = socket.connect(addr).await?;
        drop(stream);
        Ok(())
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn run(self: Box<Self>, ctx: ProbeContext) -> Result<()> {
        info!(targets = self.targets.len(), "TCP probe running");
        let probe = &*self;
        sonde_core::run_cycles(&ctx, || probe.cycle()).await
    }
}

/// Factory for creating TCP probes
pub struct TcpProbeFactory;

impl ProbeFactory for TcpProbeFactory {
    fn create(&self, options: Arc<Options>, config: &ProbeConfig) -> Result<Box<dyn Probe>> {
        if options.probe_type() != ProbeType::Tcp {
            return Err(Error::config(format!(
                "TCP executor cannot run {} probes",
                options.probe_type()
            )));
        }

        let extension: TcpExtension = if config.extension.is_null() {
            TcpExtension::default()
        } else {
            serde_json::from_value(config.extension.clone())
                .map_err(|e| Error::config(format!("Invalid TCP probe settings: {e}")))?
        };
        let default_port = extension.port.unwrap_or(DEFAULT_PORT);

        let hosts = match options.targets() {
            TargetsConfig::HostNames(hosts) => hosts,
            TargetsConfig::Custom { factory, .. } => {
                return Err(Error::config(format!(
                    "TCP probe does not support {factory} targets"
                )));
            }
        };
        if hosts.is_empty() {
            return Err(Error::config("TCP probe needs at least one target"));
        }

        let targets = hosts
            .iter()
            .map(|host| Target::parse(host, default_port))
            .collect::<Result<Vec<_>>>()?;

        Ok(Box::new(TcpProbe::new(
            targets,
            options.source_ip(),
            options.ip_version(),
        )))
    }
}

/// Register the TCP executor with a registry
///
/// # Example
///
/// ```rust,ignore
/// let registry = ProbeRegistry::new(builder);
/// sonde_probe_tcp::register(&registry);
/// ```
pub fn register(registry: &ProbeRegistry) {
    registry.register_factory(ProbeType::Tcp, Box::new(TcpProbeFactory));
}
