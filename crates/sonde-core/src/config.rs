//! Probe configuration types
//!
//! [`ProbeConfig`] is the raw, external definition of one probe as it arrives
//! from a config file or an add request. It is deliberately permissive: the
//! legacy duration fields may contradict each other and the source setting
//! may name an interface that does not exist. Turning it into something a
//! probe can run with is the job of [`crate::options::OptionsBuilder`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;

use crate::error::{Error, Result};

/// Protocol implemented by a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeType {
    /// ICMP echo
    Ping,
    /// HTTP(S) request
    Http,
    /// DNS query
    Dns,
    /// External program
    External,
    /// UDP echo
    Udp,
    /// Passive UDP listener
    UdpListener,
    /// gRPC health or echo call
    Grpc,
    /// TCP connect
    Tcp,
    /// Executor selected by the `extension` payload
    Extension,
}

impl ProbeType {
    /// Stable lowercase name, identical to the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeType::Ping => "ping",
            ProbeType::Http => "http",
            ProbeType::Dns => "dns",
            ProbeType::External => "external",
            ProbeType::Udp => "udp",
            ProbeType::UdpListener => "udp_listener",
            ProbeType::Grpc => "grpc",
            ProbeType::Tcp => "tcp",
            ProbeType::Extension => "extension",
        }
    }

    /// Whether the protocol is connectionless and retry heavy.
    ///
    /// These probes aggregate over a longer window, see
    /// [`crate::policy::IntervalPolicy`].
    pub fn is_connectionless(&self) -> bool {
        matches!(self, ProbeType::Udp | ProbeType::UdpListener)
    }
}

impl fmt::Display for ProbeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IP version of a probe's traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    /// IPv4 only
    V4,
    /// IPv6 only
    V6,
}

impl IpVersion {
    /// Version of an address
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }

    /// Whether `addr` belongs to this family
    pub fn matches(&self, addr: &IpAddr) -> bool {
        IpVersion::of(addr) == *self
    }

    /// Numeric form, `4` or `6`
    pub fn number(&self) -> u8 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IPv{}", self.number())
    }
}

/// Where a probe's outbound traffic originates
///
/// Exactly one of the variants applies; a literal address and an interface
/// name can never both be configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceConfig {
    /// Use the system default route
    #[default]
    None,
    /// Literal source address, parsed during options resolution
    Ip(String),
    /// Use an address of this network interface
    Interface(String),
}

/// Targets of a probe
///
/// Target discovery is an external concern; the core only carries this
/// value through to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetsConfig {
    /// Static list of `host` or `host:port` strings
    HostNames(Vec<String>),

    /// Discovery backend provided by a plugin
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl Default for TargetsConfig {
    fn default() -> Self {
        TargetsConfig::HostNames(Vec::new())
    }
}

/// Raw definition of one probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Unique probe name, the registry key
    pub name: String,

    /// Protocol
    pub probe_type: ProbeType,

    /// Probe targets
    #[serde(default)]
    pub targets: TargetsConfig,

    /// Probe interval as a duration literal (e.g. "10s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    /// Probe interval in milliseconds (legacy form, 0 = unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_msec: Option<u64>,

    /// Per-cycle timeout as a duration literal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Per-cycle timeout in milliseconds (legacy form, 0 = unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_msec: Option<u64>,

    /// Explicit stats export interval in milliseconds (0 = unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats_export_interval_msec: Option<u64>,

    /// Requested IP version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_version: Option<IpVersion>,

    /// Source address setting
    #[serde(default)]
    pub source: SourceConfig,

    /// Unit latency is reported in ("ns", "us", "ms" or "s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_unit: Option<String>,

    /// Labels attached to every exported metric of this probe
    #[serde(default)]
    pub additional_labels: BTreeMap<String, String>,

    /// Executor-specific settings, passed through untouched
    #[serde(default)]
    pub extension: serde_json::Value,
}

impl ProbeConfig {
    /// Create a probe configuration with everything else left to defaults
    pub fn new(name: impl Into<String>, probe_type: ProbeType) -> Self {
        Self {
            name: name.into(),
            probe_type,
            targets: TargetsConfig::default(),
            interval: None,
            interval_msec: None,
            timeout: None,
            timeout_msec: None,
            stats_export_interval_msec: None,
            ip_version: None,
            source: SourceConfig::None,
            latency_unit: None,
            additional_labels: BTreeMap::new(),
            extension: serde_json::Value::Null,
        }
    }

    /// Set static host targets
    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = TargetsConfig::HostNames(hosts.into_iter().map(Into::into).collect());
        self
    }

    /// Set the interval as a duration literal
    pub fn with_interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = Some(interval.into());
        self
    }

    /// Set the interval in milliseconds
    pub fn with_interval_msec(mut self, msec: u64) -> Self {
        self.interval_msec = Some(msec);
        self
    }

    /// Set the timeout as a duration literal
    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    /// Set the timeout in milliseconds
    pub fn with_timeout_msec(mut self, msec: u64) -> Self {
        self.timeout_msec = Some(msec);
        self
    }

    /// Set an explicit stats export interval in milliseconds
    pub fn with_stats_export_interval_msec(mut self, msec: u64) -> Self {
        self.stats_export_interval_msec = Some(msec);
        self
    }

    /// Request an IP version
    pub fn with_ip_version(mut self, version: IpVersion) -> Self {
        self.ip_version = Some(version);
        self
    }

    /// Set the source address setting
    pub fn with_source(mut self, source: SourceConfig) -> Self {
        self.source = source;
        self
    }

    /// Set the latency unit
    pub fn with_latency_unit(mut self, unit: impl Into<String>) -> Self {
        self.latency_unit = Some(unit.into());
        self
    }

    /// Add a metric label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_labels.insert(key.into(), value.into());
        self
    }

    /// Check fields that need no host or policy context
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_input("Probe name cannot be empty"));
        }
        if self.name.chars().any(char::is_whitespace) {
            return Err(Error::invalid_input(format!(
                "Probe name cannot contain whitespace: {:?}",
                self.name
            )));
        }

        for key in self.additional_labels.keys() {
            if !is_valid_label_key(key) {
                return Err(Error::invalid_input(format!("Invalid label key: {:?}", key)));
            }
        }

        if let TargetsConfig::Custom { factory, .. } = &self.targets
            && factory.is_empty()
        {
            return Err(Error::config("Custom targets factory cannot be empty"));
        }

        Ok(())
    }

    /// Load a JSON array of probe definitions from a file
    pub fn load_all(path: impl AsRef<Path>) -> Result<Vec<ProbeConfig>> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let configs: Vec<ProbeConfig> = serde_json::from_str(&raw)?;
        Ok(configs)
    }
}

fn is_valid_label_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
