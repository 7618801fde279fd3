//! Fully resolved probe options
//!
//! [`OptionsBuilder::build`] is the only way to obtain [`Options`]. It runs
//! config validation, source resolution and interval policy in that order
//! and stops at the first error, so an `Options` value is always complete.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::{IpVersion, ProbeConfig, ProbeType, SourceConfig, TargetsConfig};
use crate::error::{Error, Result};
use crate::policy::{IntervalPolicy, PolicyDefaults};
use crate::source::{InterfaceLookup, StaticInterfaceLookup, resolve_source};

/// Latency unit used when none is configured
pub const DEFAULT_LATENCY_UNIT: &str = "us";

/// Runtime parameters of one probe
///
/// Immutable once built. Executors receive it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Options {
    name: String,
    probe_type: ProbeType,
    interval: Duration,
    timeout: Duration,
    stats_export_interval: Duration,
    ip_version: Option<IpVersion>,
    source_ip: Option<IpAddr>,
    targets: TargetsConfig,
    latency_unit: Duration,
    additional_labels: BTreeMap<String, String>,
    span: tracing::Span,
}

impl Options {
    /// Probe name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Probe protocol
    pub fn probe_type(&self) -> ProbeType {
        self.probe_type
    }

    /// Time between cycles
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Deadline of one cycle
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time between stats exports
    pub fn stats_export_interval(&self) -> Duration {
        self.stats_export_interval
    }

    /// Resolved IP version, `None` when unspecified
    pub fn ip_version(&self) -> Option<IpVersion> {
        self.ip_version
    }

    /// Resolved IP version as `0`, `4` or `6`
    pub fn ip_version_number(&self) -> u8 {
        self.ip_version.map(|v| v.number()).unwrap_or(0)
    }

    /// Address to bind outbound traffic to, `None` for the default route
    pub fn source_ip(&self) -> Option<IpAddr> {
        self.source_ip
    }

    /// Probe targets
    pub fn targets(&self) -> &TargetsConfig {
        &self.targets
    }

    /// Unit latencies are reported in
    pub fn latency_unit(&self) -> Duration {
        self.latency_unit
    }

    /// Labels for every metric of this probe
    pub fn additional_labels(&self) -> &BTreeMap<String, String> {
        &self.additional_labels
    }

    /// Logging span of this probe
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

/// Builds [`Options`] from [`ProbeConfig`]
///
/// Holds the capabilities resolution needs: the interface table and the
/// policy defaults. Cheap to clone.
#[derive(Clone)]
pub struct OptionsBuilder {
    lookup: Arc<dyn InterfaceLookup>,
    policy: IntervalPolicy,
}

impl OptionsBuilder {
    /// Create a builder with default policy
    pub fn new(lookup: Arc<dyn InterfaceLookup>) -> Self {
        Self {
            lookup,
            policy: IntervalPolicy::default(),
        }
    }

    /// Replace the policy defaults
    pub fn with_defaults(mut self, defaults: PolicyDefaults) -> Self {
        self.policy = IntervalPolicy::new(defaults);
        self
    }

    /// Interval policy in use
    pub fn policy(&self) -> &IntervalPolicy {
        &self.policy
    }

    /// Resolve `config` into options
    ///
    /// # Returns
    ///
    /// - `Ok(Options)`: Every field resolved and consistent
    /// - `Err(Error)`: The first validation, resolution or policy failure
    pub fn build(&self, config: &ProbeConfig) -> Result<Options> {
        config.validate()?;

        let source_ip = resolve_source(&config.source, config.ip_version, self.lookup.as_ref())?;
        // Only a literal source pins the version; interface addresses don't.
        let ip_version = config.ip_version.or(match (&config.source, source_ip) {
            (SourceConfig::Ip(_), Some(addr)) => Some(IpVersion::of(&addr)),
            _ => None,
        });

        let timing = self.policy.resolve(config)?;
        let latency_unit = parse_latency_unit(config.latency_unit.as_deref())?;

        let span = tracing::info_span!(
            "probe",
            name = %config.name,
            probe_type = %config.probe_type
        );
        debug!(
            parent: &span,
            interval = ?timing.interval,
            timeout = ?timing.timeout,
            stats_export_interval = ?timing.stats_export_interval,
            source_ip = ?source_ip,
            ip_version = ?ip_version,
            "Probe options resolved"
        );

        Ok(Options {
            name: config.name.clone(),
            probe_type: config.probe_type,
            interval: timing.interval,
            timeout: timing.timeout,
            stats_export_interval: timing.stats_export_interval,
            ip_version,
            source_ip,
            targets: config.targets.clone(),
            latency_unit,
            additional_labels: config.additional_labels.clone(),
            span,
        })
    }
}

impl Default for OptionsBuilder {
    /// Builder with no known interfaces
    fn default() -> Self {
        Self::new(Arc::new(StaticInterfaceLookup::new()))
    }
}

impl std::fmt::Debug for OptionsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionsBuilder")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn parse_latency_unit(unit: Option<&str>) -> Result<Duration> {
    match unit.map(str::trim).unwrap_or(DEFAULT_LATENCY_UNIT) {
        "ns" => Ok(Duration::from_nanos(1)),
        "us" | "µs" => Ok(Duration::from_micros(1)),
        "ms" => Ok(Duration::from_millis(1)),
        "s" => Ok(Duration::from_secs(1)),
        other => Err(Error::invalid_input(format!(
            "Unsupported latency unit: {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> OptionsBuilder {
        let lookup = StaticInterfaceLookup::new().with_interface(
            "eth1",
            ["1.1.1.1".parse::<IpAddr>().unwrap(), "::1".parse::<IpAddr>().unwrap()],
        );
        OptionsBuilder::new(Arc::new(lookup))
    }

    #[test]
    fn default_builder_builds_plain_config() {
        let opts = OptionsBuilder::default()
            .build(&ProbeConfig::new("p", ProbeType::Ping))
            .unwrap();

        assert_eq!(opts.name(), "p");
        assert_eq!(opts.ip_version(), None);
        assert_eq!(opts.ip_version_number(), 0);
        assert_eq!(opts.source_ip(), None);
        assert_eq!(opts.latency_unit(), Duration::from_micros(1));
    }

    #[test]
    fn ip_version_is_inferred_from_source_ip() {
        let cases = [("1.1.1.1", 4), ("::1", 6)];

        for (source, want) in cases {
            let config = ProbeConfig::new("p", ProbeType::Ping)
                .with_hosts(["testHost"])
                .with_source(SourceConfig::Ip(source.into()));
            let opts = builder().build(&config).unwrap();
            assert_eq!(opts.ip_version_number(), want, "source {source}");
            assert_eq!(opts.source_ip(), Some(source.parse().unwrap()));
        }
    }

    #[test]
    fn interface_source_does_not_pin_ip_version() {
        let config = ProbeConfig::new("p", ProbeType::Http)
            .with_source(SourceConfig::Interface("eth1".into()));
        let opts = builder().build(&config).unwrap();

        assert_eq!(opts.source_ip(), Some("1.1.1.1".parse().unwrap()));
        assert_eq!(opts.ip_version(), None);
    }

    #[test]
    fn explicit_ip_version_wins() {
        let config = ProbeConfig::new("p", ProbeType::Http)
            .with_source(SourceConfig::Interface("eth1".into()))
            .with_ip_version(IpVersion::V6);
        let opts = builder().build(&config).unwrap();

        assert_eq!(opts.ip_version(), Some(IpVersion::V6));
        assert_eq!(opts.source_ip(), Some("::1".parse().unwrap()));
    }

    #[test]
    fn source_error_aborts_build() {
        let config = ProbeConfig::new("p", ProbeType::Http)
            .with_source(SourceConfig::Ip("1.1.1.1".into()))
            .with_ip_version(IpVersion::V6);

        let err = builder().build(&config).unwrap_err();
        assert!(matches!(err, Error::IpVersionMismatch { .. }));
    }

    #[test]
    fn source_is_resolved_before_timing() {
        // Both steps would fail; the source error is reported.
        let config = ProbeConfig::new("p", ProbeType::Http)
            .with_source(SourceConfig::Interface("eth7".into()))
            .with_interval("2s")
            .with_interval_msec(2000);

        let err = builder().build(&config).unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound { .. }));
    }

    #[test]
    fn timing_is_resolved() {
        let config = ProbeConfig::new("p", ProbeType::Udp)
            .with_interval("10s")
            .with_timeout("12s");
        let opts = builder().build(&config).unwrap();

        assert_eq!(opts.interval(), Duration::from_secs(10));
        assert_eq!(opts.timeout(), Duration::from_secs(12));
        assert_eq!(opts.stats_export_interval(), Duration::from_secs(24));
    }

    #[test]
    fn latency_unit_and_labels_carry_through() {
        let config = ProbeConfig::new("p", ProbeType::Http)
            .with_latency_unit("ms")
            .with_label("zone", "eu-west1");
        let opts = builder().build(&config).unwrap();

        assert_eq!(opts.latency_unit(), Duration::from_millis(1));
        assert_eq!(
            opts.additional_labels().get("zone").map(String::as_str),
            Some("eu-west1")
        );

        let err = builder()
            .build(&ProbeConfig::new("p", ProbeType::Http).with_latency_unit("fortnight"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
