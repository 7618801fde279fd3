//! Interval, timeout and stats-export cadence
//!
//! Interval and timeout can each be written two ways: as a duration literal
//! (`interval = "10s"`) or as legacy milliseconds (`interval_msec = 10000`).
//! [`DurationSetting::from_fields`] collapses the pair into one value and
//! rejects configs that set both. [`IntervalPolicy`] then applies protocol
//! defaults and derives the stats export interval.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::{ProbeConfig, ProbeType};
use crate::error::{Error, Result};

/// Probe interval used when none is configured
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// Probe timeout used when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Lower bound of the default stats export interval for non-connectionless probes
pub const DEFAULT_STATS_EXPORT_FLOOR: Duration = Duration::from_secs(10);

/// Longest accepted interval, timeout or stats export interval
///
/// Matches the range of a signed 32-bit millisecond count, a little under
/// 25 days. Larger values overflow timer arithmetic.
pub const MAX_DURATION: Duration = Duration::from_millis(i32::MAX as u64);

/// Reject `value` if it exceeds [`MAX_DURATION`]
fn check_bounds(field: &'static str, value: Duration, written: impl ToString) -> Result<Duration> {
    if value > MAX_DURATION {
        return Err(Error::InvalidDuration {
            field,
            value: written.to_string(),
            reason: format!("must not exceed {}", humantime::format_duration(MAX_DURATION)),
        });
    }
    Ok(value)
}

/// One duration field after legacy-form reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationSetting {
    /// Not configured, use the protocol default
    Default,
    /// Configured explicitly
    Explicit(Duration),
}

impl DurationSetting {
    /// Reconcile the string and millisecond forms of a field
    ///
    /// An empty string and a zero millisecond value both count as unset.
    ///
    /// # Parameters
    ///
    /// - `field`: Field name, used in errors (e.g. "interval")
    /// - `text`: Duration literal form
    /// - `msec`: Millisecond form
    ///
    /// # Returns
    ///
    /// - `Ok(DurationSetting)`: The configured value, or `Default`
    /// - `Err(Error::DuplicateField)`: If both forms are set
    /// - `Err(Error::InvalidDuration)`: If the literal does not parse, is zero
    ///   or either form exceeds [`MAX_DURATION`]
    pub fn from_fields(field: &'static str, text: Option<&str>, msec: Option<u64>) -> Result<Self> {
        let text = text.map(str::trim).filter(|t| !t.is_empty());
        let msec = msec.filter(|m| *m != 0);

        match (text, msec) {
            (Some(_), Some(_)) => Err(Error::DuplicateField { field }),
            (Some(text), None) => {
                let duration =
                    humantime::parse_duration(text).map_err(|e| Error::InvalidDuration {
                        field,
                        value: text.to_string(),
                        reason: e.to_string(),
                    })?;
                if duration.is_zero() {
                    return Err(Error::InvalidDuration {
                        field,
                        value: text.to_string(),
                        reason: "must be greater than zero".to_string(),
                    });
                }
                check_bounds(field, duration, text).map(Self::Explicit)
            }
            (None, Some(msec)) => {
                check_bounds(field, Duration::from_millis(msec), msec).map(Self::Explicit)
            }
            (None, None) => Ok(Self::Default),
        }
    }

    /// The configured duration, or `default`
    pub fn or(self, default: Duration) -> Duration {
        match self {
            Self::Default => default,
            Self::Explicit(d) => d,
        }
    }
}

/// Built-in durations applied when a config leaves them out
#[derive(Debug, Clone)]
pub struct PolicyDefaults {
    /// Interval for probe types without an override
    pub interval: Duration,
    /// Timeout for probe types without an override
    pub timeout: Duration,
    /// Floor of the default stats export interval
    pub stats_export_floor: Duration,
    per_type: HashMap<ProbeType, (Duration, Duration)>,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            stats_export_floor: DEFAULT_STATS_EXPORT_FLOOR,
            per_type: HashMap::new(),
        }
    }
}

impl PolicyDefaults {
    /// Override interval and timeout defaults for one probe type
    pub fn with_probe_defaults(
        mut self,
        probe_type: ProbeType,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        self.per_type.insert(probe_type, (interval, timeout));
        self
    }

    /// Change the stats export floor
    pub fn with_stats_export_floor(mut self, floor: Duration) -> Self {
        self.stats_export_floor = floor;
        self
    }

    /// Default interval of `probe_type`
    pub fn interval_for(&self, probe_type: ProbeType) -> Duration {
        self.per_type
            .get(&probe_type)
            .map(|(interval, _)| *interval)
            .unwrap_or(self.interval)
    }

    /// Default timeout of `probe_type`
    pub fn timeout_for(&self, probe_type: ProbeType) -> Duration {
        self.per_type
            .get(&probe_type)
            .map(|(_, timeout)| *timeout)
            .unwrap_or(self.timeout)
    }
}

/// Resolved cadence of a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Time between cycles
    pub interval: Duration,
    /// Deadline of one cycle
    pub timeout: Duration,
    /// Time between stats exports, never below `interval`
    pub stats_export_interval: Duration,
}

/// Computes [`Timing`] from a probe configuration
#[derive(Debug, Clone, Default)]
pub struct IntervalPolicy {
    defaults: PolicyDefaults,
}

impl IntervalPolicy {
    /// Create a policy with the given defaults
    pub fn new(defaults: PolicyDefaults) -> Self {
        Self { defaults }
    }

    /// The defaults in effect
    pub fn defaults(&self) -> &PolicyDefaults {
        &self.defaults
    }

    /// Resolve the timing fields of `config`
    pub fn resolve(&self, config: &ProbeConfig) -> Result<Timing> {
        let interval =
            DurationSetting::from_fields("interval", config.interval.as_deref(), config.interval_msec)?;
        let timeout =
            DurationSetting::from_fields("timeout", config.timeout.as_deref(), config.timeout_msec)?;
        let explicit_export = config
            .stats_export_interval_msec
            .filter(|m| *m != 0)
            .map(|m| check_bounds("stats_export_interval", Duration::from_millis(m), m))
            .transpose()?;

        self.resolve_settings(interval, timeout, explicit_export, config.probe_type)
    }

    /// Resolve already-reconciled settings
    ///
    /// # Returns
    ///
    /// - `Ok(Timing)`: All three durations
    /// - `Err(Error::StatsExportIntervalTooSmall)`: If `explicit_export` is
    ///   shorter than the resolved interval
    /// - `Err(Error::InvalidDuration)`: If a value resolves to zero or
    ///   exceeds [`MAX_DURATION`]
    pub fn resolve_settings(
        &self,
        interval: DurationSetting,
        timeout: DurationSetting,
        explicit_export: Option<Duration>,
        probe_type: ProbeType,
    ) -> Result<Timing> {
        let interval = interval.or(self.defaults.interval_for(probe_type));
        let timeout = timeout.or(self.defaults.timeout_for(probe_type));

        for (field, value) in [("interval", interval), ("timeout", timeout)] {
            if value.is_zero() {
                return Err(Error::InvalidDuration {
                    field,
                    value: format!("{:?}", value),
                    reason: "must be greater than zero".to_string(),
                });
            }
            check_bounds(field, value, format!("{:?}", value))?;
        }
        if let Some(export) = explicit_export {
            check_bounds("stats_export_interval", export, format!("{:?}", export))?;
        }

        let stats_export_interval = match explicit_export {
            Some(export) if export < interval => {
                return Err(Error::StatsExportIntervalTooSmall { export, interval });
            }
            Some(export) => export,
            None => self.default_stats_export_interval(probe_type, interval, timeout),
        };

        Ok(Timing {
            interval,
            timeout,
            stats_export_interval,
        })
    }

    /// Stats export interval when none is configured
    ///
    /// Connectionless probes retry until the timeout, so their window is
    /// twice the slower of interval and timeout. Everything else only needs
    /// to outlast the sampling cadence.
    pub fn default_stats_export_interval(
        &self,
        probe_type: ProbeType,
        interval: Duration,
        timeout: Duration,
    ) -> Duration {
        if probe_type.is_connectionless() {
            interval.max(timeout).saturating_mul(2)
        } else {
            interval.max(self.defaults.stats_export_floor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: u64 = 1000;

    fn resolve(config: &ProbeConfig) -> Result<Timing> {
        IntervalPolicy::default().resolve(config)
    }

    fn base(probe_type: ProbeType) -> ProbeConfig {
        ProbeConfig::new("p", probe_type)
    }

    #[test]
    fn both_interval_forms_is_duplicate() {
        let config = base(ProbeType::Http)
            .with_interval("2s")
            .with_interval_msec(2 * SEC)
            .with_stats_export_interval_msec(10 * SEC);

        let err = resolve(&config).unwrap_err();
        assert!(matches!(err, Error::DuplicateField { field: "interval" }));
    }

    #[test]
    fn both_timeout_forms_is_duplicate() {
        let config = base(ProbeType::Http)
            .with_timeout("2s")
            .with_timeout_msec(2 * SEC);

        let err = resolve(&config).unwrap_err();
        assert!(matches!(err, Error::DuplicateField { field: "timeout" }));
    }

    #[test]
    fn zero_msec_counts_as_unset() {
        let config = base(ProbeType::Http)
            .with_interval("5s")
            .with_interval_msec(0);

        assert_eq!(resolve(&config).unwrap().interval, Duration::from_secs(5));
    }

    #[test]
    fn malformed_duration_strings_fail() {
        let err = resolve(&base(ProbeType::Http).with_interval("2j")).unwrap_err();
        assert!(matches!(err, Error::InvalidDuration { field: "interval", .. }));

        let err = resolve(&base(ProbeType::Http).with_timeout("2j")).unwrap_err();
        assert!(matches!(err, Error::InvalidDuration { field: "timeout", .. }));

        let err = resolve(&base(ProbeType::Http).with_timeout("0s")).unwrap_err();
        assert!(matches!(err, Error::InvalidDuration { field: "timeout", .. }));
    }

    #[test]
    fn defaults_apply_when_unset() {
        let timing = resolve(&base(ProbeType::Ping)).unwrap();

        assert_eq!(timing.interval, DEFAULT_INTERVAL);
        assert_eq!(timing.timeout, DEFAULT_TIMEOUT);
        assert_eq!(timing.stats_export_interval, Duration::from_secs(10));
    }

    #[test]
    fn per_type_defaults_override_global_ones() {
        let policy = IntervalPolicy::new(PolicyDefaults::default().with_probe_defaults(
            ProbeType::Dns,
            Duration::from_secs(30),
            Duration::from_secs(5),
        ));

        let timing = policy.resolve(&base(ProbeType::Dns)).unwrap();
        assert_eq!(timing.interval, Duration::from_secs(30));
        assert_eq!(timing.timeout, Duration::from_secs(5));
        assert_eq!(timing.stats_export_interval, Duration::from_secs(30));

        let timing = policy.resolve(&base(ProbeType::Http)).unwrap();
        assert_eq!(timing.interval, DEFAULT_INTERVAL);
    }

    #[test]
    fn default_export_interval_for_regular_probes() {
        let cases = [
            // (interval, timeout, want) in seconds
            (15, 10, 15),
            (10, 12, 10),
            (2, 1, 10),
        ];

        for (interval, timeout, want) in cases {
            let config = base(ProbeType::Http)
                .with_interval_msec(interval * SEC)
                .with_timeout_msec(timeout * SEC);
            let timing = resolve(&config).unwrap();
            assert_eq!(
                timing.stats_export_interval,
                Duration::from_secs(want),
                "interval={interval}s timeout={timeout}s"
            );
        }
    }

    #[test]
    fn default_export_interval_for_udp_is_twice_the_slower_duration() {
        let cases = [(10, 12, 24), (5, 6, 12), (7, 2, 14)];

        for (interval, timeout, want) in cases {
            let config = base(ProbeType::Udp)
                .with_interval_msec(interval * SEC)
                .with_timeout_msec(timeout * SEC);
            let timing = resolve(&config).unwrap();
            assert_eq!(timing.stats_export_interval, Duration::from_secs(want));
        }
    }

    #[test]
    fn udp_with_duration_strings() {
        let config = base(ProbeType::Udp).with_interval("10s").with_timeout("12s");
        assert_eq!(
            resolve(&config).unwrap().stats_export_interval,
            Duration::from_secs(24)
        );
    }

    #[test]
    fn explicit_export_interval_below_interval_fails() {
        let config = base(ProbeType::Http)
            .with_interval_msec(2 * SEC)
            .with_timeout_msec(SEC)
            .with_stats_export_interval_msec(SEC);

        let err = resolve(&config).unwrap_err();
        assert!(matches!(
            err,
            Error::StatsExportIntervalTooSmall { export, interval }
                if export == Duration::from_secs(1) && interval == Duration::from_secs(2)
        ));
    }

    #[test]
    fn explicit_export_interval_is_kept() {
        let config = base(ProbeType::Http)
            .with_interval_msec(2 * SEC)
            .with_timeout_msec(SEC)
            .with_stats_export_interval_msec(10 * SEC);

        assert_eq!(
            resolve(&config).unwrap().stats_export_interval,
            Duration::from_secs(10)
        );

        // Equal to the interval is allowed.
        let config = base(ProbeType::Udp)
            .with_interval("3s")
            .with_stats_export_interval_msec(3 * SEC);
        assert_eq!(
            resolve(&config).unwrap().stats_export_interval,
            Duration::from_secs(3)
        );
    }

    #[test]
    fn export_interval_never_below_interval() {
        for probe_type in [ProbeType::Http, ProbeType::Udp, ProbeType::Tcp] {
            for interval_ms in [1, 500, 2_000, 10_000, 60_000] {
                for timeout_ms in [1, 900, 5_000, 120_000] {
                    let config = base(probe_type)
                        .with_interval_msec(interval_ms)
                        .with_timeout_msec(timeout_ms);
                    let timing = resolve(&config).unwrap();
                    assert!(timing.stats_export_interval >= timing.interval);
                }
            }
        }
    }

    #[test]
    fn huge_interval_literal_is_rejected() {
        for probe_type in [ProbeType::Udp, ProbeType::Ping] {
            let config = base(probe_type).with_interval("10000000000000000000s");

            let err = resolve(&config).unwrap_err();
            assert!(
                matches!(err, Error::InvalidDuration { field: "interval", .. }),
                "{probe_type}: {err}"
            );
        }
    }

    #[test]
    fn huge_millisecond_values_are_rejected() {
        let cases = [
            (base(ProbeType::Udp).with_interval_msec(u64::MAX), "interval"),
            (base(ProbeType::Ping).with_interval_msec(u64::MAX), "interval"),
            (base(ProbeType::Udp).with_timeout_msec(u64::MAX), "timeout"),
            (base(ProbeType::Http).with_timeout_msec(u64::MAX), "timeout"),
            (
                base(ProbeType::Ping).with_stats_export_interval_msec(u64::MAX),
                "stats_export_interval",
            ),
        ];

        for (config, want) in cases {
            match resolve(&config) {
                Err(Error::InvalidDuration { field, .. }) => assert_eq!(field, want),
                other => panic!("{want}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn upper_bound_is_inclusive() {
        let max_ms = MAX_DURATION.as_millis() as u64;
        let config = base(ProbeType::Udp)
            .with_interval_msec(max_ms)
            .with_timeout_msec(max_ms);

        let timing = resolve(&config).unwrap();
        assert_eq!(timing.interval, MAX_DURATION);
        assert_eq!(timing.stats_export_interval, MAX_DURATION * 2);

        let err = resolve(&base(ProbeType::Http).with_interval_msec(max_ms + 1)).unwrap_err();
        assert!(matches!(err, Error::InvalidDuration { field: "interval", .. }));
    }

    #[test]
    fn oversized_defaults_are_rejected() {
        let policy = IntervalPolicy::new(PolicyDefaults::default().with_probe_defaults(
            ProbeType::Udp,
            Duration::MAX,
            Duration::from_secs(1),
        ));

        let err = policy.resolve(&base(ProbeType::Udp)).unwrap_err();
        assert!(matches!(err, Error::InvalidDuration { field: "interval", .. }));
    }
}
