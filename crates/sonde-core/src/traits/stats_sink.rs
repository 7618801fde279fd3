// # Stats Sink Trait
//
// Destination of periodic per-probe stats exports. Metrics surfacers
// (Prometheus, cloud monitoring, files) implement this outside the core.

use tracing::info;

use crate::options::Options;
use crate::stats::ProbeStats;

/// Receives stats snapshots at each probe's export interval
///
/// Called from the probe's exporter task. Implementations should hand the
/// snapshot off quickly (buffer, channel) rather than block on I/O.
pub trait StatsSink: Send + Sync {
    /// Export one snapshot
    fn export(&self, options: &Options, stats: &ProbeStats);
}

/// Sink that writes each snapshot as a structured log event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl StatsSink for TracingSink {
    fn export(&self, options: &Options, stats: &ProbeStats) {
        let unit = options.latency_unit().as_nanos().max(1);
        info!(
            probe = %options.name(),
            probe_type = %options.probe_type(),
            total = stats.total,
            success = stats.success,
            timeouts = stats.timeouts,
            latency = (stats.latency.as_nanos() / unit) as u64,
            labels = ?options.additional_labels(),
            "Probe stats"
        );
    }
}
