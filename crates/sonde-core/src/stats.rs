//! Per-probe stats and their export
//!
//! A running probe owns the only writer of its stats. Each update replaces
//! the whole snapshot through a `watch` channel, so the exporter task reads
//! a consistent value without sharing any lock with the probe.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;
use crate::options::Options;
use crate::traits::{ProbeContext, StatsSink};

/// Cumulative counters of one probe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeStats {
    /// Completed cycles
    pub total: u64,
    /// Successful cycles
    pub success: u64,
    /// Cycles that hit the timeout
    pub timeouts: u64,
    /// Summed latency of successful cycles
    pub latency: Duration,
    /// Time of the last update
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProbeStats {
    /// Record a successful cycle
    pub fn record_success(&mut self, latency: Duration) {
        self.total += 1;
        self.success += 1;
        self.latency += latency;
        self.updated_at = Some(Utc::now());
    }

    /// Record a failed cycle
    pub fn record_failure(&mut self) {
        self.total += 1;
        self.updated_at = Some(Utc::now());
    }

    /// Record a cycle that timed out
    pub fn record_timeout(&mut self) {
        self.total += 1;
        self.timeouts += 1;
        self.updated_at = Some(Utc::now());
    }

    /// Cycles that did not succeed
    pub fn failures(&self) -> u64 {
        self.total - self.success
    }
}

/// Write side of a probe's stats channel
#[derive(Debug)]
pub struct StatsPublisher {
    tx: watch::Sender<Arc<ProbeStats>>,
}

impl StatsPublisher {
    /// Replace the published snapshot
    pub fn publish(&self, stats: ProbeStats) {
        self.tx.send_replace(Arc::new(stats));
    }
}

/// Read side of a probe's stats channel
#[derive(Debug, Clone)]
pub struct StatsReader {
    rx: watch::Receiver<Arc<ProbeStats>>,
}

impl StatsReader {
    /// Most recently published snapshot
    pub fn latest(&self) -> Arc<ProbeStats> {
        Arc::clone(&self.rx.borrow())
    }
}

/// Create a stats channel holding an empty snapshot
pub fn stats_channel() -> (StatsPublisher, StatsReader) {
    let (tx, rx) = watch::channel(Arc::new(ProbeStats::default()));
    (StatsPublisher { tx }, StatsReader { rx })
}

/// Run `cycle` once per interval until the probe is cancelled
///
/// Each cycle is bounded by the probe timeout. Outcomes are folded into the
/// probe's stats and published after every cycle. Cycle errors are counted,
/// never propagated; the loop only ends on cancellation.
pub async fn run_cycles<F, Fut>(ctx: &ProbeContext, mut cycle: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let options = ctx.options();
    let cancel = ctx.cancel_token();
    let mut ticker = tokio::time::interval(options.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stats = ProbeStats::default();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            outcome = tokio::time::timeout(options.timeout(), cycle()) => outcome,
        };

        match outcome {
            Ok(Ok(())) => stats.record_success(started.elapsed()),
            Ok(Err(e)) => {
                debug!(error = %e, "Probe cycle failed");
                stats.record_failure();
            }
            Err(_) => {
                debug!(timeout = ?options.timeout(), "Probe cycle timed out");
                stats.record_timeout();
            }
        }
        ctx.stats().publish(stats.clone());
    }
}

/// Export the latest snapshot every stats export interval until cancelled
pub(crate) async fn run_exporter(
    options: Arc<Options>,
    reader: StatsReader,
    sink: Arc<dyn StatsSink>,
    cancel: CancellationToken,
) {
    let period = options.stats_export_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => sink.export(&options, &reader.latest()),
        }
    }
    debug!("Stats exporter stopped");
}
