// # Probe Executor Traits
//
// Defines the interface between the registry and protocol-specific probe
// executors (ping, HTTP, UDP, DNS, TCP, ...).
//
// ## Implementations
//
// - TCP connect: `sonde-probe-tcp` crate
// - Others are provided by plugin crates registering a `ProbeFactory`
//
// ## Usage
//
// ```rust,ignore
// use sonde_core::{ProbeRegistry, ProbeType};
//
// registry.register_factory(ProbeType::Tcp, Box::new(TcpProbeFactory));
// registry.add(config).await?;
// ```

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::ProbeConfig;
use crate::error::Result;
use crate::options::Options;
use crate::stats::StatsPublisher;

/// Everything a running probe gets from the registry
///
/// The context is moved into [`Probe::run`]; the registry keeps a clone of
/// the cancellation token and the read side of the stats channel.
#[derive(Debug)]
pub struct ProbeContext {
    options: Arc<Options>,
    cancel: CancellationToken,
    stats: StatsPublisher,
}

impl ProbeContext {
    /// Create a context
    pub fn new(options: Arc<Options>, cancel: CancellationToken, stats: StatsPublisher) -> Self {
        Self {
            options,
            cancel,
            stats,
        }
    }

    /// Resolved options
    pub fn options(&self) -> &Arc<Options> {
        &self.options
    }

    /// Cancellation signal of this probe
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the probe has been asked to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Publishing side of the stats channel
    pub fn stats(&self) -> &StatsPublisher {
        &self.stats
    }
}

/// A protocol-specific probe executor
///
/// # Lifecycle
///
/// 1. Created by a [`ProbeFactory`] with the probe's resolved options
/// 2. [`Probe::start`] is awaited by the add request; an error aborts the add
/// 3. [`Probe::run`] is spawned on its own task and runs until cancelled
///
/// # Cancellation
///
/// `run` must observe [`ProbeContext::cancel_token`] within bounded time,
/// release its sockets and timers, and return. The registry aborts the task
/// if it overruns the removal grace period.
///
/// Probe failures (target down, timeouts) are data, recorded in stats.
/// `run` returns `Err` only when the executor itself cannot continue.
#[async_trait]
pub trait Probe: Send {
    /// Acquire resources before the probe is published
    async fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Run cycles until cancelled
    async fn run(self: Box<Self>, ctx: ProbeContext) -> Result<()>;
}

/// Helper trait for constructing probes from resolved options
pub trait ProbeFactory: Send + Sync {
    /// Create a probe instance
    ///
    /// # Parameters
    ///
    /// - `options`: Resolved options for the probe
    /// - `config`: Raw definition, for executor-specific `extension` settings
    ///
    /// # Returns
    ///
    /// A boxed Probe trait object
    fn create(&self, options: Arc<Options>, config: &ProbeConfig) -> Result<Box<dyn Probe>>;
}
