//! Dynamic probe registry
//!
//! The registry is the in-memory, authoritative set of running probes. The
//! control plane adds, removes and lists probes through it while every other
//! probe keeps running.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sonde_core::{OptionsBuilder, ProbeConfig, ProbeRegistry, ProbeType};
//!
//! let registry = ProbeRegistry::new(OptionsBuilder::new(lookup));
//! registry.register_factory(ProbeType::Tcp, Box::new(TcpProbeFactory));
//!
//! registry.add(ProbeConfig::new("redis", ProbeType::Tcp).with_hosts(["10.0.0.5:6379"])).await?;
//! for probe in registry.list() {
//!     println!("{}", probe.name);
//! }
//! registry.remove("redis").await?;
//! ```
//!
//! ## Per-name lifecycle
//!
//! ```text
//!   Absent ──add──▶ Starting ──executor started──▶ Running ──remove──▶ Stopping ──joined──▶ Absent
//!                      │                                                  │
//!                      └──options / executor error───▶ Absent             └──grace expired, aborted──▶ Absent
//! ```
//!
//! `Starting` reserves the name so two concurrent adds cannot both win; it is
//! invisible to `list` and `remove`. `Stopping` keeps the name reserved until
//! the old executor is gone, so a re-add never overlaps the old run.
//!
//! ## Locking
//!
//! One `std::sync::Mutex` guards map membership only. It is never held
//! across an `.await`: options resolution, executor start-up and joins all
//! happen outside of it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::config::{ProbeConfig, ProbeType};
use crate::error::{Error, ErrorKind, Result};
use crate::options::{Options, OptionsBuilder};
use crate::stats::{run_exporter, stats_channel};
use crate::traits::{ProbeContext, ProbeFactory, StatsSink, TracingSink};

/// Default grace period a removed probe gets to acknowledge cancellation
pub const DEFAULT_REMOVE_GRACE: Duration = Duration::from_secs(5);

/// Snapshot entry returned by [`ProbeRegistry::list`]
#[derive(Debug, Clone)]
pub struct ProbeInfo {
    /// Probe name
    pub name: String,
    /// Definition the probe was added with
    pub config: Arc<ProbeConfig>,
}

/// How a removed probe's executor ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The executor acknowledged cancellation and returned cleanly
    Stopped,
    /// The executor returned an error or panicked while stopping
    Failed(String),
    /// The grace period elapsed and the executor task was aborted
    Forced,
}

struct ProbeHandle {
    config: Arc<ProbeConfig>,
    options: Arc<Options>,
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
    exporter: JoinHandle<()>,
}

enum Slot {
    Starting,
    Running(ProbeHandle),
    Stopping(Arc<ProbeConfig>),
}

type ProbeMap = BTreeMap<String, Slot>;

fn lock(probes: &Mutex<ProbeMap>) -> MutexGuard<'_, ProbeMap> {
    probes.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps a `Starting` or `Stopping` slot until the operation owning it ends
///
/// Dropping the guard (including when the owning future is cancelled) frees
/// the name unless [`SlotGuard::commit`] published a running handle.
struct SlotGuard<'a> {
    probes: &'a Mutex<ProbeMap>,
    name: String,
    armed: bool,
}

impl<'a> SlotGuard<'a> {
    fn new(probes: &'a Mutex<ProbeMap>, name: String) -> Self {
        Self {
            probes,
            name,
            armed: true,
        }
    }

    fn commit(mut self, handle: ProbeHandle) {
        lock(self.probes).insert(self.name.clone(), Slot::Running(handle));
        self.armed = false;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut probes = lock(self.probes);
        if matches!(
            probes.get(&self.name),
            Some(Slot::Starting) | Some(Slot::Stopping(_))
        ) {
            probes.remove(&self.name);
        }
    }
}

/// Concurrency-safe set of running probes keyed by name
///
/// ## Thread Safety
///
/// All methods take `&self`; share the registry behind an `Arc` between
/// the control plane and start-up code.
pub struct ProbeRegistry {
    builder: OptionsBuilder,
    factories: RwLock<HashMap<ProbeType, Arc<dyn ProbeFactory>>>,
    probes: Mutex<ProbeMap>,
    sink: Arc<dyn StatsSink>,
    remove_grace: Duration,
}

impl ProbeRegistry {
    /// Create an empty registry
    ///
    /// Stats are exported through [`TracingSink`] and removals wait
    /// [`DEFAULT_REMOVE_GRACE`] unless configured otherwise.
    pub fn new(builder: OptionsBuilder) -> Self {
        Self {
            builder,
            factories: RwLock::new(HashMap::new()),
            probes: Mutex::new(BTreeMap::new()),
            sink: Arc::new(TracingSink),
            remove_grace: DEFAULT_REMOVE_GRACE,
        }
    }

    /// Export stats through `sink`
    pub fn with_stats_sink(mut self, sink: Arc<dyn StatsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Change the grace period used by [`ProbeRegistry::remove`]
    pub fn with_remove_grace(mut self, grace: Duration) -> Self {
        self.remove_grace = grace;
        self
    }

    /// Register the executor factory for a probe type
    ///
    /// A later registration for the same type replaces the earlier one;
    /// probes already running keep their executor.
    pub fn register_factory(&self, probe_type: ProbeType, factory: Box<dyn ProbeFactory>) {
        let mut factories = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        factories.insert(probe_type, Arc::from(factory));
    }

    /// Check if a probe type has an executor
    pub fn has_factory(&self, probe_type: ProbeType) -> bool {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        factories.contains_key(&probe_type)
    }

    /// Add and start a probe
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The probe is running and listed
    /// - `Err(Error::AlreadyExists)`: The name is taken (running, starting
    ///   or stopping)
    /// - `Err(Error::InvalidConfig)`: Options could not be built, no
    ///   executor handles the probe type, or the executor rejected the
    ///   definition
    /// - `Err(Error::Execution)`: The executor failed to start
    ///
    /// On error the registry is unchanged.
    pub async fn add(&self, config: ProbeConfig) -> Result<()> {
        let name = config.name.clone();
        let reservation = self.reserve(&name)?;

        let options = match self.builder.build(&config) {
            Ok(options) => Arc::new(options),
            Err(e) => {
                warn!(probe = %name, error = %e, "Rejected probe config");
                return Err(Error::invalid_config(e));
            }
        };

        let factory = self.factory(config.probe_type).ok_or_else(|| {
            Error::invalid_config(Error::config(format!(
                "No executor registered for probe type {}",
                config.probe_type
            )))
        })?;

        let mut probe = factory
            .create(Arc::clone(&options), &config)
            .map_err(|e| match e.kind() {
                ErrorKind::Config => Error::invalid_config(e),
                _ => execution_error(e),
            })?;
        probe
            .start()
            .instrument(options.span().clone())
            .await
            .map_err(|e| {
                warn!(probe = %name, error = %e, "Probe executor failed to start");
                execution_error(e)
            })?;

        let cancel = CancellationToken::new();
        let (publisher, reader) = stats_channel();
        let ctx = ProbeContext::new(Arc::clone(&options), cancel.clone(), publisher);

        let task = tokio::spawn(probe.run(ctx).instrument(options.span().clone()));
        let exporter = tokio::spawn(
            run_exporter(
                Arc::clone(&options),
                reader,
                Arc::clone(&self.sink),
                cancel.child_token(),
            )
            .instrument(options.span().clone()),
        );

        info!(
            probe = %name,
            probe_type = %config.probe_type,
            interval = ?options.interval(),
            "Probe added"
        );

        reservation.commit(ProbeHandle {
            config: Arc::new(config),
            options,
            cancel,
            task,
            exporter,
        });
        Ok(())
    }

    /// Remove a probe, waiting up to the configured grace period
    pub async fn remove(&self, name: &str) -> Result<RemoveOutcome> {
        self.remove_with_grace(name, self.remove_grace).await
    }

    /// Remove a probe, waiting up to `grace` for its executor to stop
    ///
    /// # Returns
    ///
    /// - `Ok(RemoveOutcome)`: The entry is gone; the outcome tells how the
    ///   executor ended. Grace expiry is `Ok(RemoveOutcome::Forced)`.
    /// - `Err(Error::NotFound)`: No running probe has this name; the
    ///   registry is unchanged
    pub async fn remove_with_grace(&self, name: &str, grace: Duration) -> Result<RemoveOutcome> {
        let (guard, handle) = self.begin_stop(name)?;

        handle.cancel.cancel();
        let outcome = join_probe(name, handle, Instant::now() + grace).await;
        drop(guard);

        info!(probe = %name, outcome = ?outcome, "Probe removed");
        Ok(outcome)
    }

    /// Name-ordered snapshot of registered probes
    ///
    /// Probes whose add is still in flight are not included; probes being
    /// removed are, until their executor is gone.
    pub fn list(&self) -> Vec<ProbeInfo> {
        lock(&self.probes)
            .iter()
            .filter_map(|(name, slot)| {
                let config = match slot {
                    Slot::Starting => return None,
                    Slot::Running(handle) => &handle.config,
                    Slot::Stopping(config) => config,
                };
                Some(ProbeInfo {
                    name: name.clone(),
                    config: Arc::clone(config),
                })
            })
            .collect()
    }

    /// Resolved options of a running probe
    pub fn options(&self, name: &str) -> Option<Arc<Options>> {
        match lock(&self.probes).get(name) {
            Some(Slot::Running(handle)) => Some(Arc::clone(&handle.options)),
            _ => None,
        }
    }

    /// Check if a probe is registered
    pub fn contains(&self, name: &str) -> bool {
        matches!(
            lock(&self.probes).get(name),
            Some(Slot::Running(_)) | Some(Slot::Stopping(_))
        )
    }

    /// Number of registered probes
    pub fn len(&self) -> usize {
        lock(&self.probes)
            .values()
            .filter(|slot| !matches!(slot, Slot::Starting))
            .count()
    }

    /// Check if no probe is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every running probe
    ///
    /// All probes are cancelled at once and joined against a single
    /// deadline, so shutdown takes at most `grace` overall.
    pub async fn shutdown(&self, grace: Duration) -> Vec<(String, RemoveOutcome)> {
        let stopping: Vec<(SlotGuard<'_>, ProbeHandle)> = {
            let names: Vec<String> = lock(&self.probes)
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Running(_)))
                .map(|(name, _)| name.clone())
                .collect();
            names
                .iter()
                .filter_map(|name| self.begin_stop(name).ok())
                .collect()
        };

        info!(count = stopping.len(), "Shutting down probes");
        for (_, handle) in &stopping {
            handle.cancel.cancel();
        }

        let deadline = Instant::now() + grace;
        let mut outcomes = Vec::with_capacity(stopping.len());
        for (guard, handle) in stopping {
            let outcome = join_probe(&guard.name, handle, deadline).await;
            outcomes.push((guard.name.clone(), outcome));
        }

        let forced = outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == RemoveOutcome::Forced)
            .count();
        if forced > 0 {
            warn!(forced, "Probes did not stop within the shutdown grace period");
        }
        outcomes
    }

    // --- Private helpers ---

    fn reserve(&self, name: &str) -> Result<SlotGuard<'_>> {
        let mut probes = lock(&self.probes);
        if probes.contains_key(name) {
            debug!(probe = %name, "Probe name already taken");
            return Err(Error::AlreadyExists(name.to_string()));
        }
        probes.insert(name.to_string(), Slot::Starting);
        Ok(SlotGuard::new(&self.probes, name.to_string()))
    }

    fn begin_stop(&self, name: &str) -> Result<(SlotGuard<'_>, ProbeHandle)> {
        let mut probes = lock(&self.probes);
        match probes.remove(name) {
            Some(Slot::Running(handle)) => {
                probes.insert(name.to_string(), Slot::Stopping(Arc::clone(&handle.config)));
                Ok((SlotGuard::new(&self.probes, name.to_string()), handle))
            }
            Some(other) => {
                probes.insert(name.to_string(), other);
                Err(Error::NotFound(name.to_string()))
            }
            None => Err(Error::NotFound(name.to_string())),
        }
    }

    fn factory(&self, probe_type: ProbeType) -> Option<Arc<dyn ProbeFactory>> {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        factories.get(&probe_type).cloned()
    }
}

impl std::fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeRegistry")
            .field("probe_count", &self.len())
            .field("remove_grace", &self.remove_grace)
            .finish_non_exhaustive()
    }
}

impl Drop for ProbeRegistry {
    fn drop(&mut self) {
        let probes = self.probes.get_mut().unwrap_or_else(PoisonError::into_inner);
        for slot in probes.values() {
            if let Slot::Running(handle) = slot {
                handle.cancel.cancel();
            }
        }
    }
}

/// Wait for a cancelled probe's executor, aborting it at `deadline`
async fn join_probe(name: &str, handle: ProbeHandle, deadline: Instant) -> RemoveOutcome {
    let ProbeHandle {
        mut task, exporter, ..
    } = handle;

    let outcome = match tokio::time::timeout_at(deadline, &mut task).await {
        Ok(Ok(Ok(()))) => RemoveOutcome::Stopped,
        Ok(Ok(Err(e))) => {
            warn!(probe = %name, error = %e, "Probe executor exited with error");
            RemoveOutcome::Failed(e.to_string())
        }
        Ok(Err(join_err)) => {
            warn!(probe = %name, error = %join_err, "Probe executor task failed");
            RemoveOutcome::Failed(join_err.to_string())
        }
        Err(_) => {
            warn!(probe = %name, "Probe executor ignored cancellation, aborting");
            task.abort();
            RemoveOutcome::Forced
        }
    };

    exporter.abort();
    outcome
}

fn execution_error(err: Error) -> Error {
    match err {
        Error::Execution(_) => err,
        other => Error::execution(other.to_string()),
    }
}
