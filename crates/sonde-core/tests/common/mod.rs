//! Test doubles and common utilities for contract tests
//!
//! These doubles implement the executor and sink seams without touching the
//! network. Counters are shared through `Arc` so a test keeps a handle after
//! the factory is moved into the registry.

#![allow(dead_code)]

use async_trait::async_trait;
use sonde_core::error::{Error, Result};
use sonde_core::{
    Options, OptionsBuilder, Probe, ProbeConfig, ProbeContext, ProbeFactory, ProbeRegistry,
    ProbeStats, ProbeType, StaticInterfaceLookup, StatsSink, run_cycles,
};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Call counters shared between a [`MockProbeFactory`] and its probes
#[derive(Debug, Default)]
pub struct ProbeCounters {
    pub created: AtomicUsize,
    pub started: AtomicUsize,
    pub cycles: AtomicUsize,
    pub stopped: AtomicUsize,
}

impl ProbeCounters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn cycles(&self) -> usize {
        self.cycles.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// How probes created by a [`MockProbeFactory`] behave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Run cycles that always succeed, stop on cancel
    Cooperative,
    /// Ignore cancellation entirely
    Stubborn,
    /// Fail in `start`
    FailStart,
    /// Return an error after cancellation
    FailOnStop,
    /// Wait `start_delay` in `start`, then behave cooperatively
    SlowStart,
}

/// Factory producing [`MockProbe`]s
pub struct MockProbeFactory {
    behavior: Behavior,
    start_delay: Duration,
    counters: Arc<ProbeCounters>,
}

impl MockProbeFactory {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            start_delay: Duration::from_millis(50),
            counters: Arc::new(ProbeCounters::default()),
        }
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn counters(&self) -> Arc<ProbeCounters> {
        Arc::clone(&self.counters)
    }
}

impl ProbeFactory for MockProbeFactory {
    fn create(&self, _options: Arc<Options>, _config: &ProbeConfig) -> Result<Box<dyn Probe>> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockProbe {
            behavior: self.behavior,
            start_delay: self.start_delay,
            counters: Arc::clone(&self.counters),
        }))
    }
}

pub struct MockProbe {
    behavior: Behavior,
    start_delay: Duration,
    counters: Arc<ProbeCounters>,
}

#[async_trait]
impl Probe for MockProbe {
    async fn start(&mut self) -> Result<()> {
        match self.behavior {
            Behavior::FailStart => Err(Error::execution("socket unavailable")),
            Behavior::SlowStart => {
                tokio::time::sleep(self.start_delay).await;
                self.counters.started.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            _ => {
                self.counters.started.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn run(self: Box<Self>, ctx: ProbeContext) -> Result<()> {
        if self.behavior == Behavior::Stubborn {
            loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }

        let counters = Arc::clone(&self.counters);
        run_cycles(&ctx, || {
            counters.cycles.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await?;
        self.counters.stopped.fetch_add(1, Ordering::SeqCst);

        match self.behavior {
            Behavior::FailOnStop => Err(Error::execution("flush failed")),
            _ => Ok(()),
        }
    }
}

/// Sink remembering every export it received
#[derive(Debug, Default)]
pub struct RecordingSink {
    exports: Mutex<Vec<(String, ProbeStats)>>,
}

impl RecordingSink {
    pub fn exports_for(&self, name: &str) -> Vec<ProbeStats> {
        self.exports
            .lock()
            .unwrap()
            .iter()
            .filter(|(probe, _)| probe == name)
            .map(|(_, stats)| stats.clone())
            .collect()
    }
}

impl StatsSink for RecordingSink {
    fn export(&self, options: &Options, stats: &ProbeStats) {
        self.exports
            .lock()
            .unwrap()
            .push((options.name().to_string(), stats.clone()));
    }
}

/// Options builder knowing `eth1 = [1.1.1.1, ::1]`
pub fn test_builder() -> OptionsBuilder {
    let addrs: [IpAddr; 2] = ["1.1.1.1".parse().unwrap(), "::1".parse().unwrap()];
    OptionsBuilder::new(Arc::new(
        StaticInterfaceLookup::new().with_interface("eth1", addrs),
    ))
}

/// Registry with a mock factory for `ProbeType::Ping`
pub fn registry_with(behavior: Behavior) -> (ProbeRegistry, Arc<ProbeCounters>) {
    let factory = MockProbeFactory::new(behavior);
    let counters = factory.counters();
    let registry = ProbeRegistry::new(test_builder());
    registry.register_factory(ProbeType::Ping, Box::new(factory));
    (registry, counters)
}

/// Ping probe with a short interval
pub fn ping(name: &str) -> ProbeConfig {
    ProbeConfig::new(name, ProbeType::Ping)
        .with_hosts(["testHost"])
        .with_interval("100ms")
        .with_timeout("50ms")
}
