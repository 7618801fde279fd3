// # sonde-core
//
// Core library of the sonde probing agent.
//
// ## Architecture Overview
//
// This library turns raw probe definitions into running probes:
// - **resolve_source**: Picks a probe's outbound source address from a
//   literal IP or a named interface (via an injected `InterfaceLookup`)
// - **IntervalPolicy**: Effective interval, timeout and stats export interval
// - **OptionsBuilder**: Composes the above into one immutable `Options`
// - **ProbeRegistry**: Add / remove / list of running probes, keyed by name
// - **ControlPlane**: Maps the control RPCs onto the registry
//
// Probe protocols are not implemented here. Plugin crates register a
// `ProbeFactory` per `ProbeType` with the registry.
//
// ## Design Principles
//
// 1. **No globals**: Interface lookup and stats sinks are passed in
// 2. **All or nothing**: `Options` is either fully valid or not built
// 3. **One task per probe**: Cancellation is cooperative with a bounded join

pub mod config;
pub mod control;
pub mod error;
pub mod options;
pub mod policy;
pub mod registry;
pub mod source;
pub mod stats;
pub mod traits;

// Re-export core types for convenience
pub use config::{IpVersion, ProbeConfig, ProbeType, SourceConfig, TargetsConfig};
pub use control::ControlPlane;
pub use error::{Error, ErrorKind, Result};
pub use options::{Options, OptionsBuilder};
pub use policy::{IntervalPolicy, PolicyDefaults, Timing};
pub use registry::{ProbeInfo, ProbeRegistry, RemoveOutcome};
pub use source::{InterfaceLookup, StaticInterfaceLookup, resolve_source};
pub use stats::{ProbeStats, StatsPublisher, StatsReader, run_cycles};
pub use traits::{Probe, ProbeContext, ProbeFactory, StatsSink, TracingSink};
