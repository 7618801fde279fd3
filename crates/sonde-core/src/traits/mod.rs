//! Core traits for the sonde system
//!
//! This module defines the abstract interfaces the registry drives.
//!
//! - [`Probe`] / [`ProbeFactory`]: Protocol-specific executors
//! - [`StatsSink`]: Destination of periodic stats exports
//!
//! The interface lookup capability lives next to its only user, in
//! [`crate::source`].

pub mod probe;
pub mod stats_sink;

pub use probe::{Probe, ProbeContext, ProbeFactory};
pub use stats_sink::{StatsSink, TracingSink};
