//! Error types for the sonde core
//!
//! Every failure the options engine and the probe registry can report is a
//! variant of [`Error`]. Variants are grouped into coarse [`ErrorKind`]s so
//! that the control plane can map them onto status codes without matching
//! on every variant.

use std::time::Duration;
use thiserror::Error;

use crate::config::IpVersion;

/// Result type alias for sonde operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The probe configuration is malformed or self-contradictory
    Config,
    /// A source address could not be resolved on this host
    Resolution,
    /// Resolved values violate a policy constraint
    Policy,
    /// Registry membership errors
    Registry,
    /// Opaque failure surfaced by a probe executor
    Execution,
}

/// Core error type for the sonde system
#[derive(Error, Debug)]
pub enum Error {
    /// Both the duration-string and the millisecond form of a field were set
    #[error("Duplicate field: both {field} and {field}_msec are set")]
    DuplicateField {
        /// Field name without the `_msec` suffix
        field: &'static str,
    },

    /// A duration field could not be used
    #[error("Invalid duration for {field} ({value:?}): {reason}")]
    InvalidDuration {
        /// Field name
        field: &'static str,
        /// Offending value as written in the config
        value: String,
        /// Parser message
        reason: String,
    },

    /// The literal source IP is not an IP address
    #[error("Invalid source IP: {0:?}")]
    InvalidSourceIp(String),

    /// The literal source IP disagrees with the configured IP version
    #[error("Source IP {address} does not match configured IP version {expected}")]
    IpVersionMismatch {
        /// Parsed source address
        address: std::net::IpAddr,
        /// Configured IP version
        expected: IpVersion,
    },

    /// The named interface does not exist or could not be queried
    #[error("Device not found: {interface} ({reason})")]
    DeviceNotFound {
        /// Interface name
        interface: String,
        /// Lookup failure detail
        reason: String,
    },

    /// The interface has no address of the requested family
    #[error("No {} address on interface {interface}", family_label(.version))]
    NoAddressForVersion {
        /// Interface name
        interface: String,
        /// Requested IP version, if any
        version: Option<IpVersion>,
    },

    /// An explicit stats export interval is shorter than the probe interval
    #[error("stats_export_interval ({export:?}) is smaller than the probe interval ({interval:?})")]
    StatsExportIntervalTooSmall {
        /// Configured export interval
        export: Duration,
        /// Resolved probe interval
        interval: Duration,
    },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A probe with this name is already registered
    #[error("Probe already exists: {0}")]
    AlreadyExists(String),

    /// No probe with this name is registered
    #[error("Probe not found: {0}")]
    NotFound(String),

    /// Options could not be built for an add request
    #[error("Invalid probe config: {0}")]
    InvalidConfig(#[source] Box<Error>),

    /// Probe executor failure
    #[error("Probe execution error: {0}")]
    Execution(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an execution error
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create a "device not found" error
    pub fn device_not_found(interface: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeviceNotFound {
            interface: interface.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an options-building failure for the registry
    pub fn invalid_config(source: Error) -> Self {
        Self::InvalidConfig(Box::new(source))
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateField { .. }
            | Self::InvalidDuration { .. }
            | Self::InvalidSourceIp(_)
            | Self::IpVersionMismatch { .. }
            | Self::InvalidInput(_)
            | Self::Config(_) => ErrorKind::Config,
            Self::DeviceNotFound { .. } | Self::NoAddressForVersion { .. } => {
                ErrorKind::Resolution
            }
            Self::StatsExportIntervalTooSmall { .. } => ErrorKind::Policy,
            Self::AlreadyExists(_) | Self::NotFound(_) | Self::InvalidConfig(_) => {
                ErrorKind::Registry
            }
            Self::Execution(_) | Self::Io(_) | Self::Json(_) | Self::Other(_) => {
                ErrorKind::Execution
            }
        }
    }

    /// The underlying options error when this is [`Error::InvalidConfig`]
    pub fn config_cause(&self) -> Option<&Error> {
        match self {
            Self::InvalidConfig(inner) => Some(inner),
            _ => None,
        }
    }
}

fn family_label(version: &Option<IpVersion>) -> &'static str {
    match version {
        Some(IpVersion::V4) => "IPv4",
        Some(IpVersion::V6) => "IPv6",
        None => "usable",
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
