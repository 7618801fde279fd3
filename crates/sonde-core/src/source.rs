//! Source address resolution
//!
//! A probe may pin its outbound traffic to a literal address or to one of the
//! addresses of a named interface. Interface addresses come from an
//! [`InterfaceLookup`] capability handed in by the caller, so tests and
//! embedders decide what "the host's interfaces" are.

use std::collections::HashMap;
use std::net::IpAddr;

use crate::config::{IpVersion, SourceConfig};
use crate::error::{Error, Result};

/// Read-only view of the host's network interfaces
///
/// Implementations must return the addresses of `name` in the order the
/// system reports them; resolution picks the first match.
pub trait InterfaceLookup: Send + Sync {
    /// Addresses assigned to interface `name`
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<IpAddr>)`: The interface's addresses, possibly empty
    /// - `Err(Error::DeviceNotFound)`: If no such interface exists
    fn addrs(&self, name: &str) -> Result<Vec<IpAddr>>;
}

/// Fixed interface table
///
/// Useful for tests and for hosts where the interface set is known up front.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaceLookup {
    interfaces: HashMap<String, Vec<IpAddr>>,
}

impl StaticInterfaceLookup {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an interface with its ordered addresses
    pub fn with_interface<I>(mut self, name: impl Into<String>, addrs: I) -> Self
    where
        I: IntoIterator<Item = IpAddr>,
    {
        self.interfaces
            .insert(name.into(), addrs.into_iter().collect());
        self
    }
}

impl InterfaceLookup for StaticInterfaceLookup {
    fn addrs(&self, name: &str) -> Result<Vec<IpAddr>> {
        self.interfaces
            .get(name)
            .cloned()
            .ok_or_else(|| Error::device_not_found(name, "device not found"))
    }
}

/// Resolve the source address of a probe
///
/// # Parameters
///
/// - `source`: Configured source setting
/// - `version`: Requested IP version, if any
/// - `lookup`: Interface table used for [`SourceConfig::Interface`]
///
/// # Returns
///
/// - `Ok(Some(addr))`: The address to bind
/// - `Ok(None)`: No source configured, the system default route applies
/// - `Err(Error)`: `InvalidSourceIp`, `IpVersionMismatch`, `DeviceNotFound`
///   or `NoAddressForVersion`
pub fn resolve_source(
    source: &SourceConfig,
    version: Option<IpVersion>,
    lookup: &dyn InterfaceLookup,
) -> Result<Option<IpAddr>> {
    match source {
        SourceConfig::None => Ok(None),
        SourceConfig::Ip(literal) => resolve_literal(literal, version).map(Some),
        SourceConfig::Interface(name) => resolve_interface(name, version, lookup).map(Some),
    }
}

fn resolve_literal(literal: &str, version: Option<IpVersion>) -> Result<IpAddr> {
    let addr: IpAddr = literal
        .trim()
        .parse()
        .map_err(|_| Error::InvalidSourceIp(literal.to_string()))?;

    if let Some(expected) = version
        && !expected.matches(&addr)
    {
        return Err(Error::IpVersionMismatch {
            address: addr,
            expected,
        });
    }

    Ok(addr)
}

fn resolve_interface(
    name: &str,
    version: Option<IpVersion>,
    lookup: &dyn InterfaceLookup,
) -> Result<IpAddr> {
    let addrs = lookup.addrs(name).map_err(|e| match e {
        Error::DeviceNotFound { .. } => e,
        other => Error::device_not_found(name, other.to_string()),
    })?;

    addrs
        .into_iter()
        .find(|addr| version.is_none_or(|v| v.matches(addr)))
        .ok_or_else(|| Error::NoAddressForVersion {
            interface: name.to_string(),
            version,
        })
}
