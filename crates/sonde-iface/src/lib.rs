// # System Interface Lookup
//
// This crate provides an `InterfaceLookup` backed by the operating system's
// interface table, for probes configured with `source: {interface: ...}`.
//
// ## Implementation
//
// The table is read with `if_addrs::get_if_addrs()` on every lookup. Source
// resolution only runs when a probe is added, so there is no cache to go
// stale when addresses change.
//
// ## Address Order
//
// Addresses are returned in the order the OS reports them. Resolution picks
// the first one of the requested family, so on multi-homed interfaces the
// primary address wins.

use sonde_core::source::InterfaceLookup;
use sonde_core::{Error, Result};
use std::net::IpAddr;
use tracing::debug;

/// Interface lookup reading the live OS interface table
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaceLookup;

impl SystemInterfaceLookup {
    pub fn new() -> Self {
        Self
    }
}

impl InterfaceLookup for SystemInterfaceLookup {
    fn addrs(&self, name: &str) -> Result<Vec<IpAddr>> {
        let interfaces = if_addrs::get_if_addrs()
            .map_err(|e| Error::device_not_found(name, e.to_string()))?;

        let addrs = addresses_of(
            name,
            interfaces.iter().map(|iface| (iface.name.as_str(), iface.ip())),
        );
        if addrs.is_empty() {
            return Err(Error::device_not_found(name, "no such interface"));
        }

        debug!(interface = %name, count = addrs.len(), "Interface addresses listed");
        Ok(addrs)
    }
}

/// Addresses of `name` out of `(interface, address)` pairs, keeping order
///
/// The OS reports one entry per address, so an interface may appear many
/// times; an interface without any address does not appear at all.
fn addresses_of<'a, I>(name: &str, entries: I) -> Vec<IpAddr>
where
    I: IntoIterator<Item = (&'a str, IpAddr)>,
{
    entries
        .into_iter()
        .filter(|(iface, _)| *iface == name)
        .map(|(_, ip)| ip)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn addresses_of_keeps_os_order() {
        let entries = [
            ("lo", ip("127.0.0.1")),
            ("eth0", ip("10.0.0.2")),
            ("eth0", ip("fe80::1")),
            ("lo", ip("::1")),
            ("eth0", ip("10.0.0.3")),
        ];

        assert_eq!(
            addresses_of("eth0", entries),
            [ip("10.0.0.2"), ip("fe80::1"), ip("10.0.0.3")]
        );
        assert!(addresses_of("eth1", entries).is_empty());
    }

    #[test]
    fn unknown_interface_is_device_not_found() {
        let err = SystemInterfaceLookup
            .addrs("sonde-test-no-such-if0")
            .unwrap_err();

        assert!(matches!(err, Error::DeviceNotFound { .. }));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn loopback_resolves_as_source() {
        use sonde_core::config::{IpVersion, SourceConfig};
        use sonde_core::resolve_source;

        // `lo` always carries 127.0.0.1 on Linux.
        let source = resolve_source(
            &SourceConfig::Interface("lo".into()),
            Some(IpVersion::V4),
            &SystemInterfaceLookup,
        )
        .unwrap();

        assert_eq!(source, Some(ip("127.0.0.1")));
    }
}
