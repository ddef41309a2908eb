//! Heuristic correlation of untagged interfaces.

use tracing::warn;
use vpp_types::IpPrefix;

use super::types::Interface;

/// Returns true if the untagged `actual` interface is most likely the
/// dataplane instance of `desired`.
///
/// Two rules, tried in order:
/// 1. desired declares a non-zero MAC address and it equals the actual one
/// 2. both declare the same number of addresses and every desired address
///    (address and mask) is present on the actual interface
///
/// Rule 2 also holds when neither side declares any address.
pub fn correlate_interface(actual: &Interface, desired: &Interface) -> bool {
    if let Some(mac) = desired.phys_address.filter(|mac| !mac.is_zero()) {
        if actual.phys_address == Some(mac) {
            return true;
        }
    }

    desired.ip_addresses.len() == actual.ip_addresses.len()
        && ip_addresses_match(&desired.ip_addresses, actual.ip_addresses.as_slice())
}

/// Returns true if every desired address has an identical counterpart
/// (same address bytes and same prefix length) among `actual`.
///
/// Address literals that fail to parse never match anything.
pub(crate) fn ip_addresses_match<A: AsRef<str>>(desired: &[String], actual: &[A]) -> bool {
    desired.iter().all(|want| {
        actual
            .iter()
            .any(|have| same_ip_address(want, have.as_ref()))
    })
}

fn same_ip_address(desired: &str, actual: &str) -> bool {
    let desired = match desired.parse::<IpPrefix>() {
        Ok(prefix) => prefix,
        Err(e) => {
            warn!("Failed to parse desired address {}: {}", desired, e);
            return false;
        }
    };
    let actual = match actual.parse::<IpPrefix>() {
        Ok(prefix) => prefix,
        Err(e) => {
            warn!("Failed to parse dumped address {}: {}", actual, e);
            return false;
        }
    };
    desired == actual
}
