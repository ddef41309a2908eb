//! Structural comparison of a desired interface with its dumped counterpart.
//!
//! The checks run in a fixed order and stop at the first difference; only
//! the name of that difference is reported.

use vpp_types::IpPrefix;

use super::correlate::ip_addresses_match;
use super::types::{Interface, InterfaceType};

type Check = fn(&Interface, &Interface) -> bool;

/// `(name, differs)` pairs, evaluated in order.
const CHECKS: &[(&str, Check)] = &[
    ("type", |d, a| d.if_type != a.if_type),
    ("enabled", |d, a| d.enabled != a.enabled),
    ("vrf", |d, a| d.vrf != a.vrf),
    ("container_ip_address", |d, a| {
        d.container_ip_address != a.container_ip_address
    }),
    ("set_dhcp_client", |d, a| d.set_dhcp_client != a.set_dhcp_client),
    ("mtu", mtu_differs),
    ("phys_address", phys_address_differs),
    ("ip_addresses", ip_addresses_differ),
    ("rx_mode_settings", |d, a| d.rx_mode_settings != a.rx_mode_settings),
    ("afpacket", afpacket_differs),
    ("memif", memif_differs),
    ("tap", tap_differs),
    ("vxlan", vxlan_differs),
];

/// Returns true if `actual` must be modified to match `desired`.
pub fn is_interface_modified(desired: &Interface, actual: &Interface) -> bool {
    first_difference(desired, actual).is_some()
}

/// Returns the name of the first differing property, if any.
pub fn first_difference(desired: &Interface, actual: &Interface) -> Option<&'static str> {
    CHECKS
        .iter()
        .find(|(_, differs)| differs(desired, actual))
        .map(|(name, _)| *name)
}

/// MTU has no meaning for tunnels.
fn mtu_differs(desired: &Interface, actual: &Interface) -> bool {
    desired.if_type != InterfaceType::VxlanTunnel && desired.mtu != actual.mtu
}

/// Only compared when the desired config pins a non-zero MAC address.
fn phys_address_differs(desired: &Interface, actual: &Interface) -> bool {
    match desired.phys_address {
        Some(mac) if !mac.is_zero() => actual.phys_address != Some(mac),
        _ => false,
    }
}

fn ip_addresses_differ(desired: &Interface, actual: &Interface) -> bool {
    // Unnumbered interfaces borrow their addresses
    if desired.unnumbered.is_some() {
        return false;
    }

    // Link-local addresses are assigned by the dataplane itself
    let actual_ips: Vec<&str> = actual
        .ip_addresses
        .iter()
        .map(String::as_str)
        .filter(|ip| !ip.parse::<IpPrefix>().is_ok_and(|p| p.is_link_local()))
        .collect();

    desired.ip_addresses.len() != actual_ips.len()
        || !ip_addresses_match(&desired.ip_addresses, actual_ips.as_slice())
}

fn afpacket_differs(desired: &Interface, actual: &Interface) -> bool {
    if desired.if_type != InterfaceType::AfPacketInterface {
        return false;
    }
    match (&desired.afpacket, &actual.afpacket) {
        (Some(d), Some(a)) => d.host_if_name != a.host_if_name,
        (None, None) => false,
        _ => true,
    }
}

fn memif_differs(desired: &Interface, actual: &Interface) -> bool {
    if desired.if_type != InterfaceType::MemoryInterface {
        return false;
    }
    match (&desired.memif, &actual.memif) {
        (Some(d), Some(a)) => {
            d.id != a.id
                || d.socket_filename != a.socket_filename
                || d.master != a.master
                || d.mode != a.mode
                || d.rx_queues != a.rx_queues
                || d.tx_queues != a.tx_queues
        }
        (None, None) => false,
        _ => true,
    }
}

fn tap_differs(desired: &Interface, actual: &Interface) -> bool {
    if desired.if_type != InterfaceType::TapInterface {
        return false;
    }
    match (&desired.tap, &actual.tap) {
        (Some(d), Some(a)) => {
            // Version 1 is the default; only an explicit v2 request is enforced
            (d.version == 2 && d.version != a.version)
                || d.namespace != a.namespace
                || d.host_if_name != a.host_if_name
                || d.rx_ring_size != a.rx_ring_size
                || d.tx_ring_size != a.tx_ring_size
        }
        (None, None) => false,
        _ => true,
    }
}

fn vxlan_differs(desired: &Interface, actual: &Interface) -> bool {
    if desired.if_type != InterfaceType::VxlanTunnel {
        return false;
    }
    match (&desired.vxlan, &actual.vxlan) {
        (Some(d), Some(a)) => {
            d.vni != a.vni
                || d.src_address != a.src_address
                || d.dst_address != a.dst_address
                || d.multicast != a.multicast
        }
        (None, None) => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intfs::types::{MemifLink, RxMode, RxModeSettings, TapLink, Unnumbered, VxlanLink};
    use pretty_assertions::assert_eq;

    fn eth(name: &str) -> Interface {
        Interface {
            enabled: true,
            mtu: 1500,
            ip_addresses: vec!["10.0.0.1/24".to_string()],
            ..Interface::new(name, InterfaceType::EthernetCsmacd)
        }
    }

    #[test]
    fn test_identical_is_not_modified() {
        let iface = eth("eth0");
        assert!(!is_interface_modified(&iface, &iface.clone()));
    }

    #[test]
    fn test_first_difference_order() {
        let desired = eth("eth0");
        let mut actual = eth("eth0");
        actual.mtu = 1400;
        actual.enabled = false;
        actual.ip_addresses.clear();

        // enabled is checked before mtu and addresses
        assert_eq!(first_difference(&desired, &actual), Some("enabled"));

        actual.enabled = true;
        assert_eq!(first_difference(&desired, &actual), Some("mtu"));
    }

    #[test]
    fn test_mtu_ignored_for_vxlan() {
        let vxlan = VxlanLink {
            src_address: "192.168.1.1".to_string(),
            dst_address: "192.168.1.2".to_string(),
            vni: 13,
            multicast: String::new(),
        };
        let desired = Interface {
            mtu: 1500,
            vxlan: Some(vxlan.clone()),
            ..Interface::new("vxlan1", InterfaceType::VxlanTunnel)
        };
        let actual = Interface {
            mtu: 0,
            vxlan: Some(vxlan),
            ..Interface::new("vxlan1", InterfaceType::VxlanTunnel)
        };
        assert!(!is_interface_modified(&desired, &actual));

        let mut other_vni = actual.clone();
        other_vni.vxlan.as_mut().unwrap().vni = 14;
        assert_eq!(first_difference(&desired, &other_vni), Some("vxlan"));
    }

    #[test]
    fn test_phys_address_only_when_desired() {
        let mut desired = eth("eth0");
        let mut actual = eth("eth0");
        actual.phys_address = Some("02:00:00:00:00:01".parse().unwrap());
        assert!(!is_interface_modified(&desired, &actual));

        desired.phys_address = Some("02:00:00:00:00:01".parse().unwrap());
        assert!(!is_interface_modified(&desired, &actual));

        desired.phys_address = Some("02:00:00:00:00:02".parse().unwrap());
        assert_eq!(first_difference(&desired, &actual), Some("phys_address"));

        // An all-zero MAC does not pin anything
        desired.phys_address = Some("00:00:00:00:00:00".parse().unwrap());
        assert!(!is_interface_modified(&desired, &actual));
    }

    #[test]
    fn test_link_local_stripped() {
        let desired = eth("eth0");
        let mut actual = eth("eth0");
        actual.ip_addresses.push("fe80::1/64".to_string());
        assert!(!is_interface_modified(&desired, &actual));
    }

    #[test]
    fn test_unnumbered_skips_addresses() {
        let mut desired = eth("eth0");
        desired.ip_addresses.clear();
        desired.unnumbered = Some(Unnumbered {
            interface_with_ip: "loop0".to_string(),
        });
        let mut actual = eth("eth0");
        actual.ip_addresses = vec!["192.168.0.1/24".to_string()];
        assert!(!is_interface_modified(&desired, &actual));
    }

    #[test]
    fn test_address_set_differs() {
        let desired = eth("eth0");
        let mut actual = eth("eth0");
        actual.ip_addresses = vec!["10.0.0.2/24".to_string()];
        assert_eq!(first_difference(&desired, &actual), Some("ip_addresses"));
    }

    #[test]
    fn test_rx_mode_presence_and_value() {
        let mut desired = eth("eth0");
        let mut actual = eth("eth0");
        desired.rx_mode_settings = Some(RxModeSettings {
            rx_mode: RxMode::Interrupt,
            queue_id: 0,
            queue_id_valid: 1,
        });
        assert_eq!(first_difference(&desired, &actual), Some("rx_mode_settings"));

        actual.rx_mode_settings = desired.rx_mode_settings.clone();
        assert!(!is_interface_modified(&desired, &actual));

        actual.rx_mode_settings.as_mut().unwrap().queue_id = 1;
        assert_eq!(first_difference(&desired, &actual), Some("rx_mode_settings"));
    }

    #[test]
    fn test_memif_unreported_fields_ignored() {
        let memif = MemifLink {
            master: true,
            id: 1,
            socket_filename: "/run/vpp/memif.sock".to_string(),
            secret: "s3cret".to_string(),
            ring_size: 1024,
            buffer_size: 2048,
            ..Default::default()
        };
        let desired = Interface {
            memif: Some(memif.clone()),
            ..Interface::new("memif1", InterfaceType::MemoryInterface)
        };
        let actual = Interface {
            memif: Some(MemifLink {
                secret: String::new(),
                ring_size: 1,
                buffer_size: 0,
                ..memif
            }),
            ..Interface::new("memif1", InterfaceType::MemoryInterface)
        };
        assert!(!is_interface_modified(&desired, &actual));

        let mut slave = actual.clone();
        slave.memif.as_mut().unwrap().master = false;
        assert_eq!(first_difference(&desired, &slave), Some("memif"));
    }

    #[test]
    fn test_tap_version_and_rings() {
        let desired = Interface {
            tap: Some(TapLink {
                version: 1,
                host_if_name: "tap-host".to_string(),
                rx_ring_size: 256,
                tx_ring_size: 256,
                ..Default::default()
            }),
            ..Interface::new("tap1", InterfaceType::TapInterface)
        };
        let mut actual = desired.clone();
        actual.tap.as_mut().unwrap().version = 2;
        // v1 is not enforced
        assert!(!is_interface_modified(&desired, &actual));

        let mut v2 = desired.clone();
        v2.tap.as_mut().unwrap().version = 2;
        let mut v1_actual = desired.clone();
        v1_actual.tap.as_mut().unwrap().version = 1;
        assert_eq!(first_difference(&v2, &v1_actual), Some("tap"));

        let mut rings = desired.clone();
        rings.tap.as_mut().unwrap().rx_ring_size = 512;
        assert_eq!(first_difference(&desired, &rings), Some("tap"));
    }

    #[test]
    fn test_type_specific_block_follows_desired_type() {
        let desired = eth("eth0");
        let mut actual = eth("eth0");
        // Not evaluated for ethernet interfaces
        actual.tap = Some(TapLink::default());
        assert!(!is_interface_modified(&desired, &actual));
    }
}
