//! End-to-end resync tests against the simulated dataplane.
//!
//! Each test seeds a `SimDataplane` with a snapshot, runs one or more
//! orchestrators on it and checks the recorded dataplane operations.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use vpp_agent::bfd::{BfdAuthKey, BfdOrch, BfdOrchCallbacks, BfdOrchConfig, BfdSession};
use vpp_agent::config::{DataplaneSnapshot, DesiredState, ResyncStrategy};
use vpp_agent::daemon::{ResyncDaemon, ResyncDaemonConfig};
use vpp_agent::intfs::{
    first_difference, Interface, InterfaceDetails, InterfaceMeta, InterfaceType, IntfsOrch,
    IntfsOrchCallbacks, IntfsOrchConfig,
};
use vpp_agent::nat::{
    identity_mapping_id, static_mapping_id, DNatConfig, IdentityMapping, LocalIp, Nat44Global,
    NatInterface, NatOrch, NatOrchCallbacks, NatOrchConfig, StaticMapping,
};
use vpp_agent::sim::{Family, OpKind, SimDataplane};
use vpp_agent::stn::{StnRule, StnRuleDetails};
use vpp_types::MacAddress;

fn details(index: u32, iface: Interface) -> InterfaceDetails {
    InterfaceDetails {
        meta: InterfaceMeta {
            internal_name: format!("dev{}", index),
            sw_if_index: index,
        },
        interface: iface,
    }
}

fn ethernet(name: &str, mtu: u32) -> Interface {
    let mut iface = Interface::new(name, InterfaceType::EthernetCsmacd);
    iface.enabled = true;
    iface.mtu = mtu;
    iface
}

fn with_ips(mut iface: Interface, ips: &[&str]) -> Interface {
    iface.ip_addresses = ips.iter().map(|ip| ip.to_string()).collect();
    iface
}

fn mac(s: &str) -> MacAddress {
    s.parse().unwrap()
}

fn lb_mapping(locals: &[(&str, u32)]) -> StaticMapping {
    StaticMapping {
        external_ip: "192.0.2.10".to_string(),
        external_port: 80,
        local_ips: locals
            .iter()
            .map(|(ip, port)| LocalIp::new(*ip, *port, 50))
            .collect(),
        ..Default::default()
    }
}

fn changes(sim: &SimDataplane) -> Vec<String> {
    sim.ops()
        .into_iter()
        .filter(|op| op.kind != OpKind::Tag)
        .map(|op| op.to_string())
        .collect()
}

fn intfs_orch(sim: &Arc<SimDataplane>) -> IntfsOrch {
    let mut orch = IntfsOrch::new(IntfsOrchConfig::default());
    orch.set_callbacks(sim.clone() as Arc<dyn IntfsOrchCallbacks>);
    orch
}

/// A dataplane with something of every family in it.
fn populated_snapshot() -> DataplaneSnapshot {
    let mut untagged = Interface::new("", InterfaceType::MemoryInterface);
    untagged.phys_address = Some(mac("02:00:00:00:00:01"));

    DataplaneSnapshot {
        interfaces: vec![
            details(1, ethernet("eth0", 1400)),
            details(2, untagged),
            details(3, Interface::new("stale", InterfaceType::SoftwareLoopback)),
        ],
        bfd_sessions: vec![BfdSession::new("eth0", "10.0.0.1", "10.0.0.2")],
        bfd_auth_keys: vec![BfdAuthKey::new(1, "secret"), BfdAuthKey::new(7, "old")],
        stn_rules: vec![StnRuleDetails {
            ip_address: "10.1.1.9".to_string(),
            interface: "eth0".to_string(),
            sw_if_index: 1,
        }],
        nat_global: Nat44Global {
            forwarding: false,
            ..Default::default()
        },
        dnat: vec![DNatConfig {
            label: "L1".to_string(),
            st_mappings: vec![lb_mapping(&[("10.0.0.2", 80), ("10.0.0.1", 80)])],
            id_mappings: vec![],
        }],
        ..Default::default()
    }
}

fn populated_desired() -> DesiredState {
    let mut memif = Interface::new("memif1", InterfaceType::MemoryInterface);
    memif.phys_address = Some(mac("02:00:00:00:00:01"));

    DesiredState {
        interfaces: vec![ethernet("eth0", 1500), memif, Interface::new("loop1", InterfaceType::SoftwareLoopback)],
        bfd_sessions: vec![BfdSession::new("eth0", "10.0.0.1", "10.0.0.2")],
        bfd_auth_keys: vec![BfdAuthKey::new(1, "secret"), BfdAuthKey::new(2, "secret")],
        stn_rules: vec![StnRule::new("rule1", "10.1.1.3", "memif1")],
        nat_global: Some(Nat44Global {
            forwarding: true,
            nat_interfaces: vec![NatInterface {
                name: "eth0".to_string(),
                is_inside: false,
                output_feature: false,
            }],
            ..Default::default()
        }),
        dnat: vec![
            DNatConfig {
                label: "L1".to_string(),
                st_mappings: vec![lb_mapping(&[("10.0.0.1", 80), ("10.0.0.2", 80)])],
                id_mappings: vec![],
            },
            DNatConfig {
                label: "L2".to_string(),
                st_mappings: vec![],
                id_mappings: vec![IdentityMapping {
                    ip_address: "10.0.0.20".to_string(),
                    port: 22,
                    ..Default::default()
                }],
            },
        ],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_second_resync_changes_nothing() {
    let sim = Arc::new(SimDataplane::new(populated_snapshot()));
    let daemon = ResyncDaemon::new(ResyncDaemonConfig::default(), sim.clone());

    let first = daemon.run(populated_desired()).await;
    assert!(first.is_success(), "{:?}", first);
    assert!(!changes(&sim).is_empty());

    sim.clear_ops();
    let second = daemon.run(populated_desired()).await;

    assert!(second.is_success(), "{:?}", second);
    assert_eq!(changes(&sim), Vec::<String>::new());
}

#[tokio::test]
async fn test_first_resync_converges_state() {
    let sim = Arc::new(SimDataplane::new(populated_snapshot()));
    let daemon = ResyncDaemon::new(ResyncDaemonConfig::default(), sim.clone());

    let report = daemon.run(populated_desired()).await;
    assert!(report.is_success());
    assert!(report.pending_stn_rules.is_empty());

    // stale deleted, untagged memif adopted, loop1 created
    assert_eq!(sim.count(Family::Interface, OpKind::Delete), 1);
    assert_eq!(sim.count(Family::Interface, OpKind::Create), 1);
    assert_eq!(sim.count(Family::Interface, OpKind::Modify), 1);

    let state = sim.snapshot();
    let mut names: Vec<&str> = state
        .interfaces
        .iter()
        .map(|d| d.interface.name.as_str())
        .filter(|n| !n.is_empty())
        .collect();
    names.sort_unstable();
    assert_eq!(names, vec!["eth0", "loop1", "memif1"]);

    let keys: Vec<u32> = state.bfd_auth_keys.iter().map(|k| k.id).collect();
    assert_eq!(keys, vec![1, 2]);

    let stn: Vec<&str> = state.stn_rules.iter().map(|r| r.ip_address.as_str()).collect();
    assert_eq!(stn, vec!["10.1.1.3"]);

    assert!(state.nat_global.forwarding);
    let labels: Vec<&str> = state.dnat.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, vec!["L1", "L2"]);
}

#[test]
fn test_verbatim_interfaces_are_not_modified() {
    let desired = vec![
        with_ips(ethernet("eth0", 1500), &["10.0.0.1/24"]),
        ethernet("eth1", 9000),
    ];
    let snapshot = DataplaneSnapshot {
        interfaces: vec![details(1, desired[0].clone()), details(2, desired[1].clone())],
        ..Default::default()
    };
    let sim = Arc::new(SimDataplane::new(snapshot));
    let mut orch = intfs_orch(&sim);

    orch.resync(&desired).unwrap();

    assert_eq!(changes(&sim), Vec::<String>::new());
    for (index, details) in sim.dump_interfaces().unwrap() {
        if index == 0 {
            continue;
        }
        let want = desired
            .iter()
            .find(|d| d.name == details.interface.name)
            .unwrap();
        assert_eq!(first_difference(want, &details.interface), None);
    }
}

#[test]
fn test_tagged_interfaces_not_desired_are_deleted() {
    let snapshot = DataplaneSnapshot {
        interfaces: vec![
            details(1, ethernet("eth0", 1500)),
            details(2, Interface::new("old1", InterfaceType::SoftwareLoopback)),
            details(3, Interface::new("old2", InterfaceType::TapInterface)),
        ],
        ..Default::default()
    };
    let sim = Arc::new(SimDataplane::new(snapshot));
    let mut orch = intfs_orch(&sim);

    orch.resync(&[ethernet("eth0", 1500)]).unwrap();

    assert_eq!(sim.count(Family::Interface, OpKind::Delete), 2);
    assert_eq!(sim.count(Family::Interface, OpKind::Create), 0);
    assert!(!orch.indexes().contains_name("old1"));
    assert!(!orch.indexes().contains_name("old2"));
    assert_eq!(orch.indexes().lookup_idx("eth0"), Some(1));
}

#[test]
fn test_mac_correlation_wins_over_address_match() {
    let mut by_mac = Interface::new("", InterfaceType::MemoryInterface);
    by_mac.phys_address = Some(mac("02:00:00:00:00:aa"));
    let by_ip = with_ips(Interface::new("", InterfaceType::MemoryInterface), &["10.0.0.1/24"]);

    let snapshot = DataplaneSnapshot {
        interfaces: vec![details(1, by_mac), details(2, by_ip)],
        ..Default::default()
    };
    let sim = Arc::new(SimDataplane::new(snapshot));
    let mut orch = intfs_orch(&sim);

    let ip_side = with_ips(Interface::new("memif-ip", InterfaceType::MemoryInterface), &["10.0.0.1/24"]);
    let mut mac_side = Interface::new("memif-mac", InterfaceType::MemoryInterface);
    mac_side.phys_address = Some(mac("02:00:00:00:00:AA"));

    orch.resync(&[ip_side, mac_side]).unwrap();

    assert_eq!(orch.indexes().lookup_idx("memif-mac"), Some(1));
    assert_eq!(orch.indexes().lookup_idx("memif-ip"), Some(2));
    assert_eq!(sim.count(Family::Interface, OpKind::Create), 0);
    assert_eq!(sim.count(Family::Interface, OpKind::Delete), 0);
}

#[test]
fn test_sentinel_only_dataplane_skips_resync() {
    let sim = Arc::new(SimDataplane::default());
    let orch = intfs_orch(&sim);
    assert!(orch.verify_config_presence());

    let populated = Arc::new(SimDataplane::new(populated_snapshot()));
    assert!(!intfs_orch(&populated).verify_config_presence());
}

#[test]
fn test_presence_check_dump_failure_continues() {
    let sim = Arc::new(SimDataplane::default());
    sim.fail_on(Family::Interface, OpKind::Dump);
    assert!(!intfs_orch(&sim).verify_config_presence());
}

#[test]
fn test_mtu_change_is_one_modify() {
    let snapshot = DataplaneSnapshot {
        interfaces: vec![details(1, ethernet("eth0", 1400))],
        ..Default::default()
    };
    let sim = Arc::new(SimDataplane::new(snapshot));
    let mut orch = intfs_orch(&sim);

    orch.resync(&[ethernet("eth0", 1500)]).unwrap();

    assert_eq!(changes(&sim), vec!["modify interface eth0"]);
    assert_eq!(orch.interface_state("eth0").map(|s| s.mtu), Some(1500));
}

#[test]
fn test_reordered_lb_endpoints_are_already_configured() {
    let snapshot = DataplaneSnapshot {
        dnat: vec![DNatConfig {
            label: "L1".to_string(),
            st_mappings: vec![lb_mapping(&[("10.0.0.2", 80), ("10.0.0.1", 80)])],
            id_mappings: vec![],
        }],
        ..Default::default()
    };
    let sim = Arc::new(SimDataplane::new(snapshot));
    let mut orch = NatOrch::new(NatOrchConfig::default());
    orch.set_callbacks(sim.clone() as Arc<dyn NatOrchCallbacks>);

    let desired = DNatConfig {
        label: "L1".to_string(),
        st_mappings: vec![lb_mapping(&[("10.0.0.1", 80), ("10.0.0.2", 80)])],
        id_mappings: vec![],
    };
    orch.resync_dnat(&[desired]).unwrap();

    assert_eq!(sim.count(Family::DnatLbStaticMapping, OpKind::Create), 0);
    assert_eq!(sim.count(Family::DnatLbStaticMapping, OpKind::Delete), 0);
    assert_eq!(orch.static_mappings().len(), 1);
    assert!(orch.dnat_labels().contains_name("L1"));
}

fn dnat_only_snapshot() -> DataplaneSnapshot {
    DataplaneSnapshot {
        dnat: vec![DNatConfig {
            label: "L1".to_string(),
            st_mappings: vec![lb_mapping(&[("10.0.0.1", 80), ("10.0.0.2", 80)])],
            id_mappings: vec![],
        }],
        ..Default::default()
    }
}

fn dnat_ops(sim: &SimDataplane) -> Vec<String> {
    sim.ops()
        .into_iter()
        .filter(|op| {
            matches!(
                op.family,
                Family::DnatStaticMapping | Family::DnatLbStaticMapping | Family::DnatIdentityMapping
            )
        })
        .map(|op| op.to_string())
        .collect()
}

#[tokio::test]
async fn test_missing_dnat_label_is_configured() {
    let sim = Arc::new(SimDataplane::new(dnat_only_snapshot()));
    let daemon = ResyncDaemon::new(ResyncDaemonConfig::default(), sim.clone());

    let web = StaticMapping {
        external_ip: "192.0.2.20".to_string(),
        external_port: 443,
        local_ips: vec![LocalIp::new("10.0.0.5", 8443, 0)],
        ..Default::default()
    };
    let ssh = IdentityMapping {
        ip_address: "10.0.0.21".to_string(),
        port: 22,
        ..Default::default()
    };
    let desired = DesiredState {
        dnat: vec![
            DNatConfig {
                label: "L1".to_string(),
                st_mappings: vec![lb_mapping(&[("10.0.0.1", 80), ("10.0.0.2", 80)])],
                id_mappings: vec![],
            },
            DNatConfig {
                label: "L2".to_string(),
                st_mappings: vec![web.clone()],
                id_mappings: vec![ssh.clone()],
            },
        ],
        ..Default::default()
    };

    let report = daemon.run(desired).await;

    assert!(report.is_success(), "{:?}", report);
    assert_eq!(
        dnat_ops(&sim),
        vec![
            format!("create dnat-static-mapping {}", static_mapping_id(&web)),
            format!("create dnat-identity-mapping {}", identity_mapping_id(&ssh)),
        ]
    );
    let labels: Vec<String> = sim.snapshot().dnat.into_iter().map(|d| d.label).collect();
    assert_eq!(labels, vec!["L1", "L2"]);
}

#[tokio::test]
async fn test_dnat_dump_failure_creates_no_mappings() {
    let sim = Arc::new(SimDataplane::new(dnat_only_snapshot()));
    sim.fail_on(Family::Dnat, OpKind::Dump);
    let daemon = ResyncDaemon::new(ResyncDaemonConfig::default(), sim.clone());

    let desired = DesiredState {
        dnat: vec![DNatConfig {
            label: "L1".to_string(),
            st_mappings: vec![lb_mapping(&[("10.0.0.1", 80), ("10.0.0.2", 80)])],
            id_mappings: vec![],
        }],
        ..Default::default()
    };

    let report = daemon.run(desired).await;

    let failed: Vec<&str> = report.failures().map(|o| o.family).collect();
    assert_eq!(failed, vec!["dnat"]);
    assert_eq!(dnat_ops(&sim), Vec::<String>::new());
    assert_eq!(sim.snapshot().dnat[0].st_mappings.len(), 1);
}

#[test]
fn test_missing_bfd_key_is_created() {
    let snapshot = DataplaneSnapshot {
        bfd_auth_keys: vec![BfdAuthKey::new(1, "secret")],
        ..Default::default()
    };
    let sim = Arc::new(SimDataplane::new(snapshot));
    let mut orch = BfdOrch::new(BfdOrchConfig::default());
    orch.set_callbacks(sim.clone() as Arc<dyn BfdOrchCallbacks>);

    orch.resync_auth_keys(&[BfdAuthKey::new(1, "secret"), BfdAuthKey::new(2, "secret")])
        .unwrap();

    assert_eq!(changes(&sim), vec!["create bfd-auth-key auth-key-2"]);
    assert_eq!(sim.count(Family::BfdAuthKey, OpKind::Delete), 0);
}

#[tokio::test]
async fn test_cold_start_strategy_runs_on_populated_dataplane() {
    let sim = Arc::new(SimDataplane::new(populated_snapshot()));
    let daemon = ResyncDaemon::new(
        ResyncDaemonConfig {
            strategy: ResyncStrategy::OptimizeColdStart,
            ..Default::default()
        },
        sim.clone(),
    );

    let report = daemon.run(populated_desired()).await;

    assert!(!report.skipped);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_interface_failure_does_not_stop_other_families() {
    let sim = Arc::new(SimDataplane::new(populated_snapshot()));
    sim.fail_on(Family::Interface, OpKind::Delete);
    let daemon = ResyncDaemon::new(ResyncDaemonConfig::default(), sim.clone());

    let report = daemon.run(populated_desired()).await;

    let failed: Vec<&str> = report.failures().map(|o| o.family).collect();
    assert_eq!(failed, vec!["interfaces"]);
    assert_eq!(sim.count(Family::BfdAuthKey, OpKind::Create), 1);
}

#[tokio::test]
async fn test_demo_files() {
    let demos = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos");
    let config = vpp_agent::config::load_config(demos.join("resync.yaml")).unwrap();
    let snapshot = vpp_agent::config::load_snapshot(demos.join("snapshot.yaml")).unwrap();

    let sim = Arc::new(SimDataplane::new(snapshot));
    let daemon = ResyncDaemon::new(ResyncDaemonConfig::default(), sim.clone());

    let report = daemon.run(config.desired.clone()).await;
    assert!(report.is_success(), "{:?}", report);
    assert_eq!(sim.count(Family::Interface, OpKind::Delete), 1);
    assert_eq!(sim.count(Family::DnatIdentityMapping, OpKind::Delete), 1);
    assert_eq!(sim.count(Family::DnatLbStaticMapping, OpKind::Create), 0);
    assert_eq!(sim.bfd_echo_function().map(|e| e.echo_source_interface), Some("loop1".to_string()));

    // The echo source cannot be dumped, so it is applied on every pass
    sim.clear_ops();
    daemon.run(config.desired).await;
    let repeated: Vec<String> = changes(&sim);
    assert_eq!(repeated, vec!["create bfd-echo loop1"]);
}
