//! In-memory dataplane.
//!
//! `SimDataplane` implements the callback trait of every family against an
//! in-memory state seeded from a [`DataplaneSnapshot`]. Each successful
//! create/modify/delete/tag call is recorded as a [`DataplaneOp`], which
//! makes it usable both as a dry-run planner and as a test double.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::debug;

use crate::bfd::{auth_key_identifier, BfdAuthKey, BfdEchoFunction, BfdOrchCallbacks, BfdSession};
use crate::config::DataplaneSnapshot;
use crate::intfs::{
    Interface, InterfaceDetails, InterfaceMeta, InterfaceType, IntfsOrchCallbacks, LOCAL0_NAME,
};
use crate::nat::{
    identity_mapping_id, static_mapping_id, AddressPool, DNatConfig, IdentityMapping, Nat44Global,
    NatInterface, NatOrchCallbacks, StaticMapping,
};
use crate::stn::{StnOrchCallbacks, StnRule, StnRuleDetails};

/// Object family a dataplane call works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Family {
    Interface,
    BfdSession,
    BfdAuthKey,
    BfdEcho,
    StnRule,
    NatGlobal,
    DnatStaticMapping,
    DnatLbStaticMapping,
    DnatIdentityMapping,
    Dnat,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Family::Interface => "interface",
            Family::BfdSession => "bfd-session",
            Family::BfdAuthKey => "bfd-auth-key",
            Family::BfdEcho => "bfd-echo",
            Family::StnRule => "stn-rule",
            Family::NatGlobal => "nat-global",
            Family::DnatStaticMapping => "dnat-static-mapping",
            Family::DnatLbStaticMapping => "dnat-lb-static-mapping",
            Family::DnatIdentityMapping => "dnat-identity-mapping",
            Family::Dnat => "dnat",
        };
        write!(f, "{}", s)
    }
}

/// Kind of dataplane call. `Dump` calls are never recorded, they only
/// exist for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Dump,
    Create,
    Modify,
    Delete,
    Tag,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpKind::Dump => "dump",
            OpKind::Create => "create",
            OpKind::Modify => "modify",
            OpKind::Delete => "delete",
            OpKind::Tag => "tag",
        };
        write!(f, "{}", s)
    }
}

/// Recorded dataplane call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataplaneOp {
    pub family: Family,
    pub kind: OpKind,
    pub object: String,
}

impl fmt::Display for DataplaneOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.kind, self.family, self.object)
    }
}

#[derive(Debug, Default)]
struct SimState {
    interfaces: BTreeMap<u32, InterfaceDetails>,
    next_if_index: u32,
    memif_sockets: HashMap<String, u32>,
    bfd_sessions: Vec<BfdSession>,
    bfd_keys: Vec<BfdAuthKey>,
    bfd_echo: Option<BfdEchoFunction>,
    stn_rules: Vec<StnRuleDetails>,
    nat_global: Nat44Global,
    dnats: Vec<DNatConfig>,
    ops: Vec<DataplaneOp>,
    failures: HashSet<(Family, OpKind)>,
}

impl SimState {
    fn dnat_mut(&mut self, label: &str) -> &mut DNatConfig {
        if let Some(pos) = self.dnats.iter().position(|d| d.label == label) {
            return &mut self.dnats[pos];
        }
        self.dnats.push(DNatConfig::new(label));
        let last = self.dnats.len() - 1;
        &mut self.dnats[last]
    }

    fn drop_empty_dnats(&mut self) {
        self.dnats.retain(|d| !d.is_empty());
    }
}

/// Simulated dataplane.
#[derive(Debug)]
pub struct SimDataplane {
    state: Mutex<SimState>,
}

impl Default for SimDataplane {
    fn default() -> Self {
        Self::new(DataplaneSnapshot::default())
    }
}

fn internal_name(if_type: InterfaceType, index: u32) -> String {
    match if_type {
        InterfaceType::SoftwareLoopback => format!("loop{}", index),
        InterfaceType::EthernetCsmacd => format!("GigabitEthernet0/{}/0", index),
        InterfaceType::MemoryInterface => format!("memif0/{}", index),
        InterfaceType::TapInterface => format!("tap{}", index),
        InterfaceType::AfPacketInterface => format!("host-{}", index),
        InterfaceType::VxlanTunnel => format!("vxlan_tunnel{}", index),
    }
}

impl SimDataplane {
    /// Builds the dataplane from `snapshot`. The sentinel `local0` device is
    /// added at index 0 unless the snapshot has one.
    pub fn new(snapshot: DataplaneSnapshot) -> Self {
        let mut interfaces: BTreeMap<u32, InterfaceDetails> = snapshot
            .interfaces
            .into_iter()
            .map(|details| (details.meta.sw_if_index, details))
            .collect();
        interfaces.entry(0).or_insert_with(|| InterfaceDetails {
            interface: Interface::default(),
            meta: InterfaceMeta {
                internal_name: LOCAL0_NAME.to_string(),
                sw_if_index: 0,
            },
        });
        let next_if_index = interfaces.keys().next_back().map_or(1, |last| last + 1);

        let state = SimState {
            interfaces,
            next_if_index,
            memif_sockets: snapshot.memif_sockets.into_iter().collect(),
            bfd_sessions: snapshot.bfd_sessions,
            bfd_keys: snapshot.bfd_auth_keys,
            stn_rules: snapshot.stn_rules,
            nat_global: snapshot.nat_global,
            dnats: snapshot.dnat,
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recorded calls, oldest first.
    pub fn ops(&self) -> Vec<DataplaneOp> {
        self.lock().ops.clone()
    }

    pub fn count(&self, family: Family, kind: OpKind) -> usize {
        self.lock()
            .ops
            .iter()
            .filter(|op| op.family == family && op.kind == kind)
            .count()
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    /// Makes every later `kind` call on `family` fail.
    pub fn fail_on(&self, family: Family, kind: OpKind) {
        self.lock().failures.insert((family, kind));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Current state in snapshot form.
    pub fn snapshot(&self) -> DataplaneSnapshot {
        let state = self.lock();
        DataplaneSnapshot {
            interfaces: state.interfaces.values().cloned().collect(),
            memif_sockets: state
                .memif_sockets
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            bfd_sessions: state.bfd_sessions.clone(),
            bfd_auth_keys: state.bfd_keys.clone(),
            stn_rules: state.stn_rules.clone(),
            nat_global: state.nat_global.clone(),
            dnat: state.dnats.clone(),
        }
    }

    pub fn bfd_echo_function(&self) -> Option<BfdEchoFunction> {
        self.lock().bfd_echo.clone()
    }

    fn dump<T>(&self, family: Family, read: impl FnOnce(&SimState) -> T) -> Result<T, String> {
        let state = self.lock();
        if state.failures.contains(&(family, OpKind::Dump)) {
            return Err(format!("simulated {} dump failure", family));
        }
        Ok(read(&*state))
    }

    fn apply<T>(
        &self,
        family: Family,
        kind: OpKind,
        object: impl Into<String>,
        change: impl FnOnce(&mut SimState) -> Result<T, String>,
    ) -> Result<T, String> {
        let object = object.into();
        let mut state = self.lock();
        if state.failures.contains(&(family, kind)) {
            return Err(format!("simulated {} {} failure for {}", family, kind, object));
        }
        let out = change(&mut *state)?;
        debug!("Simulated {} {} {}", kind, family, object);
        state.ops.push(DataplaneOp {
            family,
            kind,
            object,
        });
        Ok(out)
    }
}

impl IntfsOrchCallbacks for SimDataplane {
    fn dump_interfaces(&self) -> Result<BTreeMap<u32, InterfaceDetails>, String> {
        self.dump(Family::Interface, |state| state.interfaces.clone())
    }

    fn dump_memif_socket_details(&self) -> Result<HashMap<String, u32>, String> {
        self.dump(Family::Interface, |state| state.memif_sockets.clone())
    }

    fn set_interface_tag(&self, tag: &str, sw_if_index: u32) -> Result<(), String> {
        self.apply(Family::Interface, OpKind::Tag, tag, |state| {
            let details = state
                .interfaces
                .get_mut(&sw_if_index)
                .ok_or_else(|| format!("no interface with index {}", sw_if_index))?;
            // The sentinel device keeps its empty tag
            if sw_if_index != 0 {
                details.interface.name = tag.to_string();
            }
            Ok(())
        })
    }

    fn configure_interface(&self, iface: &Interface) -> Result<u32, String> {
        self.apply(Family::Interface, OpKind::Create, &iface.name, |state| {
            let index = state.next_if_index;
            state.next_if_index += 1;
            if let Some(memif) = &iface.memif {
                let next_id = state.memif_sockets.len() as u32;
                state
                    .memif_sockets
                    .entry(memif.socket_filename.clone())
                    .or_insert(next_id);
            }
            state.interfaces.insert(
                index,
                InterfaceDetails {
                    interface: iface.clone(),
                    meta: InterfaceMeta {
                        internal_name: internal_name(iface.if_type, index),
                        sw_if_index: index,
                    },
                },
            );
            Ok(index)
        })
    }

    fn modify_interface(
        &self,
        desired: &Interface,
        _actual: &Interface,
        sw_if_index: u32,
    ) -> Result<(), String> {
        self.apply(Family::Interface, OpKind::Modify, &desired.name, |state| {
            let details = state
                .interfaces
                .get_mut(&sw_if_index)
                .ok_or_else(|| format!("no interface with index {}", sw_if_index))?;
            details.interface = desired.clone();
            Ok(())
        })
    }

    fn delete_interface(&self, actual: &Interface, sw_if_index: u32) -> Result<(), String> {
        let object = format!("{} (index {})", actual.name, sw_if_index);
        self.apply(Family::Interface, OpKind::Delete, object, |state| {
            state
                .interfaces
                .remove(&sw_if_index)
                .ok_or_else(|| format!("no interface with index {}", sw_if_index))?;
            state.stn_rules.retain(|r| r.sw_if_index != sw_if_index);
            Ok(())
        })
    }
}

impl BfdOrchCallbacks for SimDataplane {
    fn dump_bfd_sessions(&self) -> Result<Vec<BfdSession>, String> {
        self.dump(Family::BfdSession, |state| state.bfd_sessions.clone())
    }

    fn dump_bfd_auth_keys(&self) -> Result<Vec<BfdAuthKey>, String> {
        self.dump(Family::BfdAuthKey, |state| state.bfd_keys.clone())
    }

    fn configure_bfd_session(&self, session: &BfdSession) -> Result<(), String> {
        self.apply(Family::BfdSession, OpKind::Create, session.display_key(), |state| {
            state.bfd_sessions.push(session.clone());
            Ok(())
        })
    }

    fn modify_bfd_session(&self, actual: &BfdSession, desired: &BfdSession) -> Result<(), String> {
        self.apply(Family::BfdSession, OpKind::Modify, desired.display_key(), |state| {
            let existing = state
                .bfd_sessions
                .iter_mut()
                .find(|s| s.same_endpoints(actual))
                .ok_or_else(|| format!("no BFD session {}", actual.display_key()))?;
            *existing = desired.clone();
            Ok(())
        })
    }

    fn delete_bfd_session(&self, session: &BfdSession) -> Result<(), String> {
        self.apply(Family::BfdSession, OpKind::Delete, session.display_key(), |state| {
            let pos = state
                .bfd_sessions
                .iter()
                .position(|s| s.same_endpoints(session))
                .ok_or_else(|| format!("no BFD session {}", session.display_key()))?;
            state.bfd_sessions.remove(pos);
            Ok(())
        })
    }

    fn configure_bfd_auth_key(&self, key: &BfdAuthKey) -> Result<(), String> {
        self.apply(Family::BfdAuthKey, OpKind::Create, auth_key_identifier(key.id), |state| {
            state.bfd_keys.push(key.clone());
            Ok(())
        })
    }

    fn modify_bfd_auth_key(&self, actual: &BfdAuthKey, desired: &BfdAuthKey) -> Result<(), String> {
        self.apply(Family::BfdAuthKey, OpKind::Modify, auth_key_identifier(desired.id), |state| {
            let existing = state
                .bfd_keys
                .iter_mut()
                .find(|k| k.id == actual.id)
                .ok_or_else(|| format!("no BFD key {}", actual.id))?;
            *existing = desired.clone();
            Ok(())
        })
    }

    fn delete_bfd_auth_key(&self, key: &BfdAuthKey) -> Result<(), String> {
        self.apply(Family::BfdAuthKey, OpKind::Delete, auth_key_identifier(key.id), |state| {
            let pos = state
                .bfd_keys
                .iter()
                .position(|k| k.id == key.id)
                .ok_or_else(|| format!("no BFD key {}", key.id))?;
            state.bfd_keys.remove(pos);
            Ok(())
        })
    }

    fn configure_bfd_echo_function(&self, echo: &BfdEchoFunction) -> Result<(), String> {
        self.apply(Family::BfdEcho, OpKind::Create, &echo.echo_source_interface, |state| {
            state.bfd_echo = Some(echo.clone());
            Ok(())
        })
    }
}

impl StnOrchCallbacks for SimDataplane {
    fn dump_stn_rules(&self) -> Result<Vec<StnRuleDetails>, String> {
        self.dump(Family::StnRule, |state| {
            state
                .stn_rules
                .iter()
                .map(|rule| {
                    let mut rule = rule.clone();
                    // Resolve the name the way a real dump would, through the tag
                    if let Some(details) = state.interfaces.get(&rule.sw_if_index) {
                        rule.interface = details.interface.name.clone();
                    }
                    rule
                })
                .collect()
        })
    }

    fn add_stn_rule(&self, rule: &StnRule, sw_if_index: u32) -> Result<(), String> {
        let object = format!("{}@{}", rule.ip_address, rule.interface);
        self.apply(Family::StnRule, OpKind::Create, object, |state| {
            state.stn_rules.push(StnRuleDetails {
                ip_address: rule.ip_address.clone(),
                interface: rule.interface.clone(),
                sw_if_index,
            });
            Ok(())
        })
    }

    fn del_stn_rule(&self, ip_address: &str, sw_if_index: u32) -> Result<(), String> {
        let object = format!("{} (index {})", ip_address, sw_if_index);
        self.apply(Family::StnRule, OpKind::Delete, object, |state| {
            let pos = state
                .stn_rules
                .iter()
                .position(|r| r.ip_address == ip_address && r.sw_if_index == sw_if_index)
                .ok_or_else(|| format!("no STN rule {} on index {}", ip_address, sw_if_index))?;
            state.stn_rules.remove(pos);
            Ok(())
        })
    }
}

impl NatOrchCallbacks for SimDataplane {
    fn dump_nat_global(&self) -> Result<Nat44Global, String> {
        self.dump(Family::NatGlobal, |state| state.nat_global.clone())
    }

    fn set_nat_forwarding(&self, enabled: bool) -> Result<(), String> {
        let object = format!("forwarding={}", enabled);
        self.apply(Family::NatGlobal, OpKind::Modify, object, |state| {
            state.nat_global.forwarding = enabled;
            Ok(())
        })
    }

    fn enable_nat_interface(&self, iface: &NatInterface) -> Result<(), String> {
        self.apply(Family::NatGlobal, OpKind::Create, &iface.name, |state| {
            state.nat_global.nat_interfaces.push(iface.clone());
            Ok(())
        })
    }

    fn disable_nat_interface(&self, iface: &NatInterface) -> Result<(), String> {
        self.apply(Family::NatGlobal, OpKind::Delete, &iface.name, |state| {
            state.nat_global.nat_interfaces.retain(|i| i != iface);
            Ok(())
        })
    }

    fn add_address_pool(&self, pool: &AddressPool) -> Result<(), String> {
        self.apply(Family::NatGlobal, OpKind::Create, &pool.first_src_address, |state| {
            state.nat_global.address_pools.push(pool.clone());
            Ok(())
        })
    }

    fn del_address_pool(&self, pool: &AddressPool) -> Result<(), String> {
        self.apply(Family::NatGlobal, OpKind::Delete, &pool.first_src_address, |state| {
            state.nat_global.address_pools.retain(|p| p != pool);
            Ok(())
        })
    }

    fn dump_dnat(&self) -> Result<Vec<DNatConfig>, String> {
        self.dump(Family::Dnat, |state| state.dnats.clone())
    }

    fn add_static_mapping(&self, label: &str, mapping: &StaticMapping) -> Result<(), String> {
        self.apply(
            Family::DnatStaticMapping,
            OpKind::Create,
            static_mapping_id(mapping),
            |state| {
                state.dnat_mut(label).st_mappings.push(mapping.clone());
                Ok(())
            },
        )
    }

    fn del_static_mapping(&self, label: &str, mapping: &StaticMapping) -> Result<(), String> {
        self.apply(
            Family::DnatStaticMapping,
            OpKind::Delete,
            static_mapping_id(mapping),
            |state| {
                state.dnat_mut(label).st_mappings.retain(|m| m != mapping);
                state.drop_empty_dnats();
                Ok(())
            },
        )
    }

    fn add_lb_static_mapping(&self, label: &str, mapping: &StaticMapping) -> Result<(), String> {
        self.apply(
            Family::DnatLbStaticMapping,
            OpKind::Create,
            static_mapping_id(mapping),
            |state| {
                state.dnat_mut(label).st_mappings.push(mapping.clone());
                Ok(())
            },
        )
    }

    fn del_lb_static_mapping(&self, label: &str, mapping: &StaticMapping) -> Result<(), String> {
        self.apply(
            Family::DnatLbStaticMapping,
            OpKind::Delete,
            static_mapping_id(mapping),
            |state| {
                state.dnat_mut(label).st_mappings.retain(|m| m != mapping);
                state.drop_empty_dnats();
                Ok(())
            },
        )
    }

    fn add_identity_mapping(&self, label: &str, mapping: &IdentityMapping) -> Result<(), String> {
        self.apply(
            Family::DnatIdentityMapping,
            OpKind::Create,
            identity_mapping_id(mapping),
            |state| {
                state.dnat_mut(label).id_mappings.push(mapping.clone());
                Ok(())
            },
        )
    }

    fn del_identity_mapping(&self, label: &str, mapping: &IdentityMapping) -> Result<(), String> {
        self.apply(
            Family::DnatIdentityMapping,
            OpKind::Delete,
            identity_mapping_id(mapping),
            |state| {
                state.dnat_mut(label).id_mappings.retain(|m| m != mapping);
                state.drop_empty_dnats();
                Ok(())
            },
        )
    }
}
