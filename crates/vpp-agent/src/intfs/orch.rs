//! IntfsOrch implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;

use super::correlate::correlate_interface;
use super::diff::first_difference;
use super::types::{
    Interface, InterfaceDetails, InterfaceState, InterfaceType, SharedInterfaceIndexes,
    TEMP_INTERFACE_NAME,
};

/// Interface resync error type.
///
/// Any of these aborts the pass; registrations made before the failure stay.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntfsOrchError {
    #[error("failed to dump interfaces: {0}")]
    Dump(String),
    #[error("failed to dump memif socket details: {0}")]
    DumpMemifSockets(String),
    #[error("failed to tag interface {name} (index {index}): {reason}")]
    Tag {
        name: String,
        index: u32,
        reason: String,
    },
    #[error("failed to configure interface {name}: {reason}")]
    Configure { name: String, reason: String },
    #[error("failed to modify interface {name}: {reason}")]
    Modify { name: String, reason: String },
    #[error("failed to remove interface {name} (index {index}): {reason}")]
    Delete {
        name: String,
        index: u32,
        reason: String,
    },
    #[error("failed to refresh interface state: {0}")]
    Status(String),
    #[error("no callbacks set")]
    NoCallbacks,
}

/// Dataplane calls used by interface resync.
pub trait IntfsOrchCallbacks: Send + Sync {
    /// Dumps every interface, keyed by dataplane index.
    fn dump_interfaces(&self) -> Result<BTreeMap<u32, InterfaceDetails>, String>;

    /// Dumps memif sockets (socket filename -> socket id).
    fn dump_memif_socket_details(&self) -> Result<HashMap<String, u32>, String>;

    /// Writes `tag` into the dataplane against `sw_if_index`.
    fn set_interface_tag(&self, tag: &str, sw_if_index: u32) -> Result<(), String>;

    /// Creates (and tags) a new interface, returning its index.
    fn configure_interface(&self, iface: &Interface) -> Result<u32, String>;

    fn modify_interface(
        &self,
        desired: &Interface,
        actual: &Interface,
        sw_if_index: u32,
    ) -> Result<(), String>;

    fn delete_interface(&self, actual: &Interface, sw_if_index: u32) -> Result<(), String>;
}

/// Interface resync configuration.
#[derive(Debug, Clone, Default)]
pub struct IntfsOrchConfig {
    /// Skip the post-pass dump that refreshes [`InterfaceState`].
    pub skip_status_refresh: bool,
}

/// Counters accumulated over every pass.
#[derive(Debug, Clone, Default)]
pub struct IntfsOrchStats {
    pub passes: u64,
    pub registered: u64,
    pub tagged: u64,
    pub created: u64,
    pub modified: u64,
    pub deleted: u64,
}

/// Interface resync orchestrator.
pub struct IntfsOrch {
    config: IntfsOrchConfig,
    if_indexes: SharedInterfaceIndexes,
    /// Memif socket filename -> socket id, refreshed per pass.
    memif_sockets: HashMap<String, u32>,
    /// Registered AF-packet interfaces -> host interface name.
    afpacket_hosts: HashMap<String, String>,
    states: BTreeMap<String, InterfaceState>,
    callbacks: Option<Arc<dyn IntfsOrchCallbacks>>,
    stats: IntfsOrchStats,
}

impl std::fmt::Debug for IntfsOrch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntfsOrch")
            .field("config", &self.config)
            .field("registered", &self.if_indexes.read().len())
            .field("memif_sockets", &self.memif_sockets.len())
            .field("afpacket_hosts", &self.afpacket_hosts.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl IntfsOrch {
    pub fn new(config: IntfsOrchConfig) -> Self {
        Self {
            config,
            if_indexes: SharedInterfaceIndexes::new(),
            memif_sockets: HashMap::new(),
            afpacket_hosts: HashMap::new(),
            states: BTreeMap::new(),
            callbacks: None,
            stats: IntfsOrchStats::default(),
        }
    }

    pub fn set_callbacks(&mut self, callbacks: Arc<dyn IntfsOrchCallbacks>) {
        self.callbacks = Some(callbacks);
    }

    pub fn stats(&self) -> &IntfsOrchStats {
        &self.stats
    }

    /// Handle to the interface registry; other families resolve names through it.
    pub fn indexes(&self) -> SharedInterfaceIndexes {
        self.if_indexes.clone()
    }

    pub fn memif_socket_id(&self, socket_filename: &str) -> Option<u32> {
        self.memif_sockets.get(socket_filename).copied()
    }

    pub fn afpacket_host_interface(&self, name: &str) -> Option<&str> {
        self.afpacket_hosts.get(name).map(String::as_str)
    }

    /// Operational state of registered interfaces after the last pass.
    pub fn interface_states(&self) -> &BTreeMap<String, InterfaceState> {
        &self.states
    }

    pub fn interface_state(&self, name: &str) -> Option<&InterfaceState> {
        self.states.get(name)
    }

    fn callbacks(&self) -> Result<Arc<dyn IntfsOrchCallbacks>, IntfsOrchError> {
        self.callbacks.clone().ok_or(IntfsOrchError::NoCallbacks)
    }

    fn correlation_id(&self) -> String {
        format!("intfs-resync-{}", self.stats.passes)
    }

    fn audit(&self, category: AuditCategory, action: &str, name: &str) -> AuditRecord {
        AuditRecord::new(category, "IntfsOrch", action)
            .with_object_id(name)
            .with_object_type("interface")
            .with_correlation_id(self.correlation_id())
    }

    /// Checks whether the dataplane holds any configuration worth resyncing.
    ///
    /// Returns true ("skip resync") when the dump is empty or only holds the
    /// sentinel device at index 0. A dump failure returns false so the
    /// caller falls back to a full resync.
    pub fn verify_config_presence(&self) -> bool {
        let Ok(callbacks) = self.callbacks() else {
            return false;
        };
        let actual = match callbacks.dump_interfaces() {
            Ok(actual) => actual,
            Err(e) => {
                debug!("Interface dump failed during config presence check: {}", e);
                return false;
            }
        };

        if actual.is_empty() {
            info!("Dataplane holds no interfaces, resync can be skipped");
            return true;
        }
        if actual.len() == 1 && actual.contains_key(&0) {
            info!("Dataplane only holds the sentinel interface, resync can be skipped");
            return true;
        }

        info!("Dataplane configuration found ({} interfaces)", actual.len());
        false
    }

    /// Reconciles dataplane interfaces with `desired`.
    ///
    /// Aborts on the first failed dataplane call.
    pub fn resync(&mut self, desired: &[Interface]) -> Result<(), IntfsOrchError> {
        let callbacks = self.callbacks()?;
        self.stats.passes += 1;

        self.if_indexes.write().clear();
        self.afpacket_hosts.clear();
        self.states.clear();

        self.memif_sockets = callbacks
            .dump_memif_socket_details()
            .map_err(IntfsOrchError::DumpMemifSockets)?;

        let actual = callbacks.dump_interfaces().map_err(|e| {
            audit_log!(self
                .audit(AuditCategory::ErrorCondition, "dump_interfaces", "*")
                .with_error(&e));
            IntfsOrchError::Dump(e)
        })?;

        let mut untagged: Vec<(u32, &Interface)> = Vec::new();

        for (&index, details) in &actual {
            let iface = &details.interface;

            if index == 0 {
                self.register_interface(
                    callbacks.as_ref(),
                    &details.meta.internal_name,
                    index,
                    iface,
                )?;
                continue;
            }

            if !iface.is_tagged() {
                debug!("Interface {} has no tag", index);
                untagged.push((index, iface));
                continue;
            }

            match desired.iter().find(|d| d.name == iface.name) {
                Some(want) => {
                    self.register_interface(callbacks.as_ref(), &want.name, index, want)?;
                    self.modify_if_needed(callbacks.as_ref(), want, iface, index)?;
                }
                None => {
                    self.register_interface(callbacks.as_ref(), &iface.name, index, iface)?;
                    self.delete_interface(callbacks.as_ref(), &iface.name, iface, index)?;
                }
            }
        }

        for (index, iface) in untagged {
            match self.find_correlated(desired, iface) {
                Some(want) => {
                    debug!("Untagged interface {} correlated with {}", index, want.name);
                    self.register_interface(callbacks.as_ref(), &want.name, index, want)?;
                    self.modify_if_needed(callbacks.as_ref(), want, iface, index)?;
                }
                None => {
                    self.register_interface(callbacks.as_ref(), TEMP_INTERFACE_NAME, index, iface)?;
                    self.delete_interface(callbacks.as_ref(), TEMP_INTERFACE_NAME, iface, index)?;
                }
            }
        }

        for want in desired {
            if self.if_indexes.contains_name(&want.name) {
                continue;
            }
            self.configure_interface(callbacks.as_ref(), want)?;
        }

        if !self.config.skip_status_refresh {
            self.refresh_states(callbacks.as_ref())?;
        }

        info!(
            "Interface resync done ({} registered)",
            self.if_indexes.read().len()
        );
        Ok(())
    }

    /// First desired interface, in declaration order, that is not registered
    /// yet and correlates with the untagged `actual`.
    fn find_correlated<'a>(&self, desired: &'a [Interface], actual: &Interface) -> Option<&'a Interface> {
        let registry = self.if_indexes.read();
        desired
            .iter()
            .find(|want| !registry.contains_name(&want.name) && correlate_interface(actual, want))
    }

    /// Registers `name` and writes it into the dataplane as the interface tag.
    fn register_interface(
        &mut self,
        callbacks: &dyn IntfsOrchCallbacks,
        name: &str,
        index: u32,
        meta: &Interface,
    ) -> Result<(), IntfsOrchError> {
        self.if_indexes.write().register_name(name, index, meta.clone());
        self.stats.registered += 1;

        let record = self
            .audit(AuditCategory::ResourceTag, "set_interface_tag", name)
            .with_details(serde_json::json!({ "index": index }));
        if let Err(reason) = callbacks.set_interface_tag(name, index) {
            audit_log!(record.with_error(&reason));
            return Err(IntfsOrchError::Tag {
                name: name.to_string(),
                index,
                reason,
            });
        }
        self.stats.tagged += 1;
        audit_log!(record.with_outcome(AuditOutcome::Success));

        self.cache_afpacket(name, meta);
        debug!("Registered interface {} (index {})", name, index);
        Ok(())
    }

    fn cache_afpacket(&mut self, name: &str, meta: &Interface) {
        if meta.if_type != InterfaceType::AfPacketInterface {
            return;
        }
        if let Some(afpacket) = &meta.afpacket {
            self.afpacket_hosts
                .insert(name.to_string(), afpacket.host_if_name.clone());
        }
    }

    fn modify_if_needed(
        &mut self,
        callbacks: &dyn IntfsOrchCallbacks,
        desired: &Interface,
        actual: &Interface,
        index: u32,
    ) -> Result<(), IntfsOrchError> {
        let Some(changed) = first_difference(desired, actual) else {
            debug!("Interface {} registered without changes", desired.name);
            return Ok(());
        };

        debug!("Interface {} differs in {}, modifying", desired.name, changed);
        let record = self
            .audit(AuditCategory::ResourceModify, "modify_interface", &desired.name)
            .with_details(serde_json::json!({
                "index": index,
                "first_difference": changed,
            }));

        match callbacks.modify_interface(desired, actual, index) {
            Ok(()) => {
                self.stats.modified += 1;
                audit_log!(record.with_outcome(AuditOutcome::Success));
                Ok(())
            }
            Err(reason) => {
                audit_log!(record.with_error(&reason));
                Err(IntfsOrchError::Modify {
                    name: desired.name.clone(),
                    reason,
                })
            }
        }
    }

    /// Removes an interface registered under `name`, then drops the registration.
    fn delete_interface(
        &mut self,
        callbacks: &dyn IntfsOrchCallbacks,
        name: &str,
        actual: &Interface,
        index: u32,
    ) -> Result<(), IntfsOrchError> {
        debug!("Removing obsolete interface {} (index {})", name, index);
        let record = self
            .audit(AuditCategory::ResourceDelete, "delete_interface", name)
            .with_details(serde_json::json!({
                "index": index,
                "type": actual.if_type.as_str(),
            }));

        if let Err(reason) = callbacks.delete_interface(actual, index) {
            audit_log!(record.with_error(&reason));
            return Err(IntfsOrchError::Delete {
                name: name.to_string(),
                index,
                reason,
            });
        }

        // The registry may hold a newer registration under the same name
        let mut registry = self.if_indexes.write();
        if registry.lookup_idx(name).map(|(idx, _)| idx) == Some(index) {
            if let Err(e) = registry.unregister_name(name) {
                warn!("Failed to unregister interface {}: {}", name, e);
            }
        }
        drop(registry);
        self.afpacket_hosts.remove(name);

        self.stats.deleted += 1;
        audit_log!(record.with_outcome(AuditOutcome::Success));
        Ok(())
    }

    fn configure_interface(
        &mut self,
        callbacks: &dyn IntfsOrchCallbacks,
        desired: &Interface,
    ) -> Result<(), IntfsOrchError> {
        debug!("Configuring new interface {}", desired.name);
        let socket_id = desired
            .memif
            .as_ref()
            .and_then(|memif| self.memif_socket_id(&memif.socket_filename));
        let record = self
            .audit(AuditCategory::ResourceCreate, "configure_interface", &desired.name)
            .with_details(serde_json::json!({
                "type": desired.if_type.as_str(),
                "memif_socket_id": socket_id,
            }));

        match callbacks.configure_interface(desired) {
            Ok(index) => {
                self.if_indexes
                    .write()
                    .register_name(&desired.name, index, desired.clone());
                self.cache_afpacket(&desired.name, desired);
                self.stats.registered += 1;
                self.stats.created += 1;
                audit_log!(record
                    .with_outcome(AuditOutcome::Success)
                    .with_object_id(format!("{} (index {})", desired.name, index)));
                Ok(())
            }
            Err(reason) => {
                audit_log!(record.with_error(&reason));
                Err(IntfsOrchError::Configure {
                    name: desired.name.clone(),
                    reason,
                })
            }
        }
    }

    fn refresh_states(&mut self, callbacks: &dyn IntfsOrchCallbacks) -> Result<(), IntfsOrchError> {
        let actual = callbacks
            .dump_interfaces()
            .map_err(IntfsOrchError::Status)?;

        let registry = self.if_indexes.read();
        let states: BTreeMap<String, InterfaceState> = registry
            .iter()
            .filter_map(|(name, index, _)| {
                actual.get(&index).map(|details| {
                    let state = InterfaceState {
                        name: name.to_string(),
                        index,
                        internal_name: details.meta.internal_name.clone(),
                        enabled: details.interface.enabled,
                        mtu: details.interface.mtu,
                        phys_address: details.interface.phys_address,
                    };
                    (name.to_string(), state)
                })
            })
            .collect();
        drop(registry);

        self.states = states;
        Ok(())
    }
}
