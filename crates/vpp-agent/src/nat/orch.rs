//! NatOrch implementation.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info};
use vpp_resync_common::{IndexSeq, NameToIndex, PassErrors};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;

use super::mappings::{identity_mapping_id, resolve_mappings, static_mapping_id};
use super::types::{
    AddressPool, DNatConfig, IdentityMapping, Nat44Global, NatInterface, SNatConfig, StaticMapping,
};

/// NAT44 resync error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NatOrchError {
    #[error("failed to dump NAT44 global config: {0}")]
    DumpGlobal(String),
    #[error("failed to dump DNAT config: {0}")]
    DumpDnat(String),
    #[error("failed to set NAT44 forwarding: {0}")]
    Forwarding(String),
    #[error("failed to update NAT44 interface {name}: {reason}")]
    Interface { name: String, reason: String },
    #[error("failed to update NAT44 address pool {address}: {reason}")]
    AddressPool { address: String, reason: String },
    #[error("DNAT {label}: failed to create mapping {mapping}: {reason}")]
    MappingCreate {
        label: String,
        mapping: String,
        reason: String,
    },
    #[error("DNAT {label}: failed to remove mapping {mapping}: {reason}")]
    MappingDelete {
        label: String,
        mapping: String,
        reason: String,
    },
    #[error("DNAT {label}: mapping {mapping} has no local endpoint")]
    NoLocalEndpoints { label: String, mapping: String },
    #[error("no callbacks set")]
    NoCallbacks,
}

/// Dataplane calls used by NAT44 resync.
pub trait NatOrchCallbacks: Send + Sync {
    fn dump_nat_global(&self) -> Result<Nat44Global, String>;

    fn set_nat_forwarding(&self, enabled: bool) -> Result<(), String>;

    fn enable_nat_interface(&self, iface: &NatInterface) -> Result<(), String>;

    fn disable_nat_interface(&self, iface: &NatInterface) -> Result<(), String>;

    fn add_address_pool(&self, pool: &AddressPool) -> Result<(), String>;

    fn del_address_pool(&self, pool: &AddressPool) -> Result<(), String>;

    /// All DNAT labels known to the dataplane with their mappings.
    fn dump_dnat(&self) -> Result<Vec<DNatConfig>, String>;

    fn add_static_mapping(&self, label: &str, mapping: &StaticMapping) -> Result<(), String>;

    fn del_static_mapping(&self, label: &str, mapping: &StaticMapping) -> Result<(), String>;

    fn add_lb_static_mapping(&self, label: &str, mapping: &StaticMapping) -> Result<(), String>;

    fn del_lb_static_mapping(&self, label: &str, mapping: &StaticMapping) -> Result<(), String>;

    fn add_identity_mapping(&self, label: &str, mapping: &IdentityMapping) -> Result<(), String>;

    fn del_identity_mapping(&self, label: &str, mapping: &IdentityMapping) -> Result<(), String>;
}

#[derive(Debug, Clone, Default)]
pub struct NatOrchConfig {}

#[derive(Debug, Clone, Default)]
pub struct NatOrchStats {
    pub global_changes: u64,
    pub mappings_created: u64,
    pub mappings_removed: u64,
    pub dnat_removed: u64,
    pub failures: u64,
}

/// NAT44 resync orchestrator.
pub struct NatOrch {
    config: NatOrchConfig,
    global: Option<Nat44Global>,
    st_mappings: NameToIndex<StaticMapping>,
    id_mappings: NameToIndex<IdentityMapping>,
    dnats: NameToIndex<DNatConfig>,
    seq: IndexSeq,
    callbacks: Option<Arc<dyn NatOrchCallbacks>>,
    stats: NatOrchStats,
}

impl std::fmt::Debug for NatOrch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatOrch")
            .field("config", &self.config)
            .field("st_mappings_count", &self.st_mappings.len())
            .field("id_mappings_count", &self.id_mappings.len())
            .field("dnat_count", &self.dnats.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl NatOrch {
    pub fn new(config: NatOrchConfig) -> Self {
        Self {
            config,
            global: None,
            st_mappings: NameToIndex::new(),
            id_mappings: NameToIndex::new(),
            dnats: NameToIndex::new(),
            seq: IndexSeq::default(),
            callbacks: None,
            stats: NatOrchStats::default(),
        }
    }

    pub fn set_callbacks(&mut self, callbacks: Arc<dyn NatOrchCallbacks>) {
        self.callbacks = Some(callbacks);
    }

    pub fn stats(&self) -> &NatOrchStats {
        &self.stats
    }

    /// Global config applied by the last successful global resync.
    pub fn global(&self) -> Option<&Nat44Global> {
        self.global.as_ref()
    }

    pub fn static_mappings(&self) -> &NameToIndex<StaticMapping> {
        &self.st_mappings
    }

    pub fn identity_mappings(&self) -> &NameToIndex<IdentityMapping> {
        &self.id_mappings
    }

    pub fn dnat_labels(&self) -> &NameToIndex<DNatConfig> {
        &self.dnats
    }

    fn callbacks(&self) -> Result<Arc<dyn NatOrchCallbacks>, NatOrchError> {
        self.callbacks.clone().ok_or(NatOrchError::NoCallbacks)
    }

    /// Brings the global config in line with `desired`.
    ///
    /// Removals (interfaces, pools) are applied before the forwarding flag
    /// and additions. An unchanged config issues no dataplane call.
    pub fn resync_nat_global(&mut self, desired: &Nat44Global) -> Result<(), NatOrchError> {
        let callbacks = self.callbacks()?;
        let actual = callbacks
            .dump_nat_global()
            .map_err(NatOrchError::DumpGlobal)?;

        if actual == *desired {
            debug!("NAT44 global config already in place");
            self.global = Some(desired.clone());
            return Ok(());
        }

        let mut errors = PassErrors::new();

        for iface in actual
            .nat_interfaces
            .iter()
            .filter(|i| !desired.nat_interfaces.contains(i))
        {
            let result = callbacks.disable_nat_interface(iface);
            self.record_global_change(
                AuditCategory::ResourceDelete,
                "disable_nat_interface",
                &iface.name,
                result,
                |reason| NatOrchError::Interface {
                    name: iface.name.clone(),
                    reason,
                },
                &mut errors,
            );
        }

        for pool in actual
            .address_pools
            .iter()
            .filter(|p| !desired.address_pools.contains(p))
        {
            let result = callbacks.del_address_pool(pool);
            self.record_global_change(
                AuditCategory::ResourceDelete,
                "del_address_pool",
                &pool.first_src_address,
                result,
                |reason| NatOrchError::AddressPool {
                    address: pool.first_src_address.clone(),
                    reason,
                },
                &mut errors,
            );
        }

        if actual.forwarding != desired.forwarding {
            let result = callbacks.set_nat_forwarding(desired.forwarding);
            self.record_global_change(
                AuditCategory::ResourceModify,
                "set_nat_forwarding",
                if desired.forwarding { "enabled" } else { "disabled" },
                result,
                NatOrchError::Forwarding,
                &mut errors,
            );
        }

        for iface in desired
            .nat_interfaces
            .iter()
            .filter(|i| !actual.nat_interfaces.contains(i))
        {
            let result = callbacks.enable_nat_interface(iface);
            self.record_global_change(
                AuditCategory::ResourceCreate,
                "enable_nat_interface",
                &iface.name,
                result,
                |reason| NatOrchError::Interface {
                    name: iface.name.clone(),
                    reason,
                },
                &mut errors,
            );
        }

        for pool in desired
            .address_pools
            .iter()
            .filter(|p| !actual.address_pools.contains(p))
        {
            let result = callbacks.add_address_pool(pool);
            self.record_global_change(
                AuditCategory::ResourceCreate,
                "add_address_pool",
                &pool.first_src_address,
                result,
                |reason| NatOrchError::AddressPool {
                    address: pool.first_src_address.clone(),
                    reason,
                },
                &mut errors,
            );
        }

        self.stats.failures += errors.count() as u64;
        if errors.is_empty() {
            self.global = Some(desired.clone());
        }
        info!("NAT44 global resync done ({} failures)", errors.count());
        errors.into_result()
    }

    fn record_global_change(
        &mut self,
        category: AuditCategory,
        action: &str,
        object_id: &str,
        result: Result<(), String>,
        wrap: impl FnOnce(String) -> NatOrchError,
        errors: &mut PassErrors<NatOrchError>,
    ) {
        let record = AuditRecord::new(category, "NatOrch", action)
            .with_object_id(object_id)
            .with_object_type("nat44_global");
        match result {
            Ok(()) => {
                self.stats.global_changes += 1;
                audit_log!(record.with_outcome(AuditOutcome::Success));
            }
            Err(reason) => {
                error!("NAT44 {} {} failed: {}", action, object_id, reason);
                audit_log!(record.with_error(&reason));
                errors.record(wrap(reason));
            }
        }
    }

    /// Source NAT has nothing to reconcile yet.
    pub fn resync_snat(&mut self, desired: &[SNatConfig]) -> Result<(), NatOrchError> {
        debug!("SNAT resync skipped ({} configs)", desired.len());
        Ok(())
    }

    /// Reconciles DNAT labels present in the dataplane.
    ///
    /// Labels only in `desired` are left for [`NatOrch::configure_dnat`].
    /// Labels only in the dataplane are removed mapping by mapping.
    pub fn resync_dnat(&mut self, desired: &[DNatConfig]) -> Result<(), NatOrchError> {
        let callbacks = self.callbacks()?;

        self.st_mappings.clear();
        self.id_mappings.clear();
        self.dnats.clear();
        self.seq = IndexSeq::default();

        let actual = callbacks.dump_dnat().map_err(NatOrchError::DumpDnat)?;
        if actual.is_empty() {
            debug!("No DNAT config in the dataplane");
            return Ok(());
        }

        let mut errors = PassErrors::new();

        for want in desired {
            let Some(have) = actual.iter().find(|have| have.label == want.label) else {
                continue;
            };

            let mut leftover_st = have.st_mappings.clone();
            let mut leftover_id = have.id_mappings.clone();
            let resolved = resolve_mappings(want, &mut leftover_st, &mut leftover_id);

            for id in resolved.static_ids {
                if let Some(mapping) = want
                    .st_mappings
                    .iter()
                    .find(|m| static_mapping_id(m) == id)
                {
                    self.st_mappings
                        .register_name(id, self.seq.next_index(), mapping.clone());
                }
            }
            for id in resolved.identity_ids {
                if let Some(mapping) = want
                    .id_mappings
                    .iter()
                    .find(|m| identity_mapping_id(m) == id)
                {
                    self.id_mappings
                        .register_name(id, self.seq.next_index(), mapping.clone());
                }
            }

            self.create_missing_mappings(callbacks.as_ref(), want, &mut errors);

            for mapping in &leftover_st {
                if let Err(e) = self.delete_static_mapping(callbacks.as_ref(), &want.label, mapping) {
                    errors.record(e);
                }
            }
            for mapping in &leftover_id {
                if let Err(e) = self.delete_identity_mapping(callbacks.as_ref(), &want.label, mapping)
                {
                    errors.record(e);
                }
            }

            self.dnats
                .register_name(&want.label, self.seq.next_index(), want.clone());
            debug!("DNAT {} synced", want.label);
        }

        for have in &actual {
            if self.dnats.contains_name(&have.label) {
                continue;
            }
            debug!("DNAT {} is obsolete, removing", have.label);
            self.remove_dnat(callbacks.as_ref(), have, &mut errors);
        }

        self.stats.failures += errors.count() as u64;
        info!(
            "DNAT resync done ({} labels, {} mappings, {} failures)",
            self.dnats.len(),
            self.st_mappings.len() + self.id_mappings.len(),
            errors.count()
        );
        errors.into_result()
    }

    /// Creates every mapping of `dnat` that is not registered and registers
    /// the label.
    pub fn configure_dnat(&mut self, dnat: &DNatConfig) -> Result<(), NatOrchError> {
        let callbacks = self.callbacks()?;
        let mut errors = PassErrors::new();

        self.create_missing_mappings(callbacks.as_ref(), dnat, &mut errors);
        self.dnats
            .register_name(&dnat.label, self.seq.next_index(), dnat.clone());

        self.stats.failures += errors.count() as u64;
        errors.into_result()
    }

    fn create_missing_mappings(
        &mut self,
        callbacks: &dyn NatOrchCallbacks,
        dnat: &DNatConfig,
        errors: &mut PassErrors<NatOrchError>,
    ) {
        for mapping in &dnat.st_mappings {
            let id = static_mapping_id(mapping);
            if self.st_mappings.contains_name(&id) {
                continue;
            }
            match self.add_static_mapping(callbacks, &dnat.label, mapping, &id) {
                Ok(()) => {
                    self.st_mappings
                        .register_name(id, self.seq.next_index(), mapping.clone());
                }
                Err(e) => errors.record(e),
            }
        }

        for mapping in &dnat.id_mappings {
            let id = identity_mapping_id(mapping);
            if self.id_mappings.contains_name(&id) {
                continue;
            }
            let record = Self::audit(AuditCategory::ResourceCreate, "add_identity_mapping", &dnat.label, &id);
            match callbacks.add_identity_mapping(&dnat.label, mapping) {
                Ok(()) => {
                    self.stats.mappings_created += 1;
                    audit_log!(record.with_outcome(AuditOutcome::Success));
                    self.id_mappings
                        .register_name(id, self.seq.next_index(), mapping.clone());
                }
                Err(reason) => {
                    error!("DNAT {}: failed to create identity mapping {}: {}", dnat.label, id, reason);
                    audit_log!(record.with_error(&reason));
                    errors.record(NatOrchError::MappingCreate {
                        label: dnat.label.clone(),
                        mapping: id,
                        reason,
                    });
                }
            }
        }
    }

    fn add_static_mapping(
        &mut self,
        callbacks: &dyn NatOrchCallbacks,
        label: &str,
        mapping: &StaticMapping,
        id: &str,
    ) -> Result<(), NatOrchError> {
        let (action, result) = match mapping.local_ips.len() {
            0 => {
                error!("DNAT {}: mapping {} has no local endpoint", label, id);
                return Err(NatOrchError::NoLocalEndpoints {
                    label: label.to_string(),
                    mapping: id.to_string(),
                });
            }
            1 => ("add_static_mapping", callbacks.add_static_mapping(label, mapping)),
            _ => ("add_lb_static_mapping", callbacks.add_lb_static_mapping(label, mapping)),
        };

        let record = Self::audit(AuditCategory::ResourceCreate, action, label, id);
        match result {
            Ok(()) => {
                self.stats.mappings_created += 1;
                audit_log!(record.with_outcome(AuditOutcome::Success));
                Ok(())
            }
            Err(reason) => {
                error!("DNAT {}: failed to create mapping {}: {}", label, id, reason);
                audit_log!(record.with_error(&reason));
                Err(NatOrchError::MappingCreate {
                    label: label.to_string(),
                    mapping: id.to_string(),
                    reason,
                })
            }
        }
    }

    fn delete_static_mapping(
        &mut self,
        callbacks: &dyn NatOrchCallbacks,
        label: &str,
        mapping: &StaticMapping,
    ) -> Result<(), NatOrchError> {
        let id = static_mapping_id(mapping);
        let (action, result) = if mapping.is_load_balanced() {
            ("del_lb_static_mapping", callbacks.del_lb_static_mapping(label, mapping))
        } else {
            ("del_static_mapping", callbacks.del_static_mapping(label, mapping))
        };
        self.finish_delete(action, label, id, result)
    }

    fn delete_identity_mapping(
        &mut self,
        callbacks: &dyn NatOrchCallbacks,
        label: &str,
        mapping: &IdentityMapping,
    ) -> Result<(), NatOrchError> {
        let id = identity_mapping_id(mapping);
        let result = callbacks.del_identity_mapping(label, mapping);
        self.finish_delete("del_identity_mapping", label, id, result)
    }

    fn finish_delete(
        &mut self,
        action: &str,
        label: &str,
        id: String,
        result: Result<(), String>,
    ) -> Result<(), NatOrchError> {
        let record = Self::audit(AuditCategory::ResourceDelete, action, label, &id);
        match result {
            Ok(()) => {
                self.stats.mappings_removed += 1;
                audit_log!(record.with_outcome(AuditOutcome::Success));
                Ok(())
            }
            Err(reason) => {
                error!("DNAT {}: failed to remove mapping {}: {}", label, id, reason);
                audit_log!(record.with_error(&reason));
                Err(NatOrchError::MappingDelete {
                    label: label.to_string(),
                    mapping: id,
                    reason,
                })
            }
        }
    }

    fn remove_dnat(
        &mut self,
        callbacks: &dyn NatOrchCallbacks,
        dnat: &DNatConfig,
        errors: &mut PassErrors<NatOrchError>,
    ) {
        let failures_before = errors.count();
        for mapping in &dnat.st_mappings {
            if let Err(e) = self.delete_static_mapping(callbacks, &dnat.label, mapping) {
                errors.record(e);
            }
        }
        for mapping in &dnat.id_mappings {
            if let Err(e) = self.delete_identity_mapping(callbacks, &dnat.label, mapping) {
                errors.record(e);
            }
        }
        if errors.count() == failures_before {
            self.stats.dnat_removed += 1;
        }
    }

    fn audit(category: AuditCategory, action: &str, label: &str, id: &str) -> AuditRecord {
        AuditRecord::new(category, "NatOrch", action)
            .with_object_id(id)
            .with_object_type("dnat_mapping")
            .with_details(serde_json::json!({ "label": label }))
    }
}
