//! StnOrch implementation.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use vpp_resync_common::{IndexSeq, NameToIndex, PassErrors};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::intfs::SharedInterfaceIndexes;

use super::types::{stn_identifier, StnRule, StnRuleDetails};

/// STN resync error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StnOrchError {
    #[error("failed to dump STN rules: {0}")]
    Dump(String),
    #[error("failed to add STN rule {rule}: {reason}")]
    Create { rule: String, reason: String },
    #[error("failed to delete STN rule {ip_address} (interface index {sw_if_index}): {reason}")]
    Delete {
        ip_address: String,
        sw_if_index: u32,
        reason: String,
    },
    #[error("no callbacks set")]
    NoCallbacks,
}

/// Dataplane calls used by STN resync.
pub trait StnOrchCallbacks: Send + Sync {
    fn dump_stn_rules(&self) -> Result<Vec<StnRuleDetails>, String>;

    fn add_stn_rule(&self, rule: &StnRule, sw_if_index: u32) -> Result<(), String>;

    fn del_stn_rule(&self, ip_address: &str, sw_if_index: u32) -> Result<(), String>;
}

#[derive(Debug, Clone, Default)]
pub struct StnOrchConfig {}

#[derive(Debug, Clone, Default)]
pub struct StnOrchStats {
    pub rules_added: u64,
    pub rules_removed: u64,
    pub rules_pending: u64,
    pub failures: u64,
}

/// STN resync orchestrator.
///
/// Needs the interface registry populated by a finished interface pass.
pub struct StnOrch {
    config: StnOrchConfig,
    if_indexes: SharedInterfaceIndexes,
    rules: NameToIndex<StnRule>,
    /// Desired rules waiting for their interface, keyed by rule name.
    pending: BTreeMap<String, StnRule>,
    seq: IndexSeq,
    callbacks: Option<Arc<dyn StnOrchCallbacks>>,
    stats: StnOrchStats,
}

impl std::fmt::Debug for StnOrch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StnOrch")
            .field("config", &self.config)
            .field("rules_count", &self.rules.len())
            .field("pending_count", &self.pending.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl StnOrch {
    pub fn new(config: StnOrchConfig, if_indexes: SharedInterfaceIndexes) -> Self {
        Self {
            config,
            if_indexes,
            rules: NameToIndex::new(),
            pending: BTreeMap::new(),
            seq: IndexSeq::default(),
            callbacks: None,
            stats: StnOrchStats::default(),
        }
    }

    pub fn set_callbacks(&mut self, callbacks: Arc<dyn StnOrchCallbacks>) {
        self.callbacks = Some(callbacks);
    }

    pub fn stats(&self) -> &StnOrchStats {
        &self.stats
    }

    pub fn rules(&self) -> &NameToIndex<StnRule> {
        &self.rules
    }

    /// Rules whose interface was not registered when they were due.
    pub fn pending_rules(&self) -> impl Iterator<Item = &StnRule> {
        self.pending.values()
    }

    fn callbacks(&self) -> Result<Arc<dyn StnOrchCallbacks>, StnOrchError> {
        self.callbacks.clone().ok_or(StnOrchError::NoCallbacks)
    }

    /// Reconciles STN rules with `desired`.
    ///
    /// A dumped rule on an unregistered interface is always removed; one on
    /// a registered interface is kept (and registered) when a desired rule
    /// has the same address and interface, otherwise removed. Desired rules
    /// left unregistered are added, or parked as pending when their
    /// interface is unknown.
    pub fn resync(&mut self, desired: &[StnRule]) -> Result<(), StnOrchError> {
        let callbacks = self.callbacks()?;

        self.rules.clear();
        self.pending.clear();
        self.seq = IndexSeq::default();

        let actual = callbacks.dump_stn_rules().map_err(StnOrchError::Dump)?;
        let mut errors = PassErrors::new();

        for have in &actual {
            if !self.if_indexes.contains_name(&have.interface) {
                debug!(
                    "STN rule {} is bound to unknown interface {}, removing",
                    have.ip_address, have.interface
                );
                if let Err(e) = self.delete_rule(callbacks.as_ref(), have) {
                    errors.record(e);
                }
                continue;
            }

            match find_matching_rule(desired, have) {
                Some(want) => {
                    self.rules.register_name(
                        stn_identifier(&want.interface),
                        self.seq.next_index(),
                        want.clone(),
                    );
                    debug!("STN rule {} already configured", want.rule_name);
                }
                None => {
                    debug!(
                        "STN rule {} on {} is obsolete, removing",
                        have.ip_address, have.interface
                    );
                    if let Err(e) = self.delete_rule(callbacks.as_ref(), have) {
                        errors.record(e);
                    }
                }
            }
        }

        for want in desired {
            if self.rules.contains_name(&stn_identifier(&want.interface)) {
                continue;
            }
            if let Err(e) = self.add_rule(callbacks.as_ref(), want) {
                errors.record(e);
            }
        }

        self.stats.failures += errors.count() as u64;
        info!(
            "STN resync done ({} registered, {} pending, {} failures)",
            self.rules.len(),
            self.pending.len(),
            errors.count()
        );
        errors.into_result()
    }

    fn delete_rule(
        &mut self,
        callbacks: &dyn StnOrchCallbacks,
        have: &StnRuleDetails,
    ) -> Result<(), StnOrchError> {
        let record = AuditRecord::new(AuditCategory::ResourceDelete, "StnOrch", "del_stn_rule")
            .with_object_id(format!("{}@{}", have.ip_address, have.interface))
            .with_object_type("stn_rule")
            .with_details(serde_json::json!({ "sw_if_index": have.sw_if_index }));

        match callbacks.del_stn_rule(&have.ip_address, have.sw_if_index) {
            Ok(()) => {
                self.stats.rules_removed += 1;
                audit_log!(record.with_outcome(AuditOutcome::Success));
                Ok(())
            }
            Err(reason) => {
                error!("Failed to delete STN rule {}: {}", have.ip_address, reason);
                audit_log!(record.with_error(&reason));
                Err(StnOrchError::Delete {
                    ip_address: have.ip_address.clone(),
                    sw_if_index: have.sw_if_index,
                    reason,
                })
            }
        }
    }

    fn add_rule(&mut self, callbacks: &dyn StnOrchCallbacks, want: &StnRule) -> Result<(), StnOrchError> {
        let record = AuditRecord::new(AuditCategory::ResourceCreate, "StnOrch", "add_stn_rule")
            .with_object_id(&want.rule_name)
            .with_object_type("stn_rule");

        let Some(sw_if_index) = self.if_indexes.lookup_idx(&want.interface) else {
            debug!(
                "STN rule {} waits for interface {}",
                want.rule_name, want.interface
            );
            self.pending.insert(want.rule_name.clone(), want.clone());
            self.stats.rules_pending += 1;
            audit_log!(record.with_outcome(AuditOutcome::Skipped));
            return Ok(());
        };

        match callbacks.add_stn_rule(want, sw_if_index) {
            Ok(()) => {
                self.rules.register_name(
                    stn_identifier(&want.interface),
                    self.seq.next_index(),
                    want.clone(),
                );
                self.stats.rules_added += 1;
                audit_log!(record.with_outcome(AuditOutcome::Success));
                Ok(())
            }
            Err(reason) => {
                error!("Failed to add STN rule {}: {}", want.rule_name, reason);
                audit_log!(record.with_error(&reason));
                Err(StnOrchError::Create {
                    rule: want.rule_name.clone(),
                    reason,
                })
            }
        }
    }
}

/// First desired rule with the same interface and address as `have`.
fn find_matching_rule<'a>(desired: &'a [StnRule], have: &StnRuleDetails) -> Option<&'a StnRule> {
    let have_ip = match have.ip_address.parse::<IpAddr>() {
        Ok(ip) => ip,
        Err(e) => {
            warn!("Failed to parse dumped STN address {}: {}", have.ip_address, e);
            return None;
        }
    };

    desired.iter().find(|want| {
        if want.interface != have.interface {
            return false;
        }
        match want.ip_address.parse::<IpAddr>() {
            Ok(ip) => ip == have_ip,
            Err(e) => {
                warn!("Failed to parse STN rule {} address: {}", want.rule_name, e);
                false
            }
        }
    })
}
