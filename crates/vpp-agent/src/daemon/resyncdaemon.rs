//! ResyncDaemon implementation.
//!
//! The ResyncDaemon drives one startup resync across every family:
//! - Optional cold-start pre-check
//! - Interfaces, then STN (which resolves interfaces through their registry)
//! - BFD and NAT concurrently with the above
//! - DNAT labels missing from the dataplane are configured afterwards

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinError;
use tracing::{error, info};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::bfd::{BfdOrch, BfdOrchCallbacks, BfdOrchConfig};
use crate::config::{DesiredState, ResyncStrategy};
use crate::intfs::{IntfsOrch, IntfsOrchCallbacks, IntfsOrchConfig};
use crate::nat::{NatOrch, NatOrchCallbacks, NatOrchConfig, NatOrchError};
use crate::stn::{StnOrch, StnOrchCallbacks, StnOrchConfig};

/// A dataplane able to serve every family.
pub trait Dataplane:
    IntfsOrchCallbacks + BfdOrchCallbacks + StnOrchCallbacks + NatOrchCallbacks + 'static
{
}

impl<T> Dataplane for T where
    T: IntfsOrchCallbacks + BfdOrchCallbacks + StnOrchCallbacks + NatOrchCallbacks + 'static
{
}

/// Configuration for the ResyncDaemon.
#[derive(Debug, Clone, Default)]
pub struct ResyncDaemonConfig {
    pub strategy: ResyncStrategy,
    pub intfs: IntfsOrchConfig,
}

/// Outcome of one resync step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FamilyOutcome {
    pub family: &'static str,
    pub error: Option<String>,
}

impl FamilyOutcome {
    fn from_result<E: std::fmt::Display>(family: &'static str, result: Result<(), E>) -> Self {
        if let Err(e) = &result {
            error!("{} resync failed: {}", family, e);
        }
        Self {
            family,
            error: result.err().map(|e| e.to_string()),
        }
    }
}

/// Result of a [`ResyncDaemon::run`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResyncReport {
    /// Set when the cold-start pre-check found nothing to reconcile.
    pub skipped: bool,
    pub outcomes: Vec<FamilyOutcome>,
    /// Names of STN rules waiting for their interface.
    pub pending_stn_rules: Vec<String>,
}

impl ResyncReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.error.is_none())
    }

    pub fn failures(&self) -> impl Iterator<Item = &FamilyOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }

    pub fn outcome(&self, family: &str) -> Option<&FamilyOutcome> {
        self.outcomes.iter().find(|o| o.family == family)
    }
}

/// Coordinates the resync of every family against one dataplane.
pub struct ResyncDaemon<D: Dataplane> {
    config: ResyncDaemonConfig,
    dataplane: Arc<D>,
}

impl<D: Dataplane> std::fmt::Debug for ResyncDaemon<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResyncDaemon")
            .field("config", &self.config)
            .finish()
    }
}

fn joined<T>(family: &'static str, result: Result<T, JoinError>) -> Result<T, FamilyOutcome> {
    result.map_err(|e| {
        error!("{} resync task failed: {}", family, e);
        FamilyOutcome {
            family,
            error: Some(format!("resync task failed: {}", e)),
        }
    })
}

impl<D: Dataplane> ResyncDaemon<D> {
    pub fn new(config: ResyncDaemonConfig, dataplane: Arc<D>) -> Self {
        Self { config, dataplane }
    }

    pub fn dataplane(&self) -> &Arc<D> {
        &self.dataplane
    }

    /// Runs the resync of every family once.
    pub async fn run(&self, desired: DesiredState) -> ResyncReport {
        let desired = Arc::new(desired);
        audit_log!(AuditRecord::new(AuditCategory::Resync, "ResyncDaemon", "resync_start")
            .with_outcome(AuditOutcome::InProgress)
            .with_details(serde_json::json!({
                "strategy": format!("{:?}", self.config.strategy),
                "interfaces": desired.interfaces.len(),
                "stn_rules": desired.stn_rules.len(),
                "bfd_sessions": desired.bfd_sessions.len(),
                "dnat": desired.dnat.len(),
            })));

        let mut intfs = IntfsOrch::new(self.config.intfs.clone());
        intfs.set_callbacks(self.dataplane.clone() as Arc<dyn IntfsOrchCallbacks>);

        if self.config.strategy == ResyncStrategy::OptimizeColdStart {
            let precheck = tokio::task::spawn_blocking(move || {
                let skip = intfs.verify_config_presence();
                (intfs, skip)
            })
            .await;
            match joined("interfaces", precheck) {
                Ok((_, true)) => {
                    info!("Dataplane is empty, startup resync skipped");
                    audit_log!(AuditRecord::new(AuditCategory::Resync, "ResyncDaemon", "resync_end")
                        .with_outcome(AuditOutcome::Skipped));
                    return ResyncReport {
                        skipped: true,
                        ..Default::default()
                    };
                }
                Ok((orch, false)) => intfs = orch,
                Err(outcome) => {
                    return ResyncReport {
                        outcomes: vec![outcome],
                        ..Default::default()
                    };
                }
            }
        }

        let intfs_task = {
            let desired = Arc::clone(&desired);
            let dataplane = self.dataplane.clone();
            tokio::task::spawn_blocking(move || {
                let intfs_result = intfs.resync(&desired.interfaces);

                let mut stn = StnOrch::new(StnOrchConfig::default(), intfs.indexes());
                stn.set_callbacks(dataplane as Arc<dyn StnOrchCallbacks>);
                let stn_result = stn.resync(&desired.stn_rules);
                let pending: Vec<String> = stn.pending_rules().map(|r| r.rule_name.clone()).collect();

                (
                    vec![
                        FamilyOutcome::from_result("interfaces", intfs_result),
                        FamilyOutcome::from_result("stn", stn_result),
                    ],
                    pending,
                )
            })
        };

        let bfd_task = {
            let desired = Arc::clone(&desired);
            let dataplane = self.dataplane.clone();
            tokio::task::spawn_blocking(move || {
                let mut bfd = BfdOrch::new(BfdOrchConfig::default());
                bfd.set_callbacks(dataplane as Arc<dyn BfdOrchCallbacks>);
                vec![
                    FamilyOutcome::from_result(
                        "bfd-auth-keys",
                        bfd.resync_auth_keys(&desired.bfd_auth_keys),
                    ),
                    FamilyOutcome::from_result(
                        "bfd-sessions",
                        bfd.resync_sessions(&desired.bfd_sessions),
                    ),
                    FamilyOutcome::from_result(
                        "bfd-echo",
                        bfd.resync_echo_function(&desired.bfd_echo_functions),
                    ),
                ]
            })
        };

        let nat_task = {
            let desired = Arc::clone(&desired);
            let dataplane = self.dataplane.clone();
            tokio::task::spawn_blocking(move || {
                let mut nat = NatOrch::new(NatOrchConfig::default());
                nat.set_callbacks(dataplane as Arc<dyn NatOrchCallbacks>);

                let mut outcomes = Vec::new();
                if let Some(global) = &desired.nat_global {
                    outcomes.push(FamilyOutcome::from_result(
                        "nat-global",
                        nat.resync_nat_global(global),
                    ));
                }
                outcomes.push(FamilyOutcome::from_result("snat", nat.resync_snat(&desired.snat)));

                // Without a dump nothing is known to be missing
                let dnat_result = match nat.resync_dnat(&desired.dnat) {
                    Err(e @ NatOrchError::DumpDnat(_)) => Err(e),
                    mut result => {
                        for dnat in &desired.dnat {
                            if nat.dnat_labels().contains_name(&dnat.label) {
                                continue;
                            }
                            if let Err(e) = nat.configure_dnat(dnat) {
                                result = Err(e);
                            }
                        }
                        result
                    }
                };
                outcomes.push(FamilyOutcome::from_result("dnat", dnat_result));
                outcomes
            })
        };

        let (intfs_joined, bfd_joined, nat_joined) = tokio::join!(intfs_task, bfd_task, nat_task);

        let mut report = ResyncReport::default();
        match joined("interfaces", intfs_joined) {
            Ok((outcomes, pending)) => {
                report.outcomes.extend(outcomes);
                report.pending_stn_rules = pending;
            }
            Err(outcome) => report.outcomes.push(outcome),
        }
        match joined("bfd", bfd_joined) {
            Ok(outcomes) => report.outcomes.extend(outcomes),
            Err(outcome) => report.outcomes.push(outcome),
        }
        match joined("nat", nat_joined) {
            Ok(outcomes) => report.outcomes.extend(outcomes),
            Err(outcome) => report.outcomes.push(outcome),
        }

        let failed: Vec<&str> = report.failures().map(|o| o.family).collect();
        let record = AuditRecord::new(AuditCategory::Resync, "ResyncDaemon", "resync_end")
            .with_details(serde_json::json!({
                "failed": failed,
                "pending_stn_rules": report.pending_stn_rules,
            }));
        if failed.is_empty() {
            info!("Startup resync done");
            audit_log!(record.with_outcome(AuditOutcome::Success));
        } else {
            audit_log!(record.with_error(format!("{} families failed", failed.len())));
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataplaneSnapshot;
    use crate::intfs::{Interface, InterfaceType};
    use crate::sim::{Family, OpKind, SimDataplane};
    use crate::stn::StnRule;
    use pretty_assertions::assert_eq;

    fn daemon(strategy: ResyncStrategy, sim: Arc<SimDataplane>) -> ResyncDaemon<SimDataplane> {
        ResyncDaemon::new(
            ResyncDaemonConfig {
                strategy,
                ..Default::default()
            },
            sim,
        )
    }

    #[tokio::test]
    async fn test_cold_start_skipped_on_empty_dataplane() {
        let sim = Arc::new(SimDataplane::new(DataplaneSnapshot::default()));
        let desired = DesiredState {
            interfaces: vec![Interface::new("loop1", InterfaceType::SoftwareLoopback)],
            ..Default::default()
        };

        let report = daemon(ResyncStrategy::OptimizeColdStart, sim.clone())
            .run(desired)
            .await;

        assert!(report.skipped);
        assert!(sim.ops().is_empty());
    }

    #[tokio::test]
    async fn test_full_run_reports_every_family() {
        let sim = Arc::new(SimDataplane::default());
        let desired = DesiredState {
            interfaces: vec![Interface::new("memif1", InterfaceType::MemoryInterface)],
            stn_rules: vec![
                StnRule::new("r1", "10.0.0.1", "memif1"),
                StnRule::new("r2", "10.0.0.2", "absent"),
            ],
            ..Default::default()
        };

        let report = daemon(ResyncStrategy::Full, sim.clone()).run(desired).await;

        assert!(!report.skipped);
        assert!(report.is_success());
        let families: Vec<&str> = report.outcomes.iter().map(|o| o.family).collect();
        assert_eq!(
            families,
            vec!["interfaces", "stn", "bfd-auth-keys", "bfd-sessions", "bfd-echo", "snat", "dnat"]
        );
        assert_eq!(report.pending_stn_rules, vec!["r2".to_string()]);
        assert_eq!(sim.count(Family::Interface, OpKind::Create), 1);
        assert_eq!(sim.count(Family::StnRule, OpKind::Create), 1);
    }

    #[tokio::test]
    async fn test_failure_is_reported_per_family() {
        let sim = Arc::new(SimDataplane::default());
        sim.fail_on(Family::BfdSession, OpKind::Dump);

        let report = daemon(ResyncStrategy::Full, sim).run(DesiredState::default()).await;

        assert!(!report.is_success());
        let failed: Vec<&str> = report.failures().map(|o| o.family).collect();
        assert_eq!(failed, vec!["bfd-sessions"]);
        assert!(report.outcome("interfaces").unwrap().error.is_none());
    }
}
