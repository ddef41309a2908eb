//! BfdOrch implementation.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use vpp_resync_common::{IndexSeq, NameToIndex, PassErrors};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;

use super::types::{auth_key_identifier, BfdAuthKey, BfdEchoFunction, BfdSession};

/// BFD resync error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BfdOrchError {
    #[error("failed to dump BFD sessions: {0}")]
    DumpSessions(String),
    #[error("failed to dump BFD authentication keys: {0}")]
    DumpAuthKeys(String),
    #[error("failed to create BFD session {session}: {reason}")]
    SessionCreate { session: String, reason: String },
    #[error("failed to modify BFD session {session}: {reason}")]
    SessionModify { session: String, reason: String },
    #[error("failed to delete BFD session {session}: {reason}")]
    SessionDelete { session: String, reason: String },
    #[error("failed to create BFD authentication key {id}: {reason}")]
    AuthKeyCreate { id: u32, reason: String },
    #[error("failed to modify BFD authentication key {id}: {reason}")]
    AuthKeyModify { id: u32, reason: String },
    #[error("failed to delete BFD authentication key {id}: {reason}")]
    AuthKeyDelete { id: u32, reason: String },
    #[error("failed to set {interface} as BFD echo source: {reason}")]
    EchoFunction { interface: String, reason: String },
    #[error("no callbacks set")]
    NoCallbacks,
}

/// Dataplane calls used by BFD resync.
pub trait BfdOrchCallbacks: Send + Sync {
    fn dump_bfd_sessions(&self) -> Result<Vec<BfdSession>, String>;

    fn dump_bfd_auth_keys(&self) -> Result<Vec<BfdAuthKey>, String>;

    fn configure_bfd_session(&self, session: &BfdSession) -> Result<(), String>;

    fn modify_bfd_session(&self, actual: &BfdSession, desired: &BfdSession) -> Result<(), String>;

    fn delete_bfd_session(&self, session: &BfdSession) -> Result<(), String>;

    fn configure_bfd_auth_key(&self, key: &BfdAuthKey) -> Result<(), String>;

    fn modify_bfd_auth_key(&self, actual: &BfdAuthKey, desired: &BfdAuthKey) -> Result<(), String>;

    fn delete_bfd_auth_key(&self, key: &BfdAuthKey) -> Result<(), String>;

    /// Sets the echo source. The dataplane cannot report the current one.
    fn configure_bfd_echo_function(&self, echo: &BfdEchoFunction) -> Result<(), String>;
}

#[derive(Debug, Clone, Default)]
pub struct BfdOrchConfig {}

#[derive(Debug, Clone, Default)]
pub struct BfdOrchStats {
    pub sessions_created: u64,
    pub sessions_modified: u64,
    pub sessions_removed: u64,
    pub keys_created: u64,
    pub keys_modified: u64,
    pub keys_removed: u64,
    pub echo_configured: u64,
    pub failures: u64,
}

/// BFD resync orchestrator.
///
/// Sessions are registered under their owning interface, keys under
/// `auth-key-<id>` and the echo function under its source interface.
pub struct BfdOrch {
    config: BfdOrchConfig,
    sessions: NameToIndex<BfdSession>,
    keys: NameToIndex<BfdAuthKey>,
    echo: NameToIndex<BfdEchoFunction>,
    seq: IndexSeq,
    callbacks: Option<Arc<dyn BfdOrchCallbacks>>,
    stats: BfdOrchStats,
}

impl std::fmt::Debug for BfdOrch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BfdOrch")
            .field("config", &self.config)
            .field("sessions_count", &self.sessions.len())
            .field("keys_count", &self.keys.len())
            .field("echo_count", &self.echo.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl BfdOrch {
    pub fn new(config: BfdOrchConfig) -> Self {
        Self {
            config,
            sessions: NameToIndex::new(),
            keys: NameToIndex::new(),
            echo: NameToIndex::new(),
            seq: IndexSeq::default(),
            callbacks: None,
            stats: BfdOrchStats::default(),
        }
    }

    pub fn set_callbacks(&mut self, callbacks: Arc<dyn BfdOrchCallbacks>) {
        self.callbacks = Some(callbacks);
    }

    pub fn stats(&self) -> &BfdOrchStats {
        &self.stats
    }

    pub fn sessions(&self) -> &NameToIndex<BfdSession> {
        &self.sessions
    }

    pub fn auth_keys(&self) -> &NameToIndex<BfdAuthKey> {
        &self.keys
    }

    pub fn echo_functions(&self) -> &NameToIndex<BfdEchoFunction> {
        &self.echo
    }

    fn callbacks(&self) -> Result<Arc<dyn BfdOrchCallbacks>, BfdOrchError> {
        self.callbacks.clone().ok_or(BfdOrchError::NoCallbacks)
    }

    fn audit(category: AuditCategory, action: &str, object_type: &str, id: &str) -> AuditRecord {
        AuditRecord::new(category, "BfdOrch", action)
            .with_object_id(id)
            .with_object_type(object_type)
    }

    /// Resyncs BFD sessions.
    ///
    /// Every dumped session matching a desired session on
    /// (interface, source, destination) is registered and modified when it
    /// differs; duplicates in the dump are each handled. Desired sessions
    /// without a counterpart are created. Dumped sessions whose interface
    /// ended up unregistered are deleted. Per-session failures are logged
    /// and the last one is returned once the pass is complete.
    pub fn resync_sessions(&mut self, desired: &[BfdSession]) -> Result<(), BfdOrchError> {
        let callbacks = self.callbacks()?;

        self.sessions.clear();
        self.seq = IndexSeq::default();

        let actual = callbacks
            .dump_bfd_sessions()
            .map_err(BfdOrchError::DumpSessions)?;

        let mut errors = PassErrors::new();

        for want in desired {
            let mut found = false;
            for have in actual.iter().filter(|have| want.same_endpoints(have)) {
                found = true;
                self.sessions
                    .register_name(&want.interface, self.seq.next_index(), want.clone());
                if !want.differs_from(have) {
                    debug!("BFD session {} registered without changes", want.display_key());
                    continue;
                }
                let record = Self::audit(
                    AuditCategory::ResourceModify,
                    "modify_bfd_session",
                    "bfd_session",
                    &want.display_key(),
                );
                match callbacks.modify_bfd_session(have, want) {
                    Ok(()) => {
                        self.stats.sessions_modified += 1;
                        audit_log!(record.with_outcome(AuditOutcome::Success));
                    }
                    Err(reason) => {
                        error!("Failed to modify BFD session {}: {}", want.display_key(), reason);
                        audit_log!(record.with_error(&reason));
                        errors.record(BfdOrchError::SessionModify {
                            session: want.display_key(),
                            reason,
                        });
                    }
                }
            }

            if !found {
                let record = Self::audit(
                    AuditCategory::ResourceCreate,
                    "configure_bfd_session",
                    "bfd_session",
                    &want.display_key(),
                );
                match callbacks.configure_bfd_session(want) {
                    Ok(()) => {
                        self.sessions
                            .register_name(&want.interface, self.seq.next_index(), want.clone());
                        self.stats.sessions_created += 1;
                        audit_log!(record.with_outcome(AuditOutcome::Success));
                    }
                    Err(reason) => {
                        error!("Failed to create BFD session {}: {}", want.display_key(), reason);
                        audit_log!(record.with_error(&reason));
                        errors.record(BfdOrchError::SessionCreate {
                            session: want.display_key(),
                            reason,
                        });
                    }
                }
            }
        }

        for have in &actual {
            if self.sessions.contains_name(&have.interface) {
                continue;
            }
            let record = Self::audit(
                AuditCategory::ResourceDelete,
                "delete_bfd_session",
                "bfd_session",
                &have.display_key(),
            );
            match callbacks.delete_bfd_session(have) {
                Ok(()) => {
                    self.stats.sessions_removed += 1;
                    audit_log!(record.with_outcome(AuditOutcome::Success));
                }
                Err(reason) => {
                    error!("Failed to delete BFD session {}: {}", have.display_key(), reason);
                    audit_log!(record.with_error(&reason));
                    errors.record(BfdOrchError::SessionDelete {
                        session: have.display_key(),
                        reason,
                    });
                }
            }
        }

        self.stats.failures += errors.count() as u64;
        info!(
            "BFD session resync done ({} registered, {} failures)",
            self.sessions.len(),
            errors.count()
        );
        errors.into_result()
    }

    /// Resyncs BFD authentication keys, matched by key id.
    pub fn resync_auth_keys(&mut self, desired: &[BfdAuthKey]) -> Result<(), BfdOrchError> {
        let callbacks = self.callbacks()?;

        self.keys.clear();
        self.seq = IndexSeq::default();

        let actual = callbacks
            .dump_bfd_auth_keys()
            .map_err(BfdOrchError::DumpAuthKeys)?;

        let mut errors = PassErrors::new();

        for want in desired {
            let name = auth_key_identifier(want.id);
            let mut found = false;
            for have in actual.iter().filter(|have| have.id == want.id) {
                found = true;
                self.keys.register_name(&name, self.seq.next_index(), want.clone());
                if !want.differs_from(have) {
                    debug!("BFD key {} registered without changes", want.id);
                    continue;
                }
                let record = Self::audit(
                    AuditCategory::ResourceModify,
                    "modify_bfd_auth_key",
                    "bfd_auth_key",
                    &name,
                );
                match callbacks.modify_bfd_auth_key(have, want) {
                    Ok(()) => {
                        self.stats.keys_modified += 1;
                        audit_log!(record.with_outcome(AuditOutcome::Success));
                    }
                    Err(reason) => {
                        error!("Failed to modify BFD key {}: {}", want.id, reason);
                        audit_log!(record.with_error(&reason));
                        errors.record(BfdOrchError::AuthKeyModify {
                            id: want.id,
                            reason,
                        });
                    }
                }
            }

            if !found {
                let record = Self::audit(
                    AuditCategory::ResourceCreate,
                    "configure_bfd_auth_key",
                    "bfd_auth_key",
                    &name,
                );
                match callbacks.configure_bfd_auth_key(want) {
                    Ok(()) => {
                        self.keys.register_name(&name, self.seq.next_index(), want.clone());
                        self.stats.keys_created += 1;
                        audit_log!(record.with_outcome(AuditOutcome::Success));
                    }
                    Err(reason) => {
                        error!("Failed to create BFD key {}: {}", want.id, reason);
                        audit_log!(record.with_error(&reason));
                        errors.record(BfdOrchError::AuthKeyCreate {
                            id: want.id,
                            reason,
                        });
                    }
                }
            }
        }

        for have in &actual {
            let name = auth_key_identifier(have.id);
            if self.keys.contains_name(&name) {
                continue;
            }
            let record = Self::audit(
                AuditCategory::ResourceDelete,
                "delete_bfd_auth_key",
                "bfd_auth_key",
                &name,
            );
            match callbacks.delete_bfd_auth_key(have) {
                Ok(()) => {
                    self.stats.keys_removed += 1;
                    audit_log!(record.with_outcome(AuditOutcome::Success));
                }
                Err(reason) => {
                    error!("Failed to delete BFD key {}: {}", have.id, reason);
                    audit_log!(record.with_error(&reason));
                    errors.record(BfdOrchError::AuthKeyDelete {
                        id: have.id,
                        reason,
                    });
                }
            }
        }

        self.stats.failures += errors.count() as u64;
        info!(
            "BFD authentication key resync done ({} registered, {} failures)",
            self.keys.len(),
            errors.count()
        );
        errors.into_result()
    }

    /// Applies the echo function.
    ///
    /// An empty list changes nothing: the dataplane cannot report an active
    /// echo source, so nothing is removed. Only the first entry is applied.
    pub fn resync_echo_function(&mut self, desired: &[BfdEchoFunction]) -> Result<(), BfdOrchError> {
        let Some(echo) = desired.first() else {
            debug!("No BFD echo function configured, leaving dataplane untouched");
            return Ok(());
        };
        if desired.len() > 1 {
            warn!(
                "Multiple BFD echo functions configured, using {} as echo source",
                echo.echo_source_interface
            );
        }

        let callbacks = self.callbacks()?;
        self.echo.clear();

        let record = Self::audit(
            AuditCategory::ResourceCreate,
            "configure_bfd_echo_function",
            "bfd_echo_function",
            &echo.echo_source_interface,
        );
        match callbacks.configure_bfd_echo_function(echo) {
            Ok(()) => {
                self.echo
                    .register_name(&echo.echo_source_interface, 0, echo.clone());
                self.stats.echo_configured += 1;
                audit_log!(record.with_outcome(AuditOutcome::Success));
                Ok(())
            }
            Err(reason) => {
                audit_log!(record.with_error(&reason));
                self.stats.failures += 1;
                Err(BfdOrchError::EchoFunction {
                    interface: echo.echo_source_interface.clone(),
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct TestCallbacks {
        sessions: Vec<BfdSession>,
        keys: Vec<BfdAuthKey>,
        created: Mutex<Vec<String>>,
        modified: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
        echo: Mutex<Vec<String>>,
        fail_create: bool,
        fail_delete: bool,
    }

    impl BfdOrchCallbacks for TestCallbacks {
        fn dump_bfd_sessions(&self) -> Result<Vec<BfdSession>, String> {
            Ok(self.sessions.clone())
        }

        fn dump_bfd_auth_keys(&self) -> Result<Vec<BfdAuthKey>, String> {
            Ok(self.keys.clone())
        }

        fn configure_bfd_session(&self, session: &BfdSession) -> Result<(), String> {
            if self.fail_create {
                return Err("Creation failed".to_string());
            }
            self.created.lock().unwrap().push(session.display_key());
            Ok(())
        }

        fn modify_bfd_session(&self, _actual: &BfdSession, desired: &BfdSession) -> Result<(), String> {
            self.modified.lock().unwrap().push(desired.display_key());
            Ok(())
        }

        fn delete_bfd_session(&self, session: &BfdSession) -> Result<(), String> {
            if self.fail_delete {
                return Err("Removal failed".to_string());
            }
            self.deleted.lock().unwrap().push(session.display_key());
            Ok(())
        }

        fn configure_bfd_auth_key(&self, key: &BfdAuthKey) -> Result<(), String> {
            if self.fail_create {
                return Err("Creation failed".to_string());
            }
            self.created.lock().unwrap().push(auth_key_identifier(key.id));
            Ok(())
        }

        fn modify_bfd_auth_key(&self, _actual: &BfdAuthKey, desired: &BfdAuthKey) -> Result<(), String> {
            self.modified.lock().unwrap().push(auth_key_identifier(desired.id));
            Ok(())
        }

        fn delete_bfd_auth_key(&self, key: &BfdAuthKey) -> Result<(), String> {
            self.deleted.lock().unwrap().push(auth_key_identifier(key.id));
            Ok(())
        }

        fn configure_bfd_echo_function(&self, echo: &BfdEchoFunction) -> Result<(), String> {
            self.echo.lock().unwrap().push(echo.echo_source_interface.clone());
            Ok(())
        }
    }

    fn orch_with(callbacks: Arc<TestCallbacks>) -> BfdOrch {
        let mut orch = BfdOrch::new(BfdOrchConfig::default());
        orch.set_callbacks(callbacks);
        orch
    }

    #[test]
    fn test_session_match_modify_create_delete() {
        let mut changed = BfdSession::new("memif1", "10.0.0.1", "10.0.0.2");
        changed.detect_multiplier = 5;
        let callbacks = Arc::new(TestCallbacks {
            sessions: vec![changed, BfdSession::new("tap1", "10.1.0.1", "10.1.0.2")],
            ..Default::default()
        });
        let mut orch = orch_with(callbacks.clone());

        let desired = vec![
            BfdSession::new("memif1", "10.0.0.1", "10.0.0.2"),
            BfdSession::new("loop1", "10.2.0.1", "10.2.0.2"),
        ];
        orch.resync_sessions(&desired).unwrap();

        assert_eq!(*callbacks.modified.lock().unwrap(), vec!["memif1|10.0.0.1|10.0.0.2"]);
        assert_eq!(*callbacks.created.lock().unwrap(), vec!["loop1|10.2.0.1|10.2.0.2"]);
        assert_eq!(*callbacks.deleted.lock().unwrap(), vec!["tap1|10.1.0.1|10.1.0.2"]);
        assert!(orch.sessions().contains_name("memif1"));
        assert!(orch.sessions().contains_name("loop1"));
    }

    #[test]
    fn test_equal_session_not_modified() {
        let session = BfdSession::new("memif1", "10.0.0.1", "10.0.0.2");
        let callbacks = Arc::new(TestCallbacks {
            sessions: vec![session.clone()],
            ..Default::default()
        });
        let mut orch = orch_with(callbacks.clone());

        orch.resync_sessions(&[session]).unwrap();

        assert!(callbacks.modified.lock().unwrap().is_empty());
        assert!(callbacks.created.lock().unwrap().is_empty());
        assert_eq!(orch.stats().sessions_modified, 0);
    }

    #[test]
    fn test_duplicate_dumped_sessions_each_modified() {
        let mut dup = BfdSession::new("memif1", "10.0.0.1", "10.0.0.2");
        dup.enabled = false;
        let callbacks = Arc::new(TestCallbacks {
            sessions: vec![dup.clone(), dup],
            ..Default::default()
        });
        let mut orch = orch_with(callbacks.clone());

        orch.resync_sessions(&[BfdSession::new("memif1", "10.0.0.1", "10.0.0.2")])
            .unwrap();

        assert_eq!(callbacks.modified.lock().unwrap().len(), 2);
        assert_eq!(orch.sessions().len(), 1);
    }

    #[test]
    fn test_failures_accumulate_and_last_is_returned() {
        let callbacks = Arc::new(TestCallbacks {
            sessions: vec![BfdSession::new("tap1", "10.1.0.1", "10.1.0.2")],
            fail_create: true,
            fail_delete: true,
            ..Default::default()
        });
        let mut orch = orch_with(callbacks);

        let err = orch
            .resync_sessions(&[BfdSession::new("loop1", "10.2.0.1", "10.2.0.2")])
            .unwrap_err();

        // Create failed first, the delete still ran and failed last
        assert_eq!(
            err,
            BfdOrchError::SessionDelete {
                session: "tap1|10.1.0.1|10.1.0.2".to_string(),
                reason: "Removal failed".to_string(),
            }
        );
        assert_eq!(orch.stats().failures, 2);
    }

    #[test]
    fn test_auth_keys() {
        let callbacks = Arc::new(TestCallbacks {
            keys: vec![BfdAuthKey::new(1, ""), BfdAuthKey::new(9, "old")],
            ..Default::default()
        });
        let mut orch = orch_with(callbacks.clone());

        orch.resync_auth_keys(&[BfdAuthKey::new(1, "secret"), BfdAuthKey::new(2, "secret")])
            .unwrap();

        assert_eq!(*callbacks.created.lock().unwrap(), vec!["auth-key-2"]);
        assert_eq!(*callbacks.deleted.lock().unwrap(), vec!["auth-key-9"]);
        assert!(callbacks.modified.lock().unwrap().is_empty());
        assert_eq!(orch.auth_keys().lookup_idx("auth-key-1").map(|(i, _)| i), Some(0));
        assert_eq!(orch.auth_keys().lookup_idx("auth-key-2").map(|(i, _)| i), Some(1));
    }

    #[test]
    fn test_echo_function() {
        let callbacks = Arc::new(TestCallbacks::default());
        let mut orch = orch_with(callbacks.clone());

        orch.resync_echo_function(&[]).unwrap();
        assert!(callbacks.echo.lock().unwrap().is_empty());

        let echo = |iface: &str| BfdEchoFunction {
            name: format!("echo-{}", iface),
            echo_source_interface: iface.to_string(),
        };
        orch.resync_echo_function(&[echo("loop0"), echo("loop1")])
            .unwrap();

        assert_eq!(*callbacks.echo.lock().unwrap(), vec!["loop0"]);
        assert!(orch.echo_functions().contains_name("loop0"));
        assert!(!orch.echo_functions().contains_name("loop1"));
    }
}
