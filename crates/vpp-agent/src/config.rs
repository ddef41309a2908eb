//! Resync configuration and dataplane snapshot loading.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bfd::{BfdAuthKey, BfdEchoFunction, BfdSession};
use crate::intfs::{Interface, InterfaceDetails};
use crate::nat::{DNatConfig, Nat44Global, SNatConfig};
use crate::stn::{StnRule, StnRuleDetails};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How the startup resync is run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum ResyncStrategy {
    /// Always reconcile every family.
    #[default]
    Full,
    /// Skip the resync when the dataplane holds no configuration.
    OptimizeColdStart,
}

/// Desired configuration of every family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesiredState {
    pub interfaces: Vec<Interface>,
    pub bfd_sessions: Vec<BfdSession>,
    pub bfd_auth_keys: Vec<BfdAuthKey>,
    pub bfd_echo_functions: Vec<BfdEchoFunction>,
    pub stn_rules: Vec<StnRule>,
    pub nat_global: Option<Nat44Global>,
    pub snat: Vec<SNatConfig>,
    pub dnat: Vec<DNatConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResyncConfig {
    pub strategy: ResyncStrategy,
    pub desired: DesiredState,
}

impl ResyncConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Rejects input no pass could make sense of.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = std::collections::HashSet::new();
        for iface in &self.desired.interfaces {
            if iface.name.is_empty() {
                return Err(ConfigError::Invalid("interface without a name".to_string()));
            }
            if !names.insert(iface.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "interface {} declared twice",
                    iface.name
                )));
            }
        }

        let mut labels = std::collections::HashSet::new();
        for dnat in &self.desired.dnat {
            if !labels.insert(dnat.label.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "DNAT label {} declared twice",
                    dnat.label
                )));
            }
        }
        Ok(())
    }
}

/// Dataplane state used to seed the simulated dataplane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataplaneSnapshot {
    pub interfaces: Vec<InterfaceDetails>,
    /// Memif socket filename -> socket id
    pub memif_sockets: BTreeMap<String, u32>,
    pub bfd_sessions: Vec<BfdSession>,
    pub bfd_auth_keys: Vec<BfdAuthKey>,
    pub stn_rules: Vec<StnRuleDetails>,
    pub nat_global: Nat44Global,
    pub dnat: Vec<DNatConfig>,
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: display.clone(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: display,
        source,
    })
}

/// Loads and validates a resync configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<ResyncConfig, ConfigError> {
    let config: ResyncConfig = read_yaml(path.as_ref())?;
    config.validate()?;
    Ok(config)
}

pub fn load_snapshot(path: impl AsRef<Path>) -> Result<DataplaneSnapshot, ConfigError> {
    read_yaml(path.as_ref())
}
