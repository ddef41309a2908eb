//! STN (steal-the-NIC) rule types.

use serde::{Deserialize, Serialize};

/// Registry name of the rule bound to `interface`.
pub fn stn_identifier(interface: &str) -> String {
    format!("stn-rule-{}", interface)
}

/// Rule redirecting traffic for `ip_address` to `interface`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StnRule {
    pub rule_name: String,
    pub ip_address: String,
    pub interface: String,
}

impl StnRule {
    pub fn new(
        rule_name: impl Into<String>,
        ip_address: impl Into<String>,
        interface: impl Into<String>,
    ) -> Self {
        Self {
            rule_name: rule_name.into(),
            ip_address: ip_address.into(),
            interface: interface.into(),
        }
    }
}

/// Rule as reported by a dump.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StnRuleDetails {
    pub ip_address: String,
    /// Interface name resolved by the dump (its tag)
    pub interface: String,
    pub sw_if_index: u32,
}
