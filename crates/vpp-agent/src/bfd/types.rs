//! BFD session, authentication key and echo function types.

use serde::{Deserialize, Serialize};

/// Default desired minimum TX interval (microseconds).
pub const BFD_DEFAULT_MIN_TX_INTERVAL: u32 = 1_000_000;
/// Default required minimum RX interval (microseconds).
pub const BFD_DEFAULT_MIN_RX_INTERVAL: u32 = 1_000_000;
/// Default detection multiplier.
pub const BFD_DEFAULT_DETECT_MULTIPLIER: u32 = 3;

/// Registry name of an authentication key.
pub fn auth_key_identifier(id: u32) -> String {
    format!("auth-key-{}", id)
}

/// Authentication settings of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BfdAuthentication {
    pub key_id: u32,
    pub advertised_key_id: u32,
}

/// Single-hop BFD session.
///
/// Sessions carry no name; they are identified by the owning interface
/// together with the source and destination addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BfdSession {
    pub interface: String,
    pub source_address: String,
    pub destination_address: String,
    pub enabled: bool,
    pub desired_min_tx_interval: u32,
    pub required_min_rx_interval: u32,
    pub detect_multiplier: u32,
    pub authentication: Option<BfdAuthentication>,
}

impl Default for BfdSession {
    fn default() -> Self {
        Self {
            interface: String::new(),
            source_address: String::new(),
            destination_address: String::new(),
            enabled: true,
            desired_min_tx_interval: BFD_DEFAULT_MIN_TX_INTERVAL,
            required_min_rx_interval: BFD_DEFAULT_MIN_RX_INTERVAL,
            detect_multiplier: BFD_DEFAULT_DETECT_MULTIPLIER,
            authentication: None,
        }
    }
}

impl BfdSession {
    pub fn new(
        interface: impl Into<String>,
        source_address: impl Into<String>,
        destination_address: impl Into<String>,
    ) -> Self {
        Self {
            interface: interface.into(),
            source_address: source_address.into(),
            destination_address: destination_address.into(),
            ..Default::default()
        }
    }

    /// Same interface, source and destination.
    pub fn same_endpoints(&self, other: &BfdSession) -> bool {
        self.interface == other.interface
            && self.source_address == other.source_address
            && self.destination_address == other.destination_address
    }

    /// Returns true if `actual` needs a modify call to match `self`.
    pub fn differs_from(&self, actual: &BfdSession) -> bool {
        self.enabled != actual.enabled
            || self.desired_min_tx_interval != actual.desired_min_tx_interval
            || self.required_min_rx_interval != actual.required_min_rx_interval
            || self.detect_multiplier != actual.detect_multiplier
            || self.authentication != actual.authentication
    }

    pub fn display_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.interface, self.source_address, self.destination_address
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BfdAuthenticationType {
    #[default]
    KeyedSha1,
    MeticulousKeyedSha1,
}

/// BFD authentication key, identified by its numeric id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BfdAuthKey {
    pub name: String,
    pub id: u32,
    pub authentication_type: BfdAuthenticationType,
    pub secret: String,
}

impl BfdAuthKey {
    pub fn new(id: u32, secret: impl Into<String>) -> Self {
        Self {
            name: format!("key{}", id),
            id,
            secret: secret.into(),
            ..Default::default()
        }
    }

    /// Returns true if `actual` needs a modify call to match `self`.
    ///
    /// Dumps may leave the secret out; it is only compared when reported.
    pub fn differs_from(&self, actual: &BfdAuthKey) -> bool {
        self.authentication_type != actual.authentication_type
            || (!actual.secret.is_empty() && self.secret != actual.secret)
    }
}

/// Interface whose address is used as the echo source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BfdEchoFunction {
    pub name: String,
    pub echo_source_interface: String,
}
