//! NAT44 global, SNAT and DNAT configuration types.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwiceNatMode {
    #[default]
    Disabled,
    Enabled,
    SelfTwiceNat,
}

impl TwiceNatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TwiceNatMode::Disabled => "disabled",
            TwiceNatMode::Enabled => "enabled",
            TwiceNatMode::SelfTwiceNat => "self",
        }
    }
}

/// Interface with NAT enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatInterface {
    pub name: String,
    pub is_inside: bool,
    pub output_feature: bool,
}

/// Range of external addresses used for translation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressPool {
    pub first_src_address: String,
    /// Empty for a single-address pool
    pub last_src_address: String,
    pub vrf_id: u32,
    pub twice_nat: bool,
}

/// Global NAT44 configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Nat44Global {
    pub forwarding: bool,
    pub nat_interfaces: Vec<NatInterface>,
    pub address_pools: Vec<AddressPool>,
}

/// Source NAT configuration. Reserved, nothing is reconciled for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SNatConfig {
    pub label: String,
}

/// Internal endpoint of a static mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalIp {
    pub local_ip: String,
    pub local_port: u32,
    /// Load-balancing weight, only meaningful with more than one endpoint
    pub probability: u32,
}

impl LocalIp {
    pub fn new(local_ip: impl Into<String>, local_port: u32, probability: u32) -> Self {
        Self {
            local_ip: local_ip.into(),
            local_port,
            probability,
        }
    }
}

/// Static mapping; load-balanced when it has more than one local endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticMapping {
    pub external_interface: String,
    pub external_ip: String,
    pub external_port: u32,
    pub local_ips: Vec<LocalIp>,
    pub protocol: Protocol,
    pub twice_nat: TwiceNatMode,
}

impl StaticMapping {
    pub fn is_load_balanced(&self) -> bool {
        self.local_ips.len() > 1
    }
}

/// Mapping that translates an address (and port) to itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityMapping {
    pub vrf_id: u32,
    pub addressed_interface: String,
    pub ip_address: String,
    pub port: u32,
    pub protocol: Protocol,
}

/// Destination NAT configuration, a labelled group of mappings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DNatConfig {
    pub label: String,
    pub st_mappings: Vec<StaticMapping>,
    pub id_mappings: Vec<IdentityMapping>,
}

impl DNatConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.st_mappings.is_empty() && self.id_mappings.is_empty()
    }
}
