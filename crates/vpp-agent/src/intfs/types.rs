//! Interface configuration and dump types.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use vpp_resync_common::NameToIndex;
use vpp_types::MacAddress;

/// Name the dataplane gives the sentinel device at index 0.
pub const LOCAL0_NAME: &str = "local0";

/// Registry name for untagged interfaces that are about to be removed.
pub const TEMP_INTERFACE_NAME: &str = "temp-if-name";

/// Interface type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceType {
    #[default]
    SoftwareLoopback,
    EthernetCsmacd,
    MemoryInterface,
    TapInterface,
    AfPacketInterface,
    VxlanTunnel,
}

impl InterfaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceType::SoftwareLoopback => "software_loopback",
            InterfaceType::EthernetCsmacd => "ethernet_csmacd",
            InterfaceType::MemoryInterface => "memory_interface",
            InterfaceType::TapInterface => "tap_interface",
            InterfaceType::AfPacketInterface => "af_packet_interface",
            InterfaceType::VxlanTunnel => "vxlan_tunnel",
        }
    }
}

/// Receive mode of an interface queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RxMode {
    #[default]
    Default,
    Polling,
    Interrupt,
    Adaptive,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RxModeSettings {
    pub rx_mode: RxMode,
    pub queue_id: u32,
    pub queue_id_valid: u32,
}

/// Unnumbered interface borrowing the addresses of another interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Unnumbered {
    pub interface_with_ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AfPacketLink {
    pub host_if_name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemifMode {
    #[default]
    Ethernet,
    Ip,
    PuntInject,
}

/// Shared memory interface.
///
/// `secret`, `ring_size` and `buffer_size` are configured but the dataplane
/// cannot report them faithfully, so resync never compares them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemifLink {
    pub master: bool,
    pub mode: MemifMode,
    pub id: u32,
    pub socket_filename: String,
    pub secret: String,
    pub ring_size: u32,
    pub buffer_size: u32,
    pub rx_queues: u32,
    pub tx_queues: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapLink {
    pub version: u32,
    pub host_if_name: String,
    pub namespace: String,
    pub rx_ring_size: u32,
    pub tx_ring_size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VxlanLink {
    pub src_address: String,
    pub dst_address: String,
    pub vni: u32,
    pub multicast: String,
}

/// Interface as declared in desired config or reported by a dump.
///
/// In a dump `name` holds the tag; an empty name means the interface is
/// untagged and has to be correlated heuristically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Interface {
    pub name: String,
    #[serde(rename = "type")]
    pub if_type: InterfaceType,
    pub enabled: bool,
    pub vrf: u32,
    pub container_ip_address: String,
    pub set_dhcp_client: bool,
    pub mtu: u32,
    #[serde(deserialize_with = "deserialize_phys_address")]
    pub phys_address: Option<MacAddress>,
    pub ip_addresses: Vec<String>,
    pub unnumbered: Option<Unnumbered>,
    pub rx_mode_settings: Option<RxModeSettings>,
    pub afpacket: Option<AfPacketLink>,
    pub memif: Option<MemifLink>,
    pub tap: Option<TapLink>,
    pub vxlan: Option<VxlanLink>,
}

impl Interface {
    pub fn new(name: impl Into<String>, if_type: InterfaceType) -> Self {
        Self {
            name: name.into(),
            if_type,
            ..Default::default()
        }
    }

    pub fn is_tagged(&self) -> bool {
        !self.name.is_empty()
    }
}

/// Dataplane-side metadata of a dumped interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceMeta {
    /// Name the dataplane assigned to the device (e.g. `local0`, `memif0/1`)
    pub internal_name: String,
    pub sw_if_index: u32,
}

/// One entry of an interface dump.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceDetails {
    pub interface: Interface,
    pub meta: InterfaceMeta,
}

/// An empty or missing MAC string means no MAC is declared.
fn deserialize_phys_address<'de, D>(deserializer: D) -> Result<Option<MacAddress>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(mac) => mac.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Operational view of a registered interface, refreshed after each pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceState {
    pub name: String,
    pub index: u32,
    pub internal_name: String,
    pub enabled: bool,
    pub mtu: u32,
    pub phys_address: Option<MacAddress>,
}

/// Interface registry shared with families that resolve interfaces by name.
#[derive(Debug, Clone, Default)]
pub struct SharedInterfaceIndexes {
    inner: Arc<RwLock<NameToIndex<Interface>>>,
}

impl SharedInterfaceIndexes {
    pub fn new() -> Self {
        Self::default()
    }

    /// A poisoned lock only means a writer panicked mid-pass; the next pass
    /// clears the registry anyway.
    pub fn read(&self) -> RwLockReadGuard<'_, NameToIndex<Interface>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, NameToIndex<Interface>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lookup_idx(&self, name: &str) -> Option<u32> {
        self.read().lookup_idx(name).map(|(idx, _)| idx)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.read().contains_name(name)
    }
}
