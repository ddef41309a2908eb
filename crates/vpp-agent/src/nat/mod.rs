//! NatOrch - NAT44 resync.
//!
//! - Global config: dumped and patched with only the differing settings
//! - SNAT: nothing to reconcile
//! - DNAT: labels present on both sides have their mappings paired by the
//!   mapping resolver; unpaired desired mappings are created and unpaired
//!   dumped ones removed. Labels only present in the dataplane are removed.
//!
//! Mappings have no dataplane index, so they are registered under an
//! identifier built from their fields with indexes drawn from a per-pass
//! sequence.

mod mappings;
mod orch;
mod types;

pub use mappings::{identity_mapping_id, resolve_mappings, static_mapping_id, ResolvedMappings};
pub use orch::{NatOrch, NatOrchCallbacks, NatOrchConfig, NatOrchError, NatOrchStats};
pub use types::{
    AddressPool, DNatConfig, IdentityMapping, LocalIp, Nat44Global, NatInterface, Protocol,
    SNatConfig, StaticMapping, TwiceNatMode,
};
