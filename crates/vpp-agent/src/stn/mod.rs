//! StnOrch - steal-the-NIC rule resync.
//!
//! Rules are bound to interfaces by name, so this pass reads the registry
//! filled by the interface pass and must run after it. Each interface
//! carries at most one registered rule.

mod orch;
mod types;

pub use orch::{StnOrch, StnOrchCallbacks, StnOrchConfig, StnOrchError, StnOrchStats};
pub use types::{stn_identifier, StnRule, StnRuleDetails};
