//! IntfsOrch - interface resync.
//!
//! Brings dataplane interfaces in line with the desired configuration and
//! rebuilds the interface registry other families resolve names through.
//!
//! # Pass
//!
//! ```text
//! dump ──> index 0 ──────────────> register as local0
//!   │
//!   ├──> tagged ──── in desired ──> register + tag, modify if changed
//!   │          └─── otherwise ───> register, delete, unregister
//!   │
//!   └──> untagged ── correlates ──> register + tag, modify if changed
//!              └─── otherwise ───> register as temp-if-name, delete
//!
//! desired not registered ─────────> configure + register
//! registered ─────────────────────> refresh InterfaceState
//! ```
//!
//! Untagged interfaces are correlated by MAC address first, then by the full
//! set of interface addresses. The first desired interface (declaration
//! order) that is not registered yet and correlates wins.

mod correlate;
mod diff;
mod orch;
mod types;

pub use correlate::correlate_interface;
pub use diff::{first_difference, is_interface_modified};
pub use orch::{IntfsOrch, IntfsOrchCallbacks, IntfsOrchConfig, IntfsOrchError, IntfsOrchStats};
pub use types::{
    AfPacketLink, Interface, InterfaceDetails, InterfaceMeta, InterfaceState, InterfaceType,
    MemifLink, MemifMode, RxMode, RxModeSettings, SharedInterfaceIndexes, TapLink, Unnumbered,
    VxlanLink, LOCAL0_NAME, TEMP_INTERFACE_NAME,
};
