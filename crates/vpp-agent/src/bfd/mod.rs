//! BfdOrch - Bidirectional Forwarding Detection resync.
//!
//! Three independent passes share the same shape:
//!
//! ```text
//! dump ──> match desired ──> register, modify if changed
//!               └─ no match ──> create + register
//! dumped but unregistered ──> delete
//! ```
//!
//! - Sessions match on (interface, source address, destination address)
//! - Authentication keys match on their numeric id
//! - The echo function cannot be dumped; the first configured entry is applied
//!
//! Failures of single objects do not stop a pass; the last one is reported.

mod orch;
mod types;

pub use orch::{BfdOrch, BfdOrchCallbacks, BfdOrchConfig, BfdOrchError, BfdOrchStats};
pub use types::{
    auth_key_identifier, BfdAuthKey, BfdAuthentication, BfdAuthenticationType, BfdEchoFunction,
    BfdSession, BFD_DEFAULT_DETECT_MULTIPLIER, BFD_DEFAULT_MIN_RX_INTERVAL,
    BFD_DEFAULT_MIN_TX_INTERVAL,
};
