//! VPP dataplane resync.
//!
//! Reconciles the desired configuration of a VPP dataplane with the state
//! dumped from it, issuing the smallest set of create/modify/delete calls
//! that converges the two.
//!
//! # Architecture
//!
//! ```text
//! [desired config] ─┐
//!                   ├──> [ResyncDaemon] ──> *Orch::resync ──> *OrchCallbacks ──> [dataplane]
//! [dataplane dump] ─┘           │
//!                               ↓
//!                     [name <-> index registries]
//! ```
//!
//! # Key Components
//!
//! - [`intfs::IntfsOrch`]: interfaces, correlated by tag, MAC or addresses
//! - [`bfd::BfdOrch`]: BFD sessions, authentication keys, echo function
//! - [`stn::StnOrch`]: STN rules, resolved through the interface registry
//! - [`nat::NatOrch`]: NAT44 global config and DNAT mappings
//! - [`daemon::ResyncDaemon`]: runs every family once
//! - [`sim::SimDataplane`]: in-memory dataplane for planning and tests

pub mod audit;
pub mod bfd;
pub mod config;
pub mod daemon;
pub mod intfs;
pub mod nat;
pub mod sim;
pub mod stn;

pub use config::{DataplaneSnapshot, DesiredState, ResyncConfig, ResyncStrategy};
pub use daemon::{ResyncDaemon, ResyncDaemonConfig, ResyncReport};
