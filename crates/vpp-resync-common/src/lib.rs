//! Common resync abstractions shared by every object family.
//!
//! - [`NameToIndex`]: bidirectional name ↔ dataplane index registry with
//!   attached metadata (the "identity registry")
//! - [`IndexSeq`]: per-pass counter minting indices for objects the
//!   dataplane does not number itself
//! - [`PassErrors`]: collects per-object failures of a pass that keeps going
//!
//! # Resync model
//!
//! A resync pass dumps the dataplane, correlates the dump with the desired
//! configuration, registers every object that survives (or is created) and
//! deletes whatever did not correlate. The registry is rebuilt from scratch
//! on every pass and nothing here is persisted.
//!
//! ```
//! use vpp_resync_common::{IndexSeq, NameToIndex};
//!
//! let mut seq = IndexSeq::default();
//! let mut keys: NameToIndex<()> = NameToIndex::new();
//!
//! keys.register_name("auth-key-1", seq.next_index(), ());
//! keys.register_name("auth-key-2", seq.next_index(), ());
//!
//! assert_eq!(keys.lookup_idx("auth-key-2").map(|(idx, _)| idx), Some(1));
//! assert!(keys.lookup_idx("auth-key-3").is_none());
//! ```

mod errors;
mod registry;
mod seq;

pub use errors::PassErrors;
pub use registry::{NameToIndex, RegistryError};
pub use seq::IndexSeq;
