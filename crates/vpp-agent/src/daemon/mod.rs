//! Startup resync coordination.

mod resyncdaemon;

pub use resyncdaemon::{Dataplane, FamilyOutcome, ResyncDaemon, ResyncDaemonConfig, ResyncReport};
