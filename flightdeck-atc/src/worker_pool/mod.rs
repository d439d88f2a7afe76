//! Worker pool and resource tracker
//!
//! Placement of containerized work onto the fleet: matching platform, tags,
//! and resource-type capability; co-locating with cached volumes; and
//! assigning the stable container/volume identities that make repeat steps
//! reuse state.

pub mod pool;
pub mod resource_tracker;

pub use pool::{PoolError, WorkerPool, WorkerSpec};
pub use resource_tracker::{CacheIdentifier, ResourceTracker, TrackedResource};
