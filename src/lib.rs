// ============================================================================
// ReliableDB Library
// ============================================================================
//
// Client-side durability and consistency layer for an eventually-consistent
// attribute store that only offers per-item conditional writes.
//
// ============================================================================

pub mod cache;
pub mod client;
pub mod consistency;
pub mod coordinator;
pub mod core;
pub mod daemon;
pub mod journal;
pub mod mapper;
pub mod prelude;
pub mod store;
pub mod version;

pub use cache::{CacheConfig, CacheStats, ItemCache};
pub use client::{RecordPage, ReliableClient, ReliableConfig};
pub use consistency::{CallContext, ConsistencyGuard, ConsistencyScopeId};
pub use coordinator::{CommitReport, CoordinatorState, PropagationReport, WriteCoordinator};
pub use crate::core::{
    Attributes, Clock, DbError, EnvHostIdentity, HostIdentity, HostIdentityProvider, ItemKey,
    ManualClock, Result, StaticHostIdentity, StepFailure, StepFailureKind, SystemClock,
};
pub use daemon::{CycleReport, DaemonState, DaemonStats, ReconciliationDaemon};
pub use journal::{DurableIntentLog, WriteStep};
pub use mapper::Record;
pub use store::{MemoryStore, SelectQuery, Store, StoreRequest};
pub use version::{VersionAttribute, VersionKind, VersionManager, VersionValue};
