// ============================================================================
// Write Coordinator
// ============================================================================
//
// A coordinator collects store mutations issued on one call context. Commit
// writes the whole batch to the intent log in a single store call, then
// propagates every step concurrently. Each step's log row is removed once the
// store accepted the mutation; rows of failed steps stay behind for the
// reconciliation daemon.
//
//   Open --commit--> Committing --> Closed
//     \________________close_________/
//
// ============================================================================

pub mod propagate;
pub mod scope;

pub use propagate::{PropagationReport, Propagator};
pub use scope::{CommitReport, CoordinatorState, WriteCoordinator};
