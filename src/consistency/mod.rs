// ============================================================================
// Read Consistency Scope
// ============================================================================
//
// A call context carries at most one consistency scope. While it is active,
// reads issued with that context bypass the item cache and ask the store for
// its strongly-consistent read mode. Scopes do not nest: entering again
// replaces the active scope, and leaving any scope clears it.
//
// ============================================================================

pub mod context;

pub use context::{CallContext, ConsistencyGuard};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one entered consistency scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsistencyScopeId(pub u64);

impl ConsistencyScopeId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SCOPE_ID.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for ConsistencyScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope_{}", self.0)
    }
}
