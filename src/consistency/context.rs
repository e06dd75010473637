use super::ConsistencyScopeId;
use crate::coordinator::WriteCoordinator;
use log::warn;
use std::ops::{Deref, DerefMut};

/// Per-call state threaded explicitly through client operations.
///
/// Holds at most one consistency scope and at most one open write
/// coordinator. A context is not shared between concurrent tasks; use
/// [`CallContext::fork`] to hand the consistency scope to a spawned task.
#[derive(Default)]
pub struct CallContext {
    consistency: Option<ConsistencyScopeId>,
    coordinator: Option<WriteCoordinator>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters a consistency scope, replacing any active one.
    ///
    /// The scope ends when the guard is dropped, including early returns
    /// through `?`.
    pub fn enter_consistency_scope(&mut self) -> ConsistencyGuard<'_> {
        let scope = ConsistencyScopeId::next();
        if let Some(previous) = self.consistency.replace(scope) {
            warn!("consistency scope {} replaced by {}", previous, scope);
        }
        ConsistencyGuard { ctx: self, scope }
    }

    /// Clears the active consistency scope, if any.
    pub fn exit_consistency_scope(&mut self) {
        self.consistency = None;
    }

    /// Whether reads on this context must be strongly consistent.
    pub fn is_consistent(&self) -> bool {
        self.consistency.is_some()
    }

    pub fn consistency_scope(&self) -> Option<ConsistencyScopeId> {
        self.consistency
    }

    /// A fresh context that shares this one's consistency scope but no
    /// coordinator.
    pub fn fork(&self) -> CallContext {
        CallContext {
            consistency: self.consistency,
            coordinator: None,
        }
    }

    pub fn has_open_coordinator(&self) -> bool {
        self.coordinator
            .as_ref()
            .is_some_and(|coordinator| coordinator.is_open())
    }

    pub fn coordinator(&self) -> Option<&WriteCoordinator> {
        self.coordinator.as_ref()
    }

    pub fn coordinator_mut(&mut self) -> Option<&mut WriteCoordinator> {
        self.coordinator.as_mut()
    }

    /// Installs a coordinator, discarding any previous one and its
    /// uncommitted steps.
    pub(crate) fn install_coordinator(&mut self, coordinator: WriteCoordinator) -> &mut WriteCoordinator {
        if let Some(previous) = self.coordinator.take() {
            if previous.is_open() && !previous.is_empty() {
                warn!(
                    "reliable write {} replaced with {} uncommitted step(s)",
                    previous.reliable_write_id(),
                    previous.len()
                );
            }
        }
        self.coordinator.insert(coordinator)
    }

    /// Detaches the coordinator so that nothing issued during its commit is
    /// captured into the batch being committed.
    pub(crate) fn take_coordinator(&mut self) -> Option<WriteCoordinator> {
        self.coordinator.take()
    }
}

/// Active consistency scope. Dereferences to the owning [`CallContext`].
pub struct ConsistencyGuard<'a> {
    ctx: &'a mut CallContext,
    scope: ConsistencyScopeId,
}

impl ConsistencyGuard<'_> {
    pub fn scope_id(&self) -> ConsistencyScopeId {
        self.scope
    }

    /// Leaves the scope explicitly.
    pub fn exit(self) {}
}

impl Deref for ConsistencyGuard<'_> {
    type Target = CallContext;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl DerefMut for ConsistencyGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl Drop for ConsistencyGuard<'_> {
    fn drop(&mut self) {
        self.ctx.exit_consistency_scope();
    }
}
