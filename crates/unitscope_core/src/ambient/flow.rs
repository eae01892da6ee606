//! Per-flow slot holding the ambient scope identity.
//!
//! Inside a task-local scope (entered through [`flow`], [`FlowContext::scope`]
//! or [`FlowContext::run`]) the slot belongs to that future or closure and
//! follows it across `.await` points and worker threads. Outside of any tokio
//! runtime the slot is thread-local, which is what plain synchronous call
//! chains need.
//!
//! Inside a runtime but outside a task-local scope there is no slot at all:
//! a worker thread is shared by unrelated tasks, so its thread-local cannot
//! stand in for the flow of any one of them. Reads see no ambient scope and
//! scopes cannot be created there.
//!
//! Independently scheduled work does not inherit the slot: a future passed to
//! `tokio::spawn` or a closure passed to `std::thread::spawn` starts with no
//! ambient scope unless the caller hands it a [`FlowContext`].

use crate::types::ScopeId;
use std::cell::Cell;
use std::future::Future;
use tokio::runtime::Handle;

thread_local! {
    static THREAD_SLOT: Cell<Option<ScopeId>> = const { Cell::new(None) };
}

tokio::task_local! {
    static TASK_SLOT: Cell<Option<ScopeId>>;
}

/// Runs `f` on the current flow's slot, or returns `None` when the caller is
/// inside a tokio runtime without a task-local scope.
fn with_slot<R>(f: impl FnOnce(&Cell<Option<ScopeId>>) -> R) -> Option<R> {
    if TASK_SLOT.try_with(|_| ()).is_ok() {
        Some(TASK_SLOT.with(f))
    } else if Handle::try_current().is_ok() {
        None
    } else {
        Some(THREAD_SLOT.with(f))
    }
}

/// Whether the caller has a slot to hold an ambient scope.
pub(crate) fn is_attached() -> bool {
    with_slot(|_| ()).is_some()
}

/// Identity currently stored in this flow's slot.
pub(crate) fn current() -> Option<ScopeId> {
    with_slot(Cell::get).flatten()
}

/// Stores `id` in this flow's slot. Returns false if there is no slot.
pub(crate) fn set_current(id: Option<ScopeId>) -> bool {
    with_slot(|slot| slot.set(id)).is_some()
}

/// Snapshot of the ambient identity, for carrying it into forked work.
///
/// Carrying a context into concurrent work shares the scope's sessions with
/// that work. Only do this when the fork is awaited before the scope is
/// disposed; otherwise disposal will report an ordering violation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowContext {
    scope: Option<ScopeId>,
}

impl FlowContext {
    /// Captures the caller's ambient identity. Captures nothing while the
    /// ambient scope is suppressed.
    #[must_use]
    pub fn capture() -> Self {
        Self { scope: current() }
    }

    /// A context with no ambient scope.
    #[must_use]
    pub const fn empty() -> Self {
        Self { scope: None }
    }

    /// The captured identity.
    #[must_use]
    pub fn scope_id(&self) -> Option<ScopeId> {
        self.scope
    }

    /// Runs `future` with its own slot, seeded with this context.
    pub fn scope<F>(self, future: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        TASK_SLOT.scope(Cell::new(self.scope), future)
    }

    /// Runs `f` with its own slot, seeded with this context.
    pub fn run<R>(self, f: impl FnOnce() -> R) -> R {
        TASK_SLOT.sync_scope(Cell::new(self.scope), f)
    }
}

/// Runs `future` as one logical flow that starts with the caller's ambient
/// scope.
///
/// Scopes created inside the future stay ambient across its `.await` points
/// even when a multi-threaded runtime resumes it on another worker.
pub fn flow<F>(future: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    FlowContext::capture().scope(future)
}
