//! Ambient scope propagation.
//!
//! The store keeps two things apart:
//! - a lightweight per-flow slot holding the current [`ScopeId`] (see
//!   [`flow`](self::flow) for how the slot propagates), and
//! - a process-wide table from [`ScopeId`] to a `Weak` reference to the
//!   scope's state.
//!
//! The table never keeps a scope alive. A flow whose slot names a scope
//! that is no longer in the table simply sees no ambient scope.

mod flow;
mod locator;

pub use flow::{flow, FlowContext};
pub use locator::AmbientSessionLocator;

use crate::scope::{AmbientScope, ScopeState};
use crate::types::ScopeId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Weak};
use tracing::warn;

static SCOPES: LazyLock<Mutex<HashMap<ScopeId, Weak<ScopeState>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Process-wide ambient scope store.
pub struct AmbientStore;

impl AmbientStore {
    /// Makes `scope` the ambient scope of the current flow.
    pub(crate) fn set_ambient(scope: &Arc<ScopeState>) {
        let id = scope.id();
        if flow::current() == Some(id) {
            return;
        }

        if !flow::set_current(Some(id)) {
            warn!(scope = %id, "no ambient slot in this context; run the work inside flow() to keep the scope ambient");
            return;
        }

        let mut scopes = SCOPES.lock();
        scopes.retain(|_, weak| weak.strong_count() > 0);
        scopes.entry(id).or_insert_with(|| Arc::downgrade(scope));
    }

    /// Returns the ambient scope of the current flow, if any.
    #[must_use]
    pub fn get_ambient() -> Option<AmbientScope> {
        Self::ambient_state().map(AmbientScope::new)
    }

    pub(crate) fn ambient_state() -> Option<Arc<ScopeState>> {
        let id = flow::current()?;
        let state = SCOPES.lock().get(&id).and_then(Weak::upgrade);
        if state.is_none() {
            // Either the scope was dropped without being disposed, or it was
            // disposed by another flow that shared this identity. Its sessions
            // were not completed by this flow.
            warn!(
                scope = %id,
                "ambient scope identity has no live scope; it was dropped without disposal or disposed by a forked flow"
            );
        }
        state
    }

    /// Clears the current flow's ambient scope and forgets its table entry.
    pub(crate) fn remove_ambient() {
        if let Some(id) = flow::current() {
            flow::set_current(None);
            SCOPES.lock().remove(&id);
        }
    }

    /// Drops the table entry of `id` without touching any flow's slot.
    pub(crate) fn evict(id: ScopeId) {
        SCOPES.lock().remove(&id);
    }

    /// Hides the ambient scope from the current flow.
    ///
    /// Use this before starting work that must not share the caller's scope.
    /// Releasing the returned handle restores nothing; call
    /// [`SuppressedAmbient::restore`] to bring the scope back.
    #[must_use = "call restore() on the handle to reinstate the hidden scope"]
    pub fn suppress_ambient() -> SuppressedAmbient {
        let hidden = flow::current();
        flow::set_current(None);
        SuppressedAmbient { hidden }
    }

    /// Whether the caller can hold an ambient scope.
    ///
    /// False inside a tokio runtime when the running code was not entered
    /// through [`flow`], [`FlowContext::scope`] or [`FlowContext::run`].
    #[must_use]
    pub fn has_flow_slot() -> bool {
        flow::is_attached()
    }

    /// Identity of the current flow's ambient scope, without checking that
    /// the scope is still alive.
    #[must_use]
    pub fn current_id() -> Option<ScopeId> {
        flow::current()
    }

    /// Number of scopes in the table that are still alive, across all flows.
    #[must_use]
    pub fn live_scope_count() -> usize {
        SCOPES
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

/// Handle returned by [`AmbientStore::suppress_ambient`].
#[derive(Debug)]
pub struct SuppressedAmbient {
    hidden: Option<ScopeId>,
}

impl SuppressedAmbient {
    /// Identity of the scope that was hidden, if there was one.
    #[must_use]
    pub fn hidden_scope(&self) -> Option<ScopeId> {
        self.hidden
    }

    /// Reinstates the hidden scope as ambient.
    ///
    /// Returns false if nothing was hidden, if the hidden scope is gone or
    /// disposed, or if another scope became ambient in the meantime.
    pub fn restore(self) -> bool {
        let Some(id) = self.hidden else {
            return false;
        };

        if let Some(current) = flow::current() {
            warn!(hidden = %id, current = %current, "cannot restore suppressed scope while another scope is ambient");
            return false;
        }

        let state = SCOPES.lock().get(&id).and_then(Weak::upgrade);
        match state {
            Some(state) if !state.is_disposed() => flow::set_current(Some(id)),
            _ => false,
        }
    }
}
