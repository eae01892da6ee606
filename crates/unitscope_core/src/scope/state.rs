//! Shared scope state and the borrowed ambient view of it.

use crate::error::{ScopeError, ScopeResult};
use crate::registry::SharedRegistry;
use crate::session::{Session, SessionHandle};
use crate::types::{RegistryId, ScopeId};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// State of one scope.
///
/// Owned by its [`UnitScope`](super::UnitScope); the ambient table and child
/// scopes only hold `Weak` references.
pub(crate) struct ScopeState {
    pub(crate) id: ScopeId,
    pub(crate) read_only: bool,
    pub(crate) nested: bool,
    pub(crate) parent: Option<Weak<ScopeState>>,
    pub(crate) registry: SharedRegistry,
    pub(crate) registry_id: RegistryId,
    pub(crate) completed: AtomicBool,
    pub(crate) disposed: AtomicBool,
}

impl ScopeState {
    pub(crate) fn id(&self) -> ScopeId {
        self.id
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_not_disposed(&self) -> ScopeResult<()> {
        if self.is_disposed() {
            Err(ScopeError::disposed("UnitScope"))
        } else {
            Ok(())
        }
    }

    pub(crate) fn get<S: Session>(&self) -> ScopeResult<SessionHandle<S>> {
        self.ensure_not_disposed()?;
        self.registry.lock().get::<S>()
    }

    pub(crate) fn get_keyed<S: Session>(
        &self,
        discriminator: impl Into<String>,
    ) -> ScopeResult<SessionHandle<S>> {
        self.ensure_not_disposed()?;
        self.registry.lock().get_keyed::<S>(discriminator)
    }
}

impl fmt::Debug for ScopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeState")
            .field("id", &self.id)
            .field("read_only", &self.read_only)
            .field("nested", &self.nested)
            .field("registry", &self.registry_id)
            .field("completed", &self.is_completed())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// The ambient scope, as seen by code that did not create it.
///
/// It can resolve sessions but cannot save or dispose the scope.
#[derive(Debug, Clone)]
pub struct AmbientScope {
    state: Arc<ScopeState>,
}

impl AmbientScope {
    pub(crate) fn new(state: Arc<ScopeState>) -> Self {
        Self { state }
    }

    /// Identity of the scope.
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.state.id
    }

    /// Whether the scope is read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.state.read_only
    }

    /// Whether the scope joined an enclosing scope.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.state.nested
    }

    /// Registry the scope resolves sessions from.
    #[must_use]
    pub fn registry_id(&self) -> RegistryId {
        self.state.registry_id
    }

    /// Returns the scope's session of type `S`, creating it on first request.
    pub fn get<S: Session>(&self) -> ScopeResult<SessionHandle<S>> {
        self.state.get::<S>()
    }

    /// Returns the scope's session of type `S` bound to `discriminator`.
    pub fn get_keyed<S: Session>(
        &self,
        discriminator: impl Into<String>,
    ) -> ScopeResult<SessionHandle<S>> {
        self.state.get_keyed::<S>(discriminator)
    }
}
