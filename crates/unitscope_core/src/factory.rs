//! Scope factory.
//!
//! Services depend on a [`UnitScopeFactory`] rather than constructing scopes
//! directly, so the session construction strategy is configured once.

use crate::ambient::{AmbientStore, SuppressedAmbient};
use crate::config::{IsolationLevel, JoinOption, ScopeOptions};
use crate::error::ScopeResult;
use crate::scope::{ReadOnlyUnitScope, UnitScope};
use crate::session::{SessionFactory, SessionKey, SessionResult};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Creates scopes that share one session construction strategy.
#[derive(Clone, Default)]
pub struct UnitScopeFactory {
    session_factory: Option<Arc<dyn SessionFactory>>,
}

impl UnitScopeFactory {
    /// A factory whose scopes build sessions with [`Session::open_default`](crate::Session::open_default).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory whose scopes ask `session_factory` first.
    #[must_use]
    pub fn with_session_factory(session_factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            session_factory: Some(session_factory),
        }
    }

    /// A factory backed by a closure.
    ///
    /// ```rust,ignore
    /// let store = MemoryStore::new();
    /// let factory = UnitScopeFactory::from_fn(move |key| {
    ///     if key.is::<MemorySession>() {
    ///         return Ok(Some(Box::new(MemorySession::new(store.clone()))));
    ///     }
    ///     Ok(None)
    /// });
    /// ```
    #[must_use]
    pub fn from_fn<F>(create: F) -> Self
    where
        F: Fn(&SessionKey) -> SessionResult<Option<Box<dyn Any + Send>>> + Send + Sync + 'static,
    {
        Self::with_session_factory(Arc::new(create))
    }

    /// Creates a read/write scope.
    pub fn create(&self, join_option: JoinOption) -> ScopeResult<UnitScope> {
        self.create_with_options(ScopeOptions::new().join_option(join_option))
    }

    /// Creates a read-only scope.
    pub fn create_read_only(&self, join_option: JoinOption) -> ScopeResult<ReadOnlyUnitScope> {
        ReadOnlyUnitScope::new(join_option, None, self.session_factory.clone())
    }

    /// Creates an isolated read/write scope that opens an explicit
    /// transaction on every session.
    pub fn create_with_transaction(&self, level: IsolationLevel) -> ScopeResult<UnitScope> {
        self.create_with_options(ScopeOptions::with_transaction(level))
    }

    /// Creates an isolated read-only scope that opens an explicit transaction
    /// on every session.
    pub fn create_read_only_with_transaction(
        &self,
        level: IsolationLevel,
    ) -> ScopeResult<ReadOnlyUnitScope> {
        ReadOnlyUnitScope::new(
            JoinOption::ForceCreateNew,
            Some(level),
            self.session_factory.clone(),
        )
    }

    /// Creates a scope from explicit options.
    ///
    /// # Errors
    ///
    /// See [`UnitScope::new`].
    pub fn create_with_options(&self, options: ScopeOptions) -> ScopeResult<UnitScope> {
        UnitScope::new(options, self.session_factory.clone())
    }

    /// Hides the ambient scope; see [`AmbientStore::suppress_ambient`].
    #[must_use = "call restore() on the handle to reinstate the hidden scope"]
    pub fn suppress_ambient(&self) -> SuppressedAmbient {
        AmbientStore::suppress_ambient()
    }
}

impl fmt::Debug for UnitScopeFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitScopeFactory")
            .field("session_factory", &self.session_factory.is_some())
            .finish()
    }
}
