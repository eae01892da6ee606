//! Read-only unit-of-work scope.

use super::UnitScope;
use crate::config::{IsolationLevel, JoinOption, ScopeOptions};
use crate::error::ScopeResult;
use crate::session::{Session, SessionFactory, SessionHandle};
use crate::types::{RegistryId, ScopeId};
use std::any::Any;
use std::sync::Arc;

/// A scope that only reads.
///
/// Its sessions have change tracking disabled. There is no `save`: a
/// top-level read-only scope commits any explicit transaction when it is
/// disposed.
#[derive(Debug)]
pub struct ReadOnlyUnitScope {
    inner: UnitScope,
}

impl ReadOnlyUnitScope {
    /// Creates a read-only scope and makes it ambient.
    ///
    /// # Errors
    ///
    /// [`ScopeError::InvalidArgument`](crate::ScopeError::InvalidArgument) if
    /// an isolation level is combined with [`JoinOption::JoinExisting`], and
    /// [`ScopeError::InvalidState`](crate::ScopeError::InvalidState) in the
    /// cases [`UnitScope::new`] rejects.
    pub fn new(
        join_option: JoinOption,
        isolation_level: Option<IsolationLevel>,
        session_factory: Option<Arc<dyn SessionFactory>>,
    ) -> ScopeResult<Self> {
        let mut options = ScopeOptions::new().join_option(join_option).read_only(true);
        if let Some(level) = isolation_level {
            options = options.isolation_level(level);
        }
        UnitScope::new(options, session_factory).map(|inner| Self { inner })
    }

    /// Identity of this scope.
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.inner.id()
    }

    /// Whether this scope joined an enclosing scope.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.inner.is_nested()
    }

    /// Identity of the enclosing scope, if it is still alive.
    #[must_use]
    pub fn parent_id(&self) -> Option<ScopeId> {
        self.inner.parent_id()
    }

    /// Whether the scope has been completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.inner.is_completed()
    }

    /// Whether the scope has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Registry this scope resolves sessions from.
    #[must_use]
    pub fn registry_id(&self) -> RegistryId {
        self.inner.registry_id()
    }

    /// Returns this scope's session of type `S`.
    pub fn get<S: Session>(&self) -> ScopeResult<SessionHandle<S>> {
        self.inner.get::<S>()
    }

    /// Returns this scope's session of type `S` bound to `discriminator`.
    pub fn get_keyed<S: Session>(
        &self,
        discriminator: impl Into<String>,
    ) -> ScopeResult<SessionHandle<S>> {
        self.inner.get_keyed::<S>(discriminator)
    }

    /// See [`UnitScope::refresh_in_parent`].
    pub fn refresh_in_parent(&self, entities: &[&dyn Any]) -> ScopeResult<usize> {
        self.inner.refresh_in_parent(entities)
    }

    /// See [`UnitScope::dispose`].
    pub fn dispose(&mut self) -> ScopeResult<()> {
        self.inner.dispose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambient::{AmbientStore, FlowContext};
    use crate::test_support::LedgerSession;

    #[test]
    fn sessions_are_not_tracked() {
        FlowContext::empty().run(|| {
            let mut scope = ReadOnlyUnitScope::new(JoinOption::JoinExisting, None, None).unwrap();
            let session = scope.get::<LedgerSession>().unwrap();
            assert!(!session.lock().tracking);
            assert!(AmbientStore::get_ambient().unwrap().is_read_only());
            scope.dispose().unwrap();
            assert_eq!(session.lock().persist_calls, 0);
        });
    }

    #[test]
    fn explicit_transaction_commits_on_dispose() {
        FlowContext::empty().run(|| {
            let mut scope = ReadOnlyUnitScope::new(
                JoinOption::ForceCreateNew,
                Some(IsolationLevel::Snapshot),
                None,
            )
            .unwrap();
            let journal = scope.get::<LedgerSession>().unwrap().lock().journal.clone();
            assert!(scope.parent_id().is_none());
            assert!(!scope.is_completed());
            scope.dispose().unwrap();
            assert!(scope.is_completed());
            assert_eq!(journal.commits(), 1);
            assert_eq!(journal.rollbacks(), 0);
        });
    }

    #[test]
    fn joins_a_read_write_scope() {
        FlowContext::empty().run(|| {
            let mut outer = UnitScope::new(ScopeOptions::default(), None).unwrap();
            let mut inner = ReadOnlyUnitScope::new(JoinOption::JoinExisting, None, None).unwrap();
            assert!(inner.is_nested());
            assert_eq!(inner.registry_id(), outer.registry_id());
            assert_eq!(inner.parent_id(), Some(outer.id()));
            assert!(!inner.is_completed());
            inner.dispose().unwrap();
            assert!(inner.is_completed());
            outer.dispose().unwrap();
        });
    }
}
