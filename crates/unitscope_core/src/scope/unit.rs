//! Read/write unit-of-work scope.

use super::state::ScopeState;
use crate::ambient::AmbientStore;
use crate::config::{JoinOption, ScopeOptions};
use crate::error::{ScopeError, ScopeResult};
use crate::registry::SessionRegistry;
use crate::session::{EntityKey, Session, SessionFactory, SessionHandle, SessionKey};
use crate::types::{RegistryId, ScopeId};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

/// A unit of work over lazily created sessions.
///
/// Creating a scope makes it the ambient scope of the current flow. A scope
/// created with [`JoinOption::JoinExisting`] inside another scope *joins*
/// it: both resolve the same sessions, and only the outermost scope decides
/// when they are committed. A scope created with
/// [`JoinOption::ForceCreateNew`] gets sessions of its own.
///
/// Scopes must be disposed in the reverse order of their creation. Dropping
/// a scope disposes it; call [`dispose`](Self::dispose) directly to observe
/// an ordering violation as an error.
///
/// ```rust,ignore
/// let factory = UnitScopeFactory::new();
/// let mut scope = factory.create(JoinOption::JoinExisting)?;
/// let users = scope.get::<UserSession>()?;
/// users.lock().rename(user_id, "Ada");
/// let written = scope.save()?;
/// ```
#[derive(Debug)]
pub struct UnitScope {
    state: Arc<ScopeState>,
}

impl UnitScope {
    /// Creates a scope and makes it ambient.
    ///
    /// # Errors
    ///
    /// - [`ScopeError::InvalidArgument`] if an isolation level is combined
    ///   with [`JoinOption::JoinExisting`].
    /// - [`ScopeError::InvalidState`] if a read/write scope would join a
    ///   read-only ambient scope, or if called inside a tokio runtime outside
    ///   of [`flow`](crate::flow).
    pub fn new(
        options: ScopeOptions,
        session_factory: Option<Arc<dyn SessionFactory>>,
    ) -> ScopeResult<Self> {
        if options.isolation_level.is_some() && options.join_option == JoinOption::JoinExisting {
            return Err(ScopeError::invalid_argument(
                "an explicit isolation level requires JoinOption::ForceCreateNew; \
                 a joined scope reuses sessions whose transactions are already decided",
            ));
        }

        if !AmbientStore::has_flow_slot() {
            return Err(ScopeError::invalid_state(
                "inside a tokio runtime a scope needs a flow of its own; \
                 wrap the work in flow() or FlowContext::scope()",
            ));
        }

        let ambient = AmbientStore::ambient_state();

        let joined = match &ambient {
            Some(parent) if options.join_option == JoinOption::JoinExisting => {
                if parent.read_only && !options.read_only {
                    return Err(ScopeError::invalid_state(
                        "cannot nest a read/write scope within a read-only scope",
                    ));
                }
                Some((Arc::clone(&parent.registry), parent.registry_id))
            }
            _ => None,
        };

        let nested = joined.is_some();
        let (registry, registry_id) = match joined {
            Some(shared) => shared,
            None => {
                let registry = SessionRegistry::new(
                    options.read_only,
                    options.isolation_level,
                    session_factory,
                );
                let id = registry.id();
                (registry.into_shared(), id)
            }
        };

        let state = Arc::new(ScopeState {
            id: ScopeId::new(),
            read_only: options.read_only,
            nested,
            parent: ambient.as_ref().map(Arc::downgrade),
            registry,
            registry_id,
            completed: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        });

        AmbientStore::set_ambient(&state);

        debug!(
            scope = %state.id,
            registry = %registry_id,
            nested,
            read_only = options.read_only,
            parent = ?ambient.as_ref().map(|p| p.id),
            "scope created"
        );

        Ok(Self { state })
    }

    /// Identity of this scope.
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.state.id
    }

    /// Whether this scope is read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.state.read_only
    }

    /// Whether this scope joined an enclosing scope.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.state.nested
    }

    /// Whether save, or a disposal-triggered completion, has run.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state.is_completed()
    }

    /// Whether the scope has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.state.is_disposed()
    }

    /// Registry this scope resolves sessions from. Joined scopes report their
    /// parent's registry.
    #[must_use]
    pub fn registry_id(&self) -> RegistryId {
        self.state.registry_id
    }

    /// Identity of the scope that was ambient when this one was created.
    #[must_use]
    pub fn parent_id(&self) -> Option<ScopeId> {
        self.state
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|parent| parent.id)
    }

    /// Returns this scope's session of type `S`, creating it on first request.
    pub fn get<S: Session>(&self) -> ScopeResult<SessionHandle<S>> {
        self.state.get::<S>()
    }

    /// Returns this scope's session of type `S` bound to `discriminator`.
    pub fn get_keyed<S: Session>(
        &self,
        discriminator: impl Into<String>,
    ) -> ScopeResult<SessionHandle<S>> {
        self.state.get_keyed::<S>(discriminator)
    }

    /// Commits the scope's sessions and returns the number of affected
    /// entities.
    ///
    /// A joined scope commits nothing and returns `0`: the outermost scope
    /// commits the shared sessions. Either way the scope is completed.
    ///
    /// # Errors
    ///
    /// - [`ScopeError::ObjectDisposed`] after disposal.
    /// - [`ScopeError::AlreadyCompleted`] on a second call. A scope wraps a
    ///   single business transaction; saving it twice means the operation
    ///   should be split into two scopes.
    /// - [`ScopeError::Session`] with the last session failure.
    pub fn save(&mut self) -> ScopeResult<usize> {
        self.state.ensure_not_disposed()?;
        if self.state.is_completed() {
            return Err(ScopeError::already_completed(format!(
                "save called more than once on {}",
                self.state.id
            )));
        }

        let result = if self.state.nested {
            Ok(0)
        } else {
            self.state.registry.lock().commit()
        };

        self.state.completed.store(true, Ordering::SeqCst);
        result
    }

    /// Reloads entities in the parent scope's sessions after this scope
    /// persisted them.
    ///
    /// A scope with its own registry tracks entities independently of its
    /// parent, so after it saves, the parent's cached copies are stale. For
    /// every session created in both scopes, each entity in `entities` that
    /// the parent tracks as [`EntryState::Unchanged`](crate::EntryState) is
    /// reloaded from the store; entities the parent modified are left alone.
    ///
    /// Returns the number of parent entries reloaded. Does nothing in a joined
    /// scope or a scope without a parent.
    pub fn refresh_in_parent(&self, entities: &[&dyn Any]) -> ScopeResult<usize> {
        self.state.ensure_not_disposed()?;

        if self.state.nested || entities.is_empty() {
            return Ok(0);
        }
        let Some(parent) = self.state.parent.as_ref().and_then(Weak::upgrade) else {
            return Ok(0);
        };

        let identities: Vec<(SessionKey, Vec<EntityKey>)> = {
            let registry = self.state.registry.lock();
            registry
                .keys()
                .map(|key| (key.clone(), registry.identities(key, entities)))
                .collect()
        };

        let parent_registry = parent.registry.lock();
        let mut refreshed = 0;

        for (key, entity_keys) in identities {
            if !parent_registry.contains_key(&key) {
                continue;
            }
            for entity_key in &entity_keys {
                if parent_registry.reload_if_unchanged(&key, entity_key)? {
                    refreshed += 1;
                }
            }
        }

        debug!(scope = %self.state.id, parent = %parent.id, refreshed, "refreshed parent scope");
        Ok(refreshed)
    }

    /// Disposes the scope.
    ///
    /// A top-level scope that was not saved is committed if read-only and
    /// rolled back otherwise; failures are logged, not returned. The parent
    /// scope then becomes ambient again. Calling this more than once has no
    /// effect.
    ///
    /// # Errors
    ///
    /// [`ScopeError::OrderingViolation`] if another scope is ambient, meaning
    /// scopes are being disposed out of creation order. The scope is still
    /// disposed, and the ambient scope is left as it was.
    pub fn dispose(&mut self) -> ScopeResult<()> {
        let state = &self.state;
        if state.is_disposed() {
            return Ok(());
        }

        if state.nested {
            state.completed.store(true, Ordering::SeqCst);
        } else {
            let mut registry = state.registry.lock();
            if !state.completed.swap(true, Ordering::SeqCst) {
                let result = if state.read_only {
                    registry.commit().map(|_| ())
                } else {
                    // Disposing an unsaved read/write scope means the work did
                    // not finish.
                    registry.rollback()
                };
                if let Err(error) = result {
                    warn!(scope = %state.id, %error, "completion during scope disposal failed");
                }
            }
            registry.dispose();
        }

        let current = AmbientStore::current_id();
        if current != Some(state.id) {
            state.disposed.store(true, Ordering::SeqCst);
            AmbientStore::evict(state.id);
            return Err(ScopeError::OrderingViolation {
                scope: state.id,
                current,
            });
        }

        AmbientStore::remove_ambient();

        if let Some(parent) = &state.parent {
            match parent.upgrade() {
                Some(parent) if !parent.is_disposed() => AmbientStore::set_ambient(&parent),
                _ => warn!(
                    scope = %state.id,
                    "parent scope was disposed before this scope; the scope was probably \
                     captured by concurrent work that outlived its parent. Use \
                     suppress_ambient() before forking work that must not share the scope"
                ),
            }
        }

        state.disposed.store(true, Ordering::SeqCst);
        debug!(scope = %state.id, "scope disposed");
        Ok(())
    }
}

impl Drop for UnitScope {
    fn drop(&mut self) {
        if let Err(error) = self.dispose() {
            error!(scope = %self.state.id, %error, "scope dropped out of creation order");
        }
    }
}
