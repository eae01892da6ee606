//! Session registry.
//!
//! A registry owns every session created for one logical transaction:
//! - It lazily creates a session the first time a session type is requested
//!   (and opens an explicit transaction on it if an isolation level was set).
//! - It hands back the same instance for every later request of that type.
//! - It commits, rolls back and disposes all of its sessions together.
//!
//! ## Best-effort completion
//!
//! Commit is not atomic across sessions. Each session is committed on its
//! own; when one fails the remaining sessions are still attempted and the
//! last error is returned once all of them have been tried. A business
//! transaction is expected to change entities in a single session, so a
//! partial commit only happens when that expectation is broken.

use crate::config::IsolationLevel;
use crate::error::{ScopeError, ScopeResult};
use crate::session::{
    EntityKey, EntryState, Session, SessionError, SessionFactory, SessionHandle, SessionKey,
    SessionResult, SessionTransaction,
};
use crate::types::RegistryId;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A registry shared between a top-level scope and the scopes nested in it.
pub type SharedRegistry = Arc<Mutex<SessionRegistry>>;

/// Object-safe view of a typed session handle.
trait ErasedSession: Send {
    fn persist(&self) -> SessionResult<usize>;
    fn dispose(&self) -> SessionResult<()>;
    fn identities(&self, entities: &[&dyn Any]) -> Vec<EntityKey>;
    fn reload_if_unchanged(&self, key: &EntityKey) -> SessionResult<bool>;
    fn as_any(&self) -> &dyn Any;
}

struct Typed<S: Session>(SessionHandle<S>);

impl<S: Session> ErasedSession for Typed<S> {
    fn persist(&self) -> SessionResult<usize> {
        self.0.lock().persist()
    }

    fn dispose(&self) -> SessionResult<()> {
        self.0.lock().dispose()
    }

    fn identities(&self, entities: &[&dyn Any]) -> Vec<EntityKey> {
        let mut session = self.0.lock();
        match session.inspector() {
            Some(inspector) => entities
                .iter()
                .filter_map(|entity| inspector.identity_of(*entity))
                .collect(),
            None => Vec::new(),
        }
    }

    fn reload_if_unchanged(&self, key: &EntityKey) -> SessionResult<bool> {
        let mut session = self.0.lock();
        let Some(inspector) = session.inspector() else {
            return Ok(false);
        };
        match inspector.state_of(key) {
            Some(EntryState::Unchanged) => {
                inspector.reload(key)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn as_any(&self) -> &dyn Any {
        &self.0
    }
}

struct SessionEntry {
    key: SessionKey,
    session: Box<dyn ErasedSession>,
    /// Open explicit transaction, only when an isolation level is set.
    transaction: Option<Box<dyn SessionTransaction>>,
}

/// Lazily created sessions of one logical transaction.
pub struct SessionRegistry {
    id: RegistryId,
    /// Sessions in creation order.
    entries: Vec<SessionEntry>,
    /// Key -> position in `entries`.
    index: HashMap<SessionKey, usize>,
    read_only: bool,
    isolation_level: Option<IsolationLevel>,
    session_factory: Option<Arc<dyn SessionFactory>>,
    completed: bool,
    disposed: bool,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new(
        read_only: bool,
        isolation_level: Option<IsolationLevel>,
        session_factory: Option<Arc<dyn SessionFactory>>,
    ) -> Self {
        Self {
            id: RegistryId::next(),
            entries: Vec::new(),
            index: HashMap::new(),
            read_only,
            isolation_level,
            session_factory,
            completed: false,
            disposed: false,
        }
    }

    /// Wraps the registry for sharing with nested scopes.
    #[must_use]
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    /// Returns the registry ID.
    #[must_use]
    pub fn id(&self) -> RegistryId {
        self.id
    }

    /// Returns true if sessions are never asked to persist.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns the configured isolation level.
    #[must_use]
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.isolation_level
    }

    /// Returns true once commit or rollback has run.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Returns true once the registry has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Returns the number of sessions created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no session has been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if a session with `key` has been created.
    #[must_use]
    pub fn contains_key(&self, key: &SessionKey) -> bool {
        self.index.contains_key(key)
    }

    /// Keys of the created sessions, in creation order.
    pub fn keys(&self) -> impl Iterator<Item = &SessionKey> {
        self.entries.iter().map(|entry| &entry.key)
    }

    /// Returns the session of type `S`, creating it on first request.
    pub fn get<S: Session>(&mut self) -> ScopeResult<SessionHandle<S>> {
        self.get_or_create(SessionKey::of::<S>())
    }

    /// Returns the session of type `S` bound to `discriminator`, creating it
    /// on first request.
    pub fn get_keyed<S: Session>(
        &mut self,
        discriminator: impl Into<String>,
    ) -> ScopeResult<SessionHandle<S>> {
        self.get_or_create(SessionKey::keyed::<S>(discriminator))
    }

    fn get_or_create<S: Session>(&mut self, key: SessionKey) -> ScopeResult<SessionHandle<S>> {
        if self.disposed {
            return Err(ScopeError::disposed("SessionRegistry"));
        }

        if let Some(&position) = self.index.get(&key) {
            return self.entries[position]
                .session
                .as_any()
                .downcast_ref::<SessionHandle<S>>()
                .cloned()
                .ok_or_else(|| {
                    ScopeError::invalid_state(format!("session {key} is registered with another type"))
                });
        }

        // First request for this key: create, configure and record it.
        let mut session = self.create_session::<S>(&key)?;

        if self.read_only {
            session.set_change_tracking(false);
        }

        let transaction = match self.isolation_level {
            Some(level) => match session.begin_transaction(level) {
                Ok(transaction) => Some(transaction),
                Err(error) => {
                    if let Err(dispose_error) = session.dispose() {
                        warn!(registry = %self.id, session = %key, error = %dispose_error, "failed to dispose session after begin_transaction failed");
                    }
                    return Err(ScopeError::session(key, error));
                }
            },
            None => None,
        };

        let handle: SessionHandle<S> = Arc::new(Mutex::new(session));

        debug!(
            registry = %self.id,
            session = %key,
            explicit_transaction = transaction.is_some(),
            "session created"
        );

        self.index.insert(key.clone(), self.entries.len());
        self.entries.push(SessionEntry {
            key,
            session: Box::new(Typed(Arc::clone(&handle))),
            transaction,
        });

        Ok(handle)
    }

    fn create_session<S: Session>(&self, key: &SessionKey) -> ScopeResult<S> {
        if let Some(factory) = &self.session_factory {
            match factory.create_session(key) {
                Ok(Some(boxed)) => {
                    return boxed.downcast::<S>().map(|session| *session).map_err(|_| {
                        ScopeError::session(
                            key.clone(),
                            SessionError::new(format!(
                                "session factory returned a value that is not a {}",
                                key.type_name()
                            )),
                        )
                    });
                }
                Ok(None) => {}
                Err(error) => return Err(ScopeError::session(key.clone(), error)),
            }
        }

        S::open_default().map_err(|error| ScopeError::session(key.clone(), error))
    }

    /// Persists every session and commits every explicit transaction.
    ///
    /// Returns the total number of affected entities. All sessions are
    /// attempted even if some fail; the last failure is returned.
    pub fn commit(&mut self) -> ScopeResult<usize> {
        self.ensure_can_complete("commit")?;

        let mut last_error = None;
        let mut affected = 0;

        for entry in &mut self.entries {
            if !self.read_only {
                match entry.session.persist() {
                    Ok(count) => affected += count,
                    Err(error) => {
                        warn!(registry = %self.id, session = %entry.key, %error, "persist failed");
                        // The session's changes never reached the store, so its
                        // transaction has nothing to keep.
                        if let Some(transaction) = entry.transaction.take() {
                            if let Err(rollback_error) = transaction.rollback() {
                                warn!(registry = %self.id, session = %entry.key, error = %rollback_error, "rollback after failed persist failed");
                            }
                        }
                        last_error = Some(ScopeError::session(entry.key.clone(), error));
                        continue;
                    }
                }
            }

            if let Some(transaction) = entry.transaction.take() {
                if let Err(error) = transaction.commit() {
                    warn!(registry = %self.id, session = %entry.key, %error, "transaction commit failed");
                    last_error = Some(ScopeError::session(entry.key.clone(), error));
                }
            }
        }

        self.completed = true;

        match last_error {
            Some(error) => Err(error),
            None => {
                debug!(registry = %self.id, affected, "registry committed");
                Ok(affected)
            }
        }
    }

    /// Rolls back every explicit transaction.
    ///
    /// Sessions without an explicit transaction need no action: nothing of
    /// theirs has reached the store yet.
    pub fn rollback(&mut self) -> ScopeResult<()> {
        self.ensure_can_complete("rollback")?;

        let mut last_error = None;

        for entry in &mut self.entries {
            if let Some(transaction) = entry.transaction.take() {
                if let Err(error) = transaction.rollback() {
                    warn!(registry = %self.id, session = %entry.key, %error, "transaction rollback failed");
                    last_error = Some(ScopeError::session(entry.key.clone(), error));
                }
            }
        }

        self.completed = true;

        match last_error {
            Some(error) => Err(error),
            None => {
                debug!(registry = %self.id, "registry rolled back");
                Ok(())
            }
        }
    }

    /// Disposes every session.
    ///
    /// If neither commit nor rollback ran, a read-only registry is committed
    /// and a read/write registry is rolled back first. Errors are logged and
    /// swallowed. Calling this more than once has no effect.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }

        if !self.completed {
            let result = if self.read_only {
                self.commit().map(|_| ())
            } else {
                self.rollback()
            };
            if let Err(error) = result {
                warn!(registry = %self.id, %error, "completion during registry disposal failed");
            }
        }

        for entry in self.entries.drain(..) {
            if let Err(error) = entry.session.dispose() {
                warn!(registry = %self.id, session = %entry.key, %error, "session dispose failed");
            }
        }

        self.index.clear();
        self.disposed = true;
    }

    /// Identity keys of `entities` as seen by the session under `key`.
    pub(crate) fn identities(&self, key: &SessionKey, entities: &[&dyn Any]) -> Vec<EntityKey> {
        match self.index.get(key) {
            Some(&position) => self.entries[position].session.identities(entities),
            None => Vec::new(),
        }
    }

    /// Reloads `entity` in the session under `key` if it is tracked as
    /// unchanged. Returns true if it was reloaded.
    pub(crate) fn reload_if_unchanged(
        &self,
        key: &SessionKey,
        entity: &EntityKey,
    ) -> ScopeResult<bool> {
        let Some(&position) = self.index.get(key) else {
            return Ok(false);
        };
        self.entries[position]
            .session
            .reload_if_unchanged(entity)
            .map_err(|error| ScopeError::session(key.clone(), error))
    }

    fn ensure_can_complete(&self, operation: &str) -> ScopeResult<()> {
        if self.disposed {
            return Err(ScopeError::disposed("SessionRegistry"));
        }
        if self.completed {
            return Err(ScopeError::already_completed(format!(
                "{operation} called on {} after it was already committed or rolled back; \
                 create a new scope to make further changes",
                self.id
            )));
        }
        Ok(())
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("id", &self.id)
            .field("sessions", &self.entries.iter().map(|e| &e.key).collect::<Vec<_>>())
            .field("read_only", &self.read_only)
            .field("isolation_level", &self.isolation_level)
            .field("completed", &self.completed)
            .field("disposed", &self.disposed)
            .finish()
    }
}
