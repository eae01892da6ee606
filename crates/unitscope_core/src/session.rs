//! Resource session collaborator contracts.
//!
//! A scope never talks to a database directly. It coordinates *sessions*:
//! externally supplied objects that buffer changes, persist them on request
//! and optionally run inside an explicit transaction. This module defines
//! what a session must offer and how the registry identifies one.

use crate::config::IsolationLevel;
use parking_lot::Mutex;
use std::any::{type_name, Any, TypeId};
use std::error::Error as StdError;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Result type for collaborator calls.
pub type SessionResult<T> = Result<T, SessionError>;

/// Shared handle to a session owned by a registry.
///
/// Do not hold the lock while saving or disposing the owning scope; the
/// registry locks every session it commits.
pub type SessionHandle<S> = Arc<Mutex<S>>;

/// Error reported by a session, a transaction or a session factory.
#[derive(Debug)]
pub struct SessionError {
    message: String,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl SessionError {
    /// Creates an error with a message only.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error that wraps an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for SessionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// Identifies one session inside a registry.
///
/// The key is the session's type plus an optional discriminator, so two
/// sessions of the same type bound to different connections can coexist.
#[derive(Debug, Clone)]
pub struct SessionKey {
    type_id: TypeId,
    type_name: &'static str,
    discriminator: Option<String>,
}

impl SessionKey {
    /// Key for the default session of type `S`.
    #[must_use]
    pub fn of<S: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<S>(),
            type_name: type_name::<S>(),
            discriminator: None,
        }
    }

    /// Key for a session of type `S` bound to `discriminator`.
    #[must_use]
    pub fn keyed<S: 'static>(discriminator: impl Into<String>) -> Self {
        Self {
            discriminator: Some(discriminator.into()),
            ..Self::of::<S>()
        }
    }

    /// Returns true if this key names a session of type `S`.
    #[must_use]
    pub fn is<S: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<S>()
    }

    /// Returns the session's type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the discriminator, if any.
    #[must_use]
    pub fn discriminator(&self) -> Option<&str> {
        self.discriminator.as_deref()
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.discriminator == other.discriminator
    }
}

impl Eq for SessionKey {}

impl Hash for SessionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.discriminator.hash(state);
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.discriminator {
            Some(d) => write!(f, "{}[{}]", self.type_name, d),
            None => f.write_str(self.type_name),
        }
    }
}

/// Identity of a tracked entity within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    /// Entity set (table, collection) the entity belongs to.
    pub entity_set: String,
    /// Primary key rendered as a string.
    pub id: String,
}

impl EntityKey {
    /// Creates an entity key.
    pub fn new(entity_set: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_set: entity_set.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_set, self.id)
    }
}

/// Change-tracking state of an entity in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    /// Tracked and identical to the backing store.
    Unchanged,
    /// New, not yet persisted.
    Added,
    /// Loaded and then changed in memory.
    Modified,
    /// Marked for deletion.
    Deleted,
}

/// Read access to a session's first-level cache.
///
/// Used only by [`UnitScope::refresh_in_parent`](crate::UnitScope::refresh_in_parent).
pub trait StateInspector {
    /// Returns the identity key of `entity` if it is an entity this session
    /// knows how to key.
    fn identity_of(&self, entity: &dyn Any) -> Option<EntityKey>;

    /// Returns the tracking state of the entity with `key`, or `None` if the
    /// session does not track it.
    fn state_of(&self, key: &EntityKey) -> Option<EntryState>;

    /// Reloads the tracked entity with `key` from the backing store,
    /// overwriting its in-memory values.
    fn reload(&mut self, key: &EntityKey) -> SessionResult<()>;
}

/// An explicit transaction opened on a session.
pub trait SessionTransaction: Send {
    /// Commits and closes the transaction.
    fn commit(self: Box<Self>) -> SessionResult<()>;

    /// Rolls back and closes the transaction.
    fn rollback(self: Box<Self>) -> SessionResult<()>;
}

/// A resource session managed by a scope.
pub trait Session: Send + 'static {
    /// Default constructor, used when no [`SessionFactory`] provides the
    /// session.
    fn open_default() -> SessionResult<Self>
    where
        Self: Sized,
    {
        Err(SessionError::new(format!(
            "{} has no default constructor; supply a SessionFactory",
            type_name::<Self>()
        )))
    }

    /// Enables or disables local change tracking.
    fn set_change_tracking(&mut self, enabled: bool);

    /// Opens the underlying connection and begins an explicit transaction.
    fn begin_transaction(
        &mut self,
        level: IsolationLevel,
    ) -> SessionResult<Box<dyn SessionTransaction>>;

    /// Writes pending changes to the backing store and returns the number of
    /// affected entities.
    fn persist(&mut self) -> SessionResult<usize>;

    /// Releases the session's resources.
    fn dispose(&mut self) -> SessionResult<()> {
        Ok(())
    }

    /// Returns the change-tracking inspector, if the session has one.
    fn inspector(&mut self) -> Option<&mut dyn StateInspector> {
        None
    }
}

/// Builds sessions that need construction arguments.
///
/// Returning `Ok(None)` defers to [`Session::open_default`]. The boxed value
/// must be the concrete session type named by `key`.
pub trait SessionFactory: Send + Sync {
    /// Creates the session identified by `key`.
    fn create_session(&self, key: &SessionKey) -> SessionResult<Option<Box<dyn Any + Send>>>;
}

impl<F> SessionFactory for F
where
    F: Fn(&SessionKey) -> SessionResult<Option<Box<dyn Any + Send>>> + Send + Sync,
{
    fn create_session(&self, key: &SessionKey) -> SessionResult<Option<Box<dyn Any + Send>>> {
        self(key)
    }
}
