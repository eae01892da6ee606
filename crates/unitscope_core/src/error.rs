//! Error types for UnitScope core.

use crate::session::{SessionError, SessionKey};
use crate::types::ScopeId;
use thiserror::Error;

/// Result type for scope and registry operations.
pub type ScopeResult<T> = Result<T, ScopeError>;

/// Errors that can occur while creating, using or disposing scopes.
#[derive(Debug, Error)]
pub enum ScopeError {
    /// Incompatible constructor options.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the conflict.
        message: String,
    },

    /// Illegal nesting, such as a read/write scope joining a read-only one.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the illegal state.
        message: String,
    },

    /// Object used after it was disposed.
    #[error("{object} has been disposed")]
    ObjectDisposed {
        /// Name of the disposed object.
        object: &'static str,
    },

    /// Commit, rollback or save was called a second time.
    #[error("already completed: {message}")]
    AlreadyCompleted {
        /// Which operation was repeated.
        message: String,
    },

    /// A scope was disposed while another scope was ambient.
    ///
    /// Scopes form a stack and must be disposed in the reverse order of
    /// their creation. This usually means a scope leaked into work that
    /// outlived it.
    #[error(
        "scope {scope} disposed out of creation order (ambient scope is {})",
        display_current(.current)
    )]
    OrderingViolation {
        /// The scope being disposed.
        scope: ScopeId,
        /// The scope that was ambient at the time.
        current: Option<ScopeId>,
    },

    /// A session collaborator failed.
    #[error("session {key} failed: {source}")]
    Session {
        /// Key of the failing session.
        key: SessionKey,
        /// The collaborator's error.
        #[source]
        source: SessionError,
    },
}

fn display_current(current: &Option<ScopeId>) -> String {
    match current {
        Some(id) => id.to_string(),
        None => "none".to_string(),
    }
}

impl ScopeError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an object disposed error.
    pub const fn disposed(object: &'static str) -> Self {
        Self::ObjectDisposed { object }
    }

    /// Creates an already completed error.
    pub fn already_completed(message: impl Into<String>) -> Self {
        Self::AlreadyCompleted {
            message: message.into(),
        }
    }

    /// Creates a session error for the given key.
    pub fn session(key: SessionKey, source: SessionError) -> Self {
        Self::Session { key, source }
    }

    /// Returns true for [`ScopeError::ObjectDisposed`].
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::ObjectDisposed { .. })
    }

    /// Returns true for [`ScopeError::AlreadyCompleted`].
    #[must_use]
    pub fn is_already_completed(&self) -> bool {
        matches!(self, Self::AlreadyCompleted { .. })
    }

    /// Returns true for [`ScopeError::OrderingViolation`].
    #[must_use]
    pub fn is_ordering_violation(&self) -> bool {
        matches!(self, Self::OrderingViolation { .. })
    }
}
