//! Scope configuration.

use std::fmt;

/// How a new scope relates to the scope that is ambient when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JoinOption {
    /// Join the ambient scope if there is one, sharing its sessions.
    #[default]
    JoinExisting,
    /// Always start a fresh session registry, even inside another scope.
    ForceCreateNew,
}

/// Isolation level of an explicit transaction opened on every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Level chosen by the backing store.
    Unspecified,
    /// Pending changes of more highly isolated transactions cannot be overwritten.
    Chaos,
    /// Dirty reads are possible.
    ReadUncommitted,
    /// Only committed data is read.
    ReadCommitted,
    /// Rows read are locked against updates until the transaction ends.
    RepeatableRead,
    /// Range locks prevent phantom rows.
    Serializable,
    /// Reads see a versioned snapshot taken at transaction start.
    Snapshot,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unspecified => "unspecified",
            Self::Chaos => "chaos",
            Self::ReadUncommitted => "read uncommitted",
            Self::ReadCommitted => "read committed",
            Self::RepeatableRead => "repeatable read",
            Self::Serializable => "serializable",
            Self::Snapshot => "snapshot",
        };
        f.write_str(name)
    }
}

/// Options for constructing a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScopeOptions {
    /// Whether to join the ambient scope or force a new one.
    pub join_option: JoinOption,

    /// Whether the scope only reads. Sessions of a read-only scope have
    /// change tracking disabled and are never asked to persist.
    pub read_only: bool,

    /// Explicit transaction isolation level. Requires
    /// [`JoinOption::ForceCreateNew`].
    pub isolation_level: Option<IsolationLevel>,
}

impl ScopeOptions {
    /// Creates options with default values (join, read/write, no explicit
    /// transaction).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the join option.
    #[must_use]
    pub const fn join_option(mut self, value: JoinOption) -> Self {
        self.join_option = value;
        self
    }

    /// Sets whether the scope is read-only.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets the explicit transaction isolation level.
    #[must_use]
    pub const fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Shorthand for an isolated scope with an explicit transaction.
    #[must_use]
    pub const fn with_transaction(level: IsolationLevel) -> Self {
        Self {
            join_option: JoinOption::ForceCreateNew,
            read_only: false,
            isolation_level: Some(level),
        }
    }
}
