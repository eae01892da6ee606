//! Minimal sessions for unit tests.

use crate::config::IsolationLevel;
use crate::session::{Session, SessionError, SessionResult, SessionTransaction};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counts {
    commits: usize,
    rollbacks: usize,
    fail_commit: bool,
    fail_rollback: bool,
}

/// Records what happened to the transactions of one session.
#[derive(Debug, Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<Counts>>);

impl Journal {
    pub(crate) fn commits(&self) -> usize {
        self.0.lock().commits
    }

    pub(crate) fn rollbacks(&self) -> usize {
        self.0.lock().rollbacks
    }

    /// Makes the next transaction commit fail.
    pub(crate) fn fail_next_commit(&self) {
        self.0.lock().fail_commit = true;
    }

    /// Makes the next transaction rollback fail.
    pub(crate) fn fail_next_rollback(&self) {
        self.0.lock().fail_rollback = true;
    }
}

struct JournalTransaction(Journal);

impl SessionTransaction for JournalTransaction {
    fn commit(self: Box<Self>) -> SessionResult<()> {
        let mut counts = self.0 .0.lock();
        if std::mem::take(&mut counts.fail_commit) {
            return Err(SessionError::new("journal commit failed"));
        }
        counts.commits += 1;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> SessionResult<()> {
        let mut counts = self.0 .0.lock();
        if std::mem::take(&mut counts.fail_rollback) {
            return Err(SessionError::new("journal rollback failed"));
        }
        counts.rollbacks += 1;
        Ok(())
    }
}

/// Session whose pending count is returned by `persist`.
#[derive(Debug)]
pub(crate) struct LedgerSession {
    pub(crate) pending: usize,
    pub(crate) tracking: bool,
    pub(crate) fail_persist: bool,
    pub(crate) persist_calls: usize,
    pub(crate) dispose_calls: usize,
    pub(crate) began: Option<IsolationLevel>,
    pub(crate) journal: Journal,
}

impl Default for LedgerSession {
    fn default() -> Self {
        Self {
            pending: 0,
            tracking: true,
            fail_persist: false,
            persist_calls: 0,
            dispose_calls: 0,
            began: None,
            journal: Journal::default(),
        }
    }
}

impl Session for LedgerSession {
    fn open_default() -> SessionResult<Self> {
        Ok(Self::default())
    }

    fn set_change_tracking(&mut self, enabled: bool) {
        self.tracking = enabled;
    }

    fn begin_transaction(
        &mut self,
        level: IsolationLevel,
    ) -> SessionResult<Box<dyn SessionTransaction>> {
        self.began = Some(level);
        Ok(Box::new(JournalTransaction(self.journal.clone())))
    }

    fn persist(&mut self) -> SessionResult<usize> {
        self.persist_calls += 1;
        if self.fail_persist {
            return Err(SessionError::new("ledger persist failed"));
        }
        Ok(std::mem::take(&mut self.pending))
    }

    fn dispose(&mut self) -> SessionResult<()> {
        self.dispose_calls += 1;
        Ok(())
    }
}

/// A second session type, optionally built by a factory.
#[derive(Debug, Default)]
pub(crate) struct ProbeSession {
    pub(crate) label: String,
    pub(crate) pending: usize,
    pub(crate) persist_calls: usize,
    pub(crate) journal: Journal,
}

impl ProbeSession {
    pub(crate) fn labelled(label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..Self::default()
        }
    }
}

impl Session for ProbeSession {
    fn open_default() -> SessionResult<Self> {
        Ok(Self::labelled("default"))
    }

    fn set_change_tracking(&mut self, _enabled: bool) {}

    fn begin_transaction(
        &mut self,
        _level: IsolationLevel,
    ) -> SessionResult<Box<dyn SessionTransaction>> {
        Ok(Box::new(JournalTransaction(self.journal.clone())))
    }

    fn persist(&mut self) -> SessionResult<usize> {
        self.persist_calls += 1;
        Ok(std::mem::take(&mut self.pending))
    }
}
