//! In-memory backing store and sessions.
//!
//! [`MemorySession`] behaves like a small change-tracking ORM context: it
//! caches loaded records, tracks their [`EntryState`], writes pending changes
//! on `persist` and stages those writes while an explicit transaction is
//! open. [`AuditSession`] is a second, simpler session type for tests that
//! need two sessions in one registry.
//!
//! Every session carries a [`SessionProbe`] that stays readable after the
//! session has been disposed by its registry.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use unitscope_core::{
    EntityKey, EntryState, IsolationLevel, Session, SessionError, SessionResult,
    SessionTransaction, StateInspector,
};

/// A stored entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    /// Entity set the record belongs to.
    pub entity_set: String,
    /// Primary key.
    pub id: String,
    /// Payload.
    pub value: String,
}

impl Record {
    /// Creates a record.
    pub fn new(
        entity_set: impl Into<String>,
        id: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            entity_set: entity_set.into(),
            id: id.into(),
            value: value.into(),
        }
    }

    /// Identity key of the record.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_set.clone(), self.id.clone())
    }
}

#[derive(Debug, Clone)]
enum Write {
    Put(EntityKey, String),
    Delete(EntityKey),
    Audit(String),
}

#[derive(Debug, Default)]
struct StoreInner {
    rows: HashMap<EntityKey, String>,
    audit: Vec<String>,
    writes: usize,
}

/// Shared in-memory backing store.
///
/// Cloning yields another handle to the same store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a record without counting it as a write.
    pub fn insert(&self, record: Record) {
        self.inner.lock().rows.insert(record.key(), record.value);
    }

    /// Reads a record.
    pub fn get(&self, key: &EntityKey) -> Option<Record> {
        self.inner
            .lock()
            .rows
            .get(key)
            .map(|value| Record::new(key.entity_set.clone(), key.id.clone(), value.clone()))
    }

    /// Reads the payload of a record.
    pub fn value_of(&self, key: &EntityKey) -> Option<String> {
        self.inner.lock().rows.get(key).cloned()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.inner.lock().rows.len()
    }

    /// Returns true if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().rows.is_empty()
    }

    /// Number of writes applied since the store was created.
    pub fn write_count(&self) -> usize {
        self.inner.lock().writes
    }

    /// Audit lines persisted by [`AuditSession`]s, in order.
    pub fn audit_log(&self) -> Vec<String> {
        self.inner.lock().audit.clone()
    }

    fn apply(&self, writes: Vec<Write>) {
        let mut inner = self.inner.lock();
        for write in writes {
            inner.writes += 1;
            match write {
                Write::Put(key, value) => {
                    inner.rows.insert(key, value);
                }
                Write::Delete(key) => {
                    inner.rows.remove(&key);
                }
                Write::Audit(line) => inner.audit.push(line),
            }
        }
    }
}

#[derive(Debug)]
struct ProbeCounts {
    persist_calls: usize,
    dispose_calls: usize,
    commits: usize,
    rollbacks: usize,
    transaction_level: Option<IsolationLevel>,
    tracking: bool,
}

impl Default for ProbeCounts {
    fn default() -> Self {
        Self {
            persist_calls: 0,
            dispose_calls: 0,
            commits: 0,
            rollbacks: 0,
            transaction_level: None,
            tracking: true,
        }
    }
}

/// Records what the scope machinery did to one session.
#[derive(Debug, Clone, Default)]
pub struct SessionProbe {
    counts: Arc<Mutex<ProbeCounts>>,
}

impl SessionProbe {
    /// Number of `persist` calls, including failed ones.
    pub fn persist_calls(&self) -> usize {
        self.counts.lock().persist_calls
    }

    /// Number of `dispose` calls.
    pub fn dispose_calls(&self) -> usize {
        self.counts.lock().dispose_calls
    }

    /// Number of committed explicit transactions.
    pub fn commits(&self) -> usize {
        self.counts.lock().commits
    }

    /// Number of rolled back explicit transactions.
    pub fn rollbacks(&self) -> usize {
        self.counts.lock().rollbacks
    }

    /// Isolation level of the explicit transaction, if one was begun.
    pub fn transaction_level(&self) -> Option<IsolationLevel> {
        self.counts.lock().transaction_level
    }

    /// Whether change tracking is enabled.
    pub fn is_tracking(&self) -> bool {
        self.counts.lock().tracking
    }
}

type Staging = Arc<Mutex<Vec<Write>>>;

/// Failures armed on a session and fired by its open transaction.
#[derive(Debug, Default)]
struct TransactionFaults {
    commit: Option<String>,
    rollback: Option<String>,
}

/// Explicit transaction over a [`MemoryStore`]. Writes persisted while it is
/// open are applied on commit and discarded on rollback.
struct MemoryTransaction {
    store: MemoryStore,
    staged: Staging,
    faults: Arc<Mutex<TransactionFaults>>,
    probe: SessionProbe,
}

impl SessionTransaction for MemoryTransaction {
    fn commit(self: Box<Self>) -> SessionResult<()> {
        let writes = std::mem::take(&mut *self.staged.lock());
        if let Some(message) = self.faults.lock().commit.take() {
            // The staged writes are lost with the transaction.
            return Err(SessionError::new(message));
        }
        self.store.apply(writes);
        self.probe.counts.lock().commits += 1;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> SessionResult<()> {
        self.staged.lock().clear();
        if let Some(message) = self.faults.lock().rollback.take() {
            return Err(SessionError::new(message));
        }
        self.probe.counts.lock().rollbacks += 1;
        Ok(())
    }
}

/// Hooks shared by both session types. Each armed failure fires once.
#[derive(Debug, Default)]
struct Faults {
    persist: Option<String>,
    begin: Option<String>,
    transaction: Arc<Mutex<TransactionFaults>>,
}

impl Faults {
    fn open_transaction(
        &mut self,
        store: &MemoryStore,
        probe: &SessionProbe,
        level: IsolationLevel,
    ) -> SessionResult<(Staging, Box<dyn SessionTransaction>)> {
        if let Some(message) = self.begin.take() {
            return Err(SessionError::new(message));
        }
        let staged = Staging::default();
        probe.counts.lock().transaction_level = Some(level);
        let transaction = MemoryTransaction {
            store: store.clone(),
            staged: Arc::clone(&staged),
            faults: Arc::clone(&self.transaction),
            probe: probe.clone(),
        };
        Ok((staged, Box::new(transaction)))
    }
}

#[derive(Debug, Clone)]
struct Tracked {
    value: String,
    state: EntryState,
}

/// Change-tracking session over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemorySession {
    store: MemoryStore,
    tracked: HashMap<EntityKey, Tracked>,
    tracking: bool,
    staged: Option<Staging>,
    faults: Faults,
    probe: SessionProbe,
}

impl MemorySession {
    /// Creates a session over `store`.
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            tracked: HashMap::new(),
            tracking: true,
            staged: None,
            faults: Faults::default(),
            probe: SessionProbe::default(),
        }
    }

    /// Probe for this session.
    pub fn probe(&self) -> SessionProbe {
        self.probe.clone()
    }

    /// Loads a record, serving it from the session cache when it is tracked.
    ///
    /// With change tracking disabled the record is read but not cached.
    pub fn load(&mut self, entity_set: &str, id: &str) -> Option<Record> {
        let key = EntityKey::new(entity_set, id);
        if let Some(tracked) = self.tracked.get(&key) {
            if tracked.state == EntryState::Deleted {
                return None;
            }
            return Some(Record::new(entity_set, id, tracked.value.clone()));
        }

        let record = self.store.get(&key)?;
        if self.tracking {
            self.tracked.insert(
                key,
                Tracked {
                    value: record.value.clone(),
                    state: EntryState::Unchanged,
                },
            );
        }
        Some(record)
    }

    /// Starts tracking a new record.
    pub fn add(&mut self, record: Record) {
        self.tracked.insert(
            record.key(),
            Tracked {
                value: record.value,
                state: EntryState::Added,
            },
        );
    }

    /// Changes a record. Records the session never saw are treated as new.
    pub fn update(&mut self, record: Record) {
        let key = record.key();
        let state = match self.tracked.get(&key).map(|t| t.state) {
            Some(EntryState::Added) | None => EntryState::Added,
            Some(_) => EntryState::Modified,
        };
        self.tracked.insert(
            key,
            Tracked {
                value: record.value,
                state,
            },
        );
    }

    /// Marks a record for deletion.
    pub fn remove(&mut self, key: &EntityKey) {
        let added = matches!(
            self.tracked.get(key).map(|t| t.state),
            Some(EntryState::Added)
        );
        if added {
            self.tracked.remove(key);
            return;
        }
        let value = self
            .tracked
            .get(key)
            .map(|t| t.value.clone())
            .unwrap_or_default();
        self.tracked.insert(
            key.clone(),
            Tracked {
                value,
                state: EntryState::Deleted,
            },
        );
    }

    /// Tracking state of a record.
    pub fn entry_state(&self, key: &EntityKey) -> Option<EntryState> {
        self.tracked.get(key).map(|t| t.state)
    }

    /// Cached payload of a tracked record.
    pub fn cached_value(&self, key: &EntityKey) -> Option<&str> {
        self.tracked.get(key).map(|t| t.value.as_str())
    }

    /// Number of tracked records with pending changes.
    pub fn pending_changes(&self) -> usize {
        self.tracked
            .values()
            .filter(|t| t.state != EntryState::Unchanged)
            .count()
    }

    /// Makes the next `persist` fail with `message`.
    pub fn fail_next_persist(&mut self, message: impl Into<String>) {
        self.faults.persist = Some(message.into());
    }

    /// Makes the next `begin_transaction` fail with `message`.
    pub fn fail_next_begin(&mut self, message: impl Into<String>) {
        self.faults.begin = Some(message.into());
    }

    /// Makes the next commit of this session's transaction fail with
    /// `message`.
    pub fn fail_next_commit(&mut self, message: impl Into<String>) {
        self.faults.transaction.lock().commit = Some(message.into());
    }

    /// Makes the next rollback of this session's transaction fail with
    /// `message`.
    pub fn fail_next_rollback(&mut self, message: impl Into<String>) {
        self.faults.transaction.lock().rollback = Some(message.into());
    }

    fn write(&self, writes: Vec<Write>) {
        match &self.staged {
            Some(staged) => staged.lock().extend(writes),
            None => self.store.apply(writes),
        }
    }
}

impl Session for MemorySession {
    fn set_change_tracking(&mut self, enabled: bool) {
        self.tracking = enabled;
        self.probe.counts.lock().tracking = enabled;
    }

    fn begin_transaction(
        &mut self,
        level: IsolationLevel,
    ) -> SessionResult<Box<dyn SessionTransaction>> {
        let (staged, transaction) = self.faults.open_transaction(&self.store, &self.probe, level)?;
        self.staged = Some(staged);
        Ok(transaction)
    }

    fn persist(&mut self) -> SessionResult<usize> {
        self.probe.counts.lock().persist_calls += 1;
        if let Some(message) = self.faults.persist.take() {
            return Err(SessionError::new(message));
        }

        let mut writes = Vec::new();
        self.tracked.retain(|key, tracked| match tracked.state {
            EntryState::Unchanged => true,
            EntryState::Added | EntryState::Modified => {
                writes.push(Write::Put(key.clone(), tracked.value.clone()));
                tracked.state = EntryState::Unchanged;
                true
            }
            EntryState::Deleted => {
                writes.push(Write::Delete(key.clone()));
                false
            }
        });

        let affected = writes.len();
        self.write(writes);
        Ok(affected)
    }

    fn dispose(&mut self) -> SessionResult<()> {
        self.probe.counts.lock().dispose_calls += 1;
        self.tracked.clear();
        self.staged = None;
        Ok(())
    }

    fn inspector(&mut self) -> Option<&mut dyn StateInspector> {
        Some(self)
    }
}

impl StateInspector for MemorySession {
    fn identity_of(&self, entity: &dyn Any) -> Option<EntityKey> {
        entity
            .downcast_ref::<Record>()
            .map(Record::key)
            .filter(|key| self.tracked.contains_key(key))
    }

    fn state_of(&self, key: &EntityKey) -> Option<EntryState> {
        self.entry_state(key)
    }

    fn reload(&mut self, key: &EntityKey) -> SessionResult<()> {
        let value = self
            .store
            .value_of(key)
            .ok_or_else(|| SessionError::new(format!("{key} no longer exists in the store")))?;
        self.tracked.insert(
            key.clone(),
            Tracked {
                value,
                state: EntryState::Unchanged,
            },
        );
        Ok(())
    }
}

/// Append-only audit session over a [`MemoryStore`].
#[derive(Debug)]
pub struct AuditSession {
    store: MemoryStore,
    lines: Vec<String>,
    staged: Option<Staging>,
    faults: Faults,
    probe: SessionProbe,
}

impl AuditSession {
    /// Creates a session over `store`.
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            lines: Vec::new(),
            staged: None,
            faults: Faults::default(),
            probe: SessionProbe::default(),
        }
    }

    /// Probe for this session.
    pub fn probe(&self) -> SessionProbe {
        self.probe.clone()
    }

    /// Queues an audit line.
    pub fn record(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Makes the next `persist` fail with `message`.
    pub fn fail_next_persist(&mut self, message: impl Into<String>) {
        self.faults.persist = Some(message.into());
    }

    /// Makes the next `begin_transaction` fail with `message`.
    pub fn fail_next_begin(&mut self, message: impl Into<String>) {
        self.faults.begin = Some(message.into());
    }

    /// Makes the next commit of this session's transaction fail with
    /// `message`.
    pub fn fail_next_commit(&mut self, message: impl Into<String>) {
        self.faults.transaction.lock().commit = Some(message.into());
    }

    /// Makes the next rollback of this session's transaction fail with
    /// `message`.
    pub fn fail_next_rollback(&mut self, message: impl Into<String>) {
        self.faults.transaction.lock().rollback = Some(message.into());
    }
}

impl Session for AuditSession {
    fn set_change_tracking(&mut self, enabled: bool) {
        self.probe.counts.lock().tracking = enabled;
    }

    fn begin_transaction(
        &mut self,
        level: IsolationLevel,
    ) -> SessionResult<Box<dyn SessionTransaction>> {
        let (staged, transaction) = self.faults.open_transaction(&self.store, &self.probe, level)?;
        self.staged = Some(staged);
        Ok(transaction)
    }

    fn persist(&mut self) -> SessionResult<usize> {
        self.probe.counts.lock().persist_calls += 1;
        if let Some(message) = self.faults.persist.take() {
            return Err(SessionError::new(message));
        }

        let writes: Vec<Write> = self.lines.drain(..).map(Write::Audit).collect();
        let affected = writes.len();
        match &self.staged {
            Some(staged) => staged.lock().extend(writes),
            None => self.store.apply(writes),
        }
        Ok(affected)
    }

    fn dispose(&mut self) -> SessionResult<()> {
        self.probe.counts.lock().dispose_calls += 1;
        self.lines.clear();
        Ok(())
    }
}
