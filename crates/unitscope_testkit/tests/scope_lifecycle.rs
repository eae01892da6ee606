//! Integration tests for scope creation, nesting, completion and disposal.

use std::sync::Arc;
use unitscope_core::{SessionError, SessionRegistry};
use unitscope_testkit::prelude::*;

#[test]
fn save_persists_once_and_second_dispose_is_a_no_op() {
    let store = MemoryStore::new();
    let factory = memory_factory(&store);

    in_fresh_flow(|| {
        let mut scope = factory.create(JoinOption::JoinExisting).unwrap();
        let session = scope.get::<MemorySession>().unwrap();
        let probe = session.lock().probe();
        session.lock().add(customer(1, "Ada"));

        assert_eq!(scope.save().unwrap(), 1);
        scope.dispose().unwrap();
        scope.dispose().unwrap();

        assert_eq!(probe.persist_calls(), 1);
        assert_eq!(probe.dispose_calls(), 1);
    });

    assert_eq!(store.write_count(), 1);
    assert_eq!(store.len(), 1);
}

#[test]
fn joined_inner_scope_defers_to_the_outer_scope() {
    let store = MemoryStore::new();
    let factory = memory_factory(&store);

    in_fresh_flow(|| {
        let mut outer = factory.create(JoinOption::JoinExisting).unwrap();
        let outer_session = outer.get::<MemorySession>().unwrap();

        {
            let mut inner = factory.create(JoinOption::JoinExisting).unwrap();
            let inner_session = inner.get::<MemorySession>().unwrap();
            assert!(Arc::ptr_eq(&outer_session, &inner_session));

            inner_session.lock().add(customer(1, "Ada"));
            assert_eq!(inner.save().unwrap(), 0);
            inner.dispose().unwrap();
        }
        assert!(store.is_empty());

        assert_eq!(outer.save().unwrap(), 1);
        outer.dispose().unwrap();
    });

    assert_eq!(store.len(), 1);
    assert_eq!(store.write_count(), 1);
}

#[test]
fn force_create_new_isolates_sessions() {
    let store = MemoryStore::new();
    let factory = memory_factory(&store);

    in_fresh_flow(|| {
        let mut outer = factory.create(JoinOption::JoinExisting).unwrap();
        let outer_session = outer.get::<MemorySession>().unwrap();
        outer_session.lock().add(customer(1, "Ada"));

        let mut inner = factory.create(JoinOption::ForceCreateNew).unwrap();
        let inner_session = inner.get::<MemorySession>().unwrap();
        assert!(!Arc::ptr_eq(&outer_session, &inner_session));
        assert_ne!(inner.registry_id(), outer.registry_id());

        inner_session.lock().add(customer(2, "Grace"));
        assert_eq!(inner.save().unwrap(), 1);
        inner.dispose().unwrap();

        // The outer scope is abandoned without saving.
        outer.dispose().unwrap();
    });

    assert_eq!(store.len(), 1);
    assert!(store.get(&customer(2, "").key()).is_some());
    assert!(store.get(&customer(1, "").key()).is_none());
}

#[test]
fn unsaved_transactional_scope_rolls_back() {
    let store = MemoryStore::new();
    let factory = memory_factory(&store);

    in_fresh_flow(|| {
        let mut scope = factory
            .create_with_transaction(IsolationLevel::Serializable)
            .unwrap();
        let session = scope.get::<MemorySession>().unwrap();
        let probe = session.lock().probe();
        session.lock().add(customer(1, "Ada"));

        scope.dispose().unwrap();

        assert_eq!(probe.transaction_level(), Some(IsolationLevel::Serializable));
        assert_eq!(probe.rollbacks(), 1);
        assert_eq!(probe.commits(), 0);
        assert_eq!(probe.persist_calls(), 0);
    });

    assert!(store.is_empty());
}

#[test]
fn saved_transactional_scope_commits() {
    let store = MemoryStore::new();
    let factory = memory_factory(&store);

    in_fresh_flow(|| {
        let mut scope = factory
            .create_with_transaction(IsolationLevel::ReadCommitted)
            .unwrap();
        let session = scope.get::<MemorySession>().unwrap();
        let probe = session.lock().probe();
        session.lock().add(customer(1, "Ada"));

        assert_eq!(scope.save().unwrap(), 1);
        scope.dispose().unwrap();
        assert_eq!(probe.commits(), 1);
        assert_eq!(probe.rollbacks(), 0);
    });

    assert_eq!(store.len(), 1);
}

#[test]
fn failing_session_does_not_block_the_others() {
    let store = MemoryStore::new();
    let factory = memory_factory(&store);

    in_fresh_flow(|| {
        let mut scope = factory
            .create_with_transaction(IsolationLevel::Serializable)
            .unwrap();
        let audit = scope.get::<AuditSession>().unwrap();
        let records = scope.get::<MemorySession>().unwrap();
        let audit_probe = audit.lock().probe();
        let records_probe = records.lock().probe();

        audit.lock().record("customer added");
        records.lock().add(customer(1, "Ada"));
        records.lock().fail_next_persist("constraint violated");

        let err = scope.save().unwrap_err();
        match err {
            ScopeError::Session { key, source } => {
                assert!(key.is::<MemorySession>());
                assert_eq!(source.message(), "constraint violated");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(scope.is_completed());

        assert_eq!(audit_probe.commits(), 1);
        assert_eq!(records_probe.rollbacks(), 1);

        // Disposal does not attempt a second completion.
        scope.dispose().unwrap();
        assert_eq!(records_probe.persist_calls(), 1);
    });

    assert_eq!(store.audit_log(), vec!["customer added".to_string()]);
    assert!(store.is_empty());
}

#[test]
fn failed_transaction_commit_does_not_block_later_sessions() {
    let store = MemoryStore::new();
    let factory = memory_factory(&store);

    in_fresh_flow(|| {
        let mut scope = factory
            .create_with_transaction(IsolationLevel::ReadCommitted)
            .unwrap();
        let audit = scope.get::<AuditSession>().unwrap();
        let records = scope.get::<MemorySession>().unwrap();
        let audit_probe = audit.lock().probe();
        let records_probe = records.lock().probe();

        audit.lock().record("customer added");
        audit.lock().fail_next_commit("lock timeout");
        records.lock().add(customer(1, "Ada"));

        let err = scope.save().unwrap_err();
        match err {
            ScopeError::Session { key, source } => {
                assert!(key.is::<AuditSession>());
                assert_eq!(source.message(), "lock timeout");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(audit_probe.commits(), 0);
        assert_eq!(records_probe.persist_calls(), 1);
        assert_eq!(records_probe.commits(), 1);
        scope.dispose().unwrap();
    });

    assert!(store.audit_log().is_empty());
    assert_eq!(store.len(), 1);
}

#[test]
fn failed_rollback_does_not_block_the_others() {
    let store = MemoryStore::new();
    let mut registry = SessionRegistry::new(
        false,
        Some(IsolationLevel::Serializable),
        Some(memory_session_factory(&store)),
    );
    let audit = registry.get::<AuditSession>().unwrap();
    let records = registry.get::<MemorySession>().unwrap();
    let audit_probe = audit.lock().probe();
    let records_probe = records.lock().probe();
    audit.lock().fail_next_rollback("connection reset");

    let err = registry.rollback().unwrap_err();
    match err {
        ScopeError::Session { key, source } => {
            assert!(key.is::<AuditSession>());
            assert_eq!(source.message(), "connection reset");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(audit_probe.rollbacks(), 0);
    assert_eq!(records_probe.rollbacks(), 1);
    assert!(registry.is_completed());

    registry.dispose();
    assert_eq!(audit_probe.dispose_calls(), 1);
    assert_eq!(records_probe.dispose_calls(), 1);
}

#[test]
fn failed_rollback_on_dispose_is_swallowed() {
    let store = MemoryStore::new();
    let factory = memory_factory(&store);

    in_fresh_flow(|| {
        let mut scope = factory
            .create_with_transaction(IsolationLevel::Serializable)
            .unwrap();
        let records = scope.get::<MemorySession>().unwrap();
        let audit = scope.get::<AuditSession>().unwrap();
        let records_probe = records.lock().probe();
        let audit_probe = audit.lock().probe();
        records.lock().add(customer(1, "Ada"));
        records.lock().fail_next_rollback("connection reset");

        scope.dispose().unwrap();
        assert_eq!(records_probe.rollbacks(), 0);
        assert_eq!(audit_probe.rollbacks(), 1);
        assert_eq!(records_probe.dispose_calls(), 1);
    });

    assert!(store.is_empty());
}

#[test]
fn second_save_and_use_after_dispose_fail() {
    let factory = memory_factory(&MemoryStore::new());

    in_fresh_flow(|| {
        let mut scope = factory.create(JoinOption::JoinExisting).unwrap();
        scope.save().unwrap();
        assert!(scope.save().unwrap_err().is_already_completed());

        scope.dispose().unwrap();
        assert!(scope.get::<MemorySession>().unwrap_err().is_disposed());
        assert!(scope.save().unwrap_err().is_disposed());
    });
}

#[test]
fn read_write_scope_cannot_join_read_only_scope() {
    let factory = memory_factory(&MemoryStore::new());

    in_fresh_flow(|| {
        let mut reader = factory.create_read_only(JoinOption::JoinExisting).unwrap();
        let err = factory.create(JoinOption::JoinExisting).unwrap_err();
        assert!(matches!(err, ScopeError::InvalidState { .. }));

        // Forcing a new registry is allowed.
        let mut writer = factory.create(JoinOption::ForceCreateNew).unwrap();
        writer.dispose().unwrap();
        reader.dispose().unwrap();
    });
}

#[test]
fn read_only_scope_never_persists() {
    let store = seeded_store(1);
    let factory = memory_factory(&store);

    in_fresh_flow(|| {
        let mut reader = factory.create_read_only(JoinOption::JoinExisting).unwrap();
        let session = reader.get::<MemorySession>().unwrap();
        let probe = session.lock().probe();
        assert!(!probe.is_tracking());

        let mut loaded = session.lock().load("customers", "1").unwrap();
        loaded.value = "changed".to_string();
        session.lock().update(loaded);

        reader.dispose().unwrap();
        assert_eq!(probe.persist_calls(), 0);
        assert_eq!(probe.dispose_calls(), 1);
    });

    assert_eq!(
        store.value_of(&customer(1, "").key()).as_deref(),
        Some("customer-1")
    );
}

#[test]
fn out_of_order_dispose_is_an_ordering_violation() {
    let factory = memory_factory(&MemoryStore::new());

    in_fresh_flow(|| {
        let mut outer = factory.create(JoinOption::JoinExisting).unwrap();
        let mut inner = factory.create(JoinOption::ForceCreateNew).unwrap();

        let err = outer.dispose().unwrap_err();
        assert!(err.is_ordering_violation());
        assert!(outer.is_disposed());
        assert_eq!(AmbientStore::current_id(), Some(inner.id()));

        inner.dispose().unwrap();
        assert!(AmbientStore::current_id().is_none());
    });
}

#[test]
fn dropping_out_of_order_does_not_panic() {
    let factory = memory_factory(&MemoryStore::new());

    in_fresh_flow(|| {
        let outer = factory.create(JoinOption::JoinExisting).unwrap();
        let inner = factory.create(JoinOption::JoinExisting).unwrap();
        drop(outer);
        drop(inner);
        assert!(AmbientStore::get_ambient().is_none());
    });
}

#[test]
fn failed_transaction_start_disposes_the_session() {
    let store = MemoryStore::new();
    let probe = Arc::new(parking_lot::Mutex::new(None::<SessionProbe>));
    let captured = Arc::clone(&probe);
    let factory = UnitScopeFactory::from_fn(move |key| {
        if !key.is::<MemorySession>() {
            return Ok(None);
        }
        let mut session = MemorySession::new(store.clone());
        session.fail_next_begin("connection refused");
        *captured.lock() = Some(session.probe());
        Ok(Some(Box::new(session)))
    });

    in_fresh_flow(|| {
        let mut scope = factory
            .create_with_transaction(IsolationLevel::Snapshot)
            .unwrap();
        let err = scope.get::<MemorySession>().unwrap_err();
        assert!(matches!(err, ScopeError::Session { .. }));
        scope.dispose().unwrap();
    });

    let probe = probe.lock().clone().unwrap();
    assert_eq!(probe.dispose_calls(), 1);
}

#[test]
fn factory_without_a_session_reports_the_type() {
    let factory = UnitScopeFactory::new();

    in_fresh_flow(|| {
        let mut scope = factory.create(JoinOption::JoinExisting).unwrap();
        let err = scope.get::<MemorySession>().unwrap_err();
        match err {
            ScopeError::Session { key, source } => {
                assert!(key.is::<MemorySession>());
                assert!(source.message().contains("MemorySession"));
            }
            other => panic!("unexpected error: {other}"),
        }
        scope.dispose().unwrap();
    });
}

#[test]
fn locator_resolves_through_the_ambient_scope() {
    let store = MemoryStore::new();
    let factory = memory_factory(&store);
    let locator = AmbientSessionLocator::new();

    in_fresh_flow(|| {
        assert!(locator.get::<MemorySession>().unwrap().is_none());

        let mut scope = factory.create(JoinOption::JoinExisting).unwrap();
        let direct = scope.get::<MemorySession>().unwrap();
        let located = locator.get::<MemorySession>().unwrap().unwrap();
        assert!(Arc::ptr_eq(&direct, &located));

        let replica = locator.get_keyed::<MemorySession>("replica").unwrap().unwrap();
        assert!(!Arc::ptr_eq(&direct, &replica));

        located.lock().add(customer(1, "Ada"));
        assert_eq!(scope.save().unwrap(), 1);
        scope.dispose().unwrap();
    });

    assert_eq!(store.len(), 1);
}

#[test]
fn session_error_keeps_its_source() {
    let io = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
    let err = SessionError::with_source("commit failed", io);
    assert_eq!(err.message(), "commit failed");
    assert!(std::error::Error::source(&err).is_some());
}
