//! Test fixtures and scope helpers.
//!
//! Provides logging setup, a factory wired to a [`MemoryStore`] and a few
//! record builders.

use crate::memory::{AuditSession, MemorySession, MemoryStore, Record};
use std::any::Any;
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;
use unitscope_core::{FlowContext, SessionFactory, SessionKey, SessionResult, UnitScopeFactory};

/// Environment variable read by [`init_test_logging`].
pub const LOG_ENV: &str = "UNITSCOPE_LOG";

static LOGGING: Once = Once::new();

/// Installs a test-friendly `tracing` subscriber once per process.
///
/// The filter comes from `UNITSCOPE_LOG` (for example
/// `UNITSCOPE_LOG=unitscope_core=debug`) and defaults to `warn`.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
        // Another subscriber may already be installed by the test binary.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A session factory that builds [`MemorySession`]s and [`AuditSession`]s
/// over `store`.
pub fn memory_session_factory(store: &MemoryStore) -> Arc<dyn SessionFactory> {
    let store = store.clone();
    let create = move |key: &SessionKey| -> SessionResult<Option<Box<dyn Any + Send>>> {
        if key.is::<MemorySession>() {
            return Ok(Some(Box::new(MemorySession::new(store.clone()))));
        }
        if key.is::<AuditSession>() {
            return Ok(Some(Box::new(AuditSession::new(store.clone()))));
        }
        Ok(None)
    };
    Arc::new(create)
}

/// A scope factory wired to [`memory_session_factory`].
pub fn memory_factory(store: &MemoryStore) -> UnitScopeFactory {
    UnitScopeFactory::with_session_factory(memory_session_factory(store))
}

/// Runs `test` in a flow of its own, starting with no ambient scope.
///
/// Test harnesses reuse threads, so tests that create scopes should not rely
/// on the thread's ambient slot being empty.
pub fn in_fresh_flow<R>(test: impl FnOnce() -> R) -> R {
    init_test_logging();
    FlowContext::empty().run(test)
}

/// A record in the `customers` entity set.
pub fn customer(id: u64, name: &str) -> Record {
    Record::new("customers", id.to_string(), name)
}

/// A store seeded with `count` customers named `customer-<id>`, ids starting
/// at 1.
pub fn seeded_store(count: u64) -> MemoryStore {
    let store = MemoryStore::new();
    for id in 1..=count {
        store.insert(customer(id, &format!("customer-{id}")));
    }
    store
}
