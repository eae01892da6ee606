//! # UnitScope Testkit
//!
//! Test utilities for UnitScope.
//!
//! This crate provides:
//! - An in-memory backing store and two session types over it
//! - Probes that record what the scope machinery did to a session
//! - Fixtures for logging and factory setup
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use unitscope_testkit::prelude::*;
//!
//! #[test]
//! fn saves_once() {
//!     let store = MemoryStore::new();
//!     let factory = memory_factory(&store);
//!     in_fresh_flow(|| {
//!         let mut scope = factory.create(JoinOption::JoinExisting).unwrap();
//!         scope.get::<MemorySession>().unwrap().lock().add(customer(1, "Ada"));
//!         assert_eq!(scope.save().unwrap(), 1);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod memory;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::memory::*;
    pub use unitscope_core::{
        AmbientSessionLocator, AmbientStore, EntityKey, EntryState, FlowContext, IsolationLevel,
        JoinOption, ScopeError, ScopeOptions, UnitScopeFactory,
    };
}

pub use fixtures::*;
pub use generators::*;
pub use memory::*;
