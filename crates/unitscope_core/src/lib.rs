//! # UnitScope Core
//!
//! Ambient unit-of-work scopes over lazily created resource sessions.
//!
//! This crate provides:
//! - [`SessionRegistry`]: lazy, one-per-type session management with
//!   best-effort commit and rollback
//! - [`UnitScope`] and [`ReadOnlyUnitScope`]: transaction boundaries that
//!   nest by joining or by forcing a fresh registry
//! - [`AmbientStore`]: the per-flow "current scope" that follows a logical
//!   call chain across `.await` points
//! - [`UnitScopeFactory`] and [`AmbientSessionLocator`]: the entry points for
//!   services and for repositories
//!
//! ## Example
//!
//! ```rust,ignore
//! use unitscope_core::{AmbientSessionLocator, JoinOption, UnitScopeFactory};
//!
//! let factory = UnitScopeFactory::new();
//! let mut scope = factory.create(JoinOption::JoinExisting)?;
//!
//! // Anywhere further down the call chain:
//! let orders = AmbientSessionLocator::new().get::<OrderSession>()?;
//!
//! scope.save()?;
//! ```
//!
//! ## Async
//!
//! Inside a tokio runtime, scopes can only be created within a logical flow:
//! wrap the work in [`flow`] so that the ambient scope survives `.await`
//! points on a multi-threaded runtime. Spawned tasks start with no ambient
//! scope unless handed a [`FlowContext`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod ambient;
mod config;
mod error;
mod factory;
mod registry;
mod scope;
mod session;
mod types;

#[cfg(test)]
mod test_support;

pub use ambient::{flow, AmbientSessionLocator, AmbientStore, FlowContext, SuppressedAmbient};
pub use config::{IsolationLevel, JoinOption, ScopeOptions};
pub use error::{ScopeError, ScopeResult};
pub use factory::UnitScopeFactory;
pub use registry::{SessionRegistry, SharedRegistry};
pub use scope::{AmbientScope, ReadOnlyUnitScope, UnitScope};
pub use session::{
    EntityKey, EntryState, Session, SessionError, SessionFactory, SessionHandle, SessionKey,
    SessionResult, SessionTransaction, StateInspector,
};
pub use types::{RegistryId, ScopeId};
