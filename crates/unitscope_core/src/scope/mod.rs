//! Unit-of-work scopes.
//!
//! A [`UnitScope`] is the boundary of one business transaction. It resolves
//! sessions from a [`SessionRegistry`](crate::SessionRegistry) and decides,
//! when saved or disposed, whether those sessions commit or roll back.
//! Scopes nest: a scope created inside another either joins it or forces a
//! registry of its own (see [`JoinOption`](crate::JoinOption)).

mod read_only;
mod state;
mod unit;

pub use read_only::ReadOnlyUnitScope;
pub use state::AmbientScope;
pub(crate) use state::ScopeState;
pub use unit::UnitScope;
