//! Session lookup through the ambient scope.

use super::AmbientStore;
use crate::error::ScopeResult;
use crate::session::{Session, SessionHandle};

/// Resolves sessions from whatever scope is ambient.
///
/// Repositories hold a locator instead of a scope, so the service method
/// that created the scope decides the transaction boundary.
///
/// ```rust,ignore
/// struct UserRepository {
///     locator: AmbientSessionLocator,
/// }
///
/// impl UserRepository {
///     fn add(&self, user: User) -> ScopeResult<()> {
///         let session = self
///             .locator
///             .get::<UserSession>()?
///             .expect("UserRepository used outside of a scope");
///         session.lock().add(user);
///         Ok(())
///     }
/// }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct AmbientSessionLocator;

impl AmbientSessionLocator {
    /// Creates a locator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Returns the ambient scope's session of type `S`, or `None` outside of
    /// any scope.
    pub fn get<S: Session>(&self) -> ScopeResult<Option<SessionHandle<S>>> {
        match AmbientStore::get_ambient() {
            Some(scope) => scope.get::<S>().map(Some),
            None => Ok(None),
        }
    }

    /// Returns the ambient scope's session of type `S` bound to
    /// `discriminator`, or `None` outside of any scope.
    pub fn get_keyed<S: Session>(
        &self,
        discriminator: impl Into<String>,
    ) -> ScopeResult<Option<SessionHandle<S>>> {
        match AmbientStore::get_ambient() {
            Some(scope) => scope.get_keyed::<S>(discriminator).map(Some),
            None => Ok(None),
        }
    }
}
