//! Role-based access gate evaluated before any handler logic.

use super::principal::{Caller, Role, TokenState};
use crate::api::reply::ApiError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// OR-composition of allowed roles; `None` admits everyone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessGate {
    roles: Option<&'static [Role]>,
}

impl AccessGate {
    pub const STAFF_OR_ADMIN: Self = Self::any_of(&[Role::Staff, Role::Admin]);
    pub const STAFF_ONLY: Self = Self::any_of(&[Role::Staff]);
    pub const UNRESTRICTED: Self = Self { roles: None };

    #[must_use]
    pub const fn any_of(roles: &'static [Role]) -> Self {
        Self { roles: Some(roles) }
    }

    #[must_use]
    pub const fn is_unrestricted(&self) -> bool {
        self.roles.is_none()
    }

    /// Pure predicate over the caller's role.
    #[must_use]
    pub fn evaluate(&self, role: Role) -> Decision {
        match self.roles {
            None => Decision::Allow,
            Some(roles) if roles.contains(&role) => Decision::Allow,
            Some(_) => Decision::Deny,
        }
    }

    /// Deny with `Unauthorized` when the caller presented a token that did not
    /// resolve, `Forbidden` otherwise.
    ///
    /// # Errors
    /// Returns the denial as an [`ApiError`].
    pub fn check(&self, caller: &Caller) -> Result<(), ApiError> {
        match self.evaluate(caller.role) {
            Decision::Allow => Ok(()),
            Decision::Deny if caller.token == TokenState::Rejected => Err(ApiError::Unauthorized),
            Decision::Deny => Err(ApiError::Forbidden),
        }
    }
}
