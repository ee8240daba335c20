//! Failure taxonomy of the authorization core.
//!
//! All failures are returned as values; nothing here retries or panics. The
//! HTTP layer maps variants to status codes (see `handler`).

use super::assertion::AssertionError;
use super::store::StoreError;

/// Result alias for core operations.
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Errors surfaced by the authorization core.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The external identity provider assertion was rejected.
    #[error("identity assertion rejected: {0}")]
    AssertionInvalid(AssertionError),

    /// No access token matches the presented activation key.
    #[error("access token not found")]
    TokenNotFound,

    /// Malformed request or unknown reference.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The activation assertion is not signed with an HMAC algorithm.
    #[error("unexpected signing method: {0}")]
    InvalidSigningMethod(String),

    /// The activation assertion failed signature verification.
    #[error("invalid token")]
    InvalidSignature,

    /// Re-activation was attempted while the reject policy is configured.
    #[error("access token already activated")]
    AlreadyActivated,

    /// No credential, or the credential is unknown, pending or expired.
    #[error("unauthenticated")]
    Unauthenticated,

    /// The caller does not own the API key it tried to modify.
    #[error("authorization failed")]
    Unauthorized,

    /// The API key is valid but lacks the wildcard grant for the service.
    #[error("insufficient permission for service {0}")]
    InsufficientPermission(String),

    /// Store or infrastructure failure. Safe for the caller to retry.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Whether this failure belongs to the activation integrity family
    /// (rendered to callers only as "invalid token").
    #[must_use]
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::InvalidSigningMethod(_) | Self::InvalidSignature)
    }
}

/// Unreachable provider keys are an infrastructure failure, not a bad assertion.
impl From<AssertionError> for AuthError {
    fn from(e: AssertionError) -> Self {
        if e.is_transport() {
            Self::Internal(e.to_string())
        } else {
            Self::AssertionInvalid(e)
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        Self::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_become_internal() {
        let err: AuthError = StoreError::Backend("connection reset".to_string()).into();
        assert!(matches!(err, AuthError::Internal(ref m) if m.contains("connection reset")));
    }

    #[test]
    fn rejected_assertions_stay_assertion_invalid() {
        let err: AuthError = AssertionError::MissingClaim("email").into();
        assert!(matches!(err, AuthError::AssertionInvalid(_)));
    }

    #[test]
    fn integrity_failures_are_grouped() {
        assert!(AuthError::InvalidSignature.is_integrity_failure());
        assert!(AuthError::InvalidSigningMethod("RS256".to_string()).is_integrity_failure());
        assert!(!AuthError::TokenNotFound.is_integrity_failure());
    }

    #[test]
    fn insufficient_permission_names_service() {
        let err = AuthError::InsufficientPermission("Storage".to_string());
        assert_eq!(err.to_string(), "insufficient permission for service Storage");
    }
}
