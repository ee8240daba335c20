//! Self-service API keys and wildcard service permissions.
//!
//! A permission is an opaque string. The only semantics the checker applies
//! is an exact match against `"<Service>::*"`; there is no sub-resource or
//! action scoping.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::audit::{self, AuditEvent};
use super::credential::CredentialGenerator;
use super::error::{AuthError, AuthResult};
use super::model::{ApiKey, key_hint, wildcard_permission};
use super::store::{ApiKeyStore, ApiKeyUpdate, StoreError};
use super::token::MAX_ISSUE_ATTEMPTS;

/// Creates API keys and mutates their permission sets.
pub struct ApiKeyRegistry {
    keys: Arc<dyn ApiKeyStore>,
    generator: Arc<dyn CredentialGenerator>,
}

impl ApiKeyRegistry {
    /// Create a registry over `keys`, drawing key strings from `generator`.
    pub fn new(keys: Arc<dyn ApiKeyStore>, generator: Arc<dyn CredentialGenerator>) -> Self {
        Self { keys, generator }
    }

    /// Create a key for `owner` with an empty permission set.
    pub async fn create(&self, owner: Uuid, comment: &str) -> AuthResult<ApiKey> {
        for attempt in 1..=MAX_ISSUE_ATTEMPTS {
            let now = Utc::now();
            let key = ApiKey {
                owner_identity_uuid: owner,
                key: self.generator.generate(),
                comment: comment.to_string(),
                permissions: Vec::new(),
                created_at: now,
                updated_at: now,
            };
            match self.keys.create_api_key(key).await {
                Ok(key) => {
                    audit::emit(&AuditEvent::api_key_created(&key));
                    return Ok(key);
                }
                Err(StoreError::Conflict(_)) => {
                    warn!(attempt, "Generated API key collided, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(AuthError::Internal(format!(
            "API key collision persisted after {MAX_ISSUE_ATTEMPTS} attempts"
        )))
    }

    /// All keys owned by `owner`, oldest first.
    pub async fn list(&self, owner: Uuid) -> AuthResult<Vec<ApiKey>> {
        Ok(self.keys.list_api_keys(owner).await?)
    }

    /// Grant `permission` on `owner`'s key. Granting a held permission is a no-op.
    ///
    /// Fails with [`AuthError::Unauthorized`] if `owner` has no such key.
    pub async fn add_permission(&self, owner: Uuid, key: &str, permission: &str) -> AuthResult<ApiKey> {
        let granted = permission.to_string();
        let update: ApiKeyUpdate = Box::new(move |api_key| {
            let changed = api_key.grant(&granted);
            if changed {
                api_key.updated_at = Utc::now();
            }
            changed
        });
        let Some((api_key, changed)) = self.keys.update_owned_api_key(owner, key, update).await?
        else {
            return Err(AuthError::Unauthorized);
        };

        if changed {
            audit::emit(&AuditEvent::permission_granted(&api_key, permission));
        } else {
            debug!(key = %api_key.hint(), permission, "Permission already granted");
        }
        Ok(api_key)
    }

    /// Remove every occurrence of `permission` from `owner`'s key. Removing an
    /// absent permission succeeds without changes.
    ///
    /// Fails with [`AuthError::BadRequest`] if `owner` has no such key.
    pub async fn remove_permission(
        &self,
        owner: Uuid,
        key: &str,
        permission: &str,
    ) -> AuthResult<ApiKey> {
        let revoked = permission.to_string();
        let update: ApiKeyUpdate = Box::new(move |api_key| {
            let changed = api_key.revoke(&revoked) > 0;
            if changed {
                api_key.updated_at = Utc::now();
            }
            changed
        });
        let Some((api_key, changed)) = self.keys.update_owned_api_key(owner, key, update).await?
        else {
            return Err(AuthError::BadRequest("bad request".to_string()));
        };

        if changed {
            audit::emit(&AuditEvent::permission_revoked(&api_key, permission));
        }
        Ok(api_key)
    }
}

/// Evaluates presented API keys against service names.
pub struct PermissionChecker {
    keys: Arc<dyn ApiKeyStore>,
}

impl PermissionChecker {
    /// Create a checker over `keys`.
    pub fn new(keys: Arc<dyn ApiKeyStore>) -> Self {
        Self { keys }
    }

    /// Return the key if it grants `"<service>::*"`.
    ///
    /// Fails with [`AuthError::Unauthenticated`] for an empty or unknown key
    /// and with [`AuthError::InsufficientPermission`] when the key exists but
    /// lacks the grant.
    pub async fn check(&self, presented: &str, service: &str) -> AuthResult<ApiKey> {
        if presented.is_empty() {
            return Err(AuthError::Unauthenticated);
        }
        let Some(api_key) = self.keys.find_api_key(presented).await? else {
            debug!(key = %key_hint(presented), "Unknown API key");
            return Err(AuthError::Unauthenticated);
        };

        if api_key.has_permission(&wildcard_permission(service)) {
            Ok(api_key)
        } else {
            audit::emit(&AuditEvent::api_key_denied(&api_key, service));
            Err(AuthError::InsufficientPermission(service.to_string()))
        }
    }
}
