//! Records owned by the authorization core.
//!
//! Every entity mirrors a row in the backing relational store. Records are
//! created through the `New*` drafts so that surrogate ids and timestamps are
//! always assigned by the store, never by callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Suffix that turns a service name into its wildcard permission.
pub const WILDCARD_SUFFIX: &str = "::*";

/// Build the wildcard permission string for `service` (`"Storage"` → `"Storage::*"`).
#[must_use]
pub fn wildcard_permission(service: &str) -> String {
    format!("{service}{WILDCARD_SUFFIX}")
}

/// A client application that access tokens are issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    /// Surrogate key.
    pub id: i64,
    /// Public identifier (the `appId` clients send at sign-in).
    pub uuid: Uuid,
    /// HMAC key used to verify this application's activation assertions.
    #[serde(skip_serializing)]
    pub secret_key: String,
}

/// Draft for [`Application`].
#[derive(Debug, Clone)]
pub struct NewApplication {
    /// Public identifier.
    pub uuid: Uuid,
    /// HMAC signing secret.
    pub secret_key: String,
}

/// Canonical user record. One identity may own several provider accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Surrogate key.
    pub id: i64,
    /// Stable public identifier.
    pub uuid: Uuid,
    /// Display name taken from the first provider assertion.
    pub username: String,
    /// Email taken from the first provider assertion.
    pub email: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Draft for [`Identity`].
#[derive(Debug, Clone)]
pub struct NewIdentity {
    /// Stable public identifier.
    pub uuid: Uuid,
    /// Display name.
    pub username: String,
    /// Email address.
    pub email: String,
}

/// Link between an external provider subject and a local [`Identity`].
///
/// Unique on `(provider, provider_subject)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAccount {
    /// Surrogate key.
    pub id: i64,
    /// Provider name (e.g. `"google"`).
    pub provider: String,
    /// Opaque subject identifier issued by the provider.
    pub provider_subject: String,
    /// Linked identity.
    pub identity_id: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Draft for [`ProviderAccount`].
#[derive(Debug, Clone)]
pub struct NewProviderAccount {
    /// Provider name.
    pub provider: String,
    /// Provider subject.
    pub provider_subject: String,
    /// Identity to link.
    pub identity_id: i64,
}

/// Activation state of an [`AccessToken`].
///
/// A pending token never carries an expiry and an active one always does, so
/// the "activated iff expiry is set" rule holds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TokenState {
    /// Issued, waiting for a signed activation assertion.
    Pending,
    /// Activated; usable until `expire_at`.
    Active {
        /// Instant at which the token stops authenticating.
        expire_at: DateTime<Utc>,
    },
}

/// Two-phase access token bound to an identity and an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// Surrogate key.
    pub id: i64,
    /// Owning identity.
    pub identity_id: i64,
    /// Application the token was issued for.
    pub application_id: i64,
    /// Bearer credential presented on every request once active.
    pub access_key: String,
    /// Secret paired with the access key.
    pub secret_key: String,
    /// Handle embedded in the application's signed activation assertion.
    pub activation_key: String,
    /// Pending or active.
    pub state: TokenState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl AccessToken {
    /// Whether the token has been activated (regardless of expiry).
    #[must_use]
    pub fn is_activated(&self) -> bool {
        matches!(self.state, TokenState::Active { .. })
    }

    /// Expiry instant, `None` while pending.
    #[must_use]
    pub fn expire_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            TokenState::Pending => None,
            TokenState::Active { expire_at } => Some(expire_at),
        }
    }

    /// Returns `true` if the token is active and `now` is before its expiry.
    #[must_use]
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            TokenState::Pending => false,
            TokenState::Active { expire_at } => now < expire_at,
        }
    }
}

/// Draft for [`AccessToken`]; always inserted as [`TokenState::Pending`].
#[derive(Debug, Clone)]
pub struct NewAccessToken {
    /// Owning identity.
    pub identity_id: i64,
    /// Target application.
    pub application_id: i64,
    /// Generated access key.
    pub access_key: String,
    /// Generated secret key.
    pub secret_key: String,
    /// Generated activation key.
    pub activation_key: String,
}

/// An access token loaded together with the rows it references.
#[derive(Debug, Clone)]
pub struct LinkedAccessToken {
    /// The token row.
    pub token: AccessToken,
    /// Identity referenced by `token.identity_id`.
    pub identity: Identity,
    /// Application referenced by `token.application_id`.
    pub application: Application,
}

/// What activation does with a token that is already active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactivationPolicy {
    /// Re-extend the expiry from the new activation instant.
    #[default]
    Refresh,
    /// Refuse; only pending tokens may be activated.
    Reject,
}

/// Self-service credential carrying wildcard service permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    /// Identity that created the key.
    pub owner_identity_uuid: Uuid,
    /// The key string presented by callers.
    pub key: String,
    /// Free-form note from the owner.
    pub comment: String,
    /// Granted permissions, canonically `"<Service>::*"`. Kept duplicate-free
    /// by [`ApiKey::grant`].
    pub permissions: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last permission change.
    pub updated_at: DateTime<Utc>,
}

impl ApiKey {
    /// Exact-string membership test.
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    /// Whether the key holds the wildcard permission for `service`.
    #[must_use]
    pub fn allows_service(&self, service: &str) -> bool {
        self.has_permission(&wildcard_permission(service))
    }

    /// Add `permission` unless present. Returns `true` if the set changed.
    pub fn grant(&mut self, permission: &str) -> bool {
        if self.has_permission(permission) {
            return false;
        }
        self.permissions.push(permission.to_string());
        true
    }

    /// Remove every occurrence of `permission`. Returns how many were removed.
    pub fn revoke(&mut self, permission: &str) -> usize {
        let before = self.permissions.len();
        self.permissions.retain(|p| p != permission);
        before - self.permissions.len()
    }

    /// Short, non-secret prefix of the key for logs.
    #[must_use]
    pub fn hint(&self) -> &str {
        key_hint(&self.key)
    }
}

/// First six characters of a credential, safe to put in logs.
#[must_use]
pub fn key_hint(key: &str) -> &str {
    key.get(..6).unwrap_or(key)
}
