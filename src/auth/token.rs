//! Access token lifecycle: issue (pending) → activate (active, expiring) →
//! authenticate.
//!
//! Expiry is never swept; it is evaluated lazily by [`TokenAuthenticator`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::activation::{read_activation_key, verify_activation};
use super::audit::{self, AuditEvent};
use super::credential::CredentialGenerator;
use super::error::{AuthError, AuthResult};
use super::model::{
    AccessToken, Application, Identity, LinkedAccessToken, NewAccessToken, ReactivationPolicy,
};
use super::store::{AccessTokenStore, StoreError};

/// Fresh credentials are drawn this many times before a collision is
/// reported as an internal error.
pub const MAX_ISSUE_ATTEMPTS: usize = 3;

/// Default lifetime of an activated token: seven days.
pub const DEFAULT_ACTIVATION_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Creates pending access tokens.
pub struct AccessTokenIssuer {
    tokens: Arc<dyn AccessTokenStore>,
    generator: Arc<dyn CredentialGenerator>,
}

impl AccessTokenIssuer {
    /// Create an issuer over `tokens`, drawing secrets from `generator`.
    pub fn new(tokens: Arc<dyn AccessTokenStore>, generator: Arc<dyn CredentialGenerator>) -> Self {
        Self { tokens, generator }
    }

    /// Persist a new pending token binding `identity` to `application`.
    ///
    /// Callers should disclose only the activation key at this point. Several
    /// pending tokens per (identity, application) pair are allowed.
    pub async fn issue(&self, identity: &Identity, application: &Application) -> AuthResult<AccessToken> {
        for attempt in 1..=MAX_ISSUE_ATTEMPTS {
            let draft = NewAccessToken {
                identity_id: identity.id,
                application_id: application.id,
                access_key: self.generator.generate(),
                secret_key: self.generator.generate(),
                activation_key: self.generator.generate(),
            };

            match self.tokens.create_access_token(draft).await {
                Ok(token) => {
                    audit::emit(&AuditEvent::token_issued(&token, identity.uuid, application.uuid));
                    return Ok(token);
                }
                Err(StoreError::Conflict(what)) => {
                    warn!(attempt, collided = %what, "Generated credential collided, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(AuthError::Internal(format!(
            "credential collision persisted after {MAX_ISSUE_ATTEMPTS} attempts"
        )))
    }
}

/// Promotes pending tokens using application-signed activation assertions.
pub struct AccessTokenActivator {
    tokens: Arc<dyn AccessTokenStore>,
    ttl: Duration,
    policy: ReactivationPolicy,
}

impl AccessTokenActivator {
    /// Create an activator granting `ttl` of validity per activation.
    pub fn new(tokens: Arc<dyn AccessTokenStore>, ttl: Duration, policy: ReactivationPolicy) -> Self {
        Self { tokens, ttl, policy }
    }

    /// Activate the token referenced by `assertion`, expiring `ttl` from now.
    pub async fn activate(&self, assertion: &str) -> AuthResult<AccessToken> {
        self.activate_at(assertion, Utc::now()).await
    }

    /// [`activate`](Self::activate) with an explicit activation instant.
    pub async fn activate_at(&self, assertion: &str, now: DateTime<Utc>) -> AuthResult<AccessToken> {
        // Untrusted: only used to pick the record whose application secret
        // verifies the assertion.
        let activation_key = read_activation_key(assertion)?;

        let Some(linked) = self.tokens.find_by_activation_key(&activation_key).await? else {
            audit::emit(&AuditEvent::token_rejected(None, "unknown activation key"));
            return Err(AuthError::TokenNotFound);
        };

        if let Err(e) = verify_activation(assertion, &linked.application.secret_key) {
            audit::emit(&AuditEvent::token_rejected(Some(linked.token.id), e.to_string()));
            return Err(e);
        }

        let expire_at = now + self.ttl;
        let Some(token) = self
            .tokens
            .activate_access_token(&activation_key, expire_at, self.policy)
            .await?
        else {
            return Err(match self.policy {
                ReactivationPolicy::Reject => {
                    audit::emit(&AuditEvent::token_rejected(
                        Some(linked.token.id),
                        "already activated",
                    ));
                    AuthError::AlreadyActivated
                }
                ReactivationPolicy::Refresh => AuthError::TokenNotFound,
            });
        };

        if linked.token.is_activated() {
            debug!(token_id = token.id, "Refreshed expiry of an active token");
        }
        audit::emit(&AuditEvent::token_activated(&LinkedAccessToken {
            token: token.clone(),
            ..linked
        }));
        Ok(token)
    }
}

/// Resolves presented access keys to their identity. Read-only.
pub struct TokenAuthenticator {
    tokens: Arc<dyn AccessTokenStore>,
}

impl TokenAuthenticator {
    /// Create an authenticator over `tokens`.
    pub fn new(tokens: Arc<dyn AccessTokenStore>) -> Self {
        Self { tokens }
    }

    /// Authenticate `access_key` against the current time.
    pub async fn authenticate(&self, access_key: &str) -> AuthResult<LinkedAccessToken> {
        self.authenticate_at(access_key, Utc::now()).await
    }

    /// Authenticate `access_key` as of `now`.
    ///
    /// Fails with [`AuthError::Unauthenticated`] for unknown, pending and
    /// expired tokens alike.
    pub async fn authenticate_at(
        &self,
        access_key: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<LinkedAccessToken> {
        if access_key.is_empty() {
            return Err(AuthError::Unauthenticated);
        }
        match self.tokens.find_by_access_key(access_key).await? {
            Some(linked) if linked.token.is_usable_at(now) => Ok(linked),
            Some(linked) => {
                debug!(
                    token_id = linked.token.id,
                    activated = linked.token.is_activated(),
                    "Rejected pending or expired access token"
                );
                Err(AuthError::Unauthenticated)
            }
            None => Err(AuthError::Unauthenticated),
        }
    }
}
