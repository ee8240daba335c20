//! Audit logging for credential lifecycle events.
//!
//! Every event is emitted via `tracing::info!` with a JSON `audit` field so
//! the trail is queryable by any log aggregator.
//!
//! | Event | When |
//! |-------|------|
//! | `identity.linked` | First sign-in created an identity and provider account |
//! | `token.issued` | A pending access token was created |
//! | `token.activated` | A signed activation assertion promoted a token |
//! | `token.rejected` | An activation assertion failed verification |
//! | `apikey.created` | An API key was created |
//! | `apikey.permission_granted` | A permission was added to an API key |
//! | `apikey.permission_revoked` | A permission was removed from an API key |
//! | `apikey.denied` | A recognized API key lacked the requested service grant |
//!
//! Credential values never appear; API keys are identified by
//! [`key_hint`](super::model::key_hint) only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::model::{AccessToken, ApiKey, Identity, LinkedAccessToken};

/// Structured audit record.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g. `"token.issued"`).
    pub event: &'static str,
    /// Identity the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Uuid>,
    /// Application the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<Uuid>,
    /// Access token surrogate id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<i64>,
    /// Provider name (for `identity.linked`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Non-secret API key prefix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_hint: Option<String>,
    /// Permission or service involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
    /// New token expiry (for `token.activated`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<DateTime<Utc>>,
    /// Human-readable reason for rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn bare(event: &'static str) -> Self {
        Self {
            event,
            identity: None,
            application: None,
            token_id: None,
            provider: None,
            key_hint: None,
            permission: None,
            expire_at: None,
            reason: None,
        }
    }

    /// `identity.linked`
    #[must_use]
    pub fn identity_linked(provider: &str, identity: &Identity) -> Self {
        Self {
            identity: Some(identity.uuid),
            provider: Some(provider.to_string()),
            ..Self::bare("identity.linked")
        }
    }

    /// `token.issued`
    #[must_use]
    pub fn token_issued(token: &AccessToken, identity: Uuid, application: Uuid) -> Self {
        Self {
            identity: Some(identity),
            application: Some(application),
            token_id: Some(token.id),
            ..Self::bare("token.issued")
        }
    }

    /// `token.activated`
    #[must_use]
    pub fn token_activated(linked: &LinkedAccessToken) -> Self {
        Self {
            identity: Some(linked.identity.uuid),
            application: Some(linked.application.uuid),
            token_id: Some(linked.token.id),
            expire_at: linked.token.expire_at(),
            ..Self::bare("token.activated")
        }
    }

    /// `token.rejected`
    #[must_use]
    pub fn token_rejected(token_id: Option<i64>, reason: impl Into<String>) -> Self {
        Self {
            token_id,
            reason: Some(reason.into()),
            ..Self::bare("token.rejected")
        }
    }

    /// `apikey.created`
    #[must_use]
    pub fn api_key_created(key: &ApiKey) -> Self {
        Self {
            identity: Some(key.owner_identity_uuid),
            key_hint: Some(key.hint().to_string()),
            ..Self::bare("apikey.created")
        }
    }

    /// `apikey.permission_granted`
    #[must_use]
    pub fn permission_granted(key: &ApiKey, permission: &str) -> Self {
        Self {
            identity: Some(key.owner_identity_uuid),
            key_hint: Some(key.hint().to_string()),
            permission: Some(permission.to_string()),
            ..Self::bare("apikey.permission_granted")
        }
    }

    /// `apikey.permission_revoked`
    #[must_use]
    pub fn permission_revoked(key: &ApiKey, permission: &str) -> Self {
        Self {
            identity: Some(key.owner_identity_uuid),
            key_hint: Some(key.hint().to_string()),
            permission: Some(permission.to_string()),
            ..Self::bare("apikey.permission_revoked")
        }
    }

    /// `apikey.denied`
    #[must_use]
    pub fn api_key_denied(key: &ApiKey, service: &str) -> Self {
        Self {
            identity: Some(key.owner_identity_uuid),
            key_hint: Some(key.hint().to_string()),
            permission: Some(service.to_string()),
            reason: Some("insufficient permission".to_string()),
            ..Self::bare("apikey.denied")
        }
    }
}

/// Emit an audit event via `tracing::info!`.
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "vulcan audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_key() -> ApiKey {
        let now = Utc::now();
        ApiKey {
            owner_identity_uuid: Uuid::new_v4(),
            key: "abcdef0123456789abcdef0123456789abcdef01".to_string(),
            comment: "ci".to_string(),
            permissions: vec!["Storage::*".to_string()],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn api_key_events_never_contain_the_full_key() {
        // GIVEN: events built from an API key
        let key = api_key();
        let events = [
            AuditEvent::api_key_created(&key),
            AuditEvent::permission_granted(&key, "Storage::*"),
            AuditEvent::permission_revoked(&key, "Storage::*"),
            AuditEvent::api_key_denied(&key, "KeyValue"),
        ];

        // WHEN/THEN: serialized output carries only the hint
        for event in &events {
            let json = serde_json::to_string(event).unwrap();
            assert!(json.contains("\"key_hint\":\"abcdef\""), "{json}");
            assert!(!json.contains(&key.key), "{json}");
        }
    }

    #[test]
    fn rejected_event_contains_reason() {
        let event = AuditEvent::token_rejected(Some(7), "invalid signature");
        assert_eq!(event.event, "token.rejected");
        assert_eq!(event.token_id, Some(7));
        assert_eq!(event.reason.as_deref(), Some("invalid signature"));
        assert!(event.identity.is_none());
    }

    #[test]
    fn empty_fields_are_omitted() {
        let json = serde_json::to_string(&AuditEvent::token_rejected(None, "x")).unwrap();
        assert_eq!(json, r#"{"event":"token.rejected","reason":"x"}"#);
    }

    #[test]
    fn emit_does_not_panic() {
        emit(&AuditEvent::api_key_created(&api_key()));
    }
}
