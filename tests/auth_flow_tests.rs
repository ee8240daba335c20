//! End-to-end authorization flow tests
//!
//! Drives [`AuthService`] the way the HTTP layer does:
//! - sign-in through a provider, yielding a pending token
//! - activation with an application-signed assertion
//! - bearer authentication
//! - API key management and service authorization

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tokio_test::assert_ok;
use uuid::Uuid;
use vulcan_auth::auth::activation::sign_activation;
use vulcan_auth::auth::{
    AssertionError, AssertionValidator, AuthError, AuthService, InMemoryStore, RandomHexGenerator,
    ReactivationPolicy, VerifiedAssertion,
};
use vulcan_auth::config::TokenConfig;

/// Accepts assertions of the form `subject|email|name`.
struct FakeProvider;

#[async_trait::async_trait]
impl AssertionValidator for FakeProvider {
    async fn validate(
        &self,
        assertion: &str,
        audience: &str,
    ) -> Result<VerifiedAssertion, AssertionError> {
        if audience != "vulcan-client" {
            return Err(AssertionError::MissingClaim("aud"));
        }
        let mut parts = assertion.splitn(3, '|');
        let subject = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or(AssertionError::MissingClaim("sub"))?;
        let email = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or(AssertionError::MissingClaim("email"))?;
        Ok(VerifiedAssertion {
            subject: subject.to_string(),
            email: email.to_string(),
            name: parts.next().map(ToString::to_string),
        })
    }
}

const APP_SECRET: &str = "app-secret";
const OTHER_SECRET: &str = "other-secret";

struct Harness {
    service: AuthService,
    app: Uuid,
    other_app: Uuid,
}

async fn harness(policy: ReactivationPolicy) -> Harness {
    let tokens = TokenConfig {
        reactivation: policy,
        ..TokenConfig::default()
    };
    let service = AuthService::new(
        Arc::new(InMemoryStore::new()),
        &tokens,
        Arc::new(RandomHexGenerator),
    )
    .unwrap()
    .with_provider("google", "vulcan-client", Arc::new(FakeProvider));

    let app = Uuid::new_v4();
    let other_app = Uuid::new_v4();
    service.register_application(app, APP_SECRET).await.unwrap();
    service
        .register_application(other_app, OTHER_SECRET)
        .await
        .unwrap();

    Harness {
        service,
        app,
        other_app,
    }
}

/// Sign in and activate, returning the access key.
async fn signed_in(h: &Harness, assertion: &str) -> String {
    let pending = h
        .service
        .sign_in("google", assertion, &h.app.to_string())
        .await
        .unwrap();
    let activation = sign_activation(&pending.activation_key, APP_SECRET).unwrap();
    h.service.activate(&activation).await.unwrap().access_key
}

#[tokio::test]
async fn sign_in_activate_and_authenticate() {
    // GIVEN: a registered application and provider
    let h = harness(ReactivationPolicy::Refresh).await;

    // WHEN: a user signs in
    let pending = h
        .service
        .sign_in("google", "sub-1|alice@example.com|Alice", &h.app.to_string())
        .await
        .unwrap();

    // THEN: the token is pending and cannot authenticate yet
    assert!(!pending.is_activated());
    assert!(matches!(
        h.service.authenticate(&pending.access_key).await,
        Err(AuthError::Unauthenticated)
    ));

    // WHEN: the application signs the activation key with its secret
    let activation = sign_activation(&pending.activation_key, APP_SECRET).unwrap();
    let active = h.service.activate(&activation).await.unwrap();

    // THEN: the token is active for about seven days and authenticates
    let ttl = active.expire_at().unwrap() - chrono::Utc::now();
    assert!(ttl > chrono::Duration::days(7) - chrono::Duration::minutes(1));
    assert!(ttl <= chrono::Duration::days(7));

    let linked = h.service.authenticate(&active.access_key).await.unwrap();
    assert_eq!(linked.application.uuid, h.app);
    let me = h.service.who_am_i(&active.access_key).await.unwrap();
    assert_eq!(me.email, "alice@example.com");
    assert_eq!(me.username, "Alice");
}

#[tokio::test]
async fn repeat_sign_in_reuses_identity_and_issues_new_token() {
    let h = harness(ReactivationPolicy::Refresh).await;

    let first = signed_in(&h, "sub-1|alice@example.com|Alice").await;
    let second = signed_in(&h, "sub-1|alice@example.com|Alice").await;

    assert!(first != second);
    let a = h.service.who_am_i(&first).await.unwrap();
    let b = h.service.who_am_i(&second).await.unwrap();
    assert_eq!(a.uuid, b.uuid);
}

#[tokio::test]
async fn activation_signed_by_another_application_is_rejected() {
    // GIVEN: a token issued for `app`
    let h = harness(ReactivationPolicy::Refresh).await;
    let pending = h
        .service
        .sign_in("google", "sub-1|alice@example.com", &h.app.to_string())
        .await
        .unwrap();

    // WHEN: the activation is signed with a different application's secret
    let forged = sign_activation(&pending.activation_key, OTHER_SECRET).unwrap();
    let result = h.service.activate(&forged).await;

    // THEN: verification fails and the token stays pending
    assert!(matches!(result, Err(AuthError::InvalidSignature)));
    assert!(h.service.authenticate(&pending.access_key).await.is_err());
    assert!(h.service.application(h.other_app).await.unwrap().is_some());
}

#[tokio::test]
async fn activation_with_unknown_key_is_not_found() {
    let h = harness(ReactivationPolicy::Refresh).await;
    let activation = sign_activation("does-not-exist", APP_SECRET).unwrap();
    assert!(matches!(
        h.service.activate(&activation).await,
        Err(AuthError::TokenNotFound)
    ));
}

#[tokio::test]
async fn reactivation_follows_policy() {
    for (policy, succeeds) in [
        (ReactivationPolicy::Refresh, true),
        (ReactivationPolicy::Reject, false),
    ] {
        // GIVEN: an already-activated token
        let h = harness(policy).await;
        let pending = h
            .service
            .sign_in("google", "sub-1|alice@example.com", &h.app.to_string())
            .await
            .unwrap();
        let activation = sign_activation(&pending.activation_key, APP_SECRET).unwrap();
        assert_ok!(h.service.activate(&activation).await);

        // WHEN: the same assertion is replayed
        let replay = h.service.activate(&activation).await;

        // THEN: refresh extends the token, reject reports a conflict
        if succeeds {
            assert!(replay.unwrap().is_activated());
        } else {
            assert!(matches!(replay, Err(AuthError::AlreadyActivated)));
        }
        assert_ok!(h.service.authenticate(&pending.access_key).await);
    }
}

#[tokio::test]
async fn api_key_lifecycle() {
    // GIVEN: an authenticated user with a fresh API key
    let h = harness(ReactivationPolicy::Refresh).await;
    let access_key = signed_in(&h, "sub-1|alice@example.com|Alice").await;
    let owner = h.service.who_am_i(&access_key).await.unwrap().uuid;
    let key = h.service.create_api_key(owner, "ci").await.unwrap();

    // THEN: a key without grants is recognized but insufficient
    assert!(matches!(
        h.service.authorize(&key.key, "Storage").await,
        Err(AuthError::InsufficientPermission(_))
    ));

    // WHEN: the owner grants Storage::*
    h.service
        .grant_permission(owner, &key.key, "Storage::*")
        .await
        .unwrap();

    // THEN: Storage is authorized, other services are not
    assert_ok!(h.service.authorize(&key.key, "Storage").await);
    assert!(h.service.authorize(&key.key, "KeyValue").await.is_err());

    // WHEN: the grant is revoked
    let revoked = h
        .service
        .revoke_permission(owner, &key.key, "Storage::*")
        .await
        .unwrap();

    // THEN: access is gone again
    assert!(revoked.permissions.is_empty());
    assert!(matches!(
        h.service.authorize(&key.key, "Storage").await,
        Err(AuthError::InsufficientPermission(_))
    ));
    assert_eq!(h.service.list_api_keys(owner).await.unwrap().len(), 1);
}

#[tokio::test]
async fn other_identities_cannot_modify_a_key() {
    let h = harness(ReactivationPolicy::Refresh).await;
    let alice = signed_in(&h, "sub-1|alice@example.com|Alice").await;
    let bob = signed_in(&h, "sub-2|bob@example.com|Bob").await;
    let alice = h.service.who_am_i(&alice).await.unwrap().uuid;
    let bob = h.service.who_am_i(&bob).await.unwrap().uuid;
    let key = h.service.create_api_key(alice, "").await.unwrap();

    assert!(matches!(
        h.service.grant_permission(bob, &key.key, "Storage::*").await,
        Err(AuthError::Unauthorized)
    ));
    assert!(matches!(
        h.service.revoke_permission(bob, &key.key, "Storage::*").await,
        Err(AuthError::BadRequest(_))
    ));
    assert!(h.service.list_api_keys(bob).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_api_key_is_unauthenticated() {
    let h = harness(ReactivationPolicy::Refresh).await;
    assert!(matches!(
        h.service.authorize("nope", "Storage").await,
        Err(AuthError::Unauthenticated)
    ));
}

#[tokio::test]
async fn sign_in_without_email_is_rejected() {
    let h = harness(ReactivationPolicy::Refresh).await;
    let result = h
        .service
        .sign_in("google", "sub-1|", &h.app.to_string())
        .await;
    assert!(matches!(result, Err(AuthError::AssertionInvalid(_))));
}
