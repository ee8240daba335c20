//! Vulcan authorization core: external sign-in to per-application access
//! tokens, plus self-service API keys with wildcard service permissions.
//!
//! # Flow
//!
//! ```text
//! POST /auth/signin/{provider}  {idToken, appId}
//!   -> IdentityLinker   verify provider assertion, find or create identity
//!   -> AccessTokenIssuer  persist pending token, return activationKey
//!
//! POST /auth/activate  {activationToken}   (HMAC-signed by the application)
//!   -> AccessTokenActivator  verify with app secret, set expiry = now + ttl
//!
//! Authorization: Bearer <accessKey>
//!   -> TokenAuthenticator  usable iff activated and now < expire_at
//!
//! X-Api-Key: <key>  on  /authorize/{service}
//!   -> PermissionChecker  key must hold "<service>::*"
//! ```
//!
//! Every component depends on the narrow store trait it needs; [`AuthService`]
//! wires them to a single backend.

pub mod activation;
pub mod api_key;
pub mod assertion;
pub mod audit;
pub mod credential;
pub mod error;
pub mod handler;
pub mod identity;
pub mod model;
pub mod store;
pub mod token;

use std::{collections::HashMap, sync::Arc};

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::TokenConfig;

pub use api_key::{ApiKeyRegistry, PermissionChecker};
pub use assertion::{AssertionError, AssertionValidator, OidcAssertionValidator, VerifiedAssertion};
pub use credential::{CredentialGenerator, RandomHexGenerator};
pub use error::{AuthError, AuthResult};
pub use identity::IdentityLinker;
pub use model::{AccessToken, ApiKey, Application, Identity, LinkedAccessToken, ReactivationPolicy};
pub use store::{
    AccessTokenStore, ApiKeyStore, ApiKeyUpdate, ApplicationStore, IdentityStore, InMemoryStore,
    ProviderAccountStore, StoreError,
};
pub use token::{AccessTokenActivator, AccessTokenIssuer, TokenAuthenticator};

use model::NewApplication;

/// Central coordinator for the authorization core.
///
/// Holds one [`IdentityLinker`] per configured provider and the token and
/// API-key components, all sharing one store.
pub struct AuthService {
    linkers: HashMap<String, IdentityLinker>,
    applications: Arc<dyn ApplicationStore>,
    accounts: Arc<dyn ProviderAccountStore>,
    identities: Arc<dyn IdentityStore>,
    issuer: AccessTokenIssuer,
    activator: AccessTokenActivator,
    authenticator: TokenAuthenticator,
    api_keys: ApiKeyRegistry,
    permissions: PermissionChecker,
}

impl AuthService {
    /// Build a service over `store` with no providers registered.
    pub fn new<S>(
        store: Arc<S>,
        tokens: &TokenConfig,
        generator: Arc<dyn CredentialGenerator>,
    ) -> crate::Result<Self>
    where
        S: ApplicationStore + IdentityStore + ProviderAccountStore + AccessTokenStore + ApiKeyStore,
    {
        let ttl = tokens.activation_ttl()?;
        Ok(Self {
            linkers: HashMap::new(),
            applications: store.clone(),
            accounts: store.clone(),
            identities: store.clone(),
            issuer: AccessTokenIssuer::new(store.clone(), generator.clone()),
            activator: AccessTokenActivator::new(store.clone(), ttl, tokens.reactivation),
            authenticator: TokenAuthenticator::new(store.clone()),
            api_keys: ApiKeyRegistry::new(store.clone(), generator),
            permissions: PermissionChecker::new(store),
        })
    }

    /// Accept sign-ins from `provider`, validating assertions for `audience`.
    #[must_use]
    pub fn with_provider(
        mut self,
        provider: &str,
        audience: &str,
        validator: Arc<dyn AssertionValidator>,
    ) -> Self {
        let linker = IdentityLinker::new(
            provider,
            audience,
            validator,
            self.accounts.clone(),
            self.identities.clone(),
        );
        self.linkers.insert(provider.to_string(), linker);
        self
    }

    /// Names of the registered providers.
    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.linkers.values().map(IdentityLinker::provider)
    }

    /// Register an application allowed to request access tokens.
    pub async fn register_application(&self, uuid: Uuid, secret_key: &str) -> AuthResult<Application> {
        let app = self
            .applications
            .create_application(NewApplication {
                uuid,
                secret_key: secret_key.to_string(),
            })
            .await?;
        info!(application = %app.uuid, "Registered application");
        Ok(app)
    }

    /// Look up an application by its public id.
    pub async fn application(&self, uuid: Uuid) -> AuthResult<Option<Application>> {
        Ok(self.applications.find_application_by_uuid(uuid).await?)
    }

    /// Sign in through `provider` on behalf of application `app_id` and
    /// return the pending token. Only its activation key may be disclosed.
    pub async fn sign_in(&self, provider: &str, id_token: &str, app_id: &str) -> AuthResult<AccessToken> {
        let Some(linker) = self.linkers.get(provider) else {
            return Err(AuthError::BadRequest(format!("unknown provider: {provider}")));
        };

        let app_uuid = Uuid::parse_str(app_id)
            .map_err(|_| AuthError::BadRequest("invalid appId".to_string()))?;
        let Some(application) = self.application(app_uuid).await? else {
            debug!(application = %app_uuid, "Sign-in for unknown application");
            return Err(AuthError::BadRequest("invalid appId".to_string()));
        };

        let identity = linker.link_external_identity(id_token).await?;
        self.issuer.issue(&identity, &application).await
    }

    /// Activate the token referenced by an application-signed assertion.
    pub async fn activate(&self, activation_token: &str) -> AuthResult<AccessToken> {
        self.activator.activate(activation_token).await
    }

    /// Resolve a presented access key to its token, identity and application.
    pub async fn authenticate(&self, access_key: &str) -> AuthResult<LinkedAccessToken> {
        self.authenticator.authenticate(access_key).await
    }

    /// Identity behind a presented access key.
    pub async fn who_am_i(&self, access_key: &str) -> AuthResult<Identity> {
        Ok(self.authenticate(access_key).await?.identity)
    }

    /// Create an API key owned by `owner`.
    pub async fn create_api_key(&self, owner: Uuid, comment: &str) -> AuthResult<ApiKey> {
        self.api_keys.create(owner, comment).await
    }

    /// API keys owned by `owner`, oldest first.
    pub async fn list_api_keys(&self, owner: Uuid) -> AuthResult<Vec<ApiKey>> {
        self.api_keys.list(owner).await
    }

    /// Grant `permission` on one of `owner`'s keys.
    pub async fn grant_permission(&self, owner: Uuid, key: &str, permission: &str) -> AuthResult<ApiKey> {
        self.api_keys.add_permission(owner, key, permission).await
    }

    /// Revoke `permission` from one of `owner`'s keys.
    pub async fn revoke_permission(&self, owner: Uuid, key: &str, permission: &str) -> AuthResult<ApiKey> {
        self.api_keys.remove_permission(owner, key, permission).await
    }

    /// Check that `presented` grants access to `service`.
    pub async fn authorize(&self, presented: &str, service: &str) -> AuthResult<ApiKey> {
        self.permissions.check(presented, service).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    struct RejectAll;

    #[async_trait::async_trait]
    impl AssertionValidator for RejectAll {
        async fn validate(&self, _assertion: &str, _audience: &str) -> Result<VerifiedAssertion, AssertionError> {
            Err(AssertionError::MissingClaim("sub"))
        }
    }

    async fn service() -> (AuthService, Uuid) {
        let service = AuthService::new(
            Arc::new(InMemoryStore::new()),
            &TokenConfig::default(),
            Arc::new(RandomHexGenerator),
        )
        .unwrap()
        .with_provider("google", "client-id", Arc::new(RejectAll));
        let app = Uuid::new_v4();
        service.register_application(app, "secret").await.unwrap();
        (service, app)
    }

    #[tokio::test]
    async fn sign_in_with_unknown_provider_is_bad_request() {
        let (service, app) = service().await;
        let result = service.sign_in("github", "token", &app.to_string()).await;
        assert!(matches!(result, Err(AuthError::BadRequest(ref m)) if m.contains("github")));
    }

    #[tokio::test]
    async fn sign_in_with_malformed_or_unknown_app_is_invalid_app_id() {
        let (service, _) = service().await;

        for app_id in ["not-a-uuid", &Uuid::new_v4().to_string()] {
            let result = service.sign_in("google", "token", app_id).await;
            assert!(
                matches!(result, Err(AuthError::BadRequest(ref m)) if m == "invalid appId"),
                "{app_id}"
            );
        }
    }

    #[tokio::test]
    async fn sign_in_propagates_assertion_rejection() {
        let (service, app) = service().await;
        let result = service.sign_in("google", "token", &app.to_string()).await;
        assert!(matches!(result, Err(AuthError::AssertionInvalid(_))));
    }

    #[tokio::test]
    async fn sign_in_with_unreachable_provider_keys_is_internal() {
        // GIVEN: a provider whose key set cannot be fetched
        let provider = crate::config::ProviderConfig {
            name: "corp".to_string(),
            issuer: "https://login.example.com".to_string(),
            audience: "client-id".to_string(),
            jwks_uri: Some("http://127.0.0.1:1/jwks".to_string()),
        };
        let validator = OidcAssertionValidator::new(&provider).unwrap();
        let (service, app) = service().await;
        let service = service.with_provider("corp", "client-id", Arc::new(validator));

        // WHEN: signing in with a well-formed RS256 assertion
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","kid":"k1"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"123"}"#);
        let token = format!("{header}.{payload}.c2ln");
        let result = service.sign_in("corp", &token, &app.to_string()).await;

        // THEN: the caller gets a retryable internal error, not a rejection
        assert!(matches!(result, Err(AuthError::Internal(ref m)) if m.contains("JWKS")));
    }

    #[tokio::test]
    async fn duplicate_application_registration_fails() {
        let (service, app) = service().await;
        let result = service.register_application(app, "other").await;
        assert!(matches!(result, Err(AuthError::Internal(_))));
    }

    #[tokio::test]
    async fn providers_lists_registered_names() {
        let (service, _) = service().await;
        assert_eq!(service.providers().collect::<Vec<_>>(), vec!["google"]);
    }
}
