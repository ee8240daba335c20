//! External identity-provider assertions.
//!
//! The core never checks a provider signature itself: it asks an
//! [`AssertionValidator`] for a verified subject and display claims.
//! [`OidcAssertionValidator`] is the production implementation for OIDC ID
//! tokens (Google and compatible issuers).
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to read `alg` and `kid`.
//! 2. Reject anything but RSA/EC signatures.
//! 3. Fetch the issuer's JWKS (cached for 1 hour; refreshed once on unknown `kid`).
//! 4. Verify signature, `exp`, `iss` and `aud` with 60 seconds of leeway.
//! 5. Return a [`VerifiedAssertion`].

use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::{
    Algorithm, DecodingKey, TokenData, Validation,
    jwk::{AlgorithmParameters, JwkSet},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ProviderConfig;

/// Failures reported by an assertion validator.
#[derive(Debug, thiserror::Error)]
pub enum AssertionError {
    /// JWT decode / signature / claim validation failed.
    #[error("JWT verification failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// The JWT header contains no `kid` field.
    #[error("JWT missing 'kid' field in header")]
    MissingKeyId,

    /// The `kid` in the JWT header is not in the issuer's JWKS.
    #[error("Unknown key ID: {0}")]
    UnknownKeyId(String),

    /// The assertion is signed with an algorithm providers do not use.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A claim required to create an identity is absent.
    #[error("Missing claim: {0}")]
    MissingClaim(&'static str),

    /// Network or HTTP error while fetching JWKS.
    #[error("JWKS fetch error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AssertionError {
    /// Whether the provider's keys could not be reached, as opposed to the
    /// assertion itself being bad.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

/// Subject and display claims of a verified provider assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedAssertion {
    /// Provider `sub` claim.
    pub subject: String,
    /// Email address.
    pub email: String,
    /// Display name, when the provider sends one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Verifies raw provider assertions for an expected audience.
#[async_trait::async_trait]
pub trait AssertionValidator: Send + Sync + 'static {
    /// Verify `assertion` and return its subject and claims.
    async fn validate(
        &self,
        assertion: &str,
        audience: &str,
    ) -> Result<VerifiedAssertion, AssertionError>;
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// JWKS cache keyed by JWKS URI.
pub struct JwksCache {
    inner: DashMap<String, CachedJwks>,
    http: reqwest::Client,
    ttl: Duration,
}

impl JwksCache {
    /// Create with the default 1-hour TTL.
    ///
    /// Fails if the HTTPS-only client cannot be built (e.g. no TLS backend).
    pub fn new() -> Result<Self, AssertionError> {
        let http = reqwest::Client::builder()
            .https_only(true)
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            inner: DashMap::new(),
            http,
            ttl: Duration::from_secs(3600),
        })
    }

    /// Return the cached JWKS for `jwks_uri`, fetching it if stale or if
    /// `force_refresh` is set.
    pub async fn get_or_fetch(&self, jwks_uri: &str, force_refresh: bool) -> Result<JwkSet, AssertionError> {
        if !force_refresh
            && let Some(cached) = self.inner.get(jwks_uri)
            && cached.fetched_at.elapsed() < self.ttl
        {
            return Ok(cached.keys.clone());
        }

        debug!(jwks_uri = %jwks_uri, "Fetching JWKS");
        let jwks: JwkSet = self.http.get(jwks_uri).send().await?.json().await?;
        self.inner.insert(
            jwks_uri.to_string(),
            CachedJwks {
                keys: jwks.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(jwks)
    }
}

/// OIDC ID-token validator for a single issuer.
pub struct OidcAssertionValidator {
    issuer: String,
    jwks_uri: String,
    jwks: JwksCache,
}

impl OidcAssertionValidator {
    /// Build from a provider configuration entry.
    pub fn new(provider: &ProviderConfig) -> Result<Self, AssertionError> {
        let jwks_uri = provider
            .jwks_uri
            .clone()
            .unwrap_or_else(|| default_jwks_uri(&provider.issuer));
        Ok(Self {
            issuer: provider.issuer.clone(),
            jwks_uri,
            jwks: JwksCache::new()?,
        })
    }

    async fn find_decoding_key(&self, kid: &str) -> Result<DecodingKey, AssertionError> {
        let jwks = self.jwks.get_or_fetch(&self.jwks_uri, false).await?;
        if let Some(key) = find_key_in_jwks(&jwks, kid) {
            return Ok(key);
        }

        debug!(kid = %kid, "Key not found in cached JWKS, refreshing");
        let jwks = self.jwks.get_or_fetch(&self.jwks_uri, true).await?;
        find_key_in_jwks(&jwks, kid).ok_or_else(|| AssertionError::UnknownKeyId(kid.to_string()))
    }
}

#[async_trait::async_trait]
impl AssertionValidator for OidcAssertionValidator {
    async fn validate(
        &self,
        assertion: &str,
        audience: &str,
    ) -> Result<VerifiedAssertion, AssertionError> {
        let header = jsonwebtoken::decode_header(assertion)?;
        let alg = provider_algorithm(header.alg)?;
        let kid = header.kid.ok_or(AssertionError::MissingKeyId)?;
        let key = self.find_decoding_key(&kid).await?;

        let mut validation = Validation::new(alg);
        validation.leeway = 60;
        validation.set_audience(&[audience]);
        // Google issues both the scheme-qualified and the bare issuer form.
        let bare_issuer = self.issuer.trim_start_matches("https://");
        validation.set_issuer(&[self.issuer.as_str(), bare_issuer]);

        let data: TokenData<IdTokenClaims> = jsonwebtoken::decode(assertion, &key, &validation)?;
        let claims = data.claims;
        let email = claims.email.ok_or(AssertionError::MissingClaim("email"))?;

        Ok(VerifiedAssertion {
            subject: claims.sub,
            email,
            name: claims.name,
        })
    }
}

/// Only asymmetric algorithms are acceptable for provider-signed tokens.
fn provider_algorithm(alg: Algorithm) -> Result<Algorithm, AssertionError> {
    match alg {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::ES256
        | Algorithm::ES384 => Ok(alg),
        other => Err(AssertionError::UnsupportedAlgorithm(format!("{other:?}"))),
    }
}

fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    let jwk = jwks
        .keys
        .iter()
        .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))?;

    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        AlgorithmParameters::EllipticCurve(ec) => {
            DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
        }
        AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
    }
}

/// Google publishes its signing keys outside the issuer origin.
const GOOGLE_JWKS_URI: &str = "https://www.googleapis.com/oauth2/v3/certs";

/// Derive the JWKS URI from the issuer following OIDC discovery conventions.
fn default_jwks_uri(issuer: &str) -> String {
    let base = issuer.trim_end_matches('/');
    if base.trim_start_matches("https://") == "accounts.google.com" {
        return GOOGLE_JWKS_URI.to_string();
    }
    format!("{base}/.well-known/jwks.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use jsonwebtoken::{EncodingKey, Header};

    fn provider() -> ProviderConfig {
        ProviderConfig {
            name: "google".to_string(),
            issuer: "https://accounts.google.com".to_string(),
            audience: "client-id".to_string(),
            jwks_uri: None,
        }
    }

    #[test]
    fn default_jwks_uri_handles_trailing_slash() {
        assert_eq!(
            default_jwks_uri("https://login.example.com/"),
            "https://login.example.com/.well-known/jwks.json"
        );
    }

    #[test]
    fn google_issuer_uses_googleapis_certs() {
        assert_eq!(default_jwks_uri("https://accounts.google.com"), GOOGLE_JWKS_URI);
        assert_eq!(default_jwks_uri("accounts.google.com/"), GOOGLE_JWKS_URI);
    }

    #[test]
    fn explicit_jwks_uri_wins() {
        let mut cfg = provider();
        cfg.jwks_uri = Some("https://keys.example.com/jwks".to_string());
        let validator = OidcAssertionValidator::new(&cfg).unwrap();
        assert_eq!(validator.jwks_uri, "https://keys.example.com/jwks");
    }

    #[tokio::test]
    async fn rejects_hmac_signed_assertion_before_fetching_keys() {
        // GIVEN: an HS256 token, which no OIDC provider issues
        let token = jsonwebtoken::encode(
            &Header::default(),
            &serde_json::json!({"sub": "123", "email": "a@b.c"}),
            &EncodingKey::from_secret(b"shared"),
        )
        .unwrap();

        // WHEN: validating it
        let result = OidcAssertionValidator::new(&provider())
            .unwrap()
            .validate(&token, "client-id")
            .await;

        // THEN: it fails on the algorithm check
        assert!(matches!(result, Err(AssertionError::UnsupportedAlgorithm(_))));
    }

    #[tokio::test]
    async fn rejects_header_without_kid() {
        // GIVEN: an RS256 header with no key id
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"123"}"#);
        let token = format!("{header}.{payload}.c2ln");

        // WHEN/THEN: validation fails without any network access
        let result = OidcAssertionValidator::new(&provider())
            .unwrap()
            .validate(&token, "client-id")
            .await;
        assert!(matches!(result, Err(AssertionError::MissingKeyId)));
    }

    #[tokio::test]
    async fn rejects_garbage() {
        let result = OidcAssertionValidator::new(&provider())
            .unwrap()
            .validate("not-a-jwt", "client-id")
            .await;
        assert!(matches!(result, Err(AssertionError::Jwt(_))));
    }

    #[tokio::test]
    async fn unreachable_jwks_is_a_transport_error() {
        // GIVEN: a provider whose key set lives on a plain-http URL
        let mut cfg = provider();
        cfg.jwks_uri = Some("http://127.0.0.1:1/jwks".to_string());
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","kid":"k1"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"123"}"#);
        let token = format!("{header}.{payload}.c2ln");

        // WHEN: validating an otherwise well-formed RS256 assertion
        let result = OidcAssertionValidator::new(&cfg)
            .unwrap()
            .validate(&token, "client-id")
            .await;

        // THEN: the HTTPS-only client refuses the fetch
        let err = result.unwrap_err();
        assert!(err.is_transport(), "{err}");
    }

    #[test]
    fn jwks_cache_builds_https_only_client() {
        assert!(JwksCache::new().is_ok());
    }
}
