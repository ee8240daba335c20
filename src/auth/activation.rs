//! Activation assertions: JWTs an application signs with its own secret to
//! promote a pending access token.
//!
//! Handling is split in two:
//!
//! 1. [`read_activation_key`] parses the payload **without** checking the
//!    signature, purely to learn which token the assertion talks about. Its
//!    output is untrusted.
//! 2. [`verify_activation`] re-parses the same assertion and verifies it with
//!    the secret of the application bound to the token found in step 1.
//!
//! The verification key is therefore always chosen by record lookup, never
//! supplied by the caller.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::error::{AuthError, AuthResult};

/// Claims carried by an activation assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationClaims {
    /// Activation key of the pending token.
    #[serde(rename = "activationKey")]
    pub activation_key: String,
    /// Optional expiry of the assertion itself (Unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// Step 1: extract the `activationKey` claim without verifying anything.
///
/// Fails with [`AuthError::BadRequest`] if the assertion is not a
/// structurally valid JWT carrying a string `activationKey`.
pub fn read_activation_key(assertion: &str) -> AuthResult<String> {
    let malformed = || AuthError::BadRequest("malformed activation token".to_string());

    let mut parts = assertion.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed());
    };

    let bytes = URL_SAFE_NO_PAD.decode(payload).map_err(|_| malformed())?;
    let claims: ActivationClaims = serde_json::from_slice(&bytes).map_err(|_| malformed())?;
    if claims.activation_key.is_empty() {
        return Err(malformed());
    }
    Ok(claims.activation_key)
}

/// Step 2: verify the assertion with `secret`, accepting only HMAC algorithms.
///
/// Returns [`AuthError::InvalidSigningMethod`] for non-HMAC headers and
/// [`AuthError::InvalidSignature`] for any other verification failure
/// (bad signature, expired `exp`, undecodable claims).
pub fn verify_activation(assertion: &str, secret: &str) -> AuthResult<ActivationClaims> {
    let header = jsonwebtoken::decode_header(assertion).map_err(|_| AuthError::InvalidSignature)?;
    if !is_hmac(header.alg) {
        return Err(AuthError::InvalidSigningMethod(format!("{:?}", header.alg)));
    }

    let mut validation = Validation::new(header.alg);
    validation.required_spec_claims.clear();
    validation.validate_aud = false;

    jsonwebtoken::decode::<ActivationClaims>(
        assertion,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::InvalidAlgorithm => {
            AuthError::InvalidSigningMethod(format!("{:?}", header.alg))
        }
        _ => AuthError::InvalidSignature,
    })
}

/// Produce an HS256 activation assertion for `activation_key`.
///
/// This is the application-side half of the protocol; the service itself
/// only uses it from the CLI and in tests.
pub fn sign_activation(activation_key: &str, secret: &str) -> AuthResult<String> {
    let claims = ActivationClaims {
        activation_key: activation_key.to_string(),
        exp: None,
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Internal(format!("failed to sign activation token: {e}")))
}

fn is_hmac(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}
