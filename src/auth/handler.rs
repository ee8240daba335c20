//! HTTP handlers for the authorization endpoints.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `GET` | `/ping` | none | Liveness check |
//! | `GET` | `/applications/{uuid}` | none | Public application record |
//! | `POST` | `/auth/signin/{provider}` | none | Provider assertion to activation key |
//! | `POST` | `/auth/activate` | none | Signed activation token to access credentials |
//! | `GET` | `/auth/me` | bearer | Identity behind the access key |
//! | `GET` | `/api-keys` | bearer | List the caller's API keys |
//! | `POST` | `/api-keys` | bearer | Create an API key |
//! | `POST` | `/api-keys/{key}/permissions` | bearer | Grant a permission |
//! | `DELETE` | `/api-keys/{key}/permissions/{permission}` | bearer | Revoke a permission |
//! | `GET` | `/authorize/{service}` | `X-Api-Key` | Check a key against `<service>::*` |
//!
//! Bearer routes expect `Authorization: Bearer <accessKey>`; the identity it
//! resolves to is the owner for every API-key operation.
//!
//! Errors are rendered as `{"error": <code>, "message": <text>}`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};
use uuid::Uuid;

use super::{
    AuthService,
    error::{AuthError, AuthResult},
    model::{ApiKey, Identity},
};

/// Header carrying the API key on `/authorize/{service}`.
pub const API_KEY_HEADER: &str = "x-api-key";

// ── Request / Response types ───────────────────────────────────────────────

/// `POST /auth/signin/{provider}` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    /// Raw provider assertion (e.g. a Google ID token).
    pub id_token: String,
    /// Application the token is requested for.
    pub app_id: String,
}

/// `POST /auth/signin/{provider}` response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
    /// Key the application signs into its activation token.
    pub activation_key: String,
}

/// `POST /auth/activate` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateRequest {
    /// HMAC-signed JWT carrying an `activationKey` claim.
    pub activation_token: String,
}

/// `POST /auth/activate` response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateResponse {
    /// Bearer credential for subsequent requests.
    pub access_key: String,
    /// Secret half of the credential pair.
    pub secret_key: String,
    /// End of validity.
    pub expire_at: DateTime<Utc>,
}

/// `GET /auth/me` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    /// Identity id.
    pub uuid: Uuid,
    /// Email address.
    pub email: String,
    /// Display name.
    pub username: String,
}

impl From<Identity> for MeResponse {
    fn from(identity: Identity) -> Self {
        Self {
            uuid: identity.uuid,
            email: identity.email,
            username: identity.username,
        }
    }
}

/// Public view of an API key.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyResponse {
    /// Key value.
    pub key: String,
    /// Free-form note.
    pub comment: String,
    /// Granted permissions, e.g. `Storage::*`.
    pub permissions: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl From<ApiKey> for ApiKeyResponse {
    fn from(key: ApiKey) -> Self {
        Self {
            key: key.key,
            comment: key.comment,
            permissions: key.permissions,
            created_at: key.created_at,
        }
    }
}

/// `POST /api-keys` body.
#[derive(Debug, Default, Deserialize)]
pub struct CreateApiKeyRequest {
    /// Free-form note.
    #[serde(default)]
    pub comment: String,
}

/// `POST /api-keys/{key}/permissions` body.
#[derive(Debug, Deserialize)]
pub struct GrantPermissionRequest {
    /// Permission to add.
    pub permission: String,
}

/// `GET /applications/{uuid}` response. Never includes the secret.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApplicationResponse {
    /// Application id.
    pub uuid: Uuid,
}

// ── Route builder ─────────────────────────────────────────────────────────

/// Build the authorization routes.
pub fn auth_routes(service: Arc<AuthService>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/applications/{uuid}", get(get_application))
        .route("/auth/signin/{provider}", post(sign_in))
        .route("/auth/activate", post(activate))
        .route("/auth/me", get(me))
        .route("/api-keys", get(list_api_keys).post(create_api_key))
        .route("/api-keys/{key}/permissions", post(grant_permission))
        .route(
            "/api-keys/{key}/permissions/{permission}",
            delete(revoke_permission),
        )
        .route("/authorize/{service}", get(authorize))
        .with_state(service)
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn ping() -> &'static str {
    "pong"
}

/// `GET /applications/{uuid}`
async fn get_application(
    State(svc): State<Arc<AuthService>>,
    Path(uuid): Path<String>,
) -> Response {
    let Ok(uuid) = Uuid::parse_str(&uuid) else {
        return AuthError::BadRequest("invalid application uuid".to_string()).into_response();
    };
    match svc.application(uuid).await {
        Ok(Some(app)) => Json(ApplicationResponse { uuid: app.uuid }).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "not_found", "application not found"),
        Err(e) => e.into_response(),
    }
}

/// `POST /auth/signin/{provider}`
async fn sign_in(
    State(svc): State<Arc<AuthService>>,
    Path(provider): Path<String>,
    Json(body): Json<SignInRequest>,
) -> AuthResult<Json<SignInResponse>> {
    let token = svc.sign_in(&provider, &body.id_token, &body.app_id).await?;
    Ok(Json(SignInResponse {
        activation_key: token.activation_key,
    }))
}

/// `POST /auth/activate`
async fn activate(
    State(svc): State<Arc<AuthService>>,
    Json(body): Json<ActivateRequest>,
) -> AuthResult<Json<ActivateResponse>> {
    let token = svc.activate(&body.activation_token).await?;
    let expire_at = token
        .expire_at()
        .ok_or_else(|| AuthError::Internal("activated token has no expiry".to_string()))?;
    Ok(Json(ActivateResponse {
        access_key: token.access_key,
        secret_key: token.secret_key,
        expire_at,
    }))
}

/// `GET /auth/me`
async fn me(State(svc): State<Arc<AuthService>>, headers: HeaderMap) -> AuthResult<Json<MeResponse>> {
    let identity = svc.who_am_i(bearer_token(&headers)?).await?;
    Ok(Json(identity.into()))
}

/// `GET /api-keys`
async fn list_api_keys(
    State(svc): State<Arc<AuthService>>,
    headers: HeaderMap,
) -> AuthResult<Json<Vec<ApiKeyResponse>>> {
    let owner = caller(&svc, &headers).await?;
    let keys = svc.list_api_keys(owner).await?;
    Ok(Json(keys.into_iter().map(Into::into).collect()))
}

/// `POST /api-keys`
async fn create_api_key(
    State(svc): State<Arc<AuthService>>,
    headers: HeaderMap,
    Json(body): Json<CreateApiKeyRequest>,
) -> AuthResult<(StatusCode, Json<ApiKeyResponse>)> {
    let owner = caller(&svc, &headers).await?;
    let key = svc.create_api_key(owner, &body.comment).await?;
    Ok((StatusCode::CREATED, Json(key.into())))
}

/// `POST /api-keys/{key}/permissions`
async fn grant_permission(
    State(svc): State<Arc<AuthService>>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Json(body): Json<GrantPermissionRequest>,
) -> AuthResult<Json<ApiKeyResponse>> {
    let owner = caller(&svc, &headers).await?;
    let key = svc.grant_permission(owner, &key, &body.permission).await?;
    Ok(Json(key.into()))
}

/// `DELETE /api-keys/{key}/permissions/{permission}`
async fn revoke_permission(
    State(svc): State<Arc<AuthService>>,
    headers: HeaderMap,
    Path((key, permission)): Path<(String, String)>,
) -> AuthResult<Json<ApiKeyResponse>> {
    let owner = caller(&svc, &headers).await?;
    let key = svc.revoke_permission(owner, &key, &permission).await?;
    Ok(Json(key.into()))
}

/// `GET /authorize/{service}`
async fn authorize(
    State(svc): State<Arc<AuthService>>,
    headers: HeaderMap,
    Path(service): Path<String>,
) -> AuthResult<Json<ApiKeyResponse>> {
    let presented = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let key = svc.authorize(presented, &service).await?;
    Ok(Json(key.into()))
}

// ── Helpers ───────────────────────────────────────────────────────────────

/// Extract the access key from `Authorization: Bearer <key>`.
fn bearer_token(headers: &HeaderMap) -> AuthResult<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::Unauthenticated)
}

/// Identity UUID of the authenticated caller.
async fn caller(svc: &AuthService, headers: &HeaderMap) -> AuthResult<Uuid> {
    Ok(svc.who_am_i(bearer_token(headers)?).await?.uuid)
}

/// Create a JSON error response.
fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    (status, Json(json!({"error": error, "message": message}))).into_response()
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            Self::AssertionInvalid(e) => {
                warn!(error = %e, "Provider assertion rejected");
                error_response(StatusCode::UNAUTHORIZED, "invalid_token", "invalid id token")
            }
            Self::InvalidSignature | Self::InvalidSigningMethod(_) => {
                error_response(StatusCode::UNAUTHORIZED, "invalid_token", "invalid token")
            }
            Self::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                Json(json!({"error": "unauthenticated", "message": "authentication required"})),
            )
                .into_response(),
            Self::TokenNotFound => {
                error_response(StatusCode::NOT_FOUND, "not_found", "access token not found")
            }
            Self::BadRequest(msg) => error_response(StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Unauthorized => {
                error_response(StatusCode::FORBIDDEN, "forbidden", "authorization failed")
            }
            Self::InsufficientPermission(_) => error_response(
                StatusCode::FORBIDDEN,
                "insufficient_permission",
                &self.to_string(),
            ),
            Self::AlreadyActivated => {
                error_response(StatusCode::CONFLICT, "already_activated", &self.to_string())
            }
            Self::Internal(msg) => {
                error!(error = %msg, "Internal error");
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "unknown error, please retry later",
                )
            }
        }
    }
}
