//! Persistence capabilities consumed by the authorization core.
//!
//! Each component depends only on the trait for the rows it touches
//! ([`ApplicationStore`], [`IdentityStore`], [`ProviderAccountStore`],
//! [`AccessTokenStore`], [`ApiKeyStore`]). A relational backend implements all
//! of them; [`InMemoryStore`] does the same over `DashMap` indices and is used
//! by the binary when no database is wired in, and by the tests.
//!
//! # Uniqueness
//!
//! The store, not the caller, enforces every uniqueness constraint:
//! `(provider, provider_subject)`, `access_key`, `activation_key`,
//! `Application.uuid` and `ApiKey.key`. Violations surface as
//! [`StoreError::Conflict`] so that check-then-insert races in the callers
//! resolve deterministically.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;
use uuid::Uuid;

use super::model::{
    AccessToken, ApiKey, Application, Identity, LinkedAccessToken, NewAccessToken, NewApplication,
    NewIdentity, NewProviderAccount, ProviderAccount, ReactivationPolicy, TokenState,
};

/// Errors reported by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    Conflict(String),

    /// A row references another row that does not exist.
    #[error("dangling reference: {0}")]
    Integrity(String),

    /// The backend itself failed (connection, I/O, ...).
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Application rows.
#[async_trait::async_trait]
pub trait ApplicationStore: Send + Sync + 'static {
    /// Insert an application. Fails with `Conflict` on a duplicate UUID.
    async fn create_application(&self, new: NewApplication) -> StoreResult<Application>;

    /// Look up an application by its public UUID.
    async fn find_application_by_uuid(&self, uuid: Uuid) -> StoreResult<Option<Application>>;
}

/// Identity rows.
#[async_trait::async_trait]
pub trait IdentityStore: Send + Sync + 'static {
    /// Insert an identity.
    async fn create_identity(&self, new: NewIdentity) -> StoreResult<Identity>;

    /// Look up an identity by surrogate key.
    async fn find_identity(&self, id: i64) -> StoreResult<Option<Identity>>;
}

/// Provider account rows.
#[async_trait::async_trait]
pub trait ProviderAccountStore: Send + Sync + 'static {
    /// Look up the account for `(provider, subject)`.
    async fn find_provider_account(
        &self,
        provider: &str,
        subject: &str,
    ) -> StoreResult<Option<ProviderAccount>>;

    /// Insert an account. Fails with `Conflict` if `(provider, subject)` exists.
    async fn create_provider_account(&self, new: NewProviderAccount)
    -> StoreResult<ProviderAccount>;
}

/// Access token rows.
#[async_trait::async_trait]
pub trait AccessTokenStore: Send + Sync + 'static {
    /// Insert a pending token. Fails with `Conflict` if either the access key
    /// or the activation key is already taken.
    async fn create_access_token(&self, new: NewAccessToken) -> StoreResult<AccessToken>;

    /// Load a token and its identity/application by activation key.
    async fn find_by_activation_key(&self, activation_key: &str)
    -> StoreResult<Option<LinkedAccessToken>>;

    /// Load a token and its identity/application by access key.
    async fn find_by_access_key(&self, access_key: &str) -> StoreResult<Option<LinkedAccessToken>>;

    /// Atomically mark the token active with `expire_at`.
    ///
    /// Implementations must perform the read and the write as one unit (row
    /// lock, transaction or compare-and-set). Returns `None` if the token no
    /// longer exists, or if `policy` is [`ReactivationPolicy::Reject`] and the
    /// token is already active.
    async fn activate_access_token(
        &self,
        activation_key: &str,
        expire_at: DateTime<Utc>,
        policy: ReactivationPolicy,
    ) -> StoreResult<Option<AccessToken>>;
}

/// API key rows.
#[async_trait::async_trait]
pub trait ApiKeyStore: Send + Sync + 'static {
    /// Insert a key. Fails with `Conflict` if the key string exists.
    async fn create_api_key(&self, key: ApiKey) -> StoreResult<ApiKey>;

    /// Look up a key by its value alone.
    async fn find_api_key(&self, key: &str) -> StoreResult<Option<ApiKey>>;

    /// All keys owned by `owner`, oldest first.
    async fn list_api_keys(&self, owner: Uuid) -> StoreResult<Vec<ApiKey>>;

    /// Apply `update` to `owner`'s key as one read-modify-write unit.
    ///
    /// Returns `None` if `owner` has no such key, otherwise the row after the
    /// update together with the closure's "changed" flag. Implementations
    /// must hold the row lock (or equivalent) across the closure.
    async fn update_owned_api_key(
        &self,
        owner: Uuid,
        key: &str,
        update: ApiKeyUpdate,
    ) -> StoreResult<Option<(ApiKey, bool)>>;
}

/// In-place mutation of an API key row; returns whether the row changed.
pub type ApiKeyUpdate = Box<dyn FnOnce(&mut ApiKey) -> bool + Send>;

/// In-memory store backed by `DashMap` indices.
///
/// - `tokens`: activation key → token (activation is an in-place entry update)
/// - `tokens_by_access_key`: access key → activation key
/// - `provider_accounts`: `(provider, subject)` → account
pub struct InMemoryStore {
    seq: AtomicI64,
    applications: DashMap<i64, Application>,
    application_ids: DashMap<Uuid, i64>,
    identities: DashMap<i64, Identity>,
    provider_accounts: DashMap<(String, String), ProviderAccount>,
    tokens: DashMap<String, AccessToken>,
    tokens_by_access_key: DashMap<String, String>,
    api_keys: DashMap<String, ApiKey>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            seq: AtomicI64::new(1),
            applications: DashMap::new(),
            application_ids: DashMap::new(),
            identities: DashMap::new(),
            provider_accounts: DashMap::new(),
            tokens: DashMap::new(),
            tokens_by_access_key: DashMap::new(),
            api_keys: DashMap::new(),
        }
    }

    fn next_id(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn link(&self, token: AccessToken) -> StoreResult<LinkedAccessToken> {
        let identity = self
            .identities
            .get(&token.identity_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::Integrity(format!("identity {}", token.identity_id)))?;
        let application = self
            .applications
            .get(&token.application_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| {
                StoreError::Integrity(format!("application {}", token.application_id))
            })?;
        Ok(LinkedAccessToken {
            token,
            identity,
            application,
        })
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ApplicationStore for InMemoryStore {
    async fn create_application(&self, new: NewApplication) -> StoreResult<Application> {
        let id = match self.application_ids.entry(new.uuid) {
            Entry::Occupied(_) => {
                return Err(StoreError::Conflict(format!("application {}", new.uuid)));
            }
            Entry::Vacant(slot) => {
                let id = self.next_id();
                slot.insert(id);
                id
            }
        };
        let application = Application {
            id,
            uuid: new.uuid,
            secret_key: new.secret_key,
        };
        self.applications.insert(id, application.clone());
        Ok(application)
    }

    async fn find_application_by_uuid(&self, uuid: Uuid) -> StoreResult<Option<Application>> {
        let Some(id) = self.application_ids.get(&uuid).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self.applications.get(&id).map(|e| e.value().clone()))
    }
}

#[async_trait::async_trait]
impl IdentityStore for InMemoryStore {
    async fn create_identity(&self, new: NewIdentity) -> StoreResult<Identity> {
        let identity = Identity {
            id: self.next_id(),
            uuid: new.uuid,
            username: new.username,
            email: new.email,
            created_at: Utc::now(),
        };
        self.identities.insert(identity.id, identity.clone());
        Ok(identity)
    }

    async fn find_identity(&self, id: i64) -> StoreResult<Option<Identity>> {
        Ok(self.identities.get(&id).map(|e| e.value().clone()))
    }
}

#[async_trait::async_trait]
impl ProviderAccountStore for InMemoryStore {
    async fn find_provider_account(
        &self,
        provider: &str,
        subject: &str,
    ) -> StoreResult<Option<ProviderAccount>> {
        let key = (provider.to_string(), subject.to_string());
        Ok(self.provider_accounts.get(&key).map(|e| e.value().clone()))
    }

    async fn create_provider_account(
        &self,
        new: NewProviderAccount,
    ) -> StoreResult<ProviderAccount> {
        let key = (new.provider.clone(), new.provider_subject.clone());
        match self.provider_accounts.entry(key) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "provider account {}/{}",
                new.provider, new.provider_subject
            ))),
            Entry::Vacant(slot) => {
                let account = ProviderAccount {
                    id: self.next_id(),
                    provider: new.provider,
                    provider_subject: new.provider_subject,
                    identity_id: new.identity_id,
                    created_at: Utc::now(),
                };
                slot.insert(account.clone());
                Ok(account)
            }
        }
    }
}

#[async_trait::async_trait]
impl AccessTokenStore for InMemoryStore {
    async fn create_access_token(&self, new: NewAccessToken) -> StoreResult<AccessToken> {
        // Reserve the access key first so a concurrent insert cannot claim it
        // between the two checks.
        match self.tokens_by_access_key.entry(new.access_key.clone()) {
            Entry::Occupied(_) => return Err(StoreError::Conflict("access_key".to_string())),
            Entry::Vacant(slot) => {
                slot.insert(new.activation_key.clone());
            }
        }

        match self.tokens.entry(new.activation_key.clone()) {
            Entry::Occupied(_) => {
                self.tokens_by_access_key.remove(&new.access_key);
                Err(StoreError::Conflict("activation_key".to_string()))
            }
            Entry::Vacant(slot) => {
                let token = AccessToken {
                    id: self.next_id(),
                    identity_id: new.identity_id,
                    application_id: new.application_id,
                    access_key: new.access_key,
                    secret_key: new.secret_key,
                    activation_key: new.activation_key,
                    state: TokenState::Pending,
                    created_at: Utc::now(),
                };
                slot.insert(token.clone());
                Ok(token)
            }
        }
    }

    async fn find_by_activation_key(
        &self,
        activation_key: &str,
    ) -> StoreResult<Option<LinkedAccessToken>> {
        let Some(token) = self.tokens.get(activation_key).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        self.link(token).map(Some)
    }

    async fn find_by_access_key(&self, access_key: &str) -> StoreResult<Option<LinkedAccessToken>> {
        let Some(activation_key) = self
            .tokens_by_access_key
            .get(access_key)
            .map(|e| e.value().clone())
        else {
            return Ok(None);
        };
        let Some(token) = self.tokens.get(&activation_key).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        self.link(token).map(Some)
    }

    async fn activate_access_token(
        &self,
        activation_key: &str,
        expire_at: DateTime<Utc>,
        policy: ReactivationPolicy,
    ) -> StoreResult<Option<AccessToken>> {
        // The shard write lock held by `get_mut` serializes concurrent activations.
        let Some(mut entry) = self.tokens.get_mut(activation_key) else {
            return Ok(None);
        };
        if policy == ReactivationPolicy::Reject && entry.is_activated() {
            debug!(token_id = entry.id, "Refusing to re-activate token");
            return Ok(None);
        }
        entry.state = TokenState::Active { expire_at };
        Ok(Some(entry.value().clone()))
    }
}

#[async_trait::async_trait]
impl ApiKeyStore for InMemoryStore {
    async fn create_api_key(&self, key: ApiKey) -> StoreResult<ApiKey> {
        match self.api_keys.entry(key.key.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict("api key".to_string())),
            Entry::Vacant(slot) => {
                slot.insert(key.clone());
                Ok(key)
            }
        }
    }

    async fn find_api_key(&self, key: &str) -> StoreResult<Option<ApiKey>> {
        Ok(self.api_keys.get(key).map(|e| e.value().clone()))
    }

    async fn list_api_keys(&self, owner: Uuid) -> StoreResult<Vec<ApiKey>> {
        let mut keys: Vec<ApiKey> = self
            .api_keys
            .iter()
            .filter(|e| e.value().owner_identity_uuid == owner)
            .map(|e| e.value().clone())
            .collect();
        keys.sort_by_key(|k| k.created_at);
        Ok(keys)
    }

    async fn update_owned_api_key(
        &self,
        owner: Uuid,
        key: &str,
        update: ApiKeyUpdate,
    ) -> StoreResult<Option<(ApiKey, bool)>> {
        // Shard write lock is held until `entry` drops.
        let Some(mut entry) = self.api_keys.get_mut(key) else {
            return Ok(None);
        };
        if entry.owner_identity_uuid != owner {
            return Ok(None);
        }
        let changed = update(entry.value_mut());
        Ok(Some((entry.value().clone(), changed)))
    }
}
