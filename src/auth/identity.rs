//! Resolves provider assertions to canonical identities.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use super::assertion::{AssertionValidator, VerifiedAssertion};
use super::audit::{self, AuditEvent};
use super::error::{AuthError, AuthResult};
use super::model::{Identity, NewIdentity, NewProviderAccount};
use super::store::{IdentityStore, ProviderAccountStore, StoreError};

/// Links one external identity provider to local identities.
pub struct IdentityLinker {
    provider: String,
    audience: String,
    validator: Arc<dyn AssertionValidator>,
    accounts: Arc<dyn ProviderAccountStore>,
    identities: Arc<dyn IdentityStore>,
}

impl IdentityLinker {
    /// Create a linker for `provider`, validating assertions for `audience`.
    pub fn new(
        provider: impl Into<String>,
        audience: impl Into<String>,
        validator: Arc<dyn AssertionValidator>,
        accounts: Arc<dyn ProviderAccountStore>,
        identities: Arc<dyn IdentityStore>,
    ) -> Self {
        Self {
            provider: provider.into(),
            audience: audience.into(),
            validator,
            accounts,
            identities,
        }
    }

    /// Provider name this linker serves.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Return the identity linked to the assertion's subject, creating the
    /// identity and its provider account on first sign-in.
    ///
    /// Idempotent under concurrency: if another request links the same
    /// subject first, the winner's identity is returned.
    pub async fn link_external_identity(&self, assertion: &str) -> AuthResult<Identity> {
        let verified = self.validator.validate(assertion, &self.audience).await?;

        if let Some(identity) = self.find_linked(&verified.subject).await? {
            debug!(provider = %self.provider, identity = %identity.uuid, "Provider account already linked");
            return Ok(identity);
        }

        let identity = self
            .identities
            .create_identity(new_identity(&verified))
            .await?;

        let account = NewProviderAccount {
            provider: self.provider.clone(),
            provider_subject: verified.subject.clone(),
            identity_id: identity.id,
        };
        match self.accounts.create_provider_account(account).await {
            Ok(_) => {
                audit::emit(&AuditEvent::identity_linked(&self.provider, &identity));
                Ok(identity)
            }
            Err(StoreError::Conflict(_)) => {
                warn!(provider = %self.provider, "Lost first sign-in race, returning existing identity");
                self.find_linked(&verified.subject).await?.ok_or_else(|| {
                    AuthError::Internal("provider account vanished after conflict".to_string())
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_linked(&self, subject: &str) -> AuthResult<Option<Identity>> {
        let Some(account) = self
            .accounts
            .find_provider_account(&self.provider, subject)
            .await?
        else {
            return Ok(None);
        };
        let identity = self
            .identities
            .find_identity(account.identity_id)
            .await?
            .ok_or_else(|| {
                AuthError::Internal(format!("identity {} missing for provider account", account.identity_id))
            })?;
        Ok(Some(identity))
    }
}

fn new_identity(verified: &VerifiedAssertion) -> NewIdentity {
    let username = verified.name.clone().unwrap_or_else(|| {
        verified
            .email
            .split('@')
            .next()
            .unwrap_or_default()
            .to_string()
    });
    NewIdentity {
        uuid: Uuid::new_v4(),
        username,
        email: verified.email.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::assertion::AssertionError;
    use crate::auth::model::ProviderAccount;
    use crate::auth::store::{InMemoryStore, StoreResult};

    /// Treats the raw assertion as `subject|email|name`.
    struct PipeValidator;

    #[async_trait::async_trait]
    impl AssertionValidator for PipeValidator {
        async fn validate(
            &self,
            assertion: &str,
            audience: &str,
        ) -> Result<VerifiedAssertion, AssertionError> {
            assert_eq!(audience, "client-id");
            let mut parts = assertion.split('|');
            let subject = parts.next().filter(|s| !s.is_empty());
            let subject = subject.ok_or(AssertionError::MissingClaim("sub"))?;
            Ok(VerifiedAssertion {
                subject: subject.to_string(),
                email: parts.next().unwrap_or_default().to_string(),
                name: parts.next().map(ToString::to_string),
            })
        }
    }

    /// Account store that always loses the insert race to a pre-linked identity.
    struct RacingAccounts {
        inner: Arc<InMemoryStore>,
        winner: Identity,
    }

    #[async_trait::async_trait]
    impl ProviderAccountStore for RacingAccounts {
        async fn find_provider_account(
            &self,
            provider: &str,
            subject: &str,
        ) -> StoreResult<Option<ProviderAccount>> {
            self.inner.find_provider_account(provider, subject).await
        }

        async fn create_provider_account(
            &self,
            new: NewProviderAccount,
        ) -> StoreResult<ProviderAccount> {
            // Another request links the subject just before us.
            self.inner
                .create_provider_account(NewProviderAccount {
                    identity_id: self.winner.id,
                    ..new.clone()
                })
                .await?;
            self.inner.create_provider_account(new).await
        }
    }

    fn linker(store: &Arc<InMemoryStore>) -> IdentityLinker {
        IdentityLinker::new(
            "google",
            "client-id",
            Arc::new(PipeValidator),
            store.clone(),
            store.clone(),
        )
    }

    #[tokio::test]
    async fn first_sign_in_creates_identity_and_account() {
        // GIVEN: an empty store
        let store = Arc::new(InMemoryStore::new());

        // WHEN: an unseen subject signs in
        let identity = linker(&store)
            .link_external_identity("sub-1|alice@example.com|Alice")
            .await
            .unwrap();

        // THEN: the identity carries the assertion's display claims and is linked
        assert_eq!(identity.username, "Alice");
        assert_eq!(identity.email, "alice@example.com");
        let account = store
            .find_provider_account("google", "sub-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.identity_id, identity.id);
    }

    #[tokio::test]
    async fn second_sign_in_returns_same_identity() {
        let store = Arc::new(InMemoryStore::new());
        let linker = linker(&store);

        let first = linker
            .link_external_identity("sub-1|alice@example.com|Alice")
            .await
            .unwrap();
        let second = linker
            .link_external_identity("sub-1|alice@example.com|Alice Renamed")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(second.username, "Alice");
    }

    #[tokio::test]
    async fn missing_name_falls_back_to_email_local_part() {
        let store = Arc::new(InMemoryStore::new());
        let identity = linker(&store)
            .link_external_identity("sub-2|bob@example.com")
            .await
            .unwrap();
        assert_eq!(identity.username, "bob");
    }

    #[tokio::test]
    async fn rejected_assertion_is_propagated() {
        let store = Arc::new(InMemoryStore::new());
        let result = linker(&store).link_external_identity("|nobody").await;
        assert!(matches!(result, Err(AuthError::AssertionInvalid(_))));
    }

    #[tokio::test]
    async fn losing_the_race_returns_the_winner() {
        // GIVEN: an identity that wins the concurrent first sign-in
        let store = Arc::new(InMemoryStore::new());
        let winner = store
            .create_identity(NewIdentity {
                uuid: Uuid::new_v4(),
                username: "Winner".to_string(),
                email: "alice@example.com".to_string(),
            })
            .await
            .unwrap();
        let accounts = Arc::new(RacingAccounts {
            inner: store.clone(),
            winner: winner.clone(),
        });
        let linker = IdentityLinker::new(
            "google",
            "client-id",
            Arc::new(PipeValidator),
            accounts,
            store.clone(),
        );

        // WHEN: our insert hits the uniqueness constraint
        let identity = linker
            .link_external_identity("sub-1|alice@example.com|Alice")
            .await
            .unwrap();

        // THEN: we get the winner's identity instead of an error
        assert_eq!(identity, winner);
    }
}
