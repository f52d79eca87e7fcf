//! Writes credentials through the vault so nothing is stored in the clear
//! and every write lands on the current key.

use std::sync::Arc;

use crate::domain::{
    Channel, CredentialId, CredentialRecord, KeyVersion, TenantId, TokenStatus,
};
use crate::error::StoreError;
use crate::ports::{Clock, CredentialStore};

use super::{CredentialVault, VaultError};

#[derive(Debug, thiserror::Error)]
pub enum CredentialServiceError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A token as it arrives from the OAuth callback.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub id: CredentialId,
    pub tenant_id: TenantId,
    pub channel: Channel,
    pub account_id: String,
    pub token: super::SecretToken,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct CredentialService {
    vault: Arc<CredentialVault>,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
}

impl CredentialService {
    pub fn new(
        vault: Arc<CredentialVault>,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            vault,
            store,
            clock,
        }
    }

    /// Seals a fresh token under the current key and stores it as valid.
    pub async fn store_token(
        &self,
        new: NewCredential,
    ) -> Result<CredentialRecord, CredentialServiceError> {
        let secret = self.vault.encrypt(new.token.expose(), KeyVersion::Current)?;
        let record = CredentialRecord {
            id: new.id,
            tenant_id: new.tenant_id,
            channel: new.channel,
            account_id: new.account_id,
            secret,
            token_status: TokenStatus::Valid,
            expires_at: new.expires_at,
            updated_at: self.clock.now(),
        };
        self.store.save(record.clone()).await?;
        tracing::info!(
            credential_id = %record.id,
            tenant_id = %record.tenant_id,
            channel = %record.channel,
            "credential stored"
        );
        Ok(record)
    }

    /// Re-encrypts a stored credential under the current key if the current
    /// key does not already open it. Returns whether a write happened.
    pub async fn reseal(&self, id: CredentialId) -> Result<bool, CredentialServiceError> {
        let mut record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| StoreError::not_found("credential", id))?;
        let (token, from) = self.vault.open(&record.secret)?;
        if from == KeyVersion::Current {
            return Ok(false);
        }

        record.secret = self.vault.encrypt(token.expose(), KeyVersion::Current)?;
        record.updated_at = self.clock.now();
        self.store.save(record).await?;
        tracing::info!(credential_id = %id, from = %from, "credential resealed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryRecords;
    use crate::ports::SystemClock;
    use crate::vault::{KeyRing, SecretToken, VaultKey};

    fn service() -> (CredentialService, Arc<CredentialVault>, Arc<InMemoryRecords>) {
        let vault = Arc::new(CredentialVault::new(KeyRing::new(VaultKey::generate())));
        let records = Arc::new(InMemoryRecords::new());
        let svc = CredentialService::new(vault.clone(), records.clone(), Arc::new(SystemClock));
        (svc, vault, records)
    }

    fn new_credential() -> NewCredential {
        NewCredential {
            id: CredentialId::generate(),
            tenant_id: TenantId::generate(),
            channel: Channel::Instagram,
            account_id: "17841400000000000".into(),
            token: SecretToken::new("IGQV-fresh"),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn store_token_never_persists_plaintext() {
        let (svc, vault, records) = service();
        let stored = svc.store_token(new_credential()).await.unwrap();

        let loaded = CredentialStore::get(records.as_ref(), stored.id).await.unwrap().unwrap();
        assert_eq!(loaded.secret.key_version, KeyVersion::Current);
        assert!(!serde_json::to_string(&loaded).unwrap().contains("IGQV-fresh"));
        assert_eq!(vault.decrypt(&loaded.secret).unwrap().expose(), "IGQV-fresh");
    }

    #[tokio::test]
    async fn reseal_moves_records_sealed_before_rotation() {
        let (svc, vault, records) = service();
        let stored = svc.store_token(new_credential()).await.unwrap();
        assert!(!svc.reseal(stored.id).await.unwrap());

        vault.rotate(VaultKey::generate());

        assert!(svc.reseal(stored.id).await.unwrap());
        assert!(!svc.reseal(stored.id).await.unwrap());

        let loaded = CredentialStore::get(records.as_ref(), stored.id).await.unwrap().unwrap();
        assert_eq!(loaded.secret.key_version, KeyVersion::Current);
        assert_eq!(vault.open(&loaded.secret).unwrap().1, KeyVersion::Current);
        assert_eq!(vault.decrypt(&loaded.secret).unwrap().expose(), "IGQV-fresh");
    }

    #[tokio::test]
    async fn reseal_moves_previous_tagged_records() {
        let (svc, vault, records) = service();
        let stored = svc.store_token(new_credential()).await.unwrap();
        vault.rotate(VaultKey::generate());
        let mut tagged = stored.clone();
        tagged.secret.key_version = KeyVersion::Previous;
        records.save(tagged).await.unwrap();

        assert!(svc.reseal(stored.id).await.unwrap());
        let loaded = CredentialStore::get(records.as_ref(), stored.id).await.unwrap().unwrap();
        assert_eq!(loaded.secret.key_version, KeyVersion::Current);
    }
}
