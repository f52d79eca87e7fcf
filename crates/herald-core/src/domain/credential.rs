//! Credential records: encrypted channel access tokens.
//!
//! 平文のトークンはここには現れない。`SealedSecret` は暗号文と nonce/tag、
//! そして復号に使う鍵のバージョンだけを持つ。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{CredentialId, TenantId};
use super::messaging::Channel;

/// Which vault key sealed a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyVersion {
    Current,
    Previous,
    /// Unauthenticated CBC cipher from before the GCM migration. Read-only.
    Legacy,
}

impl fmt::Display for KeyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyVersion::Current => "current",
            KeyVersion::Previous => "previous",
            KeyVersion::Legacy => "legacy",
        })
    }
}

/// Ciphertext at rest. Bytes are stored hex-encoded.
///
/// For `Legacy` secrets `iv` is the 16-byte CBC IV and `tag` is empty.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    #[serde(with = "hex::serde")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub iv: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub tag: Vec<u8>,
    pub key_version: KeyVersion,
}

impl fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedSecret")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("key_version", &self.key_version)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Valid,
    Expired,
    Revoked,
}

/// One stored credential per (tenant, channel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: CredentialId,
    pub tenant_id: TenantId,
    pub channel: Channel,
    /// Channel account the token acts on (page id / phone number id).
    pub account_id: String,
    pub secret: SealedSecret,
    pub token_status: TokenStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    pub fn is_usable(&self) -> bool {
        self.token_status == TokenStatus::Valid
    }
}
