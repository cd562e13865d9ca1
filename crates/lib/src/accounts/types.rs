//! Account data types and their stored encodings.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// The various methods for verifying ownership of an account.
///
/// Stored as self-describing JSON so fields can be added later; readers
/// ignore fields they do not know and default the ones that are absent.
/// Binary fields travel as base64 strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCredentials {
    /// Per-account salt, generated at registration even when no passphrase
    /// is set.
    #[serde(default, with = "base64_bytes")]
    pub passphrase_salt: Vec<u8>,
    /// Argon2 hash of the passphrase; empty when none is set.
    #[serde(default, with = "base64_bytes")]
    pub passphrase_hash: Vec<u8>,
    /// Client certificate fingerprint; empty when none is authorized.
    #[serde(default)]
    pub certificate: String,
}

impl AccountCredentials {
    /// Serialize to the stored textual form.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialize from the stored textual form.
    pub fn decode(raw: &str) -> serde_json::Result<AccountCredentials> {
        serde_json::from_str(raw)
    }
}

/// Base64 (de)serialization for binary credential fields.
mod base64_bytes {
    use base64ct::{Base64, Encoding};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Base64::decode_vec(&encoded).map_err(serde::de::Error::custom)
    }
}

/// A fully decoded user account.
#[derive(Debug, Clone)]
pub struct Account {
    /// Display name of the account, not folded.
    pub name: String,
    /// When the account was registered.
    pub registered_at: SystemTime,
    pub credentials: AccountCredentials,
    pub verified: bool,
    /// Folded nicks reserved to this account beyond its own name.
    pub additional_nicks: Vec<String>,
}

/// The undecoded row set of an account, for passing raw stored values
/// between transactions.
#[derive(Debug, Clone, Default)]
pub struct RawAccount {
    pub name: String,
    pub registered_at: String,
    pub credentials: String,
    pub callback: String,
    pub verified: bool,
    pub additional_nicks: String,
}

/// Encode a reserved-nick list for storage.
pub fn marshal_nicks(nicks: &[String]) -> String {
    nicks.join(",")
}

/// Decode a stored reserved-nick list. The empty string is the empty list.
pub fn unmarshal_nicks(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(',').map(str::to_string).collect()
}
