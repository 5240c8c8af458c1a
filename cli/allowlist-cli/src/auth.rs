//! Signature-based admin authorization.
//!
//! An admin proves control of an allowlisted key by signing
//! `"{walletAddress}-{timestamp}"`. Clients sign the 32-byte personal-message
//! hash of that string as a personal message itself, so the digest recovered
//! here is `eip191(eip191(message))`.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::address::Address;
use crate::common::{hex_encode, keccak256, Hash};
use crate::error::{Error, Result};

/// Credentials sent with every privileged request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminCredentials {
    pub wallet_address: Option<String>,
    /// Kept as text; JSON clients may send it as a number.
    #[serde(default, deserialize_with = "timestamp_text")]
    pub timestamp: Option<String>,
    #[serde(rename = "signData")]
    pub signature: Option<String>,
}

impl AdminCredentials {
    pub fn new(wallet_address: &str, timestamp: &str, signature: &str) -> Self {
        Self {
            wallet_address: Some(wallet_address.to_string()),
            timestamp: Some(timestamp.to_string()),
            signature: Some(signature.to_string()),
        }
    }
}

fn timestamp_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Timestamp {
        Text(String),
        Millis(u64),
    }

    Ok(Option::<Timestamp>::deserialize(deserializer)?.map(|ts| match ts {
        Timestamp::Text(text) => text,
        Timestamp::Millis(ms) => ms.to_string(),
    }))
}

/// Fixed set of addresses allowed to run privileged operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminSet(BTreeSet<Address>);

impl AdminSet {
    /// Normalizes each entry; any malformed entry fails the whole set.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        entries
            .iter()
            .map(|entry| Address::normalize(entry.as_ref()))
            .collect::<Result<BTreeSet<_>>>()
            .map(AdminSet)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.0.contains(address)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The exact string an admin signs.
pub fn admin_message(wallet_address: &str, timestamp: &str) -> String {
    format!("{wallet_address}-{timestamp}")
}

/// Personal-message hash: `keccak256("\x19Ethereum Signed Message:\n" ‖ len ‖ message)`.
pub fn eip191_hash(message: &[u8]) -> Hash {
    let mut buf = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    buf.extend_from_slice(message);
    keccak256(buf)
}

/// Digest the admin's key actually signed for `message`.
pub fn admin_digest(message: &str) -> Hash {
    eip191_hash(&eip191_hash(message.as_bytes()))
}

/// Derives the account address of a public key.
pub fn address_of(key: &VerifyingKey) -> Address {
    let encoded = key.to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..32]);
    Address::from_bytes(address)
}

/// Recovers the signer of `digest` from a 65-byte `r ‖ s ‖ v` hex signature.
///
/// `v` may be 0/1 or 27/28. High-s signatures are normalized first.
pub fn recover_signer(digest: &Hash, signature: &str) -> Result<Address> {
    let trimmed = signature.trim();
    let bytes = hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
        .map_err(|e| Error::SignatureRecoveryFailed(format!("invalid hex: {e}")))?;
    if bytes.len() != 65 {
        return Err(Error::SignatureRecoveryFailed(format!(
            "expected 65 signature bytes, got {}",
            bytes.len()
        )));
    }

    let mut sig = Signature::from_slice(&bytes[..64])
        .map_err(|e| Error::SignatureRecoveryFailed(e.to_string()))?;
    let v = match bytes[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        v => return Err(Error::SignatureRecoveryFailed(format!("invalid recovery byte {v}"))),
    };
    let mut recovery_id = RecoveryId::from_byte(v)
        .ok_or_else(|| Error::SignatureRecoveryFailed(format!("invalid recovery byte {v}")))?;

    if let Some(normalized) = sig.normalize_s() {
        sig = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }

    let key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|e| Error::SignatureRecoveryFailed(e.to_string()))?;
    Ok(address_of(&key))
}

/// Produces the signature an admin client would send for these fields.
pub fn sign_admin_message(key: &SigningKey, wallet_address: &str, timestamp: &str) -> Result<String> {
    let digest = admin_digest(&admin_message(wallet_address, timestamp));
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(&digest)
        .map_err(|e| Error::SignatureRecoveryFailed(e.to_string()))?;

    let mut bytes = signature.to_bytes().to_vec();
    bytes.push(recovery_id.to_byte() + 27);
    Ok(hex_encode(bytes))
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(Error::InvalidParameters(name))
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Checks admin signatures against a fixed [`AdminSet`].
#[derive(Debug, Clone)]
pub struct AdminAuthorizer {
    admins: AdminSet,
    max_age: Option<Duration>,
}

impl AdminAuthorizer {
    pub fn new(admins: AdminSet) -> Self {
        Self {
            admins,
            max_age: None,
        }
    }

    /// Rejects timestamps (Unix milliseconds) further than `max_age` from now.
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn admins(&self) -> &AdminSet {
        &self.admins
    }

    /// Returns the recovered admin address if the credentials are valid.
    pub fn authorize(&self, credentials: &AdminCredentials) -> Result<Address> {
        self.authorize_at(credentials, now_millis())
    }

    pub fn authorize_at(&self, credentials: &AdminCredentials, now_ms: u128) -> Result<Address> {
        let wallet_address = required(&credentials.wallet_address, "walletAddress")?;
        let timestamp = required(&credentials.timestamp, "timestamp")?;
        let signature = required(&credentials.signature, "signData")?;

        if let Some(max_age) = self.max_age {
            let signed_at: u128 = timestamp
                .parse()
                .map_err(|_| Error::StaleTimestamp(format!("'{timestamp}' is not Unix milliseconds")))?;
            if signed_at.abs_diff(now_ms) > max_age.as_millis() {
                return Err(Error::StaleTimestamp(format!(
                    "signed at {signed_at}, now {now_ms}, window {}s",
                    max_age.as_secs()
                )));
            }
        }

        let digest = admin_digest(&admin_message(wallet_address, timestamp));
        let signer = recover_signer(&digest, signature)?;
        if !self.admins.contains(&signer) {
            debug!(%signer, "signature from non-admin");
            return Err(Error::NotAuthorized(signer.to_string()));
        }

        debug!(%signer, wallet_address, "admin authorized");
        Ok(signer)
    }
}
