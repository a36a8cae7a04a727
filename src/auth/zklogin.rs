//! Ephemeral key material and zkLogin-style address derivation
//!
//! A sign-in attempt binds a fresh single-use keypair, an epoch bound and
//! a randomness scalar into a nonce, and derives the account address from
//! the identity token's issuer/subject/audience claims plus a per-user
//! salt. Same token claims + same salt always yield the same address.

use std::fmt;

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use base64::Engine as _;
use ed25519_dalek::SigningKey;
use num_bigint::RandBigInt;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::jwt;
use super::types::AuthError;

/// Epoch bound for ephemeral keys. The ledger epoch is not tracked by
/// this client, so the bound is pinned to 0.
pub const MAX_EPOCH: u64 = 0;

/// Domain separator for address hashing
const ADDRESS_DOMAIN: &[u8] = b"veralux-zklogin-v1";

/// Bit width of the randomness and salt scalars
const SCALAR_BITS: u64 = 128;

/// Single-use signing keypair bound to one sign-in attempt.
///
/// The serialized form carries the raw key material (base64), matching
/// the persisted session snapshot. `Debug` output redacts the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralKeyPair {
    public_key: String,
    secret_key: String,
}

impl EphemeralKeyPair {
    /// Generate a fresh keypair. Never reused across attempts.
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        Self {
            public_key: BASE64.encode(signing.verifying_key().as_bytes()),
            secret_key: BASE64.encode(signing.to_bytes()),
        }
    }

    /// Base64 form of the public key
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Raw verifying-key bytes, used in nonce derivation.
    pub fn public_key_bytes(&self) -> Result<[u8; 32], AuthError> {
        let bytes = BASE64
            .decode(&self.public_key)
            .map_err(|e| AuthError::Derivation(format!("invalid ephemeral public key: {}", e)))?;
        bytes.try_into().map_err(|_| {
            AuthError::Derivation("ephemeral public key has the wrong length".to_string())
        })
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Generate the randomness scalar bound into the nonce, unique per
/// sign-in attempt. Decimal string form.
pub fn generate_randomness() -> String {
    OsRng.gen_biguint(SCALAR_BITS).to_string()
}

/// Generate a fresh per-user salt. Decimal string form.
pub fn generate_user_salt() -> String {
    OsRng.gen_biguint(SCALAR_BITS).to_string()
}

/// Derive the nonce binding an ephemeral public key to an epoch bound and
/// a randomness scalar. 27 characters of base64url.
pub fn generate_nonce(
    keypair: &EphemeralKeyPair,
    max_epoch: u64,
    randomness: &str,
) -> Result<String, AuthError> {
    let mut hasher = Sha256::new();
    hasher.update(keypair.public_key_bytes()?);
    hasher.update(max_epoch.to_be_bytes());
    hasher.update(randomness.as_bytes());
    let digest = hasher.finalize();
    Ok(URL_SAFE_NO_PAD.encode(&digest[..20]))
}

/// Compute the deterministic account address for an identity token and a
/// per-user salt.
///
/// The address commits to the token's `iss`, `sub` and `aud` claims plus
/// the salt; each input is length-prefixed so field boundaries cannot be
/// forged by concatenation.
pub fn derive_address(token: &str, user_salt: &str) -> Result<String, AuthError> {
    let claims = jwt::decode_claims(token)?;
    let iss = claims
        .iss
        .as_deref()
        .ok_or_else(|| AuthError::Derivation("token is missing the iss claim".to_string()))?;
    let sub = claims
        .sub
        .as_deref()
        .ok_or_else(|| AuthError::Derivation("token is missing the sub claim".to_string()))?;
    let aud = claims
        .audience()
        .ok_or_else(|| AuthError::Derivation("token is missing the aud claim".to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(ADDRESS_DOMAIN);
    for part in [iss, sub, aud.as_str(), user_salt] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    Ok(format!("0x{}", hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use serde_json::json;

    fn token(iss: &str, sub: &str, aud: serde_json::Value) -> String {
        jwt::encode_unsigned(&json!({"iss": iss, "sub": sub, "aud": aud}))
    }

    #[test]
    fn test_keypairs_are_unique_per_attempt() {
        let a = EphemeralKeyPair::generate();
        let b = EphemeralKeyPair::generate();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_public_key_bytes_round_trip() {
        let keypair = EphemeralKeyPair::generate();
        let bytes = keypair.public_key_bytes().unwrap();
        assert_eq!(BASE64.encode(bytes), keypair.public_key());
    }

    #[test]
    fn test_keypair_serializes_camel_case() {
        let keypair = EphemeralKeyPair::generate();
        let value = serde_json::to_value(&keypair).unwrap();
        assert!(value.get("publicKey").is_some());
        assert!(value.get("secretKey").is_some());
    }

    #[test]
    fn test_debug_redacts_secret_key() {
        let keypair = EphemeralKeyPair::generate();
        let debug = format!("{:?}", keypair);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(&keypair.secret_key));
    }

    #[test]
    fn test_randomness_is_decimal_and_unique() {
        let a = generate_randomness();
        let b = generate_randomness();
        assert!(a.chars().all(|c| c.is_ascii_digit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_nonce_is_deterministic_for_fixed_inputs() {
        let keypair = EphemeralKeyPair::generate();
        let first = generate_nonce(&keypair, MAX_EPOCH, "12345").unwrap();
        let second = generate_nonce(&keypair, MAX_EPOCH, "12345").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 27);
    }

    #[test]
    fn test_nonce_changes_with_randomness_and_epoch() {
        let keypair = EphemeralKeyPair::generate();
        let base = generate_nonce(&keypair, 0, "12345").unwrap();
        assert_ne!(base, generate_nonce(&keypair, 0, "54321").unwrap());
        assert_ne!(base, generate_nonce(&keypair, 1, "12345").unwrap());
    }

    #[test]
    fn test_address_is_deterministic() {
        let token = token("https://accounts.google.com", "sub-1", json!("aud-1"));
        let first = derive_address(&token, "42").unwrap();
        let second = derive_address(&token, "42").unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("0x"));
        assert_eq!(first.len(), 2 + 64);
    }

    #[test]
    fn test_address_changes_with_salt() {
        let token = token("https://accounts.google.com", "sub-1", json!("aud-1"));
        assert_ne!(
            derive_address(&token, "42").unwrap(),
            derive_address(&token, "43").unwrap()
        );
    }

    #[test]
    fn test_address_changes_with_subject() {
        let a = token("https://accounts.google.com", "sub-1", json!("aud-1"));
        let b = token("https://accounts.google.com", "sub-2", json!("aud-1"));
        assert_ne!(
            derive_address(&a, "42").unwrap(),
            derive_address(&b, "42").unwrap()
        );
    }

    #[test]
    fn test_address_accepts_audience_array() {
        let single = token("iss", "sub", json!("aud-1"));
        let multi = token("iss", "sub", json!(["aud-1", "aud-2"]));
        assert_eq!(
            derive_address(&single, "7").unwrap(),
            derive_address(&multi, "7").unwrap()
        );
    }

    #[test]
    fn test_address_requires_subject_claim() {
        let token = jwt::encode_unsigned(&json!({"iss": "iss", "aud": "aud"}));
        let err = derive_address(&token, "7").unwrap_err();
        assert!(matches!(err, AuthError::Derivation(_)));
        assert!(err.to_string().contains("sub"));
    }
}
