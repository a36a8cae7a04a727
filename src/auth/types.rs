//! Authentication types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::jwt::{self, JwtClaims};
use super::zklogin::EphemeralKeyPair;

/// Identity source for an authenticated user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Google,
}

impl AuthProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
        }
    }
}

/// The authenticated identity record. Created once per completed sign-in
/// and replaced wholesale on the next one; never mutated field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    /// Derived blockchain account address
    pub address: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
    pub provider: AuthProvider,
    /// Raw compact identity token, kept for expiry checks and
    /// re-derivation
    pub jwt: String,
    /// Single-use keypair owned by this record
    pub ephemeral_key_pair: EphemeralKeyPair,
    /// Epoch bound used in nonce derivation
    pub max_epoch: u64,
    /// Randomness scalar bound into the nonce, unique per attempt
    pub jwt_randomness: String,
    /// Per-user salt feeding address derivation
    pub user_salt: String,
}

impl AuthUser {
    /// Check whether the embedded identity token has expired.
    ///
    /// A token without a readable `exp` claim counts as expired.
    pub fn is_jwt_expired(&self) -> bool {
        match jwt::decode_claims(&self.jwt) {
            Ok(claims) => match claims.exp {
                Some(exp) => Utc::now().timestamp() >= exp,
                None => true,
            },
            Err(_) => true,
        }
    }
}

/// Validated identity claims extracted from a decoded token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleUserInfo {
    pub sub: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
}

impl GoogleUserInfo {
    /// Extract the claims this product requires. `email` and `name` are
    /// mandatory; `sub` keys the user's salt.
    pub fn from_claims(claims: &JwtClaims) -> Result<Self, AuthError> {
        let sub = claims
            .sub
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::Decode("token is missing the sub claim".to_string()))?;
        let email = claims
            .email
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::Decode("token is missing the email claim".to_string()))?;
        let name = claims
            .name
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::Decode("token is missing the name claim".to_string()))?;
        Ok(Self {
            sub,
            email,
            name,
            picture: claims.picture.clone(),
        })
    }
}

/// Process-wide authentication state snapshot.
///
/// `is_authenticated` flips only after address derivation and persistence
/// both succeed; there is no observable half-authenticated state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    pub user: Option<AuthUser>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    /// Last failure message, cleared at the start of each new attempt
    pub error: Option<String>,
}

/// Session-scoped bridge record describing the last completed exchange.
/// Read by other components (debug pages) to inspect the OAuth handoff;
/// never used to restore a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBridge {
    pub jwt: String,
    pub user_info: GoogleUserInfo,
    pub timestamp: DateTime<Utc>,
    pub address: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Success response from the backend code exchange
#[derive(Debug, Deserialize)]
pub struct ExchangeSuccessResponse {
    pub jwt: String,
}

/// Error response from the backend code exchange
#[derive(Debug, Deserialize)]
pub struct ExchangeErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
}

/// Error types for the authentication bridge
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Identity provider failed to load: {0}")]
    ProviderLoad(String),

    #[error("Identity provider error: {0}")]
    Provider(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Code exchange failed: {0}")]
    Exchange(String),

    #[error("Invalid identity token: {0}")]
    Decode(String),

    #[error("Address derivation failed: {0}")]
    Derivation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("A sign-in attempt is already in progress")]
    SignInInProgress,

    #[error("Timed out waiting for the sign-in popup")]
    PopupTimeout,
}
