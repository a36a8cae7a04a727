//! Compact identity-token decoding
//!
//! Decodes (does not verify) a three-segment token into its payload
//! claims. Signature trust is established by the backend exchange step,
//! so this codec only needs the payload JSON.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::types::AuthError;

/// Claims carried in an identity-token payload. Every field is optional
/// at this layer; mandatory-claim enforcement happens when building a
/// [`GoogleUserInfo`](super::types::GoogleUserInfo).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JwtClaims {
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    /// `aud` may be a single string or an array of strings
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
}

impl JwtClaims {
    /// The audience claim as a single string.
    pub fn audience(&self) -> Option<String> {
        match &self.aud {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Array(items)) => items
                .first()
                .and_then(|v| v.as_str())
                .map(str::to_string),
            _ => None,
        }
    }
}

/// Decode the payload segment of a compact token into raw JSON.
pub fn decode_payload(token: &str) -> Result<serde_json::Value, AuthError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(AuthError::Decode(format!(
            "expected 3 token segments, found {}",
            segments.len()
        )));
    }

    // Tokens are base64url; tolerate padded and standard-alphabet input
    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .map_err(|e| AuthError::Decode(format!("payload is not valid base64url: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::Decode(format!("payload is not valid JSON: {}", e)))
}

/// Decode the payload segment into typed claims.
pub fn decode_claims(token: &str) -> Result<JwtClaims, AuthError> {
    let value = decode_payload(token)?;
    serde_json::from_value(value)
        .map_err(|e| AuthError::Decode(format!("unexpected claim shape: {}", e)))
}

/// Build an unsigned compact token around a payload. The signature
/// segment is a placeholder; the codec never reads it.
#[cfg(test)]
pub(crate) fn encode_unsigned(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
    format!("{}.{}.signature", header, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use serde_json::json;

    #[test]
    fn test_decode_round_trips_payload() {
        let payload = json!({
            "iss": "https://accounts.google.com",
            "sub": "1234567890",
            "aud": "client-abc",
            "email": "user@example.com",
            "name": "Test User",
            "exp": 4102444800i64,
            "custom": {"nested": [1, 2, 3]},
        });
        let token = encode_unsigned(&payload);
        assert_eq!(decode_payload(&token).unwrap(), payload);
    }

    #[test]
    fn test_decode_rejects_wrong_segment_count() {
        for token in ["", "onlyone", "two.parts", "a.b.c.d"] {
            let err = decode_payload(token).unwrap_err();
            assert!(
                matches!(err, AuthError::Decode(_)),
                "unexpected error for {:?}: {}",
                token,
                err
            );
            assert!(err.to_string().contains("segments"));
        }
    }

    #[test]
    fn test_decode_rejects_non_base64_payload() {
        let err = decode_payload("aaa.!!!.ccc").unwrap_err();
        assert!(matches!(err, AuthError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_non_json_payload() {
        let body = URL_SAFE_NO_PAD.encode(b"not json at all");
        let token = format!("header.{}.sig", body);
        let err = decode_payload(&token).unwrap_err();
        assert!(err.to_string().contains("JSON"));
    }

    #[test]
    fn test_decode_tolerates_padded_payload() {
        let payload = json!({"sub": "x"});
        let body = base64::engine::general_purpose::URL_SAFE
            .encode(payload.to_string().as_bytes());
        let token = format!("h.{}.s", body);
        assert_eq!(decode_payload(&token).unwrap(), payload);
    }

    #[test]
    fn test_typed_claims_extraction() {
        let token = encode_unsigned(&json!({
            "sub": "sub-1",
            "email": "a@b.c",
            "exp": 1700000000i64,
        }));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("sub-1"));
        assert_eq!(claims.email.as_deref(), Some("a@b.c"));
        assert_eq!(claims.exp, Some(1700000000));
        assert!(claims.name.is_none());
    }

    #[test]
    fn test_audience_accepts_string_and_array() {
        let single = decode_claims(&encode_unsigned(&json!({"aud": "client-1"}))).unwrap();
        assert_eq!(single.audience().as_deref(), Some("client-1"));

        let multi =
            decode_claims(&encode_unsigned(&json!({"aud": ["client-1", "client-2"]}))).unwrap();
        assert_eq!(multi.audience().as_deref(), Some("client-1"));

        let none = decode_claims(&encode_unsigned(&json!({}))).unwrap();
        assert!(none.audience().is_none());
    }

    #[test]
    fn test_non_numeric_exp_is_a_decode_error() {
        let token = encode_unsigned(&json!({"exp": "tomorrow"}));
        assert!(matches!(decode_claims(&token), Err(AuthError::Decode(_))));
    }
}
