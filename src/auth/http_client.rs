//! HTTP client for the VeraLux auth API

use async_trait::async_trait;
use log::{debug, error, info};
use reqwest::Client;
use serde_json::json;

use super::types::{AuthError, ExchangeErrorResponse, ExchangeSuccessResponse};

const EXCHANGE_PATH: &str = "/api/auth/google";

/// Fixed redirect marker for the popup code flow
const REDIRECT_URI_MARKER: &str = "postmessage";

/// Server-side exchange of an authorization code for an identity token.
///
/// A network boundary: transient failures surface through the same error
/// channel as protocol failures, and no retry is performed.
#[async_trait]
pub trait CodeExchanger: Send + Sync {
    async fn exchange_code(&self, code: &str) -> Result<String, AuthError>;
}

/// HTTP client for the backend token exchange
pub struct ExchangeClient {
    client: Client,
    base_url: String,
}

impl ExchangeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .user_agent("VeraLux-Desktop/0.1.0")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl CodeExchanger for ExchangeClient {
    async fn exchange_code(&self, code: &str) -> Result<String, AuthError> {
        let url = format!("{}{}", self.base_url, EXCHANGE_PATH);

        debug!("Exchanging authorization code");

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "code": code,
                "redirectUri": REDIRECT_URI_MARKER,
            }))
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Code exchange failed: {} - {}", status, body);
            return Err(AuthError::Exchange(exchange_error_message(status, &body)));
        }

        let data: ExchangeSuccessResponse = response.json().await.map_err(|e| {
            AuthError::Exchange(format!("failed to parse exchange response: {}", e))
        })?;

        info!("Authorization code exchanged for identity token");
        Ok(data.jwt)
    }
}

/// Build the user-facing message for a failed exchange, preferring the
/// backend's error body over the bare HTTP status.
pub(crate) fn exchange_error_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ExchangeErrorResponse>(body) {
        if let Some(message) = parsed.error.filter(|m| !m.is_empty()) {
            return message;
        }
    }
    status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_exchange_error_prefers_backend_message() {
        let message =
            exchange_error_message(StatusCode::BAD_REQUEST, r#"{"error":"invalid_grant"}"#);
        assert_eq!(message, "invalid_grant");
    }

    #[test]
    fn test_exchange_error_falls_back_to_status_text() {
        assert_eq!(
            exchange_error_message(StatusCode::BAD_GATEWAY, "<html>oops</html>"),
            "Bad Gateway"
        );
        assert_eq!(
            exchange_error_message(StatusCode::BAD_REQUEST, r#"{"error":""}"#),
            "Bad Request"
        );
        assert_eq!(
            exchange_error_message(StatusCode::BAD_REQUEST, r#"{"unrelated":"field"}"#),
            "Bad Request"
        );
    }

    #[test]
    fn test_exchange_error_surfaces_in_auth_error_display() {
        let message =
            exchange_error_message(StatusCode::BAD_REQUEST, r#"{"error":"invalid_grant"}"#);
        let err = AuthError::Exchange(message);
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[test]
    fn test_success_response_shape() {
        let parsed: ExchangeSuccessResponse =
            serde_json::from_str(r#"{"jwt":"aaa.bbb.ccc"}"#).unwrap();
        assert_eq!(parsed.jwt, "aaa.bbb.ccc");
    }
}
