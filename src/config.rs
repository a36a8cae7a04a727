//! Environment-driven configuration for the authentication bridge

use std::time::Duration;

/// Environment variable carrying the public Google OAuth client ID
pub const GOOGLE_CLIENT_ID_ENV: &str = "VERALUX_GOOGLE_CLIENT_ID";
/// Environment variable overriding the backend API base URL
pub const API_BASE_URL_ENV: &str = "VERALUX_API_BASE_URL";

const DEFAULT_API_BASE_URL: &str = "https://app.veralux.social";

/// Default bound on the popup wait, matching the flow expiry window
const DEFAULT_POPUP_TIMEOUT: Duration = Duration::from_secs(600);

/// Runtime configuration for the authentication bridge
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Public identity-provider client ID. Checked at initialization time;
    /// absence fails the flow before any network activity.
    pub google_client_id: Option<String>,
    /// Base URL of the VeraLux backend API
    pub api_base_url: String,
    /// Bound on the wait for the authorization popup. `None` waits
    /// indefinitely.
    pub popup_timeout: Option<Duration>,
}

impl AuthConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self {
            google_client_id: std::env::var(GOOGLE_CLIENT_ID_ENV)
                .ok()
                .filter(|v| !v.is_empty()),
            api_base_url: std::env::var(API_BASE_URL_ENV)
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            popup_timeout: Some(DEFAULT_POPUP_TIMEOUT),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            google_client_id: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            popup_timeout: Some(DEFAULT_POPUP_TIMEOUT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_client_id() {
        let config = AuthConfig::default();
        assert!(config.google_client_id.is_none());
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.popup_timeout, Some(DEFAULT_POPUP_TIMEOUT));
    }

    #[test]
    fn test_from_env_reads_client_id() {
        // Env access is process-global; this is the only test touching
        // these variables.
        std::env::set_var(GOOGLE_CLIENT_ID_ENV, "client-from-env");
        std::env::set_var(API_BASE_URL_ENV, "http://localhost:9999");

        let config = AuthConfig::from_env();
        assert_eq!(config.google_client_id.as_deref(), Some("client-from-env"));
        assert_eq!(config.api_base_url, "http://localhost:9999");

        // Empty values count as unset
        std::env::set_var(GOOGLE_CLIENT_ID_ENV, "");
        std::env::set_var(API_BASE_URL_ENV, "");
        let config = AuthConfig::from_env();
        assert!(config.google_client_id.is_none());
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);

        std::env::remove_var(GOOGLE_CLIENT_ID_ENV);
        std::env::remove_var(API_BASE_URL_ENV);
    }
}
