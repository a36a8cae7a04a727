//! Cross-component event payloads and names

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Event name raised after a completed sign-in so the wallet-connect UI
/// can prompt the user
pub const WALLET_CONNECTION_TRIGGER: &str = "veralux:triggerWalletConnection";

/// Source tag for wallet-connection events raised by the Google flow
pub const SOURCE_GOOGLE_OAUTH: &str = "google_oauth";

/// Wallet-connection trigger payload
#[derive(Debug, Clone, Serialize)]
pub struct WalletConnectionEvent {
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl WalletConnectionEvent {
    pub fn from_google_oauth() -> Self {
        Self {
            source: SOURCE_GOOGLE_OAUTH.to_string(),
            timestamp: Utc::now(),
        }
    }
}
