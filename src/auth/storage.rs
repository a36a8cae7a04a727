//! Auth persistence: durable user record, session bridge, and salt map
//!
//! File storage in the platform data directory is primary; the OS keyring
//! holds a secondary copy of the durable record when available. Corrupt
//! files are deleted and treated as absent.

use std::collections::HashMap;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use keyring::Entry;
use log::{debug, info, warn};

use super::types::{AuthError, AuthUser, SessionBridge};
use super::zklogin;

const SERVICE_NAME: &str = "VeraLux";
const USER_KEY: &str = "auth_user";

const AUTH_USER_FILE: &str = "veralux_auth_user.dat";
const SESSION_BRIDGE_FILE: &str = "veralux_google_auth.json";
const SALT_FILE: &str = "veralux_user_salts.json";

// Obfuscation key for the durable record envelope. Prevents casual
// reading of the file, not cryptographic protection.
const OBFUSCATION_KEY: &[u8] = b"VeraLuxAuthBridge2026";

/// Storage for authentication records
pub struct AuthStorage {
    keyring_entry: Option<Entry>,
    data_dir: PathBuf,
}

impl AuthStorage {
    /// Storage rooted at the platform data directory, with the keyring
    /// mirror enabled when the OS credential store is reachable.
    pub fn new() -> Result<Self, AuthError> {
        let data_dir = dirs::data_local_dir()
            .map(|d| d.join("VeraLux"))
            .ok_or_else(|| {
                AuthError::Storage("could not determine data directory".to_string())
            })?;
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            AuthError::Storage(format!("failed to create data directory: {}", e))
        })?;

        let keyring_entry = match Entry::new(SERVICE_NAME, USER_KEY) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Keyring unavailable ({}), using file storage only", e);
                None
            }
        };

        debug!("Auth storage at {}", data_dir.display());
        Ok(Self {
            keyring_entry,
            data_dir,
        })
    }

    /// Storage rooted at an explicit directory, without the keyring
    /// mirror. Used by tests and diagnostic tooling.
    pub fn with_dir(data_dir: PathBuf) -> Result<Self, AuthError> {
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            AuthError::Storage(format!("failed to create data directory: {}", e))
        })?;
        Ok(Self {
            keyring_entry: None,
            data_dir,
        })
    }

    fn user_file_path(&self) -> PathBuf {
        self.data_dir.join(AUTH_USER_FILE)
    }

    fn session_bridge_path(&self) -> PathBuf {
        self.data_dir.join(SESSION_BRIDGE_FILE)
    }

    fn salt_file_path(&self) -> PathBuf {
        self.data_dir.join(SALT_FILE)
    }

    /// Simple XOR obfuscation; applying it twice restores the input.
    fn obfuscate(data: &[u8]) -> Vec<u8> {
        data.iter()
            .enumerate()
            .map(|(i, &byte)| byte ^ OBFUSCATION_KEY[i % OBFUSCATION_KEY.len()])
            .collect()
    }

    /// Persist the durable user record (file primary, keyring secondary).
    pub fn store_user(&self, user: &AuthUser) -> Result<(), AuthError> {
        let json = serde_json::to_string(user).map_err(|e| {
            AuthError::Storage(format!("failed to serialize auth user: {}", e))
        })?;
        let encoded = BASE64.encode(Self::obfuscate(json.as_bytes()));
        std::fs::write(self.user_file_path(), &encoded).map_err(|e| {
            AuthError::Storage(format!("failed to write auth user file: {}", e))
        })?;

        // Secondary copy; file storage stays authoritative on failure
        if let Some(entry) = &self.keyring_entry {
            if let Err(e) = entry.set_password(&json) {
                warn!("Failed to mirror auth user to keyring: {}", e);
            }
        }

        info!("Stored auth user for {}", user.email);
        Ok(())
    }

    /// Load the durable user record (file first, then keyring).
    pub fn load_user(&self) -> Result<Option<AuthUser>, AuthError> {
        if let Some(user) = self.load_user_from_file() {
            debug!("Loaded auth user from file storage");
            return Ok(Some(user));
        }
        if let Some(user) = self.load_user_from_keyring() {
            debug!("Loaded auth user from keyring, migrating to file storage");
            let _ = self.store_user(&user);
            return Ok(Some(user));
        }
        Ok(None)
    }

    fn load_user_from_file(&self) -> Option<AuthUser> {
        let path = self.user_file_path();
        if !path.exists() {
            return None;
        }
        let encoded = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to read auth user file: {}", e);
                return None;
            }
        };

        let obfuscated = match BASE64.decode(encoded.trim()) {
            Ok(data) => data,
            Err(e) => {
                warn!("Auth user file is corrupt (base64): {}, removing", e);
                let _ = std::fs::remove_file(&path);
                return None;
            }
        };
        let json = match String::from_utf8(Self::obfuscate(&obfuscated)) {
            Ok(s) => s,
            Err(e) => {
                warn!("Auth user file is corrupt (utf8): {}, removing", e);
                let _ = std::fs::remove_file(&path);
                return None;
            }
        };
        match serde_json::from_str(&json) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!("Auth user file is corrupt (json): {}, removing", e);
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    fn load_user_from_keyring(&self) -> Option<AuthUser> {
        let entry = self.keyring_entry.as_ref()?;
        match entry.get_password() {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!("Failed to deserialize keyring auth user: {}", e);
                    None
                }
            },
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!("Keyring read error: {:?}", e);
                None
            }
        }
    }

    /// Remove the durable user record from all storage locations.
    pub fn clear_user(&self) -> Result<(), AuthError> {
        let path = self.user_file_path();
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| {
                AuthError::Storage(format!("failed to delete auth user file: {}", e))
            })?;
        }
        if let Some(entry) = &self.keyring_entry {
            match entry.delete_credential() {
                Ok(()) => debug!("Cleared keyring auth user"),
                Err(keyring::Error::NoEntry) => {}
                Err(e) => warn!("Failed to clear keyring auth user: {}", e),
            }
        }
        Ok(())
    }

    /// Whether a durable record exists in either storage location
    pub fn has_user(&self) -> bool {
        self.user_file_path().exists()
            || self
                .keyring_entry
                .as_ref()
                .map(|e| e.get_password().is_ok())
                .unwrap_or(false)
    }

    /// Write the session-scoped bridge record for the last completed
    /// exchange.
    pub fn store_session_bridge(&self, bridge: &SessionBridge) -> Result<(), AuthError> {
        let json = serde_json::to_string(bridge).map_err(|e| {
            AuthError::Storage(format!("failed to serialize session record: {}", e))
        })?;
        std::fs::write(self.session_bridge_path(), json).map_err(|e| {
            AuthError::Storage(format!("failed to write session record: {}", e))
        })
    }

    /// Read the session bridge record, tolerating absence and corruption.
    pub fn load_session_bridge(&self) -> Option<SessionBridge> {
        let path = self.session_bridge_path();
        if !path.exists() {
            return None;
        }
        let json = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&json) {
            Ok(bridge) => Some(bridge),
            Err(e) => {
                warn!("Session record is corrupt: {}, removing", e);
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    /// Remove the session bridge record.
    pub fn clear_session_bridge(&self) -> Result<(), AuthError> {
        let path = self.session_bridge_path();
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| {
                AuthError::Storage(format!("failed to delete session record: {}", e))
            })?;
        }
        Ok(())
    }

    /// Return the stable salt for a subject, generating and persisting
    /// one on first use. Salts outlive sign-out so the derived address
    /// stays stable across sessions.
    pub fn load_or_create_salt(&self, sub: &str) -> Result<String, AuthError> {
        let mut salts = self.load_salts();
        if let Some(salt) = salts.get(sub) {
            return Ok(salt.clone());
        }

        let salt = zklogin::generate_user_salt();
        salts.insert(sub.to_string(), salt.clone());
        let json = serde_json::to_string(&salts).map_err(|e| {
            AuthError::Storage(format!("failed to serialize salt map: {}", e))
        })?;
        std::fs::write(self.salt_file_path(), json).map_err(|e| {
            AuthError::Storage(format!("failed to write salt map: {}", e))
        })?;

        info!("Generated user salt for a new subject");
        Ok(salt)
    }

    fn load_salts(&self) -> HashMap<String, String> {
        let path = self.salt_file_path();
        if !path.exists() {
            return HashMap::new();
        }
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt;
    use crate::auth::types::{AuthProvider, GoogleUserInfo};
    use crate::auth::zklogin::EphemeralKeyPair;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_storage() -> AuthStorage {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "veralux-storage-test-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        AuthStorage::with_dir(dir).unwrap()
    }

    fn make_user() -> AuthUser {
        let token = jwt::encode_unsigned(&json!({
            "iss": "https://accounts.google.com",
            "sub": "sub-1",
            "aud": "client-1",
            "exp": Utc::now().timestamp() + 3600,
        }));
        AuthUser {
            address: "0x1234".to_string(),
            email: "user@example.com".to_string(),
            name: "Test User".to_string(),
            picture: None,
            provider: AuthProvider::Google,
            jwt: token,
            ephemeral_key_pair: EphemeralKeyPair::generate(),
            max_epoch: 0,
            jwt_randomness: "111".to_string(),
            user_salt: "222".to_string(),
        }
    }

    #[test]
    fn test_obfuscation_round_trip() {
        let original = b"Hello, VeraLux! This is a test.";
        let obfuscated = AuthStorage::obfuscate(original);
        assert_ne!(original.as_slice(), obfuscated.as_slice());
        assert_eq!(
            original.as_slice(),
            AuthStorage::obfuscate(&obfuscated).as_slice()
        );
    }

    #[test]
    fn test_user_record_round_trip() {
        let storage = test_storage();
        assert!(storage.load_user().unwrap().is_none());
        assert!(!storage.has_user());

        let user = make_user();
        storage.store_user(&user).unwrap();
        assert!(storage.has_user());
        assert_eq!(storage.load_user().unwrap(), Some(user));

        storage.clear_user().unwrap();
        assert!(storage.load_user().unwrap().is_none());
        assert!(!storage.has_user());
    }

    #[test]
    fn test_user_file_is_not_plaintext() {
        let storage = test_storage();
        let user = make_user();
        storage.store_user(&user).unwrap();

        let raw = std::fs::read_to_string(storage.user_file_path()).unwrap();
        assert!(!raw.contains("user@example.com"));
        assert!(!raw.contains("ephemeralKeyPair"));
    }

    #[test]
    fn test_corrupt_user_file_is_purged() {
        let storage = test_storage();
        std::fs::write(storage.user_file_path(), "!!! not base64 !!!").unwrap();

        assert!(storage.load_user().unwrap().is_none());
        assert!(!storage.user_file_path().exists());
    }

    #[test]
    fn test_session_bridge_round_trip() {
        let storage = test_storage();
        assert!(storage.load_session_bridge().is_none());

        let bridge = SessionBridge {
            jwt: "a.b.c".to_string(),
            user_info: GoogleUserInfo {
                sub: "sub-1".to_string(),
                email: "user@example.com".to_string(),
                name: "Test User".to_string(),
                picture: None,
            },
            timestamp: Utc::now(),
            address: "0x1234".to_string(),
            email: "user@example.com".to_string(),
            name: "Test User".to_string(),
            picture: None,
        };
        storage.store_session_bridge(&bridge).unwrap();
        assert_eq!(storage.load_session_bridge(), Some(bridge));

        storage.clear_session_bridge().unwrap();
        assert!(storage.load_session_bridge().is_none());
    }

    #[test]
    fn test_salt_is_stable_per_subject() {
        let storage = test_storage();
        let first = storage.load_or_create_salt("sub-1").unwrap();
        let second = storage.load_or_create_salt("sub-1").unwrap();
        assert_eq!(first, second);

        let other = storage.load_or_create_salt("sub-2").unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_salt_survives_user_clear() {
        let storage = test_storage();
        let salt = storage.load_or_create_salt("sub-1").unwrap();

        storage.store_user(&make_user()).unwrap();
        storage.clear_user().unwrap();
        storage.clear_session_bridge().unwrap();

        assert_eq!(storage.load_or_create_salt("sub-1").unwrap(), salt);
    }
}
