//! Authentication manager - the single source of truth for auth state
//!
//! Orchestrates the Google authorization-code flow end to end: provider
//! bring-up, popup callback, backend code exchange, token decoding,
//! zkLogin address derivation, persistence, and the wallet-connection
//! handoff. All mutations flow through this type; consumers observe
//! state snapshots through [`AuthManager::subscribe`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use tokio::sync::mpsc;

use super::http_client::{CodeExchanger, ExchangeClient};
use super::provider::{
    AuthCallback, AuthorizationResponse, CodeClient, CodeClientConfig, GoogleCodeFlow,
    IdentityProvider, DEFAULT_SCOPE, UX_MODE_POPUP,
};
use super::storage::AuthStorage;
use super::types::{AuthError, AuthProvider, AuthState, AuthUser, GoogleUserInfo, SessionBridge};
use super::{jwt, zklogin};
use crate::config::{AuthConfig, GOOGLE_CLIENT_ID_ENV};
use crate::events::{WalletConnectionEvent, WALLET_CONNECTION_TRIGGER};

/// Listener invoked synchronously on every state change
pub type AuthListener = Box<dyn Fn(&AuthState) + Send>;

type ListenerList = Arc<Mutex<Vec<(u64, AuthListener)>>>;

/// Handle returned by [`AuthManager::subscribe`]. Dropping it does not
/// unsubscribe; call [`Subscription::unsubscribe`].
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Vec<(u64, AuthListener)>>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().unwrap().retain(|(id, _)| *id != self.id);
        }
    }
}

static GLOBAL_MANAGER: Lazy<AuthManager> =
    Lazy::new(|| AuthManager::from_env().expect("Failed to initialize AuthManager"));

/// Process-wide manager instance, built on first use from environment
/// configuration with the production Google adapter.
pub fn global() -> &'static AuthManager {
    &GLOBAL_MANAGER
}

/// Authentication manager
pub struct AuthManager {
    config: AuthConfig,
    state: Arc<Mutex<AuthState>>,
    listeners: ListenerList,
    next_subscription_id: AtomicU64,
    storage: AuthStorage,
    provider: Arc<dyn IdentityProvider>,
    exchanger: Arc<dyn CodeExchanger>,
    code_client: Mutex<Option<Box<dyn CodeClient>>>,
    authorization_rx: Mutex<Option<mpsc::UnboundedReceiver<AuthorizationResponse>>>,
    wallet_tx: crossbeam_channel::Sender<WalletConnectionEvent>,
    wallet_rx: crossbeam_channel::Receiver<WalletConnectionEvent>,
    sign_in_in_flight: AtomicBool,
}

impl AuthManager {
    /// Create a manager with explicit collaborators.
    pub fn new(
        config: AuthConfig,
        provider: Arc<dyn IdentityProvider>,
        exchanger: Arc<dyn CodeExchanger>,
        storage: AuthStorage,
    ) -> Self {
        let (wallet_tx, wallet_rx) = crossbeam_channel::unbounded();
        Self {
            config,
            state: Arc::new(Mutex::new(AuthState::default())),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_subscription_id: AtomicU64::new(0),
            storage,
            provider,
            exchanger,
            code_client: Mutex::new(None),
            authorization_rx: Mutex::new(None),
            wallet_tx,
            wallet_rx,
            sign_in_in_flight: AtomicBool::new(false),
        }
    }

    /// Create the production manager from environment configuration.
    pub fn from_env() -> Result<Self, AuthError> {
        let config = AuthConfig::from_env();
        let exchanger = Arc::new(ExchangeClient::new(config.api_base_url.clone()));
        Ok(Self::new(
            config,
            Arc::new(GoogleCodeFlow::new()),
            exchanger,
            AuthStorage::new()?,
        ))
    }

    /// Register a listener invoked synchronously on every state change.
    /// Duplicate registrations are permitted and each fires separately.
    pub fn subscribe(&self, listener: AuthListener) -> Subscription {
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().unwrap().push((id, listener));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Current state snapshot, by value.
    pub fn get_state(&self) -> AuthState {
        self.state.lock().unwrap().clone()
    }

    /// Receiver for wallet-connection trigger events. The channel is
    /// multi-consumer; each call returns a handle on the same stream.
    pub fn wallet_connection_events(&self) -> crossbeam_channel::Receiver<WalletConnectionEvent> {
        self.wallet_rx.clone()
    }

    fn update_state(&self, mutate: impl FnOnce(&mut AuthState)) {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            mutate(&mut state);
            state.clone()
        };
        let listeners = self.listeners.lock().unwrap();
        for (_, listener) in listeners.iter() {
            listener(&snapshot);
        }
    }

    fn fail(&self, error: &AuthError) {
        self.update_state(|s| {
            s.is_loading = false;
            s.error = Some(error.to_string());
        });
    }

    /// Load the identity provider and construct the popup code client.
    ///
    /// Idempotent: a second call with a live code client is a no-op. On
    /// failure `error` is set and `user` is left untouched.
    pub async fn initialize_google_auth(&self) -> Result<(), AuthError> {
        if self.code_client.lock().unwrap().is_some() {
            debug!("Google auth already initialized");
            return Ok(());
        }

        self.update_state(|s| {
            s.is_loading = true;
            s.error = None;
        });

        match self.try_initialize().await {
            Ok(()) => {
                info!("Google auth initialized");
                self.update_state(|s| s.is_loading = false);
                Ok(())
            }
            Err(e) => {
                error!("Failed to initialize Google auth: {}", e);
                self.fail(&e);
                Err(e)
            }
        }
    }

    async fn try_initialize(&self) -> Result<(), AuthError> {
        let client_id = self.config.google_client_id.clone().ok_or_else(|| {
            AuthError::Config(format!(
                "missing Google client ID ({} is not set)",
                GOOGLE_CLIENT_ID_ENV
            ))
        })?;

        self.provider.load().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let callback: AuthCallback = Arc::new(move |response: AuthorizationResponse| {
            // Fired by the provider at an arbitrary later time
            let _ = tx.send(response);
        });

        let code_client = self.provider.init_code_client(CodeClientConfig {
            client_id,
            scope: DEFAULT_SCOPE.to_string(),
            ux_mode: UX_MODE_POPUP.to_string(),
            callback,
        })?;

        *self.code_client.lock().unwrap() = Some(code_client);
        *self.authorization_rx.lock().unwrap() = Some(rx);
        Ok(())
    }

    /// Run the popup authorization flow end to end: popup, code exchange,
    /// token decode, address derivation, persistence.
    ///
    /// A second call while an attempt is in flight fails fast with
    /// [`AuthError::SignInInProgress`] and leaves the active attempt
    /// undisturbed.
    pub async fn sign_in_with_google(&self) -> Result<(), AuthError> {
        if self.sign_in_in_flight.swap(true, Ordering::SeqCst) {
            warn!("Rejecting concurrent sign-in attempt");
            return Err(AuthError::SignInInProgress);
        }

        let result = self.run_sign_in().await;
        self.sign_in_in_flight.store(false, Ordering::SeqCst);

        if let Err(e) = &result {
            error!("Google sign-in failed: {}", e);
            self.fail(e);
        }
        result
    }

    async fn run_sign_in(&self) -> Result<(), AuthError> {
        self.initialize_google_auth().await?;

        self.update_state(|s| {
            s.is_loading = true;
            s.error = None;
        });

        // Drop callbacks from an abandoned earlier popup before opening a
        // new one
        let mut rx = self.take_authorization_rx()?;
        while rx.try_recv().is_ok() {}

        if let Err(e) = self.request_code() {
            self.restore_authorization_rx(rx);
            return Err(e);
        }
        info!("Authorization popup opened, waiting for completion");

        let response = match self.config.popup_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(response) => response,
                Err(_) => {
                    self.restore_authorization_rx(rx);
                    return Err(AuthError::PopupTimeout);
                }
            },
            None => rx.recv().await,
        };
        self.restore_authorization_rx(rx);

        let response = response.ok_or_else(|| {
            AuthError::Provider("authorization channel closed".to_string())
        })?;

        if let Some(message) = response.error {
            info!("Authorization popup reported an error");
            return Err(AuthError::Provider(message));
        }
        let code = response.code.ok_or_else(|| {
            AuthError::Provider("authorization completed without a code".to_string())
        })?;

        debug!("Received authorization code, exchanging");
        let token = self.exchanger.exchange_code(&code).await?;

        let claims = jwt::decode_claims(&token)?;
        let user_info = GoogleUserInfo::from_claims(&claims)?;

        let user = self.try_complete(&token, user_info)?;
        self.finish_success(user);
        Ok(())
    }

    fn request_code(&self) -> Result<(), AuthError> {
        let guard = self.code_client.lock().unwrap();
        let client = guard.as_ref().ok_or_else(|| {
            AuthError::Provider("code client is not initialized".to_string())
        })?;
        client.request_code()
    }

    fn take_authorization_rx(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<AuthorizationResponse>, AuthError> {
        self.authorization_rx.lock().unwrap().take().ok_or_else(|| {
            AuthError::Provider("authorization channel is not initialized".to_string())
        })
    }

    fn restore_authorization_rx(&self, rx: mpsc::UnboundedReceiver<AuthorizationResponse>) {
        *self.authorization_rx.lock().unwrap() = Some(rx);
    }

    /// Terminal success path: derive the account identity from an
    /// exchanged token and persist it. Any failing step aborts with
    /// `error` set and `is_authenticated` still false.
    pub fn complete_authentication(
        &self,
        token: &str,
        user_info: GoogleUserInfo,
    ) -> Result<(), AuthError> {
        self.update_state(|s| {
            s.is_loading = true;
            s.error = None;
        });

        match self.try_complete(token, user_info) {
            Ok(user) => {
                self.finish_success(user);
                Ok(())
            }
            Err(e) => {
                error!("Failed to complete authentication: {}", e);
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn try_complete(&self, token: &str, user_info: GoogleUserInfo) -> Result<AuthUser, AuthError> {
        // Fresh single-use key material per attempt
        let ephemeral_key_pair = zklogin::EphemeralKeyPair::generate();
        let jwt_randomness = zklogin::generate_randomness();
        let nonce =
            zklogin::generate_nonce(&ephemeral_key_pair, zklogin::MAX_EPOCH, &jwt_randomness)?;
        // The authorization request does not carry the nonce today; it is
        // derived here so the session snapshot can be re-validated later.
        debug!("Derived sign-in nonce {}", nonce);

        let user_salt = self.storage.load_or_create_salt(&user_info.sub)?;
        let address = zklogin::derive_address(token, &user_salt)?;

        let user = AuthUser {
            address: address.clone(),
            email: user_info.email.clone(),
            name: user_info.name.clone(),
            picture: user_info.picture.clone(),
            provider: AuthProvider::Google,
            jwt: token.to_string(),
            ephemeral_key_pair,
            max_epoch: zklogin::MAX_EPOCH,
            jwt_randomness,
            user_salt,
        };

        self.storage.store_user(&user)?;
        self.storage.store_session_bridge(&SessionBridge {
            jwt: token.to_string(),
            user_info,
            timestamp: Utc::now(),
            address,
            email: user.email.clone(),
            name: user.name.clone(),
            picture: user.picture.clone(),
        })?;

        Ok(user)
    }

    fn finish_success(&self, user: AuthUser) {
        info!("Authenticated {} as {}", user.email, user.address);
        self.update_state(|s| {
            s.user = Some(user);
            s.is_authenticated = true;
            s.is_loading = false;
            s.error = None;
        });

        debug!("Dispatching {}", WALLET_CONNECTION_TRIGGER);
        let _ = self.wallet_tx.send(WalletConnectionEvent::from_google_oauth());
    }

    /// Clear persisted records and reset to the initial state.
    ///
    /// The in-memory user is cleared even when storage cleanup fails; the
    /// failure is surfaced through `error`.
    pub fn sign_out(&self) -> Result<(), AuthError> {
        info!("Signing out");

        let cleared = self
            .storage
            .clear_user()
            .and(self.storage.clear_session_bridge());

        match cleared {
            Ok(()) => {
                self.update_state(|s| *s = AuthState::default());
                Ok(())
            }
            Err(e) => {
                error!("Failed to clear stored auth data: {}", e);
                self.update_state(|s| {
                    *s = AuthState::default();
                    s.error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    /// Restore a persisted session if its embedded token is still valid.
    ///
    /// An expired or undecodable token purges the stored record silently;
    /// that is an expected startup path, not an error.
    pub fn load_stored_user(&self) -> Result<Option<AuthUser>, AuthError> {
        let Some(user) = self.storage.load_user()? else {
            debug!("No stored auth user");
            return Ok(None);
        };

        if user.is_jwt_expired() {
            info!("Stored session for {} has expired, purging", user.email);
            let _ = self.storage.clear_user();
            let _ = self.storage.clear_session_bridge();
            return Ok(None);
        }

        info!("Restored session for {}", user.email);
        self.update_state(|s| {
            s.user = Some(user.clone());
            s.is_authenticated = true;
            s.is_loading = false;
            s.error = None;
        });
        Ok(Some(user))
    }
}

impl Default for AuthManager {
    fn default() -> Self {
        Self::from_env().expect("Failed to create AuthManager")
    }
}
