//! Identity-provider boundary
//!
//! Abstracts the external Google code-flow client behind a trait so the
//! manager can be exercised against a fake in tests. The production
//! adapter receives the authorization callback on a loopback listener and
//! opens the system browser in place of the web popup.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use rand::Rng;

use super::types::AuthError;
use crate::utils::open_url;

/// Scope requested from the identity provider
pub const DEFAULT_SCOPE: &str = "openid email profile";
/// UX mode marker for the authorization flow
pub const UX_MODE_POPUP: &str = "popup";

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Settle delay after the callback transport comes up, covering the
/// provider's own asynchronous initialization
const LOAD_SETTLE_DELAY: Duration = Duration::from_millis(150);

/// Result of a completed (or failed) authorization popup.
///
/// User cancellation and provider denial arrive as an `error` payload,
/// not as a panic or a dropped callback.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthorizationResponse {
    pub code: Option<String>,
    pub error: Option<String>,
    pub state: Option<String>,
}

/// Callback invoked when the authorization flow completes. May fire at an
/// arbitrary later time, from the provider's own thread.
pub type AuthCallback = Arc<dyn Fn(AuthorizationResponse) + Send + Sync>;

/// Configuration for a code-flow client
#[derive(Clone)]
pub struct CodeClientConfig {
    pub client_id: String,
    pub scope: String,
    pub ux_mode: String,
    pub callback: AuthCallback,
}

/// External identity provider capable of hosting an authorization-code
/// flow
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Bring up the provider, replacing any stale instance. Fails with a
    /// load error when the callback transport cannot be established.
    async fn load(&self) -> Result<(), AuthError>;

    /// Construct a code-flow client with a bound completion callback.
    fn init_code_client(
        &self,
        config: CodeClientConfig,
    ) -> Result<Box<dyn CodeClient>, AuthError>;
}

/// A configured code-flow client
pub trait CodeClient: Send + Sync {
    /// Open the authorization popup. The outcome arrives later through
    /// the callback bound at construction.
    fn request_code(&self) -> Result<(), AuthError>;
}

/// Production adapter: loopback callback listener plus system browser.
pub struct GoogleCodeFlow {
    listener: Mutex<Option<TcpListener>>,
}

impl GoogleCodeFlow {
    pub fn new() -> Self {
        Self {
            listener: Mutex::new(None),
        }
    }
}

impl Default for GoogleCodeFlow {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for GoogleCodeFlow {
    async fn load(&self) -> Result<(), AuthError> {
        {
            let mut guard = self.listener.lock().unwrap();
            if guard.take().is_some() {
                info!("Replacing stale authorization callback listener");
            }
            let listener = TcpListener::bind("127.0.0.1:0").map_err(|e| {
                AuthError::ProviderLoad(format!("failed to bind callback listener: {}", e))
            })?;
            if let Ok(addr) = listener.local_addr() {
                info!("Authorization callback listener ready on port {}", addr.port());
            }
            *guard = Some(listener);
        }
        tokio::time::sleep(LOAD_SETTLE_DELAY).await;
        Ok(())
    }

    fn init_code_client(
        &self,
        config: CodeClientConfig,
    ) -> Result<Box<dyn CodeClient>, AuthError> {
        let listener = self.listener.lock().unwrap().take().ok_or_else(|| {
            AuthError::ProviderLoad("identity provider is not loaded".to_string())
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| AuthError::ProviderLoad(e.to_string()))?
            .port();

        // CSRF token carried through the authorization round trip
        let state: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();

        let auth_url = build_authorization_url(&config, port, &state);
        spawn_callback_thread(listener, config.callback, state);

        Ok(Box::new(GoogleCodeClient { auth_url }))
    }
}

struct GoogleCodeClient {
    auth_url: String,
}

impl CodeClient for GoogleCodeClient {
    fn request_code(&self) -> Result<(), AuthError> {
        info!("Opening browser for Google authorization");
        open_url(&self.auth_url);
        Ok(())
    }
}

fn build_authorization_url(config: &CodeClientConfig, port: u16, state: &str) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
        GOOGLE_AUTH_URL,
        percent_encode(&config.client_id),
        percent_encode(&format!("http://127.0.0.1:{}/callback", port)),
        percent_encode(&config.scope),
        percent_encode(state),
    )
}

/// Wait for the authorization callback on the listener, then invoke the
/// bound callback exactly once. The thread exits after the first
/// completed callback.
fn spawn_callback_thread(listener: TcpListener, callback: AuthCallback, expected_state: String) {
    thread::spawn(move || {
        for stream in listener.incoming() {
            let mut stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    warn!("Callback listener accept failed: {}", e);
                    continue;
                }
            };
            let Some(target) = read_request_target(&mut stream) else {
                let _ = respond(&mut stream, "400 Bad Request", "Bad request");
                continue;
            };
            if !target.starts_with("/callback") {
                let _ = respond(&mut stream, "404 Not Found", "Not found");
                continue;
            }

            let query = target.splitn(2, '?').nth(1).unwrap_or("");
            let mut response = parse_callback_query(query);
            if response.error.is_none()
                && response.state.as_deref() != Some(expected_state.as_str())
            {
                warn!("Authorization callback state mismatch");
                response = AuthorizationResponse {
                    code: None,
                    error: Some("state_mismatch".to_string()),
                    state: response.state,
                };
            }

            let body = if response.error.is_some() {
                "Sign-in was not completed. You can close this window."
            } else {
                "Sign-in complete. You can close this window and return to VeraLux."
            };
            let _ = respond(&mut stream, "200 OK", body);

            callback(response);
            break;
        }
    });
}

fn read_request_target(stream: &mut TcpStream) -> Option<String> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;
    // "GET <target> HTTP/1.1"
    request_line.split_whitespace().nth(1).map(str::to_string)
}

fn respond(stream: &mut TcpStream, status: &str, body: &str) -> std::io::Result<()> {
    let html = format!("<html><body><p>{}</p></body></html>", body);
    write!(
        stream,
        "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        html.len(),
        html
    )
}

/// Parse the callback query string into an authorization response.
pub(crate) fn parse_callback_query(query: &str) -> AuthorizationResponse {
    let mut response = AuthorizationResponse::default();
    for pair in query.split('&') {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let value = percent_decode(parts.next().unwrap_or(""));
        match key {
            "code" => response.code = Some(value),
            "error" => response.error = Some(value),
            "state" => response.state = Some(value),
            _ => {}
        }
    }
    response
}

/// Percent-encode a string for use in URL query parameters (RFC 3986
/// unreserved chars)
pub(crate) fn percent_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

/// Inverse of [`percent_encode`]. Malformed escapes pass through
/// unchanged.
pub(crate) fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let escaped = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match escaped {
                    Some(byte) => {
                        result.push(byte);
                        i += 3;
                    }
                    None => {
                        result.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                result.push(b' ');
                i += 1;
            }
            other => {
                result.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&result).into_owned()
}
