use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};

use super::storage::{SessionStorage, TOKEN_KEY, USERNAME_KEY};
use crate::api::client::endpoint;
use crate::api::ApiError;

const LOGIN_PATH: &str = "/auth/login";
const REGISTER_PATH: &str = "/auth/register";

/// Buffer size for the session event channel.
/// Events are rare (one per login/logout) so a small buffer is plenty.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Reason given to a login that lost the race against a logout.
const SUPERSEDED_REASON: &str = "Signed out while login was in progress";

/// Reason given when the auth endpoint answered 2xx with an unusable body.
const INVALID_RESPONSE_REASON: &str = "Invalid response from server";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub token: String,
    pub username: String,
}

/// Snapshot of the authentication state.
///
/// The credential and identity are stored together, so a session is
/// authenticated exactly when both are present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    data: Option<SessionData>,
}

impl Session {
    pub fn new(data: SessionData) -> Self {
        Self { data: Some(data) }
    }

    pub fn is_authenticated(&self) -> bool {
        self.data.is_some()
    }

    /// Get the bearer token if logged in
    pub fn token(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.token.as_str())
    }

    /// Get the display identity if logged in
    pub fn username(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.username.as_str())
    }

    pub fn data(&self) -> Option<&SessionData> {
        self.data.as_ref()
    }
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { username: String },
    LoggedOut,
    /// The server rejected the credential and the session was cleared.
    /// `show_login` is false when a login view is already on screen.
    ForcedLogout { show_login: bool },
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    username: String,
}

/// Single source of truth for who is logged in.
///
/// Every mutation writes durable storage and publishes the new snapshot while
/// holding `write_lock`; the lock is never held across network I/O.
pub struct SessionStore {
    client: Client,
    base_url: String,
    storage: Box<dyn SessionStorage>,
    state: watch::Sender<Session>,
    events: broadcast::Sender<SessionEvent>,
    write_lock: Mutex<()>,
    /// Bumped by every user-initiated logout; a login that observes a
    /// different value when it completes is discarded.
    logout_epoch: AtomicU64,
    login_view_active: AtomicBool,
}

impl SessionStore {
    pub fn new(client: Client, base_url: impl Into<String>, storage: Box<dyn SessionStorage>) -> Self {
        let (state, _) = watch::channel(Session::default());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            client,
            base_url: base_url.into(),
            storage,
            state,
            events,
            write_lock: Mutex::new(()),
            logout_epoch: AtomicU64::new(0),
            login_view_active: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // State access
    // =========================================================================

    /// Load the session left by a previous run.
    ///
    /// Returns whether a complete session was found. Missing or partial
    /// entries leave the store logged out.
    pub async fn restore(&self) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let token = self.storage.get(TOKEN_KEY)?.filter(|t| !t.is_empty());
        let username = self.storage.get(USERNAME_KEY)?.filter(|u| !u.is_empty());

        match (token, username) {
            (Some(token), Some(username)) => {
                debug!(username = %username, "Session restored");
                self.state.send_replace(Session::new(SessionData { token, username }));
                Ok(true)
            }
            (token, username) => {
                debug!(
                    has_token = token.is_some(),
                    has_username = username.is_some(),
                    "No complete session in storage"
                );
                self.state.send_replace(Session::default());
                Ok(false)
            }
        }
    }

    /// Current snapshot; reflects the most recent completed mutation.
    pub fn current_session(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    /// Bearer token to attach to a request dispatched right now
    pub fn credential(&self) -> Option<String> {
        self.state.borrow().token().map(str::to_string)
    }

    pub fn username(&self) -> Option<String> {
        self.state.borrow().username().map(str::to_string)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    /// Record whether a login view is currently displayed.
    pub fn set_login_view_active(&self, active: bool) {
        self.login_view_active.store(active, Ordering::SeqCst);
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Authenticate against the remote service and establish a session.
    pub async fn login(&self, username: &str, password: &str) -> Result<SessionData, ApiError> {
        let epoch = self.logout_epoch.load(Ordering::SeqCst);

        let (status, body) = self
            .post_auth(LOGIN_PATH, &LoginRequest { username, password })
            .await
            .map_err(|e| {
                warn!(error = %e, "Login request failed");
                ApiError::LoginFailed {
                    reason: ApiError::transport_reason(&e).to_string(),
                }
            })?;

        if !status.is_success() {
            let reason = ApiError::message_from_body(status, &body);
            warn!(status = %status, reason = %reason, "Login rejected");
            return Err(ApiError::LoginFailed { reason });
        }

        let auth: AuthResponse = serde_json::from_str(&body).map_err(|e| {
            warn!(error = %e, "Failed to parse login response");
            ApiError::LoginFailed {
                reason: INVALID_RESPONSE_REASON.to_string(),
            }
        })?;

        if auth.token.is_empty() || auth.username.is_empty() {
            warn!("Login response is missing the token or username");
            return Err(ApiError::LoginFailed {
                reason: INVALID_RESPONSE_REASON.to_string(),
            });
        }

        let data = SessionData {
            token: auth.token,
            username: auth.username,
        };

        let _guard = self.write_lock.lock().await;
        if self.logout_epoch.load(Ordering::SeqCst) != epoch {
            info!(username = %data.username, "Discarding login that completed after logout");
            return Err(ApiError::LoginFailed {
                reason: SUPERSEDED_REASON.to_string(),
            });
        }

        self.persist(&data);
        self.state.send_replace(Session::new(data.clone()));
        let _ = self.events.send(SessionEvent::LoggedIn {
            username: data.username.clone(),
        });

        info!(username = %data.username, "Login successful");
        Ok(data)
    }

    /// Create an account. The session is left as it was; the caller logs in
    /// explicitly afterwards. Returns the username the server registered.
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<String, ApiError> {
        let (status, body) = self
            .post_auth(
                REGISTER_PATH,
                &RegisterRequest {
                    username,
                    email,
                    password,
                },
            )
            .await
            .map_err(|e| {
                warn!(error = %e, "Registration request failed");
                ApiError::RegistrationFailed {
                    reason: ApiError::transport_reason(&e).to_string(),
                }
            })?;

        if !status.is_success() {
            let reason = ApiError::message_from_body(status, &body);
            warn!(status = %status, reason = %reason, "Registration rejected");
            return Err(ApiError::RegistrationFailed { reason });
        }

        let registered = match serde_json::from_str::<RegisterResponse>(&body) {
            Ok(response) => response.username,
            Err(e) => {
                debug!(error = %e, "Registration response had no username, using requested one");
                username.to_string()
            }
        };

        info!(username = %registered, "Registration successful");
        Ok(registered)
    }

    /// Clear the session and its stored entries. Never fails.
    pub async fn logout(&self) {
        let _guard = self.write_lock.lock().await;
        self.logout_epoch.fetch_add(1, Ordering::SeqCst);

        let was_authenticated = self.state.borrow().is_authenticated();
        self.clear_storage();
        self.state.send_replace(Session::default());

        if was_authenticated {
            let _ = self.events.send(SessionEvent::LoggedOut);
            info!("Logged out");
        }
    }

    /// Tear down the session after the server rejected it.
    ///
    /// Returns whether a session was actually cleared; clearing an empty
    /// session is a no-op.
    pub async fn force_logout(&self) -> bool {
        self.force_logout_matching(None).await
    }

    /// Forced logout that only applies if `credential` is still the active
    /// one, so stale failures never clear a newer login.
    pub(crate) async fn force_logout_for(&self, credential: &str) -> bool {
        self.force_logout_matching(Some(credential)).await
    }

    async fn force_logout_matching(&self, credential: Option<&str>) -> bool {
        let _guard = self.write_lock.lock().await;

        let current = self.state.borrow().token().map(str::to_string);
        let Some(current) = current else {
            debug!("Authorization failure with no active session");
            return false;
        };
        if credential.is_some_and(|expected| expected != current) {
            debug!("Authorization failure for a credential that was already replaced");
            return false;
        }

        self.clear_storage();
        self.state.send_replace(Session::default());

        let show_login = !self.login_view_active.load(Ordering::SeqCst);
        let _ = self.events.send(SessionEvent::ForcedLogout { show_login });
        warn!(show_login, "Session rejected by server, logged out");
        true
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn post_auth<B: Serialize>(&self, path: &str, body: &B) -> Result<(StatusCode, String), reqwest::Error> {
        let url = endpoint(&self.base_url, path);
        debug!(url = %url, "Sending auth request");

        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        Ok((status, text))
    }

    fn persist(&self, data: &SessionData) {
        let result = self
            .storage
            .set(TOKEN_KEY, &data.token)
            .and_then(|_| self.storage.set(USERNAME_KEY, &data.username));
        if let Err(e) = result {
            warn!(error = %e, "Failed to save session");
        }
    }

    fn clear_storage(&self) {
        for key in [TOKEN_KEY, USERNAME_KEY] {
            if let Err(e) = self.storage.remove(key) {
                warn!(error = %e, key, "Failed to clear session entry");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
