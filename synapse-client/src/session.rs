//! Session credentials and session-expiry handling.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::sync::{Mutex, RwLock};
use synapse_sync::{Notification, NotificationAction, NotificationLevel, Notifier};
use tokio::sync::watch;

/// Source of the bearer credential attached to every request.
pub trait SessionProvider: Send + Sync {
    fn token(&self) -> Option<String>;
    fn set_token(&self, token: String);
    fn clear(&self);
}

/// In-memory session.
#[derive(Debug, Default)]
pub struct MemorySession {
    token: RwLock<Option<String>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl SessionProvider for MemorySession {
    fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_token(&self, token: String) {
        *self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token);
    }

    fn clear(&self) {
        *self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

/// Non-secret identifier of the credential `token`, used to scope
/// per-user cache keys.
pub fn session_scope(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..9])
}

/// Authentication state observed by the consumer; `Expired` means
/// "redirect to login".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Authenticated,
    Expired,
}

/// One-time latch for session expiry.
///
/// Fires once per credential: any number of concurrent 401s answered for the
/// same token clear the session and notify exactly once. Installing a new
/// token re-arms it. A 401 for a request that carried no token, or a token
/// that is no longer current, never fires.
#[derive(Debug)]
pub struct SessionExpiry {
    expired_token: Mutex<Option<String>>,
    state: watch::Sender<AuthState>,
}

impl SessionExpiry {
    pub fn new(initial: AuthState) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            expired_token: Mutex::new(None),
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> AuthState {
        *self.state.borrow()
    }

    /// Mark the session authenticated after a token is installed, and
    /// re-arm the latch even if the token string was seen before.
    pub fn signed_in(&self) {
        self.reset();
        self.state.send_replace(AuthState::Authenticated);
    }

    pub fn signed_out(&self) {
        self.reset();
        self.state.send_replace(AuthState::Anonymous);
    }

    fn reset(&self) {
        *self
            .expired_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    /// Record a 401 for a request sent with `token`. Returns true if this
    /// call expired the session.
    pub fn expire(
        &self,
        token: Option<&str>,
        session: &dyn SessionProvider,
        notifier: &Notifier,
    ) -> bool {
        let Some(token) = token else {
            return false;
        };
        // A 401 for a credential that was already replaced or cleared says
        // nothing about the current session.
        if session.token().as_deref() != Some(token) {
            return false;
        }
        {
            let mut expired = self
                .expired_token
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if expired.as_deref() == Some(token) {
                return false;
            }
            *expired = Some(token.to_string());
        }
        session.clear();
        tracing::warn!("session expired");
        self.state.send_replace(AuthState::Expired);
        notifier.notify(
            Notification::new(NotificationLevel::Warning, "Session expired, please log in again")
                .with_action(NotificationAction::Relogin),
        );
        true
    }
}
