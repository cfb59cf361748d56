//! Client session lifecycle.
//!
//! `SessionContext` turns a stored credential into a live user on start
//! (`init`), drives login/register/logout/refresh/profile flows, and never
//! lets an error escape: every outcome is a state transition plus a notice.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::api::AuthApi;
use super::notice::{Notice, NoticeLevel, Notifier};
use super::token_store::TokenStore;
use crate::auth::User;
use crate::protocol::{AuthPayload, LoginRequest, ProfileUpdate, RegisterRequest, TokenPayload};

/// Where the session stands.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Loading,
    Authenticated(User),
    Unauthenticated,
}

/// Read-only view handed to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub is_loading: bool,
    pub is_authenticated: bool,
}

/// Decrements the in-flight counter when an operation finishes.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SessionContext {
    api: Arc<dyn AuthApi>,
    tokens: TokenStore,
    notifier: Arc<dyn Notifier>,
    state: Mutex<SessionState>,
    in_flight: AtomicUsize,
    /// Bumped by `teardown`; responses started under an older epoch are dropped.
    epoch: AtomicU64,
}

impl SessionContext {
    pub fn new(api: Arc<dyn AuthApi>, tokens: TokenStore, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            api,
            tokens,
            notifier,
            state: Mutex::new(SessionState::Idle),
            in_flight: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
        }
    }

    // ── Observation ─────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state.lock().clone()
    }

    pub fn user(&self) -> Option<User> {
        match &*self.state.lock() {
            SessionState::Authenticated(user) => Some(user.clone()),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(*self.state.lock(), SessionState::Authenticated(_))
    }

    /// True before `init` resolves and while any operation is awaiting the server.
    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
            || matches!(*self.state.lock(), SessionState::Idle | SessionState::Loading)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let user = self.user();
        SessionSnapshot {
            is_authenticated: user.is_some(),
            is_loading: self.is_loading(),
            user,
        }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Resolve the stored credential into a session.
    ///
    /// Only an explicit rejection clears the credential; a transport failure
    /// keeps it so a later `init` can retry.
    pub async fn init(&self) {
        let (_guard, epoch) = self.begin();
        self.set_state(SessionState::Loading);

        let Some(token) = self.tokens.get_token() else {
            self.set_state(SessionState::Unauthenticated);
            return;
        };

        let result = self.api.authenticate(&token).await;
        if self.is_stale(epoch) {
            return;
        }

        match result {
            Ok(resp) if resp.success => match resp.data {
                Some(payload) => {
                    tracing::debug!(user_id = %payload.user.id, "Session restored");
                    self.set_state(SessionState::Authenticated(payload.user));
                }
                None => {
                    tracing::warn!("Session check returned no user, keeping token");
                    self.set_state(SessionState::Unauthenticated);
                }
            },
            Ok(resp) => {
                tracing::info!(
                    reason = resp.error.as_deref().unwrap_or("rejected"),
                    "Stored token rejected, clearing"
                );
                self.clear_session();
            }
            Err(e) if e.is_authorization() => {
                tracing::info!("Stored token rejected, clearing: {e}");
                self.clear_session();
            }
            Err(e) => {
                tracing::warn!("Could not validate stored token, keeping it: {e}");
                self.set_state(SessionState::Unauthenticated);
            }
        }
    }

    /// End the context: drop credentials and state without telling the user.
    /// In-flight responses are discarded when they arrive.
    pub fn teardown(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.clear_session();
    }

    // ── Operations ──────────────────────────────────────────────────

    pub async fn login(&self, email: &str, password: &str) -> bool {
        let (_guard, epoch) = self.begin();
        self.set_state(SessionState::Loading);

        let request = LoginRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        let result = self.api.login(&request).await;
        if self.is_stale(epoch) {
            return false;
        }

        let failure = match result.map(|resp| resp.into_result()) {
            Ok(Ok(payload)) => {
                let alias = payload.user.alias.clone();
                if self.establish(payload) {
                    self.notifier.notify(
                        Notice::new(NoticeLevel::Success, "Welcome back!")
                            .with_description(format!("Hello {alias}!")),
                    );
                    return true;
                }
                None
            }
            Ok(Err(message)) => message,
            Err(e) => {
                tracing::info!("Login failed: {e}");
                Some(e.user_message())
            }
        };

        self.clear_session();
        self.notifier.notify(
            Notice::new(NoticeLevel::Error, "Login Failed").with_description(
                failure.unwrap_or_else(|| "Invalid credentials. Please try again.".into()),
            ),
        );
        false
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        real_name: &str,
        preferred_alias: Option<&str>,
    ) -> bool {
        let (_guard, epoch) = self.begin();
        self.set_state(SessionState::Loading);

        let request = RegisterRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
            real_name: real_name.trim().to_string(),
            preferred_alias: preferred_alias
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string),
        };
        let result = self.api.register(&request).await;
        if self.is_stale(epoch) {
            return false;
        }

        let failure = match result.map(|resp| resp.into_result()) {
            Ok(Ok(payload)) => {
                let alias = payload.user.alias.clone();
                if self.establish(payload) {
                    self.notifier.notify(
                        Notice::new(NoticeLevel::Success, "Welcome to Veilo!")
                            .with_description(format!("You are known here as {alias}.")),
                    );
                    return true;
                }
                None
            }
            Ok(Err(message)) => message,
            Err(e) => {
                tracing::info!("Registration failed: {e}");
                Some(e.user_message())
            }
        };

        self.clear_session();
        self.notifier.notify(
            Notice::new(NoticeLevel::Error, "Registration Failed").with_description(
                failure.unwrap_or_else(|| "Could not create your account. Please try again.".into()),
            ),
        );
        false
    }

    /// Always succeeds locally. Server-side revocation is best effort.
    pub async fn logout(&self) {
        let token = self.tokens.get_token();
        self.teardown();
        self.notifier.notify(
            Notice::new(NoticeLevel::Info, "Logged out")
                .with_description("You have been logged out successfully."),
        );

        if let Some(token) = token {
            if let Err(e) = self.api.revoke(&token).await {
                tracing::debug!("Server-side logout failed: {e}");
            }
        }
    }

    /// Swap the stored refresh token for a new access token.
    ///
    /// Returns `false` without side effects when no refresh token is stored.
    /// Any other failure logs the user out.
    pub async fn refresh_token(&self) -> bool {
        let Some(refresh) = self.tokens.get_refresh_token() else {
            return false;
        };

        let outcome = {
            let (_guard, epoch) = self.begin();
            let result = self.api.refresh_token(&refresh).await;
            if self.is_stale(epoch) {
                return false;
            }
            match result.map(|resp| resp.into_result()) {
                Ok(Ok(payload)) => self.store_refreshed(&payload),
                Ok(Err(message)) => {
                    tracing::info!(
                        reason = message.as_deref().unwrap_or("rejected"),
                        "Token refresh rejected"
                    );
                    false
                }
                Err(e) => {
                    tracing::info!("Token refresh failed: {e}");
                    false
                }
            }
        };

        if !outcome {
            self.logout().await;
        }
        outcome
    }

    /// Apply a partial profile change; the server's copy replaces ours.
    pub async fn update_profile(&self, update: ProfileUpdate) -> bool {
        if !self.is_authenticated() {
            return false;
        }
        let Some(token) = self.tokens.get_token() else {
            return false;
        };

        let (_guard, epoch) = self.begin();
        let result = self.api.update_profile(&token, &update).await;
        if self.is_stale(epoch) {
            return false;
        }

        let failure = match result.map(|resp| resp.into_result()) {
            Ok(Ok(payload)) => {
                self.set_state(SessionState::Authenticated(payload.user));
                self.notifier.notify(
                    Notice::new(NoticeLevel::Success, "Profile updated")
                        .with_description("Your changes have been saved."),
                );
                return true;
            }
            Ok(Err(message)) => {
                message.unwrap_or_else(|| "Could not update your profile.".into())
            }
            Err(e) if e.is_authorization() => {
                self.clear_session();
                e.user_message()
            }
            Err(e) => e.user_message(),
        };

        self.notifier
            .notify(Notice::new(NoticeLevel::Error, "Update Failed").with_description(failure));
        false
    }

    // ── Internals ───────────────────────────────────────────────────

    fn begin(&self) -> (InFlight<'_>, u64) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        (
            InFlight(&self.in_flight),
            self.epoch.load(Ordering::SeqCst),
        )
    }

    fn is_stale(&self, epoch: u64) -> bool {
        let stale = self.epoch.load(Ordering::SeqCst) != epoch;
        if stale {
            tracing::debug!("Discarding response for a torn-down session");
        }
        stale
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    fn clear_session(&self) {
        self.tokens.clear_all_tokens();
        self.set_state(SessionState::Unauthenticated);
    }

    /// Persist issued credentials and enter `Authenticated`.
    fn establish(&self, payload: AuthPayload) -> bool {
        if let Err(e) = self.tokens.set_token(&payload.token) {
            tracing::error!("Failed to store access token: {e:#}");
            return false;
        }
        if let Some(refresh) = payload.refresh_token.as_deref() {
            if let Err(e) = self.tokens.set_refresh_token(refresh) {
                tracing::warn!("Failed to store refresh token: {e:#}");
            }
        }
        self.set_state(SessionState::Authenticated(payload.user));
        true
    }

    fn store_refreshed(&self, payload: &TokenPayload) -> bool {
        if let Err(e) = self.tokens.set_token(&payload.token) {
            tracing::error!("Failed to store refreshed token: {e:#}");
            return false;
        }
        if let Some(refresh) = payload.refresh_token.as_deref() {
            if let Err(e) = self.tokens.set_refresh_token(refresh) {
                tracing::warn!("Failed to store rotated refresh token: {e:#}");
            }
        }
        true
    }
}
