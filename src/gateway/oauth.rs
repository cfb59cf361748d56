//! Google sign-in endpoints.
//!
//! `GET /api/auth/google` sends the browser to the consent page with a
//! one-time `state`; `GET /api/auth/google/callback` verifies that state,
//! exchanges the code, reconciles the identity and hands tokens to the
//! frontend in the URL fragment.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Redirect, Response},
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::AppState;
use crate::auth::store::generate_token;
use crate::protocol::ApiResponse;

/// Lifetime of an OAuth `state` value (10 minutes).
pub const OAUTH_STATE_TTL_SECS: u64 = 600;

/// Upper bound on in-progress OAuth flows held in memory.
pub const MAX_PENDING_OAUTH_STATES: usize = 10_000;

/// One-time anti-forgery values for in-progress OAuth flows.
#[derive(Debug)]
pub struct OAuthStateStore {
    ttl: Duration,
    max_pending: usize,
    states: Mutex<HashMap<String, Instant>>,
}

impl OAuthStateStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_limit(ttl, MAX_PENDING_OAUTH_STATES)
    }

    pub fn with_limit(ttl: Duration, max_pending: usize) -> Self {
        Self {
            ttl,
            max_pending: max_pending.max(1),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Mint and record a fresh state value. At capacity the oldest pending
    /// state is evicted.
    pub fn issue(&self) -> String {
        let state = generate_token();
        let now = Instant::now();
        let mut states = self.states.lock();
        states.retain(|_, issued_at| now.duration_since(*issued_at) < self.ttl);
        while states.len() >= self.max_pending {
            let Some(oldest) = states
                .iter()
                .min_by_key(|(_, issued_at)| **issued_at)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            states.remove(&oldest);
        }
        states.insert(state.clone(), now);
        state
    }

    /// Returns true exactly once for a live state value.
    pub fn consume(&self, state: &str) -> bool {
        let now = Instant::now();
        let mut states = self.states.lock();
        states.retain(|_, issued_at| now.duration_since(*issued_at) < self.ttl);
        states.remove(state).is_some()
    }

    pub fn pending(&self) -> usize {
        self.states.lock().len()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

fn not_configured() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!(ApiResponse::<()>::fail(
            "Google sign-in is not configured"
        ))),
    )
        .into_response()
}

fn failure_redirect(state: &AppState) -> Response {
    Redirect::to(&format!("{}/login?error=oauth_failed", state.frontend_url)).into_response()
}

/// GET /api/auth/google — redirect to the provider's consent page.
pub async fn handle_google_start(State(state): State<AppState>) -> Response {
    let Some(provider) = state.google.as_ref() else {
        return not_configured();
    };
    let oauth_state = state.oauth_states.issue();
    Redirect::to(&provider.authorization_url(&oauth_state)).into_response()
}

/// GET /api/auth/google/callback — complete sign-in and redirect to the frontend.
pub async fn handle_google_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let Some(provider) = state.google.clone() else {
        return not_configured();
    };

    if let Some(error) = query.error.as_deref() {
        tracing::warn!(provider = provider.name(), error, "OAuth consent was not granted");
        return failure_redirect(&state);
    }

    let state_ok = query
        .state
        .as_deref()
        .is_some_and(|s| state.oauth_states.consume(s));
    if !state_ok {
        tracing::warn!("OAuth callback with missing or unknown state");
        return failure_redirect(&state);
    }

    let Some(code) = query.code.as_deref() else {
        tracing::warn!("OAuth callback without authorization code");
        return failure_redirect(&state);
    };

    let identity = match provider.exchange(code).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(provider = provider.name(), "OAuth code exchange failed: {e}");
            return failure_redirect(&state);
        }
    };

    let resolved = match state.resolver.resolve(&identity) {
        Ok(resolved) => resolved,
        Err(e) => {
            tracing::error!("Google sign-in could not be reconciled: {e}");
            return failure_redirect(&state);
        }
    };

    let tokens = match state.auth_store.issue_tokens(&resolved.user.id) {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::error!(user_id = %resolved.user.id, "Session creation failed: {e:#}");
            return failure_redirect(&state);
        }
    };

    tracing::info!(
        user_id = %resolved.user.id,
        outcome = ?resolved.outcome,
        "Google sign-in completed"
    );

    Redirect::to(&format!(
        "{}/auth/callback#token={}&refreshToken={}",
        state.frontend_url,
        urlencoding::encode(&tokens.access_token),
        urlencoding::encode(&tokens.refresh_token),
    ))
    .into_response()
}
