//! Axum-based HTTP gateway for account and session endpoints.
//!
//! - Request body size limits (64KB max)
//! - Request timeouts to prevent slow-loris attacks
//! - Sliding-window rate limiting on credential endpoints
//! - CORS restricted to the configured frontend origins

pub mod oauth;

use crate::auth::{AuthStore, GoogleProvider, IdentityProvider, IdentityResolver, UserRepository};
use crate::config::{Config, GatewayConfig};
use crate::error::AuthError;
use crate::protocol::{
    ApiResponse, AuthPayload, LoginRequest, ProfileUpdate, RefreshRequest, RegisterRequest,
    TokenPayload, UserPayload,
};
use crate::session::AUTH_TOKEN_HEADER;
use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Json,
    routing::{get, post, put},
    Router,
};
use oauth::{OAuthStateStore, OAUTH_STATE_TTL_SECS};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB).
pub const MAX_BODY_SIZE: usize = 65_536;
/// Sliding window used by gateway rate limiting.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;
/// How often expired tokens are purged from the database.
const SESSION_CLEANUP_INTERVAL_SECS: u64 = 3600;

/// How often the rate limiter sweeps stale IP entries from its map.
const RATE_LIMITER_SWEEP_INTERVAL_SECS: u64 = 300; // 5 minutes

#[derive(Debug)]
struct SlidingWindowRateLimiter {
    limit_per_window: u32,
    window: Duration,
    requests: Mutex<(HashMap<String, Vec<Instant>>, Instant)>,
}

impl SlidingWindowRateLimiter {
    fn new(limit_per_window: u32, window: Duration) -> Self {
        Self {
            limit_per_window,
            window,
            requests: Mutex::new((HashMap::new(), Instant::now())),
        }
    }

    fn allow(&self, key: &str) -> bool {
        if self.limit_per_window == 0 {
            return true;
        }

        let now = Instant::now();
        let cutoff = now.checked_sub(self.window).unwrap_or_else(Instant::now);

        let mut guard = self.requests.lock();
        let (requests, last_sweep) = &mut *guard;

        // Periodic sweep: remove IPs with no recent requests
        if last_sweep.elapsed() >= Duration::from_secs(RATE_LIMITER_SWEEP_INTERVAL_SECS) {
            requests.retain(|_, timestamps| {
                timestamps.retain(|t| *t > cutoff);
                !timestamps.is_empty()
            });
            *last_sweep = now;
        }

        let entry = requests.entry(key.to_owned()).or_default();
        entry.retain(|instant| *instant > cutoff);

        if entry.len() >= self.limit_per_window as usize {
            return false;
        }

        entry.push(now);
        true
    }
}

/// Per-client throttle for endpoints that accept credentials.
#[derive(Debug)]
pub struct GatewayRateLimiter {
    credentials: SlidingWindowRateLimiter,
}

impl GatewayRateLimiter {
    pub fn new(per_minute: u32) -> Self {
        Self {
            credentials: SlidingWindowRateLimiter::new(
                per_minute,
                Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
            ),
        }
    }

    fn allow_credentials(&self, key: &str) -> bool {
        self.credentials.allow(key)
    }
}

fn client_key_from_headers(headers: &HeaderMap) -> String {
    for header_name in ["X-Forwarded-For", "X-Real-IP"] {
        if let Some(value) = headers.get(header_name).and_then(|v| v.to_str().ok()) {
            let first = value.split(',').next().unwrap_or("").trim();
            if !first.is_empty() {
                return first.to_owned();
            }
        }
    }
    "unknown".into()
}

/// True unless `host` is a loopback address.
pub fn is_public_bind(host: &str) -> bool {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") {
        return false;
    }
    match host.parse::<std::net::IpAddr>() {
        Ok(ip) => !ip.is_loopback(),
        Err(_) => true,
    }
}

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub auth_store: Arc<AuthStore>,
    pub resolver: Arc<IdentityResolver>,
    /// Google sign-in, when client credentials are configured.
    pub google: Option<Arc<dyn IdentityProvider>>,
    pub oauth_states: Arc<OAuthStateStore>,
    pub rate_limiter: Arc<GatewayRateLimiter>,
    /// Whether new user registration is allowed.
    pub allow_registration: bool,
    /// Maximum registered users (0 = unlimited).
    pub max_users: u64,
    /// Frontend base URL, without trailing slash.
    pub frontend_url: Arc<str>,
}

impl AppState {
    pub fn new(
        auth_store: Arc<AuthStore>,
        google: Option<Arc<dyn IdentityProvider>>,
        config: &Config,
    ) -> Self {
        let users: Arc<dyn UserRepository> = auth_store.clone();
        Self {
            resolver: Arc::new(IdentityResolver::new(users)),
            auth_store,
            google,
            oauth_states: Arc::new(OAuthStateStore::new(Duration::from_secs(
                OAUTH_STATE_TTL_SECS,
            ))),
            rate_limiter: Arc::new(GatewayRateLimiter::new(
                config.gateway.auth_rate_limit_per_minute,
            )),
            allow_registration: config.auth.allow_registration,
            max_users: config.auth.max_users,
            frontend_url: Arc::from(config.gateway.frontend_url.trim_end_matches('/')),
        }
    }
}

fn cors_layer(config: &GatewayConfig) -> CorsLayer {
    let configured = if config.cors_origins.is_empty() {
        std::slice::from_ref(&config.frontend_url)
    } else {
        config.cors_origins.as_slice()
    };
    let origins: Vec<HeaderValue> = configured
        .iter()
        .filter_map(|origin| {
            let origin = origin.trim().trim_end_matches('/');
            match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin, "Ignoring invalid CORS origin");
                    None
                }
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static(AUTH_TOKEN_HEADER),
        ])
        .max_age(Duration::from_secs(3600))
}

/// Router with every endpoint and middleware layer attached.
pub fn build_router(state: AppState, config: &GatewayConfig) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/api/auth/register", post(handle_auth_register))
        .route("/api/auth/login", post(handle_auth_login))
        .route("/api/auth/logout", post(handle_auth_logout))
        .route("/api/auth/me", get(handle_auth_me))
        .route("/api/auth/refresh", post(handle_auth_refresh))
        .route("/api/auth/profile", put(handle_auth_profile))
        .route("/api/auth/google", get(oauth::handle_google_start))
        .route("/api/auth/google/callback", get(oauth::handle_google_callback))
        .with_state(state)
        .layer(cors_layer(config))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs.max(1)),
        ))
}

/// Run the HTTP gateway until Ctrl+C.
pub async fn run_gateway(config: Config) -> Result<()> {
    let host = config.gateway.host.as_str();
    let port = config.gateway.port;

    // ── Security: refuse public bind without explicit opt-in ──
    if is_public_bind(host) && !config.gateway.allow_public_bind {
        anyhow::bail!(
            "🛑 Refusing to bind to {host} — gateway would be exposed to the internet.\n\
             Fix: use --host 127.0.0.1 (default), or set\n\
             [gateway] allow_public_bind = true in config.toml behind a TLS proxy."
        );
    }

    // ── Auth store ──────────────────────────────────────────
    let db_path = config.auth.resolved_db_path()?;
    let auth_store = Arc::new(AuthStore::new(
        &db_path,
        Some(config.auth.access_token_ttl_secs),
        Some(config.auth.refresh_token_ttl_secs),
    )?);
    tracing::info!("Auth store initialized at {}", db_path.display());

    // ── Google sign-in ──────────────────────────────────────
    let redirect_uri = format!(
        "{}/api/auth/google/callback",
        config.gateway.public_base_url()
    );
    let google: Option<Arc<dyn IdentityProvider>> =
        match GoogleProvider::from_config(&config.google, redirect_uri)? {
            Some(provider) => Some(Arc::new(provider)),
            None => {
                tracing::warn!(
                    "Google OAuth credentials not configured (GOOGLE_CLIENT_ID / GOOGLE_CLIENT_SECRET); Google sign-in disabled"
                );
                None
            }
        };

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_port = listener.local_addr()?.port();
    let display_addr = format!("{host}:{actual_port}");

    println!("🕯️  Veilo gateway listening on http://{display_addr}");
    println!("  GET  /health                     — health check");
    println!("  POST /api/auth/register          — create an account");
    println!("  POST /api/auth/login             — sign in with email + password");
    println!("  GET  /api/auth/me                — current user");
    println!("  POST /api/auth/refresh           — new access token from a refresh token");
    println!("  PUT  /api/auth/profile           — update alias, avatar or name");
    println!("  POST /api/auth/logout            — revoke current token");
    if google.is_some() {
        println!("  GET  /api/auth/google            — start Google sign-in");
        println!("  GET  /api/auth/google/callback   — Google OAuth callback");
    }
    println!("  Press Ctrl+C to stop.\n");

    // ── Expired token sweeper ───────────────────────────────
    let sweeper_store = auth_store.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(SESSION_CLEANUP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            match sweeper_store.cleanup_expired_sessions() {
                Ok(0) => {}
                Ok(n) => tracing::debug!(removed = n, "Expired tokens purged"),
                Err(e) => tracing::warn!("Token cleanup failed: {e}"),
            }
        }
    });

    let state = AppState::new(auth_store, google, &config);
    let app = build_router(state, &config.gateway);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// Concrete return type for auth handlers (avoids `impl IntoResponse` inference issues).
type AuthResponse = (StatusCode, Json<serde_json::Value>);

fn respond<T: Serialize>(status: StatusCode, body: ApiResponse<T>) -> AuthResponse {
    (status, Json(serde_json::json!(body)))
}

fn fail(status: StatusCode, message: impl Into<String>) -> AuthResponse {
    respond(status, ApiResponse::<()>::fail(message))
}

fn auth_error_response(err: &AuthError) -> AuthResponse {
    let status = match err {
        AuthError::Validation(_) => StatusCode::BAD_REQUEST,
        AuthError::Conflict(_) => StatusCode::CONFLICT,
        AuthError::Authorization(_) => StatusCode::UNAUTHORIZED,
        AuthError::IdentityResolution(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AuthError::TransientNetwork(_) => StatusCode::BAD_GATEWAY,
    };
    if status.is_server_error() {
        tracing::error!("Auth request failed: {err}");
    }
    fail(status, err.user_message())
}

/// Map a store error to a response without leaking internals.
fn error_response(err: &anyhow::Error) -> AuthResponse {
    match err.downcast_ref::<AuthError>() {
        Some(auth) => auth_error_response(auth),
        None => {
            tracing::error!("Auth request failed: {err:#}");
            fail(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Something went wrong. Please try again.",
            )
        }
    }
}

fn rate_limited() -> AuthResponse {
    fail(
        StatusCode::TOO_MANY_REQUESTS,
        "Too many attempts. Please wait a minute and try again.",
    )
}

fn invalid_body(e: &JsonRejection) -> AuthResponse {
    fail(StatusCode::BAD_REQUEST, format!("Invalid request: {e}"))
}

/// Extract the access token from `Authorization: Bearer` or `x-auth-token`.
fn extract_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| {
            headers
                .get(AUTH_TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Validate an access token and return the session. Returns error response if invalid.
fn require_auth_session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<crate::auth::Session, AuthResponse> {
    let token = extract_token(headers)
        .ok_or_else(|| fail(StatusCode::UNAUTHORIZED, "Missing authentication token"))?;

    match state.auth_store.validate_session(token) {
        Ok(Some(session)) => Ok(session),
        Ok(None) => Err(fail(
            StatusCode::UNAUTHORIZED,
            "Invalid or expired session token",
        )),
        Err(e) => Err(error_response(&e)),
    }
}

/// Issue tokens for `user` and build the success body.
fn signed_in(state: &AppState, status: StatusCode, user: crate::auth::User) -> AuthResponse {
    match state.auth_store.issue_tokens(&user.id) {
        Ok(tokens) => respond(
            status,
            ApiResponse::ok(AuthPayload {
                token: tokens.access_token,
                refresh_token: Some(tokens.refresh_token),
                user,
            }),
        ),
        Err(e) => error_response(&e),
    }
}

/// GET /health — always public (no secrets leaked)
async fn handle_health(State(state): State<AppState>) -> AuthResponse {
    respond(
        StatusCode::OK,
        ApiResponse::ok(serde_json::json!({
            "status": "ok",
            "googleAuth": state.google.is_some(),
        })),
    )
}

/// POST /api/auth/register — create a new user account.
async fn handle_auth_register(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> AuthResponse {
    if !state
        .rate_limiter
        .allow_credentials(&client_key_from_headers(&headers))
    {
        return rate_limited();
    }

    if !state.allow_registration {
        return fail(StatusCode::FORBIDDEN, "Registration is disabled");
    }

    // Enforce max_users limit (0 = unlimited)
    if state.max_users > 0 {
        match state.auth_store.user_count() {
            Ok(count) if count >= state.max_users => {
                return fail(StatusCode::FORBIDDEN, "Maximum user limit reached");
            }
            Ok(_) => {}
            Err(e) => return error_response(&e),
        }
    }

    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => return invalid_body(&e),
    };

    match state.auth_store.register(
        &body.email,
        &body.password,
        &body.real_name,
        body.preferred_alias.as_deref(),
    ) {
        Ok(user) => {
            tracing::info!(
                target: "veilo::audit",
                user_id = %user.id,
                alias = %user.alias,
                "User registered"
            );
            signed_in(&state, StatusCode::CREATED, user)
        }
        Err(e) => error_response(&e),
    }
}

/// POST /api/auth/login — authenticate and get tokens.
async fn handle_auth_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> AuthResponse {
    if !state
        .rate_limiter
        .allow_credentials(&client_key_from_headers(&headers))
    {
        return rate_limited();
    }

    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => return invalid_body(&e),
    };

    match state.auth_store.authenticate(&body.email, &body.password) {
        Ok(user) => signed_in(&state, StatusCode::OK, user),
        Err(e) => error_response(&e),
    }
}

/// POST /api/auth/refresh — exchange a refresh token for a new access token.
async fn handle_auth_refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> AuthResponse {
    if !state
        .rate_limiter
        .allow_credentials(&client_key_from_headers(&headers))
    {
        return rate_limited();
    }

    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => return invalid_body(&e),
    };

    match state.auth_store.refresh(body.refresh_token.trim()) {
        Ok(token) => respond(
            StatusCode::OK,
            ApiResponse::ok(TokenPayload {
                token,
                refresh_token: None,
            }),
        ),
        Err(e) => error_response(&e),
    }
}

/// GET /api/auth/me — current user from the access token.
async fn handle_auth_me(State(state): State<AppState>, headers: HeaderMap) -> AuthResponse {
    let session = match require_auth_session(&state, &headers) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match state.auth_store.get_user(&session.user_id) {
        Ok(Some(user)) => respond(StatusCode::OK, ApiResponse::ok(UserPayload { user })),
        Ok(None) => fail(StatusCode::UNAUTHORIZED, "Account no longer exists"),
        Err(e) => error_response(&e),
    }
}

/// PUT /api/auth/profile — partial profile update.
async fn handle_auth_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ProfileUpdate>, JsonRejection>,
) -> AuthResponse {
    let session = match require_auth_session(&state, &headers) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let update = match body {
        Ok(Json(b)) => b,
        Err(e) => return invalid_body(&e),
    };

    match state.auth_store.update_profile(&session.user_id, &update) {
        Ok(user) => respond(StatusCode::OK, ApiResponse::ok(UserPayload { user })),
        Err(e) => error_response(&e),
    }
}

/// POST /api/auth/logout — revoke the presented access token.
async fn handle_auth_logout(State(state): State<AppState>, headers: HeaderMap) -> AuthResponse {
    let Some(token) = extract_token(&headers) else {
        return fail(StatusCode::UNAUTHORIZED, "Missing authentication token");
    };

    match state.auth_store.revoke_session(token) {
        Ok(true) => respond(StatusCode::OK, ApiResponse::ok(serde_json::json!({}))),
        Ok(false) => fail(StatusCode::UNAUTHORIZED, "Invalid session"),
        Err(e) => error_response(&e),
    }
}
