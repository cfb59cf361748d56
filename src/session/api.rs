//! HTTP collaborator used by the session context.

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::AuthError;
use crate::protocol::{
    ApiResponse, AuthPayload, LoginRequest, ProfileUpdate, RefreshRequest, RegisterRequest,
    TokenPayload, UserPayload,
};

/// Header carrying the access token for clients that cannot set `Authorization`.
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// Remote auth operations.
///
/// `Err` is reserved for authorization and transport failures; a server that
/// answers with `success: false` yields `Ok` with that envelope.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<ApiResponse<UserPayload>, AuthError>;

    async fn login(&self, request: &LoginRequest) -> Result<ApiResponse<AuthPayload>, AuthError>;

    async fn register(
        &self,
        request: &RegisterRequest,
    ) -> Result<ApiResponse<AuthPayload>, AuthError>;

    async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<ApiResponse<TokenPayload>, AuthError>;

    async fn update_profile(
        &self,
        token: &str,
        update: &ProfileUpdate,
    ) -> Result<ApiResponse<UserPayload>, AuthError>;

    /// Invalidate `token` server-side.
    async fn revoke(&self, token: &str) -> Result<(), AuthError>;
}

/// [`AuthApi`] over the gateway's JSON endpoints.
pub struct HttpAuthApi {
    base_url: String,
    http: reqwest::Client,
}

impl HttpAuthApi {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_token(req: RequestBuilder, token: &str) -> RequestBuilder {
        req.bearer_auth(token).header(AUTH_TOKEN_HEADER, token)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
    ) -> Result<ApiResponse<T>, AuthError> {
        let resp = req.send().await.map_err(|e| {
            tracing::debug!("Auth request failed: {e}");
            AuthError::network(e.to_string())
        })?;

        let status = resp.status();
        if status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
        {
            return Err(AuthError::network(format!("server returned {status}")));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| AuthError::network(e.to_string()))?;
        let parsed = serde_json::from_str::<ApiResponse<T>>(&body);

        if status == StatusCode::UNAUTHORIZED {
            let message = parsed
                .ok()
                .and_then(|r| r.error)
                .unwrap_or_else(|| "Session expired. Please sign in again.".into());
            return Err(AuthError::authorization(message));
        }

        // A body that is not an envelope did not come from the auth handlers.
        parsed.map_err(|e| {
            tracing::debug!(%status, "Unexpected auth response body: {e}");
            AuthError::network(format!("Unexpected server response ({status})"))
        })
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn authenticate(&self, token: &str) -> Result<ApiResponse<UserPayload>, AuthError> {
        let req = Self::with_token(self.http.get(self.url("/api/auth/me")), token);
        self.send(req).await
    }

    async fn login(&self, request: &LoginRequest) -> Result<ApiResponse<AuthPayload>, AuthError> {
        let req = self.http.post(self.url("/api/auth/login")).json(request);
        self.send(req).await
    }

    async fn register(
        &self,
        request: &RegisterRequest,
    ) -> Result<ApiResponse<AuthPayload>, AuthError> {
        let req = self.http.post(self.url("/api/auth/register")).json(request);
        self.send(req).await
    }

    async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<ApiResponse<TokenPayload>, AuthError> {
        let req = self
            .http
            .post(self.url("/api/auth/refresh"))
            .json(&RefreshRequest {
                refresh_token: refresh_token.to_string(),
            });
        self.send(req).await
    }

    async fn update_profile(
        &self,
        token: &str,
        update: &ProfileUpdate,
    ) -> Result<ApiResponse<UserPayload>, AuthError> {
        let req = Self::with_token(self.http.put(self.url("/api/auth/profile")), token).json(update);
        self.send(req).await
    }

    async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let req = Self::with_token(self.http.post(self.url("/api/auth/logout")), token);
        self.send::<serde_json::Value>(req).await.map(|_| ())
    }
}
