//! Google OAuth 2.0 authorization-code flow.
//!
//! Builds the consent URL, exchanges the returned code for an access token and
//! reads the OpenID userinfo document into an [`ExternalIdentity`].

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::identity::ExternalIdentity;
use crate::config::GoogleConfig;
use crate::error::AuthError;

/// External OAuth provider able to vouch for a user's identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provider name used in logs.
    fn name(&self) -> &str;

    /// Consent page URL carrying the given anti-forgery `state`.
    fn authorization_url(&self, state: &str) -> String;

    /// Trade an authorization code for a verified identity.
    async fn exchange(&self, code: &str) -> Result<ExternalIdentity, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

/// Google identity provider over reqwest.
pub struct GoogleProvider {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
    scopes: String,
    http: reqwest::Client,
}

impl GoogleProvider {
    /// Build a provider from config. Returns `Ok(None)` when no client
    /// credentials are configured.
    pub fn from_config(config: &GoogleConfig, redirect_uri: String) -> anyhow::Result<Option<Self>> {
        let Some((client_id, client_secret)) = config.credentials() else {
            return Ok(None);
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_uri,
            auth_url: config.auth_url.clone(),
            token_url: config.token_url.clone(),
            userinfo_url: config.userinfo_url.clone(),
            scopes: config.scopes.join(" "),
            http,
        }))
    }

    async fn fetch_access_token(&self, code: &str) -> Result<String, AuthError> {
        let params = [
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        let resp = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::network(format!("Google token request failed: {e}")))?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(AuthError::network(format!(
                "Google token endpoint returned {status}"
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %body, "Google rejected authorization code");
            return Err(AuthError::authorization(
                "Google rejected the authorization code",
            ));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::network(format!("Malformed Google token response: {e}")))?;
        Ok(token.access_token)
    }

    async fn fetch_userinfo(&self, access_token: &str) -> Result<UserInfo, AuthError> {
        let resp = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::network(format!("Google userinfo request failed: {e}")))?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(AuthError::network(format!(
                "Google userinfo endpoint returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(AuthError::authorization(format!(
                "Google userinfo request was refused ({status})"
            )));
        }

        resp.json()
            .await
            .map_err(|e| AuthError::network(format!("Malformed Google userinfo response: {e}")))
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn authorization_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&self.scopes),
            urlencoding::encode(state),
        )
    }

    async fn exchange(&self, code: &str) -> Result<ExternalIdentity, AuthError> {
        if code.trim().is_empty() {
            return Err(AuthError::validation("Missing authorization code"));
        }

        let access_token = self.fetch_access_token(code).await?;
        let info = self.fetch_userinfo(&access_token).await?;

        let Some(email) = info.email.filter(|e| !e.trim().is_empty()) else {
            return Err(AuthError::validation(
                "Google account did not share an email address",
            ));
        };
        if info.email_verified == Some(false) {
            return Err(AuthError::authorization(
                "Google account email is not verified",
            ));
        }

        Ok(ExternalIdentity {
            external_id: info.sub,
            email,
            display_name: info.name.unwrap_or_default(),
            photo_url: info.picture,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> GoogleProvider {
        let config = GoogleConfig {
            client_id: Some("client-123".into()),
            client_secret: Some("shh".into()),
            auth_url: format!("{}/auth", server.uri()),
            token_url: format!("{}/token", server.uri()),
            userinfo_url: format!("{}/userinfo", server.uri()),
            ..GoogleConfig::default()
        };
        GoogleProvider::from_config(&config, "http://localhost:5000/api/auth/google/callback".into())
            .unwrap()
            .unwrap()
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=good-code"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "at-1", "token_type": "Bearer"})),
            )
            .mount(server)
            .await;
    }

    #[test]
    fn unconfigured_provider_is_none() {
        let provider =
            GoogleProvider::from_config(&GoogleConfig::default(), "http://x/cb".into()).unwrap();
        assert!(provider.is_none());
    }

    #[tokio::test]
    async fn authorization_url_carries_state_and_redirect() {
        let server = MockServer::start().await;
        let url = provider_for(&server).authorization_url("st ate");

        assert!(url.starts_with(&format!("{}/auth?", server.uri())));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("state=st%20ate"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains(
            "redirect_uri=http%3A%2F%2Flocalhost%3A5000%2Fapi%2Fauth%2Fgoogle%2Fcallback"
        ));
    }

    #[tokio::test]
    async fn exchange_returns_identity() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer at-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sub": "g-1",
                "email": "a@x.com",
                "email_verified": true,
                "name": "Ann",
                "picture": "https://example.com/a.png"
            })))
            .mount(&server)
            .await;

        let identity = provider_for(&server).exchange("good-code").await.unwrap();
        assert_eq!(
            identity,
            ExternalIdentity {
                external_id: "g-1".into(),
                email: "a@x.com".into(),
                display_name: "Ann".into(),
                photo_url: Some("https://example.com/a.png".into()),
            }
        );
    }

    #[tokio::test]
    async fn rejected_code_is_authorization_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(serde_json::json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;

        let err = provider_for(&server).exchange("bad-code").await.unwrap_err();
        assert!(err.is_authorization());
    }

    #[tokio::test]
    async fn provider_outage_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = provider_for(&server).exchange("good-code").await.unwrap_err();
        assert!(matches!(err, AuthError::TransientNetwork(_)));
    }

    #[tokio::test]
    async fn missing_email_is_validation_error() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"sub": "g-1"})))
            .mount(&server)
            .await;

        let err = provider_for(&server).exchange("good-code").await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn unverified_email_is_rejected() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sub": "g-1",
                "email": "a@x.com",
                "email_verified": false
            })))
            .mount(&server)
            .await;

        let err = provider_for(&server).exchange("good-code").await.unwrap_err();
        assert!(err.is_authorization());
    }

    #[tokio::test]
    async fn empty_code_is_rejected_without_network() {
        let server = MockServer::start().await;
        let err = provider_for(&server).exchange("  ").await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }
}
