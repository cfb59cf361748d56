use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ── Top-level ────────────────────────────────────────────────────

/// Root of `config.toml`. Every section and field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
    pub google: GoogleConfig,
    pub client: ClientConfig,
}

// ── Gateway ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL of this server, used to build the
    /// OAuth redirect URI. Defaults to `http://{host}:{port}`.
    pub public_url: Option<String>,
    /// Browser app that receives OAuth results.
    pub frontend_url: String,
    /// Allowed CORS origins. Empty means `frontend_url` only.
    pub cors_origins: Vec<String>,
    /// Login/register attempts per client per minute.
    pub auth_rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    /// Bind to a non-loopback address without complaint.
    pub allow_public_bind: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            public_url: None,
            frontend_url: "http://localhost:8080".into(),
            cors_origins: Vec::new(),
            auth_rate_limit_per_minute: 10,
            request_timeout_secs: 30,
            allow_public_bind: false,
        }
    }
}

impl GatewayConfig {
    pub fn public_base_url(&self) -> String {
        match self.public_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ => format!("http://{}:{}", self.host, self.port),
        }
    }
}

// ── Auth ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// SQLite database path. Defaults to `auth.db` in the data directory.
    pub db_path: Option<PathBuf>,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    pub allow_registration: bool,
    /// 0 means unlimited.
    pub max_users: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            access_token_ttl_secs: 7 * 24 * 3600,
            refresh_token_ttl_secs: 30 * 24 * 3600,
            allow_registration: true,
            max_users: 0,
        }
    }
}

impl AuthConfig {
    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("auth.db")),
        }
    }
}

// ── Google ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub scopes: Vec<String>,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            userinfo_url: "https://openidconnect.googleapis.com/v1/userinfo".into(),
            scopes: vec!["openid".into(), "email".into(), "profile".into()],
        }
    }
}

impl GoogleConfig {
    /// `(client_id, client_secret)` when both are set and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let id = self.client_id.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let secret = self
            .client_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())?;
        Some((id, secret))
    }
}

// ── Client ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    /// Where the CLI keeps its tokens. Defaults to `tokens/` in the data directory.
    pub data_dir: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            data_dir: None,
            request_timeout_secs: 30,
        }
    }
}

impl ClientConfig {
    pub fn resolved_token_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(data_dir()?.join("tokens")),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "veilo").context("Could not determine home directory")
}

/// `~/.config/veilo/config.toml` on Linux, platform equivalent elsewhere.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

fn data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

impl Config {
    /// Parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {e}", path.display()))
    }

    /// Load `path` (or the default location) if it exists, otherwise use
    /// defaults. Environment overrides are applied either way.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };

        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Overlay `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`, `VEILO_GATEWAY_HOST`,
    /// `VEILO_GATEWAY_PORT` and `VEILO_SERVER_URL`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(id) = get("GOOGLE_CLIENT_ID") {
            self.google.client_id = Some(id);
        }
        if let Some(secret) = get("GOOGLE_CLIENT_SECRET") {
            self.google.client_secret = Some(secret);
        }
        if let Some(host) = get("VEILO_GATEWAY_HOST") {
            self.gateway.host = host;
        }
        if let Some(port) = get("VEILO_GATEWAY_PORT") {
            match port.trim().parse() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid VEILO_GATEWAY_PORT"),
            }
        }
        if let Some(url) = get("VEILO_SERVER_URL") {
            self.client.server_url = url;
        }
    }
}
