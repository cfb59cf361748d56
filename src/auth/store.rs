//! SQLite-backed user and credential store.
//!
//! Tables:
//! - `users`: account record, optional Google id, password hash + salt
//! - `sessions`: token_hash, user_id, kind (`access` | `refresh`), expires_at

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use super::alias::generate_alias;
use super::identity::{UserLookup, UserRepository};
use super::user::{
    normalize_email, random_avatar_index, validate_alias, validate_avatar_index,
    validate_password, validate_real_name, NewUser, Role, User,
};
use crate::error::AuthError;
use crate::protocol::ProfileUpdate;

/// Default access token lifetime: 7 days (seconds).
const DEFAULT_ACCESS_TTL_SECS: u64 = 7 * 24 * 3600;

/// Default refresh token lifetime: 30 days (seconds).
const DEFAULT_REFRESH_TTL_SECS: u64 = 30 * 24 * 3600;

/// Token byte length before hex encoding (32 bytes = 64 hex chars).
const TOKEN_BYTES: usize = 32;

/// Salt byte length for password hashing.
const SALT_BYTES: usize = 16;

/// Number of SHA-256 iterations for password stretching.
const HASH_ITERATIONS: u32 = 100_000;

const USER_COLUMNS: &str = "id, google_id, email, real_name, alias, avatar_index, avatar_url, \
                            role, is_verified, registered_at";

/// Kind of an issued credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

/// A live access-token session.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub expires_at: i64,
}

/// Freshly issued credentials. Plaintext values are only revealed here.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// SQLite-backed authentication store.
pub struct AuthStore {
    conn: Mutex<rusqlite::Connection>,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl AuthStore {
    /// Open (or create) the auth database at the given path.
    pub fn new(
        db_path: &Path,
        access_ttl_secs: Option<u64>,
        refresh_ttl_secs: Option<u64>,
    ) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = rusqlite::Connection::open(db_path)?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;

        // `email` and `google_id` are both unique so a provider sign-in can
        // never match two different records on the same predicate.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                google_id TEXT UNIQUE,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                real_name TEXT NOT NULL,
                alias TEXT NOT NULL,
                avatar_index INTEGER NOT NULL,
                avatar_url TEXT,
                role TEXT NOT NULL DEFAULT 'shadow',
                is_verified INTEGER NOT NULL DEFAULT 0,
                password_hash TEXT,
                salt TEXT,
                registered_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                token_hash TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            access_ttl_secs: access_ttl_secs.unwrap_or(DEFAULT_ACCESS_TTL_SECS),
            refresh_ttl_secs: refresh_ttl_secs.unwrap_or(DEFAULT_REFRESH_TTL_SECS),
        })
    }

    // ── User Management ─────────────────────────────────────────────

    /// Register a password account. The server picks an alias when none is preferred.
    pub fn register(
        &self,
        email: &str,
        password: &str,
        real_name: &str,
        preferred_alias: Option<&str>,
    ) -> Result<User> {
        let email = normalize_email(email)?;
        validate_password(password)?;
        let real_name = validate_real_name(real_name)?;
        let alias = match preferred_alias.map(str::trim).filter(|a| !a.is_empty()) {
            Some(alias) => validate_alias(alias)?,
            None => generate_alias(),
        };

        let salt = generate_salt();
        let password_hash = hash_password(password, &salt);

        self.create(NewUser {
            google_id: None,
            email,
            real_name,
            alias,
            avatar_index: random_avatar_index(),
            avatar_url: None,
            role: Role::Shadow,
            is_verified: false,
            password: Some((password_hash, salt)),
        })
    }

    /// Authenticate a user by email + password.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<User> {
        let email = email.trim().to_lowercase();
        let conn = self.conn.lock();
        let row: Option<(Option<String>, Option<String>, User)> = conn
            .query_row(
                &format!("SELECT password_hash, salt, {USER_COLUMNS} FROM users WHERE email = ?1"),
                rusqlite::params![email],
                |row| Ok((row.get(0)?, row.get(1)?, user_from_row(row, 2)?)),
            )
            .optional()?;

        match row {
            Some((Some(stored_hash), Some(salt), user)) => {
                let attempt_hash = hash_password(password, &salt);
                if !constant_time_eq(stored_hash.as_bytes(), attempt_hash.as_bytes()) {
                    return Err(AuthError::authorization("Invalid email or password").into());
                }
                Ok(user)
            }
            _ => {
                // Perform dummy hash to prevent timing side-channel
                let _ = hash_password(password, "0000000000000000");
                Err(AuthError::authorization("Invalid email or password").into())
            }
        }
    }

    /// Look up a user by ID.
    pub fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        self.find_one(&UserLookup::Id(user_id.to_string()))
    }

    /// Apply a partial profile update and return the stored result.
    pub fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<User> {
        if update.is_empty() {
            return Err(AuthError::validation("Nothing to update").into());
        }
        let Some(mut user) = self.get_user(user_id)? else {
            return Err(AuthError::authorization("Account no longer exists").into());
        };

        if let Some(alias) = update.alias.as_deref() {
            user.alias = validate_alias(alias)?;
        }
        if let Some(index) = update.avatar_index {
            user.avatar_index = validate_avatar_index(index)?;
        }
        if let Some(url) = update.avatar_url.as_deref() {
            let url = url.trim();
            user.avatar_url = (!url.is_empty()).then(|| url.to_string());
        }
        if let Some(name) = update.real_name.as_deref() {
            user.real_name = validate_real_name(name)?;
        }

        self.save(&user)?;
        Ok(user)
    }

    /// Count registered users.
    pub fn user_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ── Session Management ──────────────────────────────────────────

    /// Issue an access + refresh token pair for a user.
    pub fn issue_tokens(&self, user_id: &str) -> Result<IssuedTokens> {
        let access_token = self.create_session(user_id, TokenKind::Access)?;
        let refresh_token = self.create_session(user_id, TokenKind::Refresh)?;
        Ok(IssuedTokens {
            access_token,
            refresh_token,
        })
    }

    fn create_session(&self, user_id: &str, kind: TokenKind) -> Result<String> {
        let token = generate_token();
        let token_hash = hash_token(&token);
        let now = epoch_secs();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl_secs,
            TokenKind::Refresh => self.refresh_ttl_secs,
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (token_hash, user_id, kind, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                token_hash,
                user_id,
                kind.as_str(),
                now as i64,
                (now + ttl) as i64,
            ],
        )?;

        Ok(token)
    }

    fn lookup_session(&self, token: &str, kind: TokenKind) -> Result<Option<Session>> {
        let token_hash = hash_token(token);
        let now = epoch_secs() as i64;

        let conn = self.conn.lock();
        let session = conn
            .query_row(
                "SELECT user_id, expires_at
                 FROM sessions
                 WHERE token_hash = ?1 AND kind = ?2 AND expires_at > ?3",
                rusqlite::params![token_hash, kind.as_str(), now],
                |row| {
                    Ok(Session {
                        user_id: row.get(0)?,
                        expires_at: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    /// Validate an access token and return the associated session.
    /// Returns `Ok(None)` if the token is invalid or expired.
    pub fn validate_session(&self, token: &str) -> Result<Option<Session>> {
        self.lookup_session(token, TokenKind::Access)
    }

    /// Exchange a refresh token for a new access token.
    pub fn refresh(&self, refresh_token: &str) -> Result<String> {
        let Some(session) = self.lookup_session(refresh_token, TokenKind::Refresh)? else {
            return Err(AuthError::authorization("Invalid or expired refresh token").into());
        };
        self.create_session(&session.user_id, TokenKind::Access)
    }

    /// Revoke a specific token.
    pub fn revoke_session(&self, token: &str) -> Result<bool> {
        let token_hash = hash_token(token);
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE token_hash = ?1",
            rusqlite::params![token_hash],
        )?;
        Ok(deleted > 0)
    }

    /// Revoke all tokens for a user.
    pub fn revoke_all_sessions(&self, user_id: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE user_id = ?1",
            rusqlite::params![user_id],
        )?;
        Ok(deleted as u64)
    }

    /// Clean up expired tokens.
    pub fn cleanup_expired_sessions(&self) -> Result<u64> {
        let now = epoch_secs() as i64;
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE expires_at <= ?1",
            rusqlite::params![now],
        )?;
        Ok(deleted as u64)
    }
}

// ── User Repository ─────────────────────────────────────────────────

impl UserRepository for AuthStore {
    fn find_one(&self, lookup: &UserLookup) -> Result<Option<User>> {
        let conn = self.conn.lock();
        match lookup {
            UserLookup::Id(id) => Ok(conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                    rusqlite::params![id],
                    |row| user_from_row(row, 0),
                )
                .optional()?),
            UserLookup::Email(email) => Ok(conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                    rusqlite::params![email.trim()],
                    |row| user_from_row(row, 0),
                )
                .optional()?),
            UserLookup::ExternalIdOrEmail { external_id, email } => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {USER_COLUMNS} FROM users
                     WHERE google_id = ?1 OR email = ?2
                     ORDER BY CASE WHEN google_id = ?1 THEN 0 ELSE 1 END
                     LIMIT 2"
                ))?;
                let mut matches = stmt
                    .query_map(rusqlite::params![external_id, email.trim()], |row| {
                        user_from_row(row, 0)
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                if matches.len() > 1 {
                    tracing::warn!(
                        first = %matches[0].id,
                        second = %matches[1].id,
                        "Google id and email match different users; using the Google id match"
                    );
                }
                Ok(if matches.is_empty() {
                    None
                } else {
                    Some(matches.swap_remove(0))
                })
            }
        }
    }

    fn save(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE users SET
                google_id = ?2,
                email = ?3,
                real_name = ?4,
                alias = ?5,
                avatar_index = ?6,
                avatar_url = ?7,
                role = ?8,
                is_verified = ?9
             WHERE id = ?1",
            rusqlite::params![
                user.id,
                user.google_id,
                user.email,
                user.real_name,
                user.alias,
                user.avatar_index,
                user.avatar_url,
                user.role.as_str(),
                user.is_verified,
            ],
        );

        match updated {
            Ok(0) => bail!("User {} not found", user.id),
            Ok(_) => Ok(()),
            Err(e) => Err(map_constraint_violation(e)),
        }
    }

    fn create(&self, new_user: NewUser) -> Result<User> {
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            google_id: new_user.google_id,
            email: new_user.email,
            real_name: new_user.real_name,
            alias: new_user.alias,
            avatar_index: new_user.avatar_index,
            avatar_url: new_user.avatar_url,
            role: new_user.role,
            is_verified: new_user.is_verified,
            registered_at: DateTime::from_timestamp(epoch_secs() as i64, 0).unwrap_or_default(),
        };
        let (password_hash, salt) = new_user.password.unzip();

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, google_id, email, real_name, alias, avatar_index, avatar_url,
                                role, is_verified, password_hash, salt, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                user.id,
                user.google_id,
                user.email,
                user.real_name,
                user.alias,
                user.avatar_index,
                user.avatar_url,
                user.role.as_str(),
                user.is_verified,
                password_hash,
                salt,
                user.registered_at.timestamp(),
            ],
        )
        .map_err(map_constraint_violation)?;

        Ok(user)
    }
}

fn user_from_row(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<User> {
    let role: String = row.get(offset + 7)?;
    let registered_at: i64 = row.get(offset + 9)?;
    Ok(User {
        id: row.get(offset)?,
        google_id: row.get(offset + 1)?,
        email: row.get(offset + 2)?,
        real_name: row.get(offset + 3)?,
        alias: row.get(offset + 4)?,
        avatar_index: row.get(offset + 5)?,
        avatar_url: row.get(offset + 6)?,
        role: Role::from_str_lossy(&role),
        is_verified: row.get(offset + 8)?,
        registered_at: DateTime::<Utc>::from_timestamp(registered_at, 0).unwrap_or_default(),
    })
}

fn map_constraint_violation(err: rusqlite::Error) -> anyhow::Error {
    match err {
        rusqlite::Error::SqliteFailure(ref e, ref msg)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            let message = if msg.as_deref().is_some_and(|m| m.contains("google_id")) {
                "This Google account is already linked to another user"
            } else {
                "An account with this email already exists"
            };
            AuthError::Conflict(message.into()).into()
        }
        other => other.into(),
    }
}

// ── Cryptographic Helpers ───────────────────────────────────────────

/// Generate a random salt (hex-encoded).
fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a random opaque token (hex-encoded).
pub(crate) fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a password with salt using iterated SHA-256.
fn hash_password(password: &str, salt: &str) -> String {
    let mut hash = Sha256::new();
    hash.update(salt.as_bytes());
    hash.update(password.as_bytes());
    let mut result = hash.finalize();

    // Iterated hashing for key stretching
    for _ in 1..HASH_ITERATIONS {
        let mut h = Sha256::new();
        h.update(result);
        h.update(salt.as_bytes());
        result = h.finalize();
    }

    hex::encode(result)
}

/// Hash a token with a single SHA-256 pass.
fn hash_token(token: &str) -> String {
    let mut h = Sha256::new();
    h.update(token.as_bytes());
    hex::encode(h.finalize())
}

/// Constant-time byte comparison.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, AuthStore) {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("auth.db");
        let store = AuthStore::new(&db_path, Some(3600), Some(7200)).unwrap();
        (tmp, store)
    }

    fn auth_error(err: &anyhow::Error) -> &AuthError {
        err.downcast_ref::<AuthError>().expect("AuthError")
    }

    #[test]
    fn register_and_authenticate() {
        let (_tmp, store) = test_store();

        let user = store
            .register("ann@example.com", "securepassword123", "Ann", None)
            .unwrap();
        assert!(!user.id.is_empty());
        assert!(!user.alias.is_empty());
        assert_eq!(user.role, Role::Shadow);
        assert!(!user.is_verified);

        let authed = store
            .authenticate("ann@example.com", "securepassword123")
            .unwrap();
        assert_eq!(authed, user);
    }

    #[test]
    fn register_keeps_preferred_alias() {
        let (_tmp, store) = test_store();
        let user = store
            .register("ann@example.com", "securepassword123", "Ann", Some("  NightOwl  "))
            .unwrap();
        assert_eq!(user.alias, "NightOwl");
    }

    #[test]
    fn register_blank_preferred_alias_generates_one() {
        let (_tmp, store) = test_store();
        let user = store
            .register("ann@example.com", "securepassword123", "Ann", Some("   "))
            .unwrap();
        assert!(!user.alias.trim().is_empty());
    }

    #[test]
    fn register_duplicate_email_is_conflict() {
        let (_tmp, store) = test_store();

        store
            .register("ann@example.com", "password123!", "Ann", None)
            .unwrap();
        let err = store
            .register("ANN@example.com", "otherpassword1", "Other", None)
            .unwrap_err();
        assert!(matches!(auth_error(&err), AuthError::Conflict(_)));
    }

    #[test]
    fn register_short_password_fails() {
        let (_tmp, store) = test_store();

        let err = store
            .register("ann@example.com", "short", "Ann", None)
            .unwrap_err();
        assert!(matches!(auth_error(&err), AuthError::Validation(_)));
        assert!(err.to_string().contains("8 characters"));
    }

    #[test]
    fn register_invalid_email_fails() {
        let (_tmp, store) = test_store();
        let err = store
            .register("not-an-email", "password123!", "Ann", None)
            .unwrap_err();
        assert!(matches!(auth_error(&err), AuthError::Validation(_)));
    }

    #[test]
    fn authenticate_wrong_password_fails() {
        let (_tmp, store) = test_store();

        store
            .register("ann@example.com", "correct_password", "Ann", None)
            .unwrap();
        let err = store
            .authenticate("ann@example.com", "wrong_password")
            .unwrap_err();
        assert!(auth_error(&err).is_authorization());
    }

    #[test]
    fn authenticate_nonexistent_user_fails() {
        let (_tmp, store) = test_store();

        let err = store
            .authenticate("ghost@example.com", "anypassword1")
            .unwrap_err();
        assert!(auth_error(&err).is_authorization());
    }

    #[test]
    fn authenticate_is_case_insensitive_on_email() {
        let (_tmp, store) = test_store();
        store
            .register("ann@example.com", "securepassword123", "Ann", None)
            .unwrap();
        assert!(store
            .authenticate(" Ann@Example.com ", "securepassword123")
            .is_ok());
    }

    #[test]
    fn provider_only_account_cannot_password_login() {
        let (_tmp, store) = test_store();
        store
            .create(NewUser {
                google_id: Some("g-9".into()),
                email: "g@example.com".into(),
                real_name: "G".into(),
                alias: "Gee".into(),
                avatar_index: 1,
                avatar_url: None,
                role: Role::Shadow,
                is_verified: true,
                password: None,
            })
            .unwrap();

        let err = store.authenticate("g@example.com", "whatever123").unwrap_err();
        assert!(auth_error(&err).is_authorization());
    }

    #[test]
    fn session_create_and_validate() {
        let (_tmp, store) = test_store();

        let user = store
            .register("ann@example.com", "password123!", "Ann", None)
            .unwrap();
        let tokens = store.issue_tokens(&user.id).unwrap();
        assert_eq!(tokens.access_token.len(), 64);
        assert_ne!(tokens.access_token, tokens.refresh_token);

        let session = store.validate_session(&tokens.access_token).unwrap().unwrap();
        assert_eq!(session.user_id, user.id);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let (_tmp, store) = test_store();
        let user = store
            .register("ann@example.com", "password123!", "Ann", None)
            .unwrap();
        let tokens = store.issue_tokens(&user.id).unwrap();

        assert!(store.validate_session(&tokens.refresh_token).unwrap().is_none());
        assert!(store.refresh(&tokens.access_token).is_err());
    }

    #[test]
    fn refresh_issues_new_access_token() {
        let (_tmp, store) = test_store();
        let user = store
            .register("ann@example.com", "password123!", "Ann", None)
            .unwrap();
        let tokens = store.issue_tokens(&user.id).unwrap();

        let access = store.refresh(&tokens.refresh_token).unwrap();
        assert_ne!(access, tokens.access_token);
        assert_eq!(store.validate_session(&access).unwrap().unwrap().user_id, user.id);
    }

    #[test]
    fn refresh_with_unknown_token_is_authorization_error() {
        let (_tmp, store) = test_store();
        let err = store.refresh("deadbeef").unwrap_err();
        assert!(auth_error(&err).is_authorization());
    }

    #[test]
    fn session_invalid_token_returns_none() {
        let (_tmp, store) = test_store();
        assert!(store.validate_session("nonexistent_token").unwrap().is_none());
    }

    #[test]
    fn session_lookup_surfaces_database_errors() {
        let (_tmp, store) = test_store();
        store
            .conn
            .lock()
            .execute_batch("DROP TABLE sessions;")
            .unwrap();

        assert!(store.validate_session("any-token").is_err());
        let err = store.refresh("any-token").unwrap_err();
        assert!(err.downcast_ref::<AuthError>().is_none());
    }

    #[test]
    fn expired_session_is_rejected_and_cleaned_up() {
        let tmp = TempDir::new().unwrap();
        let store = AuthStore::new(&tmp.path().join("auth.db"), Some(0), Some(0)).unwrap();
        let user = store
            .register("ann@example.com", "password123!", "Ann", None)
            .unwrap();
        let tokens = store.issue_tokens(&user.id).unwrap();

        assert!(store.validate_session(&tokens.access_token).unwrap().is_none());
        assert_eq!(store.cleanup_expired_sessions().unwrap(), 2);
    }

    #[test]
    fn session_revoke() {
        let (_tmp, store) = test_store();

        let user = store
            .register("ann@example.com", "password123!", "Ann", None)
            .unwrap();
        let tokens = store.issue_tokens(&user.id).unwrap();

        assert!(store.revoke_session(&tokens.access_token).unwrap());
        assert!(store.validate_session(&tokens.access_token).unwrap().is_none());
        assert!(!store.revoke_session(&tokens.access_token).unwrap());
    }

    #[test]
    fn session_revoke_all_for_user() {
        let (_tmp, store) = test_store();

        let user = store
            .register("ann@example.com", "password123!", "Ann", None)
            .unwrap();
        let t1 = store.issue_tokens(&user.id).unwrap();
        let t2 = store.issue_tokens(&user.id).unwrap();

        assert_eq!(store.revoke_all_sessions(&user.id).unwrap(), 4);
        assert!(store.validate_session(&t1.access_token).unwrap().is_none());
        assert!(store.validate_session(&t2.access_token).unwrap().is_none());
    }

    #[test]
    fn update_profile_applies_partial_fields() {
        let (_tmp, store) = test_store();
        let user = store
            .register("ann@example.com", "password123!", "Ann", Some("OldAlias"))
            .unwrap();

        let updated = store
            .update_profile(
                &user.id,
                &ProfileUpdate {
                    alias: Some("NewAlias".into()),
                    avatar_index: Some(7),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.alias, "NewAlias");
        assert_eq!(updated.avatar_index, 7);
        assert_eq!(updated.real_name, "Ann");
        assert_eq!(store.get_user(&user.id).unwrap().unwrap(), updated);
    }

    #[test]
    fn update_profile_rejects_bad_avatar() {
        let (_tmp, store) = test_store();
        let user = store
            .register("ann@example.com", "password123!", "Ann", None)
            .unwrap();
        let err = store
            .update_profile(
                &user.id,
                &ProfileUpdate {
                    avatar_index: Some(40),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(auth_error(&err), AuthError::Validation(_)));
    }

    #[test]
    fn update_profile_empty_is_validation_error() {
        let (_tmp, store) = test_store();
        let user = store
            .register("ann@example.com", "password123!", "Ann", None)
            .unwrap();
        let err = store
            .update_profile(&user.id, &ProfileUpdate::default())
            .unwrap_err();
        assert!(matches!(auth_error(&err), AuthError::Validation(_)));
    }

    #[test]
    fn save_unknown_user_fails() {
        let (_tmp, store) = test_store();
        let mut user = store
            .register("ann@example.com", "password123!", "Ann", None)
            .unwrap();
        user.id = "missing".into();
        assert!(store.save(&user).is_err());
    }

    #[test]
    fn duplicate_google_id_is_rejected() {
        let (_tmp, store) = test_store();
        let new_user = |email: &str| NewUser {
            google_id: Some("g-1".into()),
            email: email.into(),
            real_name: "G".into(),
            alias: "Gee".into(),
            avatar_index: 1,
            avatar_url: None,
            role: Role::Shadow,
            is_verified: true,
            password: None,
        };
        store.create(new_user("one@example.com")).unwrap();
        assert!(store.create(new_user("two@example.com")).is_err());
    }

    #[test]
    fn find_by_email_lookup() {
        let (_tmp, store) = test_store();
        let user = store
            .register("ann@example.com", "password123!", "Ann", None)
            .unwrap();
        let found = store
            .find_one(&UserLookup::Email("ann@example.com".into()))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, user.id);
        assert!(store
            .find_one(&UserLookup::Email("nobody@example.com".into()))
            .unwrap()
            .is_none());
    }

    #[test]
    fn user_count_tracks_registrations() {
        let (_tmp, store) = test_store();
        assert_eq!(store.user_count().unwrap(), 0);
        store
            .register("one@example.com", "password123!", "One", None)
            .unwrap();
        store
            .register("two@example.com", "password123!", "Two", None)
            .unwrap();
        assert_eq!(store.user_count().unwrap(), 2);
    }

    #[test]
    fn password_hash_is_deterministic_with_same_salt() {
        assert_eq!(hash_password("secret", "salt"), hash_password("secret", "salt"));
    }

    #[test]
    fn password_hash_differs_with_different_salt() {
        assert_ne!(hash_password("secret", "salt1"), hash_password("secret", "salt2"));
    }

    #[test]
    fn constant_time_eq_works() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
