//! Client-side credential storage.
//!
//! One logical access token is written under several keys so that older
//! clients reading a legacy key keep working. Reads probe the keys in
//! priority order and return the first non-empty value.

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Access token keys, highest priority first.
pub const TOKEN_KEYS: [&str; 3] = ["admin_token", "veilo-auth-token", "token"];

/// Key holding the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "veilo-refresh-token";

/// Raw key/value storage underneath a [`TokenStore`].
pub trait TokenBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    values: Mutex<HashMap<String, String>>,
}

impl TokenBackend for MemoryBackend {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl TokenBackend for FileBackend {
    fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.dir.join(key))
            .ok()
            .map(|s| s.trim().to_string())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.dir.join(key);
        std::fs::write(&path, value).with_context(|| format!("Failed to write {}", path.display()))
    }

    fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.dir.join(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Priority-ordered, write-through credential store.
pub struct TokenStore {
    backend: Box<dyn TokenBackend>,
}

impl TokenStore {
    pub fn new(backend: impl TokenBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::default())
    }

    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self::new(FileBackend::new(dir))
    }

    /// First non-empty access token in key priority order.
    pub fn get_token(&self) -> Option<String> {
        TOKEN_KEYS
            .iter()
            .filter_map(|key| self.backend.get(key))
            .find(|value| !value.is_empty())
    }

    pub fn get_refresh_token(&self) -> Option<String> {
        self.backend
            .get(REFRESH_TOKEN_KEY)
            .filter(|value| !value.is_empty())
    }

    /// Write `value` under every access token key.
    pub fn set_token(&self, value: &str) -> Result<()> {
        if value.is_empty() {
            bail!("Refusing to store an empty token");
        }
        for key in TOKEN_KEYS {
            self.backend.set(key, value)?;
        }
        Ok(())
    }

    pub fn set_refresh_token(&self, value: &str) -> Result<()> {
        if value.is_empty() {
            bail!("Refusing to store an empty refresh token");
        }
        self.backend.set(REFRESH_TOKEN_KEY, value)
    }

    /// Remove every access and refresh key. Failures are logged, not returned.
    pub fn clear_all_tokens(&self) {
        for key in TOKEN_KEYS.iter().chain(std::iter::once(&REFRESH_TOKEN_KEY)) {
            if let Err(e) = self.backend.remove(key) {
                tracing::warn!(key, "Failed to remove stored token: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn set_then_get_returns_value() {
        let store = TokenStore::in_memory();
        store.set_token("abc123").unwrap();
        assert_eq!(store.get_token().as_deref(), Some("abc123"));
    }

    #[test]
    fn set_writes_every_key() {
        let backend = std::sync::Arc::new(MemoryBackend::default());
        let store = TokenStore::new(SharedBackend(backend.clone()));
        store.set_token("T").unwrap();
        for key in TOKEN_KEYS {
            assert_eq!(backend.get(key).as_deref(), Some("T"));
        }
    }

    #[test]
    fn empty_store_has_no_token() {
        let store = TokenStore::in_memory();
        assert!(store.get_token().is_none());
        assert!(store.get_refresh_token().is_none());
    }

    #[test]
    fn first_non_empty_key_wins() {
        let backend = MemoryBackend::default();
        backend.set("admin_token", "").unwrap();
        backend.set("veilo-auth-token", "T2").unwrap();
        backend.set("token", "T3").unwrap();
        let store = TokenStore::new(backend);
        assert_eq!(store.get_token().as_deref(), Some("T2"));
    }

    #[test]
    fn legacy_key_alone_is_found() {
        let backend = MemoryBackend::default();
        backend.set("token", "legacy").unwrap();
        assert_eq!(TokenStore::new(backend).get_token().as_deref(), Some("legacy"));
    }

    #[test]
    fn clear_removes_everything_and_is_idempotent() {
        let store = TokenStore::in_memory();
        store.clear_all_tokens();

        store.set_token("T").unwrap();
        store.set_refresh_token("R").unwrap();
        store.clear_all_tokens();
        assert!(store.get_token().is_none());
        assert!(store.get_refresh_token().is_none());

        store.clear_all_tokens();
    }

    #[test]
    fn empty_values_are_rejected() {
        let store = TokenStore::in_memory();
        assert!(store.set_token("").is_err());
        assert!(store.set_refresh_token("").is_err());
    }

    #[test]
    fn file_backend_persists_across_instances() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("tokens");

        TokenStore::file(&dir).set_token("persisted").unwrap();
        TokenStore::file(&dir).set_refresh_token("refresh").unwrap();

        let reopened = TokenStore::file(&dir);
        assert_eq!(reopened.get_token().as_deref(), Some("persisted"));
        assert_eq!(reopened.get_refresh_token().as_deref(), Some("refresh"));
        assert!(dir.join("veilo-auth-token").exists());

        reopened.clear_all_tokens();
        assert!(TokenStore::file(&dir).get_token().is_none());
    }

    #[test]
    fn file_backend_clear_on_missing_dir_is_ok() {
        let tmp = TempDir::new().unwrap();
        TokenStore::file(tmp.path().join("never-created")).clear_all_tokens();
    }

    struct SharedBackend(std::sync::Arc<MemoryBackend>);

    impl TokenBackend for SharedBackend {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key)
        }
        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.0.set(key, value)
        }
        fn remove(&self, key: &str) -> Result<()> {
            self.0.remove(key)
        }
    }
}
