//! User record and the validation rules applied to its fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Number of built-in avatars; indices run from 1 to this value.
pub const AVATAR_COUNT: u8 = 12;

const MAX_EMAIL_LEN: usize = 254;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_REAL_NAME_LEN: usize = 100;
const MIN_ALIAS_LEN: usize = 2;
const MAX_ALIAS_LEN: usize = 40;

/// Trust tier of an account.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Default unprivileged, pseudonymous member.
    #[default]
    Shadow,
    /// Verified expert.
    Beacon,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Shadow => "shadow",
            Self::Beacon => "beacon",
            Self::Admin => "admin",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "beacon" => Self::Beacon,
            "admin" => Self::Admin,
            _ => Self::Shadow,
        }
    }
}

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    /// Google account id, set on first Google sign-in.
    #[serde(default)]
    pub google_id: Option<String>,
    pub email: String,
    /// Real name. Private, never shown to other members.
    pub real_name: String,
    /// Public pseudonym.
    pub alias: String,
    pub avatar_index: u8,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub role: Role,
    pub is_verified: bool,
    pub registered_at: DateTime<Utc>,
}

/// Fields needed to provision a user. Id and timestamp are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub google_id: Option<String>,
    pub email: String,
    pub real_name: String,
    pub alias: String,
    pub avatar_index: u8,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub is_verified: bool,
    /// `(hash, salt)` for password accounts, `None` for provider-only accounts.
    pub password: Option<(String, String)>,
}

/// Pick an avatar index uniformly from `1..=AVATAR_COUNT`.
pub fn random_avatar_index() -> u8 {
    use rand::Rng;
    rand::thread_rng().gen_range(1..=AVATAR_COUNT)
}

/// Trim and lower-case an email, rejecting obviously malformed values.
pub fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Err(AuthError::validation("Email is required"));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(AuthError::validation("Email is too long"));
    }
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid || email.chars().any(char::is_whitespace) {
        return Err(AuthError::validation("Email address is not valid"));
    }
    Ok(email)
}

pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub fn validate_real_name(name: &str) -> Result<String, AuthError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AuthError::validation("Name cannot be empty"));
    }
    if name.chars().count() > MAX_REAL_NAME_LEN {
        return Err(AuthError::validation("Name is too long"));
    }
    Ok(name.to_string())
}

pub fn validate_alias(alias: &str) -> Result<String, AuthError> {
    let alias = alias.trim();
    let len = alias.chars().count();
    if !(MIN_ALIAS_LEN..=MAX_ALIAS_LEN).contains(&len) {
        return Err(AuthError::validation(format!(
            "Alias must be between {MIN_ALIAS_LEN} and {MAX_ALIAS_LEN} characters"
        )));
    }
    if alias.chars().any(char::is_control) {
        return Err(AuthError::validation("Alias contains invalid characters"));
    }
    Ok(alias.to_string())
}

pub fn validate_avatar_index(index: u8) -> Result<u8, AuthError> {
    if (1..=AVATAR_COUNT).contains(&index) {
        Ok(index)
    } else {
        Err(AuthError::validation(format!(
            "Avatar index must be between 1 and {AVATAR_COUNT}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_email_lowercases_and_trims() {
        assert_eq!(normalize_email("  Ann@Example.COM ").unwrap(), "ann@example.com");
    }

    #[test]
    fn normalize_email_rejects_garbage() {
        for bad in ["", "ann", "ann@", "@x.com", "ann@x", "a b@x.com", "a@@x.com", "a@x.com."] {
            assert!(normalize_email(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn avatar_index_stays_in_range() {
        for _ in 0..500 {
            let idx = random_avatar_index();
            assert!((1..=AVATAR_COUNT).contains(&idx));
        }
    }

    #[test]
    fn avatar_index_validation() {
        assert!(validate_avatar_index(0).is_err());
        assert!(validate_avatar_index(13).is_err());
        assert_eq!(validate_avatar_index(12).unwrap(), 12);
    }

    #[test]
    fn alias_length_limits() {
        assert!(validate_alias("a").is_err());
        assert!(validate_alias(&"x".repeat(41)).is_err());
        assert_eq!(validate_alias("  Quiet Fox ").unwrap(), "Quiet Fox");
    }

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::Shadow, Role::Beacon, Role::Admin] {
            assert_eq!(Role::from_str_lossy(role.as_str()), role);
        }
        assert_eq!(Role::from_str_lossy("unknown"), Role::Shadow);
    }

    #[test]
    fn user_serializes_camel_case() {
        let user = User {
            id: "u1".into(),
            google_id: None,
            email: "a@x.com".into(),
            real_name: "Ann".into(),
            alias: "QuietFox1".into(),
            avatar_index: 3,
            avatar_url: None,
            role: Role::Shadow,
            is_verified: true,
            registered_at: Utc::now(),
        };
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["avatarIndex"], 3);
        assert_eq!(value["isVerified"], true);
        assert_eq!(value["role"], "shadow");
    }
}
