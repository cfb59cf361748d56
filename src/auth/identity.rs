//! Reconciles an external provider identity with a local user record.
//!
//! A sign-in finds the user by provider id or email, links the provider id
//! onto an email-only account the first time, or provisions a fresh shadow
//! identity when nothing matches.

use std::sync::Arc;

use anyhow::Result;

use super::alias::{AliasGenerator, WordAliasGenerator};
use super::user::{normalize_email, random_avatar_index, NewUser, Role, User};
use crate::error::AuthError;

/// Verified identity assertion handed over by an OAuth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub external_id: String,
    pub email: String,
    pub display_name: String,
    pub photo_url: Option<String>,
}

/// Lookup predicate understood by a [`UserRepository`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookup {
    Id(String),
    Email(String),
    /// Matches on provider id OR email. A provider-id match is preferred when
    /// the two predicates hit different records.
    ExternalIdOrEmail { external_id: String, email: String },
}

/// User persistence collaborator.
pub trait UserRepository: Send + Sync {
    fn find_one(&self, lookup: &UserLookup) -> Result<Option<User>>;
    fn save(&self, user: &User) -> Result<()>;
    fn create(&self, user: NewUser) -> Result<User>;
}

/// What reconciliation did to reach the returned user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Matched an account that was already linked (or linked elsewhere).
    Existing,
    /// Matched an email-only account and stored the provider id on it.
    Linked,
    /// Provisioned a new account.
    Created,
}

#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub user: User,
    pub outcome: ResolutionOutcome,
}

/// Find-or-create flow for provider sign-ins.
pub struct IdentityResolver {
    users: Arc<dyn UserRepository>,
    aliases: Box<dyn AliasGenerator>,
}

impl IdentityResolver {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self::with_alias_generator(users, Box::new(WordAliasGenerator))
    }

    pub fn with_alias_generator(
        users: Arc<dyn UserRepository>,
        aliases: Box<dyn AliasGenerator>,
    ) -> Self {
        Self { users, aliases }
    }

    /// Resolve `identity` to exactly one local user.
    ///
    /// Persistence failures surface as [`AuthError::IdentityResolution`];
    /// the caller must not issue a session in that case.
    pub fn resolve(&self, identity: &ExternalIdentity) -> Result<ResolvedIdentity, AuthError> {
        let external_id = identity.external_id.trim();
        if external_id.is_empty() {
            return Err(AuthError::validation("Provider did not return an account id"));
        }
        let email = normalize_email(&identity.email)?;

        let lookup = UserLookup::ExternalIdOrEmail {
            external_id: external_id.to_string(),
            email: email.clone(),
        };
        let existing = self
            .users
            .find_one(&lookup)
            .map_err(AuthError::IdentityResolution)?;

        if let Some(mut user) = existing {
            return match user.google_id.as_deref() {
                None => {
                    user.google_id = Some(external_id.to_string());
                    self.users
                        .save(&user)
                        .map_err(AuthError::IdentityResolution)?;
                    tracing::info!(user_id = %user.id, "Linked Google account to existing user");
                    Ok(ResolvedIdentity {
                        user,
                        outcome: ResolutionOutcome::Linked,
                    })
                }
                Some(linked) => {
                    if linked != external_id {
                        tracing::warn!(
                            user_id = %user.id,
                            "Email matched a user linked to a different Google account"
                        );
                    }
                    Ok(ResolvedIdentity {
                        user,
                        outcome: ResolutionOutcome::Existing,
                    })
                }
            };
        }

        let real_name = match identity.display_name.trim() {
            "" => email.split('@').next().unwrap_or_default().to_string(),
            name => name.to_string(),
        };

        let user = self
            .users
            .create(NewUser {
                google_id: Some(external_id.to_string()),
                email,
                real_name,
                alias: self.aliases.generate(),
                avatar_index: random_avatar_index(),
                avatar_url: identity.photo_url.clone(),
                role: Role::Shadow,
                // Provider-verified identities are trusted.
                is_verified: true,
                password: None,
            })
            .map_err(AuthError::IdentityResolution)?;

        tracing::info!(
            target: "veilo::audit",
            user_id = %user.id,
            email = %user.email,
            alias = %user.alias,
            "New Google user created"
        );

        Ok(ResolvedIdentity {
            user,
            outcome: ResolutionOutcome::Created,
        })
    }
}
