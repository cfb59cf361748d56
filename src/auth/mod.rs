//! Server-side identity: accounts, credentials and provider sign-in.
//!
//! Provides:
//! - Password registration and login (iterated SHA-256, 100k rounds + per-user salt)
//! - Access + refresh tokens (opaque hex, SHA-256 hashed for storage, time-limited)
//! - Google sign-in reconciliation: find-or-link-or-create a local user
//! - SQLite-backed persistent storage
//!
//! ## Design Decisions
//! - No JWT dependency; tokens are opaque random values with server-side
//!   hashed lookup, so revocation is a row delete.
//! - `email` and `google_id` are both UNIQUE. When a provider sign-in matches
//!   one record by id and another by email, the id match is used.

pub mod alias;
pub mod google;
pub mod identity;
pub mod store;
pub mod user;

pub use alias::{generate_alias, AliasGenerator, WordAliasGenerator};
pub use google::{GoogleProvider, IdentityProvider};
pub use identity::{
    ExternalIdentity, IdentityResolver, ResolutionOutcome, ResolvedIdentity, UserLookup,
    UserRepository,
};
pub use store::{AuthStore, IssuedTokens, Session};
pub use user::{Role, User, AVATAR_COUNT};
