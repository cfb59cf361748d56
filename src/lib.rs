//! Veilo identity service.
//!
//! Server side: SQLite account store, Google sign-in reconciliation and an
//! axum gateway. Client side: a token store and session context that keep a
//! signed-in user across restarts.

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod session;

pub use config::Config;
pub use error::AuthError;
