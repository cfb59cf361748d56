//! Client-side session library.
//!
//! - [`TokenStore`]: credential persistence across several legacy keys
//! - [`AuthApi`] / [`HttpAuthApi`]: the gateway's auth endpoints
//! - [`SessionContext`]: bootstrap and login/register/logout/refresh/profile flows

pub mod api;
pub mod context;
pub mod notice;
pub mod token_store;

pub use api::{AuthApi, HttpAuthApi, AUTH_TOKEN_HEADER};
pub use context::{SessionContext, SessionSnapshot, SessionState};
pub use notice::{CollectingNotifier, ConsoleNotifier, Notice, NoticeLevel, Notifier};
pub use token_store::{
    FileBackend, MemoryBackend, TokenBackend, TokenStore, REFRESH_TOKEN_KEY, TOKEN_KEYS,
};
