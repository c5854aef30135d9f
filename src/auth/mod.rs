//! Credentials, bearer tokens and the authenticated request session.
//!
//! One [`TokenManager`] is shared (via `Arc`) by every session in a run, so
//! token refreshes are serialized behind its lock.

mod credentials;
mod error;
mod session;
mod token;

pub use credentials::{
    Credentials, PASSWORD_ENV, PASSWORD_FILE_ENV, ResolvedCredentials, USERNAME_ENV,
    read_password_file,
};
pub use error::AuthError;
pub use session::{AuthSession, SessionConfig, header_content_length};
pub use token::{
    DEFAULT_CLIENT_ID, DEFAULT_TOKEN_URL, EXPIRY_MARGIN_SECS, TokenCache, TokenEndpoint,
    TokenManager,
};
