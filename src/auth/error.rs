//! Error types for credential resolution and token grants.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving credentials or talking to the token endpoint.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Neither explicit values, environment variables nor a password file supplied credentials.
    #[error(
        "credentials are required: set CDSE_USERNAME and CDSE_PASSWORD, \
         or CDSE_PASSWORD_FILE pointing to a chmod 600 file containing the password"
    )]
    MissingCredentials,

    /// The password file is readable by group or other users.
    #[error("insecure permissions {mode:#o} on {path}; run: chmod 600 {path}")]
    InsecurePasswordFile {
        /// Password file path.
        path: PathBuf,
        /// Permission bits found on the file.
        mode: u32,
    },

    /// The password file could not be read.
    #[error("failed to read password file {path}: {source}")]
    PasswordFile {
        /// Password file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The token request could not be sent or its body could not be read.
    #[error("token request to {url} failed: {source}")]
    TokenRequest {
        /// Token endpoint URL.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The token endpoint answered with a non-success status.
    #[error("token endpoint {url} rejected the {grant} grant with HTTP {status}")]
    TokenRejected {
        /// Token endpoint URL.
        url: String,
        /// Grant type that was attempted.
        grant: &'static str,
        /// The HTTP status code.
        status: u16,
    },

    /// The HTTP client for token requests could not be constructed.
    #[error("failed to build token HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl AuthError {
    /// Creates a token request error.
    pub fn token_request(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::TokenRequest {
            url: url.into(),
            source,
        }
    }

    /// Creates a password-file read error.
    pub fn password_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::PasswordFile {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insecure_permissions_message_suggests_chmod() {
        let error = AuthError::InsecurePasswordFile {
            path: PathBuf::from("/home/u/.cdse"),
            mode: 0o644,
        };
        let msg = error.to_string();
        assert!(msg.contains("insecure permissions"), "{msg}");
        assert!(msg.contains("0o644"), "{msg}");
        assert!(msg.contains("chmod 600 /home/u/.cdse"), "{msg}");
    }

    #[test]
    fn test_missing_credentials_lists_env_vars() {
        let msg = AuthError::MissingCredentials.to_string();
        assert!(msg.contains("CDSE_USERNAME"));
        assert!(msg.contains("CDSE_PASSWORD_FILE"));
    }
}
