//! Credential resolution for the password grant.
//!
//! Resolution order for each field:
//! 1. value supplied by the caller
//! 2. environment variable (`CDSE_USERNAME`, `CDSE_PASSWORD`)
//! 3. for the password only, a file named by `CDSE_PASSWORD_FILE`
//!
//! The password file is refused when any group or other permission bit is set.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::AuthError;

/// Environment variable holding the account username.
pub const USERNAME_ENV: &str = "CDSE_USERNAME";
/// Environment variable holding the account password.
pub const PASSWORD_ENV: &str = "CDSE_PASSWORD";
/// Environment variable naming a restricted-permission password file.
pub const PASSWORD_FILE_ENV: &str = "CDSE_PASSWORD_FILE";

/// Partially specified credentials, completed by [`Credentials::resolve`].
#[derive(Clone, Default)]
pub struct Credentials {
    username: Option<String>,
    password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    /// Credentials with nothing supplied; everything comes from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Sets an explicit username.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into()).filter(|value| !value.is_empty());
        self
    }

    /// Sets an explicit password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into()).filter(|value| !value.is_empty());
        self
    }

    /// Completes the credentials from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingCredentials`] when a field cannot be filled,
    /// [`AuthError::InsecurePasswordFile`] when the password file is group/other
    /// accessible, or [`AuthError::PasswordFile`] when it cannot be read.
    pub fn resolve(self) -> Result<ResolvedCredentials, AuthError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Completes the credentials using `env` as the variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`Credentials::resolve`].
    pub fn resolve_with<F>(self, env: F) -> Result<ResolvedCredentials, AuthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| env(name).filter(|value| !value.is_empty());

        let username = self.username.or_else(|| lookup(USERNAME_ENV));

        let password = match self.password.or_else(|| lookup(PASSWORD_ENV)) {
            Some(password) => Some(password),
            None => match lookup(PASSWORD_FILE_ENV) {
                Some(raw_path) => {
                    let path = expand_home(&raw_path, lookup("HOME").as_deref());
                    Some(read_password_file(&path)?).filter(|value| !value.is_empty())
                }
                None => None,
            },
        };

        match (username, password) {
            (Some(username), Some(password)) => {
                debug!(username = %username, "resolved credentials");
                Ok(ResolvedCredentials { username, password })
            }
            _ => Err(AuthError::MissingCredentials),
        }
    }
}

/// Username and password, both present.
#[derive(Clone)]
pub struct ResolvedCredentials {
    username: String,
    password: String,
}

impl fmt::Debug for ResolvedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl ResolvedCredentials {
    /// Creates resolved credentials directly.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Account username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}

fn expand_home(raw: &str, home: Option<&str>) -> PathBuf {
    match (raw.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => Path::new(home).join(rest),
        _ if raw == "~" => home.map_or_else(|| PathBuf::from(raw), PathBuf::from),
        _ => PathBuf::from(raw),
    }
}

/// Reads a password file after checking that only its owner can access it.
///
/// # Errors
///
/// Returns [`AuthError::InsecurePasswordFile`] if any group/other bit is set,
/// or [`AuthError::PasswordFile`] if the file cannot be inspected or read.
pub fn read_password_file(path: &Path) -> Result<String, AuthError> {
    let metadata = std::fs::metadata(path).map_err(|e| AuthError::password_file(path, e))?;
    check_owner_only(path, &metadata)?;
    let raw = std::fs::read_to_string(path).map_err(|e| AuthError::password_file(path, e))?;
    Ok(raw.trim().to_string())
}

#[cfg(unix)]
fn check_owner_only(path: &Path, metadata: &std::fs::Metadata) -> Result<(), AuthError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = metadata.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(AuthError::InsecurePasswordFile {
            path: path.to_path_buf(),
            mode,
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_owner_only(_path: &Path, _metadata: &std::fs::Metadata) -> Result<(), AuthError> {
    Ok(())
}
