//! Secret loading.
//!
//! The MotherDuck token lives in a local, gitignored TOML file:
//!
//! ```toml
//! [motherduck]
//! token = "your_token_here"
//! ```
//!
//! It is read exactly once at startup. Nothing in this module logs or
//! formats the token itself.

use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default secret file, relative to the working directory.
pub const DEFAULT_SECRETS_PATH: &str = "secrets.toml";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum SecretsError {
    #[error("Secret file not found: {0}. Create it and add:\n\n[motherduck]\ntoken = 'your_token_here'")]
    NotFound(PathBuf),

    #[error("Could not read secret file {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Secret file {path} is not valid TOML: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("MotherDuck token not configured in {path}. Missing key: {key}. Add:\n\n[motherduck]\ntoken = 'your_token_here'")]
    MissingKey { path: PathBuf, key: &'static str },

    #[error("MotherDuck token in {0} is empty")]
    EmptyToken(PathBuf),
}

// ============================================================================
// CREDENTIAL
// ============================================================================

/// An opaque connection token. Formatting never reveals the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Result<Self, SecretsError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(SecretsError::EmptyToken(PathBuf::new()));
        }
        Ok(Credential(token.trim().to_string()))
    }

    /// The raw token, for building the connection string only.
    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

// ============================================================================
// FILE FORMAT
// ============================================================================

#[derive(Deserialize)]
struct SecretsFile {
    motherduck: Option<MotherDuckSection>,
}

#[derive(Deserialize)]
struct MotherDuckSection {
    token: Option<String>,
}

/// Load the MotherDuck credential from `path`.
pub fn load_credential(path: &Path) -> Result<Credential, SecretsError> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SecretsError::NotFound(path.to_path_buf())
        } else {
            SecretsError::Unreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        }
    })?;

    parse_credential(&content, path)
}

fn parse_credential(content: &str, path: &Path) -> Result<Credential, SecretsError> {
    let file: SecretsFile = toml::from_str(content).map_err(|e| SecretsError::Malformed {
        path: path.to_path_buf(),
        reason: e.message().to_string(),
    })?;

    let section = file.motherduck.ok_or_else(|| SecretsError::MissingKey {
        path: path.to_path_buf(),
        key: "motherduck",
    })?;

    let token = section.token.ok_or_else(|| SecretsError::MissingKey {
        path: path.to_path_buf(),
        key: "motherduck.token",
    })?;

    Credential::new(token).map_err(|_| SecretsError::EmptyToken(path.to_path_buf()))
}
