//! Credential resolution for configuration remotes.
//!
//! Passwords can come from three places, tried in order:
//!
//! 1. **Direct value** - for local testing (`password: "hunter2"`)
//! 2. **File reference** - Docker secrets style (`passwordFile: /run/secrets/git`)
//! 3. **Env var reference** - for production (`passwordEnvVar: CONFIG_REPO_TOKEN`)
//!
//! A remote may instead name a shared secret, which is looked up through a
//! [`CredentialsProvider`] supplied by the host application.

use secrecy::SecretString;
use std::fs;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Shared secret '{name}' could not be retrieved: {reason}")]
    SharedSecretUnavailable { name: String, reason: String },
}

/// Result type for secret resolution.
pub type Result<T> = std::result::Result<T, SecretError>;

/// Username/password pair fetched from a secrets service.
#[derive(Debug, Clone)]
pub struct SharedSecret {
    pub username: String,
    pub password: SecretString,
}

/// Looks up named shared secrets for remotes that reference one.
///
/// Only consulted for remotes whose configuration names a `secret` and that
/// carry no password of their own.
pub trait CredentialsProvider: Send + Sync {
    fn shared_secret(&self, name: &str) -> Result<SharedSecret>;
}

/// Reads shared secrets from environment variables.
///
/// Secret `config-repo` is read from `CONFIG_REPO_USERNAME` and
/// `CONFIG_REPO_PASSWORD`, optionally behind a prefix.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialsProvider {
    prefix: String,
}

impl EnvCredentialsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepends `prefix` (e.g. `VCFG_`) to every variable name.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var_name(&self, secret: &str, suffix: &str) -> String {
        let stem: String = secret
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}_{}", self.prefix, stem, suffix)
    }
}

impl CredentialsProvider for EnvCredentialsProvider {
    fn shared_secret(&self, name: &str) -> Result<SharedSecret> {
        let unavailable = |e: SecretError| SecretError::SharedSecretUnavailable {
            name: name.to_string(),
            reason: e.to_string(),
        };

        let username_var = self.var_name(name, "USERNAME");
        let username = std::env::var(&username_var).map_err(|_| {
            unavailable(SecretError::EnvVarNotSet {
                name: username_var.clone(),
            })
        })?;
        let password = resolve_secret(None, None, Some(&self.var_name(name, "PASSWORD")))
            .map_err(unavailable)?;

        Ok(SharedSecret {
            username: username.trim().to_string(),
            password,
        })
    }
}

/// Resolves a secret from multiple sources in priority order:
/// 1. Direct value (if provided and non-empty)
/// 2. File contents (if path provided)
/// 3. Environment variable (if name provided)
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct {
        if !value.is_empty() {
            return Ok(SecretString::from(value.to_string()));
        }
    }

    if let Some(path) = file_path {
        if !path.is_empty() {
            let expanded = expand_home(path);
            return match fs::read_to_string(&expanded) {
                Ok(content) => Ok(SecretString::from(content.trim().to_string())),
                Err(e) => Err(SecretError::FileReadError {
                    path: expanded,
                    source: e,
                }),
            };
        }
    }

    if let Some(var_name) = env_var {
        if !var_name.is_empty() {
            return match std::env::var(var_name) {
                // Env vars may carry trailing newlines
                Ok(value) => Ok(SecretString::from(value.trim())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: var_name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: var_name.to_string(),
                }),
            };
        }
    }

    Err(SecretError::NoSourceProvided)
}

/// Resolves a secret, returning None if no source is provided instead of an error.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Checks if at least one secret source is configured (non-empty).
pub fn has_secret_source(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> bool {
    direct.is_some_and(|s| !s.is_empty())
        || file_path.is_some_and(|s| !s.is_empty())
        || env_var.is_some_and(|s| !s.is_empty())
}

/// Expands `~` and `~/path` to the user's home directory.
///
/// `~user/path` is not supported.
pub(crate) fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            if path == "~" {
                return home.to_string_lossy().into_owned();
            }
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
