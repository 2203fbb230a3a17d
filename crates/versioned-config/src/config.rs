//! Settings for the configuration repository and their validated form.
//!
//! [`VersionedConfigSettings`] is what operators write (JSON or YAML,
//! camelCase keys). [`VersionedConfigSettings::into_spec`] turns it into a
//! [`RemoteSpec`], resolving password sources and rejecting contradictory
//! combinations up front so the engine never sees them.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use percent_encoding::percent_decode_str;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VersioningError};
use crate::secrets::{self, CredentialsProvider};

/// Top-level settings, as read from a settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedConfigSettings {
    /// Remotes in priority order. The first one is tried first for every
    /// clone and pull.
    #[serde(default)]
    pub remotes: Vec<RemoteSettings>,

    /// Branch to track.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Where to keep the checkout. A temporary directory is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_repository: Option<String>,

    /// Seconds between update checks; zero or negative disables polling.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: i64,

    /// Kill git commands running longer than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Paths that are always monitored.
    #[serde(default)]
    pub config_files: Vec<String>,
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_poll_interval() -> i64 {
    30
}

impl Default for VersionedConfigSettings {
    fn default() -> Self {
        Self {
            remotes: Vec::new(),
            branch: default_branch(),
            local_repository: None,
            poll_interval_secs: default_poll_interval(),
            timeout_secs: None,
            config_files: Vec::new(),
        }
    }
}

/// One remote location of the configuration repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSettings {
    /// Label used in log lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Clone URL or local path.
    pub uri: String,

    /// Authentication settings.
    #[serde(default)]
    pub auth: RemoteAuthSettings,
}

/// Authentication settings for a remote.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAuthSettings {
    /// Authentication type: none, basic, or ssh-key.
    #[serde(default, rename = "type")]
    pub auth_type: RemoteAuthType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Direct password value (for local development).
    /// WARNING: This stores the password in plaintext in the settings file.
    /// Prefer password_env_var or password_file.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "password")]
    pub password_insecure: Option<String>,

    /// Path to a file containing the password (for Docker secrets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_file: Option<String>,

    /// Environment variable containing the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env_var: Option<String>,

    /// Name of a shared secret holding username and password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// Path to SSH private key. Defaults to `~/.ssh/id_ed25519`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_path: Option<String>,
}

impl RemoteAuthSettings {
    fn has_password_source(&self) -> bool {
        secrets::has_secret_source(
            self.password_insecure.as_deref(),
            self.password_file.as_deref(),
            self.password_env_var.as_deref(),
        )
    }

    fn has_basic_fields(&self) -> bool {
        self.has_password_source()
            || self.secret.as_deref().is_some_and(|s| !s.is_empty())
            || self.username.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Remote authentication type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteAuthType {
    #[default]
    None,
    Basic,
    SshKey,
}

/// Credentials presented to one remote.
#[derive(Clone, Default)]
pub enum RemoteCredentials {
    #[default]
    None,
    Basic {
        username: String,
        password: SecretString,
    },
    SshKey(PathBuf),
}

impl RemoteCredentials {
    pub fn is_none(&self) -> bool {
        matches!(self, RemoteCredentials::None)
    }
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteCredentials::None => f.write_str("None"),
            RemoteCredentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            RemoteCredentials::SshKey(path) => f.debug_tuple("SshKey").field(path).finish(),
        }
    }
}

/// A validated remote: credential-free URL plus the credentials to use.
#[derive(Debug, Clone)]
pub struct Remote {
    name: String,
    label: Option<String>,
    url: String,
    credentials: RemoteCredentials,
}

impl Remote {
    /// Builds the remote registered as `remote<index>` in the checkout.
    ///
    /// `user:password@` embedded in the URL is moved into the credentials;
    /// combining it with explicit credentials is a configuration error.
    pub fn new(index: usize, url: &str, credentials: RemoteCredentials) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(VersioningError::Configuration(format!(
                "remote #{index} has an empty URI"
            )));
        }

        let (url, embedded) = split_userinfo(url);
        let credentials = match (embedded, credentials) {
            (Some(embedded), RemoteCredentials::None) => embedded,
            (Some(_), _) => {
                return Err(VersioningError::Configuration(format!(
                    "remote '{url}' embeds credentials in its URI and also configures them explicitly"
                )))
            }
            (None, credentials) => credentials,
        };

        Ok(Self {
            name: format!("remote{index}"),
            label: None,
            url,
            credentials,
        })
    }

    /// Attaches an operator-facing label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        self.label = (!label.is_empty()).then_some(label);
        self
    }

    /// Name of the remote inside the checkout.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured label, if any.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// URL without any embedded credentials.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn credentials(&self) -> &RemoteCredentials {
        &self.credentials
    }

    /// Label if configured, otherwise the URL.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.url)
    }
}

/// Validated description of where the configuration repository lives.
#[derive(Debug, Clone)]
pub struct RemoteSpec {
    remotes: Vec<Remote>,
    branch: String,
    local_repository: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl RemoteSpec {
    /// Creates a spec from already-built remotes.
    pub fn from_remotes(remotes: Vec<Remote>, branch: impl Into<String>) -> Result<Self> {
        let branch = branch.into().trim().to_string();
        if remotes.is_empty() {
            return Err(VersioningError::Configuration(
                "at least one remote must be configured".to_string(),
            ));
        }
        if branch.is_empty() {
            return Err(VersioningError::Configuration(
                "branch name must not be empty".to_string(),
            ));
        }

        Ok(Self {
            remotes,
            branch,
            local_repository: None,
            timeout: None,
        })
    }

    /// Creates a spec from plain URLs without explicit credentials.
    pub fn new<I, S>(urls: I, branch: impl Into<String>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let remotes = urls
            .into_iter()
            .enumerate()
            .map(|(i, url)| Remote::new(i, url.as_ref(), RemoteCredentials::None))
            .collect::<Result<Vec<_>>>()?;
        Self::from_remotes(remotes, branch)
    }

    /// Keeps the checkout at `path` instead of a temporary directory.
    pub fn with_local_repository(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_repository = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn remotes(&self) -> &[Remote] {
        &self.remotes
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn local_repository(&self) -> Option<&Path> {
        self.local_repository.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Credential-free URLs in priority order.
    pub fn urls(&self) -> Vec<String> {
        self.remotes.iter().map(|r| r.url.clone()).collect()
    }
}

impl VersionedConfigSettings {
    /// Loads settings from a `.json`, `.yaml` or `.yml` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| VersioningError::io(path, e))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext {
            "json" => Self::from_json_str(&content),
            "yaml" | "yml" => Self::from_yaml_str(&content),
            other => Err(VersioningError::Configuration(format!(
                "unsupported settings file extension '{}' for {}",
                other,
                path.display()
            ))),
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| VersioningError::Configuration(format!("invalid JSON settings: {e}")))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| VersioningError::Configuration(format!("invalid YAML settings: {e}")))
    }

    /// Polling period, or `None` when polling is disabled.
    pub fn poll_interval(&self) -> Option<Duration> {
        u64::try_from(self.poll_interval_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Validates the settings and resolves every credential.
    ///
    /// `provider` is required only when a remote names a `secret` and has
    /// no password of its own.
    pub fn into_spec(&self, provider: Option<&dyn CredentialsProvider>) -> Result<RemoteSpec> {
        let remotes = self
            .remotes
            .iter()
            .enumerate()
            .map(|(i, remote)| {
                let credentials = resolve_credentials(remote, provider)?;
                let built = Remote::new(i, &remote.uri, credentials)?;
                Ok(match &remote.name {
                    Some(label) => built.with_label(label.clone()),
                    None => built,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut spec = RemoteSpec::from_remotes(remotes, self.branch.clone())?;
        if let Some(dir) = self.local_repository.as_deref().filter(|d| !d.is_empty()) {
            spec = spec.with_local_repository(secrets::expand_home(dir));
        }
        if let Some(secs) = self.timeout_secs.filter(|s| *s > 0) {
            spec = spec.with_timeout(Duration::from_secs(secs));
        }
        Ok(spec)
    }
}

fn resolve_credentials(
    remote: &RemoteSettings,
    provider: Option<&dyn CredentialsProvider>,
) -> Result<RemoteCredentials> {
    let auth = &remote.auth;
    let (url, _) = split_userinfo(remote.uri.trim());
    let config_err =
        |msg: String| VersioningError::Configuration(format!("remote '{url}': {msg}"));

    // A password source or secret implies basic auth even without an explicit type
    let auth_type = match auth.auth_type {
        RemoteAuthType::None if auth.has_password_source() || auth.secret.is_some() => {
            RemoteAuthType::Basic
        }
        other => other,
    };

    match auth_type {
        RemoteAuthType::None => Ok(RemoteCredentials::None),
        RemoteAuthType::SshKey => {
            if auth.has_basic_fields() {
                return Err(config_err(
                    "SSH key authentication cannot be combined with basic credentials".to_string(),
                ));
            }
            let key_path = match auth.ssh_key_path.as_deref().filter(|p| !p.is_empty()) {
                Some(path) => PathBuf::from(secrets::expand_home(path)),
                None => dirs::home_dir()
                    .map(|h| h.join(".ssh").join("id_ed25519"))
                    .unwrap_or_else(|| PathBuf::from(".ssh/id_ed25519")),
            };
            Ok(RemoteCredentials::SshKey(key_path))
        }
        RemoteAuthType::Basic => {
            if auth.ssh_key_path.as_deref().is_some_and(|p| !p.is_empty()) {
                return Err(config_err(
                    "basic authentication cannot be combined with an SSH key".to_string(),
                ));
            }

            let password = secrets::resolve_secret_optional(
                auth.password_insecure.as_deref(),
                auth.password_file.as_deref(),
                auth.password_env_var.as_deref(),
            )
            .map_err(|e| config_err(e.to_string()))?;
            let username = auth.username.clone().filter(|u| !u.is_empty());

            if let Some(password) = password {
                let username = username.ok_or_else(|| {
                    config_err("basic authentication needs a username".to_string())
                })?;
                return Ok(RemoteCredentials::Basic { username, password });
            }

            let Some(secret_name) = auth.secret.as_deref().filter(|s| !s.is_empty()) else {
                return Err(config_err(
                    "basic authentication needs a password, passwordFile, passwordEnvVar or secret"
                        .to_string(),
                ));
            };
            let provider = provider.ok_or_else(|| {
                config_err(format!(
                    "secret '{secret_name}' is referenced but no credentials provider is available"
                ))
            })?;
            let shared = provider
                .shared_secret(secret_name)
                .map_err(|e| config_err(e.to_string()))?;

            Ok(RemoteCredentials::Basic {
                username: username.unwrap_or(shared.username),
                password: shared.password,
            })
        }
    }
}

/// Splits `user:password@` off a URL with a scheme.
///
/// Both parts are percent-decoded, as git does before authenticating.
///
/// Only userinfo carrying a password is removed; a bare user name (as in
/// `ssh://git@host/repo`) is not a secret and stays in the URL. SCP-style
/// addresses and local paths are returned unchanged.
pub(crate) fn split_userinfo(url: &str) -> (String, Option<RemoteCredentials>) {
    let Some(scheme_end) = url.find("://") else {
        return (url.to_string(), None);
    };
    let authority_start = scheme_end + 3;
    let rest = &url[authority_start..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..authority_end];

    let Some(at) = authority.rfind('@') else {
        return (url.to_string(), None);
    };
    let userinfo = &authority[..at];
    let Some((user, password)) = userinfo.split_once(':') else {
        return (url.to_string(), None);
    };

    let stripped = format!(
        "{}{}{}",
        &url[..authority_start],
        &authority[at + 1..],
        &rest[authority_end..]
    );
    let decode = |part: &str| percent_decode_str(part).decode_utf8_lossy().into_owned();
    let credentials = RemoteCredentials::Basic {
        username: decode(user),
        password: SecretString::from(decode(password)),
    };
    (stripped, Some(credentials))
}
