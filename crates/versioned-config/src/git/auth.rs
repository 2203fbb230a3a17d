//! Git authentication handling.

use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;

use crate::config::RemoteCredentials;
use crate::error::GitError;

/// Escapes a value for safe use in single-quoted shell strings.
/// Replaces single quotes with '\'' (end quote, escaped quote, start quote).
pub fn shell_escape(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Escapes a value for safe use in Windows batch scripts.
#[cfg(windows)]
fn escape_for_windows_batch(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() * 2);
    for ch in value.chars() {
        match ch {
            '%' => escaped.push_str("%%"),
            '^' | '&' | '|' | '<' | '>' | '(' | ')' | '"' => {
                escaped.push('^');
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// RAII guard for askpass script cleanup.
///
/// Deletes the askpass script when dropped so credentials are not left on
/// disk, also when the git command fails.
#[derive(Debug)]
pub struct AskpassCleanup {
    path: Option<PathBuf>,
}

impl AskpassCleanup {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub(crate) fn empty() -> Self {
        Self { path: None }
    }

    /// Path of the script, if one was written.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Drop for AskpassCleanup {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to clean up askpass script: {}", e);
            }
        }
    }
}

/// Authentication environment for one git command.
#[derive(Debug)]
pub struct AuthEnv {
    /// Environment variables to set for the git command.
    pub env_vars: Vec<(String, String)>,
    /// Must outlive the git command to keep the askpass script alive.
    pub _cleanup: AskpassCleanup,
}

impl AuthEnv {
    fn plain(env_vars: Vec<(String, String)>) -> Self {
        Self {
            env_vars,
            _cleanup: AskpassCleanup::empty(),
        }
    }
}

/// Builds the environment that lets git authenticate with `credentials`.
///
/// Basic credentials are answered by a throwaway `GIT_ASKPASS` script;
/// SSH keys are passed through `GIT_SSH_COMMAND`.
pub fn build_auth_env(credentials: &RemoteCredentials) -> Result<AuthEnv, GitError> {
    match credentials {
        RemoteCredentials::None => Ok(AuthEnv::plain(Vec::new())),
        RemoteCredentials::Basic { username, password } => {
            write_askpass(username, password.expose_secret())
        }
        RemoteCredentials::SshKey(key_path) => {
            if !key_path.exists() {
                return Err(GitError::AuthFailed(format!(
                    "SSH key file not found: {}",
                    key_path.display()
                )));
            }

            // Quote the key path to handle spaces and special characters
            let safe_path = {
                let escaped = shell_escape(&key_path.display().to_string());
                if escaped.starts_with('-') {
                    format!("'./{}'", escaped)
                } else {
                    format!("'{}'", escaped)
                }
            };

            // accept-new trusts unknown hosts but rejects changed keys
            Ok(AuthEnv::plain(vec![(
                "GIT_SSH_COMMAND".to_string(),
                format!(
                    "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
                    safe_path
                ),
            )]))
        }
    }
}

fn write_askpass(username: &str, password: &str) -> Result<AuthEnv, GitError> {
    let write_err = |e: std::io::Error| {
        GitError::AuthFailed(format!("Failed to write askpass script: {}", e))
    };

    let temp_dir = std::env::temp_dir();
    let random_suffix = uuid::Uuid::new_v4().to_string();

    // git passes the prompt as $1: "Username for '...'" or "Password for '...'"
    #[cfg(unix)]
    let (askpass_path, askpass_script) = {
        let path = temp_dir.join(format!(".config-askpass-{}.sh", random_suffix));
        let script = format!(
            "#!/bin/sh\ncase \"$1\" in\n  Username*) echo '{}' ;;\n  *) echo '{}' ;;\nesac\n",
            shell_escape(username),
            shell_escape(password)
        );
        (path, script)
    };

    #[cfg(windows)]
    let (askpass_path, askpass_script) = {
        let path = temp_dir.join(format!(".config-askpass-{}.bat", random_suffix));
        let script = format!(
            "@echo off\r\necho %~1 | findstr /b \"Username\" >nul && (echo {}) || (echo {})\r\n",
            escape_for_windows_batch(username),
            escape_for_windows_batch(password)
        );
        (path, script)
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o700)
            .open(&askpass_path)
            .map_err(write_err)?;
        std::io::Write::write_all(&mut file, askpass_script.as_bytes()).map_err(write_err)?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(&askpass_path, &askpass_script).map_err(write_err)?;
    }

    let cleanup = AskpassCleanup::new(askpass_path.clone());

    let askpass_path_str = askpass_path
        .to_str()
        .ok_or_else(|| {
            GitError::AuthFailed("Temp directory path contains non-UTF8 characters".to_string())
        })?
        .to_string();

    Ok(AuthEnv {
        env_vars: vec![("GIT_ASKPASS".to_string(), askpass_path_str)],
        _cleanup: cleanup,
    })
}
