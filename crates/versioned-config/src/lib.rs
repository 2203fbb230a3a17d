//! Keeps a local checkout of a git configuration repository in sync with
//! its remotes and reports which monitored files changed.

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod git;
pub mod logging;
pub mod monitored;
pub mod poller;
pub mod revision;
pub mod secrets;
pub mod update;

pub use backend::RepositoryBackend;
pub use config::{
    Remote, RemoteAuthSettings, RemoteAuthType, RemoteCredentials, RemoteSettings, RemoteSpec,
    VersionedConfigSettings,
};
pub use engine::{SyncEngine, VersioningService};
pub use error::{GitError, RemoteFailure, Result, VersioningError};
pub use git::GitBackend;
pub use logging::{init_logging, LogFormat, LoggingError};
pub use monitored::MonitoredPaths;
pub use poller::UpdatePoller;
pub use revision::RevisionId;
pub use secrets::{CredentialsProvider, EnvCredentialsProvider, SecretError, SharedSecret};
pub use update::{VersionedConfigUpdate, UNKNOWN_REVISION};
