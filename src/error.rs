// ABOUTME: Application-wide error types for sshman.
// ABOUTME: Unifies configuration and SSH errors with SNAFU context selectors.

use crate::ssh::{self, ErrorKind};
use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("configuration file not found in {}", dir.display()))]
    ConfigNotFound { dir: PathBuf },

    #[snafu(display("failed to read {}: {source}", path.display()))]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("YAML parse error: {source}"))]
    Yaml { source: serde_yaml::Error },

    #[snafu(display("missing required environment variable: {var}"))]
    MissingEnvVar { var: String },

    #[snafu(display("invalid configuration: {reason}"))]
    InvalidConfig { reason: String },

    #[snafu(display("invalid target {target:?}: {reason}"))]
    InvalidTarget { target: String, reason: String },

    #[snafu(display("{source}"))]
    Ssh { source: ssh::Error },
}

impl From<ssh::Error> for Error {
    fn from(source: ssh::Error) -> Self {
        Error::Ssh { source }
    }
}

impl Error {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Ssh { source } => source.kind(),
            Error::ConfigNotFound { .. }
            | Error::ReadConfig { .. }
            | Error::Yaml { .. }
            | Error::MissingEnvVar { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidTarget { .. } => ErrorKind::Configuration,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
