// ABOUTME: SSH-specific error types.
// ABOUTME: Covers key material, authentication, network, session and transfer failures.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read key file {path}: {source}")]
    KeyRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse private key: {0}")]
    KeyParse(String),

    #[error("authentication failed for {user}@{address}: {reason}")]
    AuthenticationFailed {
        user: String,
        address: String,
        reason: String,
    },

    #[error("question[{0}] not answered")]
    QuestionNotAnswered(String),

    #[error("no password candidates to probe")]
    NoPasswordCandidates,

    #[error("connection failed to {address}: {reason}")]
    Connection { address: String, reason: String },

    #[error("connection to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("not connected")]
    NotConnected,

    #[error("failed to open session channel: {0}")]
    ChannelOpen(String),

    #[error("setenv {name}={value} rejected: {reason}")]
    SetEnv {
        name: String,
        value: String,
        reason: String,
    },

    #[error("request pty failed: {0}")]
    RequestPty(String),

    #[error("start shell failed: {0}")]
    Shell(String),

    #[error("command execution failed: {0}")]
    CommandFailed(String),

    #[error("command timed out after {0:?}")]
    CommandTimeout(Duration),

    #[error("channel closed unexpectedly without exit status")]
    ChannelClosed,

    #[error("terminal error: {0}")]
    Terminal(#[source] std::io::Error),

    #[error("read terminal size failed: {0}")]
    TerminalSize(#[source] std::io::Error),

    #[error("window change failed: {0}")]
    WindowChange(String),

    #[error("open sftp subsystem failed: {0}")]
    Sftp(String),

    #[error("read local file [{path}] failed: {source}")]
    LocalFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("create remote file [{path}] failed: {reason}")]
    RemoteCreate { path: String, reason: String },

    #[error("upload write to [{path}] failed: {reason}")]
    RemoteWrite { path: String, reason: String },

    #[error("chmod {mode:o} on [{path}] failed: {reason}")]
    RemoteChmod {
        path: String,
        mode: u32,
        reason: String,
    },

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),
}

/// Broad failure category, for callers that branch on the class of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unreadable key material. Fatal to the credential chain.
    Configuration,
    /// Every offered strategy was rejected.
    Authentication,
    /// Dial, handshake or timeout failure.
    Network,
    /// Environment, pty, shell or channel failure on an open connection.
    Session,
    /// Local or remote file failure during upload.
    Transfer,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::KeyRead { .. } | Error::KeyParse(_) => ErrorKind::Configuration,
            Error::AuthenticationFailed { .. }
            | Error::QuestionNotAnswered(_)
            | Error::NoPasswordCandidates => ErrorKind::Authentication,
            Error::Connection { .. }
            | Error::ConnectTimeout { .. }
            | Error::NotConnected
            | Error::Protocol(_) => ErrorKind::Network,
            Error::ChannelOpen(_)
            | Error::SetEnv { .. }
            | Error::RequestPty(_)
            | Error::Shell(_)
            | Error::CommandFailed(_)
            | Error::CommandTimeout(_)
            | Error::ChannelClosed
            | Error::Terminal(_)
            | Error::TerminalSize(_)
            | Error::WindowChange(_) => ErrorKind::Session,
            Error::Sftp(_)
            | Error::LocalFile { .. }
            | Error::RemoteCreate { .. }
            | Error::RemoteWrite { .. }
            | Error::RemoteChmod { .. } => ErrorKind::Transfer,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
