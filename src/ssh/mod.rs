// ABOUTME: SSH client module: credential chains, dialing, and session operations.
// ABOUTME: Built on russh with a transport seam for exercising the connection engine.

mod auth;
mod channel;
mod client;
mod connector;
mod error;
mod group;
mod keyboard;
mod sftp;
mod terminal;
mod transport;

pub use auth::{
    AuthStrategy, Credentials, PasswordRetry, build_auth_methods, expand_home, load_private_key,
    resolve_key_material,
};
pub use client::{Client, CombinedOutput};
pub use connector::{Connector, authenticate};
pub use error::{Error, ErrorKind, Result};
pub use group::TaskGroup;
pub use keyboard::Responder;
pub use sftp::{CopyError, UPLOAD_BUFFER_SIZE, copy_chunks};
pub use terminal::{
    Geometry, GeometrySource, LocalTerminal, RESIZE_POLL_INTERVAL, TerminalExit, poll_geometry,
};
pub use transport::{
    AcceptAnyHost, AuthReply, AuthSession, Challenge, DialSettings, LEGACY_KEX, RusshSession,
    RusshTransport, Transport,
};
