// ABOUTME: Transport boundary: dialing and per-method authentication requests.
// ABOUTME: Provides the russh-backed implementation with relaxed host key and legacy kex.

use super::error::{Error, Result};
use async_trait::async_trait;
use russh::client::{self, AuthResult, Config, Handle, KeyboardInteractiveAuthResponse};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg, ssh_key};
use russh::{Disconnect, MethodSet, Preferred, kex};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

/// Key exchanges appended to the default list for older servers.
pub const LEGACY_KEX: &[kex::Name] = &[kex::DH_GEX_SHA256, kex::DH_GEX_SHA1];

/// Parameters for one dial attempt.
#[derive(Debug, Clone)]
pub struct DialSettings {
    /// Remote address as `host:port`.
    pub address: String,
    pub host: String,
    pub port: u16,
    /// Bounds the TCP connect and key exchange of a single attempt.
    pub timeout: Duration,
}

impl DialSettings {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        let host = host.into();
        Self {
            address: format!("{}:{}", host, port),
            host,
            port,
            timeout,
        }
    }
}

/// Server verdict on a single authentication request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthReply {
    Accepted,
    /// `remaining` lists the methods the server will still take, by wire name.
    Rejected { remaining: Vec<String> },
}

impl AuthReply {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AuthReply::Accepted)
    }
}

/// Server reply during a keyboard-interactive exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Accepted,
    Rejected { remaining: Vec<String> },
    Questions(Vec<String>),
}

/// Establishes transport-level sessions that still need authentication.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Session: AuthSession + 'static;

    /// Connect and complete key exchange.
    async fn dial(&self, settings: &DialSettings) -> Result<Self::Session>;
}

/// Authentication requests on a dialed session.
#[async_trait]
pub trait AuthSession: Send {
    /// The `none` method. Servers answer with the methods they allow without
    /// counting it as a failed attempt.
    async fn none(&mut self, user: &str) -> Result<AuthReply>;

    async fn password(&mut self, user: &str, password: &str) -> Result<AuthReply>;

    async fn public_key(&mut self, user: &str, key: Arc<PrivateKey>) -> Result<AuthReply>;

    async fn keyboard_interactive_start(&mut self, user: &str) -> Result<Challenge>;

    async fn keyboard_interactive_respond(&mut self, answers: Vec<String>) -> Result<Challenge>;

    /// Tear the session down. Used for attempts whose result is discarded.
    async fn close(&mut self) -> Result<()>;
}

/// russh client handler that accepts every host key.
pub struct AcceptAnyHost {
    address: String,
}

impl client::Handler for AcceptAnyHost {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        tracing::debug!(
            "accepting {} host key for {} without verification",
            server_public_key.algorithm().as_str(),
            self.address
        );
        Ok(true)
    }
}

/// Dials with russh.
#[derive(Debug, Clone, Default)]
pub struct RusshTransport;

impl RusshTransport {
    fn client_config() -> Config {
        let defaults = Preferred::default();
        let mut kex_order = defaults.kex.to_vec();
        for legacy in LEGACY_KEX {
            if !kex_order.contains(legacy) {
                kex_order.push(*legacy);
            }
        }

        Config {
            preferred: Preferred {
                kex: Cow::Owned(kex_order),
                ..defaults
            },
            ..Default::default()
        }
    }
}

#[async_trait]
impl Transport for RusshTransport {
    type Session = RusshSession;

    async fn dial(&self, settings: &DialSettings) -> Result<RusshSession> {
        let handler = AcceptAnyHost {
            address: settings.address.clone(),
        };
        let connect = client::connect(
            Arc::new(Self::client_config()),
            (settings.host.as_str(), settings.port),
            handler,
        );

        let handle = tokio::time::timeout(settings.timeout, connect)
            .await
            .map_err(|_| Error::ConnectTimeout {
                address: settings.address.clone(),
                timeout: settings.timeout,
            })?
            .map_err(|e| Error::Connection {
                address: settings.address.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!("{} key exchange complete", settings.address);
        Ok(RusshSession { handle })
    }
}

/// A russh connection. Authenticated once the connector hands it out.
pub struct RusshSession {
    handle: Handle<AcceptAnyHost>,
}

impl std::fmt::Debug for RusshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusshSession")
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

impl RusshSession {
    pub fn handle(&self) -> &Handle<AcceptAnyHost> {
        &self.handle
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::Protocol)
    }
}

fn method_names(methods: &MethodSet) -> Vec<String> {
    methods.iter().map(String::from).collect()
}

fn reply_from(result: AuthResult) -> AuthReply {
    match result {
        AuthResult::Success => AuthReply::Accepted,
        AuthResult::Failure {
            remaining_methods, ..
        } => AuthReply::Rejected {
            remaining: method_names(&remaining_methods),
        },
    }
}

fn challenge_from(response: KeyboardInteractiveAuthResponse) -> Challenge {
    match response {
        KeyboardInteractiveAuthResponse::Success => Challenge::Accepted,
        KeyboardInteractiveAuthResponse::Failure {
            remaining_methods, ..
        } => Challenge::Rejected {
            remaining: method_names(&remaining_methods),
        },
        KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
            Challenge::Questions(prompts.into_iter().map(|p| p.prompt).collect())
        }
    }
}

#[async_trait]
impl AuthSession for RusshSession {
    async fn none(&mut self, user: &str) -> Result<AuthReply> {
        let result = self
            .handle
            .authenticate_none(user)
            .await
            .map_err(Error::Protocol)?;
        Ok(reply_from(result))
    }

    async fn password(&mut self, user: &str, password: &str) -> Result<AuthReply> {
        let result = self
            .handle
            .authenticate_password(user, password)
            .await
            .map_err(Error::Protocol)?;
        Ok(reply_from(result))
    }

    async fn public_key(&mut self, user: &str, key: Arc<PrivateKey>) -> Result<AuthReply> {
        let hash_alg = self
            .handle
            .best_supported_rsa_hash()
            .await
            .map_err(Error::Protocol)?
            .flatten();

        let result = self
            .handle
            .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, hash_alg))
            .await
            .map_err(Error::Protocol)?;
        Ok(reply_from(result))
    }

    async fn keyboard_interactive_start(&mut self, user: &str) -> Result<Challenge> {
        let response = self
            .handle
            .authenticate_keyboard_interactive_start(user, None::<String>)
            .await
            .map_err(Error::Protocol)?;
        Ok(challenge_from(response))
    }

    async fn keyboard_interactive_respond(&mut self, answers: Vec<String>) -> Result<Challenge> {
        let response = self
            .handle
            .authenticate_keyboard_interactive_respond(answers)
            .await
            .map_err(Error::Protocol)?;
        Ok(challenge_from(response))
    }

    async fn close(&mut self) -> Result<()> {
        self.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dial_settings_format_address() {
        let settings = DialSettings::new("10.1.2.3", 2222, Duration::from_secs(3));
        assert_eq!(settings.address, "10.1.2.3:2222");
    }

    #[test]
    fn rejection_carries_remaining_method_names() {
        let remaining = MethodSet::from(
            &[russh::MethodKind::KeyboardInteractive, russh::MethodKind::PublicKey][..],
        );
        let reply = reply_from(AuthResult::Failure {
            remaining_methods: remaining,
            partial_success: false,
        });
        assert_eq!(
            reply,
            AuthReply::Rejected {
                remaining: vec!["keyboard-interactive".to_string(), "publickey".to_string()]
            }
        );
        assert!(reply_from(AuthResult::Success).is_accepted());
    }

    #[test]
    fn client_config_widens_kex_with_group_exchange() {
        let config = RusshTransport::client_config();
        let kex = config.preferred.kex.as_ref();
        assert!(kex.contains(&kex::DH_GEX_SHA256));
        assert!(kex.contains(&kex::DH_GEX_SHA1));

        // Defaults keep their relative order ahead of the appended legacy entries.
        let defaults = Preferred::default();
        assert_eq!(&kex[..defaults.kex.len()], defaults.kex.as_ref());
    }
}
