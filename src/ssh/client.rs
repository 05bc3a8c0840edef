// ABOUTME: Client over one authenticated SSH connection.
// ABOUTME: Connects sequentially or by racing, then runs commands, uploads, and terminals.

use super::auth::build_auth_methods;
use super::channel::{apply_env, request_pty};
use super::connector::Connector;
use super::error::{Error, Result};
use super::sftp;
use super::terminal::{self, TerminalExit};
use super::transport::{RusshSession, RusshTransport};
use crate::config::ClientConfig;
use russh::ChannelMsg;
use russh::client::Msg;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Output from a remote command, stdout and stderr interleaved as received.
#[derive(Debug, Clone)]
pub struct CombinedOutput {
    pub output: Vec<u8>,
    pub exit_code: u32,
}

impl CombinedOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Owns at most one connection at a time.
///
/// One exec, upload, or terminal flow should run at a time; the connection
/// itself is not locked.
pub struct Client {
    config: ClientConfig,
    transport: Arc<RusshTransport>,
    session: Option<RusshSession>,
    winning_password: Option<String>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("connected", &self.session.is_some())
            .finish()
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> crate::error::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transport: Arc::new(RusshTransport),
            session: None,
            winning_password: None,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn connector(&self) -> Connector<RusshTransport> {
        Connector::with_shared(Arc::clone(&self.transport), self.config.dial_settings())
    }

    /// Dial once, offering the full credential chain.
    pub async fn connect(&mut self) -> Result<()> {
        let strategies = build_auth_methods(&self.config.credentials())?;
        let session = self
            .connector()
            .connect(&self.config.username, strategies)
            .await?;
        self.replace_session(session).await;
        Ok(())
    }

    /// Race one dial per password candidate and keep the first that authenticates.
    pub async fn fast_connect(&mut self) -> Result<()> {
        let candidates = self.config.credentials().password_candidates();
        let (session, password) = self
            .connector()
            .fast_connect(&self.config.username, &candidates)
            .await?;
        self.replace_session(session).await;
        self.winning_password = Some(password);
        Ok(())
    }

    async fn replace_session(&mut self, session: RusshSession) {
        if let Some(old) = self.session.replace(session) {
            if let Err(e) = old.disconnect().await {
                tracing::debug!("closing previous connection failed: {}", e);
            }
        }
    }

    /// The password that won the last `fast_connect`.
    pub fn winning_password(&self) -> Option<&str> {
        self.winning_password.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn session(&self) -> Result<&RusshSession> {
        self.session.as_ref().ok_or(Error::NotConnected)
    }

    /// Run `command` and collect its combined output.
    ///
    /// Bounded by `command_timeout` when configured.
    pub async fn exec_combined(&self, command: &str) -> Result<CombinedOutput> {
        match self.config.command_timeout {
            Some(timeout) => self.exec_with_timeout(command, timeout).await,
            None => self.exec(command, None).await,
        }
    }

    pub async fn exec_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CombinedOutput> {
        self.exec(command, Some(timeout)).await
    }

    async fn exec(&self, command: &str, timeout: Option<Duration>) -> Result<CombinedOutput> {
        let mut channel = self
            .session()?
            .handle()
            .channel_open_session()
            .await
            .map_err(|e| Error::ChannelOpen(e.to_string()))?;

        let run = self.exec_on(&mut channel, command);
        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .unwrap_or(Err(Error::CommandTimeout(limit))),
            None => run.await,
        };

        if let Err(e) = channel.close().await {
            tracing::debug!("closing exec channel failed: {}", e);
        }
        result
    }

    async fn exec_on(
        &self,
        channel: &mut russh::Channel<Msg>,
        command: &str,
    ) -> Result<CombinedOutput> {
        apply_env(channel, &self.config.env).await?;
        if self.config.pseudo_terminal {
            request_pty(channel, 0, 0).await?;
        }

        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::CommandFailed(format!("failed to exec command: {}", e)))?;

        let mut output = Vec::new();
        let mut exit_code = None;
        let mut got_eof = false;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                    output.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = Some(exit_status);
                    if got_eof {
                        break;
                    }
                }
                Some(ChannelMsg::Eof) => {
                    got_eof = true;
                    if exit_code.is_some() {
                        break;
                    }
                }
                Some(ChannelMsg::Failure) => {
                    return Err(Error::CommandFailed("exec rejected by server".to_string()));
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }

        // A channel that closes without an exit status ended abnormally.
        let exit_code = exit_code.ok_or(Error::ChannelClosed)?;
        tracing::debug!("`{}` exited with {}", command, exit_code);
        Ok(CombinedOutput { output, exit_code })
    }

    /// Copy `local` to `remote` and set its mode. Returns bytes written.
    pub async fn upload(&self, local: impl AsRef<Path>, remote: &str, mode: u32) -> Result<u64> {
        sftp::upload(self.session()?.handle(), local.as_ref(), remote, mode).await
    }

    /// Attach this process's terminal to a remote shell until it exits.
    ///
    /// Keystrokes come from `tokio::io::stdin()`, which reads on a blocking
    /// thread that cannot be cancelled. One read stays pending after the
    /// shell exits and takes the next local input. Callers that keep using
    /// stdin afterwards should pass their own reader to
    /// [`Client::start_interactive_terminal_with`].
    pub async fn start_interactive_terminal(&self) -> Result<TerminalExit> {
        self.start_interactive_terminal_with(tokio::io::stdin()).await
    }

    /// Like [`Client::start_interactive_terminal`], reading keystrokes from
    /// `input`. `input` is dropped once the shell exits.
    pub async fn start_interactive_terminal_with<R>(&self, input: R) -> Result<TerminalExit>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut channel = self
            .session()?
            .handle()
            .channel_open_session()
            .await
            .map_err(|e| Error::ChannelOpen(e.to_string()))?;

        let result = terminal::run_interactive(&mut channel, &self.config.env, input).await;

        if let Err(e) = channel.close().await {
            tracing::debug!("closing terminal channel failed: {}", e);
        }
        result
    }

    /// Disconnect. Closing a client that is not connected is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => session.disconnect().await,
            None => Ok(()),
        }
    }
}
