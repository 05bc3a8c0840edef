// ABOUTME: Session channel setup shared by exec and the interactive terminal.
// ABOUTME: Sets environment variables and requests a pty, waiting for each reply.

use super::error::{Error, Result};
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Pty};
use std::collections::HashMap;

pub const TERM: &str = "xterm-256color";

/// Echo on, 14400 baud in both directions.
pub const TERMINAL_MODES: &[(Pty, u32)] = &[
    (Pty::ECHO, 1),
    (Pty::TTY_OP_ISPEED, 14400),
    (Pty::TTY_OP_OSPEED, 14400),
];

/// Set every variable in `env`, stopping at the first one the server refuses.
pub async fn apply_env(channel: &mut Channel<Msg>, env: &HashMap<String, String>) -> Result<()> {
    let mut vars: Vec<_> = env.iter().collect();
    vars.sort();

    for (name, value) in vars {
        let rejected = |reason: String| Error::SetEnv {
            name: name.clone(),
            value: value.clone(),
            reason,
        };
        channel
            .set_env(true, name.as_str(), value.as_str())
            .await
            .map_err(|e| rejected(e.to_string()))?;
        await_reply(channel).await.map_err(rejected)?;
    }
    Ok(())
}

/// Request a pseudo-terminal of `cols` x `rows` with the fixed terminal modes.
pub async fn request_pty(channel: &mut Channel<Msg>, cols: u32, rows: u32) -> Result<()> {
    channel
        .request_pty(true, TERM, cols, rows, 0, 0, TERMINAL_MODES)
        .await
        .map_err(|e| Error::RequestPty(e.to_string()))?;
    await_reply(channel).await.map_err(Error::RequestPty)
}

/// Wait for the server's answer to a request sent with `want_reply`.
pub async fn await_reply(channel: &mut Channel<Msg>) -> std::result::Result<(), String> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Ok(()),
            Some(ChannelMsg::Failure) => return Err("rejected by server".to_string()),
            Some(ChannelMsg::Close) | None => return Err("channel closed".to_string()),
            Some(_) => {}
        }
    }
}
