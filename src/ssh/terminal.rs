// ABOUTME: Interactive terminal sessions bridged to the local controlling terminal.
// ABOUTME: Runs a remote shell in raw mode and keeps the remote window size in sync.

use super::channel::{apply_env, await_reply, request_pty};
use super::error::{Error, Result};
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use std::collections::HashMap;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

pub const RESIZE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Terminal size in character cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geometry {
    pub rows: u16,
    pub cols: u16,
}

/// Where terminal geometry is sampled from.
pub trait GeometrySource: Send + 'static {
    fn read(&mut self) -> io::Result<Geometry>;
}

/// The process's controlling terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTerminal;

impl GeometrySource for LocalTerminal {
    fn read(&mut self) -> io::Result<Geometry> {
        let (cols, rows) = crossterm::terminal::size()?;
        Ok(Geometry { rows, cols })
    }
}

/// How an interactive terminal session ended.
#[derive(Debug)]
pub struct TerminalExit {
    /// Exit status reported by the remote shell, if it sent one.
    pub exit_status: Option<u32>,
    /// First failure of window-size propagation. The shell keeps running when
    /// resizing fails, so this never turns the session itself into an error.
    pub resize_error: Option<Error>,
}

/// Puts the local terminal in raw mode until dropped.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        crossterm::terminal::enable_raw_mode().map_err(Error::Terminal)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = crossterm::terminal::disable_raw_mode() {
            tracing::warn!("failed to restore terminal mode: {}", e);
        }
    }
}

/// Sample `source` now and then every `interval`, sending each reading to `updates`.
///
/// Stops cleanly when `shutdown` fires or its sender is dropped, or when
/// `updates` is closed. A failed read ends polling with that error.
pub async fn poll_geometry<G: GeometrySource>(
    mut source: G,
    updates: mpsc::Sender<Geometry>,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(()),
            _ = ticker.tick() => {
                let geometry = source.read().map_err(|e| {
                    tracing::warn!("reading terminal size failed: {}", e);
                    Error::TerminalSize(e)
                })?;
                if updates.send(geometry).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

/// Run a remote shell on `channel`, reading keystrokes from `input` and
/// writing output to this process's stdout and stderr.
///
/// Blocks until the remote shell exits, then drops `input`. Raw mode is
/// undone on every path.
pub async fn run_interactive<R>(
    channel: &mut Channel<Msg>,
    env: &HashMap<String, String>,
    input: R,
) -> Result<TerminalExit>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    apply_env(channel, env).await?;

    let _raw = RawModeGuard::enable()?;

    let initial = LocalTerminal.read().unwrap_or_default();
    request_pty(channel, u32::from(initial.cols), u32::from(initial.rows)).await?;

    channel
        .request_shell(true)
        .await
        .map_err(|e| Error::Shell(e.to_string()))?;
    await_reply(channel).await.map_err(Error::Shell)?;

    let (resize_tx, mut resize_rx) = mpsc::channel(4);
    let (stop_tx, stop_rx) = oneshot::channel();
    let poller = tokio::spawn(poll_geometry(
        LocalTerminal,
        resize_tx,
        RESIZE_POLL_INTERVAL,
        stop_rx,
    ));

    let (input_tx, mut input_rx) = mpsc::channel(32);
    let input_task = tokio::spawn(forward_input(input, input_tx));

    let mut window_error = None;
    let pumped = pump(channel, &mut input_rx, &mut resize_rx, &mut window_error).await;

    // The shell is gone: stop polling and collect its outcome.
    let _ = stop_tx.send(());
    input_task.abort();
    let poll_error = match poller.await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e),
        Err(e) => Some(Error::Terminal(io::Error::other(e.to_string()))),
    };

    Ok(TerminalExit {
        exit_status: pumped?,
        resize_error: poll_error.or(window_error),
    })
}

/// Shuttle bytes between the channel and the local terminal until the channel closes.
async fn pump(
    channel: &mut Channel<Msg>,
    input: &mut mpsc::Receiver<Vec<u8>>,
    resizes: &mut mpsc::Receiver<Geometry>,
    window_error: &mut Option<Error>,
) -> Result<Option<u32>> {
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let mut exit_status = None;
    let mut input_open = true;
    let mut resizes_open = true;

    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { ref data }) => {
                    stdout.write_all(data).await.map_err(Error::Terminal)?;
                    stdout.flush().await.map_err(Error::Terminal)?;
                }
                Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                    stderr.write_all(data).await.map_err(Error::Terminal)?;
                    stderr.flush().await.map_err(Error::Terminal)?;
                }
                Some(ChannelMsg::ExitStatus { exit_status: code }) => {
                    tracing::debug!("remote shell exited with {}", code);
                    exit_status = Some(code);
                }
                Some(ChannelMsg::Close) | None => return Ok(exit_status),
                Some(_) => {}
            },
            bytes = input.recv(), if input_open => match bytes {
                Some(bytes) => channel
                    .data(&bytes[..])
                    .await
                    .map_err(|e| Error::CommandFailed(format!("send input: {}", e)))?,
                None => {
                    input_open = false;
                    if let Err(e) = channel.eof().await {
                        tracing::debug!("sending eof failed: {}", e);
                    }
                }
            },
            geometry = resizes.recv(), if resizes_open => match geometry {
                Some(Geometry { rows, cols }) => {
                    if let Err(e) = channel
                        .window_change(u32::from(cols), u32::from(rows), 0, 0)
                        .await
                    {
                        tracing::warn!("window change failed: {}", e);
                        window_error.get_or_insert(Error::WindowChange(e.to_string()));
                    }
                }
                None => resizes_open = false,
            },
        }
    }
}

async fn forward_input<R: AsyncRead + Unpin>(mut input: R, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = vec![0u8; 1024];
    loop {
        match input.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("terminal input read failed: {}", e);
                break;
            }
        }
    }
}
