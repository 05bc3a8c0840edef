// ABOUTME: File upload over the SFTP subsystem.
// ABOUTME: Copies a local file in fixed-size chunks, then sets the remote permission mode.

use super::error::{Error, Result};
use super::transport::AcceptAnyHost;
use russh::client::Handle;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::FileAttributes;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const UPLOAD_BUFFER_SIZE: usize = 1024 * 1024;

/// Failure side of a chunked copy.
#[derive(Debug)]
pub enum CopyError {
    Read(std::io::Error),
    Write(std::io::Error),
}

/// Copy `source` into `dest` through a `buffer_size` buffer until a read returns 0.
pub async fn copy_chunks<R, W>(
    source: &mut R,
    dest: &mut W,
    buffer_size: usize,
) -> std::result::Result<u64, CopyError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let mut copied = 0u64;
    loop {
        let n = source.read(&mut buf).await.map_err(CopyError::Read)?;
        if n == 0 {
            break;
        }
        dest.write_all(&buf[..n]).await.map_err(CopyError::Write)?;
        copied += n as u64;
    }
    dest.flush().await.map_err(CopyError::Write)?;
    Ok(copied)
}

/// Upload `local` to `remote` and chmod it to `mode`. Returns bytes copied.
///
/// A failed upload may leave a partial remote file behind.
pub async fn upload(
    handle: &Handle<AcceptAnyHost>,
    local: &Path,
    remote: &str,
    mode: u32,
) -> Result<u64> {
    let channel = handle
        .channel_open_session()
        .await
        .map_err(|e| Error::Sftp(e.to_string()))?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|e| Error::Sftp(e.to_string()))?;
    let sftp = SftpSession::new(channel.into_stream())
        .await
        .map_err(|e| Error::Sftp(e.to_string()))?;

    let result = copy_to_remote(&sftp, local, remote, mode).await;

    if let Err(e) = sftp.close().await {
        tracing::debug!("sftp close failed: {}", e);
    }
    result
}

async fn copy_to_remote(sftp: &SftpSession, local: &Path, remote: &str, mode: u32) -> Result<u64> {
    let mut source = tokio::fs::File::open(local)
        .await
        .map_err(|source| Error::LocalFile {
            path: local.to_path_buf(),
            source,
        })?;

    let mut dest = sftp
        .create(remote)
        .await
        .map_err(|e| Error::RemoteCreate {
            path: remote.to_string(),
            reason: e.to_string(),
        })?;

    let copied = copy_chunks(&mut source, &mut dest, UPLOAD_BUFFER_SIZE).await;

    if let Err(e) = dest.shutdown().await {
        tracing::debug!("closing remote file {} failed: {}", remote, e);
    }

    let copied = copied.map_err(|e| match e {
        CopyError::Read(source) => Error::LocalFile {
            path: local.to_path_buf(),
            source,
        },
        CopyError::Write(e) => Error::RemoteWrite {
            path: remote.to_string(),
            reason: e.to_string(),
        },
    })?;

    let mut attrs = FileAttributes::empty();
    attrs.permissions = Some(mode);
    sftp.set_metadata(remote, attrs)
        .await
        .map_err(|e| Error::RemoteChmod {
            path: remote.to_string(),
            mode,
            reason: e.to_string(),
        })?;

    tracing::debug!("uploaded {} bytes to {} (mode {:o})", copied, remote, mode);
    Ok(copied)
}
