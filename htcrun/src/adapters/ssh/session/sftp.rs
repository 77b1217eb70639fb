// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result, anyhow};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags};
use std::path::Path;
use tokio::fs as tokiofs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::SessionManager;

const UPLOAD_BLOCK_SIZE: usize = 64 * 1024;

fn upload_flags() -> OpenFlags {
    OpenFlags::WRITE
        .union(OpenFlags::CREATE)
        .union(OpenFlags::TRUNCATE)
}

fn upload_attributes(permissions: u32) -> FileAttributes {
    FileAttributes {
        permissions: Some(permissions),
        ..Default::default()
    }
}

impl SessionManager {
    async fn sftp(&self) -> Result<SftpSession> {
        let guard = self.handle.lock().await;
        let handle = guard
            .as_ref()
            .ok_or_else(|| anyhow!("SSH connection is not open"))?;
        let channel = handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        Ok(sftp)
    }

    /// Writes `content` to `remote_path`, replacing any existing file.
    pub async fn put_bytes(&self, content: &[u8], remote_path: &str) -> Result<()> {
        let sftp = self.sftp().await?;
        log::debug!("uploading {} bytes to {remote_path}", content.len());
        let mut file = sftp
            .open_with_flags_and_attributes(remote_path, upload_flags(), upload_attributes(0o644))
            .await
            .with_context(|| format!("open remote file {remote_path}"))?;
        file.write_all(content)
            .await
            .with_context(|| format!("write remote file {remote_path}"))?;
        file.flush().await?;
        file.shutdown().await?;
        let _ = sftp.close().await;
        Ok(())
    }

    /// Streams a local file to `remote_path`, keeping it executable.
    pub async fn put_local_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let mut local = tokiofs::File::open(local_path)
            .await
            .with_context(|| format!("open local file {}", local_path.display()))?;
        let sftp = self.sftp().await?;
        log::debug!(
            "uploading file over sftp: {} -> {remote_path}",
            local_path.display()
        );
        let mut remote = sftp
            .open_with_flags_and_attributes(remote_path, upload_flags(), upload_attributes(0o755))
            .await
            .with_context(|| format!("open remote file {remote_path}"))?;
        let mut buf = vec![0u8; UPLOAD_BLOCK_SIZE];
        loop {
            let n = local.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            remote
                .write_all(&buf[..n])
                .await
                .with_context(|| format!("write remote file {remote_path}"))?;
        }
        remote.flush().await?;
        remote.shutdown().await?;
        let _ = sftp.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uploads_truncate_existing_files() {
        let flags = upload_flags();
        assert!(flags.contains(OpenFlags::WRITE));
        assert!(flags.contains(OpenFlags::CREATE));
        assert!(flags.contains(OpenFlags::TRUNCATE));
        assert!(!flags.contains(OpenFlags::APPEND));
    }

    #[test]
    fn upload_attributes_only_set_permissions() {
        let attrs = upload_attributes(0o755);
        assert_eq!(attrs.permissions, Some(0o755));
        assert_eq!(attrs.size, None);
    }
}
