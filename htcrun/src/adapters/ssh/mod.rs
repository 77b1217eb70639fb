// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;

use crate::app::errors::{AppError, AppResult, ErrorKind, codes};
use crate::app::ports::{CommandChannel, ExecCapture};
use crate::app::types::SshConfig;

mod error;
mod session;

pub use error::AuthenticationFailure;
pub use session::{SessionManager, SshParams};

/// [`CommandChannel`] over one authenticated SSH connection.
///
/// The connection is opened by [`SshChannel::connect`] and stays open until
/// [`CommandChannel::close`] is called or the channel is dropped.
pub struct SshChannel {
    session: SessionManager,
}

fn ssh_error_code(err: &anyhow::Error) -> &'static str {
    if err.chain().any(|cause| cause.is::<AuthenticationFailure>()) {
        codes::AUTHENTICATION_FAILURE
    } else {
        codes::CONNECTION_FAILURE
    }
}

fn map_connect_error(err: anyhow::Error) -> AppError {
    AppError::with_code(
        ErrorKind::Transport,
        ssh_error_code(&err),
        format!("ssh connect failed: {err:#}"),
    )
}

fn map_exec_error(err: anyhow::Error) -> AppError {
    AppError::with_code(
        ErrorKind::Transport,
        codes::REMOTE_ERROR,
        format!("ssh exec failed: {err:#}"),
    )
}

fn map_upload_error(err: anyhow::Error, remote_path: &str) -> AppError {
    AppError::with_code(
        ErrorKind::Transport,
        codes::REMOTE_ERROR,
        format!("sftp upload failed: {err:#}"),
    )
    .with_context(remote_path.to_string())
}

async fn resolve_params(config: &SshConfig) -> AppResult<SshParams> {
    let addr = tokio::net::lookup_host((config.host.as_str(), config.port))
        .await
        .map_err(|err| {
            AppError::with_code(
                ErrorKind::Transport,
                codes::CONNECTION_FAILURE,
                format!("failed to resolve {}:{}: {err}", config.host, config.port),
            )
        })?
        .next()
        .ok_or_else(|| {
            AppError::with_code(
                ErrorKind::Transport,
                codes::CONNECTION_FAILURE,
                format!("{}:{} did not resolve to any address", config.host, config.port),
            )
        })?;
    Ok(SshParams {
        host: config.host.clone(),
        addr,
        username: config.username.clone(),
        identity_path: config.identity_path.clone(),
        password: config.password.clone(),
        known_hosts_path: config.known_hosts_path.clone(),
        keepalive_secs: config.keepalive_secs,
        idle_timeout_secs: config.idle_timeout_secs,
    })
}

impl SshChannel {
    /// Resolves the host, connects and authenticates. Any failure here is fatal for the caller.
    #[tracing::instrument(
        name = "ssh",
        skip(config),
        fields(op = "connect", host = %config.host, user = %config.username, port = config.port)
    )]
    pub async fn connect(config: &SshConfig) -> AppResult<Self> {
        let params = resolve_params(config).await?;
        let session = SessionManager::new(params);
        session.ensure_connected().await.map_err(map_connect_error)?;
        tracing::info!("ssh channel open");
        Ok(Self { session })
    }

    pub async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }
}

#[async_trait]
impl CommandChannel for SshChannel {
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, command),
        fields(op = "run", host = %self.session.params().host)
    )]
    async fn run(&self, command: &str) -> AppResult<ExecCapture> {
        let (stdout, stderr, exit_code) = self
            .session
            .exec_capture(command)
            .await
            .map_err(map_exec_error)?;
        Ok(ExecCapture {
            stdout,
            stderr,
            exit_code,
        })
    }

    #[tracing::instrument(
        name = "sftp",
        level = "debug",
        skip(self, content),
        fields(op = "put_text", host = %self.session.params().host, bytes = content.len())
    )]
    async fn put_text(&self, content: &str, remote_path: &str) -> AppResult<()> {
        self.session
            .put_bytes(content.as_bytes(), remote_path)
            .await
            .map_err(|err| map_upload_error(err, remote_path))
    }

    #[tracing::instrument(
        name = "sftp",
        level = "debug",
        skip(self),
        fields(op = "put_file", host = %self.session.params().host)
    )]
    async fn put_file(&self, local_path: &Path, remote_path: &str) -> AppResult<()> {
        self.session
            .put_local_file(local_path, remote_path)
            .await
            .map_err(|err| map_upload_error(err, remote_path))
    }

    async fn close(&self) -> AppResult<()> {
        self.session.shutdown().await;
        tracing::info!(host = %self.session.params().host, "ssh channel closed");
        Ok(())
    }
}
