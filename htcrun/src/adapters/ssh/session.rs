// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::anyhow;
use russh::client::Config;
use russh::keys::known_hosts::{learn_known_hosts, learn_known_hosts_path};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

mod auth;
mod exec;
mod sftp;

/// russh client handler; only server key verification is customised.
#[derive(Clone, Debug)]
pub(crate) struct ClientHandler {
    host: String,
    addr: SocketAddr,
    known_hosts_path: Option<PathBuf>,
}

impl ClientHandler {
    fn new(host: String, addr: SocketAddr, known_hosts_path: Option<PathBuf>) -> Self {
        Self {
            host,
            addr,
            known_hosts_path,
        }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;
    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        verify_server_key(
            &self.host,
            self.addr,
            server_public_key,
            self.known_hosts_path.as_deref(),
        )
    }
}

/// Parameters for establishing the SSH connection.
#[derive(Clone, PartialEq, Eq)]
pub struct SshParams {
    /// Original hostname or IP used for known_hosts lookup.
    pub host: String,
    pub addr: SocketAddr,
    pub username: String,
    pub identity_path: Option<String>,
    /// Used for password auth and to answer keyboard-interactive prompts.
    pub password: Option<String>,
    pub known_hosts_path: Option<PathBuf>,
    pub keepalive_secs: u64,
    pub idle_timeout_secs: u64,
}

impl std::fmt::Debug for SshParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshParams")
            .field("host", &self.host)
            .field("addr", &self.addr)
            .field("username", &self.username)
            .field("identity_path", &self.identity_path)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("known_hosts_path", &self.known_hosts_path)
            .field("keepalive_secs", &self.keepalive_secs)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .finish()
    }
}

fn check_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<bool, russh::keys::Error> {
    match known_hosts_path {
        Some(path) => russh::keys::check_known_hosts_path(host, port, key, path),
        None => russh::keys::check_known_hosts(host, port, key),
    }
}

fn learn_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<(), russh::keys::Error> {
    match known_hosts_path {
        Some(path) => learn_known_hosts_path(host, port, key, path),
        None => learn_known_hosts(host, port, key),
    }
}

/// Accepts keys already in known_hosts (by hostname, then by IP) and learns unknown ones.
/// A mismatching key is rejected.
fn verify_server_key(
    host: &str,
    addr: SocketAddr,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<bool, anyhow::Error> {
    let port = addr.port();
    let mut candidates = vec![host.to_string()];
    let ip_host = addr.ip().to_string();
    if ip_host != host {
        candidates.push(ip_host);
    }

    for candidate in &candidates {
        match check_known_hosts_for(candidate, port, key, known_hosts_path) {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(err) => {
                log::warn!("server key validation failed for {host}:{port}: {err}");
                return Err(anyhow!(
                    "server key validation failed for {host}:{port}: {err}"
                ));
            }
        }
    }

    log::info!(
        "server key for {host}:{port} is not present in known_hosts (tried {}); learning",
        candidates.join(", ")
    );
    learn_known_hosts_for(host, port, key, known_hosts_path).map_err(|err| {
        log::warn!("failed to learn server key for {host}:{port}: {err}");
        anyhow!("failed to learn server key for {host}:{port}: {err}")
    })?;
    Ok(true)
}

/// Owns the single long-lived SSH connection behind a command channel.
pub struct SessionManager {
    params: SshParams,
    config: Arc<Config>,
    // Commands are serialized on this lock.
    handle: Arc<Mutex<Option<russh::client::Handle<ClientHandler>>>>,
    keepalive_task_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl SessionManager {
    pub fn new(params: SshParams) -> Self {
        let keepalive = (params.keepalive_secs > 0)
            .then(|| Duration::from_secs(params.keepalive_secs));
        let inactivity = (params.idle_timeout_secs > 0)
            .then(|| Duration::from_secs(params.idle_timeout_secs));
        let cfg = Config {
            inactivity_timeout: inactivity,
            keepalive_interval: keepalive,
            channel_buffer_size: 64,
            window_size: 1024 * 1024,
            ..Default::default()
        };
        Self {
            params,
            config: Arc::new(cfg),
            handle: Arc::new(Mutex::new(None)),
            keepalive_task_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn params(&self) -> &SshParams {
        &self.params
    }

    pub async fn is_connected(&self) -> bool {
        let handle_field = self.handle.lock().await;
        matches!(handle_field.as_ref(), Some(h) if !h.is_closed())
    }

    /// Disconnects and drops the handle. Safe to call more than once.
    pub async fn shutdown(&self) {
        if let Some(task) = self.keepalive_task_handle.lock().await.take() {
            task.abort();
        }
        let mut handle_field = self.handle.lock().await;
        if let Some(handle) = handle_field.take() {
            if let Err(err) = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await
            {
                log::debug!("error while disconnecting: {err}");
            }
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Ok(mut task) = self.keepalive_task_handle.try_lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}
