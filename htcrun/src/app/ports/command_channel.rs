// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::services::shell::sh_escape;

/// Stdout sentinel printed by the existence probes.
pub const EXISTS_SENTINEL: &str = "Success";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecCapture {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl ExecCapture {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Remote command execution and file transfer over one authenticated connection.
///
/// Every call waits for the remote side to finish. The filesystem helpers are built on
/// [`CommandChannel::run`] and ignore exit codes: `list_dir` and `read_file` return
/// empty output when the remote command fails, and the mutating helpers leave it to later calls
/// to surface a problem.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    async fn run(&self, command: &str) -> AppResult<ExecCapture>;

    async fn put_text(&self, content: &str, remote_path: &str) -> AppResult<()>;

    async fn put_file(&self, local_path: &Path, remote_path: &str) -> AppResult<()>;

    /// Releases the transport. Further calls fail.
    async fn close(&self) -> AppResult<()>;

    async fn list_dir(&self, path: &str) -> AppResult<Vec<String>> {
        let capture = self.run(&format!("ls -A -- {}", sh_escape(path))).await?;
        Ok(capture
            .stdout_text()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn read_file(&self, path: &str) -> AppResult<String> {
        let capture = self.run(&format!("cat -- {}", sh_escape(path))).await?;
        Ok(capture.stdout_text())
    }

    async fn make_dir(&self, path: &str) -> AppResult<()> {
        self.run(&format!("mkdir -p -- {}", sh_escape(path)))
            .await
            .map(|_| ())
    }

    async fn move_path(&self, from: &str, to: &str) -> AppResult<()> {
        self.run(&format!("mv -- {} {}", sh_escape(from), sh_escape(to)))
            .await
            .map(|_| ())
    }

    async fn remove(&self, path: &str, recursive: bool) -> AppResult<()> {
        let base = if recursive { "rm -rf" } else { "rm" };
        self.run(&format!("{base} -- {}", sh_escape(path)))
            .await
            .map(|_| ())
    }

    async fn make_executable(&self, path: &str) -> AppResult<()> {
        self.run(&format!("chmod +x -- {}", sh_escape(path)))
            .await
            .map(|_| ())
    }

    async fn file_exists(&self, path: &str) -> AppResult<bool> {
        self.probe("-f", path).await
    }

    async fn dir_exists(&self, path: &str) -> AppResult<bool> {
        self.probe("-d", path).await
    }

    async fn probe(&self, flag: &str, path: &str) -> AppResult<bool> {
        let capture = self
            .run(&format!(
                "test {flag} {} && echo {EXISTS_SENTINEL}",
                sh_escape(path)
            ))
            .await?;
        Ok(capture.stdout_text().trim() == EXISTS_SENTINEL)
    }
}
