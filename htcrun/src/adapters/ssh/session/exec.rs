// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result, anyhow};
use russh::ChannelMsg;

use super::SessionManager;

fn handle_capture_message(
    msg: &ChannelMsg,
    out: &mut Vec<u8>,
    err: &mut Vec<u8>,
    code: &mut i32,
) -> bool {
    match msg {
        ChannelMsg::Data { data } => {
            out.extend_from_slice(data);
            false
        }
        ChannelMsg::ExtendedData { data, ext: 1 } => {
            err.extend_from_slice(data);
            false
        }
        ChannelMsg::ExitStatus { exit_status } => {
            *code = *exit_status as i32;
            false
        }
        ChannelMsg::Close => true,
        _ => false,
    }
}

impl SessionManager {
    /// Runs `cmd` in a fresh session channel and waits for it to close.
    pub async fn exec_capture(&self, cmd: &str) -> Result<(Vec<u8>, Vec<u8>, i32)> {
        let guard = self.handle.lock().await;
        let handle = guard
            .as_ref()
            .ok_or_else(|| anyhow!("SSH connection is not open"))?;
        let mut chan = handle
            .channel_open_session()
            .await
            .context("open session")?;
        log::debug!("executing '{cmd}'");
        chan.exec(true, cmd).await.context("exec request")?;

        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut code: i32 = 0;
        while let Some(msg) = chan.wait().await {
            if handle_capture_message(&msg, &mut out, &mut err, &mut code) {
                break;
            }
        }

        let _ = chan.close().await;
        log::debug!(
            "command finished with exit code {code} ({} bytes stdout, {} bytes stderr)",
            out.len(),
            err.len()
        );
        Ok((out, err, code))
    }
}

#[cfg(test)]
mod tests {
    use super::handle_capture_message;
    use russh::{ChannelMsg, CryptoVec};

    #[test]
    fn handle_capture_message_accumulates_output() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut code = 0;

        let msg = ChannelMsg::Data {
            data: CryptoVec::from_slice(b"Selected best schedd"),
        };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert_eq!(out, b"Selected best schedd");

        let msg = ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(b"warn"),
            ext: 1,
        };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert_eq!(err, b"warn");

        let msg = ChannelMsg::ExitStatus { exit_status: 2 };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert_eq!(code, 2);

        let msg = ChannelMsg::Close;
        assert!(handle_capture_message(&msg, &mut out, &mut err, &mut code));
    }

    #[test]
    fn handle_capture_message_ignores_other_extended_streams() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut code = 0;
        let msg = ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(b"skip"),
            ext: 2,
        };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert!(out.is_empty());
        assert!(err.is_empty());
        assert_eq!(code, 0);
    }
}
