// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result, anyhow};
use russh::client::{AuthResult, KeyboardInteractiveAuthResponse, Prompt};
use russh::keys::PrivateKeyWithHashAlg;
use std::sync::Arc;

use crate::adapters::ssh::AuthenticationFailure;

use super::{ClientHandler, SessionManager};

enum AuthDecision {
    Success,
    KeyboardInteractive,
    Failure,
}

fn auth_decision(result: AuthResult) -> AuthDecision {
    match result {
        AuthResult::Success => AuthDecision::Success,
        AuthResult::Failure {
            remaining_methods, ..
        } if remaining_methods.contains(&russh::MethodKind::KeyboardInteractive) => {
            AuthDecision::KeyboardInteractive
        }
        AuthResult::Failure { .. } => AuthDecision::Failure,
    }
}

/// Answers for one keyboard-interactive round. Hidden prompts get the password; echoed
/// prompts (banners, usernames) get the username.
fn ki_answers(prompts: &[Prompt], username: &str, password: &str) -> Vec<String> {
    prompts
        .iter()
        .map(|prompt| {
            if prompt.echo {
                username.to_string()
            } else {
                password.to_string()
            }
        })
        .collect()
}

impl SessionManager {
    /// Establishes and authenticates the connection unless a live one exists.
    pub async fn ensure_connected(&self) -> Result<()> {
        let mut handle_field = self.handle.lock().await;

        let needs_connect = match handle_field.as_ref() {
            None => true,
            Some(h) if h.is_closed() => true,
            Some(_) => false,
        };
        if !needs_connect {
            log::debug!(
                "don't need to re-establish connection to {}@{}",
                &self.params.username,
                &self.params.addr
            );
            return Ok(());
        }

        log::info!(
            "establishing connection with {}@{}",
            &self.params.username,
            &self.params.addr
        );
        let handler = ClientHandler::new(
            self.params.host.clone(),
            self.params.addr,
            self.params.known_hosts_path.clone(),
        );
        let mut handle = russh::client::connect(self.config.clone(), self.params.addr, handler)
            .await
            .context("SSH connect failed")?;
        log::info!(
            "established connection with {}@{}, proceeding with auth",
            &self.params.username,
            &self.params.addr
        );

        let decision = if let Some(path) = &self.params.identity_path {
            let expanded = shellexpand::tilde(path).into_owned();
            let key = russh::keys::load_secret_key(&expanded, self.params.password.as_deref())
                .with_context(|| format!("failed to load secret key at {expanded}"))?;
            let pk = PrivateKeyWithHashAlg::new(
                Arc::new(key),
                handle.best_supported_rsa_hash().await?.flatten(),
            );
            let result = handle
                .authenticate_publickey(self.params.username.clone(), pk)
                .await?;
            auth_decision(result)
        } else if let Some(password) = &self.params.password {
            let result = handle
                .authenticate_password(self.params.username.clone(), password.clone())
                .await?;
            auth_decision(result)
        } else {
            AuthDecision::KeyboardInteractive
        };

        match decision {
            AuthDecision::Success => {}
            AuthDecision::KeyboardInteractive => self.do_keyboard_interactive(&mut handle).await?,
            AuthDecision::Failure => return Err(AuthenticationFailure.into()),
        }

        *handle_field = Some(handle);
        drop(handle_field);
        self.spawn_keepalive().await;
        Ok(())
    }

    async fn spawn_keepalive(&self) {
        let Some(interval) = self.config.keepalive_interval else {
            return;
        };
        let handle_clone = self.handle.clone();
        let jh = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval / 2);
            loop {
                ticker.tick().await;
                let guard = handle_clone.lock().await;
                let Some(handle) = guard.as_ref() else {
                    break;
                };
                if handle.is_closed() {
                    log::debug!("keepalive handle is closed");
                    break;
                }
                if let Err(e) = handle.send_keepalive(true).await {
                    log::debug!("error when sending a keepalive: {e}");
                }
            }
        });
        if let Some(previous) = self.keepalive_task_handle.lock().await.replace(jh) {
            previous.abort();
        }
    }

    /// Keyboard-interactive loop answered from the configured password.
    async fn do_keyboard_interactive(
        &self,
        handle: &mut russh::client::Handle<ClientHandler>,
    ) -> Result<()> {
        let password = self
            .params
            .password
            .as_deref()
            .ok_or_else(|| anyhow!("server requested keyboard-interactive auth but no password is configured"))?;

        let mut ki = handle
            .authenticate_keyboard_interactive_start(self.params.username.clone(), None)
            .await
            .context("KI start failed")?;

        loop {
            match ki {
                KeyboardInteractiveAuthResponse::Success => return Ok(()),
                KeyboardInteractiveAuthResponse::Failure {
                    remaining_methods,
                    partial_success,
                } => {
                    log::debug!(
                        "authentication failed (partial_success={partial_success}, remaining={remaining_methods:?})"
                    );
                    return Err(AuthenticationFailure.into());
                }
                KeyboardInteractiveAuthResponse::InfoRequest {
                    name,
                    instructions,
                    prompts,
                } => {
                    log::debug!(
                        "keyboard-interactive round '{name}' ({instructions}) with {} prompt(s)",
                        prompts.len()
                    );
                    let answers = ki_answers(&prompts, &self.params.username, password);
                    ki = handle
                        .authenticate_keyboard_interactive_respond(answers)
                        .await
                        .context("KI respond failed")?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthDecision, auth_decision, ki_answers};
    use russh::client::{AuthResult, Prompt};
    use russh::{MethodKind, MethodSet};

    #[test]
    fn auth_decision_success() {
        let decision = auth_decision(AuthResult::Success);
        assert!(matches!(decision, AuthDecision::Success));
    }

    #[test]
    fn auth_decision_keyboard_interactive_when_offered() {
        let methods = [MethodKind::KeyboardInteractive];
        let decision = auth_decision(AuthResult::Failure {
            remaining_methods: MethodSet::from(methods.as_slice()),
            partial_success: true,
        });
        assert!(matches!(decision, AuthDecision::KeyboardInteractive));
    }

    #[test]
    fn auth_decision_failure_without_keyboard_interactive() {
        let methods = [MethodKind::PublicKey];
        let decision = auth_decision(AuthResult::Failure {
            remaining_methods: MethodSet::from(methods.as_slice()),
            partial_success: false,
        });
        let AuthDecision::Failure = decision else {
            panic!("expected auth failure");
        };
    }

    #[test]
    fn ki_answers_fill_hidden_prompts_with_password() {
        let prompts = vec![
            Prompt {
                prompt: "Password: ".into(),
                echo: false,
            },
            Prompt {
                prompt: "Login: ".into(),
                echo: true,
            },
        ];
        assert_eq!(ki_answers(&prompts, "dc3", "secret"), vec!["secret", "dc3"]);
        assert!(ki_answers(&[], "dc3", "secret").is_empty());
    }
}
