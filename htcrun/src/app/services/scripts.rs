// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::errors::{AppResult, invalid_argument};
use crate::app::services::dependencies::Dependency;

/// Lines run inside the `__main__` block before the entrypoint is called, used to hand
/// credentials from the job environment to the payload's libraries.
pub const DEFAULT_ENTRYPOINT_PRELUDE: &[&str] = &[
    "from libdc3.config import dc3_config",
    "dc3_config.set_auth_cert_path(os.getenv(\"CERT_FPATH\"))",
    "dc3_config.set_auth_key_path(os.getenv(\"KEY_FPATH\"))",
];

pub fn default_prelude() -> Vec<String> {
    DEFAULT_ENTRYPOINT_PRELUDE
        .iter()
        .map(|line| line.to_string())
        .collect()
}

/// Shell script run by the scheduler: isolated venv, pinned installs, then the entrypoint.
pub fn render_bootstrap(dependencies: &[Dependency], entry_script: &str) -> String {
    let mut out = String::from("#!/bin/sh\n\npython3 -m venv venv\n. venv/bin/activate\n");
    if !dependencies.is_empty() {
        let pins = dependencies
            .iter()
            .map(Dependency::requirement)
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&format!("pip install {pins}\n"));
    }
    out.push_str(&format!("python3 {entry_script}\n"));
    out
}

/// Bootstrap for prebuilt payloads: no interpreter, just the artifact and its input.
pub fn render_prebuilt_bootstrap(executable: &str, input_file: &str) -> String {
    format!("#!/bin/sh\n\nchmod +x {executable}\nexec ./{executable} {input_file}\n")
}

/// Embeds `source` verbatim and appends a `__main__` block that loads `input.json`
/// and calls `entrypoint(**input_data)`.
pub fn render_entrypoint_script(
    source: &str,
    entrypoint: &str,
    input_file: &str,
    prelude: &[String],
) -> AppResult<String> {
    validate_entrypoint(entrypoint)?;
    if source.trim().is_empty() {
        return Err(invalid_argument("payload source is empty"));
    }

    let mut out = String::with_capacity(source.len() + 512);
    out.push_str(source.trim_end());
    out.push_str("\n\n\nif __name__ == \"__main__\":\n");
    out.push_str("    import os\n");
    out.push_str("    import json\n\n");
    out.push_str(&format!("    with open(\"{input_file}\") as f:\n"));
    out.push_str("        input_data = json.load(f)\n\n");
    for line in prelude {
        out.push_str("    ");
        out.push_str(line.trim());
        out.push('\n');
    }
    if !prelude.is_empty() {
        out.push('\n');
    }
    out.push_str(&format!("    {entrypoint}(**input_data)\n"));
    Ok(out)
}

fn validate_entrypoint(entrypoint: &str) -> AppResult<()> {
    if entrypoint.is_empty() {
        return Err(invalid_argument("entrypoint name is required"));
    }
    let mut chars = entrypoint.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_');
    if !head_ok || !chars.all(|c| c.is_alphanumeric() || c == '_') {
        return Err(invalid_argument(format!(
            "entrypoint '{entrypoint}' is not a valid function name"
        )));
    }
    Ok(())
}
