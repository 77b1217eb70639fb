// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

use crate::app::errors::{AppResult, invalid_argument};
use crate::app::types::ResourceProfile;

pub const UNIVERSE: &str = "vanilla";
pub const STDOUT_PATTERN: &str = "$(ClusterId)_$(ProcId).out";
pub const STDERR_PATTERN: &str = "$(ClusterId)_$(ProcId).err";
pub const LOG_PATTERN: &str = "$(ClusterId).log";

/// One line of a submit description. A directive without a value renders as a bare keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub key: String,
    pub value: Option<String>,
}

impl Directive {
    fn pair(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: Some(value.into()),
        }
    }

    fn bare(key: &str) -> Self {
        Self {
            key: key.to_string(),
            value: None,
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{} = {}", self.key, value),
            None => f.write_str(&self.key),
        }
    }
}

/// Ordered directive set handed to `condor_submit`. Order matters: `queue` must come last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitDescriptor {
    directives: Vec<Directive>,
}

impl SubmitDescriptor {
    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    pub fn get(&self, key: &str) -> Option<&Directive> {
        self.directives.iter().find(|d| d.key == key)
    }

    pub fn render(&self) -> String {
        self.directives
            .iter()
            .map(Directive::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn render_submit_descriptor(
    profile: &ResourceProfile,
    executable: &str,
    input_files: &[&str],
) -> SubmitDescriptor {
    let directives = vec![
        Directive::pair("universe", UNIVERSE),
        Directive::pair("executable", executable),
        Directive::pair("transfer_input_files", input_files.join(", ")),
        Directive::pair("+JobFlavour", format!("\"{}\"", profile.job_flavour)),
        Directive::pair("output", STDOUT_PATTERN),
        Directive::pair("error", STDERR_PATTERN),
        Directive::pair("log", LOG_PATTERN),
        Directive::pair("RequestCpus", profile.cpus.to_string()),
        Directive::pair("RequestDisk", profile.disk.to_string()),
        Directive::pair("RequestMemory", profile.memory.to_string()),
        Directive::pair("environment", environment_string(&profile.environment)),
        Directive::bare("queue"),
    ];
    SubmitDescriptor { directives }
}

/// Rejects entries the quoted space-separated form cannot carry. Names must be non-empty and
/// free of whitespace, `=` and `"`; values must be free of whitespace and `"`.
pub fn check_environment_entry(key: &str, value: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err(format!("empty variable name for value '{value}'"));
    }
    if key.contains(char::is_whitespace) || key.contains('=') || key.contains('"') {
        return Err(format!(
            "variable name '{key}' must not contain whitespace, '=' or double quotes"
        ));
    }
    if value.contains(char::is_whitespace) || value.contains('"') {
        return Err(format!(
            "value for {key} must not contain whitespace or double quotes"
        ));
    }
    Ok(())
}

pub fn validate_environment(environment: &[(String, String)]) -> AppResult<()> {
    for (key, value) in environment {
        check_environment_entry(key, value).map_err(invalid_argument)?;
    }
    Ok(())
}

/// `"K1=V1 K2=V2"`, quotes included.
pub fn environment_string(environment: &[(String, String)]) -> String {
    let joined = environment
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!("\"{joined}\"")
}

/// Splits an environment directive value back into pairs, the way the
/// scheduler reads the quoted space-separated form.
pub fn split_environment(value: &str) -> Vec<(String, String)> {
    let inner = value.trim();
    let inner = inner
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(inner);
    inner
        .split_whitespace()
        .filter_map(|token| {
            let (key, value) = token.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(environment: Vec<(&str, &str)>) -> ResourceProfile {
        ResourceProfile {
            cpus: 1,
            disk: 252_000,
            memory: 10_240,
            environment: environment
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..ResourceProfile::default()
        }
    }

    #[test]
    fn renders_directives_in_scheduler_order() {
        let descriptor = render_submit_descriptor(
            &profile(vec![("CERT_FPATH", "/c.pem"), ("KEY_FPATH", "/k.pem")]),
            "main.sh",
            &["main.py", "input.json"],
        );
        let expected = "universe = vanilla\n\
executable = main.sh\n\
transfer_input_files = main.py, input.json\n\
+JobFlavour = \"espresso\"\n\
output = $(ClusterId)_$(ProcId).out\n\
error = $(ClusterId)_$(ProcId).err\n\
log = $(ClusterId).log\n\
RequestCpus = 1\n\
RequestDisk = 252000\n\
RequestMemory = 10240\n\
environment = \"CERT_FPATH=/c.pem KEY_FPATH=/k.pem\"\n\
queue";
        assert_eq!(descriptor.render(), expected);
    }

    #[test]
    fn queue_is_last_and_bare() {
        for cpus in [1, 4, 64] {
            let mut p = profile(vec![]);
            p.cpus = cpus;
            let descriptor = render_submit_descriptor(&p, "main.sh", &["main.py", "input.json"]);
            let last = descriptor.directives().last().unwrap();
            assert_eq!(last.key, "queue");
            assert!(last.value.is_none());
            let rendered = descriptor.render();
            assert_eq!(rendered.lines().last(), Some("queue"));
            assert!(!rendered.lines().last().unwrap().contains('='));
        }
    }

    #[test]
    fn job_flavour_is_configurable() {
        let mut p = profile(vec![]);
        p.job_flavour = "longlunch".to_string();
        let descriptor = render_submit_descriptor(&p, "main.sh", &["payload", "input.json"]);
        assert_eq!(
            descriptor.get("+JobFlavour").unwrap().value.as_deref(),
            Some("\"longlunch\"")
        );
        assert_eq!(
            descriptor.get("transfer_input_files").unwrap().value.as_deref(),
            Some("payload, input.json")
        );
    }

    #[test]
    fn environment_string_round_trips_in_order() {
        let env = vec![
            ("SSO_CLIENT_ID".to_string(), "dc3".to_string()),
            ("CERT_FPATH".to_string(), "/eos/certs/usercert.pem".to_string()),
            ("A".to_string(), "1=2".to_string()),
        ];
        let rendered = environment_string(&env);
        assert_eq!(
            rendered,
            "\"SSO_CLIENT_ID=dc3 CERT_FPATH=/eos/certs/usercert.pem A=1=2\""
        );
        assert_eq!(split_environment(&rendered), env);
    }

    #[test]
    fn environment_entries_that_cannot_round_trip_are_rejected() {
        assert!(check_environment_entry("SSO_CLIENT_SECRET", "a b").is_err());
        assert!(check_environment_entry("SSO_CLIENT_SECRET", "a\"b").is_err());
        assert!(check_environment_entry("SSO CLIENT", "x").is_err());
        assert!(check_environment_entry("A=B", "x").is_err());
        assert!(check_environment_entry("", "x").is_err());
        assert!(check_environment_entry("A", "1=2").is_ok());
        assert!(check_environment_entry("EMPTY", "").is_ok());

        let env = vec![("SSO_CLIENT_SECRET".to_string(), "a b".to_string())];
        let err = validate_environment(&env).unwrap_err();
        assert_eq!(err.kind(), crate::app::errors::ErrorKind::InvalidArgument);
        assert!(err.message().contains("SSO_CLIENT_SECRET"));
    }

    #[test]
    fn empty_environment_renders_empty_quotes() {
        assert_eq!(environment_string(&[]), "\"\"");
        assert!(split_environment("\"\"").is_empty());
    }
}
