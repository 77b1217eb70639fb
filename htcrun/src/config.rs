// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::app::services::submit_file::check_environment_entry;
use crate::app::types::SshConfig;

const APP_DIR_NAME: &str = "htcrun";
const CONFIG_FILE_NAME: &str = "htcrun.toml";
const CONFIG_ENV_VAR: &str = "HTCRUN_CONFIG_PATH";
const DEFAULT_PASSWORD_ENV: &str = "HTCRUN_PASSWORD";
const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_KEEPALIVE_SECS: u64 = 30;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 0;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    password_env: Option<String>,
    identity_path: Option<String>,
    known_hosts_path: Option<String>,
    keepalive_secs: Option<u64>,
    idle_timeout_secs: Option<u64>,
    poll_interval_secs: Option<u64>,
    base_work_dir: Option<String>,
    base_results_dir: Option<String>,
    verbose: Option<bool>,
    #[serde(default)]
    packages: BTreeMap<String, String>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
    entrypoint_prelude: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct Config {
    pub ssh: SshConfig,
    pub poll_interval_secs: u64,
    /// Remote base for per-job work dirs: `<base_work_dir>/jobs/<job_id>`.
    pub base_work_dir: String,
    /// Remote base for per-job results: `<base_results_dir>/jobs/<job_id>`.
    pub base_results_dir: String,
    pub verbose: bool,
    /// Import name → pinned version for dependency discovery.
    pub packages: BTreeMap<String, String>,
    /// Variables passed to every job, in name order (TOML table order is not kept).
    pub environment: BTreeMap<String, String>,
    /// `None` keeps the built-in prelude.
    pub entrypoint_prelude: Option<Vec<String>>,
    #[allow(dead_code)]
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub host: ConfigValue<String>,
    pub port: ConfigValue<u16>,
    /// Where the password came from; the value itself is never reported.
    pub password_source: Option<ConfigSource>,
    pub poll_interval_secs: ConfigValue<u64>,
    pub verbose: ConfigValue<bool>,
    pub packages: usize,
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub poll_interval_secs: Option<u64>,
    pub verbose: Option<bool>,
}

#[allow(dead_code)]
pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

fn pick<T>(override_value: Option<T>, file_value: Option<T>, default: T) -> (T, ConfigSource) {
    match override_value {
        Some(value) => (value, ConfigSource::Override),
        None => match file_value {
            Some(value) => (value, ConfigSource::ConfigFile),
            None => (default, ConfigSource::Default),
        },
    }
}

fn required(value: Option<String>, key: &str) -> Result<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .with_context(|| format!("`{key}` must be set in the config file"))
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required_file) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required_file)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());

    let host = required(file_config.host, "host")?;
    let username = required(file_config.username, "username")?;
    let base_work_dir = required(file_config.base_work_dir, "base_work_dir")?;
    let base_results_dir = required(file_config.base_results_dir, "base_results_dir")?;

    let (port, port_source) = pick(None, file_config.port, DEFAULT_SSH_PORT);
    if port == 0 {
        anyhow::bail!("port must be between 1 and 65535");
    }
    let (poll_interval_secs, poll_source) = pick(
        overrides.poll_interval_secs,
        file_config.poll_interval_secs,
        DEFAULT_POLL_INTERVAL_SECS,
    );
    let (verbose, verbose_source) = pick(overrides.verbose, file_config.verbose, false);

    for (key, value) in &file_config.environment {
        check_environment_entry(key, value)
            .map_err(|reason| anyhow::anyhow!("invalid [environment] entry: {reason}"))?;
    }

    let password_env = file_config
        .password_env
        .unwrap_or_else(|| DEFAULT_PASSWORD_ENV.to_string());
    let (password, password_source) = match file_config.password {
        Some(password) => (Some(password), Some(ConfigSource::ConfigFile)),
        None => match std::env::var(&password_env) {
            Ok(password) if !password.is_empty() => (Some(password), Some(ConfigSource::Env)),
            _ => (None, None),
        },
    };

    let ssh = SshConfig {
        host: host.clone(),
        port,
        username,
        password,
        identity_path: file_config
            .identity_path
            .map(|raw| resolve_path(&raw, base_dir).to_string_lossy().into_owned()),
        known_hosts_path: file_config
            .known_hosts_path
            .map(|raw| resolve_path(&raw, base_dir)),
        keepalive_secs: file_config.keepalive_secs.unwrap_or(DEFAULT_KEEPALIVE_SECS),
        idle_timeout_secs: file_config
            .idle_timeout_secs
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
    };

    let config = Config {
        ssh,
        poll_interval_secs,
        base_work_dir,
        base_results_dir,
        verbose,
        packages: file_config.packages,
        environment: file_config.environment,
        entrypoint_prelude: file_config.entrypoint_prelude,
        config_path: config_path.clone(),
    };

    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        host: ConfigValue {
            value: host,
            source: ConfigSource::ConfigFile,
        },
        port: ConfigValue {
            value: port,
            source: port_source,
        },
        password_source,
        poll_interval_secs: ConfigValue {
            value: poll_interval_secs,
            source: poll_source,
        },
        verbose: ConfigValue {
            value: verbose,
            source: verbose_source,
        },
        packages: config.packages.len(),
    };

    Ok(LoadResult { config, report })
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const MINIMAL: &str = "host = \"lxplus.cern.ch\"\n\
username = \"dc3\"\n\
base_work_dir = \"/afs/cern.ch/work/d/dc3\"\n\
base_results_dir = \"/eos/user/d/dc3\"\n";

    struct EnvVarGuard {
        key: &'static str,
        prev: Option<OsString>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var_os(key);
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, prev }
        }

        fn clear(key: &'static str) -> Self {
            let prev = std::env::var_os(key);
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, prev }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match &self.prev {
                Some(value) => {
                    // SAFETY: tests serialize env mutations with ENV_LOCK.
                    unsafe {
                        std::env::set_var(self.key, value);
                    }
                }
                None => {
                    // SAFETY: tests serialize env mutations with ENV_LOCK.
                    unsafe {
                        std::env::remove_var(self.key);
                    }
                }
            }
        }
    }

    fn write_config(dir: &TempDir, extra: &str) -> PathBuf {
        let config_dir = dir.path().join("config");
        fs::create_dir_all(&config_dir).unwrap();
        let config_path = config_dir.join("htcrun.toml");
        fs::write(&config_path, format!("{MINIMAL}{extra}")).unwrap();
        config_path
    }

    #[test]
    fn missing_optional_config_file_is_ok() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("missing.toml");
        let cfg = read_config_file(&config_path, false).unwrap();
        assert!(cfg.host.is_none());
        assert!(cfg.packages.is_empty());
    }

    #[test]
    fn missing_required_config_file_errors() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("missing.toml");
        let err = read_config_file(&config_path, true).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "hostname = \"typo\"\n");
        let err = load(Some(config_path), Overrides::default()).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config file"));
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _pw = EnvVarGuard::clear(DEFAULT_PASSWORD_ENV);
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "");

        let LoadResult { config, report } =
            load_with_report(Some(config_path.clone()), Overrides::default()).unwrap();
        assert_eq!(config.ssh.host, "lxplus.cern.ch");
        assert_eq!(config.ssh.port, DEFAULT_SSH_PORT);
        assert_eq!(config.ssh.username, "dc3");
        assert_eq!(config.ssh.password, None);
        assert_eq!(config.ssh.keepalive_secs, DEFAULT_KEEPALIVE_SECS);
        assert_eq!(config.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(config.base_work_dir, "/afs/cern.ch/work/d/dc3");
        assert!(config.entrypoint_prelude.is_none());
        assert!(!config.verbose);
        assert_eq!(config.config_path, Some(config_path));
        assert_eq!(report.poll_interval_secs.source, ConfigSource::Default);
        assert_eq!(report.password_source, None);
    }

    #[test]
    fn missing_host_is_an_error() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("htcrun.toml");
        fs::write(&config_path, "username = \"dc3\"\n").unwrap();
        let err = load(Some(config_path), Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("`host`"));
    }

    #[test]
    fn resolves_relative_identity_path_from_config_dir() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "identity_path = \"keys/id_ed25519\"\n");
        let config = load(Some(config_path.clone()), Overrides::default()).unwrap();
        let expected = config_path.parent().unwrap().join("keys").join("id_ed25519");
        assert_eq!(
            config.ssh.identity_path.as_deref(),
            Some(expected.to_string_lossy().as_ref())
        );
    }

    #[test]
    fn reads_tables_and_prelude() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(
            &dir,
            "entrypoint_prelude = [\"import os\"]\n\
[packages]\nnumpy = \"1.26.4\"\nlibdc3 = \"0.4.2\"\n\
[environment]\nCERT_FPATH = \"/eos/certs/cert.pem\"\n",
        );
        let config = load(Some(config_path), Overrides::default()).unwrap();
        assert_eq!(config.packages.get("numpy").map(String::as_str), Some("1.26.4"));
        assert_eq!(config.packages.len(), 2);
        assert_eq!(
            config.environment.get("CERT_FPATH").map(String::as_str),
            Some("/eos/certs/cert.pem")
        );
        assert_eq!(config.entrypoint_prelude, Some(vec!["import os".to_string()]));
    }

    #[test]
    fn overrides_take_precedence_over_file_config() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "poll_interval_secs = 30\nverbose = false\n");

        let LoadResult { config, report } = load_with_report(
            Some(config_path),
            Overrides {
                poll_interval_secs: Some(2),
                verbose: Some(true),
            },
        )
        .unwrap();

        assert_eq!(config.poll_interval_secs, 2);
        assert!(config.verbose);
        assert_eq!(report.poll_interval_secs.source, ConfigSource::Override);
        assert_eq!(report.verbose.source, ConfigSource::Override);
    }

    #[test]
    fn password_is_read_from_named_env_var() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = EnvVarGuard::set("HTCRUN_TEST_SECRET", "s3cret");
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "password_env = \"HTCRUN_TEST_SECRET\"\n");

        let LoadResult { config, report } =
            load_with_report(Some(config_path), Overrides::default()).unwrap();
        assert_eq!(config.ssh.password.as_deref(), Some("s3cret"));
        assert_eq!(report.password_source, Some(ConfigSource::Env));
    }

    #[test]
    fn password_in_file_wins_over_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = EnvVarGuard::set(DEFAULT_PASSWORD_ENV, "from-env");
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "password = \"from-file\"\n");

        let config = load(Some(config_path), Overrides::default()).unwrap();
        assert_eq!(config.ssh.password.as_deref(), Some("from-file"));
    }

    #[test]
    fn env_config_path_used_when_no_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = EnvVarGuard::clear(CONFIG_ENV_VAR);
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "port = 2222\n");
        let _env = EnvVarGuard::set(CONFIG_ENV_VAR, config_path.to_str().unwrap());

        let LoadResult { config, report } =
            load_with_report(None, Overrides::default()).unwrap();
        assert_eq!(config.ssh.port, 2222);
        assert_eq!(config.config_path, Some(config_path));
        assert_eq!(report.config_path_source, Some(ConfigSource::Env));
    }

    #[test]
    fn cli_config_path_takes_precedence_over_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = EnvVarGuard::clear(CONFIG_ENV_VAR);
        let env_dir = TempDir::new().unwrap();
        let cli_dir = TempDir::new().unwrap();
        let env_path = write_config(&env_dir, "port = 2201\n");
        let cli_path = write_config(&cli_dir, "port = 2202\n");
        let _env = EnvVarGuard::set(CONFIG_ENV_VAR, env_path.to_str().unwrap());

        let LoadResult { config, report } =
            load_with_report(Some(cli_path.clone()), Overrides::default()).unwrap();
        assert_eq!(config.ssh.port, 2202);
        assert_eq!(config.config_path, Some(cli_path));
        assert_eq!(report.config_path_source, Some(ConfigSource::Override));
    }

    #[test]
    fn zero_port_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "port = 0\n");
        let err = load(Some(config_path), Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("port must be between"));
    }

    #[test]
    fn environment_value_with_whitespace_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "[environment]\nSSO_CLIENT_SECRET = \"a b\"\n");
        let err = load(Some(config_path), Overrides::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("invalid [environment] entry"));
        assert!(message.contains("SSO_CLIENT_SECRET"));
    }

    #[test]
    fn environment_is_ordered_by_name() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "[environment]\nZED = \"1\"\nALPHA = \"2\"\n");
        let config = load(Some(config_path), Overrides::default()).unwrap();
        let keys: Vec<&str> = config.environment.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["ALPHA", "ZED"]);
    }
}
