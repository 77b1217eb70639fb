// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{ArgGroup, Args, CommandFactory, FromArgMatches, Parser, Subcommand};

use crate::app::services::submit_file::check_environment_entry;

#[derive(Parser, Debug)]
#[command(
    name = "htcrun",
    version,
    about = "Package a unit of work, run it on an HTCondor pool over SSH and collect its artifacts.",
    long_about = None,
    after_help = "Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < HTCRUN_CONFIG_PATH < command-line flags.\n\
If --config is omitted, htcrun tries HTCRUN_CONFIG_PATH, then the default config file location.\n\
Exit status is 0 when the job completed cleanly and 1 otherwise."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, htcrun uses HTCRUN_CONFIG_PATH if set, otherwise the default config file location."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        short,
        long,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging and include logs from dependencies. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit one job, wait for it to finish and move its artifacts into the results dir.
    Run(RunArgs),
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("payload").required(true).args(["source", "prebuilt"])))]
pub struct RunArgs {
    #[arg(
        long,
        value_name = "ID",
        help = "Unique job id; names the remote work and results directories."
    )]
    pub job_id: String,
    #[arg(
        long,
        value_name = "FILE",
        requires = "entrypoint",
        help = "Python source embedded into the entry script."
    )]
    pub source: Option<PathBuf>,
    #[arg(
        long,
        value_name = "NAME",
        requires = "source",
        help = "Function in --source called with the input document as keyword arguments."
    )]
    pub entrypoint: Option<String>,
    #[arg(
        long,
        value_name = "FILE",
        help = "Prebuilt executable run as `./payload input.json` instead of a Python entrypoint."
    )]
    pub prebuilt: Option<PathBuf>,
    #[arg(long, value_name = "FILE", help = "JSON object passed to the payload.")]
    pub input: Option<PathBuf>,
    #[arg(
        long,
        value_name = "KEY",
        help = "Wrap the input document as { KEY: <input> } before upload."
    )]
    pub wrap_input: Option<String>,
    #[arg(long, value_name = "N")]
    pub cpus: Option<u32>,
    #[arg(long, value_name = "KIB")]
    pub disk: Option<u64>,
    #[arg(long, value_name = "MIB")]
    pub memory: Option<u64>,
    #[arg(long, value_name = "NAME", help = "Value of +JobFlavour.")]
    pub flavour: Option<String>,
    #[arg(
        long = "env",
        value_name = "KEY=VALUE",
        value_parser = parse_env_pair,
        help = "Extra job environment variable; may be repeated. Overrides [environment] entries."
    )]
    pub env: Vec<(String, String)>,
    #[arg(
        long,
        value_name = "SECS",
        help = "Seconds between status polls. Overrides `poll_interval_secs` from the config file."
    )]
    pub poll_interval_secs: Option<u64>,
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    check_environment_entry(key, value)?;
    Ok((key.to_string(), value.to_string()))
}

pub fn cli_command() -> clap::Command {
    Opts::command()
}

pub fn parse_opts() -> ParsedOpts {
    let matches = cli_command().get_matches();
    let verbose_override = if matches.get_flag("verbose") {
        Some(true)
    } else {
        None
    };
    let opts = Opts::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    ParsedOpts {
        opts,
        verbose_override,
    }
}
