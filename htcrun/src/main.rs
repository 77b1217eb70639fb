// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::watch;

use htcrun::adapters::cli::{self, Command, RunArgs};
use htcrun::adapters::ssh::SshChannel;
use htcrun::app::errors::{AppError, AppResult, invalid_argument, local_error};
use htcrun::app::ports::CommandChannel;
use htcrun::app::services::dependencies::PackageRegistry;
use htcrun::app::services::packager::JobPackager;
use htcrun::app::services::scripts::default_prelude;
use htcrun::app::types::{JobOutcome, JobPaths, Payload, ResourceProfile, UnitOfWork};
use htcrun::app::usecases::BatchOrchestrator;
use htcrun::{config, logging};

fn log_config_report(report: &config::ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => {
            tracing::info!(
                "config path: {} (source={}, present={})",
                path.display(),
                source.as_str(),
                report.config_file_present
            );
        }
        (Some(path), None) => {
            tracing::info!(
                "config path: {} (present={})",
                path.display(),
                report.config_file_present
            );
        }
        (None, _) => {
            tracing::info!("config path: (none)");
        }
    }
    tracing::info!(
        "config host: {}:{} (port source={})",
        report.host.value,
        report.port.value,
        report.port.source.as_str()
    );
    tracing::info!(
        "config password: {}",
        report
            .password_source
            .map(|source| source.as_str())
            .unwrap_or("not set")
    );
    tracing::info!(
        "config poll_interval_secs: {} (source={})",
        report.poll_interval_secs.value,
        report.poll_interval_secs.source.as_str()
    );
    tracing::info!(
        "config verbose: {} (source={})",
        report.verbose.value,
        report.verbose.source.as_str()
    );
    tracing::info!("config packages: {} pinned", report.packages);
}

async fn read_input_document(args: &RunArgs) -> AppResult<Map<String, Value>> {
    let Some(path) = &args.input else {
        return Ok(Map::new());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| local_error(format!("failed to read {}: {err}", path.display())))?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(document)) => Ok(document),
        Ok(_) => Err(invalid_argument(format!(
            "{} must contain a JSON object",
            path.display()
        ))),
        Err(err) => Err(invalid_argument(format!(
            "{} is not valid JSON: {err}",
            path.display()
        ))),
    }
}

async fn build_unit(args: &RunArgs, paths: &JobPaths) -> AppResult<UnitOfWork> {
    let payload = match (&args.source, &args.entrypoint, &args.prebuilt) {
        (Some(source), Some(entrypoint), None) => {
            let source = tokio::fs::read_to_string(source).await.map_err(|err| {
                local_error(format!("failed to read {}: {err}", source.display()))
            })?;
            Payload::Script {
                source,
                entrypoint: entrypoint.clone(),
            }
        }
        (None, None, Some(path)) => {
            let meta = tokio::fs::metadata(path)
                .await
                .map_err(|err| local_error(format!("failed to stat {}: {err}", path.display())))?;
            if !meta.is_file() {
                return Err(invalid_argument(format!(
                    "{} is not a regular file",
                    path.display()
                )));
            }
            Payload::Prebuilt {
                local_path: path.clone(),
            }
        }
        _ => {
            return Err(invalid_argument(
                "pass either --source with --entrypoint or --prebuilt",
            ));
        }
    };
    Ok(UnitOfWork {
        payload,
        input_document: read_input_document(args).await?,
        results_path: paths.results_dir.clone(),
        input_wrapper: args.wrap_input.clone(),
    })
}

/// Defaults, then flags. Config environment first, `--env` entries replace same-named ones.
fn build_profile(args: &RunArgs, base_environment: &BTreeMap<String, String>) -> ResourceProfile {
    let defaults = ResourceProfile::default();
    let mut environment: Vec<(String, String)> = base_environment
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    for (key, value) in &args.env {
        match environment.iter_mut().find(|(existing, _)| existing == key) {
            Some(entry) => entry.1 = value.clone(),
            None => environment.push((key.clone(), value.clone())),
        }
    }
    ResourceProfile {
        cpus: args.cpus.unwrap_or(defaults.cpus),
        disk: args.disk.unwrap_or(defaults.disk),
        memory: args.memory.unwrap_or(defaults.memory),
        environment,
        job_flavour: args.flavour.clone().unwrap_or(defaults.job_flavour),
    }
}

async fn run(config: config::Config, args: RunArgs) -> AppResult<JobOutcome> {
    let paths = JobPaths::for_job(&config.base_work_dir, &config.base_results_dir, &args.job_id)?;
    let unit = build_unit(&args, &paths).await?;
    let profile = build_profile(&args, &config.environment);
    let packager = JobPackager::new(
        PackageRegistry::new(config.packages),
        config.entrypoint_prelude.unwrap_or_else(default_prelude),
    );

    let channel = Arc::new(SshChannel::connect(&config.ssh).await?);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; removing job and cleaning up");
            let _ = cancel_tx.send(true);
        }
    });

    let orchestrator = BatchOrchestrator::new(channel.clone(), packager)
        .with_poll_interval(Duration::from_secs(config.poll_interval_secs))
        .with_cancel(cancel_rx);
    let result = orchestrator
        .run_packaged_job(&unit, &profile, &paths.work_dir)
        .await;

    signal_task.abort();
    if let Err(err) = channel.close().await {
        tracing::warn!("failed to close ssh channel: {err}");
    }
    result
}

fn report_failure(err: &AppError) {
    eprintln!("htcrun: {}: {err}", err.code());
}

#[tokio::main]
async fn main() -> ExitCode {
    let parsed = cli::parse_opts();
    let opts = parsed.opts;
    let Command::Run(args) = opts.command;
    let loaded = config::load_with_report(
        opts.config,
        config::Overrides {
            poll_interval_secs: args.poll_interval_secs,
            verbose: parsed.verbose_override,
        },
    );
    let config::LoadResult { config, report } = match loaded {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("htcrun: {err:#}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(config.verbose);
    log_config_report(&report);

    match run(config, args).await {
        Ok(outcome) => {
            println!(
                "cluster {} on {} finished {}; artifacts in {}",
                outcome.cluster_id, outcome.endpoint.schedd, outcome.final_status, outcome.results_dir
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            report_failure(&err);
            ExitCode::FAILURE
        }
    }
}
