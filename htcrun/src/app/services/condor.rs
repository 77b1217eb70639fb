// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::services::shell::{remote_join, sh_escape};
use crate::app::types::{JobRecord, ScheddEndpoint};

pub const MYSCHEDD_BUMP_CMD: &str = "myschedd bump";

const SCHEDD_BANNER_PREFIX: &str = "Selected best schedd '";
const SCHEDD_BANNER_USER: &str = "' for user '";
const SCHEDD_BANNER_POOL: &str = "' in pool '";

pub const SUBMIT_SUCCESS_MARKER: &str = "1 job(s) submitted to cluster";
pub const REMOVE_SUCCESS_MARKER: &str = "marked for removal";
/// First line of a Python exception report in the job's stderr.
pub const TRACEBACK_MARKER: &str = "Traceback (most recent call last):";

/// Parse the banner printed by `myschedd bump`:
/// `Selected best schedd '<schedd>' for user '<user>' in pool '<pool>'`.
pub fn parse_schedd_banner(stdout: &str) -> Option<ScheddEndpoint> {
    stdout.lines().find_map(|line| {
        let start = line.find(SCHEDD_BANNER_PREFIX)?;
        let rest = &line[start + SCHEDD_BANNER_PREFIX.len()..];
        let (schedd, rest) = rest.split_once(SCHEDD_BANNER_USER)?;
        let (user, rest) = rest.split_once(SCHEDD_BANNER_POOL)?;
        let pool = &rest[..rest.rfind('\'')?];
        Some(ScheddEndpoint {
            schedd: schedd.to_string(),
            user: user.to_string(),
            pool: pool.to_string(),
        })
    })
}

pub fn submit_command(work_dir: &str, submit_file: &str) -> String {
    format!(
        "cd {} && condor_submit {}",
        sh_escape(work_dir),
        sh_escape(submit_file)
    )
}

/// Cluster id from `condor_submit` output, e.g. `1 job(s) submitted to cluster 482.` → 482.
/// The last token is read as a number the same way the scheduler prints it (`482.`, `482.0`).
pub fn parse_submit_output(stdout: &str) -> Option<u64> {
    let stdout = stdout.trim();
    if !stdout.contains(SUBMIT_SUCCESS_MARKER) {
        return None;
    }
    let token = stdout.split_whitespace().last()?.trim_end_matches('.');
    let value = token.parse::<f64>().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value.trunc() as u64)
}

fn query_command(
    base: &str,
    schedd: Option<&str>,
    job_id: Option<u64>,
    long: bool,
    json: bool,
    limit: Option<u32>,
) -> String {
    let mut cmd = base.to_string();
    if let Some(schedd) = schedd {
        cmd.push_str(&format!(" -name {}", sh_escape(schedd)));
    }
    if long {
        cmd.push_str(" -long");
    }
    if json {
        cmd.push_str(" -json");
    }
    if let Some(limit) = limit {
        cmd.push_str(&format!(" -limit {limit}"));
    }
    if let Some(job_id) = job_id {
        cmd.push_str(&format!(" {job_id}"));
    }
    cmd
}

/// `condor_q` against the live queue.
pub fn condor_q_command(schedd: Option<&str>, job_id: Option<u64>, long: bool, json: bool) -> String {
    query_command("condor_q", schedd, job_id, long, json, None)
}

/// `condor_history` for jobs that already left the queue.
pub fn condor_history_command(
    schedd: Option<&str>,
    job_id: Option<u64>,
    long: bool,
    json: bool,
    limit: Option<u32>,
) -> String {
    query_command("condor_history", schedd, job_id, long, json, limit)
}

pub fn condor_rm_command(job_id: u64, schedd: Option<&str>) -> String {
    match schedd {
        Some(schedd) => format!("condor_rm -name {} {job_id}", sh_escape(schedd)),
        None => format!("condor_rm {job_id}"),
    }
}

pub fn removal_succeeded(stdout: &str) -> bool {
    stdout.contains(REMOVE_SUCCESS_MARKER)
}

/// First record of a `-long -json` listing. Blank output and `[]` both mean "no record".
pub fn decode_first_record(stdout: &str) -> Result<Option<JobRecord>, serde_json::Error> {
    let stdout = stdout.trim();
    if stdout.is_empty() {
        return Ok(None);
    }
    let mut records: Vec<JobRecord> = serde_json::from_str(stdout)?;
    if records.is_empty() {
        return Ok(None);
    }
    Ok(Some(records.swap_remove(0)))
}

/// Path of the stderr file written for process 0 of `cluster_id`.
pub fn stderr_path(iwd: &str, cluster_id: u64) -> String {
    remote_join(iwd, &format!("{cluster_id}_0.err"))
}

/// Everything from the traceback marker line to the end of the stream.
pub fn extract_traceback(stderr: &str) -> Option<String> {
    if !stderr.contains(TRACEBACK_MARKER) {
        return None;
    }
    let lines: Vec<&str> = stderr.trim().lines().collect();
    let start = lines
        .iter()
        .position(|line| line.contains(TRACEBACK_MARKER))?;
    Some(lines[start..].join("\n"))
}
