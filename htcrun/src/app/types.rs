// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::app::errors::{AppResult, invalid_argument};
use crate::app::services::shell::remote_join;

/// Connection settings for the submit host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub identity_path: Option<String>,
    pub known_hosts_path: Option<PathBuf>,
    pub keepalive_secs: u64,
    pub idle_timeout_secs: u64,
}

/// What actually runs on the worker node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Source text embedded into `main.py`; `entrypoint` is called with the input document.
    Script { source: String, entrypoint: String },
    /// Prebuilt executable uploaded as `payload` and invoked as `./payload input.json`.
    Prebuilt { local_path: PathBuf },
}

/// Caller-supplied unit of work.
#[derive(Clone, Debug, PartialEq)]
pub struct UnitOfWork {
    pub payload: Payload,
    pub input_document: Map<String, Value>,
    /// Remote directory the payload writes its results to. Written into the
    /// input document as `results_dir` before packaging.
    pub results_path: String,
    /// When set, the serialized input becomes `{ <key>: <input_document> }`.
    pub input_wrapper: Option<String>,
}

impl UnitOfWork {
    /// Input document as it is uploaded to `input.json`.
    pub fn packaged_input(&self) -> Value {
        let mut document = self.input_document.clone();
        document.insert(
            "results_dir".to_string(),
            Value::String(self.results_path.clone()),
        );
        match self.input_wrapper.as_deref() {
            Some(key) => {
                let mut wrapped = Map::new();
                wrapped.insert(key.to_string(), Value::Object(document));
                Value::Object(wrapped)
            }
            None => Value::Object(document),
        }
    }
}

/// Resources requested from the pool for one job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceProfile {
    pub cpus: u32,
    /// KiB, as understood by `RequestDisk`.
    pub disk: u64,
    /// MiB, as understood by `RequestMemory`.
    pub memory: u64,
    /// Ordered; rendered into the `environment` directive.
    pub environment: Vec<(String, String)>,
    pub job_flavour: String,
}

pub const DEFAULT_JOB_FLAVOUR: &str = "espresso";

impl Default for ResourceProfile {
    fn default() -> Self {
        Self {
            cpus: 1,
            disk: 252_000,
            memory: 10_240,
            environment: Vec::new(),
            job_flavour: DEFAULT_JOB_FLAVOUR.to_string(),
        }
    }
}

/// Schedd chosen by `myschedd bump`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheddEndpoint {
    pub schedd: String,
    pub user: String,
    pub pool: String,
}

/// HTCondor `JobStatus` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobStatus {
    Idle,
    Running,
    TransferringOutput,
    Completed,
    Held,
    Suspended,
    Removed,
}

impl JobStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(JobStatus::Idle),
            2 => Some(JobStatus::Running),
            3 => Some(JobStatus::Removed),
            4 => Some(JobStatus::Completed),
            5 => Some(JobStatus::Held),
            6 => Some(JobStatus::TransferringOutput),
            7 => Some(JobStatus::Suspended),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            JobStatus::Idle => 1,
            JobStatus::Running => 2,
            JobStatus::Removed => 3,
            JobStatus::Completed => 4,
            JobStatus::Held => 5,
            JobStatus::TransferringOutput => 6,
            JobStatus::Suspended => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Idle => "IDLE",
            JobStatus::Running => "RUNNING",
            JobStatus::TransferringOutput => "TRANSFERRING_OUTPUT",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Held => "HELD",
            JobStatus::Suspended => "SUSPENDED",
            JobStatus::Removed => "REMOVED",
        }
    }

    /// Position in the forward-only progression. Every terminal state ranks last.
    fn rank(self) -> u8 {
        match self {
            JobStatus::Idle => 0,
            JobStatus::Running => 1,
            JobStatus::TransferringOutput => 2,
            JobStatus::Completed
            | JobStatus::Held
            | JobStatus::Suspended
            | JobStatus::Removed => 3,
        }
    }

    pub fn can_advance_to(self, next: JobStatus) -> bool {
        next.rank() >= self.rank()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First record of `condor_q -long -json` / `condor_history -long -json`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct JobRecord {
    #[serde(rename = "JobStatus")]
    pub job_status: i64,
    #[serde(rename = "Iwd")]
    pub iwd: Option<String>,
    #[serde(rename = "ClusterId")]
    pub cluster_id: Option<u64>,
    #[serde(rename = "HoldReason")]
    pub hold_reason: Option<String>,
}

/// Remote directories owned by one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobPaths {
    pub work_dir: String,
    pub results_dir: String,
}

impl JobPaths {
    /// `<base_work_dir>/jobs/<job_id>` and `<base_results_dir>/jobs/<job_id>`.
    pub fn for_job(base_work_dir: &str, base_results_dir: &str, job_id: &str) -> AppResult<Self> {
        let valid = !job_id.is_empty()
            && job_id != "."
            && job_id != ".."
            && job_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(invalid_argument(format!(
                "job id '{job_id}' must be a single path segment of [A-Za-z0-9._-]"
            )));
        }
        let job_dir = |base: &str| remote_join(&remote_join(base, "jobs"), job_id);
        Ok(Self {
            work_dir: job_dir(base_work_dir),
            results_dir: job_dir(base_results_dir),
        })
    }
}

/// Live job tracked by the orchestrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchJob {
    pub endpoint: ScheddEndpoint,
    cluster_id: u64,
    pub work_dir: String,
    pub results_dir: String,
    status: JobStatus,
}

impl BatchJob {
    pub fn new(
        endpoint: ScheddEndpoint,
        cluster_id: u64,
        work_dir: impl Into<String>,
        results_dir: impl Into<String>,
    ) -> Self {
        Self {
            endpoint,
            cluster_id,
            work_dir: work_dir.into(),
            results_dir: results_dir.into(),
            status: JobStatus::Idle,
        }
    }

    pub fn cluster_id(&self) -> u64 {
        self.cluster_id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Records `next` if it does not move the job backwards. Returns whether it was recorded.
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// Successful run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobOutcome {
    pub cluster_id: u64,
    pub endpoint: ScheddEndpoint,
    pub final_status: JobStatus,
    pub results_dir: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_codes_round_trip_through_symbols() {
        for code in 1..=7 {
            let status = JobStatus::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert_eq!(JobStatus::from_code(5), Some(JobStatus::Held));
        assert_eq!(JobStatus::from_code(4).unwrap().as_str(), "COMPLETED");
        assert_eq!(JobStatus::from_code(0), None);
        assert_eq!(JobStatus::from_code(8), None);
    }

    #[test]
    fn batch_job_status_never_moves_backwards() {
        let endpoint = ScheddEndpoint {
            schedd: "bigbird01".into(),
            user: "alice".into(),
            pool: "cern".into(),
        };
        let mut job = BatchJob::new(endpoint, 12, "/w", "/r");
        assert_eq!(job.status(), JobStatus::Idle);
        assert!(job.advance(JobStatus::Running));
        assert!(!job.advance(JobStatus::Idle));
        assert_eq!(job.status(), JobStatus::Running);
        assert!(job.advance(JobStatus::Completed));
        assert!(!job.advance(JobStatus::Running));
        assert_eq!(job.cluster_id(), 12);
    }

    #[test]
    fn packaged_input_writes_results_dir_and_wraps() {
        let mut input = Map::new();
        input.insert("params".into(), json!({"run_list": [1, 2]}));
        let unit = UnitOfWork {
            payload: Payload::Script {
                source: "def f(job): pass".into(),
                entrypoint: "f".into(),
            },
            input_document: input,
            results_path: "/eos/results/jobs/7".into(),
            input_wrapper: Some("job".into()),
        };
        assert_eq!(
            unit.packaged_input(),
            json!({"job": {"params": {"run_list": [1, 2]}, "results_dir": "/eos/results/jobs/7"}})
        );
    }

    #[test]
    fn packaged_input_without_wrapper_is_flat() {
        let unit = UnitOfWork {
            payload: Payload::Prebuilt {
                local_path: PathBuf::from("bin/payload"),
            },
            input_document: Map::new(),
            results_path: "/r".into(),
            input_wrapper: None,
        };
        assert_eq!(unit.packaged_input(), json!({"results_dir": "/r"}));
    }

    #[test]
    fn job_record_ignores_unknown_attributes() {
        let record: JobRecord = serde_json::from_value(json!({
            "JobStatus": 2,
            "Iwd": "/afs/cern.ch/work/a/alice/jobs/7",
            "ClusterId": 482,
            "Owner": "alice"
        }))
        .unwrap();
        assert_eq!(record.job_status, 2);
        assert_eq!(record.cluster_id, Some(482));
        assert!(record.hold_reason.is_none());
    }

    #[test]
    fn job_paths_nest_under_jobs() {
        let paths = JobPaths::for_job("/afs/work/", "/eos/results", "run-42").unwrap();
        assert_eq!(paths.work_dir, "/afs/work/jobs/run-42");
        assert_eq!(paths.results_dir, "/eos/results/jobs/run-42");
    }

    #[test]
    fn job_paths_reject_traversal() {
        for id in ["", "..", "a/b", "x y"] {
            assert!(JobPaths::for_job("/w", "/r", id).is_err(), "id {id:?}");
        }
    }
}
