// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;

use crate::app::errors::{AppError, AppResult, ErrorKind};
use crate::app::ports::CommandChannel;
use crate::app::services::condor;
use crate::app::services::packager::{
    BOOTSTRAP_FILE, EntryArtifact, INPUT_FILE, JobBundle, JobPackager, SUBMIT_FILE,
};
use crate::app::services::shell::{remote_join, sh_escape};
use crate::app::types::{
    BatchJob, JobOutcome, JobRecord, JobStatus, ResourceProfile, ScheddEndpoint, UnitOfWork,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Subdirectory of the results dir that receives the work dir contents after a run.
pub const HISTORY_SUBDIR: &str = "htcondor";
const HISTORY_LIMIT: u32 = 1;

/// Submit → monitor → cleanup lifecycle for jobs on one command channel.
#[derive(Clone)]
pub struct BatchOrchestrator {
    channel: Arc<dyn CommandChannel>,
    packager: JobPackager,
    poll_interval: Duration,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl BatchOrchestrator {
    pub fn new(channel: Arc<dyn CommandChannel>, packager: JobPackager) -> Self {
        Self {
            channel,
            packager,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel_rx: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Polling stops, the job is removed and cleanup runs once `true` is sent on this channel.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    pub async fn select_endpoint(&self) -> AppResult<ScheddEndpoint> {
        let capture = self.channel.run(condor::MYSCHEDD_BUMP_CMD).await?;
        match condor::parse_schedd_banner(&capture.stdout_text()) {
            Some(endpoint) => {
                tracing::info!(
                    schedd = %endpoint.schedd,
                    user = %endpoint.user,
                    pool = %endpoint.pool,
                    "selected schedd"
                );
                Ok(endpoint)
            }
            None => Err(AppError::with_message(
                ErrorKind::EndpointSelectionFailed,
                capture.stderr_text(),
            )),
        }
    }

    pub async fn submit(&self, work_dir: &str, submit_file: &str) -> AppResult<u64> {
        let capture = self
            .channel
            .run(&condor::submit_command(work_dir, submit_file))
            .await?;
        match condor::parse_submit_output(&capture.stdout_text()) {
            Some(cluster_id) => {
                tracing::info!(cluster_id, work_dir, "job submitted");
                Ok(cluster_id)
            }
            None => Err(AppError::with_message(
                ErrorKind::SubmissionFailed,
                capture.stderr_text(),
            )),
        }
    }

    pub async fn query_status(
        &self,
        schedd: Option<&str>,
        job_id: Option<u64>,
        long: bool,
        json: bool,
    ) -> AppResult<String> {
        let command = condor::condor_q_command(schedd, job_id, long, json);
        Ok(self.channel.run(&command).await?.stdout_text())
    }

    pub async fn query_history(
        &self,
        schedd: Option<&str>,
        job_id: Option<u64>,
        long: bool,
        json: bool,
        limit: Option<u32>,
    ) -> AppResult<String> {
        let command = condor::condor_history_command(schedd, job_id, long, json, limit);
        Ok(self.channel.run(&command).await?.stdout_text())
    }

    pub async fn remove_job(&self, job_id: u64, schedd: Option<&str>) -> AppResult<()> {
        let capture = self
            .channel
            .run(&condor::condor_rm_command(job_id, schedd))
            .await?;
        if condor::removal_succeeded(&capture.stdout_text()) {
            tracing::info!(cluster_id = job_id, "job marked for removal");
            return Ok(());
        }
        Err(AppError::with_message(
            ErrorKind::RemovalFailed,
            capture.stderr_text(),
        ))
    }

    /// Current record for the job: live queue first, history once it has left the queue.
    async fn fetch_record(&self, schedd: &str, job_id: u64) -> AppResult<Option<JobRecord>> {
        let live = self
            .query_status(Some(schedd), Some(job_id), true, true)
            .await?;
        if let Some(record) = decode_record(&live)? {
            return Ok(Some(record));
        }
        let history = self
            .query_history(Some(schedd), Some(job_id), true, true, Some(HISTORY_LIMIT))
            .await?;
        decode_record(&history)
    }

    /// Polls until the job reaches a terminal state. Returns `Completed` on success; every other
    /// terminal state is an error. HELD and SUSPENDED jobs are removed before returning.
    pub async fn poll_until_terminal(
        &self,
        job: &mut BatchJob,
        interval: Duration,
    ) -> AppResult<JobStatus> {
        let job_id = job.cluster_id();
        let schedd = job.endpoint.schedd.clone();
        let mut cancel_rx = self.cancel_rx.clone();
        loop {
            match self.fetch_record(&schedd, job_id).await? {
                None => {
                    tracing::debug!(cluster_id = job_id, "job not visible in queue or history yet");
                }
                Some(record) => {
                    let status = JobStatus::from_code(record.job_status).ok_or_else(|| {
                        AppError::with_message(
                            ErrorKind::StatusDecode,
                            format!("unknown JobStatus {} for job {job_id}", record.job_status),
                        )
                    })?;
                    if !job.advance(status) {
                        tracing::warn!(
                            cluster_id = job_id,
                            reported = %status,
                            current = %job.status(),
                            "scheduler reported an earlier state; keeping current"
                        );
                    }
                    tracing::debug!(cluster_id = job_id, status = %status, "polled job status");
                    match status {
                        JobStatus::Held => {
                            self.remove_job(job_id, Some(&schedd)).await?;
                            let message = match record.hold_reason {
                                Some(reason) if !reason.is_empty() => {
                                    format!("job {job_id} was held: {reason}")
                                }
                                _ => format!("job {job_id} was held"),
                            };
                            return Err(AppError::with_message(ErrorKind::JobHeld, message));
                        }
                        JobStatus::Suspended => {
                            self.remove_job(job_id, Some(&schedd)).await?;
                            return Err(AppError::with_message(
                                ErrorKind::JobSuspended,
                                format!("job {job_id} was suspended"),
                            ));
                        }
                        JobStatus::Removed => {
                            return Err(AppError::with_message(
                                ErrorKind::JobRemoved,
                                format!("job {job_id} was removed from the queue"),
                            ));
                        }
                        JobStatus::Completed => {
                            let iwd = record.iwd.unwrap_or_else(|| job.work_dir.clone());
                            let stderr = self
                                .channel
                                .read_file(&condor::stderr_path(&iwd, job_id))
                                .await?;
                            if let Some(trace) = condor::extract_traceback(&stderr) {
                                return Err(AppError::with_message(
                                    ErrorKind::JobPayloadFailed,
                                    trace,
                                ));
                            }
                            return Ok(JobStatus::Completed);
                        }
                        JobStatus::Idle | JobStatus::Running | JobStatus::TransferringOutput => {}
                    }
                }
            }

            if let Err(err) = wait_or_cancel(interval, &mut cancel_rx).await {
                if let Err(rm_err) = self.remove_job(job_id, Some(&schedd)).await {
                    tracing::warn!(cluster_id = job_id, "failed to remove cancelled job: {rm_err}");
                }
                return Err(err);
            }
        }
    }

    /// Moves everything in `work_dir` to `<results_dir>/htcondor/` and removes `work_dir`.
    /// If anything is left behind after the moves, nothing is deleted and `CleanupFailed` is
    /// returned. Safe to call on an already cleaned directory.
    pub async fn cleanup(&self, work_dir: &str, results_dir: &str) -> AppResult<()> {
        let history_dir = remote_join(results_dir, HISTORY_SUBDIR);
        self.channel.make_dir(&history_dir).await?;
        for name in self.channel.list_dir(work_dir).await? {
            self.channel
                .move_path(&remote_join(work_dir, &name), &remote_join(&history_dir, &name))
                .await?;
        }
        let leftover = self.remaining_entries(work_dir).await?;
        if !leftover.is_empty() {
            return Err(AppError::with_message(
                ErrorKind::CleanupFailed,
                format!(
                    "could not relocate {} from {work_dir}: {}",
                    if leftover.len() == 1 { "entry" } else { "entries" },
                    leftover.join(", ")
                ),
            ));
        }
        self.channel.remove(work_dir, true).await
    }

    /// Entries still in `work_dir`. Unlike `list_dir`, a failed listing of a directory that
    /// still exists is an error, so nothing gets deleted unseen.
    async fn remaining_entries(&self, work_dir: &str) -> AppResult<Vec<String>> {
        let capture = self
            .channel
            .run(&format!("ls -A -- {}", sh_escape(work_dir)))
            .await?;
        if capture.exit_code == 0 {
            return Ok(capture
                .stdout_text()
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect());
        }
        if !self.channel.dir_exists(work_dir).await? {
            return Ok(Vec::new());
        }
        Err(AppError::with_message(
            ErrorKind::CleanupFailed,
            format!(
                "could not list {work_dir} after relocation: {}",
                capture.stderr_text().trim()
            ),
        ))
    }

    async fn upload(&self, bundle: &JobBundle, work_dir: &str) -> AppResult<()> {
        let channel = &self.channel;
        channel
            .put_text(&bundle.submit.render(), &remote_join(work_dir, SUBMIT_FILE))
            .await?;
        channel
            .put_text(&bundle.bootstrap, &remote_join(work_dir, BOOTSTRAP_FILE))
            .await?;
        let entry_path = remote_join(work_dir, bundle.entry.remote_name());
        match &bundle.entry {
            EntryArtifact::Script(text) => channel.put_text(text, &entry_path).await?,
            EntryArtifact::Prebuilt(local) => channel.put_file(local, &entry_path).await?,
        }
        channel
            .put_text(&bundle.input_json, &remote_join(work_dir, INPUT_FILE))
            .await?;
        channel
            .make_executable(&remote_join(work_dir, BOOTSTRAP_FILE))
            .await
    }

    async fn execute(
        &self,
        bundle: &JobBundle,
        work_dir: &str,
        results_dir: &str,
    ) -> AppResult<JobOutcome> {
        self.upload(bundle, work_dir).await?;
        let endpoint = self.select_endpoint().await?;
        let cluster_id = self.submit(work_dir, SUBMIT_FILE).await?;
        tracing::Span::current().record("cluster_id", cluster_id);
        let mut job = BatchJob::new(endpoint, cluster_id, work_dir, results_dir);
        let final_status = self.poll_until_terminal(&mut job, self.poll_interval).await?;
        Ok(JobOutcome {
            cluster_id,
            endpoint: job.endpoint,
            final_status,
            results_dir: results_dir.to_string(),
        })
    }

    /// Full lifecycle for one unit of work. Once the work directory exists, cleanup runs on
    /// every path; an error from the run itself is returned only after cleanup finished and
    /// takes precedence over a cleanup error.
    #[tracing::instrument(
        name = "job_run",
        skip(self, unit, profile, work_dir),
        fields(work_dir = %work_dir, results_dir = %unit.results_path, cluster_id = tracing::field::Empty)
    )]
    pub async fn run_packaged_job(
        &self,
        unit: &UnitOfWork,
        profile: &ResourceProfile,
        work_dir: &str,
    ) -> AppResult<JobOutcome> {
        let bundle = self.packager.package(unit, profile)?;
        let results_dir = unit.results_path.as_str();

        self.channel.make_dir(work_dir).await?;
        self.channel.make_dir(results_dir).await?;

        let result = self.execute(&bundle, work_dir, results_dir).await;
        let cleanup = self.cleanup(work_dir, results_dir).await;
        match (result, cleanup) {
            (Ok(outcome), Ok(())) => {
                tracing::info!(cluster_id = outcome.cluster_id, "job finished");
                Ok(outcome)
            }
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => {
                tracing::warn!(code = err.code(), "job failed: {err}");
                Err(err)
            }
            (Err(err), Err(cleanup_err)) => {
                tracing::warn!(
                    code = err.code(),
                    "job failed: {err}; cleanup also failed: {cleanup_err}"
                );
                Err(err)
            }
        }
    }
}

fn decode_record(raw: &str) -> AppResult<Option<JobRecord>> {
    condor::decode_first_record(raw).map_err(|err| {
        AppError::with_message(
            ErrorKind::StatusDecode,
            format!("failed to decode job record: {err}"),
        )
    })
}

async fn wait_or_cancel(
    interval: Duration,
    cancel_rx: &mut Option<watch::Receiver<bool>>,
) -> AppResult<()> {
    let cancelled = || AppError::with_message(ErrorKind::Cancelled, "job monitoring cancelled");
    let Some(rx) = cancel_rx.as_mut() else {
        sleep(interval).await;
        return Ok(());
    };
    if *rx.borrow() {
        return Err(cancelled());
    }
    tokio::select! {
        _ = sleep(interval) => Ok(()),
        changed = rx.changed() => match changed {
            Ok(()) if *rx.borrow() => Err(cancelled()),
            Ok(()) => Ok(()),
            Err(_) => {
                // Sender gone; nobody can cancel any more.
                *cancel_rx = None;
                sleep(interval).await;
                Ok(())
            }
        },
    }
}
