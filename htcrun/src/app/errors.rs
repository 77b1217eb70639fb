// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

pub mod codes {
    pub const ENDPOINT_SELECTION_FAILED: &str = "endpoint_selection_failed";
    pub const SUBMISSION_FAILED: &str = "submission_failed";
    pub const JOB_HELD: &str = "job_held";
    pub const JOB_SUSPENDED: &str = "job_suspended";
    pub const JOB_REMOVED: &str = "job_removed";
    pub const JOB_PAYLOAD_FAILED: &str = "job_payload_failed";
    pub const REMOVAL_FAILED: &str = "removal_failed";
    pub const CLEANUP_FAILED: &str = "cleanup_failed";
    pub const STATUS_DECODE: &str = "status_decode";
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const AUTHENTICATION_FAILURE: &str = "authentication_failure";
    pub const CONNECTION_FAILURE: &str = "connection_failure";
    pub const REMOTE_ERROR: &str = "remote_error";
    pub const LOCAL_ERROR: &str = "local_error";
    pub const CANCELED: &str = "canceled";
}

/// Classification of a failed orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// `myschedd bump` produced no parseable schedd banner.
    EndpointSelectionFailed,
    /// `condor_submit` did not report the expected success line.
    SubmissionFailed,
    JobHeld,
    JobSuspended,
    /// The job left the queue outside our control.
    JobRemoved,
    /// The job completed but the payload raised; the message carries the trace.
    JobPayloadFailed,
    RemovalFailed,
    CleanupFailed,
    StatusDecode,
    InvalidArgument,
    Transport,
    Local,
    Cancelled,
}

impl ErrorKind {
    pub fn default_code(self) -> &'static str {
        match self {
            ErrorKind::EndpointSelectionFailed => codes::ENDPOINT_SELECTION_FAILED,
            ErrorKind::SubmissionFailed => codes::SUBMISSION_FAILED,
            ErrorKind::JobHeld => codes::JOB_HELD,
            ErrorKind::JobSuspended => codes::JOB_SUSPENDED,
            ErrorKind::JobRemoved => codes::JOB_REMOVED,
            ErrorKind::JobPayloadFailed => codes::JOB_PAYLOAD_FAILED,
            ErrorKind::RemovalFailed => codes::REMOVAL_FAILED,
            ErrorKind::CleanupFailed => codes::CLEANUP_FAILED,
            ErrorKind::StatusDecode => codes::STATUS_DECODE,
            ErrorKind::InvalidArgument => codes::INVALID_ARGUMENT,
            ErrorKind::Transport => codes::REMOTE_ERROR,
            ErrorKind::Local => codes::LOCAL_ERROR,
            ErrorKind::Cancelled => codes::CANCELED,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppError {
    kind: ErrorKind,
    code: &'static str,
    message: String,
    context: Option<String>,
}

impl AppError {
    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.default_code(),
            message: message.into(),
            context: None,
        }
    }

    /// Same as [`AppError::with_message`] but with a code that differs from the kind's default,
    /// e.g. transport errors that are really authentication failures.
    pub fn with_code(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

pub fn invalid_argument(message: impl Into<String>) -> AppError {
    AppError::with_message(ErrorKind::InvalidArgument, message)
}

pub fn local_error(message: impl Into<String>) -> AppError {
    AppError::with_message(ErrorKind::Local, message)
}
