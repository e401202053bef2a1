//! Job model: lanes, lifecycle status, per-row outcomes and failures.

use chrono::{DateTime, Utc};
use riskflow_inference::{FeatureVector, ModelFamily, PredictionResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a job (one chunk of a submission).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier handed back to the submitter; groups a batch's chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubmissionId(pub Uuid);

impl SubmissionId {
    pub fn new() -> Self {
        SubmissionId(Uuid::new_v4())
    }
}

impl Default for SubmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SubmissionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(SubmissionId(Uuid::parse_str(s)?))
    }
}

/// Priority lane. Declaration order is dequeue priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    High,
    Medium,
    Low,
}

impl Lane {
    /// All lanes, highest priority first.
    pub const ALL: [Lane; 3] = [Lane::High, Lane::Medium, Lane::Low];

    pub fn index(self) -> usize {
        match self {
            Lane::High => 0,
            Lane::Medium => 1,
            Lane::Low => 2,
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lane::High => write!(f, "high"),
            Lane::Medium => write!(f, "medium"),
            Lane::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for Lane {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Lane::High),
            "medium" => Ok(Lane::Medium),
            "low" => Ok(Lane::Low),
            other => Err(format!("unknown lane: {other}")),
        }
    }
}

/// Job lifecycle: `Queued → Running → {Completed, Failed}`, or
/// `Queued → Cancelled`. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// What happened to one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RowOutcome {
    Scored { prediction: PredictionResult },
    Rejected { reason: String },
}

/// Outcome of one row, indexed within the whole submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowReport {
    pub row: usize,
    #[serde(flatten)]
    pub outcome: RowOutcome,
}

impl RowReport {
    pub fn scored(row: usize, prediction: PredictionResult) -> Self {
        Self {
            row,
            outcome: RowOutcome::Scored { prediction },
        }
    }

    pub fn rejected(row: usize, reason: impl Into<String>) -> Self {
        Self {
            row,
            outcome: RowOutcome::Rejected {
                reason: reason.into(),
            },
        }
    }

    pub fn is_scored(&self) -> bool {
        matches!(self.outcome, RowOutcome::Scored { .. })
    }

    /// `"row N failed: reason"` for rejected rows.
    pub fn failure_line(&self) -> Option<String> {
        match &self.outcome {
            RowOutcome::Rejected { reason } => Some(format!("row {} failed: {reason}", self.row)),
            RowOutcome::Scored { .. } => None,
        }
    }
}

/// Why a job ended `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// One or more rows were rejected; the rest were scored.
    InvalidRows,
    /// Artifact did not fit the rows; the job was aborted.
    ArtifactMismatch,
    /// Processing exceeded the per-job limit; partial rows kept.
    Timeout,
}

impl FailureKind {
    /// Whether the failure aborted the job (as opposed to individual rows).
    pub fn is_job_level(self) -> bool {
        !matches!(self, FailureKind::InvalidRows)
    }
}

/// Job-level failure detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// User-facing summary distinguishing row and job scope.
    pub fn describe(&self) -> String {
        if self.kind.is_job_level() {
            format!("job failed entirely: {}", self.message)
        } else {
            self.message.clone()
        }
    }
}

/// A unit of work: one chunk of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub submission_id: SubmissionId,
    pub chunk_index: usize,
    /// Index of this chunk's first row within the submission.
    pub row_offset: usize,
    pub lane: Lane,
    pub family: ModelFamily,
    pub rows: Vec<FeatureVector>,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Rows processed so far (progress while running).
    pub rows_done: usize,
    pub results: Vec<RowReport>,
    pub failure: Option<JobFailure>,
}

impl Job {
    pub fn new(
        submission_id: SubmissionId,
        chunk_index: usize,
        row_offset: usize,
        lane: Lane,
        family: ModelFamily,
        rows: Vec<FeatureVector>,
    ) -> Self {
        Self {
            id: JobId::new(),
            submission_id,
            chunk_index,
            row_offset,
            lane,
            family,
            rows,
            status: JobStatus::Queued,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            rows_done: 0,
            results: Vec::new(),
            failure: None,
        }
    }

    /// Single-chunk job, convenient for tests and single-row predictions.
    pub fn single(lane: Lane, family: ModelFamily, rows: Vec<FeatureVector>) -> Self {
        Self::new(SubmissionId::new(), 0, 0, lane, family, rows)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
