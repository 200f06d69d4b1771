use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A submission as delivered by the submission source.
///
/// The file name the source is staged under is derived later from the
/// language registry, so it is not part of the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    pub id: String,
    pub problem: String,
    pub language: String,
    pub source_code: String,
}

/// Outcome of the compile step reported by the sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompileResult {
    Success,
    Error,
}

/// Judging outcome for one test case.
///
/// These are legitimate verdicts about the submission, never engine faults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result")]
pub enum TestVerdict {
    /// Output matched; carries the user time (seconds) and peak memory (kB)
    #[serde(rename = "accepted")]
    Accepted { time: f64, memory: u64 },
    #[serde(rename = "wrong")]
    Wrong,
    #[serde(rename = "MLE")]
    MemoryLimitExceeded,
    #[serde(rename = "TLE")]
    TimeLimitExceeded,
    #[serde(rename = "error")]
    RuntimeError,
}

impl TestVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, TestVerdict::Accepted { .. })
    }
}

impl fmt::Display for TestVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TestVerdict::Accepted { .. } => "accepted",
            TestVerdict::Wrong => "wrong",
            TestVerdict::MemoryLimitExceeded => "MLE",
            TestVerdict::TimeLimitExceeded => "TLE",
            TestVerdict::RuntimeError => "error",
        };
        write!(f, "{}", label)
    }
}

/// Final score of a judged submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreReport {
    /// In `[0, 1]`, rounded to 4 decimal places
    pub score: f64,
    /// 1-based indices of failed subtasks; absent when the problem has none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_subtasks: Option<Vec<u32>>,
}

/// Every state a submission passes through, one variant per state.
///
/// Order: `Executing` → [`Compiling` → `Compiled`] → {`Testing` → `Tested`}*
/// → exactly one of `Done`, `Error`, `Invalid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Lifecycle {
    /// Admitted to an execution slot
    Executing,
    Compiling,
    Compiled {
        result: CompileResult,
    },
    #[serde(rename_all = "camelCase")]
    Testing {
        test_case: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subtask: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    Tested {
        test_case: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subtask: Option<u32>,
        #[serde(flatten)]
        verdict: TestVerdict,
    },
    /// Finished judging. No score means the compile step failed.
    Done {
        #[serde(flatten)]
        score: Option<ScoreReport>,
    },
    /// Engine-side fault; the submission may be retried
    Error { reason: String },
    /// The submission itself is unusable; not retryable
    Invalid { reason: String },
}

impl Lifecycle {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Lifecycle::Done { .. } | Lifecycle::Error { .. } | Lifecycle::Invalid { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Lifecycle::Executing => "executing",
            Lifecycle::Compiling => "compiling",
            Lifecycle::Compiled { .. } => "compiled",
            Lifecycle::Testing { .. } => "testing",
            Lifecycle::Tested { .. } => "tested",
            Lifecycle::Done { .. } => "done",
            Lifecycle::Error { .. } => "error",
            Lifecycle::Invalid { .. } => "invalid",
        }
    }

    /// Durable state a sink records on the submission for this message.
    ///
    /// Progress messages that only append a judge result return `None`.
    pub fn submission_state(&self) -> Option<SubmissionState> {
        match self {
            Lifecycle::Executing => Some(SubmissionState::Judging),
            Lifecycle::Compiling => Some(SubmissionState::Compiling),
            Lifecycle::Compiled { result: CompileResult::Success } => Some(SubmissionState::Compiled),
            Lifecycle::Compiled { result: CompileResult::Error } => Some(SubmissionState::CompileError),
            Lifecycle::Testing { .. } | Lifecycle::Tested { .. } => None,
            Lifecycle::Done { score: Some(_) } => Some(SubmissionState::Judged),
            Lifecycle::Done { score: None } => None,
            Lifecycle::Error { .. } => Some(SubmissionState::Error),
            Lifecycle::Invalid { .. } => Some(SubmissionState::InvalidData),
        }
    }

    /// Score a sink records for a `done` message; a compile failure counts as zero
    pub fn recorded_score(&self) -> Option<f64> {
        match self {
            Lifecycle::Done { score: Some(report) } => Some(report.score),
            Lifecycle::Done { score: None } => Some(0.0),
            _ => None,
        }
    }
}

/// Durable submission state as stored by the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubmissionState {
    Judging,
    Compiling,
    Compiled,
    CompileError,
    Judged,
    Error,
    InvalidData,
}

/// One lifecycle event addressed to a submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleMessage {
    pub id: String,
    #[serde(flatten)]
    pub event: Lifecycle,
    pub judge_time: DateTime<Utc>,
}

impl LifecycleMessage {
    pub fn new(id: impl Into<String>, event: Lifecycle) -> Self {
        Self {
            id: id.into(),
            event,
            judge_time: Utc::now(),
        }
    }
}
