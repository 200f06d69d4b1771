use arbiter_common::types::Lifecycle;
use std::time::Duration;
use thiserror::Error;

/// Exit code the container runtime uses when it cannot create or run the
/// instance itself, as opposed to the judged program failing.
pub const SANDBOX_RUNTIME_EXIT: i32 = 125;

/// Failures while judging one submission.
///
/// Verdicts such as `wrong` or `TLE` are not errors; only conditions that stop
/// the engine from producing a verdict end up here.
#[derive(Debug, Error)]
pub enum JudgeError {
    /// The submission or its problem data is unusable
    #[error("invalid submission data: {0}")]
    InvalidData(String),

    /// Sandbox output did not follow the status protocol
    #[error("sandbox protocol violation: {0}")]
    Protocol(String),

    #[error("sandbox exited with unexpected status {0:?}")]
    SandboxExit(Option<i32>),

    #[error("container runtime failed to run the sandbox instance (exit code 125)")]
    SandboxExhausted,

    /// Too many stored sandbox instances to start new work
    #[error("sandbox capacity reached: {count} instances stored, ceiling is {ceiling}")]
    Capacity { count: usize, ceiling: usize },

    #[error("sandbox did not finish within {0:?}")]
    Watchdog(Duration),

    /// Internal inconsistency while computing the score
    #[error("scoring inconsistency: {0}")]
    Scoring(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl JudgeError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        JudgeError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        JudgeError::InvalidData(reason.into())
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        JudgeError::Protocol(reason.into())
    }

    /// `invalid` is reserved for submissions that can never be judged
    pub fn is_invalid_data(&self) -> bool {
        matches!(self, JudgeError::InvalidData(_))
    }

    /// Terminal lifecycle state reported for this failure
    pub fn terminal(&self) -> Lifecycle {
        let reason = self.to_string();
        if self.is_invalid_data() {
            Lifecycle::Invalid { reason }
        } else {
            Lifecycle::Error { reason }
        }
    }
}

pub type JudgeResult<T> = std::result::Result<T, JudgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_data_maps_to_invalid() {
        let err = JudgeError::invalid("language 'cobol' is not supported");
        assert!(matches!(err.terminal(), Lifecycle::Invalid { .. }));
    }

    #[test]
    fn test_engine_faults_map_to_error() {
        let faults = vec![
            JudgeError::protocol("unknown status 'banana'"),
            JudgeError::SandboxExit(Some(1)),
            JudgeError::SandboxExhausted,
            JudgeError::Capacity { count: 2000, ceiling: 2000 },
            JudgeError::Watchdog(Duration::from_secs(5)),
            JudgeError::io("writing source", std::io::Error::from(std::io::ErrorKind::PermissionDenied)),
        ];

        for fault in faults {
            assert!(!fault.is_invalid_data());
            assert!(matches!(fault.terminal(), Lifecycle::Error { .. }), "{}", fault);
        }
    }

    #[test]
    fn test_reason_carries_context() {
        let err = JudgeError::io("creating workspace", std::io::Error::from(std::io::ErrorKind::NotFound));
        match err.terminal() {
            Lifecycle::Error { reason } => assert!(reason.starts_with("creating workspace")),
            other => panic!("unexpected terminal {:?}", other),
        }
    }
}
