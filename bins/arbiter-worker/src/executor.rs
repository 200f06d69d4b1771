/// Submission Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Take one admitted submission from admission to its terminal message.
///
/// **Architecture:**
/// 1. Announce admission; abandon if another engine owns the submission,
///    requeue if the announcement cannot be recorded
/// 2. Check sandbox capacity, load the registry and the problem (problem.rs)
/// 3. Stage the workspace (workspace.rs)
/// 4. Run the sandbox, streaming progress (sandbox.rs)
/// 5. Score the verdicts (evaluator.rs)
/// 6. Report exactly one terminal message, then remove the workspace
///
/// This module is the glue layer - it knows nothing about:
/// - How the sandbox is driven (sandbox's job)
/// - How outputs are compared or scored (evaluator's job)
use crate::config::LanguageRegistry;
use crate::error::JudgeResult;
use crate::evaluator;
use crate::interface::SubmissionSink;
use crate::problem::ProblemDefinition;
use crate::queue::SubmissionRunner;
use crate::reporter::Reporter;
use crate::sandbox::{RunSummary, Sandbox};
use crate::settings::EngineOptions;
use crate::workspace::Workspace;
use arbiter_common::types::{Lifecycle, LifecycleMessage, ScoreReport, SubmissionRequest};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

/// Attempts to record admission before the submission goes back to the queue
const ADMISSION_ATTEMPTS: u32 = 3;
const ADMISSION_BACKOFF: Duration = Duration::from_millis(200);

pub struct Executor {
    options: EngineOptions,
    sandbox: Sandbox,
    sink: Arc<dyn SubmissionSink>,
}

impl Executor {
    pub fn new(options: EngineOptions, sink: Arc<dyn SubmissionSink>) -> Self {
        Self {
            sandbox: Sandbox::new(options.sandbox.clone()),
            options,
            sink,
        }
    }

    /// Judge one submission end to end.
    ///
    /// Never fails: every outcome after admission becomes a lifecycle
    /// message, and all of them are delivered before this returns.
    #[instrument(skip_all, fields(submission_id = %request.id, language = %request.language, problem = %request.problem))]
    pub async fn execute(&self, request: SubmissionRequest) {
        match self.admit(&request).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Submission owned by another engine, abandoning");
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to announce admission, returning submission to the queue");
                if let Err(e) = self.sink.requeue(&request).await {
                    error!(error = %e, "Failed to requeue submission");
                }
                return;
            }
        }

        let start = Instant::now();
        let reporter = Reporter::spawn(request.id.clone(), self.sink.clone());

        let terminal = match self.judge(&request, &reporter).await {
            Ok(score) => {
                info!(
                    score = score.as_ref().map(|s| s.score),
                    failed_subtasks = ?score.as_ref().and_then(|s| s.failed_subtasks.clone()),
                    compile_failed = score.is_none(),
                    execution_ms = start.elapsed().as_millis() as u64,
                    "Submission judged"
                );
                Lifecycle::Done { score }
            }
            Err(e) if e.is_invalid_data() => {
                warn!(reason = %e, "Submission rejected as invalid");
                e.terminal()
            }
            Err(e) => {
                error!(error = %e, "Submission execution failed");
                e.terminal()
            }
        };

        reporter.emit(terminal);
        reporter.finish().await;
    }

    /// Record admission, retrying sink failures with a linear backoff.
    ///
    /// `Ok(false)` means another engine owns the submission.
    async fn admit(&self, request: &SubmissionRequest) -> anyhow::Result<bool> {
        let mut attempt = 1;
        loop {
            let admission = LifecycleMessage::new(request.id.clone(), Lifecycle::Executing);
            match self.sink.send(admission).await {
                Err(e) if attempt < ADMISSION_ATTEMPTS => {
                    warn!(attempt, error = %e, "Failed to announce admission, retrying");
                    tokio::time::sleep(ADMISSION_BACKOFF * attempt).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    /// Final score, or `None` when the compile step failed
    async fn judge(&self, request: &SubmissionRequest, reporter: &Reporter) -> JudgeResult<Option<ScoreReport>> {
        if self.options.sandbox.check {
            self.sandbox.check_capacity().await?;
        }

        let registry = LanguageRegistry::load_from_dir(&self.options.problems_root).await?;
        let language = registry.get(&request.language)?;
        let problem = ProblemDefinition::load(&self.options.problems_root, &request.problem).await?;

        let workspace = Workspace::stage(&self.options, request, language, &problem).await?;
        let run = self.sandbox.run(&workspace, &problem, reporter).await;
        workspace.cleanup().await;

        match run? {
            RunSummary::CompileFailed => Ok(None),
            RunSummary::Judged(verdicts) => Ok(Some(evaluator::score(&verdicts, problem.subtasks.as_ref())?)),
        }
    }
}

#[async_trait]
impl SubmissionRunner for Executor {
    async fn run(&self, request: SubmissionRequest) {
        self.execute(request).await
    }

    async fn abort(&self, submission_id: &str, reason: String) {
        let terminal = LifecycleMessage::new(submission_id, Lifecycle::Error { reason });
        if let Err(e) = self.sink.send(terminal).await {
            error!(submission_id, error = %e, "Failed to report aborted execution");
        }
    }
}
