/// Sandbox Invoker - one container-runtime process per submission
///
/// **Execution Rules:**
/// 1. Bind the workspace mount into a named instance, limits passed as env
/// 2. Follow the status protocol on stdout and emit lifecycle events as they happen
/// 3. Diagnose every reported test from the files it left in `mount/out/`
/// 4. Hard wall-clock watchdog: the process is killed when it expires
/// 5. The named instance is removed on every exit path
///
/// The runtime binary is configurable (`podman` by default); any binary
/// that accepts the same `run` / `container rm` / `image exists` / `ps`
/// sub-commands works.
use crate::error::{JudgeError, JudgeResult, SANDBOX_RUNTIME_EXIT};
use crate::evaluator;
use crate::problem::{Constraints, ProblemDefinition};
use crate::protocol::{self, ProtocolTracker, RunStatus, SandboxEvent};
use crate::reporter::Reporter;
use crate::settings::SandboxOptions;
use crate::workspace::Workspace;
use anyhow::{bail, Context};
use arbiter_common::types::{Lifecycle, TestVerdict};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Mount point of the workspace inside the instance
const MOUNT_TARGET: &str = "/app/mount";
const ENTRYPOINT: &str = "./execute.sh";

/// What the sandbox run produced
#[derive(Debug, Clone, PartialEq)]
pub enum RunSummary {
    /// The compile step failed; no test ran
    CompileFailed,
    /// One verdict per test case, in test order
    Judged(Vec<TestVerdict>),
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    options: SandboxOptions,
}

impl Sandbox {
    pub fn new(options: SandboxOptions) -> Self {
        Self { options }
    }

    /// `<binary> run --name <instance> -v <mount>:/app/mount -e ... <image> ./execute.sh ...`
    pub fn command(&self, instance: &str, workspace: &Workspace, constraints: &Constraints) -> Command {
        let mut cmd = Command::new(&self.options.binary);
        cmd.arg("run")
            .arg("--name")
            .arg(instance)
            .arg("-v")
            .arg(format!("{}:{}", workspace.mount().display(), MOUNT_TARGET))
            .arg("-e")
            .arg(format!("MAX_MEM={}", constraints.max_memory))
            .arg("-e")
            .arg(format!("MAX_TIME={}", constraints.max_time));

        if let Some(artifact) = &workspace.artifact {
            cmd.arg("-e").arg(format!("ARTIFACT={}", artifact));
        }

        cmd.arg(&self.options.image)
            .arg(ENTRYPOINT)
            .arg(&workspace.file_name)
            .arg(&workspace.language)
            .arg(if workspace.compiled { "1" } else { "0" })
            .arg("in")
            .arg("out");

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run the staged submission and follow it to the end.
    ///
    /// Lifecycle events between admission and the terminal state are
    /// emitted through `reporter` in the order the sandbox reports them.
    #[instrument(skip_all, fields(instance = tracing::field::Empty))]
    pub async fn run(
        &self,
        workspace: &Workspace,
        problem: &ProblemDefinition,
        reporter: &Reporter,
    ) -> JudgeResult<RunSummary> {
        let instance = format!("arbiter-{}", Uuid::new_v4());
        tracing::Span::current().record("instance", instance.as_str());
        debug!(workspace = %workspace.root().display(), file_name = %workspace.file_name, "Starting sandbox");

        let mut child = self
            .command(&instance, workspace, &problem.constraints)
            .spawn()
            .map_err(|e| JudgeError::io(format!("spawning sandbox runtime '{}'", self.options.binary), e))?;

        let result = self.supervise(&mut child, workspace, problem, reporter).await;

        if result.is_err() {
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Sandbox process already gone");
            }
        }
        self.teardown(&instance).await;

        result
    }

    async fn supervise(
        &self,
        child: &mut Child,
        workspace: &Workspace,
        problem: &ProblemDefinition,
        reporter: &Reporter,
    ) -> JudgeResult<RunSummary> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| JudgeError::protocol("sandbox stdout was not captured"))?;
        let stderr = child.stderr.take().map(|stderr| tokio::spawn(read_all(stderr)));

        let watchdog = self.options.watchdog;
        let followed = tokio::time::timeout(watchdog, async {
            let followed = follow(stdout, workspace, problem, reporter).await?;
            let status = child
                .wait()
                .await
                .map_err(|e| JudgeError::io("waiting for sandbox runtime", e))?;
            Ok::<_, JudgeError>((followed, status))
        })
        .await;

        let (tracker, verdicts, status) = match followed {
            Ok(Ok(((tracker, verdicts), status))) => (tracker, verdicts, status),
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!(watchdog_secs = watchdog.as_secs_f64(), "Sandbox exceeded watchdog, killing");
                return Err(JudgeError::Watchdog(watchdog));
            }
        };

        let diagnostics = match stderr {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        summarize(tracker, verdicts, status, &diagnostics)
    }

    /// Force-remove the named instance; failures are only logged
    pub async fn teardown(&self, instance: &str) {
        let removed = Command::new(&self.options.binary)
            .args(["container", "rm", "-f", instance])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match removed {
            Ok(status) if status.success() => debug!(instance, "Sandbox instance removed"),
            Ok(status) => warn!(instance, code = ?status.code(), "Failed to remove sandbox instance"),
            Err(e) => warn!(instance, error = %e, "Failed to remove sandbox instance"),
        }
    }

    /// Number of stored instances, running or not
    pub async fn instance_count(&self) -> JudgeResult<usize> {
        let output = Command::new(&self.options.binary)
            .args(["ps", "-a", "-q"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| JudgeError::io(format!("listing instances with '{}'", self.options.binary), e))?;

        if !output.status.success() {
            return Err(JudgeError::SandboxExit(output.status.code()));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .count())
    }

    /// Refuse new work once the stored instance count reaches the ceiling
    pub async fn check_capacity(&self) -> JudgeResult<()> {
        let count = self.instance_count().await?;
        if count >= self.options.max_instances {
            return Err(JudgeError::Capacity {
                count,
                ceiling: self.options.max_instances,
            });
        }
        Ok(())
    }

    /// Startup check: the runtime is installed, the image exists, capacity remains
    pub async fn preflight(&self) -> anyhow::Result<()> {
        let binary = &self.options.binary;

        let version = Command::new(binary)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("sandbox runtime '{}' is not installed", binary))?;
        if !version.status.success() {
            bail!("sandbox runtime '{}' is not usable (exit {:?})", binary, version.status.code());
        }

        let image = Command::new(binary)
            .args(["image", "exists", self.options.image.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .with_context(|| format!("checking sandbox image '{}'", self.options.image))?;
        if !image.success() {
            bail!("sandbox image '{}' does not exist", self.options.image);
        }

        self.check_capacity().await.context("sandbox capacity check failed")?;

        info!(
            binary = %binary,
            version = %String::from_utf8_lossy(&version.stdout).trim(),
            image = %self.options.image,
            "Sandbox preflight passed"
        );
        Ok(())
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = String::new();
    if let Err(e) = reader.read_to_string(&mut buf).await {
        debug!(error = %e, "Failed to read sandbox stderr");
    }
    buf
}

/// Read status lines until `finished` or end of stream
async fn follow(
    stdout: ChildStdout,
    workspace: &Workspace,
    problem: &ProblemDefinition,
    reporter: &Reporter,
) -> JudgeResult<(ProtocolTracker, Vec<TestVerdict>)> {
    let mut lines = BufReader::new(stdout).lines();
    let mut tracker = ProtocolTracker::new(problem.test_count());
    let mut verdicts = Vec::with_capacity(problem.test_count());

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| JudgeError::io("reading sandbox output", e))?
    {
        let Some(event) = protocol::parse_line(&line)? else {
            continue;
        };
        tracker.advance(&event)?;

        match event {
            SandboxEvent::Compiling => reporter.emit(Lifecycle::Compiling),
            SandboxEvent::Compiled(result) => reporter.emit(Lifecycle::Compiled { result }),
            SandboxEvent::Testing(test_case) => reporter.emit(Lifecycle::Testing {
                test_case,
                subtask: problem.subtask_of(test_case),
            }),
            SandboxEvent::Tested { test_case, status } => {
                let verdict = diagnose(workspace, test_case, status).await?;
                debug!(test_case, verdict = %verdict, "Test judged");
                reporter.emit(Lifecycle::Tested {
                    test_case,
                    subtask: problem.subtask_of(test_case),
                    verdict: verdict.clone(),
                });
                verdicts.push(verdict);
            }
            SandboxEvent::Finished => break,
        }
    }

    if !tracker.is_finished() {
        warn!("Sandbox output ended without 'finished'");
    }
    Ok((tracker, verdicts))
}

/// Verdict for one reported test, from the files it left behind
async fn diagnose(workspace: &Workspace, test_case: u32, status: RunStatus) -> JudgeResult<TestVerdict> {
    match status {
        RunStatus::Success => {
            let result_path = workspace.result_path(test_case);
            let produced = tokio::fs::read(&result_path)
                .await
                .map_err(|e| JudgeError::io(format!("reading {}", result_path.display()), e))?;
            let answer_path = workspace.answer_path(test_case);
            let expected = tokio::fs::read_to_string(&answer_path)
                .await
                .map_err(|e| JudgeError::io(format!("reading {}", answer_path.display()), e))?;

            // undecodable output can never match an answer
            let (produced, decodable) = match String::from_utf8(produced) {
                Ok(text) => (text, true),
                Err(e) => (String::from_utf8_lossy(e.as_bytes()).into_owned(), false),
            };
            let measured = protocol::split_trailer(&produced)?;
            if decodable && evaluator::compare(&measured.output, &expected) {
                Ok(TestVerdict::Accepted {
                    time: measured.time,
                    memory: measured.memory,
                })
            } else {
                Ok(TestVerdict::Wrong)
            }
        }
        RunStatus::Error => {
            // a program killed hard may leave no diagnostic at all
            let diagnostic = tokio::fs::read(workspace.error_path(test_case))
                .await
                .unwrap_or_default();
            Ok(protocol::classify_failure(&String::from_utf8_lossy(&diagnostic)))
        }
    }
}

fn summarize(
    tracker: ProtocolTracker,
    verdicts: Vec<TestVerdict>,
    status: ExitStatus,
    diagnostics: &str,
) -> JudgeResult<RunSummary> {
    if status.code() == Some(SANDBOX_RUNTIME_EXIT) {
        warn!(stderr = %diagnostics.trim(), "Container runtime could not run the instance");
        return Err(JudgeError::SandboxExhausted);
    }

    // the execution script exits non-zero after a failed compile
    if tracker.compile_failed() {
        return Ok(RunSummary::CompileFailed);
    }

    if !status.success() {
        warn!(code = ?status.code(), stderr = %diagnostics.trim(), "Sandbox exited abnormally");
        return Err(JudgeError::SandboxExit(status.code()));
    }

    tracker.ensure_complete()?;
    Ok(RunSummary::Judged(verdicts))
}
