/// Sandbox status protocol
///
/// The execution script reports progress on stdout, one status per line:
///
/// ```text
/// compiling
/// compiled success|error
/// testing <n>
/// tested <n> success|error
/// finished
/// ```
///
/// Anything else is a protocol violation. Per-test results live in files
/// next to the status stream: a successful run leaves its output followed
/// by a two-line resource trailer, a failed run leaves a diagnostic whose
/// last line may carry a resource-limit sentinel.
use crate::error::{JudgeError, JudgeResult};
use arbiter_common::types::{CompileResult, TestVerdict};

pub const OUT_OF_MEMORY: &str = "Out of memory!";
pub const OUT_OF_TIME: &str = "Out of time!";

/// How the sandbox says one test run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxEvent {
    Compiling,
    Compiled(CompileResult),
    Testing(u32),
    Tested { test_case: u32, status: RunStatus },
    Finished,
}

fn test_number(token: Option<&str>, line: &str) -> JudgeResult<u32> {
    token
        .and_then(|t| t.parse::<u32>().ok())
        .filter(|n| *n > 0)
        .ok_or_else(|| JudgeError::protocol(format!("bad test number in '{}'", line)))
}

/// Parse one stdout line; blank lines carry nothing
pub fn parse_line(line: &str) -> JudgeResult<Option<SandboxEvent>> {
    let mut tokens = line.split_whitespace();
    let Some(status) = tokens.next() else {
        return Ok(None);
    };

    let event = match status {
        "compiling" => SandboxEvent::Compiling,
        "compiled" => match tokens.next() {
            Some("success") => SandboxEvent::Compiled(CompileResult::Success),
            Some("error") => SandboxEvent::Compiled(CompileResult::Error),
            _ => return Err(JudgeError::protocol(format!("bad compile result in '{}'", line))),
        },
        "testing" => SandboxEvent::Testing(test_number(tokens.next(), line)?),
        "tested" => {
            let test_case = test_number(tokens.next(), line)?;
            let status = match tokens.next() {
                Some("success") => RunStatus::Success,
                Some("error") => RunStatus::Error,
                _ => return Err(JudgeError::protocol(format!("bad run status in '{}'", line))),
            };
            SandboxEvent::Tested { test_case, status }
        }
        "finished" => SandboxEvent::Finished,
        other => return Err(JudgeError::protocol(format!("unknown status '{}'", other))),
    };

    if let Some(extra) = tokens.next() {
        return Err(JudgeError::protocol(format!("unexpected '{}' in '{}'", extra, line)));
    }
    Ok(Some(event))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Compiling,
    Ready,
    CompileFailed,
    Testing(u32),
    Finished,
}

/// Checks that events arrive in protocol order and every test is reported once
#[derive(Debug)]
pub struct ProtocolTracker {
    test_count: u32,
    reported: u32,
    phase: Phase,
    compile_failed: bool,
}

impl ProtocolTracker {
    pub fn new(test_count: usize) -> Self {
        Self {
            test_count: test_count as u32,
            reported: 0,
            phase: Phase::Start,
            compile_failed: false,
        }
    }

    pub fn advance(&mut self, event: &SandboxEvent) -> JudgeResult<()> {
        let next = match (self.phase, event) {
            (Phase::Start, SandboxEvent::Compiling) => Phase::Compiling,
            (Phase::Compiling, SandboxEvent::Compiled(CompileResult::Success)) => Phase::Ready,
            (Phase::Compiling, SandboxEvent::Compiled(CompileResult::Error)) => {
                self.compile_failed = true;
                Phase::CompileFailed
            }
            (Phase::Start | Phase::Ready, SandboxEvent::Testing(n)) => {
                if *n != self.reported + 1 || *n > self.test_count {
                    return Err(JudgeError::protocol(format!(
                        "test {} started, expected {} of {}",
                        n,
                        self.reported + 1,
                        self.test_count
                    )));
                }
                Phase::Testing(*n)
            }
            (Phase::Testing(current), SandboxEvent::Tested { test_case, .. }) if current == *test_case => {
                self.reported += 1;
                Phase::Ready
            }
            (Phase::Start | Phase::Ready | Phase::CompileFailed, SandboxEvent::Finished) => Phase::Finished,
            (phase, event) => {
                return Err(JudgeError::protocol(format!("{:?} is out of order after {:?}", event, phase)));
            }
        };
        self.phase = next;
        Ok(())
    }

    pub fn compile_failed(&self) -> bool {
        self.compile_failed
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Every test must be reported unless the compile step failed
    pub fn ensure_complete(&self) -> JudgeResult<()> {
        if let Phase::Testing(n) = self.phase {
            return Err(JudgeError::protocol(format!("test {} never reported a result", n)));
        }
        if self.reported != self.test_count {
            return Err(JudgeError::protocol(format!(
                "sandbox reported {} of {} test cases",
                self.reported, self.test_count
            )));
        }
        Ok(())
    }
}

/// Produced output with the resource trailer stripped
#[derive(Debug, Clone, PartialEq)]
pub struct MeasuredOutput {
    pub output: String,
    /// User time in seconds
    pub time: f64,
    /// Peak memory in kilobytes
    pub memory: u64,
}

fn trailer_value<T: std::str::FromStr>(line: &str, what: &str) -> JudgeResult<T> {
    line.split_whitespace()
        .last()
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| JudgeError::protocol(format!("unreadable {} trailer '{}'", what, line)))
}

/// Split a result file into program output and its resource trailer.
///
/// The last two lines are `User time (second) <secs>` and
/// `Memory used (kilobytes): <kB>`. Everything before them is returned
/// byte for byte, line endings included.
pub fn split_trailer(content: &str) -> JudgeResult<MeasuredOutput> {
    let body = content.strip_suffix('\n').unwrap_or(content);
    let memory_start = body
        .rfind('\n')
        .ok_or_else(|| JudgeError::protocol("result file is missing its resource trailer"))?;
    let (rest, memory_line) = (&body[..memory_start], &body[memory_start + 1..]);
    let time_start = rest.rfind('\n').map_or(0, |i| i + 1);
    let (output, time_line) = rest.split_at(time_start);

    Ok(MeasuredOutput {
        output: output.to_string(),
        time: trailer_value(time_line, "time")?,
        memory: trailer_value(memory_line, "memory")?,
    })
}

/// Verdict for a run the sandbox reported as failed, from its diagnostic.
///
/// Trailing blank lines are skipped before the sentinel check.
pub fn classify_failure(diagnostic: &str) -> TestVerdict {
    let last = diagnostic.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or_default();
    if last.contains(OUT_OF_MEMORY) {
        TestVerdict::MemoryLimitExceeded
    } else if last.contains(OUT_OF_TIME) {
        TestVerdict::TimeLimitExceeded
    } else {
        TestVerdict::RuntimeError
    }
}
