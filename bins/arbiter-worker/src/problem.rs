/// Problem Definition - read-only problem data for one execution
///
/// Each problem lives in `<problems_root>/<name>/` with:
/// - `statement.json`: memory (kB) and time (ms) limits plus optional subtasks
/// - `test-cases.json`: ordered `{input, output, subtask?}` entries
///
/// Anything missing or inconsistent here is the problem's fault, never the
/// engine's, so every failure is reported as invalid data.
use crate::error::{JudgeError, JudgeResult};
use serde::{Deserialize, Deserializer};
use std::path::Path;

pub const STATEMENT_FILE: &str = "statement.json";
pub const TEST_CASES_FILE: &str = "test-cases.json";

/// Slack allowed on the subtask weight sum before it is rejected
pub const WEIGHT_TOLERANCE: f64 = 5e-5;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub output: String,
    /// 1-based subtask index
    #[serde(default)]
    pub subtask: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraints {
    /// Kilobytes
    pub max_memory: u64,
    /// Milliseconds
    pub max_time: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawSubtask {
    Weight(f64),
    #[serde(rename_all = "camelCase")]
    Detailed {
        score: f64,
        #[serde(default)]
        test_cases: Option<usize>,
    },
}

impl RawSubtask {
    fn weight(&self) -> f64 {
        match self {
            RawSubtask::Weight(weight) => *weight,
            RawSubtask::Detailed { score, .. } => *score,
        }
    }

    fn test_cases(&self) -> Option<usize> {
        match self {
            RawSubtask::Weight(_) => None,
            RawSubtask::Detailed { test_cases, .. } => *test_cases,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawStatement {
    #[serde(deserialize_with = "integer_or_string")]
    memory: u64,
    #[serde(deserialize_with = "integer_or_string")]
    time: u64,
    #[serde(default)]
    subtasks: Option<Vec<RawSubtask>>,
}

/// Limits are sometimes written as strings ("128000")
fn integer_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Subtask weights and which subtask every test case belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct SubtaskLayout {
    weights: Vec<f64>,
    /// Subtask (1-based) of each test case, indexed by test position
    membership: Vec<u32>,
}

impl SubtaskLayout {
    fn resolve(raw: &[RawSubtask], tests: &[TestCase]) -> JudgeResult<Self> {
        let weights: Vec<f64> = raw.iter().map(RawSubtask::weight).collect();

        if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(JudgeError::invalid(format!("subtask weight {} is not a valid weight", bad)));
        }
        let total: f64 = weights.iter().sum();
        if total > 1.0 + WEIGHT_TOLERANCE {
            return Err(JudgeError::invalid(format!("subtask weights sum to {} which exceeds 1", total)));
        }

        let tagged = tests.iter().filter(|t| t.subtask.is_some()).count();
        let membership = if tagged == tests.len() {
            let mut membership = Vec::with_capacity(tests.len());
            for (i, test) in tests.iter().enumerate() {
                let subtask = test.subtask.unwrap_or_default();
                if subtask == 0 || subtask as usize > weights.len() {
                    return Err(JudgeError::invalid(format!(
                        "test case {} belongs to subtask {} but the problem defines {}",
                        i + 1,
                        subtask,
                        weights.len()
                    )));
                }
                membership.push(subtask);
            }
            membership
        } else if tagged == 0 {
            let counts: Option<Vec<usize>> = raw.iter().map(RawSubtask::test_cases).collect();
            let counts = counts.ok_or_else(|| {
                JudgeError::invalid("subtasks define neither test case counts nor per-test membership")
            })?;
            let assigned: usize = counts.iter().sum();
            if assigned != tests.len() {
                return Err(JudgeError::invalid(format!(
                    "subtasks cover {} test cases but the problem has {}",
                    assigned,
                    tests.len()
                )));
            }
            counts
                .iter()
                .enumerate()
                .flat_map(|(i, count)| std::iter::repeat(i as u32 + 1).take(*count))
                .collect()
        } else {
            return Err(JudgeError::invalid(format!(
                "only {} of {} test cases name a subtask",
                tagged,
                tests.len()
            )));
        };

        for subtask in 1..=weights.len() as u32 {
            if !membership.contains(&subtask) {
                return Err(JudgeError::invalid(format!("subtask {} has no test cases", subtask)));
            }
        }

        Ok(Self { weights, membership })
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Subtask of a 1-based test case number
    pub fn subtask_of(&self, test_case: u32) -> Option<u32> {
        let index = (test_case as usize).checked_sub(1)?;
        self.membership.get(index).copied()
    }
}

#[derive(Debug, Clone)]
pub struct ProblemDefinition {
    pub name: String,
    pub test_cases: Vec<TestCase>,
    pub constraints: Constraints,
    pub subtasks: Option<SubtaskLayout>,
}

impl ProblemDefinition {
    /// Read and validate `<problems_root>/<name>/`
    pub async fn load(problems_root: &Path, name: &str) -> JudgeResult<Self> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(JudgeError::invalid(format!("'{}' is not a valid problem name", name)));
        }

        let problem_path = problems_root.join(name);
        if !tokio::fs::try_exists(&problem_path).await.unwrap_or(false) {
            return Err(JudgeError::invalid(format!(
                "problem directory {} not found",
                problem_path.display()
            )));
        }

        let statement = read_problem_file(&problem_path, STATEMENT_FILE).await?;
        let test_cases = read_problem_file(&problem_path, TEST_CASES_FILE).await?;

        Self::from_json(name, &statement, &test_cases)
    }

    pub fn from_json(name: &str, statement: &str, test_cases: &str) -> JudgeResult<Self> {
        let statement: RawStatement = serde_json::from_str(statement)
            .map_err(|e| JudgeError::invalid(format!("error parsing {} of '{}': {}", STATEMENT_FILE, name, e)))?;
        let test_cases: Vec<TestCase> = serde_json::from_str(test_cases)
            .map_err(|e| JudgeError::invalid(format!("error parsing {} of '{}': {}", TEST_CASES_FILE, name, e)))?;

        if test_cases.is_empty() {
            return Err(JudgeError::invalid(format!("problem '{}' has no test cases", name)));
        }

        let subtasks = match statement.subtasks.as_deref() {
            None | Some([]) => None,
            Some(raw) => Some(SubtaskLayout::resolve(raw, &test_cases)?),
        };

        Ok(Self {
            name: name.to_string(),
            test_cases,
            constraints: Constraints {
                max_memory: statement.memory,
                max_time: statement.time,
            },
            subtasks,
        })
    }

    pub fn test_count(&self) -> usize {
        self.test_cases.len()
    }

    pub fn subtask_of(&self, test_case: u32) -> Option<u32> {
        self.subtasks.as_ref().and_then(|layout| layout.subtask_of(test_case))
    }
}

async fn read_problem_file(problem_path: &Path, file: &str) -> JudgeResult<String> {
    let path = problem_path.join(file);
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| JudgeError::invalid(format!("problem file {} not readable: {}", path.display(), e)))
}
