/// Test Evaluator - Language-Agnostic Comparison and Scoring
///
/// **Core Responsibility:**
/// Compare produced outputs against expected answers and fold per-test
/// verdicts into a final score.
///
/// **Critical Properties:**
/// - Knows nothing about the sandbox
/// - Knows nothing about language runtimes
/// - Pure functions: (outputs, answers) → bool, (verdicts, subtasks) → score
///
/// **Normalization Rules:**
/// - Trim leading and trailing whitespace: YES
/// - Runs of two or more whitespace characters (newlines, tabs) become one space: YES
/// - Single separators are kept, so `"S T A"` never equals `"STA"`
/// - Case sensitivity: YES (exact match required)
///
/// **Scoring Rules:**
/// - No subtasks: 1 if every test is accepted, else 0
/// - Subtasks: a subtask's weight counts only if none of its tests failed;
///   the sum is rounded to 4 decimal places and must not exceed 1
use crate::error::{JudgeError, JudgeResult};
use crate::problem::SubtaskLayout;
use arbiter_common::types::{ScoreReport, TestVerdict};
use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;

lazy_static! {
    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s\s+").expect("whitespace pattern is valid");
}

/// Scores are reported with this many decimal places
const SCORE_DECIMALS: i32 = 4;

/// Normalize output string for comparison
fn normalize_output(output: &str) -> Cow<'_, str> {
    WHITESPACE_RUN.replace_all(output.trim(), " ")
}

/// Compare a produced output with the expected answer
pub fn compare(produced: &str, expected: &str) -> bool {
    normalize_output(produced) == normalize_output(expected)
}

fn round_score(score: f64) -> f64 {
    let factor = 10f64.powi(SCORE_DECIMALS);
    (score * factor).round() / factor
}

/// Aggregate per-test verdicts into the final score.
///
/// `verdicts` are in test order and must cover every test case. Returns the
/// failed subtasks (1-based) alongside the score when the problem has
/// subtasks.
pub fn score(verdicts: &[TestVerdict], subtasks: Option<&SubtaskLayout>) -> JudgeResult<ScoreReport> {
    let Some(layout) = subtasks else {
        let all_accepted = verdicts.iter().all(TestVerdict::is_accepted);
        return Ok(ScoreReport {
            score: if all_accepted { 1.0 } else { 0.0 },
            failed_subtasks: None,
        });
    };

    let mut failed = vec![false; layout.len()];
    for (index, verdict) in verdicts.iter().enumerate() {
        if verdict.is_accepted() {
            continue;
        }
        let test_case = index as u32 + 1;
        let subtask = layout.subtask_of(test_case).ok_or_else(|| {
            JudgeError::Scoring(format!("test case {} belongs to no subtask", test_case))
        })?;
        failed[subtask as usize - 1] = true;
    }

    let raw: f64 = layout
        .weights()
        .iter()
        .zip(&failed)
        .filter(|(_, failed)| !**failed)
        .map(|(weight, _)| weight)
        .sum();
    let total = round_score(raw);

    if total > 1.0 {
        return Err(JudgeError::Scoring(format!("computed score {} exceeds 1", total)));
    }

    let failed_subtasks = failed
        .iter()
        .enumerate()
        .filter(|(_, failed)| **failed)
        .map(|(i, _)| i as u32 + 1)
        .collect();

    Ok(ScoreReport {
        score: total,
        failed_subtasks: Some(failed_subtasks),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::ProblemDefinition;

    fn accepted() -> TestVerdict {
        TestVerdict::Accepted { time: 0.01, memory: 1024 }
    }

    /// Layout with subtasks of the given sizes and weights
    fn layout(sizes: &[usize], weights: &[f64]) -> SubtaskLayout {
        let total: usize = sizes.iter().sum();
        let tests: Vec<String> = (0..total).map(|_| r#"{"input": "", "output": ""}"#.to_string()).collect();
        let subtasks: Vec<String> = sizes
            .iter()
            .zip(weights)
            .map(|(size, weight)| format!(r#"{{"score": {}, "testCases": {}}}"#, weight, size))
            .collect();
        let statement = format!(r#"{{"memory": 1, "time": 1, "subtasks": [{}]}}"#, subtasks.join(","));

        ProblemDefinition::from_json("p", &statement, &format!("[{}]", tests.join(",")))
            .unwrap()
            .subtasks
            .unwrap()
    }

    #[test]
    fn test_compare_identical() {
        let strings = [
            "Aiguines",
            "Gorge du Verdon",
            "y = 2x + 10^2 - (x % 2)",
            "    Camping   de l'Aigle  - Campasun     ",
            "",
        ];
        for s in strings {
            assert!(compare(s, s), "{:?} should equal itself", s);
        }
    }

    #[test]
    fn test_compare_trims_and_collapses() {
        let pairs = [
            (" Riez", "Riez"),
            ("Chapelle   Saint-Maxime", "Chapelle Saint-Maxime"),
            ("\tLac de Sainte-Croix\n", "Lac de Sainte-Croix"),
            ("Tennison\t\t\n \ndanihe", "Tennison danihe"),
            ("Mo \n Na \t Co", "Mo Na Co"),
            ("10\n", "10"),
            ("1 2 3\n4 5 6\n\n", "1 2 3\n4 5 6"),
        ];
        for (produced, expected) in pairs {
            assert!(compare(produced, expected), "{:?} vs {:?}", produced, expected);
        }
    }

    #[test]
    fn test_compare_keeps_single_separators() {
        assert!(!compare("S T A", "STA"));
        assert!(!compare("STA", "S  T  A"));
    }

    #[test]
    fn test_single_whitespace_is_not_rewritten() {
        // a lone tab stays a tab, only runs collapse
        assert!(compare("Puimoisson\t&\t  Riez", "Puimoisson\t& Riez"));
        assert!(!compare("a\tb", "a b"));
    }

    #[test]
    fn test_compare_is_case_sensitive() {
        assert!(!compare("Hello", "hello"));
    }

    #[test]
    fn test_no_subtasks_all_accepted() {
        let report = score(&[accepted(), accepted(), accepted()], None).unwrap();
        assert_eq!(report.score, 1.0);
        assert_eq!(report.failed_subtasks, None);
    }

    #[test]
    fn test_no_subtasks_any_failure_scores_zero() {
        let failures = [
            TestVerdict::Wrong,
            TestVerdict::RuntimeError,
            TestVerdict::MemoryLimitExceeded,
            TestVerdict::TimeLimitExceeded,
        ];
        for failure in failures {
            let report = score(&[accepted(), failure.clone(), accepted()], None).unwrap();
            assert_eq!(report.score, 0.0, "{} should zero the score", failure);
        }
    }

    #[test]
    fn test_weakest_link_subtask() {
        let layout = layout(&[3, 2, 1], &[0.2, 0.3, 0.5]);
        let verdicts = vec![
            accepted(),
            accepted(),
            accepted(),
            accepted(),
            TestVerdict::Wrong,
            accepted(),
        ];

        let report = score(&verdicts, Some(&layout)).unwrap();
        assert_eq!(report.score, 0.7);
        assert_eq!(report.failed_subtasks, Some(vec![2]));
    }

    #[test]
    fn test_multiple_failed_subtasks() {
        let layout = layout(&[3, 2, 1], &[0.2, 0.3, 0.5]);
        let verdicts = vec![
            accepted(),
            accepted(),
            accepted(),
            TestVerdict::TimeLimitExceeded,
            accepted(),
            TestVerdict::MemoryLimitExceeded,
        ];

        let report = score(&verdicts, Some(&layout)).unwrap();
        assert_eq!(report.score, 0.2);
        assert_eq!(report.failed_subtasks, Some(vec![2, 3]));
    }

    #[test]
    fn test_all_subtasks_pass() {
        let layout = layout(&[1, 1, 1], &[0.1, 0.2, 0.7]);
        let report = score(&[accepted(), accepted(), accepted()], Some(&layout)).unwrap();
        // 0.1 + 0.2 + 0.7 accumulates float error before rounding
        assert_eq!(report.score, 1.0);
        assert_eq!(report.failed_subtasks, Some(vec![]));
    }

    #[test]
    fn test_all_subtasks_fail() {
        let layout = layout(&[2, 1], &[0.5, 0.5]);
        let verdicts = vec![TestVerdict::RuntimeError, TestVerdict::Wrong, TestVerdict::Wrong];
        let report = score(&verdicts, Some(&layout)).unwrap();
        assert_eq!(report.score, 0.0);
        assert_eq!(report.failed_subtasks, Some(vec![1, 2]));
    }

    #[test]
    fn test_score_rounded_to_four_places() {
        let layout = layout(&[1, 1, 1], &[0.33333, 0.33333, 0.33334]);
        let report = score(&[accepted(), TestVerdict::Wrong, accepted()], Some(&layout)).unwrap();
        assert_eq!(report.score, 0.6667);
    }

    #[test]
    fn test_round_score() {
        assert_eq!(round_score(0.30000000000000004), 0.3);
        assert_eq!(round_score(1.00004), 1.0);
        assert_eq!(round_score(1.00005), 1.0001);
    }
}
