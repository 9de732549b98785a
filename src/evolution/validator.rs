//! Validator (C13): runs a test command against the twin, classifies the
//! result against a recorded baseline, and decides pass/fail.
//!
//! Grounded in `evolution/test_baseline.py`'s `TestBaseline`,
//! `TestEvaluationResult`, and `evaluate_against_baseline` (recovered from
//! its test suite, since the source module itself was not present in the
//! retrieved pack -- see DESIGN.md).

use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use regex::Regex;

use crate::evolution::project::{load_permanent_skips, BaselineRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationResult {
    pub passed: bool,
    pub total_tests: u32,
    pub passed_tests: u32,
    pub pre_existing: Vec<String>,
    pub regressions: Vec<String>,
    pub new_test_failures: Vec<String>,
    pub blocking_failures: Vec<String>,
    pub ignored_failures: Vec<String>,
}

impl EvaluationResult {
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Tests passed: {}/{}",
            self.passed_tests, self.total_tests
        )];
        if self.passed {
            if !self.ignored_failures.is_empty() {
                lines.push(format!(
                    "{} pre-existing failures ignored",
                    self.ignored_failures.len()
                ));
            }
        } else {
            lines.push(format!(
                "Tests failed: {} blocking failures",
                self.blocking_failures.len()
            ));
            if !self.regressions.is_empty() {
                lines.push(format!("Regressions: {}", self.regressions.join(", ")));
            }
            if !self.new_test_failures.is_empty() {
                lines.push(format!(
                    "New test failures: {}",
                    self.new_test_failures.join(", ")
                ));
            }
        }
        lines.join("\n")
    }
}

/// Strip a test node id's leading `./` and return its file component (the
/// part before `::`), for matching against a project's declared test files.
fn normalize_test_file(path: &str) -> String {
    let path = path.strip_prefix("./").unwrap_or(path);
    path.split("::").next().unwrap_or(path).to_string()
}

fn node_file(node_id: &str) -> &str {
    node_id.split("::").next().unwrap_or(node_id)
}

/// Classify `current_failures` against `baseline` and an optional set of
/// ADR-owned test files (§4.12 Validator.evaluate).
pub fn evaluate(
    current_failures: &BTreeSet<String>,
    current_total: u32,
    current_passed: u32,
    baseline: &BaselineRecord,
    adr_test_files: Option<&[String]>,
    permanent_skips: &BTreeSet<String>,
) -> EvaluationResult {
    let adr_files: BTreeSet<String> = adr_test_files
        .unwrap_or(&[])
        .iter()
        .map(|f| normalize_test_file(f))
        .collect();

    let mut pre_existing: Vec<String> = current_failures
        .intersection(&baseline.failed_tests)
        .cloned()
        .collect();
    let new_failures: BTreeSet<String> = current_failures
        .difference(&baseline.failed_tests)
        .cloned()
        .collect();

    let mut new_test_failures: Vec<String> = Vec::new();
    let mut regressions: Vec<String> = Vec::new();
    for failure in &new_failures {
        if adr_files.contains(node_file(failure)) {
            new_test_failures.push(failure.clone());
        } else {
            regressions.push(failure.clone());
        }
    }

    let mut blocking_failures: Vec<String> =
        regressions.iter().chain(new_test_failures.iter()).cloned().collect();

    let mut ignored_failures: Vec<String> = current_failures
        .iter()
        .filter(|f| baseline.failed_tests.contains(*f) || permanent_skips.contains(*f))
        .cloned()
        .collect();

    pre_existing.sort();
    regressions.sort();
    new_test_failures.sort();
    blocking_failures.sort();
    ignored_failures.sort();
    ignored_failures.dedup();

    EvaluationResult {
        passed: blocking_failures.is_empty(),
        total_tests: current_total,
        passed_tests: current_passed,
        pre_existing,
        regressions,
        new_test_failures,
        blocking_failures,
        ignored_failures,
    }
}

/// Parse pytest-style text output into `(total, passed, failed_node_ids)`.
/// Grounded in `_parse_pytest_text_output`: prefers `FAILED <nodeid>` lines
/// for the failing set, falls back to the summary line's counts for totals.
pub fn parse_pytest_text_output(stdout: &str, stderr: &str) -> (u32, u32, BTreeSet<String>) {
    let combined = format!("{stdout}\n{stderr}");
    let failed_re = Regex::new(r"FAILED\s+(\S+)").unwrap();
    let failed: BTreeSet<String> = failed_re
        .captures_iter(&combined)
        .map(|c| c[1].to_string())
        .collect();

    let summary_re =
        Regex::new(r"(\d+)\s+passed(?:,\s*(\d+)\s+failed)?(?:,\s*(\d+)\s+error)?").unwrap();
    if let Some(caps) = summary_re.captures(&combined) {
        let passed: u32 = caps.get(1).map_or(0, |m| m.as_str().parse().unwrap_or(0));
        let failed_count: u32 = caps.get(2).map_or(0, |m| m.as_str().parse().unwrap_or(0));
        let error_count: u32 = caps.get(3).map_or(0, |m| m.as_str().parse().unwrap_or(0));
        let total = passed + failed_count + error_count;
        return (total, passed, failed);
    }

    if combined.trim().is_empty() {
        return (0, 0, BTreeSet::new());
    }
    (failed.len() as u32, 0, failed)
}

pub struct Validator {
    pub twin_root: std::path::PathBuf,
    pub test_command: Vec<String>,
}

impl Validator {
    pub fn new(twin_root: std::path::PathBuf, test_command: Vec<String>) -> Self {
        Self {
            twin_root,
            test_command,
        }
    }

    /// Run the configured test command against the twin and parse its
    /// output; never fails on a nonzero exit (a nonzero exit from the test
    /// runner usually just means "some tests failed").
    pub fn run_tests(&self) -> Result<(u32, u32, BTreeSet<String>)> {
        let Some((bin, args)) = self.test_command.split_first() else {
            anyhow::bail!("validator test_command is empty");
        };
        let output = Command::new(bin)
            .args(args)
            .current_dir(&self.twin_root)
            .output()
            .with_context(|| format!("failed to spawn test command {bin}"))?;
        Ok(parse_pytest_text_output(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        ))
    }

    /// Load `baseline.json` and `.permanent_skips` (both optional), run
    /// tests, and classify the result.
    pub fn validate(
        &self,
        baseline_path: &Path,
        permanent_skips_path: &Path,
        adr_test_files: Option<&[String]>,
    ) -> Result<EvaluationResult> {
        let baseline = BaselineRecord::load(baseline_path)?.unwrap_or_default();
        let skips = load_permanent_skips(permanent_skips_path)?;
        let (total, passed, failed) = self.run_tests()?;
        Ok(evaluate(
            &failed,
            total,
            passed,
            &baseline,
            adr_test_files,
            &skips,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline(failed: &[&str]) -> BaselineRecord {
        BaselineRecord {
            timestamp: None,
            commit_sha: Some("abc12345".to_string()),
            total_tests: 100,
            passed_tests: 100 - failed.len() as u32,
            failed_tests: failed.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn no_failures_passes() {
        let result = evaluate(&BTreeSet::new(), 100, 100, &baseline(&[]), None, &BTreeSet::new());
        assert!(result.passed);
        assert!(result.blocking_failures.is_empty());
    }

    #[test]
    fn pre_existing_failures_are_ignored_not_blocking() {
        let current: BTreeSet<String> = ["tests/test_old.py::test_known_failure"]
            .into_iter()
            .map(String::from)
            .collect();
        let result = evaluate(
            &current,
            100,
            99,
            &baseline(&["tests/test_old.py::test_known_failure"]),
            None,
            &BTreeSet::new(),
        );
        assert!(result.passed);
        assert_eq!(result.pre_existing, vec!["tests/test_old.py::test_known_failure"]);
        assert_eq!(result.ignored_failures, vec!["tests/test_old.py::test_known_failure"]);
        assert!(result.regressions.is_empty());
    }

    #[test]
    fn regression_blocks() {
        let current: BTreeSet<String> = ["tests/test_existing.py::test_was_passing"]
            .into_iter()
            .map(String::from)
            .collect();
        let result = evaluate(&current, 100, 99, &baseline(&[]), None, &BTreeSet::new());
        assert!(!result.passed);
        assert_eq!(result.regressions, vec!["tests/test_existing.py::test_was_passing"]);
        assert_eq!(result.blocking_failures, vec!["tests/test_existing.py::test_was_passing"]);
    }

    #[test]
    fn new_test_failure_from_adr_blocks_but_is_not_a_regression() {
        let current: BTreeSet<String> = ["tests/new_feature/test_new.py::test_foo"]
            .into_iter()
            .map(String::from)
            .collect();
        let result = evaluate(
            &current,
            101,
            100,
            &baseline(&[]),
            Some(&["tests/new_feature/test_new.py".to_string()]),
            &BTreeSet::new(),
        );
        assert!(!result.passed);
        assert_eq!(result.new_test_failures, vec!["tests/new_feature/test_new.py::test_foo"]);
        assert!(result.regressions.is_empty());
    }

    #[test]
    fn adr_test_file_matching_tolerates_leading_dot_slash() {
        let current: BTreeSet<String> = ["tests/new/test_feature.py::test_a"]
            .into_iter()
            .map(String::from)
            .collect();
        let result = evaluate(
            &current,
            101,
            100,
            &baseline(&[]),
            Some(&["./tests/new/test_feature.py".to_string()]),
            &BTreeSet::new(),
        );
        assert_eq!(result.new_test_failures, vec!["tests/new/test_feature.py::test_a"]);
    }

    #[test]
    fn results_are_sorted_for_determinism() {
        let current: BTreeSet<String> = ["z_test::a", "a_test::z", "m_test::m"]
            .into_iter()
            .map(String::from)
            .collect();
        let result = evaluate(&current, 100, 97, &baseline(&[]), None, &BTreeSet::new());
        assert_eq!(result.regressions, vec!["a_test::z", "m_test::m", "z_test::a"]);
    }

    #[test]
    fn classification_partitions_current_failures() {
        let current: BTreeSet<String> = [
            "tests/test_old.py::test_flaky",
            "tests/test_core.py::test_regression",
            "tests/adr_030/test_new.py::test_new_feature",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        let result = evaluate(
            &current,
            101,
            98,
            &baseline(&["tests/test_old.py::test_flaky"]),
            Some(&["tests/adr_030/test_new.py".to_string()]),
            &BTreeSet::new(),
        );
        let mut union: BTreeSet<String> = BTreeSet::new();
        union.extend(result.pre_existing.iter().cloned());
        union.extend(result.regressions.iter().cloned());
        union.extend(result.new_test_failures.iter().cloned());
        assert_eq!(union, current);
        assert_eq!(result.pre_existing.len() + result.regressions.len() + result.new_test_failures.len(), 3);
    }

    #[test]
    fn parse_pytest_text_output_reads_summary_line() {
        let stdout = "tests/test_foo.py::test_one PASSED\ntests/test_foo.py::test_two FAILED\n=== 1 passed, 1 failed in 0.05s ===\nFAILED tests/test_foo.py::test_two";
        let (total, passed, failed) = parse_pytest_text_output(stdout, "");
        assert_eq!(total, 2);
        assert_eq!(passed, 1);
        assert!(failed.contains("tests/test_foo.py::test_two"));
    }

    #[test]
    fn parse_pytest_text_output_counts_errors_into_total() {
        let stdout = "=== 5 passed, 2 failed, 1 error in 1.0s ===";
        let (total, passed, _) = parse_pytest_text_output(stdout, "");
        assert_eq!(total, 8);
        assert_eq!(passed, 5);
    }

    #[test]
    fn parse_pytest_text_output_handles_empty_input() {
        let (total, passed, failed) = parse_pytest_text_output("", "");
        assert_eq!(total, 0);
        assert_eq!(passed, 0);
        assert!(failed.is_empty());
    }
}
