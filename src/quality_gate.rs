//! Quality Gate Evaluator (C6): deterministic post-phase checks. Results
//! are data only — no retry/escalation decisions are made here, that's
//! the Escalation Engine's job.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::GateError;
use crate::model::QualityGate;

const TESTS_PASS_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub passed: bool,
    pub gate_type: String,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl GateResult {
    fn pass(gate_type: &str, message: impl Into<String>) -> Self {
        Self {
            passed: true,
            gate_type: gate_type.to_string(),
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    fn fail(gate_type: &str, message: impl Into<String>) -> Self {
        Self {
            passed: false,
            gate_type: gate_type.to_string(),
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }
}

pub fn evaluate(phase_dir: &Path, gate: &QualityGate) -> Result<GateResult, GateError> {
    match gate {
        QualityGate::FilesExist { files } => evaluate_files_exist(phase_dir, files),
        QualityGate::SyntaxCheck { language } => evaluate_syntax_check(phase_dir, language),
        QualityGate::TestsPass { command } => evaluate_tests_pass(phase_dir, command),
        QualityGate::ReviewApproved { file } => evaluate_review_approved(phase_dir, file),
    }
}

fn evaluate_files_exist(phase_dir: &Path, files: &[String]) -> Result<GateResult, GateError> {
    let missing: Vec<_> = files
        .iter()
        .map(|f| phase_dir.join(f))
        .filter(|p| !p.exists())
        .collect();
    if missing.is_empty() {
        Ok(GateResult::pass("files_exist", "all declared files present"))
    } else {
        Err(GateError::FilesMissing { files: missing })
    }
}

fn evaluate_syntax_check(phase_dir: &Path, language: &str) -> Result<GateResult, GateError> {
    let (toolchain, args): (&str, Vec<&str>) = match language {
        "python" => ("python3", vec!["-m", "py_compile"]),
        "typescript" => ("tsc", vec!["--noEmit"]),
        "javascript" => ("node", vec!["--check"]),
        "go" => ("go", vec!["build", "-o", "/dev/null"]),
        "rust" => ("cargo", vec!["check"]),
        other => {
            return Ok(GateResult::pass(
                "syntax_check",
                format!("language '{other}' has no syntax checker configured; skipped"),
            ));
        }
    };

    let which = Command::new("which").arg(toolchain).output();
    if which.map(|o| !o.status.success()).unwrap_or(true) {
        return Err(GateError::ToolchainMissing {
            language: language.to_string(),
        });
    }

    let output = Command::new(toolchain)
        .args(&args)
        .current_dir(phase_dir)
        .output()
        .map_err(|_| GateError::ToolchainMissing {
            language: language.to_string(),
        })?;

    if output.status.success() {
        Ok(GateResult::pass("syntax_check", format!("{language} syntax ok")))
    } else {
        Err(GateError::SyntaxCheckFailed {
            language: language.to_string(),
            message: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

fn evaluate_tests_pass(phase_dir: &Path, command: &str) -> Result<GateResult, GateError> {
    let (status, stderr) = run_with_timeout(phase_dir, command, TESTS_PASS_TIMEOUT)?;
    let code = status.code().unwrap_or(-1);
    if code == 0 {
        Ok(GateResult::pass("tests_pass", "test command exited 0"))
    } else {
        Err(GateError::TestsFailed { code, stderr })
    }
}

/// Spawns with stderr piped so the Escalation Engine can later inspect it
/// (e.g. the `AssertionError` hint rule, §C.1) while still polling for the
/// timeout ourselves rather than blocking on `wait_with_output`.
fn run_with_timeout(
    dir: &Path,
    command: &str,
    timeout: Duration,
) -> Result<(std::process::ExitStatus, String), GateError> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(dir)
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| GateError::TestsFailed {
            code: e.raw_os_error().unwrap_or(-1),
            stderr: String::new(),
        })?;

    let start = std::time::Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                return Ok((status, stderr));
            }
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    return Err(GateError::TestsFailed {
                        code: 124,
                        stderr: String::new(),
                    });
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(_) => {
                return Err(GateError::TestsFailed {
                    code: -1,
                    stderr: String::new(),
                })
            }
        }
    }
}

fn evaluate_review_approved(phase_dir: &Path, file: &str) -> Result<GateResult, GateError> {
    let path = phase_dir.join(file);
    let raw = std::fs::read_to_string(&path).map_err(|_| GateError::ReviewNotApproved {
        file: path.clone(),
    })?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|_| GateError::ReviewNotApproved { file: path.clone() })?;
    match value.get("approved").and_then(|v| v.as_bool()) {
        Some(true) => Ok(GateResult::pass("review_approved", format!("{file} approved"))),
        _ => Err(GateError::ReviewNotApproved { file: path }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn files_exist_passes_when_all_present() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("out.py"), "x").unwrap();
        let gate = QualityGate::FilesExist {
            files: vec!["out.py".to_string()],
        };
        let result = evaluate(dir.path(), &gate).unwrap();
        assert!(result.passed);
    }

    #[test]
    fn files_exist_fails_when_missing() {
        let dir = tempdir().unwrap();
        let gate = QualityGate::FilesExist {
            files: vec!["missing.py".to_string()],
        };
        let err = evaluate(dir.path(), &gate).unwrap_err();
        assert!(matches!(err, GateError::FilesMissing { .. }));
    }

    #[test]
    fn unsupported_language_passes_with_informational_message() {
        let dir = tempdir().unwrap();
        let gate = QualityGate::SyntaxCheck {
            language: "cobol".to_string(),
        };
        let result = evaluate(dir.path(), &gate).unwrap();
        assert!(result.passed);
        assert!(result.message.contains("cobol"));
    }

    #[test]
    fn tests_pass_succeeds_on_zero_exit_command() {
        let dir = tempdir().unwrap();
        let gate = QualityGate::TestsPass {
            command: "true".to_string(),
        };
        let result = evaluate(dir.path(), &gate).unwrap();
        assert!(result.passed);
    }

    #[test]
    fn tests_pass_fails_on_nonzero_exit_command() {
        let dir = tempdir().unwrap();
        let gate = QualityGate::TestsPass {
            command: "false".to_string(),
        };
        let err = evaluate(dir.path(), &gate).unwrap_err();
        assert!(matches!(err, GateError::TestsFailed { code: 1, .. }));
    }

    #[test]
    fn review_approved_reads_approved_flag() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("review.json"), r#"{"approved": true}"#).unwrap();
        let gate = QualityGate::ReviewApproved {
            file: "review.json".to_string(),
        };
        let result = evaluate(dir.path(), &gate).unwrap();
        assert!(result.passed);
    }

    #[test]
    fn review_not_approved_when_flag_false() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("review.json"), r#"{"approved": false}"#).unwrap();
        let gate = QualityGate::ReviewApproved {
            file: "review.json".to_string(),
        };
        let err = evaluate(dir.path(), &gate).unwrap_err();
        assert!(matches!(err, GateError::ReviewNotApproved { .. }));
    }
}
