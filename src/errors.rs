//! Typed error hierarchy for the HELIX orchestrator.
//!
//! Mirrors the eight error kinds of the component design: malformed specs,
//! agent execution/timeout, gate and verification failures, escalation
//! ceilings, external tool (VCS/control-script) failures, human-review
//! requests, and cancellation. Nothing below the Job Bus raises across a
//! task boundary — every subsystem translates into one of these variants.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error returned by library entry points.
#[derive(Debug, Error)]
pub enum HelixError {
    #[error(transparent)]
    MalformedSpec(#[from] SpecError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Escalation(#[from] EscalationError),

    #[error(transparent)]
    ExternalTool(#[from] ExternalToolError),

    #[error("human review required for phase {phase_id}: see {}", request_path.display())]
    HumanReviewRequested {
        phase_id: String,
        request_path: PathBuf,
    },

    #[error("job cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// `phases.yaml`/ADR parsing and validation failures. Fatal for the run.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("phases.yaml is invalid: {0}")]
    PhasesYamlInvalid(String),

    #[error("ADR file could not be parsed: {0}")]
    AdrUnparseable(String),

    #[error("phase '{phase}' references unknown phase '{reference}' in input_from")]
    UnknownPhaseReference { phase: String, reference: String },

    #[error("duplicate phase id '{0}' in phases.yaml")]
    DuplicatePhaseId(String),

    #[error("unsupported phase type '{0}'")]
    UnsupportedPhaseType(String),
}

/// Agent subprocess failures. Recoverable by retry / model switch / escalation.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to spawn agent process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("agent exited with non-zero code {code}")]
    NonZeroExit { code: i32 },

    #[error("agent timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Deterministic quality gate failures. Recoverable via escalation.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("missing files: {files:?}")]
    FilesMissing { files: Vec<PathBuf> },

    #[error("syntax check failed for {language}: {message}")]
    SyntaxCheckFailed { language: String, message: String },

    #[error("test command failed with exit code {code}")]
    TestsFailed { code: i32, stderr: String },

    #[error("review file {file} does not have approved=true")]
    ReviewNotApproved { file: PathBuf },

    #[error("toolchain for {language} is not available")]
    ToolchainMissing { language: String },
}

impl GateError {
    /// The `quality_gate.type` this failure belongs to, for the Escalation
    /// Engine's `gate_type` (§4.8) — independent of `QualityGate::type_name`
    /// since `ToolchainMissing` also belongs to `syntax_check`.
    pub fn gate_type(&self) -> &'static str {
        match self {
            GateError::FilesMissing { .. } => "files_exist",
            GateError::SyntaxCheckFailed { .. } | GateError::ToolchainMissing { .. } => {
                "syntax_check"
            }
            GateError::TestsFailed { .. } => "tests_pass",
            GateError::ReviewNotApproved { .. } => "review_approved",
        }
    }

    /// Structured failure data for `EscalationEngine::handle_gate_failure`'s
    /// `details` argument, consumed by `generate_hints` (§C.1): missing file
    /// list, syntax file/message, or stderr, instead of an empty `{}`.
    pub fn details(&self) -> serde_json::Value {
        match self {
            GateError::FilesMissing { files } => serde_json::json!({
                "files": files.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
            }),
            GateError::SyntaxCheckFailed { language, message } => serde_json::json!({
                "language": language,
                "stderr": message,
            }),
            GateError::ToolchainMissing { language } => serde_json::json!({
                "language": language,
            }),
            GateError::TestsFailed { code, stderr } => serde_json::json!({
                "code": code,
                "stderr": stderr,
            }),
            GateError::ReviewNotApproved { file } => serde_json::json!({
                "file": file.display().to_string(),
            }),
        }
    }
}

/// Expected outputs missing or invalid. Recoverable with bounded retry.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("missing declared outputs: {files:?}")]
    MissingOutputs { files: Vec<PathBuf> },

    #[error("verification retries exhausted for phase '{phase_id}'")]
    RetriesExhausted { phase_id: String },
}

/// Escalation state machine failures.
#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("escalation ceiling exceeded at level {level}")]
    CeilingExceeded { level: String },
}

/// VCS or control-script failures. Fatal for the current pipeline step;
/// triggers rollback in the evolution pipeline.
#[derive(Debug, Error)]
pub enum ExternalToolError {
    #[error("vcs command `{command}` failed: {stderr}")]
    Vcs { command: String, stderr: String },

    #[error("control script {path} {action} failed: {message}")]
    ControlScript {
        path: PathBuf,
        action: String,
        message: String,
    },

    #[error("health check against {url} failed")]
    HealthCheckFailed { url: String },
}
