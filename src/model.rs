//! Core data model shared by every component: `Project`/`PhaseConfig` (the
//! declarative input), `ProjectStatus`/`PhaseStatus` (the persisted output of
//! the Status Store), `Job`/`PhaseEvent` (the live observability surface of
//! the Job Bus), and `EscalationState` (owned by the Escalation Engine).
//!
//! `EvolutionProject`/`BaselineRecord` live in `evolution::project` since
//! they are specific to the evolution pipeline.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a `PhaseConfig.input_from` list: either a bare prior-phase
/// id (copy its whole `output/`), or a phase id scoped to a set of globs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum InputFrom {
    Phase(String),
    Scoped(BTreeMap<String, Vec<String>>),
}

impl InputFrom {
    /// The phase id this entry references.
    pub fn phase_id(&self) -> &str {
        match self {
            InputFrom::Phase(id) => id,
            InputFrom::Scoped(map) => map
                .keys()
                .next()
                .map(|s| s.as_str())
                .unwrap_or_default(),
        }
    }

    /// Globs scoping the copy, if any (`None` means "copy everything").
    pub fn globs(&self) -> Option<&[String]> {
        match self {
            InputFrom::Phase(_) => None,
            InputFrom::Scoped(map) => map.values().next().map(|v| v.as_slice()),
        }
    }
}

/// The kind of post-phase deterministic check (§4.6). A tagged variant per
/// design note §9 ("replace dynamic config maps with a tagged variant for
/// quality_gate").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QualityGate {
    FilesExist { files: Vec<String> },
    SyntaxCheck { language: String },
    TestsPass { command: String },
    ReviewApproved { file: String },
}

impl QualityGate {
    /// The `type` tag this gate serializes under, reused as the
    /// `gate_type` string handed to the Escalation Engine (§4.8).
    pub fn type_name(&self) -> &'static str {
        match self {
            QualityGate::FilesExist { .. } => "files_exist",
            QualityGate::SyntaxCheck { .. } => "syntax_check",
            QualityGate::TestsPass { .. } => "tests_pass",
            QualityGate::ReviewApproved { .. } => "review_approved",
        }
    }
}

/// The declared kind of a phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseType {
    Meeting,
    Consultant,
    Development,
    Review,
    Documentation,
    Test,
}

impl PhaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseType::Meeting => "meeting",
            PhaseType::Consultant => "consultant",
            PhaseType::Development => "development",
            PhaseType::Review => "review",
            PhaseType::Documentation => "documentation",
            PhaseType::Test => "test",
        }
    }
}

/// One phase definition as declared in (or derived from) `phases.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub phase_type: PhaseType,
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub input_from: Vec<InputFrom>,
    #[serde(default)]
    pub output: Vec<String>,
    #[serde(default)]
    pub quality_gate: Option<QualityGate>,
}

impl PhaseConfig {
    pub fn model(&self) -> Option<&str> {
        self.config.get("model").and_then(|v| v.as_str())
    }

    pub fn decompose(&self) -> bool {
        self.config
            .get("decompose")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn template(&self) -> Option<&str> {
        self.config.get("template").and_then(|v| v.as_str())
    }
}

/// Top-level `phases.yaml` document shape.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PhasesFile {
    #[serde(default)]
    pub project_type: Option<String>,
    #[serde(default)]
    pub phases: Vec<PhaseConfig>,
}

/// ADR frontmatter subset the core consumes (§6).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdrFrontmatter {
    pub adr_id: String,
    pub title: String,
    pub status: String,
    #[serde(default)]
    pub project_type: Option<String>,
    #[serde(default)]
    pub component_type: Option<String>,
    #[serde(default)]
    pub classification: Option<String>,
    #[serde(default)]
    pub change_scope: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub files: AdrFiles,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdrFiles {
    #[serde(default)]
    pub create: Vec<String>,
    #[serde(default)]
    pub modify: Vec<String>,
    #[serde(default)]
    pub docs: Vec<String>,
}

/// A fully loaded project: its directory, ADR, and ordered phase list.
#[derive(Debug, Clone)]
pub struct Project {
    pub dir: PathBuf,
    pub adr_path: PathBuf,
    pub adr: AdrFrontmatter,
    pub acceptance_criteria: Vec<String>,
    pub phases: Vec<PhaseConfig>,
}

/// Execution status of one phase, as recorded by the Status Store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseStatus {
    pub phase_id: String,
    pub status: Status,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub error: Option<String>,
}

impl PhaseStatus {
    pub fn pending(phase_id: impl Into<String>) -> Self {
        Self {
            phase_id: phase_id.into(),
            status: Status::Pending,
            started_at: None,
            completed_at: None,
            retries: 0,
            error: None,
        }
    }
}

/// Persisted per-project run state — the single `status.yaml` file (§6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectStatus {
    pub project_id: String,
    pub status: Status,
    pub total_phases: usize,
    pub completed_phases: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub phases: BTreeMap<String, PhaseStatus>,
}

impl ProjectStatus {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            status: Status::Pending,
            total_phases: 0,
            completed_phases: 0,
            started_at: None,
            completed_at: None,
            error: None,
            phases: BTreeMap::new(),
        }
    }

    /// Invariant checked by tests: `completed_phases` equals the count of
    /// phases whose status is `Completed`.
    pub fn completed_phases_consistent(&self) -> bool {
        self.completed_phases
            == self
                .phases
                .values()
                .filter(|p| p.status == Status::Completed)
                .count()
    }
}

/// A single run instance (§3 Job).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub current_phase: Option<String>,
    pub phases: Vec<JobPhaseRecord>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// The Job Bus's own live/observational per-phase record — distinct from
/// the Status Store's persistent `PhaseStatus` (§9 open question: these two
/// status tracks are kept separate on purpose).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPhaseRecord {
    pub phase_id: String,
    pub status: Status,
    pub duration_seconds: Option<f64>,
    pub outputs: Vec<PathBuf>,
}

impl Job {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            current_phase: None,
            phases: Vec::new(),
            error: None,
        }
    }
}

/// An event on the Job Bus (§3, §4.11, §4.12).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum PhaseEvent {
    JobStarted,
    PhaseStart { phase_id: String },
    PhaseSkipped { phase_id: String },
    Output { phase_id: String, stream: OutputStream, text: String },
    PhaseRetry { phase_id: String, retry: u32 },
    VerificationFailed { phase_id: String, missing_files: Vec<String> },
    VerificationPassed { phase_id: String },
    PhaseEnd { phase_id: String, success: bool },
    JobCompleted,
    JobFailed { error: String },
    JobCancelled,
    Keepalive,
    // Evolution pipeline events (§4.12).
    PipelineStarted,
    StepStarted { step: String },
    StepCompleted { step: String, detail: Option<String> },
    StepFailed { step: String, error: String },
    StepSkipped { step: String },
    PipelineCompleted { message: String },
    PipelineFailed { step: String, error: String },
    PipelineError { error: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Escalation level (§4.8 state machine).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    None,
    Stage1,
    Stage2,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub gate_type: String,
    pub message: String,
    pub details: serde_json::Value,
    pub level: String,
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationState {
    pub phase_id: String,
    pub level: EscalationLevel,
    pub attempt_count: u32,
    pub total_attempts: u32,
    #[serde(default)]
    pub failure_history: Vec<FailureRecord>,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl EscalationState {
    pub fn new(phase_id: impl Into<String>) -> Self {
        Self {
            phase_id: phase_id.into(),
            level: EscalationLevel::None,
            attempt_count: 0,
            total_attempts: 0,
            failure_history: Vec::new(),
            context: BTreeMap::new(),
        }
    }

    pub fn current_model(&self) -> Option<&str> {
        self.context.get("current_model").and_then(|v| v.as_str())
    }

    pub fn current_hints(&self) -> Vec<String> {
        self.context
            .get("hints")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}
