//! Phase Executor (C9): composes Data-Flow → Template → Agent Runner → one
//! phase run, with a dry-run escape hatch for wiring tests and a setup
//! validator the Orchestrator calls before committing to a run.

use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::agent_runner::{self, AgentResult, ProgressSink};
use crate::config::HelixConfig;
use crate::model::PhaseConfig;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Serialize)]
pub struct PhaseResult {
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip)]
    pub agent_result: Option<AgentResult>,
    pub error: Option<String>,
    pub has_plan: bool,
    pub plan_path: Option<std::path::PathBuf>,
}

/// Phase directory is missing required scaffolding (no `CLAUDE.md`, e.g.).
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("phase directory does not exist: {0}")]
    PhaseDirMissing(std::path::PathBuf),
    #[error("instruction file missing: {0}")]
    InstructionsMissing(std::path::PathBuf),
}

/// Ensure `phase_dir/{input,output}` exist and the rendered instructions
/// are present before invoking the agent.
pub fn validate_phase_setup(phase_dir: &Path) -> Result<(), SetupError> {
    if !phase_dir.exists() {
        return Err(SetupError::PhaseDirMissing(phase_dir.to_path_buf()));
    }
    std::fs::create_dir_all(phase_dir.join("input")).ok();
    std::fs::create_dir_all(phase_dir.join("output")).ok();
    let instructions = phase_dir.join("CLAUDE.md");
    if !instructions.exists() {
        return Err(SetupError::InstructionsMissing(instructions));
    }
    Ok(())
}

pub async fn execute(
    phase_dir: &Path,
    phase: &PhaseConfig,
    config: &HelixConfig,
    dry_run: bool,
    mut sink: Option<&mut dyn ProgressSink>,
) -> PhaseResult {
    let started_at = Utc::now();
    let start = Instant::now();

    if dry_run {
        tokio::time::sleep(Duration::from_millis(100)).await;
        return PhaseResult {
            success: true,
            started_at,
            completed_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
            agent_result: Some(AgentResult {
                stdout: "[DRY RUN] Phase execution simulated".to_string(),
                stderr: String::new(),
                exit_code: 0,
            }),
            error: None,
            has_plan: false,
            plan_path: None,
        };
    }

    if let Err(e) = validate_phase_setup(phase_dir) {
        return PhaseResult {
            success: false,
            started_at,
            completed_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
            agent_result: None,
            error: Some(e.to_string()),
            has_plan: false,
            plan_path: None,
        };
    }

    let (agent_bin, mut flags) = config.agent_invocation();
    if let Some(model) = phase.model() {
        flags.push("--model".to_string());
        flags.push(model.to_string());
    }
    let timeout = config.default_timeout();

    let invocation = match agent_runner::invocation_for_phase(&agent_bin, &flags, phase_dir, timeout) {
        Ok(inv) => inv,
        Err(e) => {
            return PhaseResult {
                success: false,
                started_at,
                completed_at: Utc::now(),
                duration_ms: start.elapsed().as_millis() as u64,
                agent_result: None,
                error: Some(format!("could not read phase instructions: {e}")),
                has_plan: false,
                plan_path: None,
            };
        }
    };

    let run_result = match sink.as_deref_mut() {
        Some(sink) => agent_runner::run(&invocation, Some(sink)).await,
        None => agent_runner::run(&invocation, None).await,
    };

    let (success, agent_result, error) = match run_result {
        Ok(result) if result.exit_code == 0 => (true, Some(result), None),
        Ok(result) => {
            let code = result.exit_code;
            (false, Some(result), Some(format!("agent exited with code {code}")))
        }
        Err(e) => (false, None, Some(e.to_string())),
    };

    let (has_plan, plan_path) = if success && phase.decompose() {
        let candidate = phase_dir.join("output").join("plan.yaml");
        if candidate.exists() {
            (true, Some(candidate))
        } else {
            (false, None)
        }
    } else {
        (false, None)
    };

    PhaseResult {
        success,
        started_at,
        completed_at: Utc::now(),
        duration_ms: start.elapsed().as_millis() as u64,
        agent_result,
        error,
        has_plan,
        plan_path,
    }
}
