//! Orchestrator Runner (C10): the main loop. Pops phases off a deque,
//! prepares their inputs, runs them, verifies and gates the result,
//! escalates on failure, and expands the deque when a phase decomposes
//! into a plan.

use std::collections::VecDeque;
use std::path::Path;

use serde::Deserialize;

use crate::adr;
use crate::agent_runner::ProgressSink;
use crate::config::HelixConfig;
use crate::data_flow;
use crate::escalation::{Action, EscalationEngine};
use crate::job_bus::JobBus;
use crate::model::{
    AdrFrontmatter, InputFrom, JobPhaseRecord, JobStatus, OutputStream, PhaseConfig, PhaseEvent,
    ProjectStatus, Status,
};
use crate::phase_executor;
use crate::phase_loader;
use crate::quality_gate;
use crate::status_store::StatusStore;
use crate::template::{self, RenderContext};
use crate::verifier;

pub struct RunOptions<'a> {
    pub project_dir: &'a Path,
    pub project_id: &'a str,
    pub template_dir: Option<&'a Path>,
    pub config: &'a HelixConfig,
    pub dry_run: bool,
    pub resume: bool,
    pub job_id: &'a str,
    /// Whether `run` owns this job's terminal transition (updates the bus
    /// status to completed/failed and closes subscribers). The evolution
    /// pipeline runs the Orchestrator as one step of a larger job and sets
    /// this to `false` so its own later steps keep the subscriber stream
    /// open (§4.12 "one continuous job").
    pub close_on_completion: bool,
    /// `--phase <id>`: start the run at this phase, dropping every phase
    /// before it from the queue entirely (not merely skipping them as
    /// already-completed). `None` runs the whole phase list.
    pub start_phase: Option<&'a str>,
}

/// A single entry in a phase's `plan.yaml` (§4.10 plan expansion).
#[derive(Debug, Clone, Deserialize)]
struct PlanPhase {
    id: String,
    #[serde(rename = "type")]
    phase_type: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    quality_gate: Option<crate::model::QualityGate>,
}

#[derive(Debug, Deserialize)]
struct PlanFile {
    phases: Vec<PlanPhase>,
}

/// Bridges the Agent Runner's synchronous [`ProgressSink`] callbacks to the
/// (async) Job Bus, so live agent output reaches `logs --follow`/SSE
/// subscribers during a real run (§1, §4.11). Uses [`JobBus::try_emit`]
/// rather than `emit` since `on_text`/`on_tool_use` are called from inside
/// the agent's stdout read loop and can't `.await`.
struct BusProgressSink {
    bus: JobBus,
    job_id: String,
    phase_id: String,
}

impl BusProgressSink {
    fn new(bus: JobBus, job_id: String, phase_id: String) -> Self {
        Self {
            bus,
            job_id,
            phase_id,
        }
    }

    fn emit_output(&self, text: &str) {
        self.bus.try_emit(
            &self.job_id,
            PhaseEvent::Output {
                phase_id: self.phase_id.clone(),
                stream: OutputStream::Stdout,
                text: text.to_string(),
            },
        );
    }
}

impl ProgressSink for BusProgressSink {
    fn on_text(&mut self, text: &str) {
        self.emit_output(text);
    }

    fn on_tool_use(&mut self, description: &str) {
        self.emit_output(description);
    }
}

pub async fn run(opts: RunOptions<'_>, bus: &JobBus) -> anyhow::Result<ProjectStatus> {
    let store = StatusStore::new(opts.project_dir);
    let mut status = store.load_or_create(opts.project_id)?;

    if status.status == Status::Completed && !opts.resume {
        return Ok(status);
    }

    let phases = phase_loader::load(opts.project_dir, opts.template_dir)?;
    status.status = Status::Running;
    status.total_phases = status.total_phases.max(phases.len());
    if status.started_at.is_none() {
        status.started_at = Some(chrono::Utc::now());
    }
    store.save(&status)?;

    bus.emit(opts.job_id, PhaseEvent::JobStarted).await;

    let mut deque: VecDeque<PhaseConfig> = phases.into_iter().collect();
    if let Some(start) = opts.start_phase {
        while deque.front().is_some_and(|p| p.id != start) {
            deque.pop_front();
        }
    }
    let escalation_engine = EscalationEngine::new(opts.config.model_chain.clone())
        .with_ceilings(opts.config.max_stage1_attempts, opts.config.max_stage2_attempts);

    // Loaded lazily on first use: a project with no phases to run never
    // needs an ADR on disk.
    let mut adr_cache: Option<(AdrFrontmatter, Vec<String>)> = None;

    while let Some(mut phase) = deque.pop_front() {
        if bus.is_cancel_requested(opts.job_id).await {
            status.status = Status::Failed;
            status.error = Some("cancelled".to_string());
            store.save(&status)?;
            bus.emit(opts.job_id, PhaseEvent::JobCancelled).await;
            if opts.close_on_completion {
                bus.update_status(opts.job_id, JobStatus::Cancelled).await;
                bus.close_subscribers(opts.job_id).await;
            }
            return Ok(status);
        }

        if opts.resume && store.is_complete(&status, &phase.id) {
            bus.emit(
                opts.job_id,
                PhaseEvent::PhaseSkipped {
                    phase_id: phase.id.clone(),
                },
            )
            .await;
            continue;
        }

        store.mark_started(&mut status, &phase.id);
        store.save(&status)?;
        bus.start_phase(opts.job_id, &phase.id).await;
        bus.emit(
            opts.job_id,
            PhaseEvent::PhaseStart {
                phase_id: phase.id.clone(),
            },
        )
        .await;

        data_flow::prepare_phase_inputs(opts.project_dir, &phase)?;

        let phase_dir = opts.project_dir.join("phases").join(&phase.id);

        // A retry following an escalation (§4.8) carries its model switch
        // and hints forward: the escalation state persisted by `escalate`
        // on the prior attempt is re-applied onto this attempt's phase
        // config and rendered instructions.
        let escalation_state = escalation_engine.load_state(&phase_dir, &phase.id).unwrap_or_else(|_| {
            crate::model::EscalationState::new(&phase.id)
        });
        if let Some(model) = escalation_state.current_model() {
            phase
                .config
                .insert("model".to_string(), serde_json::json!(model));
        }
        let hints = escalation_state.current_hints();

        if adr_cache.is_none() {
            let project = adr::load_project(opts.project_dir, vec![])?;
            adr_cache = Some((project.adr, project.acceptance_criteria));
        }
        let (adr, acceptance_criteria) = adr_cache.as_ref().unwrap();
        render_phase_instructions(
            opts.project_dir,
            opts.template_dir,
            opts.project_id,
            adr,
            &phase,
            acceptance_criteria,
            &hints,
        )?;

        let mut output_sink = BusProgressSink::new(bus.clone(), opts.job_id.to_string(), phase.id.clone());
        let result =
            phase_executor::execute(&phase_dir, &phase, opts.config, opts.dry_run, Some(&mut output_sink))
                .await;

        let outcome = evaluate_phase_outcome(
            opts.job_id,
            bus,
            &escalation_engine,
            &phase_dir,
            &phase,
            result.success,
            result.error.clone(),
        )
        .await;

        bus.record_phase_result(
            opts.job_id,
            JobPhaseRecord {
                phase_id: phase.id.clone(),
                status: if outcome.success {
                    Status::Completed
                } else {
                    Status::Failed
                },
                duration_seconds: Some(result.duration_ms as f64 / 1000.0),
                outputs: vec![],
            },
        )
        .await;

        if outcome.success {
            store.mark_completed(&mut status, &phase.id);
            store.save(&status)?;
            bus.emit(
                opts.job_id,
                PhaseEvent::PhaseEnd {
                    phase_id: phase.id.clone(),
                    success: true,
                },
            )
            .await;

            if result.has_plan {
                if let Some(plan_path) = &result.plan_path {
                    match expand_plan(plan_path) {
                        Ok(new_phases) => {
                            status.total_phases += new_phases.len();
                            for np in new_phases.into_iter().rev() {
                                deque.push_front(np);
                            }
                            store.save(&status)?;
                        }
                        Err(e) => {
                            store.mark_failed(&mut status, &phase.id, &e.to_string());
                            store.save(&status)?;
                        }
                    }
                }
            }
        } else {
            let retries = store.increment_retries(&mut status, &phase.id);
            store.save(&status)?;
            bus.emit(
                opts.job_id,
                PhaseEvent::PhaseRetry {
                    phase_id: phase.id.clone(),
                    retry: retries,
                },
            )
            .await;

            if retries <= opts.config.max_total_retries {
                deque.push_front(phase);
                continue;
            }

            store.mark_failed(
                &mut status,
                &phase.id,
                &outcome.error.unwrap_or_else(|| "phase failed".to_string()),
            );
            status.status = Status::Failed;
            status.error = Some(format!("phase '{}' failed", phase.id));
            store.save(&status)?;
            bus.emit(
                opts.job_id,
                PhaseEvent::JobFailed {
                    error: status.error.clone().unwrap_or_default(),
                },
            )
            .await;
            if opts.close_on_completion {
                bus.update_status(opts.job_id, JobStatus::Failed).await;
                bus.close_subscribers(opts.job_id).await;
            }
            return Ok(status);
        }
    }

    status.status = Status::Completed;
    status.completed_at = Some(chrono::Utc::now());
    store.save(&status)?;
    bus.emit(opts.job_id, PhaseEvent::JobCompleted).await;
    if opts.close_on_completion {
        bus.update_status(opts.job_id, JobStatus::Completed).await;
        bus.close_subscribers(opts.job_id).await;
    }
    Ok(status)
}

struct PhaseOutcome {
    success: bool,
    error: Option<String>,
}

/// Run verification (if the phase declares outputs) and the quality gate
/// (if any), escalating through [`EscalationEngine`] on the first failure
/// encountered. Returns the final pass/fail outcome for this attempt.
async fn evaluate_phase_outcome(
    job_id: &str,
    bus: &JobBus,
    escalation_engine: &EscalationEngine,
    phase_dir: &Path,
    phase: &PhaseConfig,
    agent_succeeded: bool,
    agent_error: Option<String>,
) -> PhaseOutcome {
    if !agent_succeeded {
        return PhaseOutcome {
            success: false,
            error: agent_error,
        };
    }

    if !phase.output.is_empty() {
        let verification = verifier::verify(phase_dir, &phase.output);
        if !verification.success {
            bus.emit(
                job_id,
                PhaseEvent::VerificationFailed {
                    phase_id: phase.id.clone(),
                    missing_files: verification.missing_files.clone(),
                },
            )
            .await;
            let details = serde_json::json!({
                "missing_files": verification.missing_files,
                "syntax_errors": verification.syntax_errors,
            });
            return escalate(
                job_id,
                bus,
                escalation_engine,
                phase_dir,
                &phase.id,
                "verification",
                &verification.message,
                details,
                Some(&verification),
            )
            .await;
        }
        bus.emit(
            job_id,
            PhaseEvent::VerificationPassed {
                phase_id: phase.id.clone(),
            },
        )
        .await;
    }

    if let Some(gate) = &phase.quality_gate {
        match quality_gate::evaluate(phase_dir, gate) {
            Ok(_) => {}
            Err(e) => {
                let gate_type = e.gate_type();
                let details = e.details();
                return escalate(
                    job_id,
                    bus,
                    escalation_engine,
                    phase_dir,
                    &phase.id,
                    gate_type,
                    &e.to_string(),
                    details,
                    None,
                )
                .await;
            }
        }
    }

    PhaseOutcome {
        success: true,
        error: None,
    }
}

/// `verification` is `Some` only when this escalation was triggered by a
/// Post-Phase Verifier failure (as opposed to a quality gate failure); in
/// that case a retry file is written under `phase_dir` (§4.7/§4.10) so the
/// next agent invocation sees concrete feedback about what's missing.
async fn escalate(
    job_id: &str,
    bus: &JobBus,
    engine: &EscalationEngine,
    phase_dir: &Path,
    phase_id: &str,
    gate_type: &str,
    message: &str,
    details: serde_json::Value,
    verification: Option<&verifier::VerificationResult>,
) -> PhaseOutcome {
    let mut state = engine.load_state(phase_dir, phase_id).unwrap_or_else(|_| {
        crate::model::EscalationState::new(phase_id)
    });
    let action = engine.handle_gate_failure(&mut state, gate_type, message, details);
    let _ = engine.save_state(phase_dir, &state);

    if let Some(verification) = verification {
        let _ = verifier::write_retry_file(phase_dir, verification, state.total_attempts);
    }

    match action {
        Ok(Action::HumanReview { .. }) => {
            if let Ok(path) = engine.write_review_request(phase_dir, &state) {
                bus.emit(
                    job_id,
                    PhaseEvent::Output {
                        phase_id: phase_id.to_string(),
                        stream: OutputStream::Stderr,
                        text: format!("human review requested: {}", path.display()),
                    },
                )
                .await;
            }
            PhaseOutcome {
                success: false,
                error: Some(format!("phase '{phase_id}' awaiting human review")),
            }
        }
        Ok(_) => PhaseOutcome {
            success: false,
            error: Some(message.to_string()),
        },
        Err(e) => PhaseOutcome {
            success: false,
            error: Some(e.to_string()),
        },
    }
}

/// Render `phases/<id>/CLAUDE.md` from the ADR + phase context (§4.4),
/// before the phase executor reads it as the agent's prompt. Template
/// selection honors an explicit `template:` override in the phase config,
/// otherwise derives a name from phase type + ADR language.
fn render_phase_instructions(
    project_dir: &Path,
    template_dir: Option<&Path>,
    project_id: &str,
    adr: &AdrFrontmatter,
    phase: &PhaseConfig,
    acceptance_criteria: &[String],
    escalation_hints: &[String],
) -> anyhow::Result<()> {
    let available_names: Vec<String> = template_dir
        .map(|dir| {
            std::fs::read_dir(dir)
                .into_iter()
                .flatten()
                .filter_map(|e| e.ok())
                .filter_map(|e| e.path().file_stem().map(|s| s.to_string_lossy().into_owned()))
                .collect()
        })
        .unwrap_or_default();
    let available: Vec<&str> = available_names.iter().map(String::as_str).collect();

    let language = adr.language.as_deref().unwrap_or("generic");
    let template_name = phase
        .template()
        .map(str::to_string)
        .unwrap_or_else(|| template::select_template(phase.phase_type.as_str(), language, &available));

    let source = template::load_template_source(template_dir, &template_name);
    let context =
        RenderContext::from_adr_and_phase(project_id, adr, phase, acceptance_criteria, escalation_hints);
    template::render_instruction_file(project_dir, phase, &context, &source)?;
    Ok(())
}

fn expand_plan(plan_path: &Path) -> anyhow::Result<Vec<PhaseConfig>> {
    let raw = std::fs::read_to_string(plan_path)?;
    let plan: PlanFile = serde_yaml::from_str(&raw)?;

    let mut seen = std::collections::BTreeSet::new();
    let mut result = Vec::new();
    for p in &plan.phases {
        for dep in &p.depends_on {
            if !seen.contains(dep.as_str()) {
                anyhow::bail!("plan phase '{}' references unresolved dependency '{}'", p.id, dep);
            }
        }
        seen.insert(p.id.as_str());
        let phase_type = parse_phase_type(&p.phase_type)?;
        result.push(PhaseConfig {
            id: p.id.clone(),
            name: p.description.clone(),
            phase_type,
            config: Default::default(),
            input_from: p.depends_on.iter().map(|d| InputFrom::Phase(d.clone())).collect(),
            output: vec![],
            quality_gate: p.quality_gate.clone(),
        });
    }
    Ok(result)
}

fn parse_phase_type(raw: &str) -> anyhow::Result<crate::model::PhaseType> {
    use crate::model::PhaseType::*;
    Ok(match raw {
        "meeting" => Meeting,
        "consultant" => Consultant,
        "development" => Development,
        "review" => Review,
        "documentation" => Documentation,
        "test" => Test,
        other => anyhow::bail!("unknown phase type '{other}' in plan"),
    })
}
