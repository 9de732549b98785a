//! Evolution Pipeline composition (§4.12): runs a project's pending phases
//! through the Orchestrator (C10), deploys the result to a twin (C12),
//! validates it against a baseline (C13), and -- if configured -- integrates
//! it into production (C14). One job end to end; all steps share the same
//! `job_id`/[`JobBus`] so a subscriber sees one continuous event stream.

use std::path::PathBuf;

use chrono::Utc;

use crate::adr;
use crate::config::HelixConfig;
use crate::evolution::deployer::Deployer;
use crate::evolution::integrator::Integrator;
use crate::evolution::project::{EvolutionProject, EvolutionStatus};
use crate::evolution::validator::Validator;
use crate::job_bus::JobBus;
use crate::model::{JobStatus, PhaseEvent, Status};
use crate::orchestrator::{self, RunOptions};
use crate::status_store::StatusStore;

pub struct PipelineOptions {
    pub project_dir: PathBuf,
    pub project_name: String,
    pub job_id: String,
    pub twin_root: PathBuf,
    pub remote: String,
    pub baseline_branch: String,
    pub test_command: Vec<String>,
    pub baseline_path: PathBuf,
    pub permanent_skips_path: PathBuf,
    pub auto_integrate: bool,
}

/// Run the pipeline to completion, emitting `pipeline_*`/`step_*` events
/// onto `bus` under `opts.job_id`. Returns `Ok(())` on every outcome
/// (failure paths are reported as `pipeline_failed` events, not `Err`) --
/// the only `Err` returns are unexpected I/O failures reading project state
/// itself.
pub async fn run_evolution_pipeline(opts: PipelineOptions, config: &HelixConfig, bus: &JobBus) -> anyhow::Result<()> {
    let job_id = opts.job_id.as_str();
    bus.emit(job_id, PhaseEvent::PipelineStarted).await;
    bus.update_status(job_id, JobStatus::Running).await;

    let mut project = EvolutionProject::load(&opts.project_dir, &opts.project_name)?;

    let store = StatusStore::new(&opts.project_dir);
    let status = store.load_or_create(&opts.project_name)?;
    let has_pending_phases = status.total_phases == 0 || status.completed_phases < status.total_phases;

    if has_pending_phases {
        bus.emit(job_id, PhaseEvent::StepStarted { step: "execute".to_string() }).await;

        let run_opts = RunOptions {
            project_dir: &opts.project_dir,
            project_id: &opts.project_name,
            template_dir: config.template_dir.as_deref(),
            config,
            dry_run: false,
            resume: true,
            job_id,
            close_on_completion: false,
            start_phase: None,
        };

        let run_result = orchestrator::run(run_opts, bus).await;
        match run_result {
            Ok(s) if s.status == Status::Completed => {
                bus.emit(
                    job_id,
                    PhaseEvent::StepCompleted { step: "execute".to_string(), detail: None },
                )
                .await;
            }
            Ok(s) => {
                let error = s.error.unwrap_or_else(|| "execution did not complete".to_string());
                return fail_pipeline(bus, job_id, &mut project, "execute", error).await;
            }
            Err(e) => {
                return fail_pipeline(bus, job_id, &mut project, "execute", e.to_string()).await;
            }
        }
    } else {
        bus.emit(job_id, PhaseEvent::StepSkipped { step: "execute".to_string() }).await;
    }

    bus.emit(job_id, PhaseEvent::StepStarted { step: "deploy".to_string() }).await;
    let control_script = config
        .control_script
        .clone()
        .unwrap_or_else(|| PathBuf::from("./control.sh"));
    let health_port = config.health_check_port.unwrap_or(8080);
    let deployer = Deployer::new(
        opts.twin_root.clone(),
        opts.remote.clone(),
        opts.baseline_branch.clone(),
        control_script.clone(),
        health_port,
        &config.health_check_path,
    );
    let deploy_result = deployer.full_deploy(&mut project).await;
    if !deploy_result.success {
        let error = deploy_result.error.unwrap_or(deploy_result.message);
        return fail_pipeline(bus, job_id, &mut project, "deploy", error).await;
    }
    bus.emit(
        job_id,
        PhaseEvent::StepCompleted {
            step: "deploy".to_string(),
            detail: Some(format!("{} files copied", deploy_result.files_copied)),
        },
    )
    .await;

    bus.emit(job_id, PhaseEvent::StepStarted { step: "validate".to_string() }).await;
    let validator = Validator::new(opts.twin_root.clone(), opts.test_command.clone());
    let adr_test_files = adr::load_project(&opts.project_dir, vec![])
        .map(|p| {
            let mut files = p.adr.files.create.clone();
            files.extend(p.adr.files.modify.iter().cloned());
            files
        })
        .unwrap_or_default();
    let evaluation = match validator.validate(
        &opts.baseline_path,
        &opts.permanent_skips_path,
        Some(&adr_test_files),
    ) {
        Ok(e) => e,
        Err(e) => return fail_pipeline(bus, job_id, &mut project, "validate", e.to_string()).await,
    };
    bus.emit(
        job_id,
        PhaseEvent::StepCompleted {
            step: "validate".to_string(),
            detail: Some(evaluation.summary()),
        },
    )
    .await;

    if !evaluation.passed {
        return fail_pipeline(
            bus,
            job_id,
            &mut project,
            "validate",
            format!("blocking failures: {}", evaluation.blocking_failures.join(", ")),
        )
        .await;
    }

    if !opts.auto_integrate {
        bus.emit(
            job_id,
            PhaseEvent::PipelineCompleted {
                message: "validation passed; call integrate to complete".to_string(),
            },
        )
        .await;
        bus.update_status(job_id, JobStatus::Completed).await;
        bus.close_subscribers(job_id).await;
        return Ok(());
    }

    let Some(production_root) = config.production_root.clone() else {
        return fail_pipeline(
            bus,
            job_id,
            &mut project,
            "integrate",
            "auto_integrate is on but no production_root is configured".to_string(),
        )
        .await;
    };

    bus.emit(job_id, PhaseEvent::StepStarted { step: "integrate".to_string() }).await;
    let mut integrator = Integrator::new(production_root, control_script, health_port, &config.health_check_path);
    let integration_result = integrator.full_integration(&mut project, Utc::now()).await;
    if !integration_result.success {
        let error = integration_result.error.unwrap_or(integration_result.message);
        return fail_pipeline(bus, job_id, &mut project, "integrate", error).await;
    }
    bus.emit(
        job_id,
        PhaseEvent::StepCompleted {
            step: "integrate".to_string(),
            detail: Some(format!("{} files integrated", integration_result.files_integrated)),
        },
    )
    .await;

    bus.emit(
        job_id,
        PhaseEvent::PipelineCompleted { message: "integrated".to_string() },
    )
    .await;
    bus.update_status(job_id, JobStatus::Completed).await;
    bus.close_subscribers(job_id).await;
    Ok(())
}

async fn fail_pipeline(
    bus: &JobBus,
    job_id: &str,
    project: &mut EvolutionProject,
    step: &str,
    error: String,
) -> anyhow::Result<()> {
    let _ = project.set_status(EvolutionStatus::Failed);
    bus.emit(job_id, PhaseEvent::StepFailed { step: step.to_string(), error: error.clone() }).await;
    bus.emit(job_id, PhaseEvent::PipelineFailed { step: step.to_string(), error }).await;
    bus.set_error(job_id, format!("pipeline failed at step '{step}'")).await;
    bus.update_status(job_id, JobStatus::Failed).await;
    bus.close_subscribers(job_id).await;
    Ok(())
}
