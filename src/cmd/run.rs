//! `run` command (§6): executes a project's phases end to end, mirroring
//! every job snapshot and event to disk so a separate `jobs`/`logs`/`stop`
//! invocation can observe this run while it's in flight.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::HelixConfig;
use crate::job_bus::JobBus;
use crate::job_store;
use crate::model::{OutputStream, PhaseEvent, Status};
use crate::orchestrator::{self, RunOptions};
use crate::phase_loader;
use crate::ui::OrchestratorUI;

pub struct RunArgs {
    pub project_path: PathBuf,
    pub resume: bool,
    pub dry_run: bool,
    pub phase: Option<String>,
    pub model: Option<String>,
    pub config_path: Option<PathBuf>,
    pub verbose: bool,
}

/// Poll interval for noticing a `stop`-written cancel sentinel from another
/// process; cancellation only takes effect at the next phase boundary
/// regardless of how quickly it's observed here.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub async fn cmd_run(args: RunArgs) -> Result<i32> {
    let project_dir = args.project_path.as_path();
    anyhow::ensure!(
        project_dir.is_dir(),
        "project path {} is not a directory",
        project_dir.display()
    );

    let mut config = HelixConfig::load(project_dir, args.config_path.as_deref())
        .context("loading helix configuration")?;
    if let Some(model) = &args.model {
        config.model_chain = vec![model.clone()];
    }

    let project_id = project_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string());
    let job_id = uuid::Uuid::new_v4().to_string();

    let span = tracing::info_span!("run", project_id = %project_id, job_id = %job_id);
    let _enter = span.enter();
    info!("starting run");

    let bus = JobBus::new().with_channel_capacity(config.event_channel_capacity);
    bus.create_job(job_id.clone()).await;
    if let Some(job) = bus.get_job(&job_id).await {
        job_store::save_snapshot(project_dir, &job).context("writing initial job snapshot")?;
    }

    let total_phases = phase_loader::load(project_dir, config.template_dir.as_deref())
        .map(|phases| phases.len())
        .unwrap_or(0);
    let ui = OrchestratorUI::new(total_phases as u64, args.verbose);

    let mut rx = bus.subscribe(&job_id).await.expect("job was just created");
    let (keepalive_stop_tx, keepalive_stop_rx) = tokio::sync::oneshot::channel();
    bus.spawn_keepalive(job_id.clone(), keepalive_stop_rx);

    let mirror_project_dir = project_dir.to_path_buf();
    let mirror_job_id = job_id.clone();
    let mirror_bus = bus.clone();
    let mirror_handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let _ = job_store::append_event(&mirror_project_dir, &mirror_job_id, &event);
            if let Some(job) = mirror_bus.get_job(&mirror_job_id).await {
                let _ = job_store::save_snapshot(&mirror_project_dir, &job);
            }
            render_event(&ui, &event);
        }
        ui
    });

    let poll_project_dir = project_dir.to_path_buf();
    let poll_job_id = job_id.clone();
    let poll_bus = bus.clone();
    let poll_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(CANCEL_POLL_INTERVAL);
        loop {
            interval.tick().await;
            if job_store::is_cancel_requested(&poll_project_dir, &poll_job_id) {
                poll_bus.request_cancel(&poll_job_id).await;
                break;
            }
        }
    });

    let sigint_job_id = job_id.clone();
    let sigint_bus = bus.clone();
    let sigint_handle = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            sigint_bus.request_cancel(&sigint_job_id).await;
        }
    });

    let run_opts = RunOptions {
        project_dir,
        project_id: &project_id,
        template_dir: config.template_dir.as_deref(),
        config: &config,
        dry_run: args.dry_run,
        resume: args.resume,
        job_id: &job_id,
        close_on_completion: true,
        start_phase: args.phase.as_deref(),
    };

    let run_result = orchestrator::run(run_opts, &bus).await;

    let _ = keepalive_stop_tx.send(());
    poll_handle.abort();
    sigint_handle.abort();
    let ui = mirror_handle.await.unwrap_or_else(|_| OrchestratorUI::new(total_phases as u64, args.verbose));

    match run_result {
        Ok(status) => {
            let cancelled = status.error.as_deref() == Some("cancelled");
            let failed_phase = status
                .phases
                .values()
                .find(|p| p.status == Status::Failed)
                .map(|p| p.phase_id.clone());
            ui.print_run_summary(
                status.completed_phases as u32,
                status.total_phases as u32,
                failed_phase.as_deref(),
            );
            if cancelled {
                Ok(130)
            } else if status.status == Status::Failed {
                Ok(1)
            } else {
                Ok(0)
            }
        }
        Err(e) => {
            eprintln!("run failed: {e:#}");
            Ok(1)
        }
    }
}

fn render_event(ui: &OrchestratorUI, event: &PhaseEvent) {
    match event {
        PhaseEvent::PhaseStart { phase_id } => ui.start_phase(phase_id, phase_id),
        PhaseEvent::PhaseSkipped { phase_id } => {
            ui.log_step(&format!("phase {phase_id} already completed, skipping"))
        }
        PhaseEvent::Output { stream, text, .. } => {
            let line = match stream {
                OutputStream::Stdout => text.clone(),
                OutputStream::Stderr => format!("stderr: {text}"),
            };
            ui.log_step(&line);
        }
        PhaseEvent::PhaseRetry { phase_id, retry } => ui.escalation(phase_id, "retry", *retry),
        PhaseEvent::VerificationFailed { missing_files, .. } => {
            ui.gate_failed("verification", &format!("missing: {}", missing_files.join(", ")))
        }
        PhaseEvent::VerificationPassed { .. } => ui.gate_passed("verification"),
        PhaseEvent::PhaseEnd { phase_id, success } => {
            if *success {
                ui.phase_complete(phase_id);
            } else {
                ui.phase_failed(phase_id, "see status for details");
            }
        }
        PhaseEvent::JobFailed { error } => ui.phase_failed("job", error),
        _ => {}
    }
}
