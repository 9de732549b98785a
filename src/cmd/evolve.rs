//! `evolve` command: drives the self-evolution pipeline (§4.12) for a
//! project end to end -- run pending phases, deploy to a twin, validate
//! against a recorded baseline, and optionally integrate into production.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::HelixConfig;
use crate::evolution::pipeline::{self, PipelineOptions};
use crate::job_bus::JobBus;
use crate::model::{JobStatus, PhaseEvent};

pub struct EvolveArgs {
    pub project_path: PathBuf,
    pub project_name: Option<String>,
    pub twin_root: Option<PathBuf>,
    pub remote: String,
    pub baseline_branch: String,
    pub test_command: Vec<String>,
    pub baseline_path: Option<PathBuf>,
    pub permanent_skips_path: Option<PathBuf>,
    pub auto_integrate: bool,
    pub config_path: Option<PathBuf>,
}

pub async fn cmd_evolve(args: EvolveArgs) -> Result<i32> {
    let project_dir = args.project_path.as_path();
    let config = HelixConfig::load(project_dir, args.config_path.as_deref())
        .context("loading helix configuration")?;

    let twin_root = args
        .twin_root
        .or_else(|| config.test_root.clone())
        .context("no twin root configured: pass --twin-root or set test_root in .helix/config.toml")?;

    let project_name = args.project_name.unwrap_or_else(|| {
        project_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string())
    });

    let job_id = uuid::Uuid::new_v4().to_string();
    let bus = JobBus::new().with_channel_capacity(config.event_channel_capacity);
    bus.create_job(job_id.clone()).await;
    let mut rx = bus.subscribe(&job_id).await.expect("job was just created");

    let opts = PipelineOptions {
        project_dir: project_dir.to_path_buf(),
        project_name,
        job_id: job_id.clone(),
        twin_root,
        remote: args.remote,
        baseline_branch: args.baseline_branch,
        test_command: args.test_command,
        baseline_path: args.baseline_path.unwrap_or_else(|| project_dir.join(".helix/baseline.json")),
        permanent_skips_path: args
            .permanent_skips_path
            .unwrap_or_else(|| project_dir.join(".permanent_skips")),
        auto_integrate: args.auto_integrate,
    };

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    pipeline::run_evolution_pipeline(opts, &config, &bus).await?;
    let _ = printer.await;

    let job = bus.get_job(&job_id).await;
    Ok(match job.map(|j| j.status) {
        Some(JobStatus::Failed) => 1,
        _ => 0,
    })
}

fn print_event(event: &PhaseEvent) {
    match event {
        PhaseEvent::PipelineStarted => println!("pipeline started"),
        PhaseEvent::StepStarted { step } => println!("-> {step}"),
        PhaseEvent::StepCompleted { step, detail } => match detail {
            Some(detail) => println!("   {step} ok: {detail}"),
            None => println!("   {step} ok"),
        },
        PhaseEvent::StepSkipped { step } => println!("   {step} skipped"),
        PhaseEvent::StepFailed { step, error } => println!("   {step} failed: {error}"),
        PhaseEvent::PipelineCompleted { message } => println!("pipeline completed: {message}"),
        PhaseEvent::PipelineFailed { step, error } => println!("pipeline failed at {step}: {error}"),
        _ => {}
    }
}
