//! `logs` command (§6): replays a job's recorded events, optionally
//! following as the `run` process that owns the job keeps appending to
//! `events.jsonl`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::job_store;
use crate::model::{JobStatus, PhaseEvent};

pub struct LogsArgs {
    pub project_path: PathBuf,
    pub job_id: String,
    pub follow: bool,
}

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub async fn cmd_logs(args: LogsArgs) -> Result<i32> {
    let mut seen = 0usize;
    let mut terminal = false;

    loop {
        let events = job_store::read_events(&args.project_path, &args.job_id)?;
        for event in events.iter().skip(seen) {
            println!("{}", format_event(event));
            if is_terminal(event) {
                terminal = true;
            }
        }
        seen = events.len();

        if !args.follow || terminal {
            break;
        }

        if let Some(job) = job_store::load_snapshot(&args.project_path, &args.job_id)? {
            if matches!(
                job.status,
                JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
            ) {
                break;
            }
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let failed = job_store::load_snapshot(&args.project_path, &args.job_id)?
        .map(|j| j.status == JobStatus::Failed)
        .unwrap_or(false);
    Ok(if failed { 1 } else { 0 })
}

fn is_terminal(event: &PhaseEvent) -> bool {
    matches!(
        event,
        PhaseEvent::JobCompleted
            | PhaseEvent::JobFailed { .. }
            | PhaseEvent::JobCancelled
            | PhaseEvent::PipelineCompleted { .. }
            | PhaseEvent::PipelineFailed { .. }
    )
}

fn format_event(event: &PhaseEvent) -> String {
    match event {
        PhaseEvent::JobStarted => "job started".to_string(),
        PhaseEvent::PhaseStart { phase_id } => format!("phase {phase_id} started"),
        PhaseEvent::PhaseSkipped { phase_id } => format!("phase {phase_id} skipped (already complete)"),
        PhaseEvent::Output { phase_id, stream, text } => format!("[{phase_id}] {stream:?}: {text}"),
        PhaseEvent::PhaseRetry { phase_id, retry } => format!("phase {phase_id} retry #{retry}"),
        PhaseEvent::VerificationFailed { phase_id, missing_files } => {
            format!("phase {phase_id} verification failed: missing {}", missing_files.join(", "))
        }
        PhaseEvent::VerificationPassed { phase_id } => format!("phase {phase_id} verification passed"),
        PhaseEvent::PhaseEnd { phase_id, success } => format!("phase {phase_id} ended (success={success})"),
        PhaseEvent::JobCompleted => "job completed".to_string(),
        PhaseEvent::JobFailed { error } => format!("job failed: {error}"),
        PhaseEvent::JobCancelled => "job cancelled".to_string(),
        PhaseEvent::Keepalive => "keepalive".to_string(),
        PhaseEvent::PipelineStarted => "pipeline started".to_string(),
        PhaseEvent::StepStarted { step } => format!("step {step} started"),
        PhaseEvent::StepCompleted { step, detail } => match detail {
            Some(detail) => format!("step {step} completed: {detail}"),
            None => format!("step {step} completed"),
        },
        PhaseEvent::StepFailed { step, error } => format!("step {step} failed: {error}"),
        PhaseEvent::StepSkipped { step } => format!("step {step} skipped"),
        PhaseEvent::PipelineCompleted { message } => format!("pipeline completed: {message}"),
        PhaseEvent::PipelineFailed { step, error } => format!("pipeline failed at {step}: {error}"),
    }
}
