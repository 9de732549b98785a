//! `jobs` command (§6): lists jobs recorded on disk for a project, newest
//! first, via the same snapshot store the `run` command mirrors into.

use std::path::PathBuf;

use anyhow::Result;

use crate::job_store;

pub struct JobsArgs {
    pub project_path: PathBuf,
    pub limit: usize,
}

pub fn cmd_jobs(args: JobsArgs) -> Result<i32> {
    let jobs = job_store::list_jobs(&args.project_path, args.limit)?;
    if jobs.is_empty() {
        println!("no jobs recorded for {}", args.project_path.display());
        return Ok(0);
    }

    for job in jobs {
        print!("{}  {:?}", job.job_id, job.status);
        if let Some(phase) = &job.current_phase {
            print!("  phase={phase}");
        }
        print!("  created={}", job.created_at.to_rfc3339());
        if let Some(error) = &job.error {
            print!("  error={error}");
        }
        println!();
    }

    Ok(0)
}
