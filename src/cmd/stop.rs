//! `stop` command (§6): requests cooperative cancellation of a running job
//! from a separate process. The `run` process polls for this sentinel and
//! feeds it into its in-memory Job Bus at the next phase boundary.

use std::path::PathBuf;

use anyhow::Result;

use crate::job_store;

pub struct StopArgs {
    pub project_path: PathBuf,
    pub job_id: String,
}

pub fn cmd_stop(args: StopArgs) -> Result<i32> {
    job_store::request_cancel(&args.project_path, &args.job_id)?;
    println!("cancellation requested for job {}", args.job_id);
    Ok(0)
}
