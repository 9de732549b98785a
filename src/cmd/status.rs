//! `status` command (§6, §7): prints per-phase state, retries, and the
//! last error string for a project, straight off the Status Store.

use std::path::PathBuf;

use anyhow::Result;

use crate::model::Status;
use crate::status_store::StatusStore;

pub struct StatusArgs {
    pub project_path: PathBuf,
}

pub fn cmd_status(args: StatusArgs) -> Result<i32> {
    let store = StatusStore::new(&args.project_path);
    let status = match store.load()? {
        Some(status) => status,
        None => {
            println!("no status.yaml found for {}", args.project_path.display());
            return Ok(0);
        }
    };

    println!("project: {}", status.project_id);
    println!("status: {:?}", status.status);
    println!(
        "phases: {}/{} completed",
        status.completed_phases, status.total_phases
    );
    if let Some(error) = &status.error {
        println!("error: {error}");
    }
    println!();

    for (phase_id, phase) in &status.phases {
        print!("  {phase_id:<24} {:?}", phase.status);
        if phase.retries > 0 {
            print!("  retries={}", phase.retries);
        }
        if let Some(error) = &phase.error {
            print!("  error={error}");
        }
        println!();
    }

    Ok(if status.status == Status::Failed { 1 } else { 0 })
}
