//! CLI-level integration tests for the `helix` binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn helix() -> Command {
    cargo_bin_cmd!("helix")
}

const SAMPLE_ADR: &str = r#"---
adr_id: "1"
title: Widget Exporter
status: Accepted
language: rust
domain: tooling
files:
  create:
    - src/widget.rs
---

# ADR-1: Widget Exporter

## Akzeptanzkriterien

- [ ] Exports widgets
"#;

fn write_project(dir: &Path, phases_yaml: &str) {
    std::fs::write(dir.join("ADR-1.md"), SAMPLE_ADR).unwrap();
    std::fs::write(dir.join("phases.yaml"), phases_yaml).unwrap();
}

/// Writes an executable stub "agent" that ignores its prompt and writes a
/// fixed file under the phase's `output/` directory.
#[cfg(unix)]
fn write_stub_agent(dir: &Path) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("stub-agent.sh");
    std::fs::write(
        &script,
        "#!/bin/sh\nmkdir -p output\necho 'done' > output/result.txt\nexit 0\n",
    )
    .unwrap();
    let mut perms = std::fs::metadata(&script).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script, perms).unwrap();
    script
}

#[cfg(unix)]
fn write_config_with_agent(dir: &Path, agent_path: &std::path::Path) {
    std::fs::create_dir_all(dir.join(".helix")).unwrap();
    std::fs::write(
        dir.join(".helix/config.toml"),
        format!(
            "agent_bin = \"{}\"\ndefault_timeout_seconds = 15\n",
            agent_path.display()
        ),
    )
    .unwrap();
}

mod cli_basics {
    use super::*;

    #[test]
    fn help_lists_every_subcommand() {
        helix()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("status"))
            .stdout(predicate::str::contains("logs"))
            .stdout(predicate::str::contains("stop"))
            .stdout(predicate::str::contains("jobs"))
            .stdout(predicate::str::contains("evolve"));
    }

    #[test]
    fn version_prints_something() {
        helix().arg("--version").assert().success();
    }

    #[test]
    fn run_rejects_a_nonexistent_project_path() {
        helix()
            .args(["run", "/no/such/project/path/for-helix-tests"])
            .assert()
            .failure();
    }
}

mod status_command {
    use super::*;

    #[test]
    fn status_on_a_project_with_no_status_file_says_so() {
        let dir = TempDir::new().unwrap();
        helix()
            .args(["status", dir.path().to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("no status.yaml"));
    }

    #[test]
    fn status_after_a_dry_run_shows_a_completed_project() {
        let dir = TempDir::new().unwrap();
        write_project(
            dir.path(),
            "phases:\n  - id: plan\n    name: Plan\n    type: meeting\n",
        );

        helix()
            .args(["run", dir.path().to_str().unwrap(), "--dry-run"])
            .assert()
            .success();

        helix()
            .args(["status", dir.path().to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("Completed"))
            .stdout(predicate::str::contains("1/1 completed"));
    }
}

mod run_command {
    use super::*;

    #[test]
    fn dry_run_completes_a_single_phase_project_without_an_agent() {
        let dir = TempDir::new().unwrap();
        write_project(
            dir.path(),
            "phases:\n  - id: plan\n    name: Plan\n    type: meeting\n",
        );

        helix()
            .args(["run", dir.path().to_str().unwrap(), "--dry-run"])
            .assert()
            .success();

        assert!(dir.path().join("phases/plan/CLAUDE.md").exists());
    }

    #[cfg(unix)]
    #[test]
    fn real_agent_run_satisfies_a_files_exist_quality_gate() {
        let dir = TempDir::new().unwrap();
        let phases_yaml = concat!(
            "phases:\n",
            "  - id: develop\n",
            "    name: Develop\n",
            "    type: development\n",
            "    output:\n",
            "      - result.txt\n",
            "    quality_gate:\n",
            "      type: files_exist\n",
            "      files:\n",
            "        - output/result.txt\n",
        );
        write_project(dir.path(), phases_yaml);
        let agent = write_stub_agent(dir.path());
        write_config_with_agent(dir.path(), &agent);

        helix()
            .args(["run", dir.path().to_str().unwrap()])
            .assert()
            .success();

        assert!(dir.path().join("phases/develop/output/result.txt").exists());
    }

    #[test]
    fn missing_agent_binary_fails_the_run() {
        let dir = TempDir::new().unwrap();
        write_project(
            dir.path(),
            "phases:\n  - id: develop\n    name: Develop\n    type: development\n",
        );
        std::fs::create_dir_all(dir.path().join(".helix")).unwrap();
        std::fs::write(
            dir.path().join(".helix/config.toml"),
            "agent_bin = \"helix-test-agent-that-does-not-exist\"\nmax_total_retries = 0\n",
        )
        .unwrap();

        helix()
            .args(["run", dir.path().to_str().unwrap()])
            .assert()
            .failure();
    }
}

mod jobs_logs_and_stop {
    use super::*;

    #[test]
    fn jobs_on_a_project_with_no_history_says_so() {
        let dir = TempDir::new().unwrap();
        helix()
            .args(["jobs", dir.path().to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("no jobs recorded"));
    }

    #[test]
    fn a_completed_dry_run_is_listed_and_its_logs_replay() {
        let dir = TempDir::new().unwrap();
        write_project(
            dir.path(),
            "phases:\n  - id: plan\n    name: Plan\n    type: meeting\n",
        );

        helix()
            .args(["run", dir.path().to_str().unwrap(), "--dry-run"])
            .assert()
            .success();

        let jobs = helix::job_store::list_jobs(dir.path(), 10).unwrap();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.status, helix::model::JobStatus::Completed);

        helix()
            .args(["jobs", dir.path().to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains(job.job_id.clone()));

        helix()
            .args(["logs", &job.job_id, "--project-path", dir.path().to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("job completed"));
    }

    #[test]
    fn stop_writes_a_cancellation_sentinel_for_an_unknown_job() {
        let dir = TempDir::new().unwrap();
        helix()
            .args(["stop", "no-such-job", "--project-path", dir.path().to_str().unwrap()])
            .assert()
            .success();

        assert!(helix::job_store::is_cancel_requested(dir.path(), "no-such-job"));
    }
}
