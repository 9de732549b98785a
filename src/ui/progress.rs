//! Terminal progress rendering for an orchestrator run: one bar across all
//! phases, one spinner for the phase currently executing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::ui::icons::{BLOCKER, CHECK, CROSS, PIVOT, SPARKLE};

pub struct OrchestratorUI {
    multi: MultiProgress,
    phase_bar: ProgressBar,
    agent_bar: ProgressBar,
    verbose: bool,
    retries_seen: AtomicU32,
}

impl OrchestratorUI {
    pub fn new(total_phases: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let phase_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("█▓▒░");
        let phase_bar = multi.add(ProgressBar::new(total_phases));
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix("Phases");

        let agent_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .unwrap();
        let agent_bar = multi.add(ProgressBar::new_spinner());
        agent_bar.set_style(agent_style);
        agent_bar.set_prefix("  Agent");

        Self {
            multi,
            phase_bar,
            agent_bar,
            verbose,
            retries_seen: AtomicU32::new(0),
        }
    }

    pub fn start_phase(&self, phase_id: &str, phase_name: &str) {
        self.phase_bar
            .set_message(format!("{}: {}", style(phase_id).yellow(), phase_name));
        self.agent_bar.set_message("spawning agent...".to_string());
        self.agent_bar.enable_steady_tick(Duration::from_millis(100));
    }

    pub fn log_step(&self, msg: &str) {
        self.agent_bar.set_message(msg.to_string());
        if self.verbose {
            self.multi
                .println(format!("    {} {}", style("→").dim(), style(msg).dim()))
                .ok();
        }
    }

    pub fn update_elapsed(&self, elapsed: Duration) {
        let secs = elapsed.as_secs();
        let time_str = if secs >= 60 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{secs}s")
        };
        self.agent_bar
            .set_message(format!("running ({})", style(time_str).dim()));
    }

    pub fn show_tool_use(&self, description: &str) {
        self.multi
            .println(format!("    {}", style(description).yellow()))
            .ok();
    }

    pub fn gate_passed(&self, gate_label: &str) {
        self.multi
            .println(format!("    {} {}", CHECK, style(gate_label).green()))
            .ok();
    }

    pub fn gate_failed(&self, gate_label: &str, reason: &str) {
        self.multi
            .println(format!(
                "    {} {}: {}",
                CROSS,
                style(gate_label).red(),
                reason
            ))
            .ok();
    }

    pub fn escalation(&self, phase_id: &str, strategy: &str, attempt: u32) {
        self.retries_seen.fetch_add(1, Ordering::SeqCst);
        self.multi
            .println(format!(
                "    {} phase {} escalating (attempt {}): {}",
                PIVOT,
                style(phase_id).yellow(),
                attempt,
                style(strategy).dim()
            ))
            .ok();
    }

    pub fn human_review_needed(&self, phase_id: &str, request_path: &std::path::Path) {
        self.multi
            .println(format!(
                "    {} phase {} needs human review: {}",
                BLOCKER,
                style(phase_id).red().bold(),
                request_path.display()
            ))
            .ok();
    }

    pub fn phase_complete(&self, phase_id: &str) {
        self.agent_bar.finish_with_message("done".to_string());
        self.phase_bar.inc(1);
        self.multi
            .println(format!(
                "\n{} Phase {} complete!\n",
                SPARKLE,
                style(phase_id).green().bold()
            ))
            .ok();
    }

    pub fn phase_failed(&self, phase_id: &str, reason: &str) {
        self.agent_bar
            .finish_with_message(format!("failed: {reason}"));
        self.multi
            .println(format!(
                "\n{} Phase {} failed: {}\n",
                CROSS,
                style(phase_id).red().bold(),
                reason
            ))
            .ok();
    }

    pub fn print_separator(&self) {
        self.multi
            .println(format!("{}", style("═".repeat(70)).cyan()))
            .ok();
    }

    pub fn print_phase_header(&self, phase_id: &str, phase_name: &str, phase_type: &str) {
        self.multi.println("").ok();
        self.print_separator();
        self.multi
            .println(format!(
                "{} Phase {}: {} ({})",
                style("▶").green().bold(),
                style(phase_id).yellow().bold(),
                phase_name,
                style(phase_type).dim()
            ))
            .ok();
        self.print_separator();
        self.multi.println("").ok();
    }

    pub fn print_run_summary(&self, completed: u32, total: u32, failed: Option<&str>) {
        self.multi.println("").ok();
        match failed {
            None => self
                .multi
                .println(format!(
                    "{} {}/{} phases completed",
                    CHECK,
                    style(completed).green(),
                    total
                ))
                .ok(),
            Some(phase_id) => self
                .multi
                .println(format!(
                    "{} {}/{} phases completed, stopped at {}",
                    CROSS,
                    style(completed).yellow(),
                    total,
                    style(phase_id).red()
                ))
                .ok(),
        };
    }
}
