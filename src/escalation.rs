//! Escalation Engine (C8): two-stage failure handler. Stage 1 tries
//! autonomous repair strategies on a deterministic, attempt-indexed
//! schedule; stage 2 asks a human. The transition table and strategy
//! selection are reproduced exactly as specified (§4.8), including the
//! sticky-at-last model chain and 5-hint cap -- this ordering is the
//! contract, not a reinterpretation.
//!
//! Persisted under `phases/<id>/escalation/`: `state.json` after every
//! transition, `review-request.json` on entry to stage 2, and
//! `human-response.json` read back by [`resume_with_human_response`].

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::EscalationError;
use crate::model::{EscalationLevel, EscalationState, FailureRecord};

const MAX_STAGE1_ATTEMPTS: u32 = 3;
const MAX_STAGE2_ATTEMPTS: u32 = 2;
const MAX_HINTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Retry,
    ModelSwitch { model: String },
    ProvideHints { hints: Vec<String> },
    HumanReview { request_path: PathBuf },
    Abort,
}

pub struct EscalationEngine {
    model_chain: Vec<String>,
    stage1_ceiling: u32,
    stage2_ceiling: u32,
}

impl EscalationEngine {
    pub fn new(model_chain: Vec<String>) -> Self {
        Self {
            model_chain,
            stage1_ceiling: MAX_STAGE1_ATTEMPTS,
            stage2_ceiling: MAX_STAGE2_ATTEMPTS,
        }
    }

    pub fn with_ceilings(mut self, stage1: u32, stage2: u32) -> Self {
        self.stage1_ceiling = stage1;
        self.stage2_ceiling = stage2;
        self
    }

    /// Advance the state machine on a gate failure and produce the next
    /// action. `gate_type`/`message`/`details` describe the failure that
    /// triggered this call.
    pub fn handle_gate_failure(
        &self,
        state: &mut EscalationState,
        gate_type: &str,
        message: &str,
        details: serde_json::Value,
    ) -> Result<Action, EscalationError> {
        state.total_attempts += 1;
        let level_label = match state.level {
            EscalationLevel::None => "none",
            EscalationLevel::Stage1 => "stage1",
            EscalationLevel::Stage2 => "stage2",
            EscalationLevel::Aborted => "aborted",
        };
        state.failure_history.push(FailureRecord {
            timestamp: Utc::now(),
            gate_type: gate_type.to_string(),
            message: message.to_string(),
            details,
            level: level_label.to_string(),
            attempt: state.attempt_count + 1,
        });

        match state.level {
            EscalationLevel::None => {
                state.level = EscalationLevel::Stage1;
                state.attempt_count = 1;
                Ok(self.select_stage1_strategy(state))
            }
            EscalationLevel::Stage1 => {
                state.attempt_count += 1;
                if state.attempt_count <= self.stage1_ceiling {
                    Ok(self.select_stage1_strategy(state))
                } else {
                    state.level = EscalationLevel::Stage2;
                    state.attempt_count = 1;
                    Ok(Action::HumanReview {
                        request_path: PathBuf::new(),
                    })
                }
            }
            EscalationLevel::Stage2 => {
                state.attempt_count += 1;
                if state.attempt_count <= self.stage2_ceiling {
                    Ok(Action::HumanReview {
                        request_path: PathBuf::new(),
                    })
                } else {
                    state.level = EscalationLevel::Aborted;
                    Ok(Action::Abort)
                }
            }
            EscalationLevel::Aborted => Err(EscalationError::CeilingExceeded {
                level: "aborted".to_string(),
            }),
        }
    }

    /// Deterministic on `attempt_count`: 1 → retry, 2 → model_switch,
    /// 3 → provide_hints, anything beyond falls back to retry.
    fn select_stage1_strategy(&self, state: &mut EscalationState) -> Action {
        match state.attempt_count {
            1 => Action::Retry,
            2 => {
                let model = self.next_model(state);
                state
                    .context
                    .insert("current_model".to_string(), json!(model));
                Action::ModelSwitch { model }
            }
            3 => {
                let hints = self.generate_hints(state);
                state.context.insert("hints".to_string(), json!(hints));
                Action::ProvideHints { hints }
            }
            _ => Action::Retry,
        }
    }

    /// Advance to the next model in the configured ascending chain. The
    /// chain is sticky at the last entry — it never wraps or errors. A
    /// missing `current_model` defaults to the head of the chain before
    /// advancing (so the first model_switch moves `m1 -> m2`, not `m1`);
    /// a `current_model` that isn't in the chain resolves to the last
    /// entry.
    fn next_model(&self, state: &EscalationState) -> String {
        if self.model_chain.is_empty() {
            return "default".to_string();
        }
        match state.current_model() {
            None => self
                .model_chain
                .get(1)
                .unwrap_or(&self.model_chain[0])
                .clone(),
            Some(current) => match self.model_chain.iter().position(|c| c == current) {
                Some(idx) => self.model_chain[(idx + 1).min(self.model_chain.len() - 1)].clone(),
                None => self.model_chain[self.model_chain.len() - 1].clone(),
            },
        }
    }

    /// Hints synthesized from `failure_history`, walked oldest-first and
    /// capped at [`MAX_HINTS`] only at the end (§C.1) -- the schedule
    /// matters, not just the final count.
    fn generate_hints(&self, state: &EscalationState) -> Vec<String> {
        let mut hints = Vec::new();
        for record in state.failure_history.iter() {
            match record.gate_type.as_str() {
                "files_exist" => {
                    if let Some(files) = record.details.get("files").and_then(|v| v.as_array()) {
                        let names: Vec<&str> = files.iter().filter_map(|f| f.as_str()).collect();
                        if !names.is_empty() {
                            hints.push(format!("Create the missing files: {}", names.join(", ")));
                        }
                    }
                }
                "syntax_check" => {
                    hints.push(format!(
                        "Fix the syntax error reported: {}",
                        record.message
                    ));
                }
                "tests_pass" => {
                    hints.push("Re-check the failing test output and fix the regression.".to_string());
                    let stderr = record
                        .details
                        .get("stderr")
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    if stderr.contains("AssertionError") {
                        hints.push(
                            "Check the expected values in assertions against actual output."
                                .to_string(),
                        );
                    }
                }
                "review_approved" => {
                    hints.push("Address the reviewer's feedback before resubmitting.".to_string());
                }
                _ => {
                    hints.push(format!("Previous failure: {}", record.message));
                }
            }
        }
        if hints.is_empty() {
            hints.push("Re-attempt the phase, paying close attention to the declared outputs.".to_string());
        }
        hints.truncate(MAX_HINTS);
        hints
    }

    /// Write `review-request.json` for a stage-2 escalation and return its
    /// path (used to fill in [`Action::HumanReview`]'s `request_path`).
    pub fn write_review_request(
        &self,
        phase_dir: &Path,
        state: &EscalationState,
    ) -> std::io::Result<PathBuf> {
        let dir = phase_dir.join("escalation");
        std::fs::create_dir_all(&dir)?;
        let request = json!({
            "phase_id": state.phase_id,
            "failure_summary": state.failure_history.last().map(|f| &f.message),
            "failure_history": state.failure_history,
            "attempt_count": state.attempt_count,
            "total_attempts": state.total_attempts,
            "response_schema": {
                "type": "object",
                "required": ["decision"],
                "properties": {
                    "decision": {
                        "type": "string",
                        "enum": ["retry", "skip", "abort", "manual_fix"]
                    },
                    "notes": { "type": "string" }
                }
            }
        });
        let path = dir.join("review-request.json");
        std::fs::write(&path, serde_json::to_string_pretty(&request)?)?;
        Ok(path)
    }

    pub fn load_human_response(&self, phase_dir: &Path) -> std::io::Result<Option<HumanResponse>> {
        let path = phase_dir.join("escalation").join("human-response.json");
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn save_state(&self, phase_dir: &Path, state: &EscalationState) -> std::io::Result<()> {
        let dir = phase_dir.join("escalation");
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("state.json"), serde_json::to_string_pretty(state)?)
    }

    pub fn load_state(&self, phase_dir: &Path, phase_id: &str) -> std::io::Result<EscalationState> {
        let path = phase_dir.join("escalation").join("state.json");
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EscalationState::new(phase_id)),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanDecision {
    Retry,
    Skip,
    Abort,
    ManualFix,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanResponse {
    pub decision: HumanDecision,
    #[serde(default)]
    pub notes: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Vec<String> {
        vec![
            "claude-3-haiku".to_string(),
            "claude-3-sonnet".to_string(),
            "claude-3-opus".to_string(),
        ]
    }

    #[test]
    fn first_failure_enters_stage1_and_retries() {
        let engine = EscalationEngine::new(chain());
        let mut state = EscalationState::new("develop");
        let action = engine
            .handle_gate_failure(&mut state, "files_exist", "missing output", json!({}))
            .unwrap();
        assert_eq!(action, Action::Retry);
        assert_eq!(state.level, EscalationLevel::Stage1);
        assert_eq!(state.attempt_count, 1);
    }

    #[test]
    fn stage1_strategies_follow_attempt_indexed_schedule() {
        let engine = EscalationEngine::new(chain());
        let mut state = EscalationState::new("develop");

        let a1 = engine
            .handle_gate_failure(&mut state, "files_exist", "m1", json!({}))
            .unwrap();
        assert_eq!(a1, Action::Retry);

        let a2 = engine
            .handle_gate_failure(&mut state, "files_exist", "m2", json!({}))
            .unwrap();
        assert_eq!(
            a2,
            Action::ModelSwitch {
                model: "claude-3-sonnet".to_string()
            }
        );

        let a3 = engine
            .handle_gate_failure(&mut state, "files_exist", "m3", json!({}))
            .unwrap();
        assert!(matches!(a3, Action::ProvideHints { .. }));
    }

    #[test]
    fn stage1_exhaustion_moves_to_stage2_human_review() {
        let engine = EscalationEngine::new(chain());
        let mut state = EscalationState::new("develop");
        for _ in 0..3 {
            engine
                .handle_gate_failure(&mut state, "files_exist", "m", json!({}))
                .unwrap();
        }
        let action = engine
            .handle_gate_failure(&mut state, "files_exist", "m4", json!({}))
            .unwrap();
        assert!(matches!(action, Action::HumanReview { .. }));
        assert_eq!(state.level, EscalationLevel::Stage2);
        assert_eq!(state.attempt_count, 1);
    }

    #[test]
    fn stage2_exhaustion_aborts() {
        let engine = EscalationEngine::new(chain());
        let mut state = EscalationState::new("develop");
        for _ in 0..3 {
            engine
                .handle_gate_failure(&mut state, "files_exist", "m", json!({}))
                .unwrap();
        }
        engine
            .handle_gate_failure(&mut state, "files_exist", "m", json!({}))
            .unwrap();
        engine
            .handle_gate_failure(&mut state, "files_exist", "m", json!({}))
            .unwrap();
        let action = engine
            .handle_gate_failure(&mut state, "files_exist", "m", json!({}))
            .unwrap();
        assert_eq!(action, Action::Abort);
        assert_eq!(state.level, EscalationLevel::Aborted);
    }

    #[test]
    fn model_chain_is_sticky_at_last_entry() {
        let engine = EscalationEngine::new(chain());
        let mut state = EscalationState::new("develop");
        state
            .context
            .insert("current_model".to_string(), json!("claude-3-opus"));
        assert_eq!(engine.next_model(&state), "claude-3-opus");
    }

    #[test]
    fn hints_are_capped_at_five() {
        let engine = EscalationEngine::new(chain());
        let mut state = EscalationState::new("develop");
        for i in 0..8 {
            state.failure_history.push(FailureRecord {
                timestamp: Utc::now(),
                gate_type: "files_exist".to_string(),
                message: format!("failure {i}"),
                details: json!({"files": [format!("file{i}.py")]}),
                level: "stage1".to_string(),
                attempt: i,
            });
        }
        let hints = engine.generate_hints(&state);
        assert!(hints.len() <= MAX_HINTS);
    }

    #[test]
    fn files_exist_hint_joins_all_missing_names_into_one() {
        let engine = EscalationEngine::new(chain());
        let mut state = EscalationState::new("develop");
        state.failure_history.push(FailureRecord {
            timestamp: Utc::now(),
            gate_type: "files_exist".to_string(),
            message: "missing files".to_string(),
            details: json!({"files": ["a.py", "b.py"]}),
            level: "stage1".to_string(),
            attempt: 1,
        });
        let hints = engine.generate_hints(&state);
        assert_eq!(hints.len(), 1);
        assert!(hints[0].contains("a.py"));
        assert!(hints[0].contains("b.py"));
    }

    #[test]
    fn tests_pass_hint_adds_assertion_followup_when_stderr_mentions_it() {
        let engine = EscalationEngine::new(chain());
        let mut state = EscalationState::new("develop");
        state.failure_history.push(FailureRecord {
            timestamp: Utc::now(),
            gate_type: "tests_pass".to_string(),
            message: "test command failed with exit code 1".to_string(),
            details: json!({"code": 1, "stderr": "AssertionError: expected 2 got 3"}),
            level: "stage1".to_string(),
            attempt: 1,
        });
        let hints = engine.generate_hints(&state);
        assert_eq!(hints.len(), 2);
    }

    #[test]
    fn tests_pass_hint_has_no_followup_without_assertion_error() {
        let engine = EscalationEngine::new(chain());
        let mut state = EscalationState::new("develop");
        state.failure_history.push(FailureRecord {
            timestamp: Utc::now(),
            gate_type: "tests_pass".to_string(),
            message: "test command failed with exit code 1".to_string(),
            details: json!({"code": 1, "stderr": "segmentation fault"}),
            level: "stage1".to_string(),
            attempt: 1,
        });
        let hints = engine.generate_hints(&state);
        assert_eq!(hints.len(), 1);
    }

    #[test]
    fn hints_are_generated_oldest_failure_first() {
        let engine = EscalationEngine::new(chain());
        let mut state = EscalationState::new("develop");
        state.failure_history.push(FailureRecord {
            timestamp: Utc::now(),
            gate_type: "review_approved".to_string(),
            message: "first".to_string(),
            details: json!({}),
            level: "stage1".to_string(),
            attempt: 1,
        });
        state.failure_history.push(FailureRecord {
            timestamp: Utc::now(),
            gate_type: "syntax_check".to_string(),
            message: "second".to_string(),
            details: json!({}),
            level: "stage1".to_string(),
            attempt: 2,
        });
        let hints = engine.generate_hints(&state);
        assert!(hints[0].contains("reviewer"));
        assert!(hints[1].contains("second"));
    }

    #[test]
    fn review_request_is_written_with_response_schema() {
        let dir = tempfile::tempdir().unwrap();
        let engine = EscalationEngine::new(chain());
        let state = EscalationState::new("develop");
        let path = engine.write_review_request(dir.path(), &state).unwrap();
        let raw = std::fs::read_to_string(path).unwrap();
        assert!(raw.contains("response_schema"));
    }
}
