//! Agent Runner (C5): spawns the configured coding agent against a phase
//! directory, streams its stdout, and enforces a wall-clock timeout.
//!
//! Two output modes share one subprocess-management core: "buffered" simply
//! collects stdout/stderr for the caller, "streaming" parses each stdout
//! line as a `stream-json` event (reusing [`crate::stream::StreamEvent`])
//! and forwards human-readable progress through a callback — the teacher's
//! CLI used the same parse-and-forward shape to drive its progress UI.
//! Structured output (a gate's `files_exist`/etc. don't need this, but a
//! `meeting`/`consultant` phase type reading back a decision does) is
//! recovered from the transcript via [`crate::util::extract_json_object`]
//! when the agent didn't write a dedicated output file.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::errors::AgentError;
use crate::stream::StreamEvent;

#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub binary: String,
    pub args: Vec<String>,
    pub working_dir: std::path::PathBuf,
    pub timeout: Duration,
    pub prompt: String,
}

#[derive(Debug, Clone, Default)]
pub struct AgentResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl AgentResult {
    /// Recover a structured JSON object from the transcript, preferring the
    /// final `result` event's text if one is present.
    pub fn extract_structured_output(&self) -> Option<serde_json::Value> {
        for line in self.stdout.lines().rev() {
            if let Ok(StreamEvent::Result {
                result: Some(text), ..
            }) = serde_json::from_str::<StreamEvent>(line)
            {
                if let Some(json) = crate::util::extract_json_object(&text) {
                    if let Ok(value) = serde_json::from_str(&json) {
                        return Some(value);
                    }
                }
            }
        }
        crate::util::extract_json_object(&self.stdout)
            .and_then(|json| serde_json::from_str(&json).ok())
    }
}

/// A callback invoked once per parsed stdout event while streaming.
pub trait ProgressSink: Send {
    fn on_text(&mut self, text: &str);
    fn on_tool_use(&mut self, description: &str);
}

/// Run the agent to completion, returning the collected output.
///
/// `sink` is optional: buffered mode passes `None` and just waits for exit;
/// streaming mode passes a sink that receives progress as it happens.
pub async fn run(
    invocation: &AgentInvocation,
    mut sink: Option<&mut dyn ProgressSink>,
) -> Result<AgentResult, AgentError> {
    std::fs::create_dir_all(&invocation.working_dir).map_err(AgentError::Io)?;

    let mut command = Command::new(&invocation.binary);
    command
        .args(&invocation.args)
        .current_dir(&invocation.working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(AgentError::SpawnFailed)?;

    if let Some(mut stdin) = child.stdin.take() {
        let prompt = invocation.prompt.clone();
        tokio::spawn(async move {
            let _ = stdin.write_all(prompt.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });
    }

    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let run_future = async {
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();
        let mut collected_stdout = String::new();
        let mut collected_stderr = String::new();

        loop {
            tokio::select! {
                line = stdout_lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            collected_stdout.push_str(&line);
                            collected_stdout.push('\n');
                            if let Some(sink) = sink.as_deref_mut() {
                                forward_line(&line, sink);
                            }
                        }
                        Ok(None) => break,
                        Err(_) => break,
                    }
                }
                line = stderr_lines.next_line() => {
                    if let Ok(Some(line)) = line {
                        collected_stderr.push_str(&line);
                        collected_stderr.push('\n');
                    }
                }
            }
        }
        (collected_stdout, collected_stderr)
    };

    let (stdout_text, stderr_text) = match tokio::time::timeout(invocation.timeout, run_future).await
    {
        Ok(output) => output,
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(AgentError::Timeout {
                seconds: invocation.timeout.as_secs(),
            });
        }
    };

    let status = child.wait().await.map_err(AgentError::Io)?;
    let exit_code = status.code().unwrap_or(-1);

    Ok(AgentResult {
        stdout: stdout_text,
        stderr: stderr_text,
        exit_code,
    })
}

fn forward_line(line: &str, sink: &mut dyn ProgressSink) {
    let Ok(event) = serde_json::from_str::<StreamEvent>(line) else {
        return;
    };
    if let StreamEvent::Assistant { message, .. } = event {
        for block in message.content {
            match block {
                crate::stream::ContentBlock::Text { text } => sink.on_text(&text),
                crate::stream::ContentBlock::ToolUse { name, input, .. } => {
                    sink.on_tool_use(&crate::stream::describe_tool_use(&name, &input));
                }
            }
        }
    }
}

/// Build the prompt + args for a phase run: the rendered `CLAUDE.md` read
/// from the phase directory is passed as the prompt text.
pub fn invocation_for_phase(
    agent_bin: &str,
    agent_flags: &[String],
    phase_dir: &Path,
    timeout: Duration,
) -> std::io::Result<AgentInvocation> {
    let instructions_path = phase_dir.join("CLAUDE.md");
    let prompt = std::fs::read_to_string(&instructions_path)?;
    Ok(AgentInvocation {
        binary: agent_bin.to_string(),
        args: agent_flags.to_vec(),
        working_dir: phase_dir.to_path_buf(),
        timeout,
        prompt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        texts: Vec<String>,
        tool_uses: Vec<String>,
    }

    impl ProgressSink for RecordingSink {
        fn on_text(&mut self, text: &str) {
            self.texts.push(text.to_string());
        }
        fn on_tool_use(&mut self, description: &str) {
            self.tool_uses.push(description.to_string());
        }
    }

    #[test]
    fn extract_structured_output_prefers_result_event() {
        let result = AgentResult {
            stdout: r#"{"type":"system","subtype":"init"}
{"type":"result","subtype":"success","result":"Decision: {\"approved\": true}","is_error":false}"#
                .to_string(),
            stderr: String::new(),
            exit_code: 0,
        };
        let structured = result.extract_structured_output().unwrap();
        assert_eq!(structured["approved"], serde_json::json!(true));
    }

    #[test]
    fn extract_structured_output_falls_back_to_raw_scan() {
        let result = AgentResult {
            stdout: r#"some preamble {"ok": true} trailing"#.to_string(),
            stderr: String::new(),
            exit_code: 0,
        };
        let structured = result.extract_structured_output().unwrap();
        assert_eq!(structured["ok"], serde_json::json!(true));
    }

    #[test]
    fn forward_line_dispatches_text_and_tool_use() {
        let mut sink = RecordingSink {
            texts: vec![],
            tool_uses: vec![],
        };
        let text_line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hi"}]},"session_id":"s"}"#;
        forward_line(text_line, &mut sink);
        assert_eq!(sink.texts, vec!["hi".to_string()]);

        let tool_line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Read","input":{"file_path":"/a/b.rs"},"id":"1"}]},"session_id":"s"}"#;
        forward_line(tool_line, &mut sink);
        assert_eq!(sink.tool_uses, vec!["Reading: a/b.rs".to_string()]);
    }

    #[tokio::test]
    async fn run_times_out_long_running_process() {
        let invocation = AgentInvocation {
            binary: "sleep".to_string(),
            args: vec!["5".to_string()],
            working_dir: std::env::temp_dir(),
            timeout: Duration::from_millis(50),
            prompt: String::new(),
        };
        let err = run(&invocation, None).await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout { .. }));
    }
}
