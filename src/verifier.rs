//! Post-Phase Verifier (C7): checks a phase's produced files against its
//! declared `output` globs, and writes a small feedback file for the next
//! agent invocation when something is missing.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct VerificationResult {
    pub success: bool,
    pub missing_files: Vec<String>,
    pub syntax_errors: Vec<String>,
    pub message: String,
    pub found_files: Vec<String>,
}

/// Expand a phase's declared `output` entries (which may be globs) against
/// `output/`, and report what's missing.
pub fn verify(phase_dir: &Path, expected: &[String]) -> VerificationResult {
    let output_dir = phase_dir.join("output");
    let mut found = Vec::new();
    let mut missing = Vec::new();

    for pattern in expected {
        if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
            let full_pattern = output_dir.join(pattern).to_string_lossy().to_string();
            let matches: Vec<PathBuf> = glob::glob(&full_pattern)
                .map(|m| m.flatten().collect())
                .unwrap_or_default();
            if matches.is_empty() {
                missing.push(pattern.clone());
            } else {
                for m in matches {
                    let rel = m
                        .strip_prefix(&output_dir)
                        .unwrap_or(&m)
                        .to_string_lossy()
                        .to_string();
                    if !found.contains(&rel) {
                        found.push(rel);
                    }
                }
            }
        } else {
            let path = output_dir.join(pattern);
            if path.exists() {
                found.push(pattern.clone());
            } else {
                missing.push(pattern.clone());
            }
        }
    }

    let syntax_errors = best_effort_syntax_check(&output_dir, &found);

    let success = missing.is_empty() && syntax_errors.is_empty();
    let message = if success {
        format!("{} output file(s) verified", found.len())
    } else {
        format!(
            "{} missing, {} syntax issue(s)",
            missing.len(),
            syntax_errors.len()
        )
    };

    VerificationResult {
        success,
        missing_files: missing,
        syntax_errors,
        message,
        found_files: found,
    }
}

/// Best-effort syntax scan for files the verifier recognizes by extension;
/// unrecognized extensions are not checked here (the Quality Gate's
/// `syntax_check` variant is the authoritative check for those).
fn best_effort_syntax_check(output_dir: &Path, found: &[String]) -> Vec<String> {
    let mut errors = Vec::new();
    for rel in found {
        if rel.ends_with(".py") {
            let path = output_dir.join(rel);
            if let Ok(source) = std::fs::read_to_string(&path) {
                if let Some(reason) = obviously_unbalanced(&source) {
                    errors.push(format!("{rel}: {reason}"));
                }
            }
        }
    }
    errors
}

fn obviously_unbalanced(source: &str) -> Option<String> {
    let mut depth: i32 = 0;
    for ch in source.chars() {
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return Some("unbalanced closing bracket".to_string());
        }
    }
    if depth != 0 {
        Some("unbalanced brackets".to_string())
    } else {
        None
    }
}

/// Write a small text file under `phase_dir` describing what verification
/// found, for the next agent invocation to read.
pub fn write_retry_file(
    phase_dir: &Path,
    result: &VerificationResult,
    retry_number: u32,
) -> std::io::Result<PathBuf> {
    let path = phase_dir.join(format!("retry-{retry_number}.md"));
    let mut lines = vec![format!(
        "# Verification failed (retry {retry_number})\n"
    )];
    if !result.missing_files.is_empty() {
        lines.push("## Missing output files".to_string());
        for f in &result.missing_files {
            lines.push(format!("- {f}"));
        }
    }
    if !result.syntax_errors.is_empty() {
        lines.push("\n## Syntax issues".to_string());
        for e in &result.syntax_errors {
            lines.push(format!("- {e}"));
        }
    }
    lines.push(format!("\n{}\n", result.message));
    std::fs::write(&path, lines.join("\n"))?;
    Ok(path)
}
