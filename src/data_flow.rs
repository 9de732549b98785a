//! Data-Flow Manager (C3): moves prior-phase outputs into the next phase's
//! input directory, and collects a phase's outputs into a destination.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::model::PhaseConfig;

/// Names of "project files" that are always copied into every phase's
/// `input/` (§4.3): the ADR file(s), `phases.yaml`, and `spec.yaml` if
/// present.
fn project_files(project_dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(project_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("ADR-") && name.ends_with(".md") {
                files.push(entry.path());
            }
        }
    }
    for fixed in ["phases.yaml", "spec.yaml"] {
        let path = project_dir.join(fixed);
        if path.exists() {
            files.push(path);
        }
    }
    files
}

/// Copy a file into `dest_dir`, never overwriting an existing same-name file
/// (§4.3: "never overwriting an existing file of the same name" for project
/// files).
fn copy_without_overwrite(src: &Path, dest_dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest_dir)?;
    let Some(name) = src.file_name() else {
        return Ok(());
    };
    let dest = dest_dir.join(name);
    if dest.exists() {
        return Ok(());
    }
    std::fs::copy(src, &dest)?;
    Ok(())
}

/// Recursively copy `src_dir`'s contents into `dest_dir`, replacing any
/// existing destination directories/files of the same relative path.
fn copy_dir_recursive(src_dir: &Path, dest_dir: &Path) -> std::io::Result<usize> {
    let mut copied = 0;
    if !src_dir.exists() {
        // Missing source output/ is a silent no-op (§4.3 edge case: the
        // phase may have been skipped).
        return Ok(0);
    }
    for entry in WalkDir::new(src_dir).into_iter().filter_map(|e| e.ok()) {
        let rel = entry.path().strip_prefix(src_dir).unwrap();
        if rel.as_os_str().is_empty() {
            continue;
        }
        let dest_path = dest_dir.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest_path)?;
        } else {
            if let Some(parent) = dest_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &dest_path)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Copy only the files under `src_dir` matching any of `globs`, preserving
/// relative paths.
fn copy_globbed(src_dir: &Path, dest_dir: &Path, globs: &[String]) -> std::io::Result<usize> {
    let mut copied = 0;
    if !src_dir.exists() {
        return Ok(0);
    }
    for pattern in globs {
        let full_pattern = src_dir.join(pattern).to_string_lossy().to_string();
        let Ok(matches) = glob::glob(&full_pattern) else {
            continue;
        };
        for entry in matches.flatten() {
            if !entry.is_file() {
                continue;
            }
            let rel = entry.strip_prefix(src_dir).unwrap_or(&entry);
            let dest_path = dest_dir.join(rel);
            if let Some(parent) = dest_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&entry, &dest_path)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Populate `phases/<phase.id>/input/` per `phase.input_from` (§4.3).
pub fn prepare_phase_inputs(project_dir: &Path, phase: &PhaseConfig) -> std::io::Result<()> {
    let input_dir = project_dir.join("phases").join(&phase.id).join("input");
    std::fs::create_dir_all(&input_dir)?;

    if phase.input_from.is_empty() {
        for file in project_files(project_dir) {
            copy_without_overwrite(&file, &input_dir)?;
        }
        return Ok(());
    }

    for source in &phase.input_from {
        let src_output = project_dir
            .join("phases")
            .join(source.phase_id())
            .join("output");
        match source.globs() {
            Some(globs) => {
                copy_globbed(&src_output, &input_dir, globs)?;
            }
            None => {
                copy_dir_recursive(&src_output, &input_dir)?;
            }
        }
    }

    // Project files are always copied too, after the phase-scoped copy.
    for file in project_files(project_dir) {
        copy_without_overwrite(&file, &input_dir)?;
    }
    Ok(())
}

/// Collect a phase's (or all phases') outputs into `dest`, mirroring
/// `prepare_phase_inputs`'s copy semantics for a destination directory.
pub fn collect_outputs(
    project_dir: &Path,
    dest: &Path,
    phase_filter: Option<&str>,
) -> std::io::Result<usize> {
    let phases_dir = project_dir.join("phases");
    let mut total = 0;
    let Ok(entries) = std::fs::read_dir(&phases_dir) else {
        return Ok(0);
    };
    for entry in entries.flatten() {
        let phase_id = entry.file_name().to_string_lossy().to_string();
        if let Some(filter) = phase_filter {
            if filter != phase_id {
                continue;
            }
        }
        let output_dir = entry.path().join("output");
        total += copy_dir_recursive(&output_dir, dest)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InputFrom, PhaseType};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn phase(id: &str, input_from: Vec<InputFrom>) -> PhaseConfig {
        PhaseConfig {
            id: id.to_string(),
            name: id.to_string(),
            phase_type: PhaseType::Development,
            config: BTreeMap::new(),
            input_from,
            output: vec![],
            quality_gate: None,
        }
    }

    #[test]
    fn copies_whole_output_dir_when_no_globs() {
        let dir = tempdir().unwrap();
        let a_output = dir.path().join("phases/a/output");
        std::fs::create_dir_all(&a_output).unwrap();
        std::fs::write(a_output.join("artifact.txt"), "hello").unwrap();

        let b = phase("b", vec![InputFrom::Phase("a".to_string())]);
        prepare_phase_inputs(dir.path(), &b).unwrap();

        let copied = dir.path().join("phases/b/input/artifact.txt");
        assert_eq!(std::fs::read_to_string(copied).unwrap(), "hello");
    }

    #[test]
    fn copies_only_matching_globs_when_scoped() {
        let dir = tempdir().unwrap();
        let a_output = dir.path().join("phases/a/output");
        std::fs::create_dir_all(&a_output).unwrap();
        std::fs::write(a_output.join("keep.py"), "x").unwrap();
        std::fs::write(a_output.join("skip.txt"), "y").unwrap();

        let mut scoped = BTreeMap::new();
        scoped.insert("a".to_string(), vec!["*.py".to_string()]);
        let b = phase("b", vec![InputFrom::Scoped(scoped)]);
        prepare_phase_inputs(dir.path(), &b).unwrap();

        let input_dir = dir.path().join("phases/b/input");
        assert!(input_dir.join("keep.py").exists());
        assert!(!input_dir.join("skip.txt").exists());
    }

    #[test]
    fn missing_source_output_is_silent_no_op() {
        let dir = tempdir().unwrap();
        let b = phase("b", vec![InputFrom::Phase("missing".to_string())]);
        prepare_phase_inputs(dir.path(), &b).unwrap();
        assert!(dir.path().join("phases/b/input").exists());
    }

    #[test]
    fn empty_input_from_copies_only_project_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("phases.yaml"), "phases: []").unwrap();
        std::fs::write(dir.path().join("ADR-001-test.md"), "---\n---\n").unwrap();

        let solo = phase("solo", vec![]);
        prepare_phase_inputs(dir.path(), &solo).unwrap();

        let input_dir = dir.path().join("phases/solo/input");
        assert!(input_dir.join("phases.yaml").exists());
        assert!(input_dir.join("ADR-001-test.md").exists());
    }

    #[test]
    fn project_files_are_never_overwritten() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("phases.yaml"), "new content").unwrap();
        let solo = phase("solo", vec![]);
        let input_dir = dir.path().join("phases/solo/input");
        std::fs::create_dir_all(&input_dir).unwrap();
        std::fs::write(input_dir.join("phases.yaml"), "existing content").unwrap();

        prepare_phase_inputs(dir.path(), &solo).unwrap();
        assert_eq!(
            std::fs::read_to_string(input_dir.join("phases.yaml")).unwrap(),
            "existing content"
        );
    }
}
