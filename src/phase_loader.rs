//! Phase Definition Loader (C1).
//!
//! Reads `phases.yaml`, merges a `project_type` template if one is declared
//! and found, validates phase ids/types/`input_from` references, and returns
//! phases in declared order.

use std::collections::BTreeSet;
use std::path::Path;

use crate::errors::SpecError;
use crate::model::{PhaseConfig, PhasesFile};

/// Load and validate the phase list for a project directory.
///
/// `template_dir`, if given, is searched for `<project_type>.yaml` when
/// `phases.yaml` declares a `project_type`.
pub fn load(project_dir: &Path, template_dir: Option<&Path>) -> Result<Vec<PhaseConfig>, SpecError> {
    let phases_path = project_dir.join("phases.yaml");
    let raw = std::fs::read_to_string(&phases_path)
        .map_err(|e| SpecError::PhasesYamlInvalid(format!("{}: {e}", phases_path.display())))?;
    let mut file: PhasesFile = serde_yaml::from_str(&raw)
        .map_err(|e| SpecError::PhasesYamlInvalid(e.to_string()))?;

    if let (Some(project_type), Some(template_dir)) = (file.project_type.clone(), template_dir) {
        let template_path = template_dir.join(format!("{project_type}.yaml"));
        if template_path.exists() {
            let template_raw = std::fs::read_to_string(&template_path)
                .map_err(|e| SpecError::PhasesYamlInvalid(e.to_string()))?;
            let template: PhasesFile = serde_yaml::from_str(&template_raw)
                .map_err(|e| SpecError::PhasesYamlInvalid(e.to_string()))?;
            file.phases = merge_templates(template.phases, file.phases);
        }
    }

    validate(&file.phases)?;
    Ok(file.phases)
}

/// Template entries keyed by `id` provide defaults; project entries override
/// field-by-field (shallow) per §4.1. Phases present only in the template
/// are appended after the project's own phases, preserving project order
/// first since the project is what actually drives this run.
fn merge_templates(template: Vec<PhaseConfig>, project: Vec<PhaseConfig>) -> Vec<PhaseConfig> {
    let project_ids: BTreeSet<&str> = project.iter().map(|p| p.id.as_str()).collect();
    let mut merged: Vec<PhaseConfig> = project
        .into_iter()
        .map(|proj_phase| {
            match template.iter().find(|t| t.id == proj_phase.id) {
                Some(default) => overlay(default.clone(), proj_phase),
                None => proj_phase,
            }
        })
        .collect();
    for t in template {
        if !project_ids.contains(t.id.as_str()) {
            merged.push(t);
        }
    }
    merged
}

/// Shallow field-by-field override: project fields win whenever non-default.
fn overlay(default: PhaseConfig, project: PhaseConfig) -> PhaseConfig {
    let mut config = default.config;
    config.extend(project.config);
    PhaseConfig {
        id: project.id,
        name: if project.name.is_empty() { default.name } else { project.name },
        phase_type: project.phase_type,
        config,
        input_from: if project.input_from.is_empty() {
            default.input_from
        } else {
            project.input_from
        },
        output: if project.output.is_empty() { default.output } else { project.output },
        quality_gate: project.quality_gate.or(default.quality_gate),
    }
}

fn validate(phases: &[PhaseConfig]) -> Result<(), SpecError> {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for phase in phases {
        if !seen.insert(phase.id.as_str()) {
            return Err(SpecError::DuplicatePhaseId(phase.id.clone()));
        }
        for input in &phase.input_from {
            let reference = input.phase_id();
            if !seen.contains(reference) {
                return Err(SpecError::UnknownPhaseReference {
                    phase: phase.id.clone(),
                    reference: reference.to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_phases(dir: &Path, yaml: &str) {
        fs::write(dir.join("phases.yaml"), yaml).unwrap();
    }

    #[test]
    fn loads_phases_in_declared_order() {
        let dir = tempdir().unwrap();
        write_phases(
            dir.path(),
            r#"
phases:
  - id: develop
    name: Develop
    type: development
  - id: review
    name: Review
    type: review
    input_from: [develop]
"#,
        );
        let phases = load(dir.path(), None).unwrap();
        assert_eq!(phases.len(), 2);
        assert_eq!(phases[0].id, "develop");
        assert_eq!(phases[1].id, "review");
    }

    #[test]
    fn rejects_forward_reference() {
        let dir = tempdir().unwrap();
        write_phases(
            dir.path(),
            r#"
phases:
  - id: review
    name: Review
    type: review
    input_from: [develop]
"#,
        );
        let err = load(dir.path(), None).unwrap_err();
        assert!(matches!(err, SpecError::UnknownPhaseReference { .. }));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let dir = tempdir().unwrap();
        write_phases(
            dir.path(),
            r#"
phases:
  - id: develop
    name: Develop
    type: development
  - id: develop
    name: Develop Again
    type: development
"#,
        );
        let err = load(dir.path(), None).unwrap_err();
        assert!(matches!(err, SpecError::DuplicatePhaseId(_)));
    }

    #[test]
    fn merges_project_type_template() {
        let dir = tempdir().unwrap();
        let templates = tempdir().unwrap();
        fs::write(
            templates.path().join("web.yaml"),
            r#"
phases:
  - id: develop
    name: Develop (template default)
    type: development
    output: ["src/app.py"]
"#,
        )
        .unwrap();
        write_phases(
            dir.path(),
            r#"
project_type: web
phases:
  - id: develop
    name: Develop
    type: development
"#,
        );
        let phases = load(dir.path(), Some(templates.path())).unwrap();
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].output, vec!["src/app.py".to_string()]);
        assert_eq!(phases[0].name, "Develop");
    }

    #[test]
    fn missing_phases_yaml_is_malformed_spec() {
        let dir = tempdir().unwrap();
        let err = load(dir.path(), None).unwrap_err();
        assert!(matches!(err, SpecError::PhasesYamlInvalid(_)));
    }
}
