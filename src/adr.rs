//! ADR loader (§6): parses a project's `ADR-*.md` — YAML frontmatter plus
//! an `## Akzeptanzkriterien` checklist — into a [`Project`].
//!
//! Grounded in the Template Renderer's consumption of `AdrFrontmatter`
//! (`template.rs`) and the ADR schema described alongside the directory
//! layout; this module is the one piece that actually reads the file off
//! disk.

use std::path::{Path, PathBuf};

use crate::errors::SpecError;
use crate::model::{AdrFrontmatter, PhaseConfig, Project};

const ACCEPTANCE_HEADING: &str = "## Akzeptanzkriterien";

/// Locate the project's `ADR-*.md` file. Exactly one is expected; ties are
/// broken by filename order.
pub fn find_adr_path(project_dir: &Path) -> Result<PathBuf, SpecError> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(project_dir)
        .map_err(|e| SpecError::AdrUnparseable(e.to_string()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("ADR-") && n.ends_with(".md"))
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next().ok_or_else(|| {
        SpecError::AdrUnparseable("no ADR-*.md found in project directory".to_string())
    })
}

/// Split a `---`-delimited frontmatter block from the Markdown body that
/// follows it.
fn split_frontmatter(raw: &str) -> Result<(&str, &str), SpecError> {
    let rest = raw.strip_prefix("---").ok_or_else(|| {
        SpecError::AdrUnparseable("ADR file does not start with a YAML frontmatter block".to_string())
    })?;
    let end = rest
        .find("\n---")
        .ok_or_else(|| SpecError::AdrUnparseable("ADR frontmatter block is not terminated".to_string()))?;
    let frontmatter = &rest[..end];
    let body = &rest[end + 4..];
    Ok((frontmatter, body))
}

/// Parse the YAML frontmatter, coercing a numeric `adr_id` to a string
/// since the schema allows either.
fn parse_frontmatter(frontmatter: &str) -> Result<AdrFrontmatter, SpecError> {
    let mut value: serde_yaml::Value =
        serde_yaml::from_str(frontmatter).map_err(|e| SpecError::AdrUnparseable(e.to_string()))?;
    if let Some(mapping) = value.as_mapping_mut() {
        let key = serde_yaml::Value::String("adr_id".to_string());
        if let Some(existing) = mapping.get(&key).cloned() {
            if !matches!(existing, serde_yaml::Value::String(_)) {
                let coerced = match &existing {
                    serde_yaml::Value::Number(n) => n.to_string(),
                    other => serde_yaml::to_string(other)
                        .unwrap_or_default()
                        .trim()
                        .to_string(),
                };
                mapping.insert(key, serde_yaml::Value::String(coerced));
            }
        }
    }
    serde_yaml::from_value(value).map_err(|e| SpecError::AdrUnparseable(e.to_string()))
}

/// Extract `- [ ]`/`- [x]` bullets from the `## Akzeptanzkriterien`
/// section. The section runs until the next `##` heading or end of file.
fn parse_acceptance_criteria(body: &str) -> Vec<String> {
    let Some(start) = body.find(ACCEPTANCE_HEADING) else {
        return Vec::new();
    };
    let section = &body[start + ACCEPTANCE_HEADING.len()..];
    let section = match section.find("\n## ") {
        Some(end) => &section[..end],
        None => section,
    };

    let mut items = Vec::new();
    for line in section.lines() {
        let trimmed = line.trim();
        for prefix in ["- [ ]", "- [x]", "- [X]"] {
            if let Some(text) = trimmed.strip_prefix(prefix) {
                items.push(text.trim().to_string());
                break;
            }
        }
    }
    items
}

/// Load and parse a project's ADR into a [`Project`]. `phases` is supplied
/// by the caller (already loaded via [`crate::phase_loader::load`]) so this
/// module stays focused on the ADR document alone.
pub fn load_project(project_dir: &Path, phases: Vec<PhaseConfig>) -> Result<Project, SpecError> {
    let adr_path = find_adr_path(project_dir)?;
    let raw =
        std::fs::read_to_string(&adr_path).map_err(|e| SpecError::AdrUnparseable(e.to_string()))?;
    let (frontmatter, body) = split_frontmatter(&raw)?;
    let adr = parse_frontmatter(frontmatter)?;
    let acceptance_criteria = parse_acceptance_criteria(body);
    Ok(Project {
        dir: project_dir.to_path_buf(),
        adr_path,
        adr,
        acceptance_criteria,
        phases,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"---
adr_id: 42
title: Widget Exporter
status: Accepted
language: python
domain: data-export
files:
  create:
    - src/widget.py
  modify:
    - src/__init__.py
---

# ADR-42: Widget Exporter

## Akzeptanzkriterien

- [ ] Exports widgets to CSV
- [x] Validates widget schema before export

## Notes

Irrelevant trailing section.
"#;

    #[test]
    fn finds_the_single_adr_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("ADR-42.md"), SAMPLE).unwrap();
        let path = find_adr_path(dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "ADR-42.md");
    }

    #[test]
    fn missing_adr_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(find_adr_path(dir.path()).is_err());
    }

    #[test]
    fn numeric_adr_id_is_coerced_to_string() {
        let (frontmatter, _) = split_frontmatter(SAMPLE).unwrap();
        let adr = parse_frontmatter(frontmatter).unwrap();
        assert_eq!(adr.adr_id, "42");
        assert_eq!(adr.title, "Widget Exporter");
        assert_eq!(adr.files.create, vec!["src/widget.py".to_string()]);
    }

    #[test]
    fn acceptance_criteria_are_extracted_and_checkbox_state_ignored() {
        let (_, body) = split_frontmatter(SAMPLE).unwrap();
        let criteria = parse_acceptance_criteria(body);
        assert_eq!(
            criteria,
            vec![
                "Exports widgets to CSV".to_string(),
                "Validates widget schema before export".to_string(),
            ]
        );
    }

    #[test]
    fn load_project_assembles_adr_and_phases() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("ADR-42.md"), SAMPLE).unwrap();
        let project = load_project(dir.path(), vec![]).unwrap();
        assert_eq!(project.adr.adr_id, "42");
        assert_eq!(project.acceptance_criteria.len(), 2);
        assert!(project.phases.is_empty());
    }
}
