//! Template Renderer (C4): renders `phases/<id>/CLAUDE.md` from a flat
//! context map derived from the ADR and the phase being run.
//!
//! The templating surface is intentionally small — `{{var}}` substitution,
//! `{{#each list}}...{{/each}}` blocks — rather than pulling in a full
//! engine the teacher never depended on; §4.4 only requires include/extends
//! composition "free in exact surface" plus three concrete helpers, which
//! this module exposes directly as functions instead of template
//! directives, keeping the dependency footprint aligned with the teacher's
//! stack (no new templating crate).

use std::collections::BTreeMap;
use std::path::Path;

use crate::model::{AdrFrontmatter, PhaseConfig};

/// Built-in fallback template used when nothing more specific is found
/// under the configured template directory (§4.4's "generic base template").
pub const BASE_TEMPLATE: &str = "\
# {{phase_name}} ({{phase_type}})

Project: {{project_name}} ({{project_id}})
Domain: {{project_domain}}
Language: {{project_language}}

## Acceptance Criteria

{{#each acceptance_criteria}}- {{.}}
{{/each}}

## Files to touch

{{#each files_changed}}- {{.}}
{{/each}}

## Expected outputs

{{#each phase_outputs}}- {{.}}
{{/each}}

## Hints from a prior failed attempt

{{#each escalation_hints}}- {{.}}
{{/each}}
";

/// Read a named template's source from `template_dir` (file `<name>.md`),
/// falling back to [`BASE_TEMPLATE`] when the directory is unconfigured or
/// the file is absent.
pub fn load_template_source(template_dir: Option<&Path>, name: &str) -> String {
    if let Some(dir) = template_dir {
        let path = dir.join(format!("{name}.md"));
        if let Ok(contents) = std::fs::read_to_string(&path) {
            return contents;
        }
    }
    BASE_TEMPLATE.to_string()
}

#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    pub values: BTreeMap<String, String>,
    pub lists: BTreeMap<String, Vec<String>>,
}

impl RenderContext {
    pub fn from_adr_and_phase(
        project_id: &str,
        adr: &AdrFrontmatter,
        phase: &PhaseConfig,
        acceptance_criteria: &[String],
        escalation_hints: &[String],
    ) -> Self {
        let mut values = BTreeMap::new();
        values.insert("project_id".into(), project_id.to_string());
        values.insert(
            "project_name".into(),
            adr.title.clone(),
        );
        values.insert(
            "project_domain".into(),
            adr.domain.clone().unwrap_or_default(),
        );
        values.insert(
            "project_language".into(),
            adr.language.clone().unwrap_or_default(),
        );
        values.insert("phase_id".into(), phase.id.clone());
        values.insert("phase_name".into(), phase.name.clone());
        values.insert("phase_type".into(), phase.phase_type.as_str().to_string());

        let mut lists = BTreeMap::new();
        lists.insert("phase_outputs".into(), phase.output.clone());
        lists.insert("acceptance_criteria".into(), acceptance_criteria.to_vec());
        let mut files_changed = adr.files.create.clone();
        files_changed.extend(adr.files.modify.iter().cloned());
        lists.insert("files_changed".into(), files_changed);
        lists.insert("escalation_hints".into(), escalation_hints.to_vec());

        Self { values, lists }
    }
}

/// Select a template name from phase type + ADR language, falling back to a
/// language default and then a generic base template (§4.4).
pub fn select_template(phase_type: &str, language: &str, available: &[&str]) -> String {
    let specific = format!("{phase_type}.{language}");
    if available.contains(&specific.as_str()) {
        return specific;
    }
    let language_default = format!("base.{language}");
    if available.contains(&language_default.as_str()) {
        return language_default;
    }
    "base".to_string()
}

/// Indent every line of `text` by `n` spaces.
pub fn indent(text: &str, n: usize) -> String {
    let prefix = " ".repeat(n);
    text.lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a bullet list from a sequence.
pub fn bullet_list(items: &[String]) -> String {
    items.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n")
}

/// Render a numbered list from a sequence.
pub fn numbered_list(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a template string against `context`. Supports `{{var}}`
/// substitution and `{{#each list}}{{.}}{{/each}}` block iteration (each
/// emitted as a bullet line); unknown variables render as an empty string.
pub fn render(template: &str, context: &RenderContext) -> String {
    let mut out = String::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{#each ") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 8..];
        let Some(name_end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let list_name = after[..name_end].trim();
        let body_start = name_end + 2;
        let Some(close) = after.find("{{/each}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let body = &after[body_start..close];
        if let Some(items) = context.lists.get(list_name) {
            for item in items {
                out.push_str(&body.replace("{{.}}", item));
            }
        }
        rest = &after[close + 9..];
    }
    out.push_str(rest);

    // Simple {{var}} substitution over whatever remains.
    let mut result = out;
    for (key, value) in &context.values {
        result = result.replace(&format!("{{{{{key}}}}}"), value);
    }
    result
}

/// Render a phase's `CLAUDE.md` and write it into the phase directory.
pub fn render_instruction_file(
    project_dir: &std::path::Path,
    phase: &PhaseConfig,
    context: &RenderContext,
    template_source: &str,
) -> std::io::Result<std::path::PathBuf> {
    let phase_dir = project_dir.join("phases").join(&phase.id);
    std::fs::create_dir_all(&phase_dir)?;
    let rendered = render(template_source, context);
    let path = phase_dir.join("CLAUDE.md");
    std::fs::write(&path, rendered)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_template_prefers_specific_over_generic() {
        let available = ["development.python", "base.python", "base"];
        assert_eq!(
            select_template("development", "python", &available),
            "development.python"
        );
    }

    #[test]
    fn select_template_falls_back_to_language_default() {
        let available = ["base.python", "base"];
        assert_eq!(select_template("review", "python", &available), "base.python");
    }

    #[test]
    fn select_template_falls_back_to_generic_base() {
        let available = ["base"];
        assert_eq!(select_template("review", "rust", &available), "base");
    }

    #[test]
    fn indent_prefixes_every_line() {
        assert_eq!(indent("a\nb", 2), "  a\n  b");
    }

    #[test]
    fn bullet_list_formats_each_item() {
        let items = vec!["one".to_string(), "two".to_string()];
        assert_eq!(bullet_list(&items), "- one\n- two");
    }

    #[test]
    fn load_template_source_falls_back_to_base_when_unconfigured() {
        assert_eq!(load_template_source(None, "development.python"), BASE_TEMPLATE);
    }

    #[test]
    fn load_template_source_prefers_a_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("base.md"), "custom template").unwrap();
        assert_eq!(load_template_source(Some(dir.path()), "base"), "custom template");
    }

    #[test]
    fn render_substitutes_variables_and_each_blocks() {
        let mut ctx = RenderContext::default();
        ctx.values.insert("phase_name".into(), "Develop".into());
        ctx.lists.insert(
            "phase_outputs".into(),
            vec!["src/foo.py".into(), "src/bar.py".into()],
        );
        let template = "Phase: {{phase_name}}\nOutputs:\n{{#each phase_outputs}}- {{.}}\n{{/each}}";
        let rendered = render(template, &ctx);
        assert!(rendered.contains("Phase: Develop"));
        assert!(rendered.contains("- src/foo.py"));
        assert!(rendered.contains("- src/bar.py"));
    }
}
