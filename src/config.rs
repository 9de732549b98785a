//! Runtime configuration (§A.3 of the ambient stack): agent binary and
//! flags, the model-escalation chain, retry ceilings, the evolution
//! pipeline's twin/production roots, and the control-script contract.
//!
//! Discovery order, highest precedence first: `--config` CLI flag,
//! `HELIX_CONFIG` env var, `.helix/config.toml` in the project directory,
//! then compiled-in defaults. Grounded in the teacher's `ForgeConfig`
//! layered-discovery idiom (CLI args > env > TOML > defaults), rewired onto
//! the fields HELIX actually needs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const CONFIG_ENV_VAR: &str = "HELIX_CONFIG";
const CONFIG_RELATIVE_PATH: &str = ".helix/config.toml";

fn default_model_chain() -> Vec<String> {
    vec![
        "claude-3-haiku".to_string(),
        "claude-3-sonnet".to_string(),
        "claude-3-opus".to_string(),
    ]
}

fn default_agent_bin() -> String {
    "claude".to_string()
}

fn default_timeout_seconds() -> u64 {
    600
}

fn default_max_stage1_attempts() -> u32 {
    3
}

fn default_max_stage2_attempts() -> u32 {
    2
}

fn default_channel_capacity() -> usize {
    100
}

fn default_keepalive_seconds() -> u64 {
    30
}

fn default_health_path() -> String {
    "/health".to_string()
}

/// Mirrors `.helix/config.toml`; every field has a default so a partial or
/// absent file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HelixConfig {
    pub agent_bin: String,
    pub agent_extra_flags: Vec<String>,
    pub model_chain: Vec<String>,
    pub default_timeout_seconds: u64,
    pub max_stage1_attempts: u32,
    pub max_stage2_attempts: u32,
    pub max_total_retries: u32,
    pub event_channel_capacity: usize,
    pub keepalive_interval_seconds: u64,
    pub production_root: Option<PathBuf>,
    pub test_root: Option<PathBuf>,
    pub control_script: Option<PathBuf>,
    pub health_check_port: Option<u16>,
    pub health_check_path: String,
    pub template_dir: Option<PathBuf>,
}

impl Default for HelixConfig {
    fn default() -> Self {
        Self {
            agent_bin: default_agent_bin(),
            agent_extra_flags: Vec::new(),
            model_chain: default_model_chain(),
            default_timeout_seconds: default_timeout_seconds(),
            max_stage1_attempts: default_max_stage1_attempts(),
            max_stage2_attempts: default_max_stage2_attempts(),
            max_total_retries: default_max_stage1_attempts() + default_max_stage2_attempts(),
            event_channel_capacity: default_channel_capacity(),
            keepalive_interval_seconds: default_keepalive_seconds(),
            production_root: None,
            test_root: None,
            control_script: None,
            health_check_port: None,
            health_check_path: default_health_path(),
            template_dir: None,
        }
    }
}

impl HelixConfig {
    /// Resolve configuration using the documented discovery order. `cli_path`
    /// is the value of an explicit `--config` flag, if given.
    pub fn load(project_dir: &Path, cli_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_path(project_dir, cli_path);
        match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))
            }
            _ => Ok(Self::default()),
        }
    }

    fn resolve_path(project_dir: &Path, cli_path: Option<&Path>) -> Option<PathBuf> {
        if let Some(cli_path) = cli_path {
            return Some(cli_path.to_path_buf());
        }
        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            return Some(PathBuf::from(env_path));
        }
        Some(project_dir.join(CONFIG_RELATIVE_PATH))
    }

    /// Command-line invocation for the configured agent: binary + baseline
    /// flags (non-interactive, JSON streaming) + any user-configured extras.
    pub fn agent_invocation(&self) -> (String, Vec<String>) {
        let mut flags = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];
        flags.extend(self.agent_extra_flags.clone());
        (self.agent_bin.clone(), flags)
    }

    pub fn default_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.default_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_usable_with_no_config_file() {
        let dir = tempdir().unwrap();
        let config = HelixConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.agent_bin, "claude");
        assert_eq!(config.model_chain.len(), 3);
    }

    #[test]
    fn project_config_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".helix")).unwrap();
        std::fs::write(
            dir.path().join(".helix/config.toml"),
            "agent_bin = \"custom-claude\"\nmax_stage1_attempts = 5\n",
        )
        .unwrap();
        let config = HelixConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.agent_bin, "custom-claude");
        assert_eq!(config.max_stage1_attempts, 5);
    }

    #[test]
    fn explicit_cli_path_wins_over_project_default() {
        let dir = tempdir().unwrap();
        let alt = dir.path().join("alt-config.toml");
        std::fs::write(&alt, "agent_bin = \"alt-agent\"\n").unwrap();
        let config = HelixConfig::load(dir.path(), Some(&alt)).unwrap();
        assert_eq!(config.agent_bin, "alt-agent");
    }

    #[test]
    fn agent_invocation_includes_stream_json_flags() {
        let config = HelixConfig::default();
        let (bin, flags) = config.agent_invocation();
        assert_eq!(bin, "claude");
        assert!(flags.contains(&"stream-json".to_string()));
    }
}
