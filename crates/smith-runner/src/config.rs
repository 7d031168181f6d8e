use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub project: ProjectConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub budgets: Budgets,
    #[serde(default)]
    pub stages: StagesConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    pub id: String,
    #[serde(default = "default_runs_root")]
    pub runs_root: String,
}

fn default_runs_root() -> String {
    ".mlsmith/runs".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OracleConfig {
    pub backend: String, // "command" | "http"
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
    pub repair_attempts: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            backend: "command".to_string(),
            command: vec!["claude".to_string(), "--print".to_string()],
            endpoint: Some("https://api.openai.com/v1/chat/completions".to_string()),
            model: Some("gpt-4o".to_string()),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            timeout_secs: 300,
            repair_attempts: 2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    pub interpreters: Vec<String>,
    pub script_timeout_secs: u64,
    pub install_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interpreters: vec!["python3".to_string(), "python".to_string()],
            script_timeout_secs: 1800,
            install_timeout_secs: 900,
        }
    }
}

impl RuntimeConfig {
    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
}

/// Retry budgets and thresholds of the candidate and stage loops.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Budgets {
    pub max_model_retries: u32,
    pub max_test_fixes: u32,
    pub test_fault_threshold: f64,
    pub max_stage_retries: u32,
    /// Lowers the per-pass package cap; values above 15 have no effect.
    pub max_dependency_plan: usize,
    pub diff_preview_lines: usize,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            max_model_retries: 4,
            max_test_fixes: 2,
            test_fault_threshold: 0.55,
            max_stage_retries: 3,
            max_dependency_plan: 15,
            diff_preview_lines: 80,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StagesConfig {
    pub enabled: bool,
    pub sanity_gate: bool,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self { enabled: true, sanity_gate: true }
    }
}

impl Config {
    pub fn default_for_project(project_id: &str) -> Self {
        Self {
            project: ProjectConfig { id: project_id.to_string(), runs_root: default_runs_root() },
            oracle: OracleConfig::default(),
            runtime: RuntimeConfig::default(),
            budgets: Budgets::default(),
            stages: StagesConfig::default(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    /// Load the project's config, writing the defaults first if it is missing.
    pub fn load_or_init(project_root: &Path) -> Result<Self> {
        let path = Self::config_path(project_root);
        if path.exists() {
            return Self::load_from(&path);
        }
        let project_id = project_root.file_name().and_then(|s| s.to_str()).unwrap_or("project");
        let cfg = Self::default_for_project(project_id);
        cfg.save_to(&path)?;
        tracing::info!(path = %path.display(), "wrote default config");
        Ok(cfg)
    }

    pub fn config_path(project_root: &Path) -> PathBuf {
        project_root.join(".mlsmith").join("mlsmith.toml")
    }

    /// Tilde-expanded runs root; relative paths hang off the project root.
    pub fn runs_root(&self, project_root: &Path) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(&self.project.runs_root).to_string());
        if expanded.is_absolute() {
            expanded
        } else {
            project_root.join(expanded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_round_trip_through_toml() {
        let dir = tempdir().unwrap();
        let path = Config::config_path(dir.path());
        let cfg = Config::default_for_project("churn");
        cfg.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), cfg);
        assert_eq!(cfg.budgets.max_model_retries, 4);
        assert_eq!(cfg.budgets.max_test_fixes, 2);
        assert_eq!(cfg.budgets.max_dependency_plan, 15);
    }

    #[test]
    fn partial_file_fills_in_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mlsmith.toml");
        std::fs::write(&path, "[project]\nid = \"p\"\n\n[budgets]\nmax_model_retries = 2\nmax_test_fixes = 1\ntest_fault_threshold = 0.7\nmax_stage_retries = 1\nmax_dependency_plan = 5\ndiff_preview_lines = 10\n").unwrap();
        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg.project.runs_root, ".mlsmith/runs");
        assert_eq!(cfg.budgets.max_model_retries, 2);
        assert_eq!(cfg.oracle, OracleConfig::default());
        assert!(cfg.stages.sanity_gate);
    }

    #[test]
    fn load_or_init_writes_defaults_once() {
        let dir = tempdir().unwrap();
        let cfg = Config::load_or_init(dir.path()).unwrap();
        assert!(Config::config_path(dir.path()).exists());
        assert_eq!(Config::load_or_init(dir.path()).unwrap(), cfg);
    }

    #[test]
    fn relative_runs_root_is_project_relative() {
        let cfg = Config::default_for_project("p");
        assert_eq!(cfg.runs_root(Path::new("/work/p")), PathBuf::from("/work/p/.mlsmith/runs"));
    }
}
