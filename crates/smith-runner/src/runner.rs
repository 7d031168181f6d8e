use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use smith_artifacts::{RunDir, RunManifest, RunStore};
use smith_oracle::{CodeOracle, CommandBackend, HttpBackend, StructuredOracle};
use smith_runtime::{PythonRuntime, ScriptRuntime};

use crate::context::Services;
use crate::doctor::{doctor, DoctorCheck};
use crate::orchestrator::{Orchestrator, RunSummary};
use crate::stages::StagesOutcome;
use crate::Config;

/// A project with its configuration and the collaborators built from it.
pub struct Runner {
    pub project_root: PathBuf,
    pub cfg: Config,
    pub oracle: Box<dyn CodeOracle>,
    pub runtime: Box<dyn ScriptRuntime>,
}

impl Runner {
    pub fn open(project_root: PathBuf) -> Result<Self> {
        let cfg = Config::load_or_init(&project_root)?;
        let oracle = build_oracle(&cfg)?;
        let runtime: Box<dyn ScriptRuntime> = Box::new(PythonRuntime::new(cfg.runtime.interpreters.clone()));
        Ok(Self { project_root, cfg, oracle, runtime })
    }

    pub fn with_collaborators(
        project_root: PathBuf,
        cfg: Config,
        oracle: Box<dyn CodeOracle>,
        runtime: Box<dyn ScriptRuntime>,
    ) -> Self {
        Self { project_root, cfg, oracle, runtime }
    }

    /// Write the default config (if missing) and create the runs root.
    pub fn init_project(project_root: &Path) -> Result<PathBuf> {
        let cfg = Config::load_or_init(project_root)?;
        let runs = cfg.runs_root(project_root);
        std::fs::create_dir_all(&runs).with_context(|| format!("create {}", runs.display()))?;
        Ok(Config::config_path(project_root))
    }

    pub fn doctor(&self) -> Vec<DoctorCheck> {
        doctor(&self.project_root, &self.cfg)
    }

    pub fn run_checklist(&self, snapshot: &str) -> Result<RunSummary> {
        self.orchestrator().run(snapshot)
    }

    pub fn run_stages(&self, run_dir: &Path) -> Result<StagesOutcome> {
        let run = RunDir::open(run_dir)?;
        self.orchestrator().run_stages(&run)
    }

    pub fn show(run_dir: &Path) -> Result<RunManifest> {
        RunDir::open(run_dir)?.read_manifest()
    }

    fn orchestrator(&self) -> Orchestrator<'_> {
        let svc = Services::new(self.oracle.as_ref(), self.runtime.as_ref(), &self.cfg);
        Orchestrator::new(svc, RunStore::new(self.cfg.runs_root(&self.project_root)))
    }
}

/// Oracle for the configured backend, wrapped in structural self-repair.
pub fn build_oracle(cfg: &Config) -> Result<Box<dyn CodeOracle>> {
    let oracle = &cfg.oracle;
    let timeout = std::time::Duration::from_secs(oracle.timeout_secs);
    match oracle.backend.as_str() {
        "command" => {
            let backend = CommandBackend::new(&oracle.command, timeout)?;
            Ok(Box::new(StructuredOracle::new(backend, oracle.repair_attempts)))
        }
        "http" => {
            let endpoint = oracle.endpoint.clone().ok_or_else(|| anyhow!("oracle.endpoint is required for the http backend"))?;
            let model = oracle.model.clone().ok_or_else(|| anyhow!("oracle.model is required for the http backend"))?;
            let api_key = oracle.api_key_env.as_deref().and_then(|var| std::env::var(var).ok());
            let backend = HttpBackend::new(endpoint, model, api_key, timeout)?;
            Ok(Box::new(StructuredOracle::new(backend, oracle.repair_attempts)))
        }
        other => Err(anyhow!("unknown oracle backend `{other}` (expected command or http)")),
    }
}
