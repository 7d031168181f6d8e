use smith_oracle::CodeOracle;
use smith_runtime::ScriptRuntime;

use crate::config::Config;
use crate::deps::DependencyResolver;

/// Collaborators and settings shared by every phase of one run.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub oracle: &'a dyn CodeOracle,
    pub runtime: &'a dyn ScriptRuntime,
    pub cfg: &'a Config,
}

impl<'a> Services<'a> {
    pub fn new(oracle: &'a dyn CodeOracle, runtime: &'a dyn ScriptRuntime, cfg: &'a Config) -> Self {
        Self { oracle, runtime, cfg }
    }

    pub fn resolver(&self) -> DependencyResolver<'a> {
        DependencyResolver {
            oracle: self.oracle,
            runtime: self.runtime,
            max_plan: self.cfg.budgets.max_dependency_plan,
            install_timeout: self.cfg.runtime.install_timeout(),
        }
    }

    pub fn model_file(&self) -> String {
        format!("model.{}", self.runtime.script_ext())
    }

    pub fn test_file(&self) -> String {
        format!("test.{}", self.runtime.script_ext())
    }
}
