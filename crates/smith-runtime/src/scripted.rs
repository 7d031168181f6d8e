use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::traits::{ExecOutcome, ScriptRuntime};

/// Runtime returning canned outcomes. For tests; nothing is executed.
///
/// Outcomes are looked up per file name: the queued FIFO first, then the
/// file's default. Every call is recorded.
#[derive(Default)]
pub struct ScriptedRuntime {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    queued: HashMap<String, VecDeque<ExecOutcome>>,
    defaults: HashMap<String, ExecOutcome>,
    install_failures: HashMap<String, String>,
    runs: Vec<(PathBuf, String)>,
    installs: Vec<Vec<String>>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_run(&self, file_name: &str, outcome: ExecOutcome) {
        let mut inner = self.inner.lock().unwrap();
        inner.queued.entry(file_name.to_string()).or_default().push_back(outcome);
    }

    pub fn set_default(&self, file_name: &str, outcome: ExecOutcome) {
        let mut inner = self.inner.lock().unwrap();
        inner.defaults.insert(file_name.to_string(), outcome);
    }

    /// Make any install that includes `package` fail with `message`.
    pub fn fail_install_of(&self, package: &str, message: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.install_failures.insert(package.to_string(), message.to_string());
    }

    pub fn runs(&self) -> Vec<(PathBuf, String)> {
        self.inner.lock().unwrap().runs.clone()
    }

    pub fn runs_of(&self, file_name: &str) -> usize {
        self.inner.lock().unwrap().runs.iter().filter(|(_, f)| f == file_name).count()
    }

    pub fn installs(&self) -> Vec<Vec<String>> {
        self.inner.lock().unwrap().installs.clone()
    }

    pub fn remaining(&self, file_name: &str) -> usize {
        self.inner.lock().unwrap().queued.get(file_name).map_or(0, |q| q.len())
    }
}

impl ScriptRuntime for ScriptedRuntime {
    fn script_ext(&self) -> &str {
        "py"
    }

    fn run_script(&self, work_dir: &Path, file_name: &str, _timeout: Duration) -> Result<ExecOutcome> {
        let mut inner = self.inner.lock().unwrap();
        inner.runs.push((work_dir.to_path_buf(), file_name.to_string()));
        if let Some(outcome) = inner.queued.get_mut(file_name).and_then(|q| q.pop_front()) {
            return Ok(outcome);
        }
        inner
            .defaults
            .get(file_name)
            .cloned()
            .ok_or_else(|| anyhow!("no scripted outcome left for {file_name}"))
    }

    fn install(&self, packages: &[String], _timeout: Duration) -> Result<ExecOutcome> {
        let mut inner = self.inner.lock().unwrap();
        inner.installs.push(packages.to_vec());
        for p in packages {
            if let Some(msg) = inner.install_failures.get(p) {
                return Ok(ExecOutcome::failed(1, format!("ERROR: {msg}")));
            }
        }
        Ok(ExecOutcome::ok(format!("Successfully installed {}", packages.join(" "))))
    }
}
