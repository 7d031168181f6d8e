use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use smith_core::{RunId, StageKind, METRICS_FILE};

use crate::manifest::{RunManifest, SelectionRecord};

pub const MANIFEST_FILE: &str = "run.json";
pub const SELECTION_FILE: &str = "selection.json";
pub const CHECKLIST_FILE: &str = "checklist.txt";
pub const WORKLOG_FILE: &str = "worklog.md";
pub const REPORT_FILE: &str = "report.md";

/// Root under which every run gets its own directory.
#[derive(Clone, Debug)]
pub struct RunStore {
    pub root: PathBuf,
}

impl RunStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn create_run(&self, run_id: &RunId) -> Result<RunDir> {
        let dir = self.root.join(run_id.as_str());
        std::fs::create_dir_all(&dir).with_context(|| format!("create run dir {}", dir.display()))?;
        Ok(RunDir { path: dir })
    }
}

/// One run's directory: the promoted root plus candidate and stage subdirectories.
#[derive(Clone, Debug)]
pub struct RunDir {
    pub path: PathBuf,
}

impl RunDir {
    /// Existing run directory; it must contain a manifest.
    pub fn open(path: &Path) -> Result<Self> {
        let manifest = path.join(MANIFEST_FILE);
        anyhow::ensure!(manifest.exists(), "{} is not a run directory (no {MANIFEST_FILE})", path.display());
        Ok(Self { path: path.to_path_buf() })
    }

    /// Candidate work dir `candidates/<name>`, created if missing.
    pub fn candidate_dir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.path.join("candidates").join(name);
        std::fs::create_dir_all(&dir).with_context(|| format!("create candidate dir {}", dir.display()))?;
        Ok(dir)
    }

    pub fn append_worklog(&self, line: &str) -> Result<()> {
        let path = self.path.join(WORKLOG_FILE);
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open worklog {}", path.display()))?;
        writeln!(f, "- {}", line)?;
        Ok(())
    }

    pub fn write_manifest(&self, manifest: &RunManifest) -> Result<()> {
        write_json(&self.path.join(MANIFEST_FILE), manifest)
    }

    pub fn read_manifest(&self) -> Result<RunManifest> {
        read_json(&self.path.join(MANIFEST_FILE))
    }

    pub fn write_checklist(&self, text: &str) -> Result<()> {
        write_text(&self.path.join(CHECKLIST_FILE), text)
    }

    pub fn read_checklist(&self) -> Result<String> {
        let path = self.path.join(CHECKLIST_FILE);
        std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /// Copy the candidate's model, validation script and metric artifact into
    /// the run root, replacing whatever was promoted before. Returns the
    /// promoted file names.
    pub fn promote(&self, candidate_dir: &Path, script_ext: &str) -> Result<Vec<String>> {
        let mut promoted = vec![];
        for name in [format!("model.{script_ext}"), format!("test.{script_ext}"), METRICS_FILE.to_string()] {
            let from = candidate_dir.join(&name);
            let to = self.path.join(&name);
            if !from.exists() {
                // A stale artifact from an earlier promotion must not survive.
                if to.exists() {
                    std::fs::remove_file(&to).with_context(|| format!("remove stale {}", to.display()))?;
                }
                continue;
            }
            std::fs::copy(&from, &to).with_context(|| format!("promote {} -> {}", from.display(), to.display()))?;
            promoted.push(name);
        }
        Ok(promoted)
    }

    pub fn write_selection(&self, record: &SelectionRecord) -> Result<()> {
        write_json(&self.path.join(SELECTION_FILE), record)
    }

    pub fn read_selection(&self) -> Result<SelectionRecord> {
        read_json(&self.path.join(SELECTION_FILE))
    }

    /// Persist a stage's parsed marker payload in the run root.
    pub fn write_stage_result(&self, stage: StageKind, value: &serde_json::Value) -> Result<PathBuf> {
        let path = self.path.join(stage.result_file());
        write_json(&path, value)?;
        Ok(path)
    }

    pub fn read_stage_result(&self, stage: StageKind) -> Result<Option<serde_json::Value>> {
        let path = self.path.join(stage.result_file());
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    pub fn write_report(&self, markdown: &str) -> Result<PathBuf> {
        let path = self.path.join(REPORT_FILE);
        write_text(&path, markdown)?;
        Ok(path)
    }
}

pub fn write_text(path: &Path, text: &str) -> Result<()> {
    std::fs::write(path, text).with_context(|| format!("write {}", path.display()))
}

pub fn read_text_if_exists(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    std::fs::read_to_string(path).map(Some).with_context(|| format!("read {}", path.display()))
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, bytes).with_context(|| format!("write {}", path.display()))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
