use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use smith_core::{
    CandidateOutcome, CandidateResult, ChecklistSpec, ConcreteModelChoice, Direction, MetricReport, ModelFamily,
    ModelFamilyPick, StageKind,
};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Selecting,
    Candidates,
    Promoted,
    Staged,
    Failed,
}

/// One row per candidate, shared by `run.json` and `selection.json`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CandidateRecord {
    pub index: usize,
    pub library: String,
    pub model_id: String,
    pub work_dir: PathBuf,
    pub status: String,
    #[serde(default)]
    pub metric: Option<MetricReport>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl CandidateRecord {
    pub fn from_outcome(outcome: &CandidateOutcome, metric: Option<MetricReport>) -> Self {
        let (status, reason) = match &outcome.result {
            CandidateResult::Success { .. } => ("success", None),
            CandidateResult::Failed { reason, .. } => ("failed", Some(reason.clone())),
        };
        Self {
            index: outcome.index,
            library: outcome.concrete.library.clone(),
            model_id: outcome.concrete.model_id.clone(),
            work_dir: outcome.work_dir.clone(),
            status: status.to_string(),
            metric,
            reason,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StageRecord {
    pub stage: StageKind,
    pub status: String,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// `run.json`: rewritten after every phase of a run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RunManifest {
    pub run_id: String,
    pub project_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub checklist: Option<ChecklistSpec>,
    #[serde(default)]
    pub family: Option<ModelFamilyPick>,
    #[serde(default)]
    pub choices: Vec<ConcreteModelChoice>,
    #[serde(default)]
    pub candidates: Vec<CandidateRecord>,
    #[serde(default)]
    pub winner_index: Option<usize>,
    #[serde(default)]
    pub stages: Vec<StageRecord>,
    #[serde(default)]
    pub failure: Option<String>,
}

impl RunManifest {
    pub fn new(run_id: &str, project_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            project_id: project_id.to_string(),
            status: RunStatus::Selecting,
            checklist: None,
            family: None,
            choices: vec![],
            candidates: vec![],
            winner_index: None,
            stages: vec![],
            failure: None,
        }
    }

    /// Replaces any earlier record for the same stage.
    pub fn record_stage(&mut self, record: StageRecord) {
        self.stages.retain(|s| s.stage != record.stage);
        self.stages.push(record);
    }
}

/// `selection.json`: identity and score of the promoted candidate.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SelectionRecord {
    pub winner_index: usize,
    pub family: ModelFamily,
    pub library: String,
    pub model_id: String,
    pub work_dir: PathBuf,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    pub direction: Direction,
    pub scored: bool,
    pub model_sha256: String,
    pub candidates: Vec<CandidateRecord>,
}
