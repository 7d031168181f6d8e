use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::{ConcreteModelChoice, ModelFamily};

/// Terminal state of one candidate. Immutable once the runner returns it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateOutcome {
    pub index: usize,
    pub work_dir: PathBuf,
    pub family: ModelFamily,
    pub concrete: ConcreteModelChoice,
    pub result: CandidateResult,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CandidateResult {
    Success {
        model_code: String,
        test_code: String,
        stdout: String,
        stderr: String,
    },
    Failed {
        reason: String,
        last_error: String,
        #[serde(default)]
        last_model_code: Option<String>,
    },
}

impl CandidateOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.result, CandidateResult::Success { .. })
    }
}

/// Whole-run result of the candidate phase.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineResult {
    Multi {
        checklist_snapshot: String,
        outcomes: Vec<CandidateOutcome>,
    },
    Failed {
        reason: String,
        checklist_snapshot: String,
        #[serde(default)]
        last_error: Option<String>,
    },
}

/// Downstream stages run on the promoted candidate, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Tune,
    FinalTrain,
    Predict,
    Explain,
}

impl StageKind {
    pub const ORDER: [StageKind; 4] = [StageKind::Tune, StageKind::FinalTrain, StageKind::Predict, StageKind::Explain];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Tune => "tune",
            StageKind::FinalTrain => "final_train",
            StageKind::Predict => "predict",
            StageKind::Explain => "explain",
        }
    }

    /// Stdout marker preceding the stage's single-line JSON result.
    pub fn marker(self) -> &'static str {
        match self {
            StageKind::Tune => "__TUNE_RESULT__",
            StageKind::FinalTrain => "__FINAL_TRAIN_RESULT__",
            StageKind::Predict => "__PREDICT_RESULT__",
            StageKind::Explain => "__EXPLAIN_RESULT__",
        }
    }

    /// File the parsed marker payload is persisted to, in the promoted root.
    pub fn result_file(self) -> &'static str {
        match self {
            StageKind::Tune => "best_params.json",
            StageKind::FinalTrain => "final_train.json",
            StageKind::Predict => "predictions.json",
            StageKind::Explain => "explanation.json",
        }
    }

    /// Prediction failures are logged and the pipeline moves on; every other
    /// stage failure stops the remaining stages.
    pub fn tolerates_failure(self) -> bool {
        matches!(self, StageKind::Predict)
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one stage invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageResult {
    Success {
        work_dir: PathBuf,
        generated_code: String,
        stdout: String,
        #[serde(default)]
        parsed_json: Option<serde_json::Value>,
    },
    Failed {
        reason: String,
        work_dir: PathBuf,
        #[serde(default)]
        generated_code: Option<String>,
        last_output: String,
    },
}

impl StageResult {
    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Success { .. })
    }

    pub fn parsed_json(&self) -> Option<&serde_json::Value> {
        match self {
            StageResult::Success { parsed_json, .. } => parsed_json.as_ref(),
            StageResult::Failed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_prediction_tolerates_failure() {
        let tolerant: Vec<_> = StageKind::ORDER.iter().filter(|s| s.tolerates_failure()).collect();
        assert_eq!(tolerant, vec![&StageKind::Predict]);
    }

    #[test]
    fn markers_are_distinct() {
        let mut markers: Vec<_> = StageKind::ORDER.iter().map(|s| s.marker()).collect();
        markers.sort();
        markers.dedup();
        assert_eq!(markers.len(), 4);
    }

    #[test]
    fn candidate_result_is_tagged() {
        let r = CandidateResult::Failed { reason: "r".into(), last_error: "e".into(), last_model_code: None };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["status"], "failed");
    }
}
