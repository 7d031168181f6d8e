use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use smith_core::{ChecklistSpec, ConcreteModelChoice, ModelFamily, ModelFamilyPick, PipelineError};
use smith_oracle::{CodeOracle, OracleError, Prompt};

use crate::prompts;

/// Number of concrete candidates per run.
pub const CANDIDATE_COUNT: usize = 3;

/// Family pick plus the concrete candidates to build under it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidatePlan {
    pub family: ModelFamilyPick,
    pub choices: Vec<ConcreteModelChoice>,
}

#[derive(Deserialize)]
struct ChoicesReply {
    choices: Vec<ConcreteModelChoice>,
}

fn oracle_error(prompt: &Prompt, e: OracleError) -> PipelineError {
    PipelineError::Oracle { purpose: prompt.purpose.to_string(), message: e.to_string() }
}

/// One family, then exactly three distinct concrete models under it. Any
/// deviation is rejected here; no retry happens at this layer.
pub fn select_candidates(oracle: &dyn CodeOracle, spec: &ChecklistSpec) -> Result<CandidatePlan, PipelineError> {
    let prompt = prompts::model_family(spec);
    let reply = oracle.generate_json(&prompt, &prompts::family_schema()).map_err(|e| oracle_error(&prompt, e))?;
    let raw_family = reply.get("family").and_then(|v| v.as_str()).unwrap_or_default();
    let family = ModelFamily::parse(raw_family).map_err(|e| PipelineError::SelectorContractViolation(e.to_string()))?;
    let rationale = reply.get("rationale").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    tracing::info!(family = %family, "model family selected");

    let prompt = prompts::concrete_models(spec, family);
    let reply = oracle.generate_json(&prompt, &prompts::concrete_schema()).map_err(|e| oracle_error(&prompt, e))?;
    let ChoicesReply { choices } = serde_json::from_value(reply)
        .map_err(|e| PipelineError::SelectorContractViolation(format!("malformed concrete choices: {e}")))?;
    validate_choices(&choices)?;
    for c in &choices {
        tracing::info!(library = %c.library, model = %c.model_id, "concrete candidate");
    }

    Ok(CandidatePlan { family: ModelFamilyPick { family, rationale }, choices })
}

pub fn validate_choices(choices: &[ConcreteModelChoice]) -> Result<(), PipelineError> {
    if choices.len() != CANDIDATE_COUNT {
        return Err(PipelineError::SelectorContractViolation(format!(
            "expected {CANDIDATE_COUNT} concrete choices, got {}",
            choices.len()
        )));
    }
    if let Some(blank) = choices.iter().find(|c| c.library.trim().is_empty() || c.model_id.trim().is_empty()) {
        return Err(PipelineError::SelectorContractViolation(format!(
            "choice with empty library or model id: {:?}/{:?}",
            blank.library, blank.model_id
        )));
    }
    let distinct: BTreeSet<_> = choices.iter().map(|c| c.identity()).collect();
    if distinct.len() != CANDIDATE_COUNT {
        return Err(PipelineError::SelectorContractViolation(format!(
            "expected {CANDIDATE_COUNT} distinct (library, model) pairs, got {}",
            distinct.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use smith_core::parse_checklist;
    use smith_oracle::{Purpose, Scripted, ScriptedOracle};

    fn spec() -> ChecklistSpec {
        parse_checklist(
            "Input type: tabular\nOutput type: multiclass\nTraining type: supervised\n\
             Split strategy: stratified\nMetric: accuracy\nData path: iris.csv\n",
        )
        .unwrap()
    }

    fn oracle_with(choices: serde_json::Value) -> ScriptedOracle {
        let o = ScriptedOracle::new();
        o.push_json(Purpose::ModelFamily, json!({"family": "tree_ensembles", "rationale": "tabular"}));
        o.push_json(Purpose::ConcreteModels, json!({ "choices": choices }));
        o
    }

    #[test]
    fn accepts_three_distinct_choices() {
        let oracle = oracle_with(json!([
            {"library": "sklearn", "model_id": "RandomForestClassifier", "extra_dependencies": []},
            {"library": "sklearn", "model_id": "ExtraTreesClassifier"},
            {"library": "lightgbm", "model_id": "LGBMClassifier", "extra_dependencies": ["lightgbm"]}
        ]));
        let plan = select_candidates(&oracle, &spec()).unwrap();
        assert_eq!(plan.family.family, ModelFamily::TreeEnsembles);
        assert_eq!(plan.choices.len(), 3);
        assert_eq!(plan.choices[2].extra_dependencies, vec!["lightgbm".to_string()]);
    }

    #[test]
    fn rejects_duplicate_pairs() {
        let oracle = oracle_with(json!([
            {"library": "sklearn", "model_id": "RandomForestClassifier"},
            {"library": "SKLearn", "model_id": "randomforestclassifier "},
            {"library": "xgboost", "model_id": "XGBClassifier"}
        ]));
        let err = select_candidates(&oracle, &spec()).unwrap_err();
        assert!(matches!(err, PipelineError::SelectorContractViolation(m) if m.contains("distinct")));
    }

    #[test]
    fn rejects_wrong_count() {
        let oracle = oracle_with(json!([
            {"library": "sklearn", "model_id": "RandomForestClassifier"},
            {"library": "xgboost", "model_id": "XGBClassifier"}
        ]));
        assert!(matches!(
            select_candidates(&oracle, &spec()).unwrap_err(),
            PipelineError::SelectorContractViolation(_)
        ));
    }

    #[test]
    fn rejects_family_outside_the_list() {
        let oracle = ScriptedOracle::new();
        oracle.push_json(Purpose::ModelFamily, json!({"family": "quantum_annealing", "rationale": ""}));
        let err = select_candidates(&oracle, &spec()).unwrap_err();
        assert!(matches!(err, PipelineError::SelectorContractViolation(m) if m.contains("gradient_boosting")));
        assert!(oracle.calls_for(Purpose::ConcreteModels).is_empty());
    }

    #[test]
    fn oracle_failure_is_typed() {
        let oracle = ScriptedOracle::new();
        oracle.push(Purpose::ModelFamily, Scripted::Fail(OracleError::Timeout(std::time::Duration::from_secs(5))));
        assert!(matches!(select_candidates(&oracle, &spec()).unwrap_err(), PipelineError::Oracle { .. }));
    }
}
