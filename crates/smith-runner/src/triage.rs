use smith_core::{ChecklistSpec, Culprit, FailureTriage};
use smith_oracle::{ask, CodeOracle};

use crate::deps::missing_module_hints;
use crate::prompts;

/// Missing-dependency signatures in interpreter output.
const MISSING_DEPENDENCY: &[&str] = &["ModuleNotFoundError", "No module named", "DLL load failed"];

pub fn is_missing_dependency(output: &str) -> bool {
    MISSING_DEPENDENCY.iter().any(|sig| output.contains(sig))
}

/// Classify a failing run as the validation script's fault or the model's.
///
/// A missing dependency is always the model's, whichever file's import
/// tripped it; the oracle is not consulted for those. An oracle failure
/// yields `UNKNOWN`, which the caller treats like a model-side failure.
pub fn classify(oracle: &dyn CodeOracle, spec: &ChecklistSpec, model_code: &str, test_code: &str, output: &str) -> FailureTriage {
    if is_missing_dependency(output) {
        let modules = missing_module_hints(output);
        return FailureTriage {
            culprit: Culprit::Model,
            confidence: 1.0,
            rationale: if modules.is_empty() {
                "missing dependency".to_string()
            } else {
                format!("missing dependency: {}", modules.join(", "))
            },
        };
    }

    let prompt = prompts::triage(spec, model_code, test_code, output);
    match ask::<FailureTriage>(oracle, &prompt, &prompts::triage_schema()) {
        Ok(t) => t.normalized(),
        Err(e) => {
            tracing::warn!(error = %e, "triage unavailable");
            FailureTriage::unknown(format!("triage unavailable: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use smith_core::parse_checklist;
    use smith_oracle::{Purpose, ScriptedOracle};

    fn spec() -> ChecklistSpec {
        parse_checklist(
            "Input type: tabular\nOutput type: continuous\nTraining type: supervised\n\
             Split strategy: random\nMetric: rmse\nData path: data.csv\n",
        )
        .unwrap()
    }

    #[test]
    fn missing_module_is_always_model_side() {
        let oracle = ScriptedOracle::new();
        oracle.push_json(Purpose::Triage, json!({"culprit": "TEST", "confidence": 0.99, "rationale": "import in test.py"}));
        let out = "  File \"test.py\", line 3, in <module>\n    import xgboost\nModuleNotFoundError: No module named 'xgboost'\n";
        let t = classify(&oracle, &spec(), "m", "t", out);
        assert_eq!(t.culprit, Culprit::Model);
        assert_eq!(t.confidence, 1.0);
        assert!(t.rationale.contains("xgboost"));
        assert!(oracle.calls_for(Purpose::Triage).is_empty());
    }

    #[test]
    fn oracle_verdict_is_normalized() {
        let oracle = ScriptedOracle::new();
        oracle.push_json(Purpose::Triage, json!({"culprit": "TEST", "confidence": 3.0, "rationale": "bad split"}));
        let t = classify(&oracle, &spec(), "m", "t", "KeyError: 'target'");
        assert_eq!(t.culprit, Culprit::Test);
        assert_eq!(t.confidence, 1.0);
    }

    #[test]
    fn oracle_failure_is_unknown() {
        let oracle = ScriptedOracle::new();
        let t = classify(&oracle, &spec(), "m", "t", "ValueError: shapes (3,) and (4,) not aligned");
        assert_eq!(t.culprit, Culprit::Unknown);
        assert!(!t.blames_test(0.55));
    }
}
