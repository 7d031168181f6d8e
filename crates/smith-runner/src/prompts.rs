//! Prompt and schema catalogue for every oracle call the pipeline makes.

use serde_json::{json, Value};
use smith_core::{ChecklistSpec, ConcreteModelChoice, ModelFamily, StageKind, METRICS_FILE, METRICS_MARKER};
use smith_oracle::{OutputSchema, Prompt, Purpose};

/// Contract every generated model file must satisfy.
pub const API_CONTRACT: &str = "\
The model file `model.py` MUST define:
- `build_model(config=None)`: factory returning an unfitted model wrapper.
- A wrapper class exposing `fit(X, y=None) -> self` and `predict(X)`.
- Optionally `save(path)` on instances and a classmethod `load(path)`.
Scripts import it with `from model import build_model`. Nothing else in the
module may be relied upon.";

const FEEDBACK_CHARS: usize = 6000;

/// Last `max_chars` characters of `text`, cut on a char boundary.
pub fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let skipped: String = text.chars().skip(count - max_chars).collect();
    format!("[... {} earlier characters omitted ...]\n{}", count - max_chars, skipped)
}

fn task(spec: &ChecklistSpec) -> String {
    spec.render()
}

pub fn family_schema() -> OutputSchema {
    let names: Vec<&str> = ModelFamily::ALL.iter().map(|f| f.as_str()).collect();
    OutputSchema::new(
        "model_family",
        json!({
            "type": "object",
            "required": ["family", "rationale"],
            "properties": {
                "family": {"type": "string", "enum": names},
                "rationale": {"type": "string"}
            }
        }),
    )
}

pub fn concrete_schema() -> OutputSchema {
    OutputSchema::new(
        "concrete_models",
        json!({
            "type": "object",
            "required": ["choices"],
            "properties": {
                "choices": {
                    "type": "array",
                    "minItems": 3,
                    "maxItems": 3,
                    "items": {
                        "type": "object",
                        "required": ["library", "model_id"],
                        "properties": {
                            "library": {"type": "string"},
                            "model_id": {"type": "string"},
                            "extra_dependencies": {"type": "array", "items": {"type": "string"}},
                            "rationale": {"type": "string"}
                        }
                    }
                }
            }
        }),
    )
}

pub fn triage_schema() -> OutputSchema {
    OutputSchema::new(
        "failure_triage",
        json!({
            "type": "object",
            "required": ["culprit", "confidence", "rationale"],
            "properties": {
                "culprit": {"type": "string", "enum": ["TEST", "MODEL", "UNKNOWN"]},
                "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                "rationale": {"type": "string"}
            }
        }),
    )
}

pub fn dependency_schema() -> OutputSchema {
    OutputSchema::new(
        "dependency_plan",
        json!({
            "type": "object",
            "required": ["packages"],
            "properties": {
                "packages": {"type": "array", "items": {"type": "string"}, "maxItems": 15},
                "rationale": {"type": "string"}
            }
        }),
    )
}

pub fn model_family(spec: &ChecklistSpec) -> Prompt {
    let families: Vec<&str> = ModelFamily::ALL.iter().map(|f| f.as_str()).collect();
    Prompt::new(
        Purpose::ModelFamily,
        "You are an ML engineer. Pick the single model family best suited to the task.",
    )
    .section("Task", task(spec))
    .section("Allowed families", families.join("\n"))
}

pub fn concrete_models(spec: &ChecklistSpec, family: ModelFamily) -> Prompt {
    Prompt::new(
        Purpose::ConcreteModels,
        "You are an ML engineer. Propose exactly three distinct concrete implementations \
         (library plus model identifier) within the chosen family. List any pip packages \
         each one needs beyond numpy, pandas and scikit-learn in `extra_dependencies`.",
    )
    .section("Task", task(spec))
    .section("Family", family.as_str())
}

pub fn test_script(spec: &ChecklistSpec, choice: &ConcreteModelChoice) -> Prompt {
    Prompt::new(
        Purpose::TestScript,
        format!(
            "Write a self-contained Python validation script `test.py`. It loads the data, \
             splits it according to the split strategy, builds the model through the API \
             contract, fits it, evaluates the task metric on the held-out split, writes \
             {{\"metric\", \"value\", \"n_train\", \"n_test\"}} to `{METRICS_FILE}` and prints \
             one line `{METRICS_MARKER}<same JSON>`. Exit non-zero on any failure. \
             Reply with the code only."
        ),
    )
    .section("Task", task(spec))
    .section("API contract", API_CONTRACT)
    .section("Candidate", format!("{} / {}", choice.library, choice.model_id))
}

pub fn test_fix(spec: &ChecklistSpec, test_code: &str, model_code: &str, output: &str, rationale: &str) -> Prompt {
    Prompt::new(
        Purpose::TestFix,
        "The validation script below is faulty. Rewrite `test.py` so it validates the model \
         through the API contract correctly. Do not work around defects in the model itself. \
         Reply with the code only.",
    )
    .section("Task", task(spec))
    .section("API contract", API_CONTRACT)
    .section("Current test.py", test_code)
    .section("model.py", model_code)
    .section("Last run output", tail(output, FEEDBACK_CHARS))
    .optional_section("Diagnosis", Some(rationale))
}

pub fn model_code(
    spec: &ChecklistSpec,
    choice: &ConcreteModelChoice,
    test_code: &str,
    previous: Option<&str>,
    last_error: Option<&str>,
) -> Prompt {
    Prompt::new(
        Purpose::ModelCode,
        "Write `model.py` implementing the requested model under the API contract. \
         Reply with the code only.",
    )
    .section("Task", task(spec))
    .section("API contract", API_CONTRACT)
    .section(
        "Candidate",
        format!("library: {}\nmodel: {}\nnotes: {}", choice.library, choice.model_id, choice.rationale),
    )
    .section("Validation script", test_code)
    .optional_section("Previous model.py", previous)
    .optional_section("Last error", last_error.map(|e| tail(e, FEEDBACK_CHARS)).as_deref())
}

pub fn triage(spec: &ChecklistSpec, model_code: &str, test_code: &str, output: &str) -> Prompt {
    Prompt::new(
        Purpose::Triage,
        "Decide which file caused the failing run. Answer TEST when the traceback is rooted \
         in the validation script's own logic. Answer MODEL when it is rooted in the model \
         implementation, in a shape mismatch, a missing capability or an API contract \
         violation. A missing dependency is always MODEL. Use UNKNOWN only when the output \
         gives no evidence either way.",
    )
    .section("Task", task(spec))
    .section("API contract", API_CONTRACT)
    .section("model.py", model_code)
    .section("test.py", test_code)
    .section("Combined output", tail(output, FEEDBACK_CHARS))
}

pub fn dependencies(model_code: &str, test_code: &str, output: &str) -> Prompt {
    Prompt::new(
        Purpose::Dependencies,
        "List the minimal set of pip-installable packages missing from the environment, \
         judged from the code and the run output. Never list standard-library modules. \
         Return an empty list when nothing is missing.",
    )
    .section("model.py", model_code)
    .section("test.py", test_code)
    .section("Combined output", tail(output, FEEDBACK_CHARS))
}

fn stage_brief(stage: StageKind) -> &'static str {
    match stage {
        StageKind::Tune => {
            "Write `tune.py`: search hyperparameters for the model on the training split, \
             passing candidate configs to `build_model(config)`. Save the best config to \
             `best_params.json`."
        }
        StageKind::FinalTrain => {
            "Write `final_train.py`: build the model with the config in `best_params.json` \
             (fall back to defaults when the file is missing), fit on all available data and \
             persist it with `save(\"trained_model.pkl\")` when supported."
        }
        StageKind::Predict => {
            "Write `predict.py`: load the trained model (or refit when loading is not \
             supported), predict on the evaluation split and save them to `predictions.csv`."
        }
        StageKind::Explain => {
            "Write `explain.py`: explain the trained model's behaviour (feature importances, \
             coefficients or permutation importance), tolerating a missing predictions file."
        }
    }
}

pub fn stage_script(
    stage: StageKind,
    spec: &ChecklistSpec,
    model_code: &str,
    test_code: &str,
    prior: &[(StageKind, Value)],
    last_error: Option<&str>,
) -> Prompt {
    let prior_text = prior
        .iter()
        .map(|(s, v)| format!("{}: {}", s.as_str(), v))
        .collect::<Vec<_>>()
        .join("\n");
    Prompt::new(
        Purpose::Stage(stage),
        format!(
            "{} The script runs next to `model.py` and `test.py`. Print exactly one line \
             `{}<single-line JSON>` summarising the result. Exit non-zero on failure. \
             Reply with the code only.",
            stage_brief(stage),
            stage.marker()
        ),
    )
    .section("Task", task(spec))
    .section("API contract", API_CONTRACT)
    .section("model.py", model_code)
    .section("test.py", test_code)
    .optional_section("Earlier stage results", Some(prior_text.as_str()))
    .optional_section("Last error", last_error.map(|e| tail(e, FEEDBACK_CHARS)).as_deref())
}

pub fn report(spec: &ChecklistSpec, facts: &str) -> Prompt {
    Prompt::new(
        Purpose::Report,
        "Write a concise Markdown report of this modelling run for a technical reader: \
         task, chosen model, validation metric, tuned parameters, prediction outcome and \
         explanation highlights. Use only the facts given.",
    )
    .section("Task", task(spec))
    .section("Facts", facts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smith_core::parse_checklist;

    fn spec() -> ChecklistSpec {
        parse_checklist(
            "Input type: tabular\nOutput type: binary\nTraining type: supervised\n\
             Split strategy: stratified\nMetric: f1\nData path: data.csv\n",
        )
        .unwrap()
    }

    #[test]
    fn tail_keeps_the_end() {
        assert_eq!(tail("abc", 10), "abc");
        let t = tail("0123456789", 3);
        assert!(t.ends_with("\n789"));
        assert!(t.contains("7 earlier characters"));
    }

    #[test]
    fn first_model_prompt_has_no_feedback_sections() {
        let choice = ConcreteModelChoice {
            library: "sklearn".into(),
            model_id: "LogisticRegression".into(),
            extra_dependencies: vec![],
            rationale: String::new(),
        };
        let p = model_code(&spec(), &choice, "import model", None, None);
        assert!(p.section_body("Previous model.py").is_none());
        assert!(p.section_body("Last error").is_none());
        let p = model_code(&spec(), &choice, "import model", Some("old"), Some("Traceback"));
        assert_eq!(p.section_body("Last error"), Some("Traceback"));
    }

    #[test]
    fn family_schema_lists_every_family() {
        let s = family_schema();
        let allowed = s.schema["properties"]["family"]["enum"].as_array().unwrap();
        assert_eq!(allowed.len(), ModelFamily::ALL.len());
    }

    #[test]
    fn stage_prompt_names_its_marker() {
        let p = stage_script(StageKind::Predict, &spec(), "m", "t", &[], None);
        assert!(p.system.contains("__PREDICT_RESULT__"));
        assert_eq!(p.purpose, Purpose::Stage(StageKind::Predict));
    }
}
