use serde::{Deserialize, Serialize};

closed_enum! {
    /// Fixed list of model families offered to the oracle.
    ModelFamily, "Model family" {
        LinearModels => "linear_models" | "linear" | "glm",
        TreeEnsembles => "tree_ensembles" | "random forest" | "bagging",
        GradientBoosting => "gradient_boosting" | "boosting" | "gbdt",
        KernelMethods => "kernel_methods" | "svm" | "gaussian process",
        NearestNeighbors => "nearest_neighbors" | "knn",
        NeuralNetworks => "neural_networks" | "mlp" | "deep learning",
        PretrainedTransformers => "pretrained_transformers" | "transformers",
        ClassicalForecasting => "classical_forecasting" | "arima" | "exponential smoothing",
    }
}

/// Oracle's single family choice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFamilyPick {
    pub family: ModelFamily,
    pub rationale: String,
}

/// Identity of one candidate implementation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcreteModelChoice {
    pub library: String,
    pub model_id: String,
    #[serde(default)]
    pub extra_dependencies: Vec<String>,
    #[serde(default)]
    pub rationale: String,
}

impl ConcreteModelChoice {
    /// Key used for the uniqueness check across one run's choices.
    pub fn identity(&self) -> (String, String) {
        (
            self.library.trim().to_lowercase(),
            self.model_id.trim().to_lowercase(),
        )
    }

    /// Directory name for the candidate at `index`; stable for a given choice.
    pub fn work_dir_name(&self, index: usize) -> String {
        format!("{:02}-{}-{}", index, slug(&self.library), slug(&self.model_id))
    }
}

/// Lowercase, `[a-z0-9-]` only, at most 40 chars.
pub fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed: String = out.trim_matches('-').chars().take(40).collect();
    let trimmed = trimmed.trim_end_matches('-').to_string();
    if trimmed.is_empty() {
        "x".to_string()
    } else {
        trimmed
    }
}

/// Packages the oracle believes are missing from the runtime.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyPlan {
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub rationale: String,
}

impl DependencyPlan {
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Culprit {
    Test,
    Model,
    Unknown,
}

/// Verdict on one failing execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureTriage {
    pub culprit: Culprit,
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
}

impl FailureTriage {
    pub fn unknown(rationale: impl Into<String>) -> Self {
        Self { culprit: Culprit::Unknown, confidence: 0.0, rationale: rationale.into() }
    }

    /// Confidence clamped into `[0, 1]`; NaN becomes 0.
    pub fn normalized(mut self) -> Self {
        self.confidence = if self.confidence.is_nan() { 0.0 } else { self.confidence.clamp(0.0, 1.0) };
        self
    }

    pub fn blames_test(&self, threshold: f64) -> bool {
        self.culprit == Culprit::Test && self.confidence >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choice(lib: &str, model: &str) -> ConcreteModelChoice {
        ConcreteModelChoice {
            library: lib.into(),
            model_id: model.into(),
            extra_dependencies: vec![],
            rationale: String::new(),
        }
    }

    #[test]
    fn work_dir_is_derived_from_index_and_identity() {
        let c = choice("scikit-learn", "RandomForestClassifier");
        assert_eq!(c.work_dir_name(1), "01-scikit-learn-randomforestclassifier");
        assert_eq!(c.work_dir_name(1), c.work_dir_name(1));
        assert_ne!(c.work_dir_name(1), c.work_dir_name(2));
    }

    #[test]
    fn slug_collapses_separators() {
        assert_eq!(slug("  XGBoost / XGBClassifier "), "xgboost-xgbclassifier");
        assert_eq!(slug("///"), "x");
    }

    #[test]
    fn identity_ignores_case_and_padding() {
        assert_eq!(choice("sklearn ", "SVC").identity(), choice("SKLEARN", " svc").identity());
    }

    #[test]
    fn triage_threshold_and_clamp() {
        let t = FailureTriage { culprit: Culprit::Test, confidence: 1.7, rationale: String::new() }.normalized();
        assert_eq!(t.confidence, 1.0);
        assert!(t.blames_test(0.55));
        let t = FailureTriage { culprit: Culprit::Test, confidence: 0.5, rationale: String::new() };
        assert!(!t.blames_test(0.55));
        let t = FailureTriage { culprit: Culprit::Model, confidence: 0.99, rationale: String::new() };
        assert!(!t.blames_test(0.55));
    }

    #[test]
    fn culprit_uses_uppercase_wire_names() {
        let t: FailureTriage = serde_json::from_str(r#"{"culprit":"TEST","confidence":0.8}"#).unwrap();
        assert_eq!(t.culprit, Culprit::Test);
        assert_eq!(ModelFamily::parse("GBDT").unwrap(), ModelFamily::GradientBoosting);
    }
}
