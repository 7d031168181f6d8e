use thiserror::Error;

/// Checklist could not be turned into a [`crate::ChecklistSpec`]. Fatal to the run.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SpecParseError {
    #[error("checklist is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid value `{value}` for `{field}`; allowed: {allowed}")]
    InvalidValue {
        field: &'static str,
        value: String,
        allowed: String,
    },
}

/// Failure taxonomy shared by the orchestration layers.
///
/// Only `SpecParse`, `SelectorContractViolation`, `SanityGateFailure` and
/// `NoUsableCandidate` ever terminate a whole run or staged pipeline; the
/// remaining variants describe per-candidate or per-stage failures and end up
/// as the `reason` of a `Failed` outcome.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    SpecParse(#[from] SpecParseError),

    #[error("selector contract violation: {0}")]
    SelectorContractViolation(String),

    #[error("oracle call failed during {purpose}: {message}")]
    Oracle { purpose: String, message: String },

    #[error("script {script} exited with code {exit_code}")]
    ExecutionFailure { script: String, exit_code: i32 },

    #[error("installing [{}] failed: {message}", .packages.join(", "))]
    DependencyInstallFailure { packages: Vec<String>, message: String },

    #[error("{scope} exhausted its budget of {budget} attempts")]
    BudgetExhausted { scope: String, budget: u32 },

    #[error("sanity gate before {stage} failed: the promoted validation script no longer passes")]
    SanityGateFailure { stage: String },

    #[error("no usable candidate: all {attempted} candidates failed")]
    NoUsableCandidate { attempted: usize },
}
