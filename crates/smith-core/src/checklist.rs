use serde::{Deserialize, Serialize};

use crate::error::SpecParseError;

closed_enum! {
    InputType, "Input type" {
        Tabular => "tabular" | "table" | "csv",
        Text => "text" | "nlp",
        Image => "image" | "images" | "vision",
        TimeSeries => "time series" | "timeseries" | "temporal",
        Audio => "audio" | "sound",
    }
}

closed_enum! {
    OutputType, "Output type" {
        BinaryClass => "binary class" | "binary" | "binary classification",
        MultiClass => "multi class" | "multiclass" | "multiclass classification" | "categorical",
        MultiLabel => "multi label" | "multilabel",
        Continuous => "continuous" | "regression" | "numeric",
        Forecast => "forecast" | "forecasting",
    }
}

closed_enum! {
    TrainingType, "Training type" {
        Supervised => "supervised",
        Unsupervised => "unsupervised",
        FineTune => "fine tune" | "finetune" | "fine tuning" | "transfer learning",
    }
}

closed_enum! {
    SplitStrategy, "Split strategy" {
        Random => "random" | "holdout" | "train test split",
        Stratified => "stratified",
        TimeOrdered => "time ordered" | "temporal" | "chronological",
        KFold => "k fold" | "kfold" | "cross validation",
        GroupKFold => "group k fold" | "group kfold" | "grouped",
    }
}

closed_enum! {
    Metric, "Metric" {
        Accuracy => "accuracy",
        F1 => "f1" | "f1 score",
        Precision => "precision",
        Recall => "recall",
        RocAuc => "roc_auc" | "auc" | "roc auc",
        LogLoss => "log_loss" | "logloss" | "cross entropy",
        Mse => "mse" | "mean squared error",
        Rmse => "rmse" | "root mean squared error",
        Mae => "mae" | "mean absolute error",
        R2 => "r2" | "r squared",
    }
}

/// Typed task description derived once per pipeline run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistSpec {
    pub input_type: InputType,
    pub output_type: OutputType,
    pub training_type: TrainingType,
    pub split_strategy: SplitStrategy,
    pub metric: Metric,
    pub data_path: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Field {
    Input,
    Output,
    Training,
    Split,
    Metric,
    DataPath,
}

const LABELS: &[(&str, Field)] = &[
    ("input type", Field::Input),
    ("input", Field::Input),
    ("output type", Field::Output),
    ("output", Field::Output),
    ("training type", Field::Training),
    ("training", Field::Training),
    ("split strategy", Field::Split),
    ("split", Field::Split),
    ("data split", Field::Split),
    ("metric", Field::Metric),
    ("evaluation metric", Field::Metric),
    ("data path", Field::DataPath),
    ("data location", Field::DataPath),
    ("dataset path", Field::DataPath),
];

fn field_for_label(label: &str) -> Option<Field> {
    let key = crate::closed_enum::normalize_key(label);
    LABELS.iter().find(|(l, _)| *l == key).map(|(_, f)| *f)
}

/// Drop a trailing `(...)` group, e.g. the `(Confirmed)` status suffix.
fn strip_status(value: &str) -> &str {
    let v = value.trim();
    if !v.ends_with(')') {
        return v;
    }
    match v.rfind('(') {
        Some(open) => v[..open].trim_end(),
        None => v,
    }
}

/// Enum-valued fields may carry a free-text gloss: `Tabular (CSV files)`.
fn enum_head(value: &str) -> &str {
    match value.find('(') {
        Some(open) => value[..open].trim(),
        None => value.trim(),
    }
}

/// Parse a checklist snapshot (`Label: value (Status)` per line).
///
/// Unknown labels are ignored; the first occurrence of a label wins. Any
/// missing or empty required field is an error.
pub fn parse_checklist(snapshot: &str) -> Result<ChecklistSpec, SpecParseError> {
    let mut input = None;
    let mut output = None;
    let mut training = None;
    let mut split = None;
    let mut metric = None;
    let mut data_path: Option<String> = None;

    for raw in snapshot.lines() {
        let line = raw.trim().trim_start_matches(['-', '*', '•']).trim();
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let Some(field) = field_for_label(label) else {
            continue;
        };
        let value = strip_status(value);
        if value.is_empty() {
            continue;
        }
        match field {
            Field::Input if input.is_none() => input = Some(InputType::parse(enum_head(value))?),
            Field::Output if output.is_none() => output = Some(OutputType::parse(enum_head(value))?),
            Field::Training if training.is_none() => {
                training = Some(TrainingType::parse(enum_head(value))?)
            }
            Field::Split if split.is_none() => split = Some(SplitStrategy::parse(enum_head(value))?),
            Field::Metric if metric.is_none() => metric = Some(Metric::parse(enum_head(value))?),
            Field::DataPath if data_path.is_none() => data_path = Some(value.to_string()),
            _ => {}
        }
    }

    Ok(ChecklistSpec {
        input_type: input.ok_or(SpecParseError::MissingField(InputType::FIELD))?,
        output_type: output.ok_or(SpecParseError::MissingField(OutputType::FIELD))?,
        training_type: training.ok_or(SpecParseError::MissingField(TrainingType::FIELD))?,
        split_strategy: split.ok_or(SpecParseError::MissingField(SplitStrategy::FIELD))?,
        metric: metric.ok_or(SpecParseError::MissingField(Metric::FIELD))?,
        data_path: data_path.ok_or(SpecParseError::MissingField("Data path"))?,
    })
}

impl ChecklistSpec {
    /// Canonical one-field-per-line rendering, used in prompts and persisted
    /// next to promoted artifacts. Parses back to an equal spec.
    pub fn render(&self) -> String {
        format!(
            "Input type: {}\nOutput type: {}\nTraining type: {}\nSplit strategy: {}\nMetric: {}\nData path: {}\n",
            self.input_type,
            self.output_type,
            self.training_type,
            self.split_strategy,
            self.metric,
            self.data_path
        )
    }
}
