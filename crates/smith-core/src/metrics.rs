use serde::{Deserialize, Serialize};

use crate::marker::extract_marker;

/// Well-known file the validation script writes its metric to.
pub const METRICS_FILE: &str = "metrics.json";
/// Fallback stdout marker for the same payload.
pub const METRICS_MARKER: &str = "__METRICS__";

/// Metric produced by a candidate's validation run. Used only for ranking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub metric: String,
    pub value: f64,
    #[serde(default)]
    pub n_train: Option<u64>,
    #[serde(default)]
    pub n_test: Option<u64>,
    #[serde(default)]
    pub note: Option<String>,
}

impl MetricReport {
    /// Artifact file first, then the marked stdout line. Reports whose value
    /// is not finite are treated as unscored.
    pub fn recover(artifact: Option<&str>, stdout: &str) -> Option<MetricReport> {
        let from_file = artifact.and_then(|s| serde_json::from_str::<MetricReport>(s).ok());
        let report = from_file.or_else(|| {
            extract_marker(stdout, METRICS_MARKER)
                .json()
                .and_then(|v| serde_json::from_value::<MetricReport>(v).ok())
        })?;
        report.value.is_finite().then_some(report)
    }
}

/// Which way a metric improves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Minimize,
    Maximize,
}

const MINIMIZED_KEYWORDS: &[&str] = &["MSE", "RMSE", "MAE", "LOSS", "ERROR"];

impl Direction {
    /// Error/loss-like metric names are minimized; everything else is maximized.
    pub fn for_metric(name: &str) -> Direction {
        let upper = name.to_uppercase();
        if MINIMIZED_KEYWORDS.iter().any(|k| upper.contains(k)) {
            Direction::Minimize
        } else {
            Direction::Maximize
        }
    }

    /// True if `candidate` is strictly better than `incumbent`.
    pub fn improves(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Direction::Minimize => candidate < incumbent,
            Direction::Maximize => candidate > incumbent,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Minimize => "minimize",
            Direction::Maximize => "maximize",
        }
    }
}
