use std::path::Path;

use smith_core::*;

fn fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/checklists").join(name);
    std::fs::read_to_string(path).unwrap()
}

#[test]
fn churn_fixture_parses() {
    let spec = parse_checklist(&fixture("churn.txt")).unwrap();
    assert_eq!(spec.input_type, InputType::Tabular);
    assert_eq!(spec.output_type, OutputType::BinaryClass);
    assert_eq!(spec.metric, Metric::Accuracy);
    assert_eq!(spec.data_path, "data/churn.csv");
    assert_eq!(Direction::for_metric(spec.metric.as_str()), Direction::Maximize);
}

#[test]
fn forecast_fixture_is_minimized() {
    let spec = parse_checklist(&fixture("sales_forecast.txt")).unwrap();
    assert_eq!(spec.input_type, InputType::TimeSeries);
    assert_eq!(spec.split_strategy, SplitStrategy::TimeOrdered);
    assert_eq!(spec.data_path, "~/datasets/sales.parquet");
    assert_eq!(Direction::for_metric(spec.metric.as_str()), Direction::Minimize);
}

#[test]
fn parsing_is_deterministic() {
    let text = fixture("churn.txt");
    assert_eq!(parse_checklist(&text).unwrap(), parse_checklist(&text).unwrap());
}

#[test]
fn incomplete_fixtures_fail() {
    assert_eq!(
        parse_checklist(&fixture("missing_metric.txt")).unwrap_err(),
        SpecParseError::MissingField("Metric")
    );
    let err = parse_checklist(&fixture("bad_split.txt")).unwrap_err();
    assert!(err.to_string().contains("Shuffled halves"));
    assert!(err.to_string().contains("time ordered"));
}

#[test]
fn every_missing_field_is_reported() {
    let full = parse_checklist(&fixture("churn.txt")).unwrap().render();
    for (label, field) in [
        ("Input type", InputType::FIELD),
        ("Output type", OutputType::FIELD),
        ("Training type", TrainingType::FIELD),
        ("Split strategy", SplitStrategy::FIELD),
        ("Metric", Metric::FIELD),
        ("Data path", "Data path"),
    ] {
        let without: String = full.lines().filter(|l| !l.starts_with(label)).map(|l| format!("{l}\n")).collect();
        assert_eq!(parse_checklist(&without).unwrap_err(), SpecParseError::MissingField(field));
    }
}

#[test]
fn metric_recovery_prefers_the_artifact() {
    let artifact = r#"{"metric": "rmse", "value": 1.4, "n_train": 800, "n_test": 200}"#;
    let stdout = "__METRICS__{\"metric\": \"rmse\", \"value\": 9.9}\n";
    assert_eq!(MetricReport::recover(Some(artifact), stdout).unwrap().value, 1.4);
    assert_eq!(MetricReport::recover(None, stdout).unwrap().value, 9.9);
    assert_eq!(MetricReport::recover(Some("not json"), stdout).unwrap().value, 9.9);
    assert!(MetricReport::recover(None, "__METRICS__{\"metric\": \"rmse\", \"value\": null}").is_none());
    assert!(MetricReport::recover(None, "training done").is_none());
}

#[test]
fn selection_uses_recovered_metrics() {
    let a = MetricReport::recover(None, "__METRICS__{\"metric\":\"accuracy\",\"value\":0.80}");
    let b = MetricReport::recover(None, "__METRICS__{\"metric\":\"accuracy\",\"value\":0.92}");
    let scored = vec![
        ScoredCandidate { index: 1, metric: a },
        ScoredCandidate { index: 2, metric: b },
        ScoredCandidate { index: 3, metric: None },
    ];
    let s = select_winner(&scored, Direction::for_metric("accuracy")).unwrap();
    assert_eq!(s.index, 2);
    assert_eq!(s.metric.unwrap().value, 0.92);
}
