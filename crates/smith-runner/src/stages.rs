use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::Value;
use smith_artifacts::{write_text, DiffLog, RunDir, RunManifest, SelectionRecord, StageRecord};
use smith_core::{extract_marker, ChecklistSpec, MarkerLine, PipelineError, StageKind, StageResult};

use crate::candidate::failure_feedback;
use crate::context::Services;
use crate::deps::{InstalledSet, Resolution};
use crate::prompts;

/// What the staged pipeline produced.
#[derive(Clone, Debug, PartialEq)]
pub struct StagesOutcome {
    pub results: Vec<(StageKind, StageResult)>,
    /// Set when the pipeline stopped before the report.
    pub aborted: Option<PipelineError>,
    pub report: Option<PathBuf>,
}

impl StagesOutcome {
    pub fn result(&self, stage: StageKind) -> Option<&StageResult> {
        self.results.iter().find(|(s, _)| *s == stage).map(|(_, r)| r)
    }
}

/// Tune, final-train, predict and explain on the promoted candidate, then the report.
///
/// Every stage is guarded by a re-run of the promoted validation script. A
/// stage is regenerated from scratch on each failed attempt. Only a failed
/// prediction lets the pipeline continue.
pub struct StagePipeline<'a> {
    svc: Services<'a>,
    run: &'a RunDir,
    spec: &'a ChecklistSpec,
}

impl<'a> StagePipeline<'a> {
    pub fn new(svc: Services<'a>, run: &'a RunDir, spec: &'a ChecklistSpec) -> Self {
        Self { svc, run, spec }
    }

    pub fn run(&self, installed: &mut InstalledSet, manifest: &mut RunManifest) -> Result<StagesOutcome> {
        let model_path = self.run.path.join(self.svc.model_file());
        let test_path = self.run.path.join(self.svc.test_file());
        let model_code = std::fs::read_to_string(&model_path)
            .with_context(|| format!("read promoted model {}", model_path.display()))?;
        let test_code = std::fs::read_to_string(&test_path)
            .with_context(|| format!("read promoted validation script {}", test_path.display()))?;

        let mut prior: Vec<(StageKind, Value)> = vec![];
        let mut results = vec![];

        for stage in StageKind::ORDER {
            if self.svc.cfg.stages.sanity_gate && !self.sanity_gate(stage)? {
                let err = PipelineError::SanityGateFailure { stage: stage.to_string() };
                tracing::error!(%stage, "sanity gate failed; staged pipeline aborted");
                self.run.append_worklog(&format!("{stage}: sanity gate failed, staged pipeline aborted"))?;
                manifest.record_stage(StageRecord {
                    stage,
                    status: "aborted".to_string(),
                    artifacts: vec![],
                    reason: Some(err.to_string()),
                });
                manifest.failure = Some(err.to_string());
                self.run.write_manifest(manifest)?;
                return Ok(StagesOutcome { results, aborted: Some(err), report: None });
            }

            let result = self.run_stage(stage, &model_code, &test_code, &prior, installed)?;
            self.record(stage, &result, manifest)?;
            if let Some(v) = result.parsed_json() {
                prior.push((stage, v.clone()));
            }
            let failed = !result.is_success();
            results.push((stage, result));

            if failed && stage.tolerates_failure() {
                tracing::warn!(%stage, "stage failed; continuing without its result");
            } else if failed {
                let err = PipelineError::BudgetExhausted {
                    scope: format!("{stage} stage"),
                    budget: self.svc.cfg.budgets.max_stage_retries,
                };
                manifest.failure = Some(err.to_string());
                self.run.write_manifest(manifest)?;
                return Ok(StagesOutcome { results, aborted: Some(err), report: None });
            }
        }

        let report = self.write_report(&results)?;
        self.run.append_worklog("report written")?;
        Ok(StagesOutcome { results, aborted: None, report: Some(report) })
    }

    /// The promoted validation script must still pass before `stage` runs.
    fn sanity_gate(&self, stage: StageKind) -> Result<bool> {
        let test_file = self.svc.test_file();
        match self.svc.runtime.run_script(&self.run.path, &test_file, self.svc.cfg.runtime.script_timeout()) {
            Ok(out) if out.success() => {
                tracing::debug!(%stage, "sanity gate passed");
                Ok(true)
            }
            Ok(out) => {
                write_text(&self.run.path.join(format!("sanity_{}.log", stage.as_str())), &out.output)?;
                tracing::warn!(%stage, exit_code = out.exit_code, "sanity gate run failed");
                Ok(false)
            }
            Err(e) => {
                tracing::warn!(%stage, error = ?e, "sanity gate could not run");
                Ok(false)
            }
        }
    }

    fn run_stage(
        &self,
        stage: StageKind,
        model_code: &str,
        test_code: &str,
        prior: &[(StageKind, Value)],
        installed: &mut InstalledSet,
    ) -> Result<StageResult> {
        let budget = self.svc.cfg.budgets.max_stage_retries;
        let timeout = self.svc.cfg.runtime.script_timeout();
        let file = format!("{}.{}", stage.as_str(), self.svc.runtime.script_ext());
        let work_dir = self.run.path.clone();
        let diffs = DiffLog::in_dir(&work_dir, self.svc.cfg.budgets.diff_preview_lines);

        let mut previous: Option<String> = None;
        let mut last_error: Option<String> = None;
        let mut last_output = String::new();

        for attempt in 1..=budget {
            let prompt = prompts::stage_script(stage, self.spec, model_code, test_code, prior, last_error.as_deref());
            let code = match self.svc.oracle.generate_code(&prompt) {
                Ok(code) => code,
                Err(e) => {
                    tracing::warn!(%stage, attempt, error = %e, "stage script generation failed");
                    last_output = format!("{stage} script generation failed: {e}");
                    last_error = Some(last_output.clone());
                    continue;
                }
            };
            write_text(&work_dir.join(&file), &code)?;
            diffs.append(&file, attempt, previous.as_deref().unwrap_or(""), &code)?;
            previous = Some(code.clone());

            let mut out = match self.svc.runtime.run_script(&work_dir, &file, timeout) {
                Ok(out) => out,
                Err(e) => {
                    return Ok(StageResult::Failed {
                        reason: format!("runtime could not start: {e}"),
                        work_dir,
                        generated_code: Some(code),
                        last_output: format!("{e:#}"),
                    })
                }
            };
            let mut install_note = None;
            if !out.success() {
                match self.svc.resolver().resolve(installed, model_code, &code, &out.output) {
                    Resolution::Installed(packages) => {
                        tracing::info!(%stage, ?packages, "re-running after install");
                        match self.svc.runtime.run_script(&work_dir, &file, timeout) {
                            Ok(rerun) => out = rerun,
                            Err(e) => install_note = Some(format!("re-run could not start: {e}")),
                        }
                    }
                    Resolution::InstallFailed(e) => install_note = Some(e.to_string()),
                    Resolution::NothingToInstall => {}
                }
            }
            write_text(&work_dir.join(format!("{}.log", stage.as_str())), &out.output)?;

            if out.success() {
                match extract_marker(&out.stdout, stage.marker()) {
                    MarkerLine::Json(v) => {
                        self.run.write_stage_result(stage, &v)?;
                        tracing::info!(%stage, attempt, "stage succeeded");
                        return Ok(StageResult::Success { work_dir, generated_code: code, stdout: out.stdout, parsed_json: Some(v) });
                    }
                    MarkerLine::Absent => {
                        tracing::info!(%stage, attempt, "stage succeeded without a structured result");
                        return Ok(StageResult::Success { work_dir, generated_code: code, stdout: out.stdout, parsed_json: None });
                    }
                    MarkerLine::Malformed { line, error } => {
                        tracing::warn!(%stage, attempt, %error, "malformed result line");
                        last_error = Some(format!("the {} line is not valid JSON ({error}): {line}", stage.marker()));
                        last_output = out.output;
                        continue;
                    }
                }
            }

            tracing::warn!(%stage, attempt, exit_code = out.exit_code, "stage run failed");
            last_error = Some(failure_feedback(&file, &out, install_note.as_deref()));
            last_output = out.output;
        }

        let exhausted = PipelineError::BudgetExhausted { scope: format!("{stage} stage"), budget };
        Ok(StageResult::Failed { reason: exhausted.to_string(), work_dir, generated_code: previous, last_output })
    }

    fn record(&self, stage: StageKind, result: &StageResult, manifest: &mut RunManifest) -> Result<()> {
        let (status, reason) = match result {
            StageResult::Success { .. } => ("success", None),
            StageResult::Failed { reason, .. } => ("failed", Some(reason.clone())),
        };
        let mut artifacts = vec![format!("{}.{}", stage.as_str(), self.svc.runtime.script_ext())];
        if result.parsed_json().is_some() {
            artifacts.push(stage.result_file().to_string());
        }
        self.run.append_worklog(&format!("{stage}: {status}"))?;
        manifest.record_stage(StageRecord { stage, status: status.to_string(), artifacts, reason });
        self.run.write_manifest(manifest)
    }

    fn write_report(&self, results: &[(StageKind, StageResult)]) -> Result<PathBuf> {
        let selection = self.run.read_selection().ok();
        let facts = report_facts(selection.as_ref(), results);
        let markdown = match self.svc.oracle.generate_code(&prompts::report(self.spec, &facts)) {
            Ok(md) if !md.trim().is_empty() => md,
            Ok(_) => fallback_report(self.spec, &facts),
            Err(e) => {
                tracing::warn!(error = %e, "report generation failed; writing plain report");
                fallback_report(self.spec, &facts)
            }
        };
        self.run.write_report(&markdown)
    }
}

fn report_facts(selection: Option<&SelectionRecord>, results: &[(StageKind, StageResult)]) -> String {
    let mut s = String::new();
    if let Some(sel) = selection {
        let _ = writeln!(s, "- Model: {} / {} ({})", sel.library, sel.model_id, sel.family);
        match (&sel.metric, sel.value) {
            (Some(metric), Some(value)) => {
                let _ = writeln!(s, "- Validation {metric}: {value} ({})", sel.direction.as_str());
            }
            _ => {
                let _ = writeln!(s, "- Validation metric: not recorded");
            }
        }
    }
    for (stage, result) in results {
        match result {
            StageResult::Success { parsed_json: Some(v), .. } => {
                let _ = writeln!(s, "- {stage}: success, result {v}");
            }
            StageResult::Success { parsed_json: None, .. } => {
                let _ = writeln!(s, "- {stage}: success, no structured result");
            }
            StageResult::Failed { reason, .. } => {
                let _ = writeln!(s, "- {stage}: failed ({reason})");
            }
        }
    }
    for stage in StageKind::ORDER {
        if !results.iter().any(|(s, _)| *s == stage) {
            let _ = writeln!(s, "- {stage}: not run");
        }
    }
    s
}

/// Plain report used when the oracle cannot write one.
pub fn fallback_report(spec: &ChecklistSpec, facts: &str) -> String {
    format!("# Model report\n\n## Task\n\n```\n{}```\n\n## Results\n\n{}", spec.render(), facts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;
    use smith_core::{parse_checklist, RunId};
    use smith_artifacts::RunStore;
    use smith_oracle::{OracleError, Purpose, Scripted, ScriptedOracle};
    use smith_runtime::{ExecOutcome, ScriptedRuntime};
    use tempfile::tempdir;

    fn spec() -> ChecklistSpec {
        parse_checklist(
            "Input type: tabular\nOutput type: binary\nTraining type: supervised\n\
             Split strategy: stratified\nMetric: roc_auc\nData path: data.csv\n",
        )
        .unwrap()
    }

    fn promoted_run(dir: &std::path::Path) -> (RunDir, RunManifest) {
        let run = RunStore::new(dir.to_path_buf()).create_run(&RunId::from_str("r")).unwrap();
        write_text(&run.path.join("model.py"), "def build_model(config=None): ...\n").unwrap();
        write_text(&run.path.join("test.py"), "from model import build_model\n").unwrap();
        let manifest = RunManifest::new("r", "p");
        run.write_manifest(&manifest).unwrap();
        (run, manifest)
    }

    fn stage_oracle() -> ScriptedOracle {
        let o = ScriptedOracle::new();
        o.fallback(Purpose::Dependencies, Scripted::Json(json!({"packages": []})));
        for stage in StageKind::ORDER {
            o.fallback(Purpose::Stage(stage), Scripted::Text(format!("# {stage} script\n")));
        }
        o
    }

    fn marked(stage: StageKind, payload: &str) -> ExecOutcome {
        ExecOutcome::ok(format!("working...\n{}{payload}\n", stage.marker()))
    }

    #[test]
    fn all_stages_then_report() {
        let dir = tempdir().unwrap();
        let (run, mut manifest) = promoted_run(dir.path());
        let cfg = Config::default_for_project("p");
        let oracle = stage_oracle();
        oracle.push_code(Purpose::Report, "# Report\n");
        let runtime = ScriptedRuntime::new();
        runtime.set_default("test.py", ExecOutcome::ok("ok"));
        runtime.push_run("tune.py", marked(StageKind::Tune, r#"{"C": 0.5}"#));
        runtime.push_run("final_train.py", marked(StageKind::FinalTrain, r#"{"saved": "trained_model.pkl"}"#));
        runtime.push_run("predict.py", marked(StageKind::Predict, r#"{"rows": 120}"#));
        runtime.push_run("explain.py", ExecOutcome::ok("no marker here"));
        let spec = spec();

        let out = StagePipeline::new(Services::new(&oracle, &runtime, &cfg), &run, &spec)
            .run(&mut InstalledSet::new(), &mut manifest)
            .unwrap();
        assert!(out.aborted.is_none());
        assert_eq!(out.results.len(), 4);
        assert_eq!(runtime.runs_of("test.py"), 4);
        assert_eq!(run.read_stage_result(StageKind::Tune).unwrap().unwrap(), json!({"C": 0.5}));
        assert!(out.result(StageKind::Explain).unwrap().parsed_json().is_none());
        assert_eq!(std::fs::read_to_string(out.report.unwrap()).unwrap(), "# Report\n");
        let tune_prompt = &oracle.calls_for(Purpose::Stage(StageKind::FinalTrain))[0];
        assert!(tune_prompt.section_body("Earlier stage results").unwrap().contains("tune"));
        assert_eq!(run.read_manifest().unwrap().stages.len(), 4);
    }

    #[test]
    fn sanity_gate_failure_aborts_everything() {
        let dir = tempdir().unwrap();
        let (run, mut manifest) = promoted_run(dir.path());
        let cfg = Config::default_for_project("p");
        let oracle = stage_oracle();
        let runtime = ScriptedRuntime::new();
        runtime.push_run("test.py", ExecOutcome::ok("ok"));
        runtime.push_run("tune.py", marked(StageKind::Tune, "{}"));
        runtime.push_run("test.py", ExecOutcome::failed(1, "AssertionError"));
        let spec = spec();

        let out = StagePipeline::new(Services::new(&oracle, &runtime, &cfg), &run, &spec)
            .run(&mut InstalledSet::new(), &mut manifest)
            .unwrap();
        assert_eq!(out.aborted, Some(PipelineError::SanityGateFailure { stage: "final_train".into() }));
        assert_eq!(out.results.len(), 1);
        assert!(out.report.is_none());
        assert_eq!(runtime.runs_of("final_train.py"), 0);
    }

    #[test]
    fn failed_prediction_is_tolerated() {
        let dir = tempdir().unwrap();
        let (run, mut manifest) = promoted_run(dir.path());
        let mut cfg = Config::default_for_project("p");
        cfg.budgets.max_stage_retries = 2;
        let oracle = stage_oracle();
        oracle.fallback(Purpose::Report, Scripted::Fail(OracleError::Empty));
        let runtime = ScriptedRuntime::new();
        runtime.set_default("test.py", ExecOutcome::ok("ok"));
        runtime.push_run("tune.py", marked(StageKind::Tune, "{}"));
        runtime.push_run("final_train.py", marked(StageKind::FinalTrain, "{}"));
        runtime.set_default("predict.py", ExecOutcome::failed(1, "FileNotFoundError: trained_model.pkl"));
        runtime.push_run("explain.py", marked(StageKind::Explain, r#"{"top": ["age"]}"#));
        let spec = spec();

        let out = StagePipeline::new(Services::new(&oracle, &runtime, &cfg), &run, &spec)
            .run(&mut InstalledSet::new(), &mut manifest)
            .unwrap();
        assert!(out.aborted.is_none());
        assert!(!out.result(StageKind::Predict).unwrap().is_success());
        assert_eq!(runtime.runs_of("predict.py"), 2);
        assert!(out.result(StageKind::Explain).unwrap().is_success());
        let report = std::fs::read_to_string(out.report.unwrap()).unwrap();
        assert!(report.starts_with("# Model report"));
        assert!(report.contains("predict: failed"));
        let prompt = &oracle.calls_for(Purpose::Stage(StageKind::Predict))[1];
        let last_error = prompt.section_body("Last error").unwrap();
        assert!(last_error.starts_with("script predict.py exited with code 1"));
        assert!(last_error.contains("trained_model.pkl"));
    }

    #[test]
    fn failed_tuning_stops_the_pipeline() {
        let dir = tempdir().unwrap();
        let (run, mut manifest) = promoted_run(dir.path());
        let mut cfg = Config::default_for_project("p");
        cfg.budgets.max_stage_retries = 3;
        let oracle = stage_oracle();
        let runtime = ScriptedRuntime::new();
        runtime.set_default("test.py", ExecOutcome::ok("ok"));
        runtime.set_default("tune.py", ExecOutcome::failed(1, "MemoryError"));
        let spec = spec();

        let out = StagePipeline::new(Services::new(&oracle, &runtime, &cfg), &run, &spec)
            .run(&mut InstalledSet::new(), &mut manifest)
            .unwrap();
        assert!(matches!(out.aborted, Some(PipelineError::BudgetExhausted { budget: 3, .. })));
        assert_eq!(runtime.runs_of("tune.py"), 3);
        assert_eq!(runtime.runs_of("final_train.py"), 0);
        assert!(manifest.failure.is_some());
    }

    #[test]
    fn malformed_marker_is_retried() {
        let dir = tempdir().unwrap();
        let (run, mut manifest) = promoted_run(dir.path());
        let mut cfg = Config::default_for_project("p");
        cfg.stages.sanity_gate = false;
        let oracle = stage_oracle();
        let runtime = ScriptedRuntime::new();
        runtime.push_run("tune.py", marked(StageKind::Tune, "{broken"));
        runtime.push_run("tune.py", marked(StageKind::Tune, r#"{"C": 2}"#));
        runtime.push_run("final_train.py", marked(StageKind::FinalTrain, "{}"));
        runtime.push_run("predict.py", marked(StageKind::Predict, "{}"));
        runtime.push_run("explain.py", marked(StageKind::Explain, "{}"));
        let spec = spec();

        let out = StagePipeline::new(Services::new(&oracle, &runtime, &cfg), &run, &spec)
            .run(&mut InstalledSet::new(), &mut manifest)
            .unwrap();
        assert!(out.aborted.is_none());
        assert_eq!(out.result(StageKind::Tune).unwrap().parsed_json(), Some(&json!({"C": 2})));
        assert_eq!(runtime.runs_of("test.py"), 0);
    }
}
