use std::path::Path;

use anyhow::{Context, Result};
use smith_artifacts::{read_text_if_exists, write_text, DiffLog};
use smith_core::{
    CandidateOutcome, CandidateResult, ChecklistSpec, ConcreteModelChoice, ModelFamily, PipelineError, METRICS_FILE,
};
use smith_runtime::ExecOutcome;

use crate::context::Services;
use crate::deps::{InstalledSet, Resolution};
use crate::{prompts, triage};

pub const LAST_RUN_LOG: &str = "last_run.log";

/// Result of one validation run, after its dependency pass.
enum Validation {
    Passed(ExecOutcome),
    Failed { outcome: ExecOutcome, install_error: Option<String> },
}

/// Drives one candidate from validation-script generation to a terminal outcome.
///
/// The model is regenerated at most `max_model_retries` times. Inside an
/// attempt, a failure the triage pins on the validation script with enough
/// confidence triggers a test-only rewrite, at most `max_test_fixes` times
/// for the whole candidate; that counter is never reset.
pub struct CandidateRunner<'a> {
    svc: Services<'a>,
    spec: &'a ChecklistSpec,
}

impl<'a> CandidateRunner<'a> {
    pub fn new(svc: Services<'a>, spec: &'a ChecklistSpec) -> Self {
        Self { svc, spec }
    }

    pub fn run(
        &self,
        index: usize,
        family: ModelFamily,
        choice: &ConcreteModelChoice,
        work_dir: &Path,
        installed: &mut InstalledSet,
    ) -> CandidateOutcome {
        tracing::info!(candidate = index, library = %choice.library, model = %choice.model_id, "candidate started");
        let result = match self.drive(index, choice, work_dir, installed) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(candidate = index, error = ?e, "candidate aborted");
                let last_model_code = read_text_if_exists(&work_dir.join(self.svc.model_file())).ok().flatten();
                CandidateResult::Failed {
                    reason: format!("candidate aborted: {e}"),
                    last_error: format!("{e:#}"),
                    last_model_code,
                }
            }
        };
        match &result {
            CandidateResult::Success { .. } => tracing::info!(candidate = index, "candidate succeeded"),
            CandidateResult::Failed { reason, .. } => tracing::warn!(candidate = index, %reason, "candidate failed"),
        }
        CandidateOutcome { index, work_dir: work_dir.to_path_buf(), family, concrete: choice.clone(), result }
    }

    fn drive(
        &self,
        index: usize,
        choice: &ConcreteModelChoice,
        work_dir: &Path,
        installed: &mut InstalledSet,
    ) -> Result<CandidateResult> {
        let budgets = &self.svc.cfg.budgets;
        let oracle = self.svc.oracle;
        let model_file = self.svc.model_file();
        let test_file = self.svc.test_file();
        let diffs = DiffLog::in_dir(work_dir, budgets.diff_preview_lines);

        let mut test_code = match oracle.generate_code(&prompts::test_script(self.spec, choice)) {
            Ok(code) => code,
            Err(e) => {
                return Ok(CandidateResult::Failed {
                    reason: "validation script generation failed".to_string(),
                    last_error: e.to_string(),
                    last_model_code: None,
                })
            }
        };
        write_text(&work_dir.join(&test_file), &test_code)?;
        diffs.append(&test_file, 0, "", &test_code)?;

        let mut feedback = match self.svc.resolver().ensure(installed, &choice.extra_dependencies) {
            Resolution::InstallFailed(e) => Some(e.to_string()),
            _ => None,
        };

        let mut test_fixes = 0;
        let mut previous_model: Option<String> = None;
        let mut last_error = feedback.clone().unwrap_or_default();

        for attempt in 1..=budgets.max_model_retries {
            let prompt =
                prompts::model_code(self.spec, choice, &test_code, previous_model.as_deref(), feedback.as_deref());
            let model_code = match oracle.generate_code(&prompt) {
                Ok(code) => code,
                Err(e) => {
                    tracing::warn!(candidate = index, attempt, error = %e, "model generation failed");
                    last_error = format!("model generation failed: {e}");
                    feedback = Some(last_error.clone());
                    continue;
                }
            };
            write_text(&work_dir.join(&model_file), &model_code)?;
            diffs.append(&model_file, attempt, previous_model.as_deref().unwrap_or(""), &model_code)?;

            let (outcome, install_error) = match self.validate(work_dir, &test_file, &model_code, &test_code, installed)? {
                Validation::Passed(outcome) => return Ok(success(model_code, test_code, outcome)),
                Validation::Failed { outcome, install_error } => (outcome, install_error),
            };
            tracing::info!(candidate = index, attempt, exit_code = outcome.exit_code, "validation failed");
            let mut error_text = failure_feedback(&test_file, &outcome, install_error.as_deref());

            // Once the test-fix budget is spent the verdict cannot change the next step.
            let verdict = if test_fixes < budgets.max_test_fixes {
                let verdict = triage::classify(oracle, self.spec, &model_code, &test_code, &outcome.output);
                tracing::info!(
                    candidate = index,
                    attempt,
                    culprit = ?verdict.culprit,
                    confidence = verdict.confidence,
                    "failure triaged"
                );
                Some(verdict)
            } else {
                None
            };

            if let Some(verdict) = verdict.filter(|v| v.blames_test(budgets.test_fault_threshold)) {
                test_fixes += 1;
                let prompt = prompts::test_fix(self.spec, &test_code, &model_code, &outcome.output, &verdict.rationale);
                match oracle.generate_code(&prompt) {
                    Ok(fixed) => {
                        write_text(&work_dir.join(&test_file), &fixed)?;
                        diffs.append(&format!("{test_file} (test fix {test_fixes})"), attempt, &test_code, &fixed)?;
                        test_code = fixed;
                        tracing::info!(candidate = index, attempt, test_fixes, "validation script rewritten");
                        match self.validate(work_dir, &test_file, &model_code, &test_code, installed)? {
                            Validation::Passed(outcome) => return Ok(success(model_code, test_code, outcome)),
                            Validation::Failed { outcome, install_error } => {
                                error_text = failure_feedback(&test_file, &outcome, install_error.as_deref());
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(candidate = index, attempt, error = %e, "validation script rewrite failed");
                    }
                }
            }

            last_error = error_text.clone();
            feedback = Some(error_text);
            previous_model = Some(model_code);
        }

        let exhausted = PipelineError::BudgetExhausted {
            scope: format!("candidate {index}"),
            budget: budgets.max_model_retries,
        };
        Ok(CandidateResult::Failed {
            reason: exhausted.to_string(),
            last_error,
            last_model_code: previous_model,
        })
    }

    /// Run the validation script; after a failure, one dependency pass and,
    /// if it installed anything, a single re-run.
    fn validate(
        &self,
        work_dir: &Path,
        test_file: &str,
        model_code: &str,
        test_code: &str,
        installed: &mut InstalledSet,
    ) -> Result<Validation> {
        let first = self.execute(work_dir, test_file)?;
        if first.success() {
            return Ok(Validation::Passed(first));
        }
        match self.svc.resolver().resolve(installed, model_code, test_code, &first.output) {
            Resolution::NothingToInstall => Ok(Validation::Failed { outcome: first, install_error: None }),
            Resolution::InstallFailed(e) => Ok(Validation::Failed { outcome: first, install_error: Some(e.to_string()) }),
            Resolution::Installed(packages) => {
                tracing::info!(?packages, "re-running after install");
                let second = self.execute(work_dir, test_file)?;
                if second.success() {
                    Ok(Validation::Passed(second))
                } else {
                    Ok(Validation::Failed { outcome: second, install_error: None })
                }
            }
        }
    }

    fn execute(&self, work_dir: &Path, file_name: &str) -> Result<ExecOutcome> {
        // A metrics file left by an earlier run must not be credited to this one.
        let stale = work_dir.join(METRICS_FILE);
        match std::fs::remove_file(&stale) {
            Ok(()) => tracing::debug!(path = %stale.display(), "removed previous metrics file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("remove {}", stale.display())),
        }
        let timeout = self.svc.cfg.runtime.script_timeout();
        let outcome = self.svc.runtime.run_script(work_dir, file_name, timeout)?;
        write_text(&work_dir.join(LAST_RUN_LOG), &outcome.output)?;
        tracing::debug!(file = file_name, exit_code = outcome.exit_code, timed_out = outcome.timed_out, "script finished");
        Ok(outcome)
    }
}

fn success(model_code: String, test_code: String, outcome: ExecOutcome) -> CandidateResult {
    CandidateResult::Success { model_code, test_code, stdout: outcome.stdout, stderr: outcome.stderr }
}

/// Retry feedback for a failed run: a failure headline above the combined
/// output, plus the install error from its dependency pass if there was one.
pub(crate) fn failure_feedback(script: &str, outcome: &ExecOutcome, install_error: Option<&str>) -> String {
    let failure = PipelineError::ExecutionFailure { script: script.to_string(), exit_code: outcome.exit_code };
    let mut text = format!("{failure}\n{}", outcome.output);
    if let Some(note) = install_error {
        text.push_str(&format!("\n\n[dependency install failed] {note}"));
    }
    text
}
