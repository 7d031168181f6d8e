use std::path::PathBuf;

use anyhow::{anyhow, Result};
use smith_artifacts::{
    read_text_if_exists, sha256_hex, CandidateRecord, RunDir, RunManifest, RunStatus, RunStore, SelectionRecord,
};
use smith_core::{
    parse_checklist, select_winner, CandidateOutcome, CandidateResult, ChecklistSpec, Direction, MetricReport,
    PipelineError, PipelineResult, RunId, ScoredCandidate, METRICS_FILE,
};

use crate::candidate::CandidateRunner;
use crate::context::Services;
use crate::deps::InstalledSet;
use crate::selector::select_candidates;
use crate::stages::{StagePipeline, StagesOutcome};

/// Everything one `run` produced.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub run_dir: PathBuf,
    pub result: PipelineResult,
    pub selection: Option<SelectionRecord>,
    pub stages: Option<StagesOutcome>,
}

pub struct Orchestrator<'a> {
    svc: Services<'a>,
    store: RunStore,
}

impl<'a> Orchestrator<'a> {
    pub fn new(svc: Services<'a>, store: RunStore) -> Self {
        Self { svc, store }
    }

    /// Candidates, promotion and, when enabled, the staged pipeline, in a
    /// fresh run directory.
    pub fn run(&self, snapshot: &str) -> Result<RunSummary> {
        let run_id = RunId::new();
        let run = self.store.create_run(&run_id)?;
        let mut manifest = RunManifest::new(run_id.as_str(), &self.svc.cfg.project.id);
        run.write_manifest(&manifest)?;
        run.append_worklog(&format!("run {run_id} started"))?;
        tracing::info!(run = %run_id, dir = %run.path.display(), "run started");

        let mut installed = InstalledSet::new();
        let result = self.run_candidates(&run, &mut manifest, snapshot, &mut installed)?;
        let mut summary = RunSummary { run_dir: run.path.clone(), result, selection: None, stages: None };

        let PipelineResult::Multi { outcomes, .. } = &summary.result else {
            return Ok(summary);
        };
        summary.selection = self.finalize(&run, &mut manifest, outcomes)?;

        if self.svc.cfg.stages.enabled && summary.selection.is_some() {
            summary.stages = Some(self.stages_on(&run, &mut manifest, &mut installed)?);
        }
        Ok(summary)
    }

    /// Parse, select and drive every candidate in order.
    pub fn run_candidates(
        &self,
        run: &RunDir,
        manifest: &mut RunManifest,
        snapshot: &str,
        installed: &mut InstalledSet,
    ) -> Result<PipelineResult> {
        let spec = match parse_checklist(snapshot) {
            Ok(spec) => spec,
            Err(e) => return self.fail_run(run, manifest, snapshot, PipelineError::from(e), None),
        };
        run.write_checklist(&spec.render())?;
        manifest.checklist = Some(spec.clone());
        run.write_manifest(manifest)?;

        let plan = match select_candidates(self.svc.oracle, &spec) {
            Ok(plan) => plan,
            Err(e) => return self.fail_run(run, manifest, snapshot, e, None),
        };
        run.append_worklog(&format!(
            "family {}: {}",
            plan.family.family,
            plan.choices.iter().map(|c| format!("{}/{}", c.library, c.model_id)).collect::<Vec<_>>().join(", ")
        ))?;
        manifest.family = Some(plan.family.clone());
        manifest.choices = plan.choices.clone();
        manifest.status = RunStatus::Candidates;
        run.write_manifest(manifest)?;

        let runner = CandidateRunner::new(self.svc, &spec);
        let mut outcomes = Vec::with_capacity(plan.choices.len());
        for (i, choice) in plan.choices.iter().enumerate() {
            let index = i + 1;
            let work_dir = run.candidate_dir(&choice.work_dir_name(index))?;
            let outcome = runner.run(index, plan.family.family, choice, &work_dir, installed);
            let line = match &outcome.result {
                CandidateResult::Success { .. } => format!("candidate {index} ({}/{}): success", choice.library, choice.model_id),
                CandidateResult::Failed { reason, .. } => {
                    format!("candidate {index} ({}/{}): failed, {reason}", choice.library, choice.model_id)
                }
            };
            run.append_worklog(&line)?;
            manifest.candidates.push(CandidateRecord::from_outcome(&outcome, None));
            run.write_manifest(manifest)?;
            outcomes.push(outcome);
        }

        if !outcomes.iter().any(CandidateOutcome::is_success) {
            let last_error = outcomes.iter().rev().find_map(|o| match &o.result {
                CandidateResult::Failed { last_error, .. } => Some(last_error.clone()),
                CandidateResult::Success { .. } => None,
            });
            let err = PipelineError::NoUsableCandidate { attempted: outcomes.len() };
            return self.fail_run(run, manifest, snapshot, err, last_error);
        }

        Ok(PipelineResult::Multi { checklist_snapshot: snapshot.to_string(), outcomes })
    }

    fn fail_run(
        &self,
        run: &RunDir,
        manifest: &mut RunManifest,
        snapshot: &str,
        err: PipelineError,
        last_error: Option<String>,
    ) -> Result<PipelineResult> {
        tracing::error!(error = %err, "run failed");
        run.append_worklog(&format!("run failed: {err}"))?;
        manifest.status = RunStatus::Failed;
        manifest.failure = Some(err.to_string());
        run.write_manifest(manifest)?;
        Ok(PipelineResult::Failed { reason: err.to_string(), checklist_snapshot: snapshot.to_string(), last_error })
    }

    /// Score the successes, promote the winner into the run root and write
    /// the selection record. `None` when nothing succeeded.
    pub fn finalize(
        &self,
        run: &RunDir,
        manifest: &mut RunManifest,
        outcomes: &[CandidateOutcome],
    ) -> Result<Option<SelectionRecord>> {
        let spec = manifest.checklist.clone().ok_or_else(|| anyhow!("run manifest has no checklist"))?;
        let direction = Direction::for_metric(spec.metric.as_str());

        let mut metrics: Vec<(usize, Option<MetricReport>)> = vec![];
        for o in outcomes {
            let metric = match &o.result {
                CandidateResult::Success { stdout, .. } => {
                    let artifact = read_text_if_exists(&o.work_dir.join(METRICS_FILE))?;
                    MetricReport::recover(artifact.as_deref(), stdout)
                }
                CandidateResult::Failed { .. } => None,
            };
            metrics.push((o.index, metric));
        }
        let metric_of = |index: usize| metrics.iter().find(|(i, _)| *i == index).and_then(|(_, m)| m.clone());

        let scored: Vec<ScoredCandidate> = outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| ScoredCandidate { index: o.index, metric: metric_of(o.index) })
            .collect();
        let Some(selection) = select_winner(&scored, direction) else {
            return Ok(None);
        };
        let winner = outcomes
            .iter()
            .find(|o| o.index == selection.index)
            .ok_or_else(|| anyhow!("selected candidate {} is not among the outcomes", selection.index))?;
        let CandidateResult::Success { model_code, .. } = &winner.result else {
            return Err(anyhow!("selected candidate {} did not succeed", winner.index));
        };

        let promoted = run.promote(&winner.work_dir, self.svc.runtime.script_ext())?;
        let rows: Vec<CandidateRecord> =
            outcomes.iter().map(|o| CandidateRecord::from_outcome(o, metric_of(o.index))).collect();
        let record = SelectionRecord {
            winner_index: winner.index,
            family: winner.family,
            library: winner.concrete.library.clone(),
            model_id: winner.concrete.model_id.clone(),
            work_dir: winner.work_dir.clone(),
            metric: selection.metric.as_ref().map(|m| m.metric.clone()),
            value: selection.metric.as_ref().map(|m| m.value),
            direction,
            scored: selection.scored,
            model_sha256: sha256_hex(model_code.as_bytes()),
            candidates: rows.clone(),
        };
        run.write_selection(&record)?;

        let score = match (&record.metric, record.value) {
            (Some(m), Some(v)) => format!("{m}={v} ({})", direction.as_str()),
            _ => "unscored, first success".to_string(),
        };
        tracing::info!(candidate = winner.index, %score, files = ?promoted, "candidate promoted");
        run.append_worklog(&format!(
            "promoted candidate {} ({}/{}): {score}",
            winner.index, record.library, record.model_id
        ))?;
        manifest.candidates = rows;
        manifest.winner_index = Some(winner.index);
        manifest.status = RunStatus::Promoted;
        run.write_manifest(manifest)?;
        Ok(Some(record))
    }

    /// Staged pipeline over an existing run's promoted candidate.
    pub fn run_stages(&self, run: &RunDir) -> Result<StagesOutcome> {
        let mut manifest = run.read_manifest()?;
        anyhow::ensure!(manifest.winner_index.is_some(), "run {} has no promoted candidate", manifest.run_id);
        self.stages_on(run, &mut manifest, &mut InstalledSet::new())
    }

    fn stages_on(&self, run: &RunDir, manifest: &mut RunManifest, installed: &mut InstalledSet) -> Result<StagesOutcome> {
        let spec: ChecklistSpec = match &manifest.checklist {
            Some(spec) => spec.clone(),
            None => parse_checklist(&run.read_checklist()?)?,
        };
        manifest.failure = None;
        let outcome = StagePipeline::new(self.svc, run, &spec).run(installed, manifest)?;
        if outcome.aborted.is_none() {
            manifest.status = RunStatus::Staged;
        }
        run.write_manifest(manifest)?;
        Ok(outcome)
    }
}
