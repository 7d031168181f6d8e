use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use smith_core::{CandidateResult, PipelineResult, StageResult};
use smith_runner::{RunSummary, Runner, StagesOutcome};

#[derive(Parser)]
#[command(name = "mlsmith", version)]
struct Cli {
    /// Log filter in RUST_LOG syntax (overrides RUST_LOG)
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write .mlsmith/mlsmith.toml with defaults and create the runs root
    Init,

    /// Check the interpreter, the oracle backend and the runs root
    Doctor,

    /// Generate, validate and select candidates for a checklist, then run the stages
    Run {
        #[arg(long)]
        checklist: PathBuf,
        /// Stop after promotion
        #[arg(long)]
        no_stages: bool,
        #[arg(long)]
        max_model_retries: Option<u32>,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Re-run the staged pipeline on an existing run's promoted candidate
    Stages {
        #[arg(long)]
        run: PathBuf,
    },

    /// Print a run's manifest
    Show {
        #[arg(long)]
        run: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let filter = match &cli.log {
        Some(directives) => EnvFilter::try_new(directives).with_context(|| format!("invalid --log filter {directives:?}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let project_root = std::env::current_dir()?;

    match cli.cmd {
        Command::Init => {
            let path = Runner::init_project(&project_root)?;
            println!("Initialized mlsmith in {} ({})", project_root.display(), path.display());
        }
        Command::Doctor => {
            let r = Runner::open(project_root)?;
            let checks = r.doctor();
            for c in &checks {
                println!("{} {:<12} {}", if c.ok { "ok  " } else { "FAIL" }, c.name, c.detail);
            }
            if checks.iter().any(|c| !c.ok) {
                bail!("doctor found problems");
            }
        }
        Command::Run { checklist, no_stages, max_model_retries, json } => {
            let snapshot = std::fs::read_to_string(&checklist)
                .with_context(|| format!("read checklist {}", checklist.display()))?;
            let mut r = Runner::open(project_root)?;
            if no_stages {
                r.cfg.stages.enabled = false;
            }
            if let Some(n) = max_model_retries {
                r.cfg.budgets.max_model_retries = n;
            }
            let summary = r.run_checklist(&snapshot)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary_json(&summary))?);
            } else {
                print_summary(&summary);
            }
            if let PipelineResult::Failed { reason, .. } = &summary.result {
                bail!("run failed: {reason}");
            }
            if let Some(err) = summary.stages.as_ref().and_then(|s| s.aborted.as_ref()) {
                bail!("staged pipeline aborted: {err}");
            }
        }
        Command::Stages { run } => {
            let r = Runner::open(project_root)?;
            let outcome = r.run_stages(&run)?;
            print_stages(&outcome);
            if let Some(err) = &outcome.aborted {
                bail!("staged pipeline aborted: {err}");
            }
        }
        Command::Show { run } => {
            let manifest = Runner::show(&run)?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
    }

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("Run: {}", summary.run_dir.display());
    match &summary.result {
        PipelineResult::Failed { reason, last_error, .. } => {
            println!("FAILED: {reason}");
            if let Some(e) = last_error {
                println!("Last error:\n{e}");
            }
        }
        PipelineResult::Multi { outcomes, .. } => {
            for o in outcomes {
                let status = match &o.result {
                    CandidateResult::Success { .. } => "success".to_string(),
                    CandidateResult::Failed { reason, .. } => format!("failed ({reason})"),
                };
                println!("- [{}] {} / {}: {}", o.index, o.concrete.library, o.concrete.model_id, status);
            }
        }
    }
    if let Some(sel) = &summary.selection {
        let score = match (&sel.metric, sel.value) {
            (Some(m), Some(v)) => format!("{m} = {v} ({})", sel.direction.as_str()),
            _ => "unscored".to_string(),
        };
        println!("Promoted: [{}] {} / {}, {}", sel.winner_index, sel.library, sel.model_id, score);
    }
    if let Some(stages) = &summary.stages {
        print_stages(stages);
    }
}

fn print_stages(outcome: &StagesOutcome) {
    for (stage, result) in &outcome.results {
        match result {
            StageResult::Success { parsed_json, .. } => match parsed_json {
                Some(v) => println!("{stage}: success {v}"),
                None => println!("{stage}: success"),
            },
            StageResult::Failed { reason, .. } => println!("{stage}: failed ({reason})"),
        }
    }
    if let Some(err) = &outcome.aborted {
        println!("Aborted: {err}");
    }
    if let Some(report) = &outcome.report {
        println!("Report: {}", report.display());
    }
}

fn summary_json(summary: &RunSummary) -> serde_json::Value {
    let stages = summary.stages.as_ref().map(|s| {
        json!({
            "results": s.results.iter().map(|(stage, r)| json!({"stage": stage, "result": r})).collect::<Vec<_>>(),
            "aborted": s.aborted.as_ref().map(|e| e.to_string()),
            "report": s.report,
        })
    });
    json!({
        "run_dir": summary.run_dir,
        "result": summary.result,
        "selection": summary.selection,
        "stages": stages,
    })
}
