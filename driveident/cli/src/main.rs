use std::{
    collections::BTreeMap,
    fs,
    path::PathBuf,
    sync::Arc,
};

use anyhow::{anyhow, bail, ensure, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use driveident_core::{
    discover_splits, load_recording, orchestration::export, run_split, CallbackPublisher,
    ConfigOverrides, FeatureSet, ModelFamily, PipelineConfig, PipelineTelemetry,
    PredictionOrchestrator, ProgressStatus, SplitJob, SplitResult, TrainingOrchestrator,
};
use serde::Serialize;
use serde_json::{json, Value};
use shared_event_bus::{EventPublisher, FileEventPublisher};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tokio::{runtime::Runtime, sync::Semaphore};
use uuid::Uuid;

const SPLIT_SUMMARY_FILE: &str = "split_summary.csv";
const SPLIT_LOG_FILE: &str = "logs/splits.log.jsonl";

#[derive(Parser, Debug)]
#[command(
    name = "driveident",
    version,
    about = "Identifies drivers from vehicle telemetry recordings"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trains and cross-validates every configured model family.
    Train(RunArgs),
    /// Scores the test label list with the persisted models.
    Predict(RunArgs),
    /// Checks that recordings parse.
    Validate {
        /// Recording files to check.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Prints the effective configuration.
    Config {
        #[command(flatten)]
        pipeline: PipelineArgs,
        /// Also writes the effective configuration to this file.
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Trains and scores every `split_<name>_train.lbl` / `_test.lbl` pair of a directory.
    EvaluateSplits(SplitArgs),
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// JSON configuration file; a missing file means defaults.
    #[arg(long, default_value = "driveident.json")]
    config: PathBuf,
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    labels_file: Option<PathBuf>,
    #[arg(long)]
    test_labels_file: Option<PathBuf>,
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,
    /// Comma-separated families: randomforest, logreg, gradientboosting.
    #[arg(long, value_delimiter = ',')]
    models: Option<Vec<ModelFamily>>,
    #[arg(long, conflicts_with = "no_grid_search")]
    grid_search: bool,
    #[arg(long)]
    no_grid_search: bool,
    /// aggregation, time-series-native or both.
    #[arg(long)]
    feature_set: Option<FeatureSet>,
    #[arg(long)]
    window_sec: Option<f64>,
    #[arg(long)]
    step_sec: Option<f64>,
    #[arg(long)]
    min_points: Option<usize>,
    #[arg(long)]
    max_points: Option<usize>,
    #[arg(long)]
    cv_splits: Option<usize>,
    #[arg(long)]
    random_state: Option<u64>,
}

impl PipelineArgs {
    fn overrides(&self) -> ConfigOverrides {
        let use_grid_search = if self.grid_search {
            Some(true)
        } else if self.no_grid_search {
            Some(false)
        } else {
            None
        };
        ConfigOverrides {
            data_dir: self.data_dir.clone(),
            labels_file: self.labels_file.clone(),
            test_labels_file: self.test_labels_file.clone(),
            artifacts_dir: self.artifacts_dir.clone(),
            models: self.models.clone(),
            use_grid_search,
            feature_set: self.feature_set,
            window_sec: self.window_sec,
            step_sec: self.step_sec,
            min_points: self.min_points,
            max_points: self.max_points,
            cv_splits: self.cv_splits,
            random_state: self.random_state,
        }
    }

    fn resolve(&self) -> Result<PipelineConfig> {
        let base = PipelineConfig::load_or_default(&self.config)
            .with_context(|| format!("loading config {}", self.config.display()))?;
        Ok(base.with_overrides(&self.overrides()))
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    pipeline: PipelineArgs,
    /// Suppresses progress lines on stderr.
    #[arg(long)]
    quiet: bool,
    /// Prints the full report as JSON.
    #[arg(long)]
    json: bool,
    /// Appends every pipeline event to this JSON-lines file.
    #[arg(long)]
    event_log: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SplitArgs {
    #[command(flatten)]
    pipeline: PipelineArgs,
    /// Directory holding the split label lists.
    #[arg(long)]
    splits_dir: PathBuf,
    /// Splits evaluated concurrently.
    #[arg(long, default_value_t = 2)]
    jobs: usize,
    /// Keeps each split's artifact directory.
    #[arg(long)]
    keep_artifacts: bool,
    /// Summary CSV, `<artifacts>/split_summary.csv` by default.
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct SplitFailure {
    split: String,
    error: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Train(args) => handle_train(&args),
        Commands::Predict(args) => handle_predict(&args),
        Commands::Validate { paths } => handle_validate(&paths),
        Commands::Config { pipeline, save } => {
            let config = pipeline.resolve()?;
            if let Err(err) = config.validate() {
                eprintln!("warning: {err}");
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            if let Some(path) = save {
                config
                    .save(&path)
                    .with_context(|| format!("saving config to {}", path.display()))?;
                eprintln!("saved {}", path.display());
            }
            Ok(())
        }
        Commands::EvaluateSplits(args) => handle_splits(args),
    }
}

fn handle_train(args: &RunArgs) -> Result<()> {
    let config = args.pipeline.resolve()?;
    config.validate().context("invalid configuration")?;
    let telemetry = telemetry_for("train", &config, args)?;
    let outcome = TrainingOrchestrator::new(config, Some(telemetry)).execute();
    let Some(report) = outcome.value else {
        bail!("training failed: {}", outcome.message);
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("{}", outcome.message);
    println!(
        "{} windows from {} recordings, {} {} features, classes: {}",
        report.windows,
        report.recordings,
        report.feature_columns,
        report.feature_set,
        report.classes.join(", ")
    );
    for model in &report.models {
        println!(
            "{:<18} cv accuracy {:.3} | mean fold {:.3} | {} folds | {}",
            model.family.as_str(),
            model.cv_accuracy,
            model.mean_fold_accuracy,
            model.folds_evaluated,
            model.artifact.display()
        );
    }
    Ok(())
}

fn handle_predict(args: &RunArgs) -> Result<()> {
    let config = args.pipeline.resolve()?;
    config.validate().context("invalid configuration")?;
    let telemetry = telemetry_for("predict", &config, args)?;
    let outcome = PredictionOrchestrator::new(config, Some(telemetry)).execute();
    let Some(report) = outcome.value else {
        bail!("prediction failed: {}", outcome.message);
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("{}", outcome.message);
    for (family, verdicts) in &report.verdicts {
        match report.accuracy(*family) {
            Some(accuracy) => println!("{:<18} accuracy {accuracy:.3}", family.as_str()),
            None => println!("{:<18} no labelled recordings", family.as_str()),
        }
        for verdict in verdicts {
            println!(
                "  {} -> {} (truth: {})",
                verdict.recording,
                verdict.predicted,
                verdict.truth.as_deref().unwrap_or("?")
            );
        }
    }
    Ok(())
}

fn handle_validate(paths: &[PathBuf]) -> Result<()> {
    let mut failures = 0_usize;
    for path in paths {
        match load_recording(path) {
            Ok(series) => {
                let span = match (series.t.first(), series.t.last()) {
                    (Some(first), Some(last)) => last - first,
                    _ => 0.0,
                };
                println!(
                    "ok      {} ({} samples, {span:.1}s)",
                    path.display(),
                    series.len()
                );
            }
            Err(err) => {
                failures += 1;
                println!("invalid {}: {err}", path.display());
            }
        }
    }
    ensure!(
        failures == 0,
        "{failures} of {} recordings failed validation",
        paths.len()
    );
    Ok(())
}

fn handle_splits(args: SplitArgs) -> Result<()> {
    ensure!(args.jobs > 0, "--jobs must be at least 1");
    let config = args.pipeline.resolve()?;
    config.validate().context("invalid configuration")?;
    let jobs = discover_splits(&args.splits_dir)
        .with_context(|| format!("reading splits from {}", args.splits_dir.display()))?;
    ensure!(
        !jobs.is_empty(),
        "no split_<name>_train.lbl / split_<name>_test.lbl pairs in {}",
        args.splits_dir.display()
    );

    let artifacts_root = config.artifacts_dir.clone();
    fs::create_dir_all(&artifacts_root)
        .with_context(|| format!("creating {}", artifacts_root.display()))?;
    let logger = JsonLogger::new(artifacts_root.join(SPLIT_LOG_FILE))?;
    let run_id = format!("splits-{}", Uuid::new_v4());
    let started_at: DateTime<Utc> = Utc::now();
    log_event(
        &logger,
        LogLevel::Info,
        "splits.started",
        json!({
            "run_id": run_id,
            "jobs": jobs.iter().map(|j| j.name.as_str()).collect::<Vec<_>>(),
            "parallelism": args.jobs,
        }),
    )?;

    let runtime = Runtime::new().context("starting split runtime")?;
    let names: Vec<String> = jobs.iter().map(|j| j.name.clone()).collect();
    let total = names.len();
    let outcomes = runtime.block_on(evaluate_concurrently(
        config,
        jobs,
        artifacts_root.clone(),
        args.jobs,
        args.keep_artifacts,
    ));

    let mut results: Vec<SplitResult> = Vec::new();
    let mut failures: Vec<SplitFailure> = Vec::new();
    for (name, outcome) in names.into_iter().zip(outcomes) {
        match outcome {
            Ok(split_results) => {
                for result in &split_results {
                    println!(
                        "{:<16} {:<18} {}/{} correct ({:.3})",
                        result.split,
                        result.model,
                        result.n_correct,
                        result.n_test_samples,
                        result.accuracy
                    );
                }
                results.extend(split_results);
            }
            Err(err) => {
                eprintln!("split {name} failed: {err:#}");
                failures.push(SplitFailure {
                    split: name,
                    error: format!("{err:#}"),
                });
            }
        }
    }

    let summary = args
        .summary
        .unwrap_or_else(|| artifacts_root.join(SPLIT_SUMMARY_FILE));
    export::write_split_summary(&summary, &results)
        .with_context(|| format!("writing {}", summary.display()))?;
    for (model, accuracy) in mean_accuracy_by_model(&results) {
        println!("{model:<18} mean split accuracy {accuracy:.3}");
    }

    let finished_at = Utc::now();
    log_event(
        &logger,
        if failures.is_empty() {
            LogLevel::Info
        } else {
            LogLevel::Warn
        },
        "splits.finished",
        json!({
            "run_id": run_id,
            "started_at": started_at.to_rfc3339(),
            "finished_at": finished_at.to_rfc3339(),
            "results": results.len(),
            "failures": failures,
            "summary": summary,
        }),
    )?;
    if !failures.is_empty() {
        bail!(
            "{} of {} splits failed; see {}",
            failures.len(),
            total,
            logger.path().display()
        );
    }
    Ok(())
}

/// Runs each split on the blocking pool, at most `parallelism` at a time. Outcomes keep
/// the order of `jobs`.
async fn evaluate_concurrently(
    config: PipelineConfig,
    jobs: Vec<SplitJob>,
    artifacts_root: PathBuf,
    parallelism: usize,
    keep_artifacts: bool,
) -> Vec<Result<Vec<SplitResult>>> {
    let semaphore = Arc::new(Semaphore::new(parallelism));
    let config = Arc::new(config);
    let artifacts_root = Arc::new(artifacts_root);
    let mut handles = Vec::with_capacity(jobs.len());
    for job in jobs {
        let semaphore = Arc::clone(&semaphore);
        let config = Arc::clone(&config);
        let artifacts_root = Arc::clone(&artifacts_root);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .context("split scheduler closed")?;
            let name = job.name.clone();
            tokio::task::spawn_blocking(move || {
                run_split(&config, &job, &artifacts_root, keep_artifacts)
            })
            .await
            .with_context(|| format!("split {name} aborted"))?
            .with_context(|| format!("split {name}"))
        }));
    }
    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(match handle.await {
            Ok(outcome) => outcome,
            Err(err) => Err(anyhow!("split task aborted: {err}")),
        });
    }
    outcomes
}

fn mean_accuracy_by_model(results: &[SplitResult]) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for result in results {
        let entry = sums.entry(result.model.clone()).or_insert((0.0, 0));
        entry.0 += result.accuracy;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(model, (sum, count))| (model, sum / count as f64))
        .collect()
}

fn telemetry_for(
    module: &str,
    config: &PipelineConfig,
    args: &RunArgs,
) -> Result<PipelineTelemetry> {
    let mut extra: Vec<Arc<dyn EventPublisher>> = Vec::new();
    if !args.quiet {
        extra.push(Arc::new(CallbackPublisher::new(print_progress)));
    }
    if let Some(path) = &args.event_log {
        let publisher = FileEventPublisher::new(path)
            .with_context(|| format!("opening event log {}", path.display()))?;
        extra.push(Arc::new(publisher));
    }
    PipelineTelemetry::for_artifacts(module, &config.artifacts_dir, extra)
        .with_context(|| format!("opening telemetry under {}", config.artifacts_dir.display()))
}

fn print_progress(status: &ProgressStatus) {
    let phase = status.phase.to_string();
    let running = if status.in_progress.is_empty() {
        String::new()
    } else {
        format!(" [running: {}]", status.in_progress.join(", "))
    };
    eprintln!(
        "[{:>5.1}%] {phase:<10} {}/{} {}{running}",
        status.percent,
        status.completed.len(),
        status.total,
        status.message
    );
}

fn log_event(logger: &JsonLogger, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
    let mut record = LogRecord::new("splits", level, message);
    if let Some(obj) = metadata.as_object() {
        record.metadata = obj.clone();
    }
    logger.log(&record)
}
