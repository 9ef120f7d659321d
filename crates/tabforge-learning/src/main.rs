//! CLI entry point for training a model against a local store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use dotenv::dotenv;
use serde_json::json;
use tabforge_learning::{
    AutoSelectConfig, JsonFileMetadataStore, LocalArtifactStore, LocalDatasetSource, ModelChoice,
    ProblemType, ProblemTypeChoice, ProgressUpdate, TrainingConfig, TrainingOrchestrator,
    TrainingResult,
};
use tabforge_processing::ProcessingConfig;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Train, evaluate and store a model for an uploaded dataset",
    long_about = "Reads {root}/{user}/datasets/{dataset}.csv, trains a model on it and writes the \
                  model bundle, the prediction snapshot and a record under the store root.\n\n\
                  EXAMPLES:\n  \
                  # Automated selection over the default candidates\n  \
                  tabforge-train --user u1 --dataset houses --target price\n\n  \
                  # A specific model with custom parameters\n  \
                  tabforge-train --user u1 --dataset churn --target churned \\\n    \
                  --model random_forest --param n_estimators=200 --param max_depth=8\n\n  \
                  # Only inspect the target column\n  \
                  tabforge-train --user u1 --dataset churn --target churned --analyze-target --json"
)]
struct Args {
    /// Store root holding datasets, artifacts and models.json
    #[arg(long, default_value = ".")]
    root: PathBuf,

    #[arg(short, long)]
    user: String,

    /// Dataset id (file stem under {user}/datasets/)
    #[arg(short, long)]
    dataset: String,

    /// Target column for ML prediction
    #[arg(short, long)]
    target: String,

    /// Model type, or "auto" for automated selection
    #[arg(short, long, default_value = "auto")]
    model: String,

    /// Problem type: auto, classification or regression
    #[arg(long, default_value = "auto")]
    problem_type: String,

    /// Estimator parameter as key=value; values are parsed as JSON when possible
    #[arg(long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Add polynomial features of this degree (regression only, 2 - 5)
    #[arg(long)]
    polynomial_degree: Option<usize>,

    /// Model name; must not exist yet unless --auto-name is given
    #[arg(long)]
    name: Option<String>,

    /// Always generate a unique name, using --name as the base
    #[arg(long)]
    auto_name: bool,

    /// Time budget for automated selection in seconds
    #[arg(long, default_value = "60")]
    time_budget: u64,

    /// Comma-separated candidates for automated selection
    #[arg(long, value_delimiter = ',', default_value = "lgbm,xgboost,rf")]
    candidates: Vec<String>,

    /// Optimization metric for automated selection (default: r2 or accuracy)
    #[arg(long)]
    metric: Option<String>,

    /// Parallel jobs hint (-1 = all cores)
    #[arg(long, default_value = "-1", allow_hyphen_values = true)]
    n_jobs: i32,

    /// Requested test proportion (0.1 - 0.5)
    #[arg(long, default_value = "0.2")]
    test_size: f64,

    /// Target-encode high-cardinality categoricals
    #[arg(long)]
    use_target_encoder: bool,

    /// Only analyze the target column; nothing is trained or stored
    #[arg(long)]
    analyze_target: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Only show warnings, errors and the final result
    #[arg(short, long)]
    quiet: bool,

    /// Output JSON to stdout instead of a human-readable summary
    ///
    /// Disables all logs; only the final JSON result is written.
    #[arg(long)]
    json: bool,
}

/// Initialize the tracing subscriber.
///
/// When `json_output` is true logging stays off so stdout only holds JSON.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// `key=value` with the value read as JSON, falling back to a string.
fn parse_param(raw: &str) -> Result<(String, serde_json::Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid --param '{}': expected KEY=VALUE", raw))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| json!(value));
    Ok((key.trim().to_string(), value))
}

fn build_config(args: &Args) -> Result<TrainingConfig> {
    let problem_type = match args.problem_type.as_str() {
        "auto" => ProblemTypeChoice::Auto,
        other => ProblemTypeChoice::Fixed(other.parse::<ProblemType>().map_err(|e| anyhow!(e))?),
    };
    let processing = ProcessingConfig::builder()
        .test_size(args.test_size)
        .use_target_encoder(args.use_target_encoder)
        .build()?;

    let mut builder = TrainingConfig::builder()
        .target_column(&args.target)
        .model(ModelChoice::parse(&args.model))
        .problem_type(problem_type)
        .auto_generate_name(args.auto_name)
        .n_jobs(args.n_jobs)
        .auto_select(AutoSelectConfig {
            time_budget_secs: args.time_budget,
            candidates: args.candidates.clone(),
            metric: args.metric.clone(),
        })
        .processing(processing);
    if let Some(degree) = args.polynomial_degree {
        builder = builder.use_polynomial(true).polynomial_degree(degree);
    }
    if let Some(name) = &args.name {
        builder = builder.model_name(name);
    }
    for raw in &args.params {
        let (key, value) = parse_param(raw)?;
        builder = builder.model_param(key, value);
    }
    Ok(builder.build()?)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.quiet, args.json);
    dotenv().ok();

    let orchestrator = TrainingOrchestrator::new(
        Arc::new(LocalDatasetSource::new(&args.root)),
        Arc::new(LocalArtifactStore::new(&args.root)),
        Arc::new(JsonFileMetadataStore::new(args.root.join("models.json"))),
    )
    .with_progress(Arc::new(|update: ProgressUpdate| {
        info!("[{:>3.0}%] {}", update.progress * 100.0, update.message);
    }));

    if args.analyze_target {
        let analysis = orchestrator
            .analyze_target_column(&args.dataset, &args.user, &args.target)
            .with_context(|| format!("analyzing target '{}'", args.target))?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        } else {
            println!("Target '{}': {}", analysis.target_column, analysis.recommended_problem_type);
            println!("  {}", analysis.recommendations.message);
            for warning in &analysis.warnings {
                println!("  [{:?}] {}", warning.level, warning.message);
            }
        }
        return Ok(());
    }

    let config = build_config(&args)?;
    info!("Training on dataset '{}' for user '{}'", args.dataset, args.user);
    let result = match orchestrator.train_model(&args.dataset, &args.user, &config) {
        Ok(result) => result,
        Err(err) if args.json => {
            let output = json!({ "success": false, "bad_input": err.is_bad_input(), "error": err });
            println!("{}", serde_json::to_string_pretty(&output)?);
            std::process::exit(1);
        }
        Err(err) => return Err(err.into()),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }
    Ok(())
}

/// Human-readable result; `println!` because this output is the point of the
/// command and must not depend on the log level.
fn print_summary(result: &TrainingResult) {
    println!();
    println!("{}", "=".repeat(80));
    println!("{}", result.message.to_uppercase());
    println!("{}", "=".repeat(80));
    println!("Model:        {} ({})", result.model_name, result.id);
    println!("Type:         {} / {}", result.model_type, result.problem_type);
    println!("Training:     {:.2}s", result.training_time);
    println!(
        "Split:        {} train / {} test",
        result.preprocessing.train_samples, result.preprocessing.test_samples
    );
    println!("Features:     {}", result.feature_columns.join(", "));
    println!();

    println!("METRICS");
    println!("{}", "-".repeat(40));
    if let Ok(serde_json::Value::Object(metrics)) = serde_json::to_value(&result.metrics) {
        for (name, value) in metrics {
            println!("  {:<12} {}", name, value);
        }
    }

    if let Some(selection) = &result.selection {
        println!();
        println!("CANDIDATES ({} = {:.4})", selection.metric, selection.best_score);
        println!("{}", "-".repeat(40));
        for candidate in &selection.candidates {
            match (candidate.score, &candidate.error) {
                (Some(score), _) => println!("  {:<20} {:.4}", candidate.candidate, score),
                (None, Some(error)) => println!("  {:<20} failed: {}", candidate.candidate, error),
                (None, None) => println!("  {:<20} -", candidate.candidate),
            }
        }
    }

    if let Some(stats) = &result.label_encoding_stats {
        if stats.test.unseen_count > 0 {
            println!();
            println!(
                "  ! {} test labels were unseen in training and mapped to '{}'",
                stats.test.unseen_count,
                stats.encoder.mode_class.as_deref().unwrap_or("-")
            );
        }
    }

    println!();
    println!("Bundle:       {}", result.model_url);
    println!("Predictions:  {}", result.predictions_url);
    println!("{}", "=".repeat(80));
}
