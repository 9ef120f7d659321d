//! CLI entry point for dataset validation and preprocessing.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use dotenv::dotenv;
use polars::prelude::*;
use serde_json::json;
use std::path::Path;
use tabforge_processing::{
    AnalyzerThresholds, DatasetHealthReport, DatasetValidator, PreprocessingMetadata,
    ProblemTypeClassifier, ProcessingConfig, TargetAnalysis, analyze_target_column,
    preprocess_data, read_csv_bytes,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Validate a tabular dataset before training",
    long_about = "Checks every column of a CSV file, reports which columns would be dropped or \
                  coerced, and optionally runs the full preprocessing step.\n\n\
                  EXAMPLES:\n  \
                  # Health report for every column\n  \
                  tabforge-validate -i data.csv\n\n  \
                  # Include target analysis and the problem type\n  \
                  tabforge-validate -i data.csv --target price --analyze-target\n\n  \
                  # Run the split + feature encoding and print the metadata as JSON\n  \
                  tabforge-validate -i data.csv --target label --preprocess --json"
)]
struct Args {
    /// Path to the CSV file to validate
    #[arg(short, long)]
    input: String,

    /// Target column for ML prediction
    #[arg(short, long)]
    target: Option<String>,

    /// Print an analysis of the target column
    #[arg(long, requires = "target")]
    analyze_target: bool,

    /// Also split and encode the features
    #[arg(long, requires = "target")]
    preprocess: bool,

    /// Columns with at least this null ratio are dropped (0.0 - 1.0)
    #[arg(long, default_value = "0.95")]
    max_null_ratio: f64,

    /// Minimum rows that must survive cleaning
    #[arg(long, default_value = "10")]
    min_rows: usize,

    /// Requested test proportion (0.1 - 0.5)
    #[arg(long, default_value = "0.2")]
    test_size: f64,

    /// Target-encode high-cardinality categoricals
    #[arg(long)]
    use_target_encoder: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Only show warnings, errors and the final result
    #[arg(short, long)]
    quiet: bool,

    /// Output JSON to stdout instead of a human-readable summary
    ///
    /// Disables all logs; only the final JSON report is written.
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

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.quiet, args.json);
    dotenv().ok();

    if !Path::new(&args.input).exists() {
        return Err(anyhow!("Input file not found: {}", args.input));
    }

    let config = ProcessingConfig::builder()
        .analyzer(AnalyzerThresholds {
            max_null_ratio: args.max_null_ratio,
            ..AnalyzerThresholds::default()
        })
        .min_rows(args.min_rows)
        .test_size(args.test_size)
        .use_target_encoder(args.use_target_encoder)
        .build()?;

    info!("Loading dataset from: {}", args.input);
    let bytes = std::fs::read(&args.input).with_context(|| format!("reading {}", args.input))?;
    let df = read_csv_bytes(&bytes).context("parsing CSV")?;
    info!("Dataset loaded: {} rows x {} columns", df.height(), df.width());

    let target = args.target.as_deref();
    let validator = DatasetValidator::new(&config);
    let (cleaned, report) = validator.validate_and_clean(&df, target)?;

    let analysis = match (target, args.analyze_target) {
        (Some(target), true) => {
            let labels = cleaned.column(target)?.as_materialized_series();
            let classifier = ProblemTypeClassifier::new(config.problem_type);
            Some(analyze_target_column(&classifier, labels)?)
        }
        _ => None,
    };

    let metadata = match (target, args.preprocess) {
        (Some(target), true) => Some(preprocess_data(&df, target, &config)?.metadata),
        _ => None,
    };

    if args.json {
        let output = json!({
            "input": args.input,
            "original_shape": [df.height(), df.width()],
            "health_report": report,
            "target_analysis": analysis,
            "preprocessing": metadata,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_summary(&args.input, &df, &report, analysis.as_ref(), metadata.as_ref());
    }
    Ok(())
}

/// Human-readable report; `println!` because this output is the point of the
/// command and must not depend on the log level.
fn print_summary(
    input: &str,
    original: &DataFrame,
    report: &DatasetHealthReport,
    analysis: Option<&TargetAnalysis>,
    metadata: Option<&PreprocessingMetadata>,
) {
    println!();
    println!("{}", "=".repeat(80));
    println!("DATASET HEALTH");
    println!("{}", "=".repeat(80));
    println!(
        "Input: {} ({} rows x {} columns)",
        input,
        original.height(),
        original.width()
    );
    println!(
        "After cleaning: {} rows x {} columns",
        report.total_rows, report.total_columns
    );
    if let Some(problem_type) = report.recommended_problem_type {
        println!("Problem Type: {}", problem_type);
    }
    println!();

    println!(
        "{:<24} {:<10} {:<12} {:<10} {:<8} {:<8}",
        "Column", "Dtype", "Inferred", "Missing %", "Unique", "Action"
    );
    println!("{}", "-".repeat(76));
    for health in report.column_reports.values() {
        println!(
            "{:<24} {:<10} {:<12} {:<10.1} {:<8} {:<8}",
            truncate_str(&health.name, 23),
            truncate_str(&health.original_dtype, 9),
            health.inferred_type,
            health.null_percentage,
            health.unique_count,
            format!("{:?}", health.recommended_action).to_lowercase()
        );
        for issue in &health.issues {
            println!("    - {}", issue);
        }
    }
    println!();

    if !report.dropped_columns.is_empty() {
        println!("Dropped: {}", report.dropped_columns.join(", "));
    }
    if !report.coerced_columns.is_empty() {
        println!("Coerced: {}", report.coerced_columns.join(", "));
    }
    for issue in &report.overall_issues {
        println!("  ! {}", issue);
    }

    if let Some(analysis) = analysis {
        println!();
        println!("TARGET '{}'", analysis.target_column);
        println!("{}", "-".repeat(40));
        let stats = &analysis.statistics;
        println!(
            "  {} samples, {} unique ({:.3} ratio), dtype {}",
            stats.n_samples, stats.n_unique, stats.unique_ratio, stats.dtype
        );
        println!("  Sample values: {}", stats.sample_values.join(", "));
        println!("  {}", analysis.recommendations.message);
        for warning in &analysis.warnings {
            println!("  [{:?}] {}", warning.level, warning.message);
        }
    }

    if let Some(metadata) = metadata {
        println!();
        println!("PREPROCESSING");
        println!("{}", "-".repeat(40));
        println!(
            "  Split: {} train / {} test (test_size {:.3})",
            metadata.train_samples, metadata.test_samples, metadata.test_size
        );
        println!(
            "  Features: {} columns -> {} encoded",
            metadata.n_original_features, metadata.n_processed_features
        );
        if !metadata.removed_features.is_empty() {
            println!("  Removed: {}", metadata.removed_features.join(", "));
        }
    }

    println!("{}", "=".repeat(80));
}

fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
