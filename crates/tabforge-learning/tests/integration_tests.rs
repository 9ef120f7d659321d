//! Integration tests for training, selection and persistence.
//!
//! Jobs run against filesystem collaborators in a temporary store root.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ndarray::{Array1, Array2};
use polars::prelude::*;
use pretty_assertions::assert_eq;
use tabforge_learning::{
    AutoSelectConfig, AutomatedSelector, BundlePredictions, Estimator, JsonFileMetadataStore,
    LocalArtifactStore, LocalDatasetSource, MetadataStore, Model, ModelChoice, ModelParams,
    ModelRegistry, ModelTrainer, ModelTrainingError, PredictionSnapshot, ProblemType,
    ProblemTypeChoice, SelectionInfo, TabforgeError, TrainingConfig, TrainingInput,
    TrainingOrchestrator,
};
use tabforge_learning::metrics::regression_metrics;
use tabforge_processing::{DatasetValidator, ProblemTypePolicy, ProcessingConfig, read_csv_bytes};

// ============================================================================
// Helper Functions
// ============================================================================

fn write_dataset(root: &Path, user: &str, dataset: &str, csv: &str) {
    let path = root.join(LocalDatasetSource::dataset_path(dataset, user));
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, csv).unwrap();
}

/// `price = 3*size + 2*age + offset(kind) + 0.5`
fn houses_csv(n: usize) -> String {
    let mut csv = String::from("size,age,kind,price\n");
    for i in 0..n {
        let age = (i * 7) % 13;
        let (kind, offset) = [("flat", 0.0), ("house", 5.0), ("villa", 10.0)][i % 3];
        let price = 3.0 * i as f64 + 2.0 * age as f64 + offset + 0.5;
        csv.push_str(&format!("{i},{age},{kind},{price:.1}\n"));
    }
    csv
}

fn churn_csv(n: usize) -> String {
    let mut csv = String::from("tenure,plan,spend,churned\n");
    for i in 0..n {
        let plan = ["basic", "pro", "team"][i % 3];
        let churned = if i % 2 == 0 { "yes" } else { "no" };
        let spend = if churned == "yes" { 10.0 + i as f64 * 0.1 } else { 80.0 + i as f64 * 0.1 };
        csv.push_str(&format!("{},{},{:.1},{}\n", i % 24, plan, spend, churned));
    }
    csv
}

/// One row per day; `visits = 2*day_index + 5*load + 1`.
fn visits_csv(n: usize) -> String {
    let start = chrono::NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
    let mut csv = String::from("day,load,visits\n");
    for i in 0..n {
        let day = start + chrono::Duration::days(i as i64);
        let load = (i * 5) % 11;
        let visits = 2.0 * i as f64 + 5.0 * load as f64 + 1.0;
        csv.push_str(&format!("{},{load},{visits:.1}\n", day.format("%Y-%m-%d")));
    }
    csv
}

fn orchestrator(root: &Path) -> TrainingOrchestrator {
    TrainingOrchestrator::new(
        Arc::new(LocalDatasetSource::new(root)),
        Arc::new(LocalArtifactStore::new(root)),
        Arc::new(JsonFileMetadataStore::new(root.join("models.json"))),
    )
}

fn named_config(target: &str, model: &str) -> TrainingConfig {
    TrainingConfig::builder()
        .target_column(target)
        .model(ModelChoice::named(model))
        .n_jobs(1)
        .build()
        .unwrap()
}

fn linear_data(n: usize) -> (Array2<f64>, Array1<f64>) {
    let x = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { i as f64 } else { ((i * 5) % 11) as f64 });
    let y = x.rows().into_iter().map(|r| 1.5 * r[0] - 2.0 * r[1] + 4.0).collect();
    (x, y)
}

fn blob_data(n: usize) -> (Array2<f64>, Array1<f64>) {
    let x = Array2::from_shape_fn((n, 2), |(i, j)| {
        let center = if i % 2 == 0 { 0.0 } else { 10.0 };
        center + ((i * 3 + j * 7) % 5) as f64 * 0.2
    });
    let y = (0..n).map(|i| (i % 2) as f64).collect();
    (x, y)
}

// ============================================================================
// End-to-end Jobs
// ============================================================================

#[test]
fn test_regression_job_persists_bundle_snapshot_and_record() {
    let dir = tempfile::tempdir().unwrap();
    let csv = houses_csv(90);
    write_dataset(dir.path(), "u1", "houses", &csv);

    let orchestrator = orchestrator(dir.path());
    let result = orchestrator
        .train_model("houses", "u1", &named_config("price", "linear_regression"))
        .unwrap();

    assert_eq!(result.problem_type, ProblemType::Regression);
    assert!(result.metrics.r2_score.unwrap() > 0.95);
    assert!(result.metrics.accuracy.is_none());
    assert_eq!(result.feature_columns, vec!["size", "age", "kind"]);
    assert!(result.details.coefficients.is_some());
    assert!(result.model_path.starts_with("u1/models/model_houses_"));

    let snapshot_bytes = fs::read(dir.path().join(&result.predictions_path)).unwrap();
    let snapshot: PredictionSnapshot = serde_json::from_slice(&snapshot_bytes).unwrap();
    assert_eq!(snapshot.actual.len(), result.preprocessing.test_samples);
    assert_eq!(snapshot.residuals.len(), snapshot.actual.len());

    // A fresh store instance reads the same file.
    let records = JsonFileMetadataStore::new(dir.path().join("models.json"))
        .list_models("u1")
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].model_name, "linear_regression_price");
    assert_eq!(records[0].feature_columns, result.feature_columns);

    let bundle = orchestrator.load_bundle(&result.model_path).unwrap();
    let df = read_csv_bytes(csv.as_bytes()).unwrap();
    match bundle.predict(&df).unwrap() {
        BundlePredictions::Values(values) => assert_eq!(values.len(), 90),
        other => panic!("expected numeric predictions, got {other:?}"),
    }
}

#[test]
fn test_bundle_reads_raw_date_strings_like_training() {
    let dir = tempfile::tempdir().unwrap();
    let csv = visits_csv(80);
    write_dataset(dir.path(), "u1", "visits", &csv);

    let orchestrator = orchestrator(dir.path());
    let result = orchestrator
        .train_model("visits", "u1", &named_config("visits", "linear_regression"))
        .unwrap();
    assert!(result.metrics.r2_score.unwrap() > 0.99);

    let bundle = orchestrator.load_bundle(&result.model_path).unwrap();
    let raw = read_csv_bytes(csv.as_bytes()).unwrap();
    assert_eq!(raw.column("day").unwrap().dtype(), &DataType::String);
    let (cleaned, _) = DatasetValidator::new(&ProcessingConfig::default())
        .validate_and_clean(&raw, Some("visits"))
        .unwrap();

    let from_raw = bundle.predict(&raw).unwrap();
    assert_eq!(from_raw, bundle.predict(&cleaned).unwrap());

    let BundlePredictions::Values(predicted) = from_raw else {
        panic!("expected numeric predictions");
    };
    let actual: Vec<f64> = raw
        .column("visits")
        .unwrap()
        .as_materialized_series()
        .f64()
        .unwrap()
        .into_no_null_iter()
        .collect();
    let metrics = regression_metrics(&actual, &predicted).unwrap();
    assert!(metrics.r2_score.unwrap() > 0.99);
}

#[test]
fn test_classification_bundle_decodes_labels() {
    let dir = tempfile::tempdir().unwrap();
    let csv = churn_csv(60);
    write_dataset(dir.path(), "u1", "churn", &csv);

    let orchestrator = orchestrator(dir.path());
    let result = orchestrator
        .train_model("churn", "u1", &named_config("churned", "random_forest"))
        .unwrap();
    assert_eq!(result.problem_type, ProblemType::Classification);
    assert!(result.metrics.accuracy.unwrap() > 0.9);
    assert!(result.details.feature_importances.is_some());

    let bundle = orchestrator.load_bundle(&result.model_path).unwrap();
    let df = read_csv_bytes(csv.as_bytes()).unwrap();
    let BundlePredictions::Labels(labels) = bundle.predict(&df).unwrap() else {
        panic!("expected class labels");
    };
    assert_eq!(labels.len(), 60);
    assert!(labels.iter().all(|l| l == "yes" || l == "no"));
}

#[test]
fn test_automated_selection_through_orchestrator() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), "u1", "houses", &houses_csv(80));

    let config = TrainingConfig::builder()
        .target_column("price")
        .model(ModelChoice::Auto)
        .n_jobs(1)
        .auto_select(AutoSelectConfig {
            time_budget_secs: 30,
            candidates: vec!["ridge".to_string(), "knn".to_string()],
            metric: None,
        })
        .build()
        .unwrap();
    let result = orchestrator(dir.path()).train_model("houses", "u1", &config).unwrap();

    let selection = result.selection.as_ref().unwrap();
    assert_eq!(selection.metric, "r2");
    assert_eq!(selection.candidates.len(), 2);
    assert_eq!(result.model_type, selection.best_model);
    assert!(result.metrics.r2_score.is_some());
}

#[test]
fn test_fixed_problem_type_overrides_detection() {
    let dir = tempfile::tempdir().unwrap();
    let mut csv = String::from("x,grade\n");
    for i in 0..60 {
        csv.push_str(&format!("{},{}\n", i, i % 4));
    }
    write_dataset(dir.path(), "u1", "grades", &csv);

    let config = TrainingConfig::builder()
        .target_column("grade")
        .model(ModelChoice::named("decision_tree"))
        .problem_type(ProblemTypeChoice::Fixed(ProblemType::Regression))
        .build()
        .unwrap();
    let result = orchestrator(dir.path()).train_model("grades", "u1", &config).unwrap();
    assert_eq!(result.problem_type, ProblemType::Regression);
    assert!(result.metrics.mse.is_some());
}

#[test]
fn test_generated_names_stay_unique() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), "u1", "churn", &churn_csv(40));
    let orchestrator = orchestrator(dir.path());

    let config = TrainingConfig::builder()
        .target_column("churned")
        .model(ModelChoice::named("naive_bayes"))
        .model_name("churn model")
        .auto_generate_name(true)
        .build()
        .unwrap();
    let first = orchestrator.train_model("churn", "u1", &config).unwrap();
    let second = orchestrator.train_model("churn", "u1", &config).unwrap();

    assert_eq!(first.model_name, "churn_model");
    assert!(second.model_name.starts_with("churn_model_"));
    assert_ne!(first.id, second.id);
}

// ============================================================================
// Error Taxonomy
// ============================================================================

#[test]
fn test_unusable_dataset_is_bad_input() {
    let dir = tempfile::tempdir().unwrap();
    let mut csv = String::from("notes,y\n");
    for i in 0..30 {
        csv.push_str(&format!(",{}\n", i % 3));
    }
    write_dataset(dir.path(), "u1", "empty", &csv);

    let err = orchestrator(dir.path())
        .train_model("empty", "u1", &named_config("y", "knn"))
        .unwrap_err();
    assert!(err.is_bad_input(), "{err}");

    let json = serde_json::to_value(&err).unwrap();
    assert!(json.get("code").is_some());
}

#[test]
fn test_unknown_model_is_internal_failure() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), "u1", "churn", &churn_csv(40));

    let err = orchestrator(dir.path())
        .train_model("churn", "u1", &named_config("churned", "svm"))
        .unwrap_err();
    assert!(matches!(
        err,
        TabforgeError::ModelTraining(ModelTrainingError::UnknownModel { .. })
    ));
    assert!(!err.is_bad_input());
}

// ============================================================================
// Trainer and Registry
// ============================================================================

#[test]
fn test_unseen_evaluation_label_maps_to_mode() {
    let (x, _) = blob_data(40);
    let train: Vec<&str> = (0..40).map(|i| if i % 2 == 0 { "A" } else { "B" }).collect();
    let mut test = train.clone();
    test[3] = "Z";
    let y_train = Series::new("y".into(), train);
    let y_test = Series::new("y".into(), test);

    let mut trainer = ModelTrainer::new(Arc::new(ModelRegistry::with_defaults()), ProblemTypePolicy::default());
    trainer
        .initialize_model(ProblemType::Classification, "knn", &ModelParams::new(), 1, None)
        .unwrap();
    let outcome = trainer
        .train(TrainingInput {
            x_train: &x,
            x_test: &x,
            y_train: &y_train,
            y_test: &y_test,
            feature_names: None,
            column_names: None,
        })
        .unwrap();

    let stats = outcome.label_encoding_stats.unwrap();
    assert_eq!(stats.test.unseen_count, 1);
    assert_eq!(stats.encoder.all_unseen_labels, vec!["Z".to_string()]);
    assert!(outcome.metrics.accuracy.is_some());
    assert!(outcome.metrics.f1_score.is_some());
}

#[test]
fn test_every_registered_model_fits() {
    let registry = ModelRegistry::with_defaults();
    let (x_reg, y_reg) = linear_data(40);
    let (x_cls, y_cls) = blob_data(40);

    for (problem_type, x, y) in [
        (ProblemType::Regression, &x_reg, &y_reg),
        (ProblemType::Classification, &x_cls, &y_cls),
    ] {
        let available = registry.available(problem_type);
        assert!(available.len() >= 6);
        for model_type in available {
            let mut model = registry
                .create(problem_type, &model_type, &ModelParams::new(), 1)
                .unwrap();
            model.fit(x, y).unwrap_or_else(|e| panic!("{model_type}: {e}"));
            let predicted = model.predict(x).unwrap();
            assert_eq!(predicted.len(), y.len(), "{model_type}");
            assert!(predicted.iter().all(|v| v.is_finite()), "{model_type}");
        }
    }
}

/// Always picks ridge, to check that any selector can drive the trainer.
struct RidgeOnly;

impl AutomatedSelector for RidgeOnly {
    fn select_best_model(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        task: ProblemType,
        _time_budget: Duration,
        _candidates: &[String],
        metric: &str,
    ) -> Result<(Model, SelectionInfo), ModelTrainingError> {
        let mut model = ModelRegistry::with_defaults().create(task, "ridge", &ModelParams::new(), 1)?;
        model
            .fit(x, y)
            .map_err(|e| ModelTrainingError::FitFailed(e.to_string()))?;
        Ok((
            model,
            SelectionInfo {
                best_model: "ridge_only".to_string(),
                model_type: "ridge".to_string(),
                metric: metric.to_string(),
                best_score: 0.0,
                candidates: Vec::new(),
                elapsed_secs: 0.0,
            },
        ))
    }
}

#[test]
fn test_custom_selector_is_used() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), "u1", "houses", &houses_csv(60));

    let orchestrator = orchestrator(dir.path()).with_selector(Arc::new(RidgeOnly));
    let config = TrainingConfig::builder().target_column("price").build().unwrap();
    let result = orchestrator.train_model("houses", "u1", &config).unwrap();

    assert_eq!(result.model_type, "ridge_only");
    assert_eq!(result.model_name, "ridge_only_price");
    let record = JsonFileMetadataStore::new(dir.path().join("models.json"))
        .get_model(&result.id)
        .unwrap();
    assert_eq!(record.parameters.get("alpha"), Some(&serde_json::json!(1.0)));
}
