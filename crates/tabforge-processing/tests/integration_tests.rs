//! Integration tests for validation and preprocessing.
//!
//! These tests exercise the public API end to end on generated tables.

use polars::prelude::*;
use pretty_assertions::assert_eq;
use tabforge_processing::{
    ColumnHealthAnalyzer, DatasetValidator, FeaturePipeline, InferredType, PreprocessingError,
    ProblemType, ProblemTypeClassifier, ProcessingConfig, RecommendedAction, SafeLabelEncoder,
    TextEncoding, UnknownLabelStrategy, ValidationError, decode_text, preprocess_data,
    read_csv_bytes, safe_encode_labels, string_values,
};

// ============================================================================
// Helper Functions
// ============================================================================

fn labels(values: &[&str]) -> Vec<Option<String>> {
    values.iter().map(|v| Some(v.to_string())).collect()
}

fn mixed_table(n: usize) -> DataFrame {
    df! {
        "age" => (0..n).map(|i| 20 + (i * 7) % 45).map(|v| v as i64).collect::<Vec<i64>>(),
        "income" => (0..n).map(|i| if i % 9 == 0 { None } else { Some(30_000.0 + i as f64 * 812.5) }).collect::<Vec<Option<f64>>>(),
        "city" => (0..n).map(|i| ["oslo", "lima", "pune", "kyiv"][i % 4]).collect::<Vec<&str>>(),
        "notes" => (0..n).map(|_| None::<&str>).collect::<Vec<Option<&str>>>(),
        "tier" => (0..n).map(|i| ["gold", "silver", "bronze"][(i * 5) % 3]).collect::<Vec<&str>>(),
    }
    .unwrap()
}

// ============================================================================
// Validation Scenarios
// ============================================================================

#[test]
fn test_null_column_dropped_and_classification_detected() {
    let df = mixed_table(100);
    let validator = DatasetValidator::new(&ProcessingConfig::default());

    let (cleaned, report) = validator.validate_and_clean(&df, Some("tier")).unwrap();

    assert!(report.dropped_columns.contains(&"notes".to_string()));
    assert!(cleaned.column("notes").is_err());
    assert_eq!(
        report.recommended_problem_type,
        Some(ProblemType::Classification)
    );
    assert!(cleaned.height() >= 99);
    assert!(report.is_valid);
    assert_eq!(report.valid_columns, vec!["age", "income", "city"]);
}

#[test]
fn test_continuous_target_detected_as_regression() {
    let n = 60;
    let df = df! {
        "x" => (0..n).map(|i| i as f64).collect::<Vec<f64>>(),
        "y" => (0..n).map(|i| 1.0 + i as f64 * 1.37).collect::<Vec<f64>>(),
    }
    .unwrap();

    let validator = DatasetValidator::new(&ProcessingConfig::default());
    let (_, report) = validator.validate_and_clean(&df, Some("y")).unwrap();
    assert_eq!(report.recommended_problem_type, Some(ProblemType::Regression));
}

#[test]
fn test_missing_target_is_a_validation_error() {
    let validator = DatasetValidator::new(&ProcessingConfig::default());
    let err = validator
        .validate_and_clean(&mixed_table(20), Some("churn"))
        .unwrap_err();
    assert!(matches!(err, ValidationError::TargetNotFound(ref t) if t == "churn"));
}

#[test]
fn test_too_few_rows_after_cleaning() {
    let df = df! {
        "x" => [1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        "y" => [Some("a"), Some("b"), None, Some("a"), Some("b"), Some("a")],
    }
    .unwrap();
    let validator = DatasetValidator::new(&ProcessingConfig::default());
    let err = validator.validate_and_clean(&df, Some("y")).unwrap_err();
    match err {
        ValidationError::InsufficientRows { remaining, minimum, .. } => {
            assert_eq!(remaining, 5);
            assert_eq!(minimum, 10);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_high_null_columns_always_dropped() {
    let analyzer = ColumnHealthAnalyzer::default();
    let mut numeric: Vec<Option<f64>> = vec![None; 100];
    numeric[3] = Some(1.5);
    let mut text: Vec<Option<&str>> = vec![None; 100];
    text[7] = Some("hello");

    for series in [
        Series::new("n".into(), numeric),
        Series::new("t".into(), text),
    ] {
        let health = analyzer.analyze(&series).unwrap();
        assert_eq!(health.recommended_action, RecommendedAction::Drop);
        assert_eq!(health.inferred_type, InferredType::Invalid);
    }
}

#[test]
fn test_few_integral_values_are_classes() {
    let classifier = ProblemTypeClassifier::default();
    for n_unique in [2_i64, 5, 19] {
        let values: Vec<i64> = (0..200).map(|i| i % n_unique).collect();
        let decision = classifier
            .classify(&Series::new("y".into(), values), None)
            .unwrap();
        assert_eq!(decision.problem_type, ProblemType::Classification);
    }
}

// ============================================================================
// Preprocessing
// ============================================================================

#[test]
fn test_small_dataset_split_succeeds() {
    let n = 12;
    let df = df! {
        "x" => (0..n).map(|i| i as f64 * 1.1).collect::<Vec<f64>>(),
        "y" => (0..n).map(|i| 3.0 + i as f64 * 2.25).collect::<Vec<f64>>(),
    }
    .unwrap();

    let prepared = preprocess_data(&df, "y", &ProcessingConfig::default()).unwrap();
    assert!(prepared.metadata.test_samples >= 5);
    assert_eq!(
        prepared.metadata.train_samples + prepared.metadata.test_samples,
        12
    );
}

#[test]
fn test_transform_is_idempotent() {
    let df = mixed_table(80);
    let prepared = preprocess_data(&df, "age", &ProcessingConfig::default()).unwrap();
    let x_test = prepared.split.take(&df).unwrap().1.drop("age").unwrap();

    let first = prepared.pipeline.transform(&x_test).unwrap();
    let second = prepared.pipeline.transform(&x_test).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.ncols(), prepared.feature_names.len());
}

#[test]
fn test_missing_inference_column_is_all_missing() {
    let df = mixed_table(50);
    let prepared = preprocess_data(&df, "tier", &ProcessingConfig::default()).unwrap();

    let partial = df! {
        "age" => [31_i64, 45],
        "income" => [52_000.0, 61_000.0],
    }
    .unwrap();
    let encoded = prepared.pipeline.transform(&partial).unwrap();
    assert_eq!(encoded.dim(), (2, prepared.feature_names.len()));

    let city_columns: Vec<usize> = prepared
        .feature_names
        .iter()
        .enumerate()
        .filter(|(_, name)| name.starts_with("city_"))
        .map(|(i, _)| i)
        .collect();
    // "missing" was never seen during fit, so one-hot emits zeros.
    for j in city_columns {
        assert_eq!(encoded[[0, j]], 0.0);
    }
}

/// Date strings, numeric strings with a few unreadable entries and a
/// plain float column; every feature needs coercion by the validator.
fn raw_table(n: usize) -> DataFrame {
    df! {
        "when" => (0..n).map(|i| format!("2023-{:02}-{:02}", 1 + i % 12, 1 + (i * 7) % 28)).collect::<Vec<String>>(),
        "amount" => (0..n).map(|i| if i % 10 == 3 { "n/a".to_string() } else { format!("{}.5", 10 + i * 3) }).collect::<Vec<String>>(),
        "x" => (0..n).map(|i| ((i * 11) % 17) as f64).collect::<Vec<f64>>(),
        "price" => (0..n).map(|i| 100.0 + i as f64 * 2.5).collect::<Vec<f64>>(),
    }
    .unwrap()
}

#[test]
fn test_raw_inputs_transform_like_cleaned_inputs() {
    let df = raw_table(40);
    let config = ProcessingConfig::default();
    let prepared = preprocess_data(&df, "price", &config).unwrap();
    let routing = prepared.pipeline.routing().unwrap();
    assert_eq!(routing.datetime, vec!["when"]);
    assert!(routing.numeric.contains(&"amount".to_string()));

    let (cleaned, report) = DatasetValidator::new(&config)
        .validate_and_clean(&df, Some("price"))
        .unwrap();
    assert!(report.coerced_columns.contains(&"when".to_string()));
    assert_eq!(cleaned.height(), df.height());

    let from_raw = prepared.pipeline.transform(&df.drop("price").unwrap()).unwrap();
    let from_cleaned = prepared.pipeline.transform(&cleaned.drop("price").unwrap()).unwrap();
    for (i, (raw_row, cleaned_row)) in from_raw.rows().into_iter().zip(from_cleaned.rows()).enumerate() {
        assert_eq!(raw_row.to_vec(), cleaned_row.to_vec(), "row {i}");
    }

    let when = prepared.feature_names.iter().position(|name| name == "when").unwrap();
    let mut distinct: Vec<u64> = from_raw.column(when).iter().map(|v| v.to_bits()).collect();
    distinct.sort_unstable();
    distinct.dedup();
    assert!(distinct.len() > 1);
}

#[test]
fn test_unparseable_dates_at_inference_are_imputed() {
    let df = raw_table(40);
    let prepared = preprocess_data(&df, "price", &ProcessingConfig::default()).unwrap();

    let new = df! {
        "when" => ["2030-01-01", "not a date"],
        "amount" => ["12.5", "40.5"],
        "x" => [1.0, 2.0],
    }
    .unwrap();
    let encoded = prepared.pipeline.transform(&new).unwrap();
    let when = prepared.feature_names.iter().position(|name| name == "when").unwrap();
    let median_row = prepared
        .pipeline
        .transform(&df! { "x" => [1.0] }.unwrap())
        .unwrap();
    assert_eq!(encoded[[1, when]], median_row[[0, when]]);
    assert!(encoded[[0, when]] != encoded[[1, when]]);
}

#[test]
fn test_unusable_features_fail() {
    let n = 30;
    let df = df! {
        "id" => (0..n).map(|i| format!("row-{i}")).collect::<Vec<String>>(),
        "y" => (0..n).map(|i| i as f64 * 0.5).collect::<Vec<f64>>(),
    }
    .unwrap();

    let mut pipeline = FeaturePipeline::default();
    let x = df.select(["id"]).unwrap();
    let err = pipeline.fit(&x, None).unwrap_err();
    assert!(matches!(err, PreprocessingError::NoUsableFeatures { .. }));
}

// ============================================================================
// Label Encoding
// ============================================================================

#[test]
fn test_unseen_label_maps_to_mode() {
    let train = labels(&["A", "B", "A", "C", "A", "B"]);
    let test = labels(&["B", "Z", "A"]);

    let (_, test_codes, encoder, stats) =
        safe_encode_labels(&train, &test, UnknownLabelStrategy::UseMode).unwrap();

    assert_eq!(stats.test.unseen_count, 1);
    assert_eq!(stats.test.unseen_labels, vec!["Z"]);
    assert_eq!(encoder.mode_class(), Some("A"));
    assert_eq!(test_codes, vec![1, 0, 0]);
}

#[test]
fn test_unseen_label_fails_under_error_strategy() {
    let train = labels(&["A", "B"]);
    let test = labels(&["Z"]);
    assert!(safe_encode_labels(&train, &test, UnknownLabelStrategy::Error).is_err());
}

#[test]
fn test_label_roundtrip() {
    let train = labels(&["cat", "dog", "bird", "dog", "cat"]);
    let mut encoder = SafeLabelEncoder::default();
    let (codes, stats) = encoder.fit_transform(&train).unwrap();
    assert_eq!(stats.unseen_count, 0);

    let decoded = encoder.inverse_transform(&codes);
    let original: Vec<String> = train.into_iter().flatten().collect();
    assert_eq!(decoded, original);
}

#[test]
fn test_split_labels_encode_without_unseen_when_stratified() {
    let n = 60;
    let df = df! {
        "x" => (0..n).map(|i| i as f64).collect::<Vec<f64>>(),
        "y" => (0..n).map(|i| ["red", "green", "blue"][i % 3]).collect::<Vec<&str>>(),
    }
    .unwrap();
    let prepared = preprocess_data(&df, "y", &ProcessingConfig::default()).unwrap();
    let train = string_values(&prepared.y_train).unwrap();
    let test = string_values(&prepared.y_test).unwrap();

    let (_, _, _, stats) = safe_encode_labels(&train, &test, UnknownLabelStrategy::UseMode).unwrap();
    assert_eq!(stats.test.unseen_count, 0);
    assert_eq!(stats.encoder.n_classes, 3);
}

// ============================================================================
// CSV Input
// ============================================================================

#[test]
fn test_latin1_csv_is_decoded() {
    let mut bytes = b"name,score\n".to_vec();
    bytes.extend_from_slice(b"caf\xe9,1\nna\xefve,2\n");

    let (_, encoding) = decode_text(&bytes);
    assert_eq!(encoding, TextEncoding::Latin1);

    let df = read_csv_bytes(&bytes).unwrap();
    assert_eq!(df.shape(), (2, 2));
    let names = string_values(df.column("name").unwrap().as_materialized_series()).unwrap();
    assert_eq!(names[0].as_deref(), Some("café"));
}
