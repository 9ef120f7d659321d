//! Seeded train/test splitting.
//!
//! Small datasets get a larger test proportion so the test partition holds at
//! least `min_test_samples` rows. Classification splits with few classes are
//! stratified; when stratification is impossible the split falls back to a
//! plain shuffle.

use crate::config::SplitConfig;
use crate::error::{PreprocessingError, Result};
use polars::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

/// Row indices of each partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
    /// Test proportion actually used.
    pub test_size: f64,
    pub stratified: bool,
}

impl DataSplit {
    pub fn take(&self, df: &DataFrame) -> PolarsResult<(DataFrame, DataFrame)> {
        Ok((take_rows(df, &self.train)?, take_rows(df, &self.test)?))
    }
}

pub fn take_rows(df: &DataFrame, rows: &[usize]) -> PolarsResult<DataFrame> {
    let idx = IdxCa::from_vec("idx".into(), rows.iter().map(|&i| i as IdxSize).collect());
    df.take(&idx)
}

/// Why a stratified split could not be made.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StratifyError {
    #[error("The least populated class has only {0} member, which is too few")]
    SingletonClass(usize),

    #[error("The test size {test} should be at least the number of classes {classes}")]
    TestTooSmall { test: usize, classes: usize },

    #[error("The train size {train} should be at least the number of classes {classes}")]
    TrainTooSmall { train: usize, classes: usize },
}

/// Raise `test_size` for small datasets so the test partition is not tiny.
pub fn adjust_test_size(n_samples: usize, config: &SplitConfig) -> f64 {
    let requested = config.test_size;
    if n_samples == 0 || n_samples as f64 * requested >= config.min_test_samples as f64 {
        return requested;
    }
    let adjusted = (config.min_test_samples as f64 / n_samples as f64).max(config.min_test_fraction);
    warn!(
        "Adjusted test_size from {} to {:.4} (small dataset: {} rows)",
        requested, adjusted, n_samples
    );
    adjusted
}

/// Number of test rows for a proportion: `ceil(n * test_size)`, keeping at
/// least one row in each partition.
pub fn test_count(n_samples: usize, test_size: f64) -> usize {
    // Absorb float noise such as 5/12 * 12 = 5.000000000000001.
    let raw = (n_samples as f64 * test_size - 1e-9).ceil().max(1.0) as usize;
    raw.min(n_samples.saturating_sub(1))
}

/// Split `n_samples` rows.
///
/// `classes` carries one label per row when the split should be stratified;
/// pass `None` for regression or when there are too many classes.
pub fn train_test_split(
    n_samples: usize,
    classes: Option<&[String]>,
    config: &SplitConfig,
) -> Result<DataSplit> {
    if n_samples < 2 {
        return Err(PreprocessingError::InvalidConfig(format!(
            "cannot split {n_samples} rows into train and test partitions"
        )));
    }
    let test_size = adjust_test_size(n_samples, config);
    let n_test = test_count(n_samples, test_size);
    let mut rng = StdRng::seed_from_u64(config.random_seed);

    if let Some(labels) = classes {
        match stratified_indices(labels, n_test, &mut rng) {
            Ok((train, test)) => {
                info!("Stratified split: {} train, {} test", train.len(), test.len());
                return Ok(DataSplit {
                    train,
                    test,
                    test_size,
                    stratified: true,
                });
            }
            Err(e) => {
                warn!("Split with stratification failed: {}. Retrying without stratification", e);
                // Fresh generator so the fallback matches a plain split.
                rng = StdRng::seed_from_u64(config.random_seed);
            }
        }
    }

    let mut permutation: Vec<usize> = (0..n_samples).collect();
    permutation.shuffle(&mut rng);
    let train = permutation.split_off(n_test);
    info!("Split: {} train, {} test", train.len(), permutation.len());
    Ok(DataSplit {
        train,
        test: permutation,
        test_size,
        stratified: false,
    })
}

fn stratified_indices(
    labels: &[String],
    n_test: usize,
    rng: &mut StdRng,
) -> std::result::Result<(Vec<usize>, Vec<usize>), StratifyError> {
    let mut by_class: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        by_class.entry(label.as_str()).or_default().push(i);
    }

    let n_samples = labels.len();
    let n_classes = by_class.len();
    let n_train = n_samples - n_test;
    if let Some(smallest) = by_class.values().map(Vec::len).min() {
        if smallest < 2 {
            return Err(StratifyError::SingletonClass(smallest));
        }
    }
    if n_test < n_classes {
        return Err(StratifyError::TestTooSmall {
            test: n_test,
            classes: n_classes,
        });
    }
    if n_train < n_classes {
        return Err(StratifyError::TrainTooSmall {
            train: n_train,
            classes: n_classes,
        });
    }

    let counts: Vec<usize> = by_class.values().map(Vec::len).collect();
    let allocation = allocate(&counts, n_test);

    let mut train = Vec::with_capacity(n_train);
    let mut test = Vec::with_capacity(n_test);
    for (mut rows, take) in by_class.into_values().zip(allocation) {
        rows.shuffle(rng);
        test.extend_from_slice(&rows[..take]);
        train.extend_from_slice(&rows[take..]);
    }
    train.shuffle(rng);
    test.shuffle(rng);
    Ok((train, test))
}

/// Distribute `total` draws over classes proportionally, handing leftover
/// draws to the largest remainders.
fn allocate(counts: &[usize], total: usize) -> Vec<usize> {
    let n: usize = counts.iter().sum();
    let exact: Vec<f64> = counts.iter().map(|&c| c as f64 * total as f64 / n as f64).collect();
    let mut allocation: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();

    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.total_cmp(&ra).then(a.cmp(&b))
    });

    let mut remaining = total - allocation.iter().sum::<usize>();
    for &i in order.iter().cycle() {
        if remaining == 0 {
            break;
        }
        if allocation[i] < counts[i] {
            allocation[i] += 1;
            remaining -= 1;
        }
    }
    allocation
}
