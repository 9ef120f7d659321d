//! Constant imputation followed by capped one-hot encoding.
//!
//! When a column has more distinct values than `max_categories`, the
//! `max_categories - 1` most frequent ones get their own indicator and the
//! rest share a single `{column}_infrequent` indicator. Categories never seen
//! during fit encode as all zeros.

use ndarray::ArrayViewMut2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fitted vocabulary of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneHotColumn {
    pub column: String,
    /// Categories with their own indicator, sorted.
    pub categories: Vec<String>,
    /// Training categories folded into the infrequent indicator, sorted.
    pub infrequent: Vec<String>,
}

impl OneHotColumn {
    fn width(&self) -> usize {
        self.categories.len() + usize::from(!self.infrequent.is_empty())
    }

    fn position(&self, value: &str) -> Option<usize> {
        if let Ok(idx) = self.categories.binary_search_by(|c| c.as_str().cmp(value)) {
            return Some(idx);
        }
        self.infrequent
            .binary_search_by(|c| c.as_str().cmp(value))
            .ok()
            .map(|_| self.categories.len())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    max_categories: usize,
    fill_value: String,
    columns: Vec<OneHotColumn>,
}

impl OneHotEncoder {
    pub fn fit(
        names: &[String],
        columns: &[Vec<Option<String>>],
        max_categories: usize,
        fill_value: &str,
    ) -> Self {
        let columns = names
            .iter()
            .zip(columns)
            .map(|(name, values)| fit_column(name, values, max_categories, fill_value))
            .collect();
        Self {
            max_categories,
            fill_value: fill_value.to_string(),
            columns,
        }
    }

    pub fn columns(&self) -> &[OneHotColumn] {
        &self.columns
    }

    pub fn width(&self) -> usize {
        self.columns.iter().map(OneHotColumn::width).sum()
    }

    pub fn feature_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.width());
        for column in &self.columns {
            for category in &column.categories {
                names.push(format!("{}_{}", column.column, category));
            }
            if !column.infrequent.is_empty() {
                names.push(format!("{}_infrequent", column.column));
            }
        }
        names
    }

    pub fn transform_into(&self, columns: &[Vec<Option<String>>], mut out: ArrayViewMut2<'_, f64>) {
        let mut offset = 0;
        for (column, values) in self.columns.iter().zip(columns) {
            for (i, value) in values.iter().enumerate() {
                let value = value.as_deref().unwrap_or(&self.fill_value);
                if let Some(pos) = column.position(value) {
                    out[[i, offset + pos]] = 1.0;
                }
            }
            offset += column.width();
        }
    }
}

fn fit_column(
    name: &str,
    values: &[Option<String>],
    max_categories: usize,
    fill_value: &str,
) -> OneHotColumn {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values {
        *counts.entry(value.as_deref().unwrap_or(fill_value)).or_default() += 1;
    }

    let mut by_frequency: Vec<(&str, usize)> = counts.into_iter().collect();
    by_frequency.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let keep = if by_frequency.len() > max_categories {
        max_categories.saturating_sub(1)
    } else {
        by_frequency.len()
    };

    let mut categories: Vec<String> = by_frequency[..keep].iter().map(|(c, _)| c.to_string()).collect();
    let mut infrequent: Vec<String> = by_frequency[keep..].iter().map(|(c, _)| c.to_string()).collect();
    categories.sort();
    infrequent.sort();

    OneHotColumn {
        column: name.to_string(),
        categories,
        infrequent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn column(values: &[Option<&str>]) -> Vec<Option<String>> {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn test_missing_values_become_fill_category() {
        let values = column(&[Some("red"), None, Some("blue"), Some("red")]);
        let encoder = OneHotEncoder::fit(&["color".to_string()], &[values.clone()], 100, "missing");
        assert_eq!(
            encoder.feature_names(),
            vec!["color_blue", "color_missing", "color_red"]
        );

        let mut out = Array2::zeros((4, encoder.width()));
        encoder.transform_into(&[values], out.view_mut());
        assert_eq!(out.row(1).to_vec(), vec![0.0, 1.0, 0.0]);
        assert_eq!(out.row(3).to_vec(), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_unknown_category_is_all_zero() {
        let encoder = OneHotEncoder::fit(
            &["c".to_string()],
            &[column(&[Some("a"), Some("b")])],
            100,
            "missing",
        );
        let mut out = Array2::zeros((1, encoder.width()));
        encoder.transform_into(&[column(&[Some("z")])], out.view_mut());
        assert!(out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_cap_groups_rare_categories() {
        let mut values = Vec::new();
        for (category, count) in [("a", 5), ("b", 4), ("c", 3), ("d", 1), ("e", 1)] {
            values.extend(std::iter::repeat_n(Some(category), count));
        }
        let encoder = OneHotEncoder::fit(&["c".to_string()], &[column(&values)], 3, "missing");
        assert_eq!(encoder.feature_names(), vec!["c_a", "c_b", "c_infrequent"]);
        assert_eq!(encoder.columns()[0].infrequent, vec!["c", "d", "e"]);

        let mut out = Array2::zeros((2, encoder.width()));
        encoder.transform_into(&[column(&[Some("d"), Some("new")])], out.view_mut());
        assert_eq!(out.row(0).to_vec(), vec![0.0, 0.0, 1.0]);
        assert_eq!(out.row(1).to_vec(), vec![0.0, 0.0, 0.0]);
    }
}
