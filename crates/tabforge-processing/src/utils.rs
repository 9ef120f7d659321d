//! Shared utilities: dtype checks, value extraction, fallible numeric and
//! datetime conversion, and CSV decoding.

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use regex::Regex;
use std::collections::HashSet;
use std::io::Cursor;
use tracing::debug;

// =============================================================================
// Data Type Utilities
// =============================================================================

/// Check if a DataType is numeric (integer or float).
#[inline]
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Check if a DataType is a datetime type.
#[inline]
pub fn is_datetime_dtype(dtype: &DataType) -> bool {
    matches!(dtype, DataType::Datetime(_, _) | DataType::Date)
}

/// Check if a DataType is an integer type.
#[inline]
pub fn is_integer_dtype(dtype: &DataType) -> bool {
    is_numeric_dtype(dtype) && !matches!(dtype, DataType::Float32 | DataType::Float64)
}

// =============================================================================
// Value Extraction
// =============================================================================

/// Render every value of a series as an optional string.
///
/// Nulls stay `None`. Empty strings and float `NaN` are treated as missing.
pub fn string_values(series: &Series) -> PolarsResult<Vec<Option<String>>> {
    let is_float = matches!(series.dtype(), DataType::Float32 | DataType::Float64);
    let as_str = series.cast(&DataType::String)?;
    let values = as_str
        .str()?
        .into_iter()
        .map(|v| {
            v.filter(|s| !s.trim().is_empty() && !(is_float && *s == "NaN"))
                .map(str::to_string)
        })
        .collect();
    Ok(values)
}

/// Number of distinct non-null values.
pub fn count_unique<T: AsRef<str>>(values: &[Option<T>]) -> usize {
    values
        .iter()
        .flatten()
        .map(AsRef::as_ref)
        .collect::<HashSet<&str>>()
        .len()
}

/// Sort labels numerically when every one parses as a number, lexically
/// otherwise.
pub fn sort_natural(values: &mut [String]) {
    let numbers: Option<Vec<f64>> = values.iter().map(|v| parse_number(v).ok()).collect();
    match numbers {
        Some(numbers) => {
            let mut keyed: Vec<(f64, String)> = numbers.into_iter().zip(values.iter().cloned()).collect();
            keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
            for (slot, (_, value)) in values.iter_mut().zip(keyed) {
                *slot = value;
            }
        }
        None => values.sort(),
    }
}

/// First `n` non-null values.
pub fn collect_sample_values(values: &[Option<String>], n: usize) -> Vec<String> {
    values.iter().flatten().take(n).cloned().collect()
}

// =============================================================================
// Numeric Conversion
// =============================================================================

/// Why a value could not be read as a number.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionFailure {
    pub value: String,
    pub reason: &'static str,
}

/// Parse one value as a finite number.
///
/// Only plain numeric literals are accepted; formatted values such as
/// `"$1,200"` fail. `NaN` and infinities count as failures.
pub fn parse_number(s: &str) -> Result<f64, ConversionFailure> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(ConversionFailure {
            value: s.to_string(),
            reason: "empty value",
        });
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        Ok(_) => Err(ConversionFailure {
            value: s.to_string(),
            reason: "not a finite number",
        }),
        Err(_) => Err(ConversionFailure {
            value: s.to_string(),
            reason: "not a numeric literal",
        }),
    }
}

/// Result of converting a whole column to numbers.
///
/// Per-value failures become `None` in [`values`](Self::values) and are
/// counted rather than raised.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericConversion {
    pub values: Vec<Option<f64>>,
    /// Non-null inputs.
    pub non_null: usize,
    /// Non-null inputs that converted.
    pub converted: usize,
}

impl NumericConversion {
    /// Share of non-null inputs that converted (0.0 for an empty column).
    pub fn rate(&self) -> f64 {
        if self.non_null == 0 {
            0.0
        } else {
            self.converted as f64 / self.non_null as f64
        }
    }

    /// Converted values, nulls skipped.
    pub fn present(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().flatten().copied()
    }

    pub fn is_integral(&self) -> bool {
        all_integral(self.present())
    }

    /// Distinct converted values.
    pub fn unique_count(&self) -> usize {
        self.present()
            .map(|v| if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() })
            .collect::<HashSet<u64>>()
            .len()
    }
}

/// Convert a series to numbers, turning unparseable values into nulls.
pub fn to_numeric(series: &Series) -> PolarsResult<NumericConversion> {
    let dtype = series.dtype();
    let (values, non_null): (Vec<Option<f64>>, usize) =
        if is_numeric_dtype(dtype) || matches!(dtype, DataType::Boolean) {
            let cast = series.cast(&DataType::Float64)?;
            let values: Vec<Option<f64>> = cast
                .f64()?
                .into_iter()
                .map(|v| v.filter(|x| x.is_finite()))
                .collect();
            let present = values.iter().flatten().count();
            (values, present)
        } else if is_datetime_dtype(dtype) {
            let cast = series.cast(&DataType::Int64)?.cast(&DataType::Float64)?;
            let values: Vec<Option<f64>> = cast.f64()?.into_iter().collect();
            let present = values.iter().flatten().count();
            (values, present)
        } else {
            let raw = string_values(series)?;
            let non_null = raw.iter().flatten().count();
            let values = raw
                .into_iter()
                .map(|v| v.and_then(|s| parse_number(&s).ok()))
                .collect();
            (values, non_null)
        };

    let converted = values.iter().flatten().count();
    Ok(NumericConversion {
        values,
        non_null,
        converted,
    })
}

/// Whether every value is (numerically) an integer.
///
/// Uses the same tolerance as an `allclose` comparison against the
/// truncated value.
pub fn all_integral(values: impl IntoIterator<Item = f64>) -> bool {
    values.into_iter().all(|v| {
        let truncated = v.trunc();
        (v - truncated).abs() <= 1e-8 + 1e-5 * truncated.abs()
    })
}

// =============================================================================
// Datetime Parsing
// =============================================================================

static DATE_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{1,4}[-/.]\d{1,2}[-/.]\d{1,4}([ T]\d{1,2}:\d{2}(:\d{2}(\.\d+)?)?)?(Z|[+-]\d{2}:?\d{2})?$")
        .expect("static regex")
});

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d-%m-%Y", "%d.%m.%Y"];

/// Parse a date or datetime string.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let trimmed = s.trim();
    if !DATE_SHAPE.is_match(trimmed) {
        return None;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Whether every non-null value parses as a datetime.
pub fn all_datetimes(values: &[Option<String>]) -> bool {
    let mut seen = false;
    for value in values.iter().flatten() {
        if parse_datetime(value).is_none() {
            return false;
        }
        seen = true;
    }
    seen
}

// =============================================================================
// CSV Decoding
// =============================================================================

/// Text encodings tried, in order, when decoding raw table bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
    Iso8859_1,
}

impl TextEncoding {
    pub const FALLBACK_CHAIN: [TextEncoding; 3] =
        [TextEncoding::Utf8, TextEncoding::Latin1, TextEncoding::Iso8859_1];

    fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            TextEncoding::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_string),
            // Every byte maps to the code point of the same value.
            TextEncoding::Latin1 | TextEncoding::Iso8859_1 => {
                Some(bytes.iter().map(|&b| b as char).collect())
            }
        }
    }
}

/// Decode bytes with the first encoding in the fallback chain that succeeds.
pub fn decode_text(bytes: &[u8]) -> (String, TextEncoding) {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    for encoding in TextEncoding::FALLBACK_CHAIN {
        if let Some(text) = encoding.decode(bytes) {
            return (text, encoding);
        }
        debug!("Decoding as {:?} failed, trying next encoding", encoding);
    }
    // Latin-1 accepts every byte sequence.
    (String::new(), TextEncoding::Iso8859_1)
}

/// Parse CSV-like bytes into a DataFrame.
pub fn read_csv_bytes(bytes: &[u8]) -> PolarsResult<DataFrame> {
    let (text, encoding) = decode_text(bytes);
    debug!("Decoded {} bytes as {:?}", bytes.len(), encoding);
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .into_reader_with_file_handle(Cursor::new(text.into_bytes()))
        .finish()
}
