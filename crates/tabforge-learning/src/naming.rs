//! Unique, filesystem-safe model names.

use chrono::{DateTime, Utc};

use crate::collaborators::MetadataStore;
use crate::error::{ModelTrainingError, TabforgeError};

/// Counter suffixes tried after the timestamped name is taken.
pub const MAX_NAME_ATTEMPTS: usize = 100;

/// Replace every character that is not alphanumeric, `_` or `-` with `_`.
///
/// ```
/// use tabforge_learning::naming::sanitize_model_name;
///
/// assert_eq!(sanitize_model_name("price v2 (final)"), "price_v2__final_");
/// ```
pub fn sanitize_model_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Pick a model name the user does not have yet.
///
/// Tries the sanitized base name (default `{model_type}_{target}`), then
/// `{base}_{YYYYmmdd_HHMMSS}`, then that name with `_1` to `_100` appended.
pub fn generate_unique_model_name(
    store: &dyn MetadataStore,
    user_id: &str,
    base_name: Option<&str>,
    model_type: &str,
    target_column: &str,
    now: DateTime<Utc>,
) -> Result<String, TabforgeError> {
    let base = match base_name.filter(|b| !b.trim().is_empty()) {
        Some(name) => sanitize_model_name(name),
        None => sanitize_model_name(&format!("{model_type}_{target_column}")),
    };
    if !store.model_name_exists(user_id, &base)? {
        return Ok(base);
    }

    let stamped = format!("{base}_{}", now.format("%Y%m%d_%H%M%S"));
    if !store.model_name_exists(user_id, &stamped)? {
        tracing::debug!("Model name '{}' taken, using '{}'", base, stamped);
        return Ok(stamped);
    }

    for counter in 1..=MAX_NAME_ATTEMPTS {
        let candidate = format!("{stamped}_{counter}");
        if !store.model_name_exists(user_id, &candidate)? {
            return Ok(candidate);
        }
    }
    Err(ModelTrainingError::NameExhausted {
        base,
        attempts: MAX_NAME_ATTEMPTS,
    }
    .into())
}
