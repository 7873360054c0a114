//! Result validation against hand-labeled expectations.
//!
//! Validation is order-independent: a result set is valid when every expected
//! id appears somewhere among the found ids. Ranking quality is measured
//! separately by [`crate::metrics`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Verdict for one query's results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether all expected ids were found.
    pub is_valid: bool,
    /// Human-readable explanation; names the missing ids on failure.
    pub message: String,
}

impl ValidationResult {
    fn valid(message: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            message: message.into(),
        }
    }
}

/// Check that `found_ids` contains every id in `expected_ids`.
///
/// Duplicates and ordering in `found_ids` are irrelevant. An empty
/// expectation set is always valid.
pub fn validate_results(found_ids: &[u64], expected_ids: &BTreeSet<u64>) -> ValidationResult {
    if expected_ids.is_empty() {
        return ValidationResult::valid("No expectations to validate");
    }

    let found: HashSet<u64> = found_ids.iter().copied().collect();
    let missing: Vec<u64> = expected_ids
        .iter()
        .copied()
        .filter(|id| !found.contains(id))
        .collect();

    if missing.is_empty() {
        return ValidationResult::valid(format!(
            "All {} expected ids found",
            expected_ids.len()
        ));
    }

    let missing_list = missing
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    ValidationResult {
        is_valid: false,
        message: format!(
            "Missing {} of {} expected ids: [{}]",
            missing.len(),
            expected_ids.len(),
            missing_list
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[u64]) -> BTreeSet<u64> {
        values.iter().copied().collect()
    }

    #[test]
    fn test_empty_expectations_always_valid() {
        assert!(validate_results(&[], &ids(&[])).is_valid);
        assert!(validate_results(&[1, 2, 3], &ids(&[])).is_valid);
    }

    #[test]
    fn test_subset_anywhere_in_results() {
        let result = validate_results(&[170, 34, 187, 99, 110, 137], &ids(&[99]));
        assert!(result.is_valid);
    }

    #[test]
    fn test_missing_ids_are_named() {
        let result = validate_results(&[2, 5, 1, 3], &ids(&[2, 5, 6]));
        assert!(!result.is_valid);
        assert!(result.message.contains("[6]"));
        assert!(!result.message.contains("2,"));
    }

    #[test]
    fn test_empty_results_fail_nonempty_expectations() {
        let result = validate_results(&[], &ids(&[1, 2]));
        assert!(!result.is_valid);
        assert!(result.message.contains("1, 2"));
    }

    #[test]
    fn test_order_and_duplicates_ignored() {
        assert!(validate_results(&[3, 3, 1, 2], &ids(&[1, 2, 3])).is_valid);
    }
}
