//! Strongly-typed domain values for the ingest pipeline
//!
//! Newtypes over the raw configuration primitives keep validation at the
//! boundary: a `WorkerCount` is always in range, a `MaxBatchSize` is always
//! normalized, a `DeployName` is never blank.

use nutype::nutype;

/// Deployment identifier handed to the route registry.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 128),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Display,
        Serialize,
        Deserialize,
        TryFrom,
        Into
    )
)]
pub struct DeployName(String);

/// Number of router scavenger workers.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 256),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 3
)]
pub struct WorkerCount(usize);

impl WorkerCount {
    /// Gets the value as usize for sizing the worker pool.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }

    /// Resolves a raw configured thread count.
    ///
    /// Missing, zero, or negative values fall back to the default of 3;
    /// oversized values are clamped to the upper bound.
    #[must_use]
    pub fn from_config(raw: Option<i64>) -> Self {
        match raw {
            Some(n) if n > 0 => {
                Self::try_new(usize::try_from(n).unwrap_or(256).min(256)).unwrap_or_default()
            }
            _ => Self::default(),
        }
    }
}

/// Upper bound on the number of records handed to a transformer in one call.
///
/// Zero means "no batching": whole sequences pass through in a single call.
#[nutype(
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        From,
        Into
    ),
    default = 0
)]
pub struct MaxBatchSize(usize);

impl MaxBatchSize {
    /// Gets the value as usize.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }

    /// Normalizes a raw configured batch size; anything at or below zero
    /// disables batching.
    #[must_use]
    pub fn clamped(raw: i64) -> Self {
        Self::new(usize::try_from(raw).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_defaults_when_unset_or_non_positive() {
        assert_eq!(WorkerCount::from_config(None).as_usize(), 3);
        assert_eq!(WorkerCount::from_config(Some(0)).as_usize(), 3);
        assert_eq!(WorkerCount::from_config(Some(-4)).as_usize(), 3);
        assert_eq!(WorkerCount::from_config(Some(8)).as_usize(), 8);
    }

    #[test]
    fn batch_size_clamps_negatives_to_zero() {
        assert_eq!(MaxBatchSize::clamped(-1).as_usize(), 0);
        assert_eq!(MaxBatchSize::clamped(0).as_usize(), 0);
        assert_eq!(MaxBatchSize::clamped(5).as_usize(), 5);
    }

    #[test]
    fn deploy_name_rejects_blank() {
        assert!(DeployName::try_new("  ".to_string()).is_err());
        assert!(DeployName::try_new("edge-fleet".to_string()).is_ok());
    }
}
