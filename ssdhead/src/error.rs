use thiserror::Error;

/// The error type for `ssdhead-burn` operations.
///
/// All construction-time failures surface through this enum; malformed
/// tensors observed in the middle of a training step are treated as
/// preconditions and assert instead.
#[derive(Error, Debug)]
pub enum SsdHeadError {
    /// Error for when the head configuration is logically inconsistent.
    #[error("Invalid head configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// Error for when per-level option lists disagree on the number of levels.
    #[error("Mismatched level counts: {what} has {actual} entries, expected {expected}")]
    MismatchedLevels {
        /// The option list that disagrees.
        what: String,
        /// The expected number of feature levels.
        expected: usize,
        /// The number of entries actually supplied.
        actual: usize,
    },
}

/// A specialized `Result` type for `ssdhead-burn` operations.
pub type SsdHeadResult<T> = Result<T, SsdHeadError>;
