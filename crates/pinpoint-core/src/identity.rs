//! Serial-number comparison.

use crate::types::TargetIdentity;

/// Whether a value read from the identity characteristic names the target.
///
/// Exact, case-sensitive equality with no trimming or normalization.
#[must_use]
pub fn matches(read_value: &str, target: &TargetIdentity) -> bool {
    read_value == target.as_str()
}
