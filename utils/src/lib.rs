#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

pub mod diff;
pub mod fs;

/// Round `value` up to the next multiple of `multiple_of`.
///
/// Returns `None` if `multiple_of` is zero or the result overflows.
#[must_use]
pub fn next_multiple(value: u64, multiple_of: u64) -> Option<u64> {
    value.checked_next_multiple_of(multiple_of)
}
