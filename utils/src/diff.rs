pub use similar_asserts;

/// Assert equality, showing a labeled diff on failure.
///
/// ```ignore
/// utils::diff::assert_eq!(have: counters, want: expected);
/// ```
#[macro_export]
macro_rules! assert_eq {
    (
        $left_label:ident:
        $left:expr,
        $right_label:ident:
        $right:expr $(,)?
    ) => {{
        $crate::diff::similar_asserts::assert_eq!($left_label: $left, $right_label: $right);
    }};
    (
        $left_label:ident:
        $left:expr,
        $right_label:ident:
        $right:expr,
        $($arg:tt)*
    ) => {{
        $crate::diff::similar_asserts::assert_eq!(
            $left_label: $left, $right_label: $right, $($arg)*);
    }};
}

pub use assert_eq;

#[cfg(test)]
mod tests {
    #[test]
    fn assert_eq_passes_for_equal_values() {
        crate::diff::assert_eq!(have: vec![1.0_f32, 2.0], want: vec![1.0_f32, 2.0]);
    }
}
