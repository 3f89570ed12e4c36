//! Assertion macros for flash contents and OTA errors.

/// Assert that two byte slices are equal, reporting the first differing
/// offset instead of dumping both buffers.
///
/// ```rust
/// use rbl_ota_test_helpers::assert_bytes_eq;
///
/// assert_bytes_eq!(&[1u8, 2, 3][..], &[1u8, 2, 3][..]);
/// ```
#[macro_export]
macro_rules! assert_bytes_eq {
    ($left:expr, $right:expr $(,)?) => {
        $crate::assert_bytes_eq!($left, $right, "byte buffers differ")
    };
    ($left:expr, $right:expr, $($arg:tt)+) => {{
        let left: &[u8] = $left;
        let right: &[u8] = $right;
        if left.len() != right.len() {
            panic!(
                "assertion failed: length {} != {}: {}",
                left.len(),
                right.len(),
                format_args!($($arg)+)
            );
        }
        if let Some(offset) = left.iter().zip(right).position(|(a, b)| a != b) {
            panic!(
                "assertion failed: first difference at offset {} (0x{:02x} != 0x{:02x}): {}",
                offset,
                left[offset],
                right[offset],
                format_args!($($arg)+)
            );
        }
    }};
}

/// Assert that an expression is an `Err` matching a pattern.
///
/// ```rust
/// use rbl_ota_test_helpers::assert_err_matches;
///
/// let result: Result<(), u32> = Err(5);
/// assert_err_matches!(result, 5);
/// ```
#[macro_export]
macro_rules! assert_err_matches {
    ($result:expr, $pattern:pat $(if $guard:expr)? $(,)?) => {
        match $result {
            Err($pattern) $(if $guard)? => {}
            Err(other) => panic!(
                "assertion failed: error {:?} does not match `{}`",
                other,
                stringify!($pattern)
            ),
            Ok(_) => panic!(
                "assertion failed: expected Err matching `{}`, got Ok",
                stringify!($pattern)
            ),
        }
    };
}
