use std::ops::{Bound, RangeBounds};
use crate::error::{RhiError, RhiResult};

/// Checks a programming-error condition and evaluates to it.
///
/// A failed check is logged and trips `debug_assert!`; release builds keep only the log line,
/// so callers must still guard the code that follows.
macro_rules! verify {
    ($cond:expr $(,)?) => {
        $crate::utility::verify!($cond, "verification failed: {}", stringify!($cond))
    };
    ($cond:expr, $($arg:tt)+) => {{
        let passed: bool = $cond;
        if !passed {
            keel_core::log::error!($($arg)+);
            debug_assert!(passed, $($arg)+);
        }
        passed
    }};
}

pub(crate) use verify;

macro_rules! normalize_range_function {
    ($unsigned:ty) => {
        $crate::paste! {
            /// Resolve `bounds` against `size` into `(offset, length)`.
            pub(crate) fn [<normalize_range_ $unsigned>]<R: RangeBounds<$unsigned>>(
                bounds: R,
                size: $unsigned,
            ) -> RhiResult<($unsigned, $unsigned)> {
                let start = match bounds.start_bound() {
                    Bound::Included(&v) => v,
                    Bound::Excluded(&v) => v.checked_add(1).ok_or_else(|| RhiError::out_of_range("range start overflows"))?,
                    Bound::Unbounded => 0,
                };
                let end_exclusive = match bounds.end_bound() {
                    Bound::Included(&v) => v.checked_add(1).ok_or_else(|| RhiError::out_of_range("range end overflows"))?,
                    Bound::Excluded(&v) => v,
                    Bound::Unbounded => size,
                };

                if start > end_exclusive {
                    return Err(RhiError::out_of_range(format!("range {start}..{end_exclusive} is reversed")));
                }
                if end_exclusive > size {
                    return Err(RhiError::out_of_range(format!(
                        "range {start}..{end_exclusive} exceeds size {size}"
                    )));
                }

                Ok((start, end_exclusive - start))
            }
        }
    };
}

normalize_range_function!(u64);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn normalizes_bounded_and_open_ranges() {
        assert_eq!(normalize_range_u64(16..48, 64).unwrap(), (16, 32));
        assert_eq!(normalize_range_u64(.., 64).unwrap(), (0, 64));
        assert_eq!(normalize_range_u64(60.., 64).unwrap(), (60, 4));
        assert_eq!(normalize_range_u64(0..=3, 8).unwrap(), (0, 4));
    }

    #[test]
    fn rejects_ranges_past_the_end() {
        let err = normalize_range_u64(32..65, 64).unwrap_err();
        assert_eq!(err.code, ErrorCode::ArgumentOutOfRange);
    }

    #[test]
    fn verify_passes_through_true() {
        assert!(verify!(1 + 1 == 2));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "verification failed")]
    fn verify_panics_in_debug() {
        verify!(1 + 1 == 3);
    }
}
