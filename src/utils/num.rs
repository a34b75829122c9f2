//! Centralized integer conversions.
//!
//! Fallible helpers return `Option` where an out-of-range value should stop the
//! operation; saturating helpers are for counters and timings.

#[inline]
#[must_use]
pub fn u64_to_usize(v: u64) -> Option<usize> {
    usize::try_from(v).ok()
}

#[inline]
#[must_use]
pub fn i64_to_usize(v: i64) -> Option<usize> {
    usize::try_from(v).ok()
}

#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn usize_to_u64(v: usize) -> u64 {
    v as u64
}

#[inline]
#[must_use]
pub fn u128_to_u64_saturating(v: u128) -> u64 {
    u64::try_from(v).unwrap_or(u64::MAX)
}

/// Integral `f64` to `i64`; `None` for fractions, non-finite or out-of-range values.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn f64_to_i64_exact(v: f64) -> Option<i64> {
    if !v.is_finite() || v.fract() != 0.0 || v < i64::MIN as f64 || v >= i64::MAX as f64 {
        return None;
    }
    Some(v as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_to_usize_rejects_negatives() {
        assert_eq!(i64_to_usize(-1), None);
        assert_eq!(i64_to_usize(0), Some(0));
        assert_eq!(i64_to_usize(42), Some(42));
    }

    #[test]
    fn u64_to_usize_matches_std_try_from() {
        for &v in &[0u64, 1, 42, u64::from(u32::MAX) + 1] {
            assert_eq!(u64_to_usize(v), usize::try_from(v).ok());
        }
    }

    #[test]
    fn u128_to_u64_saturating_edges() {
        assert_eq!(u128_to_u64_saturating(0), 0);
        assert_eq!(u128_to_u64_saturating(u128::from(u64::MAX)), u64::MAX);
        assert_eq!(u128_to_u64_saturating(u128::MAX), u64::MAX);
        assert_eq!(usize_to_u64(10_000), 10_000);
    }

    #[test]
    fn exact_float_conversion() {
        assert_eq!(f64_to_i64_exact(4.0), Some(4));
        assert_eq!(f64_to_i64_exact(-3.0), Some(-3));
        assert_eq!(f64_to_i64_exact(2.5), None);
        assert_eq!(f64_to_i64_exact(f64::NAN), None);
        assert_eq!(f64_to_i64_exact(1e300), None);
    }
}
