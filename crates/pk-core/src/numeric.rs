use crate::PkError;

/// Floating point type used for every vector entry and scalar coefficient.
pub type Real = f64;

/// Absolute/relative tolerance pair for approximate comparisons.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tolerances {
    pub abs: Real,
    pub rel: Real,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            abs: 1e-12,
            rel: 1e-9,
        }
    }
}

pub fn nearly_equal(a: Real, b: Real, tol: Tolerances) -> bool {
    let diff = (a - b).abs();
    if diff <= tol.abs {
        return true;
    }
    diff <= tol.rel * a.abs().max(b.abs())
}

pub fn ensure_finite(v: Real, what: &'static str) -> Result<Real, PkError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(PkError::NonFinite { what, value: v })
    }
}

/// Accepts strictly positive, finite values (step sizes, tolerances).
pub fn ensure_positive(v: Real, what: &'static str) -> Result<Real, PkError> {
    let v = ensure_finite(v, what)?;
    if v > 0.0 {
        Ok(v)
    } else {
        Err(PkError::InvalidArg { what })
    }
}

/// Number of entries owned by `rank` when `global` entries are split into
/// contiguous blocks over `size` ranks. The first `global % size` ranks get
/// one extra entry.
pub fn block_len(global: usize, size: usize, rank: usize) -> usize {
    debug_assert!(size > 0 && rank < size);
    global / size + usize::from(rank < global % size)
}

/// Euclidean norm of `values` with its scale: `(max |v|, ||v||)`.
///
/// Accumulated with running rescaling so that large entries do not overflow
/// the sum of squares.
pub fn scaled_norm(values: &[Real]) -> (Real, Real) {
    let mut scale: Real = 0.0;
    let mut ssq: Real = 1.0;
    for &v in values {
        if v != 0.0 {
            let a = v.abs();
            if scale < a {
                ssq = 1.0 + ssq * (scale / a) * (scale / a);
                scale = a;
            } else {
                ssq += (a / scale) * (a / scale);
            }
        }
    }
    let norm = if scale == 0.0 { 0.0 } else { scale * ssq.sqrt() };
    (scale, norm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearly_equal_basic() {
        let tol = Tolerances {
            abs: 1e-12,
            rel: 1e-9,
        };
        assert!(nearly_equal(1.0, 1.0 + 1e-12, tol));
        assert!(nearly_equal(0.0, 1e-13, tol));
        assert!(!nearly_equal(1.0, 1.0 + 1e-6, tol));
    }

    #[test]
    fn ensure_finite_detects_nan() {
        let err = ensure_finite(Real::NAN, "test").unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("Non-finite"));
    }

    #[test]
    fn ensure_positive_rejects_zero() {
        assert!(ensure_positive(0.0, "dt").is_err());
        assert!(ensure_positive(-1.0, "dt").is_err());
        assert!(ensure_positive(Real::INFINITY, "dt").is_err());
        assert_eq!(ensure_positive(0.5, "dt").unwrap(), 0.5);
    }

    #[test]
    fn scaled_norm_survives_huge_entries() {
        assert_eq!(scaled_norm(&[]), (0.0, 0.0));
        assert_eq!(scaled_norm(&[3.0, -4.0]), (4.0, 5.0));
        let (scale, norm) = scaled_norm(&[1e200, 1e200]);
        assert_eq!(scale, 1e200);
        assert!((norm / 1e200 - Real::sqrt(2.0)).abs() < 1e-15);
        let (_, tiny) = scaled_norm(&[1e-200, 1e-200]);
        assert!(tiny > 0.0);
    }

    #[test]
    fn block_len_covers_global() {
        for global in [0_usize, 1, 7, 10, 33] {
            for size in 1..6 {
                let total: usize = (0..size).map(|r| block_len(global, size, r)).sum();
                assert_eq!(total, global);
            }
        }
        assert_eq!(block_len(10, 3, 0), 4);
        assert_eq!(block_len(10, 3, 2), 3);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn blocks_tile_without_gaps(global in 0usize..10_000, size in 1usize..64) {
            let lens: Vec<usize> = (0..size).map(|r| block_len(global, size, r)).collect();
            prop_assert_eq!(lens.iter().sum::<usize>(), global);
            let (min, max) = (lens.iter().min().unwrap(), lens.iter().max().unwrap());
            prop_assert!(max - min <= 1);
            // Larger blocks come first.
            prop_assert!(lens.windows(2).all(|w| w[0] >= w[1]));
        }
    }
}
