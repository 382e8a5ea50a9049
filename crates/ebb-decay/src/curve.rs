//! Fixed-point decay curve and `exp(-x)`.
//!
//! All values are parts-per-billion of [`RATE_PRECISION`]. Intermediates use
//! u128 and checked multiplication.

use ebb_core::constants::{E_INV_PPB, RATE_PRECISION};
use ebb_core::error::DecayError;

/// Beyond this many whole units, `e^-x` is below 1 ppb.
const EXP_CUTOFF: u64 = 21;

/// Saturating decay curve:
/// `rate(d) = min + (max - min) * d / (k + d)`, in ppb.
///
/// `rate(0) = min`, `rate(k) = (min + max) / 2`, and the curve approaches
/// `max` without reaching it.
pub fn saturating_rate_ppb(min_ppb: u64, max_ppb: u64, k: u64, d: u64) -> Result<u64, DecayError> {
    let span = max_ppb.saturating_sub(min_ppb) as u128;
    let denom = (k as u128) + (d as u128);
    if denom == 0 {
        return Ok(min_ppb);
    }
    let ramp = span
        .checked_mul(d as u128)
        .ok_or(DecayError::ArithmeticOverflow)?
        / denom;
    Ok(min_ppb + ramp as u64)
}

/// Fixed-point exponentiation: computes `(base/precision)^exp` in fixed-point.
///
/// Uses binary exponentiation for O(log n) multiplications.
pub fn fixed_pow(base: u64, exp: u64, precision: u64) -> Result<u64, DecayError> {
    if exp == 0 {
        return Ok(precision);
    }

    let p = precision as u128;
    let mut result: u128 = p;
    let mut b: u128 = base as u128;
    let mut e = exp;

    while e > 0 {
        if e & 1 == 1 {
            result = result
                .checked_mul(b)
                .ok_or(DecayError::ArithmeticOverflow)?
                / p;
        }
        e >>= 1;
        if e > 0 {
            b = b.checked_mul(b).ok_or(DecayError::ArithmeticOverflow)? / p;
        }
    }

    Ok(result as u64)
}

/// `e^(-x) * RATE_PRECISION` for `x = x_ppb / RATE_PRECISION`.
///
/// Splits `x` into integer and fractional parts: the fractional part uses a
/// Taylor series (alternating terms, converges in under 20 steps for
/// `frac < 1`), the integer part uses `(1/e)^n` by binary exponentiation.
/// Never exceeds `RATE_PRECISION`.
pub fn exp_neg_ppb(x_ppb: u64) -> Result<u64, DecayError> {
    let p = RATE_PRECISION as u128;
    let whole = x_ppb / RATE_PRECISION;
    if whole >= EXP_CUTOFF {
        return Ok(0);
    }
    let frac = (x_ppb % RATE_PRECISION) as u128;

    let mut sum: i128 = p as i128;
    let mut term: u128 = p;
    let mut n: u128 = 1;
    while term > 0 {
        term = term * frac / (n * p);
        if n % 2 == 1 {
            sum -= term as i128;
        } else {
            sum += term as i128;
        }
        n += 1;
    }
    let frac_part = sum.clamp(0, p as i128) as u128;

    let whole_part = fixed_pow(E_INV_PPB, whole, RATE_PRECISION)? as u128;
    let value = frac_part
        .checked_mul(whole_part)
        .ok_or(DecayError::ArithmeticOverflow)?
        / p;
    Ok(value.min(p) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn approx(ppb: u64, expected: f64, tol_ppb: u64) -> bool {
        let exact = (expected * RATE_PRECISION as f64).round() as i128;
        (ppb as i128 - exact).unsigned_abs() <= tol_ppb as u128
    }

    #[test]
    fn curve_endpoints() {
        assert_eq!(saturating_rate_ppb(1_000, 3_000, 10, 0).unwrap(), 1_000);
        assert_eq!(saturating_rate_ppb(1_000, 3_000, 10, 10).unwrap(), 2_000);
        let far = saturating_rate_ppb(1_000, 3_000, 10, 1_000_000).unwrap();
        assert!(far < 3_000 && far > 2_990);
    }

    #[test]
    fn curve_handles_extreme_inactivity() {
        let r = saturating_rate_ppb(1_000_000, 20_000_000, 30, u64::MAX).unwrap();
        assert!(r <= 20_000_000);
    }

    #[test]
    fn fixed_pow_basics() {
        assert_eq!(fixed_pow(500_000_000, 0, RATE_PRECISION).unwrap(), RATE_PRECISION);
        assert_eq!(fixed_pow(500_000_000, 1, RATE_PRECISION).unwrap(), 500_000_000);
        assert_eq!(fixed_pow(500_000_000, 2, RATE_PRECISION).unwrap(), 250_000_000);
        assert_eq!(fixed_pow(RATE_PRECISION, 1_000, RATE_PRECISION).unwrap(), RATE_PRECISION);
    }

    #[test]
    fn exp_neg_reference_values() {
        assert_eq!(exp_neg_ppb(0).unwrap(), RATE_PRECISION);
        assert!(approx(exp_neg_ppb(RATE_PRECISION).unwrap(), (-1.0f64).exp(), 2));
        assert!(approx(exp_neg_ppb(RATE_PRECISION / 2).unwrap(), (-0.5f64).exp(), 2));
        assert!(approx(exp_neg_ppb(20_000_000).unwrap(), (-0.02f64).exp(), 2));
        assert!(approx(exp_neg_ppb(2_500_000_000).unwrap(), (-2.5f64).exp(), 4));
    }

    #[test]
    fn exp_neg_underflows_to_zero() {
        assert_eq!(exp_neg_ppb(EXP_CUTOFF * RATE_PRECISION).unwrap(), 0);
        assert_eq!(exp_neg_ppb(u64::MAX).unwrap(), 0);
    }

    proptest! {
        #[test]
        fn exp_neg_within_unit(x in 0u64..30_000_000_000) {
            let v = exp_neg_ppb(x).unwrap();
            prop_assert!(v <= RATE_PRECISION);
        }

        #[test]
        fn exp_neg_tracks_float(x in 0u64..5_000_000_000) {
            let v = exp_neg_ppb(x).unwrap();
            let expected = (-(x as f64) / RATE_PRECISION as f64).exp();
            prop_assert!(approx(v, expected, 8), "x={} v={} expected={}", x, v, expected);
        }

        #[test]
        fn curve_stays_in_bounds(d in any::<u64>(), k in 1u64..1_000) {
            let r = saturating_rate_ppb(1_000_000, 20_000_000, k, d).unwrap();
            prop_assert!((1_000_000..=20_000_000).contains(&r));
        }

        #[test]
        fn curve_non_decreasing(d in 0u64..1_000_000) {
            let a = saturating_rate_ppb(1_000_000, 20_000_000, 30, d).unwrap();
            let b = saturating_rate_ppb(1_000_000, 20_000_000, 30, d + 1).unwrap();
            prop_assert!(b >= a);
        }
    }
}
