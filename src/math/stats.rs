//! Statistical primitives of the on/off Poisson likelihood.
//!
//! Conventions:
//! - `non`, `noff` are observed counts (possibly non-integer after epsilon padding)
//! - `alpha` is the on/off exposure ratio
//! - `s` is the predicted signal in the on region, `b` the background in the off region

use rand::Rng;
use rand_distr::{Distribution, Poisson};

/// Counts at or below this value are treated as zero in `n ln y` terms.
pub const COUNT_EPSILON: f64 = 1e-6;

/// `n ln(y)` with the convention `0 ln 0 = 0`.
pub fn xlogy(n: f64, y: f64) -> f64 {
    if n <= COUNT_EPSILON {
        0.0
    } else {
        n * y.max(f64::MIN_POSITIVE).ln()
    }
}

/// Maximum-likelihood background in the off region for fixed signal `s`.
///
/// Solves `∂ ln L / ∂ b = 0` for
/// `ln L = Non ln(s + α b) + Noff ln b − (α + 1) b − s`:
///
/// ```text
/// a = α (Non + Noff) − (α + 1) s
/// b = [a + sqrt(a² + 4 α (α + 1) Noff s)] / [2 α (α + 1)]
/// ```
///
/// For `a < 0` the numerator cancels; there the equivalent
/// `b = 2 Noff s / [sqrt(a² + 4 α (α + 1) Noff s) − a]` is used.
pub fn profiled_background(non: f64, noff: f64, alpha: f64, s: f64) -> f64 {
    let s = s.max(0.0);
    let k = alpha * (alpha + 1.0);
    let a = alpha * (non + noff) - (alpha + 1.0) * s;
    let root = (a * a + 4.0 * k * noff * s).max(0.0).sqrt();
    let b = if a < 0.0 {
        2.0 * noff * s / (root - a)
    } else {
        (a + root) / (2.0 * k)
    };
    if b.is_finite() { b.max(0.0) } else { 0.0 }
}

/// Negative log-likelihood of one bin for prediction `(s, b)`.
pub fn bin_neg_log_likelihood(non: f64, noff: f64, alpha: f64, s: f64, b: f64) -> f64 {
    -(xlogy(non, s + alpha * b) + xlogy(noff, b) - (alpha + 1.0) * b - s)
}

/// Negative log-likelihood of the saturated model, where `s + α b = Non` and `b = Noff`.
pub fn bin_neg_log_likelihood_null(non: f64, noff: f64) -> f64 {
    -(xlogy(non, non) + xlogy(noff, noff) - non - noff)
}

/// Likelihood-ratio test statistic of an on/off measurement (Li & Ma eq. 17 squared).
///
/// Returns zero for a deficit (`Non ≤ α Noff`).
pub fn on_off_ts(non: f64, noff: f64, alpha: f64) -> f64 {
    if !(alpha > 0.0) || non <= alpha * noff {
        return 0.0;
    }
    let total = non + noff;
    if total <= 0.0 {
        return 0.0;
    }
    let on_term = xlogy(non, (1.0 + alpha) / alpha * non / total);
    let off_term = xlogy(noff, (1.0 + alpha) * noff / total);
    (2.0 * (on_term + off_term)).max(0.0)
}

/// Spectrally weighted mean energy of a bin.
///
/// The bin spans `[log_lo, log_hi]` in log10(E/TeV); the weight is `E^gamma`.
/// Returns `log10 <E>` where `<E> = ∫ E^(γ+1) dE / ∫ E^γ dE`.
pub fn weighted_mean_log_energy(log_lo: f64, log_hi: f64, gamma: f64) -> f64 {
    let e1 = 10f64.powf(log_lo);
    let e2 = 10f64.powf(log_hi);
    let tol = 1e-9;

    let numerator = if (gamma + 2.0).abs() < tol {
        (e2 / e1).ln()
    } else {
        (e2.powf(gamma + 2.0) - e1.powf(gamma + 2.0)) / (gamma + 2.0)
    };
    let denominator = if (gamma + 1.0).abs() < tol {
        (e2 / e1).ln()
    } else {
        (e2.powf(gamma + 1.0) - e1.powf(gamma + 1.0)) / (gamma + 1.0)
    };

    let mean = numerator / denominator;
    if mean.is_finite() && mean > 0.0 {
        mean.log10()
    } else {
        0.5 * (log_lo + log_hi)
    }
}

/// Draw a Poisson variate; non-positive or non-finite means give zero.
pub fn sample_poisson<R: Rng + ?Sized>(rng: &mut R, lambda: f64) -> f64 {
    if !(lambda.is_finite() && lambda > 0.0) {
        return 0.0;
    }
    match Poisson::new(lambda) {
        Ok(dist) => dist.sample(rng),
        Err(_) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn score(non: f64, noff: f64, alpha: f64, s: f64, b: f64) -> f64 {
        non * alpha / (s + alpha * b) + noff / b - (alpha + 1.0)
    }

    #[test]
    fn profiled_background_is_stationary_and_non_negative() {
        let cases = [
            (50.0, 200.0, 0.2, 10.0),
            (30.0, 120.0, 0.2, 0.0),
            (5.0, 1.0, 1.0, 20.0),
            (100.0, 10.0, 0.05, 3.5),
            (0.0, 40.0, 0.3, 2.0),
        ];
        for (non, noff, alpha, s) in cases {
            let b = profiled_background(non, noff, alpha, s);
            assert!(b >= 0.0);
            if b > 0.0 {
                let g = score(non, noff, alpha, s, b);
                assert!(g.abs() < 1e-8, "score {g} for {non} {noff} {alpha} {s}");
            }
        }
    }

    #[test]
    fn profiled_background_is_accurate_for_a_dominant_signal() {
        // a ≈ −1.2e16 while the root's numerator is ≈ 80.
        let (non, noff, alpha, s) = (1e3, 200.0, 0.2, 1e16);
        let b = profiled_background(non, noff, alpha, s);
        let g = score(non, noff, alpha, s, b);
        assert!(g.abs() < 1e-12, "score {g}, b {b}");
        assert!((b - noff / (alpha + 1.0)).abs() < 1e-9 * b);
    }

    #[test]
    fn saturated_prediction_matches_null_likelihood() {
        let (non, noff, alpha) = (50.0, 200.0, 0.2);
        let b = noff;
        let s = non - alpha * b;
        let l = bin_neg_log_likelihood(non, noff, alpha, s, b);
        let l0 = bin_neg_log_likelihood_null(non, noff);
        assert!((l - l0).abs() < 1e-9);
    }

    #[test]
    fn mean_energy_handles_special_indices() {
        for gamma in [-1.0, -2.0, -2.5, 0.0] {
            let m = weighted_mean_log_energy(0.0, 0.2, gamma);
            assert!(m > 0.0 && m < 0.2, "gamma {gamma} gave {m}");
        }
        // Flat weight gives the arithmetic mean.
        let m = weighted_mean_log_energy(0.0, 1.0, 0.0);
        assert!((10f64.powf(m) - 5.5).abs() < 1e-9);
    }

    #[test]
    fn ts_is_zero_for_deficit_and_grows_with_excess() {
        assert_eq!(on_off_ts(10.0, 100.0, 0.2), 0.0);
        let weak = on_off_ts(30.0, 100.0, 0.2);
        let strong = on_off_ts(60.0, 100.0, 0.2);
        assert!(strong > weak && weak > 0.0);
    }

    #[test]
    fn poisson_mean_is_recovered() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 20_000;
        let mean: f64 = (0..n).map(|_| sample_poisson(&mut rng, 4.0)).sum::<f64>() / n as f64;
        assert!((mean - 4.0).abs() < 0.1, "mean {mean}");
        assert_eq!(sample_poisson(&mut rng, 0.0), 0.0);
    }
}
