//! Grids, interpolation, quadrature and root bracketing.

use crate::error::FitError;

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, FitError> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max > min) {
        return Err(FitError::configuration(format!(
            "Invalid log grid: min={min}, max={max} (must be finite, >0, and max>min)."
        )));
    }
    if steps < 2 {
        return Err(FitError::configuration("Grid steps must be >= 2."));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push((ln_min + step * i as f64).exp());
    }
    Ok(out)
}

/// Generate `steps` evenly spaced points between `min` and `max` (inclusive).
pub fn lin_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, FitError> {
    if !(min.is_finite() && max.is_finite() && max >= min) {
        return Err(FitError::configuration(format!(
            "Invalid grid: min={min}, max={max} (must be finite and max>=min)."
        )));
    }
    if steps < 2 {
        return Err(FitError::configuration("Grid steps must be >= 2."));
    }
    let step = (max - min) / (steps as f64 - 1.0);
    Ok((0..steps).map(|i| min + step * i as f64).collect())
}

/// Linear interpolation of tabulated `(xs, ys)` at `x`.
///
/// `xs` must be sorted ascending. Returns `None` outside `[xs[0], xs[n-1]]`.
pub fn interpolate_linear(xs: &[f64], ys: &[f64], x: f64) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n == 0 || !x.is_finite() || x < xs[0] || x > xs[n - 1] {
        return None;
    }
    if n == 1 {
        return Some(ys[0]);
    }
    let hi = xs[..n].partition_point(|&v| v < x).clamp(1, n - 1);
    let lo = hi - 1;
    let dx = xs[hi] - xs[lo];
    if dx <= 0.0 {
        return Some(ys[lo]);
    }
    let u = (x - xs[lo]) / dx;
    Some(ys[lo] + u * (ys[hi] - ys[lo]))
}

/// Integrate `f(E) dE` over `[e_min, e_max]` (linear TeV) with Simpson's rule in `ln E`.
pub fn integrate_log<F>(f: F, e_min: f64, e_max: f64, intervals: usize) -> f64
where
    F: Fn(f64) -> f64,
{
    if !(e_min > 0.0 && e_max > e_min) {
        return 0.0;
    }
    // Simpson needs an even number of intervals.
    let n = (intervals.max(2) + 1) & !1;
    let u0 = e_min.ln();
    let h = (e_max.ln() - u0) / n as f64;

    let mut sum = 0.0;
    for i in 0..=n {
        let e = (u0 + h * i as f64).exp();
        let w = if i == 0 || i == n {
            1.0
        } else if i % 2 == 1 {
            4.0
        } else {
            2.0
        };
        sum += w * f(e) * e;
    }
    sum * h / 3.0
}

/// Find a root of `f` in `[lo, hi]` by bisection.
///
/// Returns `None` when `f(lo)` and `f(hi)` do not bracket a sign change.
pub fn bisect<F>(mut f: F, mut lo: f64, mut hi: f64, tol: f64, max_iter: usize) -> Option<f64>
where
    F: FnMut(f64) -> f64,
{
    let mut f_lo = f(lo);
    let f_hi = f(hi);
    if !(f_lo.is_finite() && f_hi.is_finite()) || f_lo * f_hi > 0.0 {
        return None;
    }
    if f_lo == 0.0 {
        return Some(lo);
    }
    if f_hi == 0.0 {
        return Some(hi);
    }
    for _ in 0..max_iter {
        let mid = 0.5 * (lo + hi);
        let f_mid = f(mid);
        if f_mid == 0.0 || (hi - lo).abs() < tol {
            return Some(mid);
        }
        if f_lo * f_mid < 0.0 {
            hi = mid;
        } else {
            lo = mid;
            f_lo = f_mid;
        }
    }
    Some(0.5 * (lo + hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_space_includes_endpoints() {
        let v = log_space(0.1, 10.0, 5).unwrap();
        assert!((v[0] - 0.1).abs() < 1e-12);
        assert!((v[v.len() - 1] - 10.0).abs() < 1e-12);
        assert!((v[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn interpolation_is_exact_on_nodes_and_none_outside() {
        let xs = [0.0, 1.0, 2.0];
        let ys = [0.0, 10.0, 30.0];
        assert_eq!(interpolate_linear(&xs, &ys, 1.0), Some(10.0));
        assert!((interpolate_linear(&xs, &ys, 1.5).unwrap() - 20.0).abs() < 1e-12);
        assert_eq!(interpolate_linear(&xs, &ys, 2.5), None);
    }

    #[test]
    fn simpson_integrates_power_law() {
        // ∫_1^10 E^-2 dE = 0.9
        let v = integrate_log(|e| e.powi(-2), 1.0, 10.0, 200);
        assert!((v - 0.9).abs() < 1e-8, "got {v}");
    }

    #[test]
    fn bisect_finds_sqrt_two() {
        let r = bisect(|x| x * x - 2.0, 0.0, 2.0, 1e-12, 200).unwrap();
        assert!((r - 2f64.sqrt()).abs() < 1e-10);
        assert!(bisect(|x| x * x + 1.0, 0.0, 2.0, 1e-12, 200).is_none());
    }
}
