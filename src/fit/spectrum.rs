//! Binned flux points and profile-likelihood scans.
//!
//! Flux points: in each energy bin the spectral shape is held at the best fit
//! and only a scale factor `k` on the normalization is refitted. The point is
//! `k · dN/dE(E_centre)` with asymmetric errors where `−ln L` rises by 0.5.
//! Bins with a low on/off test statistic become upper limits.
//!
//! Profiles hold one or two parameters fixed and re-minimize the rest.

use log::{debug, warn};

use crate::domain::{FitResult, FitStatus, LikelihoodContour, ParameterInterval, ProfilePoint, SpectralPoint};
use crate::error::FitError;
use crate::fit::{FitEngine, Window};
use crate::math::{bisect, lin_space, on_off_ts};
use crate::models::{DEFAULT_NORM, SpectralModel};

/// Largest normalization scale factor tried in per-bin fits.
const MAX_SCALE: f64 = 1e6;

/// Largest contour radius searched, in units of the parameter errors.
const MAX_CONTOUR_RADIUS: f64 = 1e6;

/// Result of a normalization-only fit.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScaleFit {
    pub scale: f64,
    /// Normalization the scale applies to.
    pub base_norm: f64,
    pub cost: f64,
    pub status: FitStatus,
}

impl FitEngine {
    /// Flux points for the current (best-fit) model.
    pub fn spectral_points(&self) -> Result<Vec<SpectralPoint>, FitError> {
        let model = self.require_model()?.clone();
        self.energy_spectrum(&model)
    }

    /// Flux points with the shape of `best_fit` held fixed.
    pub fn energy_spectrum(&self, best_fit: &SpectralModel) -> Result<Vec<SpectralPoint>, FitError> {
        self.require_active_runs()?;
        let binning = *self.binning();
        let (e_min, e_max) = self.energy_range();
        let ts_threshold = self.config().spectral_point_ts_threshold;
        let ul_delta = 0.5 * self.config().upper_limit_delta;
        let tol = 1e-9;

        let mut points = Vec::new();
        for j in 0..binning.n_bins() {
            let lower = binning.lower_edge(j);
            if lower < e_min - tol || lower >= e_max - tol {
                continue;
            }
            let window = Window::Bin(j);
            let (non, noff, alpha) = self.summed_counts(window);
            if non <= 0.0 && noff <= 0.0 {
                debug!("bin {j}: no active run covers it, skipped");
                continue;
            }
            let ts = on_off_ts(non, noff, alpha);

            let fit = fit_norm_scale(self, best_fit, window)?;
            let cost = |k: f64| scaled_cost(self, best_fit, &fit, k, window);
            let energy = 10f64.powf(binning.centre(j));
            let reference = fit.base_norm_flux(best_fit, energy);

            let point = if ts < ts_threshold || !fit.status.is_ok() {
                let k_ul = crossing_above(&cost, fit.scale, fit.cost + ul_delta).unwrap_or(MAX_SCALE);
                SpectralPoint {
                    energy,
                    energy_min: 10f64.powf(lower),
                    energy_max: 10f64.powf(binning.upper_edge(j)),
                    flux: k_ul * reference,
                    flux_err_low: 0.0,
                    flux_err_high: 0.0,
                    ts,
                    is_upper_limit: true,
                    neg_log_likelihood: fit.cost,
                    status: fit.status,
                }
            } else {
                let target = fit.cost + 0.5;
                let k_lo = crossing_below(&cost, fit.scale, target);
                let k_hi = crossing_above(&cost, fit.scale, target).unwrap_or(MAX_SCALE);
                SpectralPoint {
                    energy,
                    energy_min: 10f64.powf(lower),
                    energy_max: 10f64.powf(binning.upper_edge(j)),
                    flux: fit.scale * reference,
                    flux_err_low: (fit.scale - k_lo).max(0.0) * reference,
                    flux_err_high: (k_hi - fit.scale).max(0.0) * reference,
                    ts,
                    is_upper_limit: false,
                    neg_log_likelihood: fit.cost,
                    status: fit.status,
                }
            };
            debug!(
                "bin {j}: E = {energy:.3} TeV, flux = {:.3e}, ts = {ts:.2}, ul = {}",
                point.flux, point.is_upper_limit
            );
            points.push(point);
        }
        Ok(points)
    }

    /// Δ(−2 ln L) versus parameter `index` on `n_steps` points in `[min, max]`,
    /// re-minimizing all other free parameters at each step.
    pub fn profile_likelihood(
        &self,
        index: usize,
        min: f64,
        max: f64,
        n_steps: usize,
    ) -> Result<Vec<ProfilePoint>, FitError> {
        let best_cost = self.require_fit()?.neg_log_likelihood;
        let model = self.require_model()?.clone();
        check_profiled_parameter(&model, index)?;
        if !(min.is_finite() && max.is_finite() && min < max) {
            return Err(FitError::configuration(format!(
                "Invalid profile range [{min}, {max}]."
            )));
        }
        let values = lin_space(min, max, n_steps)?;
        values
            .into_iter()
            .map(|v| {
                let (cost, status) = self.profile_cost(&model, &[(index, v)])?;
                Ok(ProfilePoint {
                    value: v,
                    delta_two_log_l: 2.0 * (cost - best_cost),
                    status,
                })
            })
            .collect()
    }

    /// Interval of parameter `index` where Δ(−2 ln L) stays below `delta`
    /// (1.0 for 68% two-sided). Ends are clamped to the parameter bounds.
    pub fn parameter_interval(&self, index: usize, delta: f64) -> Result<ParameterInterval, FitError> {
        let fit = self.require_fit()?.clone();
        let model = self.require_model()?.clone();
        check_profiled_parameter(&model, index)?;
        if !(delta.is_finite() && delta > 0.0) {
            return Err(FitError::configuration(format!("Interval delta must be > 0, got {delta}.")));
        }
        let spec = model.parameter_specs()[index];
        let best = fit.parameters[index];
        let step0 = initial_step(&fit, index);

        let excess = |v: f64| -> f64 {
            match self.profile_cost(&model, &[(index, v)]) {
                Ok((cost, _)) => 2.0 * (cost - fit.neg_log_likelihood) - delta,
                Err(e) => {
                    warn!("profile evaluation failed at {v}: {e}");
                    f64::NAN
                }
            }
        };

        let lower = interval_end(&excess, best, -step0, spec.lower);
        let upper = interval_end(&excess, best, step0, spec.upper);
        Ok(ParameterInterval { best, lower, upper })
    }

    /// Contour of parameters `x_index` and `y_index` at Δ(−2 ln L) = `level`
    /// (2.30 for 68% with two parameters), other free parameters profiled.
    ///
    /// Points are found on `n_points` rays from the best fit, spaced evenly in
    /// angle after scaling each axis by its parameter error. A ray that leaves
    /// the parameter bounds before reaching `level` ends on the bound.
    pub fn likelihood_contour(
        &self,
        x_index: usize,
        y_index: usize,
        level: f64,
        n_points: usize,
    ) -> Result<LikelihoodContour, FitError> {
        let fit = self.require_fit()?.clone();
        let model = self.require_model()?.clone();
        check_profiled_parameter(&model, x_index)?;
        check_profiled_parameter(&model, y_index)?;
        if x_index == y_index {
            return Err(FitError::configuration(format!(
                "Contour needs two different parameters, got {x_index} twice."
            )));
        }
        if !(level.is_finite() && level > 0.0) {
            return Err(FitError::configuration(format!("Contour level must be > 0, got {level}.")));
        }
        if n_points < 4 {
            return Err(FitError::configuration("A contour needs at least 4 points."));
        }

        let specs = model.parameter_specs();
        let best = (fit.parameters[x_index], fit.parameters[y_index]);
        let step = (initial_step(&fit, x_index), initial_step(&fit, y_index));
        let x_bounds = (specs[x_index].lower, specs[x_index].upper);
        let y_bounds = (specs[y_index].lower, specs[y_index].upper);

        let mut points = Vec::with_capacity(n_points);
        for k in 0..n_points {
            let theta = std::f64::consts::TAU * k as f64 / n_points as f64;
            let dir = (step.0 * theta.cos(), step.1 * theta.sin());
            let at = |t: f64| (best.0 + t * dir.0, best.1 + t * dir.1);
            let t_max = ray_limit(best.0, dir.0, x_bounds)
                .min(ray_limit(best.1, dir.1, y_bounds))
                .min(MAX_CONTOUR_RADIUS);
            let excess = |t: f64| -> f64 {
                let (x, y) = at(t);
                match self.profile_cost(&model, &[(x_index, x), (y_index, y)]) {
                    Ok((cost, _)) => 2.0 * (cost - fit.neg_log_likelihood) - level,
                    Err(e) => {
                        warn!("contour evaluation failed at ({x}, {y}): {e}");
                        f64::NAN
                    }
                }
            };
            points.push(at(interval_end(&excess, 0.0, 1.0, t_max)));
        }
        debug!(
            "contour of {} and {} at {level}: {} points",
            specs[x_index].name,
            specs[y_index].name,
            points.len()
        );
        Ok(LikelihoodContour {
            x_index,
            y_index,
            level,
            best,
            points,
        })
    }

    /// Minimum joint `−ln L` with the given `(index, value)` pairs held fixed.
    fn profile_cost(&self, model: &SpectralModel, held: &[(usize, f64)]) -> Result<(f64, FitStatus), FitError> {
        let mut fixed = model.clone();
        for &(index, value) in held {
            fixed.fix_parameter(index, Some(value))?;
        }
        if fixed.n_free() == 0 {
            let cost = self.joint_cost(&fixed, fixed.parameters(), Window::Fit);
            return Ok((cost, FitStatus::Converged));
        }
        let objective = |free: &[f64]| -> Result<f64, FitError> {
            let full = fixed.expand_free(free)?;
            Ok(self.joint_cost(&fixed, &full, Window::Fit))
        };
        let out = self
            .minimizer()
            .minimize(&objective, &fixed.free_parameters(), &fixed.free_bounds())?;
        Ok((out.value, out.status))
    }

    /// Summed on/off counts over active runs in `window`, with the live-time
    /// weighted mean alpha of the contributing runs.
    pub(crate) fn summed_counts(&self, window: Window) -> (f64, f64, f64) {
        let mut non = 0.0;
        let mut noff = 0.0;
        let mut sw = 0.0;
        let mut swa = 0.0;
        for unit in self.active_units() {
            let bins = window.bins(unit);
            if bins.is_empty() {
                continue;
            }
            let (on, off) = unit.summed_counts(bins);
            non += on;
            noff += off;
            sw += unit.live_time();
            swa += unit.live_time() * unit.alpha();
        }
        let alpha = if sw > 0.0 { swa / sw } else { 0.0 };
        (non, noff, alpha)
    }
}

impl ScaleFit {
    /// Flux at `energy` of `model` with the normalization this scale refers to.
    pub(crate) fn base_norm_flux(&self, model: &SpectralModel, energy: f64) -> f64 {
        let mut params = model.parameters().to_vec();
        params[model.kind().norm_parameter()] = self.base_norm;
        model.evaluate_with(&params, energy)
    }
}

/// Fit a scale factor on the normalization of `model` over `window`.
pub(crate) fn fit_norm_scale(engine: &FitEngine, model: &SpectralModel, window: Window) -> Result<ScaleFit, FitError> {
    let norm = model.parameters()[model.kind().norm_parameter()];
    let base_norm = if norm > 0.0 { norm } else { DEFAULT_NORM };
    let seed = ScaleFit {
        scale: 1.0,
        base_norm,
        cost: 0.0,
        status: FitStatus::Converged,
    };
    let objective = |x: &[f64]| -> Result<f64, FitError> { Ok(scaled_cost(engine, model, &seed, x[0], window)) };
    let out = engine.minimizer().minimize(&objective, &[1.0], &[(0.0, MAX_SCALE)])?;
    Ok(ScaleFit {
        scale: out.parameters[0],
        base_norm,
        cost: out.value,
        status: out.status,
    })
}

pub(crate) fn scaled_cost(engine: &FitEngine, model: &SpectralModel, fit: &ScaleFit, k: f64, window: Window) -> f64 {
    let mut params = model.parameters().to_vec();
    params[model.kind().norm_parameter()] = fit.base_norm * k;
    engine.joint_cost(model, &params, window)
}

/// Smallest `k ≥ k_best` with `cost(k) = target`.
pub(crate) fn crossing_above<F: Fn(f64) -> f64>(cost: &F, k_best: f64, target: f64) -> Option<f64> {
    let mut lo = k_best.max(0.0);
    let mut hi = if lo > 0.0 { 2.0 * lo } else { 1.0 };
    let mut bracketed = false;
    for _ in 0..64 {
        if cost(hi) >= target {
            bracketed = true;
            break;
        }
        lo = hi;
        hi *= 2.0;
        if hi > MAX_SCALE {
            break;
        }
    }
    if !bracketed {
        return None;
    }
    bisect(|k| cost(k) - target, lo, hi, 1e-8 * hi, 200)
}

/// Largest `k ≤ k_best` with `cost(k) = target`, or zero if the cost stays below it.
pub(crate) fn crossing_below<F: Fn(f64) -> f64>(cost: &F, k_best: f64, target: f64) -> f64 {
    if k_best <= 0.0 || cost(0.0) < target {
        return 0.0;
    }
    bisect(|k| cost(k) - target, 0.0, k_best, 1e-8 * k_best, 200).unwrap_or(0.0)
}

fn check_profiled_parameter(model: &SpectralModel, index: usize) -> Result<(), FitError> {
    if index >= model.n_parameters() {
        return Err(FitError::configuration(format!(
            "Parameter index {index} out of range ({} parameters).",
            model.n_parameters()
        )));
    }
    if model.is_fixed(index) {
        return Err(FitError::configuration(format!(
            "Parameter {} is fixed and cannot be profiled.",
            model.parameter_specs()[index].name
        )));
    }
    Ok(())
}

/// Starting step for parameter `index`: its error, else 10% of its value.
fn initial_step(fit: &FitResult, index: usize) -> f64 {
    let best = fit.parameters[index];
    if fit.errors[index] > 0.0 {
        fit.errors[index]
    } else if best != 0.0 {
        0.1 * best.abs()
    } else {
        0.1
    }
}

/// Largest `t ≥ 0` keeping `start + t · dir` within `bounds`.
fn ray_limit(start: f64, dir: f64, (lo, hi): (f64, f64)) -> f64 {
    if dir > 0.0 {
        ((hi - start) / dir).max(0.0)
    } else if dir < 0.0 {
        ((lo - start) / dir).max(0.0)
    } else {
        f64::INFINITY
    }
}

/// Walk from `best` in direction `step` until `excess` turns non-negative, then bisect.
fn interval_end<F: Fn(f64) -> f64>(excess: &F, best: f64, step: f64, bound: f64) -> f64 {
    let mut step = step;
    let mut inner = best;
    for _ in 0..40 {
        let v = if step < 0.0 { (best + step).max(bound) } else { (best + step).min(bound) };
        let e = excess(v);
        if e.is_finite() && e >= 0.0 {
            return bisect(excess, inner, v, 1e-6 * step.abs(), 200).unwrap_or(v);
        }
        if v == bound {
            return bound;
        }
        inner = v;
        step *= 2.0;
    }
    bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FitConfig;
    use crate::error::ErrorKind;
    use crate::models::ModelKind;
    use crate::observation::ObservationUnit;
    use crate::response::fixtures::synthetic_run;

    fn fitted_engine() -> FitEngine {
        let config = FitConfig {
            bin_width: 0.5,
            binning_min: -1.0,
            binning_max: 1.0,
            energy_min: -1.0,
            energy_max: 1.0,
            threshold: None,
            ..FitConfig::default()
        };
        let mut engine = FitEngine::new(config).unwrap();
        let binning = *engine.binning();
        for run in 1..=2 {
            let raw = synthetic_run(run, &binning, vec![400.0, 120.0, 40.0, 12.0], vec![100.0; 4]);
            engine.add_object(ObservationUnit::new(raw, binning).unwrap()).unwrap();
        }
        engine.set_model(ModelKind::PowerLaw, 1.0).unwrap();
        engine.fit_energy_spectrum().unwrap();
        engine
    }

    #[test]
    fn contour_points_lie_on_the_requested_level() {
        let engine = fitted_engine();
        let fit = engine.last_fit().unwrap().clone();
        let model = engine.model().unwrap().clone();
        let contour = engine.likelihood_contour(0, 1, 2.30, 8).unwrap();
        assert_eq!(contour.points.len(), 8);
        assert_eq!(contour.best, (fit.parameters[0], fit.parameters[1]));
        for &(norm, index) in &contour.points {
            let cost = engine.joint_cost(&model, &[norm, index], Window::Fit);
            let delta = 2.0 * (cost - fit.neg_log_likelihood);
            assert!((delta - 2.30).abs() < 1e-3, "({norm:e}, {index}): {delta}");
        }
        // The contour encloses the best fit along the normalization axis.
        assert!(contour.points[0].0 > fit.parameters[0]);
        assert!(contour.points[4].0 < fit.parameters[0]);
    }

    #[test]
    fn contour_rejects_bad_parameter_choices() {
        let mut engine = fitted_engine();
        let kind = |r: Result<LikelihoodContour, FitError>| r.unwrap_err().kind();
        assert_eq!(kind(engine.likelihood_contour(1, 1, 2.30, 8)), ErrorKind::Configuration);
        assert_eq!(kind(engine.likelihood_contour(0, 5, 2.30, 8)), ErrorKind::Configuration);
        assert_eq!(kind(engine.likelihood_contour(0, 1, -1.0, 8)), ErrorKind::Configuration);
        engine.fix_parameter(1, None).unwrap();
        assert_eq!(kind(engine.likelihood_contour(0, 1, 2.30, 8)), ErrorKind::Configuration);
    }

    #[test]
    fn ray_limit_stops_at_the_nearest_bound() {
        assert!((ray_limit(0.5, 0.25, (0.0, 1.0)) - 2.0).abs() < 1e-12);
        assert!((ray_limit(0.5, -0.5, (0.0, 1.0)) - 1.0).abs() < 1e-12);
        assert!(ray_limit(0.5, 0.0, (0.0, 1.0)).is_infinite());
    }
}
