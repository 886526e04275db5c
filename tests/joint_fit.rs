mod common;

use common::*;
use gamma_likelihood::domain::{FitStatus, ThresholdMethod};
use gamma_likelihood::error::ErrorKind;
use gamma_likelihood::fit::FitEngine;
use gamma_likelihood::models::{ModelKind, ReferencePowerLaw};
use gamma_likelihood::response::{EffectiveArea, EnergyBinning, InMemoryProvider, RunReference};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn two_bin_engine(durations: [f64; 2]) -> FitEngine {
    let binning = EnergyBinning::new(0.5, -1.0, 0.0).unwrap();
    let mut engine = FitEngine::new(config_for(&binning)).unwrap();
    engine.set_model(ModelKind::PowerLaw, 1.0).unwrap();
    for (i, &d) in durations.iter().enumerate() {
        let meta = metadata(100 + i as u32, 58000.0 + i as f64, d);
        engine
            .add_object(unit(&binning, meta, vec![50.0, 30.0], vec![200.0, 120.0]))
            .unwrap();
    }
    engine
}

#[test]
fn joint_optimum_beats_each_standalone_optimum() {
    let mut engine = two_bin_engine([1800.0, 3600.0]);
    let joint = engine.fit_energy_spectrum().unwrap();
    assert!(joint.neg_log_likelihood.is_finite());

    for run in [100, 101] {
        let mut single = engine.from_active_runs().unwrap();
        let other = if run == 100 { 101 } else { 100 };
        single.exclude_run(other).unwrap();
        single.set_parameters(&[1e-12, -2.5]).unwrap();
        let standalone = single.fit_energy_spectrum().unwrap();
        let free: Vec<f64> = standalone.free_indices.iter().map(|&i| standalone.parameters[i]).collect();
        let evaluated_jointly = engine.neg_log_likelihood(&free).unwrap();
        assert!(
            joint.neg_log_likelihood < evaluated_jointly - 1e-6,
            "run {run}: joint {} vs standalone evaluated jointly {evaluated_jointly}",
            joint.neg_log_likelihood
        );
    }
}

#[test]
fn refitting_is_idempotent() {
    let mut engine = two_bin_engine([1800.0, 1800.0]);
    let first = engine.fit_energy_spectrum().unwrap();
    let second = engine.fit_energy_spectrum().unwrap();
    assert!((first.neg_log_likelihood - second.neg_log_likelihood).abs() < 1e-6);
    for (a, b) in first.parameters.iter().zip(&second.parameters) {
        assert!(((a - b) / a).abs() < 1e-3, "{a} vs {b}");
    }
}

#[test]
fn excluded_run_drops_out_of_joint_likelihood() {
    let binning = EnergyBinning::new(0.25, -1.0, 0.0).unwrap();
    let mut engine = FitEngine::new(config_for(&binning)).unwrap();
    engine.set_model(ModelKind::PowerLaw, 1.0).unwrap();
    let counts = [(40.0, 150.0), (55.0, 210.0), (30.0, 90.0)];
    for (i, &(on, off)) in counts.iter().enumerate() {
        let meta = metadata(10 + i as u32, 58100.0 + i as f64, 1800.0);
        engine.add_object(unit(&binning, meta, vec![on; 4], vec![off; 4])).unwrap();
    }

    let free = [2e-12, -2.2];
    let total = engine.neg_log_likelihood(&free).unwrap();
    let model = engine.model().unwrap().clone();
    let full = model.expand_free(&free).unwrap();
    let run_11 = engine.units()[1].neg_log_likelihood_with(&model, &full);

    engine.exclude_run(11).unwrap();
    assert_eq!(engine.active_runs(), vec![10, 12]);
    let without = engine.neg_log_likelihood(&free).unwrap();
    assert!((without - (total - run_11)).abs() < 1e-9 * total.abs().max(1.0));

    let err = engine.exclude_run(99).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
}

#[test]
fn exclusion_dates_are_open_intervals() {
    let mut engine = two_bin_engine([1800.0, 1800.0]);
    // Runs at MJD 58000 and 58001.
    engine.add_exclusion_date(58000.0, 58001.5).unwrap();
    assert_eq!(engine.active_runs(), vec![100]);
    assert!(engine.add_exclusion_date(5.0, 4.0).is_err());

    let active = engine.from_active_runs().unwrap();
    assert_eq!(active.n_runs(), 1);
}

#[test]
fn threshold_from_effective_area_fraction() {
    let binning = EnergyBinning::new(0.2, -1.0, 1.0).unwrap();
    let centres = binning.centres();
    let k = 4;
    let mut raw = raw_run(&binning, metadata(1, 58000.0, 1800.0), vec![5.0; 10], vec![20.0; 10]);
    let area: Vec<f64> = (0..10)
        .map(|i| if i < k { 0.1 * (i + 1) as f64 } else if i == k { 0.8 } else { 1.0 })
        .collect();
    raw.effective_area = EffectiveArea::new(centres.clone(), area).unwrap();

    let mut provider = InMemoryProvider::new();
    provider.insert(RunReference::new("archive", 1), raw);

    let mut engine = FitEngine::new(config_for(&binning)).unwrap();
    engine.add_run(&provider, &RunReference::new("archive", 1)).unwrap();
    engine
        .set_energy_threshold(ThresholdMethod::EffectiveAreaFraction, 0.5, false)
        .unwrap();
    assert_eq!(engine.units()[0].energy_threshold(), Some(centres[k - 1]));

    assert!(engine.set_energy_threshold(ThresholdMethod::EffectiveAreaFraction, 0.0, false).is_err());
    assert_eq!(engine.units()[0].energy_threshold(), Some(centres[k - 1]));

    let missing = engine.add_run(&provider, &RunReference::new("archive", 2)).unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::Data);
}

#[test]
fn fit_without_runs_is_a_data_error() {
    let binning = EnergyBinning::new(0.5, -1.0, 0.0).unwrap();
    let mut engine = FitEngine::new(config_for(&binning)).unwrap();
    engine.set_model(ModelKind::PowerLaw, 1.0).unwrap();
    assert_eq!(engine.fit_energy_spectrum().unwrap_err().kind(), ErrorKind::Data);
}

#[test]
fn wrong_parameter_length_is_a_configuration_error() {
    let engine = two_bin_engine([1800.0, 1800.0]);
    let err = engine.neg_log_likelihood(&[1e-12]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

fn asimov_engine(truth: &gamma_likelihood::models::SpectralModel, runs: u32) -> FitEngine {
    let binning = EnergyBinning::new(0.2, -1.0, 1.0).unwrap();
    let mut engine = FitEngine::new(config_for(&binning)).unwrap();
    engine.set_model(ModelKind::PowerLaw, 1.0).unwrap();
    for r in 0..runs {
        let meta = metadata(200 + r, 58200.0 + r as f64, 3600.0);
        engine.add_object(asimov_unit(&binning, meta, truth, 400.0)).unwrap();
    }
    engine
}

#[test]
fn power_law_parameters_are_recovered_from_expected_counts() {
    let truth = power_law(3e-12, -2.3);
    let mut engine = asimov_engine(&truth, 2);
    let fit = engine.fit_energy_spectrum().unwrap();
    assert_eq!(fit.status, FitStatus::Converged);
    assert!(((fit.parameters[0] - 3e-12) / 3e-12).abs() < 0.02, "{:?}", fit.parameters);
    assert!((fit.parameters[1] + 2.3).abs() < 0.02, "{:?}", fit.parameters);
    assert!(fit.errors.iter().all(|e| *e > 0.0));
    assert!(fit.ndf > 0);
    // The expected-count data set is reproduced exactly by the truth.
    assert!(fit.reduced_deviance() < 1e-3);
}

#[test]
fn spectral_points_follow_the_injected_spectrum() {
    let truth = power_law(3e-12, -2.3);
    let mut engine = asimov_engine(&truth, 2);
    engine.fit_energy_spectrum().unwrap();
    let points = engine.spectral_points().unwrap();
    assert_eq!(points.len(), 10);
    let detected: Vec<_> = points.iter().filter(|p| !p.is_upper_limit).collect();
    assert!(!detected.is_empty());
    for p in detected {
        let expected = truth.evaluate(p.energy);
        assert!(((p.flux - expected) / expected).abs() < 0.05, "E={} flux={} expected={expected}", p.energy, p.flux);
        assert!(p.flux_err_low > 0.0 && p.flux_err_high > 0.0);
    }
}

#[test]
fn profile_and_interval_bracket_the_best_fit() {
    let truth = power_law(3e-12, -2.3);
    let mut engine = asimov_engine(&truth, 1);
    let fit = engine.fit_energy_spectrum().unwrap();
    let best = fit.parameters[1];
    let sigma = fit.errors[1];

    let profile = engine.profile_likelihood(1, best - 2.0 * sigma, best + 2.0 * sigma, 5).unwrap();
    assert_eq!(profile.len(), 5);
    assert!(profile[2].delta_two_log_l.abs() < 0.05, "{profile:?}");
    assert!(profile[0].delta_two_log_l > 2.0 && profile[4].delta_two_log_l > 2.0, "{profile:?}");

    let interval = engine.parameter_interval(1, 1.0).unwrap();
    assert!(interval.lower < best && best < interval.upper);
    let half_width = 0.5 * (interval.upper - interval.lower);
    assert!((half_width - sigma).abs() < 0.3 * sigma, "{half_width} vs {sigma}");
}

#[test]
fn integral_flux_and_band_are_consistent_with_the_fit() {
    let truth = power_law(3e-12, -2.3);
    let mut engine = asimov_engine(&truth, 2);
    engine.fit_energy_spectrum().unwrap();

    let flux = engine.integral_flux(1.0, 10.0).unwrap();
    let expected = 3e-12 / 1.3 * (1.0 - 10f64.powf(-1.3));
    assert!(((flux.flux - expected) / expected).abs() < 0.05);
    assert!(flux.flux_err > 0.0);

    let (crab_fraction, _) = engine
        .flux_in_reference_units(&ReferencePowerLaw::crab_whipple_1998(), 1.0, 10.0)
        .unwrap();
    assert!(crab_fraction > 0.0 && crab_fraction < 1.0);

    let band = engine.confidence_band(20).unwrap();
    assert_eq!(band.len(), 20);
    assert!(band.iter().all(|b| b.flux > 0.0 && b.flux_err > 0.0));
}

fn light_curve_engine(scales: &[f64]) -> FitEngine {
    let binning = EnergyBinning::new(0.2, -1.0, 1.0).unwrap();
    let mut engine = FitEngine::new(config_for(&binning)).unwrap();
    engine.set_model(ModelKind::PowerLaw, 1.0).unwrap();
    for (i, s) in scales.iter().enumerate() {
        let truth = power_law(3e-12 * s, -2.3);
        let meta = metadata(300 + i as u32, 58300.0 + 10.0 * i as f64, 3600.0);
        engine.add_object(asimov_unit(&binning, meta, &truth, 400.0)).unwrap();
    }
    engine
}

#[test]
fn steady_source_has_small_variability_index() {
    let mut engine = light_curve_engine(&[1.0, 1.0, 1.0]);
    engine.fit_energy_spectrum().unwrap();
    let best = engine.best_fit_model().unwrap();
    let var = engine.variability_index(10.0, &best, None).unwrap();
    assert_eq!(var.light_curve.len(), 3);
    assert_eq!(var.ndf, 2);
    assert!(var.index >= 0.0 && var.index < 0.1, "index {}", var.index);
}

#[test]
fn flaring_source_has_large_variability_index() {
    let mut engine = light_curve_engine(&[1.0, 1.0, 4.0]);
    engine.fit_energy_spectrum().unwrap();
    let best = engine.best_fit_model().unwrap();
    let var = engine.variability_index(10.0, &best, None).unwrap();
    assert!(var.index > 25.0, "index {}", var.index);
    let fluxes: Vec<f64> = var.light_curve.iter().map(|p| p.flux).collect();
    assert!(fluxes[2] > 3.0 * fluxes[0], "{fluxes:?}");

    let restricted = engine.variability_index(10.0, &best, Some((58299.0, 58311.0))).unwrap();
    assert_eq!(restricted.light_curve.len(), 2);
    // Bins are laid over [58299 − 5, 58311 + 5] in two steps of 11 days.
    assert!((restricted.light_curve[0].mjd - 58299.5).abs() < 1e-9);
    assert!((restricted.light_curve[1].mjd_half_width - 5.5).abs() < 1e-9);
    assert!(restricted.index < 0.1);
}

#[test]
fn time_binned_engines_partition_active_runs() {
    let engine = light_curve_engine(&[1.0, 1.0, 1.0]);
    let bins = engine
        .time_binned_data(&gamma_likelihood::domain::TimeBinning::Edges(vec![58295.0, 58315.0, 58325.0]))
        .unwrap();
    assert_eq!(bins.len(), 2);
    assert_eq!(bins[0].engine.active_runs(), vec![300, 301]);
    assert_eq!(bins[1].engine.active_runs(), vec![302]);
}

#[test]
fn faked_engine_refits_near_the_truth() {
    let truth = power_law(3e-12, -2.3);
    let mut engine = asimov_engine(&truth, 2);
    engine.fit_energy_spectrum().unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    let mut fake = engine.fake_runs(&mut rng).unwrap();
    assert_eq!(fake.n_runs(), 2);
    let fit = fake.fit_energy_spectrum().unwrap();
    assert!((fit.parameters[1] + 2.3).abs() < 0.3, "{:?}", fit.parameters);
}
