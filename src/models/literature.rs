//! Published reference spectra used to express fluxes in source units.

use crate::math::integrate_log;

/// A reference flux model for a named source.
pub trait LiteratureSpectrum: Send + Sync {
    fn source(&self) -> &str;

    /// `dN/dE` at `e` TeV in cm⁻² s⁻¹ TeV⁻¹.
    fn flux(&self, e: f64) -> f64;

    /// Integral flux between `e_min` and `e_max` TeV in cm⁻² s⁻¹.
    fn integral_flux(&self, e_min: f64, e_max: f64) -> f64 {
        integrate_log(|e| self.flux(e), e_min, e_max, 400)
    }
}

/// Power-law reference spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePowerLaw {
    pub source: String,
    pub norm: f64,
    pub index: f64,
    pub norm_energy: f64,
}

impl ReferencePowerLaw {
    /// Crab Nebula as measured by Whipple (Hillas et al. 1998).
    pub fn crab_whipple_1998() -> Self {
        Self {
            source: "Crab Nebula (Whipple 1998)".to_string(),
            norm: 3.20e-11,
            index: -2.49,
            norm_energy: 1.0,
        }
    }
}

impl LiteratureSpectrum for ReferencePowerLaw {
    fn source(&self) -> &str {
        &self.source
    }

    fn flux(&self, e: f64) -> f64 {
        if !(e > 0.0) {
            return 0.0;
        }
        self.norm * (e / self.norm_energy).powf(self.index)
    }

    fn integral_flux(&self, e_min: f64, e_max: f64) -> f64 {
        if !(e_min > 0.0 && e_max > e_min) {
            return 0.0;
        }
        let g1 = self.index + 1.0;
        if g1.abs() < 1e-12 {
            return self.norm * self.norm_energy * (e_max / e_min).ln();
        }
        self.norm * self.norm_energy / g1
            * ((e_max / self.norm_energy).powf(g1) - (e_min / self.norm_energy).powf(g1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crab_integral_matches_quadrature() {
        let crab = ReferencePowerLaw::crab_whipple_1998();
        assert!((crab.flux(1.0) - 3.20e-11).abs() < 1e-20);
        let closed = crab.integral_flux(1.0, 10.0);
        let numeric = integrate_log(|e| crab.flux(e), 1.0, 10.0, 400);
        assert!(((closed - numeric) / closed).abs() < 1e-8);
    }
}
