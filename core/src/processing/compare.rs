use crate::config::QcParams;
use crate::math::stats::StatsHelper;
use crate::prelude::{CoreError, CoreResult, Spectrum, Verdict};
use serde::{Deserialize, Serialize};

/// Lower edge of the sensor resonance search band (THz).
pub const RESONANCE_LOWER_THZ: f64 = 0.71;
/// Upper edge of the sensor resonance search band (THz).
pub const RESONANCE_UPPER_THZ: f64 = 0.81;

/// Logarithm used to turn magnitudes into dB.
///
/// `Natural` (`20·ln|x|`) is what every recorded reference and tolerance was tuned
/// against; `Log10` is the conventional scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbScale {
    #[default]
    Natural,
    Log10,
}

impl DbScale {
    pub fn db(self, magnitude: f64) -> f64 {
        match self {
            DbScale::Natural => 20.0 * magnitude.abs().ln(),
            DbScale::Log10 => 20.0 * magnitude.abs().log10(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComparisonParams {
    pub lower_freq_thz: f64,
    pub upper_freq_thz: f64,
    pub allowed_error_db: f64,
    pub max_violations: usize,
    pub db_scale: DbScale,
}

impl From<&QcParams> for ComparisonParams {
    fn from(params: &QcParams) -> Self {
        Self {
            lower_freq_thz: params.lower_freq_thz,
            upper_freq_thz: params.upper_freq_thz,
            allowed_error_db: params.allowed_error_db,
            max_violations: params.max_violations,
            db_scale: params.db_scale,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub violations: usize,
    pub compared_bins: usize,
    pub verdict: Verdict,
}

/// Reference magnitudes already restricted to the QC band.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceBand {
    pub freq_thz: Vec<f64>,
    pub magnitude: Vec<f64>,
    params: ComparisonParams,
}

impl ReferenceBand {
    pub fn new(reference: &Spectrum, params: ComparisonParams) -> CoreResult<Self> {
        let (start, end) = reference.band_indices(params.lower_freq_thz, params.upper_freq_thz)?;
        Ok(Self {
            freq_thz: reference.freq_thz[start..end].to_vec(),
            magnitude: reference.magnitude[start..end].to_vec(),
            params,
        })
    }

    pub fn params(&self) -> &ComparisonParams {
        &self.params
    }

    /// Slices `candidate` to the same band and counts out-of-tolerance bins.
    pub fn compare(&self, candidate: &Spectrum) -> CoreResult<Comparison> {
        let (start, end) =
            candidate.band_indices(self.params.lower_freq_thz, self.params.upper_freq_thz)?;
        let slice = &candidate.magnitude[start..end];
        if slice.len() != self.magnitude.len() {
            return Err(CoreError::InvalidInput(format!(
                "candidate band has {} bins but the reference has {}; sampling differs",
                slice.len(),
                self.magnitude.len()
            )));
        }
        Ok(compare_band(slice, &self.magnitude, &self.params))
    }
}

/// Band-restricted comparison of two full spectra.
pub fn compare_to_reference(
    candidate: &Spectrum,
    reference: &Spectrum,
    params: ComparisonParams,
) -> CoreResult<Comparison> {
    ReferenceBand::new(reference, params)?.compare(candidate)
}

/// Counts bins whose absolute dB difference exceeds the allowed error.
/// Fails only when the count is strictly above `max_violations`.
pub fn compare_band(candidate: &[f64], reference: &[f64], params: &ComparisonParams) -> Comparison {
    let violations = candidate
        .iter()
        .zip(reference)
        .filter(|(&cand, &refr)| {
            let diff = (params.db_scale.db(refr) - params.db_scale.db(cand)).abs();
            diff > params.allowed_error_db
        })
        .count();

    let verdict = if violations > params.max_violations {
        Verdict::Fail
    } else {
        Verdict::Pass
    };

    Comparison {
        violations,
        compared_bins: candidate.len().min(reference.len()),
        verdict,
    }
}

/// Frequency of the deepest point of the dB spectrum inside the fixed resonance band.
pub fn resonance_minimum(spectrum: &Spectrum, scale: DbScale) -> CoreResult<f64> {
    let (start, end) = spectrum.band_indices(RESONANCE_LOWER_THZ, RESONANCE_UPPER_THZ)?;
    let db: Vec<f64> = spectrum.magnitude[start..end]
        .iter()
        .map(|&m| scale.db(m))
        .collect();
    let idx = StatsHelper::argmin(&db)
        .ok_or_else(|| CoreError::InvalidInput("resonance band holds no finite bins".into()))?;
    Ok(spectrum.freq_thz[start + idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(max_violations: usize) -> ComparisonParams {
        ComparisonParams {
            lower_freq_thz: 0.2,
            upper_freq_thz: 1.0,
            allowed_error_db: 3.0,
            max_violations,
            db_scale: DbScale::Natural,
        }
    }

    fn flat_spectrum() -> Spectrum {
        let freq_thz = (0..200).map(|k| k as f64 * 0.01).collect();
        Spectrum {
            freq_thz,
            magnitude: vec![1.0; 200],
        }
    }

    /// Pushes `count` in-band bins just beyond the tolerance.
    fn degraded(count: usize, params: &ComparisonParams) -> Spectrum {
        let mut spectrum = flat_spectrum();
        let (start, _) = spectrum.band_indices(params.lower_freq_thz, params.upper_freq_thz).unwrap();
        let off = (-(params.allowed_error_db + 0.01) / 20.0).exp();
        for bin in spectrum.magnitude.iter_mut().skip(start).take(count) {
            *bin = off;
        }
        spectrum
    }

    #[test]
    fn one_violation_beyond_limit_fails() {
        let p = params(5);
        let result = compare_to_reference(&degraded(6, &p), &flat_spectrum(), p).unwrap();
        assert_eq!(result.violations, 6);
        assert_eq!(result.verdict, Verdict::Fail);
    }

    #[test]
    fn violations_at_limit_pass() {
        let p = params(5);
        let result = compare_to_reference(&degraded(5, &p), &flat_spectrum(), p).unwrap();
        assert_eq!(result.violations, 5);
        assert_eq!(result.verdict, Verdict::Pass);

        let clean = compare_to_reference(&flat_spectrum(), &flat_spectrum(), p).unwrap();
        assert_eq!(clean.violations, 0);
        assert_eq!(clean.compared_bins, 80);
    }

    #[test]
    fn out_of_band_deviation_is_ignored() {
        let p = params(0);
        let mut candidate = flat_spectrum();
        candidate.magnitude[150] = 1e-6;
        candidate.magnitude[5] = 1e-6;
        let result = compare_to_reference(&candidate, &flat_spectrum(), p).unwrap();
        assert_eq!(result.verdict, Verdict::Pass);
    }

    #[test]
    fn natural_log_scale_is_larger_than_log10() {
        let natural = DbScale::Natural.db(0.1);
        let decimal = DbScale::Log10.db(0.1);
        assert!((decimal + 20.0).abs() < 1e-9);
        assert!((natural / decimal - 10f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn resonance_minimum_found_in_fixed_band() {
        let mut spectrum = flat_spectrum();
        spectrum.magnitude[76] = 0.01;
        spectrum.magnitude[50] = 0.001;
        let f = resonance_minimum(&spectrum, DbScale::Natural).unwrap();
        assert!((f - 0.76).abs() < 1e-9);
    }

    #[test]
    fn mismatched_sampling_is_rejected() {
        let p = params(0);
        let reference = ReferenceBand::new(&flat_spectrum(), p).unwrap();
        let coarse = Spectrum {
            freq_thz: (0..100).map(|k| k as f64 * 0.02).collect(),
            magnitude: vec![1.0; 100],
        };
        assert!(reference.compare(&coarse).is_err());
    }
}
