use crate::math::window::tukey;
use crate::prelude::{CoreError, CoreResult, PulseWaveform, Spectrum};
use num_complex::Complex64;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::sync::Arc;

/// Length every pulse is zero-padded to before the transform.
pub const PADDED_LENGTH: usize = 16384;
/// Fraction of the pulse covered by the Tukey taper.
pub const TUKEY_ALPHA: f64 = 0.1;

/// Helper that wraps the `rustfft` planner for reuse.
#[derive(Clone)]
pub struct FftHelper {
    fft: Arc<dyn Fft<f64>>,
    size: usize,
}

impl FftHelper {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        Self { fft, size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Forward transform of a real sequence, zero-padded (or truncated) to the planned size.
    pub fn forward(&self, input: &[f64]) -> Vec<Complex64> {
        let mut buffer: Vec<Complex64> = input
            .iter()
            .take(self.size)
            .map(|&value| Complex64::new(value, 0.0))
            .collect();
        buffer.resize(self.size, Complex64::zero());
        self.fft.process(&mut buffer);
        buffer
    }
}

/// Windowed, zero-padded, single-sided magnitude spectrum of TDS pulses.
#[derive(Clone)]
pub struct SpectrumAnalyzer {
    fft: FftHelper,
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            fft: FftHelper::new(PADDED_LENGTH),
        }
    }

    pub fn compute(&self, waveform: &PulseWaveform) -> CoreResult<Spectrum> {
        self.compute_parts(&waveform.time_ps, &waveform.amplitude)
    }

    /// Time in ps, frequency out in THz. Magnitudes are normalised by half the padded length.
    pub fn compute_parts(&self, time_ps: &[f64], amplitude: &[f64]) -> CoreResult<Spectrum> {
        if time_ps.len() != amplitude.len() {
            return Err(CoreError::InvalidInput(format!(
                "time axis has {} samples but amplitude has {}",
                time_ps.len(),
                amplitude.len()
            )));
        }
        let len = amplitude.len();
        let padded = self.fft.size();
        if len < 2 {
            return Err(CoreError::InvalidInput(
                "at least two samples are required for a spectrum".into(),
            ));
        }
        if len > padded {
            return Err(CoreError::InvalidInput(format!(
                "pulse of {len} samples exceeds the padded length {padded}"
            )));
        }
        let dt = time_ps[1] - time_ps[0];
        if dt.is_nan() || dt <= 0.0 {
            return Err(CoreError::InvalidInput(format!(
                "time axis must increase, got step {dt} ps"
            )));
        }

        let window = tukey(len, TUKEY_ALPHA);
        let tapered: Vec<f64> = amplitude
            .iter()
            .zip(window.iter())
            .map(|(a, w)| a * w)
            .collect();

        let transformed = self.fft.forward(&tapered);
        let half = padded / 2;
        let norm = padded as f64 / 2.0;
        let freq_thz = (0..half).map(|k| k as f64 / (padded as f64 * dt)).collect();
        let magnitude = transformed[..half].iter().map(|c| c.norm() / norm).collect();

        Ok(Spectrum {
            freq_thz,
            magnitude,
        })
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot convenience wrapper around [`SpectrumAnalyzer`].
pub fn compute_fft(time_ps: &[f64], amplitude: &[f64]) -> CoreResult<Spectrum> {
    SpectrumAnalyzer::new().compute_parts(time_ps, amplitude)
}
