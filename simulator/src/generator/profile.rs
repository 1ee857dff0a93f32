use crate::generator::template::{gaussian_pulse, ringing};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thzcore::PulseWaveform;

/// Shape of the synthetic pulses produced by the simulated spectrometer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseProfile {
    pub dt_ps: f64,
    /// Main pulse position relative to the scan start when a sensor is in the beam.
    pub center_ps: f64,
    pub width_ps: f64,
    pub amplitude: f64,
    /// Inverted echo delayed by `1 / resonance_thz` puts a spectral dip at that frequency.
    pub resonance_thz: f64,
    pub resonance_depth: f64,
    /// Oscillation seen through an empty slot.
    pub ringing_period_ps: f64,
    pub ringing_decay_ps: f64,
    pub noise: f64,
    pub seed: u64,
}

impl Default for PulseProfile {
    fn default() -> Self {
        Self {
            dt_ps: 0.1,
            center_ps: 12.0,
            width_ps: 0.4,
            amplitude: 1.0,
            resonance_thz: 0.76,
            resonance_depth: 0.6,
            ringing_period_ps: 0.8,
            ringing_decay_ps: 20.0,
            noise: 0.002,
            seed: 0,
        }
    }
}

pub struct PulseGenerator {
    profile: PulseProfile,
    rng: StdRng,
}

impl PulseGenerator {
    pub fn new(profile: PulseProfile) -> Self {
        let rng = StdRng::seed_from_u64(profile.seed);
        Self { profile, rng }
    }

    /// Number of samples covering `[begin_ps, end_ps]`.
    pub fn sample_count(&self, begin_ps: f64, end_ps: f64) -> usize {
        let span = (end_ps - begin_ps).max(0.0);
        (span / self.profile.dt_ps).round() as usize + 1
    }

    pub fn sensor(&mut self, begin_ps: f64, samples: usize) -> PulseWaveform {
        let p = self.profile.clone();
        let delay_ps = if p.resonance_thz > 0.0 {
            1.0 / p.resonance_thz
        } else {
            0.0
        };
        self.build(begin_ps, samples, |t| {
            p.amplitude
                * (gaussian_pulse(t, p.center_ps, p.width_ps)
                    - p.resonance_depth * gaussian_pulse(t, p.center_ps + delay_ps, p.width_ps))
        })
    }

    pub fn air(&mut self, begin_ps: f64, samples: usize) -> PulseWaveform {
        let p = self.profile.clone();
        self.build(begin_ps, samples, |t| {
            p.amplitude * ringing(t, 0.0, p.ringing_period_ps, p.ringing_decay_ps)
        })
    }

    fn build(&mut self, begin_ps: f64, samples: usize, shape: impl Fn(f64) -> f64) -> PulseWaveform {
        let noise = self.profile.noise;
        let mut time_ps = Vec::with_capacity(samples);
        let mut amplitude = Vec::with_capacity(samples);
        for i in 0..samples {
            let t = i as f64 * self.profile.dt_ps;
            let jitter = if noise > 0.0 {
                self.rng.gen_range(-noise..noise)
            } else {
                0.0
            };
            time_ps.push(begin_ps + t);
            amplitude.push(shape(t) + jitter);
        }
        PulseWaveform { time_ps, amplitude }
    }
}
