use crate::math::stats::StatsHelper;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One time-domain THz acquisition, either a single trigger or an averaged cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PulseWaveform {
    pub time_ps: Vec<f64>,
    pub amplitude: Vec<f64>,
}

impl PulseWaveform {
    pub fn new(time_ps: Vec<f64>, amplitude: Vec<f64>) -> CoreResult<Self> {
        if time_ps.len() != amplitude.len() {
            return Err(CoreError::InvalidInput(format!(
                "time axis has {} samples but amplitude has {}",
                time_ps.len(),
                amplitude.len()
            )));
        }
        Ok(Self { time_ps, amplitude })
    }

    pub fn len(&self) -> usize {
        self.amplitude.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amplitude.is_empty()
    }

    /// Spacing between the first two samples of the time axis.
    pub fn sample_interval(&self) -> Option<f64> {
        match self.time_ps.as_slice() {
            [first, second, ..] => Some(second - first),
            _ => None,
        }
    }

    /// Shifts the time axis to start at 0 ps and keeps every sample up to (and including)
    /// the one nearest to `window_ps`.
    pub fn windowed(&self, window_ps: f64) -> PulseWaveform {
        let Some(&origin) = self.time_ps.first() else {
            return PulseWaveform::default();
        };
        let shifted: Vec<f64> = self.time_ps.iter().map(|t| t - origin).collect();
        let last = StatsHelper::nearest_index(&shifted, window_ps).unwrap_or(0);
        let keep = (last + 1).min(self.amplitude.len());
        PulseWaveform {
            time_ps: shifted[..keep].to_vec(),
            amplitude: self.amplitude[..keep].to_vec(),
        }
    }

    /// Amplitude samples between the indices nearest to `start_ps` and `end_ps` (end exclusive).
    pub fn segment(&self, start_ps: f64, end_ps: f64) -> &[f64] {
        let start = StatsHelper::nearest_index(&self.time_ps, start_ps).unwrap_or(0);
        let end = StatsHelper::nearest_index(&self.time_ps, end_ps).unwrap_or(0);
        if end <= start {
            return &[];
        }
        &self.amplitude[start..end.min(self.amplitude.len())]
    }
}

/// Single-sided magnitude spectrum.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub freq_thz: Vec<f64>,
    pub magnitude: Vec<f64>,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.magnitude.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitude.is_empty()
    }

    /// Index range `[start, end)` between the bins nearest to the given frequencies.
    pub fn band_indices(&self, lower_thz: f64, upper_thz: f64) -> CoreResult<(usize, usize)> {
        let start = StatsHelper::nearest_index(&self.freq_thz, lower_thz)
            .ok_or_else(|| CoreError::InvalidInput("empty spectrum".into()))?;
        let end = StatsHelper::nearest_index(&self.freq_thz, upper_thz)
            .ok_or_else(|| CoreError::InvalidInput("empty spectrum".into()))?;
        if end <= start {
            return Err(CoreError::InvalidInput(format!(
                "frequency band {lower_thz}-{upper_thz} THz selects no bins"
            )));
        }
        Ok((start, end))
    }
}

/// Whether a sensor chip or empty air sits in the beam path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Sensor,
    Air,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Sensor => write!(f, "Sensor"),
            Classification::Air => write!(f, "Air"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Pass,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail => write!(f, "FAIL"),
        }
    }
}

/// Outcome of one inspected sensor. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcResult {
    pub sensor_id: u32,
    pub wafer_id: String,
    pub verdict: Verdict,
    pub resonance_min_thz: f64,
    pub violations: usize,
    pub timestamp: DateTime<Local>,
}

/// Common error type for the acquisition and QC pipeline.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("spectrometer not ready: {0}")]
    DeviceNotReady(String),
    #[error("device failure: {0}")]
    Device(String),
    #[error("no ACK received: {0}")]
    AckTimeout(String),
    #[error("averaging stalled at {current}/{desired} pulses")]
    AveragingTimeout { current: u32, desired: u32 },
    #[error("sensor verification failed: {0}")]
    SensorVerification(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("report error: {0}")]
    Report(String),
}

impl From<csv::Error> for CoreError {
    fn from(err: csv::Error) -> Self {
        CoreError::Report(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
