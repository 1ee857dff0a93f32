//! Typed QC station configuration, validated once before a session starts.

use crate::prelude::{CoreError, CoreResult};
use crate::processing::compare::DbScale;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Spectrometer scan range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Start of the TDS trace (ps).
    pub begin_ps: f64,
    /// Length of the trace kept for analysis (ps).
    pub window_ps: f64,
}

/// Peak-detection parameters and per-vote cutoffs for Sensor/Air classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    pub window_start_ps: f64,
    pub window_end_ps: f64,
    pub distance: f64,
    pub prominence: f64,
    pub width: f64,
    pub threshold: f64,
    /// The highest distance-filtered peak at or after this sample index votes Sensor.
    pub pulse_position: usize,
    pub max_prominent_peaks: usize,
    pub max_wide_peaks: usize,
    pub max_threshold_peaks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcParams {
    pub lower_freq_thz: f64,
    pub upper_freq_thz: f64,
    pub allowed_error_db: f64,
    pub max_violations: usize,
    pub num_avgs: u32,
    /// Settling time after the robot acknowledges an insert (s).
    #[serde(default)]
    pub handling_time_s: f64,
    #[serde(default)]
    pub chips_per_wafer: u32,
    #[serde(default)]
    pub db_scale: DbScale,
    #[serde(default = "default_averaging_timeout")]
    pub averaging_timeout_s: f64,
    #[serde(default = "default_max_skips")]
    pub max_consecutive_skips: u32,
}

impl QcParams {
    pub fn handling_time(&self) -> Duration {
        Duration::from_secs_f64(self.handling_time_s.max(0.0))
    }

    /// `None` when the timeout is disabled (zero).
    pub fn averaging_timeout(&self) -> Option<Duration> {
        (self.averaging_timeout_s > 0.0).then(|| Duration::from_secs_f64(self.averaging_timeout_s))
    }

    /// Name/value pairs written into the session report.
    pub fn as_rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("lower_freq_thz", self.lower_freq_thz.to_string()),
            ("upper_freq_thz", self.upper_freq_thz.to_string()),
            ("allowed_error_db", self.allowed_error_db.to_string()),
            ("max_violations", self.max_violations.to_string()),
            ("num_avgs", self.num_avgs.to_string()),
            ("handling_time_s", self.handling_time_s.to_string()),
            ("chips_per_wafer", self.chips_per_wafer.to_string()),
            ("db_scale", format!("{:?}", self.db_scale)),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotConfig {
    /// Serial device of the handling robot; a simulated robot is used when absent.
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    pub timeout_s: f64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_s: f64,
}

impl RobotConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_s)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Standard reference file, relative to `reference_dir` unless absolute.
    pub std_ref_file: PathBuf,
    pub reference_dir: PathBuf,
    pub qc_save_dir: PathBuf,
    pub export_dir: PathBuf,
    #[serde(default = "default_export_filename")]
    pub export_filename: String,
}

impl PathsConfig {
    pub fn std_ref_path(&self) -> PathBuf {
        if self.std_ref_file.is_absolute() {
            self.std_ref_file.clone()
        } else {
            self.reference_dir.join(&self.std_ref_file)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcConfig {
    pub scan: ScanConfig,
    pub classification: ClassificationConfig,
    pub qc: QcParams,
    pub robot: RobotConfig,
    pub paths: PathsConfig,
}

impl QcConfig {
    /// Rejects values that would otherwise surface as hangs or nonsense verdicts mid-session.
    pub fn validate(&self) -> CoreResult<()> {
        let scan = &self.scan;
        if !(scan.window_ps.is_finite() && scan.window_ps > 0.0) {
            return Err(config_error("scan.window_ps must be positive"));
        }

        let class = &self.classification;
        if class.window_end_ps <= class.window_start_ps {
            return Err(config_error(
                "classification.window_end_ps must be after window_start_ps",
            ));
        }
        if class.window_end_ps > scan.window_ps {
            return Err(config_error(
                "classification window extends beyond scan.window_ps",
            ));
        }
        if class.distance < 1.0 {
            return Err(config_error("classification.distance must be >= 1"));
        }
        for (name, value) in [
            ("prominence", class.prominence),
            ("width", class.width),
            ("threshold", class.threshold),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(config_error(&format!(
                    "classification.{name} must be a non-negative number"
                )));
            }
        }

        let qc = &self.qc;
        if qc.upper_freq_thz <= qc.lower_freq_thz || qc.lower_freq_thz < 0.0 {
            return Err(config_error(
                "qc.upper_freq_thz must exceed a non-negative qc.lower_freq_thz",
            ));
        }
        if !(qc.allowed_error_db.is_finite() && qc.allowed_error_db >= 0.0) {
            return Err(config_error("qc.allowed_error_db must be non-negative"));
        }
        if qc.num_avgs == 0 {
            return Err(config_error("qc.num_avgs must be at least 1"));
        }
        if qc.max_consecutive_skips == 0 {
            return Err(config_error("qc.max_consecutive_skips must be at least 1"));
        }
        if !(qc.handling_time_s.is_finite() && qc.handling_time_s >= 0.0) {
            return Err(config_error("qc.handling_time_s must be non-negative"));
        }
        if !qc.averaging_timeout_s.is_finite() || qc.averaging_timeout_s < 0.0 {
            return Err(config_error("qc.averaging_timeout_s must be non-negative"));
        }

        let robot = &self.robot;
        if !(robot.timeout_s.is_finite() && robot.timeout_s > 0.0) {
            return Err(config_error("robot.timeout_s must be positive"));
        }
        if !(robot.poll_interval_s.is_finite() && robot.poll_interval_s > 0.0) {
            return Err(config_error("robot.poll_interval_s must be positive"));
        }

        if self.paths.export_filename.trim().is_empty() {
            return Err(config_error("paths.export_filename must not be empty"));
        }
        Ok(())
    }
}

fn config_error(message: &str) -> CoreError {
    CoreError::Config(message.to_string())
}

fn default_averaging_timeout() -> f64 {
    120.0
}

fn default_max_skips() -> u32 {
    3
}

fn default_baudrate() -> u32 {
    9600
}

fn default_poll_interval() -> f64 {
    1.0
}

fn default_export_filename() -> String {
    "average.txt".to_string()
}

#[cfg(test)]
mod tests {
    use crate::testing::test_config;

    #[test]
    fn test_config_is_valid() {
        test_config().validate().unwrap();
    }

    #[test]
    fn zero_averages_rejected() {
        let mut cfg = test_config();
        cfg.qc.num_avgs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_band_rejected() {
        let mut cfg = test_config();
        cfg.qc.lower_freq_thz = 2.0;
        cfg.qc.upper_freq_thz = 1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn classification_window_must_fit_scan() {
        let mut cfg = test_config();
        cfg.classification.window_end_ps = cfg.scan.window_ps + 1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn averaging_timeout_zero_disables_limit() {
        let mut cfg = test_config();
        cfg.qc.averaging_timeout_s = 0.0;
        assert!(cfg.qc.averaging_timeout().is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn relative_reference_resolves_against_reference_dir() {
        let cfg = test_config();
        assert!(cfg
            .paths
            .std_ref_path()
            .starts_with(&cfg.paths.reference_dir));
    }
}
