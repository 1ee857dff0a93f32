use crate::generator::profile::PulseProfile;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thzcore::QcConfig;

/// Station configuration: the QC sections consumed by the core plus the
/// simulated hardware and operator bridge settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub qc: QcConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub trigger_period_ms: u64,
    pub robot_delay_ms: u64,
    /// Whether a chip already sits in the beam when the station starts.
    pub start_with_sensor: bool,
    /// When false the spectrometer refuses to start, like vendor software that was never launched.
    pub scan_control_running: bool,
    pub pulse: PulseProfile,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            trigger_period_ms: 50,
            robot_delay_ms: 300,
            start_with_sensor: false,
            scan_control_running: true,
            pulse: PulseProfile::default(),
        }
    }
}

impl SimulatorConfig {
    pub fn trigger_period(&self) -> Duration {
        Duration::from_millis(self.trigger_period_ms.max(1))
    }

    pub fn robot_delay(&self) -> Duration {
        Duration::from_millis(self.robot_delay_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub address: SocketAddr,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 9000)),
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading station config {}", path_ref.display()))?;
        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing station config {}", path_ref.display()))?;
        config
            .qc
            .validate()
            .with_context(|| format!("validating station config {}", path_ref.display()))?;
        Ok(config)
    }
}
