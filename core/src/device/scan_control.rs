use crate::prelude::{CoreError, PulseWaveform};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Acquisition status reported by the spectrometer driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    Idle,
    Acquiring,
    Busy,
    Error,
}

/// Notifications pushed by the driver.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    PulseReady(PulseWaveform),
    StatusChanged(DeviceStatus),
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum DeviceError {
    /// The driver has not been initialised (vendor software not running, laser off, ...).
    #[error("driver not initialised: {0}")]
    NotReady(String),
    #[error("command rejected: {0}")]
    Rejected(String),
    #[error("driver disconnected")]
    Disconnected,
}

impl From<DeviceError> for CoreError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::NotReady(detail) => CoreError::DeviceNotReady(detail),
            other => CoreError::Device(other.to_string()),
        }
    }
}

/// Command surface of a TDS spectrometer driver.
///
/// Pulses are not returned from these calls: the driver pushes them as
/// [`DeviceEvent::PulseReady`] on the channel handed to the averaging controller.
pub trait ScanControl: Send {
    fn set_begin(&mut self, begin_ps: f64) -> Result<(), DeviceError>;
    fn set_end(&mut self, end_ps: f64) -> Result<(), DeviceError>;
    fn set_desired_averages(&mut self, averages: u32) -> Result<(), DeviceError>;
    fn reset_averaging(&mut self) -> Result<(), DeviceError>;
    fn start(&mut self) -> impl Future<Output = Result<(), DeviceError>> + Send;
    fn stop(&mut self) -> impl Future<Output = Result<(), DeviceError>> + Send;
}
