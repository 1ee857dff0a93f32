//! Acquisition, classification and spectral QC for THz time-domain inspection of
//! sensor wafers.
//!
//! The pipeline averages pulses from a TDS spectrometer, decides whether a sensor
//! or air sits in the beam, drives the handling robot over a serial link and
//! compares each averaged spectrum against a standard reference.

pub mod config;
pub mod device;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod qc;
pub mod reference;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use config::QcConfig;
pub use prelude::{Classification, CoreError, CoreResult, PulseWaveform, QcResult, Spectrum, Verdict};
pub use qc::{EventBus, QcEvent, QcHandle, QcSession, SessionOutcome};
