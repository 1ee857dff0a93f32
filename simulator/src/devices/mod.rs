pub mod robot;
pub mod spectrometer;
