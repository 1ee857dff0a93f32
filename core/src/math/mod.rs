pub mod fft;
pub mod stats;
pub mod window;

pub use fft::{compute_fft, FftHelper, SpectrumAnalyzer};
pub use stats::StatsHelper;
pub use window::tukey;
