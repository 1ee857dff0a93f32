use std::f64::consts::PI;

/// Gaussian THz transient centred at `center_ps`.
pub fn gaussian_pulse(t_ps: f64, center_ps: f64, width_ps: f64) -> f64 {
    let x = (t_ps - center_ps) / width_ps;
    (-0.5 * x * x).exp()
}

/// Exponentially decaying oscillation starting at `onset_ps`; zero before it.
pub fn ringing(t_ps: f64, onset_ps: f64, period_ps: f64, decay_ps: f64) -> f64 {
    if t_ps < onset_ps {
        return 0.0;
    }
    let dt = t_ps - onset_ps;
    (2.0 * PI * dt / period_ps).sin() * (-dt / decay_ps).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaussian_peaks_at_center() {
        assert_eq!(gaussian_pulse(12.0, 12.0, 0.4), 1.0);
        assert!(gaussian_pulse(14.0, 12.0, 0.4) < 1e-5);
    }

    #[test]
    fn ringing_is_silent_before_onset() {
        assert_eq!(ringing(1.0, 2.0, 0.8, 20.0), 0.0);
        assert!(ringing(2.2, 2.0, 0.8, 20.0) > 0.9);
    }
}
