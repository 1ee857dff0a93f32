use std::f64::consts::PI;

/// Symmetric Tukey (tapered cosine) window of `len` points.
///
/// `alpha` is the fraction of the window inside the cosine taper: `0` gives a
/// rectangular window and `1` a Hann window.
pub fn tukey(len: usize, alpha: f64) -> Vec<f64> {
    if len <= 1 || alpha <= 0.0 {
        return vec![1.0; len];
    }
    let span = (len - 1) as f64;
    if alpha >= 1.0 {
        return (0..len)
            .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f64 / span).cos())
            .collect();
    }

    let width = (alpha * span / 2.0).floor() as usize;
    (0..len)
        .map(|n| {
            let x = n as f64;
            if n <= width {
                0.5 * (1.0 + (PI * (-1.0 + 2.0 * x / alpha / span)).cos())
            } else if n >= len - width - 1 {
                0.5 * (1.0 + (PI * (-2.0 / alpha + 1.0 + 2.0 * x / alpha / span)).cos())
            } else {
                1.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_taper_zeroes_only_the_edges() {
        let window = tukey(10, 0.1);
        assert_eq!(window.len(), 10);
        assert!(window[0].abs() < 1e-12);
        assert!(window[9].abs() < 1e-12);
        assert!(window[1..9].iter().all(|&w| (w - 1.0).abs() < 1e-12));
    }

    #[test]
    fn window_is_symmetric() {
        let window = tukey(101, 0.1);
        for i in 0..101 {
            assert!((window[i] - window[100 - i]).abs() < 1e-9);
        }
        assert!(window[3] > 0.0 && window[3] < 1.0);
    }

    #[test]
    fn degenerate_parameters() {
        assert_eq!(tukey(1, 0.1), vec![1.0]);
        assert_eq!(tukey(4, 0.0), vec![1.0; 4]);
        let hann = tukey(5, 1.0);
        assert!((hann[2] - 1.0).abs() < 1e-12);
        assert!(hann[0].abs() < 1e-12);
    }
}
