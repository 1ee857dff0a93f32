//! Peak detection on a sampled waveform.
//!
//! Each filter reproduces one of the `scipy.signal.find_peaks` conditions so the
//! classification cutoffs tuned on recorded pulses carry over unchanged: local
//! maxima (flat tops resolve to their midpoint), vertical threshold to both
//! neighbours, minimum horizontal distance with higher peaks taking priority,
//! topographic prominence and width at half prominence.

/// Prominence of one peak together with the bases it was measured against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prominence {
    pub value: f64,
    pub left_base: usize,
    pub right_base: usize,
}

pub struct PeakFinder;

impl PeakFinder {
    /// Indices of all local maxima. Plateaus report their (rounded-down) midpoint.
    pub fn local_maxima(x: &[f64]) -> Vec<usize> {
        let mut peaks = Vec::new();
        if x.len() < 3 {
            return peaks;
        }
        let i_max = x.len() - 1;
        let mut i = 1;
        while i < i_max {
            if x[i - 1] < x[i] {
                let mut ahead = i + 1;
                while ahead < i_max && x[ahead] == x[i] {
                    ahead += 1;
                }
                if x[ahead] < x[i] {
                    let left_edge = i;
                    let right_edge = ahead - 1;
                    peaks.push((left_edge + right_edge) / 2);
                    i = ahead;
                }
            }
            i += 1;
        }
        peaks
    }

    /// Peaks whose vertical drop to both direct neighbours is at least `threshold`.
    pub fn by_threshold(x: &[f64], threshold: f64) -> Vec<usize> {
        Self::local_maxima(x)
            .into_iter()
            .filter(|&p| {
                let left = x[p] - x[p - 1];
                let right = x[p] - x[p + 1];
                left.min(right) >= threshold
            })
            .collect()
    }

    /// Peaks at least `distance` samples apart; lower peaks are removed first.
    pub fn by_distance(x: &[f64], distance: f64) -> Vec<usize> {
        let peaks = Self::local_maxima(x);
        let min_gap = distance.max(1.0).ceil() as usize;
        let mut keep = vec![true; peaks.len()];

        let mut order: Vec<usize> = (0..peaks.len()).collect();
        order.sort_by(|&a, &b| x[peaks[a]].total_cmp(&x[peaks[b]]));

        for &j in order.iter().rev() {
            if !keep[j] {
                continue;
            }
            let mut k = j;
            while k > 0 && peaks[j] - peaks[k - 1] < min_gap {
                keep[k - 1] = false;
                k -= 1;
            }
            let mut k = j + 1;
            while k < peaks.len() && peaks[k] - peaks[j] < min_gap {
                keep[k] = false;
                k += 1;
            }
        }

        peaks
            .into_iter()
            .zip(keep)
            .filter_map(|(peak, kept)| kept.then_some(peak))
            .collect()
    }

    /// Peaks with a prominence of at least `min_prominence`.
    pub fn by_prominence(x: &[f64], min_prominence: f64) -> Vec<usize> {
        let peaks = Self::local_maxima(x);
        let prominences = Self::prominences(x, &peaks);
        peaks
            .into_iter()
            .zip(prominences)
            .filter_map(|(peak, prom)| (prom.value >= min_prominence).then_some(peak))
            .collect()
    }

    /// Peaks at least `min_width` samples wide at half their prominence.
    pub fn by_width(x: &[f64], min_width: f64) -> Vec<usize> {
        let peaks = Self::local_maxima(x);
        let prominences = Self::prominences(x, &peaks);
        let widths = Self::widths(x, &peaks, &prominences, 0.5);
        peaks
            .into_iter()
            .zip(widths)
            .filter_map(|(peak, width)| (width >= min_width).then_some(peak))
            .collect()
    }

    pub fn prominences(x: &[f64], peaks: &[usize]) -> Vec<Prominence> {
        peaks
            .iter()
            .map(|&peak| {
                let top = x[peak];

                let mut left_min = top;
                let mut left_base = peak;
                let mut i = peak as isize;
                while i >= 0 && x[i as usize] <= top {
                    if x[i as usize] < left_min {
                        left_min = x[i as usize];
                        left_base = i as usize;
                    }
                    i -= 1;
                }

                let mut right_min = top;
                let mut right_base = peak;
                let mut i = peak;
                while i < x.len() && x[i] <= top {
                    if x[i] < right_min {
                        right_min = x[i];
                        right_base = i;
                    }
                    i += 1;
                }

                Prominence {
                    value: top - left_min.max(right_min),
                    left_base,
                    right_base,
                }
            })
            .collect()
    }

    /// Interpolated widths at `rel_height` of each peak's prominence.
    pub fn widths(x: &[f64], peaks: &[usize], prominences: &[Prominence], rel_height: f64) -> Vec<f64> {
        peaks
            .iter()
            .zip(prominences)
            .map(|(&peak, prom)| {
                let height = x[peak] - prom.value * rel_height;

                let mut i = peak;
                while prom.left_base < i && height < x[i] {
                    i -= 1;
                }
                let mut left = i as f64;
                if x[i] < height {
                    left += (height - x[i]) / (x[i + 1] - x[i]);
                }

                let mut i = peak;
                while i < prom.right_base && height < x[i] {
                    i += 1;
                }
                let mut right = i as f64;
                if x[i] < height {
                    right -= (height - x[i]) / (x[i - 1] - x[i]);
                }

                right - left
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian(len: usize, centre: f64, sigma: f64) -> Vec<f64> {
        (0..len)
            .map(|i| (-((i as f64 - centre) / sigma).powi(2) / 2.0).exp())
            .collect()
    }

    #[test]
    fn local_maxima_resolve_plateaus_to_midpoint() {
        let x = [0.0, 1.0, 1.0, 1.0, 0.0, 2.0, 0.0];
        assert_eq!(PeakFinder::local_maxima(&x), vec![2, 5]);
    }

    #[test]
    fn edges_are_never_peaks() {
        let x = [5.0, 1.0, 0.0, 1.0, 5.0];
        assert!(PeakFinder::local_maxima(&x).is_empty());
        assert!(PeakFinder::local_maxima(&[1.0, 2.0]).is_empty());
    }

    #[test]
    fn distance_keeps_highest_peak() {
        let x = [0.0, 1.0, 0.0, 3.0, 0.0, 2.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        assert_eq!(PeakFinder::by_distance(&x, 3.0), vec![3, 9]);
        assert_eq!(PeakFinder::by_distance(&x, 1.0), vec![1, 3, 5, 9]);
    }

    #[test]
    fn prominence_measures_against_higher_neighbour_base() {
        let x = [0.0, 3.0, 1.0, 2.0, 0.0];
        let peaks = PeakFinder::local_maxima(&x);
        let prominences = PeakFinder::prominences(&x, &peaks);
        assert_eq!(prominences[0].value, 3.0);
        assert_eq!(prominences[1].value, 1.0);
        assert_eq!(PeakFinder::by_prominence(&x, 1.5), vec![1]);
    }

    #[test]
    fn width_of_gaussian_matches_fwhm() {
        let x = gaussian(200, 100.0, 4.0);
        let peaks = PeakFinder::local_maxima(&x);
        assert_eq!(peaks, vec![100]);
        let prominences = PeakFinder::prominences(&x, &peaks);
        let widths = PeakFinder::widths(&x, &peaks, &prominences, 0.5);
        let fwhm = 2.0 * (2.0 * 2f64.ln()).sqrt() * 4.0;
        assert!((widths[0] - fwhm).abs() < 0.1);
        assert_eq!(PeakFinder::by_width(&x, 5.0), vec![100]);
        assert!(PeakFinder::by_width(&x, 12.0).is_empty());
    }

    #[test]
    fn threshold_compares_direct_neighbours() {
        let x = [0.0, 1.0, 0.9, 0.0, 2.0, 0.0];
        assert_eq!(PeakFinder::by_threshold(&x, 0.5), vec![4]);
        assert_eq!(PeakFinder::by_threshold(&x, 0.05), vec![1, 4]);
    }
}
