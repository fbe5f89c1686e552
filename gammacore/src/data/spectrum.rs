use std::sync::Arc;
use serde::{Deserialize, Serialize};

use crate::data::channel_range::ChannelRange;

const SIGMA_FLOOR: f64 = 0.3;
const SIGMA_FLOOR_EDGE: f64 = 0.5773503;
const SIGMA_FLOOR_INNER: f64 = 0.3333333;
const SMALL_COUNT_LIMIT: i32 = 10;

/// Histogram of channel vs count (gamma-ray spectrum) with per-channel
/// count uncertainties.
///
/// Counts and sigmas sit behind `Arc`, so region fits can each own a copy cheaply.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Spectrum {
    first_channel: i32,
    counts: Arc<Vec<i32>>,
    sigma: Arc<Vec<f64>>,
}

impl Spectrum {
    /// Constructs a new `Spectrum`, deriving count uncertainties from the counts.
    ///
    /// Uncertainty is `sqrt(count)` (at least 0.3); channels with 10 counts or
    /// fewer get a smoothed estimate from their neighbours (G.W. Phillips,
    /// NIM 153 (1978), p. 449).
    ///
    /// # Arguments
    ///
    /// * `first_channel` - channel number of `counts[0]`.
    /// * `counts` - per-channel counts.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use gammacore::data::spectrum::Spectrum;
    /// let spectrum = Spectrum::new(100, vec![400, 400, 400, 400, 400]);
    /// assert_eq!(spectrum.count(102), 400);
    /// assert!((spectrum.sigma(102) - 20.0).abs() < 1e-12);
    /// ```
    pub fn new(first_channel: i32, counts: Vec<i32>) -> Self {
        let sigma = small_count_sigma(&counts);
        Spectrum {
            first_channel,
            counts: Arc::new(counts),
            sigma: Arc::new(sigma),
        }
    }

    /// Constructs a `Spectrum` with caller-supplied uncertainties.
    ///
    /// # Panics
    ///
    /// Panics if `counts` and `sigma` differ in length.
    pub fn with_sigma(first_channel: i32, counts: Vec<i32>, sigma: Vec<f64>) -> Self {
        assert_eq!(counts.len(), sigma.len(), "counts and sigma vectors must have the same length");
        Spectrum {
            first_channel,
            counts: Arc::new(counts),
            sigma: Arc::new(sigma),
        }
    }

    pub fn first_channel(&self) -> i32 {
        self.first_channel
    }

    pub fn last_channel(&self) -> i32 {
        self.first_channel + self.counts.len() as i32 - 1
    }

    /// The channels covered by this spectrum, `None` when it is empty.
    pub fn range(&self) -> Option<ChannelRange> {
        if self.counts.is_empty() {
            None
        } else {
            Some(ChannelRange::new(self.first_channel, self.last_channel()))
        }
    }

    /// Whether every channel of `region` has a count.
    pub fn covers(&self, region: &ChannelRange) -> bool {
        self.range().is_some_and(|r| region.within(&r))
    }

    /// Count at `channel`.
    ///
    /// # Panics
    ///
    /// Panics if the channel lies outside the spectrum.
    pub fn count(&self, channel: i32) -> i32 {
        self.counts[self.index(channel)]
    }

    /// Count uncertainty at `channel`.
    ///
    /// # Panics
    ///
    /// Panics if the channel lies outside the spectrum.
    pub fn sigma(&self, channel: i32) -> f64 {
        self.sigma[self.index(channel)]
    }

    pub fn get_count(&self, channel: i32) -> Option<i32> {
        let offset = channel.checked_sub(self.first_channel)?;
        usize::try_from(offset).ok().and_then(|i| self.counts.get(i).copied())
    }

    pub fn counts(&self) -> &[i32] {
        &self.counts
    }

    pub fn sigmas(&self) -> &[f64] {
        &self.sigma
    }

    fn index(&self, channel: i32) -> usize {
        (channel - self.first_channel) as usize
    }
}

fn sqrt_or(value: f64, floor: f64) -> f64 {
    let s = value.max(0.0).sqrt();
    if s <= 0.0 { floor } else { s }
}

fn small_count_sigma(counts: &[i32]) -> Vec<f64> {
    let n = counts.len();
    let mut sigma: Vec<f64> = counts
        .iter()
        .map(|&c| sqrt_or(c as f64, SIGMA_FLOOR))
        .collect();

    // the neighbourhood averages need two channels on either side somewhere
    if n < 5 {
        return sigma;
    }

    let c = |i: usize| counts[i] as f64;

    for i in 0..2 {
        if counts[i] <= SMALL_COUNT_LIMIT {
            sigma[i] = sqrt_or((c(i) + c(i + 1) + c(i + 2)) / 3.0, SIGMA_FLOOR_EDGE);
        }
    }
    for i in 2..n - 2 {
        if counts[i] <= SMALL_COUNT_LIMIT {
            let weighted = c(i - 2) + c(i + 2) + 2.0 * (c(i - 1) + c(i + 1)) + 3.0 * c(i);
            sigma[i] = sqrt_or(weighted / 9.0, SIGMA_FLOOR_INNER);
        }
    }
    for i in n - 2..n {
        if counts[i] <= SMALL_COUNT_LIMIT {
            sigma[i] = sqrt_or((c(i - 2) + c(i - 1) + c(i)) / 3.0, SIGMA_FLOOR_EDGE);
        }
    }

    sigma
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_large_counts_use_poisson_sigma() {
        let spectrum = Spectrum::new(0, vec![100, 400, 900, 1600, 2500, 3600]);
        assert!((spectrum.sigma(2) - 30.0).abs() < 1e-12);
        assert!((spectrum.sigma(5) - 60.0).abs() < 1e-12);
    }

    #[test]
    fn test_small_counts_are_smoothed() {
        // inner channel: (c0 + c4 + 2*(c1 + c3) + 3*c2) / 9
        let spectrum = Spectrum::new(0, vec![9, 9, 0, 9, 9, 9]);
        let expected = ((9.0 + 9.0 + 2.0 * (9.0 + 9.0) + 0.0) / 9.0f64).sqrt();
        assert!((spectrum.sigma(2) - expected).abs() < 1e-12);

        // leading edge: 3-point forward average
        let expected_first = ((9.0 + 9.0 + 0.0) / 3.0f64).sqrt();
        assert!((spectrum.sigma(0) - expected_first).abs() < 1e-12);
    }

    #[test]
    fn test_all_zero_counts_get_floors() {
        let spectrum = Spectrum::new(0, vec![0; 6]);
        assert!((spectrum.sigma(0) - SIGMA_FLOOR_EDGE).abs() < 1e-12);
        assert!((spectrum.sigma(3) - SIGMA_FLOOR_INNER).abs() < 1e-12);
        assert!((spectrum.sigma(5) - SIGMA_FLOOR_EDGE).abs() < 1e-12);
    }

    #[test]
    fn test_short_spectrum_skips_smoothing() {
        let spectrum = Spectrum::new(10, vec![0, 4, 9]);
        assert!((spectrum.sigma(10) - SIGMA_FLOOR).abs() < 1e-12);
        assert!((spectrum.sigma(11) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_covers_and_get_count() {
        let spectrum = Spectrum::new(10, vec![1, 2, 3, 4, 5]);
        assert!(spectrum.covers(&ChannelRange::new(10, 14)));
        assert!(!spectrum.covers(&ChannelRange::new(9, 14)));
        assert_eq!(spectrum.get_count(9), None);
        assert_eq!(spectrum.get_count(14), Some(5));
    }
}
