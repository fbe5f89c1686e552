use serde::{Deserialize, Serialize};

use crate::data::channel_range::ChannelRange;
use crate::data::spectrum::Spectrum;
use crate::fit::state::FitState;

/// A sampled point of a fit curve.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub x: f64,
    pub y: f64,
}

impl CurvePoint {
    pub fn new(x: f64, y: f64) -> Self {
        CurvePoint { x, y }
    }
}

/// Sampled model of a fitted region: background, every peak on top of the
/// background, their sum, and per-channel fits and residuals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    region: ChannelRange,
    samples_per_channel: usize,
    background: Vec<CurvePoint>,
    components: Vec<Vec<CurvePoint>>,
    summed: Vec<CurvePoint>,
    fits_at_channels: Vec<CurvePoint>,
    residuals: Vec<CurvePoint>,
}

/// Number of sample points over `region` at `n` samples per channel.
pub fn sample_count(region: &ChannelRange, n: usize) -> usize {
    (region.last() - region.first()) as usize * n + 1
}

fn background_points(region: &ChannelRange, n: usize, state: &FitState) -> Vec<CurvePoint> {
    let step = 1.0 / n as f64;
    (0..sample_count(region, n))
        .map(|i| {
            let offset = i as f64 * step;
            CurvePoint::new(region.first() as f64 + offset, state.background_at(offset))
        })
        .collect()
}

fn component_points(background: &[CurvePoint], state: &FitState, index: usize) -> Vec<CurvePoint> {
    let model = state.peak_model(index);
    background
        .iter()
        .map(|b| CurvePoint::new(b.x, b.y + model.value(b.x)))
        .collect()
}

/// Background plus each component with the background taken back out.
fn summed_points(background: &[CurvePoint], components: &[Vec<CurvePoint>]) -> Vec<CurvePoint> {
    background
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let peaks: f64 = components.iter().map(|c| c[i].y - b.y).sum();
            CurvePoint::new(b.x, b.y + peaks)
        })
        .collect()
}

impl Curve {
    /// Samples the model of `state` over `region`.
    ///
    /// # Arguments
    ///
    /// * `spectrum` - observed counts, for the residuals.
    /// * `region` - the fitted channels.
    /// * `samples_per_channel` - density of the sampled curves (at least 1).
    /// * `state` - the fitted parameters.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use gammacore::data::channel_range::ChannelRange;
    /// # use gammacore::data::spectrum::Spectrum;
    /// # use gammacore::fit::curve::Curve;
    /// # use gammacore::fit::state::{FitState, PeakState};
    /// let spectrum = Spectrum::new(0, vec![100; 30]);
    /// let state = FitState {
    ///     background_intercept: 100.0,
    ///     background_slope: 0.0,
    ///     avg_peak_width: 3.0,
    ///     contains_511kev: false,
    ///     initial_peak_width: 3.0,
    ///     peaks: vec![PeakState::new(50.0, 15.0, 0.0, false)],
    /// };
    /// let curve = Curve::new(&spectrum, &ChannelRange::new(10, 20), 4, &state);
    /// assert_eq!(curve.curve_points().len(), 41);
    /// assert!((curve.fit_at(15).unwrap().y - 150.0).abs() < 1e-9);
    /// ```
    pub fn new(spectrum: &Spectrum, region: &ChannelRange, samples_per_channel: usize, state: &FitState) -> Self {
        let n = samples_per_channel.max(1);

        let background = background_points(region, n, state);
        let components: Vec<Vec<CurvePoint>> = (0..state.peak_count())
            .map(|i| component_points(&background, state, i))
            .collect();
        let summed = summed_points(&background, &components);

        let channel_background = background_points(region, 1, state);
        let channel_components: Vec<Vec<CurvePoint>> = (0..state.peak_count())
            .map(|i| component_points(&channel_background, state, i))
            .collect();
        let fits_at_channels = summed_points(&channel_background, &channel_components);

        let residuals = fits_at_channels
            .iter()
            .map(|fit| {
                let channel = fit.x as i32;
                let sigma = spectrum.get_count(channel).map_or(0.0, |_| spectrum.sigma(channel));
                let resid = if sigma != 0.0 {
                    (spectrum.count(channel) as f64 - fit.y) / sigma
                } else {
                    0.0
                };
                CurvePoint::new(channel as f64, resid)
            })
            .collect();

        Curve {
            region: *region,
            samples_per_channel: n,
            background,
            components,
            summed,
            fits_at_channels,
            residuals,
        }
    }

    pub fn region(&self) -> &ChannelRange {
        &self.region
    }

    pub fn samples_per_channel(&self) -> usize {
        self.samples_per_channel
    }

    pub fn peak_count(&self) -> usize {
        self.components.len()
    }

    pub fn background_points(&self) -> &[CurvePoint] {
        &self.background
    }

    /// Peak `index` on top of the background.
    pub fn component_points(&self, index: usize) -> &[CurvePoint] {
        &self.components[index]
    }

    /// Background plus every peak.
    pub fn curve_points(&self) -> &[CurvePoint] {
        &self.summed
    }

    pub fn fits_at_channels(&self) -> &[CurvePoint] {
        &self.fits_at_channels
    }

    pub fn residuals(&self) -> &[CurvePoint] {
        &self.residuals
    }

    pub fn fit_at(&self, channel: i32) -> Option<CurvePoint> {
        self.channel_index(channel).map(|i| self.fits_at_channels[i])
    }

    pub fn residual_at(&self, channel: i32) -> Option<CurvePoint> {
        self.channel_index(channel).map(|i| self.residuals[i])
    }

    fn channel_index(&self, channel: i32) -> Option<usize> {
        if self.region.contains(channel as f64) {
            Some(self.region.offset(channel))
        } else {
            None
        }
    }

    /// Largest value of the summed and component curves within `delta`
    /// channels of `channel`; 0 outside the region.
    pub fn max_y(&self, channel: i32, delta: i32) -> f64 {
        if !self.region.contains(channel as f64) {
            return 0.0;
        }
        let low = (channel - delta).max(self.region.first()) as f64;
        let high = (channel + delta).min(self.region.last()) as f64;

        std::iter::once(&self.summed)
            .chain(self.components.iter())
            .flat_map(|points| points.iter())
            .filter(|p| p.x >= low && p.x <= high)
            .fold(0.0, |acc: f64, p| acc.max(p.y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::state::PeakState;

    fn two_peaks() -> FitState {
        FitState {
            background_intercept: 20.0,
            background_slope: 0.5,
            avg_peak_width: 3.0,
            contains_511kev: false,
            initial_peak_width: 3.0,
            peaks: vec![
                PeakState::new(200.0, 14.0, 0.0, false),
                PeakState::new(100.0, 18.0, 0.0, false),
            ],
        }
    }

    #[test]
    fn test_background_added_once() {
        let spectrum = Spectrum::new(0, vec![50; 40]);
        let region = ChannelRange::new(10, 25);
        let state = two_peaks();
        let curve = Curve::new(&spectrum, &region, 3, &state);

        assert_eq!(curve.background_points().len(), sample_count(&region, 3));
        for (i, p) in curve.curve_points().iter().enumerate() {
            let expected = state.model_at(10, p.x);
            assert!((p.y - expected).abs() < 1e-9, "sample {i}");
        }
    }

    #[test]
    fn test_residuals_match_counts() {
        let spectrum = Spectrum::new(0, vec![64; 40]);
        let region = ChannelRange::new(10, 25);
        let state = two_peaks();
        let curve = Curve::new(&spectrum, &region, 1, &state);

        let r = curve.residual_at(14).unwrap();
        assert_eq!(r.x, 14.0);
        let expected = (64.0 - state.model_at(10, 14.0)) / 8.0;
        assert!((r.y - expected).abs() < 1e-9);
        assert!(curve.residual_at(26).is_none());
    }

    #[test]
    fn test_max_y_window() {
        let spectrum = Spectrum::new(0, vec![50; 40]);
        let region = ChannelRange::new(10, 25);
        let curve = Curve::new(&spectrum, &region, 2, &two_peaks());

        let peak_top = curve.max_y(14, 1);
        assert!(peak_top > 200.0);
        assert!(curve.max_y(24, 1) < peak_top);
        assert_eq!(curve.max_y(30, 5), 0.0);
    }
}
