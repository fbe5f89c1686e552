use serde::{Deserialize, Serialize};

use crate::calibration::energy::EnergyEquation;
use crate::data::channel_range::ChannelRange;
use crate::data::peak::{Peak, POSITION_THRESHOLD};
use crate::data::spectrum::Spectrum;
use crate::fit::gaussian::area_factor_squared;
use crate::fit::state::FitState;
use crate::fit::uncertainty::FitUncertainty;

/// Fitted background line `b(x) = intercept + slope * (x - first)` with its
/// uncertainties.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackgroundEquation {
    pub first_channel: i32,
    pub intercept: f64,
    pub intercept_uncertainty: f64,
    pub slope: f64,
    pub slope_uncertainty: f64,
    pub covariance: f64,
}

impl BackgroundEquation {
    pub fn new(region: &ChannelRange, state: &FitState, uncertainty: &FitUncertainty) -> Self {
        BackgroundEquation {
            first_channel: region.first(),
            intercept: state.background_intercept,
            intercept_uncertainty: uncertainty.background_intercept,
            slope: state.background_slope,
            slope_uncertainty: uncertainty.background_slope,
            covariance: uncertainty.background_covariance,
        }
    }

    /// Background counts at `channel`.
    pub fn background_at(&self, channel: f64) -> f64 {
        self.intercept + self.slope * (channel - self.first_channel as f64)
    }
}

/// Reported values of one fitted peak.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeakSummary {
    pub channel: f64,
    pub channel_uncertainty: f64,
    pub height: f64,
    pub height_uncertainty: f64,
    pub width: f64,
    pub width_uncertainty: f64,
    pub area: f64,
    pub area_uncertainty: f64,
    pub energy: f64,
    pub energy_uncertainty: f64,
    /// Centroid came from a fixed input peak.
    pub channel_fixed: bool,
    pub negative: bool,
    pub outside_region: bool,
    /// A negative and a positive peak closer than half the average width.
    pub pos_neg_pair: bool,
}

/// Per-peak report of a fit, ordered by channel, and the ratio of the
/// background-subtracted count sum to the summed peak areas.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub peaks: Vec<PeakSummary>,
    pub ratio: f64,
}

/// `fwhm * height * sqrt(pi / (4 ln 2))`.
pub fn peak_area(fwhm: f64, height: f64) -> f64 {
    fwhm * height * area_factor_squared().sqrt()
}

impl Summary {
    pub fn new(
        spectrum: &Spectrum,
        region: &ChannelRange,
        ex: &EnergyEquation,
        input_peaks: &[Peak],
        state: &FitState,
        uncertainty: &FitUncertainty,
    ) -> Self {
        let mut peaks: Vec<PeakSummary> = state
            .peaks
            .iter()
            .zip(&uncertainty.peaks)
            .enumerate()
            .map(|(i, (peak, u))| {
                let width = state.fwhm(i);
                PeakSummary {
                    channel: peak.centroid,
                    channel_uncertainty: u.centroid,
                    height: peak.height,
                    height_uncertainty: u.height,
                    width,
                    width_uncertainty: u.fwhm,
                    area: peak_area(width, peak.height),
                    area_uncertainty: u.area,
                    energy: ex.energy_of(peak.centroid),
                    energy_uncertainty: u.centroid_energy,
                    channel_fixed: false,
                    negative: peak.height < 0.0,
                    outside_region: !region.contains(peak.centroid),
                    pos_neg_pair: false,
                }
            })
            .collect();
        peaks.sort_by(|a, b| a.channel.total_cmp(&b.channel));

        for input in input_peaks.iter().filter(|p| p.is_centroid_fixed()) {
            let Some(channel) = input.channel() else {
                continue;
            };
            if let Some(summary) = peaks
                .iter_mut()
                .find(|s| (s.channel - channel).abs() < POSITION_THRESHOLD)
            {
                summary.channel_fixed = true;
            }
        }

        let half_width = state.avg_peak_width / 2.0;
        let mut paired = vec![false; peaks.len()];
        for (n, neg) in peaks.iter().enumerate().filter(|(_, p)| p.height < 0.0) {
            for (m, pos) in peaks.iter().enumerate().filter(|(_, p)| p.height > 0.0) {
                if (neg.channel - pos.channel).abs() < half_width {
                    paired[n] = true;
                    paired[m] = true;
                }
            }
        }
        for (summary, pair) in peaks.iter_mut().zip(paired) {
            summary.pos_neg_pair = pair;
        }

        let ratio = area_ratio(spectrum, region, state, &peaks);
        Summary { peaks, ratio }
    }
}

fn area_ratio(spectrum: &Spectrum, region: &ChannelRange, state: &FitState, peaks: &[PeakSummary]) -> f64 {
    let span = (region.last() - region.first()) as f64;
    let average_background = state.background_intercept + state.background_slope * span / 2.0;
    let counts: f64 = region
        .channels()
        .map(|c| spectrum.get_count(c).unwrap_or(0) as f64 - average_background)
        .sum();
    let areas: f64 = peaks.iter().map(|p| p.area).sum();
    if areas != 0.0 {
        counts / areas
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::state::PeakState;
    use crate::fit::uncertainty::PeakUncertainty;

    fn state() -> FitState {
        FitState {
            background_intercept: 10.0,
            background_slope: 0.0,
            avg_peak_width: 4.0,
            contains_511kev: false,
            initial_peak_width: 4.0,
            peaks: vec![
                PeakState::new(300.0, 40.0, 0.0, true),
                PeakState::new(-20.0, 25.0, 0.0, false),
                PeakState::new(50.0, 26.5, 0.0, false),
            ],
        }
    }

    fn uncertainty(n: usize) -> FitUncertainty {
        FitUncertainty {
            peaks: vec![PeakUncertainty::default(); n],
            ..FitUncertainty::default()
        }
    }

    #[test]
    fn test_peaks_ordered_and_flagged() {
        let spectrum = Spectrum::new(0, vec![10; 100]);
        let region = ChannelRange::new(20, 60);
        let ex = EnergyEquation::linear(0.0, 2.0);
        let inputs = vec![Peak::from_channel(40.0, true)];
        let state = state();

        let summary = Summary::new(&spectrum, &region, &ex, &inputs, &state, &uncertainty(3));
        let channels: Vec<f64> = summary.peaks.iter().map(|p| p.channel).collect();
        assert_eq!(channels, vec![25.0, 26.5, 40.0]);

        assert!(summary.peaks[0].negative);
        assert!(summary.peaks[0].pos_neg_pair);
        assert!(summary.peaks[1].pos_neg_pair);
        assert!(!summary.peaks[2].pos_neg_pair);
        assert!(summary.peaks[2].channel_fixed);
        assert_eq!(summary.peaks[2].energy, 80.0);
        assert!((summary.peaks[2].area - peak_area(4.0, 300.0)).abs() < 1e-9);
    }

    #[test]
    fn test_ratio_of_flat_spectrum_is_zero() {
        let spectrum = Spectrum::new(0, vec![10; 100]);
        let region = ChannelRange::new(20, 60);
        let summary = Summary::new(
            &spectrum,
            &region,
            &EnergyEquation::linear(0.0, 1.0),
            &[],
            &state(),
            &uncertainty(3),
        );
        assert_eq!(summary.ratio, 0.0);
    }

    #[test]
    fn test_background_equation() {
        let region = ChannelRange::new(20, 60);
        let mut s = state();
        s.background_slope = 0.5;
        let bg = BackgroundEquation::new(&region, &s, &uncertainty(3));
        assert_eq!(bg.background_at(20.0), 10.0);
        assert_eq!(bg.background_at(30.0), 15.0);
    }
}
