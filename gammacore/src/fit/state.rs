use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::calibration::energy::EnergyEquation;
use crate::calibration::estimate::Estimate;
use crate::calibration::width::WidthEquation;
use crate::data::channel_range::ChannelRange;
use crate::data::peak::Peak;
use crate::data::spectrum::Spectrum;
use crate::fit::gaussian::PeakModel;
use crate::fit::vary::{ParamSlot, VaryMask};

/// Energy window (keV) around 511 keV inside which a peak is treated as an
/// annihilation peak.
pub const PK511KEV_THRESHOLD: f64 = 0.6;

/// Default initial width (channels) when the width calibration is undefined.
pub const DEFAULT_PEAK_WIDTH: f64 = 1.0;

/// Height floor applied when a peak is constrained.
pub const MIN_CONSTRAINED_HEIGHT: f64 = 10.0;

pub fn is_near_511kev(energy: f64) -> bool {
    (energy - 511.0).abs() <= PK511KEV_THRESHOLD
}

/// Numeric values of one model peak.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeakState {
    pub height: f64,
    pub centroid: f64,
    /// Extra width (channels) of a 511 keV peak, 0 for every other peak.
    pub add_width_511: f64,
    pub fixed_centroid: bool,
}

impl PeakState {
    pub fn new(height: f64, centroid: f64, add_width_511: f64, fixed_centroid: bool) -> Self {
        PeakState { height, centroid, add_width_511, fixed_centroid }
    }

    /// Copy pulled back into a sane range after a model change: a nonzero
    /// height below 10 becomes 10, a negative extra width becomes the initial
    /// width, and the centroid stays at least two channels inside the region.
    pub fn constrained(&self, region: &ChannelRange, initial_peak_width: f64) -> PeakState {
        let mut peak = *self;
        if peak.height < MIN_CONSTRAINED_HEIGHT && peak.height != 0.0 {
            peak.height = MIN_CONSTRAINED_HEIGHT;
        }
        if peak.add_width_511 < 0.0 {
            peak.add_width_511 = initial_peak_width;
        }
        let low = (region.first() + 2) as f64;
        let high = (region.last() - 2) as f64;
        if peak.centroid < low {
            peak.centroid = low;
        }
        if peak.centroid > high {
            peak.centroid = high;
        }
        peak
    }
}

/// Current values of every model parameter of a region fit.
///
/// `FitState` is a value: model changes (`with_peak_added`, `without_peak`,
/// `constrained`) return a new state and leave `self` untouched. Only
/// `write_vector` mutates in place, for the solver's evaluations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitState {
    pub background_intercept: f64,
    pub background_slope: f64,
    pub avg_peak_width: f64,
    pub contains_511kev: bool,
    pub initial_peak_width: f64,
    pub peaks: Vec<PeakState>,
}

impl FitState {
    /// Builds the starting state of a region fit.
    ///
    /// The background intercept is the mean count of the last two region
    /// channels, the slope is zero, and the average width is the width
    /// calibration at the region midpoint ([`DEFAULT_PEAK_WIDTH`] if that is
    /// undefined). Candidate peaks are kept when their rounded channel lies in
    /// the region; when none remain a single peak is placed at the largest
    /// count, or at the region centre if that is within two channels of an
    /// edge. The first peak within 0.6 keV of 511 keV gets an extra width equal
    /// to the average width.
    ///
    /// # Arguments
    ///
    /// * `spectrum` - the counts; must cover `region`.
    /// * `region` - the channels being fit.
    /// * `ex` - energy calibration, used to detect a 511 keV peak.
    /// * `wx` - width calibration.
    /// * `peaks` - candidate peaks, already resolved to channels.
    pub fn initial(
        spectrum: &Spectrum,
        region: &ChannelRange,
        ex: &EnergyEquation,
        wx: &WidthEquation,
        peaks: &[Peak],
    ) -> FitState {
        let count = |channel: i32| spectrum.get_count(channel).unwrap_or(0) as f64;

        let last = region.last();
        let background_intercept = (count(last - 1) + count(last)) / 2.0;

        let avg_peak_width = match wx.fwhm_or(region.midpoint() as f64, DEFAULT_PEAK_WIDTH) {
            Estimate::Computed(w) => w,
            Estimate::Fallback { value, reason } => {
                log::warn!("{}: {}, using initial width {}", region, reason, value);
                value
            }
        };

        let mut state = FitState {
            background_intercept,
            background_slope: 0.0,
            avg_peak_width,
            contains_511kev: false,
            initial_peak_width: avg_peak_width,
            peaks: Vec::new(),
        };

        for peak in peaks {
            let Some(channel) = peak.channel() else {
                continue;
            };
            let rounded = channel.round() as i32;
            if rounded < region.first() || rounded > region.last() {
                continue;
            }
            let height = count(rounded) - background_intercept;
            let extra = state.claim_511_width(ex.energy_of(channel));
            state
                .peaks
                .push(PeakState::new(height, channel, extra, peak.is_centroid_fixed()));
        }

        if state.peaks.is_empty() {
            let mut best: Option<(i32, f64)> = None;
            for channel in region.channels() {
                let c = count(channel);
                if c > best.map_or(0.0, |(_, m)| m) {
                    best = Some((channel, c));
                }
            }
            let channel = match best {
                Some((ch, _)) if ch >= region.first() + 2 && ch <= region.last() - 2 => ch,
                _ => (region.first() + region.last()) / 2,
            };
            let height = count(channel) - background_intercept;
            let extra = state.claim_511_width(ex.energy_of(channel as f64));
            state
                .peaks
                .push(PeakState::new(height, channel as f64, extra, false));
        }

        state
    }

    fn claim_511_width(&mut self, energy: f64) -> f64 {
        if !self.contains_511kev && is_near_511kev(energy) {
            self.contains_511kev = true;
            self.avg_peak_width
        } else {
            0.0
        }
    }

    pub fn peak_count(&self) -> usize {
        self.peaks.len()
    }

    /// FWHM of peak `index`: `|avg_peak_width + add_width_511|`.
    pub fn fwhm(&self, index: usize) -> f64 {
        (self.avg_peak_width + self.peaks[index].add_width_511).abs()
    }

    pub fn peak_model(&self, index: usize) -> PeakModel {
        let peak = &self.peaks[index];
        PeakModel::new(peak.height, peak.centroid, self.fwhm(index))
    }

    /// Background at `offset` channels past the first region channel.
    pub fn background_at(&self, offset: f64) -> f64 {
        self.background_intercept + self.background_slope * offset
    }

    /// Background plus every peak at channel `x` of a region starting at `first`.
    pub fn model_at(&self, first: i32, x: f64) -> f64 {
        let peaks: f64 = (0..self.peaks.len()).map(|i| self.peak_model(i).value(x)).sum();
        self.background_at(x - first as f64) + peaks
    }

    pub fn get(&self, slot: ParamSlot) -> f64 {
        match slot {
            ParamSlot::BackgroundIntercept => self.background_intercept,
            ParamSlot::BackgroundSlope => self.background_slope,
            ParamSlot::AverageWidth => self.avg_peak_width,
            ParamSlot::Height(i) => self.peaks[i].height,
            ParamSlot::Centroid(i) => self.peaks[i].centroid,
            ParamSlot::ExtraWidth(i) => self.peaks[i].add_width_511,
        }
    }

    pub fn set(&mut self, slot: ParamSlot, value: f64) {
        match slot {
            ParamSlot::BackgroundIntercept => self.background_intercept = value,
            ParamSlot::BackgroundSlope => self.background_slope = value,
            ParamSlot::AverageWidth => self.avg_peak_width = value,
            ParamSlot::Height(i) => self.peaks[i].height = value,
            ParamSlot::Centroid(i) => self.peaks[i].centroid = value,
            ParamSlot::ExtraWidth(i) => self.peaks[i].add_width_511 = value,
        }
    }

    /// The free scalars selected by `mask`, in parameter vector order.
    pub fn extract_vector(&self, mask: &VaryMask) -> DVector<f64> {
        let values: Vec<f64> = mask.slots().into_iter().map(|s| self.get(s)).collect();
        DVector::from_vec(values)
    }

    /// Overwrites the free scalars selected by `mask` from `x`; the inverse of
    /// [`FitState::extract_vector`].
    pub fn write_vector(&mut self, x: &DVector<f64>, mask: &VaryMask) {
        debug_assert_eq!(x.len(), mask.vary_count());
        for (slot, value) in mask.slots().into_iter().zip(x.iter()) {
            self.set(slot, *value);
        }
    }

    /// New state with an extra (non fixed) peak appended.
    ///
    /// The peak takes the 511 keV extra width when `energy` is near 511 keV
    /// and no other peak already carries it.
    pub fn with_peak_added(&self, centroid: f64, energy: f64, height: f64) -> FitState {
        let mut state = self.clone();
        let extra = state.claim_511_width(energy);
        state.peaks.push(PeakState::new(height, centroid, extra, false));
        state
    }

    /// New state without peak `index`.
    pub fn without_peak(&self, index: usize) -> FitState {
        let mut state = self.clone();
        let removed = state.peaks.remove(index);
        if removed.add_width_511 != 0.0 {
            state.contains_511kev = false;
        }
        state
    }

    /// New state with every peak except `skip` passed through
    /// [`PeakState::constrained`].
    pub fn constrained(&self, region: &ChannelRange, skip: Option<usize>) -> FitState {
        let mut state = self.clone();
        for (i, peak) in state.peaks.iter_mut().enumerate() {
            if Some(i) != skip {
                *peak = peak.constrained(region, self.initial_peak_width);
            }
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::parameters::PeakWidthMode;

    fn flat_spectrum(level: i32, len: usize) -> Spectrum {
        Spectrum::new(0, vec![level; len])
    }

    #[test]
    fn test_initial_state_from_candidates() {
        let mut counts = vec![10; 100];
        counts[50] = 1010;
        let spectrum = Spectrum::new(0, counts);
        let region = ChannelRange::new(20, 80);
        let ex = EnergyEquation::linear(0.0, 1.0);
        let wx = WidthEquation::linear(5.0, 0.0);
        let peaks = vec![
            Peak::from_channel(50.2, false),
            Peak::from_channel(95.0, false),
        ];

        let state = FitState::initial(&spectrum, &region, &ex, &wx, &peaks);
        assert_eq!(state.background_intercept, 10.0);
        assert_eq!(state.avg_peak_width, 5.0);
        assert_eq!(state.initial_peak_width, 5.0);
        assert_eq!(state.peak_count(), 1);
        assert_eq!(state.peaks[0].height, 1000.0);
        assert_eq!(state.peaks[0].centroid, 50.2);
        assert!(!state.contains_511kev);
    }

    #[test]
    fn test_width_fallback() {
        let spectrum = flat_spectrum(10, 100);
        let region = ChannelRange::new(20, 80);
        let ex = EnergyEquation::linear(0.0, 1.0);
        let wx = WidthEquation::square_root(-100.0, 0.0);
        let state = FitState::initial(&spectrum, &region, &ex, &wx, &[]);
        assert_eq!(state.avg_peak_width, DEFAULT_PEAK_WIDTH);
    }

    #[test]
    fn test_synthesized_peak_at_max_count() {
        let mut counts = vec![10; 100];
        counts[40] = 500;
        let spectrum = Spectrum::new(0, counts);
        let region = ChannelRange::new(20, 80);
        let ex = EnergyEquation::linear(0.0, 1.0);
        let wx = WidthEquation::linear(5.0, 0.0);

        let state = FitState::initial(&spectrum, &region, &ex, &wx, &[]);
        assert_eq!(state.peak_count(), 1);
        assert_eq!(state.peaks[0].centroid, 40.0);
        assert_eq!(state.peaks[0].height, 490.0);
    }

    #[test]
    fn test_synthesized_peak_near_edge_moves_to_centre() {
        let mut counts = vec![10; 100];
        counts[21] = 500;
        let spectrum = Spectrum::new(0, counts);
        let region = ChannelRange::new(20, 80);
        let ex = EnergyEquation::linear(0.0, 1.0);
        let wx = WidthEquation::linear(5.0, 0.0);

        let state = FitState::initial(&spectrum, &region, &ex, &wx, &[]);
        assert_eq!(state.peaks[0].centroid, 50.0);
        assert_eq!(state.peaks[0].height, 0.0);
    }

    #[test]
    fn test_only_first_511_peak_gets_extra_width() {
        let spectrum = flat_spectrum(10, 1200);
        let region = ChannelRange::new(1000, 1040);
        let ex = EnergyEquation::linear(0.0, 0.5);
        let wx = WidthEquation::linear(4.0, 0.0);
        let peaks = vec![
            Peak::from_channel(1022.0, false),
            Peak::from_channel(1022.8, false),
        ];

        let state = FitState::initial(&spectrum, &region, &ex, &wx, &peaks);
        assert!(state.contains_511kev);
        assert_eq!(state.peaks[0].add_width_511, 4.0);
        assert_eq!(state.peaks[1].add_width_511, 0.0);
        assert_eq!(state.fwhm(0), 8.0);
        assert_eq!(state.fwhm(1), 4.0);
    }

    #[test]
    fn test_fwhm_takes_absolute_value() {
        let state = FitState {
            background_intercept: 0.0,
            background_slope: 0.0,
            avg_peak_width: -3.0,
            contains_511kev: false,
            initial_peak_width: 3.0,
            peaks: vec![PeakState::new(1.0, 10.0, 0.0, false)],
        };
        assert_eq!(state.fwhm(0), 3.0);
    }

    #[test]
    fn test_mutations_return_new_states() {
        let state = FitState {
            background_intercept: 10.0,
            background_slope: 0.0,
            avg_peak_width: 4.0,
            contains_511kev: false,
            initial_peak_width: 4.0,
            peaks: vec![PeakState::new(100.0, 30.0, 0.0, false)],
        };
        let added = state.with_peak_added(60.0, 511.2, 50.0);
        assert_eq!(state.peak_count(), 1);
        assert_eq!(added.peak_count(), 2);
        assert!(added.contains_511kev);
        assert_eq!(added.peaks[1].add_width_511, 4.0);

        let removed = added.without_peak(1);
        assert!(!removed.contains_511kev);
        assert_eq!(removed, state);
    }

    #[test]
    fn test_constrain_skips_new_peak() {
        let region = ChannelRange::new(20, 80);
        let state = FitState {
            background_intercept: 10.0,
            background_slope: 0.0,
            avg_peak_width: 4.0,
            contains_511kev: true,
            initial_peak_width: 5.0,
            peaks: vec![
                PeakState::new(-3.0, 20.5, -1.0, false),
                PeakState::new(0.0, 79.0, 0.0, false),
                PeakState::new(2.0, 21.0, 0.0, false),
            ],
        };
        let out = state.constrained(&region, Some(2));
        assert_eq!(out.peaks[0], PeakState::new(10.0, 22.0, 5.0, false));
        assert_eq!(out.peaks[1], PeakState::new(0.0, 78.0, 0.0, false));
        assert_eq!(out.peaks[2], state.peaks[2]);
    }

    #[test]
    fn test_vector_round_trip() {
        let state = FitState {
            background_intercept: 12.0,
            background_slope: -0.1,
            avg_peak_width: 4.5,
            contains_511kev: true,
            initial_peak_width: 4.0,
            peaks: vec![
                PeakState::new(300.0, 40.0, 0.0, false),
                PeakState::new(120.0, 55.0, 2.0, true),
            ],
        };
        let mask = VaryMask::for_state(&state, PeakWidthMode::Varies);
        let x = state.extract_vector(&mask);
        assert_eq!(x.len(), mask.vary_count());

        let mut copy = state.clone();
        copy.write_vector(&x, &mask);
        assert_eq!(copy, state);

        let shifted = x.map(|v| v + 1.0);
        copy.write_vector(&shifted, &mask);
        assert_eq!(copy.extract_vector(&mask), shifted);
        // held scalars are untouched
        assert_eq!(copy.peaks[1].centroid, 55.0);
    }
}
