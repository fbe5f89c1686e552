use crate::fit::parameters::PeakWidthMode;
use crate::fit::state::FitState;

/// One scalar of a [`FitState`] that may appear in the parameter vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamSlot {
    BackgroundIntercept,
    BackgroundSlope,
    AverageWidth,
    Height(usize),
    Centroid(usize),
    ExtraWidth(usize),
}

/// Which scalars of one peak are free.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeakVary {
    pub height: bool,
    pub centroid: bool,
    pub extra_width: bool,
}

impl PeakVary {
    pub fn count(&self) -> usize {
        self.height as usize + self.centroid as usize + self.extra_width as usize
    }
}

/// Per-cycle selection of the free scalars, mirroring the layout of a
/// [`FitState`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VaryMask {
    pub intercept: bool,
    pub slope: bool,
    pub average_width: bool,
    pub peaks: Vec<PeakVary>,
}

impl VaryMask {
    /// Builds the mask for one optimisation of `state`.
    ///
    /// Background intercept, slope and every height always vary. A centroid
    /// varies unless it is fixed. The average width varies in `Varies` mode
    /// when some centroid is free. A 511 keV extra width varies when it is
    /// nonzero and the region has more than one peak or the width mode is
    /// `Fixed`.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use gammacore::fit::parameters::PeakWidthMode;
    /// # use gammacore::fit::state::{FitState, PeakState};
    /// # use gammacore::fit::vary::VaryMask;
    /// let state = FitState {
    ///     background_intercept: 10.0,
    ///     background_slope: 0.0,
    ///     avg_peak_width: 5.0,
    ///     contains_511kev: false,
    ///     initial_peak_width: 5.0,
    ///     peaks: vec![PeakState::new(1000.0, 50.0, 0.0, false)],
    /// };
    /// let mask = VaryMask::for_state(&state, PeakWidthMode::Varies);
    /// assert_eq!(mask.vary_count(), 5);
    /// ```
    pub fn for_state(state: &FitState, mode: PeakWidthMode) -> Self {
        let peak_count = state.peaks.len();
        let average_width = mode == PeakWidthMode::Varies
            && state.peaks.iter().any(|p| !p.fixed_centroid);

        let peaks = state
            .peaks
            .iter()
            .map(|p| PeakVary {
                height: true,
                centroid: !p.fixed_centroid,
                extra_width: p.add_width_511 != 0.0
                    && (peak_count > 1 || mode == PeakWidthMode::Fixed),
            })
            .collect();

        VaryMask {
            intercept: true,
            slope: true,
            average_width,
            peaks,
        }
    }

    /// Number of free scalars, the length of the parameter vector.
    pub fn vary_count(&self) -> usize {
        self.intercept as usize
            + self.slope as usize
            + self.average_width as usize
            + self.peaks.iter().map(PeakVary::count).sum::<usize>()
    }

    /// The free scalars in parameter vector order: intercept, slope, average
    /// width, then height, centroid and extra width of each peak in list order.
    ///
    /// Vector extraction, write-back, Jacobian columns and covariance lookups
    /// all walk this sequence.
    pub fn slots(&self) -> Vec<ParamSlot> {
        let mut slots = Vec::with_capacity(self.vary_count());
        if self.intercept {
            slots.push(ParamSlot::BackgroundIntercept);
        }
        if self.slope {
            slots.push(ParamSlot::BackgroundSlope);
        }
        if self.average_width {
            slots.push(ParamSlot::AverageWidth);
        }
        for (i, pv) in self.peaks.iter().enumerate() {
            if pv.height {
                slots.push(ParamSlot::Height(i));
            }
            if pv.centroid {
                slots.push(ParamSlot::Centroid(i));
            }
            if pv.extra_width {
                slots.push(ParamSlot::ExtraWidth(i));
            }
        }
        slots
    }

    /// Position of `slot` in the parameter vector, `None` when it is held.
    pub fn index_of(&self, slot: ParamSlot) -> Option<usize> {
        self.slots().iter().position(|s| *s == slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::state::PeakState;

    fn state_with(peaks: Vec<PeakState>) -> FitState {
        FitState {
            background_intercept: 10.0,
            background_slope: 0.0,
            avg_peak_width: 5.0,
            contains_511kev: peaks.iter().any(|p| p.add_width_511 != 0.0),
            initial_peak_width: 5.0,
            peaks,
        }
    }

    #[test]
    fn test_fixed_centroids_hold_average_width() {
        let state = state_with(vec![
            PeakState::new(100.0, 30.0, 0.0, true),
            PeakState::new(100.0, 60.0, 0.0, true),
        ]);
        let mask = VaryMask::for_state(&state, PeakWidthMode::Varies);
        assert!(!mask.average_width);
        assert_eq!(mask.vary_count(), 4);
    }

    #[test]
    fn test_single_511_peak_extra_width() {
        let state = state_with(vec![PeakState::new(100.0, 30.0, 5.0, false)]);
        let varies = VaryMask::for_state(&state, PeakWidthMode::Varies);
        assert!(!varies.peaks[0].extra_width);

        let fixed = VaryMask::for_state(&state, PeakWidthMode::Fixed);
        assert!(fixed.peaks[0].extra_width);
        assert!(!fixed.average_width);
    }

    #[test]
    fn test_slot_order() {
        let state = state_with(vec![
            PeakState::new(100.0, 30.0, 0.0, false),
            PeakState::new(100.0, 60.0, 5.0, true),
        ]);
        let mask = VaryMask::for_state(&state, PeakWidthMode::Varies);
        assert_eq!(
            mask.slots(),
            vec![
                ParamSlot::BackgroundIntercept,
                ParamSlot::BackgroundSlope,
                ParamSlot::AverageWidth,
                ParamSlot::Height(0),
                ParamSlot::Centroid(0),
                ParamSlot::Height(1),
                ParamSlot::ExtraWidth(1),
            ]
        );
        assert_eq!(mask.index_of(ParamSlot::ExtraWidth(1)), Some(6));
        assert_eq!(mask.index_of(ParamSlot::Centroid(1)), None);
    }
}
