use nalgebra::{DMatrix, DVector};

use crate::data::channel_range::ChannelRange;
use crate::data::spectrum::Spectrum;
use crate::fit::optimizer::LeastSquaresProblem;
use crate::fit::state::FitState;
use crate::fit::vary::{ParamSlot, VaryMask};

/// Weighted residuals and analytic Jacobian of the region model against the
/// spectrum, as seen by the solver.
///
/// The model owns the [`FitState`] it evaluates and overwrites it from every
/// candidate vector, so derived values (widths) always match that vector.
pub struct ResidualModel<'a> {
    spectrum: &'a Spectrum,
    region: ChannelRange,
    mask: VaryMask,
    slots: Vec<ParamSlot>,
    state: FitState,
}

impl<'a> ResidualModel<'a> {
    pub fn new(spectrum: &'a Spectrum, region: ChannelRange, state: FitState, mask: VaryMask) -> Self {
        let slots = mask.slots();
        ResidualModel { spectrum, region, mask, slots, state }
    }

    pub fn state(&self) -> &FitState {
        &self.state
    }

    pub fn into_state(self) -> FitState {
        self.state
    }

    fn sigma_at(&self, channel: i32) -> f64 {
        self.spectrum.sigma(channel)
    }

    /// `(count - model) / sigma` per region channel for the current state;
    /// a channel with zero sigma contributes nothing.
    pub fn current_residuals(&self) -> DVector<f64> {
        let first = self.region.first();
        DVector::from_iterator(
            self.region.width(),
            self.region.channels().map(|c| {
                let sigma = self.sigma_at(c);
                if sigma == 0.0 {
                    return 0.0;
                }
                let observed = self.spectrum.count(c) as f64;
                (observed - self.state.model_at(first, c as f64)) / sigma
            }),
        )
    }

    /// Analytic `d residual / d parameter` for the current state, one column
    /// per slot of the mask.
    pub fn current_jacobian(&self) -> DMatrix<f64> {
        let first = self.region.first();
        let models: Vec<_> = (0..self.state.peak_count())
            .map(|i| self.state.peak_model(i))
            .collect();

        let mut jacobian = DMatrix::zeros(self.region.width(), self.slots.len());
        for (row, channel) in self.region.channels().enumerate() {
            let sigma = self.sigma_at(channel);
            if sigma == 0.0 {
                continue;
            }
            let x = channel as f64;
            for (col, slot) in self.slots.iter().enumerate() {
                let d_model = match *slot {
                    ParamSlot::BackgroundIntercept => 1.0,
                    ParamSlot::BackgroundSlope => (channel - first) as f64,
                    ParamSlot::AverageWidth => models.iter().map(|m| m.width_derivative(x)).sum::<f64>(),
                    ParamSlot::Height(i) => models[i].shape(x),
                    ParamSlot::Centroid(i) => models[i].centroid_derivative(x),
                    ParamSlot::ExtraWidth(i) => models[i].width_derivative(x),
                };
                jacobian[(row, col)] = -d_model / sigma;
            }
        }
        jacobian
    }
}

impl LeastSquaresProblem for ResidualModel<'_> {
    fn parameter_count(&self) -> usize {
        self.slots.len()
    }

    fn residual_count(&self) -> usize {
        self.region.width()
    }

    fn residuals(&mut self, x: &DVector<f64>) -> DVector<f64> {
        self.state.write_vector(x, &self.mask);
        self.current_residuals()
    }

    fn jacobian(&mut self, x: &DVector<f64>) -> DMatrix<f64> {
        self.state.write_vector(x, &self.mask);
        self.current_jacobian()
    }
}
