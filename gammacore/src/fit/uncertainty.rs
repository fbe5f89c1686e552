use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::calibration::energy::EnergyEquation;
use crate::fit::gaussian::area_factor_squared;
use crate::fit::state::FitState;
use crate::fit::vary::{ParamSlot, VaryMask};

/// Propagated uncertainties of one peak.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PeakUncertainty {
    pub height: f64,
    pub centroid: f64,
    pub add_width_511: f64,
    pub centroid_energy: f64,
    pub fwhm: f64,
    pub area: f64,
}

/// Uncertainties of every parameter of a converged [`FitState`], plus the
/// derived FWHM, area and energy uncertainties of each peak.
///
/// Scalars that were held during the fit have zero uncertainty.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FitUncertainty {
    pub background_intercept: f64,
    pub background_slope: f64,
    /// Covariance of intercept and slope, 0 unless both varied.
    pub background_covariance: f64,
    pub avg_peak_width: f64,
    pub peaks: Vec<PeakUncertainty>,
}

/// Reads entries of a covariance matrix through the slot order of a mask.
struct CovarianceView<'a> {
    covariance: &'a DMatrix<f64>,
    slots: Vec<ParamSlot>,
}

impl CovarianceView<'_> {
    fn index(&self, slot: ParamSlot) -> Option<usize> {
        self.slots.iter().position(|s| *s == slot)
    }

    fn sigma(&self, slot: ParamSlot) -> f64 {
        self.index(slot)
            .map_or(0.0, |i| self.covariance[(i, i)].max(0.0).sqrt())
    }

    fn cov(&self, a: ParamSlot, b: ParamSlot) -> f64 {
        match (self.index(a), self.index(b)) {
            (Some(i), Some(j)) => self.covariance[(i, j)],
            _ => 0.0,
        }
    }
}

impl FitUncertainty {
    /// Propagates the solver covariance of `state` into parameter and derived
    /// uncertainties.
    ///
    /// # Arguments
    ///
    /// * `state` - the converged state.
    /// * `mask` - the vary mask the covariance was computed with.
    /// * `covariance` - square, ordered like `mask.slots()`.
    /// * `ex` - energy calibration, for the centroid energy uncertainty.
    pub fn propagate(
        state: &FitState,
        mask: &VaryMask,
        covariance: &DMatrix<f64>,
        ex: &EnergyEquation,
    ) -> Self {
        let view = CovarianceView { covariance, slots: mask.slots() };

        let avg_peak_width = view.sigma(ParamSlot::AverageWidth);
        let peaks = state
            .peaks
            .iter()
            .enumerate()
            .map(|(i, peak)| {
                let height = view.sigma(ParamSlot::Height(i));
                let centroid = view.sigma(ParamSlot::Centroid(i));
                let add_width_511 = view.sigma(ParamSlot::ExtraWidth(i));

                let cov_width_height = view.cov(ParamSlot::AverageWidth, ParamSlot::Height(i));
                let cov_width_extra = view.cov(ParamSlot::AverageWidth, ParamSlot::ExtraWidth(i));
                let cov_height_extra = view.cov(ParamSlot::Height(i), ParamSlot::ExtraWidth(i));

                let fwhm_sq = add_width_511 * add_width_511
                    + avg_peak_width * avg_peak_width
                    + 2.0 * cov_width_extra;
                let h = peak.height;
                let w = state.fwhm(i);
                let area_sq = area_factor_squared()
                    * (h * h * fwhm_sq
                        + w * w * height * height
                        + 2.0 * w * h * (cov_height_extra + cov_width_height));

                PeakUncertainty {
                    height,
                    centroid,
                    add_width_511,
                    centroid_energy: (ex.linear_coefficient()
                        + 2.0 * peak.centroid * ex.quadratic_coefficient())
                        * centroid,
                    fwhm: fwhm_sq.max(0.0).sqrt(),
                    area: area_sq.max(0.0).sqrt(),
                }
            })
            .collect();

        FitUncertainty {
            background_intercept: view.sigma(ParamSlot::BackgroundIntercept),
            background_slope: view.sigma(ParamSlot::BackgroundSlope),
            background_covariance: view.cov(ParamSlot::BackgroundIntercept, ParamSlot::BackgroundSlope),
            avg_peak_width,
            peaks,
        }
    }
}
