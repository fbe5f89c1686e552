use std::fmt::{self, Display, Formatter};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::calibration::energy::EnergyEquation;
use crate::calibration::width::WidthEquation;
use crate::data::channel_range::ChannelRange;
use crate::data::peak::{Peak, POSITION_THRESHOLD};
use crate::data::spectrum::Spectrum;
use crate::fit::curve::Curve;
use crate::fit::optimizer::Termination;
use crate::fit::parameters::FitParameters;
use crate::fit::region::FitInputs;
use crate::fit::state::FitState;
use crate::fit::summary::{BackgroundEquation, Summary};
use crate::fit::uncertainty::FitUncertainty;

/// The model change that produced the starting state of a cycle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ModelChange {
    /// First cycle, built from the candidate peaks.
    Initial,
    /// A peak was added at this channel.
    PeakAdded { channel: i32 },
    /// The peak at this centroid was deleted.
    PeakDeleted { centroid: f64 },
}

impl Display for ModelChange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ModelChange::Initial => write!(f, "initial"),
            ModelChange::PeakAdded { channel } => write!(f, "added peak at {}", channel),
            ModelChange::PeakDeleted { centroid } => write!(f, "deleted peak at {:.3}", centroid),
        }
    }
}

/// Snapshot of one successful fit cycle. Never modified once built.
#[derive(Clone, Debug)]
pub struct FitRecord {
    cycle: usize,
    state: FitState,
    vary_count: usize,
    uncertainty: FitUncertainty,
    curve: Curve,
    summary: Summary,
    background: BackgroundEquation,
    chi_sq: f64,
    origin: ModelChange,
    termination: Termination,
    evaluations: usize,
    spectrum: Spectrum,
    region: ChannelRange,
    energy: EnergyEquation,
    width: WidthEquation,
    parameters: FitParameters,
    input_peaks: Vec<Peak>,
}

impl FitRecord {
    /// Builds the record of cycle `cycle` from its converged state.
    ///
    /// Chi squared is the sum of squared channel residuals over
    /// `region width - vary_count` degrees of freedom.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        inputs: &FitInputs,
        cycle: usize,
        state: FitState,
        vary_count: usize,
        uncertainty: FitUncertainty,
        origin: ModelChange,
        termination: Termination,
        evaluations: usize,
    ) -> Self {
        let curve = Curve::new(&inputs.spectrum, &inputs.region, 1, &state);
        let sum_of_squares: f64 = curve.residuals().iter().map(|r| r.y * r.y).sum();
        let dof = inputs.region.width() as f64 - vary_count as f64;
        let chi_sq = sum_of_squares / dof;

        let summary = Summary::new(
            &inputs.spectrum,
            &inputs.region,
            &inputs.energy,
            &inputs.peaks,
            &state,
            &uncertainty,
        );
        let background = BackgroundEquation::new(&inputs.region, &state, &uncertainty);

        FitRecord {
            cycle,
            state,
            vary_count,
            uncertainty,
            curve,
            summary,
            background,
            chi_sq,
            origin,
            termination,
            evaluations,
            spectrum: inputs.spectrum.clone(),
            region: inputs.region,
            energy: inputs.energy,
            width: inputs.width,
            parameters: inputs.parameters.clone(),
            input_peaks: inputs.peaks.clone(),
        }
    }

    pub fn cycle(&self) -> usize {
        self.cycle
    }

    pub fn state(&self) -> &FitState {
        &self.state
    }

    pub fn peak_count(&self) -> usize {
        self.state.peak_count()
    }

    pub fn vary_count(&self) -> usize {
        self.vary_count
    }

    pub fn uncertainty(&self) -> &FitUncertainty {
        &self.uncertainty
    }

    /// Curve sampled once per channel.
    pub fn curve(&self) -> &Curve {
        &self.curve
    }

    /// Curve of this fit at another sample density.
    pub fn resample(&self, samples_per_channel: usize) -> Curve {
        Curve::new(&self.spectrum, &self.region, samples_per_channel, &self.state)
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn background(&self) -> &BackgroundEquation {
        &self.background
    }

    pub fn chi_squared(&self) -> f64 {
        self.chi_sq
    }

    pub fn origin(&self) -> ModelChange {
        self.origin
    }

    pub fn termination(&self) -> Termination {
        self.termination
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn region(&self) -> &ChannelRange {
        &self.region
    }

    pub fn input_peaks(&self) -> &[Peak] {
        &self.input_peaks
    }

    /// Degrees of freedom of the chi squared.
    pub fn degrees_of_freedom(&self) -> usize {
        self.region.width().saturating_sub(self.vary_count)
    }

    /// Probability of a chi squared at least this large for a correct model;
    /// `None` when no degrees of freedom remain.
    pub fn fit_probability(&self) -> Option<f64> {
        let dof = self.degrees_of_freedom() as f64;
        let dist = ChiSquared::new(dof).ok()?;
        Some(dist.sf(self.chi_sq * dof))
    }

    /// Fitted peaks as channel peaks resolved against the energy calibration,
    /// ordered by channel. A peak whose centroid uncertainty vanished (it was
    /// held) is marked fixed.
    pub fn output_peaks(&self) -> Vec<Peak> {
        self.summary
            .peaks
            .iter()
            .map(|s| {
                let fixed = s.channel_uncertainty.abs() < POSITION_THRESHOLD;
                Peak::from_channel(s.channel, fixed).resolve(&self.energy)
            })
            .collect()
    }
}

impl Display for FitRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.region)?;
        writeln!(f, "{}", self.energy)?;
        writeln!(f, "{}", self.width)?;
        writeln!(f, "{}", self.parameters)?;
        writeln!(
            f,
            "Fit Cycle={}; Origin={}; Solver returned={}; Fit Chi Squared={:.4}; Area Ratio={:.4}; NPeaks={}",
            self.cycle,
            self.origin,
            self.termination.code(),
            self.chi_sq,
            self.summary.ratio,
            self.summary.peaks.len()
        )?;
        writeln!(f, "Peak Record: chan, sigc, height, sigh, width, sigw, area, siga, energy, sige")?;
        for (i, p) in self.summary.peaks.iter().enumerate() {
            writeln!(
                f,
                "Peak {}: {:.4}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}",
                i + 1,
                p.channel,
                p.channel_uncertainty,
                p.height,
                p.height_uncertainty,
                p.width,
                p.width_uncertainty,
                p.area,
                p.area_uncertainty,
                p.energy,
                p.energy_uncertainty
            )?;
        }
        writeln!(f, "background: intercept at start of region,  slope")?;
        write!(
            f,
            "background: {:.4}, {:.4}",
            self.background.intercept, self.background.slope
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::state::PeakState;
    use crate::fit::uncertainty::PeakUncertainty;

    fn record() -> FitRecord {
        let counts: Vec<i32> = (0..60)
            .map(|c| {
                let mu = (c as f64 - 30.0) * 1.665_109_222_315_395_5 / 4.0;
                (25.0 + 400.0 * (-mu * mu).exp()).round() as i32
            })
            .collect();
        let inputs = FitInputs::new(
            Spectrum::new(0, counts),
            ChannelRange::new(10, 50),
            EnergyEquation::linear(0.0, 2.0),
            WidthEquation::linear(4.0, 0.0),
            FitParameters::default(),
            vec![Peak::from_channel(30.0, true)],
        );
        let state = FitState {
            background_intercept: 25.0,
            background_slope: 0.0,
            avg_peak_width: 4.0,
            contains_511kev: false,
            initial_peak_width: 4.0,
            peaks: vec![PeakState::new(400.0, 30.0, 0.0, true)],
        };
        let uncertainty = FitUncertainty {
            background_intercept: 1.0,
            peaks: vec![PeakUncertainty { height: 10.0, ..PeakUncertainty::default() }],
            ..FitUncertainty::default()
        };
        FitRecord::new(&inputs, 1, state, 3, uncertainty, ModelChange::Initial, Termination::Both, 7)
    }

    #[test]
    fn test_chi_squared_uses_vary_count() {
        let rec = record();
        let sum: f64 = rec.curve().residuals().iter().map(|r| r.y * r.y).sum();
        assert_eq!(rec.degrees_of_freedom(), 38);
        assert!((rec.chi_squared() - sum / 38.0).abs() < 1e-12);
        // the model is the rounded truth
        assert!(rec.chi_squared() < 0.1);
    }

    #[test]
    fn test_output_peaks_marked_fixed() {
        let rec = record();
        let peaks = rec.output_peaks();
        assert_eq!(peaks.len(), 1);
        assert!(peaks[0].is_centroid_fixed());
        assert_eq!(peaks[0].energy(), Some(60.0));
    }

    #[test]
    fn test_fit_probability_of_good_fit() {
        let p = record().fit_probability().unwrap();
        assert!(p > 0.99);
    }

    #[test]
    fn test_report_lists_peaks() {
        let text = record().to_string();
        assert!(text.starts_with("channelRange[first = 10 last = 50]"));
        assert!(text.contains("Fit Cycle=1; Origin=initial"));
        assert!(text.contains("Peak 1: 30.0000"));
        assert!(text.ends_with("background: 25.0000, 0.0000"));
    }
}
