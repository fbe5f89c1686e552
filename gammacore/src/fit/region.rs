//! The region fit cycle loop.
//!
//! A region fit starts from the candidate peaks, optimises the model, and then
//! repeatedly inspects the converged model: two peaks that collapsed onto each
//! other lose the smaller one, a large positive residual gains a new peak.
//! Every successful cycle yields a [`FitRecord`]; the records are ranked by
//! chi squared.

use itertools::Itertools;
use log::{debug, info, warn};

use crate::calibration::energy::EnergyEquation;
use crate::calibration::width::WidthEquation;
use crate::data::channel_range::ChannelRange;
use crate::data::peak::{sort_peaks, Peak};
use crate::data::spectrum::Spectrum;
use crate::error::{FitError, Result};
use crate::fit::curve::Curve;
use crate::fit::optimizer::Optimizer;
use crate::fit::parameters::FitParameters;
use crate::fit::record::{FitRecord, ModelChange};
use crate::fit::residual::ResidualModel;
use crate::fit::state::FitState;
use crate::fit::uncertainty::FitUncertainty;
use crate::fit::vary::VaryMask;

/// Peaks closer than this fraction of the initial width collide.
pub const DELETE_PEAK_WIDTH_FRACTION: f64 = 0.2;

/// A new peak must be at least this many channels from every centroid.
pub const ADD_PEAK_DELTA_THRESHOLD: f64 = 1.0;

/// Everything one region fit reads. Owned, so separate region fits share
/// nothing.
#[derive(Clone, Debug)]
pub struct FitInputs {
    pub spectrum: Spectrum,
    pub region: ChannelRange,
    pub energy: EnergyEquation,
    pub width: WidthEquation,
    pub parameters: FitParameters,
    /// Candidate peaks, resolved against `energy` and ordered by position.
    pub peaks: Vec<Peak>,
}

impl FitInputs {
    /// Bundles the inputs of a region fit. Candidate peaks are resolved
    /// against the energy calibration and sorted; none are dropped.
    pub fn new(
        spectrum: Spectrum,
        region: ChannelRange,
        energy: EnergyEquation,
        width: WidthEquation,
        parameters: FitParameters,
        peaks: Vec<Peak>,
    ) -> Self {
        let mut peaks: Vec<Peak> = peaks.iter().map(|p| p.resolve(&energy)).collect();
        sort_peaks(&mut peaks);
        FitInputs { spectrum, region, energy, width, parameters, peaks }
    }

    /// Checks the inputs before any cycle runs.
    pub fn validate(&self) -> Result<()> {
        self.parameters.validate()?;
        if self.peaks.len() > self.parameters.max_peaks {
            return Err(FitError::TooManyInputPeaks {
                count: self.peaks.len(),
                max: self.parameters.max_peaks,
            });
        }
        // the background estimate reads the channel before the last one
        if !self.spectrum.covers(&self.region)
            || self.spectrum.get_count(self.region.last() - 1).is_none()
        {
            return Err(FitError::RegionOutsideSpectrum {
                first: self.region.first(),
                last: self.region.last(),
            });
        }
        Ok(())
    }
}

/// Outcome of inspecting a finished cycle. The changed variants carry the
/// state the next cycle starts from.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelCheck {
    AddPeak { channel: i32, height: f64, state: FitState },
    DeletePeak { index: usize, state: FitState },
    Done,
}

/// First pair of peaks `(j, k)`, `j < k`, with nonzero heights whose
/// centroids are closer than `0.2 * initial_peak_width`.
pub fn find_collision(state: &FitState) -> Option<(usize, usize)> {
    let threshold = DELETE_PEAK_WIDTH_FRACTION * state.initial_peak_width;
    (0..state.peak_count()).tuple_combinations().find(|&(j, k)| {
        let (a, b) = (&state.peaks[j], &state.peaks[k]);
        a.height != 0.0 && b.height != 0.0 && (a.centroid - b.centroid).abs() < threshold
    })
}

/// Channel of the largest positive residual where a new peak may go, with
/// that peak's initial height, or `None` when no peak should be added.
pub fn find_add_site(
    state: &FitState,
    curve: &Curve,
    spectrum: &Spectrum,
    region: &ChannelRange,
    parameters: &FitParameters,
) -> Option<(i32, f64)> {
    if state.peak_count() + 1 > parameters.max_peaks {
        return None;
    }

    let mut best: Option<(i32, f64)> = None;
    for r in curve.residuals() {
        if r.y > best.map_or(0.0, |(_, y)| y) {
            best = Some((r.x as i32, r.y));
        }
    }
    let (channel, residual) = best?;
    if residual < parameters.max_residual_threshold {
        return None;
    }

    let x = channel as f64;
    if state
        .peaks
        .iter()
        .any(|p| (p.centroid - x).abs() < ADD_PEAK_DELTA_THRESHOLD)
    {
        return None;
    }
    if channel - 1 < region.first() || channel + 1 >= region.last() {
        return None;
    }

    let left = curve.residual_at(channel - 1).map_or(0.0, |p| p.y);
    let right = curve.residual_at(channel + 1).map_or(0.0, |p| p.y);
    if left <= 0.0 && right <= 0.0 {
        return None;
    }

    let fit = curve.fit_at(channel)?.y;
    let observed = spectrum.get_count(channel)? as f64;
    Some((channel, observed - fit))
}

/// Decides whether the model the last cycle started from gets a peak
/// deleted, a peak added, or is final.
///
/// Collisions and the spacing of a new peak are judged on `state`, the
/// unoptimised starting model; residuals come from the converged `curve`.
/// The returned state is where the next cycle starts.
///
/// A collision is looked at first. Deleting is skipped, and the fit declared
/// done, when the resulting peak count was already produced by an earlier
/// cycle (`peak_history` holds the peak count of every completed cycle).
/// After a change every pre-existing peak is constrained.
///
/// # Arguments
///
/// * `inputs` - the region fit inputs.
/// * `state` - the state the last cycle started from.
/// * `curve` - per-channel curve of the last cycle's converged state.
/// * `peak_history` - peak counts of the completed cycles, in cycle order.
pub fn check_model(inputs: &FitInputs, state: &FitState, curve: &Curve, peak_history: &[usize]) -> ModelCheck {
    let region = &inputs.region;

    if let Some((j, k)) = find_collision(state) {
        let remaining = state.peak_count() - 1;
        if peak_history.contains(&remaining) {
            debug!("{}: {} peaks already fit, keeping peaks {} and {}", region, remaining, j, k);
            return ModelCheck::Done;
        }
        let index = if state.peaks[k].height < state.peaks[j].height { k } else { j };
        let next = state.without_peak(index).constrained(region, None);
        return ModelCheck::DeletePeak { index, state: next };
    }

    match find_add_site(state, curve, &inputs.spectrum, region, &inputs.parameters) {
        Some((channel, height)) => {
            let added = state.with_peak_added(channel as f64, inputs.energy.energy_of(channel as f64), height);
            let new_index = added.peak_count() - 1;
            let next = added.constrained(region, Some(new_index));
            ModelCheck::AddPeak { channel, height, state: next }
        }
        None => ModelCheck::Done,
    }
}

/// Optimises `state` once and builds the record of cycle `cycle`.
///
/// Fails with [`FitError::Overdetermined`] without calling the solver when
/// `region width - vary count <= 1`.
pub fn run_cycle(
    inputs: &FitInputs,
    optimizer: &dyn Optimizer,
    cycle: usize,
    state: FitState,
    origin: ModelChange,
) -> Result<FitRecord> {
    let mask = VaryMask::for_state(&state, inputs.parameters.peak_width_mode);
    let vary_count = mask.vary_count();
    let width = inputs.region.width();
    if width <= vary_count + 1 {
        return Err(FitError::Overdetermined { cycle, width, vary_count });
    }

    let start = state.extract_vector(&mask);
    let mut model = ResidualModel::new(&inputs.spectrum, inputs.region, state, mask.clone());
    let solution = optimizer
        .solve(&mut model, start, inputs.parameters.tolerances())
        .map_err(|e| FitError::divergence(cycle, &e))?;

    let mut fitted = model.into_state();
    fitted.write_vector(&solution.x, &mask);

    let uncertainty = FitUncertainty::propagate(&fitted, &mask, &solution.covariance, &inputs.energy);
    let record = FitRecord::new(
        inputs,
        cycle,
        fitted,
        vary_count,
        uncertainty,
        origin,
        solution.termination,
        solution.evaluations,
    );
    debug!(
        "{}: cycle {} peaks={} vary={} cost={:.4} chisq={:.4} evaluations={}",
        inputs.region,
        cycle,
        record.peak_count(),
        vary_count,
        solution.cost,
        record.chi_squared(),
        record.evaluations()
    );
    Ok(record)
}

/// Why the cycle loop ended.
#[derive(Clone, Debug, PartialEq)]
pub enum StopReason {
    /// The model check found nothing to change.
    Settled,
    /// `max_cycles` cycles ran.
    CycleLimit,
    /// A cycle after the first failed; earlier records were kept.
    Failed(FitError),
}

/// Ranked records of a region fit and how the loop ended.
#[derive(Clone, Debug)]
pub struct RegionFitOutcome {
    /// Best (lowest chi squared) first, at most `max_output_fits`.
    pub fits: Vec<FitRecord>,
    /// Cycles attempted, the failed one included.
    pub cycles_run: usize,
    pub stop: StopReason,
}

/// Runs the cycle loop of one region.
pub struct RegionFitter<'a> {
    inputs: &'a FitInputs,
    optimizer: &'a dyn Optimizer,
}

impl<'a> RegionFitter<'a> {
    pub fn new(inputs: &'a FitInputs, optimizer: &'a dyn Optimizer) -> Self {
        RegionFitter { inputs, optimizer }
    }

    /// Fits the region.
    ///
    /// Invalid inputs and a failing first cycle are errors. A failure in a
    /// later cycle ends the loop; the records collected so far are still
    /// ranked and returned.
    pub fn run(&self) -> Result<RegionFitOutcome> {
        let inputs = self.inputs;
        inputs.validate()?;

        let parameters = &inputs.parameters;
        // each cycle optimises a copy; model changes apply to the state it started from
        let mut model = FitState::initial(
            &inputs.spectrum,
            &inputs.region,
            &inputs.energy,
            &inputs.width,
            &inputs.peaks,
        );

        let first = run_cycle(inputs, self.optimizer, 1, model.clone(), ModelChange::Initial)?;
        let mut peak_history = vec![first.peak_count()];
        let mut records = vec![first];
        let mut cycles_run = 1;
        let mut stop = StopReason::CycleLimit;

        for cycle in 2..=parameters.max_cycles {
            let Some(last) = records.last() else {
                break;
            };
            let (state, origin) = match check_model(inputs, &model, last.curve(), &peak_history) {
                ModelCheck::Done => {
                    stop = StopReason::Settled;
                    break;
                }
                ModelCheck::AddPeak { channel, height, state } => {
                    info!("{}: adding peak at channel {} (height {:.1})", inputs.region, channel, height);
                    (state, ModelChange::PeakAdded { channel })
                }
                ModelCheck::DeletePeak { index, state } => {
                    let centroid = model.peaks[index].centroid;
                    info!("{}: deleting peak at channel {:.3}", inputs.region, centroid);
                    (state, ModelChange::PeakDeleted { centroid })
                }
            };

            cycles_run += 1;
            model = state;
            match run_cycle(inputs, self.optimizer, cycle, model.clone(), origin) {
                Ok(record) => {
                    peak_history.push(record.peak_count());
                    records.push(record);
                }
                Err(e) => {
                    warn!("{}: stopping after cycle {}: {}", inputs.region, cycle - 1, e);
                    stop = StopReason::Failed(e);
                    break;
                }
            }
        }

        records.sort_by(|a, b| a.chi_squared().total_cmp(&b.chi_squared()));
        records.truncate(parameters.max_output_fits);

        Ok(RegionFitOutcome {
            fits: records,
            cycles_run,
            stop,
        })
    }
}

/// Fits `inputs` and returns the ranked records, best first.
///
/// # Example
///
/// ```rust
/// # use gammacore::calibration::energy::EnergyEquation;
/// # use gammacore::calibration::width::WidthEquation;
/// # use gammacore::data::channel_range::ChannelRange;
/// # use gammacore::data::peak::Peak;
/// # use gammacore::data::spectrum::Spectrum;
/// # use gammacore::fit::optimizer::LevenbergMarquardt;
/// # use gammacore::fit::parameters::FitParameters;
/// # use gammacore::fit::region::{fit_region, FitInputs};
/// let counts: Vec<i32> = (0..100)
///     .map(|c| {
///         let mu = (c as f64 - 50.0) * (4.0 * std::f64::consts::LN_2).sqrt() / 5.0;
///         (10.0 + 1000.0 * (-mu * mu).exp()).round() as i32
///     })
///     .collect();
/// let inputs = FitInputs::new(
///     Spectrum::new(0, counts),
///     ChannelRange::new(20, 80),
///     EnergyEquation::linear(0.0, 1.0),
///     WidthEquation::linear(5.0, 0.0),
///     FitParameters::single_cycle(),
///     vec![Peak::from_channel(50.4, false)],
/// );
/// let fits = fit_region(&inputs, &LevenbergMarquardt::default()).unwrap();
/// assert!((fits[0].state().peaks[0].centroid - 50.0).abs() < 0.05);
/// ```
pub fn fit_region(inputs: &FitInputs, optimizer: &dyn Optimizer) -> Result<Vec<FitRecord>> {
    RegionFitter::new(inputs, optimizer).run().map(|outcome| outcome.fits)
}
