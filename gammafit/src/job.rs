use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use gammacore::calibration::energy::EnergyEquation;
use gammacore::calibration::width::WidthEquation;
use gammacore::data::channel_range::ChannelRange;
use gammacore::data::peak::Peak;
use gammacore::data::spectrum::Spectrum;
use gammacore::fit::curve::CurvePoint;
use gammacore::fit::parameters::FitParameters;
use gammacore::fit::record::{FitRecord, ModelChange};
use gammacore::fit::region::FitInputs;
use gammacore::fit::summary::{BackgroundEquation, Summary};

/// Counts of the spectrum section a job fits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpectrumSpec {
    #[serde(default)]
    pub first_channel: i32,
    pub counts: Vec<i32>,
    /// Per-channel uncertainties; derived from the counts when absent.
    #[serde(default)]
    pub sigma: Option<Vec<f64>>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RegionSpec {
    pub first: i32,
    pub last: i32,
}

/// A candidate peak, given by channel or by energy.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PeakSpec {
    Channel {
        channel: f64,
        #[serde(default)]
        fixed: bool,
    },
    Energy {
        energy: f64,
        #[serde(default)]
        energy_sigma: f64,
        #[serde(default)]
        fixed: bool,
    },
}

impl PeakSpec {
    pub fn to_peak(self) -> Peak {
        match self {
            PeakSpec::Channel { channel, fixed } => Peak::from_channel(channel, fixed),
            PeakSpec::Energy { energy, energy_sigma, fixed } => Peak::from_energy(energy, energy_sigma, fixed),
        }
    }
}

/// One region fit as read from a JSON job file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FitJob {
    pub spectrum: SpectrumSpec,
    pub energy: EnergyEquation,
    pub width: WidthEquation,
    pub region: RegionSpec,
    #[serde(default)]
    pub peaks: Vec<PeakSpec>,
    #[serde(default)]
    pub parameters: FitParameters,
}

impl FitJob {
    pub fn load(path: &Path) -> Result<FitJob> {
        let reader = BufReader::new(
            File::open(path).with_context(|| format!("opening job file {}", path.display()))?,
        );
        let job = serde_json::from_reader(reader)
            .with_context(|| format!("parsing job file {}", path.display()))?;
        Ok(job)
    }

    pub fn from_json(text: &str) -> Result<FitJob> {
        Ok(serde_json::from_str(text)?)
    }

    /// Builds the fit inputs, rejecting malformed spectra.
    pub fn into_inputs(self) -> Result<FitInputs> {
        let FitJob { spectrum, energy, width, region, peaks, parameters } = self;

        if spectrum.counts.is_empty() {
            bail!("spectrum has no counts");
        }
        let spectrum = match spectrum.sigma {
            Some(sigma) => {
                if sigma.len() != spectrum.counts.len() {
                    bail!(
                        "spectrum has {} counts but {} sigma values",
                        spectrum.counts.len(),
                        sigma.len()
                    );
                }
                if sigma.iter().any(|s| !s.is_finite() || *s < 0.0) {
                    bail!("sigma values must be finite and non-negative");
                }
                Spectrum::with_sigma(spectrum.first_channel, spectrum.counts, sigma)
            }
            None => Spectrum::new(spectrum.first_channel, spectrum.counts),
        };

        Ok(FitInputs::new(
            spectrum,
            ChannelRange::new(region.first, region.last),
            energy,
            width,
            parameters,
            peaks.into_iter().map(PeakSpec::to_peak).collect(),
        ))
    }
}

/// Serializable view of one ranked fit.
#[derive(Clone, Debug, Serialize)]
pub struct FitReport {
    pub rank: usize,
    pub cycle: usize,
    pub origin: ModelChange,
    pub chi_squared: f64,
    pub degrees_of_freedom: usize,
    pub fit_probability: Option<f64>,
    pub evaluations: usize,
    pub summary: Summary,
    pub background: BackgroundEquation,
    pub curve: Vec<CurvePoint>,
    pub residuals: Vec<CurvePoint>,
}

impl FitReport {
    pub fn new(rank: usize, record: &FitRecord, samples_per_channel: usize) -> Self {
        let curve = record.resample(samples_per_channel);
        FitReport {
            rank,
            cycle: record.cycle(),
            origin: record.origin(),
            chi_squared: record.chi_squared(),
            degrees_of_freedom: record.degrees_of_freedom(),
            fit_probability: record.fit_probability(),
            evaluations: record.evaluations(),
            summary: record.summary().clone(),
            background: *record.background(),
            curve: curve.curve_points().to_vec(),
            residuals: curve.residuals().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gammacore::fit::parameters::PeakWidthMode;

    const JOB: &str = r#"{
        "spectrum": { "first_channel": 100, "counts": [5, 6, 7, 8, 9, 10, 11, 12] },
        "energy": { "a": 0.0, "b": 0.5, "c": 0.0, "chi_sq": 0.0, "mode": "Linear" },
        "width": { "alpha": 3.0, "beta": 0.0, "chi_sq": 0.0, "mode": "Linear" },
        "region": { "first": 106, "last": 101 },
        "peaks": [
            { "channel": 104.2, "fixed": true },
            { "energy": 51.5 }
        ],
        "parameters": { "max_cycles": 4, "peak_width_mode": "Fixed" }
    }"#;

    #[test]
    fn test_job_into_inputs() {
        let inputs = FitJob::from_json(JOB).unwrap().into_inputs().unwrap();
        assert_eq!(inputs.region, ChannelRange::new(101, 106));
        assert_eq!(inputs.spectrum.count(103), 8);
        assert_eq!(inputs.parameters.max_cycles, 4);
        assert_eq!(inputs.parameters.max_output_fits, 1);
        assert_eq!(inputs.parameters.peak_width_mode, PeakWidthMode::Fixed);

        assert_eq!(inputs.peaks.len(), 2);
        assert_eq!(inputs.peaks[0].channel(), Some(103.0));
        assert!(!inputs.peaks[0].is_centroid_fixed());
        assert_eq!(inputs.peaks[1].channel(), Some(104.2));
        assert!(inputs.peaks[1].is_centroid_fixed());
    }

    #[test]
    fn test_sigma_length_checked() {
        let mut job = FitJob::from_json(JOB).unwrap();
        job.spectrum.sigma = Some(vec![1.0; 3]);
        let err = job.into_inputs().unwrap_err();
        assert!(err.to_string().contains("8 counts but 3 sigma"));
    }

    #[test]
    fn test_empty_spectrum_rejected() {
        let mut job = FitJob::from_json(JOB).unwrap();
        job.spectrum.counts.clear();
        assert!(job.into_inputs().is_err());
    }
}
