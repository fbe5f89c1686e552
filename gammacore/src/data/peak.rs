use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use serde::{Deserialize, Serialize};

use crate::calibration::energy::EnergyEquation;

/// Positions closer than this compare as equal.
pub const POSITION_THRESHOLD: f64 = 0.00001;

/// Which representation a peak was defined in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeakKind {
    Channel,
    Energy,
}

/// A candidate or fitted peak, defined either by channel or by energy.
///
/// The other representation is derived through an [`EnergyEquation`]; when
/// that conversion fails the derived side is simply `None`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    kind: PeakKind,
    channel: Option<f64>,
    energy: Option<f64>,
    energy_sigma: f64,
    fixed_centroid: bool,
}

impl Peak {
    pub fn from_channel(channel: f64, fixed_centroid: bool) -> Self {
        Peak {
            kind: PeakKind::Channel,
            channel: Some(channel),
            energy: None,
            energy_sigma: 0.0,
            fixed_centroid,
        }
    }

    pub fn from_energy(energy: f64, energy_sigma: f64, fixed_centroid: bool) -> Self {
        Peak {
            kind: PeakKind::Energy,
            channel: None,
            energy: Some(energy),
            energy_sigma,
            fixed_centroid,
        }
    }

    pub fn kind(&self) -> PeakKind {
        self.kind
    }

    /// Channel position, if known.
    pub fn channel(&self) -> Option<f64> {
        self.channel
    }

    /// Energy position, if known.
    pub fn energy(&self) -> Option<f64> {
        self.energy
    }

    pub fn energy_sigma(&self) -> f64 {
        self.energy_sigma
    }

    pub fn is_centroid_fixed(&self) -> bool {
        self.fixed_centroid
    }

    /// Returns a copy whose derived representation is recomputed from the
    /// defining one. A failed conversion leaves the derived side undefined.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use gammacore::data::peak::Peak;
    /// # use gammacore::calibration::energy::EnergyEquation;
    /// let ex = EnergyEquation::linear(0.0, 0.5);
    /// let peak = Peak::from_energy(661.7, 0.0, false).resolve(&ex);
    /// assert!((peak.channel().unwrap() - 1323.4).abs() < 1e-9);
    ///
    /// let flat = EnergyEquation::linear(0.0, 0.0);
    /// assert_eq!(Peak::from_energy(661.7, 0.0, false).resolve(&flat).channel(), None);
    /// ```
    pub fn resolve(&self, ex: &EnergyEquation) -> Peak {
        let mut peak = self.clone();
        match self.kind {
            PeakKind::Channel => {
                peak.energy = self.channel.map(|c| ex.energy_of(c));
                peak.energy_sigma = 0.0;
            }
            PeakKind::Energy => {
                peak.channel = self.energy.and_then(|e| ex.channel_of(e).ok());
            }
        }
        peak
    }

    /// Orders peaks by position, treating positions within
    /// [`POSITION_THRESHOLD`] as equal.
    ///
    /// This comparison is not transitive: `a` may equal `b` and `b` equal `c`
    /// while `a < c`. It must not back an ordered set (distinct peaks could be
    /// merged) nor a sort; use [`sort_peaks`] for ordering.
    pub fn compare_position(&self, other: &Peak) -> Ordering {
        let pair = if self.kind == other.kind {
            match self.kind {
                PeakKind::Channel => (self.channel, other.channel),
                PeakKind::Energy => (self.energy, other.energy),
            }
        } else if self.channel.is_some() && other.channel.is_some() {
            (self.channel, other.channel)
        } else if self.energy.is_some() && other.energy.is_some() {
            (self.energy, other.energy)
        } else if self.channel.is_some() {
            (self.channel, Some(0.0))
        } else {
            (Some(0.0), other.channel)
        };

        match pair {
            (Some(a), Some(b)) => compare_with_threshold(a, b),
            _ => Ordering::Equal,
        }
    }
}

fn compare_with_threshold(a: f64, b: f64) -> Ordering {
    if (a - b).abs() > POSITION_THRESHOLD {
        a.total_cmp(&b)
    } else {
        Ordering::Equal
    }
}

/// Sorts peaks by exact position (channel when known, else energy) without
/// dropping near-coincident entries.
pub fn sort_peaks(peaks: &mut [Peak]) {
    let key = |p: &Peak| p.channel.or(p.energy).unwrap_or(0.0);
    peaks.sort_by(|a, b| key(a).total_cmp(&key(b)));
}

impl Display for Peak {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            PeakKind::Channel => "Channel",
            PeakKind::Energy => "Energy",
        };
        write!(f, "{} Peak:", label)?;
        if let Some(c) = self.channel {
            write!(f, " channel = {} ", c)?;
        }
        if let Some(e) = self.energy {
            write!(f, " energy = {} uncert = {} ", e, self.energy_sigma)?;
        }
        if self.fixed_centroid {
            write!(f, " FIXED ")
        } else {
            write!(f, " not fixed ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_peak_resolves_energy() {
        let ex = EnergyEquation::linear(1.0, 2.0);
        let peak = Peak::from_channel(10.0, true).resolve(&ex);
        assert_eq!(peak.energy(), Some(21.0));
        assert!(peak.is_centroid_fixed());
    }

    #[test]
    fn test_threshold_comparison() {
        let a = Peak::from_channel(10.0, false);
        let b = Peak::from_channel(10.000001, false);
        let c = Peak::from_channel(10.5, false);
        assert_eq!(a.compare_position(&b), Ordering::Equal);
        assert_eq!(a.compare_position(&c), Ordering::Less);
        assert_eq!(c.compare_position(&a), Ordering::Greater);
    }

    #[test]
    fn test_comparison_is_not_transitive() {
        let a = Peak::from_channel(10.0, false);
        let b = Peak::from_channel(10.000008, false);
        let c = Peak::from_channel(10.000016, false);
        assert_eq!(a.compare_position(&b), Ordering::Equal);
        assert_eq!(b.compare_position(&c), Ordering::Equal);
        assert_eq!(a.compare_position(&c), Ordering::Less);
    }

    #[test]
    fn test_sort_keeps_near_duplicates() {
        let mut peaks = vec![
            Peak::from_channel(30.0, false),
            Peak::from_channel(10.0, false),
            Peak::from_channel(10.000001, false),
        ];
        sort_peaks(&mut peaks);
        assert_eq!(peaks.len(), 3);
        assert_eq!(peaks[2].channel(), Some(30.0));
    }
}
