use crate::error::CalibrationError;

/// A calibration lookup that either succeeded or fell back to a documented
/// default. The fallback keeps the error so the caller can report it.
#[derive(Clone, Debug, PartialEq)]
pub enum Estimate<T> {
    Computed(T),
    Fallback { value: T, reason: CalibrationError },
}

impl<T: Copy> Estimate<T> {
    /// Builds an estimate from a calibration result and a default value.
    pub fn from_result(result: Result<T, CalibrationError>, default: T) -> Self {
        match result {
            Ok(v) => Estimate::Computed(v),
            Err(reason) => Estimate::Fallback { value: default, reason },
        }
    }

    pub fn value(&self) -> T {
        match self {
            Estimate::Computed(v) => *v,
            Estimate::Fallback { value, .. } => *value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Estimate::Fallback { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_keeps_reason() {
        let est = Estimate::from_result(Err(CalibrationError::ConstantCalibration), 1.0);
        assert!(est.is_fallback());
        assert_eq!(est.value(), 1.0);

        let est = Estimate::from_result(Ok(4.5), 1.0);
        assert!(!est.is_fallback());
        assert_eq!(est.value(), 4.5);
    }
}
