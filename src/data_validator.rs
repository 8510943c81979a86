use crate::errors::QualityError;
use crate::settings::{DataQuality, Settings};

/// What a sample array represents. Prices carry an extra positivity rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    Prices,
    Returns,
}

/// Outcome of a quality check over one sample array.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    pub valid: bool,
    pub valid_ratio: f64,
    pub total_points: usize,
    pub valid_points: usize,
    pub error: Option<String>,
}

impl QualityReport {
    pub fn into_result(self) -> Result<Self, QualityError> {
        if self.valid {
            return Ok(self);
        }
        Err(QualityError {
            message: self.error.unwrap_or_else(|| "invalid samples".to_string()),
            valid_points: self.valid_points,
            total_points: self.total_points,
        })
    }
}

/// Rejects sample arrays that are too sparse or non-positive for statistics.
///
/// A sample is valid when it is present and finite. Pure; no side effects.
#[derive(Debug, Clone)]
pub struct DataValidator {
    cfg: DataQuality,
}

impl Default for DataValidator {
    fn default() -> Self {
        Self {
            cfg: DataQuality::default(),
        }
    }
}

impl DataValidator {
    pub fn new(settings: &Settings) -> Self {
        Self {
            cfg: settings.data_quality.clone(),
        }
    }

    pub fn validate(&self, samples: &[Option<f64>], kind: SampleKind) -> QualityReport {
        let total_points = samples.len();
        if total_points == 0 {
            return QualityReport {
                valid: false,
                valid_ratio: 0.0,
                total_points,
                valid_points: 0,
                error: Some("no samples".to_string()),
            };
        }

        let valid_values: Vec<f64> = samples
            .iter()
            .filter_map(|s| *s)
            .filter(|v| v.is_finite())
            .collect();
        let valid_points = valid_values.len();
        let valid_ratio = valid_points as f64 / total_points as f64;

        // Compare with a small tolerance: 90/100 must pass at a 0.90 threshold
        if valid_ratio + 1e-12 < self.cfg.min_valid_ratio {
            return QualityReport {
                valid: false,
                valid_ratio,
                total_points,
                valid_points,
                error: Some(format!(
                    "valid ratio {:.2} below threshold {:.2}",
                    valid_ratio, self.cfg.min_valid_ratio
                )),
            };
        }

        if kind == SampleKind::Prices {
            let positive = valid_values.iter().filter(|v| **v > 0.0).count();
            let positive_ratio = if valid_points == 0 {
                0.0
            } else {
                positive as f64 / valid_points as f64
            };
            if positive_ratio + 1e-12 < self.cfg.min_positive_ratio {
                return QualityReport {
                    valid: false,
                    valid_ratio,
                    total_points,
                    valid_points,
                    error: Some(format!(
                        "only {:.1}% of prices are positive (need {:.1}%)",
                        positive_ratio * 100.0,
                        self.cfg.min_positive_ratio * 100.0
                    )),
                };
            }
        }

        QualityReport {
            valid: true,
            valid_ratio,
            total_points,
            valid_points,
            error: None,
        }
    }

    /// Convenience for dense arrays where invalid samples are NaN.
    pub fn validate_values(&self, samples: &[f64], kind: SampleKind) -> QualityReport {
        let wrapped: Vec<Option<f64>> = samples.iter().copied().map(Some).collect();
        self.validate(&wrapped, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices_with_gaps(total: usize, gaps: usize) -> Vec<Option<f64>> {
        (0..total)
            .map(|i| {
                if i < gaps {
                    if i % 2 == 0 {
                        None
                    } else {
                        Some(f64::NAN)
                    }
                } else {
                    Some(100.0 + i as f64)
                }
            })
            .collect()
    }

    #[test]
    fn test_eleven_gaps_rejected() {
        let report = DataValidator::default().validate(&prices_with_gaps(100, 11), SampleKind::Prices);
        assert!(!report.valid);
        assert_eq!(report.valid_points, 89);
        assert!((report.valid_ratio - 0.89).abs() < 1e-12);
        assert!(report.error.is_some());
    }

    #[test]
    fn test_ten_gaps_accepted() {
        let report = DataValidator::default().validate(&prices_with_gaps(100, 10), SampleKind::Prices);
        assert!(report.valid);
        assert_eq!(report.valid_points, 90);
        assert_eq!(report.total_points, 100);
        assert!(report.error.is_none());
    }

    #[test]
    fn test_non_positive_prices_rejected() {
        let mut samples: Vec<Option<f64>> = (0..100).map(|_| Some(1.0)).collect();
        for s in samples.iter_mut().take(6) {
            *s = Some(0.0);
        }
        let validator = DataValidator::default();
        assert!(!validator.validate(&samples, SampleKind::Prices).valid);
        // Returns are allowed to be zero or negative
        assert!(validator.validate(&samples, SampleKind::Returns).valid);
    }

    #[test]
    fn test_empty_and_infinite() {
        let validator = DataValidator::default();
        assert!(!validator.validate(&[], SampleKind::Returns).valid);

        let report = validator.validate_values(&[f64::INFINITY, 1.0], SampleKind::Returns);
        assert!(!report.valid);
        assert_eq!(report.valid_points, 1);
    }

    #[test]
    fn test_into_result_carries_message() {
        let err = DataValidator::default()
            .validate(&[None, None], SampleKind::Prices)
            .into_result()
            .unwrap_err();
        assert_eq!(err.total_points, 2);
        assert_eq!(err.valid_points, 0);
        assert!(err.message.contains("valid ratio"));
    }
}
