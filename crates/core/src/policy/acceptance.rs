use std::fmt;

use crate::config::QualityConfig;
use crate::manifest::QualityMetrics;

/// Why a processed scene was not accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    ExcessiveMissingData { pct: f64, limit: f64 },
    NighttimeImage { solar_zenith: f64, limit: f64 },
    ExcessiveSaturation { pct: f64, limit: f64 },
}

impl SkipReason {
    /// Stable code, used as a metric label.
    pub fn code(&self) -> &'static str {
        match self {
            SkipReason::ExcessiveMissingData { .. } => "EXCESSIVE_MISSING_DATA",
            SkipReason::NighttimeImage { .. } => "NIGHTTIME_IMAGE",
            SkipReason::ExcessiveSaturation { .. } => "EXCESSIVE_SATURATION",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ExcessiveMissingData { pct, limit } => {
                write!(f, "{} ({:.1}% > {:.1}%)", self.code(), pct, limit)
            }
            SkipReason::NighttimeImage {
                solar_zenith,
                limit,
            } => write!(f, "{} (SZA={:.1}° > {:.1}°)", self.code(), solar_zenith, limit),
            SkipReason::ExcessiveSaturation { pct, limit } => {
                write!(f, "{} ({:.1}% > {:.1}%)", self.code(), pct, limit)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept,
    Reject(SkipReason),
}

/// Decides whether a transformed scene is worth keeping.
///
/// A metric the transform did not report never causes a rejection.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptancePolicy {
    pub max_missing_data_pct: f64,
    pub max_solar_zenith_deg: f64,
    pub max_saturation_pct: Option<f64>,
}

impl AcceptancePolicy {
    pub fn from_config(config: &QualityConfig) -> Self {
        Self {
            max_missing_data_pct: config.max_missing_data_pct,
            max_solar_zenith_deg: config.max_solar_zenith_deg,
            max_saturation_pct: config.max_saturation_pct,
        }
    }

    pub fn evaluate(&self, metrics: &QualityMetrics) -> Verdict {
        if let Some(pct) = metrics.missing_data_pct {
            if pct > self.max_missing_data_pct {
                return Verdict::Reject(SkipReason::ExcessiveMissingData {
                    pct,
                    limit: self.max_missing_data_pct,
                });
            }
        }

        if let Some(solar_zenith) = metrics.mean_solar_zenith {
            if solar_zenith > self.max_solar_zenith_deg {
                return Verdict::Reject(SkipReason::NighttimeImage {
                    solar_zenith,
                    limit: self.max_solar_zenith_deg,
                });
            }
        }

        if let (Some(pct), Some(limit)) = (metrics.saturation_pct, self.max_saturation_pct) {
            if pct > limit {
                return Verdict::Reject(SkipReason::ExcessiveSaturation { pct, limit });
            }
        }

        Verdict::Accept
    }

    /// Metrics as they should be persisted, with a score filled in when the
    /// transform did not report one.
    pub fn scored(&self, metrics: &QualityMetrics, verdict: &Verdict) -> QualityMetrics {
        let mut scored = metrics.clone();
        if scored.quality_score.is_none() {
            scored.quality_score = Some(match verdict {
                Verdict::Reject(_) => 0.0,
                Verdict::Accept => (100.0 - metrics.missing_data_pct.unwrap_or(0.0)).max(0.0),
            });
        }
        scored
    }
}

impl Default for AcceptancePolicy {
    fn default() -> Self {
        Self::from_config(&QualityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(missing: f64, sza: f64, saturation: f64) -> QualityMetrics {
        QualityMetrics {
            quality_score: None,
            missing_data_pct: Some(missing),
            saturation_pct: Some(saturation),
            mean_solar_zenith: Some(sza),
        }
    }

    #[test]
    fn test_accepts_good_scene() {
        let policy = AcceptancePolicy::default();
        assert_eq!(policy.evaluate(&metrics(3.0, 40.0, 0.5)), Verdict::Accept);
    }

    #[test]
    fn test_rejects_missing_data() {
        let policy = AcceptancePolicy::default();
        match policy.evaluate(&metrics(62.0, 40.0, 0.0)) {
            Verdict::Reject(reason) => {
                assert_eq!(reason.code(), "EXCESSIVE_MISSING_DATA");
                assert_eq!(reason.to_string(), "EXCESSIVE_MISSING_DATA (62.0% > 50.0%)");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let policy = AcceptancePolicy::default();
        assert_eq!(policy.evaluate(&metrics(50.0, 85.0, 0.0)), Verdict::Accept);
    }

    #[test]
    fn test_rejects_night_scene() {
        let policy = AcceptancePolicy::default();
        let verdict = policy.evaluate(&metrics(5.0, 91.25, 0.0));
        assert!(matches!(
            verdict,
            Verdict::Reject(SkipReason::NighttimeImage { .. })
        ));
    }

    #[test]
    fn test_saturation_only_rejects_when_configured() {
        let mut policy = AcceptancePolicy::default();
        assert_eq!(policy.evaluate(&metrics(1.0, 30.0, 40.0)), Verdict::Accept);

        policy.max_saturation_pct = Some(10.0);
        assert!(matches!(
            policy.evaluate(&metrics(1.0, 30.0, 40.0)),
            Verdict::Reject(SkipReason::ExcessiveSaturation { .. })
        ));
    }

    #[test]
    fn test_unreported_metrics_never_reject() {
        let policy = AcceptancePolicy::default();
        assert_eq!(policy.evaluate(&QualityMetrics::default()), Verdict::Accept);
    }

    #[test]
    fn test_scored_fills_missing_score() {
        let policy = AcceptancePolicy::default();
        let m = metrics(12.0, 30.0, 0.0);

        let accepted = policy.scored(&m, &Verdict::Accept);
        assert_eq!(accepted.quality_score, Some(88.0));

        let verdict = policy.evaluate(&metrics(70.0, 30.0, 0.0));
        let rejected = policy.scored(&metrics(70.0, 30.0, 0.0), &verdict);
        assert_eq!(rejected.quality_score, Some(0.0));

        let reported = QualityMetrics {
            quality_score: Some(73.0),
            ..m
        };
        assert_eq!(
            policy.scored(&reported, &Verdict::Accept).quality_score,
            Some(73.0)
        );
    }
}
