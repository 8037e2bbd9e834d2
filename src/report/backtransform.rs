//! Back-transformation from the logit scale to probabilities.
//!
//! The inverse link is clamped to `[P_FLOOR, 1 - P_FLOOR]`, so a bound that
//! "reaches" 0 or 1 is one sitting at the clamp. When the lower bound is at 0
//! and the upper at 1 at the same time the interval carries no information:
//! both bounds are dropped and the estimate is flagged not estimable.

use crate::inference::{Contrast, MarginalMean};
use crate::model::link::{is_lower_saturated, is_upper_saturated, LinkFunction};
use serde::{Deserialize, Serialize};

/// Probability-scale mean of one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackTransformedEstimate {
    pub level: String,
    pub probability: f64,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    /// Lower bound at 0.
    pub lower_saturated: bool,
    /// Upper bound at 1.
    pub upper_saturated: bool,
    /// Interval missing or degenerate.
    pub not_estimable: bool,
}

/// Transform a link-scale mean and its interval.
pub fn back_transform<L: LinkFunction>(mean: &MarginalMean, link: &L) -> BackTransformedEstimate {
    let probability = link.inv_link(mean.estimate);
    let (lower, upper) = match (mean.lower, mean.upper) {
        (Some(lo), Some(hi)) => (link.inv_link(lo), link.inv_link(hi)),
        _ => {
            return BackTransformedEstimate {
                level: mean.level.clone(),
                probability,
                lower: None,
                upper: None,
                lower_saturated: false,
                upper_saturated: false,
                not_estimable: true,
            }
        }
    };

    let lower_saturated = is_lower_saturated(lower);
    let upper_saturated = is_upper_saturated(upper);
    let degenerate = lower_saturated && upper_saturated;

    BackTransformedEstimate {
        level: mean.level.clone(),
        probability,
        lower: (!degenerate).then_some(lower),
        upper: (!degenerate).then_some(upper),
        lower_saturated,
        upper_saturated,
        not_estimable: degenerate,
    }
}

/// Transform every level mean.
pub fn back_transform_all<L: LinkFunction>(
    means: &[MarginalMean],
    link: &L,
) -> Vec<BackTransformedEstimate> {
    means.iter().map(|m| back_transform(m, link)).collect()
}

/// A contrast on the odds-ratio scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsRatio {
    pub level_a: String,
    pub level_b: String,
    pub odds_ratio: f64,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl From<&Contrast> for OddsRatio {
    fn from(c: &Contrast) -> Self {
        let interval = c.odds_ratio_interval();
        Self {
            level_a: c.level_a.clone(),
            level_b: c.level_b.clone(),
            odds_ratio: c.odds_ratio(),
            lower: interval.map(|i| i.0),
            upper: interval.map(|i| i.1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::link::{inv_logit, LogitLink};
    use approx::assert_relative_eq;

    fn mean(estimate: f64, se: Option<f64>) -> MarginalMean {
        MarginalMean {
            level: "A".to_string(),
            estimate,
            std_error: se,
            lower: se.map(|s| estimate - 1.96 * s),
            upper: se.map(|s| estimate + 1.96 * s),
        }
    }

    #[test]
    fn test_regular_interval() {
        let bt = back_transform(&mean(0.5, Some(0.2)), &LogitLink);
        assert_relative_eq!(bt.probability, inv_logit(0.5), epsilon = 1e-15);
        let (lo, hi) = (bt.lower.unwrap(), bt.upper.unwrap());
        assert!(0.0 <= lo && lo <= bt.probability && bt.probability <= hi && hi <= 1.0);
        assert!(!bt.not_estimable);
    }

    #[test]
    fn test_both_saturated_nullified() {
        // Separated level: estimate far negative, SE in the hundreds.
        let bt = back_transform(&mean(-19.0, Some(400.0)), &LogitLink);
        assert!(bt.probability < 1e-8);
        assert!(bt.lower.is_none() && bt.upper.is_none());
        assert!(bt.lower_saturated && bt.upper_saturated);
        assert!(bt.not_estimable);
    }

    #[test]
    fn test_one_side_saturated_kept() {
        let bt = back_transform(&mean(-20.0, Some(10.0)), &LogitLink);
        assert!(bt.lower_saturated);
        assert!(!bt.upper_saturated);
        assert!(!bt.not_estimable);
        assert!(bt.lower.is_some() && bt.upper.is_some());
    }

    #[test]
    fn test_missing_interval() {
        let bt = back_transform(&mean(0.0, None), &LogitLink);
        assert_relative_eq!(bt.probability, 0.5);
        assert!(bt.not_estimable);
        assert!(bt.lower.is_none());
    }

    #[test]
    fn test_back_transform_all_keeps_order() {
        let mut b = mean(1.0, Some(0.1));
        b.level = "B".to_string();
        let all = back_transform_all(&[mean(0.0, Some(0.1)), b], &LogitLink);
        assert_eq!(all[0].level, "A");
        assert_eq!(all[1].level, "B");
    }

    #[test]
    fn test_odds_ratio_from_contrast() {
        let c = Contrast {
            level_a: "A".into(),
            level_b: "B".into(),
            estimate: 2.0f64.ln(),
            std_error: Some(0.1),
            z: Some(6.93),
            p_value: Some(1e-10),
            p_adjusted: Some(1e-10),
            lower: Some(2.0f64.ln() - 0.196),
            upper: Some(2.0f64.ln() + 0.196),
            significant: true,
        };
        let or = OddsRatio::from(&c);
        assert_relative_eq!(or.odds_ratio, 2.0, epsilon = 1e-12);
        assert!(or.lower.unwrap() < 2.0 && or.upper.unwrap() > 2.0);
    }
}
