//! Marginal means of the fixed factor on the link scale.
//!
//! With the random intercept at its expectation (0), the mean of level `k`
//! is `a_k'β`, where `a_k` is row `k` of the level matrix. Their covariance
//! is `A V A'`, kept whole so contrasts can use the off-diagonal terms.

use crate::error::{GlmmError, Result};
use crate::model::glmm::FittedModel;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Link-scale mean of one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginalMean {
    pub level: String,
    /// Estimate on the logit scale.
    pub estimate: f64,
    /// Standard error; `None` when not estimable.
    pub std_error: Option<f64>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl MarginalMean {
    pub fn is_estimable(&self) -> bool {
        self.std_error.is_some()
    }
}

/// Marginal means for every level, in level order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginalMeans {
    /// Factor the means are over.
    pub factor: String,
    /// Confidence level is `1 - alpha`.
    pub alpha: f64,
    pub means: Vec<MarginalMean>,
    /// `A V A'`; absent when the model has no coefficient covariance.
    #[serde(skip)]
    pub covariance: Option<DMatrix<f64>>,
}

impl MarginalMeans {
    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }

    /// Get the mean for a level.
    pub fn get(&self, level: &str) -> Option<&MarginalMean> {
        self.means.iter().find(|m| m.level == level)
    }

    pub fn levels(&self) -> Vec<&str> {
        self.means.iter().map(|m| m.level.as_str()).collect()
    }

    pub fn estimates(&self) -> Vec<f64> {
        self.means.iter().map(|m| m.estimate).collect()
    }

    /// Covariance between two level means.
    pub fn covariance_between(&self, a: usize, b: usize) -> Option<f64> {
        self.covariance.as_ref().map(|v| v[(a, b)])
    }
}

/// Two-sided normal critical value for `alpha`.
pub(crate) fn z_critical(alpha: f64) -> Result<f64> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(GlmmError::InvalidParameter(format!(
            "alpha must be in (0, 1), got {}",
            alpha
        )));
    }
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| GlmmError::Numerical(format!("normal distribution: {}", e)))?;
    Ok(normal.inverse_cdf(1.0 - alpha / 2.0))
}

/// Estimate the marginal mean of each level with a `1 - alpha` Wald interval.
///
/// Levels whose variance is non-finite or non-positive, or every level when
/// the model has no covariance, are returned without SE or interval.
pub fn estimate_marginal_means(fit: &FittedModel, alpha: f64) -> Result<MarginalMeans> {
    let z = z_critical(alpha)?;
    let a = &fit.level_matrix;
    let beta = DVector::from_column_slice(&fit.coefficients);
    let estimates = a * beta;
    let covariance = fit.covariance.as_ref().map(|v| a * v * a.transpose());

    let means = fit
        .level_names
        .iter()
        .enumerate()
        .map(|(k, level)| {
            let estimate = estimates[k];
            let std_error = covariance
                .as_ref()
                .map(|v| v[(k, k)])
                .filter(|var| var.is_finite() && *var > 0.0)
                .map(f64::sqrt)
                .filter(|_| estimate.is_finite());
            MarginalMean {
                level: level.clone(),
                estimate,
                std_error,
                lower: std_error.map(|se| estimate - z * se),
                upper: std_error.map(|se| estimate + z * se),
            }
        })
        .collect();

    Ok(MarginalMeans {
        factor: fit.fixed_name.clone(),
        alpha,
        means,
        covariance,
    })
}
