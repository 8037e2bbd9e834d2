//! All pairwise contrasts between level means, with BH adjustment.

use crate::correct::bh::correct_bh;
use crate::error::{GlmmError, Result};
use crate::inference::marginal::{z_critical, MarginalMeans};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Difference `level_a - level_b` on the logit scale (a log odds ratio).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contrast {
    /// Earlier level in level order.
    pub level_a: String,
    pub level_b: String,
    pub estimate: f64,
    pub std_error: Option<f64>,
    pub z: Option<f64>,
    /// Two-sided p-value.
    pub p_value: Option<f64>,
    /// BH-adjusted p-value over all estimable contrasts.
    pub p_adjusted: Option<f64>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    /// Adjusted p-value at or below the FDR target.
    pub significant: bool,
}

impl Contrast {
    /// Odds ratio of `level_a` relative to `level_b`.
    pub fn odds_ratio(&self) -> f64 {
        self.estimate.exp()
    }

    pub fn odds_ratio_interval(&self) -> Option<(f64, f64)> {
        Some((self.lower?.exp(), self.upper?.exp()))
    }

    pub fn is_estimable(&self) -> bool {
        self.std_error.is_some()
    }
}

/// The complete set of `k(k-1)/2` pairwise contrasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContrastSet {
    pub factor: String,
    /// FDR target.
    pub q: f64,
    pub alpha: f64,
    pub contrasts: Vec<Contrast>,
}

impl ContrastSet {
    pub fn len(&self) -> usize {
        self.contrasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contrasts.is_empty()
    }

    /// Find the contrast between two levels, in either order.
    pub fn get(&self, a: &str, b: &str) -> Option<&Contrast> {
        self.contrasts.iter().find(|c| {
            (c.level_a == a && c.level_b == b) || (c.level_a == b && c.level_b == a)
        })
    }

    pub fn n_significant(&self) -> usize {
        self.contrasts.iter().filter(|c| c.significant).count()
    }

    pub fn significant(&self) -> impl Iterator<Item = &Contrast> {
        self.contrasts.iter().filter(|c| c.significant)
    }

    pub fn p_values(&self) -> Vec<Option<f64>> {
        self.contrasts.iter().map(|c| c.p_value).collect()
    }
}

/// Compute every pairwise contrast and adjust the p-values by BH.
///
/// A contrast whose variance is unavailable, non-finite or non-positive keeps
/// its estimate but has no SE, statistic or p-value, and is left out of the
/// BH family.
pub fn pairwise_contrasts(means: &MarginalMeans, alpha: f64, q: f64) -> Result<ContrastSet> {
    if !(q > 0.0 && q <= 1.0) {
        return Err(GlmmError::InvalidParameter(format!(
            "FDR target must be in (0, 1], got {}",
            q
        )));
    }
    let z_crit = z_critical(alpha)?;
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| GlmmError::Numerical(format!("normal distribution: {}", e)))?;

    let k = means.len();
    let mut contrasts = Vec::with_capacity(k * k.saturating_sub(1) / 2);
    for a in 0..k {
        for b in (a + 1)..k {
            let ma = &means.means[a];
            let mb = &means.means[b];
            let estimate = ma.estimate - mb.estimate;
            let variance = means.covariance.as_ref().map(|v| v[(a, a)] + v[(b, b)] - 2.0 * v[(a, b)]);
            let std_error = variance
                .filter(|var| var.is_finite() && *var > 0.0)
                .map(f64::sqrt)
                .filter(|_| estimate.is_finite());
            let z = std_error.map(|se| estimate / se);
            let p_value = z.map(|z| (2.0 * normal.sf(z.abs())).min(1.0));

            contrasts.push(Contrast {
                level_a: ma.level.clone(),
                level_b: mb.level.clone(),
                estimate,
                std_error,
                z,
                p_value,
                p_adjusted: None,
                lower: std_error.map(|se| estimate - z_crit * se),
                upper: std_error.map(|se| estimate + z_crit * se),
                significant: false,
            });
        }
    }

    let ids: Vec<String> = contrasts
        .iter()
        .map(|c| format!("{} - {}", c.level_a, c.level_b))
        .collect();
    let p_values: Vec<Option<f64>> = contrasts.iter().map(|c| c.p_value).collect();
    let corrected = correct_bh(&p_values, &ids);
    for (contrast, q_value) in contrasts.iter_mut().zip(corrected.q_values) {
        contrast.p_adjusted = q_value;
        contrast.significant = matches!(q_value, Some(v) if v <= q);
    }

    Ok(ContrastSet {
        factor: means.factor.clone(),
        q,
        alpha,
        contrasts,
    })
}
