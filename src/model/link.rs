//! Link functions for the binomial GLMM.
//!
//! Maps between the linear predictor (eta) and the success probability (mu).

use serde::{Deserialize, Serialize};

/// Smallest probability `inv_link` returns; the largest is `1 - P_FLOOR`.
pub const P_FLOOR: f64 = 1e-15;

/// Link function interface.
pub trait LinkFunction {
    /// Apply the link function: eta = g(mu).
    fn link(&self, mu: f64) -> f64;
    /// Apply the inverse link: mu = g^{-1}(eta).
    fn inv_link(&self, eta: f64) -> f64;
    /// Derivative of the inverse link: d(mu)/d(eta).
    fn mu_eta(&self, eta: f64) -> f64;
    /// Variance function of the family: V(mu).
    fn variance(&self, mu: f64) -> f64;
}

/// Logit link, the canonical link of the binomial family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogitLink;

impl LinkFunction for LogitLink {
    fn link(&self, mu: f64) -> f64 {
        logit(mu)
    }

    fn inv_link(&self, eta: f64) -> f64 {
        inv_logit(eta)
    }

    fn mu_eta(&self, eta: f64) -> f64 {
        let p = inv_logit(eta);
        p * (1.0 - p)
    }

    fn variance(&self, mu: f64) -> f64 {
        mu * (1.0 - mu)
    }
}

/// `ln(p / (1 - p))`, defined on the open interval (0, 1).
pub fn logit(p: f64) -> f64 {
    p.ln() - (-p).ln_1p()
}

/// `1 / (1 + exp(-eta))`, clamped to `[P_FLOOR, 1 - P_FLOOR]`.
///
/// Never returns exactly 0 or 1.
pub fn inv_logit(eta: f64) -> f64 {
    if eta.is_nan() {
        return f64::NAN;
    }
    let p = if eta >= 0.0 {
        1.0 / (1.0 + (-eta).exp())
    } else {
        let e = eta.exp();
        e / (1.0 + e)
    };
    p.clamp(P_FLOOR, 1.0 - P_FLOOR)
}

/// `ln(1 + exp(eta))` without overflow.
pub fn log1p_exp(eta: f64) -> f64 {
    if eta > 0.0 {
        eta + (-eta).exp().ln_1p()
    } else {
        eta.exp().ln_1p()
    }
}

/// Probability pinned at the lower clamp, i.e. it back-transforms to 0.
pub fn is_lower_saturated(p: f64) -> bool {
    p <= P_FLOOR
}

/// Probability pinned at the upper clamp, i.e. it back-transforms to 1.
pub fn is_upper_saturated(p: f64) -> bool {
    p >= 1.0 - P_FLOOR
}
