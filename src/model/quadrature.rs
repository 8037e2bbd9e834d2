//! Gauss-Hermite quadrature rules for adaptive integration over random intercepts.
//!
//! Nodes and weights are for the physicists' weight `exp(-x²)` and come from
//! the Golub-Welsch algorithm: the nodes are the eigenvalues of the symmetric
//! tridiagonal Jacobi matrix (zero diagonal, off-diagonal `sqrt(i/2)`), and
//! each weight is `sqrt(pi)` times the squared first component of the
//! matching eigenvector.
//!
//! A one-point rule (node 0, weight `sqrt(pi)`) reproduces the Laplace
//! approximation exactly when centred at the mode and scaled by the
//! curvature.

use crate::error::{GlmmError, Result};
use nalgebra::{DMatrix, SymmetricEigen};

/// Largest supported number of nodes.
pub const MAX_POINTS: usize = 25;

/// A Gauss-Hermite rule.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussHermiteRule {
    nodes: Vec<f64>,
    weights: Vec<f64>,
}

impl GaussHermiteRule {
    /// Build an `n`-point rule, `1 <= n <= MAX_POINTS`.
    pub fn new(n: usize) -> Result<Self> {
        if n == 0 || n > MAX_POINTS {
            return Err(GlmmError::InvalidParameter(format!(
                "quadrature points must be in 1..={}, got {}",
                MAX_POINTS, n
            )));
        }
        let mu0 = std::f64::consts::PI.sqrt();
        if n == 1 {
            return Ok(Self {
                nodes: vec![0.0],
                weights: vec![mu0],
            });
        }

        let jacobi = DMatrix::from_fn(n, n, |i, j| {
            if i + 1 == j {
                (j as f64 / 2.0).sqrt()
            } else if j + 1 == i {
                (i as f64 / 2.0).sqrt()
            } else {
                0.0
            }
        });
        let eigen = SymmetricEigen::new(jacobi);

        let mut pairs: Vec<(f64, f64)> = (0..n)
            .map(|i| {
                let v0 = eigen.eigenvectors[(0, i)];
                (eigen.eigenvalues[i], mu0 * v0 * v0)
            })
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        // Symmetrise to remove eigen-solver noise around the origin.
        let mut nodes: Vec<f64> = pairs.iter().map(|p| p.0).collect();
        let mut weights: Vec<f64> = pairs.iter().map(|p| p.1).collect();
        for i in 0..n / 2 {
            let j = n - 1 - i;
            let x = 0.5 * (nodes[j] - nodes[i]);
            let w = 0.5 * (weights[i] + weights[j]);
            nodes[i] = -x;
            nodes[j] = x;
            weights[i] = w;
            weights[j] = w;
        }
        if n % 2 == 1 {
            nodes[n / 2] = 0.0;
        }

        Ok(Self { nodes, weights })
    }

    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Log of `∫ exp(h(b)) db` by adaptive quadrature.
    ///
    /// `mode` and `scale` are the mode of `h` and `1/sqrt(-h''(mode))`.
    /// Evaluated in log space so very negative `h` does not underflow.
    pub fn log_integrate<F>(&self, mode: f64, scale: f64, h: F) -> f64
    where
        F: Fn(f64) -> f64,
    {
        let sqrt2 = std::f64::consts::SQRT_2;
        let terms: Vec<f64> = self
            .nodes
            .iter()
            .zip(&self.weights)
            .map(|(&x, &w)| w.ln() + x * x + h(mode + sqrt2 * scale * x))
            .collect();
        let max = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return max;
        }
        let sum: f64 = terms.iter().map(|t| (t - max).exp()).sum();
        (sqrt2 * scale).ln() + max + sum.ln()
    }
}
