//! Post-fit inference: marginal means and pairwise contrasts.

pub mod contrast;
pub mod marginal;

pub use contrast::{pairwise_contrasts, Contrast, ContrastSet};
pub use marginal::{estimate_marginal_means, MarginalMean, MarginalMeans};
