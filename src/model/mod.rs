//! Binomial mixed model: link, quadrature rules and the fitter.

pub mod glmm;
pub mod link;
pub mod quadrature;

pub use glmm::{fit_glmm, fit_null_model, FitWarning, FittedModel, GlmmConfig};
pub use link::{inv_logit, logit, LinkFunction, LogitLink, P_FLOOR};
pub use quadrature::GaussHermiteRule;
