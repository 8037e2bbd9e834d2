//! Binomial generalized linear mixed model with one random intercept.
//!
//! Model for egg mass `i` in source `j`:
//! `y_i ~ Binomial(n_i, p_i)`, `logit(p_i) = x_i'β + b_j`, `b_j ~ N(0, σ²)`.
//!
//! The marginal likelihood integrates each `b_j` out. Groups are independent
//! given `(β, σ)`, so the integral factorises into one-dimensional integrals,
//! each approximated by adaptive Gauss-Hermite quadrature centred at the
//! conditional mode (one node is the Laplace approximation).
//!
//! Estimation:
//! 1. For fixed σ, penalized IRLS maximises the joint penalized
//!    log-likelihood in `(β, b)`; the random-intercept block of the Hessian
//!    is diagonal so each Newton step eliminates it via a Schur complement.
//! 2. The approximate marginal log-likelihood at `(β̂(σ), σ)` is profiled
//!    over `log σ` by golden-section search; the `σ = 0` boundary (a plain
//!    binomial GLM) is evaluated explicitly.
//! 3. The coefficient covariance is the inverse Schur complement of the
//!    penalized Hessian at the optimum.
//!
//! # Example
//! ```ignore
//! use parasitism_glmm::model::glmm::{fit_glmm, GlmmConfig};
//!
//! let fit = fit_glmm(&design, &GlmmConfig::default())?;
//! println!("sigma^2 = {}", fit.sigma2);
//! ```

use crate::data::{GlmmDesign, Parameterization, Separation};
use crate::error::{GlmmError, Result};
use crate::model::link::{inv_logit, log1p_exp, logit, LinkFunction, LogitLink};
use crate::model::quadrature::GaussHermiteRule;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::function::factorial::ln_binomial;
use tracing::{debug, info, warn};

/// Search interval for σ (the boundary σ = 0 is checked separately).
const SIGMA_MIN: f64 = 1e-4;
const SIGMA_MAX: f64 = 20.0;

/// Bracket width on the log σ scale at which the outer search may stop.
const LOG_SIGMA_TOL: f64 = 1e-4;

const MAX_HALVINGS: usize = 30;

/// Newton iterations when refining a group's conditional mode.
const MODE_MAX_ITER: usize = 50;

/// 1/φ for golden-section search.
const INV_GOLDEN: f64 = 0.618_033_988_749_894_9;

/// Configuration for GLMM fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlmmConfig {
    /// Maximum penalized IRLS iterations for each σ.
    pub max_iter: usize,
    /// Maximum golden-section iterations over log σ.
    pub max_outer_iter: usize,
    /// Relative convergence tolerance on the (penalized) log-likelihood.
    pub tol: f64,
    /// Quadrature points per random intercept (1 = Laplace).
    pub n_agq: usize,
    /// Bound on the magnitude of any fixed-effect coefficient.
    pub coef_ceiling: f64,
}

impl Default for GlmmConfig {
    fn default() -> Self {
        Self {
            max_iter: 100,
            max_outer_iter: 200,
            tol: 1e-8,
            n_agq: 1,
            coef_ceiling: 30.0,
        }
    }
}

impl GlmmConfig {
    /// Check the settings are usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_iter == 0 || self.max_outer_iter == 0 {
            return Err(GlmmError::InvalidParameter(
                "iteration limits must be positive".to_string(),
            ));
        }
        if !(self.tol > 0.0 && self.tol < 1.0) {
            return Err(GlmmError::InvalidParameter(format!(
                "tolerance must be in (0, 1), got {}",
                self.tol
            )));
        }
        if !(self.coef_ceiling > 0.0 && self.coef_ceiling.is_finite()) {
            return Err(GlmmError::InvalidParameter(format!(
                "coefficient ceiling must be positive, got {}",
                self.coef_ceiling
            )));
        }
        GaussHermiteRule::new(self.n_agq).map(|_| ())
    }
}

/// Non-fatal conditions recorded on a fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FitWarning {
    /// A fixed-factor level has no variation in the outcome.
    Separation { level: String, direction: Separation },
    /// A coefficient was held at the ceiling.
    CoefficientAtCeiling { coefficient: String, value: f64 },
    /// The variance estimate sits on the σ² = 0 boundary.
    SingularVariance,
    /// The coefficient covariance could not be formed.
    SingularCovariance,
}

impl std::fmt::Display for FitWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitWarning::Separation { level, direction } => {
                let what = match direction {
                    Separation::AllFailures => "no successes",
                    Separation::AllSuccesses => "only successes",
                };
                write!(f, "separation: level '{}' has {}", level, what)
            }
            FitWarning::CoefficientAtCeiling { coefficient, value } => {
                write!(f, "coefficient '{}' held at ceiling ({})", coefficient, value)
            }
            FitWarning::SingularVariance => write!(f, "random-intercept variance estimated as 0"),
            FitWarning::SingularCovariance => write!(f, "coefficient covariance is singular"),
        }
    }
}

/// A fitted binomial GLMM. Never modified after fitting.
#[derive(Debug, Clone)]
pub struct FittedModel {
    /// Name of the fixed factor.
    pub fixed_name: String,
    /// Levels of the fixed factor.
    pub level_names: Vec<String>,
    /// Fixed-effect coefficient names.
    pub coefficient_names: Vec<String>,
    /// Fixed-effect estimates (logit scale).
    pub coefficients: Vec<f64>,
    /// Covariance of the coefficients, `None` when singular.
    pub covariance: Option<DMatrix<f64>>,
    /// Maps coefficients to level linear predictors (levels × coefficients).
    pub level_matrix: DMatrix<f64>,
    pub parameterization: Parameterization,
    pub link: LogitLink,
    /// Random-intercept variance σ².
    pub sigma2: f64,
    /// Name of the grouping factor.
    pub group_name: String,
    pub group_names: Vec<String>,
    /// Conditional modes of the random intercepts.
    pub random_effects: Vec<f64>,
    /// Approximate marginal log-likelihood (binomial constants included).
    pub log_likelihood: f64,
    pub n_obs: usize,
    /// Quadrature points used (1 = Laplace).
    pub n_agq: usize,
    /// Penalized IRLS iterations at the final σ.
    pub inner_iterations: usize,
    /// Golden-section iterations.
    pub outer_iterations: usize,
    pub warnings: Vec<FitWarning>,
}

impl FittedModel {
    /// Get coefficient index by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Standard errors; `None` where the covariance is unavailable or degenerate.
    pub fn std_errors(&self) -> Vec<Option<f64>> {
        (0..self.coefficients.len())
            .map(|j| {
                self.covariance
                    .as_ref()
                    .map(|v| v[(j, j)])
                    .filter(|v| v.is_finite() && *v > 0.0)
                    .map(f64::sqrt)
            })
            .collect()
    }

    pub fn n_coefficients(&self) -> usize {
        self.coefficients.len()
    }

    pub fn n_levels(&self) -> usize {
        self.level_names.len()
    }

    pub fn n_groups(&self) -> usize {
        self.group_names.len()
    }

    /// Estimated parameters: fixed effects plus the variance.
    pub fn n_parameters(&self) -> usize {
        self.coefficients.len() + 1
    }

    /// Random-intercept standard deviation.
    pub fn sigma(&self) -> f64 {
        self.sigma2.sqrt()
    }

    pub fn deviance(&self) -> f64 {
        -2.0 * self.log_likelihood
    }

    pub fn aic(&self) -> f64 {
        self.deviance() + 2.0 * self.n_parameters() as f64
    }

    pub fn bic(&self) -> f64 {
        self.deviance() + (self.n_obs as f64).ln() * self.n_parameters() as f64
    }

    /// Whether any level was flagged as perfectly separated.
    pub fn has_separation(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, FitWarning::Separation { .. }))
    }

    /// Linear predictor of each fixed-factor level with the random effect at 0.
    pub fn level_predictors(&self) -> DVector<f64> {
        &self.level_matrix * DVector::from_column_slice(&self.coefficients)
    }
}

/// Fit the binomial GLMM described by `design`.
///
/// Fails with `Convergence` if either iteration budget is exhausted or the
/// variance estimate is invalid. Separated levels produce warnings, not
/// errors.
pub fn fit_glmm(design: &GlmmDesign, config: &GlmmConfig) -> Result<FittedModel> {
    config.validate()?;
    let fitter = Fitter::new(design, config)?;

    info!(
        "Fitting binomial GLMM: n={}, p={}, groups={}, nAGQ={}",
        design.n_obs(),
        design.n_coefficients(),
        design.n_groups(),
        config.n_agq
    );

    let mut warnings = Vec::new();
    if design.n_coefficients() > 1 {
        for (level, direction) in design.separated_levels() {
            warn!(
                "Level '{}' of '{}' is perfectly separated ({:?}); its coefficient is bounded at {}",
                level,
                design.fixed().name(),
                direction,
                config.coef_ceiling
            );
            warnings.push(FitWarning::Separation { level, direction });
        }
    }

    let optimum = fitter.optimize_sigma()?;
    let sigma2 = optimum.sigma * optimum.sigma;
    if !sigma2.is_finite() || sigma2 < 0.0 {
        return Err(GlmmError::Convergence(format!(
            "invalid random-intercept variance {}",
            sigma2
        )));
    }
    if optimum.sigma == 0.0 {
        warn!("Random-intercept variance is on the boundary (sigma^2 = 0)");
        warnings.push(FitWarning::SingularVariance);
    }

    let solution = optimum.solution;
    for (j, &value) in solution.beta.iter().enumerate() {
        if value.abs() >= config.coef_ceiling * (1.0 - 1e-9) {
            let coefficient = design.coefficient_names()[j].clone();
            warn!("Coefficient '{}' held at ceiling {}", coefficient, value);
            warnings.push(FitWarning::CoefficientAtCeiling { coefficient, value });
        }
    }

    let covariance = fitter.covariance(&solution, optimum.sigma);
    if covariance.is_none() {
        warn!("Coefficient covariance is singular; standard errors unavailable");
        warnings.push(FitWarning::SingularCovariance);
    }

    info!(
        "GLMM converged: logLik={:.4}, sigma^2={:.6}, outer iterations={}",
        optimum.log_likelihood, sigma2, optimum.outer_iterations
    );

    Ok(FittedModel {
        fixed_name: design.fixed().name().to_string(),
        level_names: design.fixed().levels().to_vec(),
        coefficient_names: design.coefficient_names().to_vec(),
        coefficients: solution.beta.iter().copied().collect(),
        covariance,
        level_matrix: design.level_matrix().clone(),
        parameterization: design.parameterization(),
        link: LogitLink,
        sigma2,
        group_name: design.groups().name().to_string(),
        group_names: design.groups().levels().to_vec(),
        random_effects: solution.b,
        log_likelihood: optimum.log_likelihood,
        n_obs: design.n_obs(),
        n_agq: config.n_agq,
        inner_iterations: solution.iterations,
        outer_iterations: optimum.outer_iterations,
        warnings,
    })
}

/// Fit the intercept-only model over the same rows and groups.
pub fn fit_null_model(design: &GlmmDesign, config: &GlmmConfig) -> Result<FittedModel> {
    fit_glmm(&design.intercept_only(), config)
}

/// Penalized IRLS solution at one σ.
#[derive(Debug, Clone)]
struct PirlsSolution {
    beta: DVector<f64>,
    b: Vec<f64>,
    iterations: usize,
}

struct Optimum {
    sigma: f64,
    log_likelihood: f64,
    solution: PirlsSolution,
    outer_iterations: usize,
}

/// Gradient and negative Hessian blocks of the penalized log-likelihood.
struct Blocks {
    xtwx: DMatrix<f64>,
    grad_beta: DVector<f64>,
    /// Column j is `Σ_{i in j} w_i x_i`.
    u: DMatrix<f64>,
    /// `Σ_{i in j} w_i + 1/σ²`.
    d: Vec<f64>,
    grad_b: Vec<f64>,
}

struct Fitter<'a> {
    design: &'a GlmmDesign,
    config: &'a GlmmConfig,
    rule: GaussHermiteRule,
    /// Rows of each group.
    members: Vec<Vec<usize>>,
    /// Sum of log binomial coefficients.
    log_binom: f64,
    start: DVector<f64>,
}

impl<'a> Fitter<'a> {
    fn new(design: &'a GlmmDesign, config: &'a GlmmConfig) -> Result<Self> {
        let rule = GaussHermiteRule::new(config.n_agq)?;
        let mut members = vec![Vec::new(); design.n_groups()];
        for (i, &g) in design.groups().codes().iter().enumerate() {
            members[g].push(i);
        }
        let log_binom = design
            .successes()
            .iter()
            .zip(design.trials())
            .map(|(&y, &n)| ln_binomial(n as u64, y as u64))
            .sum();
        let start = starting_values(design);

        Ok(Self {
            design,
            config,
            rule,
            members,
            log_binom,
            start,
        })
    }

    fn linear_predictor(&self, beta: &DVector<f64>, b: &[f64]) -> Vec<f64> {
        let xb = self.design.x() * beta;
        xb.iter()
            .zip(self.design.groups().codes())
            .map(|(&v, &g)| v + b[g])
            .collect()
    }

    /// Penalized log-likelihood without binomial constants.
    fn penalized(&self, eta: &[f64], b: &[f64], sigma: f64) -> f64 {
        let ll: f64 = eta
            .iter()
            .zip(self.design.successes())
            .zip(self.design.trials())
            .map(|((&e, &y), &n)| y * e - n * log1p_exp(e))
            .sum();
        if sigma > 0.0 {
            ll - b.iter().map(|v| v * v).sum::<f64>() / (2.0 * sigma * sigma)
        } else {
            ll
        }
    }

    fn assemble(&self, eta: &[f64], b: &[f64], sigma: f64) -> Blocks {
        let x = self.design.x();
        let y = self.design.successes();
        let n = self.design.trials();
        let codes = self.design.groups().codes();
        let p = self.design.n_coefficients();
        let m = self.design.n_groups();
        let precision = if sigma > 0.0 { 1.0 / (sigma * sigma) } else { 0.0 };

        let mut xtwx = DMatrix::zeros(p, p);
        let mut grad_beta = DVector::zeros(p);
        let mut u = DMatrix::zeros(p, m);
        let mut d = vec![precision; m];
        let mut grad_b: Vec<f64> = b.iter().map(|v| -v * precision).collect();

        for i in 0..eta.len() {
            let mu = inv_logit(eta[i]);
            let w = n[i] * LogitLink.variance(mu);
            let r = y[i] - n[i] * mu;
            let g = codes[i];
            for a in 0..p {
                let xa = x[(i, a)];
                if xa == 0.0 {
                    continue;
                }
                grad_beta[a] += xa * r;
                u[(a, g)] += w * xa;
                for c in 0..p {
                    xtwx[(a, c)] += w * xa * x[(i, c)];
                }
            }
            d[g] += w;
            grad_b[g] += r;
        }

        Blocks {
            xtwx,
            grad_beta,
            u,
            d,
            grad_b,
        }
    }

    /// Schur complement `X'WX - U D⁻¹ U'` (just `X'WX` without random effects).
    fn schur(blocks: &Blocks, with_random: bool) -> DMatrix<f64> {
        let mut s = blocks.xtwx.clone();
        if with_random {
            for (j, &dj) in blocks.d.iter().enumerate() {
                let uj = blocks.u.column(j);
                s -= (uj * uj.transpose()) / dj;
            }
        }
        s
    }

    fn newton_step(&self, blocks: &Blocks, with_random: bool) -> Result<(DVector<f64>, Vec<f64>)> {
        let s = Self::schur(blocks, with_random);
        let mut rhs = blocks.grad_beta.clone();
        if with_random {
            for (j, &dj) in blocks.d.iter().enumerate() {
                rhs -= blocks.u.column(j) * (blocks.grad_b[j] / dj);
            }
        }
        let delta_beta = solve_spd(s, &rhs).ok_or_else(|| {
            GlmmError::Numerical("penalized Hessian is not positive definite".to_string())
        })?;
        let delta_b = if with_random {
            blocks
                .d
                .iter()
                .enumerate()
                .map(|(j, &dj)| (blocks.grad_b[j] - blocks.u.column(j).dot(&delta_beta)) / dj)
                .collect()
        } else {
            vec![0.0; blocks.d.len()]
        };
        Ok((delta_beta, delta_b))
    }

    /// Penalized IRLS at fixed σ (σ = 0 fits the plain GLM).
    fn pirls(&self, sigma: f64) -> Result<PirlsSolution> {
        let with_random = sigma > 0.0;
        let ceiling = self.config.coef_ceiling;
        let mut beta = self.start.clone();
        let mut b = vec![0.0; self.design.n_groups()];
        let mut eta = self.linear_predictor(&beta, &b);
        let mut objective = self.penalized(&eta, &b, sigma);

        for iter in 0..self.config.max_iter {
            let blocks = self.assemble(&eta, &b, sigma);
            let (delta_beta, delta_b) = self.newton_step(&blocks, with_random)?;

            let mut step = 1.0;
            let mut accepted = None;
            for _ in 0..MAX_HALVINGS {
                let cand_beta = (&beta + &delta_beta * step).map(|v| v.clamp(-ceiling, ceiling));
                let cand_b: Vec<f64> = b.iter().zip(&delta_b).map(|(v, d)| v + step * d).collect();
                let cand_eta = self.linear_predictor(&cand_beta, &cand_b);
                let cand_obj = self.penalized(&cand_eta, &cand_b, sigma);
                if cand_obj.is_finite() && cand_obj >= objective {
                    accepted = Some((cand_beta, cand_b, cand_eta, cand_obj));
                    break;
                }
                step *= 0.5;
            }

            let Some((new_beta, new_b, new_eta, new_obj)) = accepted else {
                // No step improves the objective: already at the optimum to machine precision.
                debug!("PIRLS step halving stalled at iteration {} (sigma={})", iter + 1, sigma);
                return Ok(PirlsSolution {
                    beta,
                    b,
                    iterations: iter + 1,
                });
            };

            let change = (new_obj - objective).abs() / (new_obj.abs() + 0.1);
            beta = new_beta;
            b = new_b;
            eta = new_eta;
            objective = new_obj;

            if change < self.config.tol {
                return Ok(PirlsSolution {
                    beta,
                    b,
                    iterations: iter + 1,
                });
            }
        }

        Err(GlmmError::Convergence(format!(
            "penalized IRLS did not converge in {} iterations (sigma = {})",
            self.config.max_iter, sigma
        )))
    }

    /// Log of one group's marginal likelihood contribution (without binomial constants).
    fn group_log_integral(&self, rows: &[usize], xb: &[f64], start: f64, sigma: f64) -> f64 {
        let y = self.design.successes();
        let n = self.design.trials();
        let precision = 1.0 / (sigma * sigma);
        let log_norm = -0.5 * (2.0 * std::f64::consts::PI * sigma * sigma).ln();

        let h = |b: f64| -> f64 {
            let ll: f64 = rows
                .iter()
                .map(|&i| {
                    let e = xb[i] + b;
                    y[i] * e - n[i] * log1p_exp(e)
                })
                .sum();
            ll - 0.5 * b * b * precision + log_norm
        };
        let derivatives = |b: f64| -> (f64, f64) {
            rows.iter().fold((-b * precision, precision), |(g, c), &i| {
                let mu = inv_logit(xb[i] + b);
                (g + y[i] - n[i] * mu, c + n[i] * mu * (1.0 - mu))
            })
        };

        let mut mode = start;
        for _ in 0..MODE_MAX_ITER {
            let (grad, curvature) = derivatives(mode);
            let full = grad / curvature;
            let current = h(mode);
            let mut t = 1.0;
            let mut next = mode + full;
            while h(next) < current && t > 1e-8 {
                t *= 0.5;
                next = mode + t * full;
            }
            let moved = (next - mode).abs();
            mode = next;
            if moved < 1e-10 * (1.0 + mode.abs()) {
                break;
            }
        }

        let (_, curvature) = derivatives(mode);
        self.rule.log_integrate(mode, 1.0 / curvature.sqrt(), h)
    }

    /// Approximate marginal log-likelihood at a PIRLS solution.
    fn marginal_loglik(&self, solution: &PirlsSolution, sigma: f64) -> f64 {
        if sigma == 0.0 {
            let eta = self.linear_predictor(&solution.beta, &solution.b);
            return self.penalized(&eta, &solution.b, 0.0) + self.log_binom;
        }

        let xb: Vec<f64> = (self.design.x() * &solution.beta).iter().copied().collect();
        // Collected in group order and summed sequentially so results do not
        // depend on thread scheduling.
        let per_group: Vec<f64> = self
            .members
            .par_iter()
            .enumerate()
            .map(|(j, rows)| self.group_log_integral(rows, &xb, solution.b[j], sigma))
            .collect();
        per_group.iter().sum::<f64>() + self.log_binom
    }

    fn profile(&self, sigma: f64) -> Result<(f64, PirlsSolution)> {
        let solution = self.pirls(sigma)?;
        let ll = self.marginal_loglik(&solution, sigma);
        Ok((ll, solution))
    }

    /// Golden-section search over log σ, then compare with the σ = 0 boundary.
    fn optimize_sigma(&self) -> Result<Optimum> {
        let (ll_zero, sol_zero) = self.profile(0.0)?;

        let mut lo = SIGMA_MIN.ln();
        let mut hi = SIGMA_MAX.ln();
        let mut c = hi - INV_GOLDEN * (hi - lo);
        let mut d = lo + INV_GOLDEN * (hi - lo);
        let (mut fc, mut sc) = self.profile(c.exp())?;
        let (mut fd, mut sd) = self.profile(d.exp())?;
        let mut previous = fc.max(fd);

        for iter in 0..self.config.max_outer_iter {
            if fc >= fd {
                hi = d;
                d = c;
                fd = fc;
                sd = sc;
                c = hi - INV_GOLDEN * (hi - lo);
                (fc, sc) = self.profile(c.exp())?;
            } else {
                lo = c;
                c = d;
                fc = fd;
                sc = sd;
                d = lo + INV_GOLDEN * (hi - lo);
                (fd, sd) = self.profile(d.exp())?;
            }

            let best = fc.max(fd);
            if !best.is_finite() {
                return Err(GlmmError::Convergence(format!(
                    "non-finite log-likelihood near sigma = {}",
                    (0.5 * (lo + hi)).exp()
                )));
            }
            let change = (best - previous).abs() / (best.abs() + 0.1);
            previous = best;
            debug!(
                "outer iteration {}: sigma in [{:.6}, {:.6}], logLik={:.8}",
                iter + 1,
                lo.exp(),
                hi.exp(),
                best
            );

            if hi - lo < LOG_SIGMA_TOL && change < self.config.tol {
                let (sigma, ll, solution) = if fc >= fd {
                    (c.exp(), fc, sc)
                } else {
                    (d.exp(), fd, sd)
                };
                if hi >= SIGMA_MAX.ln() - LOG_SIGMA_TOL {
                    warn!("Random-intercept SD at upper search bound ({})", SIGMA_MAX);
                }

                let boundary_wins = ll_zero >= ll - self.config.tol * (ll.abs() + 0.1);
                let (sigma, log_likelihood, solution) = if boundary_wins {
                    (0.0, ll_zero, sol_zero)
                } else {
                    (sigma, ll, solution)
                };
                return Ok(Optimum {
                    sigma,
                    log_likelihood,
                    solution,
                    outer_iterations: iter + 1,
                });
            }
        }

        Err(GlmmError::Convergence(format!(
            "variance search did not converge in {} iterations",
            self.config.max_outer_iter
        )))
    }

    /// Inverse Schur complement of the penalized Hessian at the solution.
    fn covariance(&self, solution: &PirlsSolution, sigma: f64) -> Option<DMatrix<f64>> {
        let eta = self.linear_predictor(&solution.beta, &solution.b);
        let blocks = self.assemble(&eta, &solution.b, sigma);
        let s = Self::schur(&blocks, sigma > 0.0);
        let cov = s.cholesky()?.inverse();
        cov.iter().all(|v| v.is_finite()).then_some(cov)
    }
}

/// Weighted least squares of empirical logits on X.
fn starting_values(design: &GlmmDesign) -> DVector<f64> {
    let x = design.x();
    let p = design.n_coefficients();
    let mut xtwx = DMatrix::zeros(p, p);
    let mut xtwz = DVector::zeros(p);
    for (i, (&y, &n)) in design.successes().iter().zip(design.trials()).enumerate() {
        let pt = (y + 0.5) / (n + 1.0);
        let z = logit(pt);
        let w = n * pt * (1.0 - pt);
        for a in 0..p {
            let xa = x[(i, a)];
            xtwz[a] += w * xa * z;
            for c in 0..p {
                xtwx[(a, c)] += w * xa * x[(i, c)];
            }
        }
    }
    solve_spd(xtwx, &xtwz).unwrap_or_else(|| DVector::zeros(p))
}

/// Solve `A x = b` for symmetric positive definite `A`, retrying with a small ridge.
fn solve_spd(a: DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    if let Some(chol) = a.clone().cholesky() {
        return Some(chol.solve(b));
    }
    let scale = a.diagonal().iter().fold(0.0f64, |m, v| m.max(v.abs())).max(1.0);
    let n = a.nrows();
    let ridged = a + DMatrix::identity(n, n) * (scale * 1e-10);
    ridged.cholesky().map(|chol| chol.solve(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Factor;
    use approx::assert_relative_eq;

    /// 3 species x 2 sources x 10 masses of 20 eggs with a source offset and
    /// deterministic jitter.
    fn three_species_design(parameterization: Parameterization) -> GlmmDesign {
        let rates = [("A", 0.9), ("B", 0.5), ("C", 0.1)];
        let offsets = [("s1", 0.3), ("s2", -0.3)];
        let mut species = Vec::new();
        let mut sources = Vec::new();
        let mut successes = Vec::new();
        let mut trials = Vec::new();
        for (name, rate) in rates {
            for (src, offset) in offsets {
                for k in 0..10 {
                    let jitter = (k as f64 - 4.5) * 0.08;
                    let p = inv_logit(logit(rate) + offset + jitter);
                    species.push(name);
                    sources.push(src);
                    successes.push((20.0 * p).round() as u64);
                    trials.push(20);
                }
            }
        }
        GlmmDesign::new(
            Factor::from_values("species", &species),
            Factor::from_values("source", &sources),
            &successes,
            &trials,
            parameterization,
        )
        .unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = GlmmConfig::default();
        assert_eq!(config.max_iter, 100);
        assert_eq!(config.n_agq, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_invalid() {
        let config = GlmmConfig {
            n_agq: 0,
            ..GlmmConfig::default()
        };
        assert!(config.validate().is_err());
        let config = GlmmConfig {
            tol: 0.0,
            ..GlmmConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fit_recovers_level_logits() {
        let design = three_species_design(Parameterization::Reference);
        let fit = fit_glmm(&design, &GlmmConfig::default()).unwrap();

        assert_eq!(fit.coefficient_names, vec!["(Intercept)", "speciesB", "speciesC"]);
        assert_eq!(fit.n_parameters(), 4);
        let eta = fit.level_predictors();
        assert_relative_eq!(eta[0], logit(0.9), epsilon = 0.35);
        assert_relative_eq!(eta[1], 0.0, epsilon = 0.35);
        assert_relative_eq!(eta[2], logit(0.1), epsilon = 0.35);
        assert!(fit.sigma2 >= 0.0);
        assert!(fit.log_likelihood.is_finite());
        assert!(fit.covariance.is_some());
        assert!(!fit.has_separation());
    }

    #[test]
    fn test_source_offsets_give_positive_variance() {
        let design = three_species_design(Parameterization::Reference);
        let fit = fit_glmm(&design, &GlmmConfig::default()).unwrap();
        assert!(fit.sigma2 > 0.0, "sigma2 = {}", fit.sigma2);
        assert_eq!(fit.random_effects.len(), 2);
        // s1 was shifted up, s2 down
        assert!(fit.random_effects[0] > fit.random_effects[1]);
    }

    #[test]
    fn test_parameterization_invariance() {
        let reference = fit_glmm(
            &three_species_design(Parameterization::Reference),
            &GlmmConfig::default(),
        )
        .unwrap();
        let cell = fit_glmm(
            &three_species_design(Parameterization::CellMeans),
            &GlmmConfig::default(),
        )
        .unwrap();

        let a = reference.level_predictors();
        let b = cell.level_predictors();
        for k in 0..3 {
            assert_relative_eq!(a[k], b[k], epsilon = 1e-4);
        }
        assert_relative_eq!(reference.log_likelihood, cell.log_likelihood, epsilon = 1e-6);
        assert_relative_eq!(reference.sigma2, cell.sigma2, epsilon = 1e-4);
    }

    #[test]
    fn test_quadrature_close_to_laplace() {
        let design = three_species_design(Parameterization::Reference);
        let laplace = fit_glmm(&design, &GlmmConfig::default()).unwrap();
        let agq = fit_glmm(
            &design,
            &GlmmConfig {
                n_agq: 7,
                ..GlmmConfig::default()
            },
        )
        .unwrap();
        assert_eq!(agq.n_agq, 7);
        assert!((laplace.log_likelihood - agq.log_likelihood).abs() < 1.0);
    }

    #[test]
    fn test_no_source_variation_hits_boundary() {
        // Every mass of a species has exactly the same proportion.
        let mut species = Vec::new();
        let mut sources = Vec::new();
        let mut successes = Vec::new();
        for (name, y) in [("A", 18u64), ("B", 10), ("C", 2)] {
            for k in 0..8 {
                species.push(name);
                sources.push(if k % 2 == 0 { "s1" } else { "s2" });
                successes.push(y);
            }
        }
        let trials = vec![20u64; successes.len()];
        let design = GlmmDesign::new(
            Factor::from_values("species", &species),
            Factor::from_values("source", &sources),
            &successes,
            &trials,
            Parameterization::Reference,
        )
        .unwrap();

        let fit = fit_glmm(&design, &GlmmConfig::default()).unwrap();
        assert_eq!(fit.sigma2, 0.0);
        assert!(fit.warnings.contains(&FitWarning::SingularVariance));
        assert_relative_eq!(fit.level_predictors()[0], logit(0.9), epsilon = 1e-6);
    }

    #[test]
    fn test_separation_warning() {
        let mut species = Vec::new();
        let mut sources = Vec::new();
        let mut successes = Vec::new();
        for k in 0..12 {
            species.push("A");
            sources.push(if k % 2 == 0 { "s1" } else { "s2" });
            successes.push(8 + (k % 3) as u64);
            species.push("Z");
            sources.push(if k % 2 == 0 { "s1" } else { "s2" });
            successes.push(0);
        }
        let trials = vec![20u64; successes.len()];
        let design = GlmmDesign::new(
            Factor::from_values("species", &species),
            Factor::from_values("source", &sources),
            &successes,
            &trials,
            Parameterization::Reference,
        )
        .unwrap();

        let fit = fit_glmm(&design, &GlmmConfig::default()).unwrap();
        assert!(fit.has_separation());
        assert!(fit.warnings.contains(&FitWarning::Separation {
            level: "Z".to_string(),
            direction: Separation::AllFailures,
        }));
        let eta = fit.level_predictors();
        assert!(eta[1] < -10.0, "separated level predictor {}", eta[1]);
        assert!(fit.coefficients.iter().all(|b| b.abs() <= 30.0));
    }

    #[test]
    fn test_all_successes_warning() {
        let mut species = Vec::new();
        let mut sources = Vec::new();
        let mut successes = Vec::new();
        for k in 0..12 {
            species.push("A");
            sources.push(if k % 2 == 0 { "s1" } else { "s2" });
            successes.push(8 + (k % 3) as u64);
            species.push("Z");
            sources.push(if k % 2 == 0 { "s1" } else { "s2" });
            successes.push(20);
        }
        let trials = vec![20u64; successes.len()];
        let design = GlmmDesign::new(
            Factor::from_values("species", &species),
            Factor::from_values("source", &sources),
            &successes,
            &trials,
            Parameterization::Reference,
        )
        .unwrap();

        let fit = fit_glmm(&design, &GlmmConfig::default()).unwrap();
        assert!(fit.warnings.contains(&FitWarning::Separation {
            level: "Z".to_string(),
            direction: Separation::AllSuccesses,
        }));
        let eta = fit.level_predictors();
        assert!(eta[1] > 10.0, "separated level predictor {}", eta[1]);
        assert!(fit.coefficients.iter().all(|b| b.abs() <= 30.0));
    }

    #[test]
    fn test_fit_is_deterministic() {
        let design = three_species_design(Parameterization::Reference);
        let a = fit_glmm(&design, &GlmmConfig::default()).unwrap();
        let b = fit_glmm(&design, &GlmmConfig::default()).unwrap();
        assert_eq!(a.coefficients, b.coefficients);
        assert_eq!(a.sigma2, b.sigma2);
        assert_eq!(a.log_likelihood.to_bits(), b.log_likelihood.to_bits());
    }

    #[test]
    fn test_null_model() {
        let design = three_species_design(Parameterization::Reference);
        let full = fit_glmm(&design, &GlmmConfig::default()).unwrap();
        let null = fit_null_model(&design, &GlmmConfig::default()).unwrap();
        assert_eq!(null.n_coefficients(), 1);
        assert!(full.log_likelihood > null.log_likelihood);
    }

    #[test]
    fn test_convergence_error_on_tiny_budget() {
        let design = three_species_design(Parameterization::Reference);
        let config = GlmmConfig {
            max_iter: 1,
            ..GlmmConfig::default()
        };
        let result = fit_glmm(&design, &config);
        assert!(matches!(result, Err(GlmmError::Convergence(_))));
    }

    #[test]
    fn test_information_criteria() {
        let design = three_species_design(Parameterization::Reference);
        let fit = fit_glmm(&design, &GlmmConfig::default()).unwrap();
        assert_relative_eq!(fit.aic(), fit.deviance() + 8.0, epsilon = 1e-9);
        assert!(fit.bic() > fit.aic());
    }
}
