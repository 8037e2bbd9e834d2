//! End-to-end analysis: filter, fit, test, estimate, contrast, report.

use crate::data::{Exclusion, GlmmDesign, ObservationTable, Parameterization};
use crate::error::{GlmmError, Result};
use crate::inference::{estimate_marginal_means, pairwise_contrasts, ContrastSet, MarginalMeans};
use crate::model::glmm::{fit_glmm, FitWarning, FittedModel};
use crate::pipeline::config::AnalysisConfig;
use crate::report::backtransform::{back_transform_all, BackTransformedEstimate, OddsRatio};
use crate::report::tables::{create, write_contrast_table, write_json, write_level_table};
use crate::test::{test_omnibus, OmnibusResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Conditional mode of one random intercept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomIntercept {
    pub group: String,
    pub mode: f64,
}

/// Serializable view of the fitted model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    pub formula: String,
    pub parameterization: Parameterization,
    pub coefficient_names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<Option<f64>>,
    /// Random-intercept variance.
    pub sigma2: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    pub n_obs: usize,
    pub n_groups: usize,
    pub n_agq: usize,
    pub inner_iterations: usize,
    pub outer_iterations: usize,
    pub random_intercepts: Vec<RandomIntercept>,
    pub warnings: Vec<FitWarning>,
}

impl ModelSummary {
    fn new(fit: &FittedModel, formula: &str) -> Self {
        Self {
            formula: formula.to_string(),
            parameterization: fit.parameterization,
            coefficient_names: fit.coefficient_names.clone(),
            coefficients: fit.coefficients.clone(),
            std_errors: fit.std_errors(),
            sigma2: fit.sigma2,
            log_likelihood: fit.log_likelihood,
            aic: fit.aic(),
            bic: fit.bic(),
            n_obs: fit.n_obs,
            n_groups: fit.n_groups(),
            n_agq: fit.n_agq,
            inner_iterations: fit.inner_iterations,
            outer_iterations: fit.outer_iterations,
            random_intercepts: fit
                .group_names
                .iter()
                .zip(&fit.random_effects)
                .map(|(group, &mode)| RandomIntercept {
                    group: group.clone(),
                    mode,
                })
                .collect(),
            warnings: fit.warnings.clone(),
        }
    }
}

/// Everything one analysis run produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub name: String,
    /// Observations used in the model.
    pub n_observations: usize,
    /// Rows left out, with reasons.
    pub exclusions: Vec<Exclusion>,
    pub model: ModelSummary,
    pub omnibus: OmnibusResult,
    /// Link-scale level means.
    pub marginal_means: MarginalMeans,
    /// Probability-scale level means.
    pub probabilities: Vec<BackTransformedEstimate>,
    pub contrasts: ContrastSet,
    pub odds_ratios: Vec<OddsRatio>,
}

impl AnalysisReport {
    /// Write `contrasts.tsv`, `levels.tsv` and `report.json` into `dir`.
    pub fn write_outputs<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        write_contrast_table(create(dir.join("contrasts.tsv"))?, &self.contrasts)?;
        write_level_table(
            create(dir.join("levels.tsv"))?,
            &self.marginal_means,
            &self.probabilities,
        )?;
        write_json(create(dir.join("report.json"))?, self)?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(GlmmError::from)
    }
}

impl std::fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Analysis: {}", self.name)?;
        writeln!(f, "  Model:        {}", self.model.formula)?;
        writeln!(
            f,
            "  Observations: {} ({} excluded)",
            self.n_observations,
            self.exclusions.len()
        )?;
        writeln!(f, "  Groups:       {}", self.model.n_groups)?;
        writeln!(f, "  sigma^2:      {:.4}", self.model.sigma2)?;
        writeln!(f, "  logLik:       {:.4}", self.model.log_likelihood)?;
        for w in &self.model.warnings {
            writeln!(f, "  Warning:      {}", w)?;
        }
        writeln!(f, "  {}", self.omnibus)?;
        writeln!(f)?;
        writeln!(f, "  Level means (probability scale):")?;
        for p in &self.probabilities {
            match (p.lower, p.upper) {
                (Some(lo), Some(hi)) => writeln!(
                    f,
                    "    {:<16} {:.4} [{:.4}, {:.4}]",
                    p.level, p.probability, lo, hi
                )?,
                _ => writeln!(f, "    {:<16} {:.4} [not estimable]", p.level, p.probability)?,
            }
        }
        writeln!(f)?;
        writeln!(
            f,
            "  Pairwise contrasts: {} of {} significant at q = {}",
            self.contrasts.n_significant(),
            self.contrasts.len(),
            self.contrasts.q
        )?;
        Ok(())
    }
}

/// Run the full analysis on an already-loaded table.
pub fn run_analysis(table: &ObservationTable, config: &AnalysisConfig) -> Result<AnalysisReport> {
    config.validate()?;
    let formula = config.model_formula()?;

    let modelled = table.exclude_treatments(&config.exclude_treatments);
    if modelled.is_empty() {
        return Err(GlmmError::EmptyData(format!(
            "no observations left after excluding treatments {:?}",
            config.exclude_treatments
        )));
    }
    info!(
        "Modelling {} observations ({} excluded)",
        modelled.len(),
        modelled.exclusions().len()
    );

    let design = GlmmDesign::from_table(
        &modelled,
        &formula.fixed,
        &formula.grouping,
        config.parameterization,
        config.level_order.as_deref(),
    )?;
    let fit = fit_glmm(&design, &config.glmm)?;

    let omnibus = test_omnibus(&fit, &design, &config.glmm, config.omnibus)?;
    info!("{}", omnibus);

    let marginal_means = estimate_marginal_means(&fit, config.alpha)?;
    let contrasts = pairwise_contrasts(&marginal_means, config.alpha, config.fdr_q)?;
    let probabilities = back_transform_all(&marginal_means.means, &fit.link);
    let odds_ratios = contrasts.contrasts.iter().map(OddsRatio::from).collect();
    info!(
        "{} of {} contrasts significant at q = {}",
        contrasts.n_significant(),
        contrasts.len(),
        config.fdr_q
    );

    Ok(AnalysisReport {
        name: config.name.clone(),
        n_observations: modelled.len(),
        exclusions: modelled.exclusions().to_vec(),
        model: ModelSummary::new(&fit, &formula.to_string()),
        omnibus,
        marginal_means,
        probabilities,
        contrasts,
        odds_ratios,
    })
}

/// Load a delimited file with the configured columns and run the analysis.
pub fn run_analysis_file<P: AsRef<Path>>(path: P, config: &AnalysisConfig) -> Result<AnalysisReport> {
    let table = ObservationTable::from_path(path, &config.column_map()?)?;
    run_analysis(&table, config)
}
