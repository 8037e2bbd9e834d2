//! Parasitism GLMM Library
//!
//! Binomial generalized linear mixed models for proportion data pooled from
//! several experimental sources, built for egg-mass parasitism rates.
//!
//! # Overview
//!
//! The library is organized into modules that follow the analysis:
//!
//! - **data**: Observations, factors, formula and model design
//! - **profile**: Descriptive per-species and per-source summaries
//! - **model**: Logit link, Gauss-Hermite rules and the GLMM fitter
//! - **test**: Omnibus test of the fixed factor (likelihood ratio or Wald)
//! - **inference**: Marginal means and pairwise contrasts
//! - **correct**: Multiple testing correction (Benjamini-Hochberg)
//! - **report**: Probability-scale back-transformation and output tables
//! - **pipeline**: Configurable end-to-end analysis
//! - **simulate**: Seeded synthetic datasets
//!
//! # Example
//!
//! ```no_run
//! use parasitism_glmm::prelude::*;
//!
//! let config = AnalysisConfig::default();
//! let table = ObservationTable::from_path("masses.csv", &config.column_map().unwrap()).unwrap();
//!
//! let report = run_analysis(&table, &config).unwrap();
//! println!("{}", report.omnibus);
//! for c in report.contrasts.significant() {
//!     println!("{} vs {}: OR = {:.2}", c.level_a, c.level_b, c.odds_ratio());
//! }
//! ```

pub mod correct;
pub mod data;
pub mod error;
pub mod inference;
pub mod model;
pub mod pipeline;
pub mod profile;
pub mod report;
pub mod simulate;
pub mod test;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::correct::bh::{adjust_bh, correct_bh, BhCorrected};
    pub use crate::data::{
        ColumnMap, CountColumns, Exclusion, Factor, GlmmDesign, ModelFormula, Observation,
        ObservationTable, Parameterization, Separation,
    };
    pub use crate::error::{GlmmError, Result};
    pub use crate::inference::{
        estimate_marginal_means, pairwise_contrasts, Contrast, ContrastSet, MarginalMean,
        MarginalMeans,
    };
    pub use crate::model::{
        fit_glmm, fit_null_model, inv_logit, logit, FitWarning, FittedModel, GlmmConfig,
        LinkFunction, LogitLink,
    };
    pub use crate::pipeline::{run_analysis, run_analysis_file, AnalysisConfig, AnalysisReport};
    pub use crate::profile::{profile_groups, GroupProfile, GroupSummary};
    pub use crate::report::{back_transform, back_transform_all, BackTransformedEstimate, OddsRatio};
    pub use crate::simulate::{simulate, SimulatedData, SimulationConfig, SpeciesRate};
    pub use crate::test::{test_lrt, test_omnibus, test_wald, OmnibusMethod, OmnibusResult};
}
