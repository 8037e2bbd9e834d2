//! Configurable end-to-end analysis.

mod config;
mod runner;

pub use config::AnalysisConfig;
pub use runner::{
    run_analysis, run_analysis_file, AnalysisReport, ModelSummary, RandomIntercept,
};
