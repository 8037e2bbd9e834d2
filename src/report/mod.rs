//! Probability-scale reporting and output tables.

pub mod backtransform;
pub mod tables;

pub use backtransform::{back_transform, back_transform_all, BackTransformedEstimate, OddsRatio};
pub use tables::{write_contrast_table, write_json, write_level_table};
