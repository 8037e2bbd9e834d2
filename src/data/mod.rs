//! Data structures for the parasitism analysis.

mod design;
mod factor;
mod formula;
mod observation;

pub use design::{GlmmDesign, Parameterization, Separation};
pub use factor::Factor;
pub use formula::ModelFormula;
pub use observation::{ColumnMap, CountColumns, Exclusion, Observation, ObservationTable};
