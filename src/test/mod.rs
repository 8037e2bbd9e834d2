//! Hypothesis tests for the fixed factor.


pub use omnibus::{test_lrt, test_omnibus, test_wald, OmnibusMethod, OmnibusResult};
