//! Descriptive profiling of the observation table.

mod groups;

pub use groups::{profile_groups, GroupProfile, GroupSummary};
