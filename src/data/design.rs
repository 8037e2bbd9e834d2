//! Design construction for the binomial mixed model.
//!
//! The fixed part is a single categorical factor coded either against a
//! reference level (intercept + k−1 treatment contrasts) or as cell means
//! (k indicator columns, no intercept). The random part is one intercept per
//! grouping level, stored as a group index per row since Z is an indicator
//! matrix.

use crate::data::{Factor, ObservationTable};
use crate::error::{GlmmError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Coding of the fixed factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameterization {
    /// Intercept is the first level; other coefficients are differences from it.
    #[default]
    Reference,
    /// One coefficient per level, each the level's linear predictor.
    CellMeans,
}

/// Everything the fitter needs: X, group index, counts.
#[derive(Debug, Clone)]
pub struct GlmmDesign {
    x: DMatrix<f64>,
    coefficient_names: Vec<String>,
    /// Maps coefficients to per-level linear predictors (levels × coefficients).
    level_matrix: DMatrix<f64>,
    fixed: Factor,
    groups: Factor,
    successes: Vec<f64>,
    trials: Vec<f64>,
    parameterization: Parameterization,
}

impl GlmmDesign {
    /// Build a design from factors and counts.
    pub fn new(
        fixed: Factor,
        groups: Factor,
        successes: &[u64],
        trials: &[u64],
        parameterization: Parameterization,
    ) -> Result<Self> {
        let n = fixed.len();
        if n == 0 {
            return Err(GlmmError::EmptyData("no observations to model".to_string()));
        }
        if groups.len() != n || successes.len() != n || trials.len() != n {
            return Err(GlmmError::InvalidParameter(format!(
                "design inputs disagree in length: {} fixed, {} groups, {} successes, {} trials",
                n,
                groups.len(),
                successes.len(),
                trials.len()
            )));
        }
        if fixed.n_levels() < 2 {
            return Err(GlmmError::InvalidParameter(format!(
                "fixed factor '{}' needs at least 2 levels, found {}",
                fixed.name(),
                fixed.n_levels()
            )));
        }
        for (i, (&s, &t)) in successes.iter().zip(trials).enumerate() {
            if t == 0 || s > t {
                return Err(GlmmError::validation(
                    i + 1,
                    format!("successes {} not within [0, {}]", s, t),
                ));
            }
        }

        let (x, coefficient_names, level_matrix) = build_fixed(&fixed, parameterization);

        Ok(Self {
            x,
            coefficient_names,
            level_matrix,
            fixed,
            groups,
            successes: successes.iter().map(|&s| s as f64).collect(),
            trials: trials.iter().map(|&t| t as f64).collect(),
            parameterization,
        })
    }

    /// Build from a table using `fixed_name` and `group_name` as factor names.
    pub fn from_table(
        table: &ObservationTable,
        fixed_name: &str,
        group_name: &str,
        parameterization: Parameterization,
        level_order: Option<&[String]>,
    ) -> Result<Self> {
        let fixed = table.species_factor(fixed_name, level_order)?;
        let groups = table.source_factor(group_name);
        let successes: Vec<u64> = table.iter().map(|o| o.n_successes).collect();
        let trials: Vec<u64> = table.iter().map(|o| o.n_trials).collect();
        Self::new(fixed, groups, &successes, &trials, parameterization)
    }

    /// Intercept-only design over the same rows and groups (the null model).
    pub fn intercept_only(&self) -> Self {
        let n = self.n_obs();
        let k = self.fixed.n_levels();
        Self {
            x: DMatrix::from_element(n, 1, 1.0),
            coefficient_names: vec!["(Intercept)".to_string()],
            level_matrix: DMatrix::from_element(k, 1, 1.0),
            fixed: self.fixed.clone(),
            groups: self.groups.clone(),
            successes: self.successes.clone(),
            trials: self.trials.clone(),
            parameterization: Parameterization::Reference,
        }
    }

    /// Fixed-effect design matrix (observations × coefficients).
    pub fn x(&self) -> &DMatrix<f64> {
        &self.x
    }

    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    pub fn level_matrix(&self) -> &DMatrix<f64> {
        &self.level_matrix
    }

    pub fn fixed(&self) -> &Factor {
        &self.fixed
    }

    pub fn groups(&self) -> &Factor {
        &self.groups
    }

    pub fn successes(&self) -> &[f64] {
        &self.successes
    }

    pub fn trials(&self) -> &[f64] {
        &self.trials
    }

    pub fn parameterization(&self) -> Parameterization {
        self.parameterization
    }

    pub fn n_obs(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_coefficients(&self) -> usize {
        self.x.ncols()
    }

    pub fn n_groups(&self) -> usize {
        self.groups.n_levels()
    }

    /// Levels of the fixed factor where every row is a failure or every row a success.
    pub fn separated_levels(&self) -> Vec<(String, Separation)> {
        let k = self.fixed.n_levels();
        let mut succ = vec![0.0; k];
        let mut tot = vec![0.0; k];
        for (i, &c) in self.fixed.codes().iter().enumerate() {
            succ[c] += self.successes[i];
            tot[c] += self.trials[i];
        }
        self.fixed
            .levels()
            .iter()
            .enumerate()
            .filter_map(|(j, level)| {
                if succ[j] == 0.0 {
                    Some((level.clone(), Separation::AllFailures))
                } else if succ[j] == tot[j] {
                    Some((level.clone(), Separation::AllSuccesses))
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Direction of a perfectly separated level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Separation {
    AllFailures,
    AllSuccesses,
}

fn build_fixed(
    fixed: &Factor,
    parameterization: Parameterization,
) -> (DMatrix<f64>, Vec<String>, DMatrix<f64>) {
    let n = fixed.len();
    let k = fixed.n_levels();
    let codes = fixed.codes();
    let name = fixed.name();

    match parameterization {
        Parameterization::Reference => {
            let mut names = vec!["(Intercept)".to_string()];
            names.extend(fixed.levels()[1..].iter().map(|l| format!("{}{}", name, l)));
            let x = DMatrix::from_fn(n, k, |i, j| {
                if j == 0 || codes[i] == j {
                    1.0
                } else {
                    0.0
                }
            });
            let level_matrix =
                DMatrix::from_fn(k, k, |l, j| if j == 0 || l == j { 1.0 } else { 0.0 });
            (x, names, level_matrix)
        }
        Parameterization::CellMeans => {
            let names = fixed
                .levels()
                .iter()
                .map(|l| format!("{}{}", name, l))
                .collect();
            let x = DMatrix::from_fn(n, k, |i, j| if codes[i] == j { 1.0 } else { 0.0 });
            (x, names, DMatrix::identity(k, k))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_design(parameterization: Parameterization) -> GlmmDesign {
        let fixed = Factor::from_values("species", &["A", "B", "C", "A"]);
        let groups = Factor::from_values("source", &["s1", "s1", "s2", "s2"]);
        GlmmDesign::new(fixed, groups, &[1, 2, 0, 4], &[4, 4, 4, 4], parameterization).unwrap()
    }

    #[test]
    fn test_reference_coding() {
        let d = toy_design(Parameterization::Reference);
        assert_eq!(d.coefficient_names(), &["(Intercept)", "speciesB", "speciesC"]);
        assert_eq!(d.x().row(1).iter().copied().collect::<Vec<_>>(), vec![1.0, 1.0, 0.0]);
        assert_eq!(d.x().row(3).iter().copied().collect::<Vec<_>>(), vec![1.0, 0.0, 0.0]);
        // Level C predictor = intercept + speciesC
        assert_eq!(
            d.level_matrix().row(2).iter().copied().collect::<Vec<_>>(),
            vec![1.0, 0.0, 1.0]
        );
    }

    #[test]
    fn test_cell_means_coding() {
        let d = toy_design(Parameterization::CellMeans);
        assert_eq!(d.coefficient_names(), &["speciesA", "speciesB", "speciesC"]);
        assert_eq!(d.x().row(2).iter().copied().collect::<Vec<_>>(), vec![0.0, 0.0, 1.0]);
        assert_eq!(d.level_matrix(), &DMatrix::<f64>::identity(3, 3));
    }

    #[test]
    fn test_intercept_only() {
        let d = toy_design(Parameterization::CellMeans).intercept_only();
        assert_eq!(d.n_coefficients(), 1);
        assert_eq!(d.level_matrix().nrows(), 3);
        assert_eq!(d.n_groups(), 2);
    }

    #[test]
    fn test_separated_levels() {
        let d = toy_design(Parameterization::Reference);
        assert_eq!(d.separated_levels(), vec![("C".to_string(), Separation::AllFailures)]);
    }

    #[test]
    fn test_all_successes_level() {
        let fixed = Factor::from_values("species", &["A", "B", "A", "B"]);
        let groups = Factor::from_values("source", &["s1", "s1", "s2", "s2"]);
        let d = GlmmDesign::new(fixed, groups, &[1, 4, 2, 4], &[4, 4, 4, 4], Parameterization::Reference)
            .unwrap();
        assert_eq!(d.separated_levels(), vec![("B".to_string(), Separation::AllSuccesses)]);
    }

    #[test]
    fn test_rejects_single_level() {
        let fixed = Factor::from_values("species", &["A", "A"]);
        let groups = Factor::from_values("source", &["s1", "s2"]);
        assert!(GlmmDesign::new(fixed, groups, &[1, 1], &[2, 2], Parameterization::Reference).is_err());
    }

    #[test]
    fn test_rejects_bad_counts() {
        let fixed = Factor::from_values("species", &["A", "B"]);
        let groups = Factor::from_values("source", &["s1", "s2"]);
        let result = GlmmDesign::new(fixed, groups, &[3, 1], &[2, 2], Parameterization::Reference);
        assert!(matches!(result, Err(GlmmError::Validation { row: 1, .. })));
    }
}
