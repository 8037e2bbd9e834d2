//! Analysis configuration, loadable from YAML.

use crate::data::{ColumnMap, CountColumns, ModelFormula, Parameterization};
use crate::error::{GlmmError, Result};
use crate::model::glmm::GlmmConfig;
use crate::test::OmnibusMethod;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for one analysis run.
///
/// Every field has a default, so a YAML file only needs the settings it
/// changes:
///
/// ```yaml
/// formula: "~ species + (1 | source)"
/// omnibus: wald
/// level_order: [A, B, C]
/// glmm:
///   n_agq: 5
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Name of the analysis (used in reports).
    pub name: String,
    /// Model formula: one fixed factor and one random intercept.
    pub formula: String,
    /// Confidence intervals are `1 - alpha`.
    pub alpha: f64,
    /// FDR target for pairwise contrasts.
    pub fdr_q: f64,
    pub parameterization: Parameterization,
    pub omnibus: OmnibusMethod,
    /// Explicit level order of the fixed factor; first appearance otherwise.
    pub level_order: Option<Vec<String>>,
    /// Count and treatment column names.
    pub columns: CountColumns,
    /// Treatments dropped before modelling.
    pub exclude_treatments: Vec<String>,
    pub glmm: GlmmConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            name: "parasitism".to_string(),
            formula: "~ species + (1 | source)".to_string(),
            alpha: 0.05,
            fdr_q: 0.05,
            parameterization: Parameterization::Reference,
            omnibus: OmnibusMethod::LikelihoodRatio,
            level_order: None,
            columns: CountColumns::default(),
            exclude_treatments: vec!["Control".to_string()],
            glmm: GlmmConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(GlmmError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(GlmmError::from)
    }

    /// Load from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn with_formula(mut self, formula: &str) -> Self {
        self.formula = formula.to_string();
        self
    }

    pub fn with_omnibus(mut self, method: OmnibusMethod) -> Self {
        self.omnibus = method;
        self
    }

    pub fn with_parameterization(mut self, parameterization: Parameterization) -> Self {
        self.parameterization = parameterization;
        self
    }

    pub fn with_level_order(mut self, order: Vec<String>) -> Self {
        self.level_order = Some(order);
        self
    }

    pub fn with_exclude_treatments(mut self, treatments: Vec<String>) -> Self {
        self.exclude_treatments = treatments;
        self
    }

    pub fn with_glmm(mut self, glmm: GlmmConfig) -> Self {
        self.glmm = glmm;
        self
    }

    /// Parse the formula.
    pub fn model_formula(&self) -> Result<ModelFormula> {
        ModelFormula::parse(&self.formula)
    }

    /// Input column mapping derived from the formula and `columns`.
    pub fn column_map(&self) -> Result<ColumnMap> {
        Ok(ColumnMap::new(&self.model_formula()?, &self.columns))
    }

    /// Check every setting before any data is touched.
    pub fn validate(&self) -> Result<()> {
        self.model_formula()?;
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(GlmmError::InvalidParameter(format!(
                "alpha must be in (0, 1), got {}",
                self.alpha
            )));
        }
        if !(self.fdr_q > 0.0 && self.fdr_q <= 1.0) {
            return Err(GlmmError::InvalidParameter(format!(
                "fdr_q must be in (0, 1], got {}",
                self.fdr_q
            )));
        }
        if self.columns.emergence.is_empty() {
            return Err(GlmmError::InvalidParameter(
                "at least one emergence column is required".to_string(),
            ));
        }
        self.glmm.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.alpha, 0.05);
        assert_eq!(config.omnibus, OmnibusMethod::LikelihoodRatio);
        assert_eq!(config.exclude_treatments, vec!["Control"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
formula: "~ host + (1 | batch)"
omnibus: wald
parameterization: cell_means
level_order: [C, B, A]
glmm:
  n_agq: 5
"#;
        let config = AnalysisConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.omnibus, OmnibusMethod::Wald);
        assert_eq!(config.parameterization, Parameterization::CellMeans);
        assert_eq!(config.glmm.n_agq, 5);
        assert_eq!(config.glmm.max_iter, 100);
        assert_eq!(config.fdr_q, 0.05);

        let map = config.column_map().unwrap();
        assert_eq!(map.species, "host");
        assert_eq!(map.source, "batch");
        assert_eq!(map.eggs, "eggs");
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = AnalysisConfig::default()
            .with_omnibus(OmnibusMethod::Wald)
            .with_level_order(vec!["A".into(), "B".into()]);
        let yaml = config.to_yaml().unwrap();
        assert_eq!(AnalysisConfig::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"alpha: 0.1\nexclude_treatments: []\n").unwrap();
        let config = AnalysisConfig::from_file(file.path()).unwrap();
        assert_eq!(config.alpha, 0.1);
        assert!(config.exclude_treatments.is_empty());
    }

    #[test]
    fn test_invalid_settings() {
        assert!(AnalysisConfig {
            alpha: 0.0,
            ..AnalysisConfig::default()
        }
        .validate()
        .is_err());
        assert!(AnalysisConfig::default()
            .with_formula("~ species")
            .validate()
            .is_err());
        assert!(AnalysisConfig::from_yaml("omnibus: score").is_err());
    }
}
