//! Model formula parsing.
//!
//! Supports the lme4-style subset this crate can fit: one categorical fixed
//! factor and one random intercept.
//!
//! - `~ species + (1 | source)`
//! - `parasitized ~ species + (1 | source)` (left-hand side is a label only)
//! - `~ (1 | source) + species` (term order is free)

use crate::error::{GlmmError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn random_term_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(([^)|]*)\|([^)]*)\)").expect("valid random-term regex"))
}

/// A parsed mixed-model formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFormula {
    /// Optional response label from the left-hand side.
    pub response: Option<String>,
    /// Fixed categorical factor.
    pub fixed: String,
    /// Random-intercept grouping variable.
    pub grouping: String,
    /// Original formula string.
    pub formula_str: String,
}

impl ModelFormula {
    /// Parse a formula string.
    ///
    /// # Examples
    /// ```
    /// use parasitism_glmm::data::ModelFormula;
    /// let f = ModelFormula::parse("~ species + (1 | source)").unwrap();
    /// assert_eq!(f.fixed, "species");
    /// assert_eq!(f.grouping, "source");
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
        let formula_str = formula.to_string();
        let (lhs, rhs) = formula.split_once('~').ok_or_else(|| {
            GlmmError::FormulaParse("Formula must contain '~'".to_string())
        })?;

        let response = Some(lhs.trim())
            .filter(|s| !s.is_empty())
            .map(String::from);
        let rhs = rhs.trim();
        if rhs.is_empty() {
            return Err(GlmmError::FormulaParse(
                "Formula right-hand side is empty".to_string(),
            ));
        }

        let re = random_term_regex();
        let random: Vec<(String, String)> = re
            .captures_iter(rhs)
            .map(|c| (c[1].trim().to_string(), c[2].trim().to_string()))
            .collect();

        let (terms, grouping) = match random.as_slice() {
            [single] => single.clone(),
            [] => {
                return Err(GlmmError::FormulaParse(format!(
                    "Formula needs a random intercept term like (1 | source): {}",
                    formula
                )))
            }
            _ => {
                return Err(GlmmError::FormulaParse(
                    "Only a single random intercept is supported".to_string(),
                ))
            }
        };
        if terms != "1" {
            return Err(GlmmError::FormulaParse(format!(
                "Only random intercepts (1 | group) are supported, got ({} | {})",
                terms, grouping
            )));
        }
        if grouping.is_empty() || grouping.contains(char::is_whitespace) {
            return Err(GlmmError::FormulaParse(format!(
                "Invalid random-effect grouping variable '{}'",
                grouping
            )));
        }

        let fixed_part = re.replace_all(rhs, "");
        let fixed_terms: Vec<&str> = fixed_part
            .split('+')
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "1")
            .collect();

        let fixed = match fixed_terms.as_slice() {
            [term] => *term,
            [] => {
                return Err(GlmmError::FormulaParse(
                    "Formula needs one fixed factor".to_string(),
                ))
            }
            _ => {
                return Err(GlmmError::FormulaParse(format!(
                    "Only one fixed factor is supported, got {:?}",
                    fixed_terms
                )))
            }
        };
        if fixed.contains(|c: char| c == '*' || c == ':' || c.is_whitespace()) || fixed == "0" {
            return Err(GlmmError::FormulaParse(format!(
                "Unsupported fixed term '{}'",
                fixed
            )));
        }

        Ok(Self {
            response,
            fixed: fixed.to_string(),
            grouping,
            formula_str,
        })
    }
}

impl Default for ModelFormula {
    fn default() -> Self {
        Self {
            response: None,
            fixed: "species".to_string(),
            grouping: "source".to_string(),
            formula_str: "~ species + (1 | source)".to_string(),
        }
    }
}

impl std::fmt::Display for ModelFormula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(resp) = &self.response {
            write!(f, "{} ", resp)?;
        }
        write!(f, "~ {} + (1 | {})", self.fixed, self.grouping)
    }
}
