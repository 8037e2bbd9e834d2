//! Categorical factors with an explicit level order.

use crate::error::{GlmmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A categorical variable: ordered distinct levels plus a level code per row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Factor {
    name: String,
    levels: Vec<String>,
    codes: Vec<usize>,
}

impl Factor {
    /// Build a factor with levels in order of first appearance.
    pub fn from_values<S: AsRef<str>>(name: &str, values: &[S]) -> Self {
        let mut levels: Vec<String> = Vec::new();
        let mut lookup: HashMap<&str, usize> = HashMap::new();
        let codes = values
            .iter()
            .map(|v| {
                let v = v.as_ref();
                *lookup.entry(v).or_insert_with(|| {
                    levels.push(v.to_string());
                    levels.len() - 1
                })
            })
            .collect();

        Self {
            name: name.to_string(),
            levels,
            codes,
        }
    }

    /// Build a factor whose levels follow `order`.
    ///
    /// Levels listed in `order` but absent from the data are dropped. Every
    /// value must appear in `order`.
    pub fn with_order<S: AsRef<str>>(name: &str, values: &[S], order: &[String]) -> Result<Self> {
        let mut seen = HashMap::new();
        for (i, level) in order.iter().enumerate() {
            if seen.insert(level.as_str(), i).is_some() {
                return Err(GlmmError::InvalidParameter(format!(
                    "level '{}' listed twice in ordering for '{}'",
                    level, name
                )));
            }
        }

        let mut present = vec![false; order.len()];
        for v in values {
            let v = v.as_ref();
            let pos = seen.get(v).ok_or_else(|| {
                GlmmError::InvalidParameter(format!(
                    "value '{}' of '{}' is missing from the level ordering",
                    v, name
                ))
            })?;
            present[*pos] = true;
        }

        let levels: Vec<String> = order
            .iter()
            .zip(&present)
            .filter(|(_, &p)| p)
            .map(|(l, _)| l.clone())
            .collect();
        let lookup: HashMap<&str, usize> = levels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.as_str(), i))
            .collect();
        let codes = values.iter().map(|v| lookup[v.as_ref()]).collect();

        Ok(Self {
            name: name.to_string(),
            levels,
            codes,
        })
    }

    /// Variable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Levels in order.
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// Level code of each row.
    pub fn codes(&self) -> &[usize] {
        &self.codes
    }

    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Position of a level, if present.
    pub fn code_of(&self, level: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == level)
    }

    /// Rows per level.
    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.levels.len()];
        for &c in &self.codes {
            counts[c] += 1;
        }
        counts
    }
}
