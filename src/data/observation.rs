//! Egg-mass observations and the validated observation table.

use crate::data::{Factor, ModelFormula};
use crate::error::{GlmmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// One egg mass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Fixed factor label (host species).
    pub species: String,
    /// Random grouping label (originating experiment or batch).
    pub source: String,
    /// Treatment label, used only for filtering.
    pub treatment: String,
    /// Parasitoid emergences (males + females).
    pub n_successes: u64,
    /// Eggs in the mass.
    pub n_trials: u64,
}

impl Observation {
    /// Build an observation, checking `0 < n_trials` and `n_successes <= n_trials`.
    ///
    /// `row` is only used for error reporting.
    pub fn new(
        row: usize,
        species: &str,
        source: &str,
        treatment: &str,
        n_successes: u64,
        n_trials: u64,
    ) -> Result<Self> {
        let obs = Self {
            species: species.to_string(),
            source: source.to_string(),
            treatment: treatment.to_string(),
            n_successes,
            n_trials,
        };
        obs.validate(row)?;
        Ok(obs)
    }

    fn validate(&self, row: usize) -> Result<()> {
        if self.species.trim().is_empty() {
            return Err(GlmmError::validation(row, "missing species label"));
        }
        if self.source.trim().is_empty() {
            return Err(GlmmError::validation(row, "missing source label"));
        }
        if self.n_trials == 0 {
            return Err(GlmmError::validation(row, "egg count must be positive"));
        }
        if self.n_successes > self.n_trials {
            return Err(GlmmError::validation(
                row,
                format!(
                    "{} emergences exceed {} eggs",
                    self.n_successes, self.n_trials
                ),
            ));
        }
        Ok(())
    }

    /// Observed proportion of eggs with an emergence.
    pub fn proportion(&self) -> f64 {
        self.n_successes as f64 / self.n_trials as f64
    }
}

/// Column names used when reading counts and the treatment label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountColumns {
    /// Treatment column (filter only).
    pub treatment: String,
    /// Total eggs per mass.
    pub eggs: String,
    /// Emergence count columns; successes are their sum.
    pub emergence: Vec<String>,
}

impl Default for CountColumns {
    fn default() -> Self {
        Self {
            treatment: "treatment".to_string(),
            eggs: "eggs".to_string(),
            emergence: vec!["males".to_string(), "females".to_string()],
        }
    }
}

/// Complete mapping from table headers to observation fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    pub species: String,
    pub source: String,
    pub treatment: String,
    pub eggs: String,
    pub emergence: Vec<String>,
}

impl ColumnMap {
    /// Factor columns come from the model formula, counts from `columns`.
    pub fn new(formula: &ModelFormula, columns: &CountColumns) -> Self {
        Self {
            species: formula.fixed.clone(),
            source: formula.grouping.clone(),
            treatment: columns.treatment.clone(),
            eggs: columns.eggs.clone(),
            emergence: columns.emergence.clone(),
        }
    }
}

impl Default for ColumnMap {
    fn default() -> Self {
        let counts = CountColumns::default();
        Self {
            species: "species".to_string(),
            source: "source".to_string(),
            treatment: counts.treatment,
            eggs: counts.eggs,
            emergence: counts.emergence,
        }
    }
}

/// A row that was left out of modelling, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    /// 1-based data row (header excluded).
    pub row: usize,
    pub reason: String,
}

/// Validated, read-only table of observations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationTable {
    observations: Vec<Observation>,
    /// Original data row of each kept observation.
    rows: Vec<usize>,
    exclusions: Vec<Exclusion>,
}

fn is_missing(raw: &str) -> bool {
    matches!(raw.trim(), "" | "NA" | "na" | "NaN" | "nan" | "N/A")
}

/// Parse a count cell; `Ok(None)` for a missing value.
fn parse_count(raw: &str, column: &str, row: usize) -> Result<Option<u64>> {
    if is_missing(raw) {
        return Ok(None);
    }
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<u64>() {
        return Ok(Some(v));
    }
    // Spreadsheet exports often write whole numbers as "12.0".
    match raw.parse::<f64>() {
        Ok(v) if v >= 0.0 && v.fract() == 0.0 && v.is_finite() => Ok(Some(v as u64)),
        _ => Err(GlmmError::validation(
            row,
            format!("column '{}' has non-count value '{}'", column, raw),
        )),
    }
}

impl ObservationTable {
    /// Build a table from already-constructed observations.
    pub fn from_observations(observations: Vec<Observation>) -> Result<Self> {
        for (i, obs) in observations.iter().enumerate() {
            obs.validate(i + 1)?;
        }
        let rows = (1..=observations.len()).collect();
        Ok(Self {
            observations,
            rows,
            exclusions: Vec::new(),
        })
    }

    /// Load a delimited file. `.tsv`/`.txt` are read tab-separated, anything else as CSV.
    pub fn from_path<P: AsRef<Path>>(path: P, columns: &ColumnMap) -> Result<Self> {
        let path = path.as_ref();
        let delimiter = match path.extension().and_then(|e| e.to_str()) {
            Some("tsv") | Some("txt") | Some("tab") => b'\t',
            _ => b',',
        };
        let file = File::open(path)?;
        Self::from_reader(file, delimiter, columns)
    }

    /// Load from any reader with the given delimiter.
    ///
    /// Rows with a missing count are excluded and recorded; malformed rows fail the load.
    pub fn from_reader<R: Read>(reader: R, delimiter: u8, columns: &ColumnMap) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let index: HashMap<&str, usize> =
            headers.iter().enumerate().map(|(i, h)| (h, i)).collect();
        let find = |name: &str| -> Result<usize> {
            index
                .get(name)
                .copied()
                .ok_or_else(|| GlmmError::MissingColumn(name.to_string()))
        };

        let species_idx = find(&columns.species)?;
        let source_idx = find(&columns.source)?;
        let treatment_idx = find(&columns.treatment)?;
        let eggs_idx = find(&columns.eggs)?;
        let emergence_idx: Vec<(usize, &str)> = columns
            .emergence
            .iter()
            .map(|c| find(c).map(|i| (i, c.as_str())))
            .collect::<Result<_>>()?;
        if emergence_idx.is_empty() {
            return Err(GlmmError::InvalidParameter(
                "at least one emergence column is required".to_string(),
            ));
        }

        let mut table = Self::default();
        for (i, record) in rdr.records().enumerate() {
            let record = record?;
            let row = i + 1;
            let cell = |idx: usize| record.get(idx).unwrap_or("");

            let eggs = parse_count(cell(eggs_idx), &columns.eggs, row)?;
            let mut successes = Some(0u64);
            let mut missing_column = None;
            for &(idx, name) in &emergence_idx {
                match parse_count(cell(idx), name, row)? {
                    Some(v) => {
                        if let Some(s) = successes {
                            successes = Some(s.checked_add(v).ok_or_else(|| {
                                GlmmError::validation(row, "emergence counts overflow")
                            })?);
                        }
                    }
                    None => {
                        successes = None;
                        missing_column.get_or_insert(name);
                    }
                }
            }

            let (n_trials, n_successes) = match (eggs, successes) {
                (Some(t), Some(s)) => (t, s),
                (None, _) => {
                    table.exclusions.push(Exclusion {
                        row,
                        reason: format!("missing '{}' count", columns.eggs),
                    });
                    continue;
                }
                (_, None) => {
                    table.exclusions.push(Exclusion {
                        row,
                        reason: format!("missing '{}' count", missing_column.unwrap_or("emergence")),
                    });
                    continue;
                }
            };

            let species = cell(species_idx);
            let source = cell(source_idx);
            if is_missing(species) {
                return Err(GlmmError::validation(row, "missing species label"));
            }
            if is_missing(source) {
                return Err(GlmmError::validation(row, "missing source label"));
            }

            let obs = Observation::new(
                row,
                species,
                source,
                cell(treatment_idx),
                n_successes,
                n_trials,
            )?;
            table.observations.push(obs);
            table.rows.push(row);
        }

        if table.observations.is_empty() {
            return Err(GlmmError::EmptyData(
                "no usable observations in input table".to_string(),
            ));
        }
        Ok(table)
    }

    /// Drop rows whose treatment is listed, recording each as an exclusion.
    pub fn exclude_treatments(&self, treatments: &[String]) -> Self {
        let mut kept = Self {
            observations: Vec::new(),
            rows: Vec::new(),
            exclusions: self.exclusions.clone(),
        };
        for (obs, &row) in self.observations.iter().zip(&self.rows) {
            if treatments.iter().any(|t| t == &obs.treatment) {
                kept.exclusions.push(Exclusion {
                    row,
                    reason: format!("treatment '{}' excluded from modelling", obs.treatment),
                });
            } else {
                kept.observations.push(obs.clone());
                kept.rows.push(row);
            }
        }
        kept.exclusions.sort_by_key(|e| e.row);
        kept
    }

    /// Observations in load order.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Rows left out, in row order.
    pub fn exclusions(&self) -> &[Exclusion] {
        &self.exclusions
    }

    /// Number of kept observations.
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    /// Species factor; levels in first-appearance order unless `order` is given.
    pub fn species_factor(&self, name: &str, order: Option<&[String]>) -> Result<Factor> {
        let values: Vec<&str> = self.iter().map(|o| o.species.as_str()).collect();
        match order {
            Some(order) => Factor::with_order(name, &values, order),
            None => Ok(Factor::from_values(name, &values)),
        }
    }

    /// Source factor in first-appearance order.
    pub fn source_factor(&self, name: &str) -> Factor {
        let values: Vec<&str> = self.iter().map(|o| o.source.as_str()).collect();
        Factor::from_values(name, &values)
    }
}
