//! Descriptive summaries of egg masses per species and per species x source.

use crate::data::ObservationTable;
use crate::error::Result;
use crate::report::tables::tsv_writer;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// Summary of the masses in one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub species: String,
    /// `None` for a species-level summary pooled over sources.
    pub source: Option<String>,
    /// Number of egg masses.
    pub n_masses: usize,
    pub total_eggs: u64,
    pub total_emerged: u64,
    /// Total emerged / total eggs.
    pub pooled_proportion: f64,
    /// Mean of per-mass proportions.
    pub mean_proportion: f64,
    /// Sample standard deviation of per-mass proportions (0 for a single mass).
    pub sd_proportion: f64,
    pub median_proportion: f64,
}

/// Summaries at both levels, in first-appearance order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupProfile {
    pub by_species: Vec<GroupSummary>,
    pub by_species_source: Vec<GroupSummary>,
}

impl GroupProfile {
    /// Get the pooled summary for a species.
    pub fn species(&self, species: &str) -> Option<&GroupSummary> {
        self.by_species.iter().find(|g| g.species == species)
    }

    /// Write both tables to one TSV; `source` is `NA` on species rows.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = tsv_writer(File::create(path)?);
        writer.write_record([
            "species",
            "source",
            "n_masses",
            "total_eggs",
            "total_emerged",
            "pooled_proportion",
            "mean_proportion",
            "sd_proportion",
            "median_proportion",
        ])?;
        for g in self.by_species.iter().chain(&self.by_species_source) {
            writer.write_record([
                g.species.clone(),
                g.source.clone().unwrap_or_else(|| "NA".to_string()),
                g.n_masses.to_string(),
                g.total_eggs.to_string(),
                g.total_emerged.to_string(),
                format!("{:.4}", g.pooled_proportion),
                format!("{:.4}", g.mean_proportion),
                format!("{:.4}", g.sd_proportion),
                format!("{:.4}", g.median_proportion),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl std::fmt::Display for GroupProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Group Summary")?;
        writeln!(f, "  {:<20} {:>7} {:>8} {:>8} {:>8}", "species", "masses", "eggs", "pooled", "mean")?;
        for g in &self.by_species {
            writeln!(
                f,
                "  {:<20} {:>7} {:>8} {:>8.3} {:>8.3}",
                g.species, g.n_masses, g.total_eggs, g.pooled_proportion, g.mean_proportion
            )?;
        }
        Ok(())
    }
}

fn summarize(species: &str, source: Option<&str>, masses: &[(u64, u64)]) -> GroupSummary {
    let n = masses.len();
    let total_eggs: u64 = masses.iter().map(|m| m.1).sum();
    let total_emerged: u64 = masses.iter().map(|m| m.0).sum();
    let mut props: Vec<f64> = masses.iter().map(|&(s, t)| s as f64 / t as f64).collect();

    let mean = props.iter().sum::<f64>() / n as f64;
    let sd = if n > 1 {
        (props.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
    } else {
        0.0
    };
    props.sort_by(|a, b| a.total_cmp(b));
    let median = if n % 2 == 1 {
        props[n / 2]
    } else {
        0.5 * (props[n / 2 - 1] + props[n / 2])
    };

    GroupSummary {
        species: species.to_string(),
        source: source.map(str::to_string),
        n_masses: n,
        total_eggs,
        total_emerged,
        pooled_proportion: total_emerged as f64 / total_eggs as f64,
        mean_proportion: mean,
        sd_proportion: sd,
        median_proportion: median,
    }
}

/// Summarise a table per species and per species x source.
pub fn profile_groups(table: &ObservationTable) -> GroupProfile {
    let mut species_keys: Vec<&str> = Vec::new();
    let mut species_rows: Vec<Vec<(u64, u64)>> = Vec::new();
    let mut cell_keys: Vec<(&str, &str)> = Vec::new();
    let mut cell_rows: Vec<Vec<(u64, u64)>> = Vec::new();

    for obs in table.iter() {
        let counts = (obs.n_successes, obs.n_trials);
        match species_keys.iter().position(|s| *s == obs.species) {
            Some(i) => species_rows[i].push(counts),
            None => {
                species_keys.push(&obs.species);
                species_rows.push(vec![counts]);
            }
        }
        let key = (obs.species.as_str(), obs.source.as_str());
        match cell_keys.iter().position(|k| *k == key) {
            Some(i) => cell_rows[i].push(counts),
            None => {
                cell_keys.push(key);
                cell_rows.push(vec![counts]);
            }
        }
    }

    GroupProfile {
        by_species: species_keys
            .iter()
            .zip(&species_rows)
            .map(|(&s, rows)| summarize(s, None, rows))
            .collect(),
        by_species_source: cell_keys
            .iter()
            .zip(&cell_rows)
            .map(|(&(s, src), rows)| summarize(s, Some(src), rows))
            .collect(),
    }
}
