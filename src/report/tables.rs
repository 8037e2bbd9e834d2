//! Tab-separated and JSON report writers.

use crate::error::{GlmmError, Result};
use crate::inference::{ContrastSet, MarginalMeans};
use crate::report::backtransform::BackTransformedEstimate;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

fn opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "NA".to_string(),
    }
}

fn opt_sci(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.3e}", v),
        None => "NA".to_string(),
    }
}

/// Tab-separated writer that quotes any field holding a tab, quote or newline.
pub(crate) fn tsv_writer<W: Write>(writer: W) -> csv::Writer<W> {
    csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer)
}

/// Write one row per pairwise contrast.
pub fn write_contrast_table<W: Write>(writer: W, contrasts: &ContrastSet) -> Result<()> {
    let mut writer = tsv_writer(writer);
    writer.write_record([
        "level_a",
        "level_b",
        "estimate",
        "std_error",
        "z",
        "p_value",
        "p_adjusted",
        "odds_ratio",
        "significant",
    ])?;
    for c in &contrasts.contrasts {
        writer.write_record([
            c.level_a.clone(),
            c.level_b.clone(),
            format!("{:.6}", c.estimate),
            opt(c.std_error, 6),
            opt(c.z, 4),
            opt_sci(c.p_value),
            opt_sci(c.p_adjusted),
            format!("{:.6}", c.odds_ratio()),
            c.significant.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write one row per level: link-scale mean with SE and CI, then the probability scale.
pub fn write_level_table<W: Write>(
    writer: W,
    means: &MarginalMeans,
    probabilities: &[BackTransformedEstimate],
) -> Result<()> {
    if means.len() != probabilities.len() {
        return Err(GlmmError::InvalidParameter(format!(
            "{} means but {} back-transformed estimates",
            means.len(),
            probabilities.len()
        )));
    }
    let mut writer = tsv_writer(writer);
    writer.write_record([
        "level",
        "estimate",
        "std_error",
        "lower",
        "upper",
        "probability",
        "prob_lower",
        "prob_upper",
        "not_estimable",
    ])?;
    for (m, p) in means.means.iter().zip(probabilities) {
        writer.write_record([
            m.level.clone(),
            format!("{:.6}", m.estimate),
            opt(m.std_error, 6),
            opt(m.lower, 6),
            opt(m.upper, 6),
            format!("{:.6}", p.probability),
            opt(p.lower, 6),
            opt(p.upper, 6),
            p.not_estimable.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Pretty-printed JSON of any serializable report.
pub fn write_json<W: Write, T: Serialize>(writer: W, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(writer);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Open `path` for writing.
pub fn create<P: AsRef<Path>>(path: P) -> Result<File> {
    Ok(File::create(path)?)
}
