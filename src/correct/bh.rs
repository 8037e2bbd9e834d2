//! Benjamini-Hochberg false discovery rate correction.

use serde::{Deserialize, Serialize};

/// Result of BH correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BhCorrected {
    /// Test identifiers in original order.
    pub ids: Vec<String>,
    /// Original p-values; `None` for tests that could not be computed.
    pub p_values: Vec<Option<f64>>,
    /// Adjusted p-values; `None` wherever the raw p-value is missing.
    pub q_values: Vec<Option<f64>>,
    /// Number of tests in the family (missing p-values excluded).
    pub n_tests: usize,
}

impl BhCorrected {
    /// Get the adjusted p-value for a specific test.
    pub fn get_qvalue(&self, id: &str) -> Option<f64> {
        let idx = self.ids.iter().position(|f| f == id)?;
        self.q_values.get(idx).copied().flatten()
    }

    /// Count results with adjusted p-value at or below `q`.
    pub fn n_significant(&self, q: f64) -> usize {
        self.significant_indices(q).len()
    }

    /// Indices of results with adjusted p-value at or below `q`.
    pub fn significant_indices(&self, q: f64) -> Vec<usize> {
        self.q_values
            .iter()
            .enumerate()
            .filter(|(_, v)| matches!(v, Some(v) if *v <= q))
            .map(|(i, _)| i)
            .collect()
    }
}

/// BH-adjust a complete vector of p-values.
///
/// Sort ascending, scale by `n / rank`, then take the running minimum from
/// the largest rank down and clip at 1:
/// q[i] = min(p[i] * n / rank[i], q[i+1])
pub fn adjust_bh(p_values: &[f64]) -> Vec<f64> {
    let n = p_values.len();
    if n == 0 {
        return Vec::new();
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let mut q_sorted = vec![0.0; n];
    let n_f64 = n as f64;

    // Start from largest p-value
    q_sorted[n - 1] = p_values[indices[n - 1]].min(1.0);

    for i in (0..n - 1).rev() {
        let rank = i + 1;
        let adjusted = p_values[indices[i]] * n_f64 / rank as f64;
        q_sorted[i] = adjusted.min(q_sorted[i + 1]).min(1.0);
    }

    let mut q_values = vec![0.0; n];
    for (i, &orig_idx) in indices.iter().enumerate() {
        q_values[orig_idx] = q_sorted[i];
    }
    q_values
}

/// Apply BH correction over the tests that have a p-value.
///
/// Missing (or NaN) p-values are left out of the family and keep a missing
/// adjusted value.
pub fn correct_bh(p_values: &[Option<f64>], ids: &[String]) -> BhCorrected {
    let present: Vec<usize> = p_values
        .iter()
        .enumerate()
        .filter(|(_, p)| matches!(p, Some(v) if !v.is_nan()))
        .map(|(i, _)| i)
        .collect();
    let family: Vec<f64> = present.iter().filter_map(|&i| p_values[i]).collect();
    let adjusted = adjust_bh(&family);

    let mut q_values = vec![None; p_values.len()];
    for (&i, q) in present.iter().zip(adjusted) {
        q_values[i] = Some(q);
    }

    BhCorrected {
        ids: ids.to_vec(),
        p_values: p_values.to_vec(),
        q_values,
        n_tests: present.len(),
    }
}
