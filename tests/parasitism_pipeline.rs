//! Integration tests for the end-to-end parasitism analysis.

use parasitism_glmm::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn three_species_table() -> ObservationTable {
    simulate(&SimulationConfig::three_species())
        .unwrap()
        .to_table()
        .unwrap()
}

fn separated_table() -> ObservationTable {
    simulate(&SimulationConfig::separated())
        .unwrap()
        .to_table()
        .unwrap()
}

/// Write a small field-style CSV with a control row and a missing count.
fn create_test_csv() -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(file, "species,source,treatment,eggs,males,females").unwrap();
    let rows = [
        ("A", "exp1", 18, 4, 14),
        ("A", "exp1", 22, 9, 10),
        ("A", "exp2", 20, 6, 11),
        ("A", "exp2", 25, 10, 12),
        ("A", "exp3", 19, 8, 9),
        ("A", "exp3", 21, 7, 12),
        ("B", "exp1", 20, 3, 5),
        ("B", "exp1", 24, 6, 6),
        ("B", "exp2", 18, 4, 4),
        ("B", "exp2", 22, 5, 7),
        ("B", "exp3", 20, 2, 6),
        ("B", "exp3", 23, 5, 5),
        ("C", "exp1", 21, 1, 1),
        ("C", "exp1", 19, 0, 2),
        ("C", "exp2", 24, 1, 2),
        ("C", "exp2", 20, 0, 1),
        ("C", "exp3", 22, 2, 1),
        ("C", "exp3", 18, 1, 0),
    ];
    for (sp, src, eggs, m, f) in rows {
        writeln!(file, "{},{},Exposed,{},{},{}", sp, src, eggs, m, f).unwrap();
    }
    writeln!(file, "A,exp1,Control,20,0,0").unwrap();
    writeln!(file, "B,exp2,Exposed,NA,3,4").unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_three_species_differ() {
    let report = run_analysis(&three_species_table(), &AnalysisConfig::default()).unwrap();

    assert!(report.omnibus.p_value < 0.001, "omnibus p = {}", report.omnibus.p_value);
    assert_eq!(report.omnibus.df, 2);

    let ac = report.contrasts.get("A", "C").unwrap();
    assert!(ac.significant);
    assert!(ac.p_adjusted.unwrap() <= 0.05);
    assert!(ac.estimate > 0.0);

    // Probabilities near the generating rates
    let probs: Vec<f64> = report.probabilities.iter().map(|p| p.probability).collect();
    assert!((probs[0] - 0.9).abs() < 0.1);
    assert!((probs[1] - 0.5).abs() < 0.15);
    assert!((probs[2] - 0.1).abs() < 0.1);
}

#[test]
fn test_wald_omnibus_agrees() {
    let config = AnalysisConfig::default().with_omnibus(OmnibusMethod::Wald);
    let report = run_analysis(&three_species_table(), &config).unwrap();
    assert_eq!(report.omnibus.method, OmnibusMethod::Wald);
    assert!(report.omnibus.p_value < 0.001);
}

#[test]
fn test_contrast_count_and_pairing() {
    let rates = ["A", "B", "C", "D", "E"]
        .iter()
        .zip([0.8, 0.6, 0.5, 0.3, 0.15])
        .map(|(s, p)| SpeciesRate::new(s, p))
        .collect();
    let table = simulate(&SimulationConfig::default().with_species(rates).with_seed(11))
        .unwrap()
        .to_table()
        .unwrap();
    let report = run_analysis(&table, &AnalysisConfig::default()).unwrap();

    let k = report.marginal_means.len();
    assert_eq!(k, 5);
    assert_eq!(report.contrasts.len(), k * (k - 1) / 2);

    let levels = report.marginal_means.levels();
    let mut pairs = std::collections::HashSet::new();
    for c in &report.contrasts.contrasts {
        let a = levels.iter().position(|l| *l == c.level_a).unwrap();
        let b = levels.iter().position(|l| *l == c.level_b).unwrap();
        assert!(a < b);
        assert!(pairs.insert((a, b)));
    }
}

#[test]
fn test_bh_monotone_in_raw_p() {
    let rates = ["A", "B", "C", "D"]
        .iter()
        .zip([0.7, 0.55, 0.5, 0.2])
        .map(|(s, p)| SpeciesRate::new(s, p))
        .collect();
    let table = simulate(&SimulationConfig::default().with_species(rates).with_seed(5))
        .unwrap()
        .to_table()
        .unwrap();
    let report = run_analysis(&table, &AnalysisConfig::default()).unwrap();

    let mut pairs: Vec<(f64, f64)> = report
        .contrasts
        .contrasts
        .iter()
        .map(|c| (c.p_value.unwrap(), c.p_adjusted.unwrap()))
        .collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    for w in pairs.windows(2) {
        assert!(w[1].1 >= w[0].1 - 1e-15);
    }
    for (p, q) in &pairs {
        assert!(q >= p && *q <= 1.0);
    }
}

#[test]
fn test_probability_bounds_ordered() {
    let report = run_analysis(&three_species_table(), &AnalysisConfig::default()).unwrap();
    for p in &report.probabilities {
        if p.not_estimable {
            continue;
        }
        let (lo, hi) = (p.lower.unwrap(), p.upper.unwrap());
        assert!(0.0 <= lo && lo <= p.probability && p.probability <= hi && hi <= 1.0);
    }
}

#[test]
fn test_separated_species() {
    let report = run_analysis(&separated_table(), &AnalysisConfig::default()).unwrap();

    assert!(report.model.warnings.contains(&FitWarning::Separation {
        level: "Z".to_string(),
        direction: Separation::AllFailures,
    }));

    let z = report.probabilities.iter().find(|p| p.level == "Z").unwrap();
    assert!(z.probability < 1e-4, "p = {}", z.probability);
    assert!(z.not_estimable);
    assert!(z.lower.is_none() && z.upper.is_none());

    let a = report.probabilities.iter().find(|p| p.level == "A").unwrap();
    assert!(!a.not_estimable);
}

#[test]
fn test_always_parasitised_species() {
    let config = SimulationConfig::default()
        .with_species(vec![SpeciesRate::new("A", 0.6), SpeciesRate::new("Z", 1.0)])
        .with_seed(3);
    let table = simulate(&config).unwrap().to_table().unwrap();
    let report = run_analysis(&table, &AnalysisConfig::default()).unwrap();

    assert!(report.model.warnings.contains(&FitWarning::Separation {
        level: "Z".to_string(),
        direction: Separation::AllSuccesses,
    }));

    let z = report.probabilities.iter().find(|p| p.level == "Z").unwrap();
    assert!(z.probability > 1.0 - 1e-4, "p = {}", z.probability);
    assert!(z.not_estimable);
    assert!(z.lower.is_none() && z.upper.is_none());

    let a = report.probabilities.iter().find(|p| p.level == "A").unwrap();
    assert!(!a.not_estimable);
}

#[test]
fn test_runs_are_identical() {
    let table = three_species_table();
    let config = AnalysisConfig::default();
    let first = run_analysis(&table, &config).unwrap().to_json().unwrap();
    let second = run_analysis(&table, &config).unwrap().to_json().unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_parameterizations_agree() {
    let table = three_species_table();
    let reference = run_analysis(&table, &AnalysisConfig::default()).unwrap();
    let cell = run_analysis(
        &table,
        &AnalysisConfig::default().with_parameterization(Parameterization::CellMeans),
    )
    .unwrap();

    assert_eq!(reference.model.coefficient_names[0], "(Intercept)");
    assert_eq!(cell.model.coefficient_names[0], "speciesA");
    for (r, c) in reference
        .marginal_means
        .means
        .iter()
        .zip(&cell.marginal_means.means)
    {
        approx::assert_relative_eq!(r.estimate, c.estimate, epsilon = 1e-4);
    }
}

#[test]
fn test_csv_file_end_to_end() {
    let file = create_test_csv();
    let config = AnalysisConfig::default();
    let report = run_analysis_file(file.path(), &config).unwrap();

    assert_eq!(report.n_observations, 18);
    assert_eq!(report.exclusions.len(), 2);
    assert!(report.exclusions.iter().any(|e| e.reason.contains("Control")));
    assert_eq!(report.model.n_groups, 3);
    assert_eq!(report.contrasts.len(), 3);

    let dir = tempfile::tempdir().unwrap();
    report.write_outputs(dir.path()).unwrap();
    let contrasts = std::fs::read_to_string(dir.path().join("contrasts.tsv")).unwrap();
    assert_eq!(contrasts.lines().count(), 4);
    assert!(contrasts.starts_with("level_a\tlevel_b\testimate"));
}

#[test]
fn test_invalid_counts_rejected() {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(file, "species,source,treatment,eggs,males,females").unwrap();
    writeln!(file, "A,exp1,Exposed,10,6,6").unwrap();
    file.flush().unwrap();

    let result = run_analysis_file(file.path(), &AnalysisConfig::default());
    assert!(matches!(result, Err(GlmmError::Validation { row: 1, .. })));
}

#[test]
fn test_link_round_trip() {
    let link = LogitLink;
    for i in 1..100 {
        let p = i as f64 / 100.0;
        approx::assert_relative_eq!(link.inv_link(link.link(p)), p, max_relative = 1e-12);
    }
}
