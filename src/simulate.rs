//! Synthetic egg-mass data with known parasitism rates.
//!
//! Each source gets a random intercept drawn from `N(0, source_sd²)` on the
//! logit scale; each mass draws its egg count from `1 + Poisson(eggs_mean - 1)`
//! and its emergences from `Binomial(eggs, p)`. Emergences are split into
//! males and females so the written file has the same shape as field data.

use crate::data::{Observation, ObservationTable};
use crate::error::{GlmmError, Result};
use crate::model::link::{inv_logit, logit};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Binomial, Distribution, Normal, Poisson};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// True parasitism probability for one species.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesRate {
    pub species: String,
    pub probability: f64,
}

impl SpeciesRate {
    pub fn new(species: &str, probability: f64) -> Self {
        Self {
            species: species.to_string(),
            probability,
        }
    }
}

/// Configuration for synthetic data generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Species and their true probabilities.
    pub species: Vec<SpeciesRate>,
    /// Number of sources (experiments or batches).
    pub n_sources: usize,
    /// Egg masses per species per source.
    pub masses_per_source: usize,
    /// Mean eggs per mass.
    pub eggs_mean: f64,
    /// Standard deviation of the source intercepts (logit scale).
    pub source_sd: f64,
    /// Treatment label of the modelled masses.
    pub treatment: String,
    /// Extra "Control" masses per species per source.
    pub control_masses: usize,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            species: vec![
                SpeciesRate::new("A", 0.9),
                SpeciesRate::new("B", 0.5),
                SpeciesRate::new("C", 0.1),
            ],
            n_sources: 2,
            masses_per_source: 20,
            eggs_mean: 25.0,
            source_sd: 0.3,
            treatment: "Exposed".to_string(),
            control_masses: 0,
            seed: 42,
        }
    }
}

impl SimulationConfig {
    /// Three species at 0.9 / 0.5 / 0.1, two sources, 20 masses each.
    pub fn three_species() -> Self {
        Self::default()
    }

    /// Two species where the second is never parasitised.
    pub fn separated() -> Self {
        Self::default().with_species(vec![
            SpeciesRate::new("A", 0.6),
            SpeciesRate::new("Z", 0.0),
        ])
    }

    pub fn with_species(mut self, species: Vec<SpeciesRate>) -> Self {
        self.species = species;
        self
    }

    pub fn with_sources(mut self, n_sources: usize, masses_per_source: usize) -> Self {
        self.n_sources = n_sources;
        self.masses_per_source = masses_per_source;
        self
    }

    pub fn with_source_sd(mut self, sd: f64) -> Self {
        self.source_sd = sd.max(0.0);
        self
    }

    pub fn with_controls(mut self, control_masses: usize) -> Self {
        self.control_masses = control_masses;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.species.is_empty() || self.n_sources == 0 || self.masses_per_source == 0 {
            return Err(GlmmError::InvalidParameter(
                "simulation needs at least one species, source and mass".to_string(),
            ));
        }
        if let Some(bad) = self
            .species
            .iter()
            .find(|s| !(0.0..=1.0).contains(&s.probability))
        {
            return Err(GlmmError::InvalidParameter(format!(
                "probability for '{}' must be in [0, 1], got {}",
                bad.species, bad.probability
            )));
        }
        if !(self.eggs_mean >= 1.0 && self.eggs_mean.is_finite()) {
            return Err(GlmmError::InvalidParameter(format!(
                "eggs_mean must be at least 1, got {}",
                self.eggs_mean
            )));
        }
        Ok(())
    }
}

/// One simulated mass, including the male/female split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedMass {
    pub species: String,
    pub source: String,
    pub treatment: String,
    pub eggs: u64,
    pub males: u64,
    pub females: u64,
}

/// Result of a simulation.
#[derive(Debug, Clone)]
pub struct SimulatedData {
    pub masses: Vec<SimulatedMass>,
    /// Realised source intercepts, in source order.
    pub source_effects: Vec<f64>,
    pub config: SimulationConfig,
}

impl SimulatedData {
    /// Convert to a validated observation table (controls included).
    pub fn to_table(&self) -> Result<ObservationTable> {
        let observations = self
            .masses
            .iter()
            .enumerate()
            .map(|(i, m)| {
                Observation::new(
                    i + 1,
                    &m.species,
                    &m.source,
                    &m.treatment,
                    m.males + m.females,
                    m.eggs,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        ObservationTable::from_observations(observations)
    }

    /// Write the masses as CSV with the default column names.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["species", "source", "treatment", "eggs", "males", "females"])?;
        for m in &self.masses {
            writer.write_record(&[
                m.species.clone(),
                m.source.clone(),
                m.treatment.clone(),
                m.eggs.to_string(),
                m.males.to_string(),
                m.females.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the generating configuration as YAML.
    pub fn write_config<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        file.write_all(serde_yaml::to_string(&self.config)?.as_bytes())?;
        Ok(())
    }
}

fn distribution_error(e: impl std::fmt::Display) -> GlmmError {
    GlmmError::InvalidParameter(format!("invalid simulation distribution: {}", e))
}

/// Generate a dataset from `config`. The same seed always gives the same data.
pub fn simulate(config: &SimulationConfig) -> Result<SimulatedData> {
    config.validate()?;
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

    let source_dist = Normal::new(0.0, config.source_sd).map_err(distribution_error)?;
    let source_effects: Vec<f64> = (0..config.n_sources)
        .map(|_| {
            if config.source_sd > 0.0 {
                source_dist.sample(&mut rng)
            } else {
                0.0
            }
        })
        .collect();

    let extra_eggs = Poisson::new((config.eggs_mean - 1.0).max(1e-9)).map_err(distribution_error)?;
    let per_source = config.masses_per_source + config.control_masses;
    let mut masses = Vec::with_capacity(config.n_sources * config.species.len() * per_source);

    for (s, &effect) in source_effects.iter().enumerate() {
        let source = format!("source{}", s + 1);
        for rate in &config.species {
            // Exact 0 or 1 stay exact so separated species really are separated.
            let p = if rate.probability <= 0.0 || rate.probability >= 1.0 {
                rate.probability
            } else {
                inv_logit(logit(rate.probability) + effect)
            };
            for k in 0..per_source {
                let treatment = if k < config.masses_per_source {
                    config.treatment.clone()
                } else {
                    "Control".to_string()
                };
                let eggs = 1 + extra_eggs.sample(&mut rng) as u64;
                let emerged = Binomial::new(eggs, p)
                    .map_err(distribution_error)?
                    .sample(&mut rng);
                let males = Binomial::new(emerged, 0.5)
                    .map_err(distribution_error)?
                    .sample(&mut rng);
                masses.push(SimulatedMass {
                    species: rate.species.clone(),
                    source: source.clone(),
                    treatment,
                    eggs,
                    males,
                    females: emerged - males,
                });
            }
        }
    }

    Ok(SimulatedData {
        masses,
        source_effects,
        config: config.clone(),
    })
}
