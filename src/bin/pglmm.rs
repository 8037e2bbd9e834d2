//! pglmm - egg-mass parasitism analysis with a binomial GLMM
//!
//! Command-line interface for fitting, testing and reporting species
//! differences in parasitism rates.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use parasitism_glmm::data::ObservationTable;
use parasitism_glmm::error::Result;
use parasitism_glmm::pipeline::{run_analysis, AnalysisConfig};
use parasitism_glmm::profile::profile_groups;
use parasitism_glmm::simulate::{simulate, SimulationConfig};
use parasitism_glmm::test::OmnibusMethod;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// CLI-friendly omnibus method
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliOmnibus {
    /// Likelihood ratio against the intercept-only model
    Lrt,
    /// Wald test of equal level means
    Wald,
}

impl From<CliOmnibus> for OmnibusMethod {
    fn from(method: CliOmnibus) -> Self {
        match method {
            CliOmnibus::Lrt => OmnibusMethod::LikelihoodRatio,
            CliOmnibus::Wald => OmnibusMethod::Wald,
        }
    }
}

/// Built-in simulation scenarios
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliScenario {
    /// Three species at 0.9 / 0.5 / 0.1
    ThreeSpecies,
    /// One species never parasitised
    Separated,
}

/// Output format for printed summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Binomial GLMM analysis of egg-mass parasitism
#[derive(Parser)]
#[command(name = "pglmm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Number of threads for per-source quadrature
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the model and write contrast, level and JSON reports
    Run {
        /// Input table (CSV, or TSV for .tsv/.txt)
        #[arg(short, long)]
        input: PathBuf,

        /// Analysis configuration YAML
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Override the omnibus test
        #[arg(long)]
        omnibus: Option<CliOmnibus>,

        /// Override the number of quadrature points (1 = Laplace)
        #[arg(long)]
        n_agq: Option<usize>,

        /// Comma-separated species order
        #[arg(long)]
        level_order: Option<String>,
    },

    /// Descriptive per-species and per-source summaries
    Summarize {
        /// Input table (CSV, or TSV for .tsv/.txt)
        #[arg(short, long)]
        input: PathBuf,

        /// Analysis configuration YAML (for column names and exclusions)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the summary TSV here instead of printing
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Generate a synthetic dataset
    Simulate {
        /// Output CSV path
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, value_enum, default_value = "three-species")]
        scenario: CliScenario,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Number of sources
        #[arg(long, default_value = "2")]
        sources: usize,

        /// Masses per species per source
        #[arg(long, default_value = "20")]
        masses: usize,

        /// Control masses per species per source
        #[arg(long, default_value = "0")]
        controls: usize,
    },

    /// Write an example dataset and configuration, then analyse them
    Example {
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .ok();
    }

    let result = match cli.command {
        Commands::Run {
            input,
            config,
            output,
            omnibus,
            n_agq,
            level_order,
        } => cmd_run(
            &input,
            config.as_deref(),
            &output,
            omnibus,
            n_agq,
            level_order.as_deref(),
        ),

        Commands::Summarize {
            input,
            config,
            output,
            format,
        } => cmd_summarize(&input, config.as_deref(), output.as_deref(), format),

        Commands::Simulate {
            output,
            scenario,
            seed,
            sources,
            masses,
            controls,
        } => cmd_simulate(&output, scenario, seed, sources, masses, controls),

        Commands::Example { output } => cmd_example(&output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    match path {
        Some(p) => AnalysisConfig::from_file(p),
        None => Ok(AnalysisConfig::default()),
    }
}

fn load_table(input: &Path, config: &AnalysisConfig) -> Result<ObservationTable> {
    eprintln!("Loading observations...");
    let table = ObservationTable::from_path(input, &config.column_map()?)?;
    eprintln!(
        "Loaded {} egg masses ({} rows excluded for missing counts)",
        table.len(),
        table.exclusions().len()
    );
    Ok(table)
}

fn cmd_run(
    input: &Path,
    config_path: Option<&Path>,
    output: &Path,
    omnibus: Option<CliOmnibus>,
    n_agq: Option<usize>,
    level_order: Option<&str>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(method) = omnibus {
        config.omnibus = method.into();
    }
    if let Some(n) = n_agq {
        config.glmm.n_agq = n;
    }
    if let Some(order) = level_order {
        config.level_order = Some(order.split(',').map(|s| s.trim().to_string()).collect());
    }

    let table = load_table(input, &config)?;

    eprintln!("Fitting {}...", config.formula);
    let report = run_analysis(&table, &config)?;

    report.write_outputs(output)?;
    eprintln!("Results written to: {}", output.display());
    println!("{}", report);
    Ok(())
}

fn cmd_summarize(
    input: &Path,
    config_path: Option<&Path>,
    output: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let config = load_config(config_path)?;
    let table = load_table(input, &config)?.exclude_treatments(&config.exclude_treatments);
    let profile = profile_groups(&table);

    if let Some(path) = output {
        profile.to_tsv(path)?;
        eprintln!("Summary written to: {}", path.display());
        return Ok(());
    }
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&profile)?),
        OutputFormat::Text => print!("{}", profile),
    }
    Ok(())
}

fn cmd_simulate(
    output: &Path,
    scenario: CliScenario,
    seed: u64,
    sources: usize,
    masses: usize,
    controls: usize,
) -> Result<()> {
    let base = match scenario {
        CliScenario::ThreeSpecies => SimulationConfig::three_species(),
        CliScenario::Separated => SimulationConfig::separated(),
    };
    let config = base
        .with_sources(sources, masses)
        .with_controls(controls)
        .with_seed(seed);

    let data = simulate(&config)?;
    data.write_csv(output)?;
    eprintln!(
        "Wrote {} simulated egg masses to: {}",
        data.masses.len(),
        output.display()
    );
    Ok(())
}

fn cmd_example(output: &Path) -> Result<()> {
    std::fs::create_dir_all(output)?;

    let data = simulate(&SimulationConfig::three_species().with_controls(2))?;
    let data_path = output.join("masses.csv");
    data.write_csv(&data_path)?;
    data.write_config(output.join("simulation.yaml"))?;

    let config = AnalysisConfig::default();
    std::fs::write(output.join("analysis.yaml"), config.to_yaml()?)?;
    eprintln!("Example data and configuration written to: {}", output.display());

    let table = load_table(&data_path, &config)?;
    let report = run_analysis(&table, &config)?;
    report.write_outputs(output.join("results"))?;
    println!("{}", report);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_summarize_format() {
        let cli = Cli::try_parse_from(["pglmm", "summarize", "-i", "masses.csv", "-f", "json"]).unwrap();
        match cli.command {
            Commands::Summarize { format, .. } => assert_eq!(format, OutputFormat::Json),
            _ => panic!("expected summarize"),
        }

        let cli = Cli::try_parse_from(["pglmm", "summarize", "-i", "masses.csv"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Summarize {
                format: OutputFormat::Text,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_format_rejected() {
        for bad in ["yaml", "jsno"] {
            let result = Cli::try_parse_from(["pglmm", "summarize", "-i", "masses.csv", "-f", bad]);
            assert!(result.is_err(), "format '{}' accepted", bad);
        }
    }
}
