//! EVRP Solver - Command Line Interface
//!
//! Bilevel local search for the Electric Vehicle Routing Problem.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use evrp_solver::benchmark::{load_instances_from_dir, Benchmark, BenchmarkConfig};
use evrp_solver::config::{ConstructionKind, DriverKind, SolverConfig};
use evrp_solver::instance::EvrpInstance;
use evrp_solver::preprocessing::Preprocessed;
use evrp_solver::solver::solve;

use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "evrp-solver")]
#[command(version = "1.0")]
#[command(about = "A bilevel local-search solver for the Electric Vehicle Routing Problem")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve a single instance
    Solve {
        #[arg(short, long)]
        instance: PathBuf,

        /// JSON solver configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Construction heuristic (overrides the configuration)
        #[arg(long, value_enum)]
        construction: Option<Construction>,

        /// Improvement driver (overrides the configuration)
        #[arg(short, long, value_enum)]
        algorithm: Option<Algorithm>,

        /// Random seed
        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Run the full station enumeration on the final routes
        #[arg(long)]
        polish: bool,

        /// Output solution to file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Run benchmarks on a directory of instances
    Benchmark {
        /// Directory containing instance files
        #[arg(short, long)]
        dir: PathBuf,

        /// Output directory for results
        #[arg(short, long, default_value = "results")]
        output: PathBuf,

        /// JSON solver configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of seeded runs per instance
        #[arg(short, long, default_value = "5")]
        runs: usize,

        /// Seed of the first run
        #[arg(long, default_value = "0")]
        base_seed: u64,

        /// Run the seeds one after another
        #[arg(long)]
        sequential: bool,

        /// Maximum number of customers
        #[arg(long)]
        max_size: Option<usize>,
    },

    /// Analyze an instance
    Analyze {
        /// Path to the instance file
        #[arg(short, long)]
        instance: PathBuf,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum Construction {
    /// Random giant tour + Split
    Random,
    /// Nearest neighbor giant tour + Split
    Nn,
    /// Greedy clustering
    Greedy,
    /// Best of all constructions
    MultiStart,
}

impl From<Construction> for ConstructionKind {
    fn from(c: Construction) -> Self {
        match c {
            Construction::Random => ConstructionKind::Random,
            Construction::Nn => ConstructionKind::NearestNeighbor,
            Construction::Greedy => ConstructionKind::Greedy,
            Construction::MultiStart => ConstructionKind::MultiStart,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum Algorithm {
    /// Construction only
    None,
    /// Descent to a local optimum
    Descent,
    /// Simulated Annealing
    Sa,
    /// Late Acceptance Hill Climbing
    Lahc,
    /// Threshold walk
    Threshold,
    /// Iterated Local Search
    Ils,
    /// Bilevel search on the charging-aware cost
    Bilevel,
}

impl From<Algorithm> for DriverKind {
    fn from(a: Algorithm) -> Self {
        match a {
            Algorithm::None => DriverKind::None,
            Algorithm::Descent => DriverKind::Descent,
            Algorithm::Sa => DriverKind::Annealing,
            Algorithm::Lahc => DriverKind::LateAcceptance,
            Algorithm::Threshold => DriverKind::ThresholdWalk,
            Algorithm::Ils => DriverKind::Ils,
            Algorithm::Bilevel => DriverKind::Bilevel,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Solve { instance, config, construction, algorithm, seed, polish, output, verbose } => {
            let mut solver = load_config(config.as_deref())?;
            if let Some(c) = construction {
                solver.construction = c.into();
            }
            if let Some(a) = algorithm {
                solver.driver.kind = a.into();
            }
            solver.polish |= polish;
            solve_instance(&instance, &solver, seed, output, verbose)
        }

        Commands::Benchmark { dir, output, config, runs, base_seed, sequential, max_size } => {
            let solver = load_config(config.as_deref())?;
            let config = BenchmarkConfig {
                num_runs: runs,
                base_seed,
                parallel: !sequential,
                output_dir: output.to_string_lossy().to_string(),
                ..Default::default()
            };
            run_benchmark(&dir, &output, config, solver, max_size)
        }

        Commands::Analyze { instance } => analyze_instance(&instance),
    }
}

fn load_config(path: Option<&Path>) -> Result<SolverConfig> {
    match path {
        Some(path) => SolverConfig::from_json_file(path),
        None => Ok(SolverConfig::default()),
    }
}

fn solve_instance(path: &Path, config: &SolverConfig, seed: u64, output: Option<PathBuf>, verbose: bool) -> Result<()> {
    println!("Loading instance from {:?}...", path);
    let instance = EvrpInstance::from_file(path)?;

    if verbose {
        println!("{}", instance.statistics());
    }

    let prep = Preprocessed::new(instance, config.preprocess.clone());
    println!("Solving with {:?} + {:?}...", config.construction, config.driver.kind);
    let outcome = solve(&prep, config, seed)?;

    println!("\n========== Results ==========");
    println!("Algorithm: {}", outcome.algorithm);
    println!("Construction cost: {:.2}", outcome.construction_cost);
    println!("Upper cost (distance + penalties): {:.2}", outcome.upper_cost());
    println!("Distance: {:.2}", outcome.individual.distance());
    println!("Lower cost (with charging): {:.2}", outcome.lower_cost());
    println!("Routes: {}", outcome.num_routes());
    println!("Feasible: {}", outcome.is_feasible());
    println!("Time: {:.4}s", outcome.time);
    if let Some(best) = prep.instance.optimal_value {
        println!("Gap to best known: {:.2}%", (outcome.lower_cost() - best) / best * 100.0);
    }

    if verbose {
        println!();
        for (slot, charged) in outcome.charged_routes.iter().enumerate() {
            match charged {
                Some(nodes) => println!("Route {}: {:?}", slot, nodes),
                None => println!("Route {}: {:?} (out of range)", slot, outcome.individual.routes[slot].nodes),
            }
        }
    }

    if let Some(out_path) = output {
        let json = serde_json::to_string_pretty(&outcome)?;
        std::fs::write(&out_path, json).with_context(|| format!("Failed to write {:?}", out_path))?;
        println!("\nSolution saved to {:?}", out_path);
    }
    Ok(())
}

fn run_benchmark(
    dir: &Path,
    output: &Path,
    config: BenchmarkConfig,
    solver: SolverConfig,
    max_size: Option<usize>,
) -> Result<()> {
    println!("Loading instances from {:?}...", dir);

    let mut instances = load_instances_from_dir(dir)?;
    if let Some(max) = max_size {
        instances.retain(|i| i.num_customers <= max);
    }

    println!("Found {} instances", instances.len());
    if instances.is_empty() {
        anyhow::bail!("No instances found in {:?}", dir);
    }

    std::fs::create_dir_all(output).with_context(|| format!("Failed to create {:?}", output))?;

    let mut benchmark = Benchmark::new(config, solver);
    benchmark.run_on_instances(&instances)?;

    let results_path = output.join("results.csv");
    benchmark.export_to_csv(&results_path)?;
    println!("\nResults exported to {:?}", results_path);

    let stats_path = output.join("statistics.csv");
    benchmark.export_statistics_csv(&stats_path)?;
    println!("Statistics exported to {:?}", stats_path);

    let report = benchmark.generate_report();
    println!("\n{}", report);

    let report_path = output.join("report.txt");
    std::fs::write(&report_path, &report).with_context(|| format!("Failed to save {:?}", report_path))?;
    println!("Report saved to {:?}", report_path);
    Ok(())
}

fn analyze_instance(path: &Path) -> Result<()> {
    let instance = EvrpInstance::from_file(path)?;

    println!("========== Instance Analysis ==========\n");
    println!("{}", instance.statistics());

    let prep = Preprocessed::new(instance, Default::default());
    let instance = &prep.instance;
    let range = prep.max_cruise;

    let stranded: Vec<usize> = instance
        .customers()
        .filter(|&c| instance.charging_points().all(|s| instance.distance(c, s) > range / 2.0))
        .collect();
    println!("\nRange Analysis:");
    println!("  Max cruise distance: {:.2}", range);
    println!("  Customers beyond half range of every charging point: {}", stranded.len());

    let depot_trips = instance.customers().filter(|&c| 2.0 * instance.distance(0, c) > range).count();
    println!("  Customers needing a station on a direct depot trip: {}", depot_trips);

    let mut quick = SolverConfig::default();
    quick.driver.kind = DriverKind::Descent;
    let outcome = solve(&prep, &quick, 42)?;

    println!("\nQuick Solution Estimate (multi-start + descent):");
    println!("  Upper cost: {:.2}", outcome.upper_cost());
    println!("  Lower cost: {:.2} (feasible: {})", outcome.lower_cost(), outcome.is_feasible());
    println!("  Routes: {} (announced vehicles: {})", outcome.num_routes(), instance.vehicles);
    Ok(())
}
