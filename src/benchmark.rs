//! Benchmarking and experimentation module for EVRP.
//!
//! Runs seeded repetitions of the configured solver on each instance,
//! collects per-run results, aggregates statistics per algorithm and
//! instance, and exports CSV files and a text report.

use crate::config::SolverConfig;
use crate::instance::EvrpInstance;
use crate::preprocessing::Preprocessed;
use crate::solver::{solve, SolveOutcome};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

/// Result of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmResult {
    /// Algorithm name
    pub algorithm: String,
    /// Instance name
    pub instance: String,
    pub num_customers: usize,
    pub seed: u64,
    /// Cost after construction
    pub construction_cost: f64,
    /// Distance plus penalties
    pub upper_cost: f64,
    /// Charging-aware cost
    pub lower_cost: f64,
    pub num_routes: usize,
    /// Whether solution is feasible
    pub feasible: bool,
    /// Computation time in seconds
    pub time: f64,
    /// Gap of the lower cost to the best known value, in percent
    pub gap_to_best: Option<f64>,
}

/// Aggregated statistics for an algorithm on one instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmStatistics {
    pub algorithm: String,
    pub instance: String,
    pub num_runs: usize,
    pub num_feasible: usize,
    /// Statistics over the lower costs of feasible runs
    pub avg_cost: f64,
    pub best_cost: f64,
    pub worst_cost: f64,
    pub std_cost: f64,
    pub avg_time: f64,
    pub total_time: f64,
    pub avg_gap: Option<f64>,
}

/// Benchmark configuration
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Number of seeded runs per instance
    pub num_runs: usize,
    /// Seed of the first run; run `k` uses `base_seed + k`
    pub base_seed: u64,
    /// Run the seeds in parallel
    pub parallel: bool,
    pub show_progress: bool,
    /// Output directory
    pub output_dir: String,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        BenchmarkConfig {
            num_runs: 5,
            base_seed: 0,
            parallel: true,
            show_progress: true,
            output_dir: "results".to_string(),
        }
    }
}

/// Benchmarking engine
pub struct Benchmark {
    config: BenchmarkConfig,
    solver: SolverConfig,
    results: Vec<AlgorithmResult>,
    best_known: HashMap<String, f64>,
}

impl Benchmark {
    pub fn new(config: BenchmarkConfig, solver: SolverConfig) -> Self {
        Benchmark {
            config,
            solver,
            results: Vec::new(),
            best_known: HashMap::new(),
        }
    }

    /// Set best known solution for an instance
    pub fn set_best_known(&mut self, instance_name: &str, cost: f64) {
        self.best_known.insert(instance_name.to_string(), cost);
    }

    fn progress_bar(&self, len: usize, name: &str) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::with_template("{msg:>12} [{bar:40}] {pos}/{len} ({elapsed})") {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(name.to_string());
        bar
    }

    /// Run every seed on an instance and record the outcomes
    pub fn run_instance(&mut self, instance: &EvrpInstance) -> Result<()> {
        log::info!("Running benchmark on instance: {}", instance.name);
        if let Some(best) = instance.optimal_value {
            self.best_known.entry(instance.name.clone()).or_insert(best);
        }

        let prep = Preprocessed::new(instance.clone(), self.solver.preprocess.clone());
        let seeds: Vec<u64> = (0..self.config.num_runs as u64).map(|k| self.config.base_seed + k).collect();
        let bar = self.progress_bar(seeds.len(), &instance.name);
        let solver = &self.solver;

        let run = |seed: u64| -> Result<SolveOutcome> {
            let outcome = solve(&prep, solver, seed).with_context(|| format!("{} seed {}", instance.name, seed));
            bar.inc(1);
            outcome
        };
        let outcomes: Vec<SolveOutcome> = if self.config.parallel {
            seeds.into_par_iter().map(run).collect::<Result<_>>()?
        } else {
            seeds.into_iter().map(run).collect::<Result<_>>()?
        };
        bar.finish_and_clear();

        for outcome in &outcomes {
            self.record_result(&prep, outcome);
        }
        Ok(())
    }

    /// Run benchmark on multiple instances
    pub fn run_on_instances(&mut self, instances: &[EvrpInstance]) -> Result<()> {
        for (i, instance) in instances.iter().enumerate() {
            log::info!("[{}/{}] {} (n={})", i + 1, instances.len(), instance.name, instance.num_customers);
            self.run_instance(instance)?;
        }
        Ok(())
    }

    fn record_result(&mut self, prep: &Preprocessed, outcome: &SolveOutcome) {
        let lower_cost = outcome.lower_cost();
        let mut result = AlgorithmResult {
            algorithm: outcome.algorithm.clone(),
            instance: outcome.instance.clone(),
            num_customers: prep.num_customers(),
            seed: outcome.seed,
            construction_cost: outcome.construction_cost,
            upper_cost: outcome.upper_cost(),
            lower_cost,
            num_routes: outcome.num_routes(),
            feasible: outcome.is_feasible(),
            time: outcome.time,
            gap_to_best: None,
        };

        if let Some(&best) = self.best_known.get(&outcome.instance) {
            result.gap_to_best = Some((lower_cost - best) / best * 100.0);
        }

        self.results.push(result);
    }

    /// Compute statistics for each (algorithm, instance) pair
    pub fn compute_statistics(&self) -> Vec<AlgorithmStatistics> {
        let mut groups: HashMap<(String, String), Vec<&AlgorithmResult>> = HashMap::new();
        for result in &self.results {
            groups
                .entry((result.algorithm.clone(), result.instance.clone()))
                .or_default()
                .push(result);
        }

        let mut statistics = Vec::new();
        for ((algorithm, instance), results) in groups {
            let feasible: Vec<&AlgorithmResult> = results.iter().copied().filter(|r| r.feasible).collect();
            if feasible.is_empty() {
                continue;
            }

            let costs: Vec<f64> = feasible.iter().map(|r| r.lower_cost).collect();
            let times: Vec<f64> = feasible.iter().map(|r| r.time).collect();
            let gaps: Vec<f64> = feasible.iter().filter_map(|r| r.gap_to_best).collect();

            let std_cost = if costs.len() > 1 { costs.iter().std_dev() } else { 0.0 };
            statistics.push(AlgorithmStatistics {
                algorithm,
                instance,
                num_runs: results.len(),
                num_feasible: feasible.len(),
                avg_cost: costs.iter().mean(),
                best_cost: Statistics::min(costs.iter()),
                worst_cost: Statistics::max(costs.iter()),
                std_cost,
                avg_time: times.iter().mean(),
                total_time: times.iter().sum(),
                avg_gap: (!gaps.is_empty()).then(|| gaps.iter().mean()),
            });
        }

        statistics.sort_by(|a, b| a.instance.cmp(&b.instance).then(a.avg_cost.total_cmp(&b.avg_cost)));
        statistics
    }

    /// Export results to CSV
    pub fn export_to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref()).with_context(|| format!("Failed to create {:?}", path.as_ref()))?;
        let mut writer = csv::Writer::from_writer(file);
        for result in &self.results {
            writer.serialize(result)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Export statistics to CSV
    pub fn export_statistics_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref()).with_context(|| format!("Failed to create {:?}", path.as_ref()))?;
        let mut writer = csv::Writer::from_writer(file);
        for stat in self.compute_statistics() {
            writer.serialize(stat)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Generate summary report
    pub fn generate_report(&self) -> String {
        let mut report = String::new();

        report.push_str("========================================\n");
        report.push_str("         EVRP Benchmark Report\n");
        report.push_str("========================================\n");
        report.push_str(&format!("Generated: {}\n", chrono::Local::now().format("%Y-%m-%d %H:%M:%S")));
        report.push_str(&format!("Runs per instance: {}\n\n", self.config.num_runs));

        let stats = self.compute_statistics();

        report.push_str("Algorithm Performance Summary:\n");
        report.push_str("-".repeat(100).as_str());
        report.push('\n');
        report.push_str(&format!(
            "{:<20} {:<28} {:>9} {:>11} {:>11} {:>9} {:>9} {:>10}\n",
            "Instance", "Algorithm", "Feasible", "Avg Cost", "Best Cost", "Std", "Avg Gap%", "Avg Time"
        ));
        report.push_str("-".repeat(100).as_str());
        report.push('\n');

        for stat in &stats {
            let gap_str = stat.avg_gap.map(|g| format!("{:.2}%", g)).unwrap_or_else(|| "-".to_string());
            report.push_str(&format!(
                "{:<20} {:<28} {:>9} {:>11.2} {:>11.2} {:>9.2} {:>9} {:>10.4}\n",
                stat.instance,
                stat.algorithm,
                format!("{}/{}", stat.num_feasible, stat.num_runs),
                stat.avg_cost,
                stat.best_cost,
                stat.std_cost,
                gap_str,
                stat.avg_time
            ));
        }

        report.push_str("-".repeat(100).as_str());
        report.push('\n');

        report.push_str("\nBest Solutions per Instance:\n");
        let mut instance_best: HashMap<&str, &AlgorithmResult> = HashMap::new();
        for result in self.results.iter().filter(|r| r.feasible) {
            let entry = instance_best.entry(&result.instance).or_insert(result);
            if result.lower_cost < entry.lower_cost {
                *entry = result;
            }
        }
        let mut names: Vec<&str> = instance_best.keys().copied().collect();
        names.sort_unstable();
        for name in names {
            let best = instance_best[name];
            report.push_str(&format!("  {}: {:.2} ({}, seed {})\n", name, best.lower_cost, best.algorithm, best.seed));
        }

        report
    }

    /// Get all results
    pub fn results(&self) -> &[AlgorithmResult] {
        &self.results
    }

    /// Get best known values
    pub fn best_known(&self) -> &HashMap<String, f64> {
        &self.best_known
    }
}

/// Load every `.evrp` instance of a directory, smallest first. Files that
/// fail to parse are skipped with a warning.
pub fn load_instances_from_dir<P: AsRef<Path>>(dir: P) -> Result<Vec<EvrpInstance>> {
    let dir = dir.as_ref();
    let mut instances = Vec::new();

    let entries = std::fs::read_dir(dir).with_context(|| format!("Failed to read directory {:?}", dir))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().map(|e| e == "evrp").unwrap_or(false) {
            match EvrpInstance::from_file(&path) {
                Ok(instance) => instances.push(instance),
                Err(e) => log::warn!("Skipping {:?}: {:#}", path, e),
            }
        }
    }

    instances.sort_by_key(|i| i.num_customers);
    Ok(instances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverKind;
    use crate::instance::fixtures;

    fn quiet(num_runs: usize, parallel: bool) -> BenchmarkConfig {
        BenchmarkConfig { num_runs, parallel, show_progress: false, ..Default::default() }
    }

    fn descent_solver() -> SolverConfig {
        let mut solver = SolverConfig::default();
        solver.driver.kind = DriverKind::Descent;
        solver
    }

    #[test]
    fn test_benchmark_config() {
        let config = BenchmarkConfig::default();
        assert_eq!(config.num_runs, 5);
        assert!(config.parallel);
    }

    #[test]
    fn test_parallel_and_sequential_runs_agree() {
        let instance = fixtures::e_n22_k4();

        let mut parallel = Benchmark::new(quiet(3, true), descent_solver());
        parallel.run_instance(&instance).unwrap();
        let mut sequential = Benchmark::new(quiet(3, false), descent_solver());
        sequential.run_instance(&instance).unwrap();

        assert_eq!(parallel.results().len(), 3);
        for (a, b) in parallel.results().iter().zip(sequential.results()) {
            assert_eq!(a.seed, b.seed);
            assert_eq!(a.upper_cost, b.upper_cost);
            assert_eq!(a.lower_cost, b.lower_cost);
        }
    }

    #[test]
    fn test_statistics_match_the_results() {
        let instance = fixtures::line(6, 10);
        let mut benchmark = Benchmark::new(quiet(4, true), descent_solver());
        benchmark.set_best_known(&instance.name, 12.0);
        benchmark.run_instance(&instance).unwrap();

        let stats = benchmark.compute_statistics();
        assert_eq!(stats.len(), 1);
        let stat = &stats[0];
        let feasible: Vec<f64> = benchmark.results().iter().filter(|r| r.feasible).map(|r| r.lower_cost).collect();
        assert_eq!(stat.num_runs, 4);
        assert_eq!(stat.num_feasible, feasible.len());
        let mean = feasible.iter().sum::<f64>() / feasible.len() as f64;
        assert!((stat.avg_cost - mean).abs() < 1e-9);
        assert!(stat.best_cost <= stat.avg_cost && stat.avg_cost <= stat.worst_cost);
        assert_eq!(stat.num_feasible, 4);
        assert!(stat.best_cost >= 12.0 - 1e-9);
        assert!(stat.avg_gap.is_some());
        assert!(benchmark.results().iter().all(|r| r.gap_to_best.is_some()));
    }

    #[test]
    fn test_report_lists_each_instance() {
        let mut benchmark = Benchmark::new(quiet(2, false), descent_solver());
        benchmark.run_on_instances(&[fixtures::e_n22_k4(), fixtures::line(6, 10)]).unwrap();

        let report = benchmark.generate_report();
        assert!(report.contains("EVRP Benchmark Report"));
        assert!(report.contains("  line: 12.00"));
        assert_eq!(benchmark.results().len(), 4);
    }

    #[test]
    fn test_csv_export() {
        let mut benchmark = Benchmark::new(quiet(2, false), descent_solver());
        benchmark.run_instance(&fixtures::line(6, 10)).unwrap();

        let dir = std::env::temp_dir().join(format!("evrp-bench-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("results.csv");
        benchmark.export_to_csv(&path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<AlgorithmResult> = reader.deserialize().collect::<std::result::Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].seed, 0);
        std::fs::remove_dir_all(&dir).ok();
    }
}
