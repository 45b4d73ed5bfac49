//! Solver configuration.
//!
//! Every layer keeps its own parameter struct; [`SolverConfig`] nests them so
//! a whole run can be described by one JSON document. Missing fields take
//! their default values.

use crate::heuristics::charging::FollowerConfig;
use crate::heuristics::construction::{
    ConstructionHeuristic, GreedyClustering, MultiStartConstruction, NearestNeighborSplit, RandomSplit,
};
use crate::heuristics::local_search::LeaderConfig;
use crate::heuristics::metaheuristics::{
    BilevelSearch, Descent, IteratedLocalSearch, LateAcceptance, LocalSearch, SimulatedAnnealing, ThresholdWalk,
};
use crate::preprocessing::PreprocessConfig;
use crate::split::SplitConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Initial solution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConstructionKind {
    Random,
    NearestNeighbor,
    Greedy,
    MultiStart,
}

/// Improvement driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverKind {
    /// Construction only
    None,
    Descent,
    Annealing,
    LateAcceptance,
    ThresholdWalk,
    Ils,
    Bilevel,
}

/// Driver parameters; each driver reads the fields it needs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub kind: DriverKind,
    pub max_iterations: usize,
    pub max_no_improve: usize,
    pub perturbation_strength: usize,
    pub initial_temp: f64,
    pub final_temp: f64,
    pub cooling_rate: f64,
    pub iterations_per_temp: usize,
    pub history_length: usize,
    /// Border as a multiple of the best upper cost
    pub border_ratio: f64,
    pub rounds: usize,
    pub walk_length: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            kind: DriverKind::Ils,
            max_iterations: 100,
            max_no_improve: 20,
            perturbation_strength: 3,
            initial_temp: 10.0,
            final_temp: 0.01,
            cooling_rate: 0.95,
            iterations_per_temp: 200,
            history_length: 50,
            border_ratio: 1.10,
            rounds: 50,
            walk_length: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub preprocess: PreprocessConfig,
    pub split: SplitConfig,
    pub leader: LeaderConfig,
    pub follower: FollowerConfig,
    pub construction: ConstructionKind,
    pub driver: DriverConfig,
    /// Run the full station enumeration on the final routes
    pub polish: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            preprocess: PreprocessConfig::default(),
            split: SplitConfig::default(),
            leader: LeaderConfig::default(),
            follower: FollowerConfig::default(),
            construction: ConstructionKind::MultiStart,
            driver: DriverConfig::default(),
            polish: false,
        }
    }
}

impl SolverConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read config {:?}", path))?;
        Self::from_json(&text).with_context(|| format!("Invalid config {:?}", path))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: SolverConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject parameter values the search cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.split.overload_ratio < 1.0 || self.leader.overload_ratio < 1.0 {
            anyhow::bail!("overload_ratio must be at least 1.0");
        }
        if self.leader.moves.is_empty() {
            anyhow::bail!("leader.moves must name at least one move kind");
        }
        if self.preprocess.granular_size == 0 {
            anyhow::bail!("preprocess.granular_size must be positive");
        }
        let cooling = self.driver.cooling_rate;
        if self.driver.kind == DriverKind::Annealing && !(cooling > 0.0 && cooling < 1.0) {
            anyhow::bail!("driver.cooling_rate must lie in (0, 1), got {}", cooling);
        }
        Ok(())
    }

    pub fn construction_heuristic(&self, seed: u64) -> Box<dyn ConstructionHeuristic + Send + Sync> {
        match self.construction {
            ConstructionKind::Random => Box::new(RandomSplit { split: self.split.clone(), seed }),
            ConstructionKind::NearestNeighbor => Box::new(NearestNeighborSplit {
                split: self.split.clone(),
                ..NearestNeighborSplit::randomized(seed)
            }),
            ConstructionKind::Greedy => Box::new(GreedyClustering::randomized(seed)),
            ConstructionKind::MultiStart => {
                Box::new(MultiStartConstruction::with_all_heuristics(seed, self.split.clone()))
            }
        }
    }

    /// The configured improvement driver, `None` for construction-only runs
    pub fn driver(&self, seed: u64) -> Option<Box<dyn LocalSearch + Send + Sync>> {
        let d = &self.driver;
        let leader = self.leader.clone();
        let driver: Box<dyn LocalSearch + Send + Sync> = match d.kind {
            DriverKind::None => return None,
            DriverKind::Descent => Box::new(Descent { leader }),
            DriverKind::Annealing => Box::new(SimulatedAnnealing {
                leader,
                initial_temp: d.initial_temp,
                final_temp: d.final_temp,
                cooling_rate: d.cooling_rate,
                iterations_per_temp: d.iterations_per_temp,
                seed,
            }),
            DriverKind::LateAcceptance => Box::new(LateAcceptance {
                leader,
                history_length: d.history_length,
                max_iterations: d.max_iterations,
                max_no_improve: d.max_no_improve,
                seed,
            }),
            DriverKind::ThresholdWalk => Box::new(ThresholdWalk {
                leader,
                border_ratio: d.border_ratio,
                rounds: d.rounds,
                walk_length: d.walk_length,
                seed,
            }),
            DriverKind::Ils => Box::new(IteratedLocalSearch {
                leader,
                perturbation_strength: d.perturbation_strength,
                max_iterations: d.max_iterations,
                max_no_improve: d.max_no_improve,
                seed,
            }),
            DriverKind::Bilevel => Box::new(BilevelSearch {
                leader,
                follower: self.follower.clone(),
                border_ratio: d.border_ratio,
                rounds: d.rounds,
                walk_length: d.walk_length,
                seed,
            }),
        };
        Some(driver)
    }
}
