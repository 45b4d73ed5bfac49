//! Search drivers built on the [`Leader`].
//!
//! Each driver owns its parameters and seed, loads an individual into a
//! fresh Leader and writes the best route set it saw back:
//! - plain descent to a local optimum
//! - simulated annealing
//! - late acceptance hill climbing
//! - threshold walk around the best cost
//! - iterated local search
//! - bilevel search keeping the best charging-aware solution

use crate::heuristics::acceptance::{Acceptance, EPSILON};
use crate::heuristics::charging::{Follower, FollowerConfig, LowerCostCache};
use crate::heuristics::local_search::{Leader, LeaderConfig};
use crate::preprocessing::Preprocessed;
use crate::solution::{Individual, PartialSolution};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// Trait for improvement methods working on a whole individual
pub trait LocalSearch {
    fn improve(&self, prep: &Preprocessed, individual: &mut Individual) -> bool;
    fn name(&self) -> &str;
}

/// Exhaustive descent over the configured move kinds
pub struct Descent {
    pub leader: LeaderConfig,
}

impl Descent {
    pub fn new() -> Self {
        Descent { leader: LeaderConfig::default() }
    }
}

impl Default for Descent {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSearch for Descent {
    fn improve(&self, prep: &Preprocessed, individual: &mut Individual) -> bool {
        let mut leader = Leader::new(prep, self.leader.clone());
        leader.load_from(individual);
        let before = leader.cost();
        let applied = leader.local_search_to_optimum();
        log::debug!("Descent applied {} moves: {:.2} -> {:.2}", applied, before, leader.cost());
        if applied == 0 {
            return false;
        }
        leader.export_to(individual);
        leader.cost() < before - EPSILON
    }

    fn name(&self) -> &str {
        "Descent"
    }
}

/// Simulated Annealing
///
/// Random single moves under the Metropolis criterion with geometric cooling;
/// the best route set found is polished by a final descent.
pub struct SimulatedAnnealing {
    pub leader: LeaderConfig,
    /// Initial temperature
    pub initial_temp: f64,
    /// Final temperature
    pub final_temp: f64,
    /// Cooling rate
    pub cooling_rate: f64,
    /// Iterations per temperature
    pub iterations_per_temp: usize,
    /// Random seed
    pub seed: u64,
}

impl SimulatedAnnealing {
    pub fn new() -> Self {
        SimulatedAnnealing {
            leader: LeaderConfig::default(),
            initial_temp: 10.0,
            final_temp: 0.01,
            cooling_rate: 0.95,
            iterations_per_temp: 200,
            seed: 42,
        }
    }

    pub fn with_params(initial_temp: f64, final_temp: f64, cooling_rate: f64, iterations_per_temp: usize) -> Self {
        SimulatedAnnealing {
            initial_temp,
            final_temp,
            cooling_rate,
            iterations_per_temp,
            ..Self::new()
        }
    }
}

impl Default for SimulatedAnnealing {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSearch for SimulatedAnnealing {
    fn improve(&self, prep: &Preprocessed, individual: &mut Individual) -> bool {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut leader = Leader::new(prep, self.leader.clone());
        leader.load_from(individual);
        let start = leader.cost();

        let mut best = individual.clone();
        best.upper_cost = start;
        let mut temp = self.initial_temp;
        let mut accepted = 0usize;

        while temp > self.final_temp && self.cooling_rate < 1.0 {
            let policy = Acceptance::Annealing { temperature: temp };
            for _ in 0..self.iterations_per_temp {
                if leader.explore_one_random_move(&policy, &mut rng, None) {
                    accepted += 1;
                    if leader.cost() < best.upper_cost - EPSILON {
                        leader.export_to(&mut best);
                    }
                }
            }
            temp *= self.cooling_rate;
        }

        leader.load_from(&best);
        if leader.local_search_to_optimum() > 0 {
            leader.export_to(&mut best);
        }
        log::debug!("SA accepted {} moves, best {:.2}", accepted, best.upper_cost);

        let improved = best.upper_cost < start - EPSILON;
        if improved {
            *individual = best;
        }
        improved
    }

    fn name(&self) -> &str {
        "SimulatedAnnealing"
    }
}

/// Late Acceptance Hill Climbing
///
/// A move is accepted when it improves, or when the resulting cost stays
/// under the cost recorded `history_length` iterations earlier.
pub struct LateAcceptance {
    pub leader: LeaderConfig,
    pub history_length: usize,
    pub max_iterations: usize,
    /// Stop after this many iterations without a new best
    pub max_no_improve: usize,
    /// Random seed
    pub seed: u64,
}

impl LateAcceptance {
    pub fn new() -> Self {
        LateAcceptance {
            leader: LeaderConfig::default(),
            history_length: 50,
            max_iterations: 20_000,
            max_no_improve: 5_000,
            seed: 42,
        }
    }

    pub fn with_params(history_length: usize, max_iterations: usize, max_no_improve: usize) -> Self {
        LateAcceptance { history_length, max_iterations, max_no_improve, ..Self::new() }
    }
}

impl Default for LateAcceptance {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSearch for LateAcceptance {
    fn improve(&self, prep: &Preprocessed, individual: &mut Individual) -> bool {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut leader = Leader::new(prep, self.leader.clone());
        leader.load_from(individual);
        let start = leader.cost();

        let mut best = individual.clone();
        best.upper_cost = start;
        let mut history = vec![start; self.history_length.max(1)];
        let mut no_improve = 0;
        let mut iteration = 0;

        while iteration < self.max_iterations && no_improve < self.max_no_improve {
            let slot = iteration % history.len();
            let policy = Acceptance::HistoryThreshold { history: history[slot] };
            leader.explore_one_random_move(&policy, &mut rng, None);

            if leader.cost() < best.upper_cost - EPSILON {
                leader.export_to(&mut best);
                no_improve = 0;
            } else {
                no_improve += 1;
            }
            history[slot] = leader.cost();
            iteration += 1;
        }
        log::debug!("LAHC stopped after {} iterations, best {:.2}", iteration, best.upper_cost);

        let improved = best.upper_cost < start - EPSILON;
        if improved {
            *individual = best;
        }
        improved
    }

    fn name(&self) -> &str {
        "LateAcceptance"
    }
}

/// Threshold walk
///
/// Rounds of random moves kept under `border_ratio × best`, each round closed
/// by a descent.
pub struct ThresholdWalk {
    pub leader: LeaderConfig,
    pub border_ratio: f64,
    pub rounds: usize,
    /// Random moves attempted per round
    pub walk_length: usize,
    /// Random seed
    pub seed: u64,
}

impl ThresholdWalk {
    pub fn new() -> Self {
        ThresholdWalk {
            leader: LeaderConfig::default(),
            border_ratio: 1.10,
            rounds: 50,
            walk_length: 200,
            seed: 42,
        }
    }

    pub fn with_params(border_ratio: f64, rounds: usize, walk_length: usize) -> Self {
        ThresholdWalk { border_ratio, rounds, walk_length, ..Self::new() }
    }
}

impl Default for ThresholdWalk {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSearch for ThresholdWalk {
    fn improve(&self, prep: &Preprocessed, individual: &mut Individual) -> bool {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut leader = Leader::new(prep, self.leader.clone());
        leader.load_from(individual);
        let start = leader.cost();

        let mut best = individual.clone();
        best.upper_cost = start;

        for _ in 0..self.rounds {
            let policy = Acceptance::Border { border: best.upper_cost * self.border_ratio };
            for _ in 0..self.walk_length {
                leader.explore_one_random_move(&policy, &mut rng, None);
            }
            leader.local_search_to_optimum();
            if leader.cost() < best.upper_cost - EPSILON {
                leader.export_to(&mut best);
            }
        }

        let improved = best.upper_cost < start - EPSILON;
        if improved {
            *individual = best;
        }
        improved
    }

    fn name(&self) -> &str {
        "ThresholdWalk"
    }
}

/// Iterated Local Search
///
/// Applies descent, then perturbation, then descent again; the perturbed
/// optimum replaces the current one only when it is cheaper.
pub struct IteratedLocalSearch {
    pub leader: LeaderConfig,
    /// Number of perturbation moves
    pub perturbation_strength: usize,
    /// Maximum iterations
    pub max_iterations: usize,
    /// Maximum iterations without improvement
    pub max_no_improve: usize,
    /// Random seed
    pub seed: u64,
}

impl IteratedLocalSearch {
    pub fn new() -> Self {
        IteratedLocalSearch {
            leader: LeaderConfig::default(),
            perturbation_strength: 3,
            max_iterations: 100,
            max_no_improve: 20,
            seed: 42,
        }
    }

    pub fn with_params(perturbation_strength: usize, max_iterations: usize, max_no_improve: usize) -> Self {
        IteratedLocalSearch { perturbation_strength, max_iterations, max_no_improve, ..Self::new() }
    }
}

impl Default for IteratedLocalSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSearch for IteratedLocalSearch {
    fn improve(&self, prep: &Preprocessed, individual: &mut Individual) -> bool {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut leader = Leader::new(prep, self.leader.clone());
        leader.load_from(individual);
        let start = leader.cost();

        leader.local_search_to_optimum();
        let mut current = Individual::new();
        leader.export_to(&mut current);

        let mut no_improve = 0;
        let mut iteration = 0;

        while iteration < self.max_iterations && no_improve < self.max_no_improve {
            leader.perturb(self.perturbation_strength, &mut rng);
            leader.local_search_to_optimum();

            if leader.cost() < current.upper_cost - EPSILON {
                leader.export_to(&mut current);
                no_improve = 0;
            } else {
                leader.load_from(&current);
                no_improve += 1;
            }
            iteration += 1;
        }
        log::debug!("ILS ran {} iterations, best {:.2}", iteration, current.upper_cost);

        let improved = current.upper_cost < start - EPSILON;
        if improved {
            *individual = current;
        }
        improved
    }

    fn name(&self) -> &str {
        "ILS"
    }
}

/// Bilevel search
///
/// Walks the upper level like [`ThresholdWalk`] while a [`LowerCostCache`]
/// follows every accepted move; the individual with the lowest
/// charging-aware cost is kept and its `lower_cost` is set.
pub struct BilevelSearch {
    pub leader: LeaderConfig,
    pub follower: FollowerConfig,
    pub border_ratio: f64,
    pub rounds: usize,
    pub walk_length: usize,
    /// Random seed
    pub seed: u64,
}

impl BilevelSearch {
    pub fn new() -> Self {
        BilevelSearch {
            leader: LeaderConfig::default(),
            follower: FollowerConfig::default(),
            border_ratio: 1.05,
            rounds: 30,
            walk_length: 200,
            seed: 42,
        }
    }
}

impl Default for BilevelSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSearch for BilevelSearch {
    fn improve(&self, prep: &Preprocessed, individual: &mut Individual) -> bool {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut follower = Follower::new(prep, self.follower.clone());
        let start_lower = match individual.lower_cost {
            Some(lower) => lower,
            None => follower.run_on_individual(individual),
        };

        let mut leader = Leader::new(prep, self.leader.clone());
        leader.load_from(individual);
        let mut cache = LowerCostCache::new();
        let mut partial = PartialSolution::new();

        let mut best = individual.clone();
        let mut best_lower = start_lower;
        let mut best_upper = leader.cost();

        for round in 0..self.rounds {
            leader.local_search_to_optimum();
            cache.rebuild(&mut follower, leader.routes());
            if keep_if_lower(&leader, &cache, &mut best, &mut best_lower) {
                log::debug!("Round {} descent: lower cost {:.2}", round, best_lower);
            }

            let policy = Acceptance::Border { border: best_upper * self.border_ratio };
            for _ in 0..self.walk_length {
                if !leader.explore_one_random_move(&policy, &mut rng, Some(&mut partial)) {
                    continue;
                }
                cache.update(&mut follower, leader.routes(), &partial);
                partial.clear();
                if keep_if_lower(&leader, &cache, &mut best, &mut best_lower) {
                    log::debug!("Round {}: lower cost {:.2}", round, best_lower);
                }
            }
            best_upper = best_upper.min(leader.cost());
        }

        let improved = best_lower < start_lower - EPSILON;
        if improved {
            *individual = best;
        } else {
            individual.lower_cost = Some(start_lower);
        }
        improved
    }

    fn name(&self) -> &str {
        "Bilevel"
    }
}

/// Export the Leader's routes into `best` when the cached lower cost beats
/// `best_lower`
fn keep_if_lower(leader: &Leader, cache: &LowerCostCache, best: &mut Individual, best_lower: &mut f64) -> bool {
    let total = cache.total();
    if total >= *best_lower - EPSILON {
        return false;
    }
    *best_lower = total;
    leader.export_to(best);
    best.lower_cost = Some(total);
    true
}
