//! Initial solution construction.
//!
//! Giant-tour builders (random permutation, nearest neighbor) hand their tour
//! to [`Splitter`]; greedy clustering fills routes directly.

use crate::preprocessing::Preprocessed;
use crate::solution::Individual;
use crate::split::{SplitConfig, Splitter};
use anyhow::Result;
use ordered_float::OrderedFloat;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

pub trait ConstructionHeuristic {
    fn construct(&self, prep: &Preprocessed) -> Result<Individual>;
    fn name(&self) -> &str;
}

/// Random giant tour, then Split
pub struct RandomSplit {
    pub split: SplitConfig,
    pub seed: u64,
}

impl RandomSplit {
    pub fn new(seed: u64) -> Self {
        RandomSplit { split: SplitConfig::default(), seed }
    }
}

impl ConstructionHeuristic for RandomSplit {
    fn construct(&self, prep: &Preprocessed) -> Result<Individual> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut tour: Vec<usize> = prep.instance.customers().collect();
        tour.shuffle(&mut rng);
        Splitter::new(prep, self.split.clone()).split(&tour, prep.instance.vehicles)
    }

    fn name(&self) -> &str {
        "RandomSplit"
    }
}

/// Nearest neighbor giant tour from the depot, then Split
///
/// The randomized variant picks among the three nearest unvisited customers.
pub struct NearestNeighborSplit {
    pub randomized: bool,
    pub split: SplitConfig,
    pub seed: u64,
}

impl NearestNeighborSplit {
    pub fn new() -> Self {
        NearestNeighborSplit { randomized: false, split: SplitConfig::default(), seed: 42 }
    }

    pub fn randomized(seed: u64) -> Self {
        NearestNeighborSplit { randomized: true, split: SplitConfig::default(), seed }
    }

    fn giant_tour(&self, prep: &Preprocessed) -> Vec<usize> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let n = prep.num_customers();
        let mut visited = vec![false; n + 1];
        let mut tour = Vec::with_capacity(n);
        let mut current = crate::instance::DEPOT;

        while tour.len() < n {
            let mut candidates: Vec<usize> = prep.instance.customers().filter(|&c| !visited[c]).collect();
            candidates.sort_by_key(|&c| (OrderedFloat(prep.distance(current, c)), c));
            let pick = if self.randomized && candidates.len() > 1 {
                candidates[rng.gen_range(0..candidates.len().min(3))]
            } else {
                candidates[0]
            };
            visited[pick] = true;
            tour.push(pick);
            current = pick;
        }
        tour
    }
}

impl Default for NearestNeighborSplit {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstructionHeuristic for NearestNeighborSplit {
    fn construct(&self, prep: &Preprocessed) -> Result<Individual> {
        let tour = self.giant_tour(prep);
        Splitter::new(prep, self.split.clone()).split(&tour, prep.instance.vehicles)
    }

    fn name(&self) -> &str {
        if self.randomized {
            "NearestNeighborSplit-Randomized"
        } else {
            "NearestNeighborSplit"
        }
    }
}

/// Greedy clustering
///
/// Each route is seeded with an unrouted customer (the farthest from the
/// depot, or a random one) and grown with the nearest unrouted customer of
/// its last visit that still fits in the vehicle.
pub struct GreedyClustering {
    pub randomized: bool,
    pub seed: u64,
}

impl GreedyClustering {
    pub fn new() -> Self {
        GreedyClustering { randomized: false, seed: 42 }
    }

    pub fn randomized(seed: u64) -> Self {
        GreedyClustering { randomized: true, seed }
    }
}

impl Default for GreedyClustering {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstructionHeuristic for GreedyClustering {
    fn construct(&self, prep: &Preprocessed) -> Result<Individual> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let n = prep.num_customers();
        let mut routed = vec![false; n + 1];
        let mut remaining = n;
        let mut routes: Vec<Vec<usize>> = Vec::new();

        while remaining > 0 {
            let unrouted: Vec<usize> = prep.instance.customers().filter(|&c| !routed[c]).collect();
            let seed_customer = if self.randomized {
                unrouted[rng.gen_range(0..unrouted.len())]
            } else {
                unrouted
                    .iter()
                    .copied()
                    .max_by_key(|&c| (OrderedFloat(prep.distance(0, c)), std::cmp::Reverse(c)))
                    .unwrap_or(unrouted[0])
            };

            let mut route = vec![seed_customer];
            let mut load = prep.demand(seed_customer);
            routed[seed_customer] = true;
            remaining -= 1;

            let mut last = seed_customer;
            while let Some(next) = prep
                .sorted_neighbors(last)
                .iter()
                .copied()
                .find(|&c| !routed[c] && load + prep.demand(c) <= prep.capacity)
            {
                route.push(next);
                load += prep.demand(next);
                routed[next] = true;
                remaining -= 1;
                last = next;
            }
            routes.push(route);
        }

        log::debug!("{} built {} routes", self.name(), routes.len());
        Ok(Individual::from_customer_routes(prep, &routes))
    }

    fn name(&self) -> &str {
        if self.randomized {
            "GreedyClustering-Randomized"
        } else {
            "GreedyClustering"
        }
    }
}

/// Best of several constructions by upper cost
pub struct MultiStartConstruction {
    heuristics: Vec<Box<dyn ConstructionHeuristic + Send + Sync>>,
}

impl MultiStartConstruction {
    pub fn new() -> Self {
        MultiStartConstruction { heuristics: Vec::new() }
    }

    /// Every strategy; the giant-tour builders split with `split`
    pub fn with_all_heuristics(seed: u64, split: SplitConfig) -> Self {
        let mut multi = Self::new();
        multi.add(RandomSplit { split: split.clone(), seed });
        multi.add(NearestNeighborSplit { split: split.clone(), ..NearestNeighborSplit::new() });
        multi.add(NearestNeighborSplit { split, ..NearestNeighborSplit::randomized(seed) });
        multi.add(GreedyClustering::new());
        multi.add(GreedyClustering::randomized(seed));
        multi
    }

    pub fn add<H: ConstructionHeuristic + Send + Sync + 'static>(&mut self, heuristic: H) {
        self.heuristics.push(Box::new(heuristic));
    }
}

impl Default for MultiStartConstruction {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstructionHeuristic for MultiStartConstruction {
    fn construct(&self, prep: &Preprocessed) -> Result<Individual> {
        let mut best: Option<Individual> = None;
        for heuristic in &self.heuristics {
            let candidate = heuristic.construct(prep)?;
            log::debug!("{}: {:.2}", heuristic.name(), candidate.upper_cost);
            if best.as_ref().map_or(true, |b| candidate.upper_cost < b.upper_cost) {
                best = Some(candidate);
            }
        }
        Ok(best.unwrap_or_default())
    }

    fn name(&self) -> &str {
        "MultiStart"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::fixtures;
    use crate::preprocessing::PreprocessConfig;

    fn prep() -> Preprocessed {
        Preprocessed::new(fixtures::e_n22_k4(), PreprocessConfig::default())
    }

    #[test]
    fn test_every_construction_serves_all_customers() {
        let prep = prep();
        let heuristics: Vec<Box<dyn ConstructionHeuristic>> = vec![
            Box::new(RandomSplit::new(3)),
            Box::new(NearestNeighborSplit::new()),
            Box::new(NearestNeighborSplit::randomized(3)),
            Box::new(GreedyClustering::new()),
            Box::new(GreedyClustering::randomized(3)),
        ];
        for h in heuristics {
            let ind = h.construct(&prep).unwrap();
            assert!(ind.is_complete(&prep), "{}", h.name());
            assert!((ind.upper_cost - ind.recompute_upper_cost(&prep)).abs() < 1e-9);
            assert!(ind.lower_cost.is_none());
        }
    }

    #[test]
    fn test_clustering_respects_capacity() {
        let prep = prep();
        let ind = GreedyClustering::new().construct(&prep).unwrap();
        assert!(ind.is_capacity_feasible(&prep));
        assert!(ind.num_routes() >= prep.instance.min_vehicles());
    }

    #[test]
    fn test_nearest_neighbor_on_a_line() {
        let prep = Preprocessed::new(fixtures::line(5, 10), PreprocessConfig::default());
        let nn = NearestNeighborSplit::new();
        assert_eq!(nn.giant_tour(&prep), vec![1, 2, 3, 4, 5]);
        let ind = nn.construct(&prep).unwrap();
        assert_eq!(ind.num_routes(), 1);
    }

    #[test]
    fn test_multi_start_keeps_the_best() {
        let prep = prep();
        let multi = MultiStartConstruction::with_all_heuristics(7, SplitConfig::default());
        let best = multi.construct(&prep).unwrap();
        let nn = NearestNeighborSplit::new().construct(&prep).unwrap();
        assert!(best.upper_cost <= nn.upper_cost + 1e-9);
        assert!(best.is_complete(&prep));
    }

    #[test]
    fn test_same_seed_same_solution() {
        let prep = prep();
        let a = RandomSplit::new(99).construct(&prep).unwrap();
        let b = RandomSplit::new(99).construct(&prep).unwrap();
        assert_eq!(a.giant_tour(), b.giant_tour());
    }
}
