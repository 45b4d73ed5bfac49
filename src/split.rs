//! Split algorithm for partitioning a giant tour into routes.
//!
//! The giant tour is a permutation of all customers. Position `i` of the tour
//! is a boundary; an arc `(i, j)` stands for the route serving tour positions
//! `i+1..=j`, priced as depot-out + internal arcs + depot-in + a penalty on
//! load above capacity (and on duration above the limit, when one is set).
//! The cheapest path from boundary 0 to boundary n is the best partition.
//!
//! Without a duration limit the shortest path is computed in linear time with
//! a monotonic queue of undominated boundaries (Vidal, 2016). With a duration
//! limit an O(n²) double loop is used, cut once the load exceeds a multiple of
//! the capacity.

use crate::preprocessing::Preprocessed;
use crate::solution::{Individual, Route};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const EPSILON: f64 = 1e-5;

/// Split parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// The O(n²) variant stops extending a route once its load exceeds
    /// `overload_ratio × capacity`. Speed bound only: it can miss a cheaper
    /// heavily overloaded route.
    pub overload_ratio: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        SplitConfig { overload_ratio: 1.5 }
    }
}

/// Giant-tour splitter owning its dynamic-programming buffers
pub struct Splitter<'a> {
    prep: &'a Preprocessed,
    config: SplitConfig,
    /// 1-indexed tour, slot 0 unused
    client: Vec<usize>,
    depot_to: Vec<f64>,
    to_depot: Vec<f64>,
    next_distance: Vec<f64>,
    cum_distance: Vec<f64>,
    cum_load: Vec<f64>,
    cum_service: Vec<f64>,
    potential: Vec<Vec<f64>>,
    pred: Vec<Vec<usize>>,
    queue: VecDeque<usize>,
}

impl<'a> Splitter<'a> {
    pub fn new(prep: &'a Preprocessed, config: SplitConfig) -> Self {
        Splitter {
            prep,
            config,
            client: Vec::new(),
            depot_to: Vec::new(),
            to_depot: Vec::new(),
            next_distance: Vec::new(),
            cum_distance: Vec::new(),
            cum_load: Vec::new(),
            cum_service: Vec::new(),
            potential: Vec::new(),
            pred: Vec::new(),
            queue: VecDeque::new(),
        }
    }

    /// Partition `tour` into at most `max_vehicles` routes when possible and
    /// write them into `individual`. Returns the number of routes.
    ///
    /// The unlimited-fleet split runs first; if its best partition needs more
    /// than `max_vehicles` routes, the limited-fleet split picks the best
    /// route count up to `max_vehicles`. `max_vehicles` is raised to the
    /// number of vehicles the total demand requires.
    pub fn partition(&mut self, tour: &[usize], max_vehicles: usize, individual: &mut Individual) -> Result<usize> {
        let n = tour.len();
        if n == 0 {
            individual.set_routes(self.prep, Vec::new());
            return Ok(0);
        }

        let total_demand: i64 = tour.iter().map(|&c| self.prep.demand(c) as i64).sum();
        let by_volume = ((total_demand + self.prep.capacity as i64 - 1) / self.prep.capacity as i64).max(1) as usize;
        let max_vehicles = max_vehicles.max(by_volume).min(n);

        self.load_tour(tour, max_vehicles);

        let sequences = match self.split_simple(max_vehicles)? {
            Some(sequences) => sequences,
            None => {
                log::debug!("Unlimited split needs more than {} routes, running limited fleet split", max_vehicles);
                self.split_limited(max_vehicles)?
            }
        };

        let routes: Vec<Route> = sequences
            .iter()
            .map(|&(begin, end)| Route::from_customers(self.prep, &self.client[begin + 1..=end]))
            .collect();
        let count = routes.len();
        individual.set_routes(self.prep, routes);
        Ok(count)
    }

    /// Convenience wrapper returning a fresh individual
    pub fn split(&mut self, tour: &[usize], max_vehicles: usize) -> Result<Individual> {
        let mut individual = Individual::new();
        self.partition(tour, max_vehicles, &mut individual)?;
        Ok(individual)
    }

    fn load_tour(&mut self, tour: &[usize], max_vehicles: usize) {
        let prep = self.prep;
        let n = tour.len();
        let service = prep.instance.service_time;

        self.client.clear();
        self.client.push(0);
        self.client.extend_from_slice(tour);

        self.depot_to.clear();
        self.to_depot.clear();
        self.next_distance.clear();
        self.cum_distance.clear();
        self.cum_load.clear();
        self.cum_service.clear();
        self.depot_to.resize(n + 1, 0.0);
        self.to_depot.resize(n + 1, 0.0);
        self.next_distance.resize(n + 1, 0.0);
        self.cum_distance.resize(n + 1, 0.0);
        self.cum_load.resize(n + 1, 0.0);
        self.cum_service.resize(n + 1, 0.0);

        for i in 1..=n {
            let c = self.client[i];
            self.depot_to[i] = prep.distance(0, c);
            self.to_depot[i] = prep.distance(c, 0);
            if i < n {
                self.next_distance[i] = prep.distance(c, self.client[i + 1]);
            }
            self.cum_load[i] = self.cum_load[i - 1] + prep.demand(c) as f64;
            self.cum_service[i] = self.cum_service[i - 1] + service;
            if i > 1 {
                self.cum_distance[i] = self.cum_distance[i - 1] + self.next_distance[i - 1];
            }
        }

        let layers = max_vehicles + 1;
        if self.potential.len() < layers {
            self.potential.resize(layers, Vec::new());
            self.pred.resize(layers, Vec::new());
        }
        for k in 0..layers {
            self.potential[k].clear();
            self.potential[k].resize(n + 1, f64::INFINITY);
            self.pred[k].clear();
            self.pred[k].resize(n + 1, 0);
        }
    }

    #[inline]
    fn load_penalty(&self, load: f64) -> f64 {
        self.prep.capacity_penalty * (load - self.prep.capacity as f64).max(0.0)
    }

    /// Cost of reaching boundary `j` from boundary `i` in layer `k`
    #[inline]
    fn propagate(&self, i: usize, j: usize, k: usize) -> f64 {
        self.potential[k][i] + self.cum_distance[j] - self.cum_distance[i + 1]
            + self.depot_to[i + 1]
            + self.to_depot[j]
            + self.load_penalty(self.cum_load[j] - self.cum_load[i])
    }

    /// Boundary `j` (after `i`) is worse than `i` for every future target
    #[inline]
    fn dominates(&self, i: usize, j: usize, k: usize) -> bool {
        self.potential[k][j] + self.depot_to[j + 1]
            > self.potential[k][i] + self.depot_to[i + 1] + self.cum_distance[j + 1] - self.cum_distance[i + 1]
                + self.prep.capacity_penalty * (self.cum_load[j] - self.cum_load[i])
    }

    /// Boundary `j` (after `i`) is better than `i` for every future target
    #[inline]
    fn dominates_right(&self, i: usize, j: usize, k: usize) -> bool {
        self.potential[k][j] + self.depot_to[j + 1]
            < self.potential[k][i] + self.depot_to[i + 1] + self.cum_distance[j + 1] - self.cum_distance[i + 1]
                + EPSILON
    }

    /// Route cost between boundaries for the duration-aware variant
    #[inline]
    fn route_cost(&self, distance: f64, load: f64, service: f64) -> f64 {
        let mut cost = distance + self.load_penalty(load);
        if let Some(limit) = self.prep.instance.max_route_duration {
            cost += self.prep.duration_penalty * (distance + service - limit).max(0.0);
        }
        cost
    }

    /// Relax every arc leaving boundary `i` of layer `from` into layer `to`,
    /// stopping once the load passes `overload_ratio × capacity`.
    fn relax_bounded(&mut self, i: usize, from: usize, to: usize) {
        let n = self.client.len() - 1;
        let bound = self.config.overload_ratio * self.prep.capacity as f64;
        let base = self.potential[from][i];
        let mut distance = 0.0;
        let mut j = i + 1;
        while j <= n && self.cum_load[j - 1] - self.cum_load[i] <= bound {
            if j == i + 1 {
                distance += self.depot_to[j];
            } else {
                distance += self.next_distance[j - 1];
            }
            let load = self.cum_load[j] - self.cum_load[i];
            let service = self.cum_service[j] - self.cum_service[i];
            let cost = self.route_cost(distance + self.to_depot[j], load, service);
            if base + cost < self.potential[to][j] {
                self.potential[to][j] = base + cost;
                self.pred[to][j] = i;
            }
            j += 1;
        }
    }

    /// Single-layer split; `None` when the best partition needs more than
    /// `max_vehicles` routes.
    fn split_simple(&mut self, max_vehicles: usize) -> Result<Option<Vec<(usize, usize)>>> {
        let n = self.client.len() - 1;
        self.potential[0][0] = 0.0;

        if self.prep.has_duration_limit() {
            for i in 0..n {
                if self.potential[0][i].is_finite() {
                    self.relax_bounded(i, 0, 0);
                }
            }
        } else {
            self.queue.clear();
            self.queue.push_back(0);
            for i in 1..=n {
                let front = self.queue[0];
                self.potential[0][i] = self.propagate(front, i, 0);
                self.pred[0][i] = front;

                if i < n {
                    self.push_candidate(i, 0);
                    self.pop_front_dominated(i, 0);
                }
            }
        }

        if !self.potential[0][n].is_finite() {
            bail!("no Split solution has been propagated until the last customer");
        }

        let mut sequences = Vec::new();
        let mut end = n;
        while end > 0 && sequences.len() < max_vehicles {
            let begin = self.pred[0][end];
            sequences.push((begin, end));
            end = begin;
        }
        if end != 0 {
            return Ok(None);
        }
        sequences.reverse();
        Ok(Some(sequences))
    }

    /// One DP layer per route count, picking the cheapest count at the end
    fn split_limited(&mut self, max_vehicles: usize) -> Result<Vec<(usize, usize)>> {
        let n = self.client.len() - 1;
        for k in 0..=max_vehicles {
            self.potential[k].iter_mut().for_each(|p| *p = f64::INFINITY);
        }
        self.potential[0][0] = 0.0;

        for k in 0..max_vehicles {
            if self.prep.has_duration_limit() {
                for i in k..n {
                    if self.potential[k][i].is_finite() {
                        self.relax_bounded(i, k, k + 1);
                    }
                }
            } else {
                self.queue.clear();
                self.queue.push_back(k);
                let mut i = k + 1;
                while i <= n && !self.queue.is_empty() {
                    let front = self.queue[0];
                    self.potential[k + 1][i] = self.propagate(front, i, k);
                    self.pred[k + 1][i] = front;

                    if i < n {
                        self.push_candidate(i, k);
                        self.pop_front_dominated(i, k);
                    }
                    i += 1;
                }
            }
        }

        let (nb_routes, min_cost) = (1..=max_vehicles)
            .map(|k| (k, self.potential[k][n]))
            .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best });
        if nb_routes == 0 || !min_cost.is_finite() {
            bail!("no Split solution has been propagated until the last customer");
        }

        let mut sequences = Vec::with_capacity(nb_routes);
        let mut end = n;
        for k in (0..nb_routes).rev() {
            let begin = self.pred[k + 1][end];
            sequences.push((begin, end));
            end = begin;
        }
        if end != 0 {
            bail!("limited fleet Split did not reach the start of the tour");
        }
        sequences.reverse();
        Ok(sequences)
    }

    /// Push boundary `i` at the back unless the back dominates it
    fn push_candidate(&mut self, i: usize, k: usize) {
        let Some(&back) = self.queue.back() else {
            self.queue.push_back(i);
            return;
        };
        if !self.dominates(back, i, k) {
            while let Some(&back) = self.queue.back() {
                if self.dominates_right(back, i, k) {
                    self.queue.pop_back();
                } else {
                    break;
                }
            }
            self.queue.push_back(i);
        }
    }

    /// Drop the front while the next boundary is at least as good for target `i + 1`
    fn pop_front_dominated(&mut self, i: usize, k: usize) {
        while self.queue.len() > 1
            && self.propagate(self.queue[0], i + 1, k) > self.propagate(self.queue[1], i + 1, k) - EPSILON
        {
            self.queue.pop_front();
        }
    }
}

/// Result of the plain O(n²) split
#[derive(Debug, Clone)]
pub struct SplitResult {
    /// Routes as sequences of customer IDs
    pub routes: Vec<Vec<usize>>,
    /// Total upper-level cost (distance plus capacity penalty)
    pub total_cost: f64,
}

/// Prins (2004) split: the same capacity-penalized shortest path, computed
/// with a plain double loop (no dominance pruning, no early break, no
/// duration terms).
pub fn prins_split(prep: &Preprocessed, tour: &[usize]) -> SplitResult {
    let n = tour.len();
    if n == 0 {
        return SplitResult { routes: Vec::new(), total_cost: 0.0 };
    }

    let mut cost = vec![f64::INFINITY; n + 1];
    let mut pred = vec![0usize; n + 1];
    cost[0] = 0.0;

    for i in 0..n {
        let mut load = 0i32;
        let mut distance = 0.0;
        for j in i..n {
            let c = tour[j];
            load += prep.demand(c);
            distance += if j == i { prep.distance(0, c) } else { prep.distance(tour[j - 1], c) };
            let route = distance + prep.distance(c, 0) + prep.load_penalty(load);
            if cost[i] + route < cost[j + 1] {
                cost[j + 1] = cost[i] + route;
                pred[j + 1] = i;
            }
        }
    }

    let mut routes = Vec::new();
    let mut j = n;
    while j > 0 {
        let i = pred[j];
        routes.push(tour[i..j].to_vec());
        j = i;
    }
    routes.reverse();

    SplitResult { routes, total_cost: cost[n] }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::charging::{Follower, FollowerConfig};
    use crate::instance::{fixtures, EvrpInstance};
    use crate::preprocessing::PreprocessConfig;
    use proptest::prelude::*;

    fn prep_of(instance: EvrpInstance) -> Preprocessed {
        Preprocessed::new(instance, PreprocessConfig::default())
    }

    #[test]
    fn test_split_single_route() {
        let prep = prep_of(fixtures::line(3, 30));
        let mut splitter = Splitter::new(&prep, SplitConfig::default());
        let ind = splitter.split(&[1, 2, 3], 3).unwrap();

        assert_eq!(ind.num_routes(), 1);
        assert_eq!(ind.routes[0].nodes, vec![0, 1, 2, 3, 0]);
        // 0→1→2→3→0 = 1+1+1+3 = 6
        assert!((ind.upper_cost - 6.0).abs() < 1e-10);
    }

    #[test]
    fn test_split_follows_clusters() {
        let prep = prep_of(fixtures::two_clusters());
        let mut splitter = Splitter::new(&prep, SplitConfig::default());
        let ind = splitter.split(&[1, 2, 3, 4, 5, 6], 2).unwrap();

        assert_eq!(ind.num_routes(), 2);
        assert_eq!(ind.routes[0].customers(), &[1, 2, 3]);
        assert_eq!(ind.routes[1].customers(), &[4, 5, 6]);
        assert!(ind.is_capacity_feasible(&prep));
    }

    #[test]
    fn test_split_empty_tour() {
        let prep = prep_of(fixtures::line(3, 30));
        let mut splitter = Splitter::new(&prep, SplitConfig::default());
        let ind = splitter.split(&[], 3).unwrap();

        assert_eq!(ind.num_routes(), 0);
        assert_eq!(ind.upper_cost, 0.0);
    }

    #[test]
    fn test_limited_fleet_fallback() {
        // Demand 2 per customer with capacity 3: the volume bound says 2 vehicles,
        // the penalized optimum uses 3.
        let customers = [(1.0, 0.0, 2), (2.0, 0.0, 2), (3.0, 0.0, 2)];
        let instance = EvrpInstance::new("bins", (0.0, 0.0), &customers, &[(0.5, 0.5)], 3, 1000.0, 1.0, 2);
        let config = PreprocessConfig { capacity_penalty: Some(100.0), ..Default::default() };
        let prep = Preprocessed::new(instance, config);

        let unlimited = prins_split(&prep, &[1, 2, 3]);
        assert_eq!(unlimited.routes.len(), 3);
        assert!((unlimited.total_cost - 12.0).abs() < 1e-10);

        let mut splitter = Splitter::new(&prep, SplitConfig::default());
        let ind = splitter.split(&[1, 2, 3], 2).unwrap();

        // [1] + [2, 3] = 2 + 6 + 100
        assert_eq!(ind.num_routes(), 2);
        assert!(ind.is_complete(&prep));
        assert!((ind.upper_cost - 108.0).abs() < 1e-9);
    }

    #[test]
    fn test_fleet_bound_raised_to_demand_volume() {
        let prep = prep_of(fixtures::line(6, 2));
        let mut splitter = Splitter::new(&prep, SplitConfig::default());
        let ind = splitter.split(&[1, 2, 3, 4, 5, 6], 1).unwrap();

        assert!(ind.num_routes() >= 3);
        assert!(ind.is_capacity_feasible(&prep));
    }

    #[test]
    fn test_duration_aware_split() {
        // One unit of service per visit; the single route would last 8 + 4 = 12.
        let instance = fixtures::line(4, 10).with_duration_limit(10.0, 1.0);
        let config = PreprocessConfig { duration_penalty: 1000.0, ..Default::default() };
        let prep = Preprocessed::new(instance, config);
        let mut splitter = Splitter::new(&prep, SplitConfig::default());
        let ind = splitter.split(&[1, 2, 3, 4], 4).unwrap();

        // [1, 2] + [3, 4] = 4 + 8, both within the limit
        assert_eq!(ind.num_routes(), 2);
        assert_eq!(ind.routes[0].customers(), &[1, 2]);
        assert!((ind.upper_cost - 12.0).abs() < 1e-9);
        for route in &ind.routes {
            assert_eq!(prep.duration_penalty(route.distance, route.num_customers()), 0.0);
        }
    }

    #[test]
    fn test_overload_bound_can_miss_cheaper_overloaded_route() {
        // Three co-located customers, each filling a vehicle; overload is almost free.
        let customers = [(100.0, 0.0, 10), (100.0, 0.0, 10), (100.0, 0.0, 10)];
        let instance = EvrpInstance::new("far", (0.0, 0.0), &customers, &[(50.0, 0.0)], 10, 500.0, 1.0, 3)
            .with_duration_limit(1e9, 0.0);
        let config = PreprocessConfig { capacity_penalty: Some(0.001), ..Default::default() };
        let prep = Preprocessed::new(instance, config);

        let mut bounded = Splitter::new(&prep, SplitConfig::default());
        let with_bound = bounded.split(&[1, 2, 3], 3).unwrap();
        assert!((with_bound.upper_cost - 400.01).abs() < 1e-6);

        let mut unbounded = Splitter::new(&prep, SplitConfig { overload_ratio: f64::INFINITY });
        let without_bound = unbounded.split(&[1, 2, 3], 3).unwrap();
        assert!((without_bound.upper_cost - 200.02).abs() < 1e-6);
        assert_eq!(without_bound.num_routes(), 1);
    }

    #[test]
    fn test_prins_split_forced_two_routes() {
        let prep = prep_of(fixtures::line(3, 2));
        let result = prins_split(&prep, &[1, 2, 3]);
        // Optimal split: [1]+[2,3] = (0→1→0)+(0→2→3→0) = 2+6 = 8
        assert_eq!(result.routes, vec![vec![1], vec![2, 3]]);
        assert!((result.total_cost - 8.0).abs() < 1e-10);
    }

    #[test]
    fn test_identity_tour_with_four_vehicles() {
        let prep = prep_of(fixtures::e_n22_k4());
        let tour: Vec<usize> = prep.instance.customers().collect();
        let mut splitter = Splitter::new(&prep, SplitConfig::default());
        let mut ind = splitter.split(&tour, 4).unwrap();

        let served: usize = ind.routes.iter().map(|r| r.num_customers()).sum();
        assert_eq!(served, 21);
        assert!(ind.num_routes() <= 4);
        assert!(ind.is_complete(&prep));
        for route in &ind.routes {
            assert!(route.is_consistent(&prep));
        }
        let penalty = ind.upper_cost - ind.distance();
        assert!((penalty - prep.capacity_penalty * ind.load_excess(&prep) as f64).abs() < 1e-6);

        let mut follower = Follower::new(&prep, FollowerConfig::default());
        let lower = follower.run_on_individual(&mut ind);
        assert!(lower >= ind.distance() - 1e-9);
    }

    proptest! {
        #[test]
        fn prop_linear_split_matches_prins(
            tour in Just((1..=21usize).collect::<Vec<_>>()).prop_shuffle(),
            capacity in prop::sample::select(vec![2500, 4000, 6000, 9000, 30000]),
        ) {
            let mut instance = fixtures::e_n22_k4();
            instance.capacity = capacity;
            let prep = prep_of(instance);

            let reference = prins_split(&prep, &tour);
            let mut splitter = Splitter::new(&prep, SplitConfig::default());
            let ind = splitter.split(&tour, tour.len()).unwrap();

            prop_assert!((ind.upper_cost - reference.total_cost).abs() < 1e-4);
            let served: usize = ind.routes.iter().map(|r| r.num_customers()).sum();
            prop_assert_eq!(served, tour.len());
            prop_assert_eq!(ind.giant_tour(), tour);
        }
    }
}
