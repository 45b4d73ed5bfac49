//! Charging-station insertion (the follower level).
//!
//! Given a route without stations, the [`Follower`] splices charging stops
//! into it so that no leg between two charging points (depot included) is
//! longer than the battery range, at minimum extra distance. It escalates
//! through increasingly expensive methods, stopping at the first success:
//!
//! 1. the route is already within range
//! 2. enumeration of `m` arcs for `m` in `[⌊D/R⌋, ⌈D/R⌉]`, each arc taking its
//!    precomputed best station, as a depth-first search on an explicit stack
//!    pruned by range and by the best cost found
//! 3. remove-based repair: a station on every arc, then greedy removal of the
//!    insertion saving the most distance while legs stay within range
//!
//! [`Follower::polish`] additionally searches over every station of every
//! chosen arc, under a node budget.

use crate::preprocessing::Preprocessed;
use crate::solution::{Individual, PartialSolution, Route};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Slack on the battery range when checking legs
pub const RANGE_EPSILON: f64 = 1e-6;

/// Follower parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowerConfig {
    /// Lower cost of a route no station arrangement can repair
    pub infeasible_penalty: f64,
    /// Search nodes per station count in the per-route enumeration
    pub search_budget: usize,
    /// Station counts `polish` tries beyond the distance estimate
    pub enumeration_slack: usize,
    /// Search nodes per station count in the full enumeration
    pub polish_budget: usize,
}

impl Default for FollowerConfig {
    fn default() -> Self {
        FollowerConfig {
            infeasible_penalty: 1e6,
            search_budget: 200_000,
            enumeration_slack: 1,
            polish_budget: 2_000_000,
        }
    }
}

/// Outcome of a successful repair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Repair {
    /// Distance of the repaired route
    pub distance: f64,
    /// Distance added by the stations
    pub extra: f64,
    /// Number of stations inserted
    pub stations: usize,
}

/// Search state after placing a station before node `pos`
struct Frame {
    pos: usize,
    /// Distance driven since the last charge, up to `route[pos]`
    acc: f64,
    extra: f64,
    /// Next arc to try
    arc: usize,
    /// Next station index to try on `arc` (full enumeration only)
    choice: usize,
}

pub struct Follower<'a> {
    prep: &'a Preprocessed,
    config: FollowerConfig,
    charging_points: Vec<usize>,
    cum: Vec<f64>,
    stack: Vec<Frame>,
    chosen: Vec<(usize, usize)>,
    best: Vec<(usize, usize)>,
    work: Vec<usize>,
    inserted: Vec<bool>,
    route_buf: Vec<usize>,
    /// Enumerations cut short by their node budget
    truncated: usize,
}

impl<'a> Follower<'a> {
    pub fn new(prep: &'a Preprocessed, config: FollowerConfig) -> Self {
        Follower {
            prep,
            config,
            charging_points: prep.instance.charging_points().collect(),
            cum: Vec::new(),
            stack: Vec::new(),
            chosen: Vec::new(),
            best: Vec::new(),
            work: Vec::new(),
            inserted: Vec::new(),
            route_buf: Vec::new(),
            truncated: 0,
        }
    }

    pub fn config(&self) -> &FollowerConfig {
        &self.config
    }

    /// Number of station enumerations stopped by their node budget; the
    /// arrangements they returned may not be the cheapest
    pub fn truncated(&self) -> usize {
        self.truncated
    }

    /// Every leg between consecutive charging points is within range
    pub fn is_range_feasible(&self, route: &[usize]) -> bool {
        let limit = self.prep.max_cruise + RANGE_EPSILON;
        let mut acc = 0.0;
        for w in route.windows(2) {
            acc += self.prep.distance(w[0], w[1]);
            if acc > limit {
                return false;
            }
            if self.prep.instance.is_charging_station(w[1]) {
                acc = 0.0;
            }
        }
        true
    }

    /// Drop stations (and interior depot visits) left by an earlier repair
    fn strip(&self, route: &mut Vec<usize>) {
        let instance = &self.prep.instance;
        let last = route.len().saturating_sub(1);
        let mut k = 0;
        route.retain(|&n| {
            let keep = k == 0 || k == last || !instance.is_charging_station(n);
            k += 1;
            keep
        });
    }

    fn prepare(&mut self, route: &[usize]) {
        self.cum.clear();
        self.cum.push(0.0);
        let mut total = 0.0;
        for w in route.windows(2) {
            total += self.prep.distance(w[0], w[1]);
            self.cum.push(total);
        }
    }

    /// Station counts suggested by the route length
    fn station_counts(&self, total: f64) -> (usize, usize) {
        let estimate = total / self.prep.max_cruise;
        let low = (estimate.floor() as usize).max(1);
        let high = (estimate.ceil() as usize).max(low);
        (low, high)
    }

    /// Insert charging stops into `route` in place. Returns `None` and leaves
    /// the route station-free when no arrangement is found.
    pub fn repair(&mut self, route: &mut Vec<usize>) -> Option<Repair> {
        self.strip(route);
        if route.len() < 2 {
            return None;
        }
        self.prepare(route);
        let total = self.cum[route.len() - 1];

        if total <= self.prep.max_cruise + RANGE_EPSILON {
            return Some(Repair { distance: total, extra: 0.0, stations: 0 });
        }

        let (low, high) = self.station_counts(total);
        let mut found = None;
        for m in low..=high {
            let bound = found.unwrap_or(f64::INFINITY);
            if let Some(extra) = self.enumerate(route, m, false, bound, self.config.search_budget) {
                found = Some(extra);
            }
        }

        match found {
            Some(extra) => {
                self.insert_best(route);
                Some(Repair { distance: total + extra, extra, stations: self.best.len() })
            }
            None => self.remove_based(route, total),
        }
    }

    /// Repair, then search every station on every arc for a cheaper
    /// arrangement with up to `enumeration_slack` more stations.
    pub fn polish(&mut self, route: &mut Vec<usize>) -> Option<Repair> {
        self.strip(route);
        let mut seeded = route.clone();
        let seed = self.repair(&mut seeded);
        if matches!(seed, Some(r) if r.stations == 0) || route.len() < 2 {
            *route = seeded;
            return seed;
        }

        self.prepare(route);
        let total = self.cum[route.len() - 1];
        let (low, high) = self.station_counts(total);
        let mut found = None;
        for m in low..=high + self.config.enumeration_slack {
            let bound = found.or(seed.map(|r| r.extra - RANGE_EPSILON)).unwrap_or(f64::INFINITY);
            if let Some(extra) = self.enumerate(route, m, true, bound, self.config.polish_budget) {
                found = Some(extra);
            }
        }

        match found {
            Some(extra) => {
                self.insert_best(route);
                Some(Repair { distance: total + extra, extra, stations: self.best.len() })
            }
            None => {
                *route = seeded;
                seed
            }
        }
    }

    fn insert_best(&self, route: &mut Vec<usize>) {
        for &(arc, station) in self.best.iter().rev() {
            route.insert(arc + 1, station);
        }
    }

    /// Cheapest placement of exactly `m` stations on distinct arcs, below
    /// `bound`. The placement is left in `self.best`.
    fn enumerate(&mut self, route: &[usize], m: usize, full: bool, bound: f64, budget: usize) -> Option<f64> {
        let prep = self.prep;
        let d = |a: usize, b: usize| prep.distance(a, b);
        let limit = prep.max_cruise + RANGE_EPSILON;
        let last = route.len() - 1;
        let num_arcs = last;

        let mut best_extra = bound;
        let mut found = false;
        let mut expanded = 0usize;
        self.stack.clear();
        self.chosen.clear();
        self.stack.push(Frame { pos: 0, acc: 0.0, extra: 0.0, arc: 0, choice: 0 });

        while let Some(depth) = self.stack.len().checked_sub(1) {
            let frame = &mut self.stack[depth];

            if depth == m {
                let leg = frame.acc + self.cum[last] - self.cum[frame.pos];
                if leg <= limit && frame.extra < best_extra {
                    best_extra = frame.extra;
                    found = true;
                    self.best.clear();
                    self.best.extend_from_slice(&self.chosen);
                }
                self.stack.pop();
                self.chosen.pop();
                continue;
            }

            let arc = frame.arc;
            let reach = frame.acc + self.cum[arc] - self.cum[frame.pos];
            if arc + (m - depth) > num_arcs || reach > limit {
                self.stack.pop();
                self.chosen.pop();
                continue;
            }

            let (a, b) = (route[arc], route[arc + 1]);
            let station = if full {
                if frame.choice >= self.charging_points.len() {
                    frame.arc += 1;
                    frame.choice = 0;
                    continue;
                }
                let s = self.charging_points[frame.choice];
                frame.choice += 1;
                if s == a || s == b {
                    continue;
                }
                s
            } else {
                frame.arc += 1;
                match prep.best_station(a, b) {
                    Some(s) => s,
                    None => continue,
                }
            };

            let extra = frame.extra + d(a, station) + d(station, b) - d(a, b);
            if reach + d(a, station) > limit || extra >= best_extra {
                continue;
            }
            if expanded >= budget {
                self.truncated += 1;
                if self.truncated == 1 {
                    log::warn!(
                        "Station enumeration stopped after {} nodes with {} stations; results may be suboptimal, \
                         raise the search budget",
                        expanded,
                        m
                    );
                } else {
                    log::debug!("Station enumeration stopped after {} nodes", expanded);
                }
                break;
            }
            expanded += 1;

            let next = Frame { pos: arc + 1, acc: d(station, b), extra, arc: arc + 1, choice: 0 };
            self.chosen.push((arc, station));
            self.stack.push(next);
        }

        found.then_some(best_extra)
    }

    /// Charging point on arc `(a, b)` reachable from both ends, cheapest detour first
    fn feasible_station(&self, a: usize, b: usize) -> Option<usize> {
        let limit = self.prep.max_cruise + RANGE_EPSILON;
        let reachable = |s: usize| self.prep.distance(a, s) <= limit && self.prep.distance(s, b) <= limit;
        if let Some(s) = self.prep.best_station(a, b) {
            if reachable(s) {
                return Some(s);
            }
        }
        self.charging_points
            .iter()
            .copied()
            .filter(|&s| s != a && s != b && reachable(s))
            .min_by_key(|&s| OrderedFloat(self.prep.distance(a, s) + self.prep.distance(s, b)))
    }

    fn remove_based(&mut self, route: &mut Vec<usize>, total: f64) -> Option<Repair> {
        let limit = self.prep.max_cruise + RANGE_EPSILON;

        self.work.clear();
        self.inserted.clear();
        for w in route.windows(2) {
            self.work.push(w[0]);
            self.inserted.push(false);
            if let Some(s) = self.feasible_station(w[0], w[1]) {
                self.work.push(s);
                self.inserted.push(true);
            }
        }
        self.work.push(route[route.len() - 1]);
        self.inserted.push(false);

        loop {
            let mut best: Option<(usize, f64)> = None;
            for x in 1..self.work.len() - 1 {
                if !self.inserted[x] {
                    continue;
                }
                let (u, s, v) = (self.work[x - 1], self.work[x], self.work[x + 1]);
                let saving = self.prep.distance(u, s) + self.prep.distance(s, v) - self.prep.distance(u, v);
                if saving <= 0.0 || best.map_or(false, |(_, b)| saving <= b) {
                    continue;
                }
                if self.leg_without(x) <= limit {
                    best = Some((x, saving));
                }
            }
            match best {
                Some((x, _)) => {
                    self.work.remove(x);
                    self.inserted.remove(x);
                }
                None => break,
            }
        }

        if !self.is_range_feasible(&self.work) {
            return None;
        }
        let distance = self.prep.instance.route_distance(&self.work);
        let stations = self.inserted.iter().filter(|&&i| i).count();
        route.clear();
        route.extend_from_slice(&self.work);
        Some(Repair { distance, extra: distance - total, stations })
    }

    /// Length of the leg through `work[x]` once that station is dropped
    fn leg_without(&self, x: usize) -> f64 {
        let w = &self.work;
        let is_stop = |i: usize| i == 0 || i == w.len() - 1 || self.inserted[i];
        let mut p = x - 1;
        while !is_stop(p) {
            p -= 1;
        }
        let mut q = x + 1;
        while !is_stop(q) {
            q += 1;
        }
        let mut leg = 0.0;
        let mut prev = w[p];
        for (i, &node) in w.iter().enumerate().take(q + 1).skip(p + 1) {
            if i == x {
                continue;
            }
            leg += self.prep.distance(prev, node);
            prev = node;
        }
        leg
    }

    /// Charging-aware distance of one route, or the infeasibility penalty
    pub fn lower_cost_of(&mut self, route: &Route) -> f64 {
        let mut work = std::mem::take(&mut self.route_buf);
        work.clear();
        work.extend_from_slice(&route.nodes);
        let cost = match self.repair(&mut work) {
            Some(repair) => repair.distance,
            None => self.config.infeasible_penalty,
        };
        self.route_buf = work;
        cost
    }

    /// Sum the repaired distances of every route into `lower_cost`
    pub fn run_on_individual(&mut self, individual: &mut Individual) -> f64 {
        let total: f64 = individual.routes.iter().map(|r| self.lower_cost_of(r)).sum();
        individual.lower_cost = Some(total);
        total
    }

    /// Repaired node sequences, `None` for irreparable routes
    pub fn charged_routes(&mut self, individual: &Individual) -> Vec<Option<Vec<usize>>> {
        individual
            .routes
            .iter()
            .map(|r| {
                let mut nodes = r.nodes.clone();
                self.repair(&mut nodes).map(|_| nodes)
            })
            .collect()
    }

    /// Polished node sequences and their total lower cost; stores the cost
    /// in `lower_cost`.
    pub fn polish_individual(&mut self, individual: &mut Individual) -> (f64, Vec<Option<Vec<usize>>>) {
        let mut total = 0.0;
        let mut routes = Vec::with_capacity(individual.routes.len());
        for route in &individual.routes {
            let mut nodes = route.nodes.clone();
            match self.polish(&mut nodes) {
                Some(repair) => {
                    total += repair.distance;
                    routes.push(Some(nodes));
                }
                None => {
                    total += self.config.infeasible_penalty;
                    routes.push(None);
                }
            }
        }
        individual.lower_cost = Some(total);
        (total, routes)
    }
}

/// Per-slot lower costs kept in step with a [`crate::heuristics::Leader`]
#[derive(Debug, Clone, Default)]
pub struct LowerCostCache {
    costs: Vec<f64>,
}

impl LowerCostCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rebuild(&mut self, follower: &mut Follower, routes: &[Route]) {
        self.costs.clear();
        self.costs.extend(routes.iter().map(|r| follower.lower_cost_of(r)));
    }

    /// Replay the compactions of one move, then re-repair the touched slots
    pub fn update(&mut self, follower: &mut Follower, routes: &[Route], partial: &PartialSolution) {
        self.costs.resize(partial.num_routes() + partial.removals().len(), f64::NAN);
        for removal in partial.removals() {
            self.costs.swap_remove(removal.slot);
        }
        debug_assert_eq!(self.costs.len(), routes.len());
        for touched in partial.touched() {
            self.costs[touched.slot] = follower.lower_cost_of(&routes[touched.slot]);
        }
    }

    pub fn total(&self) -> f64 {
        self.costs.iter().sum()
    }

    pub fn costs(&self) -> &[f64] {
        &self.costs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::acceptance::Acceptance;
    use crate::heuristics::local_search::{Leader, LeaderConfig};
    use crate::instance::{fixtures, EvrpInstance};
    use crate::preprocessing::PreprocessConfig;
    use crate::split::{SplitConfig, Splitter};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn prep_of(instance: EvrpInstance) -> Preprocessed {
        Preprocessed::new(instance, PreprocessConfig::default())
    }

    fn customers_of(prep: &Preprocessed, route: &[usize]) -> Vec<usize> {
        route.iter().copied().filter(|&n| prep.instance.is_customer(n)).collect()
    }

    #[test]
    fn test_route_within_range() {
        let prep = prep_of(fixtures::line(3, 30));
        let mut follower = Follower::new(&prep, FollowerConfig::default());
        let mut route = vec![0, 1, 2, 3, 0];

        let repair = follower.repair(&mut route).unwrap();
        assert_eq!(repair.stations, 0);
        assert_eq!(repair.extra, 0.0);
        assert!((repair.distance - 6.0).abs() < 1e-12);
        assert_eq!(route, vec![0, 1, 2, 3, 0]);
    }

    #[test]
    fn test_station_on_the_way() {
        // The station sits on the segment between the two customers.
        let customers = [(60.0, 0.0, 1), (60.0, 10.0, 1)];
        let prep = prep_of(EvrpInstance::new("detour", (0.0, 0.0), &customers, &[(60.0, 5.0)], 10, 100.0, 1.0, 1));
        let mut follower = Follower::new(&prep, FollowerConfig::default());
        let mut route = vec![0, 1, 2, 0];

        let repair = follower.repair(&mut route).unwrap();
        assert_eq!(route, vec![0, 1, 3, 2, 0]);
        assert_eq!(repair.stations, 1);
        assert!(repair.extra.abs() < 1e-9);
        assert!(follower.is_range_feasible(&route));
    }

    #[test]
    fn test_exhausted_budget_is_counted() {
        let customers = [(60.0, 0.0, 1), (60.0, 10.0, 1)];
        let prep = prep_of(EvrpInstance::new("detour", (0.0, 0.0), &customers, &[(60.0, 5.0)], 10, 100.0, 1.0, 1));

        let mut follower = Follower::new(&prep, FollowerConfig::default());
        follower.repair(&mut vec![0, 1, 2, 0]).unwrap();
        assert_eq!(follower.truncated(), 0);

        let config = FollowerConfig { search_budget: 0, ..FollowerConfig::default() };
        let mut starved = Follower::new(&prep, config);
        let mut route = vec![0, 1, 2, 0];
        if starved.repair(&mut route).is_some() {
            assert!(starved.is_range_feasible(&route));
            assert_eq!(customers_of(&prep, &route), vec![1, 2]);
        }
        assert!(starved.truncated() >= 1);
    }

    #[test]
    fn test_remove_based_fallback() {
        // One customer 150 away, a station 100 away: it must be visited twice,
        // more stations than arcs at the estimated count.
        let prep = prep_of(EvrpInstance::new("far", (0.0, 0.0), &[(150.0, 0.0, 1)], &[(100.0, 0.0)], 10, 100.0, 1.0, 1));
        let mut follower = Follower::new(&prep, FollowerConfig::default());
        let mut route = vec![0, 1, 0];

        let repair = follower.repair(&mut route).unwrap();
        assert_eq!(route, vec![0, 2, 1, 2, 0]);
        assert_eq!(repair.stations, 2);
        assert!((repair.distance - 300.0).abs() < 1e-9);
        assert!(follower.is_range_feasible(&route));
    }

    #[test]
    fn test_unreachable_customer() {
        let prep = prep_of(EvrpInstance::new("too-far", (0.0, 0.0), &[(200.0, 0.0, 1)], &[(100.0, 0.0)], 10, 100.0, 1.0, 1));
        let mut follower = Follower::new(&prep, FollowerConfig::default());
        let mut route = vec![0, 1, 0];

        assert!(follower.repair(&mut route).is_none());
        assert_eq!(route, vec![0, 1, 0]);

        let mut ind = Individual::from_customer_routes(&prep, &[vec![1]]);
        let lower = follower.run_on_individual(&mut ind);
        assert_eq!(lower, FollowerConfig::default().infeasible_penalty);
        assert_eq!(ind.lower_cost, Some(lower));
    }

    #[test]
    fn test_repair_is_sound_on_benchmark_routes() {
        let prep = prep_of(fixtures::e_n22_k4());
        let tour: Vec<usize> = prep.instance.customers().collect();
        let ind = Splitter::new(&prep, SplitConfig::default()).split(&tour, 4).unwrap();
        let mut follower = Follower::new(&prep, FollowerConfig::default());

        let mut repaired = 0;
        for route in &ind.routes {
            let mut nodes = route.nodes.clone();
            if let Some(repair) = follower.repair(&mut nodes) {
                repaired += 1;
                assert!(nodes[0] == 0 && nodes[nodes.len() - 1] == 0);
                assert!(follower.is_range_feasible(&nodes));
                assert_eq!(customers_of(&prep, &nodes), route.customers());
                assert!((prep.instance.route_distance(&nodes) - repair.distance).abs() < 1e-6);
                assert!(repair.distance >= route.distance - 1e-9);

                // repairing again is stable
                let again = follower.repair(&mut nodes).unwrap();
                assert!((again.distance - repair.distance).abs() < 1e-6);

                let mut polished = route.nodes.clone();
                let polish = follower.polish(&mut polished).unwrap();
                assert!(polish.distance <= repair.distance + 1e-6);
                assert!(follower.is_range_feasible(&polished));
                assert_eq!(customers_of(&prep, &polished), route.customers());
            }
        }
        assert!(repaired > 0);
    }

    #[test]
    fn test_lower_cost_is_at_least_distance() {
        let prep = prep_of(fixtures::e_n22_k4());
        let tour: Vec<usize> = prep.instance.customers().collect();
        let mut ind = Splitter::new(&prep, SplitConfig::default()).split(&tour, 4).unwrap();
        let mut follower = Follower::new(&prep, FollowerConfig::default());

        let lower = follower.run_on_individual(&mut ind);
        assert!(lower >= ind.distance() - 1e-9);
        assert_eq!(ind.lower_cost, Some(lower));

        let charged = follower.charged_routes(&ind);
        assert_eq!(charged.len(), ind.num_routes());
        let (polished, routes) = follower.polish_individual(&mut ind);
        assert!(polished <= lower + 1e-6);
        assert_eq!(routes.len(), ind.num_routes());
    }

    #[test]
    fn test_cache_follows_leader_moves() {
        let prep = prep_of(fixtures::e_n22_k4());
        let tour: Vec<usize> = prep.instance.customers().collect();
        let start = Splitter::new(&prep, SplitConfig::default()).split(&tour, 4).unwrap();
        let mut leader = Leader::new(&prep, LeaderConfig::default());
        leader.load_from(&start);
        let mut follower = Follower::new(&prep, FollowerConfig::default());
        let mut cache = LowerCostCache::new();
        cache.rebuild(&mut follower, leader.routes());

        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let policy = Acceptance::Annealing { temperature: 20.0 };
        let mut partial = PartialSolution::new();
        for _ in 0..150 {
            partial.clear();
            if leader.explore_one_random_move(&policy, &mut rng, Some(&mut partial)) {
                cache.update(&mut follower, leader.routes(), &partial);
            }
        }

        let mut ind = Individual::new();
        leader.export_to(&mut ind);
        let full = follower.run_on_individual(&mut ind);
        assert_eq!(cache.costs().len(), leader.num_routes());
        assert!((cache.total() - full).abs() < 1e-6);
    }

    #[test]
    fn test_strip_removes_previous_stations() {
        let prep = prep_of(fixtures::e_n22_k4());
        let follower = Follower::new(&prep, FollowerConfig::default());
        let mut route = vec![0, 3, 23, 5, 0, 7, 0];
        follower.strip(&mut route);
        assert_eq!(route, vec![0, 3, 5, 7, 0]);
    }
}
