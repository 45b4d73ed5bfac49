//! Route-array local search (the leader level).
//!
//! The [`Leader`] holds the routes of one solution and improves them with the
//! move catalogue of [`crate::heuristics::moves`]. Three strategies share the
//! same catalogue:
//! - exhaustive descent to a local optimum, scanning every candidate of one
//!   move kind with a best- or first-improvement rule
//! - randomized single-move exploration under an [`Acceptance`] policy
//! - perturbation with unconditional random moves
//!
//! Inter-route kinds are scanned through a watch list of route pairs: after a
//! move on `(a, b)` every pair involving `a` or `b` is queued again.
//! A route emptied by a move is removed by moving the last route into its slot.

use crate::heuristics::acceptance::{Acceptance, EPSILON};
use crate::heuristics::moves::{LoadRule, Move, MoveKind, RoutePrefix};
use crate::preprocessing::Preprocessed;
use crate::solution::{Individual, PartialSolution, Removal, Route, TouchedRoute};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Candidate selection during a descent scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImprovementRule {
    /// Apply the best improving candidate of a scan
    Best,
    /// Apply the first improving candidate found
    First,
}

/// Leader parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderConfig {
    pub improvement_rule: ImprovementRule,
    /// Let moves raise a load above capacity, up to `overload_ratio × capacity`
    pub allow_overload: bool,
    pub overload_ratio: f64,
    /// Enable the moves opening a new route
    pub empty_route_moves: bool,
    /// Filter inter-route candidates with the granular lists
    pub granular: bool,
    /// Random retries per call of the randomized strategies
    pub max_search_depth: usize,
    /// Move kinds in scan order
    pub moves: Vec<MoveKind>,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        LeaderConfig {
            improvement_rule: ImprovementRule::Best,
            allow_overload: false,
            overload_ratio: 1.5,
            empty_route_moves: true,
            granular: true,
            max_search_depth: 100,
            moves: MoveKind::ALL.to_vec(),
        }
    }
}

/// Best (or first) improving candidate of a scan
struct Candidate {
    rule: ImprovementRule,
    best: Option<(Move, f64)>,
}

impl Candidate {
    fn new(rule: ImprovementRule) -> Self {
        Candidate { rule, best: None }
    }

    /// Returns true once the scan can stop
    fn offer(&mut self, mv: Move, delta: f64) -> bool {
        if delta < -EPSILON && self.best.map_or(true, |(_, best)| delta < best) {
            self.best = Some((mv, delta));
        }
        self.rule == ImprovementRule::First && self.best.is_some()
    }
}

pub struct Leader<'a> {
    prep: &'a Preprocessed,
    config: LeaderConfig,
    rule: LoadRule,
    routes: Vec<Route>,
    cost: f64,
    route_cap: usize,
    buffer: Vec<usize>,
    watchlist: VecDeque<(usize, usize)>,
    queued: Vec<bool>,
    touched: Vec<TouchedRoute>,
    removals: Vec<Removal>,
    dirty: Vec<usize>,
}

impl<'a> Leader<'a> {
    pub fn new(prep: &'a Preprocessed, config: LeaderConfig) -> Self {
        let rule = LoadRule::new(prep.capacity, config.allow_overload, config.overload_ratio);
        Leader {
            prep,
            rule,
            routes: Vec::with_capacity(prep.route_cap),
            cost: 0.0,
            route_cap: prep.route_cap,
            buffer: Vec::with_capacity(prep.node_cap),
            watchlist: VecDeque::new(),
            queued: Vec::new(),
            touched: Vec::with_capacity(2),
            removals: Vec::with_capacity(2),
            dirty: Vec::with_capacity(4),
            config,
        }
    }

    /// Copy the non-empty routes of an individual
    pub fn load_from(&mut self, individual: &Individual) {
        self.routes.clear();
        self.routes.extend(individual.routes.iter().filter(|r| !r.is_empty()).cloned());
        if self.routes.len() > self.prep.route_cap {
            log::warn!(
                "Loaded {} routes, above the route cap of {}",
                self.routes.len(),
                self.prep.route_cap
            );
        }
        self.route_cap = self.prep.route_cap.max(self.routes.len());
        self.recompute_cost();
    }

    /// Write the routes back; the lower cost of the individual becomes stale.
    pub fn export_to(&self, individual: &mut Individual) {
        individual.routes.clear();
        individual.routes.extend(self.routes.iter().cloned());
        individual.upper_cost = self.cost;
        individual.lower_cost = None;
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn num_routes(&self) -> usize {
        self.routes.len()
    }

    pub fn config(&self) -> &LeaderConfig {
        &self.config
    }

    /// Reset the running cost from the route arrays
    pub fn recompute_cost(&mut self) -> f64 {
        self.cost = self.routes.iter().map(|r| r.cost(self.prep)).sum();
        self.cost
    }

    fn can_open_route(&self) -> bool {
        self.config.empty_route_moves && self.routes.len() < self.route_cap
    }

    /// Delta of a move under the configured load rule and route cap
    pub fn evaluate(&self, mv: &Move) -> Option<f64> {
        if mv.kind().uses_empty_route() && !self.can_open_route() {
            return None;
        }
        mv.evaluate(self.prep, &self.routes, self.rule)
    }

    /// Apply a move regardless of its delta. Returns the delta, or `None`
    /// when the move is invalid or excluded.
    pub fn apply_move(&mut self, mv: &Move, partial: Option<&mut PartialSolution>) -> Option<f64> {
        let delta = self.evaluate(mv)?;
        self.commit(mv, delta);
        if let Some(partial) = partial {
            partial.record(&self.touched, &self.removals, self.routes.len());
        }
        Some(delta)
    }

    fn commit(&mut self, mv: &Move, delta: f64) {
        let (first, second) = mv.apply(self.prep, &mut self.routes, &mut self.buffer);

        self.touched.clear();
        self.removals.clear();
        for slot in std::iter::once(first).chain(second) {
            let route = &mut self.routes[slot];
            route.refresh(self.prep);
            debug_assert!(route.len() <= self.prep.node_cap);
            self.touched.push(TouchedRoute { slot, len: route.len() });
        }
        self.cost += delta;
        self.compact();

        debug_assert!(self.routes.len() <= self.route_cap);
        debug_assert!(costs_agree(self.cost, self.routes.iter().map(|r| r.cost(self.prep)).sum()));
    }

    /// Remove emptied touched routes, highest slot first
    fn compact(&mut self) {
        self.touched.sort_by(|a, b| b.slot.cmp(&a.slot));
        let mut i = 0;
        while i < self.touched.len() {
            let slot = self.touched[i].slot;
            if !self.routes[slot].is_empty() {
                i += 1;
                continue;
            }
            let last = self.routes.len() - 1;
            self.routes.swap_remove(slot);
            self.touched.remove(i);
            let moved_from = (slot != last).then_some(last);
            if let Some(from) = moved_from {
                for t in self.touched.iter_mut().filter(|t| t.slot == from) {
                    t.slot = slot;
                }
            }
            self.removals.push(Removal { slot, moved_from });
        }
    }

    // ==================== Exhaustive descent ====================

    /// Descend to a local optimum of every configured move kind.
    /// Returns the number of moves applied.
    pub fn local_search_to_optimum(&mut self) -> usize {
        let kinds = self.config.moves.clone();
        let mut applied = 0;
        loop {
            let mut improved = false;
            for &kind in &kinds {
                let mut count = 0;
                if kind.has_intra() {
                    count += self.descend_routes(kind);
                }
                if kind.has_inter() {
                    count += self.descend_pairs(kind);
                }
                if count > 0 {
                    log::trace!("{}: {} moves, cost {:.4}", kind, count, self.cost);
                    improved = true;
                    applied += count;
                }
            }
            if !improved {
                break;
            }
        }
        applied
    }

    fn descend_routes(&mut self, kind: MoveKind) -> usize {
        let mut applied = 0;
        let mut r = 0;
        while r < self.routes.len() {
            let mut candidate = Candidate::new(self.config.improvement_rule);
            self.scan_route(kind, r, &mut candidate);
            match candidate.best {
                Some((mv, delta)) => {
                    self.commit(&mv, delta);
                    applied += 1;
                }
                None => r += 1,
            }
        }
        applied
    }

    fn descend_pairs(&mut self, kind: MoveKind) -> usize {
        let n = self.routes.len();
        if n < 2 {
            return 0;
        }
        self.watchlist.clear();
        self.queued.clear();
        self.queued.resize(self.route_cap * self.route_cap, false);
        for a in 0..n {
            for b in a + 1..n {
                self.enqueue(a, b);
            }
        }

        let mut applied = 0;
        while let Some((a, b)) = self.watchlist.pop_front() {
            self.queued[a * self.route_cap + b] = false;
            if b >= self.routes.len() {
                continue;
            }
            let mut candidate = Candidate::new(self.config.improvement_rule);
            self.scan_pair(kind, a, b, &mut candidate);
            let Some((mv, delta)) = candidate.best else {
                continue;
            };
            self.commit(&mv, delta);
            applied += 1;

            self.dirty.clear();
            self.dirty.extend([a, b]);
            self.dirty.extend(self.removals.iter().map(|r| r.slot));
            let n = self.routes.len();
            for i in 0..self.dirty.len() {
                let slot = self.dirty[i];
                if slot >= n {
                    continue;
                }
                for other in (0..n).filter(|&o| o != slot) {
                    self.enqueue(slot.min(other), slot.max(other));
                }
            }
        }
        applied
    }

    fn enqueue(&mut self, a: usize, b: usize) {
        let key = a * self.route_cap + b;
        if !self.queued[key] {
            self.queued[key] = true;
            self.watchlist.push_back((a, b));
        }
    }

    /// Evaluate and offer one candidate; true once the scan can stop
    fn consider(&self, mv: Move, candidate: &mut Candidate) -> bool {
        if self.config.granular && !mv.is_granular(self.prep, &self.routes) {
            return false;
        }
        match self.evaluate(&mv) {
            Some(delta) => candidate.offer(mv, delta),
            None => false,
        }
    }

    fn consider_with_prefixes(
        &self,
        mv: Move,
        prefix_a: &RoutePrefix,
        prefix_b: &RoutePrefix,
        candidate: &mut Candidate,
    ) -> bool {
        if self.config.granular && !mv.is_granular(self.prep, &self.routes) {
            return false;
        }
        match mv.evaluate_with_prefixes(self.prep, &self.routes, self.rule, prefix_a, prefix_b) {
            Some(delta) => candidate.offer(mv, delta),
            None => false,
        }
    }

    fn scan_route(&self, kind: MoveKind, r: usize, candidate: &mut Candidate) {
        let len = self.routes[r].len();
        match kind {
            MoveKind::Relocate1 | MoveKind::Relocate2 => {
                let seg = kind.segment_len();
                for from in 1..len.saturating_sub(seg) {
                    for after in 0..len - 1 {
                        let mv = Move::Relocate { len: seg, from_route: r, from, to_route: r, after };
                        if self.consider(mv, candidate) {
                            return;
                        }
                    }
                }
            }
            MoveKind::Swap1 | MoveKind::Swap2 => {
                let seg = kind.segment_len();
                for first in 1..len.saturating_sub(seg) {
                    for second in first + seg..len.saturating_sub(seg) {
                        let mv = Move::Swap { len: seg, route_a: r, first, route_b: r, second };
                        if self.consider(mv, candidate) {
                            return;
                        }
                    }
                }
            }
            MoveKind::TwoOpt => {
                for i in 0..len.saturating_sub(3) {
                    for j in i + 2..len - 1 {
                        if self.consider(Move::TwoOpt { route: r, i, j }, candidate) {
                            return;
                        }
                    }
                }
            }
            MoveKind::RelocateToEmpty => {
                if !self.can_open_route() {
                    return;
                }
                for pos in 1..len - 1 {
                    if self.consider(Move::RelocateToEmpty { route: r, pos }, candidate) {
                        return;
                    }
                }
            }
            MoveKind::SplitRoute => {
                if !self.can_open_route() {
                    return;
                }
                for pos in 1..len.saturating_sub(2) {
                    if self.consider(Move::SplitRoute { route: r, pos }, candidate) {
                        return;
                    }
                }
            }
            MoveKind::TwoOptStar | MoveKind::TwoOptStarReversed => {}
        }
    }

    fn scan_pair(&self, kind: MoveKind, a: usize, b: usize, candidate: &mut Candidate) {
        let (len_a, len_b) = (self.routes[a].len(), self.routes[b].len());
        match kind {
            MoveKind::Relocate1 | MoveKind::Relocate2 => {
                let seg = kind.segment_len();
                for (src, dst, len_src, len_dst) in [(a, b, len_a, len_b), (b, a, len_b, len_a)] {
                    for from in 1..len_src.saturating_sub(seg) {
                        for after in 0..len_dst - 1 {
                            let mv = Move::Relocate { len: seg, from_route: src, from, to_route: dst, after };
                            if self.consider(mv, candidate) {
                                return;
                            }
                        }
                    }
                }
            }
            MoveKind::Swap1 | MoveKind::Swap2 => {
                let seg = kind.segment_len();
                for first in 1..len_a.saturating_sub(seg) {
                    for second in 1..len_b.saturating_sub(seg) {
                        let mv = Move::Swap { len: seg, route_a: a, first, route_b: b, second };
                        if self.consider(mv, candidate) {
                            return;
                        }
                    }
                }
            }
            MoveKind::TwoOptStar | MoveKind::TwoOptStarReversed => {
                let reversed = kind == MoveKind::TwoOptStarReversed;
                let prefix_a = RoutePrefix::new(self.prep, &self.routes[a]);
                let prefix_b = RoutePrefix::new(self.prep, &self.routes[b]);
                for p1 in 0..len_a - 1 {
                    for p2 in 0..len_b - 1 {
                        let mv = Move::TwoOptStar { route_a: a, p1, route_b: b, p2, reversed };
                        if self.consider_with_prefixes(mv, &prefix_a, &prefix_b, candidate) {
                            return;
                        }
                    }
                }
            }
            MoveKind::TwoOpt | MoveKind::RelocateToEmpty | MoveKind::SplitRoute => {}
        }
    }

    // ==================== Randomized strategies ====================

    /// Draw uniform positions for one move of the given kind
    pub fn random_move<R: Rng + ?Sized>(&self, kind: MoveKind, rng: &mut R) -> Option<Move> {
        let n = self.routes.len();
        if n == 0 {
            return None;
        }
        match kind {
            MoveKind::Relocate1 | MoveKind::Relocate2 => {
                let seg = kind.segment_len();
                let from_route = rng.gen_range(0..n);
                let src = &self.routes[from_route];
                if src.num_customers() < seg {
                    return None;
                }
                let from = rng.gen_range(1..src.len() - seg);
                let to_route = rng.gen_range(0..n);
                let after = rng.gen_range(0..self.routes[to_route].len() - 1);
                Some(Move::Relocate { len: seg, from_route, from, to_route, after })
            }
            MoveKind::Swap1 | MoveKind::Swap2 => {
                let seg = kind.segment_len();
                let (route_a, route_b) = (rng.gen_range(0..n), rng.gen_range(0..n));
                let (ra, rb) = (&self.routes[route_a], &self.routes[route_b]);
                if ra.num_customers() < seg || rb.num_customers() < seg {
                    return None;
                }
                let first = rng.gen_range(1..ra.len() - seg);
                let second = rng.gen_range(1..rb.len() - seg);
                Some(Move::Swap { len: seg, route_a, first, route_b, second })
            }
            MoveKind::TwoOpt => {
                let route = rng.gen_range(0..n);
                let len = self.routes[route].len();
                if len < 4 {
                    return None;
                }
                let i = rng.gen_range(0..len - 3);
                let j = rng.gen_range(i + 2..len - 1);
                Some(Move::TwoOpt { route, i, j })
            }
            MoveKind::TwoOptStar | MoveKind::TwoOptStarReversed => {
                if n < 2 {
                    return None;
                }
                let route_a = rng.gen_range(0..n);
                let mut route_b = rng.gen_range(0..n - 1);
                if route_b >= route_a {
                    route_b += 1;
                }
                let p1 = rng.gen_range(0..self.routes[route_a].len() - 1);
                let p2 = rng.gen_range(0..self.routes[route_b].len() - 1);
                let reversed = kind == MoveKind::TwoOptStarReversed;
                Some(Move::TwoOptStar { route_a, p1, route_b, p2, reversed })
            }
            MoveKind::RelocateToEmpty => {
                let route = rng.gen_range(0..n);
                let len = self.routes[route].len();
                if len < 4 {
                    return None;
                }
                Some(Move::RelocateToEmpty { route, pos: rng.gen_range(1..len - 1) })
            }
            MoveKind::SplitRoute => {
                let route = rng.gen_range(0..n);
                let len = self.routes[route].len();
                if len < 4 {
                    return None;
                }
                Some(Move::SplitRoute { route, pos: rng.gen_range(1..len - 2) })
            }
        }
    }

    /// Try random moves until one passes the acceptance policy, at most
    /// `max_search_depth` times. The accepted move is recorded in `partial`.
    pub fn explore_one_random_move<R: Rng + ?Sized>(
        &mut self,
        acceptance: &Acceptance,
        rng: &mut R,
        partial: Option<&mut PartialSolution>,
    ) -> bool {
        for _ in 0..self.config.max_search_depth {
            let Some(&kind) = self.config.moves.choose(rng) else {
                return false;
            };
            let Some(mv) = self.random_move(kind, rng) else {
                continue;
            };
            let Some(delta) = self.evaluate(&mv) else {
                continue;
            };
            if acceptance.accepts(self.cost, delta, rng) {
                self.commit(&mv, delta);
                if let Some(partial) = partial {
                    partial.record(&self.touched, &self.removals, self.routes.len());
                }
                return true;
            }
        }
        false
    }

    /// Apply `strength` random valid moves without acceptance test.
    /// Returns the number of moves applied.
    pub fn perturb<R: Rng + ?Sized>(&mut self, strength: usize, rng: &mut R) -> usize {
        let mut applied = 0;
        for _ in 0..strength {
            for _ in 0..self.config.max_search_depth {
                let Some(&kind) = self.config.moves.choose(rng) else {
                    return applied;
                };
                if let Some(mv) = self.random_move(kind, rng) {
                    if let Some(delta) = self.evaluate(&mv) {
                        self.commit(&mv, delta);
                        applied += 1;
                        break;
                    }
                }
            }
        }
        applied
    }
}

/// Running cost and a full recomputation agree up to rounding relative to
/// the cost magnitude
fn costs_agree(running: f64, exact: f64) -> bool {
    (running - exact).abs() <= 1e-6 * exact.abs().max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::fixtures;
    use crate::preprocessing::PreprocessConfig;
    use crate::split::{SplitConfig, Splitter};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn prep() -> Preprocessed {
        Preprocessed::new(fixtures::e_n22_k4(), PreprocessConfig::default())
    }

    fn shuffled_start(prep: &Preprocessed, seed: u64) -> Individual {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut tour: Vec<usize> = prep.instance.customers().collect();
        tour.shuffle(&mut rng);
        Splitter::new(prep, SplitConfig::default()).split(&tour, prep.instance.vehicles).unwrap()
    }

    fn assert_consistent(prep: &Preprocessed, leader: &Leader) {
        for route in leader.routes() {
            assert!(route.is_consistent(prep));
            assert!(!route.is_empty());
        }
        let recomputed: f64 = leader.routes().iter().map(|r| r.cost(prep)).sum();
        assert!((leader.cost() - recomputed).abs() < 1e-6);
        let mut ind = Individual::new();
        leader.export_to(&mut ind);
        assert!(ind.is_complete(prep));
    }

    #[test]
    fn test_descent_reaches_local_optimum() {
        let prep = prep();
        let start = shuffled_start(&prep, 3);
        let mut leader = Leader::new(&prep, LeaderConfig::default());
        leader.load_from(&start);
        let initial = leader.cost();

        let applied = leader.local_search_to_optimum();
        assert!(applied > 0);
        assert!(leader.cost() < initial);
        assert_consistent(&prep, &leader);

        // a second descent finds nothing
        let cost = leader.cost();
        assert_eq!(leader.local_search_to_optimum(), 0);
        assert_eq!(leader.cost(), cost);
    }

    #[test]
    fn test_first_improvement_descent() {
        let prep = prep();
        let start = shuffled_start(&prep, 11);
        let config = LeaderConfig { improvement_rule: ImprovementRule::First, granular: false, ..Default::default() };
        let mut leader = Leader::new(&prep, config);
        leader.load_from(&start);

        leader.local_search_to_optimum();
        assert_consistent(&prep, &leader);
        assert!(leader.cost() <= start.upper_cost);
        assert_eq!(leader.local_search_to_optimum(), 0);
    }

    #[test]
    fn test_strict_capacity_is_preserved() {
        let prep = prep();
        let start = shuffled_start(&prep, 5);
        let mut leader = Leader::new(&prep, LeaderConfig::default());
        leader.load_from(&start);
        let initial_excess: Vec<i32> = leader.routes().iter().map(|r| (r.load - prep.capacity).max(0)).collect();

        leader.local_search_to_optimum();
        let excess: i32 = leader.routes().iter().map(|r| (r.load - prep.capacity).max(0)).sum();
        assert!(excess <= initial_excess.iter().sum());
    }

    #[test]
    fn test_empty_route_pruning() {
        let prep = Preprocessed::new(fixtures::line(6, 10), PreprocessConfig::default());
        let start = Individual::from_customer_routes(&prep, &[vec![1, 2], vec![3], vec![4, 5, 6]]);
        let mut leader = Leader::new(&prep, LeaderConfig::default());
        leader.load_from(&start);

        let mut partial = PartialSolution::new();
        let mv = Move::Relocate { len: 1, from_route: 1, from: 1, to_route: 0, after: 2 };
        assert!(leader.apply_move(&mv, Some(&mut partial)).is_some());

        assert_eq!(leader.num_routes(), 2);
        assert_eq!(leader.routes()[0].customers(), &[1, 2, 3]);
        assert_eq!(leader.routes()[1].customers(), &[4, 5, 6]);
        assert_eq!(partial.removals(), &[Removal { slot: 1, moved_from: Some(2) }]);
        assert_eq!(partial.touched(), &[TouchedRoute { slot: 0, len: 5 }]);
        assert_eq!(partial.num_routes(), 2);
        assert_consistent(&prep, &leader);
    }

    #[test]
    fn test_removal_of_last_slot() {
        let prep = Preprocessed::new(fixtures::line(6, 10), PreprocessConfig::default());
        let start = Individual::from_customer_routes(&prep, &[vec![1, 2], vec![3, 4], vec![5]]);
        let mut leader = Leader::new(&prep, LeaderConfig::default());
        leader.load_from(&start);

        let mut partial = PartialSolution::new();
        let mv = Move::Relocate { len: 1, from_route: 2, from: 1, to_route: 1, after: 2 };
        leader.apply_move(&mv, Some(&mut partial));

        assert_eq!(leader.num_routes(), 2);
        assert_eq!(partial.removals(), &[Removal { slot: 2, moved_from: None }]);
        assert_eq!(partial.touched(), &[TouchedRoute { slot: 1, len: 5 }]);
    }

    #[test]
    fn test_random_exploration_with_improvement_policy() {
        let prep = prep();
        let start = shuffled_start(&prep, 8);
        let mut leader = Leader::new(&prep, LeaderConfig::default());
        leader.load_from(&start);
        let mut rng = ChaCha8Rng::seed_from_u64(8);

        let mut accepted = 0;
        for _ in 0..500 {
            let before = leader.cost();
            if leader.explore_one_random_move(&Acceptance::Improvement, &mut rng, None) {
                assert!(leader.cost() < before);
                accepted += 1;
            }
        }
        assert!(accepted > 0);
        assert_consistent(&prep, &leader);
    }

    #[test]
    fn test_cost_tolerance_scales_with_magnitude() {
        assert!(costs_agree(2.5e7, 2.5e7 + 1.0));
        assert!(costs_agree(0.0, 1e-7));
        assert!(!costs_agree(100.0, 101.0));
        assert!(!costs_agree(2.5e7, 2.5e7 + 100.0));
    }

    #[test]
    fn test_long_overloaded_walk_keeps_its_running_cost() {
        let prep = prep();
        let start = shuffled_start(&prep, 13);
        let config = LeaderConfig { allow_overload: true, overload_ratio: 3.0, ..LeaderConfig::default() };
        let mut leader = Leader::new(&prep, config);
        leader.load_from(&start);
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let annealing = Acceptance::Annealing { temperature: 1e4 };

        let mut accepted = 0;
        for _ in 0..5_000 {
            if leader.explore_one_random_move(&annealing, &mut rng, None) {
                accepted += 1;
            }
        }
        assert!(accepted > 0);
        let running = leader.cost();
        let exact = leader.recompute_cost();
        assert!(costs_agree(running, exact), "{} vs {}", running, exact);
        assert_consistent(&prep, &leader);
    }

    #[test]
    fn test_border_walk_stays_under_border() {
        let prep = prep();
        let start = shuffled_start(&prep, 21);
        let mut leader = Leader::new(&prep, LeaderConfig::default());
        leader.load_from(&start);
        leader.local_search_to_optimum();
        let border = leader.cost() * 1.10;
        let mut rng = ChaCha8Rng::seed_from_u64(21);

        for _ in 0..300 {
            leader.explore_one_random_move(&Acceptance::Border { border }, &mut rng, None);
            assert!(leader.cost() < border + 1e-6);
        }
        assert_consistent(&prep, &leader);
    }

    #[test]
    fn test_partial_solution_tracks_random_moves() {
        let prep = prep();
        let start = shuffled_start(&prep, 4);
        let mut leader = Leader::new(&prep, LeaderConfig::default());
        leader.load_from(&start);
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let annealing = Acceptance::Annealing { temperature: 50.0 };

        let mut partial = PartialSolution::new();
        for _ in 0..200 {
            partial.clear();
            if leader.explore_one_random_move(&annealing, &mut rng, Some(&mut partial)) {
                assert!(!partial.touched().is_empty());
                assert_eq!(partial.num_routes(), leader.num_routes());
                for t in partial.touched() {
                    assert_eq!(leader.routes()[t.slot].len(), t.len);
                }
            } else {
                assert!(partial.is_empty());
            }
        }
        assert_consistent(&prep, &leader);
    }

    #[test]
    fn test_perturb_keeps_solution_valid() {
        let prep = prep();
        let start = shuffled_start(&prep, 9);
        let config = LeaderConfig { allow_overload: true, ..Default::default() };
        let mut leader = Leader::new(&prep, config);
        leader.load_from(&start);
        let mut rng = ChaCha8Rng::seed_from_u64(9);

        for _ in 0..20 {
            let applied = leader.perturb(10, &mut rng);
            assert!(applied > 0);
            assert!(leader.num_routes() <= prep.route_cap);
            assert_consistent(&prep, &leader);
        }
    }

    #[test]
    fn test_export_invalidates_lower_cost() {
        let prep = prep();
        let mut ind = shuffled_start(&prep, 1);
        ind.lower_cost = Some(1234.0);

        let mut leader = Leader::new(&prep, LeaderConfig::default());
        leader.load_from(&ind);
        leader.local_search_to_optimum();
        leader.export_to(&mut ind);

        assert!(ind.lower_cost.is_none());
        assert!((ind.upper_cost - ind.recompute_upper_cost(&prep)).abs() < 1e-6);
    }

    #[test]
    fn test_empty_route_moves_respect_route_cap() {
        let config = PreprocessConfig { route_cap_factor: 1, ..Default::default() };
        let prep = Preprocessed::new(fixtures::line(4, 10), config);
        assert_eq!(prep.route_cap, 1);
        let start = Individual::from_customer_routes(&prep, &[vec![1, 2, 3, 4]]);
        let mut leader = Leader::new(&prep, LeaderConfig::default());
        leader.load_from(&start);

        assert!(leader.evaluate(&Move::SplitRoute { route: 0, pos: 2 }).is_none());
        assert!(leader.evaluate(&Move::RelocateToEmpty { route: 0, pos: 1 }).is_none());
    }
}
