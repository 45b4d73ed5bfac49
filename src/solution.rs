//! Solution representation and manipulation for the EVRP.
//!
//! A solution is a set of routes, each an explicit node array bookended by
//! the depot, carrying its load and distance. Route identity is a slot index:
//! removing an empty route moves the last route into its slot.

use crate::instance::DEPOT;
use crate::preprocessing::Preprocessed;
use serde::{Deserialize, Serialize};

/// One vehicle route `[0, c1, ..., cm, 0]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub nodes: Vec<usize>,
    /// Sum of the customer demands on the route
    pub load: i32,
    /// Sum of the arc distances on the route
    pub distance: f64,
}

impl Route {
    /// An empty route `[0, 0]` with room for `node_cap` nodes
    pub fn empty(node_cap: usize) -> Self {
        let mut nodes = Vec::with_capacity(node_cap.max(2));
        nodes.push(DEPOT);
        nodes.push(DEPOT);
        Route { nodes, load: 0, distance: 0.0 }
    }

    pub fn from_customers(prep: &Preprocessed, customers: &[usize]) -> Self {
        let mut route = Route::empty(prep.node_cap);
        route.nodes.splice(1..1, customers.iter().copied());
        route.refresh(prep);
        route
    }

    /// Number of nodes, depots included
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A route without customers
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 2
    }

    #[inline]
    pub fn customers(&self) -> &[usize] {
        &self.nodes[1..self.nodes.len() - 1]
    }

    #[inline]
    pub fn num_customers(&self) -> usize {
        self.nodes.len() - 2
    }

    /// Recompute load and distance from the node array
    pub fn refresh(&mut self, prep: &Preprocessed) {
        self.load = self.nodes.iter().map(|&n| prep.demand(n)).sum();
        self.distance = prep.instance.route_distance(&self.nodes);
    }

    /// Upper-level cost: distance plus penalties
    #[inline]
    pub fn cost(&self, prep: &Preprocessed) -> f64 {
        prep.route_cost(self.distance, self.load, self.num_customers())
    }

    /// Depot bookends present and cached load/distance matching the nodes
    pub fn is_consistent(&self, prep: &Preprocessed) -> bool {
        self.nodes.len() >= 2
            && self.nodes[0] == DEPOT
            && self.nodes[self.nodes.len() - 1] == DEPOT
            && self.load == self.nodes.iter().map(|&n| prep.demand(n)).sum::<i32>()
            && (self.distance - prep.instance.route_distance(&self.nodes)).abs() < 1e-6
    }
}

/// Encoded candidate solution with its two cost levels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Individual {
    pub routes: Vec<Route>,
    /// Distance plus capacity/duration penalties
    pub upper_cost: f64,
    /// Charging-aware cost; `None` until charging insertion has run on the current routes
    pub lower_cost: Option<f64>,
}

impl Individual {
    /// Create a new empty individual
    pub fn new() -> Self {
        Individual {
            routes: Vec::new(),
            upper_cost: f64::INFINITY,
            lower_cost: None,
        }
    }

    /// Build an individual from customer sequences (depots are added)
    pub fn from_customer_routes(prep: &Preprocessed, routes: &[Vec<usize>]) -> Self {
        let mut individual = Individual::new();
        individual.set_routes(
            prep,
            routes
                .iter()
                .filter(|r| !r.is_empty())
                .map(|r| Route::from_customers(prep, r))
                .collect(),
        );
        individual
    }

    /// Replace the routes, recompute the upper cost and invalidate the lower cost
    pub fn set_routes(&mut self, prep: &Preprocessed, routes: Vec<Route>) {
        self.routes = routes;
        self.evaluate(prep);
    }

    /// Recompute the upper cost from scratch and invalidate the lower cost
    pub fn evaluate(&mut self, prep: &Preprocessed) {
        self.upper_cost = self.recompute_upper_cost(prep);
        self.lower_cost = None;
    }

    pub fn recompute_upper_cost(&self, prep: &Preprocessed) -> f64 {
        self.routes.iter().map(|r| r.cost(prep)).sum()
    }

    /// Plain travel distance, penalties excluded
    pub fn distance(&self) -> f64 {
        self.routes.iter().map(|r| r.distance).sum()
    }

    pub fn num_routes(&self) -> usize {
        self.routes.len()
    }

    /// Total load above capacity over all routes
    pub fn load_excess(&self, prep: &Preprocessed) -> i32 {
        self.routes.iter().map(|r| (r.load - prep.capacity).max(0)).sum()
    }

    pub fn is_capacity_feasible(&self, prep: &Preprocessed) -> bool {
        self.load_excess(prep) == 0
    }

    /// Check that every customer is served exactly once
    pub fn is_complete(&self, prep: &Preprocessed) -> bool {
        let mut seen = vec![false; prep.num_customers() + 1];
        for route in &self.routes {
            for &c in route.customers() {
                if !prep.instance.is_customer(c) || seen[c] {
                    return false;
                }
                seen[c] = true;
            }
        }
        seen.iter().skip(1).all(|&s| s)
    }

    /// Concatenation of the routes' customers
    pub fn giant_tour(&self) -> Vec<usize> {
        self.routes.iter().flat_map(|r| r.customers().iter().copied()).collect()
    }

    /// Lower cost when known, upper cost otherwise
    pub fn best_known_cost(&self) -> f64 {
        self.lower_cost.unwrap_or(self.upper_cost)
    }
}

impl Default for Individual {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Individual {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Individual ({} routes)", self.routes.len())?;
        writeln!(f, "  Upper cost: {:.2}", self.upper_cost)?;
        match self.lower_cost {
            Some(lower) => writeln!(f, "  Lower cost: {:.2}", lower)?,
            None => writeln!(f, "  Lower cost: -")?,
        }
        for (slot, route) in self.routes.iter().enumerate() {
            writeln!(f, "  Route {} (load {}): {:?}", slot, route.load, route.nodes)?;
        }
        Ok(())
    }
}

/// A route slot touched by a move, with its length after the move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchedRoute {
    pub slot: usize,
    pub len: usize,
}

/// An emptied route removed by swapping in the last route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    /// Slot that was emptied
    pub slot: usize,
    /// Former slot of the route now stored at `slot`, if one was moved
    pub moved_from: Option<usize>,
}

/// What one accepted move changed
#[derive(Debug, Clone, Default)]
pub struct PartialSolution {
    touched: Vec<TouchedRoute>,
    removals: Vec<Removal>,
    num_routes: usize,
}

impl PartialSolution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.touched.clear();
        self.removals.clear();
        self.num_routes = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.touched.is_empty() && self.removals.is_empty()
    }

    /// Live routes touched by the move, slots valid after compaction
    pub fn touched(&self) -> &[TouchedRoute] {
        &self.touched
    }

    /// Compactions in the order they were applied
    pub fn removals(&self) -> &[Removal] {
        &self.removals
    }

    /// Active route count after the move
    pub fn num_routes(&self) -> usize {
        self.num_routes
    }

    pub(crate) fn record(&mut self, touched: &[TouchedRoute], removals: &[Removal], num_routes: usize) {
        self.clear();
        self.touched.extend_from_slice(touched);
        self.removals.extend_from_slice(removals);
        self.num_routes = num_routes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::fixtures;
    use crate::preprocessing::PreprocessConfig;

    fn prep() -> Preprocessed {
        Preprocessed::new(fixtures::line(6, 3), PreprocessConfig::default())
    }

    #[test]
    fn test_empty_individual() {
        let sol = Individual::new();
        assert!(sol.routes.is_empty());
        assert_eq!(sol.upper_cost, f64::INFINITY);
        assert!(sol.lower_cost.is_none());
    }

    #[test]
    fn test_route_from_customers() {
        let prep = prep();
        let route = Route::from_customers(&prep, &[1, 2, 3]);

        assert_eq!(route.nodes, vec![0, 1, 2, 3, 0]);
        assert_eq!(route.len(), 5);
        assert_eq!(route.customers(), &[1, 2, 3]);
        assert_eq!(route.load, 3);
        assert!((route.distance - 6.0).abs() < 1e-10);
        assert!(route.is_consistent(&prep));
        assert!(Route::empty(prep.node_cap).is_empty());
    }

    #[test]
    fn test_individual_costs() {
        let prep = prep();
        let sol = Individual::from_customer_routes(&prep, &[vec![1, 2, 3], vec![4, 5, 6], vec![]]);

        assert_eq!(sol.num_routes(), 2);
        assert!(sol.is_complete(&prep));
        assert!(sol.is_capacity_feasible(&prep));
        // 0-1-2-3-0 = 6, 0-4-5-6-0 = 12
        assert!((sol.distance() - 18.0).abs() < 1e-10);
        assert!((sol.upper_cost - 18.0).abs() < 1e-10);
        assert_eq!(sol.giant_tour(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_overload_is_priced() {
        let prep = prep();
        let sol = Individual::from_customer_routes(&prep, &[vec![1, 2, 3, 4], vec![5, 6]]);

        assert_eq!(sol.load_excess(&prep), 1);
        assert!(!sol.is_capacity_feasible(&prep));
        assert!((sol.upper_cost - (sol.distance() + prep.capacity_penalty)).abs() < 1e-10);
    }

    #[test]
    fn test_incomplete_individual() {
        let prep = prep();
        let missing = Individual::from_customer_routes(&prep, &[vec![1, 2, 3], vec![4, 5]]);
        let duplicated = Individual::from_customer_routes(&prep, &[vec![1, 2, 3], vec![3, 4, 5, 6]]);

        assert!(!missing.is_complete(&prep));
        assert!(!duplicated.is_complete(&prep));
    }

    #[test]
    fn test_partial_solution_lifecycle() {
        let mut partial = PartialSolution::new();
        assert!(partial.is_empty());

        partial.record(&[TouchedRoute { slot: 1, len: 4 }], &[Removal { slot: 0, moved_from: Some(2) }], 2);
        assert!(!partial.is_empty());
        assert_eq!(partial.touched()[0].slot, 1);
        assert_eq!(partial.removals()[0].moved_from, Some(2));
        assert_eq!(partial.num_routes(), 2);

        partial.clear();
        assert!(partial.is_empty());
    }
}
