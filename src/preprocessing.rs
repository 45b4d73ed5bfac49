//! Derived, read-only data shared by every solver component of a run.
//!
//! Built once from an [`EvrpInstance`]: penalty weights, array sizing bounds,
//! per-customer neighbor orderings, granular candidate lists and the
//! best-station table used by charging insertion.

use crate::instance::{EvrpInstance, DEPOT};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Preprocessing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Number of nearest customers kept per customer in the granular lists
    pub granular_size: usize,
    /// Capacity penalty per unit of excess load (derived from the instance when `None`)
    pub capacity_penalty: Option<f64>,
    /// Duration penalty per unit of excess duration
    pub duration_penalty: f64,
    /// Route slots reserved per announced vehicle
    pub route_cap_factor: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        PreprocessConfig {
            granular_size: 20,
            capacity_penalty: None,
            duration_penalty: 1.0,
            route_cap_factor: 3,
        }
    }
}

/// Instance plus everything derived from it before the search starts
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub instance: EvrpInstance,
    pub config: PreprocessConfig,
    /// Battery range
    pub max_cruise: f64,
    pub capacity: i32,
    pub capacity_penalty: f64,
    pub duration_penalty: f64,
    /// Upper bound on the number of routes ever held
    pub route_cap: usize,
    /// Upper bound on the length of a station-free route (customers + 2 depots)
    pub node_cap: usize,
    sorted_neighbors: Vec<Vec<usize>>,
    correlated: Vec<Vec<usize>>,
    correlated_mask: Vec<Vec<bool>>,
    best_station: Vec<Option<usize>>,
    stride: usize,
}

impl Preprocessed {
    pub fn new(instance: EvrpInstance, config: PreprocessConfig) -> Self {
        let n = instance.num_customers;
        let stride = n + 1;

        let max_distance = (0..stride)
            .flat_map(|i| (0..stride).map(move |j| (i, j)))
            .map(|(i, j)| instance.distance(i, j))
            .fold(0.0, f64::max);
        let max_demand = instance.customers().map(|c| instance.demand(c)).max().unwrap_or(1).max(1);
        let capacity_penalty = config
            .capacity_penalty
            .unwrap_or_else(|| (max_distance / max_demand as f64).clamp(0.1, 1000.0));

        let sorted_neighbors = Self::build_sorted_neighbors(&instance);
        let (correlated, correlated_mask) =
            Self::build_granular_lists(&sorted_neighbors, stride, config.granular_size);
        let best_station = Self::build_best_station_table(&instance, stride);

        let route_cap = (config.route_cap_factor * instance.min_vehicles()).max(1);

        log::debug!(
            "Preprocessed {}: capacity penalty {:.4}, granular size {}, route cap {}",
            instance.name,
            capacity_penalty,
            config.granular_size,
            route_cap
        );

        Preprocessed {
            max_cruise: instance.max_cruise_distance(),
            capacity: instance.capacity,
            capacity_penalty,
            duration_penalty: config.duration_penalty,
            route_cap,
            node_cap: n + 2,
            sorted_neighbors,
            correlated,
            correlated_mask,
            best_station,
            stride,
            instance,
            config,
        }
    }

    /// For every customer, all other customers by increasing distance
    fn build_sorted_neighbors(instance: &EvrpInstance) -> Vec<Vec<usize>> {
        let mut lists = vec![Vec::new(); instance.num_customers + 1];
        for c in instance.customers() {
            let mut others: Vec<usize> = instance.customers().filter(|&o| o != c).collect();
            others.sort_by_key(|&o| (OrderedFloat(instance.distance(c, o)), o));
            lists[c] = others;
        }
        lists
    }

    /// Union of each customer's `k` nearest customers, made symmetric
    fn build_granular_lists(
        sorted_neighbors: &[Vec<usize>],
        stride: usize,
        k: usize,
    ) -> (Vec<Vec<usize>>, Vec<Vec<bool>>) {
        let mut mask = vec![vec![false; stride]; stride];
        for (c, neighbors) in sorted_neighbors.iter().enumerate().skip(1) {
            for &o in neighbors.iter().take(k) {
                mask[c][o] = true;
                mask[o][c] = true;
            }
        }

        let mut lists = vec![Vec::new(); stride];
        for (c, neighbors) in sorted_neighbors.iter().enumerate().skip(1) {
            lists[c] = neighbors.iter().copied().filter(|&o| mask[c][o]).collect();
        }
        (lists, mask)
    }

    /// Best charging point for every ordered pair of non-station nodes
    fn build_best_station_table(instance: &EvrpInstance, stride: usize) -> Vec<Option<usize>> {
        let mut table = vec![None; stride * stride];
        for i in 0..stride {
            for j in 0..stride {
                table[i * stride + j] = instance
                    .charging_points()
                    .filter(|&s| s != i && s != j)
                    .min_by_key(|&s| OrderedFloat(instance.distance(i, s) + instance.distance(s, j)));
            }
        }
        table
    }

    #[inline]
    pub fn distance(&self, i: usize, j: usize) -> f64 {
        self.instance.distance(i, j)
    }

    #[inline]
    pub fn demand(&self, node: usize) -> i32 {
        self.instance.demand(node)
    }

    pub fn num_customers(&self) -> usize {
        self.instance.num_customers
    }

    /// Charging point minimizing `dist(i, s) + dist(s, j)` for two non-station nodes
    #[inline]
    pub fn best_station(&self, i: usize, j: usize) -> Option<usize> {
        self.best_station[i * self.stride + j]
    }

    /// Granular candidate list of a customer, nearest first
    pub fn correlated(&self, customer: usize) -> &[usize] {
        &self.correlated[customer]
    }

    /// Whether two nodes are granular neighbors; the depot is everyone's neighbor.
    #[inline]
    pub fn is_correlated(&self, a: usize, b: usize) -> bool {
        a == DEPOT || b == DEPOT || self.correlated_mask[a][b]
    }

    /// All other customers, nearest first
    pub fn sorted_neighbors(&self, customer: usize) -> &[usize] {
        &self.sorted_neighbors[customer]
    }

    /// Penalty for a route load above capacity
    #[inline]
    pub fn load_penalty(&self, load: i32) -> f64 {
        self.capacity_penalty * (load - self.capacity).max(0) as f64
    }

    /// Penalty for a route exceeding the duration limit, if any
    #[inline]
    pub fn duration_penalty(&self, distance: f64, visits: usize) -> f64 {
        match self.instance.max_route_duration {
            Some(limit) => {
                let duration = distance + self.instance.service_time * visits as f64;
                self.duration_penalty * (duration - limit).max(0.0)
            }
            None => 0.0,
        }
    }

    /// Upper-level cost of a route: distance plus capacity and duration penalties
    #[inline]
    pub fn route_cost(&self, distance: f64, load: i32, visits: usize) -> f64 {
        distance + self.load_penalty(load) + self.duration_penalty(distance, visits)
    }

    pub fn has_duration_limit(&self) -> bool {
        self.instance.max_route_duration.is_some()
    }
}
