//! Module for parsing and representing EVRP instances.
//!
//! This module handles the EVRP text format (the TSP-LIB dialect used by the
//! CEC-2020 EVRP benchmark). Node indices are remapped so that the depot is
//! node 0, customers occupy `1..=num_customers` and charging stations occupy
//! the block right after the customers.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::Range;
use std::path::Path;

/// Index of the depot.
pub const DEPOT: usize = 0;

/// Role of a node in the instance
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum NodeKind {
    Depot,
    Customer,
    Station,
}

/// Represents a node in the EVRP instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Internal node index (0 = depot)
    pub id: usize,
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Demand, always 0 for the depot and the stations
    pub demand: i32,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(id: usize, x: f64, y: f64, demand: i32, kind: NodeKind) -> Self {
        Node { id, x, y, demand, kind }
    }

    pub fn is_depot(&self) -> bool {
        self.kind == NodeKind::Depot
    }

    pub fn is_customer(&self) -> bool {
        self.kind == NodeKind::Customer
    }

    pub fn is_station(&self) -> bool {
        self.kind == NodeKind::Station
    }
}

/// Represents a complete EVRP instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvrpInstance {
    /// Name of the instance
    pub name: String,
    /// Comment/description
    pub comment: String,
    /// Number of customers (excluding depot)
    pub num_customers: usize,
    /// Number of charging stations (excluding depot)
    pub num_stations: usize,
    /// Vehicle capacity
    pub capacity: i32,
    /// Battery capacity
    pub energy_capacity: f64,
    /// Energy consumed per unit of distance
    pub energy_consumption: f64,
    /// Minimum number of vehicles announced by the instance
    pub vehicles: usize,
    /// Best known objective, when the file provides one
    pub optimal_value: Option<f64>,
    /// Optional bound on route duration (travel distance + service time)
    pub max_route_duration: Option<f64>,
    /// Service time spent at each customer
    pub service_time: f64,
    /// All nodes: depot, customers, then stations
    pub nodes: Vec<Node>,
    /// Precomputed distance matrix
    #[serde(skip)]
    pub distance_matrix: Vec<Vec<f64>>,
}

impl EvrpInstance {
    /// Build an instance from coordinates. Customers are `(x, y, demand)`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        depot: (f64, f64),
        customers: &[(f64, f64, i32)],
        stations: &[(f64, f64)],
        capacity: i32,
        energy_capacity: f64,
        energy_consumption: f64,
        vehicles: usize,
    ) -> Self {
        let mut nodes = Vec::with_capacity(1 + customers.len() + stations.len());
        nodes.push(Node::new(DEPOT, depot.0, depot.1, 0, NodeKind::Depot));
        for &(x, y, demand) in customers {
            nodes.push(Node::new(nodes.len(), x, y, demand, NodeKind::Customer));
        }
        for &(x, y) in stations {
            nodes.push(Node::new(nodes.len(), x, y, 0, NodeKind::Station));
        }

        let distance_matrix = Self::compute_distance_matrix(&nodes);

        EvrpInstance {
            name: name.to_string(),
            comment: String::new(),
            num_customers: customers.len(),
            num_stations: stations.len(),
            capacity,
            energy_capacity,
            energy_consumption,
            vehicles,
            optimal_value: None,
            max_route_duration: None,
            service_time: 0.0,
            nodes,
            distance_matrix,
        }
    }

    /// Add a route duration limit (travel distance + `service_time` per customer).
    pub fn with_duration_limit(mut self, max_route_duration: f64, service_time: f64) -> Self {
        self.max_route_duration = Some(max_route_duration);
        self.service_time = service_time;
        self
    }

    /// Parse an EVRP instance from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Cannot open instance file {}", path.display()))?;
        Self::from_reader(BufReader::new(file))
            .with_context(|| format!("Invalid instance file {}", path.display()))
    }

    /// Parse an EVRP instance from its textual content
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_reader(text.as_bytes())
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut name = String::new();
        let mut comment = String::new();
        let mut dimension = 0usize;
        let mut num_stations = 0usize;
        let mut capacity = 0i32;
        let mut energy_capacity = 0.0f64;
        let mut energy_consumption = 0.0f64;
        let mut vehicles = 0usize;
        let mut optimal_value = None;
        let mut max_route_duration = None;
        let mut service_time = 0.0f64;

        let mut coords: Vec<(usize, f64, f64)> = Vec::new();
        let mut demands: Vec<(usize, i32)> = Vec::new();
        let mut station_ids: Vec<usize> = Vec::new();
        let mut depot_id: Option<usize> = None;

        let mut section = Section::Header;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line.context("Read error")?;
            let line = line.trim();

            if line.is_empty() || line == "EOF" {
                continue;
            }

            if let Some(next) = Section::from_marker(line) {
                section = next;
                continue;
            }

            if let Some((key, value)) = line.split_once(':') {
                let value = value.trim();
                let parsed = match key.trim().to_ascii_uppercase().as_str() {
                    "NAME" => {
                        name = value.to_string();
                        true
                    }
                    "COMMENT" => {
                        comment = value.to_string();
                        true
                    }
                    "TYPE" | "EDGE_WEIGHT_TYPE" => true,
                    "DIMENSION" => {
                        dimension = parse_value(value, "DIMENSION", line_no)?;
                        true
                    }
                    "STATIONS" => {
                        num_stations = parse_value(value, "STATIONS", line_no)?;
                        true
                    }
                    "CAPACITY" => {
                        capacity = parse_value(value, "CAPACITY", line_no)?;
                        true
                    }
                    "ENERGY_CAPACITY" => {
                        energy_capacity = parse_value(value, "ENERGY_CAPACITY", line_no)?;
                        true
                    }
                    "ENERGY_CONSUMPTION" => {
                        energy_consumption = parse_value(value, "ENERGY_CONSUMPTION", line_no)?;
                        true
                    }
                    "VEHICLES" => {
                        vehicles = parse_value(value, "VEHICLES", line_no)?;
                        true
                    }
                    "OPTIMAL_VALUE" => {
                        optimal_value = Some(parse_value(value, "OPTIMAL_VALUE", line_no)?);
                        true
                    }
                    "MAX_ROUTE_DURATION" => {
                        max_route_duration = Some(parse_value(value, "MAX_ROUTE_DURATION", line_no)?);
                        true
                    }
                    "SERVICE_TIME" => {
                        service_time = parse_value(value, "SERVICE_TIME", line_no)?;
                        true
                    }
                    _ => false,
                };
                if parsed {
                    section = Section::Header;
                    continue;
                }
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            match section {
                Section::Coords if parts.len() >= 3 => {
                    let id: usize = parse_value(parts[0], "node id", line_no)?;
                    let x: f64 = parse_value(parts[1], "x coordinate", line_no)?;
                    let y: f64 = parse_value(parts[2], "y coordinate", line_no)?;
                    coords.push((id, x, y));
                }
                Section::Demands if parts.len() >= 2 => {
                    let id: usize = parse_value(parts[0], "node id", line_no)?;
                    let demand: i32 = parse_value(parts[1], "demand", line_no)?;
                    demands.push((id, demand));
                }
                Section::Stations => {
                    let id: i64 = parse_value(parts[0], "station id", line_no)?;
                    if id < 0 {
                        continue;
                    }
                    station_ids.push(id as usize);
                    if parts.len() >= 3 {
                        let x: f64 = parse_value(parts[1], "x coordinate", line_no)?;
                        let y: f64 = parse_value(parts[2], "y coordinate", line_no)?;
                        coords.push((id as usize, x, y));
                    }
                }
                Section::Depot => {
                    let id: i64 = parse_value(parts[0], "depot id", line_no)?;
                    if id >= 0 && depot_id.is_none() {
                        depot_id = Some(id as usize);
                    }
                }
                _ => {}
            }
        }

        if dimension < 2 {
            bail!("DIMENSION must count the depot and at least one customer");
        }
        if capacity <= 0 {
            bail!("CAPACITY must be positive");
        }
        if energy_consumption <= 0.0 || energy_capacity <= 0.0 {
            bail!("ENERGY_CAPACITY and ENERGY_CONSUMPTION must be positive");
        }
        if num_stations == 0 {
            num_stations = station_ids.len();
        }
        if station_ids.is_empty() {
            station_ids = (dimension + 1..=dimension + num_stations).collect();
        }

        let depot_id = depot_id.unwrap_or(1);
        let coord_of = |id: usize| -> Result<(f64, f64)> {
            coords
                .iter()
                .rev()
                .find(|(cid, _, _)| *cid == id)
                .map(|&(_, x, y)| (x, y))
                .ok_or_else(|| anyhow!("Missing coordinates for node {}", id))
        };
        let demand_of = |id: usize| -> i32 {
            demands.iter().find(|(did, _)| *did == id).map(|(_, d)| *d).unwrap_or(0)
        };

        let mut nodes = Vec::with_capacity(dimension + station_ids.len());
        let (dx, dy) = coord_of(depot_id)?;
        nodes.push(Node::new(DEPOT, dx, dy, 0, NodeKind::Depot));

        for file_id in 1..=dimension {
            if file_id == depot_id {
                continue;
            }
            let (x, y) = coord_of(file_id)?;
            nodes.push(Node::new(nodes.len(), x, y, demand_of(file_id), NodeKind::Customer));
        }
        for &file_id in &station_ids {
            let (x, y) = coord_of(file_id)?;
            nodes.push(Node::new(nodes.len(), x, y, 0, NodeKind::Station));
        }

        let num_customers = dimension - 1;
        let total_demand: i64 = nodes.iter().map(|n| n.demand as i64).sum();
        if vehicles == 0 {
            vehicles = ((total_demand + capacity as i64 - 1) / capacity as i64).max(1) as usize;
        }

        let distance_matrix = Self::compute_distance_matrix(&nodes);

        log::debug!(
            "Parsed instance {}: {} customers, {} stations, capacity {}",
            name,
            num_customers,
            station_ids.len(),
            capacity
        );

        Ok(EvrpInstance {
            name,
            comment,
            num_customers,
            num_stations: station_ids.len(),
            capacity,
            energy_capacity,
            energy_consumption,
            vehicles,
            optimal_value,
            max_route_duration,
            service_time,
            nodes,
            distance_matrix,
        })
    }

    /// Compute Euclidean distance matrix
    fn compute_distance_matrix(nodes: &[Node]) -> Vec<Vec<f64>> {
        let n = nodes.len();
        let mut matrix = vec![vec![0.0; n]; n];

        for i in 0..n {
            for j in i + 1..n {
                let dx = nodes[i].x - nodes[j].x;
                let dy = nodes[i].y - nodes[j].y;
                let d = (dx * dx + dy * dy).sqrt();
                matrix[i][j] = d;
                matrix[j][i] = d;
            }
        }

        matrix
    }

    /// Recompute the distance matrix (needed after deserializing an instance)
    pub fn rebuild_distances(&mut self) {
        self.distance_matrix = Self::compute_distance_matrix(&self.nodes);
    }

    /// Get the distance between two nodes
    #[inline]
    pub fn distance(&self, i: usize, j: usize) -> f64 {
        self.distance_matrix[i][j]
    }

    #[inline]
    pub fn demand(&self, node: usize) -> i32 {
        self.nodes[node].demand
    }

    /// The depot recharges the vehicle, so it counts as a charging station.
    #[inline]
    pub fn is_charging_station(&self, node: usize) -> bool {
        node == DEPOT || node > self.num_customers
    }

    #[inline]
    pub fn is_customer(&self, node: usize) -> bool {
        node >= 1 && node <= self.num_customers
    }

    /// Total number of nodes (depot + customers + stations)
    pub fn problem_size(&self) -> usize {
        self.nodes.len()
    }

    pub fn customers(&self) -> Range<usize> {
        1..self.num_customers + 1
    }

    pub fn stations(&self) -> Range<usize> {
        self.num_customers + 1..self.num_customers + 1 + self.num_stations
    }

    /// Depot followed by every station
    pub fn charging_points(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::once(DEPOT).chain(self.stations())
    }

    /// Maximum distance a fully charged vehicle can drive
    pub fn max_cruise_distance(&self) -> f64 {
        self.energy_capacity / self.energy_consumption
    }

    pub fn total_demand(&self) -> i32 {
        self.customers().map(|c| self.nodes[c].demand).sum()
    }

    /// Vehicles needed at least, from the instance header and the demand volume
    pub fn min_vehicles(&self) -> usize {
        let by_volume = (self.total_demand() as f64 / self.capacity as f64).ceil() as usize;
        self.vehicles.max(by_volume).max(1)
    }

    /// Sum of arc distances along a node sequence (no implicit return arc)
    pub fn route_distance(&self, route: &[usize]) -> f64 {
        route.windows(2).map(|w| self.distance(w[0], w[1])).sum()
    }

    /// Sum of customer demands along a node sequence
    pub fn route_demand(&self, route: &[usize]) -> i32 {
        route.iter().map(|&n| self.demand(n)).sum()
    }

    /// Get statistics about the instance
    pub fn statistics(&self) -> InstanceStatistics {
        let total_demand = self.total_demand();
        let max_demand = self.customers().map(|c| self.demand(c)).max().unwrap_or(0);

        let mut sum = 0.0;
        let mut count = 0usize;
        let mut max_distance: f64 = 0.0;
        for i in 0..self.problem_size() {
            for j in i + 1..self.problem_size() {
                let d = self.distance(i, j);
                sum += d;
                count += 1;
                max_distance = max_distance.max(d);
            }
        }
        let avg_distance = if count > 0 { sum / count as f64 } else { 0.0 };
        let farthest_customer = self
            .customers()
            .map(|c| self.distance(DEPOT, c))
            .fold(0.0, f64::max);

        InstanceStatistics {
            name: self.name.clone(),
            num_customers: self.num_customers,
            num_stations: self.num_stations,
            capacity: self.capacity,
            vehicles: self.vehicles,
            total_demand,
            max_demand,
            max_cruise_distance: self.max_cruise_distance(),
            farthest_customer,
            avg_distance,
            max_distance,
            optimal_value: self.optimal_value,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Section {
    Header,
    Coords,
    Demands,
    Stations,
    Depot,
}

impl Section {
    fn from_marker(line: &str) -> Option<Section> {
        let marker = line.trim_end_matches(':').trim().to_ascii_uppercase();
        match marker.as_str() {
            "NODE_COORD_SECTION" => Some(Section::Coords),
            "DEMAND_SECTION" => Some(Section::Demands),
            "STATIONS_COORD_SECTION" => Some(Section::Stations),
            "DEPOT_SECTION" => Some(Section::Depot),
            _ => None,
        }
    }
}

fn parse_value<T: std::str::FromStr>(value: &str, what: &str, line_no: usize) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid {} '{}' on line {}", what, value.trim(), line_no + 1))
}

/// Statistics about an EVRP instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStatistics {
    pub name: String,
    pub num_customers: usize,
    pub num_stations: usize,
    pub capacity: i32,
    pub vehicles: usize,
    pub total_demand: i32,
    pub max_demand: i32,
    pub max_cruise_distance: f64,
    pub farthest_customer: f64,
    pub avg_distance: f64,
    pub max_distance: f64,
    pub optimal_value: Option<f64>,
}

impl std::fmt::Display for InstanceStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Instance: {}", self.name)?;
        writeln!(f, "  Customers: {}", self.num_customers)?;
        writeln!(f, "  Charging stations: {}", self.num_stations)?;
        writeln!(f, "  Capacity: {}", self.capacity)?;
        writeln!(f, "  Vehicles: {}", self.vehicles)?;
        writeln!(f, "  Total demand: {} (max {})", self.total_demand, self.max_demand)?;
        writeln!(f, "  Max cruise distance: {:.2}", self.max_cruise_distance)?;
        writeln!(f, "  Farthest customer from depot: {:.2}", self.farthest_customer)?;
        writeln!(f, "  Avg distance: {:.2}", self.avg_distance)?;
        write!(f, "  Max distance: {:.2}", self.max_distance)?;
        if let Some(opt) = self.optimal_value {
            write!(f, "\n  Best known: {:.2}", opt)?;
        }
        Ok(())
    }
}

/// Instances shared by the unit tests of the crate.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub const E_N22_K4: &str = "\
Name: E-n22-k4
COMMENT: 21 customers, 8 charging stations
TYPE: EVRP
OPTIMAL_VALUE: 384.678035
VEHICLES: 4
DIMENSION: 22
STATIONS: 8
CAPACITY: 6000
ENERGY_CAPACITY: 94
ENERGY_CONSUMPTION: 1.20
EDGE_WEIGHT_TYPE: EUC_2D
NODE_COORD_SECTION
1 145 215
2 151 264
3 159 261
4 130 254
5 128 252
6 163 247
7 146 246
8 161 242
9 142 239
10 163 236
11 148 232
12 128 231
13 156 217
14 129 214
15 146 208
16 164 208
17 141 206
18 147 193
19 164 193
20 129 189
21 155 185
22 139 182
23 140 255
24 160 255
25 125 240
26 165 225
27 130 200
28 160 195
29 145 185
30 150 225
DEMAND_SECTION
1 0
2 1100
3 700
4 800
5 1400
6 2100
7 400
8 800
9 100
10 500
11 600
12 1200
13 1300
14 1300
15 300
16 900
17 2100
18 1000
19 900
20 2500
21 1800
22 700
STATIONS_COORD_SECTION
23
24
25
26
27
28
29
30
DEPOT_SECTION
1
-1
EOF
";

    pub fn e_n22_k4() -> EvrpInstance {
        EvrpInstance::parse(E_N22_K4).expect("fixture parses")
    }

    /// Customers on a line at x = 1..=n, unit demand, one station at the depot side.
    pub fn line(n: usize, capacity: i32) -> EvrpInstance {
        let customers: Vec<(f64, f64, i32)> = (1..=n).map(|i| (i as f64, 0.0, 1)).collect();
        EvrpInstance::new("line", (0.0, 0.0), &customers, &[(0.5, 0.5)], capacity, 1000.0, 1.0, 1)
    }

    /// Two clusters of customers, one each side of the depot.
    pub fn two_clusters() -> EvrpInstance {
        let customers = [
            (10.0, 1.0, 3),
            (11.0, 0.0, 3),
            (10.0, -1.0, 3),
            (-10.0, 1.0, 3),
            (-11.0, 0.0, 3),
            (-10.0, -1.0, 3),
        ];
        let stations = [(8.0, 0.0), (-8.0, 0.0)];
        EvrpInstance::new("two-clusters", (0.0, 0.0), &customers, &stations, 9, 100.0, 1.0, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fixture_layout() {
        let instance = fixtures::e_n22_k4();

        assert_eq!(instance.name, "E-n22-k4");
        assert_eq!(instance.num_customers, 21);
        assert_eq!(instance.num_stations, 8);
        assert_eq!(instance.problem_size(), 30);
        assert_eq!(instance.capacity, 6000);
        assert_eq!(instance.vehicles, 4);
        assert_eq!(instance.optimal_value, Some(384.678035));
        assert!((instance.max_cruise_distance() - 94.0 / 1.2).abs() < 1e-9);

        assert!(instance.nodes[0].is_depot());
        assert!(instance.customers().all(|c| instance.nodes[c].is_customer()));
        assert!(instance.stations().all(|s| instance.nodes[s].is_station()));
        assert_eq!(instance.demand(1), 1100);
        assert_eq!(instance.total_demand(), 22500);
        assert_eq!(instance.min_vehicles(), 4);
    }

    #[test]
    fn test_charging_station_partition() {
        let instance = fixtures::e_n22_k4();

        assert!(instance.is_charging_station(DEPOT));
        assert!(!instance.is_charging_station(1));
        assert!(!instance.is_charging_station(21));
        assert!(instance.is_charging_station(22));
        assert!(instance.is_charging_station(29));
        assert_eq!(instance.charging_points().count(), 9);
    }

    #[test]
    fn test_distance_calculation() {
        let instance = EvrpInstance::new("t", (0.0, 0.0), &[(3.0, 4.0, 1)], &[], 10, 10.0, 1.0, 1);

        assert!((instance.distance(0, 1) - 5.0).abs() < 1e-10);
        assert!((instance.distance(1, 0) - 5.0).abs() < 1e-10);
        assert!((instance.route_distance(&[0, 1, 0]) - 10.0).abs() < 1e-10);
    }

    #[test]
    fn test_depot_is_remapped_to_zero() {
        let text = "\
DIMENSION: 3
CAPACITY: 10
ENERGY_CAPACITY: 50
ENERGY_CONSUMPTION: 1.0
NODE_COORD_SECTION
1 5 5
2 0 0
3 9 9
4 2 2
DEMAND_SECTION
1 4
2 0
3 6
STATIONS_COORD_SECTION
4
DEPOT_SECTION
2
-1
EOF
";
        let instance = EvrpInstance::parse(text).unwrap();

        assert_eq!((instance.nodes[0].x, instance.nodes[0].y), (0.0, 0.0));
        assert_eq!(instance.demand(1), 4);
        assert_eq!(instance.demand(2), 6);
        assert_eq!(instance.num_stations, 1);
        assert_eq!((instance.nodes[3].x, instance.nodes[3].y), (2.0, 2.0));
        assert_eq!(instance.vehicles, 1);
    }

    #[test]
    fn test_invalid_capacity_is_reported() {
        let text = "DIMENSION: 2\nCAPACITY: abc\n";
        let err = EvrpInstance::parse(text).unwrap_err();
        assert!(err.to_string().contains("CAPACITY"));
    }

    #[test]
    fn test_missing_coordinates_are_reported() {
        let text = "\
DIMENSION: 3
CAPACITY: 10
ENERGY_CAPACITY: 50
ENERGY_CONSUMPTION: 1.0
NODE_COORD_SECTION
1 0 0
2 1 1
EOF
";
        assert!(EvrpInstance::parse(text).is_err());
    }
}
