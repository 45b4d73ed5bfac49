//! Neighborhood move catalogue over route arrays.
//!
//! Each move is described once as a value of [`Move`]. `evaluate` prices it
//! against the current routes (distance plus penalty changes of every touched
//! route) without mutating anything, and `apply` performs it. Positions are
//! indices into a route's node array, so customers sit at `1..len - 1`.
//!
//! Evaluation returns `None` for structurally invalid positions and for
//! candidates excluded by the [`LoadRule`].

use crate::instance::DEPOT;
use crate::preprocessing::Preprocessed;
use crate::solution::Route;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MoveKind {
    Relocate1,
    Relocate2,
    Swap1,
    Swap2,
    TwoOpt,
    TwoOptStar,
    TwoOptStarReversed,
    RelocateToEmpty,
    SplitRoute,
}

impl MoveKind {
    pub const ALL: [MoveKind; 9] = [
        MoveKind::Relocate1,
        MoveKind::Relocate2,
        MoveKind::Swap1,
        MoveKind::Swap2,
        MoveKind::TwoOpt,
        MoveKind::TwoOptStar,
        MoveKind::TwoOptStarReversed,
        MoveKind::RelocateToEmpty,
        MoveKind::SplitRoute,
    ];

    /// Has candidates inside a single route
    pub fn has_intra(self) -> bool {
        !matches!(self, MoveKind::TwoOptStar | MoveKind::TwoOptStarReversed)
    }

    /// Has candidates spanning two routes
    pub fn has_inter(self) -> bool {
        matches!(
            self,
            MoveKind::Relocate1
                | MoveKind::Relocate2
                | MoveKind::Swap1
                | MoveKind::Swap2
                | MoveKind::TwoOptStar
                | MoveKind::TwoOptStarReversed
        )
    }

    /// Opens a new route
    pub fn uses_empty_route(self) -> bool {
        matches!(self, MoveKind::RelocateToEmpty | MoveKind::SplitRoute)
    }

    /// Number of consecutive customers moved by relocate and swap kinds
    pub fn segment_len(self) -> usize {
        match self {
            MoveKind::Relocate2 | MoveKind::Swap2 => 2,
            _ => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MoveKind::Relocate1 => "Relocate-1",
            MoveKind::Relocate2 => "Relocate-2",
            MoveKind::Swap1 => "Swap-1",
            MoveKind::Swap2 => "Swap-2",
            MoveKind::TwoOpt => "2-Opt",
            MoveKind::TwoOptStar => "2-Opt*",
            MoveKind::TwoOptStarReversed => "2-Opt*-Reversed",
            MoveKind::RelocateToEmpty => "Relocate-Empty",
            MoveKind::SplitRoute => "Split-Route",
        }
    }
}

impl std::fmt::Display for MoveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Load bound a move may not cross upward
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadRule {
    pub max_load: f64,
}

impl LoadRule {
    pub fn new(capacity: i32, allow_overload: bool, overload_ratio: f64) -> Self {
        let max_load = if allow_overload {
            overload_ratio * capacity as f64
        } else {
            capacity as f64
        };
        LoadRule { max_load }
    }

    /// Loads may always decrease; increases must stay within the bound.
    #[inline]
    pub fn allows(&self, old_load: i32, new_load: i32) -> bool {
        new_load <= old_load || new_load as f64 <= self.max_load
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Move {
    /// Move `len` customers starting at `from` to just after position `after` of `to_route`
    Relocate {
        len: usize,
        from_route: usize,
        from: usize,
        to_route: usize,
        after: usize,
    },
    /// Exchange `len` customers at `first` of `route_a` with `len` customers at `second` of `route_b`
    Swap {
        len: usize,
        route_a: usize,
        first: usize,
        route_b: usize,
        second: usize,
    },
    /// Reverse positions `i + 1..=j`
    TwoOpt { route: usize, i: usize, j: usize },
    /// Cut both routes after `p1` and `p2` and reconnect.
    /// Straight: `a[..=p1] + b[p2+1..]` and `b[..=p2] + a[p1+1..]`.
    /// Reversed: `a[..=p1] + rev(b[..=p2])` and `rev(a[p1+1..]) + b[p2+1..]`.
    TwoOptStar {
        route_a: usize,
        p1: usize,
        route_b: usize,
        p2: usize,
        reversed: bool,
    },
    /// Serve the customer at `pos` alone in a new route
    RelocateToEmpty { route: usize, pos: usize },
    /// Cut after `pos`; the tail becomes a new route
    SplitRoute { route: usize, pos: usize },
}

/// Load of `nodes[..=p]` and distance of the arcs up to `nodes[p]`
fn prefix(prep: &Preprocessed, route: &Route, p: usize) -> (i32, f64) {
    let nodes = &route.nodes[..=p];
    let load = nodes.iter().map(|&n| prep.demand(n)).sum();
    let distance = nodes.windows(2).map(|w| prep.distance(w[0], w[1])).sum();
    (load, distance)
}

/// Cumulative load and distance of a route, indexed like its nodes
///
/// Lets a scan over every cut of a route pair price each 2-opt* candidate in
/// constant time.
#[derive(Debug, Clone, Default)]
pub struct RoutePrefix {
    load: Vec<i32>,
    distance: Vec<f64>,
}

impl RoutePrefix {
    pub fn new(prep: &Preprocessed, route: &Route) -> Self {
        let mut prefix = RoutePrefix::default();
        prefix.fill(prep, route);
        prefix
    }

    /// Recompute for `route`, reusing the allocations
    pub fn fill(&mut self, prep: &Preprocessed, route: &Route) {
        self.load.clear();
        self.distance.clear();
        let (mut load, mut distance) = (0, 0.0);
        for (i, &n) in route.nodes.iter().enumerate() {
            if i > 0 {
                distance += prep.distance(route.nodes[i - 1], n);
            }
            load += prep.demand(n);
            self.load.push(load);
            self.distance.push(distance);
        }
    }

    /// Load of `nodes[..=p]` and distance of the arcs up to `nodes[p]`
    #[inline]
    pub fn at(&self, p: usize) -> (i32, f64) {
        (self.load[p], self.distance[p])
    }
}

fn segment_demand(prep: &Preprocessed, nodes: &[usize]) -> i32 {
    nodes.iter().map(|&n| prep.demand(n)).sum()
}

/// The two routes of a 2-opt* move, or `None` when the cut positions are
/// invalid or the straight variant would leave both routes unchanged
fn two_opt_star_routes(
    routes: &[Route],
    route_a: usize,
    p1: usize,
    route_b: usize,
    p2: usize,
    reversed: bool,
) -> Option<(&Route, &Route)> {
    if route_a == route_b {
        return None;
    }
    let ra = routes.get(route_a)?;
    let rb = routes.get(route_b)?;
    if p1 + 1 >= ra.len() || p2 + 1 >= rb.len() {
        return None;
    }
    if !reversed && ((p1 == 0 && p2 == 0) || (p1 + 2 == ra.len() && p2 + 2 == rb.len())) {
        return None;
    }
    Some((ra, rb))
}

#[allow(clippy::too_many_arguments)]
fn two_opt_star_delta(
    prep: &Preprocessed,
    ra: &Route,
    rb: &Route,
    p1: usize,
    p2: usize,
    reversed: bool,
    rule: LoadRule,
    (head_load_a, head_dist_a): (i32, f64),
    (head_load_b, head_dist_b): (i32, f64),
) -> Option<f64> {
    let d = |a: usize, b: usize| prep.distance(a, b);
    let (a1, b1) = (ra.nodes[p1], ra.nodes[p1 + 1]);
    let (a2, b2) = (rb.nodes[p2], rb.nodes[p2 + 1]);
    let tail_dist_a = ra.distance - head_dist_a - d(a1, b1);
    let tail_dist_b = rb.distance - head_dist_b - d(a2, b2);
    let tail_load_a = ra.load - head_load_a;
    let tail_load_b = rb.load - head_load_b;
    let tail_count_a = ra.len() - 2 - p1;
    let tail_count_b = rb.len() - 2 - p2;

    let ((dist_a, load_a, count_a), (dist_b, load_b, count_b)) = if reversed {
        (
            (head_dist_a + d(a1, a2) + head_dist_b, head_load_a + head_load_b, p1 + p2),
            (
                tail_dist_a + d(b1, b2) + tail_dist_b,
                tail_load_a + tail_load_b,
                tail_count_a + tail_count_b,
            ),
        )
    } else {
        (
            (head_dist_a + d(a1, b2) + tail_dist_b, head_load_a + tail_load_b, p1 + tail_count_b),
            (head_dist_b + d(a2, b1) + tail_dist_a, head_load_b + tail_load_a, p2 + tail_count_a),
        )
    };
    if !rule.allows(ra.load, load_a) || !rule.allows(rb.load, load_b) {
        return None;
    }
    let cost_a = prep.route_cost(dist_a, load_a, count_a);
    let cost_b = prep.route_cost(dist_b, load_b, count_b);
    Some(cost_a + cost_b - ra.cost(prep) - rb.cost(prep))
}

/// Mutable access to two distinct routes
fn pair_mut(routes: &mut [Route], a: usize, b: usize) -> (&mut Route, &mut Route) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = routes.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = routes.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

impl Move {
    pub fn kind(&self) -> MoveKind {
        match *self {
            Move::Relocate { len: 2, .. } => MoveKind::Relocate2,
            Move::Relocate { .. } => MoveKind::Relocate1,
            Move::Swap { len: 2, .. } => MoveKind::Swap2,
            Move::Swap { .. } => MoveKind::Swap1,
            Move::TwoOpt { .. } => MoveKind::TwoOpt,
            Move::TwoOptStar { reversed: false, .. } => MoveKind::TwoOptStar,
            Move::TwoOptStar { reversed: true, .. } => MoveKind::TwoOptStarReversed,
            Move::RelocateToEmpty { .. } => MoveKind::RelocateToEmpty,
            Move::SplitRoute { .. } => MoveKind::SplitRoute,
        }
    }

    /// Cost delta of the move, or `None` when it is invalid or excluded
    pub fn evaluate(&self, prep: &Preprocessed, routes: &[Route], rule: LoadRule) -> Option<f64> {
        let d = |a: usize, b: usize| prep.distance(a, b);

        match *self {
            Move::Relocate { len, from_route, from, to_route, after } => {
                let src = routes.get(from_route)?;
                if len == 0 || from == 0 || from + len > src.len() - 1 {
                    return None;
                }
                let s = &src.nodes;
                let (prev, first, last, next) = (s[from - 1], s[from], s[from + len - 1], s[from + len]);
                let removed = d(prev, next) - d(prev, first) - d(last, next);

                if from_route == to_route {
                    if after + 1 >= src.len() || (after + 1 >= from && after < from + len) {
                        return None;
                    }
                    let (u, v) = (s[after], s[after + 1]);
                    let added = d(u, first) + d(last, v) - d(u, v);
                    let cost = prep.route_cost(src.distance + removed + added, src.load, src.num_customers());
                    return Some(cost - src.cost(prep));
                }

                let dst = routes.get(to_route)?;
                if after + 1 >= dst.len() {
                    return None;
                }
                let moved = segment_demand(prep, &s[from..from + len]);
                if !rule.allows(dst.load, dst.load + moved) {
                    return None;
                }
                let (u, v) = (dst.nodes[after], dst.nodes[after + 1]);
                let added = d(u, first) + d(last, v) - d(u, v);
                let src_cost = prep.route_cost(src.distance + removed, src.load - moved, src.num_customers() - len);
                let dst_cost = prep.route_cost(dst.distance + added, dst.load + moved, dst.num_customers() + len);
                Some(src_cost + dst_cost - src.cost(prep) - dst.cost(prep))
            }

            Move::Swap { len, route_a, first, route_b, second } => {
                let ra = routes.get(route_a)?;
                let rb = routes.get(route_b)?;
                if len == 0 || first == 0 || second == 0 || first + len > ra.len() - 1 || second + len > rb.len() - 1 {
                    return None;
                }

                if route_a == route_b {
                    let (p, q) = if first < second { (first, second) } else { (second, first) };
                    if p + len > q {
                        return None;
                    }
                    let s = &ra.nodes;
                    let (a0, a1, b0, b1) = (s[p], s[p + len - 1], s[q], s[q + len - 1]);
                    let change = if p + len == q {
                        d(s[p - 1], b0) + d(b1, a0) + d(a1, s[q + len])
                            - d(s[p - 1], a0)
                            - d(a1, b0)
                            - d(b1, s[q + len])
                    } else {
                        d(s[p - 1], b0) + d(b1, s[p + len]) + d(s[q - 1], a0) + d(a1, s[q + len])
                            - d(s[p - 1], a0)
                            - d(a1, s[p + len])
                            - d(s[q - 1], b0)
                            - d(b1, s[q + len])
                    };
                    let cost = prep.route_cost(ra.distance + change, ra.load, ra.num_customers());
                    return Some(cost - ra.cost(prep));
                }

                let (a, b) = (&ra.nodes, &rb.nodes);
                let demand_a = segment_demand(prep, &a[first..first + len]);
                let demand_b = segment_demand(prep, &b[second..second + len]);
                let load_a = ra.load - demand_a + demand_b;
                let load_b = rb.load - demand_b + demand_a;
                if !rule.allows(ra.load, load_a) || !rule.allows(rb.load, load_b) {
                    return None;
                }
                let (a0, a1) = (a[first], a[first + len - 1]);
                let (b0, b1) = (b[second], b[second + len - 1]);
                let (pa, na) = (a[first - 1], a[first + len]);
                let (pb, nb) = (b[second - 1], b[second + len]);
                let change_a = d(pa, b0) + d(b1, na) - d(pa, a0) - d(a1, na);
                let change_b = d(pb, a0) + d(a1, nb) - d(pb, b0) - d(b1, nb);
                let cost_a = prep.route_cost(ra.distance + change_a, load_a, ra.num_customers());
                let cost_b = prep.route_cost(rb.distance + change_b, load_b, rb.num_customers());
                Some(cost_a + cost_b - ra.cost(prep) - rb.cost(prep))
            }

            Move::TwoOpt { route, i, j } => {
                let r = routes.get(route)?;
                if i + 1 >= j || j + 1 >= r.len() {
                    return None;
                }
                let s = &r.nodes;
                let change = d(s[i], s[j]) + d(s[i + 1], s[j + 1]) - d(s[i], s[i + 1]) - d(s[j], s[j + 1]);
                let cost = prep.route_cost(r.distance + change, r.load, r.num_customers());
                Some(cost - r.cost(prep))
            }

            Move::TwoOptStar { route_a, p1, route_b, p2, reversed } => {
                let (ra, rb) = two_opt_star_routes(routes, route_a, p1, route_b, p2, reversed)?;
                two_opt_star_delta(prep, ra, rb, p1, p2, reversed, rule, prefix(prep, ra, p1), prefix(prep, rb, p2))
            }

            Move::RelocateToEmpty { route, pos } => {
                let r = routes.get(route)?;
                if r.num_customers() < 2 || pos == 0 || pos + 1 >= r.len() {
                    return None;
                }
                let s = &r.nodes;
                let c = s[pos];
                let demand = prep.demand(c);
                if !rule.allows(0, demand) {
                    return None;
                }
                let removed = d(s[pos - 1], s[pos + 1]) - d(s[pos - 1], c) - d(c, s[pos + 1]);
                let old_cost = prep.route_cost(r.distance + removed, r.load - demand, r.num_customers() - 1);
                let new_cost = prep.route_cost(d(DEPOT, c) + d(c, DEPOT), demand, 1);
                Some(old_cost + new_cost - r.cost(prep))
            }

            Move::SplitRoute { route, pos } => {
                let r = routes.get(route)?;
                if pos == 0 || pos + 3 > r.len() {
                    return None;
                }
                let (head_load, head_dist) = prefix(prep, r, pos);
                let (a, b) = (r.nodes[pos], r.nodes[pos + 1]);
                let tail_load = r.load - head_load;
                if !rule.allows(0, tail_load) {
                    return None;
                }
                let tail_dist = r.distance - head_dist - d(a, b);
                let head_cost = prep.route_cost(head_dist + d(a, DEPOT), head_load, pos);
                let tail_cost = prep.route_cost(d(DEPOT, b) + tail_dist, tail_load, r.len() - 2 - pos);
                Some(head_cost + tail_cost - r.cost(prep))
            }
        }
    }

    /// [`Move::evaluate`] reading 2-opt* head loads and distances from
    /// precomputed prefixes of `route_a` and `route_b`; other kinds fall back
    /// to `evaluate`
    pub fn evaluate_with_prefixes(
        &self,
        prep: &Preprocessed,
        routes: &[Route],
        rule: LoadRule,
        prefix_a: &RoutePrefix,
        prefix_b: &RoutePrefix,
    ) -> Option<f64> {
        match *self {
            Move::TwoOptStar { route_a, p1, route_b, p2, reversed } => {
                let (ra, rb) = two_opt_star_routes(routes, route_a, p1, route_b, p2, reversed)?;
                two_opt_star_delta(prep, ra, rb, p1, p2, reversed, rule, prefix_a.at(p1), prefix_b.at(p2))
            }
            _ => self.evaluate(prep, routes, rule),
        }
    }

    /// Whether an inter-route move links granular neighbors
    pub fn is_granular(&self, prep: &Preprocessed, routes: &[Route]) -> bool {
        match *self {
            Move::Relocate { len, from_route, from, to_route, after } if from_route != to_route => {
                let (s, t) = (&routes[from_route].nodes, &routes[to_route].nodes);
                prep.is_correlated(s[from], t[after]) || prep.is_correlated(s[from + len - 1], t[after + 1])
            }
            Move::Swap { len, route_a, first, route_b, second } if route_a != route_b => {
                let (a, b) = (&routes[route_a].nodes, &routes[route_b].nodes);
                prep.is_correlated(a[first], b[second - 1])
                    || prep.is_correlated(b[second], a[first - 1])
                    || prep.is_correlated(a[first + len - 1], b[second + len])
                    || prep.is_correlated(b[second + len - 1], a[first + len])
            }
            Move::TwoOptStar { route_a, p1, route_b, p2, reversed } => {
                let (a, b) = (&routes[route_a].nodes, &routes[route_b].nodes);
                if reversed {
                    prep.is_correlated(a[p1], b[p2]) || prep.is_correlated(a[p1 + 1], b[p2 + 1])
                } else {
                    prep.is_correlated(a[p1], b[p2 + 1]) || prep.is_correlated(b[p2], a[p1 + 1])
                }
            }
            _ => true,
        }
    }

    /// Perform the move. Returns the slots whose contents changed; a new
    /// route, if any, is pushed at the end. Loads and distances are left
    /// stale for the caller to refresh.
    pub fn apply(&self, prep: &Preprocessed, routes: &mut Vec<Route>, buffer: &mut Vec<usize>) -> (usize, Option<usize>) {
        match *self {
            Move::Relocate { len, from_route, from, to_route, after } => {
                buffer.clear();
                buffer.extend(routes[from_route].nodes.drain(from..from + len));
                if from_route == to_route {
                    let at = if after < from { after + 1 } else { after + 1 - len };
                    let nodes = &mut routes[to_route].nodes;
                    for (k, &c) in buffer.iter().enumerate() {
                        nodes.insert(at + k, c);
                    }
                    (from_route, None)
                } else {
                    let nodes = &mut routes[to_route].nodes;
                    for (k, &c) in buffer.iter().enumerate() {
                        nodes.insert(after + 1 + k, c);
                    }
                    (from_route, Some(to_route))
                }
            }

            Move::Swap { len, route_a, first, route_b, second } => {
                if route_a == route_b {
                    let nodes = &mut routes[route_a].nodes;
                    for k in 0..len {
                        nodes.swap(first + k, second + k);
                    }
                    (route_a, None)
                } else {
                    let (ra, rb) = pair_mut(routes, route_a, route_b);
                    for k in 0..len {
                        std::mem::swap(&mut ra.nodes[first + k], &mut rb.nodes[second + k]);
                    }
                    (route_a, Some(route_b))
                }
            }

            Move::TwoOpt { route, i, j } => {
                routes[route].nodes[i + 1..=j].reverse();
                (route, None)
            }

            Move::TwoOptStar { route_a, p1, route_b, p2, reversed } => {
                let (ra, rb) = pair_mut(routes, route_a, route_b);
                buffer.clear();
                if reversed {
                    buffer.extend(ra.nodes[p1 + 1..].iter().rev());
                    buffer.extend_from_slice(&rb.nodes[p2 + 1..]);
                    ra.nodes.truncate(p1 + 1);
                    ra.nodes.extend(rb.nodes[..=p2].iter().rev());
                    rb.nodes.clear();
                    rb.nodes.extend_from_slice(buffer);
                } else {
                    buffer.extend_from_slice(&ra.nodes[p1 + 1..]);
                    ra.nodes.truncate(p1 + 1);
                    ra.nodes.extend_from_slice(&rb.nodes[p2 + 1..]);
                    rb.nodes.truncate(p2 + 1);
                    rb.nodes.extend_from_slice(buffer);
                }
                (route_a, Some(route_b))
            }

            Move::RelocateToEmpty { route, pos } => {
                let c = routes[route].nodes.remove(pos);
                let mut created = Route::empty(prep.node_cap);
                created.nodes.insert(1, c);
                routes.push(created);
                (route, Some(routes.len() - 1))
            }

            Move::SplitRoute { route, pos } => {
                let mut created = Route::empty(prep.node_cap);
                created.nodes.truncate(1);
                created.nodes.extend_from_slice(&routes[route].nodes[pos + 1..]);
                let nodes = &mut routes[route].nodes;
                nodes.truncate(pos + 1);
                nodes.push(DEPOT);
                routes.push(created);
                (route, Some(routes.len() - 1))
            }
        }
    }
}
