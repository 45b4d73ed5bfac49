//! Heuristics module for EVRP.
//!
//! The bilevel core (move catalogue, acceptance policies, Leader local
//! search, Follower charging insertion) plus the construction strategies
//! and search drivers built on it.

pub mod acceptance;
pub mod charging;
pub mod construction;
pub mod local_search;
pub mod metaheuristics;
pub mod moves;

pub use acceptance::Acceptance;
pub use charging::{Follower, FollowerConfig, LowerCostCache, Repair};
pub use construction::*;
pub use local_search::{ImprovementRule, Leader, LeaderConfig};
pub use metaheuristics::*;
pub use moves::{LoadRule, Move, MoveKind};
