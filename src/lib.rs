//! EVRP Solver Library
//!
//! A bilevel local-search solver for the Electric Vehicle Routing Problem
//! (EVRP): capacity- and battery-limited vehicles serve customers from a
//! depot, visiting charging stations whenever a leg would exceed the cruise
//! range.
//!
//! # Features
//!
//! - Linear-time Split of a giant tour into capacity-penalized routes
//! - Route-array local search with relocate, swap, 2-opt and 2-opt* moves
//! - Charging-station insertion with bounded enumeration
//! - Drivers: descent, simulated annealing, late acceptance, threshold walk,
//!   iterated local search, bilevel search
//! - Parallel seeded benchmarking with CSV export
//!
//! # Example
//!
//! ```no_run
//! use evrp_solver::config::SolverConfig;
//! use evrp_solver::instance::EvrpInstance;
//! use evrp_solver::preprocessing::Preprocessed;
//! use evrp_solver::solver::solve;
//!
//! let instance = EvrpInstance::from_file("E-n22-k4.evrp").unwrap();
//! let config = SolverConfig::default();
//! let prep = Preprocessed::new(instance, config.preprocess.clone());
//!
//! let outcome = solve(&prep, &config, 42).unwrap();
//! println!("Lower cost: {:.2}", outcome.lower_cost());
//! ```

pub mod benchmark;
pub mod config;
pub mod heuristics;
pub mod instance;
pub mod preprocessing;
pub mod solution;
pub mod solver;
pub mod split;

pub use instance::EvrpInstance;
pub use solution::Individual;
