//! One complete run: construction, upper-level improvement, charging
//! insertion.

use crate::config::SolverConfig;
use crate::heuristics::charging::Follower;
use crate::preprocessing::Preprocessed;
use crate::solution::Individual;
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Result of one seeded run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveOutcome {
    pub instance: String,
    /// Construction and driver names
    pub algorithm: String,
    pub seed: u64,
    pub construction_cost: f64,
    pub individual: Individual,
    /// Routes with charging stations inserted, `None` where no arrangement
    /// satisfies the battery range
    pub charged_routes: Vec<Option<Vec<usize>>>,
    /// Seconds
    pub time: f64,
}

impl SolveOutcome {
    pub fn upper_cost(&self) -> f64 {
        self.individual.upper_cost
    }

    pub fn lower_cost(&self) -> f64 {
        self.individual.best_known_cost()
    }

    pub fn num_routes(&self) -> usize {
        self.individual.num_routes()
    }

    /// No capacity or duration excess and every route reparable
    pub fn is_feasible(&self) -> bool {
        let penalty = self.individual.upper_cost - self.individual.distance();
        penalty.abs() < 1e-6 && self.charged_routes.iter().all(Option::is_some)
    }
}

/// Run the configured pipeline once with the given seed
pub fn solve(prep: &Preprocessed, config: &SolverConfig, seed: u64) -> Result<SolveOutcome> {
    let start = Instant::now();

    let construction = config.construction_heuristic(seed);
    let mut individual = construction.construct(prep)?;
    ensure!(individual.is_complete(prep), "{} left customers unserved", construction.name());
    let construction_cost = individual.upper_cost;
    log::info!("{}: upper cost {:.2}", construction.name(), construction_cost);

    let mut algorithm = construction.name().to_string();
    if let Some(driver) = config.driver(seed) {
        let improved = driver.improve(prep, &mut individual);
        log::info!(
            "{}: upper cost {:.2} (improved: {})",
            driver.name(),
            individual.upper_cost,
            improved
        );
        algorithm = format!("{} + {}", algorithm, driver.name());
    }

    let mut follower = Follower::new(prep, config.follower.clone());
    let charged_routes = if config.polish {
        let (lower, routes) = follower.polish_individual(&mut individual);
        log::info!("Polished lower cost {:.2}", lower);
        routes
    } else {
        let lower = follower.run_on_individual(&mut individual);
        log::info!("Lower cost {:.2}", lower);
        follower.charged_routes(&individual)
    };

    let unreachable = charged_routes.iter().filter(|r| r.is_none()).count();
    if unreachable > 0 {
        log::warn!("{} routes cannot be repaired within the battery range", unreachable);
    }

    Ok(SolveOutcome {
        instance: prep.instance.name.clone(),
        algorithm,
        seed,
        construction_cost,
        individual,
        charged_routes,
        time: start.elapsed().as_secs_f64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConstructionKind, DriverKind};
    use crate::instance::fixtures;
    use crate::preprocessing::PreprocessConfig;

    fn prep() -> Preprocessed {
        Preprocessed::new(fixtures::e_n22_k4(), PreprocessConfig::default())
    }

    #[test]
    fn test_solve_with_descent() {
        let prep = prep();
        let mut config = SolverConfig::default();
        config.driver.kind = DriverKind::Descent;
        let outcome = solve(&prep, &config, 1).unwrap();

        assert!(outcome.individual.is_complete(&prep));
        assert!(outcome.upper_cost() <= outcome.construction_cost + 1e-9);
        assert!(outcome.lower_cost() >= outcome.individual.distance() - 1e-6);
        assert_eq!(outcome.charged_routes.len(), outcome.num_routes());
        assert_eq!(outcome.algorithm, "MultiStart + Descent");
    }

    #[test]
    fn test_charged_routes_keep_the_customers() {
        let prep = prep();
        let mut config = SolverConfig::default();
        config.construction = ConstructionKind::Greedy;
        config.driver.kind = DriverKind::None;
        let outcome = solve(&prep, &config, 1).unwrap();

        for (route, charged) in outcome.individual.routes.iter().zip(&outcome.charged_routes) {
            let Some(charged) = charged else { continue };
            let customers: Vec<usize> = charged.iter().copied().filter(|&n| prep.instance.is_customer(n)).collect();
            assert_eq!(customers, route.customers());
        }
    }

    #[test]
    fn test_polish_never_exceeds_repair() {
        let prep = prep();
        let mut config = SolverConfig::default();
        config.driver.kind = DriverKind::Descent;
        let repaired = solve(&prep, &config, 5).unwrap();
        config.polish = true;
        let polished = solve(&prep, &config, 5).unwrap();

        assert_eq!(repaired.individual.giant_tour(), polished.individual.giant_tour());
        assert!(polished.lower_cost() <= repaired.lower_cost() + 1e-6);
    }
}
