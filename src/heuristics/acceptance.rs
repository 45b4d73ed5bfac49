//! Acceptance policies for single-move exploration.
//!
//! A policy decides from the current cost and the cost delta of a candidate
//! move whether the move is committed.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Minimum decrease counted as an improvement
pub const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Acceptance {
    /// Strict improvement only
    Improvement,
    /// Record-to-record: stay under an externally supplied reference cost
    HistoryThreshold { history: f64 },
    /// Metropolis criterion at the given temperature
    Annealing { temperature: f64 },
    /// Any move keeping the total cost under the border
    Border { border: f64 },
}

impl Acceptance {
    pub fn accepts<R: Rng + ?Sized>(&self, current_cost: f64, delta: f64, rng: &mut R) -> bool {
        match *self {
            Acceptance::Improvement => delta < -EPSILON,
            Acceptance::HistoryThreshold { history } => current_cost + delta < history || delta <= -EPSILON,
            Acceptance::Annealing { temperature } => {
                if delta < 0.0 {
                    true
                } else if temperature <= 0.0 {
                    false
                } else {
                    rng.gen::<f64>() < (-delta / temperature).exp()
                }
            }
            Acceptance::Border { border } => current_cost + delta < border,
        }
    }

    /// Whether the policy never accepts a non-improving move
    pub fn is_descent(&self) -> bool {
        matches!(self, Acceptance::Improvement)
    }
}

impl Default for Acceptance {
    fn default() -> Self {
        Acceptance::Improvement
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_improvement() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let policy = Acceptance::Improvement;
        assert!(policy.accepts(100.0, -0.5, &mut rng));
        assert!(!policy.accepts(100.0, 0.0, &mut rng));
        assert!(!policy.accepts(100.0, -1e-12, &mut rng));
        assert!(policy.is_descent());
    }

    #[test]
    fn test_history_threshold() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let policy = Acceptance::HistoryThreshold { history: 105.0 };
        assert!(policy.accepts(100.0, 4.0, &mut rng));
        assert!(!policy.accepts(100.0, 6.0, &mut rng));
        // improving moves pass even above the reference
        assert!(policy.accepts(110.0, -1.0, &mut rng));
    }

    #[test]
    fn test_border() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let policy = Acceptance::Border { border: 110.0 };
        assert!(policy.accepts(100.0, 9.0, &mut rng));
        assert!(!policy.accepts(100.0, 10.0, &mut rng));
        assert!(!policy.accepts(120.0, -5.0, &mut rng));
    }

    #[test]
    fn test_annealing() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let frozen = Acceptance::Annealing { temperature: 0.0 };
        assert!(frozen.accepts(100.0, -1.0, &mut rng));
        assert!(!frozen.accepts(100.0, 1.0, &mut rng));

        let hot = Acceptance::Annealing { temperature: 1e9 };
        let accepted = (0..100).filter(|_| hot.accepts(100.0, 1.0, &mut rng)).count();
        assert!(accepted > 95);

        let cold = Acceptance::Annealing { temperature: 1e-3 };
        let accepted = (0..100).filter(|_| cold.accepts(100.0, 1.0, &mut rng)).count();
        assert_eq!(accepted, 0);
    }
}
