//! Time budgets — the search core only ever consumes a (min, normal, max)
//! seconds triple; how that triple is derived from a game clock is a
//! pluggable policy.

use std::time::Duration;

/// A per-search time budget in seconds.
///
/// - `min`: never stop before this much has elapsed (unless the search is
///   provably finished).
/// - `normal`: the desired spend; iterative deepening stops starting new
///   depths past it.
/// - `max`: the hard deadline; workers abort cooperatively once past it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeBudget {
    pub min: f64,
    pub normal: f64,
    pub max: f64,
}

impl TimeBudget {
    /// A budget with all three bounds equal (fixed move time).
    pub fn uniform(seconds: f64) -> TimeBudget {
        let seconds = seconds.max(0.0);
        TimeBudget {
            min: seconds,
            normal: seconds,
            max: seconds,
        }
    }

    /// The hard deadline as a [`Duration`].
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs_f64(self.max.max(0.0))
    }

    /// The desired spend as a [`Duration`].
    pub fn normal_duration(&self) -> Duration {
        Duration::from_secs_f64(self.normal.max(0.0))
    }
}

/// Source of the active time budget. Implementations must be shareable
/// across the worker pool and updatable from outside a running search.
pub trait TimeControl: Send + Sync {
    /// The current (min, normal, max) triple.
    fn min_normal_max(&self) -> TimeBudget;
}

/// The simplest control: a fixed budget, typically from an explicit
/// per-move time limit.
#[derive(Debug, Clone)]
pub struct FixedBudget {
    budget: TimeBudget,
}

impl FixedBudget {
    /// Budget `seconds` for this move, all three bounds equal.
    pub fn new(seconds: f64) -> Self {
        Self {
            budget: TimeBudget::uniform(seconds),
        }
    }
}

impl TimeControl for FixedBudget {
    fn min_normal_max(&self) -> TimeBudget {
        self.budget
    }
}

/// Strategy converting clock state into a budget triple.
///
/// The numeric curve is a tuning heuristic, deliberately kept behind this
/// trait so the driver never hard-codes it.
pub trait TimePolicy: Send + Sync {
    /// Derive a budget from the remaining reserve, the time already used
    /// this game, and the number of moves played.
    fn min_normal_max(&self, reserve: f64, used: f64, moves_played: u32) -> TimeBudget;
}

/// Default reserve-based budget curve.
///
/// | Parameter | Meaning | Default |
/// |-----------|---------|---------|
/// | `horizon` | expected remaining moves early in the game | 28 |
/// | `min_ratio` | `min` as a fraction of `normal` | 0.3 |
/// | `max_ratio` | `max` as a multiple of `normal` | 3.0 |
/// | reserve cap | `max` never exceeds this fraction of the reserve | 0.25 |
///
/// The horizon shrinks as the game progresses (one expected move fewer per
/// two moves played, floored at 8), so late-game budgets grow.
#[derive(Debug, Clone)]
pub struct ReservePolicy {
    /// Expected remaining moves at the start of the game.
    pub horizon: f64,
    /// `min` as a fraction of `normal`.
    pub min_ratio: f64,
    /// `max` as a multiple of `normal`.
    pub max_ratio: f64,
}

impl Default for ReservePolicy {
    fn default() -> Self {
        Self {
            horizon: 28.0,
            min_ratio: 0.3,
            max_ratio: 3.0,
        }
    }
}

impl TimePolicy for ReservePolicy {
    fn min_normal_max(&self, reserve: f64, _used: f64, moves_played: u32) -> TimeBudget {
        if reserve <= 0.01 {
            return TimeBudget::uniform(0.01);
        }

        let horizon = (self.horizon - moves_played as f64 / 2.0).max(8.0);
        let normal = reserve / horizon;
        let min = normal * self.min_ratio;
        let max = (normal * self.max_ratio).min(reserve * 0.25).max(min);

        TimeBudget { min, normal, max }
    }
}

#[cfg(test)]
mod tests {
    use super::{FixedBudget, ReservePolicy, TimeBudget, TimeControl, TimePolicy};

    #[test]
    fn uniform_budget_equalizes_bounds() {
        let budget = TimeBudget::uniform(5.0);
        assert_eq!(budget.min, 5.0);
        assert_eq!(budget.normal, 5.0);
        assert_eq!(budget.max, 5.0);
    }

    #[test]
    fn uniform_clamps_negative_seconds() {
        let budget = TimeBudget::uniform(-1.0);
        assert_eq!(budget.max, 0.0);
    }

    #[test]
    fn fixed_budget_is_a_time_control() {
        let control = FixedBudget::new(2.5);
        assert_eq!(control.min_normal_max().max, 2.5);
    }

    #[test]
    fn reserve_policy_orders_bounds() {
        let policy = ReservePolicy::default();
        let budget = policy.min_normal_max(120.0, 30.0, 10);
        assert!(budget.min <= budget.normal, "min <= normal");
        assert!(budget.normal <= budget.max, "normal <= max");
        assert!(budget.max <= 120.0 * 0.25 + 1e-9, "max capped by reserve");
    }

    #[test]
    fn reserve_policy_spends_more_late() {
        let policy = ReservePolicy::default();
        let early = policy.min_normal_max(60.0, 0.0, 0);
        let late = policy.min_normal_max(60.0, 0.0, 40);
        assert!(
            late.normal > early.normal,
            "shrinking horizon should grow the per-move budget"
        );
    }

    #[test]
    fn reserve_policy_survives_empty_clock() {
        let policy = ReservePolicy::default();
        let budget = policy.min_normal_max(0.0, 100.0, 50);
        assert!(budget.max <= 0.011, "empty reserve yields a token budget");
    }
}
