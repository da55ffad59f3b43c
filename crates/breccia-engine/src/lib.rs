//! Search and evaluation for breccia.

pub mod eval;
pub mod search;
pub mod time;

pub use eval::{evaluate, EVAL_MAX, INF, WIN_SCORE, WIN_THRESHOLD};
pub use search::control::SearchControl;
pub use search::stats::SearchStats;
pub use search::{Outcome, RootMove, SearchOutcome, Searcher, SearcherConfig};
pub use time::{FixedBudget, ReservePolicy, TimeBudget, TimeControl, TimePolicy};
