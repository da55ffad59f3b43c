//! Search control — the one lock guarding time and interruption state.
//!
//! Every field visible across threads during a search lives in
//! [`TimeState`] behind a single mutex, accessed only through the methods
//! here. Workers poll cheaply (once every [`CHECK_INTERVAL`] nodes); the
//! master polls between root moves and between iterative-deepening depths.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::time::TimeBudget;

/// Workers consult the clock once per this many visited nodes.
pub const CHECK_INTERVAL: u64 = 1024;

/// The fully-enumerated shared time/interrupt state.
#[derive(Debug, Clone)]
struct TimeState {
    /// Identity of the running (or next) search.
    search_id: u64,
    /// Externally-requested interrupt target, if any.
    interrupt_id: Option<u64>,
    /// Set once any path has decided the search must stop.
    stop_decided: bool,
    /// Set once enough of the first iteration has finished that stopping
    /// early would not be reckless.
    safe_to_stop: bool,
    /// When the current search started.
    started_at: Option<Instant>,
    /// Desired spend — iterative deepening stops past this.
    desired: Duration,
    /// Hard deadline — workers abort past this.
    deadline: Duration,
}

/// Thread-safe search stop/time coordinator.
pub struct SearchControl {
    state: Mutex<TimeState>,
}

impl SearchControl {
    /// Create a control with no active search.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TimeState {
                search_id: 0,
                interrupt_id: None,
                stop_decided: false,
                safe_to_stop: false,
                started_at: None,
                desired: Duration::ZERO,
                deadline: Duration::ZERO,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimeState> {
        self.state.lock().expect("time state mutex poisoned")
    }

    /// Set the id of the next search. Callable from outside a search.
    pub fn set_search_id(&self, id: u64) {
        self.lock().search_id = id;
    }

    /// The current search id.
    pub fn search_id(&self) -> u64 {
        self.lock().search_id
    }

    /// Request that the search with the given id stop. Thread-safe; a stale
    /// id (from a search that already finished) is a no-op.
    pub fn interrupt(&self, id: u64) {
        let mut state = self.lock();
        state.interrupt_id = Some(id);
        if state.search_id == id {
            state.stop_decided = true;
        }
    }

    /// Arm the clock for a new search with the given budget.
    ///
    /// Resets the per-search flags; the search id and any pending interrupt
    /// id are left untouched so a pre-arranged interrupt still fires.
    pub fn begin(&self, budget: TimeBudget) {
        let mut state = self.lock();
        state.stop_decided = state.interrupt_id == Some(state.search_id);
        state.safe_to_stop = false;
        state.started_at = Some(Instant::now());
        state.desired = budget.normal_duration();
        state.deadline = budget.max_duration();
    }

    /// Replace the desired spend (eval-trend rescaling between depths).
    /// Never exceeds the hard deadline.
    pub fn update_desired(&self, desired: Duration) {
        let mut state = self.lock();
        state.desired = desired.min(state.deadline);
    }

    /// Mark that stopping early is now acceptable.
    pub fn mark_safe_to_stop(&self) {
        self.lock().safe_to_stop = true;
    }

    /// Record an explicit stop decision.
    pub fn decide_stop(&self) {
        self.lock().stop_decided = true;
    }

    /// Elapsed time since [`begin`](Self::begin), or zero before it.
    pub fn elapsed(&self) -> Duration {
        self.lock().started_at.map_or(Duration::ZERO, |s| s.elapsed())
    }

    /// Worker-side poll: should this thread terminate its search?
    ///
    /// Cheap for most calls — the clock is only consulted every
    /// [`CHECK_INTERVAL`] nodes. Once the deadline fires, the stop decision
    /// is latched so later calls return without clock reads.
    pub fn should_terminate(&self, nodes: u64) -> bool {
        if nodes % CHECK_INTERVAL != 0 {
            return false;
        }
        self.check_now()
    }

    /// Unconditional poll (master checks between root moves and depths).
    pub fn check_now(&self) -> bool {
        let mut state = self.lock();
        if state.stop_decided {
            return true;
        }
        if state.interrupt_id == Some(state.search_id) {
            state.stop_decided = true;
            return true;
        }
        if let Some(started) = state.started_at
            && state.deadline > Duration::ZERO
            && started.elapsed() >= state.deadline
        {
            state.stop_decided = true;
            return true;
        }
        false
    }

    /// Whether the desired spend has been reached and stopping is safe.
    ///
    /// Used between iterative-deepening depths: a whole next depth is
    /// skipped once the normal budget is gone.
    pub fn desired_elapsed(&self) -> bool {
        let state = self.lock();
        if !state.safe_to_stop {
            return false;
        }
        match state.started_at {
            Some(started) => {
                state.desired > Duration::ZERO && started.elapsed() >= state.desired
            }
            None => false,
        }
    }

    /// Whether a stop has already been decided (no clock read).
    pub fn stop_decided(&self) -> bool {
        self.lock().stop_decided
    }

    /// Whether the current search id has been externally interrupted.
    pub fn was_interrupted(&self) -> bool {
        let state = self.lock();
        state.interrupt_id == Some(state.search_id)
    }
}

impl Default for SearchControl {
    fn default() -> Self {
        Self::new()
    }
}
