//! The search driver: root move preparation, iterative deepening, and the
//! scoped worker pool.

pub mod control;
pub mod exists;
pub mod heuristics;
pub mod stats;
pub mod tt;

pub(crate) mod quiesce;
pub(crate) mod split;
pub(crate) mod tree;
pub(crate) mod worker;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use breccia_core::{full_moves, has_any_move, Board, Move, MoveList};

use crate::eval::{INF, WIN_SCORE, WIN_THRESHOLD};
use crate::time::{TimeBudget, TimeControl};
use control::SearchControl;
use exists::ExistsTable;
use split::{SpId, SpInit};
use stats::SearchStats;
use tree::SearchTree;
use tt::{Bound, TranspositionTable};
use worker::Worker;

/// How a search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every requested depth completed.
    Complete,
    /// The time budget ran out; the result is the deepest completed depth.
    TimedOut,
    /// An external interrupt stopped the search.
    Interrupted,
    /// A forced win was proven.
    ProvenWin,
    /// A forced loss was proven.
    ProvenLoss,
    /// The position has no legal moves at all.
    NoLegalMoves,
}

/// Result of one `search_id` call.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Best move found, `None` only when the position has no legal moves.
    pub best_move: Option<Move>,
    /// Eval of the best move from the mover's perspective.
    pub eval: i32,
    /// Whether `eval` is exact or a bound.
    pub bound: Bound,
    /// Deepest fully-completed iteration.
    pub depth: u8,
    /// Principal variation of the deepest completed iteration.
    pub pv: Vec<Move>,
    /// Why the search stopped.
    pub outcome: Outcome,
    /// Aggregated counters from every worker.
    pub stats: SearchStats,
}

/// A root move with its latest known eval.
#[derive(Debug, Clone, Copy)]
pub struct RootMove {
    pub mv: Move,
    /// Eval from the last iteration that finished this move.
    pub eval: i32,
    /// The opponent has an immediate winning reply to this move.
    pub losing: bool,
}

/// Construction-time configuration.
#[derive(Debug, Clone)]
pub struct SearcherConfig {
    /// Worker threads, master included. Must be at least 1.
    pub num_threads: usize,
    /// Transposition table size in megabytes.
    pub tt_mb: usize,
    /// Conservative hash cutoffs (exact stored-depth match). Keeps results
    /// reproducible across thread counts; turn off for a faster, less
    /// stable search.
    pub conservative_tt: bool,
    /// First iterative-deepening depth.
    pub start_depth: u8,
    /// Bias term seeded into the root (asymmetric-play experiments).
    pub root_bias: i32,
}

impl Default for SearcherConfig {
    fn default() -> Self {
        Self {
            num_threads: 1,
            tt_mb: 16,
            conservative_tt: true,
            start_depth: 1,
            root_bias: 0,
        }
    }
}

/// Tracks eval stability across ID iterations for time management.
///
/// A dropping eval or a changing best move means the position is not
/// understood yet — spend longer. A stable best move can be played faster.
struct EvalTrend {
    last_move: Move,
    last_eval: i32,
    stable_streak: u32,
}

impl EvalTrend {
    fn new() -> Self {
        Self {
            last_move: Move::NULL,
            last_eval: 0,
            stable_streak: 0,
        }
    }

    /// Update with the latest iteration and return a scale in hundredths.
    fn update(&mut self, best_move: Move, eval: i32) -> i32 {
        let scale;
        if self.last_move.is_null() {
            scale = 100;
        } else {
            let drop = self.last_eval - eval;
            if drop > 200 {
                self.stable_streak = 0;
                scale = 250;
            } else if drop > 100 {
                self.stable_streak = 0;
                scale = 180;
            } else if best_move == self.last_move {
                self.stable_streak += 1;
                scale = if self.stable_streak >= 3 { 60 } else { 100 };
            } else {
                self.stable_streak = 0;
                scale = 100;
            }
        }
        self.last_move = best_move;
        self.last_eval = eval;
        scale
    }
}

/// The top-level driver: owns the hash tables and the time/interrupt
/// state, runs one complete timed search per [`search_id`](Self::search_id)
/// call.
pub struct Searcher {
    config: SearcherConfig,
    tt: TranspositionTable,
    exists: ExistsTable,
    control: Arc<SearchControl>,
    time_control: Mutex<Option<Arc<dyn TimeControl>>>,
    root_moves: Vec<RootMove>,
    id_pv: Vec<Move>,
    last_outcome: Option<SearchOutcome>,
}

impl Searcher {
    /// Create a searcher. The hash tables are allocated here and resized
    /// only between searches.
    ///
    /// # Panics
    ///
    /// A zero thread count or zero starting depth is a caller bug and
    /// panics immediately.
    pub fn new(config: SearcherConfig) -> Self {
        assert!(config.num_threads >= 1, "thread count must be at least 1");
        assert!(config.start_depth >= 1, "starting depth must be at least 1");
        let tt = TranspositionTable::new(config.tt_mb);
        Self {
            config,
            tt,
            exists: ExistsTable::new(breccia_core::MAX_MOVES),
            control: Arc::new(SearchControl::new()),
            time_control: Mutex::new(None),
            root_moves: Vec::new(),
            id_pv: Vec::new(),
            last_outcome: None,
        }
    }

    /// Shared handle to the search/interrupt state, for callers that need
    /// to interrupt a search already running on another thread.
    pub fn control(&self) -> Arc<SearchControl> {
        Arc::clone(&self.control)
    }

    /// Set the id of the next search. Thread-safe.
    pub fn set_search_id(&self, id: u64) {
        self.control.set_search_id(id);
    }

    /// Interrupt the search with the given id, if it is the one running.
    /// Thread-safe, callable from outside the search.
    pub fn interrupt_external(&self, id: u64) {
        self.control.interrupt(id);
    }

    /// Install a time-control source consulted at the start of each
    /// search. Thread-safe.
    pub fn set_time_control(&self, tc: Arc<dyn TimeControl>) {
        *self.time_control.lock().expect("time control mutex poisoned") = Some(tc);
    }

    /// Resize the transposition table. Between searches only.
    pub fn resize_tt(&mut self, mb: usize) {
        self.tt.resize(mb);
    }

    /// Best move of the last search.
    pub fn best_move(&self) -> Option<Move> {
        self.last_outcome.as_ref().and_then(|o| o.best_move)
    }

    /// Principal variation of the last search's deepest completed depth.
    pub fn id_pv(&self) -> &[Move] {
        &self.id_pv
    }

    /// Root moves of the last search, best first.
    pub fn sorted_root_moves(&self) -> &[RootMove] {
        &self.root_moves
    }

    /// Aggregated counters of the last search.
    pub fn stats(&self) -> SearchStats {
        self.last_outcome
            .as_ref()
            .map(|o| o.stats)
            .unwrap_or_default()
    }

    /// Resolve the active budget: the installed time control's triple,
    /// clamped by the caller's `max_seconds` (zero means unbounded).
    fn resolve_budget(&self, max_seconds: f64) -> TimeBudget {
        let from_control = self
            .time_control
            .lock()
            .expect("time control mutex poisoned")
            .as_ref()
            .map(|tc| tc.min_normal_max());
        match from_control {
            Some(budget) if max_seconds > 0.0 => TimeBudget {
                min: budget.min.min(max_seconds),
                normal: budget.normal.min(max_seconds),
                max: budget.max.min(max_seconds),
            },
            Some(budget) => budget,
            None => TimeBudget::uniform(max_seconds.max(0.0)),
        }
    }

    /// Run one complete search: generate root moves, then iteratively
    /// deepen from `start_depth` to `max_depth` under the time budget.
    /// Blocks until finished.
    ///
    /// `history` holds the situational hashes of earlier game positions;
    /// reaching one of them again forfeits for the side that repeated.
    ///
    /// # Panics
    ///
    /// An inconsistent `board` is a caller bug and panics immediately.
    pub fn search_id(
        &mut self,
        board: &Board,
        history: &[u64],
        max_depth: u8,
        max_seconds: f64,
    ) -> SearchOutcome {
        if let Err(err) = board.is_consistent() {
            panic!("search_id called with an inconsistent board: {err}");
        }

        let budget = self.resolve_budget(max_seconds);
        self.control.begin(budget);
        self.id_pv.clear();
        self.root_moves.clear();

        // An already-decided game needs no tree.
        if let Some(winner) = board.winner() {
            let won = winner == board.side_to_move();
            return self.conclude(SearchOutcome {
                best_move: None,
                eval: if won { WIN_SCORE } else { -WIN_SCORE },
                bound: Bound::Exact,
                depth: 0,
                pv: Vec::new(),
                outcome: if won { Outcome::ProvenWin } else { Outcome::ProvenLoss },
                stats: SearchStats::default(),
            });
        }
        if !has_any_move(board) {
            return self.conclude(SearchOutcome {
                best_move: None,
                eval: -WIN_SCORE,
                bound: Bound::Exact,
                depth: 0,
                pv: Vec::new(),
                outcome: Outcome::NoLegalMoves,
                stats: SearchStats::default(),
            });
        }

        // Root move generation; a move that wins on the spot ends the
        // search before any tree is built.
        let mut root_moves = match self.generate_root_moves(board) {
            Ok(moves) => moves,
            Err(winning) => {
                return self.conclude(SearchOutcome {
                    best_move: Some(winning),
                    eval: WIN_SCORE - 1,
                    bound: Bound::Exact,
                    depth: 1,
                    pv: vec![winning],
                    outcome: Outcome::ProvenWin,
                    stats: SearchStats::default(),
                });
            }
        };
        let non_losing = root_moves.iter().filter(|rm| !rm.losing).count();

        let mut completed = CompletedIteration::default();
        let mut trend = EvalTrend::new();
        let mut stats = SearchStats::default();
        let mut outcome = Outcome::Complete;

        let tree = SearchTree::new(
            board.clone(),
            history.to_vec(),
            &self.tt,
            self.control.as_ref(),
            self.config.conservative_tt,
            self.config.num_threads,
        );
        let mut master = Worker::new(0, true, board.clone());
        master.own_buffer = Some(SearchTree::ROOT_BUFFER);

        std::thread::scope(|scope| {
            let helpers: Vec<_> = (1..self.config.num_threads)
                .map(|thread_id| {
                    let tree = &tree;
                    scope.spawn(move || {
                        let mut helper = Worker::new(thread_id, false, tree.root_board.clone());
                        worker::run(&mut helper, tree, None);
                        helper.stats
                    })
                })
                .collect();

            for depth in self.config.start_depth..=max_depth {
                if self.control.check_now() {
                    outcome = self.stop_outcome();
                    break;
                }
                if self.control.desired_elapsed() {
                    outcome = Outcome::TimedOut;
                    break;
                }

                // Previous best first; the rest keep the static generation
                // order (losing moves last). Bound evals from zero-window
                // tail searches are timing-noisy, so they never influence
                // the searched order — that keeps results identical across
                // thread counts.
                root_moves.sort_by_key(|rm| rm.losing);
                if !completed.best_move.is_null()
                    && let Some(pos) = root_moves.iter().position(|rm| rm.mv == completed.best_move)
                {
                    let best = root_moves.remove(pos);
                    root_moves.insert(0, best);
                }
                let preset: Vec<Move> = root_moves.iter().map(|rm| rm.mv).collect();

                tree.claim_root_buffer(&mut master);
                master.sync_to(&tree.root_board, &[]);
                let root_id = SpId {
                    buf: SearchTree::ROOT_BUFFER,
                    ply: 0,
                };
                tree.slot(root_id).init(SpInit {
                    c_depth: 0,
                    r_depth: depth,
                    hash: board.situational_hash(),
                    parent: None,
                    parent_index: 0,
                    parent_move: Move::NULL,
                    alpha: -INF,
                    beta: INF,
                    extra_eval: self.config.root_bias,
                    hash_move: Move::NULL,
                    parent_fallback: None,
                    null_plan: None,
                    path: Vec::new(),
                    killers: master.killers.clone(),
                    preset_moves: Some(preset),
                    record_move_evals: true,
                });

                let root_gen = tree
                    .slot(root_id)
                    .generation
                    .load(std::sync::atomic::Ordering::Acquire);
                tree.begin_iteration();
                worker::run(&mut master, &tree, Some((root_id, root_gen)));
                let result = tree
                    .take_root_result()
                    .expect("root split point always resolves");

                if result.invalid {
                    outcome = self.stop_outcome();
                    break;
                }

                // The iteration finished cleanly — adopt its results.
                for (index, eval) in result.move_evals.iter().enumerate() {
                    if *eval > -INF {
                        root_moves[index].eval = *eval;
                    }
                }
                completed = CompletedIteration {
                    depth,
                    best_move: result.best_move,
                    eval: result.value,
                    pv: result.pv.clone(),
                };
                debug!(
                    depth,
                    eval = result.value,
                    best = %result.best_move,
                    finished = result.finished_moves,
                    "iteration complete"
                );

                self.control.mark_safe_to_stop();
                let scale = trend.update(result.best_move, result.value);
                let desired = budget.normal_duration().mul_f64(scale as f64 / 100.0);
                if desired > Duration::ZERO {
                    self.control.update_desired(desired);
                }

                if result.value.abs() > WIN_THRESHOLD {
                    outcome = if result.value > 0 {
                        Outcome::ProvenWin
                    } else {
                        Outcome::ProvenLoss
                    };
                    break;
                }
                if non_losing == 1 {
                    // Only one move avoids an immediate loss; no point
                    // deepening further.
                    break;
                }
            }

            tree.end_search();
            for handle in helpers {
                stats.merge(&handle.join().expect("helper thread panicked"));
            }
        });

        stats.merge(&master.stats);
        assert!(
            tree.all_slots_free(),
            "split point leaked: a buffer slot survived the search"
        );
        // Release the tree's borrow of the hash table before the readback.
        drop(tree);

        // Final sort for the read-back API.
        root_moves.sort_by(|a, b| a.losing.cmp(&b.losing).then(b.eval.cmp(&a.eval)));
        self.root_moves = root_moves;

        let bound = if completed.depth == 0 {
            Bound::None
        } else {
            Bound::Exact
        };
        let best_move = if completed.best_move.is_null() {
            self.root_moves.first().map(|rm| rm.mv)
        } else {
            Some(completed.best_move)
        };

        self.conclude(SearchOutcome {
            best_move,
            eval: completed.eval,
            bound,
            depth: completed.depth,
            pv: completed.pv,
            outcome,
            stats,
        })
    }

    /// Distinguish an external interrupt from a timeout.
    fn stop_outcome(&self) -> Outcome {
        if self.control.was_interrupted() {
            Outcome::Interrupted
        } else {
            Outcome::TimedOut
        }
    }

    /// Generate, dedup, and classify root moves.
    ///
    /// Returns `Err(mv)` when `mv` wins immediately. The exists table
    /// drops root moves whose resulting positions transpose; it is used
    /// only here, strictly before the parallel phase.
    fn generate_root_moves(&mut self, board: &Board) -> Result<Vec<RootMove>, Move> {
        let mut list = MoveList::new();
        full_moves(board, &mut list);

        self.exists.clear();
        let mut scratch = board.clone();
        let mut root_moves = Vec::with_capacity(list.len());

        for &mv in &list {
            let undo = scratch.apply(mv);

            if scratch.winner().is_some() {
                return Err(mv);
            }
            if !self.exists.insert(scratch.situational_hash()) {
                scratch.undo(undo);
                continue;
            }
            let losing = opponent_wins_immediately(&mut scratch);
            scratch.undo(undo);

            root_moves.push(RootMove {
                mv,
                eval: -INF,
                losing,
            });
        }

        Ok(root_moves)
    }

    fn conclude(&mut self, outcome: SearchOutcome) -> SearchOutcome {
        self.id_pv = outcome.pv.clone();
        self.last_outcome = Some(outcome.clone());
        outcome
    }
}

/// Whether the side to move has a reply that ends the game in its favor.
fn opponent_wins_immediately(board: &mut Board) -> bool {
    let mut replies = MoveList::new();
    full_moves(board, &mut replies);
    let mover = board.side_to_move();
    for &reply in &replies {
        let undo = board.apply(reply);
        let won = board.winner() == Some(mover);
        board.undo(undo);
        if won {
            return true;
        }
    }
    false
}

/// The deepest fully-completed iteration's results.
struct CompletedIteration {
    depth: u8,
    best_move: Move,
    eval: i32,
    pv: Vec<Move>,
}

impl Default for CompletedIteration {
    fn default() -> Self {
        Self {
            depth: 0,
            best_move: Move::NULL,
            eval: 0,
            pv: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search(board: &Board, depth: u8, threads: usize) -> SearchOutcome {
        let mut searcher = Searcher::new(SearcherConfig {
            num_threads: threads,
            ..SearcherConfig::default()
        });
        searcher.search_id(board, &[], depth, 0.0)
    }

    #[test]
    fn depth_1_returns_legal_move() {
        let board = Board::starting_position();
        let outcome = search(&board, 1, 1);
        let best = outcome.best_move.expect("startpos has moves");
        let mut check = board.clone();
        assert!(check.try_apply(best).is_ok(), "best move must be legal");
        assert_eq!(outcome.depth, 1);
        assert_eq!(outcome.outcome, Outcome::Complete);
    }

    #[test]
    fn immediate_goal_run_short_circuits() {
        // White e7 wins by stepping to e8; no tree search needed.
        let board: Board = "8/4P3/8/8/8/8/2pp4/8 w".parse().unwrap();
        let outcome = search(&board, 5, 1);
        assert_eq!(outcome.outcome, Outcome::ProvenWin);
        let best = outcome.best_move.expect("winning move returned");
        assert_eq!(best.dest().rank(), 7, "winning move reaches the goal rank");
    }

    #[test]
    fn decided_game_returns_without_searching() {
        let board: Board = "4P3/8/8/8/8/8/2p5/8 b".parse().unwrap();
        let outcome = search(&board, 5, 1);
        assert_eq!(outcome.outcome, Outcome::ProvenLoss);
        assert!(outcome.best_move.is_none());
        assert_eq!(outcome.stats.total_nodes(), 0);
    }

    #[test]
    fn single_legal_move_position() {
        // White a1: the straight step is blocked by black a2 (straight
        // steps cannot capture), leaving the diagonal capture a1xb2 as the
        // single legal move.
        let board: Board = "p7/8/8/8/8/8/pp6/P7 w".parse().unwrap();
        let outcome = search(&board, 1, 1);
        assert_eq!(
            outcome.best_move.map(|m| format!("{m}")),
            Some("a1b2".to_string()),
            "the single legal move is returned"
        );
    }

    #[test]
    fn forced_win_reports_proven_outcome() {
        // White c6 reaches goal in two moves; black's f4 piece is three
        // moves from its own goal and can neither capture nor block.
        let board: Board = "8/8/2P5/8/5p2/8/8/8 w".parse().unwrap();
        let outcome = search(&board, 4, 1);
        assert_eq!(outcome.outcome, Outcome::ProvenWin);
        assert!(outcome.eval > WIN_THRESHOLD);
    }

    #[test]
    fn pre_set_interrupt_stops_immediately() {
        let mut searcher = Searcher::new(SearcherConfig::default());
        searcher.set_search_id(3);
        searcher.interrupt_external(3);
        let outcome = searcher.search_id(&Board::starting_position(), &[], 30, 0.0);
        assert_eq!(outcome.outcome, Outcome::Interrupted);
        assert_eq!(outcome.depth, 0, "no iteration should complete");
    }

    #[test]
    fn repetition_in_history_scores_as_loss() {
        // Any reachable child position pre-loaded into the history is
        // treated as a forfeit for the mover, so all root moves score as
        // losses at depth 1.
        let board: Board = "8/p7/8/8/8/8/7P/8 w".parse().unwrap();
        let mut child = board.clone();
        let mut list = MoveList::new();
        full_moves(&board, &mut list);
        let mut history = Vec::new();
        for &mv in &list {
            let undo = child.apply(mv);
            history.push(child.situational_hash());
            child.undo(undo);
        }
        let mut searcher = Searcher::new(SearcherConfig::default());
        let outcome = searcher.search_id(&board, &history, 1, 0.0);
        assert!(
            outcome.eval < -WIN_THRESHOLD,
            "every continuation repeats, eval {} should be a loss",
            outcome.eval
        );
    }

    #[test]
    fn sorted_root_moves_available_after_search() {
        let board = Board::starting_position();
        let mut searcher = Searcher::new(SearcherConfig::default());
        searcher.search_id(&board, &[], 3, 0.0);
        let roots = searcher.sorted_root_moves();
        assert_eq!(roots.len(), 22);
        assert_eq!(
            Some(roots[0].mv),
            searcher.best_move(),
            "first sorted root move is the best move"
        );
        for pair in roots.windows(2) {
            if !pair[0].losing && !pair[1].losing {
                assert!(pair[0].eval >= pair[1].eval, "root moves sorted by eval");
            }
        }
    }

    #[test]
    fn zero_threads_panics() {
        let result = std::panic::catch_unwind(|| {
            Searcher::new(SearcherConfig {
                num_threads: 0,
                ..SearcherConfig::default()
            })
        });
        assert!(result.is_err(), "zero threads is a precondition violation");
    }
}
