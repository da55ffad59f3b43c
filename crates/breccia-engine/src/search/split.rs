//! Split points — the unit of search-tree parallelism — and the buffers
//! that arena-allocate them.
//!
//! A split point is one board position under active search: its window, its
//! lazily-generated move list, its progress counters, and its best result.
//! Slots live in fixed [`SplitBuffer`] arrays indexed by ply and are reused
//! in place; a slot is never freed while a started move has not reported,
//! which is what keeps parent references (arena ids, not pointers) valid.
//!
//! Locking: all structured state sits behind the slot's own mutex. Four
//! facts escape the lock as atomics because other threads read them without
//! locking: `alpha` (improved monotonically via `fetch_max`), `aborted` and
//! `results_invalid` (monotonic false-to-true, so a stale read only delays
//! an abort), and `parent_key` (immutable while the node is live, read by
//! lock-free ancestor walks).

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use breccia_core::{capture_defense_moves, capture_moves, full_moves, Board, Color, Move, MoveList};

use crate::eval::{INF, WIN_SCORE};
use crate::search::heuristics::{HistoryTable, KillerTable, MAX_PLY};
use crate::search::tt::Bound;

/// Arena address of a split point: buffer index plus ply index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SpId {
    pub buf: u16,
    pub ply: u8,
}

impl SpId {
    const NONE_KEY: u32 = u32::MAX;

    /// Pack into the u32 used by the lock-free parent chain.
    pub(crate) const fn key(self) -> u32 {
        ((self.buf as u32) << 8) | self.ply as u32
    }

    /// Unpack a parent key; `None` for the root sentinel.
    pub(crate) const fn from_key(key: u32) -> Option<SpId> {
        if key == Self::NONE_KEY {
            None
        } else {
            Some(SpId {
                buf: (key >> 8) as u16,
                ply: (key & 0xFF) as u8,
            })
        }
    }
}

/// Move generation stages. Later stages skip moves already emitted by the
/// speculative hash/killer stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GenStage {
    Hash,
    Killers,
    Captures,
    Defenses,
    Quiets,
    Done,
}

/// One unit of reserved work: a move to search plus how to search it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkItem {
    /// Index of the move in the node's logical order.
    pub index: usize,
    pub mv: Move,
    /// Remaining depth the child should be searched to.
    pub child_r_depth: u8,
    /// Search the child with a minimal window (PVS tail move).
    pub zero_window: bool,
    /// Plies of late-move reduction folded into `child_r_depth`.
    pub reduction: u8,
    /// Node alpha at reservation time; re-search decisions compare against
    /// this snapshot so they match what a serial search would have done.
    pub parent_alpha: i32,
    pub parent_beta: i32,
    /// Issuing node's depth from the root.
    pub parent_c_depth: u8,
    /// Issuing node's bias term (its own perspective).
    pub extra_eval: i32,
}

/// Re-search plan for a node created as a zero-window or reduced probe.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ParentProbe {
    /// Full window from this node's perspective.
    pub full_alpha: i32,
    pub full_beta: i32,
    pub full_depth: u8,
    /// Parent window snapshot from the originating [`WorkItem`].
    pub parent_alpha: i32,
    pub parent_beta: i32,
}

/// The real-search parameters a null-move probe falls back to.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NullPlan {
    /// Window of the real node, its own perspective.
    pub alpha: i32,
    pub beta: i32,
    pub r_depth: u8,
    /// Situational hash of the real (un-passed) position.
    pub hash: u64,
    /// Bias term of the real node.
    pub extra_eval: i32,
    /// Hash move harvested for the real node.
    pub hash_move: Move,
    /// The real node's own re-search plan, restored after the probe.
    pub fallback: Option<ParentProbe>,
}

/// Everything a worker needs to (re)initialize a slot.
pub(crate) struct SpInit {
    pub c_depth: u8,
    pub r_depth: u8,
    pub hash: u64,
    pub parent: Option<SpId>,
    pub parent_index: usize,
    pub parent_move: Move,
    pub alpha: i32,
    pub beta: i32,
    pub extra_eval: i32,
    pub hash_move: Move,
    pub parent_fallback: Option<ParentProbe>,
    pub null_plan: Option<NullPlan>,
    pub path: Vec<Move>,
    pub killers: KillerTable,
    /// Root only: a pre-generated, pre-ordered move list.
    pub preset_moves: Option<Vec<Move>>,
    /// Root only: record every move's eval for root-move sorting.
    pub record_move_evals: bool,
}

/// Mutable node state, all behind the slot mutex.
pub(crate) struct SpState {
    pub c_depth: u8,
    pub r_depth: u8,
    pub hash: u64,
    pub parent: Option<SpId>,
    pub parent_index: usize,
    pub parent_move: Move,

    pub beta: i32,
    pub orig_alpha: i32,
    pub extra_eval: i32,

    pub parent_fallback: Option<ParentProbe>,
    pub null_plan: Option<NullPlan>,

    stage: GenStage,
    hash_move: Move,
    moves: Vec<Move>,
    tried_early: Vec<Move>,
    next_move: usize,

    pub started: usize,
    pub done: usize,
    pub done_legal: usize,
    pub attached: u32,
    finishing: bool,

    /// Dynamic pruning thresholds, recomputed as the move list grows.
    pub pvs_threshold: usize,
    pub reduce_thresholds: [usize; 3],

    pub best_eval: i32,
    pub best_move: Move,
    pub best_index: usize,
    pub pv: Vec<Move>,
    pub move_evals: Option<Vec<i32>>,

    pub path: Vec<Move>,
    pub killers: KillerTable,
}

impl SpState {
    fn empty() -> Self {
        Self {
            c_depth: 0,
            r_depth: 0,
            hash: 0,
            parent: None,
            parent_index: 0,
            parent_move: Move::NULL,
            beta: 0,
            orig_alpha: 0,
            extra_eval: 0,
            parent_fallback: None,
            null_plan: None,
            stage: GenStage::Done,
            hash_move: Move::NULL,
            moves: Vec::new(),
            tried_early: Vec::new(),
            next_move: 0,
            started: 0,
            done: 0,
            done_legal: 0,
            attached: 0,
            finishing: false,
            pvs_threshold: 1,
            reduce_thresholds: [usize::MAX; 3],
            best_eval: -INF,
            best_move: Move::NULL,
            best_index: usize::MAX,
            pv: Vec::new(),
            move_evals: None,
            path: Vec::new(),
            killers: KillerTable::new(),
        }
    }

    /// Whether the node can hand out no further work, now or ever.
    pub fn no_more_work(&self) -> bool {
        self.next_move >= self.moves.len() && self.stage == GenStage::Done
    }

    /// Whether a probe would find work without generating anything.
    pub fn probably_has_work(&self) -> bool {
        self.next_move < self.moves.len() || self.stage != GenStage::Done
    }

    /// Mark this thread as the node's single finisher.
    ///
    /// Returns `false` if another thread already claimed the finish.
    pub fn try_claim_finish(&mut self) -> bool {
        if self.finishing {
            false
        } else {
            self.finishing = true;
            true
        }
    }

    /// Reserve the next unit of work.
    ///
    /// Generates further move stages on demand (the caller's board cursor
    /// must be synced to this node). Returns `None` once the move list is
    /// exhausted and complete, or when `aborted` is set.
    pub fn get_work(
        &mut self,
        board: &Board,
        history: &HistoryTable,
        alpha_now: i32,
        aborted: bool,
    ) -> Option<WorkItem> {
        if aborted {
            return None;
        }

        loop {
            if self.next_move >= self.moves.len() {
                if !self.advance_stage(board, history) {
                    return None;
                }
                continue;
            }

            let index = self.next_move;
            let mv = self.moves[index];
            self.next_move += 1;

            let mover = board.side_to_move();
            let is_capture = board.piece_at(mv.dest()).is_some();

            // Late-move reduction by index versus the dynamic thresholds;
            // captures and shallow nodes are exempt.
            let mut reduction: u8 = 0;
            if !is_capture && self.r_depth >= 3 {
                let t = self.reduce_thresholds;
                reduction = if index >= t[2] {
                    3
                } else if index >= t[1] {
                    2
                } else if index >= t[0] {
                    1
                } else {
                    0
                };
                reduction = reduction.min(self.r_depth - 2);
            }

            // Goal-threat extension: the mover lands one step from goal.
            let pre_goal = (mover.goal_rank() as i8 - mover.forward()) as u8;
            let extension: u8 = if mv.dest().rank() == pre_goal { 1 } else { 0 };

            let child_r_depth =
                (self.r_depth as i16 - 1 + extension as i16 - reduction as i16).max(0) as u8;

            self.started += 1;

            return Some(WorkItem {
                index,
                mv,
                child_r_depth,
                zero_window: index >= self.pvs_threshold,
                reduction,
                parent_alpha: alpha_now,
                parent_beta: self.beta,
                parent_c_depth: self.c_depth,
                extra_eval: self.extra_eval,
            });
        }
    }

    /// Generate the next move stage. Returns `false` when no stages remain.
    fn advance_stage(&mut self, board: &Board, history: &HistoryTable) -> bool {
        match self.stage {
            GenStage::Hash => {
                self.stage = GenStage::Killers;
                if !self.hash_move.is_null() {
                    self.moves.push(self.hash_move);
                    self.tried_early.push(self.hash_move);
                    self.recompute_thresholds();
                }
                true
            }
            GenStage::Killers => {
                self.stage = GenStage::Captures;
                for killer in self.killers.at(self.c_depth as usize) {
                    if !killer.is_null() && !self.tried_early.contains(&killer) {
                        self.moves.push(killer);
                        self.tried_early.push(killer);
                    }
                }
                self.recompute_thresholds();
                true
            }
            GenStage::Captures => {
                self.stage = GenStage::Defenses;
                let mut list = MoveList::new();
                capture_moves(board, &mut list);

                let them = board.side_to_move().flip();
                let mut scored: Vec<(i32, Move)> = list
                    .as_slice()
                    .iter()
                    .filter(|mv| !self.tried_early.contains(mv))
                    .map(|&mv| {
                        // Prefer capturing the most advanced enemy piece
                        let advance = if them == Color::White {
                            mv.dest().rank() as i32
                        } else {
                            7 - mv.dest().rank() as i32
                        };
                        (advance, mv)
                    })
                    .collect();
                scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.raw().cmp(&b.1.raw())));
                self.moves.extend(scored.into_iter().map(|(_, mv)| mv));
                self.recompute_thresholds();
                true
            }
            GenStage::Defenses => {
                self.stage = GenStage::Quiets;
                // Quiet moves answering a capture threat, tried ahead of
                // the remaining quiets (their captures already ran).
                let mut list = MoveList::new();
                capture_defense_moves(board, &mut list);
                for &mv in &list {
                    if board.piece_at(mv.dest()).is_none() && !self.tried_early.contains(&mv) {
                        self.moves.push(mv);
                        self.tried_early.push(mv);
                    }
                }
                self.recompute_thresholds();
                true
            }
            GenStage::Quiets => {
                self.stage = GenStage::Done;
                let mut list = MoveList::new();
                full_moves(board, &mut list);

                let us = board.side_to_move();
                let mut scored: Vec<(i32, Move)> = list
                    .as_slice()
                    .iter()
                    .filter(|mv| {
                        board.piece_at(mv.dest()).is_none() && !self.tried_early.contains(mv)
                    })
                    .map(|&mv| (history.score(us, mv), mv))
                    .collect();
                scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.raw().cmp(&b.1.raw())));
                self.moves.extend(scored.into_iter().map(|(_, mv)| mv));
                self.recompute_thresholds();
                true
            }
            GenStage::Done => false,
        }
    }

    /// Recompute PVS/reduction thresholds from the known move count.
    ///
    /// These may tighten while the node is active; moves already reserved
    /// keep the parameters they were issued with.
    fn recompute_thresholds(&mut self) {
        let n = self.moves.len();
        self.reduce_thresholds = [(n / 3).max(4), (2 * n / 3).max(8), n.saturating_sub(2).max(14)];
    }
}

/// Outcome of reporting one finished move.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Report {
    /// The reporter was elected to finish this node.
    pub node_done: bool,
    /// The reporter should publicize the node after releasing its lock.
    pub publicize: bool,
    /// The result caused a beta cutoff.
    pub cutoff: bool,
    /// The result became the node's new best.
    pub improved: bool,
    /// Length of the node's root path (board-cursor unwinding).
    pub path_len: usize,
    /// The node's depth from the root (killer-table indexing).
    pub c_depth: u8,
    /// The node's remaining depth (history bonus scaling).
    pub r_depth: u8,
    /// Slot generation at report time; a worker continuing at this node
    /// carries it so a recycle-and-reuse underneath is detected.
    pub generation: u64,
}

/// One arena slot. See the module docs for the locking discipline.
pub(crate) struct SplitPoint {
    pub state: Mutex<SpState>,
    /// Lower bound of the search window, improved concurrently.
    pub alpha: AtomicI32,
    /// Node accepts no further results (cutoff, timeout, ancestor abort).
    /// Monotonic: set only, never cleared while live.
    pub aborted: AtomicBool,
    /// Completed work was invalidated after the fact.
    pub results_invalid: AtomicBool,
    /// Visible on the tree's public (stealable) list.
    pub public: AtomicBool,
    /// Slot allocation flag.
    pub in_use: AtomicBool,
    /// Bumped on every (re)init and recycle so a stale two-phase prober can
    /// detect that the slot changed hands while it was resyncing.
    pub generation: AtomicU64,
    /// Packed parent id for lock-free ancestor walks.
    pub parent_key: AtomicU32,
}

impl SplitPoint {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SpState::empty()),
            alpha: AtomicI32::new(-INF),
            aborted: AtomicBool::new(false),
            results_invalid: AtomicBool::new(false),
            public: AtomicBool::new(false),
            in_use: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            parent_key: AtomicU32::new(SpId::NONE_KEY),
        }
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, SpState> {
        self.state.lock().expect("split point mutex poisoned")
    }

    /// (Re)initialize this slot for a node. Always legal on a recycled or
    /// finished slot — this is how null-move and reduced-depth re-searches
    /// reuse the slot instead of allocating.
    pub(crate) fn init(&self, init: SpInit) {
        let mut state = self.lock();

        state.c_depth = init.c_depth;
        state.r_depth = init.r_depth;
        state.hash = init.hash;
        state.parent = init.parent;
        state.parent_index = init.parent_index;
        state.parent_move = init.parent_move;
        state.beta = init.beta;
        state.orig_alpha = init.alpha;
        state.extra_eval = init.extra_eval;
        state.parent_fallback = init.parent_fallback;
        state.null_plan = init.null_plan;
        state.hash_move = init.hash_move;
        state.tried_early.clear();
        state.next_move = 0;
        state.started = 0;
        state.done = 0;
        state.done_legal = 0;
        state.attached = 1; // the initializing thread
        state.finishing = false;
        state.pvs_threshold = 1;
        state.best_eval = -INF;
        state.best_move = Move::NULL;
        state.best_index = usize::MAX;
        state.pv.clear();
        state.path = init.path;
        state.killers = init.killers;

        match init.preset_moves {
            Some(moves) => {
                state.move_evals = if init.record_move_evals {
                    Some(vec![-INF; moves.len()])
                } else {
                    None
                };
                state.moves = moves;
                state.stage = GenStage::Done;
            }
            None => {
                state.moves.clear();
                state.move_evals = None;
                state.stage = GenStage::Hash;
            }
        }
        state.recompute_thresholds();

        self.alpha.store(init.alpha, Ordering::Release);
        self.aborted.store(false, Ordering::Release);
        self.results_invalid.store(false, Ordering::Release);
        self.public.store(false, Ordering::Release);
        self.in_use.store(true, Ordering::Release);
        self.parent_key.store(
            init.parent.map_or(SpId::NONE_KEY, SpId::key),
            Ordering::Release,
        );
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Record a finished move.
    ///
    /// `eval` is from this node's perspective (already negated from the
    /// child). `legal` is false for speculative candidates rejected at
    /// apply time. `invalid` marks work poisoned by a timeout or an
    /// aborted ancestor; it taints this node but never its best result.
    pub(crate) fn report_result(
        &self,
        index: usize,
        mv: Move,
        eval: i32,
        legal: bool,
        invalid: bool,
        child_pv: &[Move],
        attaching: bool,
    ) -> Report {
        let mut state = self.lock();
        let mut report = Report {
            path_len: state.path.len(),
            c_depth: state.c_depth,
            r_depth: state.r_depth,
            // Stable while this lock is held: a re-init needs the lock and
            // a recycle needs a finish claim, which our unreported move
            // excludes.
            generation: self.generation.load(Ordering::Acquire),
            ..Report::default()
        };

        state.done += 1;
        if legal {
            state.done_legal += 1;
        }

        if invalid {
            // Poison an active node; an already-aborted node expects late
            // invalid reports (its cutoff stays sound).
            if !self.aborted.load(Ordering::Acquire) {
                self.results_invalid.store(true, Ordering::Release);
                self.aborted.store(true, Ordering::Release);
            }
        } else if legal && !self.aborted.load(Ordering::Acquire) {
            if let Some(evals) = state.move_evals.as_mut() {
                evals[index] = eval;
            }

            // Ties break toward the lower index so the parallel result is
            // the one a serial left-to-right search would have kept.
            let better = eval > state.best_eval
                || (eval == state.best_eval && index < state.best_index);
            if better {
                state.best_eval = eval;
                state.best_move = mv;
                state.best_index = index;
                state.pv.clear();
                state.pv.push(mv);
                state.pv.extend_from_slice(child_pv);
                report.improved = true;

                self.alpha.fetch_max(eval, Ordering::AcqRel);

                if eval >= state.beta {
                    self.aborted.store(true, Ordering::Release);
                    report.cutoff = true;
                }
            }
        }

        let aborted = self.aborted.load(Ordering::Acquire);
        if state.done == state.started
            && (aborted || state.no_more_work())
            && state.try_claim_finish()
        {
            report.node_done = true;
        } else if attaching {
            // A finisher climbing up from a child stays attached here.
            state.attached += 1;
        }

        // Publication: at least one established legal result, work left for
        // others, and not already public. The caller publicizes after
        // releasing this lock (tree lock is never taken under a node lock).
        report.publicize = !report.node_done
            && !aborted
            && state.done_legal >= 1
            && state.probably_has_work()
            && !self.public.load(Ordering::Acquire);

        report
    }

    /// Snapshot used by the final readback and by parent reporting.
    pub(crate) fn finish_snapshot(&self) -> FinishSnapshot {
        let state = self.lock();
        // A node whose side to move has no legal moves at all has lost.
        let (value, flag) = if state.done_legal == 0 {
            (-(WIN_SCORE - state.c_depth as i32), Bound::Exact)
        } else if state.best_eval >= state.beta {
            (state.best_eval, Bound::Lower)
        } else if state.best_eval <= state.orig_alpha {
            (state.best_eval, Bound::Upper)
        } else {
            (state.best_eval, Bound::Exact)
        };
        FinishSnapshot {
            value,
            flag,
            best_move: state.best_move,
            pv: state.pv.clone(),
            parent: state.parent,
            parent_index: state.parent_index,
            parent_move: state.parent_move,
            hash: state.hash,
            c_depth: state.c_depth,
            r_depth: state.r_depth,
            extra_eval: state.extra_eval,
            done_legal: state.done_legal,
            parent_fallback: state.parent_fallback,
            null_plan: state.null_plan,
            move_evals: state.move_evals.clone(),
            invalid: self.results_invalid.load(Ordering::Acquire),
        }
    }
}

/// Copy of everything the finisher needs after releasing the node lock.
#[derive(Debug, Clone)]
pub(crate) struct FinishSnapshot {
    pub value: i32,
    pub flag: Bound,
    pub best_move: Move,
    pub pv: Vec<Move>,
    pub parent: Option<SpId>,
    pub parent_index: usize,
    pub parent_move: Move,
    pub hash: u64,
    pub c_depth: u8,
    pub r_depth: u8,
    pub extra_eval: i32,
    pub done_legal: usize,
    pub parent_fallback: Option<ParentProbe>,
    pub null_plan: Option<NullPlan>,
    pub move_evals: Option<Vec<i32>>,
    pub invalid: bool,
}

/// A per-lane arena of split point slots indexed by ply.
///
/// Owned by at most one thread at a time; the in-use slots of an owned
/// buffer always form a contiguous path from some ancestor down to the
/// owner's deepest node.
pub(crate) struct SplitBuffer {
    slots: Vec<SplitPoint>,
}

impl SplitBuffer {
    pub(crate) fn new() -> Self {
        Self {
            slots: (0..MAX_PLY).map(|_| SplitPoint::new()).collect(),
        }
    }

    pub(crate) fn slot(&self, ply: u8) -> &SplitPoint {
        &self.slots[ply as usize]
    }

    /// True when every slot has been recycled.
    pub(crate) fn all_free(&self) -> bool {
        self.slots
            .iter()
            .all(|slot| !slot.in_use.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use breccia_core::Board;

    fn full_init(board: &Board, hash_move: Move) -> SpInit {
        SpInit {
            c_depth: 0,
            r_depth: 4,
            hash: board.situational_hash(),
            parent: None,
            parent_index: 0,
            parent_move: Move::NULL,
            alpha: -INF,
            beta: INF,
            extra_eval: 0,
            hash_move,
            parent_fallback: None,
            null_plan: None,
            path: Vec::new(),
            killers: KillerTable::new(),
            preset_moves: None,
            record_move_evals: false,
        }
    }

    fn mv(s: &str) -> Move {
        Move::from_coords(s).unwrap()
    }

    #[test]
    fn sp_id_key_roundtrip() {
        let id = SpId { buf: 3, ply: 17 };
        assert_eq!(SpId::from_key(id.key()), Some(id));
        assert_eq!(SpId::from_key(u32::MAX), None);
    }

    #[test]
    fn hash_move_is_issued_first() {
        let board = Board::starting_position();
        let sp = SplitPoint::new();
        sp.init(full_init(&board, mv("e2e3")));

        let history = HistoryTable::new();
        let mut state = sp.lock();
        let item = state
            .get_work(&board, &history, -INF, false)
            .expect("node has work");
        assert_eq!(item.index, 0);
        assert_eq!(item.mv, mv("e2e3"));
        assert!(!item.zero_window, "first move gets the full window");
    }

    #[test]
    fn killers_follow_hash_move_without_duplicates() {
        let board = Board::starting_position();
        let mut killers = KillerTable::new();
        killers.store(0, mv("e2e3")); // duplicates the hash move
        killers.store(0, mv("d2d3"));

        let mut init = full_init(&board, mv("e2e3"));
        init.killers = killers;
        let sp = SplitPoint::new();
        sp.init(init);

        let history = HistoryTable::new();
        let mut state = sp.lock();
        let first = state.get_work(&board, &history, -INF, false).unwrap();
        let second = state.get_work(&board, &history, -INF, false).unwrap();
        assert_eq!(first.mv, mv("e2e3"));
        // Killer slot 0 is d2d3, slot 1 is e2e3 (deduped against the hash move)
        assert_eq!(second.mv, mv("d2d3"));
        assert!(second.zero_window, "tail moves are zero-window");
    }

    #[test]
    fn all_moves_eventually_issued_exactly_once() {
        let board = Board::starting_position();
        let sp = SplitPoint::new();
        sp.init(full_init(&board, Move::NULL));

        let history = HistoryTable::new();
        let mut state = sp.lock();
        let mut seen = Vec::new();
        while let Some(item) = state.get_work(&board, &history, -INF, false) {
            assert!(!seen.contains(&item.mv), "duplicate issue of {}", item.mv);
            seen.push(item.mv);
        }
        assert_eq!(seen.len(), 22, "starting position has 22 moves");
        assert!(state.no_more_work());
    }

    #[test]
    fn aborted_node_issues_nothing() {
        let board = Board::starting_position();
        let sp = SplitPoint::new();
        sp.init(full_init(&board, Move::NULL));

        let history = HistoryTable::new();
        let mut state = sp.lock();
        assert!(state.get_work(&board, &history, -INF, true).is_none());
    }

    #[test]
    fn report_better_result_updates_best_and_alpha() {
        let board = Board::starting_position();
        let sp = SplitPoint::new();
        sp.init(full_init(&board, Move::NULL));

        let history = HistoryTable::new();
        let item = {
            let mut state = sp.lock();
            state.get_work(&board, &history, -INF, false).unwrap()
        };

        let report = sp.report_result(item.index, item.mv, 42, true, false, &[], false);
        assert!(report.improved);
        assert!(!report.cutoff);
        assert_eq!(sp.alpha.load(Ordering::Acquire), 42);
        assert_eq!(sp.lock().best_move, item.mv);
    }

    #[test]
    fn tie_breaks_toward_lower_index() {
        let board = Board::starting_position();
        let sp = SplitPoint::new();
        sp.init(full_init(&board, Move::NULL));

        let history = HistoryTable::new();
        let (a, b) = {
            let mut state = sp.lock();
            (
                state.get_work(&board, &history, -INF, false).unwrap(),
                state.get_work(&board, &history, -INF, false).unwrap(),
            )
        };

        // Higher index reports the same eval first; lower index must win.
        sp.report_result(b.index, b.mv, 10, true, false, &[], false);
        let report = sp.report_result(a.index, a.mv, 10, true, false, &[], false);
        assert!(report.improved, "equal eval at lower index replaces");
        assert_eq!(sp.lock().best_index, a.index);
    }

    #[test]
    fn beta_cutoff_aborts_node() {
        let board = Board::starting_position();
        let mut init = full_init(&board, Move::NULL);
        init.beta = 50;
        let sp = SplitPoint::new();
        sp.init(init);

        let history = HistoryTable::new();
        let item = {
            let mut state = sp.lock();
            state.get_work(&board, &history, -INF, false).unwrap()
        };

        let report = sp.report_result(item.index, item.mv, 60, true, false, &[], false);
        assert!(report.cutoff);
        assert!(sp.aborted.load(Ordering::Acquire), "cutoff must abort the node");
        assert!(report.node_done, "sole worker is elected finisher on cutoff");
        assert_eq!(sp.finish_snapshot().flag, Bound::Lower);
    }

    #[test]
    fn invalid_result_taints_node() {
        let board = Board::starting_position();
        let sp = SplitPoint::new();
        sp.init(full_init(&board, Move::NULL));

        let history = HistoryTable::new();
        let item = {
            let mut state = sp.lock();
            state.get_work(&board, &history, -INF, false).unwrap()
        };

        sp.report_result(item.index, item.mv, 99, true, true, &[], false);
        assert!(sp.results_invalid.load(Ordering::Acquire));
        assert!(sp.aborted.load(Ordering::Acquire));
        let snapshot = sp.finish_snapshot();
        assert!(snapshot.invalid);
        assert_ne!(snapshot.value, 99, "invalid result never becomes best");
    }

    #[test]
    fn finisher_elected_exactly_once() {
        let board = Board::starting_position();
        let mut init = full_init(&board, Move::NULL);
        init.beta = 10;
        let sp = SplitPoint::new();
        sp.init(init);

        let history = HistoryTable::new();
        let (a, b) = {
            let mut state = sp.lock();
            (
                state.get_work(&board, &history, -INF, false).unwrap(),
                state.get_work(&board, &history, -INF, false).unwrap(),
            )
        };

        // First report cuts off; second in-flight report arrives late.
        let first = sp.report_result(a.index, a.mv, 50, true, false, &[], false);
        assert!(!first.node_done, "one move still in flight");
        let second = sp.report_result(b.index, b.mv, 5, true, false, &[], false);
        assert!(second.node_done, "last reporter finishes the aborted node");
        assert!(!sp.lock().try_claim_finish(), "finish is claimed once");
    }

    #[test]
    fn publication_requires_one_legal_result() {
        let board = Board::starting_position();
        let sp = SplitPoint::new();
        sp.init(full_init(&board, mv("e2e3")));

        let history = HistoryTable::new();
        let (a, b) = {
            let mut state = sp.lock();
            (
                state.get_work(&board, &history, -INF, false).unwrap(),
                state.get_work(&board, &history, -INF, false).unwrap(),
            )
        };

        // An illegal speculative move does not establish a bound
        let report = sp.report_result(a.index, a.mv, 0, false, false, &[], false);
        assert!(!report.publicize, "no legal result yet");

        let report = sp.report_result(b.index, b.mv, 5, true, false, &[], false);
        assert!(report.publicize, "legal result with work remaining publicizes");
    }

    #[test]
    fn reinit_resets_slot_for_research() {
        let board = Board::starting_position();
        let sp = SplitPoint::new();
        sp.init(full_init(&board, Move::NULL));
        let gen_before = sp.generation.load(Ordering::Acquire);

        let history = HistoryTable::new();
        {
            let mut state = sp.lock();
            while state.get_work(&board, &history, -INF, false).is_some() {}
        }

        sp.init(full_init(&board, Move::NULL));
        assert!(sp.generation.load(Ordering::Acquire) > gen_before);
        let mut state = sp.lock();
        assert_eq!(state.started, 0);
        assert!(state.get_work(&board, &history, -INF, false).is_some());
    }

    #[test]
    fn buffer_slots_start_free() {
        let buffer = SplitBuffer::new();
        assert!(buffer.all_free());
        buffer.slot(0).in_use.store(true, Ordering::Release);
        assert!(!buffer.all_free());
    }
}
