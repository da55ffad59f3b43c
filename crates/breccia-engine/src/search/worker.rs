//! Per-thread worker state and the cooperative work loop.
//!
//! Workers run continuation-style: reserve a move at the current split
//! point, resolve it immediately (terminal, repetition, hash cutoff,
//! quiescence) or descend into a fresh child slot; with no work left,
//! abandon the node and steal elsewhere; when a node's last move reports,
//! finish it — re-initializing the slot in place if a null-move or
//! zero-window/reduced probe failed — and continue in the parent.
//!
//! A worker's board cursor is private. It moves by apply/undo along the
//! worker's own recursion, and by full replay of a node's recorded move
//! path when jumping to a distant part of the tree.

use breccia_core::{has_any_move, Bitboard, Board, Move, Undo};

use crate::eval::{evaluate, INF, WIN_SCORE};
use crate::search::heuristics::{HistoryTable, KillerTable};
use crate::search::quiesce::quiesce;
use crate::search::split::{FinishSnapshot, NullPlan, ParentProbe, Report, SpId, SpInit, WorkItem};
use crate::search::stats::SearchStats;
use crate::search::tree::{RootResult, SearchTree};
use crate::search::tt::Bound;

/// Depth taken off a null-move probe on top of the usual one ply.
const NULL_REDUCTION: u8 = 2;

/// One entry of the worker's undo stack.
enum PathStep {
    Move(Undo),
    Pass,
}

/// Per-thread scratch state. Nothing here is shared.
pub(crate) struct Worker {
    pub id: usize,
    pub is_master: bool,
    pub board: Board,
    steps: Vec<PathStep>,
    pub killers: KillerTable,
    pub history: HistoryTable,
    pub stats: SearchStats,
    pub own_buffer: Option<u16>,
    pub terminated: bool,
}

impl Worker {
    pub(crate) fn new(id: usize, is_master: bool, root_board: Board) -> Self {
        Self {
            id,
            is_master,
            board: root_board,
            steps: Vec::new(),
            killers: KillerTable::new(),
            history: HistoryTable::new(),
            stats: SearchStats::default(),
            own_buffer: None,
            terminated: false,
        }
    }

    /// Rebuild the board cursor at the node reached by `path` from the
    /// root. `Move::NULL` entries replay as passes.
    pub(crate) fn sync_to(&mut self, root: &Board, path: &[Move]) {
        self.board = root.clone();
        self.steps.clear();
        for mv in path {
            if mv.is_null() {
                self.board.apply_null();
                self.steps.push(PathStep::Pass);
            } else {
                let undo = self.board.apply(*mv);
                self.steps.push(PathStep::Move(undo));
            }
        }
    }

    /// Undo one step, returning whether it was a capture.
    fn pop_step(&mut self) -> bool {
        match self.steps.pop() {
            Some(PathStep::Move(undo)) => {
                self.board.undo(undo);
                undo.was_capture()
            }
            Some(PathStep::Pass) => {
                self.board.undo_null();
                false
            }
            None => false,
        }
    }

    /// The move path from the root to the cursor, passes as `Move::NULL`.
    fn current_path(&self) -> Vec<Move> {
        self.steps
            .iter()
            .map(|step| match step {
                PathStep::Move(undo) => undo.mv(),
                PathStep::Pass => Move::NULL,
            })
            .collect()
    }

    fn path_len(&self) -> usize {
        self.steps.len()
    }

    /// The worker's lane, acquiring one from the pool on first use.
    ///
    /// `None` means the pool is dry (or shutting down); the caller falls
    /// back to searching sequentially rather than waiting.
    fn ensure_buffer(&mut self, tree: &SearchTree<'_>) -> Option<u16> {
        if let Some(buf) = self.own_buffer {
            return Some(buf);
        }
        let buf = tree.try_acquire_buffer(self.id)?;
        self.own_buffer = Some(buf);
        Some(buf)
    }
}

/// The enemy of the side to move has a piece one step from its goal.
fn enemy_runner_exists(board: &Board) -> bool {
    let them = board.side_to_move().flip();
    let pre_goal = (them.goal_rank() as i8 - them.forward()) as usize;
    (board.pieces(them) & Bitboard::RANKS[pre_goal]).is_nonempty()
}

/// A worker's current node: arena address plus the slot generation it was
/// entered at. A generation mismatch means the slot was finished and
/// reused underneath us, so the attachment is stale.
pub(crate) type Attachment = (SpId, u64);

/// Run the cooperative loop until the worker has nothing left to do.
///
/// `current` seeds the master with the freshly-initialized root node;
/// helpers start idle. Returns when [`SearchTree::get_public_work`] yields
/// control back (iteration end for the master, search end for helpers).
pub(crate) fn run(worker: &mut Worker, tree: &SearchTree<'_>, mut current: Option<Attachment>) {
    use std::sync::atomic::Ordering;

    loop {
        let Some((id, entered_gen)) = current else {
            match tree.get_public_work(worker) {
                Some(stolen) => {
                    current = Some(stolen);
                    continue;
                }
                None => return,
            }
        };

        let sp = tree.slot(id);
        if sp.generation.load(Ordering::Acquire) != entered_gen {
            // The node finished without us; its slot now belongs to
            // someone else.
            current = None;
            continue;
        }

        // Cooperative cancellation and lazy abort discovery. Polling on the
        // main-search node count hits every check interval exactly.
        if !worker.terminated && tree.control.should_terminate(worker.stats.nodes) {
            worker.terminated = true;
        }
        if worker.terminated {
            if !sp.aborted.swap(true, Ordering::AcqRel) {
                worker.stats.aborts_seen += 1;
            }
            sp.results_invalid.store(true, Ordering::Release);
        } else if !sp.aborted.load(Ordering::Acquire) && tree.any_parent_aborted(id) {
            // An ancestor cut this subtree off after the fact; whatever was
            // completed here is wasted work, not a sound bound.
            if !sp.aborted.swap(true, Ordering::AcqRel) {
                worker.stats.aborts_seen += 1;
            }
            sp.results_invalid.store(true, Ordering::Release);
        }

        let aborted = sp.aborted.load(Ordering::Acquire);
        let alpha_now = sp.alpha.load(Ordering::Acquire);
        let work = {
            let mut state = sp.lock();
            if sp.generation.load(Ordering::Acquire) != entered_gen {
                current = None;
                continue;
            }
            state.get_work(&worker.board, &worker.history, alpha_now, aborted)
        };

        match work {
            Some(item) => {
                current = do_move(worker, tree, id, item);
            }
            None => {
                enum Next {
                    Finish,
                    Abandon,
                    Stale,
                }
                let next = {
                    let mut state = sp.lock();
                    if sp.generation.load(Ordering::Acquire) != entered_gen {
                        Next::Stale
                    } else {
                        let aborted = sp.aborted.load(Ordering::Acquire);
                        if state.done == state.started
                            && (aborted || state.no_more_work())
                            && state.try_claim_finish()
                        {
                            Next::Finish
                        } else {
                            state.attached = state.attached.saturating_sub(1);
                            Next::Abandon
                        }
                    }
                };
                match next {
                    Next::Finish => current = finish_node(worker, tree, id),
                    Next::Stale => current = None,
                    Next::Abandon => {
                        if worker.own_buffer == Some(id.buf) {
                            tree.disown_buffer(id.buf);
                            worker.own_buffer = None;
                        }
                        current = None;
                    }
                }
            }
        }
    }
}

/// Execute one reserved move: resolve it immediately or descend.
///
/// Returns the attachment the worker should continue at.
fn do_move(
    worker: &mut Worker,
    tree: &SearchTree<'_>,
    id: SpId,
    item: WorkItem,
) -> Option<Attachment> {
    let sp = tree.slot(id);

    let undo = match worker.board.try_apply(item.mv) {
        Ok(undo) => undo,
        Err(_) => {
            // Speculative hash/killer candidate that is not actually legal
            // here; skip it without affecting siblings.
            worker.stats.illegal_skipped += 1;
            let report =
                sp.report_result(item.index, item.mv, -INF, false, worker.terminated, &[], false);
            return after_report(worker, tree, id, report, item.mv, false);
        }
    };

    worker.stats.nodes += 1;
    worker.steps.push(PathStep::Move(undo));
    let was_capture = undo.was_capture();
    let child_ply = item.parent_c_depth + 1;

    let (alpha_c, beta_c) = if item.zero_window {
        (-(item.parent_alpha + 1), -item.parent_alpha)
    } else {
        (-item.parent_beta, -item.parent_alpha)
    };
    let child_extra = -item.extra_eval;

    // The move may decide the game outright (goal or elimination).
    if worker.board.winner().is_some() {
        let eval_parent = WIN_SCORE - child_ply as i32;
        return resolve(worker, tree, id, item, eval_parent, was_capture);
    }

    // Repeating a game position forfeits for the side that repeated.
    if tree.game_history.contains(&worker.board.situational_hash()) {
        let eval_parent = -(WIN_SCORE - child_ply as i32);
        return resolve(worker, tree, id, item, eval_parent, was_capture);
    }

    // Transposition table: cutoff if deep enough, else harvest the move.
    let child_hash = worker.board.situational_hash();
    let mut hash_move = Move::NULL;
    if let Some(probe) = tree.tt.probe(child_hash, child_ply) {
        worker.stats.tt_hits += 1;
        hash_move = probe.best_move;
        if probe.deep_enough(item.child_r_depth, tree.conservative_tt) {
            let usable = match probe.bound {
                Bound::Exact => true,
                Bound::Lower => probe.eval >= beta_c,
                Bound::Upper => probe.eval <= alpha_c,
                Bound::None => false,
            };
            if usable {
                worker.stats.tt_cutoffs += 1;
                return resolve(worker, tree, id, item, -probe.eval, was_capture);
            }
        }
    }

    // Out of depth (or out of ply headroom for the slot arena):
    // quiescence resolves the move in place.
    if item.child_r_depth == 0 || child_ply as usize >= crate::search::heuristics::MAX_PLY - 1 {
        let eval_child = quiesce(
            &mut worker.board,
            child_ply,
            alpha_c,
            beta_c,
            child_extra,
            &mut worker.stats,
        );
        return resolve(worker, tree, id, item, -eval_child, was_capture);
    }

    // Opponent left with no reply loses on the spot.
    if !has_any_move(&worker.board) {
        let eval_parent = WIN_SCORE - child_ply as i32;
        return resolve(worker, tree, id, item, eval_parent, was_capture);
    }

    // Descend: carve a child split point out of the worker's lane. With
    // the pool dry there is nothing to split into, so the subtree is
    // searched sequentially instead — slower, never deadlocked.
    let Some(buf) = worker.ensure_buffer(tree) else {
        let eval_child = sequential_search(
            worker,
            tree,
            alpha_c,
            beta_c,
            item.child_r_depth,
            child_ply,
            child_extra,
        );
        return resolve(worker, tree, id, item, -eval_child, was_capture);
    };
    let child_id = SpId {
        buf,
        ply: child_ply,
    };
    let child_sp = tree.slot(child_id);

    let fallback = if item.zero_window || item.reduction > 0 {
        Some(ParentProbe {
            full_alpha: -item.parent_beta,
            full_beta: -item.parent_alpha,
            full_depth: item.child_r_depth + item.reduction,
            parent_alpha: item.parent_alpha,
            parent_beta: item.parent_beta,
        })
    } else {
        None
    };

    // Null-move probe: let the opponent pass and search reduced. Verified
    // cheaply before committing to the full child search; the same slot is
    // re-initialized for the real search if the probe fails.
    let mut try_null = item.zero_window
        && item.child_r_depth >= NULL_REDUCTION + 2
        && !enemy_runner_exists(&worker.board)
        && evaluate(&worker.board) + child_extra >= beta_c;

    if try_null {
        worker.board.apply_null();
        // A stuck opponent would turn the probe into a zugzwang artifact.
        if has_any_move(&worker.board) {
            worker.steps.push(PathStep::Pass);
        } else {
            worker.board.undo_null();
            try_null = false;
        }
    }

    if try_null {
        child_sp.init(SpInit {
            c_depth: child_ply,
            r_depth: item.child_r_depth - 1 - NULL_REDUCTION,
            hash: worker.board.situational_hash(),
            parent: Some(id),
            parent_index: item.index,
            parent_move: item.mv,
            alpha: -beta_c,
            beta: -beta_c + 1,
            extra_eval: -child_extra,
            hash_move: Move::NULL,
            parent_fallback: None,
            null_plan: Some(NullPlan {
                alpha: alpha_c,
                beta: beta_c,
                r_depth: item.child_r_depth,
                hash: child_hash,
                extra_eval: child_extra,
                hash_move,
                fallback,
            }),
            path: worker.current_path(),
            killers: worker.killers.clone(),
            preset_moves: None,
            record_move_evals: false,
        });
    } else {
        child_sp.init(SpInit {
            c_depth: child_ply,
            r_depth: item.child_r_depth,
            hash: child_hash,
            parent: Some(id),
            parent_index: item.index,
            parent_move: item.mv,
            alpha: alpha_c,
            beta: beta_c,
            extra_eval: child_extra,
            hash_move,
            parent_fallback: fallback,
            null_plan: None,
            path: worker.current_path(),
            killers: worker.killers.clone(),
            preset_moves: None,
            record_move_evals: false,
        });
    }

    Some((child_id, child_sp.generation.load(std::sync::atomic::Ordering::Acquire)))
}

/// Report an immediately-resolved move back to its node.
fn resolve(
    worker: &mut Worker,
    tree: &SearchTree<'_>,
    id: SpId,
    item: WorkItem,
    eval_parent: i32,
    was_capture: bool,
) -> Option<Attachment> {
    worker.pop_step();
    let report = tree.slot(id).report_result(
        item.index,
        item.mv,
        eval_parent,
        true,
        worker.terminated,
        &[],
        false,
    );
    after_report(worker, tree, id, report, item.mv, was_capture)
}

/// Shared post-report bookkeeping: ordering heuristics, publication, and
/// the finish path when this report completed the node.
fn after_report(
    worker: &mut Worker,
    tree: &SearchTree<'_>,
    id: SpId,
    report: Report,
    mv: Move,
    was_capture: bool,
) -> Option<Attachment> {
    if report.cutoff {
        worker.stats.beta_cutoffs += 1;
        if !was_capture && !mv.is_null() {
            worker.killers.store(report.c_depth as usize, mv);
            worker
                .history
                .update_good(worker.board.side_to_move(), mv, report.r_depth);
        }
    } else if !report.improved && !was_capture && !mv.is_null() {
        worker
            .history
            .update_bad(worker.board.side_to_move(), mv, report.r_depth);
    }

    if report.publicize {
        tree.publicize(id, report.generation, worker);
    }

    if report.node_done {
        return finish_node(worker, tree, id);
    }
    Some((id, report.generation))
}

/// Finish a fully-reported node: decide its value, run any pending
/// re-search by re-initializing the slot in place, record to the hash
/// table, and report into the parent.
fn finish_node(worker: &mut Worker, tree: &SearchTree<'_>, id: SpId) -> Option<Attachment> {
    let sp = tree.slot(id);
    let snap = sp.finish_snapshot();

    // A finished null-move probe either verifies the cutoff or falls back
    // to the real search in the same slot.
    if let Some(plan) = snap.null_plan {
        worker.pop_step(); // undo the pass; cursor is now at the real node

        if snap.invalid {
            return report_up(worker, tree, id, snap.value, Vec::new(), &snap);
        }

        tree.tt
            .record(snap.hash, snap.r_depth, snap.value, snap.flag, snap.best_move, snap.c_depth);

        let null_value = -snap.value;
        if null_value >= plan.beta {
            worker.stats.null_cutoffs += 1;
            tree.tt.record(
                plan.hash,
                plan.r_depth,
                null_value,
                Bound::Lower,
                Move::NULL,
                snap.c_depth,
            );
            return report_up(worker, tree, id, null_value, Vec::new(), &snap);
        }

        worker.stats.researches += 1;
        sp.init(SpInit {
            c_depth: snap.c_depth,
            r_depth: plan.r_depth,
            hash: plan.hash,
            parent: snap.parent,
            parent_index: snap.parent_index,
            parent_move: snap.parent_move,
            alpha: plan.alpha,
            beta: plan.beta,
            extra_eval: plan.extra_eval,
            hash_move: plan.hash_move,
            parent_fallback: plan.fallback,
            null_plan: None,
            path: worker.current_path(),
            killers: worker.killers.clone(),
            preset_moves: None,
            record_move_evals: false,
        });
        return Some((id, sp.generation.load(std::sync::atomic::Ordering::Acquire)));
    }

    // A zero-window or reduced probe that failed high gets the full
    // window and depth, in the same slot, as if never reduced.
    if !snap.invalid
        && let Some(fb) = snap.parent_fallback
    {
        let score_p = -snap.value;
        if fb.parent_alpha < score_p && score_p < fb.parent_beta {
            worker.stats.researches += 1;
            sp.init(SpInit {
                c_depth: snap.c_depth,
                r_depth: fb.full_depth,
                hash: snap.hash,
                parent: snap.parent,
                parent_index: snap.parent_index,
                parent_move: snap.parent_move,
                alpha: fb.full_alpha,
                beta: fb.full_beta,
                extra_eval: snap.extra_eval,
                hash_move: snap.best_move,
                parent_fallback: None,
                null_plan: None,
                path: worker.current_path(),
                killers: worker.killers.clone(),
                preset_moves: None,
                record_move_evals: false,
            });
            return Some((id, sp.generation.load(std::sync::atomic::Ordering::Acquire)));
        }
    }

    if !snap.invalid {
        tree.tt
            .record(snap.hash, snap.r_depth, snap.value, snap.flag, snap.best_move, snap.c_depth);
    }
    let pv = snap.pv.clone();
    report_up(worker, tree, id, snap.value, pv, &snap)
}

/// Plain recursive alpha-beta over the worker's board cursor.
///
/// Used only when the buffer pool has no lane to split into. No split
/// points are involved, so nothing here can block; the transposition
/// table, repetition guard, and termination polling still apply. A
/// terminated worker's result is tagged invalid by the normal report path.
fn sequential_search(
    worker: &mut Worker,
    tree: &SearchTree<'_>,
    mut alpha: i32,
    beta: i32,
    r_depth: u8,
    ply: u8,
    extra_eval: i32,
) -> i32 {
    use breccia_core::MoveList;

    if !worker.terminated && tree.control.should_terminate(worker.stats.nodes) {
        worker.terminated = true;
    }
    if worker.terminated {
        return 0;
    }

    let hash = worker.board.situational_hash();
    let mut hash_move = Move::NULL;
    if let Some(probe) = tree.tt.probe(hash, ply) {
        worker.stats.tt_hits += 1;
        hash_move = probe.best_move;
        if probe.deep_enough(r_depth, tree.conservative_tt) {
            let usable = match probe.bound {
                Bound::Exact => true,
                Bound::Lower => probe.eval >= beta,
                Bound::Upper => probe.eval <= alpha,
                Bound::None => false,
            };
            if usable {
                worker.stats.tt_cutoffs += 1;
                return probe.eval;
            }
        }
    }

    let mut list = MoveList::new();
    breccia_core::full_moves(&worker.board, &mut list);
    if list.is_empty() {
        return -(WIN_SCORE - ply as i32);
    }

    // Hash move first; the generated order (captures leading) follows.
    let mut ordered: Vec<Move> = Vec::with_capacity(list.len());
    if !hash_move.is_null() && list.contains(hash_move) {
        ordered.push(hash_move);
    }
    ordered.extend(list.as_slice().iter().copied().filter(|mv| *mv != hash_move));

    let orig_alpha = alpha;
    let mut best = -INF;
    let mut best_move = Move::NULL;

    for mv in ordered {
        let undo = worker.board.apply(mv);
        worker.stats.nodes += 1;

        let score = if worker.board.winner().is_some() {
            WIN_SCORE - (ply as i32 + 1)
        } else if tree
            .game_history
            .contains(&worker.board.situational_hash())
        {
            -(WIN_SCORE - (ply as i32 + 1))
        } else if r_depth <= 1 || ply as usize >= crate::search::heuristics::MAX_PLY - 1 {
            -quiesce(
                &mut worker.board,
                ply + 1,
                -beta,
                -alpha,
                -extra_eval,
                &mut worker.stats,
            )
        } else {
            -sequential_search(worker, tree, -beta, -alpha, r_depth - 1, ply + 1, -extra_eval)
        };

        worker.board.undo(undo);
        if worker.terminated {
            return 0;
        }

        if score > best {
            best = score;
            best_move = mv;
            if score > alpha {
                alpha = score;
            }
        }
        if alpha >= beta {
            worker.stats.beta_cutoffs += 1;
            break;
        }
    }

    let flag = if best >= beta {
        Bound::Lower
    } else if best <= orig_alpha {
        Bound::Upper
    } else {
        Bound::Exact
    };
    tree.tt.record(hash, r_depth, best, flag, best_move, ply);

    best
}

/// Recycle a finished node and deliver its result to the parent (or, at
/// the root, to the tree).
fn report_up(
    worker: &mut Worker,
    tree: &SearchTree<'_>,
    id: SpId,
    value: i32,
    pv: Vec<Move>,
    snap: &FinishSnapshot,
) -> Option<Attachment> {
    let invalid = snap.invalid || worker.terminated;

    match snap.parent {
        None => {
            let result = RootResult {
                value,
                best_move: snap.best_move,
                pv,
                move_evals: snap.move_evals.clone().unwrap_or_default(),
                finished_moves: snap.done_legal,
                invalid,
            };
            tree.recycle(id);
            tree.finish_root(result);
            None
        }
        Some(parent_id) => {
            tree.recycle(id);
            let report = tree.slot(parent_id).report_result(
                snap.parent_index,
                snap.parent_move,
                -value,
                true,
                invalid,
                &pv,
                true,
            );

            // Walk the cursor back up to the parent node.
            let mut was_capture = false;
            while worker.path_len() > report.path_len {
                was_capture = worker.pop_step();
            }

            after_report(worker, tree, parent_id, report, snap.parent_move, was_capture)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Worker;
    use breccia_core::{Board, Move};

    fn mv(s: &str) -> Move {
        Move::from_coords(s).unwrap()
    }

    #[test]
    fn sync_to_replays_path() {
        let root = Board::starting_position();
        let mut worker = Worker::new(0, false, root.clone());

        let path = vec![mv("e2e3"), mv("d7d6")];
        worker.sync_to(&root, &path);

        let mut expected = root.clone();
        expected.apply(mv("e2e3"));
        expected.apply(mv("d7d6"));
        assert_eq!(worker.board, expected);
        assert_eq!(worker.path_len(), 2);
    }

    #[test]
    fn sync_to_replays_passes() {
        let root = Board::starting_position();
        let mut worker = Worker::new(0, false, root.clone());

        worker.sync_to(&root, &[mv("e2e3"), Move::NULL]);
        assert_eq!(
            worker.board.side_to_move(),
            root.side_to_move(),
            "move plus pass returns the turn to the first player"
        );
        assert_eq!(worker.current_path(), vec![mv("e2e3"), Move::NULL]);
    }

    #[test]
    fn pop_step_restores_board() {
        let root = Board::starting_position();
        let mut worker = Worker::new(0, false, root.clone());

        worker.sync_to(&root, &[mv("e2e3")]);
        let was_capture = worker.pop_step();
        assert!(!was_capture);
        assert_eq!(worker.board, root);
        assert_eq!(worker.path_len(), 0);
    }

    #[test]
    fn enemy_runner_detection() {
        let board: Board = "8/8/8/8/8/8/3p4/P7 w".parse().unwrap();
        assert!(super::enemy_runner_exists(&board), "black d2 is a runner");
        let quiet: Board = "8/8/8/3p4/8/8/8/P7 w".parse().unwrap();
        assert!(!super::enemy_runner_exists(&quiet));
    }
}
