//! The search tree scheduler: buffer pool, publicized split-point list,
//! and the idle-thread loop.
//!
//! Lock ordering is strict and one-directional: the tree-wide lock is only
//! taken while no split-point lock is held, and a split-point lock is only
//! taken after the tree lock has been released. Publication and recycling
//! touch split points exclusively through their atomics, so they stay
//! entirely under the tree lock.

use std::sync::{Condvar, Mutex};

use breccia_core::{Board, Move};

use crate::search::control::SearchControl;
use crate::search::split::{SpId, SplitBuffer, SplitPoint};
use crate::search::tt::TranspositionTable;
use crate::search::worker::Worker;

/// Threads allowed to work one split point at a time. Beyond this the
/// returns diminish and the per-node lock starts to congest.
const MAX_ATTACHED: u32 = 4;

/// Result of one fully-resolved root split point.
#[derive(Debug, Clone)]
pub(crate) struct RootResult {
    pub value: i32,
    pub best_move: Move,
    pub pv: Vec<Move>,
    /// Per-root-move evals, index-aligned with the preset root move list.
    pub move_evals: Vec<i32>,
    /// Root moves that finished before the iteration ended.
    pub finished_moves: usize,
    /// The iteration was poisoned by timeout/interrupt; results are partial.
    pub invalid: bool,
}

/// State guarded by the single tree-wide lock.
struct TreeSync {
    free_buffers: Vec<u16>,
    buffer_owners: Vec<Option<usize>>,
    /// Publicized (stealable) split points.
    public: Vec<SpId>,
    /// Bumped on every event that could change what is stealable, so a
    /// parked thread can tell a fresh scan is worthwhile.
    epoch: u64,
    iteration_active: bool,
    search_over: bool,
    root_result: Option<RootResult>,
}

/// Owns the split-point buffers and coordinates the worker pool for one
/// call to `search_id`.
pub(crate) struct SearchTree<'s> {
    pub root_board: Board,
    /// Situational hashes of prior game positions (repetition detection).
    pub game_history: Vec<u64>,
    pub tt: &'s TranspositionTable,
    pub control: &'s SearchControl,
    pub conservative_tt: bool,
    buffers: Vec<SplitBuffer>,
    sync: Mutex<TreeSync>,
    cond: Condvar,
}

impl<'s> SearchTree<'s> {
    /// Buffer 0 is reserved as the master's root lane.
    pub(crate) const ROOT_BUFFER: u16 = 0;

    pub(crate) fn new(
        root_board: Board,
        game_history: Vec<u64>,
        tt: &'s TranspositionTable,
        control: &'s SearchControl,
        conservative_tt: bool,
        num_threads: usize,
    ) -> Self {
        assert!(num_threads >= 1, "thread count must be at least 1");

        // Pessimistic sizing: one lane per thread, plus cover for lanes
        // disowned mid-tree when threads abandon exhausted nodes.
        let num_buffers = 2 * num_threads + 8;
        let buffers: Vec<SplitBuffer> = (0..num_buffers).map(|_| SplitBuffer::new()).collect();

        let mut buffer_owners = vec![None; num_buffers];
        buffer_owners[Self::ROOT_BUFFER as usize] = Some(0);

        Self {
            root_board,
            game_history,
            tt,
            control,
            conservative_tt,
            buffers,
            sync: Mutex::new(TreeSync {
                free_buffers: (1..num_buffers as u16).rev().collect(),
                buffer_owners,
                public: Vec::new(),
                epoch: 0,
                iteration_active: false,
                search_over: false,
                root_result: None,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TreeSync> {
        self.sync.lock().expect("tree mutex poisoned")
    }

    /// The split point slot at an arena address.
    pub(crate) fn slot(&self, id: SpId) -> &SplitPoint {
        self.buffers[id.buf as usize].slot(id.ply)
    }

    /// True if any strict ancestor of this node has been aborted.
    ///
    /// Walks the parent chain reading `aborted` without locking;
    /// correctness relies on the flag being monotonic, so a stale read can
    /// only delay an abort, never corrupt a result.
    pub(crate) fn any_parent_aborted(&self, id: SpId) -> bool {
        use std::sync::atomic::Ordering;

        let mut current = SpId::from_key(self.slot(id).parent_key.load(Ordering::Acquire));
        while let Some(node) = current {
            let slot = self.slot(node);
            if slot.aborted.load(Ordering::Acquire) {
                return true;
            }
            current = SpId::from_key(slot.parent_key.load(Ordering::Acquire));
        }
        false
    }

    // ── Buffer pool ─────────────────────────────────────────────────────────

    /// Hand a free buffer to `thread` if one is available right now.
    ///
    /// Deliberately non-blocking: a worker that cannot get a lane searches
    /// its subtree sequentially instead of waiting, so an exhausted pool
    /// can never deadlock the tree.
    pub(crate) fn try_acquire_buffer(&self, thread: usize) -> Option<u16> {
        let mut sync = self.lock();
        if sync.search_over {
            return None;
        }
        let buf = sync.free_buffers.pop()?;
        sync.buffer_owners[buf as usize] = Some(thread);
        Some(buf)
    }

    /// Release ownership of a buffer whose nodes are still live.
    ///
    /// The buffer returns to the free pool once its last slot is recycled.
    pub(crate) fn disown_buffer(&self, buf: u16) {
        let mut sync = self.lock();
        sync.buffer_owners[buf as usize] = None;
        if self.buffers[buf as usize].all_free() {
            sync.free_buffers.push(buf);
            self.cond.notify_all();
        }
    }

    /// Hand the root lane back to the master between iterations.
    ///
    /// Safe because the holding area guarantees no other thread owns or
    /// acquires buffers while no iteration is active.
    pub(crate) fn claim_root_buffer(&self, worker: &mut Worker) {
        let mut sync = self.lock();
        if worker.own_buffer == Some(Self::ROOT_BUFFER) {
            return;
        }
        if let Some(buf) = worker.own_buffer.take() {
            sync.buffer_owners[buf as usize] = None;
            if self.buffers[buf as usize].all_free() {
                sync.free_buffers.push(buf);
            }
        }
        sync.free_buffers.retain(|buf| *buf != Self::ROOT_BUFFER);
        sync.buffer_owners[Self::ROOT_BUFFER as usize] = Some(worker.id);
        worker.own_buffer = Some(Self::ROOT_BUFFER);
    }

    // ── Publication ─────────────────────────────────────────────────────────

    /// Make a split point visible to idle threads.
    ///
    /// `generation` pins the node the caller reported into; a slot reused
    /// since then is left alone.
    pub(crate) fn publicize(&self, id: SpId, generation: u64, worker: &mut Worker) {
        use std::sync::atomic::Ordering;

        let mut sync = self.lock();
        let slot = self.slot(id);
        if slot.generation.load(Ordering::Acquire) == generation
            && slot.in_use.load(Ordering::Acquire)
            && !slot.aborted.load(Ordering::Acquire)
            && !slot.public.swap(true, Ordering::AcqRel)
        {
            sync.public.push(id);
            sync.epoch += 1;
            worker.stats.publications += 1;
            self.cond.notify_all();
        }
    }

    /// Recycle a finished node's slot and drop it from the public list.
    pub(crate) fn recycle(&self, id: SpId) {
        use std::sync::atomic::Ordering;

        let mut sync = self.lock();
        let slot = self.slot(id);
        slot.public.store(false, Ordering::Release);
        sync.public.retain(|entry| *entry != id);
        slot.in_use.store(false, Ordering::Release);
        slot.generation.fetch_add(1, Ordering::AcqRel);

        // A disowned buffer goes back to the pool with its last slot.
        let buf = id.buf as usize;
        if sync.buffer_owners[buf].is_none() && self.buffers[buf].all_free() {
            sync.free_buffers.push(id.buf);
        }
        sync.epoch += 1;
        self.cond.notify_all();
    }

    // ── Iteration lifecycle ─────────────────────────────────────────────────

    pub(crate) fn begin_iteration(&self) {
        let mut sync = self.lock();
        sync.iteration_active = true;
        sync.root_result = None;
        sync.epoch += 1;
        self.cond.notify_all();
    }

    /// Record the root result and release everyone from the iteration.
    pub(crate) fn finish_root(&self, result: RootResult) {
        let mut sync = self.lock();
        sync.root_result = Some(result);
        sync.iteration_active = false;
        sync.epoch += 1;
        self.cond.notify_all();
    }

    pub(crate) fn take_root_result(&self) -> Option<RootResult> {
        self.lock().root_result.take()
    }

    /// Permanently shut the tree down; parked helpers exit.
    pub(crate) fn end_search(&self) {
        let mut sync = self.lock();
        sync.search_over = true;
        sync.iteration_active = false;
        sync.epoch += 1;
        self.cond.notify_all();
    }

    /// Every buffer slot is unused (post-search recycling invariant).
    pub(crate) fn all_slots_free(&self) -> bool {
        self.buffers.iter().all(SplitBuffer::all_free)
    }

    // ── Work stealing ───────────────────────────────────────────────────────

    /// The idle-thread loop: find a publicized node with work, sync the
    /// worker's board to it, and commit.
    ///
    /// Three phases per candidate, per the lock ordering above:
    /// 1. under the node lock, cheaply check "probably has work" and copy
    ///    the node's path and killer snapshot;
    /// 2. with no locks held, rebuild the worker's board by replaying the
    ///    path from the root (the expensive part);
    /// 3. re-lock, verify the slot generation did not change, and attach.
    ///
    /// Blocks when nothing is stealable. Returns `None` for the master once
    /// the iteration ends, and for helpers once the whole search ends.
    pub(crate) fn get_public_work(&self, worker: &mut Worker) -> Option<(SpId, u64)> {
        use std::sync::atomic::Ordering;

        // An idle thread holds no lane; its buffer is empty by the time it
        // gets here (own-lane abandonment disowns, climbs recycle).
        if let Some(buf) = worker.own_buffer.take() {
            let mut sync = self.lock();
            sync.buffer_owners[buf as usize] = None;
            debug_assert!(self.buffers[buf as usize].all_free());
            sync.free_buffers.push(buf);
            self.cond.notify_all();
        }

        loop {
            let (candidates, seen_epoch) = {
                let sync = self.lock();
                if sync.search_over || (worker.is_master && !sync.iteration_active) {
                    return None;
                }
                let candidates: Vec<(SpId, u64)> = sync
                    .public
                    .iter()
                    .filter(|id| {
                        let slot = self.slot(**id);
                        slot.in_use.load(Ordering::Acquire)
                            && !slot.aborted.load(Ordering::Acquire)
                    })
                    .map(|id| (*id, self.slot(*id).generation.load(Ordering::Acquire)))
                    .collect();
                (candidates, sync.epoch)
            };

            for (id, generation) in candidates {
                let slot = self.slot(id);

                // Phase 1: cheap probe, copy what resync needs.
                let (path, killers) = {
                    let state = slot.lock();
                    if slot.generation.load(Ordering::Acquire) != generation
                        || !slot.in_use.load(Ordering::Acquire)
                        || slot.aborted.load(Ordering::Acquire)
                        || !state.probably_has_work()
                        || state.attached >= MAX_ATTACHED
                    {
                        continue;
                    }
                    (state.path.clone(), state.killers.clone())
                };

                // Phase 2: board replay with no locks held.
                worker.sync_to(&self.root_board, &path);

                // Phase 3: verify and commit.
                let mut state = slot.lock();
                if slot.generation.load(Ordering::Acquire) != generation
                    || !slot.in_use.load(Ordering::Acquire)
                    || slot.aborted.load(Ordering::Acquire)
                    || !state.probably_has_work()
                    || state.attached >= MAX_ATTACHED
                {
                    continue;
                }
                state.attached += 1;
                drop(state);

                worker.killers.copy_from(&killers);
                worker.stats.steals += 1;
                return Some((id, generation));
            }

            // Nothing usable: park until something changes. Between
            // iterations this doubles as the holding area where helpers
            // wait for the next depth to start.
            let mut sync = self.lock();
            loop {
                if sync.search_over || (worker.is_master && !sync.iteration_active) {
                    return None;
                }
                if sync.epoch != seen_epoch {
                    break;
                }
                sync = self.cond.wait(sync).expect("tree condvar poisoned");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::control::SearchControl;
    use crate::search::tt::TranspositionTable;

    fn tree_fixture<'a>(
        tt: &'a TranspositionTable,
        control: &'a SearchControl,
        threads: usize,
    ) -> SearchTree<'a> {
        SearchTree::new(
            Board::starting_position(),
            Vec::new(),
            tt,
            control,
            true,
            threads,
        )
    }

    #[test]
    fn buffers_start_free_except_root_lane() {
        let tt = TranspositionTable::new(1);
        let control = SearchControl::new();
        let tree = tree_fixture(&tt, &control, 2);

        assert!(tree.all_slots_free());
        // Root lane is pre-owned by the master; the rest are poolable.
        let first = tree.try_acquire_buffer(1).expect("pool has free buffers");
        assert_ne!(first, SearchTree::ROOT_BUFFER);
    }

    #[test]
    fn disowned_empty_buffer_returns_to_pool() {
        let tt = TranspositionTable::new(1);
        let control = SearchControl::new();
        let tree = tree_fixture(&tt, &control, 1);

        let buf = tree.try_acquire_buffer(0).unwrap();
        tree.disown_buffer(buf);
        // All slots free, so the same buffer is immediately reusable.
        let again = tree.try_acquire_buffer(0).unwrap();
        assert_eq!(again, buf);
    }

    #[test]
    fn acquire_returns_none_after_search_over() {
        let tt = TranspositionTable::new(1);
        let control = SearchControl::new();
        let tree = tree_fixture(&tt, &control, 1);

        tree.end_search();
        assert!(tree.try_acquire_buffer(0).is_none());
    }

    #[test]
    fn exhausted_pool_returns_none_instead_of_blocking() {
        let tt = TranspositionTable::new(1);
        let control = SearchControl::new();
        let tree = tree_fixture(&tt, &control, 1);

        // Drain the pool (buffer 0 is the pre-owned root lane).
        let mut taken = Vec::new();
        while let Some(buf) = tree.try_acquire_buffer(0) {
            taken.push(buf);
        }
        assert!(!taken.is_empty());
        assert!(tree.try_acquire_buffer(0).is_none(), "dry pool must not block");
    }

    #[test]
    fn root_result_roundtrip() {
        let tt = TranspositionTable::new(1);
        let control = SearchControl::new();
        let tree = tree_fixture(&tt, &control, 1);

        tree.begin_iteration();
        tree.finish_root(RootResult {
            value: 17,
            best_move: Move::from_coords("e2e3").unwrap(),
            pv: vec![Move::from_coords("e2e3").unwrap()],
            move_evals: vec![17],
            finished_moves: 1,
            invalid: false,
        });
        let result = tree.take_root_result().expect("result was recorded");
        assert_eq!(result.value, 17);
        assert!(tree.take_root_result().is_none(), "take is destructive");
    }

    #[test]
    fn helper_unparks_and_exits_on_end_search() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let tt = TranspositionTable::new(1);
        let control = SearchControl::new();
        let tree = tree_fixture(&tt, &control, 2);

        let exited = AtomicBool::new(false);
        std::thread::scope(|s| {
            s.spawn(|| {
                let mut worker = Worker::new(1, false, tree.root_board.clone());
                // Parks (no public work), then exits when the search ends.
                assert!(tree.get_public_work(&mut worker).is_none());
                exited.store(true, Ordering::Release);
            });
            std::thread::sleep(std::time::Duration::from_millis(20));
            assert!(!exited.load(Ordering::Acquire), "helper should be parked");
            tree.end_search();
        });
        assert!(exited.load(Ordering::Acquire));
    }

    #[test]
    fn master_leaves_when_iteration_inactive() {
        let tt = TranspositionTable::new(1);
        let control = SearchControl::new();
        let tree = tree_fixture(&tt, &control, 1);

        let mut master = Worker::new(0, true, tree.root_board.clone());
        // No iteration running: the master immediately regains control.
        assert!(tree.get_public_work(&mut master).is_none());
    }
}
