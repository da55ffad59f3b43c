//! Lockless transposition table using atomic XOR-based torn-write detection.
//!
//! Two `AtomicU64` words per entry (16 bytes).
//!
//! ## Bit layout
//!
//! ```text
//! word0 (AtomicU64):
//!   bits 63-32: key           (upper 32 bits of the situational hash)
//!   bits 31-16: move          (raw 16-bit encoding)
//!   bits 15-8:  depth         (8 bits)
//!   bits 7-6:   bound         (2 bits)
//!
//! word1 (AtomicU64):
//!   bits 63-32: check         = key XOR (word0 & 0xFFFF_FFFF)
//!   bits 31-0:  eval          (i32 as u32)
//! ```
//!
//! ## Torn-write detection
//!
//! On probe: `check_expected = (w0 >> 32) ^ (w0 & 0xFFFF_FFFF)`.
//! If `check_expected != (w1 >> 32)` the entry was written by another thread
//! mid-write and the probe reports a miss rather than garbage.
//!
//! Writers never lock and always overwrite — last write wins. Races between
//! threads recording the same slot are benign by design.

use std::sync::atomic::{AtomicU64, Ordering};

use breccia_core::Move;

use crate::eval::WIN_THRESHOLD;

// The table is shared by reference across the scoped worker pool.
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<TranspositionTable>();
    }
    let _ = check;
};

/// Bound type stored in a TT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Bound {
    /// No bound information (empty entry).
    None = 0,
    /// The stored eval is exact.
    Exact = 1,
    /// The stored eval is a lower bound (beta cutoff).
    Lower = 2,
    /// The stored eval is an upper bound (failed low).
    Upper = 3,
}

impl Bound {
    const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            1 => Bound::Exact,
            2 => Bound::Lower,
            3 => Bound::Upper,
            _ => Bound::None,
        }
    }
}

/// Convert a search eval to TT-storable form.
///
/// Proven win/loss scores are path-dependent (`WIN_SCORE - ply`); they are
/// stored as distance-from-node so a hit on a different path stays correct.
pub fn eval_to_tt(eval: i32, ply: u8) -> i32 {
    if eval > WIN_THRESHOLD {
        eval + ply as i32
    } else if eval < -WIN_THRESHOLD {
        eval - ply as i32
    } else {
        eval
    }
}

/// Convert a TT-stored eval back to search-usable form.
pub fn eval_from_tt(eval: i32, ply: u8) -> i32 {
    if eval > WIN_THRESHOLD {
        eval - ply as i32
    } else if eval < -WIN_THRESHOLD {
        eval + ply as i32
    } else {
        eval
    }
}

/// Result of a successful TT probe.
#[derive(Debug, Clone, Copy)]
pub struct TtProbe {
    /// Best move from a previous search of this position.
    pub best_move: Move,
    /// Search depth of the stored entry.
    pub depth: u8,
    /// Bound type.
    pub bound: Bound,
    /// Eval, already rebased to the probing ply.
    pub eval: i32,
}

impl TtProbe {
    /// Whether this entry is deep enough to cut off a search of `depth`.
    ///
    /// Conservative mode demands an exact depth match; fast mode accepts
    /// any entry at least as deep.
    #[inline]
    pub fn deep_enough(&self, depth: u8, conservative: bool) -> bool {
        if conservative {
            self.depth == depth
        } else {
            self.depth >= depth
        }
    }
}

struct AtomicEntry {
    word0: AtomicU64,
    word1: AtomicU64,
}

impl AtomicEntry {
    const fn new() -> Self {
        Self {
            word0: AtomicU64::new(0),
            word1: AtomicU64::new(0),
        }
    }

    fn pack_word0(key32: u32, mv: Move, depth: u8, bound: Bound) -> u64 {
        ((key32 as u64) << 32)
            | ((mv.raw() as u64) << 16)
            | ((depth as u64) << 8)
            | (((bound as u8) as u64) << 6)
    }

    fn pack_word1(w0: u64, eval: i32) -> u64 {
        let key32 = (w0 >> 32) as u32;
        let data_lower = (w0 & 0xFFFF_FFFF) as u32;
        let check = (key32 ^ data_lower) as u64;
        (check << 32) | ((eval as u32) as u64)
    }

    fn decode_w0(w0: u64) -> (u32, Move, u8, Bound) {
        let key32 = (w0 >> 32) as u32;
        let mv = Move::from_raw(((w0 >> 16) & 0xFFFF) as u16);
        let depth = ((w0 >> 8) & 0xFF) as u8;
        let bound = Bound::from_bits(((w0 >> 6) & 0x03) as u8);
        (key32, mv, depth, bound)
    }

    /// Load and verify the entry for `hash`.
    ///
    /// Returns `None` on key mismatch or when the XOR check detects a torn
    /// write.
    fn load(&self, hash: u64) -> Option<(Move, u8, Bound, i32)> {
        let w0 = self.word0.load(Ordering::Relaxed);
        let w1 = self.word1.load(Ordering::Relaxed);

        let key32_w0 = (w0 >> 32) as u32;
        let data_lower = (w0 & 0xFFFF_FFFF) as u32;
        if key32_w0 ^ data_lower != (w1 >> 32) as u32 {
            return None;
        }
        if key32_w0 != (hash >> 32) as u32 {
            return None;
        }

        let (_, mv, depth, bound) = Self::decode_w0(w0);
        Some((mv, depth, bound, (w1 & 0xFFFF_FFFF) as u32 as i32))
    }

    fn store(&self, w0: u64, w1: u64) {
        self.word0.store(w0, Ordering::Relaxed);
        self.word1.store(w1, Ordering::Relaxed);
    }
}

/// Lockless transposition table with atomic XOR integrity checking.
///
/// All search-time receivers are `&self`; the table is shared by the whole
/// worker pool. Resizing requires `&mut self` and therefore cannot happen
/// while a search holds the table.
pub struct TranspositionTable {
    entries: Box<[AtomicEntry]>,
    /// Index mask — `num_entries - 1` (power-of-two allocation).
    mask: u64,
}

impl TranspositionTable {
    /// Create a table of the given size in megabytes.
    ///
    /// The entry count is rounded down to a power of two.
    pub fn new(mb: usize) -> Self {
        let bytes = mb.max(1) * 1024 * 1024;
        let num_entries = (bytes / std::mem::size_of::<AtomicEntry>())
            .next_power_of_two()
            >> 1;
        let num_entries = num_entries.max(1);

        let entries: Box<[AtomicEntry]> = (0..num_entries).map(|_| AtomicEntry::new()).collect();

        Self {
            entries,
            mask: (num_entries - 1) as u64,
        }
    }

    /// Replace the allocation with one of the given size. Between searches only.
    pub fn resize(&mut self, mb: usize) {
        *self = Self::new(mb);
    }

    /// Clear all entries.
    pub fn clear(&self) {
        for entry in self.entries.iter() {
            entry.word0.store(0, Ordering::Relaxed);
            entry.word1.store(0, Ordering::Relaxed);
        }
    }

    /// Probe for a position. `hash` is the situational hash; `ply` rebases
    /// win-distance scores.
    pub fn probe(&self, hash: u64, ply: u8) -> Option<TtProbe> {
        let entry = &self.entries[(hash & self.mask) as usize];
        let (best_move, depth, bound, raw_eval) = entry.load(hash)?;
        if bound == Bound::None {
            return None;
        }
        Some(TtProbe {
            best_move,
            depth,
            bound,
            eval: eval_from_tt(raw_eval, ply),
        })
    }

    /// Record a result. Always overwrites — last write wins.
    pub fn record(&self, hash: u64, depth: u8, eval: i32, bound: Bound, best_move: Move, ply: u8) {
        let entry = &self.entries[(hash & self.mask) as usize];
        let w0 = AtomicEntry::pack_word0((hash >> 32) as u32, best_move, depth, bound);
        let w1 = AtomicEntry::pack_word1(w0, eval_to_tt(eval, ply));
        entry.store(w0, w1);
    }
}

impl std::fmt::Debug for TranspositionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranspositionTable")
            .field("entries", &self.entries.len())
            .finish()
    }
}
