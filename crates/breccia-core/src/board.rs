//! The Breakthrough board: two side bitboards, side to move, incremental hash.

use std::fmt;

use crate::bitboard::Bitboard;
use crate::color::Color;
use crate::error::{BoardError, MoveError};
use crate::moves::Move;
use crate::square::Square;
use crate::zobrist::{piece_key, situational_key};

/// A Breakthrough position.
///
/// Pieces move one square forward (straight or diagonal); straight steps
/// require an empty destination, diagonal steps may capture. A side wins by
/// reaching the opponent's home rank or by eliminating every enemy piece.
#[derive(Clone, PartialEq, Eq)]
pub struct Board {
    sides: [Bitboard; Color::COUNT],
    stm: Color,
    hash: u64,
}

/// State needed to reverse one applied move.
#[derive(Debug, Clone, Copy)]
pub struct Undo {
    mv: Move,
    captured: bool,
}

impl Undo {
    /// The move this undo entry reverses.
    #[inline]
    pub const fn mv(self) -> Move {
        self.mv
    }

    /// Whether the move removed an enemy piece.
    #[inline]
    pub const fn was_capture(self) -> bool {
        self.captured
    }
}

impl Board {
    /// The standard starting position: each side fills its two home ranks.
    pub fn starting_position() -> Board {
        let white = Bitboard::RANKS[0] | Bitboard::RANKS[1];
        let black = Bitboard::RANKS[6] | Bitboard::RANKS[7];
        let mut board = Board {
            sides: [white, black],
            stm: Color::White,
            hash: 0,
        };
        board.hash = board.recompute_hash();
        board
    }

    /// Build a board from raw parts, validating structural consistency.
    pub fn from_parts(white: Bitboard, black: Bitboard, stm: Color) -> Result<Board, BoardError> {
        let mut board = Board {
            sides: [white, black],
            stm,
            hash: 0,
        };
        board.hash = board.recompute_hash();
        board.is_consistent()?;
        Ok(board)
    }

    /// Bitboard of the given side's pieces.
    #[inline]
    pub const fn pieces(&self, side: Color) -> Bitboard {
        self.sides[side.index()]
    }

    /// Bitboard of all occupied squares.
    #[inline]
    pub fn occupied(&self) -> Bitboard {
        self.sides[0] | self.sides[1]
    }

    /// The side to move.
    #[inline]
    pub const fn side_to_move(&self) -> Color {
        self.stm
    }

    /// The color of the piece on `sq`, if any.
    #[inline]
    pub fn piece_at(&self, sq: Square) -> Option<Color> {
        if self.sides[0].contains(sq) {
            Some(Color::White)
        } else if self.sides[1].contains(sq) {
            Some(Color::Black)
        } else {
            None
        }
    }

    /// Fast position hash (pieces only, side to move excluded).
    #[inline]
    pub const fn hash(&self) -> u64 {
        self.hash
    }

    /// Position hash including the side to move.
    #[inline]
    pub const fn situational_hash(&self) -> u64 {
        self.hash ^ situational_key(self.stm)
    }

    /// Check that `mv` is a legal step for the side to move.
    pub fn check_move(&self, mv: Move) -> Result<(), MoveError> {
        let source = mv.source();
        let dest = mv.dest();
        let us = self.stm;

        if mv.is_null() || !self.pieces(us).contains(source) {
            return Err(MoveError::EmptySource { mv });
        }

        let d_rank = dest.rank() as i8 - source.rank() as i8;
        let d_file = dest.file() as i8 - source.file() as i8;
        if d_rank != us.forward() || d_file.abs() > 1 {
            return Err(MoveError::BadStep { mv });
        }

        if self.pieces(us).contains(dest) {
            return Err(MoveError::Blocked { mv });
        }
        // Straight steps cannot capture
        if d_file == 0 && self.pieces(us.flip()).contains(dest) {
            return Err(MoveError::Blocked { mv });
        }

        Ok(())
    }

    /// Apply `mv` after verifying legality.
    ///
    /// This is the entry point for speculative candidates (hash and killer
    /// moves); an illegal candidate is reported, not applied.
    pub fn try_apply(&mut self, mv: Move) -> Result<Undo, MoveError> {
        self.check_move(mv)?;
        Ok(self.apply(mv))
    }

    /// Apply a move known to be legal (debug-asserted).
    pub fn apply(&mut self, mv: Move) -> Undo {
        debug_assert!(self.check_move(mv).is_ok(), "apply() given illegal move {mv}");

        let us = self.stm;
        let them = us.flip();
        let source = mv.source();
        let dest = mv.dest();

        let captured = self.sides[them.index()].contains(dest);
        if captured {
            self.sides[them.index()] = self.sides[them.index()].without(dest);
            self.hash ^= piece_key(them, dest);
        }

        self.sides[us.index()] = self.sides[us.index()].without(source).with(dest);
        self.hash ^= piece_key(us, source) ^ piece_key(us, dest);
        self.stm = them;

        Undo { mv, captured }
    }

    /// Reverse a move applied with [`apply`](Self::apply) or
    /// [`try_apply`](Self::try_apply).
    pub fn undo(&mut self, undo: Undo) {
        let us = self.stm.flip(); // side that made the move
        let them = self.stm;
        let source = undo.mv.source();
        let dest = undo.mv.dest();

        self.sides[us.index()] = self.sides[us.index()].without(dest).with(source);
        self.hash ^= piece_key(us, source) ^ piece_key(us, dest);

        if undo.captured {
            self.sides[them.index()] = self.sides[them.index()].with(dest);
            self.hash ^= piece_key(them, dest);
        }

        self.stm = us;
    }

    /// Pass the turn without moving (null-move probes only).
    #[inline]
    pub fn apply_null(&mut self) {
        self.stm = self.stm.flip();
    }

    /// Reverse [`apply_null`](Self::apply_null).
    #[inline]
    pub fn undo_null(&mut self) {
        self.stm = self.stm.flip();
    }

    /// The winning side, if the game is over by goal or elimination.
    pub fn winner(&self) -> Option<Color> {
        for side in Color::ALL {
            let goal = Bitboard::RANKS[side.goal_rank() as usize];
            if (self.pieces(side) & goal).is_nonempty() {
                return Some(side);
            }
            if self.pieces(side.flip()).is_empty() {
                return Some(side);
            }
        }
        None
    }

    /// Structural validation backing the searcher's fatal precondition check.
    pub fn is_consistent(&self) -> Result<(), BoardError> {
        if (self.sides[0] & self.sides[1]).is_nonempty() {
            return Err(BoardError::OverlappingSides);
        }
        for side in Color::ALL {
            let count = self.pieces(side).count();
            if count > 16 {
                return Err(BoardError::TooManyPieces {
                    side: if side == Color::White { "white" } else { "black" },
                    count,
                });
            }
        }
        if self.hash != self.recompute_hash() {
            return Err(BoardError::StaleHash);
        }
        Ok(())
    }

    fn recompute_hash(&self) -> u64 {
        let mut hash = 0;
        for side in Color::ALL {
            for sq in self.pieces(side).iter() {
                hash ^= piece_key(side, sq);
            }
        }
        hash
    }
}

impl fmt::Display for Board {
    /// Render as an 8x8 grid, rank 8 at the top, with the side to move below.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rank in (0..8u8).rev() {
            for file in 0..8u8 {
                let sq = Square::new(rank, file);
                let ch = match self.piece_at(sq) {
                    Some(Color::White) => 'P',
                    Some(Color::Black) => 'p',
                    None => '.',
                };
                write!(f, "{ch}")?;
            }
            writeln!(f)?;
        }
        write!(f, "{} to move", self.stm)
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        fmt::Display::fmt(self, f)
    }
}
