//! Error types for notation parsing, board validation, and move application.

use std::fmt;

use crate::moves::Move;

/// Errors that occur when parsing a position notation string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotationError {
    /// The string does not have exactly 2 space-separated fields.
    WrongFieldCount {
        /// Number of fields found.
        found: usize,
    },
    /// The piece placement section does not have exactly 8 ranks.
    WrongRankCount {
        /// Number of ranks found.
        found: usize,
    },
    /// A rank describes more or fewer than 8 squares.
    BadRankLength {
        /// Zero-based rank index as written (0 = rank 8, 7 = rank 1).
        rank_index: usize,
        /// Number of squares described.
        length: usize,
    },
    /// An unrecognized character appeared in the piece placement.
    InvalidPieceChar {
        /// The invalid character.
        character: char,
    },
    /// The side-to-move field is not "w" or "b".
    InvalidSide {
        /// The invalid side string.
        found: String,
    },
    /// The parsed board fails structural validation.
    InvalidBoard {
        /// The underlying board validation error.
        source: BoardError,
    },
}

impl fmt::Display for NotationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotationError::WrongFieldCount { found } => {
                write!(f, "expected 2 notation fields, found {found}")
            }
            NotationError::WrongRankCount { found } => {
                write!(f, "expected 8 ranks in piece placement, found {found}")
            }
            NotationError::BadRankLength { rank_index, length } => {
                write!(f, "rank {rank_index} describes {length} squares, expected 8")
            }
            NotationError::InvalidPieceChar { character } => {
                write!(f, "invalid piece character: '{character}'")
            }
            NotationError::InvalidSide { found } => {
                write!(f, "invalid side to move: \"{found}\"")
            }
            NotationError::InvalidBoard { source } => {
                write!(f, "invalid board: {source}")
            }
        }
    }
}

impl std::error::Error for NotationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NotationError::InvalidBoard { source } => Some(source),
            _ => None,
        }
    }
}

impl From<BoardError> for NotationError {
    fn from(source: BoardError) -> Self {
        NotationError::InvalidBoard { source }
    }
}

/// Errors from structural validation of a [`Board`](crate::board::Board).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    /// The two side bitboards claim the same square.
    #[error("white and black bitboards overlap")]
    OverlappingSides,
    /// A side has more pieces than the 16 it starts with.
    #[error("{side} has {count} pieces, maximum is 16")]
    TooManyPieces {
        /// The offending side.
        side: &'static str,
        /// Number of pieces found.
        count: u32,
    },
    /// The incremental hash does not match a from-scratch recomputation.
    #[error("incremental hash is stale")]
    StaleHash,
}

/// Rejection reasons when speculatively applying a move.
///
/// Move lists are generated ahead of legality re-verification in some fast
/// paths (hash and killer moves), so an illegal candidate is an ordinary,
/// skippable outcome rather than a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MoveError {
    /// The source square holds no piece of the side to move.
    #[error("no piece to move for {mv}")]
    EmptySource {
        /// The rejected move.
        mv: Move,
    },
    /// The destination is not reachable by a legal Breakthrough step.
    #[error("illegal step geometry for {mv}")]
    BadStep {
        /// The rejected move.
        mv: Move,
    },
    /// A straight step onto an occupied square, or a capture of a friendly piece.
    #[error("destination blocked for {mv}")]
    Blocked {
        /// The rejected move.
        mv: Move,
    },
}

#[cfg(test)]
mod tests {
    use super::{BoardError, MoveError, NotationError};
    use crate::moves::Move;

    #[test]
    fn notation_error_display() {
        let err = NotationError::WrongFieldCount { found: 3 };
        assert_eq!(format!("{err}"), "expected 2 notation fields, found 3");
    }

    #[test]
    fn board_error_display() {
        let err = BoardError::OverlappingSides;
        assert_eq!(format!("{err}"), "white and black bitboards overlap");
    }

    #[test]
    fn notation_error_from_board_error() {
        let err: NotationError = BoardError::StaleHash.into();
        assert!(matches!(err, NotationError::InvalidBoard { .. }));
    }

    #[test]
    fn move_error_carries_move() {
        let mv = Move::from_coords("e2e3").unwrap();
        let err = MoveError::EmptySource { mv };
        assert!(format!("{err}").contains("e2e3"));
    }
}
