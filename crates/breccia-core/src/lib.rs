//! Core Breakthrough types: board representation, move generation, and game rules.

mod bitboard;
mod board;
mod color;
mod error;
mod movegen;
mod moves;
mod notation;
mod square;
mod zobrist;

pub use bitboard::Bitboard;
pub use board::{Board, Undo};
pub use color::Color;
pub use error::{BoardError, MoveError, NotationError};
pub use movegen::{
    capture_defense_moves, capture_moves, full_moves, goal_defense_moves, has_any_move,
    quiescence_moves,
};
pub use moves::{Move, MoveList, MAX_MOVES};
pub use notation::STARTING_NOTATION;
pub use square::Square;
pub use zobrist::situational_key;
