//! Position notation: rank rows from rank 8 down, then the side to move.
//!
//! `P` is a white piece, `p` a black piece, digits are runs of empty
//! squares, `/` separates ranks. The starting position is
//! `pppppppp/pppppppp/8/8/8/8/PPPPPPPP/PPPPPPPP w`.

use std::fmt::Write as _;
use std::str::FromStr;

use crate::bitboard::Bitboard;
use crate::board::Board;
use crate::color::Color;
use crate::error::NotationError;
use crate::square::Square;

/// Notation for the standard starting position.
pub const STARTING_NOTATION: &str = "pppppppp/pppppppp/8/8/8/8/PPPPPPPP/PPPPPPPP w";

impl FromStr for Board {
    type Err = NotationError;

    fn from_str(s: &str) -> Result<Board, NotationError> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 2 {
            return Err(NotationError::WrongFieldCount { found: fields.len() });
        }

        let ranks: Vec<&str> = fields[0].split('/').collect();
        if ranks.len() != 8 {
            return Err(NotationError::WrongRankCount { found: ranks.len() });
        }

        let mut white = Bitboard::EMPTY;
        let mut black = Bitboard::EMPTY;

        for (rank_index, row) in ranks.iter().enumerate() {
            let rank = 7 - rank_index as u8; // first row is rank 8
            let mut file = 0u8;
            for ch in row.chars() {
                match ch {
                    'P' | 'p' => {
                        if file >= 8 {
                            return Err(NotationError::BadRankLength {
                                rank_index,
                                length: file as usize + 1,
                            });
                        }
                        let sq = Square::new(rank, file);
                        if ch == 'P' {
                            white = white.with(sq);
                        } else {
                            black = black.with(sq);
                        }
                        file += 1;
                    }
                    '1'..='8' => {
                        file += ch as u8 - b'0';
                    }
                    _ => return Err(NotationError::InvalidPieceChar { character: ch }),
                }
            }
            if file != 8 {
                return Err(NotationError::BadRankLength {
                    rank_index,
                    length: file as usize,
                });
            }
        }

        let stm = match fields[1] {
            "w" => Color::White,
            "b" => Color::Black,
            other => {
                return Err(NotationError::InvalidSide {
                    found: other.to_string(),
                });
            }
        };

        Ok(Board::from_parts(white, black, stm)?)
    }
}

impl Board {
    /// Serialize this position to notation accepted by [`FromStr`].
    pub fn to_notation(&self) -> String {
        let mut out = String::new();
        for rank in (0..8u8).rev() {
            let mut empty_run = 0;
            for file in 0..8u8 {
                let sq = Square::new(rank, file);
                match self.piece_at(sq) {
                    Some(side) => {
                        if empty_run > 0 {
                            let _ = write!(out, "{empty_run}");
                            empty_run = 0;
                        }
                        out.push(if side == Color::White { 'P' } else { 'p' });
                    }
                    None => empty_run += 1,
                }
            }
            if empty_run > 0 {
                let _ = write!(out, "{empty_run}");
            }
            if rank > 0 {
                out.push('/');
            }
        }
        let _ = write!(out, " {}", self.side_to_move());
        out
    }
}
