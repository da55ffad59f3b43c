//! Static evaluation: material, advancement, connectivity, runner pressure.

use breccia_core::{Bitboard, Board, Color};

/// Score representing an unreachable upper/lower bound.
pub const INF: i32 = 30_000;

/// Base score for a proven win (adjusted by ply for win distance).
pub const WIN_SCORE: i32 = 29_000;

/// Scores beyond this threshold indicate a proven win or loss.
pub const WIN_THRESHOLD: i32 = 28_000;

/// Static evaluation never leaves `[-EVAL_MAX, EVAL_MAX]`, keeping the
/// sentinel band reserved for proven results.
pub const EVAL_MAX: i32 = 20_000;

/// Value of one piece.
const PIECE_VALUE: i32 = 100;

/// Bonus per piece by distance advanced from the home rank (0..7).
///
/// Steeply convex: a piece two steps from goal dominates a cluster of
/// stragglers.
const ADVANCE_BONUS: [i32; 8] = [0, 2, 5, 10, 20, 40, 90, 0];

/// Bonus for a piece defended by a friendly piece behind it.
const CONNECTED_BONUS: i32 = 6;

/// Penalty when an advanced piece can be captured and has no defender.
const LOOSE_RUNNER_PENALTY: i32 = 30;

/// Evaluate `board` from the side to move's perspective.
///
/// Terminal positions are not this function's business — the search scores
/// goal, elimination, and no-move outcomes with the sentinel band before
/// ever calling the evaluator.
pub fn evaluate(board: &Board) -> i32 {
    let us = board.side_to_move();
    let score = side_score(board, us) - side_score(board, us.flip());
    score.clamp(-EVAL_MAX, EVAL_MAX)
}

fn side_score(board: &Board, side: Color) -> i32 {
    let pieces = board.pieces(side);
    let enemy = board.pieces(side.flip());
    let mut score = pieces.count() as i32 * PIECE_VALUE;

    // Squares this side defends (diagonal-forward reach).
    let defended = pieces.forward_west(side) | pieces.forward_east(side);
    // Squares the enemy attacks.
    let attacked = enemy.forward_west(side.flip()) | enemy.forward_east(side.flip());

    for sq in pieces.iter() {
        let advance = if side == Color::White {
            sq.rank()
        } else {
            7 - sq.rank()
        };
        score += ADVANCE_BONUS[advance as usize];

        let here = Bitboard::from_square(sq);
        if (here & defended).is_nonempty() {
            score += CONNECTED_BONUS;
        } else if advance >= 4 && (here & attacked).is_nonempty() {
            score -= LOOSE_RUNNER_PENALTY;
        }
    }

    score
}

#[cfg(test)]
mod tests {
    use super::{evaluate, EVAL_MAX, WIN_THRESHOLD};
    use breccia_core::Board;

    #[test]
    fn starting_position_is_balanced() {
        let board = Board::starting_position();
        assert_eq!(evaluate(&board), 0, "symmetric position must score 0");
    }

    #[test]
    fn material_advantage_scores_positive() {
        let board: Board = "pppppppp/pppppppp/8/8/8/8/1PPPPPPP/PPPPPPPP b".parse().unwrap();
        // Black to move, black has one extra piece worth of material edge
        assert!(evaluate(&board) > 0, "side up a piece should score positive");
    }

    #[test]
    fn advancement_beats_a_rear_piece() {
        // White piece on rank 6 vs white piece on rank 2, same material
        let advanced: Board = "7p/8/3P4/8/8/8/8/8 w".parse().unwrap();
        let rear: Board = "7p/8/8/8/8/8/3P4/8 w".parse().unwrap();
        assert!(
            evaluate(&advanced) > evaluate(&rear),
            "advanced piece should outscore a rear one"
        );
    }

    #[test]
    fn eval_stays_inside_sentinel_band() {
        let board: Board = "1ppppppp/pppppppp/8/8/8/8/PPPPPPPP/PPPPPPP1 w".parse().unwrap();
        let score = evaluate(&board);
        assert!(score.abs() <= EVAL_MAX);
        assert!(score.abs() < WIN_THRESHOLD);
    }

    #[test]
    fn perspective_flips_with_side_to_move() {
        let white_view: Board = "8/8/3P4/8/8/8/6pp/8 w".parse().unwrap();
        let black_view: Board = "8/8/3P4/8/8/8/6pp/8 b".parse().unwrap();
        assert_eq!(evaluate(&white_view), -evaluate(&black_view));
    }
}
