//! Quiescence search — resolve captures and goal runs before trusting the
//! static evaluator.

use breccia_core::{goal_defense_moves, quiescence_moves, Bitboard, Board, Move, MoveList};

use crate::eval::{evaluate, INF, WIN_SCORE};
use crate::search::heuristics::MAX_PLY;
use crate::search::stats::SearchStats;

/// Quiescence over captures and goal-running pushes, with stand-pat.
///
/// `ply` is the distance from the search root (win scores carry it).
/// `extra_eval` is the node's bias term, from the side to move's
/// perspective; it flips sign with each ply like any negamax value.
///
/// When the opponent has a runner one step from goal, standing pat is not
/// an option: only the generated defenses (plus our own tactical strikes)
/// are considered, and having none of them is a proven loss.
pub(crate) fn quiesce(
    board: &mut Board,
    ply: u8,
    mut alpha: i32,
    beta: i32,
    extra_eval: i32,
    stats: &mut SearchStats,
) -> i32 {
    stats.qnodes += 1;

    if let Some(winner) = board.winner() {
        return if winner == board.side_to_move() {
            WIN_SCORE - ply as i32
        } else {
            -(WIN_SCORE - ply as i32)
        };
    }

    let stand_pat = evaluate(board) + extra_eval;
    if ply as usize >= MAX_PLY {
        return stand_pat;
    }

    let us = board.side_to_move();
    let them = us.flip();
    let pre_goal_rank = (them.goal_rank() as i8 - them.forward()) as usize;
    let threatened =
        (board.pieces(them) & Bitboard::RANKS[pre_goal_rank]).is_nonempty();

    let mut best = -INF;
    if !threatened {
        // Standing pat is a valid lower bound when nothing forces us to act.
        best = stand_pat;
        if best >= beta {
            return best;
        }
        alpha = alpha.max(best);
    }

    let mut moves = MoveList::new();
    quiescence_moves(board, &mut moves);
    let mut defenses = MoveList::new();
    if threatened {
        goal_defense_moves(board, &mut defenses);
    }

    let mut tried_any = false;
    let all: Vec<Move> = moves
        .as_slice()
        .iter()
        .chain(defenses.as_slice().iter().filter(|mv| !moves.contains(**mv)))
        .copied()
        .collect();

    for mv in all {
        let undo = board.apply(mv);
        let score = -quiesce(board, ply + 1, -beta, -alpha, -extra_eval, stats);
        board.undo(undo);
        tried_any = true;

        if score > best {
            best = score;
            if score > alpha {
                alpha = score;
            }
        }
        if alpha >= beta {
            break;
        }
    }

    if !tried_any && threatened {
        // No defense generated: the runner lands two plies from now.
        return -(WIN_SCORE - (ply as i32 + 2));
    }

    best
}

#[cfg(test)]
mod tests {
    use super::quiesce;
    use crate::eval::{evaluate, INF, WIN_THRESHOLD};
    use crate::search::stats::SearchStats;
    use breccia_core::Board;

    fn run(notation: &str) -> (i32, SearchStats) {
        let mut board: Board = notation.parse().expect("test notation parses");
        let mut stats = SearchStats::default();
        let score = quiesce(&mut board, 0, -INF, INF, 0, &mut stats);
        (score, stats)
    }

    #[test]
    fn quiet_position_returns_stand_pat() {
        let notation = "8/p7/8/8/8/8/7P/8 w";
        let board: Board = notation.parse().unwrap();
        let (score, stats) = run(notation);
        assert_eq!(score, evaluate(&board), "no tactics means stand-pat");
        assert_eq!(stats.qnodes, 1);
    }

    #[test]
    fn hanging_capture_is_taken() {
        // White e4 can capture the undefended black d5.
        let (score, _) = run("p7/8/8/3p4/4P3/8/8/8 w");
        let board: Board = "p7/8/8/3p4/4P3/8/8/8 w".parse().unwrap();
        assert!(
            score > evaluate(&board),
            "winning a piece must beat standing pat"
        );
    }

    #[test]
    fn lost_runner_race_is_proven() {
        // Black runner on d2, white cannot capture or block it, and white
        // has no goal run of its own.
        let (score, _) = run("p7/8/8/8/8/8/3p4/7P w");
        assert!(
            score < -WIN_THRESHOLD,
            "undefendable runner is a proven loss, got {score}"
        );
    }

    #[test]
    fn defended_runner_is_captured() {
        // Black runner d2, white piece on c1 captures it.
        let (score, _) = run("p7/8/8/8/8/8/3p4/2P5 w");
        assert!(
            score > -WIN_THRESHOLD,
            "capturable runner is not a loss, got {score}"
        );
    }

    #[test]
    fn own_goal_run_is_found() {
        // White on e7 runs to e8 and wins; black's h-file piece is slow.
        let (score, _) = run("8/4P3/8/8/8/8/7p/8 w");
        assert!(
            score > WIN_THRESHOLD,
            "one-step goal run is a proven win, got {score}"
        );
    }

    #[test]
    fn terminal_position_scores_win_distance() {
        // White already on rank 8: black to move has lost.
        let (score, _) = run("4P3/8/8/8/8/8/7p/8 b");
        assert!(score < -WIN_THRESHOLD);
    }
}
