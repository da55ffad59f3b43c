//! Move generation: full-turn lists plus the tactical subsets the search
//! core consumes (captures, capture defenses, quiescence, goal defenses).

use crate::bitboard::Bitboard;
use crate::board::Board;
use crate::color::Color;
use crate::moves::{Move, MoveList};
use crate::square::Square;

/// Squares attacked by `side` (diagonal-forward reach of every piece).
#[inline]
fn attacks(board: &Board, side: Color) -> Bitboard {
    let pieces = board.pieces(side);
    pieces.forward_west(side) | pieces.forward_east(side)
}

/// Enemy pieces attacking `sq`, assuming `sq` belongs to the side to move.
#[inline]
fn attackers_of(board: &Board, sq: Square, us: Color) -> Bitboard {
    let bb = Bitboard::from_square(sq);
    // An enemy attacker sits one step "forward" of sq from our perspective.
    (bb.forward_west(us) | bb.forward_east(us)) & board.pieces(us.flip())
}

/// Generate all legal moves, captures first.
pub fn full_moves(board: &Board, list: &mut MoveList) {
    list.clear();
    let us = board.side_to_move();
    let them = board.pieces(us.flip());
    let empty = !board.occupied();

    for source in board.pieces(us).iter() {
        let bb = Bitboard::from_square(source);
        for dest in ((bb.forward_west(us) | bb.forward_east(us)) & them).iter() {
            list.push(Move::new(source, dest));
        }
    }
    for source in board.pieces(us).iter() {
        let bb = Bitboard::from_square(source);
        let quiet = (bb.forward(us) | bb.forward_west(us) | bb.forward_east(us)) & empty;
        for dest in quiet.iter() {
            list.push(Move::new(source, dest));
        }
    }
}

/// Generate only capturing moves.
pub fn capture_moves(board: &Board, list: &mut MoveList) {
    list.clear();
    let us = board.side_to_move();
    let them = board.pieces(us.flip());

    for source in board.pieces(us).iter() {
        let bb = Bitboard::from_square(source);
        for dest in ((bb.forward_west(us) | bb.forward_east(us)) & them).iter() {
            list.push(Move::new(source, dest));
        }
    }
}

/// Generate moves that answer an enemy capture threat: captures of any
/// attacker, plus moves of each threatened piece.
pub fn capture_defense_moves(board: &Board, list: &mut MoveList) {
    list.clear();
    let us = board.side_to_move();
    let threatened = attacks(board, us.flip()) & board.pieces(us);
    if threatened.is_empty() {
        return;
    }

    let mut all = MoveList::new();
    full_moves(board, &mut all);

    let mut targets = Bitboard::EMPTY;
    for sq in threatened.iter() {
        targets |= attackers_of(board, sq, us);
    }

    for &mv in &all {
        let is_counter_capture = targets.contains(mv.dest());
        let moves_threatened_piece = threatened.contains(mv.source());
        if (is_counter_capture || moves_threatened_piece) && !list.contains(mv) {
            list.push(mv);
        }
    }
}

/// Generate the quiescence subset: captures plus pushes into the last two
/// ranks (imminent goal runs).
pub fn quiescence_moves(board: &Board, list: &mut MoveList) {
    list.clear();
    let us = board.side_to_move();
    let them = board.pieces(us.flip());
    let empty = !board.occupied();

    let goal = us.goal_rank() as usize;
    let near_goal =
        Bitboard::RANKS[goal] | Bitboard::RANKS[(goal as i8 - us.forward()) as usize];

    for source in board.pieces(us).iter() {
        let bb = Bitboard::from_square(source);
        for dest in ((bb.forward_west(us) | bb.forward_east(us)) & them).iter() {
            list.push(Move::new(source, dest));
        }
        let runs = (bb.forward(us) | bb.forward_west(us) | bb.forward_east(us)) & empty & near_goal;
        for dest in runs.iter() {
            list.push(Move::new(source, dest));
        }
    }
}

/// Generate the shortest defenses against an enemy runner one step from its
/// goal: capture the runner, or occupy its straight landing square.
///
/// Diagonal landings cannot be blocked (the runner would capture the
/// blocker and still reach goal), so only the capture and the straight
/// block shorten the threat.
pub fn goal_defense_moves(board: &Board, list: &mut MoveList) {
    list.clear();
    let us = board.side_to_move();
    let them = us.flip();

    // Enemy pieces whose next step can reach their goal rank.
    let pre_goal_rank = (them.goal_rank() as i8 - them.forward()) as usize;
    let runners = board.pieces(them) & Bitboard::RANKS[pre_goal_rank];
    if runners.is_empty() {
        return;
    }

    for runner in runners.iter() {
        // Captures of the runner: our piece one step behind it (from the
        // runner's forward direction) on either diagonal.
        let bb = Bitboard::from_square(runner);
        let capturers = (bb.forward_west(them) | bb.forward_east(them)) & board.pieces(us);
        for source in capturers.iter() {
            let mv = Move::new(source, runner);
            if !list.contains(mv) {
                list.push(mv);
            }
        }

        // Blocks of the straight landing square.
        if let Some(landing) = runner.offset(them.forward(), 0) {
            for d_file in [-1i8, 0, 1] {
                if let Some(source) = landing.offset(-us.forward(), d_file) {
                    let mv = Move::new(source, landing);
                    if board.check_move(mv).is_ok() && !list.contains(mv) {
                        list.push(mv);
                    }
                }
            }
        }
    }
}

/// Return `true` if the side to move has at least one legal move.
pub fn has_any_move(board: &Board) -> bool {
    let us = board.side_to_move();
    let own = board.pieces(us);
    let them = board.pieces(us.flip());
    let empty = !board.occupied();

    let diag = own.forward_west(us) | own.forward_east(us);
    ((diag & (them | empty)) | (own.forward(us) & empty)).is_nonempty()
}
