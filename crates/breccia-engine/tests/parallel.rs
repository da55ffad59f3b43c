//! Integration tests for the parallel split-point search.
//!
//! Verifies the cross-thread properties: determinism modulo threading,
//! time-budget discipline, cooperative interruption, split-point recycling
//! (asserted inside `search_id` itself), and proven-win reporting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use breccia_core::Board;
use breccia_engine::{
    FixedBudget, Outcome, SearchOutcome, Searcher, SearcherConfig, WIN_SCORE, WIN_THRESHOLD,
};

const MIDGAME: &str = "ppp3pp/2pppp2/8/3Pp3/4P3/8/PPP2PPP/2PPP3 w";

const RACE: &str = "8/2P5/8/8/5p2/8/8/8 w";

fn search_with_threads(notation: &str, depth: u8, threads: usize) -> SearchOutcome {
    let board: Board = notation.parse().expect("test notation parses");
    let mut searcher = Searcher::new(SearcherConfig {
        num_threads: threads,
        ..SearcherConfig::default()
    });
    searcher.search_id(&board, &[], depth, 0.0)
}

// ── Basic correctness ─────────────────────────────────────────────────────────

#[test]
fn single_thread_returns_legal_move() {
    let outcome = search_with_threads(MIDGAME, 4, 1);
    let best = outcome.best_move.expect("midgame position has moves");
    let mut board: Board = MIDGAME.parse().unwrap();
    assert!(
        board.try_apply(best).is_ok(),
        "best move {best} must be legal"
    );
    assert_eq!(outcome.depth, 4);
    assert_eq!(outcome.outcome, Outcome::Complete);
}

#[test]
fn multi_thread_returns_legal_move() {
    for threads in [2, 4] {
        let outcome = search_with_threads(MIDGAME, 4, threads);
        let best = outcome
            .best_move
            .unwrap_or_else(|| panic!("{threads}-thread search returned no move"));
        let mut board: Board = MIDGAME.parse().unwrap();
        assert!(
            board.try_apply(best).is_ok(),
            "{threads}-thread best move {best} must be legal"
        );
    }
}

#[test]
fn startpos_various_thread_counts() {
    let board = Board::starting_position();
    for threads in [1, 2, 4] {
        let mut searcher = Searcher::new(SearcherConfig {
            num_threads: threads,
            ..SearcherConfig::default()
        });
        let outcome = searcher.search_id(&board, &[], 4, 0.0);
        assert!(
            outcome.best_move.is_some(),
            "startpos with {threads} threads returned no move"
        );
        assert!(outcome.stats.total_nodes() > 0);
    }
}

// ── Determinism modulo threading ──────────────────────────────────────────────

#[test]
fn determinism_across_thread_counts() {
    let single = search_with_threads(MIDGAME, 5, 1);
    for threads in [2, 4] {
        let multi = search_with_threads(MIDGAME, 5, threads);
        assert_eq!(
            multi.best_move, single.best_move,
            "{threads}-thread best move diverged from single-thread"
        );
        assert_eq!(
            multi.eval, single.eval,
            "{threads}-thread eval diverged from single-thread"
        );
    }
}

#[test]
fn determinism_from_startpos() {
    let board = Board::starting_position();
    let run = |threads: usize| {
        let mut searcher = Searcher::new(SearcherConfig {
            num_threads: threads,
            ..SearcherConfig::default()
        });
        searcher.search_id(&board, &[], 4, 0.0)
    };
    let single = run(1);
    let quad = run(4);
    assert_eq!(quad.best_move, single.best_move);
    assert_eq!(quad.eval, single.eval);
}

#[test]
fn repeated_search_is_stable() {
    // A warm transposition table must not change the answer.
    let board: Board = MIDGAME.parse().unwrap();
    let mut searcher = Searcher::new(SearcherConfig::default());
    let first = searcher.search_id(&board, &[], 4, 0.0);
    let second = searcher.search_id(&board, &[], 4, 0.0);
    assert_eq!(second.best_move, first.best_move);
    assert_eq!(second.eval, first.eval);
}

// ── Proven results ────────────────────────────────────────────────────────────

#[test]
fn forced_win_has_exact_distance_and_pv() {
    // White wins in 3 plies: advance, any black reply, reach goal.
    for threads in [1, 4] {
        let outcome = search_with_threads(RACE, 5, threads);
        assert_eq!(outcome.outcome, Outcome::ProvenWin);
        assert_eq!(
            outcome.eval,
            WIN_SCORE - 3,
            "win distance must be exactly 3 plies ({threads} threads)"
        );
        assert_eq!(
            outcome.pv.len(),
            3,
            "PV of a win in 3 has exactly 3 moves ({threads} threads)"
        );
    }
}

#[test]
fn hopeless_position_reports_loss() {
    // Black runner on e2 with white unable to defend; white to move.
    let outcome = search_with_threads("p7/8/8/8/8/8/4p3/7P w", 4, 2);
    assert!(
        outcome.eval < -WIN_THRESHOLD,
        "undefendable runner must prove a loss, got {}",
        outcome.eval
    );
}

// ── Time budget and interruption ──────────────────────────────────────────────

#[test]
fn time_budget_respected() {
    let board: Board = MIDGAME.parse().unwrap();
    let mut searcher = Searcher::new(SearcherConfig {
        num_threads: 4,
        ..SearcherConfig::default()
    });

    let budget = 0.3;
    let started = Instant::now();
    let outcome = searcher.search_id(&board, &[], 60, budget);
    let elapsed = started.elapsed();

    assert!(
        elapsed < Duration::from_secs_f64(budget) + Duration::from_secs(1),
        "search overran the budget: {elapsed:?}"
    );
    assert!(
        outcome.best_move.is_some(),
        "a timed-out search still returns its best-so-far move"
    );
}

#[test]
fn external_interrupt_terminates_search() {
    let board: Board = MIDGAME.parse().unwrap();
    let mut searcher = Searcher::new(SearcherConfig {
        num_threads: 4,
        ..SearcherConfig::default()
    });
    searcher.set_search_id(42);

    // Interrupt from a background thread shortly after the search starts.
    let control = searcher.control();
    let interrupter = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        control.interrupt(42);
    });

    let started = Instant::now();
    let outcome = searcher.search_id(&board, &[], 60, 0.0);
    interrupter.join().unwrap();

    assert_eq!(outcome.outcome, Outcome::Interrupted);
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "interrupt must terminate the search promptly"
    );
}

#[test]
fn fixed_budget_time_control_is_consulted() {
    let board: Board = MIDGAME.parse().unwrap();
    let mut searcher = Searcher::new(SearcherConfig {
        num_threads: 2,
        ..SearcherConfig::default()
    });
    searcher.set_time_control(Arc::new(FixedBudget::new(0.2)));

    let started = Instant::now();
    searcher.search_id(&board, &[], 60, 0.0);
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "installed time control must bound the search"
    );
}

// ── Read-back API ─────────────────────────────────────────────────────────────

#[test]
fn readback_matches_outcome() {
    let board: Board = MIDGAME.parse().unwrap();
    let mut searcher = Searcher::new(SearcherConfig {
        num_threads: 2,
        ..SearcherConfig::default()
    });
    let outcome = searcher.search_id(&board, &[], 4, 0.0);

    assert_eq!(searcher.best_move(), outcome.best_move);
    assert_eq!(searcher.id_pv(), outcome.pv.as_slice());
    assert_eq!(searcher.stats(), outcome.stats);
    assert!(!searcher.sorted_root_moves().is_empty());
    assert_eq!(
        outcome.pv.first().copied(),
        outcome.best_move,
        "PV starts with the best move"
    );
}

#[test]
fn stats_aggregate_across_workers() {
    let outcome = search_with_threads(MIDGAME, 5, 4);
    assert!(outcome.stats.nodes > 0, "main-search nodes counted");
    assert!(outcome.stats.qnodes > 0, "quiescence nodes counted");
    // Work stealing is timing-dependent, but publication is not: a depth-5
    // search of a 20+ move position always opens stealable nodes.
    assert!(
        outcome.stats.publications > 0,
        "split points should be publicized"
    );
}
