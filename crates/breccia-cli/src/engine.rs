//! Event-driven engine loop: commands from stdin, searches on a worker
//! thread, results back over a channel.

use std::io::{self, BufRead};
use std::sync::{mpsc, Arc};

use tracing::{debug, warn};

use breccia_core::Board;
use breccia_engine::{Outcome, SearchControl, SearchOutcome, Searcher, SearcherConfig};

use crate::command::{parse_command, Command, GoParams};
use crate::error::ProtocolError;

/// Configuration knobs adjustable via `threads` and `hash`.
struct EngineConfig {
    threads: usize,
    hash_mb: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            hash_mb: 16,
        }
    }
}

/// Whether the engine is idle or has a search in flight.
enum EngineState {
    Idle,
    Searching,
}

/// Events processed by the main engine loop.
enum EngineEvent {
    Command(Result<Command, ProtocolError>),
    SearchDone(Box<SearchDone>),
    InputClosed,
}

/// Payload returned by the search thread when it finishes.
struct SearchDone {
    outcome: SearchOutcome,
    searcher: Searcher,
}

/// The protocol engine: current position, searcher, and in-flight state.
pub struct CliEngine {
    board: Board,
    history: Vec<u64>,
    searcher: Option<Searcher>,
    /// Control handle kept while the searcher is away on the search thread.
    active_control: Option<Arc<SearchControl>>,
    state: EngineState,
    config: EngineConfig,
    current_id: u64,
    /// Thread-count change to apply when the search thread returns.
    pending_threads: Option<usize>,
    /// Hash resize (MB) to apply when the search thread returns.
    pending_hash: Option<usize>,
}

impl CliEngine {
    /// Create an engine at the starting position with default settings.
    pub fn new() -> Self {
        let config = EngineConfig::default();
        let searcher = Searcher::new(SearcherConfig {
            num_threads: config.threads,
            tt_mb: config.hash_mb,
            ..SearcherConfig::default()
        });
        Self {
            board: Board::starting_position(),
            history: Vec::new(),
            searcher: Some(searcher),
            active_control: None,
            state: EngineState::Idle,
            config,
            current_id: 0,
            pending_threads: None,
            pending_hash: None,
        }
    }

    /// Run the event loop, reading stdin until `quit` or input closes.
    pub fn run(mut self) -> io::Result<()> {
        let (tx, rx) = mpsc::channel::<EngineEvent>();

        let stdin_tx = tx.clone();
        std::thread::spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        debug!(cmd = %trimmed, "received command");
                        let cmd = parse_command(trimmed);
                        if stdin_tx.send(EngineEvent::Command(cmd)).is_err() {
                            return;
                        }
                    }
                    Err(_) => break,
                }
            }
            let _ = stdin_tx.send(EngineEvent::InputClosed);
        });

        for event in &rx {
            match event {
                EngineEvent::Command(Ok(cmd)) => {
                    if !self.handle_command(cmd, &tx) {
                        break;
                    }
                }
                EngineEvent::Command(Err(err)) => {
                    println!("error {err}");
                }
                EngineEvent::SearchDone(done) => self.handle_search_done(*done),
                EngineEvent::InputClosed => break,
            }
        }

        Ok(())
    }

    /// Dispatch one command; returns `false` on `quit`.
    fn handle_command(&mut self, cmd: Command, tx: &mpsc::Sender<EngineEvent>) -> bool {
        match cmd {
            Command::Id => {
                println!("breccia {}", env!("CARGO_PKG_VERSION"));
            }
            Command::Position { board, history } => {
                if matches!(self.state, EngineState::Searching) {
                    warn!("position ignored while searching");
                } else {
                    self.board = board;
                    self.history = history;
                }
            }
            Command::Go(params) => self.handle_go(params, tx),
            Command::Stop => {
                if let Some(control) = &self.active_control {
                    control.interrupt(self.current_id);
                }
            }
            Command::SearchId(id) => {
                self.current_id = id;
                if let Some(searcher) = &self.searcher {
                    searcher.set_search_id(id);
                }
            }
            Command::Interrupt(id) => {
                if let Some(control) = &self.active_control {
                    control.interrupt(id);
                } else if let Some(searcher) = &self.searcher {
                    searcher.interrupt_external(id);
                }
            }
            Command::Threads(n) => {
                self.pending_threads = Some(n.max(1));
                self.apply_pending_if_idle();
            }
            Command::Hash(mb) => {
                self.pending_hash = Some(mb.max(1));
                self.apply_pending_if_idle();
            }
            Command::Display => {
                println!("{}", self.board);
            }
            Command::Unknown(token) => {
                if !token.is_empty() {
                    warn!(%token, "unknown command");
                }
            }
            Command::Quit => return false,
        }
        true
    }

    /// Launch a search on a worker thread, handing it the searcher.
    fn handle_go(&mut self, params: GoParams, tx: &mpsc::Sender<EngineEvent>) {
        let Some(mut searcher) = self.searcher.take() else {
            warn!("go ignored: search already running");
            return;
        };

        searcher.set_search_id(self.current_id);
        self.active_control = Some(searcher.control());
        self.state = EngineState::Searching;

        let board = self.board.clone();
        let history = self.history.clone();
        let depth = params.depth.unwrap_or(64);
        let max_seconds = params.movetime.unwrap_or(0.0);
        let done_tx = tx.clone();

        std::thread::spawn(move || {
            let outcome = searcher.search_id(&board, &history, depth, max_seconds);
            let _ = done_tx.send(EngineEvent::SearchDone(Box::new(SearchDone {
                outcome,
                searcher,
            })));
        });
    }

    /// Print the result and take the searcher back.
    fn handle_search_done(&mut self, done: SearchDone) {
        let outcome = done.outcome;
        self.searcher = Some(done.searcher);
        self.active_control = None;
        self.state = EngineState::Idle;
        self.apply_pending_if_idle();

        let pv: Vec<String> = outcome.pv.iter().map(|mv| format!("{mv}")).collect();
        let status = match outcome.outcome {
            Outcome::Complete => "complete",
            Outcome::TimedOut => "timeout",
            Outcome::Interrupted => "interrupted",
            Outcome::ProvenWin => "win",
            Outcome::ProvenLoss => "loss",
            Outcome::NoLegalMoves => "stuck",
        };
        println!(
            "info depth {} eval {} nodes {} status {} pv {}",
            outcome.depth,
            outcome.eval,
            outcome.stats.total_nodes(),
            status,
            pv.join(" ")
        );
        match outcome.best_move {
            Some(mv) => println!("bestmove {mv}"),
            None => println!("bestmove none"),
        }
    }

    /// Apply deferred thread/hash changes once no search holds the searcher.
    fn apply_pending_if_idle(&mut self) {
        if !matches!(self.state, EngineState::Idle) {
            return;
        }
        if let Some(threads) = self.pending_threads.take() {
            self.config.threads = threads;
            let searcher = Searcher::new(SearcherConfig {
                num_threads: self.config.threads,
                tt_mb: self.config.hash_mb,
                ..SearcherConfig::default()
            });
            self.searcher = Some(searcher);
        }
        if let Some(mb) = self.pending_hash.take() {
            self.config.hash_mb = mb;
            if let Some(searcher) = self.searcher.as_mut() {
                searcher.resize_tt(mb);
            }
        }
    }
}

impl Default for CliEngine {
    fn default() -> Self {
        Self::new()
    }
}
