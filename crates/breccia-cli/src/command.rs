//! Protocol command parsing.

use breccia_core::{Board, Move};

use crate::error::ProtocolError;

/// Parameters for the `go` command.
///
/// All fields are optional; a bare `go` searches to the default depth.
#[derive(Debug, Clone, Default)]
pub struct GoParams {
    /// Search to this depth only.
    pub depth: Option<u8>,
    /// Search for at most this many seconds.
    pub movetime: Option<f64>,
}

/// A parsed protocol command.
#[derive(Debug)]
pub enum Command {
    /// `id` -- print engine name and version.
    Id,
    /// `position start | <notation>` with an optional `moves ...` tail.
    Position {
        /// The resulting board after applying any move tail.
        board: Board,
        /// Situational hashes of the positions along the move tail.
        history: Vec<u64>,
    },
    /// `go` -- start searching with the given limits.
    Go(GoParams),
    /// `stop` -- interrupt the running search.
    Stop,
    /// `searchid <n>` -- set the id of the next search.
    SearchId(u64),
    /// `interrupt <n>` -- interrupt the search with the given id.
    Interrupt(u64),
    /// `threads <n>` -- set the worker thread count.
    Threads(usize),
    /// `hash <mb>` -- resize the transposition table.
    Hash(usize),
    /// `display` -- print the current board.
    Display,
    /// `quit` -- exit.
    Quit,
    /// Unrecognized command (ignored with a warning).
    Unknown(String),
}

/// Parse a single input line into a [`Command`].
pub fn parse_command(line: &str) -> Result<Command, ProtocolError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return Ok(Command::Unknown(String::new()));
    }

    match tokens[0] {
        "id" => Ok(Command::Id),
        "stop" => Ok(Command::Stop),
        "display" => Ok(Command::Display),
        "quit" => Ok(Command::Quit),
        "position" => parse_position(&tokens[1..]),
        "go" => parse_go(&tokens[1..]),
        "searchid" => Ok(Command::SearchId(parse_number(tokens.get(1), "searchid")?)),
        "interrupt" => Ok(Command::Interrupt(parse_number(tokens.get(1), "interrupt")?)),
        "threads" => Ok(Command::Threads(parse_number(tokens.get(1), "threads")?)),
        "hash" => Ok(Command::Hash(parse_number(tokens.get(1), "hash")?)),
        other => Ok(Command::Unknown(other.to_string())),
    }
}

/// Parse the `position` command arguments.
///
/// Supports:
/// - `position start [moves e2e3 d7d6 ...]`
/// - `position <placement> <side> [moves e2e3 ...]`
fn parse_position(tokens: &[&str]) -> Result<Command, ProtocolError> {
    if tokens.is_empty() {
        return Err(ProtocolError::MalformedPosition);
    }

    let (mut board, rest) = if tokens[0] == "start" {
        (Board::starting_position(), &tokens[1..])
    } else {
        if tokens.len() < 2 {
            return Err(ProtocolError::MalformedPosition);
        }
        let notation = format!("{} {}", tokens[0], tokens[1]);
        let board: Board = notation.parse()?;
        (board, &tokens[2..])
    };

    let mut history = Vec::new();
    if !rest.is_empty() {
        if rest[0] != "moves" {
            return Err(ProtocolError::MalformedPosition);
        }
        for token in &rest[1..] {
            let mv = Move::from_coords(token).ok_or_else(|| ProtocolError::InvalidMove {
                token: token.to_string(),
            })?;
            history.push(board.situational_hash());
            board.try_apply(mv).map_err(|_| ProtocolError::InvalidMove {
                token: token.to_string(),
            })?;
        }
    }

    Ok(Command::Position { board, history })
}

/// Parse the `go` command arguments. Unknown tokens are skipped.
fn parse_go(tokens: &[&str]) -> Result<Command, ProtocolError> {
    let mut params = GoParams::default();

    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            "depth" => {
                params.depth = Some(parse_number(tokens.get(i + 1), "depth")?);
                i += 2;
            }
            "movetime" => {
                let millis: u64 = parse_number(tokens.get(i + 1), "movetime")?;
                params.movetime = Some(millis as f64 / 1000.0);
                i += 2;
            }
            _ => i += 1,
        }
    }

    Ok(Command::Go(params))
}

fn parse_number<T: std::str::FromStr>(
    token: Option<&&str>,
    field: &'static str,
) -> Result<T, ProtocolError> {
    let token = token.ok_or(ProtocolError::InvalidNumber {
        field,
        found: String::new(),
    })?;
    token.parse().map_err(|_| ProtocolError::InvalidNumber {
        field,
        found: token.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::{parse_command, Command};
    use breccia_core::Color;

    #[test]
    fn parse_simple_commands() {
        assert!(matches!(parse_command("id").unwrap(), Command::Id));
        assert!(matches!(parse_command("stop").unwrap(), Command::Stop));
        assert!(matches!(parse_command("quit").unwrap(), Command::Quit));
        assert!(matches!(
            parse_command("flibbertigibbet").unwrap(),
            Command::Unknown(_)
        ));
    }

    #[test]
    fn parse_position_start_with_moves() {
        let cmd = parse_command("position start moves e2e3 d7d6").unwrap();
        let Command::Position { board, history } = cmd else {
            panic!("expected a position command");
        };
        assert_eq!(board.side_to_move(), Color::White);
        assert_eq!(history.len(), 2, "one hash per applied move");
    }

    #[test]
    fn parse_position_notation() {
        let cmd = parse_command("position 8/8/3p4/8/8/2P5/8/8 b").unwrap();
        let Command::Position { board, .. } = cmd else {
            panic!("expected a position command");
        };
        assert_eq!(board.side_to_move(), Color::Black);
    }

    #[test]
    fn parse_position_rejects_illegal_move() {
        assert!(parse_command("position start moves e2e5").is_err());
        assert!(parse_command("position start moves zzzz").is_err());
    }

    #[test]
    fn parse_go_limits() {
        let Command::Go(params) = parse_command("go depth 7 movetime 1500").unwrap() else {
            panic!("expected a go command");
        };
        assert_eq!(params.depth, Some(7));
        assert_eq!(params.movetime, Some(1.5));
    }

    #[test]
    fn parse_go_bare() {
        let Command::Go(params) = parse_command("go").unwrap() else {
            panic!("expected a go command");
        };
        assert!(params.depth.is_none());
        assert!(params.movetime.is_none());
    }

    #[test]
    fn parse_numeric_commands() {
        assert!(matches!(
            parse_command("threads 4").unwrap(),
            Command::Threads(4)
        ));
        assert!(matches!(parse_command("hash 64").unwrap(), Command::Hash(64)));
        assert!(matches!(
            parse_command("interrupt 9").unwrap(),
            Command::Interrupt(9)
        ));
        assert!(parse_command("threads four").is_err());
    }
}
